//! The stage-walking state machine.
//!
//! One logical thread of control: the loop executes the current stage,
//! waits for its outcome (or its deadline), resolves the next index, and
//! repeats. Stages never overlap. Directive precedence when resolving the
//! next index: terminate first, then the jump directives, then the default
//! advance. Any resolution landing outside the running range ends the run.

use std::sync::atomic::Ordering;

use chrono::Utc;

use super::{Sequence, SequenceState};
use crate::outcome::{Directive, Outcome};
use crate::stage::StageName;
use crate::update::SequenceUpdate;
use crate::util::lock;

impl<N: StageName> Sequence<N> {
    /// Walk stages from `from` through at most `until`.
    ///
    /// `from` is `None` when the requested start stage did not resolve; the
    /// run then visits no stages and finalizes immediately as failed.
    pub(crate) async fn run(self, from: Option<usize>, until: usize) {
        self.emit(SequenceUpdate::SequenceStart);
        self.inner.hooks.fire_start();

        let mut success = false;
        let mut cursor = from;
        while let Some(index) = cursor {
            if index > until {
                break;
            }
            self.inner.cursor.store(index as isize, Ordering::SeqCst);
            let stage = &self.inner.stages[index];

            self.emit(SequenceUpdate::StageStart {
                stage: stage.name().clone(),
            });

            let outcome = stage.act(self.inner.inbox.handle()).await;

            success = outcome.succeeded();
            self.emit(SequenceUpdate::StageEnd {
                stage: stage.name().clone(),
                success,
                extra: outcome.extra().cloned(),
            });

            cursor = self.next_index(index, &outcome);
        }

        self.finalize(success);
    }

    /// Resolve the index the engine moves to after `outcome`. `None` ends
    /// the run, as does a `jump_to` naming an absent stage.
    fn next_index(&self, index: usize, outcome: &Outcome<N>) -> Option<usize> {
        if outcome.terminates() {
            return None;
        }
        match outcome.directive() {
            Directive::JumpBack { stages } => Some(index.saturating_sub(*stages)),
            Directive::JumpForward { stages } => Some(index.saturating_add(*stages)),
            Directive::JumpTo { stage } => self.stage_position(stage),
            Directive::None => Some(index + 1),
        }
    }

    /// End-of-run bookkeeping, in a fixed order: terminal update, state,
    /// callbacks, then closing the inbox and the update stream.
    fn finalize(&self, success: bool) {
        self.emit(SequenceUpdate::SequenceEnd { success });
        *lock(&self.inner.state) = if success {
            SequenceState::Succeeded
        } else {
            SequenceState::Failed
        };
        *lock(&self.inner.finished_at) = Some(Utc::now());
        self.inner.hooks.fire_done(success);
        self.inner.inbox.close();
        self.inner.bus.close();
        tracing::debug!(id = %self.inner.id, success, "sequence finished");
    }

    pub(crate) fn emit(&self, update: SequenceUpdate<N>) {
        if self.inner.log_updates {
            tracing::info!(
                id = %self.inner.id,
                name = self.inner.name.as_deref().unwrap_or("sequence"),
                update = ?update,
                "sequence update"
            );
        }
        self.inner.bus.emit(update);
    }
}
