//! The sequence engine.
//!
//! A `Sequence` owns an immutable, ordered list of named stages, the control
//! [`Inbox`], the lifecycle update stream, and the state machine that walks
//! stages according to the directives their outcomes carry. Construction
//! goes through [`SequenceBuilder`]; a built sequence is started once and
//! observed through update subscriptions, lifecycle callbacks, and state
//! queries.

mod builder;
mod hooks;
mod runner;

pub use builder::SequenceBuilder;

use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use self::hooks::LifecycleHooks;
use crate::errors::{InboxError, SequenceError};
use crate::inbox::{Inbox, InboxHandle, Message};
use crate::stage::{Stage, StageName};
use crate::update::{SequenceUpdate, UpdateBus, UpdateFilter, UpdateKind};
use crate::util::lock;

/// Execution state of a sequence.
///
/// Monotonic: Idle -> InProgress -> Succeeded or Failed, and the two end
/// states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    Idle,
    InProgress,
    Succeeded,
    Failed,
}

impl SequenceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SequenceState::Succeeded | SequenceState::Failed)
    }
}

pub(crate) struct SequenceInner<N: StageName> {
    pub(crate) id: Uuid,
    pub(crate) name: Option<String>,
    pub(crate) stages: Vec<Stage<N>>,
    pub(crate) inbox: Inbox,
    pub(crate) bus: UpdateBus<N>,
    pub(crate) hooks: LifecycleHooks,
    pub(crate) state: Mutex<SequenceState>,
    pub(crate) cursor: AtomicIsize,
    pub(crate) log_updates: bool,
    pub(crate) started_at: Mutex<Option<DateTime<Utc>>>,
    pub(crate) finished_at: Mutex<Option<DateTime<Utc>>>,
}

/// The engine. Cheap to clone; clones share the same underlying run.
#[derive(Clone)]
pub struct Sequence<N: StageName> {
    pub(crate) inner: Arc<SequenceInner<N>>,
}

impl<N: StageName> Sequence<N> {
    pub fn builder() -> SequenceBuilder<N> {
        SequenceBuilder::new()
    }

    pub(crate) fn from_inner(inner: SequenceInner<N>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Start the run and return a receiver already subscribed to the update
    /// stream.
    ///
    /// `from` and `until` bound the run and default to the first and last
    /// stage. An unresolvable `until` means run to the last stage; an
    /// unresolvable `from` makes the run visit no stages and finalize
    /// immediately as failed. Only an Idle sequence can start; any other
    /// state is an error and leaves the sequence untouched.
    pub fn start(
        &self,
        from: Option<&N>,
        until: Option<&N>,
    ) -> Result<broadcast::Receiver<SequenceUpdate<N>>, SequenceError> {
        {
            let mut state = lock(&self.inner.state);
            if *state != SequenceState::Idle {
                return Err(SequenceError::AlreadyStarted { state: *state });
            }
            *state = SequenceState::InProgress;
        }
        *lock(&self.inner.started_at) = Some(Utc::now());

        let receiver = self.inner.bus.subscribe();
        let from = match from {
            None => Some(0),
            Some(name) => self.stage_position(name),
        };
        let until = until
            .and_then(|name| self.stage_position(name))
            .unwrap_or(self.inner.stages.len() - 1);

        tracing::debug!(
            id = %self.inner.id,
            name = self.inner.name.as_deref().unwrap_or("sequence"),
            stages = self.inner.stages.len(),
            "sequence starting"
        );
        let engine = self.clone();
        tokio::spawn(engine.run(from, until));
        Ok(receiver)
    }

    // ── Update stream ────────────────────────────────────────────────────

    /// Subscribe to updates emitted after this call. No replay: a receiver
    /// obtained after the run ended reports closure immediately.
    pub fn subscribe(&self) -> broadcast::Receiver<SequenceUpdate<N>> {
        self.inner.bus.subscribe()
    }

    /// Invoke `callback` for every update until the stream closes.
    pub fn listen<F>(&self, callback: F)
    where
        F: Fn(SequenceUpdate<N>) + Send + Sync + 'static,
    {
        self.on_update(UpdateFilter::any(), callback);
    }

    /// Invoke `callback` for every update matching `filter` until the
    /// stream closes.
    pub fn on_update<F>(&self, filter: UpdateFilter<N>, callback: F)
    where
        F: Fn(SequenceUpdate<N>) + Send + Sync + 'static,
    {
        let mut receiver = self.inner.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(update) => {
                        if filter.matches(&update) {
                            callback(update);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "update listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// The first update matching `filter`, or `None` if the stream closes
    /// without one.
    pub async fn wait_for(&self, filter: UpdateFilter<N>) -> Option<SequenceUpdate<N>> {
        let mut receiver = self.inner.bus.subscribe();
        loop {
            match receiver.recv().await {
                Ok(update) if filter.matches(&update) => return Some(update),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The terminal update, or `None` if the run already finished before
    /// this call.
    pub async fn wait_for_sequence_end(&self) -> Option<SequenceUpdate<N>> {
        self.wait_for(UpdateFilter::any().with_kind(UpdateKind::SequenceEnd))
            .await
    }

    /// Every update emitted so far, in emission order.
    pub fn history(&self) -> Vec<SequenceUpdate<N>> {
        self.inner.bus.history()
    }

    // ── Lifecycle callbacks ──────────────────────────────────────────────

    pub fn on_start(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.hooks.add_on_start(hook);
    }

    pub fn on_success(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.hooks.add_on_success(hook);
    }

    pub fn on_fail(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.hooks.add_on_fail(hook);
    }

    /// Runs once at the end of the run with the final success flag.
    pub fn on_done(&self, hook: impl Fn(bool) + Send + Sync + 'static) {
        self.inner.hooks.add_on_done(hook);
    }

    // ── Control messages ─────────────────────────────────────────────────

    /// Ask the running stage to skip ahead. Advisory: the stage has to
    /// consult the inbox to react.
    pub fn request_skip(&self) -> Result<(), InboxError> {
        self.inner.inbox.send(Message::Skip)
    }

    /// Ask the running stage to stop. Advisory, like `request_skip`.
    pub fn request_stop(&self) -> Result<(), InboxError> {
        self.inner.inbox.send(Message::Stop)
    }

    pub fn leave_message(&self, message: Message) -> Result<(), InboxError> {
        self.inner.inbox.send(message)
    }

    /// An observe-only handle on this sequence's inbox.
    pub fn inbox(&self) -> InboxHandle {
        self.inner.inbox.handle()
    }

    /// Relay every message from an upstream inbox into this sequence's
    /// inbox, until either side closes.
    pub fn forward_inbox(&self, upstream: &InboxHandle) {
        self.inner.inbox.forward_from(upstream);
    }

    // ── State queries ────────────────────────────────────────────────────

    pub fn state(&self) -> SequenceState {
        *lock(&self.inner.state)
    }

    pub fn is_idle(&self) -> bool {
        self.state() == SequenceState::Idle
    }

    pub fn is_in_progress(&self) -> bool {
        self.state() == SequenceState::InProgress
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_done_succeeded(&self) -> bool {
        self.state() == SequenceState::Succeeded
    }

    pub fn is_done_failed(&self) -> bool {
        self.state() == SequenceState::Failed
    }

    // ── Stage navigation ─────────────────────────────────────────────────

    /// Position of the named stage in the list.
    pub fn stage_position(&self, name: &N) -> Option<usize> {
        self.inner.stages.iter().position(|s| s.name() == name)
    }

    /// Name of the stage at `position`.
    pub fn stage_name(&self, position: usize) -> Option<&N> {
        self.inner.stages.get(position).map(Stage::name)
    }

    /// The stage listed immediately before the named one.
    pub fn stage_before(&self, name: &N) -> Option<&N> {
        let position = self.stage_position(name)?;
        position.checked_sub(1).and_then(|p| self.stage_name(p))
    }

    /// The stage listed immediately after the named one.
    pub fn stage_after(&self, name: &N) -> Option<&N> {
        self.stage_name(self.stage_position(name)? + 1)
    }

    /// The stage the cursor is on, if the run has visited one.
    pub fn current_stage(&self) -> Option<&N> {
        let cursor = self.inner.cursor.load(Ordering::SeqCst);
        usize::try_from(cursor).ok().and_then(|p| self.stage_name(p))
    }

    /// The stage before the cursor.
    pub fn prev_stage(&self) -> Option<&N> {
        let cursor = self.inner.cursor.load(Ordering::SeqCst);
        usize::try_from(cursor - 1).ok().and_then(|p| self.stage_name(p))
    }

    /// The stage after the cursor. Before the run starts this is the first
    /// stage.
    pub fn next_stage(&self) -> Option<&N> {
        let cursor = self.inner.cursor.load(Ordering::SeqCst);
        usize::try_from(cursor + 1).ok().and_then(|p| self.stage_name(p))
    }

    // ── Metadata ─────────────────────────────────────────────────────────

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.inner.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.stages.is_empty()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.started_at)
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.finished_at)
    }
}

impl<N: StageName> fmt::Debug for Sequence<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("stages", &self.inner.stages.len())
            .field("state", &self.state())
            .finish()
    }
}
