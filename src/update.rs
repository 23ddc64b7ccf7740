//! Lifecycle updates and the broadcast stream carrying them.
//!
//! A running sequence emits exactly one `SequenceStart`, a
//! `(StageStart, StageEnd)` pair per visited stage in visitation order, and
//! one terminal `SequenceEnd`, after which the stream closes permanently.
//! Late subscribers miss earlier updates; the append-only history retains
//! every update for post-hoc inspection.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::stage::StageName;
use crate::util::lock;

/// Broadcast capacity for lifecycle updates. Emission never blocks; a
/// receiver that falls this far behind skips ahead.
const UPDATE_CAPACITY: usize = 64;

/// One lifecycle event from a running sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SequenceUpdate<N: StageName> {
    SequenceStart,
    StageStart {
        stage: N,
    },
    StageEnd {
        stage: N,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extra: Option<Value>,
    },
    SequenceEnd {
        success: bool,
    },
}

impl<N: StageName> SequenceUpdate<N> {
    pub fn kind(&self) -> UpdateKind {
        match self {
            SequenceUpdate::SequenceStart => UpdateKind::SequenceStart,
            SequenceUpdate::StageStart { .. } => UpdateKind::StageStart,
            SequenceUpdate::StageEnd { .. } => UpdateKind::StageEnd,
            SequenceUpdate::SequenceEnd { .. } => UpdateKind::SequenceEnd,
        }
    }

    /// The stage this update concerns, for the per-stage kinds.
    pub fn stage(&self) -> Option<&N> {
        match self {
            SequenceUpdate::StageStart { stage } | SequenceUpdate::StageEnd { stage, .. } => {
                Some(stage)
            }
            _ => None,
        }
    }

    /// The success flag, for the end kinds.
    pub fn success(&self) -> Option<bool> {
        match self {
            SequenceUpdate::StageEnd { success, .. } | SequenceUpdate::SequenceEnd { success } => {
                Some(*success)
            }
            _ => None,
        }
    }

    pub fn extra(&self) -> Option<&Value> {
        match self {
            SequenceUpdate::StageEnd { extra, .. } => extra.as_ref(),
            _ => None,
        }
    }

    pub fn is_sequence_end(&self) -> bool {
        matches!(self, SequenceUpdate::SequenceEnd { .. })
    }
}

/// The four update kinds, for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    SequenceStart,
    StageStart,
    StageEnd,
    SequenceEnd,
}

/// Field-level filter for subscriptions; unset fields match anything.
#[derive(Debug, Clone)]
pub struct UpdateFilter<N: StageName> {
    kind: Option<UpdateKind>,
    stage: Option<N>,
    success: Option<bool>,
}

impl<N: StageName> UpdateFilter<N> {
    /// A filter matching every update.
    pub fn any() -> Self {
        Self {
            kind: None,
            stage: None,
            success: None,
        }
    }

    pub fn with_kind(mut self, kind: UpdateKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_stage(mut self, stage: N) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn matches(&self, update: &SequenceUpdate<N>) -> bool {
        if let Some(kind) = self.kind {
            if update.kind() != kind {
                return false;
            }
        }
        if let Some(stage) = &self.stage {
            if update.stage() != Some(stage) {
                return false;
            }
        }
        if let Some(success) = self.success {
            if update.success() != Some(success) {
                return false;
            }
        }
        true
    }
}

impl<N: StageName> Default for UpdateFilter<N> {
    fn default() -> Self {
        Self::any()
    }
}

/// Single-producer fan-out of updates plus the append-only history.
#[derive(Debug)]
pub(crate) struct UpdateBus<N: StageName> {
    sender: Mutex<Option<broadcast::Sender<SequenceUpdate<N>>>>,
    history: Mutex<Vec<SequenceUpdate<N>>>,
}

impl<N: StageName> UpdateBus<N> {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            sender: Mutex::new(Some(sender)),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Record the update in the history and fan it out to subscribers.
    pub(crate) fn emit(&self, update: SequenceUpdate<N>) {
        lock(&self.history).push(update.clone());
        if let Some(sender) = lock(&self.sender).as_ref() {
            // No live subscribers is fine; the history already has it.
            let _ = sender.send(update);
        }
    }

    /// Subscribe to updates emitted after this call. On a closed bus the
    /// returned receiver reports closure immediately.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SequenceUpdate<N>> {
        match lock(&self.sender).as_ref() {
            Some(sender) => sender.subscribe(),
            None => closed_receiver(),
        }
    }

    /// Close the stream permanently: subscribers see their receivers close
    /// once they drain what was already delivered.
    pub(crate) fn close(&self) {
        lock(&self.sender).take();
    }

    pub(crate) fn history(&self) -> Vec<SequenceUpdate<N>> {
        lock(&self.history).clone()
    }
}

fn closed_receiver<N: StageName>() -> broadcast::Receiver<SequenceUpdate<N>> {
    let (sender, receiver) = broadcast::channel(1);
    drop(sender);
    receiver
}
