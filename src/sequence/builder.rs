//! Sequence construction.
//!
//! The builder assembles the immutable stage list, the optional display
//! name, the sequence-level default timeout, any lifecycle callbacks, and
//! the update-logging flag, then validates the lot: at least one stage,
//! unique names. The default timeout is applied to stages lacking their own
//! here, at construction time only.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::AtomicIsize;
use std::time::Duration;

use uuid::Uuid;

use super::hooks::LifecycleHooks;
use super::{Sequence, SequenceInner, SequenceState};
use crate::errors::SequenceError;
use crate::inbox::Inbox;
use crate::stage::{Action, Stage, StageName};
use crate::update::UpdateBus;

pub struct SequenceBuilder<N: StageName> {
    name: Option<String>,
    stages: Vec<Stage<N>>,
    default_timeout: Option<Duration>,
    log_updates: bool,
    hooks: LifecycleHooks,
}

impl<N: StageName> SequenceBuilder<N> {
    pub(crate) fn new() -> Self {
        Self {
            name: None,
            stages: Vec::new(),
            default_timeout: None,
            log_updates: false,
            hooks: LifecycleHooks::default(),
        }
    }

    /// Display name used in logs. Diagnostic only.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a stage. Stages run in the order they are added.
    pub fn stage(mut self, name: N, action: Action<N>) -> Self {
        self.stages.push(Stage::new(name, action));
        self
    }

    /// Append pre-built stages in order.
    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage<N>>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Deadline applied to every stage that does not set its own.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Emit every lifecycle update through `tracing` as well.
    pub fn log_updates(mut self, enabled: bool) -> Self {
        self.log_updates = enabled;
        self
    }

    pub fn on_start(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.add_on_start(hook);
        self
    }

    pub fn on_success(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.add_on_success(hook);
        self
    }

    pub fn on_fail(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.add_on_fail(hook);
        self
    }

    pub fn on_done(self, hook: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.hooks.add_on_done(hook);
        self
    }

    /// Validate and build the engine.
    pub fn build(self) -> Result<Sequence<N>, SequenceError> {
        if self.stages.is_empty() {
            return Err(SequenceError::EmptyStageList);
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name().clone()) {
                return Err(SequenceError::DuplicateStage {
                    name: format!("{:?}", stage.name()),
                });
            }
        }

        let mut stages = self.stages;
        for stage in &mut stages {
            stage.action_mut().or_default_timeout(self.default_timeout);
        }

        Ok(Sequence::from_inner(SequenceInner {
            id: Uuid::new_v4(),
            name: self.name,
            stages,
            inbox: Inbox::new(),
            bus: UpdateBus::new(),
            hooks: self.hooks,
            state: Mutex::new(SequenceState::Idle),
            cursor: AtomicIsize::new(-1),
            log_updates: self.log_updates,
            started_at: Mutex::new(None),
            finished_at: Mutex::new(None),
        }))
    }
}
