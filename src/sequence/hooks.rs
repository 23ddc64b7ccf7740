//! Lifecycle callback registry.
//!
//! Callbacks are plain ordered lists of boxed closures, invoked in
//! registration order at their transition. Each fires exactly once per run:
//! `on_start` at sequence start, then at the end either `on_success` or
//! `on_fail`, followed by `on_done` with the final success flag.

use std::sync::Mutex;

use crate::util::lock;

type TransitionHook = Box<dyn Fn() + Send + Sync>;
type DoneHook = Box<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
pub(crate) struct LifecycleHooks {
    on_start: Mutex<Vec<TransitionHook>>,
    on_success: Mutex<Vec<TransitionHook>>,
    on_fail: Mutex<Vec<TransitionHook>>,
    on_done: Mutex<Vec<DoneHook>>,
}

impl LifecycleHooks {
    pub(crate) fn add_on_start(&self, hook: impl Fn() + Send + Sync + 'static) {
        lock(&self.on_start).push(Box::new(hook));
    }

    pub(crate) fn add_on_success(&self, hook: impl Fn() + Send + Sync + 'static) {
        lock(&self.on_success).push(Box::new(hook));
    }

    pub(crate) fn add_on_fail(&self, hook: impl Fn() + Send + Sync + 'static) {
        lock(&self.on_fail).push(Box::new(hook));
    }

    pub(crate) fn add_on_done(&self, hook: impl Fn(bool) + Send + Sync + 'static) {
        lock(&self.on_done).push(Box::new(hook));
    }

    pub(crate) fn fire_start(&self) {
        for hook in lock(&self.on_start).iter() {
            hook();
        }
    }

    pub(crate) fn fire_done(&self, success: bool) {
        let outcome_hooks = if success {
            &self.on_success
        } else {
            &self.on_fail
        };
        for hook in lock(outcome_hooks).iter() {
            hook();
        }
        for hook in lock(&self.on_done).iter() {
            hook(success);
        }
    }
}
