//! Stages and the asynchronous actions behind them.
//!
//! A `Stage` pairs a name with an `Action`; an `Action` bundles the work
//! itself (anything implementing [`StageAction`], usually a closure wrapped
//! by [`Action::from_fn`]) with its fixed arguments and an optional
//! execution deadline.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;

use crate::inbox::InboxHandle;
use crate::outcome::Outcome;

/// Bounds for stage identifiers. Blanket-implemented: any cloneable,
/// comparable, hashable value type qualifies, typically a small enum.
pub trait StageName: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static> StageName for T {}

/// Fixed keyword arguments handed to an action on every invocation.
pub type ActionArgs = HashMap<String, Value>;

/// The unit of work behind a stage.
#[async_trait]
pub trait StageAction<N: StageName>: Send + Sync {
    /// Run the work. `outcome` is a fresh accumulator; the returned value
    /// carries the success flag and navigation directive for the engine.
    async fn run(&self, outcome: Outcome<N>, args: ActionArgs, inbox: InboxHandle) -> Outcome<N>;
}

/// Adapter implementing [`StageAction`] for plain async closures.
struct FnAction<F, Fut> {
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<N, F, Fut> StageAction<N> for FnAction<F, Fut>
where
    N: StageName,
    F: Fn(Outcome<N>, ActionArgs, InboxHandle) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome<N>> + Send + 'static,
{
    async fn run(&self, outcome: Outcome<N>, args: ActionArgs, inbox: InboxHandle) -> Outcome<N> {
        (self.func)(outcome, args, inbox).await
    }
}

/// An asynchronous action with its fixed arguments and optional deadline.
/// Immutable once built; a missing deadline may be filled in from the
/// sequence-level default at construction time only.
pub struct Action<N: StageName> {
    act: Arc<dyn StageAction<N>>,
    args: ActionArgs,
    timeout: Option<Duration>,
}

impl<N: StageName> Action<N> {
    pub fn new(act: impl StageAction<N> + 'static) -> Self {
        Self {
            act: Arc::new(act),
            args: ActionArgs::new(),
            timeout: None,
        }
    }

    /// Wrap an async closure `(outcome, args, inbox) -> outcome`.
    pub fn from_fn<F, Fut>(func: F) -> Self
    where
        F: Fn(Outcome<N>, ActionArgs, InboxHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<N>> + Send + 'static,
    {
        Self::new(FnAction {
            func,
            _marker: PhantomData,
        })
    }

    pub fn with_args(mut self, args: ActionArgs) -> Self {
        self.args = args;
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn args(&self) -> &ActionArgs {
        &self.args
    }

    pub(crate) fn or_default_timeout(&mut self, default: Option<Duration>) {
        if self.timeout.is_none() {
            self.timeout = default;
        }
    }

    /// Invoke the action with a fresh outcome accumulator.
    ///
    /// The action runs as its own task, so a deadline only stops the engine
    /// from waiting on it: the work is not cancelled and may continue in the
    /// background unobserved. A panicked action resolves to a failed,
    /// terminating outcome instead of tearing down the engine.
    pub(crate) async fn act(&self, inbox: InboxHandle) -> Outcome<N> {
        let act = Arc::clone(&self.act);
        let args = self.args.clone();
        let task = tokio::spawn(async move { act.run(Outcome::new(), args, inbox).await });

        let joined = match self.timeout {
            Some(limit) => match timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_elapsed) => {
                    tracing::warn!(?limit, "stage action exceeded its deadline");
                    return Outcome::new().fail(None);
                }
            },
            None => task.await,
        };

        match joined {
            Ok(outcome) => outcome,
            Err(join_error) => {
                tracing::error!(error = %join_error, "stage action task failed");
                Outcome::new().fail(None)
            }
        }
    }
}

impl<N: StageName> fmt::Debug for Action<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("args", &self.args)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// One named, ordered unit of work in a sequence.
#[derive(Debug)]
pub struct Stage<N: StageName> {
    name: N,
    action: Action<N>,
}

impl<N: StageName> Stage<N> {
    pub fn new(name: N, action: Action<N>) -> Self {
        Self { name, action }
    }

    pub fn name(&self) -> &N {
        &self.name
    }

    pub fn action(&self) -> &Action<N> {
        &self.action
    }

    pub(crate) fn action_mut(&mut self) -> &mut Action<N> {
        &mut self.action
    }

    pub(crate) async fn act(&self, inbox: InboxHandle) -> Outcome<N> {
        self.action.act(inbox).await
    }
}
