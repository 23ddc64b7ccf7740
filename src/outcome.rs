//! Stage outcomes and the navigation directives attached to them.
//!
//! An action receives a fresh `Outcome` accumulator, calls exactly one of
//! the setters on it, and returns it. Each setter fully overwrites whatever
//! a previous setter wrote, so the last call wins.

use serde_json::Value;

use crate::stage::StageName;

/// Where the engine moves after a stage, relative to the stage's position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive<N: StageName> {
    /// Advance to the immediately following stage.
    None,
    /// Move back by `stages` positions, clamped at the first stage.
    JumpBack { stages: usize },
    /// Move forward by `stages` positions.
    JumpForward { stages: usize },
    /// Move to the named stage. A name absent from the stage list resolves
    /// out of range and ends the run.
    JumpTo { stage: N },
}

impl<N: StageName> Default for Directive<N> {
    fn default() -> Self {
        Directive::None
    }
}

/// The outcome an action reports back to the engine: a success flag, an
/// optional payload, and the directive deciding which stage runs next.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<N: StageName> {
    succeeded: bool,
    extra: Option<Value>,
    directive: Directive<N>,
    terminate: bool,
}

impl<N: StageName> Outcome<N> {
    /// A fresh accumulator: not succeeded, no payload, no directive.
    pub fn new() -> Self {
        Self {
            succeeded: false,
            extra: None,
            directive: Directive::None,
            terminate: false,
        }
    }

    /// Report success and advance to the next stage.
    pub fn success(mut self, extra: Option<Value>) -> Self {
        self.succeeded = true;
        self.terminate = false;
        self.directive = Directive::None;
        self.extra = extra;
        self
    }

    /// Report failure and end the run.
    pub fn fail(mut self, extra: Option<Value>) -> Self {
        self.succeeded = false;
        self.terminate = true;
        self.directive = Directive::None;
        self.extra = extra;
        self
    }

    /// Move back `stages` positions (clamped at the first stage), reporting
    /// the given success flag.
    pub fn jump_back(mut self, stages: usize, succeeded: bool, extra: Option<Value>) -> Self {
        self.succeeded = succeeded;
        self.terminate = false;
        self.directive = Directive::JumpBack { stages };
        self.extra = extra;
        self
    }

    /// Move forward `stages` positions, reporting the given success flag.
    pub fn jump_forward(mut self, stages: usize, succeeded: bool, extra: Option<Value>) -> Self {
        self.succeeded = succeeded;
        self.terminate = false;
        self.directive = Directive::JumpForward { stages };
        self.extra = extra;
        self
    }

    /// Move to the named stage, reporting the given success flag.
    pub fn jump_to(mut self, stage: N, succeeded: bool, extra: Option<Value>) -> Self {
        self.succeeded = succeeded;
        self.terminate = false;
        self.directive = Directive::JumpTo { stage };
        self.extra = extra;
        self
    }

    /// Report success and end the run here instead of advancing.
    pub fn end_on_success(mut self, extra: Option<Value>) -> Self {
        self.succeeded = true;
        self.terminate = true;
        self.directive = Directive::None;
        self.extra = extra;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn extra(&self) -> Option<&Value> {
        self.extra.as_ref()
    }

    pub fn directive(&self) -> &Directive<N> {
        &self.directive
    }

    /// Whether this outcome ends the run regardless of any directive.
    pub fn terminates(&self) -> bool {
        self.terminate
    }
}

impl<N: StageName> Default for Outcome<N> {
    fn default() -> Self {
        Self::new()
    }
}
