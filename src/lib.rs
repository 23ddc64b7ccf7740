//! An embeddable engine for multi-step asynchronous procedures whose
//! control flow is decided stage by stage: each stage's outcome carries a
//! directive telling the engine to advance, jump backwards or forwards,
//! jump to a named stage, or end the run. Observers follow the run through
//! a broadcast update stream, lifecycle callbacks, and an advisory
//! skip/stop mailbox shared with the running stages.

pub mod errors;
pub mod inbox;
pub mod outcome;
pub mod sequence;
pub mod stage;
pub mod update;

mod util;

pub use errors::{InboxError, SequenceError};
pub use inbox::{Inbox, InboxHandle, Message};
pub use outcome::{Directive, Outcome};
pub use sequence::{Sequence, SequenceBuilder, SequenceState};
pub use stage::{Action, ActionArgs, Stage, StageAction, StageName};
pub use update::{SequenceUpdate, UpdateFilter, UpdateKind};
