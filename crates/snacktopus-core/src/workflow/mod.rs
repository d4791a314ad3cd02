//! Durable workflow engine: registry, replaying context, and runtime.
//!
//! - `registry` -- named workflow and activity functions
//! - `context` -- durable operations with replay from history
//! - `runtime` -- instance scheduling, event delivery, lifecycle management
//! - `retry` -- retry decisions and backoff for activity calls
//! - `checkpoint` -- durable history and status checkpoints
//! - `snacktopus` -- the built-in Snacktopus workflows

pub mod checkpoint;
pub mod context;
pub mod error;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod snacktopus;

pub use context::{ActivityContext, WorkflowContext};
pub use error::{ActivityError, WorkflowError};
pub use registry::WorkflowRegistry;
pub use runtime::WorkflowRuntime;
