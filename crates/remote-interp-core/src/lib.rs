//! Core abstractions for the remote interpreter script channel.
//!
//! This crate provides the fundamental building blocks:
//! - `RequestId` / `RequestStatus` - Request identity and lifecycle
//! - `protocol` - Wire framing and completion-sentinel scanning
//! - `OutputStore` - Broadcast + history for streaming console output
//! - `ExecutionHandle` - Caller-visible view of an in-flight request
//! - Interpreter and job-collaborator traits

pub mod handle;
pub mod output_store;
pub mod protocol;
pub mod request;
pub mod traits;

pub use handle::{Completion, ExecutionError, ExecutionHandle};
pub use output_store::{OutputMsg, OutputStore};
pub use request::{RequestId, RequestStatus};
pub use traits::{
    ChannelError, ExecutionOutcome, ResultSink, ScriptInterpreter, SetupProvider, StaticSetup,
};
