//! Offline doubles for the remote interpreter channel.
//!
//! Provides:
//! - `SimInterpreter` - In-process `ScriptInterpreter` with canned
//!   replies, for callers that only need the contract
//! - `SimServer` - Scripted TCP server speaking the real wire
//!   protocol, for integration tests against the live channel

pub mod interpreter;
pub mod server;

pub use interpreter::SimInterpreter;
pub use server::{SimServer, SimServerBuilder};
