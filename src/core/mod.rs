//! Core types: task identity, task bodies, the registry and the result store.

pub mod environment;
pub mod inputs;
pub mod registry;
pub mod results;
pub mod retry;
pub mod task;
pub mod types;
