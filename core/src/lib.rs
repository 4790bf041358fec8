pub mod artifacts;
pub mod command;
pub mod error;
pub mod invocation;
pub mod tools;
