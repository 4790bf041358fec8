pub mod discovery;
pub mod health;
pub mod invocations;
pub mod tools;
