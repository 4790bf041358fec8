pub mod health;
pub mod invocations;
pub mod invoke;
pub mod tools;
