pub mod containers;
pub mod invocation;
pub mod registration;
pub mod telemetry;
