//! Hearth Library
//!
//! This crate is for shared code and utilities that are not specific to any executable in the hearth stack.

pub mod logging;
#[macro_use]
pub mod macros;
pub mod tokio_utils;
pub mod transaction;
pub mod types;
pub mod utils;
