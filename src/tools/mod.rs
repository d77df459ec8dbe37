//! Tools the reasoning step can call.

pub mod calendar;
pub mod jira;
pub mod registry;
pub mod testing;
pub mod tool;

pub use registry::ToolRegistry;
pub use tool::*;
