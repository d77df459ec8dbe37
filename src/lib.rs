//! Mailflow: LLM-driven inbound email workflow.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod tools;
pub mod worker;
pub mod workflow;
