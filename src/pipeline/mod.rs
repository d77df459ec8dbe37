//! Email intake: webhook payloads in, processed records out.
//!
//! 1. `InboundEmail::from_postmark()` normalises the webhook body
//! 2. `EmailProcessor::process()` runs the workflow
//! 3. `RunRecorder::record()` persists the `ProcessedEmail`
//!
//! A failed run still produces a record marked processed.

pub mod email_processor;
pub mod recorder;
pub mod types;

pub use email_processor::EmailProcessor;
pub use recorder::{DirRecorder, MemoryRecorder, RunRecorder, StdoutRecorder};
pub use types::{CalendarRecord, EmailPriority, InboundEmail, PostmarkInbound, ProcessedEmail};
