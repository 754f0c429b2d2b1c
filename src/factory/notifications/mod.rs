//! Pipeline state-change notifications.
//!
//! - `payload`: event recognition and the two payload strategies
//! - `targets`: which channels a branch's settings route an event to
//! - `slack`: delivery
//! - `dispatcher`: ties the three together per event

pub mod dispatcher;
pub mod payload;
pub mod slack;
pub mod targets;

pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use payload::{ExecutionEvent, PayloadBuilder, PipelineExecutions};
pub use slack::{LogNotifier, NotificationSender, SlackNotifier};
pub use targets::NotificationTargetsResolver;
