//! Background supervisors running in the producer process.

pub mod dlq;
pub mod stuck;

pub use dlq::{DlqAlerter, NoopNotifier, Notifier, WebhookNotifier};
pub use stuck::{StuckDetectorConfig, StuckJobDetector};
