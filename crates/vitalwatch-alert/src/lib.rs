//! Alerting: threshold evaluation, the deduplicating alert store, throttled
//! external notification and the real-time broadcaster.

pub mod broadcast;
mod error;
pub mod evaluator;
pub mod notifier;
pub mod store;

pub use broadcast::{Broadcaster, Delivered, LiveEvent};
pub use error::DeliveryError;
pub use evaluator::{AlertEvaluator, VitalState, evaluate_snapshot};
pub use notifier::{
    AlertChannel, AlertPayload, LogChannel, NotifyOutcome, NotifyTargets, ThrottledNotifier,
    WebhookChannel,
};
pub use store::{AlertStore, Subscription};
