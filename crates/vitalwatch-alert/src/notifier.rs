//! Rate-limited external notification of critical alerts.
//!
//! At most one delivery per (patient, vital) per throttle window. The ledger
//! is only advanced after a successful send, so a failed delivery is retried
//! on the next evaluation cycle. Failures are logged under the
//! `vitalwatch::delivery` target and never returned to the caller. A send
//! that outlives the delivery timeout counts as failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use vitalwatch_core::Alert;
use vitalwatch_store::{ThrottleKey, ThrottleLedger};

use crate::DeliveryError;

/// Default minimum spacing, in seconds, between deliveries for one
/// (patient, vital).
pub const DEFAULT_THROTTLE_WINDOW_SECS: i64 = 300;

/// Default upper bound, in seconds, on one channel send.
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 10;

/// Out-of-band destinations for alert delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotifyTargets {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl NotifyTargets {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone.is_none()
    }
}

/// Body sent to a notification channel.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<&'a str>,
    pub subject: String,
    pub alert: &'a Alert,
}

impl<'a> AlertPayload<'a> {
    pub fn new(targets: &'a NotifyTargets, alert: &'a Alert) -> Self {
        Self {
            email: targets.email.as_deref(),
            phone: targets.phone.as_deref(),
            subject: format!(
                "URGENT: Vital Alert - {} {}",
                alert.vital.measured_label(),
                alert.kind.as_str().to_ascii_uppercase()
            ),
            alert,
        }
    }
}

/// A way of getting an alert to a clinician.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, payload: &AlertPayload<'_>) -> Result<(), DeliveryError>;
}

/// POSTs the payload as JSON to a notification relay.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    timeout: std::time::Duration,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout: std::time::Duration::from_secs(DEFAULT_DELIVERY_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, payload: &AlertPayload<'_>) -> Result<(), DeliveryError> {
        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Writes the notification to the log instead of sending it.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, payload: &AlertPayload<'_>) -> Result<(), DeliveryError> {
        info!(
            target: "vitalwatch::delivery",
            email = payload.email,
            phone = payload.phone,
            subject = %payload.subject,
            summary = %payload.alert.summary(),
            "simulated alert delivery"
        );
        Ok(())
    }
}

/// What [`ThrottledNotifier::notify`] did with an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    NotCritical,
    NoDestination,
    Throttled { last_sent: DateTime<Utc> },
    Failed,
}

pub struct ThrottledNotifier {
    channel: Arc<dyn AlertChannel>,
    ledger: Arc<dyn ThrottleLedger>,
    targets: NotifyTargets,
    window: Duration,
    delivery_timeout: std::time::Duration,
    key_locks: Mutex<HashMap<ThrottleKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThrottledNotifier {
    pub fn new(
        channel: Arc<dyn AlertChannel>,
        ledger: Arc<dyn ThrottleLedger>,
        targets: NotifyTargets,
    ) -> Self {
        Self {
            channel,
            ledger,
            targets,
            window: Duration::seconds(DEFAULT_THROTTLE_WINDOW_SECS),
            delivery_timeout: std::time::Duration::from_secs(DEFAULT_DELIVERY_TIMEOUT_SECS),
            key_locks: Mutex::default(),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub async fn notify(&self, alert: &Alert) -> NotifyOutcome {
        self.notify_at(alert, Utc::now()).await
    }

    /// [`notify`](Self::notify) with an explicit clock reading.
    pub async fn notify_at(&self, alert: &Alert, now: DateTime<Utc>) -> NotifyOutcome {
        if !alert.is_critical() {
            return NotifyOutcome::NotCritical;
        }
        if self.targets.is_empty() {
            debug!(id = %alert.id, "no notification destination configured");
            return NotifyOutcome::NoDestination;
        }

        let key = ThrottleKey::new(alert.patient_id, alert.vital);
        let key_lock = self.key_lock(key);
        let _held = key_lock.lock().await;

        match self.ledger.last_sent(&key) {
            Ok(Some(last_sent)) if now - last_sent <= self.window => {
                debug!(key = %key, %last_sent, "notification throttled");
                return NotifyOutcome::Throttled { last_sent };
            }
            Ok(_) => {}
            Err(err) => {
                warn!(target: "vitalwatch::delivery", key = %key, error = %err, "throttle ledger unreadable");
                return NotifyOutcome::Failed;
            }
        }

        let payload = AlertPayload::new(&self.targets, alert);
        match tokio::time::timeout(self.delivery_timeout, self.channel.send(&payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(
                    target: "vitalwatch::delivery",
                    channel = self.channel.name(),
                    id = %alert.id,
                    error = %err,
                    "alert delivery failed"
                );
                return NotifyOutcome::Failed;
            }
            Err(_) => {
                warn!(
                    target: "vitalwatch::delivery",
                    channel = self.channel.name(),
                    id = %alert.id,
                    timeout_secs = self.delivery_timeout.as_secs_f64(),
                    "alert delivery timed out"
                );
                return NotifyOutcome::Failed;
            }
        }

        if let Err(err) = self.ledger.mark_sent(&key, now) {
            warn!(target: "vitalwatch::delivery", key = %key, error = %err, "could not record delivery time");
        }
        info!(channel = self.channel.name(), id = %alert.id, "critical alert delivered");
        NotifyOutcome::Sent
    }

    fn key_lock(&self, key: ThrottleKey) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use vitalwatch_core::{AlertKind, PatientId, Severity, Vital};
    use vitalwatch_store::MemoryLedger;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<serde_json::Value>>,
        fail: AtomicBool,
        hang: AtomicBool,
    }

    #[async_trait]
    impl AlertChannel for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, payload: &AlertPayload<'_>) -> Result<(), DeliveryError> {
            tokio::task::yield_now().await;
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeliveryError::Server {
                    status: 502,
                    body: "bad gateway".into(),
                });
            }
            self.sent.lock().unwrap().push(serde_json::to_value(payload).unwrap());
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap()
    }

    fn critical_hr(at: DateTime<Utc>) -> Alert {
        Alert::new(PatientId(7), Vital::Hr, 145.0, AlertKind::High, Severity::Critical, at)
    }

    fn targets() -> NotifyTargets {
        NotifyTargets {
            email: Some("oncall@ward.example".into()),
            phone: None,
        }
    }

    fn build(targets: NotifyTargets) -> (ThrottledNotifier, Arc<Recording>) {
        let channel = Arc::new(Recording::default());
        let notifier = ThrottledNotifier::new(channel.clone(), Arc::new(MemoryLedger::new()), targets);
        (notifier, channel)
    }

    #[tokio::test]
    async fn four_minutes_apart_sends_once() {
        let (notifier, channel) = build(targets());
        let later = t0() + Duration::minutes(4);
        assert_eq!(notifier.notify_at(&critical_hr(t0()), t0()).await, NotifyOutcome::Sent);
        assert_eq!(
            notifier.notify_at(&critical_hr(later), later).await,
            NotifyOutcome::Throttled { last_sent: t0() }
        );
        assert_eq!(channel.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exactly_one_window_apart_is_still_throttled() {
        let (notifier, channel) = build(targets());
        let boundary = t0() + Duration::seconds(DEFAULT_THROTTLE_WINDOW_SECS);
        notifier.notify_at(&critical_hr(t0()), t0()).await;
        assert_eq!(
            notifier.notify_at(&critical_hr(boundary), boundary).await,
            NotifyOutcome::Throttled { last_sent: t0() }
        );

        let past = boundary + Duration::milliseconds(1);
        assert_eq!(notifier.notify_at(&critical_hr(past), past).await, NotifyOutcome::Sent);
        assert_eq!(channel.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn six_minutes_apart_sends_twice() {
        let (notifier, channel) = build(targets());
        let later = t0() + Duration::minutes(6);
        notifier.notify_at(&critical_hr(t0()), t0()).await;
        assert_eq!(notifier.notify_at(&critical_hr(later), later).await, NotifyOutcome::Sent);
        assert_eq!(channel.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn only_critical_alerts_with_a_destination() {
        let (notifier, channel) = build(targets());
        let warning = Alert::new(PatientId(7), Vital::Hr, 110.0, AlertKind::High, Severity::Warning, t0());
        assert_eq!(notifier.notify_at(&warning, t0()).await, NotifyOutcome::NotCritical);

        let (silent, silent_channel) = build(NotifyTargets::default());
        assert_eq!(silent.notify_at(&critical_hr(t0()), t0()).await, NotifyOutcome::NoDestination);

        assert!(channel.sent.lock().unwrap().is_empty());
        assert!(silent_channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_does_not_advance_ledger() {
        let (notifier, channel) = build(targets());
        channel.fail.store(true, Ordering::SeqCst);
        assert_eq!(notifier.notify_at(&critical_hr(t0()), t0()).await, NotifyOutcome::Failed);

        channel.fail.store(false, Ordering::SeqCst);
        let retry = t0() + Duration::seconds(3);
        assert_eq!(notifier.notify_at(&critical_hr(retry), retry).await, NotifyOutcome::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_delivery_times_out_and_is_retried() {
        let (notifier, channel) = build(targets());
        let notifier = notifier.with_delivery_timeout(std::time::Duration::from_secs(5));
        channel.hang.store(true, Ordering::SeqCst);
        assert_eq!(notifier.notify_at(&critical_hr(t0()), t0()).await, NotifyOutcome::Failed);

        channel.hang.store(false, Ordering::SeqCst);
        let retry = t0() + Duration::seconds(3);
        assert_eq!(notifier.notify_at(&critical_hr(retry), retry).await, NotifyOutcome::Sent);
        assert_eq!(channel.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_breaches_pass_the_throttle_once() {
        let (notifier, channel) = build(targets());
        let notifier = Arc::new(notifier);
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let notifier = notifier.clone();
                tokio::spawn(async move {
                    let at = t0() + Duration::seconds(i);
                    notifier.notify_at(&critical_hr(at), at).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(channel.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn payload_shape() {
        let (notifier, channel) = build(targets());
        notifier.notify_at(&critical_hr(t0()), t0()).await;

        let sent = channel.sent.lock().unwrap();
        let body = &sent[0];
        assert_eq!(body["email"], "oncall@ward.example");
        assert!(body.get("phone").is_none());
        assert_eq!(body["subject"], "URGENT: Vital Alert - HR HIGH");
        assert_eq!(body["alert"]["patientId"], 7);
        assert_eq!(body["alert"]["vital"], "HR");
        assert_eq!(body["alert"]["value"], 145.0);
        assert_eq!(body["alert"]["type"], "high");
        assert_eq!(body["alert"]["severity"], "critical");
        assert_eq!(body["alert"]["timestamp"], "2026-03-01T08:30:00Z");
    }
}
