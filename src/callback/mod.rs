//! Callback (webhook) notifications
//!
//! The pipeline never talks HTTP itself. When a job reaches a terminal
//! state it pushes a [`CallbackEvent`] into a bounded [`CallbackQueue`];
//! the [`CallbackDispatcher`] drains the queue, delivers with the event's
//! retry policy and logs a [`CallbackDeliveryFailure`] when it gives up.
//! A full queue drops the notification rather than blocking a worker.
//!
//! Triggered market alerts with webhook channels travel the same way.

mod dispatcher;

use crate::error::Result;
use crate::models::{
    CallbackConfig, CallbackMethod, ChannelType, GenerationResult, Job, RequestError,
    RequestStatus, RequestWarning, RetryPolicy, TriggeredAlert,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

pub use dispatcher::CallbackDispatcher;

/// Header carrying the hex SHA-256 of the request body
pub const PAYLOAD_DIGEST_HEADER: &str = "X-Payload-SHA256";

/// Header naming the job or alert an event is about
pub const SOURCE_HEADER: &str = "X-Callback-Source";

/// Header used for `api-key` auth when the callback does not name one
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Body posted to the callback URL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub job_id: String,
    pub status: RequestStatus,
    pub result: Option<GenerationResult>,
    pub errors: Vec<RequestError>,
    pub warnings: Vec<RequestWarning>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CallbackEvent {
    /// Job id, or alert id for alert notifications
    pub source_id: String,
    pub callback: CallbackConfig,
    pub payload: serde_json::Value,
}

impl CallbackEvent {
    /// Event for a terminal job, or `None` when no callback is configured
    pub fn for_job(job: &Job) -> Result<Option<Self>> {
        let Some(callback) = job.request.callback.clone() else {
            return Ok(None);
        };

        let payload = CallbackPayload {
            job_id: job.id.clone(),
            status: job.status,
            result: job.result.clone(),
            errors: job.errors.clone(),
            warnings: job.warnings.clone(),
            completed_at: job.completed_at,
        };

        Ok(Some(Self {
            source_id: job.id.clone(),
            callback,
            payload: serde_json::to_value(payload)?,
        }))
    }

    /// One event per enabled webhook channel of a triggered alert
    pub fn for_alert(alert: &TriggeredAlert) -> Result<Vec<Self>> {
        let payload = serde_json::to_value(alert)?;
        Ok(alert
            .channels
            .iter()
            .filter(|c| c.enabled && c.channel_type == ChannelType::Webhook)
            .map(|c| Self {
                source_id: alert.alert_id.clone(),
                callback: CallbackConfig {
                    url: c.destination.clone(),
                    method: CallbackMethod::Post,
                    auth: None,
                    retry_policy: RetryPolicy::default(),
                    headers: Default::default(),
                },
                payload: payload.clone(),
            })
            .collect())
    }
}

/// Final outcome of a delivery that exhausted its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackDeliveryFailure {
    pub source_id: String,
    pub url: String,
    pub attempts: u32,
    pub last_status: Option<u16>,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

/// Sending half of the callback channel
#[derive(Debug, Clone)]
pub struct CallbackQueue {
    tx: mpsc::Sender<CallbackEvent>,
}

impl CallbackQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<CallbackEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue an event without waiting; returns false if it was dropped
    pub fn enqueue(&self, event: CallbackEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(source = %event.source_id, "Callback queue full, dropping notification");
                false
            }
            Err(TrySendError::Closed(event)) => {
                warn!(source = %event.source_id, "Callback dispatcher stopped, dropping notification");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessControl, GenerationRequest};

    fn callback_job() -> Job {
        let request = GenerationRequest {
            callback: Some(CallbackConfig {
                url: "https://hooks.example.com/ideas".to_string(),
                method: crate::models::CallbackMethod::Post,
                auth: None,
                retry_policy: Default::default(),
                headers: Default::default(),
            }),
            ..Default::default()
        };
        Job::new("u1".to_string(), request, AccessControl::user_only("u1"))
    }

    #[test]
    fn test_event_only_with_callback() {
        let plain = Job::new(
            "u1".to_string(),
            GenerationRequest::default(),
            AccessControl::user_only("u1"),
        );
        assert!(CallbackEvent::for_job(&plain).unwrap().is_none());

        let mut job = callback_job();
        job.transition(RequestStatus::Cancelled).unwrap();
        let event = CallbackEvent::for_job(&job).unwrap().unwrap();
        assert_eq!(event.payload["status"], "cancelled");
        assert_eq!(event.payload["jobId"], job.id.as_str());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (queue, mut rx) = CallbackQueue::bounded(1);
        let job = callback_job();
        let event = CallbackEvent::for_job(&job).unwrap().unwrap();

        assert!(queue.enqueue(event.clone()));
        assert!(!queue.enqueue(event));
        assert_eq!(rx.recv().await.unwrap().source_id, job.id);
    }

    #[test]
    fn test_alert_events_only_for_enabled_webhooks() {
        use crate::models::{AlertCondition, DataType, NotificationChannel};

        let channel = |channel_type, destination: &str, enabled| NotificationChannel {
            channel_type,
            destination: destination.to_string(),
            enabled,
        };
        let alert = TriggeredAlert {
            alert_id: "alert-1".to_string(),
            alert_name: "AAPL breakout".to_string(),
            user_id: "u1".to_string(),
            symbol: "AAPL".to_string(),
            data_type: DataType::Price,
            condition: AlertCondition::GreaterThan,
            value: 201.0,
            baseline: None,
            threshold: 200.0,
            data_point_id: "dp-1".to_string(),
            triggered_at: Utc::now(),
            channels: vec![
                channel(ChannelType::Webhook, "https://hooks.example.com/a", true),
                channel(ChannelType::Webhook, "https://hooks.example.com/b", false),
                channel(ChannelType::Email, "trader@example.com", true),
            ],
            message: "AAPL price 201 above 200".to_string(),
        };

        let events = CallbackEvent::for_alert(&alert).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source_id, "alert-1");
        assert_eq!(events[0].callback.url, "https://hooks.example.com/a");
        assert_eq!(events[0].payload["alertName"], "AAPL breakout");
    }
}
