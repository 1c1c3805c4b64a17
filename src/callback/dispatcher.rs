//! HTTP delivery of callback events

use super::{
    CallbackDeliveryFailure, CallbackEvent, DEFAULT_API_KEY_HEADER, PAYLOAD_DIGEST_HEADER,
    SOURCE_HEADER,
};
use crate::error::Result;
use crate::models::{CallbackAuth, CallbackAuthScheme, CallbackMethod};
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const FAILURE_HISTORY: usize = 100;

pub struct CallbackDispatcher {
    client: Client,
    concurrency: usize,
    failures: Mutex<VecDeque<CallbackDeliveryFailure>>,
}

impl CallbackDispatcher {
    pub fn new(timeout: Duration, concurrency: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("idea-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            concurrency: concurrency.max(1),
            failures: Mutex::new(VecDeque::new()),
        })
    }

    /// Drain `events` until the channel closes or shutdown is signalled.
    ///
    /// At most `concurrency` deliveries are in flight at once.
    pub fn spawn(
        self: Arc<Self>,
        mut events: mpsc::Receiver<CallbackEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let permits = Arc::new(Semaphore::new(self.concurrency));
            info!("Callback dispatcher started ({} concurrent deliveries)", self.concurrency);

            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        let Ok(permit) = permits.clone().acquire_owned().await else { break };
                        let dispatcher = self.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            // Failures are logged and recorded inside deliver
                            let _ = dispatcher.deliver(&event).await;
                        });
                    }
                    _ = shutdown.changed() => break,
                }
            }

            info!("Callback dispatcher stopped");
        })
    }

    /// Deliver one event, retrying per its policy. Returns the attempt count.
    pub async fn deliver(&self, event: &CallbackEvent) -> std::result::Result<u32, CallbackDeliveryFailure> {
        let policy = event.callback.retry_policy;
        let max_attempts = policy.max_retries + 1;

        let body = match serde_json::to_vec(&event.payload) {
            Ok(body) => body,
            Err(e) => return Err(self.give_up(event, 0, None, format!("Unserializable payload: {}", e))),
        };
        let digest = hex::encode(Sha256::digest(&body));

        let mut attempts = 0;
        let mut last_status = None;
        let mut last_error = String::new();

        while attempts < max_attempts {
            if attempts > 0 {
                tokio::time::sleep(policy.delay_for(attempts)).await;
            }
            attempts += 1;

            match self.request(event, &body, &digest).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(source = %event.source_id, attempts, "Callback delivered to {}", event.callback.url);
                    return Ok(attempts);
                }
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());
                    last_error = format!("Endpoint answered {}", status);
                    if !retryable(status) {
                        break;
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            warn!(
                source = %event.source_id,
                attempt = attempts,
                max_attempts,
                "Callback attempt failed: {}",
                last_error
            );
        }

        Err(self.give_up(event, attempts, last_status, last_error))
    }

    /// Most recent delivery failures, newest first
    pub fn recent_failures(&self) -> Vec<CallbackDeliveryFailure> {
        self.failures.lock().iter().rev().cloned().collect()
    }

    fn request(&self, event: &CallbackEvent, body: &[u8], digest: &str) -> RequestBuilder {
        let callback = &event.callback;
        let mut request = match callback.method {
            CallbackMethod::Post => self.client.post(&callback.url),
            CallbackMethod::Put => self.client.put(&callback.url),
        };

        for (name, value) in &callback.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        request = request
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(PAYLOAD_DIGEST_HEADER, digest)
            .header(SOURCE_HEADER, event.source_id.as_str());

        if let Some(auth) = &callback.auth {
            request = with_auth(request, auth);
        }

        debug!(source = %event.source_id, "Sending callback ({} bytes)", body.len());
        request.body(body.to_vec())
    }

    fn give_up(
        &self,
        event: &CallbackEvent,
        attempts: u32,
        last_status: Option<u16>,
        message: String,
    ) -> CallbackDeliveryFailure {
        let failure = CallbackDeliveryFailure {
            source_id: event.source_id.clone(),
            url: event.callback.url.clone(),
            attempts,
            last_status,
            message,
            failed_at: Utc::now(),
        };
        error!(
            source = %failure.source_id,
            attempts = failure.attempts,
            "Callback delivery to {} failed: {}",
            failure.url,
            failure.message
        );

        let mut failures = self.failures.lock();
        if failures.len() == FAILURE_HISTORY {
            failures.pop_front();
        }
        failures.push_back(failure.clone());
        failure
    }
}

fn with_auth(request: RequestBuilder, auth: &CallbackAuth) -> RequestBuilder {
    match auth.scheme {
        CallbackAuthScheme::Bearer => request.bearer_auth(&auth.credentials),
        CallbackAuthScheme::Basic => {
            let (user, password) = auth
                .credentials
                .split_once(':')
                .unwrap_or((auth.credentials.as_str(), ""));
            request.basic_auth(user, Some(password))
        }
        CallbackAuthScheme::ApiKey => request.header(
            auth.header_name.as_deref().unwrap_or(DEFAULT_API_KEY_HEADER),
            auth.credentials.as_str(),
        ),
    }
}

/// Client errors other than timeouts and throttling will not fix themselves
fn retryable(status: StatusCode) -> bool {
    !status.is_client_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}
