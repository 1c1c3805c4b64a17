//! Application state management

use crate::alerts::MarketAlertEvaluator;
use crate::callback::{CallbackDispatcher, CallbackEvent, CallbackQueue};
use crate::compliance::ComplianceRegistry;
use crate::config::{AppConfig, StoreBackend};
use crate::error::{AppError, Result};
use crate::models::{ChannelType, TriggeredAlert};
use crate::pipeline::{ModelExecutor, RequestPipeline, TemplateExecutor};
use crate::security::SecurityManager;
use crate::store::{JobStore, MemoryJobStore, SqliteJobStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Application state shared by the HTTP handlers and background tasks
pub struct AppState {
    pub config: AppConfig,

    /// Job persistence
    pub store: Arc<dyn JobStore>,

    /// Compliance evaluators by jurisdiction
    pub compliance: Arc<ComplianceRegistry>,

    /// Market alert registry and evaluation state
    pub alerts: Arc<MarketAlertEvaluator>,

    pub pipeline: Arc<RequestPipeline>,

    /// Sending half of the callback channel
    pub callbacks: CallbackQueue,

    pub dispatcher: Arc<CallbackDispatcher>,

    /// Receiving half, handed to the dispatcher task once
    callback_rx: Mutex<Option<mpsc::Receiver<CallbackEvent>>>,
}

impl AppState {
    /// Create state with the store backend named in `config`
    pub fn new(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn JobStore> = match config.store.backend {
            StoreBackend::Memory => {
                info!("Using in-memory job store");
                Arc::new(MemoryJobStore::new())
            }
            StoreBackend::Sqlite => {
                let data_dir = &config.store.data_dir;
                std::fs::create_dir_all(data_dir)?;
                info!("Data directory: {:?}", data_dir);

                let security = Arc::new(SecurityManager::new(data_dir)?);
                Arc::new(SqliteJobStore::new(&config.store.database_path(), security)?)
            }
        };

        Self::with_parts(config, store, Arc::new(TemplateExecutor::new()))
    }

    /// Create state around an existing store and model executor
    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn ModelExecutor>,
    ) -> Result<Self> {
        config.validate()?;

        let compliance = Arc::new(ComplianceRegistry::with_default(&config.default_jurisdiction));
        if !compliance.supports(compliance.default_jurisdiction()) {
            return Err(AppError::Config(format!(
                "Default jurisdiction '{}' is not supported (supported: {})",
                config.default_jurisdiction,
                compliance.jurisdictions().join(", ")
            )));
        }
        let alerts = Arc::new(MarketAlertEvaluator::with_recent_capacity(
            config.recent_alert_capacity,
        ));
        let (callbacks, callback_rx) = CallbackQueue::bounded(config.callbacks.queue_capacity);
        let dispatcher = Arc::new(CallbackDispatcher::new(
            Duration::from_secs(config.callbacks.timeout_secs),
            config.callbacks.concurrency,
        )?);

        let pipeline = Arc::new(
            RequestPipeline::new(
                store.clone(),
                executor,
                compliance.clone(),
                alerts.clone(),
                config.worker.pipeline_settings(),
            )
            .with_callbacks(callbacks.clone()),
        );

        info!(
            jurisdictions = ?compliance.jurisdictions(),
            default_jurisdiction = %compliance.default_jurisdiction(),
            "Application state initialized"
        );

        Ok(Self {
            config,
            store,
            compliance,
            alerts,
            pipeline,
            callbacks,
            dispatcher,
            callback_rx: Mutex::new(Some(callback_rx)),
        })
    }

    /// Take the callback receiver; `None` once the dispatcher owns it
    pub fn take_callback_receiver(&self) -> Option<mpsc::Receiver<CallbackEvent>> {
        self.callback_rx.lock().take()
    }

    /// Route triggered alerts to their notification channels.
    ///
    /// Webhook channels go through the callback dispatcher; other channel
    /// types have no transport here and are only logged.
    pub fn notify_alerts(&self, triggered: &[TriggeredAlert]) {
        for alert in triggered {
            match CallbackEvent::for_alert(alert) {
                Ok(events) => {
                    for event in events {
                        self.callbacks.enqueue(event);
                    }
                }
                Err(e) => warn!(alert_id = %alert.alert_id, "Could not build alert payload: {}", e),
            }

            for channel in alert
                .channels
                .iter()
                .filter(|c| c.enabled && c.channel_type != ChannelType::Webhook)
            {
                info!(
                    alert_id = %alert.alert_id,
                    channel = %channel.channel_type,
                    destination = %channel.destination,
                    "{}",
                    alert.message
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_backend_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.store.data_dir = dir.path().join("nested");

        let state = AppState::new(config).unwrap();
        assert!(dir.path().join("nested").join("jobs.db").exists());
        assert!(state.take_callback_receiver().is_some());
        assert!(state.take_callback_receiver().is_none());
    }

    #[test]
    fn test_unsupported_default_jurisdiction_is_rejected() {
        let state = |jurisdiction: &str| {
            let mut config = AppConfig::default();
            config.default_jurisdiction = jurisdiction.to_string();
            AppState::with_parts(
                config,
                Arc::new(MemoryJobStore::new()),
                Arc::new(TemplateExecutor::new()),
            )
        };

        assert!(matches!(state("APAC"), Err(AppError::Config(msg)) if msg.contains("APAC")));
        let eu = state("eu").unwrap();
        assert!(eu.compliance.get(None).is_some());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.worker.workers = 0;
        assert!(AppState::with_parts(
            config,
            Arc::new(MemoryJobStore::new()),
            Arc::new(TemplateExecutor::new()),
        )
        .is_err());
    }
}
