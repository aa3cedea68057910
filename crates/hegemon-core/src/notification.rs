//! Lifecycle notifications for backup and restore runs.

use tracing::{debug, info};

use crate::config::LoggingConfig;

/// Receives operation lifecycle messages.
///
/// Delivery is fire-and-forget: implementations must not fail the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Delivers notifications as structured log events tagged with the endpoint
#[derive(Debug, Clone)]
pub struct LogNotifier {
    endpoint: Option<String>,
}

impl LogNotifier {
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint }
    }

    /// Enabled only when notifications are switched on and an endpoint is set
    pub fn from_config(config: &LoggingConfig) -> Self {
        let endpoint = config
            .notification_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| config.enable_notifications && !e.is_empty())
            .map(str::to_string);
        Self::new(endpoint)
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        match &self.endpoint {
            Some(endpoint) => info!(target: "hegemon::notify", endpoint = %endpoint, "{}", message),
            None => debug!(message = message, "Notifications disabled, dropping message"),
        }
    }
}
