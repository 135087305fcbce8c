//! Downstream "supplier data updated" notifications.
//!
//! Publishing is best-effort. The [`Notifier`] facade logs every failure and
//! never returns it, because by the time it runs the product changes and the
//! sync log are already committed. One publish, however many broker requests
//! it makes, is bounded by the configured connect timeout.

pub mod rabbitmq;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::EventsConfig;
use crate::errors::NotificationError;
use crate::models::SupplierEvent;

pub use rabbitmq::RabbitMqPublisher;

/// Publish bound when no `[events]` section supplies one.
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends one event to the messaging fabric.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &SupplierEvent) -> Result<(), NotificationError>;
}

/// Fire-and-forget facade over an optional publisher.
#[derive(Clone)]
pub struct Notifier {
    publisher: Option<Arc<dyn EventPublisher>>,
    publish_timeout: Duration,
}

impl Default for Notifier {
    fn default() -> Self {
        Self {
            publisher: None,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

impl Notifier {
    /// Build from the optional `[events]` section. A missing or disabled
    /// section, or an unusable broker URL, yields a notifier that only logs.
    pub fn new(config: Option<&EventsConfig>) -> Self {
        match config {
            Some(events) if events.enabled => match RabbitMqPublisher::new(events) {
                Ok(p) => Self::with_publisher(Arc::new(p))
                    .with_publish_timeout(Duration::from_secs(events.connect_timeout_secs)),
                Err(e) => {
                    warn!(error = %e, "event publisher disabled");
                    Self::default()
                }
            },
            _ => {
                info!("event publishing disabled");
                Self::default()
            }
        }
    }

    /// Use a specific publisher.
    pub fn with_publisher(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            publisher: Some(publisher),
            ..Self::default()
        }
    }

    /// Bound on one whole publish. A publish still running when it expires
    /// is abandoned and logged as a failure.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// A notifier that publishes nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.publisher.is_some()
    }

    /// Announce that a supplier's products were reconciled.
    pub async fn supplier_updated(&self, supplier_id: &str) {
        let Some(ref publisher) = self.publisher else {
            debug!(supplier_id, "no event publisher configured");
            return;
        };

        let event = SupplierEvent::data_updated(supplier_id);
        match tokio::time::timeout(self.publish_timeout, publisher.publish(&event)).await {
            Ok(Ok(())) => info!(supplier_id, "supplier update event published"),
            Ok(Err(e)) => warn!(supplier_id, error = %e, "failed to publish supplier update event"),
            Err(_) => warn!(
                supplier_id,
                timeout_secs = self.publish_timeout.as_secs(),
                "supplier update event publish timed out"
            ),
        }
    }
}
