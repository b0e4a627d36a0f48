// Platform publishers: the seam between orchestration and each social
// platform's publishing protocol.

pub mod instagram;

pub use instagram::{InstagramConfig, InstagramPublisher};

use crate::errors::PublishError;
use crate::models::{ContentItem, Platform, PlatformCredential};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Successful publish outcome. `public_url` is best effort: some platforms
/// return the permalink reliably, some do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub public_url: Option<String>,
}

/// One platform's publishing protocol. Implementations own their retry
/// policy, poll budget, and circuit breaker; a returned error is final for
/// this invocation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    fn platform(&self) -> Platform;

    async fn publish(
        &self,
        credential: &PlatformCredential,
        item: &ContentItem,
    ) -> Result<PublishOutcome, PublishError>;
}

/// Registry of publishers keyed by platform. Built once at startup.
#[derive(Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn PlatformPublisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, publisher: Arc<dyn PlatformPublisher>) -> Self {
        self.publishers.insert(publisher.platform(), publisher);
        self
    }

    /// Publisher for a platform, or a configuration error naming it. An
    /// account bound to an unsupported platform fails its own record
    /// without touching sibling accounts.
    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformPublisher>, PublishError> {
        self.publishers.get(&platform).cloned().ok_or_else(|| {
            PublishError::Configuration(format!("No publisher registered for {}", platform))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_reports_configuration_error() {
        let registry = PublisherRegistry::new();
        let err = registry.get(Platform::Instagram).err().unwrap();
        assert!(matches!(err, PublishError::Configuration(_)));
    }

    #[test]
    fn test_registered_publisher_is_returned() {
        let mut publisher = MockPlatformPublisher::new();
        publisher
            .expect_platform()
            .return_const(Platform::Instagram);

        let registry = PublisherRegistry::new().register(Arc::new(publisher));
        assert!(registry.get(Platform::Instagram).is_ok());
    }
}
