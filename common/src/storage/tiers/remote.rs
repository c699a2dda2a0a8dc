use async_trait::async_trait;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use url::Url;

use crate::error::AppError;
use crate::storage::types::kb_item::KBItem;

const RETRY_BASE_MS: u64 = 100;
const RETRY_ATTEMPTS: usize = 2;

/// The authoritative remote item-collection service (Tier R).
///
/// Implementations must treat the collection as keyed by item id;
/// unreachable-service errors are surfaced so the tier manager can degrade
/// to the local tiers.
#[async_trait]
pub trait RemoteItems: Send + Sync {
    async fn list(&self) -> Result<Vec<KBItem>, AppError>;
    async fn create(&self, item: &KBItem) -> Result<(), AppError>;
    async fn update(&self, item: &KBItem) -> Result<(), AppError>;
    async fn delete(&self, id: &str) -> Result<(), AppError>;
}

/// HTTP implementation against the remote item-collection endpoint.
pub struct HttpRemoteItems {
    http: reqwest::Client,
    base: Url,
}

impl HttpRemoteItems {
    pub fn new(base: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    fn item_url(&self, id: &str) -> Result<Url, AppError> {
        let path = format!("{}/{id}", self.base.path().trim_end_matches('/'));
        let mut url = self.base.clone();
        url.set_path(&path);
        Ok(url)
    }

    fn retry_strategy() -> impl Iterator<Item = std::time::Duration> {
        ExponentialBackoff::from_millis(RETRY_BASE_MS)
            .map(jitter)
            .take(RETRY_ATTEMPTS)
    }
}

#[async_trait]
impl RemoteItems for HttpRemoteItems {
    async fn list(&self) -> Result<Vec<KBItem>, AppError> {
        let items = Retry::spawn(Self::retry_strategy(), || async {
            self.http
                .get(self.base.clone())
                .send()
                .await?
                .error_for_status()?
                .json::<Vec<KBItem>>()
                .await
        })
        .await?;

        Ok(items)
    }

    async fn create(&self, item: &KBItem) -> Result<(), AppError> {
        Retry::spawn(Self::retry_strategy(), || async {
            self.http
                .post(self.base.clone())
                .json(item)
                .send()
                .await?
                .error_for_status()
        })
        .await?;

        Ok(())
    }

    async fn update(&self, item: &KBItem) -> Result<(), AppError> {
        let url = self.item_url(&item.id)?;
        Retry::spawn(Self::retry_strategy(), || async {
            self.http
                .put(url.clone())
                .json(item)
                .send()
                .await?
                .error_for_status()
        })
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        let url = self.item_url(id)?;
        Retry::spawn(Self::retry_strategy(), || async {
            self.http.delete(url.clone()).send().await?.error_for_status()
        })
        .await?;

        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use fake::InMemoryRemote;

#[cfg(any(test, feature = "test-utils"))]
mod fake {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// In-memory stand-in for the remote service, with switches to simulate
    /// an unreachable tier, per-call latency, and a bounded create budget.
    #[derive(Default)]
    pub struct InMemoryRemote {
        items: Mutex<Vec<KBItem>>,
        unavailable: AtomicBool,
        delay: Option<Duration>,
        creates_left: Mutex<Option<usize>>,
    }

    impl InMemoryRemote {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seeded(items: Vec<KBItem>) -> Self {
            Self {
                items: Mutex::new(items),
                ..Self::default()
            }
        }

        /// Makes every call take the given time, to exercise callers that
        /// mutate the collection while a remote write is in flight.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// Accepts the next `budget` creates, then rejects further ones.
        /// Other operations keep working, so rollbacks can be observed.
        pub fn fail_creates_after(&self, budget: usize) {
            *self.creates_left.lock().expect("remote fake poisoned") = Some(budget);
        }

        pub fn stored(&self) -> Vec<KBItem> {
            self.items.lock().expect("remote fake poisoned").clone()
        }

        fn check_reachable(&self) -> Result<(), AppError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::TierWrite("remote tier unreachable".to_string()));
            }
            Ok(())
        }

        fn spend_create_budget(&self) -> Result<(), AppError> {
            let mut budget = self.creates_left.lock().expect("remote fake poisoned");
            match budget.as_mut() {
                Some(0) => Err(AppError::TierWrite("remote tier rejected create".to_string())),
                Some(remaining) => {
                    *remaining -= 1;
                    Ok(())
                }
                None => Ok(()),
            }
        }

        async fn simulate_latency(&self) {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    #[async_trait]
    impl RemoteItems for InMemoryRemote {
        async fn list(&self) -> Result<Vec<KBItem>, AppError> {
            self.simulate_latency().await;
            self.check_reachable()?;
            Ok(self.stored())
        }

        async fn create(&self, item: &KBItem) -> Result<(), AppError> {
            self.simulate_latency().await;
            self.check_reachable()?;
            self.spend_create_budget()?;
            let mut items = self.items.lock().expect("remote fake poisoned");
            items.retain(|existing| existing.id != item.id);
            items.push(item.clone());
            Ok(())
        }

        async fn update(&self, item: &KBItem) -> Result<(), AppError> {
            self.simulate_latency().await;
            self.check_reachable()?;
            let mut items = self.items.lock().expect("remote fake poisoned");
            let Some(existing) = items.iter_mut().find(|existing| existing.id == item.id) else {
                return Err(AppError::NotFound(item.id.clone()));
            };
            *existing = item.clone();
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<(), AppError> {
            self.simulate_latency().await;
            self.check_reachable()?;
            let mut items = self.items.lock().expect("remote fake poisoned");
            items.retain(|existing| existing.id != id);
            Ok(())
        }
    }
}
