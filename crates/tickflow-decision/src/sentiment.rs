//! Sentiment collaborator client and cache.
//!
//! The decision path only reads the cache; a background refresher fetches
//! snapshots for symbols the engine has asked about. Missing or stale entries
//! read as `None`.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tickflow_bus::BoxFuture;
use tickflow_core::{SentimentSnapshot, Symbol};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SentimentConfig;
use crate::error::{DecisionError, DecisionResult};

/// Something that can produce a sentiment snapshot for a symbol.
pub trait SentimentSource: Send + Sync {
    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, DecisionResult<SentimentSnapshot>>;
}

/// `GET {base}/sentiment?symbol=X`.
pub struct HttpSentimentClient {
    client: Client,
    url: String,
}

impl HttpSentimentClient {
    pub fn new(base_url: &str, timeout: Duration) -> DecisionResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DecisionError::HttpClient(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/sentiment", base_url.trim_end_matches('/')),
        })
    }

    async fn get(&self, symbol: &Symbol) -> DecisionResult<SentimentSnapshot> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("symbol", symbol.as_str())])
            .send()
            .await
            .map_err(|e| DecisionError::Sentiment(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecisionError::Sentiment(format!("HTTP {status}: {body}")));
        }

        response
            .json::<SentimentSnapshot>()
            .await
            .map_err(|e| DecisionError::Sentiment(format!("Failed to parse response: {e}")))
    }
}

impl SentimentSource for HttpSentimentClient {
    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, DecisionResult<SentimentSnapshot>> {
        Box::pin(self.get(symbol))
    }
}

/// Latest snapshot per symbol with a freshness TTL.
pub struct SentimentCache {
    entries: DashMap<Symbol, SentimentSnapshot>,
    tracked: DashSet<Symbol>,
    ttl: chrono::Duration,
}

impl SentimentCache {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            entries: DashMap::new(),
            tracked: DashSet::new(),
            ttl,
        }
    }

    /// Fresh snapshot for `symbol`, if any. Registers the symbol for refresh.
    pub fn get_fresh(&self, symbol: &Symbol, now: DateTime<Utc>) -> Option<SentimentSnapshot> {
        if !self.tracked.contains(symbol) {
            self.tracked.insert(symbol.clone());
        }
        let snapshot = self.entries.get(symbol)?;
        if snapshot.is_fresh(now, self.ttl) {
            Some(snapshot.clone())
        } else {
            debug!(symbol = %symbol, as_of = %snapshot.timestamp, "Sentiment snapshot stale");
            None
        }
    }

    pub fn insert(&self, snapshot: SentimentSnapshot) {
        self.tracked.insert(snapshot.symbol.clone());
        self.entries.insert(snapshot.symbol.clone(), snapshot);
    }

    pub fn tracked(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.tracked.iter().map(|s| s.key().clone()).collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch every tracked symbol once. Failures keep the previous snapshot.
    /// Returns the number of snapshots updated.
    pub async fn refresh_once(&self, source: &dyn SentimentSource) -> usize {
        let mut updated = 0;
        for symbol in self.tracked() {
            match source.fetch(&symbol).await {
                Ok(snapshot) if snapshot.symbol == symbol => {
                    self.entries.insert(symbol, snapshot);
                    updated += 1;
                }
                Ok(snapshot) => {
                    warn!(
                        requested = %symbol,
                        received = %snapshot.symbol,
                        "Sentiment response for wrong symbol"
                    );
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "Sentiment refresh failed"),
            }
        }
        updated
    }

    /// Refresh on an interval until `shutdown` is cancelled.
    pub async fn run_refresher(
        self: Arc<Self>,
        source: Arc<dyn SentimentSource>,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sentiment refresher stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let updated = self.refresh_once(source.as_ref()).await;
                    debug!(updated, tracked = self.tracked.len(), "Sentiment refreshed");
                }
            }
        }
    }
}

impl SentimentCache {
    pub fn from_config(config: &SentimentConfig) -> Self {
        Self::new(config.ttl())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedSource {
        score: f64,
        calls: AtomicU32,
    }

    impl SentimentSource for FixedSource {
        fn fetch<'a>(
            &'a self,
            symbol: &'a Symbol,
        ) -> BoxFuture<'a, DecisionResult<SentimentSnapshot>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if symbol.as_str() == "FAIL" {
                    return Err(DecisionError::Sentiment("down".to_string()));
                }
                Ok(SentimentSnapshot {
                    symbol: symbol.clone(),
                    score: self.score,
                    window: "24h".to_string(),
                    sources: vec!["news".to_string()],
                    timestamp: Utc::now(),
                })
            })
        }
    }

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    #[test]
    fn test_missing_and_stale_read_as_none() {
        let cache = SentimentCache::new(chrono::Duration::seconds(300));
        let now = Utc::now();
        assert!(cache.get_fresh(&sym("AAPL"), now).is_none());

        cache.insert(SentimentSnapshot {
            symbol: sym("AAPL"),
            score: 0.4,
            window: "24h".to_string(),
            sources: vec![],
            timestamp: now - chrono::Duration::seconds(301),
        });
        assert!(cache.get_fresh(&sym("AAPL"), now).is_none());

        cache.insert(SentimentSnapshot {
            symbol: sym("AAPL"),
            score: 0.4,
            window: "24h".to_string(),
            sources: vec![],
            timestamp: now,
        });
        assert_eq!(cache.get_fresh(&sym("AAPL"), now).unwrap().score, 0.4);
    }

    #[tokio::test]
    async fn test_refresh_fetches_tracked_symbols() {
        let cache = SentimentCache::new(chrono::Duration::seconds(300));
        let source = FixedSource {
            score: -0.2,
            calls: AtomicU32::new(0),
        };

        // Reads register interest
        assert!(cache.get_fresh(&sym("MSFT"), Utc::now()).is_none());
        assert!(cache.get_fresh(&sym("FAIL"), Utc::now()).is_none());

        let updated = cache.refresh_once(&source).await;
        assert_eq!(updated, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get_fresh(&sym("MSFT"), Utc::now()).unwrap().score, -0.2);
        assert!(cache.get_fresh(&sym("FAIL"), Utc::now()).is_none());
    }

    #[tokio::test]
    async fn test_refresher_stops_on_shutdown() {
        let cache = Arc::new(SentimentCache::new(chrono::Duration::seconds(300)));
        cache.get_fresh(&sym("AAPL"), Utc::now());
        let source = Arc::new(FixedSource {
            score: 0.1,
            calls: AtomicU32::new(0),
        });
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(cache.clone().run_refresher(
            source.clone(),
            Duration::from_millis(10),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert!(source.calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(cache.len(), 1);
    }
}
