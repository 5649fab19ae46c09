///! Element-set acquisition from ranked remote sources with offline fallback
use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use orbtrack_common::ElementSet;

use super::fallback::offline_element_sets;
use super::parser::parse_payload;
use crate::config::{AcquisitionConfig, SourceConfig};
use crate::error::{TrackerError, TrackerResult};

const USER_AGENT: &str = concat!("orbtrack/", env!("CARGO_PKG_VERSION"));

/// A remote feed returning element sets as text
#[async_trait]
pub trait ElementSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the raw payload for one catalog filter
    async fn fetch(&self, filter: &str) -> Result<String>;
}

/// Plain HTTP GET against a URL template
pub struct HttpSource {
    name: String,
    url_template: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(config: &SourceConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            name: config.name.clone(),
            url_template: config.url.clone(),
            client,
        })
    }

    fn url_for(&self, filter: &str) -> String {
        self.url_template.replace("{group}", filter)
    }
}

#[async_trait]
impl ElementSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, filter: &str) -> Result<String> {
        let url = self.url_for(filter);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error {} from {}", response.status(), url);
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read body from {}", url))?;

        if body.trim().is_empty() {
            anyhow::bail!("Empty body from {}", url);
        }
        Ok(body)
    }
}

/// Where an acquisition's element sets came from
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionOrigin {
    Remote { source: String, rejected: usize },
    Fallback,
}

/// Outcome of acquiring one catalog filter. Never empty.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub filter: String,
    pub sets: Vec<ElementSet>,
    pub origin: AcquisitionOrigin,
    /// One entry per failed source attempt, in priority order
    pub failures: Vec<String>,
}

impl Acquisition {
    pub fn used_fallback(&self) -> bool {
        self.origin == AcquisitionOrigin::Fallback
    }

    /// The recovered failure, when the fallback had to be used
    pub fn failure(&self) -> Option<TrackerError> {
        self.used_fallback().then(|| TrackerError::AcquisitionFailure {
            filter: self.filter.clone(),
            reason: self.failures.join("; "),
        })
    }
}

/// Ranked list of sources plus the embedded fallback
pub struct ElementSetSource {
    sources: Vec<Box<dyn ElementSource>>,
    timeout: Duration,
    fallback: Vec<ElementSet>,
}

impl ElementSetSource {
    /// Fails only when the embedded fallback data is malformed
    pub fn new(sources: Vec<Box<dyn ElementSource>>, timeout: Duration) -> TrackerResult<Self> {
        Ok(Self {
            sources,
            timeout,
            fallback: offline_element_sets()?,
        })
    }

    pub fn from_config(config: &AcquisitionConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let sources = config
            .sources
            .iter()
            .map(|s| HttpSource::new(s, timeout).map(|h| Box::new(h) as Box<dyn ElementSource>))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(sources, timeout)?)
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Try each source in order; the first one yielding valid element sets wins.
    pub async fn acquire(&self, filter: &str) -> Acquisition {
        let mut failures = Vec::new();

        for source in &self.sources {
            let payload = match tokio::time::timeout(self.timeout, source.fetch(filter)).await {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) => {
                    failures.push(format!("{}: {:#}", source.name(), e));
                    continue;
                }
                Err(_) => {
                    failures.push(format!(
                        "{}: timed out after {:?}",
                        source.name(),
                        self.timeout
                    ));
                    continue;
                }
            };

            let parsed = parse_payload(&payload, source.name());
            if parsed.sets.is_empty() {
                failures.push(format!(
                    "{}: no valid element sets ({} rejected)",
                    source.name(),
                    parsed.rejected.len()
                ));
                continue;
            }

            return Acquisition {
                filter: filter.to_string(),
                sets: parsed.sets,
                origin: AcquisitionOrigin::Remote {
                    source: source.name().to_string(),
                    rejected: parsed.rejected.len(),
                },
                failures,
            };
        }

        if self.sources.is_empty() {
            failures.push("no sources configured".to_string());
        }

        Acquisition {
            filter: filter.to_string(),
            sets: self.fallback.clone(),
            origin: AcquisitionOrigin::Fallback,
            failures,
        }
    }

    /// Acquire several catalog filters concurrently; results keep the filter order.
    pub async fn acquire_all(&self, filters: &[String]) -> Vec<Acquisition> {
        futures::future::join_all(filters.iter().map(|f| self.acquire(f))).await
    }
}

/// Merge acquisitions in order, keeping the first element set per catalog id
pub fn merge_acquisitions(acquisitions: &[Acquisition]) -> Vec<ElementSet> {
    let mut seen = HashSet::new();
    acquisitions
        .iter()
        .flat_map(|a| a.sets.iter())
        .filter(|set| seen.insert(set.catalog_id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::elements::parser::tests::{catalog_payload, NOAA_L1, NOAA_L2};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FailingSource(&'static str);

    #[async_trait]
    impl ElementSource for FailingSource {
        fn name(&self) -> &str {
            self.0
        }

        async fn fetch(&self, _filter: &str) -> Result<String> {
            anyhow::bail!("connection refused")
        }
    }

    struct StaticSource {
        name: &'static str,
        payload: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ElementSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _filter: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.payload.clone())
        }
    }

    struct StalledSource;

    #[async_trait]
    impl ElementSource for StalledSource {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn fetch(&self, _filter: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(String::new())
        }
    }

    fn static_source(name: &'static str, payload: String) -> (Box<dyn ElementSource>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = StaticSource {
            name,
            payload,
            calls: calls.clone(),
        };
        (Box::new(source), calls)
    }

    #[tokio::test]
    async fn test_all_sources_fail_uses_fallback() {
        let source = ElementSetSource::new(
            vec![
                Box::new(FailingSource("a")),
                Box::new(FailingSource("b")),
                Box::new(FailingSource("c")),
            ],
            Duration::from_secs(1),
        )
        .unwrap();

        let acquisition = source.acquire("stations").await;
        assert!(acquisition.used_fallback());
        assert!(!acquisition.sets.is_empty());
        assert!(acquisition.sets.iter().all(|s| s.is_fallback()));
        assert_eq!(acquisition.failures.len(), 3);
        assert!(matches!(
            acquisition.failure(),
            Some(TrackerError::AcquisitionFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_first_valid_source_wins() {
        let (second, second_calls) = static_source("second", catalog_payload());
        let (third, third_calls) = static_source("third", catalog_payload());
        let source = ElementSetSource::new(
            vec![Box::new(FailingSource("first")), second, third],
            Duration::from_secs(1),
        )
        .unwrap();

        let acquisition = source.acquire("stations").await;
        assert_eq!(
            acquisition.origin,
            AcquisitionOrigin::Remote {
                source: "second".to_string(),
                rejected: 0
            }
        );
        assert_eq!(acquisition.sets.len(), 2);
        assert_eq!(acquisition.sets[0].source, "second");
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
        assert!(acquisition.failure().is_none());
    }

    #[tokio::test]
    async fn test_invalid_payload_falls_through() {
        let (garbage, _) = static_source("garbage", "<html>maintenance</html>".to_string());
        let (good, _) = static_source("good", catalog_payload());
        let source = ElementSetSource::new(vec![garbage, good], Duration::from_secs(1)).unwrap();

        let acquisition = source.acquire("visual").await;
        assert!(!acquisition.used_fallback());
        assert_eq!(acquisition.failures.len(), 1);
        assert!(acquisition.failures[0].starts_with("garbage"));
    }

    #[tokio::test]
    async fn test_stalled_source_bounded_by_timeout() {
        let (good, _) = static_source("good", catalog_payload());
        let source = ElementSetSource::new(
            vec![Box::new(StalledSource), good],
            Duration::from_millis(50),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let acquisition = source.acquire("stations").await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!acquisition.used_fallback());
        assert!(acquisition.failures[0].contains("timed out"));
    }

    #[tokio::test]
    async fn test_acquire_all_merges_without_duplicates() {
        let payload = format!("{}NOAA 18\n{}\n{}\n", catalog_payload(), NOAA_L1, NOAA_L2);
        let (good, calls) = static_source("good", payload);
        let source = ElementSetSource::new(vec![good], Duration::from_secs(1)).unwrap();

        let acquisitions = source
            .acquire_all(&["stations".to_string(), "weather".to_string()])
            .await;
        assert_eq!(acquisitions.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let merged = merge_acquisitions(&acquisitions);
        let ids: Vec<u32> = merged.iter().map(|s| s.catalog_id).collect();
        assert_eq!(ids, vec![25544, 43017, 28654]);
    }

    #[test]
    fn test_url_template() {
        let source = HttpSource::new(
            &SourceConfig {
                name: "celestrak".to_string(),
                url: "https://celestrak.org/NORAD/elements/{group}.txt".to_string(),
            },
            Duration::from_secs(6),
        )
        .unwrap();
        assert_eq!(
            source.url_for("amateur"),
            "https://celestrak.org/NORAD/elements/amateur.txt"
        );
    }

    #[tokio::test]
    #[ignore] // Requires network connection
    async fn test_fetch_celestrak_stations() {
        let source = ElementSetSource::from_config(&AcquisitionConfig::default()).unwrap();
        let acquisition = source.acquire("stations").await;
        assert!(!acquisition.sets.is_empty());
    }
}
