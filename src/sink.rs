//! Optional external time-series sink (SPEC_FULL.md §6): the cycle engine
//! publishes each cycle's telemetry snapshot here on a best-effort basis --
//! a sink failure is logged and otherwise ignored, it never holds up the
//! next cycle.

use async_trait::async_trait;
use tracing::warn;

use crate::telemetry::TimestampBucket;

#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    async fn publish(&self, buckets: &[TimestampBucket]);
}

/// The default sink when no `sink_url` is configured.
pub struct NullSink;

#[async_trait]
impl TimeSeriesSink for NullSink {
    async fn publish(&self, _buckets: &[TimestampBucket]) {}
}

/// Posts each cycle's buckets as one JSON body to a configured HTTP
/// endpoint. Failures are logged at `warn` and swallowed.
pub struct HttpLineSink {
    client: reqwest::Client,
    url: String,
}

impl HttpLineSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait]
impl TimeSeriesSink for HttpLineSink {
    /// One POST per point (SPEC_FULL.md §4.6 step 6c, matching
    /// `original_source/vcuhil_service.py::run`'s per-point InfluxDB write
    /// loop): a single slow or failing point never drops its siblings, and
    /// a cycle with no points sends nothing.
    async fn publish(&self, buckets: &[TimestampBucket]) {
        for bucket in buckets {
            for point in &bucket.points {
                if let Err(e) = self.client.post(&self.url).json(point).send().await {
                    warn!(url = %self.url, point = %point.name, error = %e, "telemetry sink publish failed");
                }
            }
        }
    }
}
