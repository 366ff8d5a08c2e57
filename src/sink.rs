//! Result delivery to the consumer
//!
//! The sink is called synchronously from the worker after each page;
//! back-pressure is the sink's concern, so implementations should return
//! quickly.

use crate::extract::PageData;
use crate::ErrorCategory;
use serde::Serialize;
use std::sync::Mutex;

/// What the consumer receives for every processed page, exactly once
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    pub page: PageData,
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_url: Option<String>,
    /// Set when the page failed; the page still carries whatever status
    /// and headers were observed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCategory>,
}

impl CrawlResult {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Consumer-supplied result receiver
pub trait Sink: Send + Sync {
    fn deliver(&self, result: CrawlResult);
}

impl<F> Sink for F
where
    F: Fn(CrawlResult) + Send + Sync,
{
    fn deliver(&self, result: CrawlResult) {
        self(result)
    }
}

/// Sink that buffers every result; convenient for tests and small crawls
#[derive(Debug, Default)]
pub struct CollectSink {
    results: Mutex<Vec<CrawlResult>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<CrawlResult> {
        std::mem::take(&mut self.results.lock().expect("collect sink poisoned"))
    }

    pub fn len(&self) -> usize {
        self.results.lock().expect("collect sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sink for CollectSink {
    fn deliver(&self, result: CrawlResult) {
        self.results
            .lock()
            .expect("collect sink poisoned")
            .push(result);
    }
}

/// Sink that forwards results into a tokio channel
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<CrawlResult>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<CrawlResult>) -> Self {
        Self { tx }
    }
}

impl Sink for ChannelSink {
    fn deliver(&self, result: CrawlResult) {
        // A closed receiver means the consumer went away; results are
        // dropped rather than failing the crawl.
        let _ = self.tx.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::PageData;

    fn result(url: &str) -> CrawlResult {
        CrawlResult {
            page: PageData::empty(url.to_string(), 200),
            depth: 0,
            parent_url: None,
            error: None,
        }
    }

    #[test]
    fn test_collect_sink_gathers_results() {
        let sink = CollectSink::new();
        sink.deliver(result("https://example.com/a"));
        sink.deliver(result("https://example.com/b"));

        assert_eq!(sink.len(), 2);
        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_closure_sink() {
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let seen_clone = std::sync::Arc::clone(&seen);
        let sink = move |r: CrawlResult| {
            seen_clone.lock().unwrap().push(r.page.url.clone());
        };
        sink.deliver(result("https://example.com/a"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        sink.deliver(result("https://example.com/a"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.page.url, "https://example.com/a");
    }
}
