use std::sync::Arc;

/// Events emitted while a feed is fetched and decoded, for progress reporting
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Feed is being requested from URL
    FetchingFeed { url: String },

    /// Response headers arrived; the body is now streamed into the decoder
    ResponseReceived {
        /// Final URL after redirects
        url: String,
        status: u16,
    },

    /// Feed-level information has been decoded
    FeedInfo {
        /// Canonical feed URL as resolved so far
        url: String,
        title: Option<String>,
    },

    /// An entry has been decoded and handed to the entry handler
    EntryDecoded {
        /// 1-based position of the entry in the document
        index: usize,
        title: Option<String>,
    },

    /// The document is fully decoded; waiting for handler work to settle
    AwaitingHandlers { pending: usize },

    /// Fetch finished successfully
    FetchCompleted { url: String, entry_count: usize },

    /// Fetch failed
    FetchFailed { url: String, error: String },
}

/// Trait for reporting progress events while fetching a feed.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_reporter_handles_all_events() {
        let reporter = NoopReporter;

        reporter.report(ProgressEvent::FetchingFeed {
            url: "https://example.com/feed.xml".to_string(),
        });

        reporter.report(ProgressEvent::ResponseReceived {
            url: "https://example.com/feed.xml".to_string(),
            status: 200,
        });

        reporter.report(ProgressEvent::FeedInfo {
            url: "https://example.com/feed.xml".to_string(),
            title: Some("Example".to_string()),
        });

        reporter.report(ProgressEvent::EntryDecoded {
            index: 1,
            title: Some("First".to_string()),
        });

        reporter.report(ProgressEvent::AwaitingHandlers { pending: 2 });

        reporter.report(ProgressEvent::FetchCompleted {
            url: "https://example.com/feed.xml".to_string(),
            entry_count: 1,
        });

        reporter.report(ProgressEvent::FetchFailed {
            url: "https://example.com/feed.xml".to_string(),
            error: "Connection refused".to_string(),
        });
    }

    #[test]
    fn shared_noop_reporter_is_usable_as_trait_object() {
        let reporter: SharedProgressReporter = NoopReporter::shared();
        reporter.report(ProgressEvent::AwaitingHandlers { pending: 0 });
    }
}
