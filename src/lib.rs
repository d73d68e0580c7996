pub mod error;
pub mod feed;
pub mod http;
pub mod orchestrator;
pub mod progress;

// Re-export main types for convenience
pub use error::{DecodeError, FetchError, HandlerError, TransportError};
pub use feed::{
    DecoderEvent, Enclosure, FeedDecoder, FeedEntry, FeedFormat, FeedMeta, XmlFeedDecoder,
    parse_date,
};
pub use http::{ByteStream, DocumentFetcher, FeedResponse, ReqwestFetcher, RequestOptions};
pub use orchestrator::{FeedSummary, FetchRequest, HandlerFuture, fetch_feed, fetch_feed_with};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
