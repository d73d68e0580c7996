mod date;
mod decoder;
mod model;

pub use date::parse_date;
pub use decoder::{DecoderEvent, FeedDecoder, XmlFeedDecoder};
pub use model::{Enclosure, FeedEntry, FeedFormat, FeedMeta};
