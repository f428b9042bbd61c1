mod classifier;
mod decoder;
pub mod extensions;
mod fetcher;
pub mod gtfs_realtime;

pub use classifier::{classify, BodyPolicy};
pub use decoder::decode;
pub use fetcher::{CacheValidators, FeedFetcher};
