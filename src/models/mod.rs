mod extension;
mod feed_contents;

pub use extension::{Extension, FeedFormat};
pub use feed_contents::{FeedContentsRow, FetchAttempt, FetchStatus, ResponseMeta, RowParts};
