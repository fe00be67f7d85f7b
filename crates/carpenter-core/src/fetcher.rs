//! Blob download abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::Result;

/// Stream of downloaded chunks.
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, std::io::Error>>;

/// Fetches source archives from blob storage.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Open a download of `key` inside `container`.
    async fn download(&self, container: &str, key: &str) -> Result<ByteStream>;
}
