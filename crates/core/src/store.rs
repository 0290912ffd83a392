//! Object store contract used by the uploader

use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Server-assigned multipart session
///
/// Owned by one upload for its whole lifetime and consumed by exactly one of
/// `complete_multipart_upload` or `abort_multipart_upload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

/// A part acknowledged by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Where a finished object landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            etag: None,
            version_id: None,
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Operations the uploader needs from a backing store
///
/// Implementations own transport, signing and retries.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Open a multipart session for `bucket/key`
    async fn begin_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<SessionToken, StoreError>;

    /// Upload one part and return its completion token
    async fn upload_part(
        &self,
        session: &SessionToken,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StoreError>;

    /// Commit a session; `parts` must be sorted by part number
    async fn complete_multipart_upload(
        &self,
        session: &SessionToken,
        parts: &[CompletedPart],
    ) -> Result<ObjectLocation, StoreError>;

    /// Release a session and every part uploaded under it
    async fn abort_multipart_upload(&self, session: &SessionToken) -> Result<(), StoreError>;

    /// Store a whole object in a single request
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<ObjectLocation, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_location_display() {
        let location = ObjectLocation::new("media", "videos/intro.mp4");
        assert_eq!(location.to_string(), "s3://media/videos/intro.mp4");
        assert!(location.etag.is_none());
    }
}
