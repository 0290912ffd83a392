//! Ingest a file served over HTTP(S)
//!
//! The body is fetched into memory and handed to the [`Uploader`] as a
//! [`Bytes`] source, so the same size-based routing applies as for local files.

use crate::content_type::OCTET_STREAM;
use crate::error::Result;
use crate::store::ObjectLocation;
use crate::upload::{UploadJob, Uploader};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A downloaded payload
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub body: Bytes,
    /// Media type from the response header, without parameters
    pub content_type: Option<String>,
}

impl RemoteObject {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Download `url`; non-2xx responses are errors
pub async fn fetch(url: &str, timeout: Duration) -> Result<RemoteObject> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    let response = client.get(url).send().await?.error_for_status()?;

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let body = response.bytes().await?;
    debug!(url, size = body.len(), content_type = ?content_type, "remote file fetched");

    Ok(RemoteObject { body, content_type })
}

/// Upload a fetched payload, optionally keeping a copy at `keep_local`
///
/// A job without an explicit content type takes the response's media type,
/// unless that is the generic octet-stream.
pub async fn upload_remote(
    uploader: &Uploader,
    job: &UploadJob,
    remote: RemoteObject,
    keep_local: Option<&Path>,
) -> Result<ObjectLocation> {
    let job = match (&job.content_type, remote.content_type) {
        (None, Some(content_type)) if content_type != OCTET_STREAM => {
            job.clone().with_content_type(content_type)
        }
        _ => job.clone(),
    };

    let location = uploader
        .upload(&job, Arc::new(remote.body.clone()))
        .await?;

    if let Some(path) = keep_local {
        tokio::fs::write(path, &remote.body).await?;
        debug!(path = %path.display(), "kept local copy");
    }

    Ok(location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_fetch_rejects_malformed_url() {
        let result = fetch("not a url", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::HttpClient(_))));
    }

    #[test]
    fn test_remote_object_builder() {
        let remote = RemoteObject::new(&b"abc"[..]).with_content_type("image/jpeg");
        assert_eq!(&remote.body[..], b"abc");
        assert_eq!(remote.content_type.as_deref(), Some("image/jpeg"));
    }
}
