//! S3 client implementation using the AWS S3 SDK

use crate::config::{AdvancedConfig, AwsConfig};
use crate::error::{Error, Result, StoreError};
use crate::policy;
use crate::store::{CompletedPart, ObjectLocation, ObjectStoreClient, SessionToken};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    primitives::ByteStream,
    types::{
        BucketLocationConstraint, BucketVersioningStatus, CompletedMultipartUpload,
        CreateBucketConfiguration, ObjectCannedAcl,
    },
    Client,
};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Region that rejects an explicit location constraint
const DEFAULT_AWS_REGION: &str = "us-east-1";

/// S3 client for bucket and object management
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    region: String,
}

impl S3Client {
    /// Build a client from configuration
    ///
    /// Explicit keys win; otherwise the SDK default chain (environment,
    /// profile, instance metadata) supplies credentials.
    pub async fn from_config(aws: &AwsConfig, advanced: &AdvancedConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(aws.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(advanced.max_retries))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_attempt_timeout(Duration::from_secs(advanced.timeout))
                    .build(),
            );

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&aws.access_key_id, &aws.secret_access_key)
        {
            let credentials = Credentials::new(
                access_key_id,
                secret_access_key,
                aws.session_token.clone(),
                None,
                "s3pilot",
            );
            loader = loader.credentials_provider(credentials);
        }

        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &aws.endpoint {
            // S3-compatible stores rarely support virtual-hosted buckets
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::from_client(
            Client::from_conf(builder.build()),
            aws.region.clone(),
        ))
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client, region: String) -> Self {
        Self { client, region }
    }

    /// Get the configured region
    pub fn region(&self) -> &str {
        &self.region
    }

    // === Buckets ===

    /// List all buckets visible to the credentials
    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let response = self.client.list_buckets().send().await?;

        let buckets = response
            .buckets()
            .iter()
            .map(|b| BucketInfo {
                name: b.name().unwrap_or_default().to_string(),
                creation_date: b.creation_date().cloned(),
            })
            .collect();

        Ok(buckets)
    }

    /// Create a bucket in `region`
    pub async fn create_bucket(&self, name: &str, region: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(name);

        if region != DEFAULT_AWS_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        request.send().await?;
        debug!(bucket = name, region, "bucket created");
        Ok(())
    }

    /// Delete an empty bucket
    pub async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.client.delete_bucket().bucket(name).send().await?;
        Ok(())
    }

    /// Check if a bucket exists and is reachable
    pub async fn bucket_exists(&self, name: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(name).send().await {
            Ok(_) => Ok(true),
            Err(err) => match StoreError::from(err) {
                StoreError::NotFound(_) => Ok(false),
                other => Err(other.into()),
            },
        }
    }

    // === Objects ===

    /// Delete an object from a bucket
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;

        Ok(())
    }

    /// Grant anonymous read access to a single object
    pub async fn set_object_public_read(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await?;

        Ok(())
    }

    // === Policies ===

    /// Lift the public access block and attach a public-read policy
    pub async fn create_public_read_policy(&self, bucket: &str) -> Result<()> {
        let document = policy::public_read_policy(bucket)?;

        self.client
            .delete_public_access_block()
            .bucket(bucket)
            .send()
            .await?;

        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(document)
            .send()
            .await?;

        Ok(())
    }

    /// Get the bucket policy document
    pub async fn read_bucket_policy(&self, bucket: &str) -> Result<String> {
        let response = self.client.get_bucket_policy().bucket(bucket).send().await?;

        response
            .policy()
            .map(str::to_string)
            .ok_or_else(|| Error::NotFound(format!("No policy attached to bucket '{}'", bucket)))
    }

    /// Expire objects under `prefix` after `days`
    pub async fn set_lifecycle_expiration(&self, bucket: &str, prefix: &str, days: i32) -> Result<()> {
        let configuration = policy::expiration_lifecycle(prefix, days)?;

        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(configuration)
            .send()
            .await?;

        Ok(())
    }

    // === Versioning ===

    /// Whether versioning is currently enabled on the bucket
    pub async fn versioning_enabled(&self, bucket: &str) -> Result<bool> {
        let response = self
            .client
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await?;

        Ok(response.status() == Some(&BucketVersioningStatus::Enabled))
    }

    /// List every stored version of exactly `key`
    pub async fn list_object_versions(&self, bucket: &str, key: &str) -> Result<Vec<ObjectVersionInfo>> {
        let mut versions = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;

        loop {
            let response = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .prefix(key)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await?;

            versions.extend(
                response
                    .versions()
                    .iter()
                    // Prefix listing also matches longer keys
                    .filter(|v| v.key() == Some(key))
                    .map(|v| ObjectVersionInfo {
                        version_id: v.version_id().unwrap_or("null").to_string(),
                        last_modified: v.last_modified().cloned(),
                        is_latest: v.is_latest().unwrap_or(false),
                        size: v.size().unwrap_or(0),
                    }),
            );

            if !response.is_truncated().unwrap_or(false) {
                break;
            }

            key_marker = response.next_key_marker().map(str::to_string);
            version_marker = response.next_version_id_marker().map(str::to_string);
        }

        Ok(versions)
    }

    /// Make `version_id` the latest version of `key` by copying it over itself
    pub async fn restore_object_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<ObjectLocation> {
        let response = self
            .client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(copy_source(bucket, key, version_id))
            .send()
            .await?;

        Ok(ObjectLocation {
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: response
                .copy_object_result()
                .and_then(|r| r.e_tag())
                .map(str::to_string),
            version_id: response.version_id().map(str::to_string),
        })
    }

    /// Delete every non-latest version of `key`; returns how many were removed
    pub async fn delete_noncurrent_versions(&self, bucket: &str, key: &str) -> Result<usize> {
        let versions = self.list_object_versions(bucket, key).await?;
        let mut deleted = 0;

        for version in versions.iter().filter(|v| !v.is_latest) {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .version_id(&version.version_id)
                .send()
                .await?;

            debug!(bucket, key, version_id = %version.version_id, "deleted noncurrent version");
            deleted += 1;
        }

        Ok(deleted)
    }
}

/// `CopySource` value for one version of an object
///
/// S3 expects the key URL-encoded; `/` separators are kept.
fn copy_source(bucket: &str, key: &str, version_id: &str) -> String {
    let key = key
        .split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/");

    format!("{}/{}?versionId={}", bucket, key, urlencoding::encode(version_id))
}

#[async_trait]
impl ObjectStoreClient for S3Client {
    async fn begin_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> std::result::Result<SessionToken, StoreError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await?;

        let upload_id = response
            .upload_id()
            .ok_or_else(|| StoreError::InvalidResponse("Missing UploadId".to_string()))?;

        Ok(SessionToken {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        })
    }

    async fn upload_part(
        &self,
        session: &SessionToken,
        part_number: u32,
        body: Bytes,
    ) -> std::result::Result<String, StoreError> {
        let part_number = i32::try_from(part_number).map_err(|_| {
            StoreError::InvalidResponse(format!("Part number {} out of range", part_number))
        })?;

        let response = self
            .client
            .upload_part()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await?;

        response
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidResponse("Missing ETag".to_string()))
    }

    async fn complete_multipart_upload(
        &self,
        session: &SessionToken,
        parts: &[CompletedPart],
    ) -> std::result::Result<ObjectLocation, StoreError> {
        let parts = parts
            .iter()
            .map(|part| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        let response = self
            .client
            .complete_multipart_upload()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await?;

        Ok(ObjectLocation {
            bucket: session.bucket.clone(),
            key: session.key.clone(),
            etag: response.e_tag().map(str::to_string),
            version_id: response.version_id().map(str::to_string),
        })
    }

    async fn abort_multipart_upload(&self, session: &SessionToken) -> std::result::Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .send()
            .await?;

        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> std::result::Result<ObjectLocation, StoreError> {
        let response = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await?;

        Ok(ObjectLocation {
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: response.e_tag().map(str::to_string),
            version_id: response.version_id().map(str::to_string),
        })
    }
}

/// Bucket information
#[derive(Debug, Clone)]
pub struct BucketInfo {
    pub name: String,
    pub creation_date: Option<aws_smithy_types::DateTime>,
}

/// One stored version of an object
#[derive(Debug, Clone)]
pub struct ObjectVersionInfo {
    pub version_id: String,
    pub last_modified: Option<aws_smithy_types::DateTime>,
    pub is_latest: bool,
    pub size: i64,
}
