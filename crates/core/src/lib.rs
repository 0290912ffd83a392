//! s3pilot-core - Core library for the s3pilot CLI
//!
//! This library provides the chunked concurrent multipart uploader, the object
//! store contract it depends on, URL ingestion, an S3 implementation of that
//! contract with bucket/object/versioning operations, and configuration
//! management.

pub mod client;
pub mod config;
pub mod content_type;
pub mod error;
pub mod policy;
pub mod remote;
pub mod source;
pub mod store;
pub mod upload;

// Re-export commonly used types
pub use client::{BucketInfo, ObjectVersionInfo, S3Client};
pub use config::{
    get_config_path, load_config_from, load_config_or_default, save_config_to,
    validate_config,
};
pub use config::{AdvancedConfig, AwsConfig, Config, ConfigFile, LoggingConfig, StorageConfig, UploadConfig};
pub use error::{Error, PartFailure, Result, StoreError, UploadError};
pub use remote::{fetch, upload_remote, RemoteObject};
pub use source::{ByteSource, FileSource};
pub use store::{CompletedPart, ObjectLocation, ObjectStoreClient, SessionToken};
pub use upload::{
    plan_parts, upload, PartDescriptor, ProgressCallback, UploadJob, UploadPolicy, UploadProgress,
    UploadState, Uploader,
};
