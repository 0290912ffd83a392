//! Chunked concurrent multipart upload
//!
//! Small payloads go up in a single `put_object`. Anything at or above the
//! multipart threshold is split into fixed-size parts that a bounded set of
//! workers upload concurrently; the session is then completed with the parts
//! in ascending order, or aborted if anything failed.

use crate::content_type;
use crate::error::{PartFailure, UploadError};
use crate::source::ByteSource;
use crate::store::{CompletedPart, ObjectLocation, ObjectStoreClient, SessionToken};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const MIB: u64 = 1024 * 1024;

/// Payloads below this size skip multipart entirely
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * MIB;

pub const DEFAULT_PART_SIZE: u64 = 10 * MIB;

pub const DEFAULT_CONCURRENCY: usize = 5;

/// S3 caps a multipart upload at this many parts
pub const MAX_PARTS: u64 = 10_000;

/// Bytes read from the payload head when the key has no known extension
const SNIFF_LEN: u64 = 512;

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Upload progress information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    pub parts_completed: usize,
    pub total_parts: usize,
}

impl UploadProgress {
    /// Get percentage complete
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_uploaded as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Lifecycle of one upload, reported in trace events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    NotStarted,
    SessionOpen,
    PartsInFlight,
    Finalizing,
    Completed,
    Aborting,
    Aborted,
}

impl UploadState {
    pub fn as_str(&self) -> &str {
        match self {
            UploadState::NotStarted => "not-started",
            UploadState::SessionOpen => "session-open",
            UploadState::PartsInFlight => "parts-in-flight",
            UploadState::Finalizing => "finalizing",
            UploadState::Completed => "completed",
            UploadState::Aborting => "aborting",
            UploadState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to upload and how to split it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    pub bucket: String,
    pub key: String,
    pub part_size: u64,
    pub concurrency_limit: usize,
    /// Overrides content type resolution when set
    pub content_type: Option<String>,
}

impl UploadJob {
    /// Create a job with the default part size and concurrency
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            part_size: DEFAULT_PART_SIZE,
            concurrency_limit: DEFAULT_CONCURRENCY,
            content_type: None,
        }
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency_limit: usize) -> Self {
        self.concurrency_limit = concurrency_limit;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Reject a job that cannot be split into at most [`MAX_PARTS`] parts
    fn validate_size(&self, file_size: u64) -> Result<(), UploadError> {
        let part_count = file_size.div_ceil(self.part_size);
        if part_count > MAX_PARTS {
            return Err(UploadError::InvalidJob(format!(
                "{} bytes in {} byte parts needs {} parts (max {})",
                file_size, self.part_size, part_count, MAX_PARTS
            )));
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), UploadError> {
        if self.bucket.is_empty() {
            return Err(UploadError::InvalidJob("bucket cannot be empty".to_string()));
        }
        if self.key.is_empty() {
            return Err(UploadError::InvalidJob("key cannot be empty".to_string()));
        }
        if self.part_size == 0 {
            return Err(UploadError::InvalidJob("part size must be positive".to_string()));
        }
        if self.concurrency_limit == 0 {
            return Err(UploadError::InvalidJob(
                "concurrency limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Size-based routing between whole-object and multipart uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub multipart_threshold: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
        }
    }
}

impl UploadPolicy {
    /// Whether a payload of `size` bytes goes through a multipart session
    pub fn uses_multipart(&self, size: u64) -> bool {
        size > 0 && size >= self.multipart_threshold
    }
}

/// One byte range of the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartDescriptor {
    /// 1-based
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
}

/// Split `file_size` bytes into `part_size` ranges; the last part takes the
/// remainder. Empty for a zero-byte payload.
pub fn plan_parts(file_size: u64, part_size: u64) -> Vec<PartDescriptor> {
    assert!(part_size > 0, "part size must be positive");

    let part_count = file_size.div_ceil(part_size);
    assert!(
        part_count <= u64::from(u32::MAX),
        "{} parts exceed the part number range",
        part_count
    );

    (0..part_count)
        .map(|index| {
            let offset = index * part_size;
            PartDescriptor {
                part_number: (index + 1) as u32,
                offset,
                length: part_size.min(file_size - offset),
            }
        })
        .collect()
}

/// Smallest part size at or above `preferred` that keeps `file_size` within
/// `max_parts` parts
pub fn part_size_for(file_size: u64, preferred: u64, max_parts: u64) -> u64 {
    preferred.max(file_size.div_ceil(max_parts.max(1)))
}

/// Uploads payloads through an [`ObjectStoreClient`]
pub struct Uploader {
    client: Arc<dyn ObjectStoreClient>,
    policy: UploadPolicy,
    progress: Option<ProgressCallback>,
}

impl Uploader {
    pub fn new(client: Arc<dyn ObjectStoreClient>) -> Self {
        Self {
            client,
            policy: UploadPolicy::default(),
            progress: None,
        }
    }

    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Called after every completed part, and once for a whole-object upload
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Upload `source` to `job.bucket/job.key`
    ///
    /// A multipart session opened here is always completed or aborted before
    /// this returns.
    pub async fn upload(
        &self,
        job: &UploadJob,
        source: Arc<dyn ByteSource>,
    ) -> Result<ObjectLocation, UploadError> {
        job.validate()?;

        let file_size = source.len();
        debug!(
            bucket = %job.bucket,
            key = %job.key,
            size = file_size,
            state = %UploadState::NotStarted,
            "upload requested"
        );
        let content_type = match &job.content_type {
            Some(content_type) => content_type.clone(),
            None => resolve_content_type(&job.key, source.as_ref()).await,
        };

        if !self.policy.uses_multipart(file_size) {
            debug!(
                bucket = %job.bucket,
                key = %job.key,
                size = file_size,
                "uploading as a single object"
            );

            let body = source.read_all().await?;
            let location = self
                .client
                .put_object(&job.bucket, &job.key, body, &content_type)
                .await?;

            self.report(UploadProgress {
                bytes_uploaded: file_size,
                total_bytes: file_size,
                parts_completed: 1,
                total_parts: 1,
            });
            return Ok(location);
        }

        job.validate_size(file_size)?;

        let session = self
            .client
            .begin_multipart_upload(&job.bucket, &job.key, &content_type)
            .await?;
        debug!(
            upload_id = %session.upload_id,
            state = %UploadState::SessionOpen,
            content_type = %content_type,
            "multipart session opened"
        );

        let parts = plan_parts(file_size, job.part_size);
        let outcome = match self
            .upload_parts(&session, source, parts, job.concurrency_limit)
            .await
        {
            Ok(completed) => {
                debug!(
                    upload_id = %session.upload_id,
                    state = %UploadState::Finalizing,
                    parts = completed.len(),
                    "completing multipart upload"
                );
                self.client
                    .complete_multipart_upload(&session, &completed)
                    .await
                    .map_err(|source| UploadError::FinalizeFailed { source })
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(location) => {
                debug!(upload_id = %session.upload_id, state = %UploadState::Completed, "multipart upload completed");
                Ok(location)
            }
            Err(err) => {
                self.abort(&session).await;
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        session: &SessionToken,
        source: Arc<dyn ByteSource>,
        parts: Vec<PartDescriptor>,
        concurrency_limit: usize,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let total_parts = parts.len();
        let worker_count = concurrency_limit.min(total_parts).max(1);

        debug!(
            upload_id = %session.upload_id,
            state = %UploadState::PartsInFlight,
            parts = total_parts,
            workers = worker_count,
            "dispatching parts"
        );

        let shared = Arc::new(PartQueue {
            client: Arc::clone(&self.client),
            session: session.clone(),
            total_bytes: source.len(),
            source,
            parts,
            next: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            bytes_uploaded: AtomicU64::new(0),
            completed: Mutex::new(Vec::with_capacity(total_parts)),
            progress: self.progress.clone(),
        });

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            workers.spawn(run_worker(Arc::clone(&shared)));
        }

        // Every worker is joined before returning, so an abort issued by the
        // caller never overlaps a part upload.
        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.unwrap_or_else(|source| {
                shared.failed.store(true, Ordering::Release);
                Err(UploadError::Aborted { source })
            });

            if let Err(err) = result {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    debug!(upload_id = %session.upload_id, error = %err, "additional part failure");
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        let mut completed = std::mem::take(&mut *shared.completed.lock().await);
        completed.sort_by_key(|part| part.part_number);
        debug_assert_eq!(completed.len(), total_parts);

        Ok(completed)
    }

    async fn abort(&self, session: &SessionToken) {
        debug!(upload_id = %session.upload_id, state = %UploadState::Aborting, "aborting multipart upload");

        match self.client.abort_multipart_upload(session).await {
            Ok(()) => debug!(upload_id = %session.upload_id, state = %UploadState::Aborted, "multipart upload aborted"),
            Err(err) => warn!(
                bucket = %session.bucket,
                key = %session.key,
                upload_id = %session.upload_id,
                error = %err,
                "failed to abort multipart upload"
            ),
        }
    }

    fn report(&self, progress: UploadProgress) {
        if let Some(callback) = &self.progress {
            callback(progress);
        }
    }
}

/// Upload `source` with the default policy
pub async fn upload(
    job: UploadJob,
    source: Arc<dyn ByteSource>,
    client: Arc<dyn ObjectStoreClient>,
) -> Result<ObjectLocation, UploadError> {
    Uploader::new(client).upload(&job, source).await
}

async fn resolve_content_type(key: &str, source: &dyn ByteSource) -> String {
    let path = Path::new(key);
    if let Some(content_type) = content_type::from_extension(path) {
        return content_type;
    }

    // Sniffing is best effort; an unreadable head surfaces later as a part failure
    match source.read_range(0, source.len().min(SNIFF_LEN)).await {
        Ok(head) => content_type::resolve(path, &head),
        Err(_) => content_type::OCTET_STREAM.to_string(),
    }
}

/// State shared by the workers of one session
struct PartQueue {
    client: Arc<dyn ObjectStoreClient>,
    session: SessionToken,
    source: Arc<dyn ByteSource>,
    parts: Vec<PartDescriptor>,
    total_bytes: u64,
    /// Index of the next part to hand out
    next: AtomicUsize,
    /// Set once any part fails; stops further dispatch
    failed: AtomicBool,
    bytes_uploaded: AtomicU64,
    completed: Mutex<Vec<CompletedPart>>,
    progress: Option<ProgressCallback>,
}

impl PartQueue {
    async fn transfer(&self, part: &PartDescriptor) -> Result<CompletedPart, PartFailure> {
        let body = self.source.read_range(part.offset, part.length).await?;
        let etag = self
            .client
            .upload_part(&self.session, part.part_number, body)
            .await?;

        Ok(CompletedPart {
            part_number: part.part_number,
            etag,
        })
    }
}

async fn run_worker(queue: Arc<PartQueue>) -> Result<(), UploadError> {
    loop {
        if queue.failed.load(Ordering::Acquire) {
            return Ok(());
        }

        let index = queue.next.fetch_add(1, Ordering::AcqRel);
        let Some(part) = queue.parts.get(index) else {
            return Ok(());
        };

        match queue.transfer(part).await {
            Ok(completed) => {
                let parts_completed = {
                    let mut done = queue.completed.lock().await;
                    done.push(completed);
                    done.len()
                };
                let bytes_uploaded =
                    queue.bytes_uploaded.fetch_add(part.length, Ordering::AcqRel) + part.length;

                debug!(
                    upload_id = %queue.session.upload_id,
                    part = part.part_number,
                    bytes = part.length,
                    "part uploaded"
                );

                if let Some(callback) = &queue.progress {
                    callback(UploadProgress {
                        bytes_uploaded,
                        total_bytes: queue.total_bytes,
                        parts_completed,
                        total_parts: queue.parts.len(),
                    });
                }
            }
            Err(source) => {
                queue.failed.store(true, Ordering::Release);
                return Err(UploadError::PartFailed {
                    part_number: part.part_number,
                    source,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_parts_with_remainder() {
        let parts = plan_parts(105 * MIB, 10 * MIB);

        assert_eq!(parts.len(), 11);
        assert_eq!(parts[10].part_number, 11);
        assert_eq!(parts[10].offset, 100 * MIB);
        assert_eq!(parts[10].length, 5 * MIB);
    }

    #[test]
    fn test_plan_parts_exact_multiple() {
        let parts = plan_parts(250 * MIB, 10 * MIB);

        assert_eq!(parts.len(), 25);
        assert_eq!(parts.last().unwrap().length, 10 * MIB);
        assert!(parts.iter().all(|p| p.length > 0));
    }

    #[test]
    fn test_plan_parts_covers_payload() {
        for (size, part_size) in [(1, 1), (7, 3), (1000, 7), (4096, 4096), (4097, 4096)] {
            let parts = plan_parts(size, part_size);

            assert_eq!(parts.len() as u64, size.div_ceil(part_size));
            assert_eq!(parts.iter().map(|p| p.length).sum::<u64>(), size);

            let mut expected_offset = 0;
            for (index, part) in parts.iter().enumerate() {
                assert_eq!(part.part_number as usize, index + 1);
                assert_eq!(part.offset, expected_offset);
                expected_offset += part.length;
            }
        }
    }

    #[test]
    fn test_plan_parts_empty_payload() {
        assert!(plan_parts(0, 10).is_empty());
    }

    #[test]
    fn test_part_size_for_respects_part_limit() {
        assert_eq!(part_size_for(250 * MIB, 10 * MIB, 10_000), 10 * MIB);

        let huge = 200 * 1024 * MIB;
        let size = part_size_for(huge, 10 * MIB, 10_000);
        assert!(plan_parts(huge, size).len() <= 10_000);
    }

    #[test]
    fn test_policy_threshold() {
        let policy = UploadPolicy::default();

        assert!(!policy.uses_multipart(0));
        assert!(!policy.uses_multipart(25 * MIB));
        assert!(!policy.uses_multipart(100 * MIB - 1));
        assert!(policy.uses_multipart(100 * MIB));

        let zero = UploadPolicy { multipart_threshold: 0 };
        assert!(!zero.uses_multipart(0));
        assert!(zero.uses_multipart(1));
    }

    #[test]
    fn test_job_validation() {
        assert!(UploadJob::new("bucket", "key").validate().is_ok());
        assert!(UploadJob::new("", "key").validate().is_err());
        assert!(UploadJob::new("bucket", "").validate().is_err());
        assert!(UploadJob::new("bucket", "key").with_part_size(0).validate().is_err());
        assert!(UploadJob::new("bucket", "key").with_concurrency(0).validate().is_err());
    }

    #[test]
    fn test_job_part_count_limit() {
        let job = UploadJob::new("bucket", "key").with_part_size(MIB);
        assert!(job.validate_size(MAX_PARTS * MIB).is_ok());
        assert!(matches!(
            job.validate_size(MAX_PARTS * MIB + 1),
            Err(UploadError::InvalidJob(_))
        ));

        let tiny = UploadJob::new("bucket", "key").with_part_size(1);
        assert!(tiny.validate_size(u64::from(u32::MAX) + 10).is_err());
    }

    #[test]
    fn test_progress_percentage() {
        let progress = UploadProgress {
            bytes_uploaded: 25,
            total_bytes: 100,
            parts_completed: 1,
            total_parts: 4,
        };
        assert_eq!(progress.percentage(), 25.0);

        let empty = UploadProgress {
            bytes_uploaded: 0,
            total_bytes: 0,
            parts_completed: 1,
            total_parts: 1,
        };
        assert_eq!(empty.percentage(), 100.0);
    }

    #[test]
    fn test_upload_state_display() {
        assert_eq!(UploadState::PartsInFlight.to_string(), "parts-in-flight");
        assert_eq!(UploadState::Aborted.as_str(), "aborted");
        assert_eq!(UploadState::NotStarted.to_string(), "not-started");
    }
}
