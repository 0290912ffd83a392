//! Bucket policy and lifecycle documents

use crate::error::{Error, Result};
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, ExpirationStatus, LifecycleExpiration, LifecycleRule,
    LifecycleRuleFilter,
};

/// Default lifecycle expiration in days
pub const DEFAULT_EXPIRATION_DAYS: i32 = 120;

/// Policy granting anonymous `s3:GetObject` on every object in `bucket`
pub fn public_read_policy(bucket: &str) -> Result<String> {
    if bucket.is_empty() {
        return Err(Error::InvalidInput("Bucket name cannot be empty".to_string()));
    }

    let policy = serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "PublicReadGetObject",
            "Effect": "Allow",
            "Principal": "*",
            "Action": "s3:GetObject",
            "Resource": format!("arn:aws:s3:::{}/*", bucket),
        }],
    });

    Ok(serde_json::to_string(&policy)?)
}

/// Single enabled rule expiring objects under `prefix` after `days`
pub fn expiration_lifecycle(prefix: &str, days: i32) -> Result<BucketLifecycleConfiguration> {
    if days <= 0 {
        return Err(Error::InvalidInput(format!(
            "Expiration must be at least one day (got {})",
            days
        )));
    }

    let rule = LifecycleRule::builder()
        .id(format!("expire-after-{}-days", days))
        .filter(LifecycleRuleFilter::builder().prefix(prefix).build())
        .status(ExpirationStatus::Enabled)
        .expiration(LifecycleExpiration::builder().days(days).build())
        .build()?;

    Ok(BucketLifecycleConfiguration::builder().rules(rule).build()?)
}
