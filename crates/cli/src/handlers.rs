//! Command handlers for s3pilot CLI

use crate::{BucketAction, ConfigAction, FileAction, LifecycleAction, PolicyAction, VersioningAction};
use anyhow::{bail, Context as _, Result};
use clap::Command;
use clap_complete::{generate, Shell as ClapShell};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use s3pilot_core::content_type::{self, UPLOADABLE_TYPES};
use s3pilot_core::upload::{part_size_for, MAX_PARTS};
use s3pilot_core::{
    fetch, get_config_path, upload_remote, validate_config, ByteSource, ConfigFile, FileSource,
    S3Client, UploadJob, Uploader,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};

/// Bytes inspected when sniffing the content type
const SNIFF_LEN: u64 = 512;

/// Loaded configuration shared by every handler
pub struct Context {
    config: ConfigFile,
    config_path: Option<PathBuf>,
}

impl Context {
    pub fn new(config: ConfigFile, config_path: Option<PathBuf>) -> Self {
        Self { config, config_path }
    }

    /// Build the S3 client; one per command invocation
    async fn client(&self) -> Result<S3Client> {
        Ok(S3Client::from_config(&self.config.aws, &self.config.advanced).await?)
    }

    /// Explicit bucket, else the configured default
    fn bucket(&self, bucket: Option<String>) -> Result<String> {
        bucket
            .or_else(|| self.config.storage.default_bucket.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No bucket given.\n\
                     Pass --bucket or set 'default_bucket' under [storage] in your configuration."
                )
            })
    }

    fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_config_path()?),
        }
    }
}

/// Handle buckets commands
pub async fn handle_buckets(ctx: &Context, action: BucketAction) -> Result<()> {
    let client = ctx.client().await?;

    match action {
        BucketAction::List => {
            println!("Listing buckets...");
            println!();

            let buckets = client.list_buckets().await?;

            if buckets.is_empty() {
                println!("  No buckets found");
            } else {
                #[derive(Tabled)]
                struct BucketRow {
                    name: String,
                    created: String,
                }

                let rows: Vec<BucketRow> = buckets.iter().map(|b| BucketRow {
                    name: b.name.clone(),
                    created: format_date(b.creation_date.as_ref()),
                }).collect();

                println!("{}", Table::new(rows));
            }

            if let Some(default_bucket) = &ctx.config.storage.default_bucket {
                println!();
                println!("Default bucket: {}", default_bucket);
            }

            Ok(())
        }
        BucketAction::Create { name, region } => {
            let region = region.unwrap_or_else(|| client.region().to_string());

            println!("Creating bucket '{}' in {}...", name, region);
            client.create_bucket(&name, &region).await?;
            println!("  ✅ Bucket created: {}", name);

            Ok(())
        }
        BucketAction::Delete { name, yes } => {
            // Prevent accidental deletion of default bucket
            if ctx.config.storage.default_bucket.as_deref() == Some(name.as_str()) {
                bail!(
                    "Cannot delete default bucket '{}'.\n\
                     Change the default bucket in your configuration first.",
                    name
                );
            }

            println!("⚠️  Warning: you are about to delete bucket '{}'", name);
            println!("  This action is IRREVERSIBLE!");

            if !yes {
                use dialoguer::{theme::ColorfulTheme, Confirm};

                let confirmed = Confirm::with_theme(&ColorfulTheme::default())
                    .with_prompt("Delete this bucket?")
                    .default(false)
                    .interact()?;

                if !confirmed {
                    println!("❌ Deletion cancelled");
                    return Ok(());
                }
            }

            client.delete_bucket(&name).await?;
            println!("  ✅ Bucket deleted: {}", name);

            Ok(())
        }
        BucketAction::Exists { name } => {
            let exists = client.bucket_exists(&name).await?;
            println!("Bucket exists: {}", if exists { "Yes" } else { "No" });

            Ok(())
        }
    }
}

/// Handle files commands
pub async fn handle_files(ctx: &Context, action: FileAction) -> Result<()> {
    match action {
        FileAction::Upload { file, key, bucket, progress, validate_mime } => {
            upload_file(ctx, &file, key, bucket, progress, validate_mime).await
        }
        FileAction::UploadUrl { url, key, bucket, keep_local } => {
            upload_url(ctx, &url, key, bucket, keep_local).await
        }
        FileAction::Delete { key, bucket, confirm } => {
            if !confirm {
                bail!("Please provide --del flag to confirm deletion");
            }

            let bucket = ctx.bucket(bucket)?;
            let client = ctx.client().await?;

            println!("Deleting {} from {}...", key, bucket);
            client.delete_object(&bucket, &key).await?;
            println!("  ✅ Successfully deleted {} from {}", key, bucket);

            Ok(())
        }
        FileAction::MakePublic { key, bucket } => {
            let bucket = ctx.bucket(bucket)?;
            let client = ctx.client().await?;

            client.set_object_public_read(&bucket, &key).await?;
            println!("  ✅ {} is now publicly readable", key);

            Ok(())
        }
        FileAction::Versions { key, bucket } => {
            let bucket = ctx.bucket(bucket)?;
            let client = ctx.client().await?;

            let versions = client.list_object_versions(&bucket, &key).await?;

            if versions.is_empty() {
                println!("No versions found for {}", key);
                return Ok(());
            }

            #[derive(Tabled)]
            struct VersionRow {
                version_id: String,
                last_modified: String,
                latest: String,
                size: String,
            }

            let rows: Vec<VersionRow> = versions.iter().map(|v| VersionRow {
                version_id: v.version_id.clone(),
                last_modified: format_date(v.last_modified.as_ref()),
                latest: if v.is_latest { "✅".to_string() } else { String::new() },
                size: format_bytes(v.size),
            }).collect();

            println!("Versions of {} in {}:", key, bucket);
            println!();
            println!("{}", Table::new(rows));
            println!();
            println!("Total versions: {}", versions.len());

            Ok(())
        }
        FileAction::Restore { key, version_id, bucket } => {
            let bucket = ctx.bucket(bucket)?;
            let client = ctx.client().await?;

            let location = client.restore_object_version(&bucket, &key, &version_id).await?;
            println!("  ✅ Restored version {} of {}", version_id, key);
            if let Some(new_version) = &location.version_id {
                println!("  New version: {}", new_version);
            }

            Ok(())
        }
        FileAction::PruneVersions { key, bucket, confirm } => {
            if !confirm {
                bail!("Please provide --del flag to confirm deletion of old versions");
            }

            let bucket = ctx.bucket(bucket)?;
            let client = ctx.client().await?;

            let deleted = client.delete_noncurrent_versions(&bucket, &key).await?;
            println!("  ✅ Deleted {} old version(s) of {}", deleted, key);

            Ok(())
        }
    }
}

async fn upload_file(
    ctx: &Context,
    file: &Path,
    key: Option<String>,
    bucket: Option<String>,
    progress: bool,
    validate_mime: bool,
) -> Result<()> {
    if !file.is_file() {
        bail!("File not found: {}", file.display());
    }

    // S3 only rejects undersized parts at completion time
    validate_config(&ctx.config)?;

    let key = match key {
        Some(key) => key,
        None => file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("Cannot derive a key from the file name")?,
    };
    let bucket = ctx.bucket(bucket)?;

    let source = FileSource::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let size = source.len();

    let head = source.read_range(0, size.min(SNIFF_LEN)).await?;
    let content_type = content_type::resolve(file, &head);

    if validate_mime && !content_type::is_allowed(&content_type, UPLOADABLE_TYPES) {
        bail!("Invalid file type: {}", content_type);
    }

    let settings = &ctx.config.upload;
    let policy = settings.policy();

    println!("Uploading {} -> s3://{}/{}...", file.display(), bucket, key);
    println!("  Size: {}", format_bytes(size as i64));
    println!("  Content type: {}", content_type);
    if policy.uses_multipart(size) {
        println!("  Using multipart upload for large file...");
    } else {
        println!("  Using simple upload for small file...");
    }

    let job = UploadJob::new(bucket, key)
        .with_part_size(part_size_for(size, settings.part_size_bytes(), MAX_PARTS))
        .with_concurrency(settings.max_concurrency)
        .with_content_type(content_type);

    let client = Arc::new(ctx.client().await?);
    let mut uploader = Uploader::new(client).with_policy(policy);

    let bar = if progress {
        let bar = ProgressBar::new(size);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
                .progress_chars("#>-"),
        );

        let handle = bar.clone();
        uploader = uploader.with_progress(Arc::new(move |p| {
            // Reports from concurrent parts may arrive out of order
            if p.bytes_uploaded > handle.position() {
                handle.set_position(p.bytes_uploaded);
            }
        }));
        Some(bar)
    } else {
        None
    };

    let result = uploader.upload(&job, Arc::new(source)).await;

    if let Some(bar) = bar {
        match &result {
            Ok(_) => bar.finish_with_message("done"),
            Err(_) => bar.abandon(),
        }
    }

    match result {
        Ok(location) => {
            println!("  ✅ Upload successful: {}", location);
            Ok(())
        }
        Err(e) => {
            println!("  ❌ Upload failed");
            Err(e.into())
        }
    }
}

async fn upload_url(
    ctx: &Context,
    url: &str,
    key: String,
    bucket: Option<String>,
    keep_local: bool,
) -> Result<()> {
    validate_config(&ctx.config)?;
    let bucket = ctx.bucket(bucket)?;

    // Local copy is named after the key, in the working directory
    let local_path = if keep_local {
        let name = Path::new(&key)
            .file_name()
            .context("Cannot derive a local file name from the key")?;
        Some(PathBuf::from(name))
    } else {
        None
    };

    println!("Downloading {}...", url);
    let remote = fetch(url, Duration::from_secs(ctx.config.advanced.timeout)).await?;
    let size = remote.body.len() as u64;
    println!("  Size: {}", format_bytes(size as i64));

    let settings = &ctx.config.upload;
    let policy = settings.policy();
    if policy.uses_multipart(size) {
        println!("  Using multipart upload for large file...");
    } else {
        println!("  Using simple upload for small file...");
    }

    let job = UploadJob::new(bucket, key)
        .with_part_size(part_size_for(size, settings.part_size_bytes(), MAX_PARTS))
        .with_concurrency(settings.max_concurrency);

    let client = Arc::new(ctx.client().await?);
    let uploader = Uploader::new(client).with_policy(policy);

    let location = upload_remote(&uploader, &job, remote, local_path.as_deref()).await?;
    println!("  ✅ Upload successful: {}", location);
    if let Some(path) = &local_path {
        println!("  Local copy: {}", path.display());
    }

    Ok(())
}

/// Handle policy commands
pub async fn handle_policy(ctx: &Context, action: PolicyAction) -> Result<()> {
    let client = ctx.client().await?;

    match action {
        PolicyAction::Create { bucket } => {
            println!("Attaching public-read policy to '{}'...", bucket);
            client.create_public_read_policy(&bucket).await?;
            println!("  ✅ Successfully created policy for bucket: {}", bucket);

            Ok(())
        }
        PolicyAction::Show { bucket } => {
            let policy = client.read_bucket_policy(&bucket).await?;

            // Pretty-print when the store returns valid JSON
            match serde_json::from_str::<serde_json::Value>(&policy) {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("{}", policy),
            }

            Ok(())
        }
    }
}

/// Handle lifecycle commands
pub async fn handle_lifecycle(ctx: &Context, action: LifecycleAction) -> Result<()> {
    match action {
        LifecycleAction::Set { bucket, prefix, days } => {
            let client = ctx.client().await?;

            client.set_lifecycle_expiration(&bucket, &prefix, days).await?;
            println!(
                "  ✅ Lifecycle policy set: objects under '{}' expire after {} days",
                prefix, days
            );

            Ok(())
        }
    }
}

/// Handle versioning commands
pub async fn handle_versioning(ctx: &Context, action: VersioningAction) -> Result<()> {
    match action {
        VersioningAction::Status { bucket } => {
            let client = ctx.client().await?;

            let enabled = client.versioning_enabled(&bucket).await?;
            println!(
                "Versioning for bucket {}: {}",
                bucket,
                if enabled { style("Enabled").green() } else { style("Disabled").yellow() }
            );

            Ok(())
        }
    }
}

/// Handle config commands
pub async fn handle_config(ctx: &Context, action: ConfigAction) -> Result<()> {
    let config = &ctx.config;

    match action {
        ConfigAction::Show => {
            println!("Current configuration:");
            println!();

            println!("AWS:");
            println!("  Region: {}", config.aws.region);
            println!("  Endpoint: {}", config.aws.endpoint.as_deref().unwrap_or("(AWS default)"));
            println!(
                "  Auth: {}",
                if config.aws.has_static_credentials() {
                    "Access Keys (config file)"
                } else {
                    "AWS default credential chain"
                }
            );
            println!();
            println!("Storage:");
            println!(
                "  Default bucket: {}",
                config.storage.default_bucket.as_deref().unwrap_or("(none)")
            );
            println!();
            println!("Upload:");
            println!("  Multipart threshold: {} MB", config.upload.multipart_threshold_mb);
            println!("  Part size: {} MB", config.upload.part_size_mb);
            println!("  Max concurrency: {}", config.upload.max_concurrency);

            Ok(())
        }
        ConfigAction::Path => {
            let path = ctx.config_path()?;
            println!("{}", path.display());
            if !path.exists() {
                println!("  ⚠️  File does not exist; built-in defaults are in use");
            }

            Ok(())
        }
        ConfigAction::Validate => {
            println!("Validating configuration...");

            validate_config(config)?;
            println!("  ✅ Valid configuration format");

            println!("  Testing S3 connection...");
            let client = ctx.client().await?;
            let buckets = client.list_buckets().await?;

            println!("  ✅ Connection successful ({} buckets visible)", buckets.len());

            Ok(())
        }
    }
}

/// Format an SDK timestamp as a readable date
fn format_date(date: Option<&aws_smithy_types::DateTime>) -> String {
    date.and_then(|d| chrono::DateTime::from_timestamp(d.secs(), d.subsec_nanos()))
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Format bytes to human-readable size
fn format_bytes(bytes: i64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Handle shell completion generation
pub async fn handle_completion(shell: &str, cmd: &mut Command) -> Result<()> {
    use std::io;

    let clap_shell = match shell {
        "bash" => ClapShell::Bash,
        "zsh" => ClapShell::Zsh,
        "fish" => ClapShell::Fish,
        "elvish" => ClapShell::Elvish,
        "powershell" | "pwsh" => ClapShell::PowerShell,
        _ => {
            bail!(
                "Unsupported shell: {}\nSupported shells: bash, zsh, fish, elvish, powershell",
                shell
            );
        }
    };

    // Script on stdout so it can be sourced directly; hints go to stderr
    generate(clap_shell, cmd, "s3pilot", &mut io::stdout());

    match shell {
        "bash" => eprintln!("# Add to your ~/.bashrc:\n#   source <(s3pilot completion bash)"),
        "zsh" => eprintln!("# Add to your ~/.zshrc:\n#   source <(s3pilot completion zsh)"),
        "fish" => eprintln!("# s3pilot completion fish > ~/.config/fish/completions/s3pilot.fish"),
        "powershell" | "pwsh" => {
            eprintln!("# s3pilot completion powershell | Out-String | Invoke-Expression")
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(250 * 1024 * 1024), "250.00 MB");
    }

    #[test]
    fn test_format_date() {
        let date = aws_smithy_types::DateTime::from_secs(1_700_000_000);
        assert_eq!(format_date(Some(&date)), "2023-11-14 22:13");
        assert_eq!(format_date(None), "-");
    }

    #[test]
    fn test_bucket_falls_back_to_default() {
        let mut config = ConfigFile::default();
        let ctx = Context::new(config.clone(), None);
        assert!(ctx.bucket(None).is_err());
        assert_eq!(ctx.bucket(Some("explicit".to_string())).unwrap(), "explicit");

        config.storage.default_bucket = Some("media".to_string());
        let ctx = Context::new(config, None);
        assert_eq!(ctx.bucket(None).unwrap(), "media");
        assert_eq!(ctx.bucket(Some("explicit".to_string())).unwrap(), "explicit");
    }
}
