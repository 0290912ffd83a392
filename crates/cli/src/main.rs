use anyhow::Result;
use clap::{CommandFactory, Parser};
use color_eyre::config::HookBuilder;
use s3pilot_core::{load_config_or_default, LoggingConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod handlers;

/// s3pilot - manage S3 buckets and objects from your terminal
#[derive(Parser, Debug)]
#[command(name = "s3pilot")]
#[command(author = "Kev <kev@m7academy.com>")]
#[command(version)]
#[command(about = "Rust CLI for S3 buckets, objects, versions and multipart uploads", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/s3pilot/config.toml)
    #[arg(long, global = true, env = "S3PILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Bucket management
    Buckets {
        #[command(subcommand)]
        action: BucketAction,
    },

    /// Object management
    Files {
        #[command(subcommand)]
        action: FileAction,
    },

    /// Bucket policies
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Lifecycle rules
    Lifecycle {
        #[command(subcommand)]
        action: LifecycleAction,
    },

    /// Bucket versioning
    Versioning {
        #[command(subcommand)]
        action: VersioningAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Shell completion
    Completion {
        /// Shell type (bash, zsh, fish, elvish, powershell)
        shell: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum BucketAction {
    /// List buckets
    List,
    /// Create a bucket
    Create {
        name: String,
        /// Region for the bucket (defaults to the configured region)
        #[arg(short, long)]
        region: Option<String>,
    },
    /// Delete an empty bucket
    Delete {
        name: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Check whether a bucket exists
    Exists { name: String },
}

#[derive(clap::Subcommand, Debug)]
enum FileAction {
    /// Upload a file (multipart above the configured threshold)
    Upload {
        /// Local file to upload
        file: PathBuf,
        /// Destination key (defaults to the file name)
        key: Option<String>,
        /// Target bucket (uses the default bucket)
        #[arg(short, long)]
        bucket: Option<String>,
        /// Show a progress bar
        #[arg(short, long)]
        progress: bool,
        /// Reject files that are not images, video, audio, text, PDF or JSON
        #[arg(long)]
        validate_mime: bool,
    },
    /// Download a file from a URL and upload it
    UploadUrl {
        /// HTTP(S) URL to fetch
        url: String,
        /// Destination key
        key: String,
        #[arg(short, long)]
        bucket: Option<String>,
        /// Also save the downloaded file in the current directory
        #[arg(long)]
        keep_local: bool,
    },
    /// Delete an object
    Delete {
        key: String,
        #[arg(short, long)]
        bucket: Option<String>,
        /// Confirm deletion
        #[arg(long = "del")]
        confirm: bool,
    },
    /// Make an object publicly readable
    MakePublic {
        key: String,
        #[arg(short, long)]
        bucket: Option<String>,
    },
    /// List the versions of an object
    Versions {
        key: String,
        #[arg(short, long)]
        bucket: Option<String>,
    },
    /// Restore a previous version as the latest
    Restore {
        key: String,
        version_id: String,
        #[arg(short, long)]
        bucket: Option<String>,
    },
    /// Delete every version except the latest
    PruneVersions {
        key: String,
        #[arg(short, long)]
        bucket: Option<String>,
        /// Confirm deletion
        #[arg(long = "del")]
        confirm: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
enum PolicyAction {
    /// Attach a public-read policy to a bucket
    Create { bucket: String },
    /// Show the bucket policy
    Show { bucket: String },
}

#[derive(clap::Subcommand, Debug)]
enum LifecycleAction {
    /// Expire objects under a prefix after a number of days
    Set {
        bucket: String,
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value_t = s3pilot_core::policy::DEFAULT_EXPIRATION_DAYS)]
        days: i32,
    },
}

#[derive(clap::Subcommand, Debug)]
enum VersioningAction {
    /// Show whether versioning is enabled
    Status { bucket: String },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the current configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Validate the configuration and test the connection
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup error handling
    if let Err(e) = HookBuilder::default().install() {
        eprintln!("Warning: Failed to install error handler: {}", e);
    }

    // Load .env file if present
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    let config = load_config_or_default(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging);

    let ctx = handlers::Context::new(config, cli.config);

    // Execute command
    match cli.command {
        Commands::Buckets { action } => handlers::handle_buckets(&ctx, action).await,
        Commands::Files { action } => handlers::handle_files(&ctx, action).await,
        Commands::Policy { action } => handlers::handle_policy(&ctx, action).await,
        Commands::Lifecycle { action } => handlers::handle_lifecycle(&ctx, action).await,
        Commands::Versioning { action } => handlers::handle_versioning(&ctx, action).await,
        Commands::Config { action } => handlers::handle_config(&ctx, action).await,
        Commands::Completion { shell } => {
            handlers::handle_completion(&shell, &mut Cli::command()).await
        }
    }
}

/// RUST_LOG wins, then -v flags, then the configured level
fn init_logging(verbose: u8, logging: &LoggingConfig) {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("s3pilot={0},s3pilot_core={0},warn", level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if logging.format == "compact" {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
}
