//! Command-line surface
//!
//! A thin shell around [`Reconciler`]: it resolves configuration, opens the
//! file-backed platform, runs one operation, and prints the outcome as a
//! table or JSON.

mod format;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::LocalPlatform;
use crate::config::ReconcilerConfig;
use crate::reconciler::Reconciler;
use crate::types::{
    ArtifactReference, CapacitySpec, EndpointHealth, ReconciliationResult, SweepReport,
};
use crate::Error;

pub use format::{print_table, render_table};

/// Idempotent deploys and cleanup for managed inference endpoints
#[derive(Parser, Debug)]
#[command(name = "endpoint-reconciler", version, about, long_about = None)]
pub struct Cli {
    /// Platform state file
    #[arg(
        long,
        env = "RECONCILER_STATE",
        default_value = ".reconciler/state.json",
        global = true
    )]
    pub state: PathBuf,

    /// Reconciler configuration file (YAML)
    #[arg(long, env = "RECONCILER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Naming prefix for owned resources (overrides the config file)
    #[arg(long, global = true)]
    pub prefix: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Operation to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Operations
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Make an endpoint serve an artifact, cleaning up what it replaces
    Deploy(DeployArgs),

    /// Delete every resource owned by the naming prefix
    Sweep,

    /// Delete one endpoint and every config and model it owns
    Teardown {
        /// Logical endpoint identity
        #[arg(long, default_value = crate::DEFAULT_ENDPOINT_IDENTITY)]
        endpoint: String,
    },

    /// Show the endpoint's current state
    Status {
        /// Logical endpoint identity
        #[arg(long, default_value = crate::DEFAULT_ENDPOINT_IDENTITY)]
        endpoint: String,
    },

    /// Record a non-file artifact as uploaded in the local platform
    RegisterArtifact {
        /// Artifact URI, e.g. s3://bucket/models/model.tar.gz
        artifact: ArtifactReference,
    },
}

/// Deploy arguments
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Artifact URI (takes precedence over --bucket)
    #[arg(long)]
    pub artifact: Option<ArtifactReference>,

    /// Bucket holding models/model.tar.gz
    #[arg(long, env = "S3_BUCKET_NAME")]
    pub bucket: Option<String>,

    /// Logical endpoint identity
    #[arg(long, default_value = crate::DEFAULT_ENDPOINT_IDENTITY)]
    pub endpoint: String,

    /// Capacity: serverless[:CONCURRENCY[:MEMORY_MB]] or fixed:COUNT[:INSTANCE_TYPE]
    #[arg(long, default_value = "serverless")]
    pub capacity: CapacitySpec,

    /// Execution role bound to the model
    #[arg(long, env = "SAGEMAKER_ROLE_ARN")]
    pub role: Option<String>,

    /// Inference container image
    #[arg(long)]
    pub image: Option<String>,
}

impl DeployArgs {
    fn artifact(&self) -> Result<ArtifactReference, Error> {
        match (&self.artifact, &self.bucket) {
            (Some(artifact), _) => Ok(artifact.clone()),
            (None, Some(bucket)) => ArtifactReference::in_bucket(bucket),
            (None, None) => Err(Error::validation_for_field(
                "artifact",
                "pass --artifact or --bucket (or set S3_BUCKET_NAME)",
            )),
        }
    }
}

/// Output format
#[derive(Clone, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    /// Columnar table (default)
    #[default]
    Table,
    /// JSON
    Json,
}

/// Whether the command achieved what it was asked to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Done
    Success,
    /// The operation ran but its result is a failure
    Failed,
}

impl Outcome {
    fn from_success(ok: bool) -> Self {
        if ok {
            Self::Success
        } else {
            Self::Failed
        }
    }
}

/// Resolve configuration: file (or defaults), then flag overrides, then validation
pub fn load_config(cli: &Cli) -> Result<ReconcilerConfig, Error> {
    let mut config = match &cli.config {
        Some(path) => ReconcilerConfig::from_yaml_file(path)?,
        None => ReconcilerConfig::default(),
    };
    if let Some(prefix) = &cli.prefix {
        config.name_prefix = prefix.clone();
    }
    if let Commands::Deploy(args) = &cli.command {
        if let Some(role) = &args.role {
            config.container.execution_role = Some(role.clone());
        }
        if let Some(image) = &args.image {
            config.container.image = image.clone();
        }
    }
    config.validate()?;
    Ok(config)
}

/// Run the parsed command against the local platform
pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<Outcome, Error> {
    let config = load_config(&cli)?;
    let platform = Arc::new(LocalPlatform::open(&cli.state)?);
    debug!(state = %platform.path().display(), prefix = %config.name_prefix, "Platform opened");

    let reconciler = Reconciler::new(platform.clone(), config).with_cancellation(cancel);
    match &cli.command {
        Commands::RegisterArtifact { artifact } => {
            platform.register_artifact(artifact)?;
            println!("registered {artifact}");
            Ok(Outcome::Success)
        }
        Commands::Deploy(args) => {
            let result = reconciler
                .reconcile(&args.artifact()?, &args.endpoint, &args.capacity)
                .await?;
            emit(&cli.output, &result, print_result)?;
            Ok(Outcome::from_success(result.is_success()))
        }
        Commands::Sweep => {
            let prefix = reconciler.config().name_prefix.clone();
            let report = reconciler.sweep(&prefix).await?;
            emit(&cli.output, &report, print_report)?;
            Ok(Outcome::from_success(report.is_clean()))
        }
        Commands::Teardown { endpoint } => {
            let report = reconciler.teardown(endpoint).await?;
            emit(&cli.output, &report, print_report)?;
            Ok(Outcome::from_success(report.is_clean()))
        }
        Commands::Status { endpoint } => {
            let health = reconciler.status(endpoint).await?;
            emit(&cli.output, &health, print_health)?;
            Ok(Outcome::from_success(health.is_healthy()))
        }
    }
}

fn emit<T: Serialize>(output: &OutputFormat, value: &T, table: fn(&T)) -> Result<(), Error> {
    match output {
        OutputFormat::Table => table(value),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn print_result(result: &ReconciliationResult) {
    println!(
        "{} {} ({})",
        result.endpoint_name,
        result.final_status,
        result.config_name.as_deref().unwrap_or("no config")
    );
    let rows = resource_rows("created", &result.created_resources)
        .chain(resource_rows("deleted", &result.deleted_resources))
        .collect::<Vec<_>>();
    if !rows.is_empty() {
        print_table(&["ACTION", "KIND", "NAME"], &rows);
    }
    if let Some(error) = &result.error {
        println!("{}: {}", error.kind, error.message);
    }
}

fn print_report(report: &SweepReport) {
    let mut rows: Vec<Vec<String>> = resource_rows("deleted", &report.deleted).collect();
    rows.extend(report.errors.iter().map(|f| {
        vec![
            "failed".to_string(),
            f.resource.kind.to_string(),
            f.resource.name.clone(),
            f.error.message.clone(),
        ]
    }));
    if rows.is_empty() {
        println!("Nothing to delete.");
        return;
    }
    print_table(&["ACTION", "KIND", "NAME", "ERROR"], &rows);
}

fn print_health(health: &EndpointHealth) {
    let status = health
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "NotFound".to_string());
    let config = health.config_name.as_deref().unwrap_or("-");
    let rows: Vec<Vec<String>> = if health.variants.is_empty() {
        vec![vec![
            health.endpoint_name.clone(),
            status,
            config.to_string(),
            "-".to_string(),
            "-".to_string(),
        ]]
    } else {
        health
            .variants
            .iter()
            .map(|v| {
                vec![
                    health.endpoint_name.clone(),
                    status.clone(),
                    config.to_string(),
                    v.model_name.clone(),
                    v.capacity.to_string(),
                ]
            })
            .collect()
    };
    print_table(&["ENDPOINT", "STATUS", "CONFIG", "MODEL", "CAPACITY"], &rows);
    if let Some(reason) = &health.failure_reason {
        println!("last failure: {reason}");
    }
}

fn resource_rows<'a>(
    action: &'a str,
    resources: &'a [crate::types::ResourceId],
) -> impl Iterator<Item = Vec<String>> + 'a {
    resources
        .iter()
        .map(move |r| vec![action.to_string(), r.kind.to_string(), r.name.clone()])
}
