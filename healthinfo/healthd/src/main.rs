//! `healthd` daemon/CLI: serves health-info sessions over WebSocket, runs
//! one-shot captures, and decodes archived reports.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use healthinfo_core::subnet::DEFAULT_SUBNET_URL;
use healthinfo_core::{
    decode_archive, run_server, HealthInfoError, HealthInfoJob, HealthInfoRequest,
    HealthInfoResult, HttpClusterAdmin, ReportSink, SubnetClient, SubnetTokenConfig,
};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Caller recorded for captures started from the command line.
const CLI_CALLER: &str = "healthd-cli";

/// healthd command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Override log level (e.g. info, debug, trace).
    #[arg(long, env = "HEALTHD_LOG_LEVEL")]
    log_level: Option<String>,
    /// Cluster admin endpoint, e.g. http://127.0.0.1:9000.
    #[arg(long, env = "HEALTHD_CLUSTER_ENDPOINT", value_name = "URL")]
    cluster_endpoint: Option<String>,
    /// Bearer token presented to the cluster admin API.
    #[arg(long, env = "HEALTHD_CLUSTER_TOKEN", hide_env_values = true)]
    cluster_token: Option<String>,
    /// SUBNET base URL.
    #[arg(long, env = "HEALTHD_SUBNET_URL", default_value = DEFAULT_SUBNET_URL)]
    subnet_url: String,
    /// SUBNET API key; takes precedence over the cluster's configuration.
    #[arg(long, env = "HEALTHD_SUBNET_API_KEY", hide_env_values = true)]
    subnet_api_key: Option<String>,
    /// SUBNET license exchanged for an API key when no key is set.
    #[arg(long, env = "HEALTHD_SUBNET_LICENSE", hide_env_values = true)]
    subnet_license: Option<String>,
    /// Bind address for WebSocket sessions and /healthz.
    #[arg(long, env = "HEALTHD_LISTEN_ADDR", default_value = "127.0.0.1:9090")]
    listen_addr: SocketAddr,
    /// Subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Commands for healthd.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve health-info sessions.
    Serve,
    /// Run one capture and write the report.
    Collect {
        /// Deadline forwarded to the cluster, e.g. "2h" or "30m".
        #[arg(long, value_parser = healthinfo_core::parse_deadline)]
        deadline: Duration,
        /// Write the report here instead of stdout.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Decode the archive inside a saved report (or a bare encoded archive).
    Inspect {
        /// Report JSON or base64 archive.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = cli
        .log_level
        .as_deref()
        .map(|lvl| lvl.to_ascii_uppercase())
        .map(|lvl| match lvl.as_str() {
            "TRACE" => Level::TRACE,
            "DEBUG" => Level::DEBUG,
            "WARN" => Level::WARN,
            "ERROR" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or_else(|| match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        });
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Serve => serve(build_job(&cli)?, cli.listen_addr).await?,
        Commands::Collect { deadline, out } => {
            collect(build_job(&cli)?, *deadline, out.clone()).await?
        }
        Commands::Inspect { file } => inspect(file).await?,
    }
    Ok(())
}

fn build_job(cli: &Cli) -> anyhow::Result<HealthInfoJob> {
    let endpoint = cli
        .cluster_endpoint
        .as_deref()
        .context("--cluster-endpoint (or HEALTHD_CLUSTER_ENDPOINT) is required")?;
    let admin = HttpClusterAdmin::new(endpoint, cli.cluster_token.clone())?;
    let subnet = SubnetClient::new(&cli.subnet_url)?;
    let overrides = SubnetTokenConfig {
        api_key: cli.subnet_api_key.clone(),
        license: cli.subnet_license.clone(),
        proxy: None,
    };
    Ok(HealthInfoJob::new(Arc::new(admin), subnet).with_subnet_overrides(overrides))
}

async fn serve(job: HealthInfoJob, addr: SocketAddr) -> anyhow::Result<()> {
    info!(%addr, "starting healthd");
    tokio::select! {
        result = run_server(Arc::new(job), addr) => {
            result.with_context(|| format!("serving health info sessions on {addr}"))?
        }
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }
    Ok(())
}

/// Writes the report to a file, or to stdout followed by a newline.
struct OutputSink {
    out: Option<PathBuf>,
}

#[async_trait]
impl ReportSink for OutputSink {
    async fn deliver(&mut self, message: String) -> HealthInfoResult<()> {
        let written = match &self.out {
            Some(path) => tokio::fs::write(path, message.as_bytes()).await,
            None => write_stdout(&message).await,
        };
        written.map_err(|err| HealthInfoError::Delivery(err.to_string()))
    }
}

async fn write_stdout(message: &str) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(message.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn collect(
    job: HealthInfoJob,
    deadline: Duration,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let request = HealthInfoRequest::new(Some(deadline), CLI_CALLER);
    let mut sink = OutputSink { out: out.clone() };
    tokio::select! {
        result = job.run(&request, &mut sink) => result.context("health info collection failed")?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!(HealthInfoError::Cancelled),
    }
    if let Some(path) = out {
        info!(path = %path.display(), "health report written");
    }
    Ok(())
}

async fn inspect(file: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let encoded = match serde_json::from_str::<Value>(&raw) {
        Ok(report) => report
            .get("encoded")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("report has no \"encoded\" field")?,
        Err(_) => raw.trim().to_string(),
    };
    let (version, document) = decode_archive(&encoded)
        .with_context(|| format!("decoding archive in {}", file.display()))?;
    let decoded = json!({ "version": version, "document": document });
    println!("{}", serde_json::to_string_pretty(&decoded)?);
    Ok(())
}
