use anyhow::{Context, Result};
use apr_review_agent::{
    agents::{run_until_shutdown, AprOrchestrator, ChatSession, CleanupSummary, RunEnd},
    config::Config,
    llm::AzureAgentsClient,
    reports::ReportGenerator,
    tools::{HttpToolHandler, ToolHandler, UnconfiguredToolHandler},
};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "apr-agent")]
#[command(about = "Multi-agent APR metric review with an interactive coordinator")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "APR_AGENT_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the coordinator (default)
    Chat,

    /// Run one full analysis and exit
    Analyze {
        /// APR number to analyze
        #[arg(short, long)]
        request_id: String,

        /// Output format (json, markdown, text)
        #[arg(short, long, default_value = "text")]
        output: String,

        /// Output file path (defaults to stdout)
        #[arg(short = 'f', long)]
        output_file: Option<PathBuf>,
    },

    /// Initialize configuration file
    Init {
        /// Configuration file path
        #[arg(short, long, default_value = "apr-agent.yml")]
        config_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level)?;

    if let Some(addr) = cli.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let command = match cli.command.unwrap_or(Commands::Chat) {
        Commands::Init { config_file } => return init_config(config_file).await,
        other => other,
    };

    let config = match load_config(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            println!("❌ Error: {:#}", e);
            return Ok(());
        }
    };

    let mut orchestrator = match build_orchestrator(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            println!("❌ Error: {:#}", e);
            return Ok(());
        }
    };

    // Agents exist from the first create call on, so an interrupt anywhere
    // past this point must still fall through to cleanup.
    let outcome = run_until_shutdown(
        run_command(&mut orchestrator, &config, command),
        tokio::signal::ctrl_c(),
    )
    .await;

    if let Ok(RunEnd::Interrupted) = outcome {
        println!("\n👋 Goodbye!");
    }

    let summary = cleanup(&mut orchestrator).await;
    if !summary.is_clean() {
        warn!("{} agents could not be deleted", summary.failed.len());
    }

    if let Err(e) = outcome {
        error!("{:#}", e);
        println!("❌ Error: {:#}", e);
    }

    Ok(())
}

/// Initialize tracing with the specified log level
fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to create env filter")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}

/// Load and validate configuration; any failure here is fatal before agents exist
async fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = Config::load(path).await?;
    config.validate()?;
    Ok(config)
}

fn build_orchestrator(config: &Config) -> Result<AprOrchestrator> {
    let tools: Arc<dyn ToolHandler> = match &config.tools.data_service_url {
        Some(url) => {
            info!("Tool calls go to data service at {}", url);
            Arc::new(HttpToolHandler::new(
                url.clone(),
                Duration::from_secs(config.tools.request_timeout_seconds),
            )?)
        }
        None => {
            warn!("APR_DATA_SERVICE_URL is not set; agent tool calls will report errors");
            Arc::new(UnconfiguredToolHandler)
        }
    };

    let client = AzureAgentsClient::new(
        &config.backend,
        config.orchestration.poll_interval(),
        tools,
    )?;

    Ok(AprOrchestrator::new(
        Arc::new(client),
        config.orchestration.clone(),
    ))
}

async fn run_command(
    orchestrator: &mut AprOrchestrator,
    config: &Config,
    command: Commands,
) -> Result<()> {
    orchestrator
        .create_agents(config.model_deployment_name()?)
        .await?;

    match command {
        Commands::Analyze {
            request_id,
            output,
            output_file,
        } => analyze(orchestrator, &request_id, &output, output_file.as_ref()).await,
        _ => chat(orchestrator).await,
    }
}

async fn chat(orchestrator: &AprOrchestrator) -> Result<()> {
    let mut session = ChatSession::new(
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );

    session.run(orchestrator).await
}

async fn analyze(
    orchestrator: &AprOrchestrator,
    request_id: &str,
    format: &str,
    output_file: Option<&PathBuf>,
) -> Result<()> {
    let report = orchestrator.analyze_request(request_id).await;
    let content = ReportGenerator::new().generate(&report, format)?;

    if let Some(file_path) = output_file {
        tokio::fs::write(file_path, &content)
            .await
            .with_context(|| format!("Failed to write output to: {:?}", file_path))?;
        info!("Report written to: {:?}", file_path);
    } else {
        println!("{}", content);
    }

    info!("🎉 APR {} analysis complete!", request_id);
    Ok(())
}

async fn cleanup(orchestrator: &mut AprOrchestrator) -> CleanupSummary {
    println!("\n🧹 Cleaning up agents...");
    let summary = orchestrator.cleanup().await;

    for kind in &summary.deleted {
        println!("✅ Deleted {} agent", kind);
    }
    for (kind, reason) in &summary.failed {
        println!("⚠️ Error deleting {} agent: {}", kind, reason);
    }

    println!("🎉 Cleanup completed");
    summary
}

/// Initialize configuration file
async fn init_config(config_file: PathBuf) -> Result<()> {
    info!("Initializing configuration file: {:?}", config_file);

    if config_file.exists() {
        warn!("Configuration file already exists: {:?}", config_file);
        println!("Configuration file already exists: {:?}", config_file);
        return Ok(());
    }

    Config::default()
        .save_to_file(&config_file)
        .await
        .with_context(|| format!("Failed to write configuration file: {:?}", config_file))?;

    info!("Configuration file created successfully: {:?}", config_file);
    println!("Configuration file created: {:?}", config_file);
    println!("Set AZURE_EXISTING_AIPROJECT_ENDPOINT and MODEL_DEPLOYMENT_NAME, or edit this file.");

    Ok(())
}
