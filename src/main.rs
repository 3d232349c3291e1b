use clap::{Parser, Subcommand};
use fundry::config::AppConfig;
use fundry::error::Result;
use fundry::monitor::{EventMonitor, MonitorConfig};
use fundry::notify::WebhookNotifier;
use fundry::pipeline::DeploymentPipeline;
use fundry::protocol::job::{Job, JobPhase, Memo};
use fundry::protocol::{Deliverable, ProtocolAgent, ProtocolHandle};
use fundry::queue::JobQueue;
use fundry::tracker::{JsonFileStore, TransactionTracker};
use fundry::{QuickDeployClient, RpcChainClient};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fundry", about = "Seller-side fund deployment agent", version)]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config", env = "FUNDRY_CONFIG_DIR")]
    config_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent: queue worker, event monitor, stale-record sweeps
    Run,
    /// Execute one deployment directly, bypassing the protocol network
    Deploy {
        /// Buyer wallet address
        #[arg(long)]
        buyer: String,
        /// Name for the deployed agent
        #[arg(long)]
        agent_name: Option<String>,
        /// Wallet the fund trades for; defaults to the buyer
        #[arg(long)]
        ai_wallet: Option<String>,
        /// Referral code forwarded to the backend
        #[arg(long)]
        referral_code: Option<String>,
    },
    /// Print transaction record statistics
    Stats,
    /// Load and validate the configuration, then exit
    ValidateConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)
        .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;
    init_logging(&config);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config: {e}");
        }
        anyhow::bail!("invalid configuration ({} problems)", errors.len());
    }

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::Deploy {
            buyer,
            agent_name,
            ai_wallet,
            referral_code,
        } => deploy_once(config, buyer, agent_name, ai_wallet, referral_code).await?,
        Commands::Stats => stats(config).await?,
        Commands::ValidateConfig => {
            info!("configuration is valid");
        }
    }
    Ok(())
}

fn init_logging(config: &AppConfig) {
    let default = if config.logging.level.trim().is_empty() {
        "info".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

struct Wiring {
    agent: Arc<ProtocolAgent>,
    tracker: Arc<TransactionTracker>,
    queue: Arc<JobQueue<Job>>,
    monitor: Arc<EventMonitor>,
}

/// Build the component graph from configuration.
///
/// Everything downstream takes interfaces, so this is the only place that
/// knows the concrete chain, backend, and store types.
async fn wire(config: &AppConfig, handle: Arc<dyn ProtocolHandle>) -> Result<Wiring> {
    let chain = Arc::new(RpcChainClient::from_env(&config.chain)?);
    let backend = Arc::new(QuickDeployClient::new(&config.backend)?);

    let store = Arc::new(JsonFileStore::new(&config.tracker.store_path));
    let tracker = Arc::new(TransactionTracker::new(store, config.tracker.cache_size));
    tracker.load().await?;

    let pipeline = Arc::new(DeploymentPipeline::new(
        chain.clone(),
        backend,
        tracker.clone(),
        config.backend.deploy_source.clone(),
        config.agent.referral_code.clone(),
    ));

    let queue = Arc::new(JobQueue::new(config.queue.clone()));
    let monitor = Arc::new(EventMonitor::new(
        chain,
        tracker.clone(),
        MonitorConfig::default(),
    ));
    let notifier = WebhookNotifier::from_config(&config.notifications);

    let agent = ProtocolAgent::new(
        handle,
        pipeline,
        tracker.clone(),
        queue.clone(),
        notifier,
        config.agent.clone(),
    );

    Ok(Wiring {
        agent,
        tracker,
        queue,
        monitor,
    })
}

async fn run(config: AppConfig) -> Result<()> {
    info!("starting fundry agent");
    let stale_after = Duration::from_secs(config.tracker.stale_after_secs);
    let wiring = wire(&config, Arc::new(LoggingHandle)).await?;
    wiring.agent.start().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = wiring.monitor.clone();

    // The monitor has already folded each match into its record; this
    // consumer surfaces them in the logs
    if let Some(mut matches) = wiring.monitor.subscribe().await {
        tokio::spawn(async move {
            while let Some(matched) = matches.recv().await {
                info!(
                    "on-chain deployment observed: fund {} for {} (block {})",
                    matched.fund_address, matched.wallet, matched.block_number
                );
            }
        });
    }

    let monitor_task = tokio::spawn(async move { monitor.run(shutdown_rx).await });

    let tracker = wiring.tracker.clone();
    let (sweep_tx, mut sweep_rx) = watch::channel(false);
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(stale_after);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stale = tracker.mark_stale_for_retry(stale_after).await;
                    if !stale.is_empty() {
                        warn!("{} stale deployment records reset to pending", stale.len());
                    }
                }
                _ = sweep_rx.changed() => break,
            }
        }
    });

    shutdown_signal().await;
    info!("shutdown requested, draining in-flight work");

    // Stop accepting new jobs and let the current one finish
    wiring.queue.shutdown().await;
    let _ = shutdown_tx.send(true);
    let _ = sweep_tx.send(true);
    if let Err(e) = monitor_task.await {
        warn!("event monitor task ended abnormally: {e}");
    }
    let _ = sweep_task.await;

    wiring.tracker.flush().await?;
    info!("fundry agent stopped");
    Ok(())
}

async fn deploy_once(
    config: AppConfig,
    buyer: String,
    agent_name: Option<String>,
    ai_wallet: Option<String>,
    referral_code: Option<String>,
) -> Result<()> {
    let wiring = wire(&config, Arc::new(LoggingHandle)).await?;
    wiring.agent.start().await;

    let params = serde_json::json!({
        "serviceType": "deploy_fund",
        "agentName": agent_name,
        "aiWallet": ai_wallet,
        "referralCode": referral_code,
    });
    let job = Job {
        id: format!("cli-{}", uuid::Uuid::new_v4()),
        buyer,
        phase: JobPhase::Transaction,
        memos: vec![Memo {
            id: "cli".to_string(),
            next_phase: Some(JobPhase::Transaction),
            content: None,
        }],
        params,
    };

    let job_id = job.id.clone();
    wiring.agent.on_new_task(job).await?;
    wiring.queue.shutdown().await;

    match wiring.tracker.get_by_job(&job_id).await {
        Some(record) => info!(
            "deployment {}: fund {:?}, creation {:?}, payment {:?}",
            record.status,
            record.contract_address,
            record.contract_creation_tx_hash,
            record.payment_tx_hash
        ),
        None => warn!("no transaction record produced for {job_id}"),
    }
    wiring.tracker.flush().await?;
    Ok(())
}

async fn stats(config: AppConfig) -> Result<()> {
    let store = Arc::new(JsonFileStore::new(&config.tracker.store_path));
    let tracker = TransactionTracker::new(store, config.tracker.cache_size);
    tracker.load().await?;
    let stats = tracker.statistics().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Stand-in protocol connection: logs the actions a network handle would
/// send. The real network attaches by implementing `ProtocolHandle`.
struct LoggingHandle;

#[async_trait]
impl ProtocolHandle for LoggingHandle {
    async fn accept(&self, job_id: &str, memo_id: &str, reason: &str) -> Result<()> {
        info!("accept job {job_id} (memo {memo_id}): {reason}");
        Ok(())
    }

    async fn reject(&self, job_id: &str, memo_id: &str, reason: &str) -> Result<()> {
        info!("reject job {job_id} (memo {memo_id}): {reason}");
        Ok(())
    }

    async fn deliver(&self, job_id: &str, deliverable: &Deliverable) -> Result<()> {
        info!(
            "deliver job {job_id}: success={} contract={:?}",
            deliverable.success, deliverable.contract_address
        );
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
