//! # fsindex CLI
//!
//! Keeps a Meilisearch index in sync with a directory tree and enriches the
//! indexed documents with extracted text and transcripts.
//!
//! ## Commands
//!
//! - `fsindex run` - Reconcile, watch for changes and run enrichment until Ctrl+C
//! - `fsindex reconcile` - One reconciliation pass
//! - `fsindex enrich [--module NAME]` - One enrichment cycle
//! - `fsindex watch` - Apply file changes to the index until Ctrl+C
//! - `fsindex status` - Document count and pending work per module
//!
//! ## Examples
//!
//! ```bash
//! # Run the full service against /srv/files
//! DIRECTORY_TO_INDEX=/srv/files fsindex run
//!
//! # One pass, JSON summary
//! fsindex --format json reconcile
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fsindex_core::{EnrichmentModule, IndexBackend, PathMapper};
use fsindex_modules::{ModuleKind, ModuleRegistry};
use fsindex_store::{GatewayConfig, IndexGateway, MeiliBackend, MeiliConfig};
use fsindex_sync::{
    DocumentBuilder, EnrichmentScheduler, LiveWatcher, LiveWatcherConfig, ModuleCycleReport,
    ReconcileReport, Reconciler, ScanFilter, SniffingMimeDetector,
};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "fsindex")]
#[command(about = "Keep a Meilisearch index in sync with a directory tree")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.config/fsindex/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile, then watch and enrich until Ctrl+C
    Run,

    /// Bring the index in line with the directory tree once
    Reconcile,

    /// Run one enrichment cycle
    Enrich {
        /// Only run this module
        #[arg(short, long)]
        module: Option<String>,
    },

    /// Apply file changes to the index until Ctrl+C
    Watch,

    /// Show index status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Print sample configuration file
    Init,
    /// Show config file path
    Path,
}

/// Output structure for a reconciliation pass.
#[derive(Serialize)]
struct ReconcileOutput {
    root: String,
    existing: usize,
    scanned: usize,
    added: usize,
    refreshed: usize,
    unchanged: usize,
    deleted: usize,
    failed: usize,
    document_count: u64,
    elapsed_secs: f64,
}

impl ReconcileOutput {
    fn new(root: &std::path::Path, report: &ReconcileReport) -> Self {
        Self {
            root: root.to_string_lossy().to_string(),
            existing: report.existing,
            scanned: report.scanned,
            added: report.added,
            refreshed: report.refreshed,
            unchanged: report.unchanged,
            deleted: report.deleted,
            failed: report.failed,
            document_count: report.document_count,
            elapsed_secs: report.elapsed.as_secs_f64(),
        }
    }
}

/// Output structure for one module's enrichment cycle.
#[derive(Serialize)]
struct CycleOutput {
    module: String,
    status: String,
    pending: usize,
    success: u64,
    failure: u64,
    not_found: u64,
    postponed: u64,
    elapsed_secs: f64,
}

impl From<&ModuleCycleReport> for CycleOutput {
    fn from(report: &ModuleCycleReport) -> Self {
        Self {
            module: report.module.clone(),
            status: format!("{:?}", report.status),
            pending: report.pending,
            success: report.counts.success,
            failure: report.counts.failure,
            not_found: report.counts.not_found,
            postponed: report.counts.postponed,
            elapsed_secs: report.elapsed.as_secs_f64(),
        }
    }
}

/// Output structure for status.
#[derive(Serialize)]
struct StatusOutput {
    root: String,
    index: String,
    documents: u64,
    modules: Vec<ModuleStatus>,
}

#[derive(Serialize)]
struct ModuleStatus {
    name: String,
    version: u64,
    pending: usize,
}

/// Everything the index-facing commands share.
struct Services {
    config: Config,
    root: PathBuf,
    mapper: Arc<PathMapper>,
    gateway: Arc<IndexGateway>,
    registry: ModuleRegistry,
}

impl Services {
    /// Connect to the backend, build the modules and initialize the index.
    ///
    /// Fails when the index cannot be created or configured.
    async fn start(config: Config) -> Result<Self> {
        let root = config
            .index
            .root
            .canonicalize()
            .with_context(|| format!("Directory does not exist: {}", config.index.root.display()))?;
        if !root.is_dir() {
            bail!("Not a directory: {}", root.display());
        }

        let mut registry = ModuleRegistry::new();
        for kind in ModuleKind::ALL {
            if let Some(settings) = config.module_settings(kind) {
                registry
                    .register_kind(kind, &settings)
                    .with_context(|| format!("Failed to build module {kind}"))?;
            }
        }

        let mapper = Arc::new(PathMapper::new(&root, &config.index.domain));
        let gateway = Arc::new(IndexGateway::new(
            connect_backend(&config)?,
            Arc::clone(&mapper),
            gateway_config(&config),
        ));

        info!(
            "Initializing index {} at {}",
            config.backend.index_name, config.backend.host
        );
        gateway
            .init(registry.modules())
            .await
            .context("Failed to initialize the index")?;

        Ok(Self {
            config,
            root,
            mapper,
            gateway,
            registry,
        })
    }

    fn modules(&self) -> Vec<Arc<dyn EnrichmentModule>> {
        self.registry.modules().to_vec()
    }

    fn scan_filter(&self) -> Result<ScanFilter> {
        ScanFilter::new(&self.root, &self.config.index.exclude)
            .context("Invalid exclude pattern")
    }

    fn document_builder(&self) -> DocumentBuilder {
        DocumentBuilder::new(
            Arc::clone(&self.mapper),
            self.modules(),
            Arc::new(SniffingMimeDetector::new()),
        )
    }

    async fn reconcile(&self) -> Result<ReconcileReport> {
        let reconciler = Reconciler::new(
            Arc::clone(&self.gateway),
            self.document_builder(),
            self.scan_filter()?,
            self.config.scan.workers,
        );
        reconciler.reconcile().await.context("Reconciliation failed")
    }

    fn scheduler(&self, modules: Vec<Arc<dyn EnrichmentModule>>) -> EnrichmentScheduler {
        EnrichmentScheduler::new(
            Arc::clone(&self.gateway),
            modules,
            Duration::from_secs(self.config.schedule.time_per_module_secs),
        )
    }

    /// Start the live watcher on its own thread with its own connection.
    fn spawn_watcher(&self) -> Result<LiveWatcher> {
        let config = self.config.clone();
        LiveWatcher::spawn(
            LiveWatcherConfig {
                debounce: Duration::from_millis(self.config.watcher.debounce_ms),
                gateway: gateway_config(&self.config),
                ..Default::default()
            },
            self.document_builder(),
            self.scan_filter()?,
            move || {
                let backend = MeiliBackend::new(meili_config(&config))?;
                Ok(Arc::new(backend) as Arc<dyn IndexBackend>)
            },
        )
        .context("Failed to start the live watcher")
    }
}

fn meili_config(config: &Config) -> MeiliConfig {
    MeiliConfig {
        host: config.backend.host.clone(),
        api_key: config.backend.api_key.clone(),
        index_name: config.backend.index_name.clone(),
        request_timeout: Duration::from_secs(config.backend.request_timeout_secs),
    }
}

fn connect_backend(config: &Config) -> Result<Arc<dyn IndexBackend>> {
    let backend =
        MeiliBackend::new(meili_config(config)).context("Failed to create Meilisearch client")?;
    Ok(Arc::new(backend))
}

fn gateway_config(config: &Config) -> GatewayConfig {
    GatewayConfig {
        batch_size: config.backend.batch_size,
        poll_interval: Duration::from_millis(config.backend.task_poll_interval_ms),
        max_task_wait: Duration::from_secs(config.backend.task_timeout_secs),
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level; `--verbose` forces
/// debug.
fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {e}"))
}

/// A token cancelled on the first Ctrl+C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
        trigger.cancel();
    });
    token
}

async fn stop_watcher(watcher: LiveWatcher) {
    if tokio::task::spawn_blocking(move || watcher.stop()).await.is_err() {
        warn!("Live watcher did not stop cleanly");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_reconcile(format: OutputFormat, root: &std::path::Path, report: &ReconcileReport) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&ReconcileOutput::new(root, report)),
        OutputFormat::Text => {
            println!("Reconciled {}", root.display());
            println!("  Scanned:   {}", report.scanned);
            println!("  Added:     {}", report.added);
            println!("  Refreshed: {}", report.refreshed);
            println!("  Unchanged: {}", report.unchanged);
            println!("  Deleted:   {}", report.deleted);
            if report.failed > 0 {
                println!("  Failed:    {}", report.failed);
            }
            println!("  Documents: {}", report.document_count);
            Ok(())
        }
    }
}

fn print_cycle(format: OutputFormat, reports: &[ModuleCycleReport]) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output: Vec<CycleOutput> = reports.iter().map(CycleOutput::from).collect();
            print_json(&output)
        }
        OutputFormat::Text => {
            if reports.is_empty() {
                println!("No modules enabled.");
            }
            for report in reports {
                println!(
                    "{}: {:?}, {} pending, {} ({:.1}s)",
                    report.module,
                    report.status,
                    report.pending,
                    report.counts,
                    report.elapsed.as_secs_f64()
                );
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(cli.config.clone()).context("Failed to load config")?;

    if let Commands::Config { action } = &cli.command {
        return match action {
            ConfigAction::Show => match cli.format {
                OutputFormat::Json => print_json(&config),
                OutputFormat::Text => {
                    println!(
                        "{}",
                        toml::to_string_pretty(&config).context("Failed to serialize config")?
                    );
                    Ok(())
                }
            },
            ConfigAction::Init => {
                println!("{}", Config::sample_toml());
                Ok(())
            }
            ConfigAction::Path => {
                match cli.config.clone().or_else(Config::config_path) {
                    Some(path) => println!("{}", path.display()),
                    None => println!("Could not determine config directory"),
                }
                Ok(())
            }
        };
    }

    init_logging(&config, cli.verbose)?;
    let services = Services::start(config).await?;

    match cli.command {
        Commands::Run => {
            let shutdown = shutdown_on_ctrl_c();

            let report = services.reconcile().await?;
            print_reconcile(cli.format, &services.root, &report)?;

            let watcher = if services.config.watcher.enabled {
                Some(services.spawn_watcher()?)
            } else {
                info!("Live watcher disabled");
                None
            };

            let scheduler = services.scheduler(services.modules());
            scheduler
                .run_forever(
                    Duration::from_secs(services.config.schedule.sleep_between_cycles_secs),
                    shutdown,
                )
                .await;

            if let Some(watcher) = watcher {
                stop_watcher(watcher).await;
            }
        }

        Commands::Reconcile => {
            let report = services.reconcile().await?;
            print_reconcile(cli.format, &services.root, &report)?;
        }

        Commands::Enrich { module } => {
            let modules = match module {
                Some(name) => {
                    let module = services.registry.get(&name).with_context(|| {
                        format!("Unknown or disabled module: {name}")
                    })?;
                    vec![module]
                }
                None => services.modules(),
            };
            let reports = services.scheduler(modules).run_cycle().await;
            print_cycle(cli.format, &reports)?;
        }

        Commands::Watch => {
            let shutdown = shutdown_on_ctrl_c();
            let watcher = services.spawn_watcher()?;
            info!("Watching for changes. Press Ctrl+C to stop.");
            shutdown.cancelled().await;
            stop_watcher(watcher).await;
        }

        Commands::Status => {
            let documents = services
                .gateway
                .get_document_count()
                .await
                .context("Failed to count documents")?;
            let mut modules = Vec::with_capacity(services.registry.len());
            for module in services.registry.modules() {
                let pending = services
                    .gateway
                    .get_pending_jobs(module.as_ref())
                    .await
                    .with_context(|| format!("Failed to query pending jobs for {}", module.name()))?
                    .len();
                modules.push(ModuleStatus {
                    name: module.name().to_string(),
                    version: module.version(),
                    pending,
                });
            }

            let output = StatusOutput {
                root: services.root.to_string_lossy().to_string(),
                index: services.config.backend.index_name.clone(),
                documents,
                modules,
            };
            match cli.format {
                OutputFormat::Json => print_json(&output)?,
                OutputFormat::Text => {
                    println!("Index Status for {}", output.root);
                    println!("  Index:     {}", output.index);
                    println!("  Documents: {}", output.documents);
                    for module in &output.modules {
                        println!(
                            "  {} (v{}): {} pending",
                            module.name, module.version, module.pending
                        );
                    }
                }
            }
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}
