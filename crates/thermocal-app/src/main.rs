//! Thermocal binary - composition root.
//!
//! 1. Parse the command line and load the TOML config
//! 2. Open the SQLite cache
//! 3. Build the calendar, device and notifier clients
//! 4. Run the requested command

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use thermocal_action::{ActionExecutor, ActionOutcome};
use thermocal_calendar::{GoogleCalendarSource, Reconciler};
use thermocal_core::config::resolve_path;
use thermocal_core::types::Action;
use thermocal_core::{Clock, SystemClock, ThermocalConfig, TokenProvider};
use thermocal_device::{DeviceClient, FileTokenProvider, ReqwestTransport, SdmGateway};
use thermocal_storage::{ActionRecordRepository, Database, DeviceRepository};

use thermocal_app::cli::{CliArgs, Command, ShowTarget};
use thermocal_app::service::ServiceLoop;
use thermocal_app::{build_notifier, show};

type BoxError = Box<dyn std::error::Error>;

/// Everything a command needs, built once from the config.
struct Components {
    db: Arc<Database>,
    records: ActionRecordRepository,
    gateway: Arc<SdmGateway>,
    tokens: Arc<dyn TokenProvider>,
    clock: Arc<dyn Clock>,
}

fn build_components(config: &ThermocalConfig) -> Result<Components, BoxError> {
    let data_dir = resolve_path(&config.general.data_dir);
    let db_path = data_dir.join("thermocal.db");
    let db = Arc::new(Database::new(&db_path)?);
    info!(path = %db_path.display(), "SQLite database opened");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tokens: Arc<dyn TokenProvider> = Arc::new(FileTokenProvider::new(resolve_path(
        &config.general.token_file,
    )));
    let client = DeviceClient::new(
        &config.device,
        Arc::new(ReqwestTransport::new()?),
        Arc::clone(&tokens),
        Arc::clone(&clock),
    );
    let gateway = Arc::new(SdmGateway::new(
        client,
        DeviceRepository::new(Arc::clone(&db)),
        Arc::clone(&clock),
    ));

    Ok(Components {
        records: ActionRecordRepository::new(Arc::clone(&db)),
        db,
        gateway,
        tokens,
        clock,
    })
}

async fn run_service(
    args: &CliArgs,
    config: &ThermocalConfig,
    mode: thermocal_app::ServiceMode,
    once: bool,
) -> Result<(), BoxError> {
    let parts = build_components(config)?;

    let source = Arc::new(GoogleCalendarSource::new(
        &config.calendar,
        Arc::clone(&parts.tokens),
    ));
    let reconciler = Reconciler::new(
        &config.calendar,
        source,
        ActionRecordRepository::new(Arc::clone(&parts.db)),
    )?;
    let executor = ActionExecutor::new(
        config,
        parts.gateway,
        parts.records,
        Arc::clone(&parts.clock),
    )?;

    let poll = Duration::from_secs(args.resolve_poll(config.service.poll_minutes) * 60);
    let service = ServiceLoop::new(
        mode,
        reconciler,
        executor,
        build_notifier(config),
        parts.clock,
        poll,
    );

    let shutdown = service.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current cycle");
            shutdown.notify_one();
        }
    });

    service.run(once).await;
    Ok(())
}

async fn run_show(target: ShowTarget, config: &ThermocalConfig) -> Result<(), BoxError> {
    if target == ShowTarget::Config {
        println!("{}", config.describe());
        return Ok(());
    }

    let parts = build_components(config)?;
    let tz = config.calendar.timezone()?;
    match target {
        ShowTarget::Cache => {
            println!("{}", show::format_records(&parts.records.list_all()?, tz));
        }
        ShowTarget::Events => {
            let since = parts.clock.now()
                - chrono::Duration::days(i64::from(config.calendar.lookback_days));
            println!("{}", show::format_records(&parts.records.list_since(since)?, tz));
        }
        ShowTarget::Devices => {
            let (structures, thermostats) = parts.gateway.refresh_topology().await?;
            for structure in &structures {
                let members: Vec<_> = thermostats
                    .iter()
                    .filter(|t| t.structure_ref == structure.name)
                    .cloned()
                    .collect();
                println!("[{}]", structure.label);
                println!("{}", show::format_thermostats(&members));
            }
        }
        ShowTarget::Config => {}
    }
    Ok(())
}

async fn run_set(action: Action, config: &ThermocalConfig) -> Result<(), BoxError> {
    let parts = build_components(config)?;
    let executor = ActionExecutor::new(config, parts.gateway, parts.records, parts.clock)?;

    match executor.execute_action(action).await? {
        ActionOutcome::NoChange => println!("{}: no change needed", action),
        ActionOutcome::Applied(n) => println!("{}: {} command(s) applied and verified", action, n),
    }
    Ok(())
}

fn run_init(path: &Path) -> Result<(), BoxError> {
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    ThermocalConfig::default().save(path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = CliArgs::parse();
    let config_file = args.resolve_config_path();
    let loaded = if args.command == Command::Init {
        Ok(ThermocalConfig::default())
    } else {
        ThermocalConfig::load(&config_file)
    };

    let config_level = loaded
        .as_ref()
        .map(|c| c.general.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(args.resolve_log_level(&config_level))
                }),
        )
        .init();

    info!("Starting thermocal v{}", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %config_file.display(), error = %e, "Configuration could not be loaded");
            return Err(e.into());
        }
    };

    match &args.command {
        Command::Service { mode, once, .. } => {
            run_service(&args, &config, *mode, *once).await?
        }
        Command::Show { target } => run_show(*target, &config).await?,
        Command::Set { action } => run_set(*action, &config).await?,
        Command::Init => run_init(&config_file)?,
    }
    Ok(())
}
