use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use humantime_serde::re::humantime;
use tracing::{error, info, warn};

use lifeline_core::error::LifelineResult;
use lifeline_core::notification::TracingSink;
use lifeline_core::observability::init_tracing_with;
use lifeline_core::patterns::{retry, RetryConfig};
use lifeline_core::service::{
    CommandBootstrap, HttpLivenessProbe, LivenessProbe, ServiceRecovery, SERVICE_RECOVERY,
};
use lifeline_core::startup::StartupPhase;
use lifeline_core::{AppContext, LifelineConfig};

/// Breaker guarding calls into the local service
const SERVICE_BREAKER: &str = "service";

#[derive(Parser)]
#[command(name = "lifeline")]
#[command(about = "Keeps a local background service reachable", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Watch the service and restart it when it stops answering (until Ctrl-C)
    Watch {
        /// Override the check interval, e.g. "5s" or "1m30s"
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },
    /// Check once whether the service answers, with retries
    Probe,
    /// Run a recovery strategy immediately
    Trigger {
        /// Strategy name
        #[arg(default_value = SERVICE_RECOVERY)]
        strategy: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> LifelineResult<ExitCode> {
    let cli = Cli::parse();

    init_tracing_with(if cli.verbose {
        "lifeline_core=debug,lifeline=debug"
    } else {
        "lifeline_core=info,lifeline=info"
    });

    let config = LifelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch { interval } => {
            watch(with_interval(config, interval)?).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Probe => {
            let ctx = AppContext::new(config, Arc::new(TracingSink));
            Ok(if probe_once(&ctx).await {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Trigger { strategy } => {
            let ctx = AppContext::new(config, Arc::new(TracingSink));
            ctx.gate().set_phase(StartupPhase::Ready);
            let bootstrap = register_service_recovery(&ctx)?;

            let recovered = ctx.recovery().trigger_recovery(&strategy).await;
            ctx.shutdown().await;
            if recovered {
                println!("Recovery '{}' succeeded", strategy);
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("Recovery '{}' did not succeed", strategy);
                bootstrap.shutdown().await?;
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn watch(config: LifelineConfig) -> LifelineResult<()> {
    let ctx = AppContext::new(config, Arc::new(TracingSink));
    let bootstrap = register_service_recovery(&ctx)?;

    ctx.gate().set_phase(StartupPhase::Connecting);
    match probe_with_retry(&ctx).await {
        Ok(()) => ctx.gate().set_connection_established(true),
        Err(e) => {
            warn!("Service not reachable at startup: {}", e);
            if !ctx.recovery().trigger_recovery(SERVICE_RECOVERY).await {
                warn!("Initial recovery failed; monitoring will keep trying");
            }
        }
    }

    ctx.start();
    info!(
        "Watching {} every {:?}",
        ctx.config().service.ping_url,
        ctx.config().recovery.monitor_interval
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    ctx.shutdown().await;
    bootstrap.shutdown().await?;
    Ok(())
}

/// One-shot `probe` command; the context is shut down before returning
async fn probe_once(ctx: &AppContext) -> bool {
    let result = probe_with_retry(ctx).await;
    ctx.shutdown().await;
    match result {
        Ok(()) => {
            println!("Service at {} is up", ctx.config().service.ping_url);
            true
        }
        Err(e) => {
            eprintln!("Service is down: {}", e.user_message());
            error!("Probe failed: {}", e);
            false
        }
    }
}

fn register_service_recovery(ctx: &AppContext) -> LifelineResult<Arc<CommandBootstrap>> {
    let probe = Arc::new(HttpLivenessProbe::from_settings(&ctx.config().service));
    let bootstrap = Arc::new(CommandBootstrap::from_settings(&ctx.config().service)?);

    let strategy = ServiceRecovery::new(probe, bootstrap.clone())
        .with_config(ctx.config())
        .with_breaker(ctx.breaker(SERVICE_BREAKER))
        .with_gate(ctx.gate().clone())
        .with_clock(ctx.clock());
    ctx.recovery().register(Arc::new(strategy));

    Ok(bootstrap)
}

async fn probe_with_retry(ctx: &AppContext) -> LifelineResult<()> {
    let probe = Arc::new(HttpLivenessProbe::from_settings(&ctx.config().service));
    let breaker = ctx.breaker(SERVICE_BREAKER);
    let timeout = ctx.config().service.probe_timeout;
    let config = RetryConfig::from(&ctx.config().retry).with_operation_name("liveness probe");

    retry(config, || {
        let probe = probe.clone();
        let breaker = breaker.clone();
        async move { breaker.execute(|| probe.probe(timeout)).await }
    })
    .await
}

/// Apply a `--interval` override and re-check the result
fn with_interval(
    mut config: LifelineConfig,
    interval: Option<Duration>,
) -> LifelineResult<LifelineConfig> {
    if let Some(interval) = interval {
        config.recovery.monitor_interval = interval;
        config.validate()?;
    }
    Ok(config)
}
