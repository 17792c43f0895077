use color_eyre::{eyre::eyre, Result};
use envmonitor::config::EnvMonitorConfig;
use envmonitor::monitor::MonitorHandle;
use envmonitor::ui::run_console;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = load_config().await?;
    info!(
        "Broker {} ({:?}), {} publishers",
        config.broker.url,
        config.broker.transport,
        config.publishers.len()
    );

    let monitor = config
        .build_monitor()
        .map_err(|e| eyre!("Failed to set up monitor: {}", e))?;
    let (handle, monitor_task) = MonitorHandle::spawn(monitor);

    let console_result = run_console(handle, config.monitor.auto_connect).await;

    // All handles are gone once the console returns, the actor winds down
    if let Err(e) = monitor_task.await {
        error!("Monitor task ended abnormally: {}", e);
    }
    info!("Bye");
    console_result
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

async fn load_config() -> Result<EnvMonitorConfig> {
    match EnvMonitorConfig::default_path() {
        Some(path) => {
            info!("Using config {}", path.display());
            Ok(EnvMonitorConfig::load_or_create(&path).await?)
        }
        None => {
            info!("No config directory available, running with defaults");
            Ok(EnvMonitorConfig::default())
        }
    }
}
