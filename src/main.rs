use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use upspack_monitor::monitor::{AlertPolicy, CommandNotifier, Monitor, spawn_monitor_thread};
use upspack_monitor::ups::UpsController;
use upspack_monitor::{api, config, discovery};

fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(config.log_level());
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = config.app.name.as_str(),
        "upspack-monitor starting"
    );

    // Nothing to poll without a device, so discovery failure is fatal.
    let device = match config.serial_device() {
        Some(device) => device.to_string(),
        None => discovery::identify_serial_device()?,
    };
    let settings = config.serial_settings(device);
    let controller = Arc::new(UpsController::open(&settings, config.controller_options()?)?);

    let stop_flag = Arc::new(AtomicBool::new(false));
    let monitor = Monitor::new(
        Arc::clone(&controller),
        CommandNotifier::new(config.dry_run()),
        AlertPolicy::new(config.critical_level()),
    )
    .with_log_path(config.status_log_path().map(|path| path.to_path_buf()));
    let interval = config.monitor_interval();
    tracing::info!(
        interval_ms = interval.as_millis(),
        critical_level = config.critical_level(),
        "Starting monitor thread"
    );
    let monitor_handle = spawn_monitor_thread(monitor, interval, Arc::clone(&stop_flag));

    let app = api::router(Arc::clone(&controller));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;

    stop_flag.store(true, Ordering::Relaxed);
    if monitor_handle.join().is_err() {
        tracing::warn!("Monitor thread panicked");
    }
    controller.stop();

    Ok(())
}
