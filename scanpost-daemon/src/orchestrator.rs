//! Daemon orchestration -- assembly and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `scanpost-daemon`.
//! It loads configuration, builds the device registry from the
//! configured `[[device]]` sections, starts the eSCL server, runs the
//! background registry sweeper, and manages graceful shutdown.
//!
//! # Startup Order
//!
//! 1. Metrics recorder (when enabled)
//! 2. Device registry (one virtual device per `[[device]]` section)
//! 3. eSCL server (one listener per device, per security policy)
//! 4. Background sweeper (terminal-job retention, idle-job cancel)
//!
//! # Shutdown Order
//!
//! 1. Background sweeper
//! 2. eSCL server (cancels active jobs with a bounded wait)

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;

use scanpost_core::config::ScanpostConfig;
use scanpost_core::metrics as m;
use scanpost_core::registry::DeviceRegistry;
use scanpost_escl_server::{EsclServer, EsclServerConfig};
use scanpost_page_pipeline::PipelineConfig;

use crate::metrics_server;
use crate::virtual_device;

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: ScanpostConfig,
    /// Device registry shared with the server.
    registry: Arc<DeviceRegistry>,
    /// The eSCL protocol server.
    server: Arc<EsclServer>,
    /// Shutdown broadcast sender (signals all background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or parsed
    /// - Configuration validation fails
    /// - A device cannot be registered (duplicate name)
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = ScanpostConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// Useful for testing or when config has already been loaded.
    pub async fn build_from_config(config: ScanpostConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before anything records metrics
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let registry = Arc::new(DeviceRegistry::new(
            Duration::from_secs(config.registry.job_retention_secs),
            Duration::from_secs(config.registry.job_idle_timeout_secs),
        ));

        let pipeline_config = PipelineConfig::from_core(&config.pipeline);
        for section in &config.devices {
            tracing::info!(device = %section.name, source_dir = %section.source_dir, "registering device");
            let device = virtual_device::device_from_section(section, &pipeline_config);
            registry
                .add_device(device)
                .map_err(|e| anyhow::anyhow!("failed to register device: {}", e))?;
        }

        let server_config = EsclServerConfig::from_core(&config.server)
            .map_err(|e| anyhow::anyhow!("invalid server config: {}", e))?;
        let server = Arc::new(EsclServer::new(Arc::clone(&registry), server_config));

        let (shutdown_tx, _) = broadcast::channel(16);

        if config.metrics.enabled {
            record_daemon_metrics();
        }

        tracing::info!(devices = config.devices.len(), "orchestrator initialized");
        Ok(Self {
            config,
            registry,
            server,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start the server and block until a shutdown signal is received.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&mut self) -> Result<()> {
        // Write PID file if configured
        if !self.config.general.pid_file.is_empty() {
            let path = Path::new(&self.config.general.pid_file);
            write_pid_file(path)?;
        }

        tracing::info!("starting escl server");
        if let Err(e) = self.server.start().await {
            tracing::error!(error = %e, "server startup failed");
            if !self.config.general.pid_file.is_empty() {
                remove_pid_file(Path::new(&self.config.general.pid_file));
            }
            return Err(e.into());
        }

        // Hand the discovery records to whatever announces them
        for advert in self.server.advertisements().await {
            tracing::info!(
                device = %advert.device_id,
                service = %advert.service_name,
                service_type = advert.service_type,
                port = advert.port,
                "discovery record ready for advertisement"
            );
        }

        // Spawn the registry sweeper
        let mut sweeper_task = Some(spawn_registry_sweeper(
            Arc::clone(&self.registry),
            Duration::from_secs(self.config.registry.purge_interval_secs),
            self.shutdown_tx.subscribe(),
        ));

        // Spawn uptime updater task
        let mut uptime_updater_task = if self.config.metrics.enabled {
            let shutdown_rx = self.shutdown_tx.subscribe();
            Some(spawn_uptime_updater(self.start_time, shutdown_rx))
        } else {
            None
        };

        // Main event loop
        tracing::info!("scanpost-daemon running");
        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal = signal, "shutdown signal received");

        // Initiate shutdown
        let _ = self.shutdown_tx.send(());
        if let Some(task) = sweeper_task.take() {
            let _ = task.await;
        }
        if let Some(task) = uptime_updater_task.take() {
            let _ = task.await;
        }

        self.server.stop().await;

        if !self.config.general.pid_file.is_empty() {
            remove_pid_file(Path::new(&self.config.general.pid_file));
        }

        tracing::info!("scanpost-daemon shut down");
        Ok(())
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &ScanpostConfig {
        &self.config
    }

    /// Get the shared device registry.
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get the eSCL server.
    pub fn server(&self) -> Arc<EsclServer> {
        Arc::clone(&self.server)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Spawn the periodic registry sweeper.
///
/// Purges terminal jobs past their retention grace period and cancels
/// non-terminal jobs whose client has gone silent past the idle
/// timeout.
fn spawn_registry_sweeper(
    registry: Arc<DeviceRegistry>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    registry.purge_expired();
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("registry sweeper shutting down");
                    break;
                }
            }
        }
    })
}

/// Record daemon-level metrics (build info).
///
/// This should be called once during orchestrator initialization.
fn record_daemon_metrics() {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}

/// Spawn a background task that periodically updates the uptime metric.
///
/// Updates every 10 seconds to keep the metric fresh for Prometheus scrapes.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let uptime_secs = start_time.elapsed().as_secs();
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

/// Write the current process PID to a file.
///
/// Used to prevent duplicate daemon instances.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create file (prevents TOCTOU races)
/// - Verifies the created file is a regular file (prevents symlink attacks)
/// - Creates parent directory with restrictive permissions (0o700)
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file (possible symlink attack)",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        file.set_permissions(permissions)?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        );
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}
