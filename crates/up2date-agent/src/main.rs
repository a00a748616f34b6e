//! up2date agent service entry point.
//!
//! Loads the configuration, wires the installers, detectors, and native
//! connection module into the two state machines, then runs the service
//! loops until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ Cli::parse()                  -- --config / UP2DATE_CONFIG
//!  └─ load_or_init(config.toml)     -- settings + device id
//!  └─ SetupManager::new()           -- initial package refresh
//!  └─ Client::new()                 -- connection state machine
//!  └─ refresh task                  -- SetupManager::refresh every N secs
//!  └─ reconnect loop
//!       ├─ Client::run()            -- one backend session
//!       └─ sleep(reconnect_interval) unless shutting down
//! ```
//!
//! # Native connection module
//!
//! This build links the recording `MockNativeClient`, whose sessions stay
//! open until shutdown.  A device build swaps in the vendor module's
//! `NativeClient` implementation here; nothing else changes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use up2date_agent::application::connection::{CertificateProvider, Client, ClientSettings};
use up2date_agent::application::deployment::DeploymentTarget;
use up2date_agent::application::native::NativeClient;
use up2date_agent::application::setup_manager::{
    InstallationDetector, PackageInspector, PackageInstaller, SetupDependencies, SetupFinishedHook,
    SetupManager,
};
use up2date_agent::infrastructure::{
    admin_bridge::AgentState,
    certificate::FileCertificateProvider,
    detector::ChainDetector,
    inspector::ArchiveInspector,
    installer::{
        msi::MsiInstaller,
        nupkg::{NupkgInstaller, PowerShellHost},
    },
    native::mock::MockNativeClient,
    storage::config::{self, AgentConfig},
    system_info::{self, SystemInfo},
};
use up2date_core::Package;

/// Command-line arguments for the agent service.
#[derive(Debug, Parser)]
#[command(
    name = "up2date-agent",
    about = "Device agent: backend connection and package installation service",
    version
)]
struct Cli {
    /// Configuration file.  Relative paths inside it resolve against its
    /// directory.  Defaults to `config.toml` in the platform config directory.
    #[arg(long, env = "UP2DATE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_file_path()?,
    };
    let config_dir = config_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();
    let (cfg, config_error) = match config::load_or_init(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AgentConfig::default(), Some(e)),
    };

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.service.log_level)),
        )
        .init();

    info!("up2date agent {} starting", system_info::AGENT_VERSION);
    if let Some(e) = config_error {
        warn!("using default configuration: {e}");
    }

    // ── Package installation state machine ───────────────────────────────────
    let packages = cfg.packages.clone();
    let download_location = packages.download_location(&config_dir);
    let deps = SetupDependencies {
        inspector: Arc::new(ArchiveInspector::new()) as Arc<dyn PackageInspector>,
        detector: Arc::new(ChainDetector::for_platform(packages.choco_program.clone()))
            as Arc<dyn InstallationDetector>,
        native_installer: Arc::new(MsiInstaller::new(packages.msi_poll_interval()))
            as Arc<dyn PackageInstaller>,
        package_manager_installer: Arc::new(NupkgInstaller::new(Arc::new(PowerShellHost::new(
            packages.script_interpreter.clone(),
            packages.helper_scripts_dir(),
        )))) as Arc<dyn PackageInstaller>,
    };
    let on_finished: SetupFinishedHook = Arc::new(|package: &Package, result: i32| {
        info!("setup finished: {} -> {:?} ({result})", package.file_name(), package.status);
    });
    let setup = tokio::task::spawn_blocking(move || {
        SetupManager::new(download_location, deps, Some(on_finished))
    })
    .await??;
    info!(
        "tracking {} package(s) in {}",
        setup.packages().len(),
        setup.download_location().display()
    );

    // ── Connection state machine ─────────────────────────────────────────────
    let system_info = SystemInfo::collect();
    let native = Arc::new(MockNativeClient::new());
    warn!("no native connection module linked; sessions are simulated");

    let certificates: Arc<dyn CertificateProvider> = Arc::new(FileCertificateProvider::new(
        cfg.connection.certificate_path(&config_dir),
    ));
    let client = Arc::new(Client::new(
        Arc::clone(&native) as Arc<dyn NativeClient>,
        Arc::clone(&certificates),
        Arc::new(setup.clone()) as Arc<dyn DeploymentTarget>,
        ClientSettings {
            provisioning_url: cfg.connection.provisioning_url.clone(),
            x_apig_token: cfg.connection.x_apig_token.clone(),
            attributes: system_info::config_attributes(
                &system_info,
                &cfg.service.device_id,
                &cfg.connection.attributes,
            ),
        },
    ));

    let shutdown = CancellationToken::new();
    let state = Arc::new(AgentState {
        setup: setup.clone(),
        client,
        certificates,
        device_id: cfg.service.device_id.clone(),
        system_info,
        shutdown: shutdown.clone(),
    });

    // ── Periodic refresh ─────────────────────────────────────────────────────
    let refresh_shutdown = shutdown.clone();
    let refresh_interval = packages.refresh_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(refresh_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = refresh_shutdown.cancelled() => break,
                _ = ticker.tick() => setup.refresh().await,
            }
        }
    });

    // ── Ctrl-C handler ───────────────────────────────────────────────────────
    let signal_shutdown = shutdown.clone();
    let signal_native = Arc::clone(&native);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.cancel();
            signal_native.exit_run();
        }
    });

    // ── Reconnect loop ───────────────────────────────────────────────────────
    let reconnect_interval = cfg.connection.reconnect_interval();
    info!("device {} ready; connecting to backend", state.device_id);
    while !shutdown.is_cancelled() {
        state.client.run().await;

        let client_state = state.client.state();
        info!(
            "session ended: {:?} {}",
            client_state.status(),
            client_state.last_error()
        );

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(reconnect_interval) => {}
        }
    }

    info!("up2date agent stopped");
    Ok(())
}
