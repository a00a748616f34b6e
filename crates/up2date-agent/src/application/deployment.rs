//! Dispatch of native callbacks onto the agent's own tasks.
//!
//! # Message passing (for beginners)
//!
//! The native module calls back into the agent from threads it owns, at any
//! time and possibly concurrently.  Instead of letting those threads touch
//! agent state, every callback is turned into a [`DispatcherEvent`] and sent
//! over one unbounded channel:
//!
//! ```text
//!  native thread                          Tokio runtime
//!  ─────────────                          ─────────────
//!  on_deployment_action ──► DispatcherEvent ──► DeploymentPump::run
//!        │                  (+ oneshot reply)        │
//!        └─ blocking_recv() ◄──────── reply ─────────┘
//! ```
//!
//! The pump handles config and cancel requests inline.  Each deployment runs
//! as its own task so a long install does not hold up cancel requests; the
//! pump keeps a map from deployment id to [`CancellationToken`] for them.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use up2date_core::{ClientResult, DeploymentInfo, Package, PackageStatus};

use super::native::{ArtifactHandle, DispatcherCallbacks, NativeClient, ResponseBuilderHandle};
use super::setup_manager::SetupError;

/// The setup seam a deployment drives: download bookkeeping and installation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeploymentTarget: Send + Sync {
    /// Directory artifacts are downloaded into.
    fn download_location(&self) -> PathBuf;

    fn on_download_started(&self, file_name: &str);

    async fn on_download_finished(&self, file_name: &str);

    async fn install_package(
        &self,
        file_name: &str,
        cancel: CancellationToken,
    ) -> Result<Package, SetupError>;
}

/// One native callback, with the channel its answer goes back on.
#[derive(Debug)]
pub enum DispatcherEvent {
    ConfigRequest {
        builder: ResponseBuilderHandle,
        reply: oneshot::Sender<()>,
    },
    Deployment {
        artifact: ArtifactHandle,
        info: DeploymentInfo,
        reply: oneshot::Sender<ClientResult>,
    },
    Cancel {
        stop_id: i32,
        reply: oneshot::Sender<bool>,
    },
}

/// [`DispatcherCallbacks`] that forwards every callback to the pump and
/// blocks the calling native thread until the answer arrives.
///
/// Must not be invoked from inside a Tokio runtime thread.
pub struct ChannelDispatcher {
    events: mpsc::UnboundedSender<DispatcherEvent>,
}

impl ChannelDispatcher {
    pub fn new(events: mpsc::UnboundedSender<DispatcherEvent>) -> Self {
        Self { events }
    }
}

impl DispatcherCallbacks for ChannelDispatcher {
    fn on_config_request(&self, builder: ResponseBuilderHandle) {
        let (reply, answer) = oneshot::channel();
        if self
            .events
            .send(DispatcherEvent::ConfigRequest { builder, reply })
            .is_ok()
        {
            let _ = answer.blocking_recv();
        }
    }

    fn on_deployment_action(&self, artifact: ArtifactHandle, info: DeploymentInfo) -> ClientResult {
        let (reply, answer) = oneshot::channel();
        if self
            .events
            .send(DispatcherEvent::Deployment { artifact, info, reply })
            .is_err()
        {
            return ClientResult::failure("session is shutting down");
        }
        answer
            .blocking_recv()
            .unwrap_or_else(|_| ClientResult::failure("deployment aborted"))
    }

    fn on_cancel_action(&self, stop_id: i32) -> bool {
        let (reply, answer) = oneshot::channel();
        if self
            .events
            .send(DispatcherEvent::Cancel { stop_id, reply })
            .is_err()
        {
            return false;
        }
        answer.blocking_recv().unwrap_or(false)
    }
}

/// Deployments in flight, keyed by deployment id.
///
/// Each registration carries a sequence number so a finished deployment
/// never unregisters a newer one that reused its id.
#[derive(Default)]
struct InFlight {
    next_seq: AtomicU64,
    tokens: Mutex<HashMap<i32, (u64, CancellationToken)>>,
}

impl InFlight {
    fn register(&self, id: i32) -> (u64, CancellationToken) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (seq, token.clone()));
        (seq, token)
    }

    fn unregister(&self, id: i32, seq: u64) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if tokens.get(&id).is_some_and(|(current, _)| *current == seq) {
            tokens.remove(&id);
        }
    }

    fn cancel(&self, id: i32) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        match tokens.get(&id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Per-session consumer of [`DispatcherEvent`]s.
#[derive(Clone)]
pub struct DeploymentPump {
    native: Arc<dyn NativeClient>,
    target: Arc<dyn DeploymentTarget>,
    attributes: Arc<BTreeMap<String, String>>,
    in_flight: Arc<InFlight>,
}

impl DeploymentPump {
    pub fn new(
        native: Arc<dyn NativeClient>,
        target: Arc<dyn DeploymentTarget>,
        attributes: Arc<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            native,
            target,
            attributes,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Processes events until every sender is gone.
    ///
    /// Deployments still running when the channel closes are left to finish
    /// on their own.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<DispatcherEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                DispatcherEvent::ConfigRequest { builder, reply } => {
                    self.push_attributes(builder);
                    let _ = reply.send(());
                }
                DispatcherEvent::Cancel { stop_id, reply } => {
                    let accepted = self.in_flight.cancel(stop_id);
                    info!("cancel request for deployment {stop_id}: accepted={accepted}");
                    let _ = reply.send(accepted);
                }
                DispatcherEvent::Deployment {
                    artifact,
                    info,
                    reply,
                } => {
                    let (seq, token) = self.in_flight.register(info.id);
                    let pump = self.clone();
                    tokio::spawn(async move {
                        let result = pump.deploy(artifact, &info, token).await;
                        pump.in_flight.unregister(info.id, seq);
                        let _ = reply.send(result);
                    });
                }
            }
        }
        debug!("dispatcher channel closed");
    }

    fn push_attributes(&self, builder: ResponseBuilderHandle) {
        for (key, value) in self.attributes.iter() {
            self.native.add_config_attribute(builder, key, value);
        }
        debug!("config request answered with {} attributes", self.attributes.len());
    }

    /// Downloads and, when allowed, installs one artifact.
    pub async fn deploy(
        &self,
        artifact: ArtifactHandle,
        info: &DeploymentInfo,
        cancel: CancellationToken,
    ) -> ClientResult {
        let file_name = info.artifact_file_name.as_str();
        info!(
            "deployment {}: {file_name} (download={}, update={}, maintenance window={})",
            info.id, info.download_type, info.update_type, info.is_in_maintenance_window
        );

        if !info.should_download() {
            return ClientResult::success(format!("download of {file_name} skipped"));
        }
        if !is_plain_file_name(file_name) {
            warn!("deployment {} rejected: invalid artifact name {file_name:?}", info.id);
            return ClientResult::failure(format!("invalid artifact file name {file_name:?}"));
        }

        if let Err(message) = self.download(artifact, file_name).await {
            warn!("deployment {}: {message}", info.id);
            return ClientResult::failure(message);
        }

        if cancel.is_cancelled() {
            return ClientResult::failure(format!("deployment of {file_name} cancelled"));
        }
        if !info.should_install() {
            return ClientResult::success(format!("{file_name} downloaded, installation postponed"));
        }

        match self.target.install_package(file_name, cancel).await {
            Ok(package) => install_result(&package),
            Err(e) => {
                warn!("deployment {}: {e}", info.id);
                ClientResult::failure(e.to_string())
            }
        }
    }

    async fn download(&self, artifact: ArtifactHandle, file_name: &str) -> Result<(), String> {
        let destination = self.target.download_location().join(file_name);
        self.target.on_download_started(file_name);

        let native = Arc::clone(&self.native);
        let downloaded =
            tokio::task::spawn_blocking(move || native.download_artifact(artifact, &destination))
                .await;

        self.target.on_download_finished(file_name).await;

        match downloaded {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{file_name}: {e}")),
            Err(e) => Err(format!("{file_name}: download task failed: {e}")),
        }
    }
}

fn install_result(package: &Package) -> ClientResult {
    let name = package.file_name();
    match package.status {
        PackageStatus::Installed => ClientResult::success(format!("{name} installed")),
        PackageStatus::RestartNeeded => {
            ClientResult::success(format!("{name} installed, restart needed"))
        }
        _ => ClientResult::failure(format!(
            "installation of {name} failed with code {}",
            package.error_code
        )),
    }
}

/// Artifact names must not escape the download directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && Path::new(name).file_name() == Some(OsStr::new(name))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
