//! Engine process supervisor.
//!
//! Owns at most one live sing-box process. `start` and `stop` are serialised
//! by one async mutex over [`SupervisorState`]; observers read the phase from
//! a watch channel without touching that lock.
//!
//! Each launch gets a watcher task that owns the `Child`. The watcher is the
//! only place that waits on or kills the process; `stop` talks to it over a
//! control channel and learns about the exit through a watch flag, which the
//! watcher publishes *before* it takes the state lock. A generation number
//! keeps a late watcher from clearing a newer engine.

use crate::singbox::cache::resolve_cache_file;
use crate::singbox::document::ConfigDocument;
use crate::singbox::logging::{exit_notice, EngineLogLine, SharedLogSink};
use crate::singbox::process::{attach_relays, locate_engine, spawn_engine};
use crate::singbox::settings::SupervisorSettings;
use crate::singbox::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Upper bound on waiting for a killed process to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(5);
/// How long the watcher lets the relays drain after exit.
const RELAY_DRAIN: Duration = Duration::from_millis(500);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Public types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Observable lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorPhase {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl Default for SupervisorPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Snapshot of the running engine handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub generation: u64,
    pub pid: Option<u32>,
    pub binary: PathBuf,
    pub config_path: PathBuf,
    pub cache_path: PathBuf,
    pub cache_fallback: bool,
    pub data_dir: PathBuf,
    pub started_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Internal state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Graceful,
    Force,
}

struct TrackedEngine {
    info: EngineInfo,
    control: mpsc::UnboundedSender<Termination>,
    exited: watch::Receiver<bool>,
}

#[derive(Default)]
struct SupervisorState {
    engine: Option<TrackedEngine>,
    next_generation: u64,
}

struct Inner {
    settings: SupervisorSettings,
    sink: SharedLogSink,
    state: Mutex<SupervisorState>,
    phase: watch::Sender<SupervisorPhase>,
    /// Readable without `state`, which a stop holds for the whole grace period.
    snapshot: watch::Sender<Option<EngineInfo>>,
}

impl Inner {
    fn set_phase(&self, phase: SupervisorPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            log::debug!("supervisor phase {} -> {}", previous, phase);
        }
    }

    /// Take the tracked engine out of `state` and clear the snapshot.
    fn untrack(&self, state: &mut SupervisorState) -> Option<TrackedEngine> {
        let engine = state.engine.take();
        if engine.is_some() {
            self.snapshot.send_replace(None);
        }
        engine
    }

    fn notice(&self, text: impl Into<String>) {
        self.sink.on_line(&EngineLogLine::supervisor(text));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EngineSupervisor {
    inner: Arc<Inner>,
}

impl EngineSupervisor {
    pub fn new(settings: SupervisorSettings, sink: SharedLogSink) -> Self {
        let (phase, _) = watch::channel(SupervisorPhase::Idle);
        let (snapshot, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                settings,
                sink,
                state: Mutex::new(SupervisorState::default()),
                phase,
                snapshot,
            }),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    pub fn phase(&self) -> SupervisorPhase {
        *self.inner.phase.borrow()
    }

    /// Receive every phase change.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorPhase> {
        self.inner.phase.subscribe()
    }

    /// Snapshot of the live engine, if any. Never waits on a transition.
    pub fn current(&self) -> Option<EngineInfo> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.snapshot.borrow().is_some()
    }

    /// Launch the engine with `document`, replacing any engine already running.
    ///
    /// On error nothing is left running and the phase is back to `Idle`.
    pub async fn start(&self, document: ConfigDocument) -> Result<EngineInfo, SingBoxError> {
        let mut state = self.inner.state.lock().await;

        if let Some(previous) = self.inner.untrack(&mut state) {
            log::info!(
                "replacing running sing-box (pid {:?})",
                previous.info.pid
            );
            self.inner.set_phase(SupervisorPhase::Stopping);
            terminate(previous, self.inner.settings.grace_timeout()).await;
        }

        self.inner.set_phase(SupervisorPhase::Starting);
        match self.launch(&mut state, document).await {
            Ok(info) => {
                self.inner.set_phase(SupervisorPhase::Running);
                Ok(info)
            }
            Err(e) => {
                log::error!("sing-box start failed: {}", e);
                self.inner.set_phase(SupervisorPhase::Idle);
                Err(e)
            }
        }
    }

    /// Stop the engine: cooperative request, then kill after `grace`.
    /// A no-op when nothing is running.
    pub async fn stop(&self, grace: Duration) -> Result<(), SingBoxError> {
        let mut state = self.inner.state.lock().await;
        let Some(engine) = self.inner.untrack(&mut state) else {
            return Ok(());
        };
        self.inner.set_phase(SupervisorPhase::Stopping);
        terminate(engine, grace).await;
        self.inner.set_phase(SupervisorPhase::Idle);
        Ok(())
    }

    /// [`Self::stop`] with the configured grace timeout.
    pub async fn shutdown(&self) -> Result<(), SingBoxError> {
        self.stop(self.inner.settings.grace_timeout()).await
    }

    async fn launch(
        &self,
        state: &mut SupervisorState,
        mut document: ConfigDocument,
    ) -> Result<EngineInfo, SingBoxError> {
        let settings = &self.inner.settings;
        let data_dir = settings.data_dir.clone();

        tokio::fs::create_dir_all(&data_dir).await.map_err(|e| {
            SingBoxError::io(
                SingBoxErrorKind::DataDirCreate,
                format!("Failed to create data dir {}", data_dir.display()),
                &e,
            )
        })?;

        let cache = resolve_cache_file(&data_dir, &settings.cache).await?;
        self.inner.notice(cache.notice(&settings.cache.file_name));
        document.bind_cache_path(&cache.path);

        let config_path = settings.config_path();
        let json = document.to_json_pretty()?;
        tokio::fs::write(&config_path, json).await.map_err(|e| {
            SingBoxError::io(
                SingBoxErrorKind::ConfigWrite,
                format!("Failed to write {}", config_path.display()),
                &e,
            )
        })?;

        let binary = locate_engine(settings.engine_path.as_deref())?;
        let mut child = spawn_engine(&binary, &config_path, &data_dir)?;
        let pid = child.id();
        let relays = attach_relays(&mut child, &self.inner.sink);

        state.next_generation += 1;
        let generation = state.next_generation;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(false);

        let info = EngineInfo {
            generation,
            pid,
            binary,
            config_path,
            cache_path: cache.path.clone(),
            cache_fallback: cache.is_fallback(),
            data_dir,
            started_at: Utc::now(),
        };

        tokio::spawn(watch_engine(
            self.inner.clone(),
            generation,
            child,
            control_rx,
            exit_tx,
            relays,
        ));

        state.engine = Some(TrackedEngine {
            info: info.clone(),
            control: control_tx,
            exited: exit_rx,
        });
        self.inner.snapshot.send_replace(Some(info.clone()));
        log::info!(
            "sing-box started (pid {:?}, generation {}, cache {})",
            pid,
            generation,
            info.cache_path.display()
        );
        Ok(info)
    }
}

impl Drop for EngineSupervisor {
    fn drop(&mut self) {
        // The watcher holds `inner`, so the tracked engine would otherwise
        // outlive the supervisor.
        if let Ok(mut state) = self.inner.state.try_lock() {
            if let Some(engine) = self.inner.untrack(&mut state) {
                let _ = engine.control.send(Termination::Force);
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Termination / watcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn terminate(engine: TrackedEngine, grace: Duration) {
    let TrackedEngine {
        info,
        control,
        mut exited,
    } = engine;

    let _ = control.send(Termination::Graceful);
    if timeout(grace, exited.wait_for(|e| *e)).await.is_ok() {
        log::info!("sing-box (pid {:?}) stopped", info.pid);
        return;
    }

    log::warn!(
        "sing-box (pid {:?}) still running after {:?}, killing",
        info.pid,
        grace
    );
    let _ = control.send(Termination::Force);
    if timeout(KILL_WAIT, exited.wait_for(|e| *e)).await.is_err() {
        log::error!("sing-box (pid {:?}) did not exit after kill", info.pid);
    }
}

async fn watch_engine(
    inner: Arc<Inner>,
    generation: u64,
    mut child: Child,
    mut control: mpsc::UnboundedReceiver<Termination>,
    exited: watch::Sender<bool>,
    relays: Vec<JoinHandle<()>>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status.ok(),
            cmd = control.recv() => match cmd {
                Some(Termination::Graceful) => {
                    let sent = child
                        .id()
                        .map(crate::singbox::process::request_shutdown)
                        .unwrap_or(false);
                    if !sent {
                        log::debug!("no cooperative stop available for sing-box, awaiting kill");
                    }
                }
                Some(Termination::Force) | None => {
                    if let Err(e) = child.start_kill() {
                        log::warn!("failed to kill sing-box: {}", e);
                    }
                    break child.wait().await.ok();
                }
            }
        }
    };

    for relay in relays {
        let _ = timeout(RELAY_DRAIN, relay).await;
    }

    exited.send_replace(true);
    let notice = exit_notice(status);
    log::info!("{} (generation {})", notice, generation);
    inner.notice(notice);

    let mut state = inner.state.lock().await;
    if state
        .engine
        .as_ref()
        .is_some_and(|e| e.info.generation == generation)
    {
        inner.untrack(&mut state);
        inner.set_phase(SupervisorPhase::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::singbox::logging::NullSink;

    fn supervisor(dir: &std::path::Path) -> EngineSupervisor {
        EngineSupervisor::new(SupervisorSettings::with_data_dir(dir), Arc::new(NullSink))
    }

    #[tokio::test]
    async fn starts_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let sup = supervisor(tmp.path());
        assert_eq!(sup.phase(), SupervisorPhase::Idle);
        assert!(!sup.is_running());
        assert!(sup.current().is_none());
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let sup = supervisor(tmp.path());
        let mut phases = sup.subscribe();
        tokio_test::assert_ok!(sup.stop(Duration::from_millis(10)).await);
        tokio_test::assert_ok!(sup.shutdown().await);
        assert_eq!(sup.phase(), SupervisorPhase::Idle);
        assert!(!phases.has_changed().unwrap());
    }

    #[test]
    fn phase_display() {
        assert_eq!(SupervisorPhase::Stopping.to_string(), "Stopping");
        assert_eq!(SupervisorPhase::default(), SupervisorPhase::Idle);
    }
}
