//! Phased graceful shutdown.
//!
//! Five phases run in order: stop-accepting, drain-requests,
//! stop-background, close-connections, cleanup. Hooks within a phase run
//! concurrently, each under its own timeout. A non-critical hook failing
//! logs and continues; a critical hook failing aborts the whole sequence.
//! Signal handlers schedule the sequence exactly once; re-entry is
//! suppressed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Ordered shutdown phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    StopAccepting,
    DrainRequests,
    StopBackground,
    CloseConnections,
    Cleanup,
}

impl ShutdownPhase {
    pub const ALL: [ShutdownPhase; 5] = [
        ShutdownPhase::StopAccepting,
        ShutdownPhase::DrainRequests,
        ShutdownPhase::StopBackground,
        ShutdownPhase::CloseConnections,
        ShutdownPhase::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ShutdownPhase::StopAccepting => "stop_accepting",
            ShutdownPhase::DrainRequests => "drain_requests",
            ShutdownPhase::StopBackground => "stop_background",
            ShutdownPhase::CloseConnections => "close_connections",
            ShutdownPhase::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carried by a failing hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

type HookFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;

/// One registered shutdown hook.
#[derive(Clone)]
pub struct ShutdownHook {
    pub name: String,
    pub phase: ShutdownPhase,
    callback: HookFn,
    pub timeout: Duration,
    /// A failing critical hook aborts the sequence.
    pub critical: bool,
}

impl ShutdownHook {
    /// Defaults: 30-second timeout, critical.
    pub fn new<F, Fut>(name: impl Into<String>, phase: ShutdownPhase, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), HookError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            phase,
            callback: Arc::new(move || Box::pin(f())),
            timeout: Duration::from_secs(30),
            critical: true,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }
}

/// Shutdown failure.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("critical shutdown hook '{name}' failed in phase {phase}: {reason}")]
    CriticalHookFailed { name: String, phase: ShutdownPhase, reason: String },
}

/// Runs registered hooks phase by phase, exactly once.
pub struct ShutdownManager {
    hooks: Mutex<Vec<ShutdownHook>>,
    started: AtomicBool,
    completed: Notify,
    done: AtomicBool,
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            completed: Notify::new(),
            done: AtomicBool::new(false),
        }
    }

    pub fn register(&self, hook: ShutdownHook) {
        info!(hook = %hook.name, phase = %hook.phase, "registered shutdown hook");
        self.hooks.lock().unwrap_or_else(|e| e.into_inner()).push(hook);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Executes all phases in order. A second concurrent call returns
    /// immediately once the first run completes.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("shutdown already in progress");
            self.wait_until_complete().await;
            return Ok(());
        }
        info!("graceful shutdown initiated");

        let mut outcome = Ok(());
        'phases: for phase in ShutdownPhase::ALL {
            let phase_hooks: Vec<ShutdownHook> = {
                let hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
                hooks.iter().filter(|hook| hook.phase == phase).cloned().collect()
            };
            if phase_hooks.is_empty() {
                continue;
            }
            info!(phase = %phase, hooks = phase_hooks.len(), "running shutdown phase");

            let runs = phase_hooks.into_iter().map(|hook| async move {
                let result =
                    tokio::time::timeout(hook.timeout, (hook.callback)()).await;
                let failure: Option<String> = match result {
                    Ok(Ok(())) => {
                        info!(hook = %hook.name, "shutdown hook completed");
                        None
                    }
                    Ok(Err(e)) => {
                        error!(hook = %hook.name, error = %e, "shutdown hook failed");
                        Some(e.to_string())
                    }
                    Err(_) => {
                        error!(hook = %hook.name, timeout = ?hook.timeout, "shutdown hook timed out");
                        Some(format!("timed out after {:?}", hook.timeout))
                    }
                };
                (hook.name, hook.critical, failure)
            });

            for (name, critical, failure) in join_all(runs).await {
                if let Some(reason) = failure {
                    if critical {
                        outcome = Err(ShutdownError::CriticalHookFailed { name, phase, reason });
                        break 'phases;
                    }
                }
            }
        }

        match &outcome {
            Ok(()) => info!("graceful shutdown completed"),
            Err(e) => error!(error = %e, "graceful shutdown aborted"),
        }
        self.done.store(true, Ordering::SeqCst);
        self.completed.notify_waiters();
        outcome
    }

    /// Resolves once a shutdown run has finished (successfully or not).
    pub async fn wait_until_complete(&self) {
        while !self.done.load(Ordering::SeqCst) {
            let notified = self.completed.notified();
            if self.done.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
    }

    /// Spawns a task that triggers shutdown on SIGINT or SIGTERM. The
    /// sequence runs exactly once no matter how many signals arrive.
    pub fn install_signal_handlers(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            warn!("termination signal received, starting graceful shutdown");
            let _ = manager.shutdown().await;
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
