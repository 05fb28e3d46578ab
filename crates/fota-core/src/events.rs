//! Event system for UI decoupling.
//!
//! Allows CLI/daemon frontends to subscribe to update-cycle events
//! without tight coupling to the core logic.

use std::fmt;

/// Phases of one update poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    /// Between poll cycles.
    Idle,
    /// Querying the controller base resource.
    Polling,
    /// Evaluating a pending deployment.
    Deciding,
    /// Closing out a deployment already confirmed running.
    ReportingAlreadyCurrent,
    /// Closing out a deployment already attempted and not confirmed.
    ReportingAlreadyFailed,
    /// Artifact download and flash write in progress.
    Downloading,
    /// Image written and marked for swap; reboot pending.
    InstalledPendingReboot,
    /// Reporting a failed or unsupported deployment.
    ReportFailure,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePhase::Idle => write!(f, "Idle"),
            UpdatePhase::Polling => write!(f, "Polling"),
            UpdatePhase::Deciding => write!(f, "Deciding"),
            UpdatePhase::ReportingAlreadyCurrent => write!(f, "Reporting Already Current"),
            UpdatePhase::ReportingAlreadyFailed => write!(f, "Reporting Already Failed"),
            UpdatePhase::Downloading => write!(f, "Downloading"),
            UpdatePhase::InstalledPendingReboot => write!(f, "Installed, Pending Reboot"),
            UpdatePhase::ReportFailure => write!(f, "Reporting Failure"),
        }
    }
}

/// Events emitted by the update client.
#[derive(Debug, Clone)]
pub enum FotaEvent {
    /// Phase changed.
    PhaseChanged { from: UpdatePhase, to: UpdatePhase },
    /// The server adjusted the polling interval.
    PollIntervalChanged { secs: u32 },
    /// A new deployment was selected for installation.
    DeploymentFound { action_id: i32, file_size: usize },
    /// Download/write progress for the current install.
    Progress { current: usize, total: usize },
    /// Feedback for an action was delivered to the server.
    FeedbackSent { action_id: i32, success: bool },
    /// One poll cycle failed; counts toward the fail-safe limit.
    CycleFailed { failures: u32, message: String },
    /// The client is about to reboot the device.
    RebootRequested { reason: String },
}

/// Observer trait for receiving update events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait FotaObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &FotaEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FotaObserver for NullObserver {
    fn on_event(&self, _event: &FotaEvent) {
        // Do nothing
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FotaObserver for TracingObserver {
    fn on_event(&self, event: &FotaEvent) {
        match event {
            FotaEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            FotaEvent::PollIntervalChanged { secs } => {
                tracing::info!(secs, "Poll interval changed");
            }
            FotaEvent::DeploymentFound {
                action_id,
                file_size,
            } => {
                tracing::info!(action_id, file_size, "Deployment found");
            }
            FotaEvent::Progress { current, total } => {
                let pct = if *total > 0 { (current * 100) / total } else { 0 };
                tracing::debug!(progress = %format!("{}%", pct), current, total, "Progress");
            }
            FotaEvent::FeedbackSent { action_id, success } => {
                tracing::debug!(action_id, success, "Feedback sent");
            }
            FotaEvent::CycleFailed { failures, message } => {
                tracing::warn!(failures, "Cycle failed: {}", message);
            }
            FotaEvent::RebootRequested { reason } => {
                tracing::warn!("Reboot requested: {}", reason);
            }
        }
    }
}
