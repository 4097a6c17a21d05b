//! Process lifecycle states.
//!
//! ```text
//! Uninitialized ──► Starting ──► Running ──► Stopping ──► Stopped
//!                       │                                   ▲
//!                       └───────── start failed ────────────┘
//! ```
//!
//! Every transition moves strictly forward, so no state is entered twice and
//! `Stopped` is terminal.

use std::fmt;

/// Where the process is in its start-up / shut-down sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    /// Process entered; device not touched yet.
    Uninitialized,
    /// Device start in progress; no listener yet.
    Starting,
    /// Device running; listener may accept viewers.
    Running,
    /// Shutdown in progress; device being released.
    Stopping,
    /// Device released.  Terminal.
    Stopped,
}

impl LifecycleState {
    /// Returns `true` if `self -> next` is an allowed transition.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Uninitialized, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Returns `true` once the process can no longer serve viewers.
    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Stopped
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What asked the process to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Operator interrupt (Ctrl+C / SIGINT).
    Signal,
    /// The listener failed and cannot keep accepting viewers.
    ListenerFault,
    /// Normal fall-through at the end of `serve`, or the controller was dropped.
    Exit,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownTrigger::Signal => "interrupt signal",
            ShutdownTrigger::ListenerFault => "listener fault",
            ShutdownTrigger::Exit => "process exit",
        };
        f.write_str(name)
    }
}
