//! Device lifecycle phases.

use std::fmt;

/// Where the treatment cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecyclePhase {
    /// Waiting for a start signal or `system=1`.
    #[default]
    Idle,
    /// Cycle started; sensors settling before decay begins.
    WarmUp,
    /// Decay is being applied every tick.
    Running,
    /// TDS hit its floor; measurands are frozen.
    LimitReached,
    /// Summary shown; nothing changes until a reset.
    FinalDisplayed,
}

impl LifecyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::WarmUp => "warmup",
            Self::Running => "running",
            Self::LimitReached => "limit_reached",
            Self::FinalDisplayed => "final_displayed",
        }
    }

    /// The `system` flag reported on the wire.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
