//! Maps `Box<dyn Error>` from trait boundaries to typed `TetraError`.
//!
//! The traits in `tetra_traits` use `Box<dyn Error + Send + Sync>` so adapters
//! can surface whatever they have; this module folds those into our error
//! enum, with an optional feature-gated path for `tetra_hardware::HwError`.

use crate::error::TetraError;

/// Map a trait-boundary error to a typed `TetraError`.
///
/// Known hardware error types are downcast first, then the message is
/// inspected as a fallback.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> TetraError {
    #[cfg(feature = "hardware-errors")]
    {
        use tetra_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => TetraError::Timeout(hw.to_string()),
                HwError::Disconnected | HwError::Io(_) | HwError::Serial(_) => {
                    TetraError::Transport(hw.to_string())
                }
                HwError::Actuator(_) => TetraError::HardwareFault(hw.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        TetraError::Timeout(s)
    } else {
        TetraError::Hardware(s)
    }
}

/// Map an error raised by a `LineTransport`.
pub fn map_transport_error(e: &(dyn std::error::Error + 'static)) -> TetraError {
    match map_hw_error(e) {
        TetraError::Hardware(s) => TetraError::Transport(s),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_fallback_detects_timeouts() {
        let e = std::io::Error::other("read timed out");
        assert!(matches!(map_hw_error(&e), TetraError::Timeout(_)));
        let e = std::io::Error::other("boom");
        assert!(matches!(map_transport_error(&e), TetraError::Transport(_)));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn downcasts_hw_errors() {
        use tetra_hardware::error::HwError;
        let e = HwError::Disconnected;
        assert!(matches!(map_hw_error(&e), TetraError::Transport(_)));
        let e = HwError::Actuator("relay stuck".into());
        assert!(matches!(map_hw_error(&e), TetraError::HardwareFault(_)));
    }
}
