//! Role-aware execution gate for commands that mutate shared state.

use convoy_core::{CommandKind, Role};

/// Decides whether gated commands may run locally.
///
/// Offline and host participants are always open. A guest is open only while
/// client-side prediction is enabled. Seat selection bypasses the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionGate {
    role: Role,
    guest_prediction: bool,
}

impl ExecutionGate {
    /// Creates the gate for `role`.
    #[must_use]
    pub const fn new(role: Role, guest_prediction: bool) -> Self {
        Self {
            role,
            guest_prediction,
        }
    }

    /// Reports whether gated commands execute locally.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        match self.role {
            Role::Offline | Role::Host => true,
            Role::Guest => self.guest_prediction,
        }
    }

    /// Reports whether a command of `kind` may execute locally.
    #[must_use]
    pub const fn admits(&self, kind: &CommandKind) -> bool {
        kind.is_ui_only() || self.is_open()
    }

    /// Toggles client-side prediction. Has no effect on authorities.
    pub fn set_guest_prediction(&mut self, enabled: bool) {
        if self.guest_prediction != enabled {
            log::info!("guest prediction {}", if enabled { "enabled" } else { "disabled" });
        }
        self.guest_prediction = enabled;
    }
}
