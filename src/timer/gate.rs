//! Admission check in front of the start/stop command path.
//!
//! The shipped [`AdvisoryGate`] admits everyone and only normalises the actor
//! name. A real authorization check can replace it without touching the
//! controller.

use anyhow::Result;

pub const DEFAULT_ACTOR: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Start,
    Stop,
}

pub trait CommandGate: Send + Sync {
    /// Returns the actor to attribute the action to, or an error to refuse it.
    fn admit(&self, action: TimerAction, requested_by: Option<&str>) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AdvisoryGate;

impl CommandGate for AdvisoryGate {
    fn admit(&self, _action: TimerAction, requested_by: Option<&str>) -> Result<String> {
        Ok(requested_by
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_ACTOR)
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_gate_substitutes_default_actor() {
        let gate = AdvisoryGate;
        assert_eq!(gate.admit(TimerAction::Start, None).unwrap(), "admin");
        assert_eq!(gate.admit(TimerAction::Start, Some("   ")).unwrap(), "admin");
        assert_eq!(gate.admit(TimerAction::Start, Some(" ada ")).unwrap(), "ada");
        assert_eq!(gate.admit(TimerAction::Stop, Some("bob")).unwrap(), "bob");
    }
}
