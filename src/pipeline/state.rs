use serde::Serialize;
use std::fmt;

use crate::error::ErrorKind;

/// Per-unit stage machine. Stages only move forward, one at a time;
/// `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Detecting,
    Translating,
    Erasing,
    Rendering,
    Done,
    Failed(ErrorKind),
}

impl UnitState {
    pub fn next(&self) -> Option<UnitState> {
        match self {
            UnitState::Pending => Some(UnitState::Detecting),
            UnitState::Detecting => Some(UnitState::Translating),
            UnitState::Translating => Some(UnitState::Erasing),
            UnitState::Erasing => Some(UnitState::Rendering),
            UnitState::Rendering => Some(UnitState::Done),
            UnitState::Done | UnitState::Failed(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Done | UnitState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            UnitState::Pending => "pending",
            UnitState::Detecting => "detecting",
            UnitState::Translating => "translating",
            UnitState::Erasing => "erasing",
            UnitState::Rendering => "rendering",
            UnitState::Done => "done",
            UnitState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Failed(err) => write!(f, "failed ({err})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: UnitState,
    pub to: UnitState,
}

/// Tracks one unit's state and the path it took.
#[derive(Debug, Clone)]
pub struct UnitMachine {
    state: UnitState,
    visited: Vec<&'static str>,
}

impl Default for UnitMachine {
    fn default() -> Self {
        Self {
            state: UnitState::Pending,
            visited: vec![UnitState::Pending.name()],
        }
    }
}

impl UnitMachine {
    pub fn state(&self) -> &UnitState {
        &self.state
    }

    pub fn visited(&self) -> &[&'static str] {
        &self.visited
    }

    /// Moves to `to` when it is the next stage or a failure.
    pub fn transition(&mut self, to: UnitState) -> Result<(), InvalidTransition> {
        let allowed = match &to {
            UnitState::Failed(_) => !self.state.is_terminal(),
            _ => self.state.next().as_ref() == Some(&to),
        };
        if !allowed {
            return Err(InvalidTransition {
                from: self.state.clone(),
                to,
            });
        }
        self.visited.push(to.name());
        self.state = to;
        Ok(())
    }

    /// Steps forward to the next stage.
    pub fn advance(&mut self) -> &UnitState {
        if let Some(next) = self.state.next() {
            self.visited.push(next.name());
            self.state = next;
        }
        &self.state
    }

    pub fn fail(&mut self, error: ErrorKind) {
        let _ = self.transition(UnitState::Failed(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_the_stages_in_order() {
        let mut machine = UnitMachine::default();
        while !machine.state().is_terminal() {
            machine.advance();
        }
        assert_eq!(
            machine.visited(),
            ["pending", "detecting", "translating", "erasing", "rendering", "done"]
        );
    }

    #[test]
    fn rejects_skipping_a_stage() {
        let mut machine = UnitMachine::default();
        let err = machine.transition(UnitState::Erasing).unwrap_err();
        assert_eq!(err.from, UnitState::Pending);
        assert_eq!(machine.state(), &UnitState::Pending);
    }

    #[test]
    fn failure_is_reachable_from_any_stage_but_final() {
        let mut machine = UnitMachine::default();
        machine.advance();
        machine.advance();
        machine.fail(ErrorKind::Translation("exhausted".into()));
        assert_eq!(machine.state().name(), "failed");
        assert!(machine.transition(UnitState::Done).is_err());
        machine.fail(ErrorKind::Fatal("late".into()));
        assert_eq!(
            machine.state(),
            &UnitState::Failed(ErrorKind::Translation("exhausted".into()))
        );
    }
}
