//! Per-kind action state
//!
//! Each [`ActionKind`] runs its own `Idle -> Pending -> Succeeded | Failed ->
//! Idle` machine. Different kinds may be pending at once; a kind that is
//! already pending rejects a second start.

use crate::error::{Error, Result};
use crate::types::ActionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionPhase {
    #[default]
    Idle,
    Pending,
    Succeeded,
    Failed,
}

impl ActionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionPhase::Idle => "idle",
            ActionPhase::Pending => "pending",
            ActionPhase::Succeeded => "succeeded",
            ActionPhase::Failed => "failed",
        }
    }
}

/// Busy flags for every action kind.
#[derive(Debug, Clone, Default)]
pub struct ActionBoard {
    phases: [ActionPhase; ActionKind::ALL.len()],
    /// Terminal phase of the most recent run of each kind
    last: [Option<ActionPhase>; ActionKind::ALL.len()],
}

impl ActionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, kind: ActionKind) -> ActionPhase {
        self.phases[kind.index()]
    }

    /// How the most recent finished run of `kind` ended.
    pub fn last_outcome(&self, kind: ActionKind) -> Option<ActionPhase> {
        self.last[kind.index()]
    }

    pub fn is_busy(&self, kind: ActionKind) -> bool {
        self.phase(kind) == ActionPhase::Pending
    }

    /// True while any kind is pending.
    pub fn any_busy(&self) -> bool {
        ActionKind::ALL.iter().any(|k| self.is_busy(*k))
    }

    pub fn pending_kinds(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .iter()
            .copied()
            .filter(|k| self.is_busy(*k))
            .collect()
    }

    /// `Idle -> Pending`
    pub fn begin(&mut self, kind: ActionKind) -> Result<()> {
        if self.is_busy(kind) {
            return Err(Error::Busy(kind));
        }
        self.phases[kind.index()] = ActionPhase::Pending;
        tracing::debug!(kind = %kind, "Action pending");
        Ok(())
    }

    /// `Pending -> Succeeded | Failed -> Idle`. Returns the terminal phase.
    pub fn finish(&mut self, kind: ActionKind, succeeded: bool) -> ActionPhase {
        let terminal = if succeeded {
            ActionPhase::Succeeded
        } else {
            ActionPhase::Failed
        };
        if !self.is_busy(kind) {
            tracing::warn!(kind = %kind, "Finishing an action that was not pending");
        }
        self.phases[kind.index()] = ActionPhase::Idle;
        self.last[kind.index()] = Some(terminal);
        tracing::debug!(kind = %kind, phase = terminal.as_str(), "Action finished");
        terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_kind_cannot_start_twice() {
        let mut board = ActionBoard::new();
        board.begin(ActionKind::Review).unwrap();

        assert!(matches!(
            board.begin(ActionKind::Review),
            Err(Error::Busy(ActionKind::Review))
        ));
        assert!(board.begin(ActionKind::Execute).is_ok());
        assert_eq!(
            board.pending_kinds(),
            vec![ActionKind::Review, ActionKind::Execute]
        );
    }

    #[test]
    fn test_finish_returns_to_idle() {
        let mut board = ActionBoard::new();
        assert!(!board.any_busy());

        board.begin(ActionKind::Debug).unwrap();
        assert!(board.any_busy());
        assert_eq!(board.phase(ActionKind::Debug), ActionPhase::Pending);

        assert_eq!(board.finish(ActionKind::Debug, false), ActionPhase::Failed);
        assert_eq!(board.phase(ActionKind::Debug), ActionPhase::Idle);
        assert_eq!(board.last_outcome(ActionKind::Debug), Some(ActionPhase::Failed));
        assert!(!board.any_busy());
        assert!(board.begin(ActionKind::Debug).is_ok());
    }
}
