//! Table-driven state machine engine.
//!
//! Every status enum in the settlement core (deal, milestone, dispute,
//! payout) implements [`Lifecycle`]: a static allow-table mapping each
//! status to the set of statuses it may move to. All status writes go
//! through [`Lifecycle::check`], so adding a workflow state is a table
//! edit, not new control flow.

use thiserror::Error;

/// A status change rejected by the allow-table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from {from} to {to} (allowed: {})", format_allowed(.allowed))]
pub struct InvalidTransition<S: Lifecycle> {
    pub from: S,
    pub to: S,
    pub allowed: &'static [S],
}

fn format_allowed<S: Lifecycle>(allowed: &[S]) -> String {
    if allowed.is_empty() {
        return "none, terminal".to_string();
    }
    allowed
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A status enum governed by a static transition table.
pub trait Lifecycle:
    Copy + Eq + std::fmt::Debug + std::fmt::Display + Send + Sync + 'static
{
    /// Returns the set of statuses this status may transition to.
    fn allowed(self) -> &'static [Self];

    /// Returns true if `to` is a permitted next status.
    fn can_transition(self, to: Self) -> bool {
        self.allowed().contains(&to)
    }

    /// Returns true if no further transitions are possible.
    fn is_terminal(self) -> bool {
        self.allowed().is_empty()
    }

    /// Validates a transition, returning [`InvalidTransition`] when the
    /// target is not in the allow-table for the current status.
    fn check(self, to: Self) -> Result<(), InvalidTransition<Self>> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                allowed: self.allowed(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
        Off,
    }

    impl std::fmt::Display for Light {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Lifecycle for Light {
        fn allowed(self) -> &'static [Self] {
            match self {
                Light::Red => &[Light::Green, Light::Off],
                Light::Green => &[Light::Red],
                Light::Off => &[],
            }
        }
    }

    #[test]
    fn allowed_transition_passes() {
        assert!(Light::Red.check(Light::Green).is_ok());
        assert!(Light::Green.check(Light::Red).is_ok());
    }

    #[test]
    fn disallowed_transition_reports_table_row() {
        let err = Light::Green.check(Light::Off).unwrap_err();
        assert_eq!(err.from, Light::Green);
        assert_eq!(err.to, Light::Off);
        assert_eq!(err.allowed, &[Light::Red]);
    }

    #[test]
    fn terminal_status_has_empty_table_row() {
        assert!(Light::Off.is_terminal());
        assert!(!Light::Red.is_terminal());
        assert!(Light::Off.check(Light::Red).is_err());
    }

    #[test]
    fn error_message_lists_allowed_targets() {
        let err = Light::Red.check(Light::Red).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Green"));
        assert!(msg.contains("Off"));

        let msg = Light::Off.check(Light::Red).unwrap_err().to_string();
        assert!(msg.contains("terminal"));
    }
}
