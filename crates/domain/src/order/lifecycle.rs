//! Order status transition rules.
//!
//! ```text
//! Created ──► Confirmed ──► Processing ──► Shipped ──► Delivered
//!    │            │             │             │
//!    └────────────┴─────────────┴─────────────┴──► Cancelled
//! ```
//!
//! Forward moves may skip steps: upstream events arrive on independent
//! routing keys and are not ordered relative to each other.

use common::OrderStatus;

/// Outcome of checking a requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status changes.
    Apply,

    /// The order already has the requested status.
    Unchanged,

    /// The change is not allowed.
    Illegal,
}

fn position(status: OrderStatus) -> Option<u8> {
    match status {
        OrderStatus::Created => Some(0),
        OrderStatus::Confirmed => Some(1),
        OrderStatus::Processing => Some(2),
        OrderStatus::Shipped => Some(3),
        OrderStatus::Delivered => Some(4),
        OrderStatus::Cancelled => None,
    }
}

/// Classifies a status change from `from` to `to`.
pub fn check_transition(from: OrderStatus, to: OrderStatus) -> Transition {
    if from == to {
        return Transition::Unchanged;
    }
    if from.is_terminal() {
        return Transition::Illegal;
    }
    if to == OrderStatus::Cancelled {
        return Transition::Apply;
    }
    match (position(from), position(to)) {
        (Some(f), Some(t)) if t > f => Transition::Apply,
        _ => Transition::Illegal,
    }
}

/// Returns true if moving from `from` to `to` is a real, allowed change.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    check_transition(from, to) == Transition::Apply
}

#[cfg(test)]
mod tests {
    use super::*;

    use OrderStatus::*;

    #[test]
    fn test_forward_moves_allowed() {
        assert!(can_transition(Created, Confirmed));
        assert!(can_transition(Confirmed, Processing));
        assert!(can_transition(Processing, Shipped));
        assert!(can_transition(Shipped, Delivered));
    }

    #[test]
    fn test_skipping_ahead_allowed() {
        assert!(can_transition(Created, Processing));
        assert!(can_transition(Created, Delivered));
        assert!(can_transition(Confirmed, Shipped));
    }

    #[test]
    fn test_backward_moves_rejected() {
        assert!(!can_transition(Confirmed, Created));
        assert!(!can_transition(Shipped, Processing));
        assert!(!can_transition(Processing, Confirmed));
    }

    #[test]
    fn test_cancel_from_non_terminal_states() {
        for from in [Created, Confirmed, Processing, Shipped] {
            assert!(can_transition(from, Cancelled), "{from} -> Cancelled");
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for to in OrderStatus::ALL {
            if to != Delivered {
                assert_eq!(check_transition(Delivered, to), Transition::Illegal);
            }
            if to != Cancelled {
                assert_eq!(check_transition(Cancelled, to), Transition::Illegal);
            }
        }
    }

    #[test]
    fn test_same_status_is_unchanged() {
        for status in OrderStatus::ALL {
            assert_eq!(check_transition(status, status), Transition::Unchanged);
        }
    }
}
