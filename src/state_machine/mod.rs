//! Deal lifecycle state machine.
//!
//! A pure transition table plus the events that drive it. The store applies
//! transitions inside a single database transaction that also checks the
//! optimistic-concurrency `version` precondition and appends the audit row
//! (see `db::deals::apply_transition`).

use crate::models::DealStatus;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("cannot apply {event:?} to a deal in {from} state")]
pub struct InvalidStateTransition {
    pub from: DealStatus,
    pub event: DealEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealEvent {
    ProvisionWallet,
    DepositDetected,
    DeadlineExpiredNoDeposit,
    BuyerReleaseApproved,
    DeadlineReachedAutoRelease,
    SellerRefundApproved,
    DeadlineGraceExpiredAutoRefund,
    DisputeOpened,
    DisputeCancelled,
    ArbiterRulesForBuyer,
    ArbiterRulesForSeller,
    BuyerCancelledBeforeFunding,
    UnrecoverableFailure,
}

/// Applies `event` to `current` and returns the resulting status, or
/// `InvalidStateTransition` if the event is not legal from that state.
pub fn transition(current: DealStatus, event: DealEvent) -> Result<DealStatus, InvalidStateTransition> {
    use DealEvent::*;
    use DealStatus::*;

    let next = match (current, event) {
        (Created, ProvisionWallet) => AwaitingDeposit,
        (Created, BuyerCancelledBeforeFunding) => Cancelled,
        (AwaitingDeposit, DepositDetected) => Funded,
        (AwaitingDeposit, DeadlineExpiredNoDeposit) => Cancelled,
        (AwaitingDeposit, BuyerCancelledBeforeFunding) => Cancelled,

        (Funded, BuyerReleaseApproved) => Released,
        (Funded, DeadlineReachedAutoRelease) => Released,
        (Funded, SellerRefundApproved) => Refunded,
        (Funded, DeadlineGraceExpiredAutoRefund) => Refunded,
        (Funded, DisputeOpened) => Disputed,

        (Disputed, ArbiterRulesForBuyer) => ResolvedBuyer,
        (Disputed, ArbiterRulesForSeller) => ResolvedSeller,
        (Disputed, DisputeCancelled) => Funded,

        (_, UnrecoverableFailure) => Failed,

        (from, event) => return Err(InvalidStateTransition { from, event }),
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use DealEvent::*;
    use DealStatus::*;

    #[test]
    fn happy_path_release() {
        let s = transition(Created, ProvisionWallet).unwrap();
        assert_eq!(s, AwaitingDeposit);
        let s = transition(s, DepositDetected).unwrap();
        assert_eq!(s, Funded);
        let s = transition(s, BuyerReleaseApproved).unwrap();
        assert_eq!(s, Released);
        assert!(s.is_terminal());
    }

    #[test]
    fn dispute_path_resolves_to_seller() {
        let s = transition(Funded, DisputeOpened).unwrap();
        assert_eq!(s, Disputed);
        let s = transition(s, ArbiterRulesForSeller).unwrap();
        assert_eq!(s, ResolvedSeller);
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let err = transition(Released, DepositDetected).unwrap_err();
        assert_eq!(err.from, Released);
    }

    #[test]
    fn cancelled_dispute_returns_to_funded() {
        let s = transition(Funded, DisputeOpened).unwrap();
        assert_eq!(s, Disputed);
        let s = transition(s, DisputeCancelled).unwrap();
        assert_eq!(s, Funded);
    }

    #[test]
    fn any_state_can_fail() {
        assert_eq!(transition(AwaitingDeposit, UnrecoverableFailure).unwrap(), Failed);
        assert_eq!(transition(Disputed, UnrecoverableFailure).unwrap(), Failed);
    }
}
