//! Security Hardening Tests
//!
//! Adversarial testing of the payout path and the bidding rules:
//! - Reentrant payout hooks
//! - Failing transfers and rollback
//! - Permission escalation
//! - Replayed and forged reveals
//! - Event delivery under rollback
//! - Fuzz testing (proptest)

use std::sync::{Arc, Mutex};

use procurement_contracts::commitment::compute_commitment;
use procurement_contracts::{
    ErrorKind, EventRecord, EventSink, PayoutHook, PayoutInstruction, PayoutPolicy, Procurement,
    ProcurementConfig, ProcurementError, ProcurementEvent, RecordedPayouts, TransferError,
    CONTRACT_ABI_VERSION,
};
use procurement_types::amount::Amount;
use procurement_types::hash::{Hash32, Nonce};
use procurement_types::ids::{Address, TenderId};
use procurement_types::time::{ManualClock, Timestamp};

// ═══════════════════════════════════════════════════════════════════
// Reentrancy Tests
// ═══════════════════════════════════════════════════════════════════

/// Tries to release the same milestone again from inside the transfer.
struct ReentrantHook {
    attacker: Address,
    nested: Vec<Result<Amount, ProcurementError>>,
    received: Vec<PayoutInstruction>,
}

impl PayoutHook for ReentrantHook {
    fn transfer(
        &mut self,
        contract: &mut Procurement,
        instruction: &PayoutInstruction,
    ) -> Result<(), TransferError> {
        self.received.push(*instruction);
        let mut inner = RecordedPayouts::new();
        let result = contract.release_payment(
            &self.attacker,
            instruction.tender_id,
            instruction.milestone_index,
            &mut inner,
        );
        self.nested.push(result);
        Ok(())
    }
}

#[test]
fn test_reentrant_release_pays_once() {
    let (mut c, id) = awarded_tender(PayoutPolicy::Anyone);
    c.fund_escrow(&owner(), Amount::new(10)).unwrap();
    c.approve_milestone(&owner(), id, 0).unwrap();

    let mut hook = ReentrantHook {
        attacker: winner(),
        nested: Vec::new(),
        received: Vec::new(),
    };
    let paid = c.release_payment(&winner(), id, 0, &mut hook).unwrap();

    assert_eq!(paid, Amount::new(3));
    assert_eq!(hook.received.len(), 1, "Hook must be invoked exactly once");
    assert_eq!(hook.nested.len(), 1);
    let nested_err = hook.nested[0].clone().unwrap_err();
    assert_eq!(nested_err.kind(), ErrorKind::State);
    assert_eq!(c.escrow_balance(), Amount::new(7));
    assert_eq!(c.total_released(id), Ok(Amount::new(3)));
}

/// Releases another milestone of the same tender during the transfer.
struct CrossMilestoneHook {
    other_index: usize,
    inner: RecordedPayouts,
    fail_after: bool,
}

impl PayoutHook for CrossMilestoneHook {
    fn transfer(
        &mut self,
        contract: &mut Procurement,
        instruction: &PayoutInstruction,
    ) -> Result<(), TransferError> {
        if instruction.milestone_index != self.other_index {
            contract
                .release_payment(
                    &instruction.recipient,
                    instruction.tender_id,
                    self.other_index,
                    &mut self.inner,
                )
                .map_err(|err| TransferError::new(err.to_string()))?;
        }
        if self.fail_after {
            return Err(TransferError::new("recipient rejected"));
        }
        Ok(())
    }
}

#[test]
fn test_nested_release_of_other_milestone_commits_together() {
    let (mut c, id) = awarded_tender(PayoutPolicy::Anyone);
    c.fund_escrow(&owner(), Amount::new(10)).unwrap();
    c.approve_milestone(&owner(), id, 0).unwrap();
    c.approve_milestone(&owner(), id, 1).unwrap();

    let mut hook = CrossMilestoneHook {
        other_index: 1,
        inner: RecordedPayouts::new(),
        fail_after: false,
    };
    c.release_payment(&owner(), id, 0, &mut hook).unwrap();

    assert!(c.get_milestone(id, 0).unwrap().paid);
    assert!(c.get_milestone(id, 1).unwrap().paid);
    assert_eq!(c.escrow_balance(), Amount::new(3));
    assert_eq!(hook.inner.total_to(&winner()), Amount::new(4));
}

#[test]
fn test_failing_transfer_rolls_back_nested_work() {
    let (mut c, id) = awarded_tender(PayoutPolicy::Anyone);
    c.fund_escrow(&owner(), Amount::new(10)).unwrap();
    c.approve_milestone(&owner(), id, 0).unwrap();
    c.approve_milestone(&owner(), id, 1).unwrap();
    let state_before = c.state().clone();
    let events_before = c.events().to_vec();

    let mut hook = CrossMilestoneHook {
        other_index: 1,
        inner: RecordedPayouts::new(),
        fail_after: true,
    };
    let err = c.release_payment(&owner(), id, 0, &mut hook).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transfer);
    assert_eq!(*c.state(), state_before, "Ledger must be untouched");
    assert_eq!(c.events(), events_before.as_slice());

    // Guard released: a well-behaved retry goes through
    let mut payouts = RecordedPayouts::new();
    assert_eq!(c.release_payment(&owner(), id, 0, &mut payouts), Ok(Amount::new(3)));
}

// ═══════════════════════════════════════════════════════════════════
// Simulate Malicious Recipient
// ═══════════════════════════════════════════════════════════════════

/// Grabs whatever it can during the transfer, then rejects it.
struct GreedyRejectingHook {
    auditor_to_add: Address,
}

impl PayoutHook for GreedyRejectingHook {
    fn transfer(
        &mut self,
        contract: &mut Procurement,
        instruction: &PayoutInstruction,
    ) -> Result<(), TransferError> {
        let _ = contract.fund_escrow(&instruction.recipient, Amount::new(100));
        let _ = contract.add_auditor(&instruction.recipient, self.auditor_to_add);
        Err(TransferError::new("out of gas"))
    }
}

#[test]
fn test_rejected_transfer_undoes_callbacks() {
    let (mut c, id) = awarded_tender(PayoutPolicy::Anyone);
    c.fund_escrow(&owner(), Amount::new(10)).unwrap();
    c.approve_milestone(&owner(), id, 2).unwrap();

    let mut hook = GreedyRejectingHook {
        auditor_to_add: winner(),
    };
    let err = c.release_payment(&owner(), id, 2, &mut hook).unwrap_err();

    assert_eq!(
        err,
        ProcurementError::TransferFailed {
            reason: "out of gas".to_string()
        }
    );
    assert_eq!(c.escrow_balance(), Amount::new(10));
    assert!(!c.get_milestone(id, 2).unwrap().paid);
    assert!(c.get_milestone(id, 2).unwrap().approved);
    assert!(!c.is_auditor(&winner()));
}

// ═══════════════════════════════════════════════════════════════════
// Permission Tests
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_winner_cannot_self_approve() {
    let (mut c, id) = awarded_tender(PayoutPolicy::Anyone);
    let err = c.approve_milestone(&winner(), id, 0).unwrap_err();
    assert_eq!(err, ProcurementError::NotAuditor { caller: winner() });
}

#[test]
fn test_non_auditor_rejected_in_every_milestone_state() {
    let (mut c, id) = awarded_tender(PayoutPolicy::Anyone);
    c.approve_milestone(&owner(), id, 1).unwrap();
    let unawarded = c
        .create_tender(&owner(), Hash32::ZERO, Amount::new(5), 5, 5, &[Amount::new(5)])
        .unwrap();
    let outsider = bidder(7);
    let expected = ProcurementError::NotAuditor { caller: outsider };

    // No winner yet, already approved, out of range, unknown tender
    let cases = [(unawarded, 0), (id, 1), (id, 3), (TenderId::new(99), 0)];
    for (tender_id, index) in cases {
        let err = c.approve_milestone(&outsider, tender_id, index).unwrap_err();
        assert_eq!(err, expected, "tender {tender_id} milestone {index}");
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }
    for (tender_id, index) in [(id, 1), (id, 3)] {
        let err = c.approve_milestone(&winner(), tender_id, index).unwrap_err();
        assert_eq!(err, ProcurementError::NotAuditor { caller: winner() });
    }
    assert!(!c.get_tender(id).unwrap().milestones()[0].approved);
}

#[test]
fn test_non_owner_cannot_grant_auditor() {
    let (mut c, _) = awarded_tender(PayoutPolicy::Anyone);
    let err = c.add_auditor(&winner(), winner()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(c.auditors(), vec![owner()]);
}

#[test]
fn test_non_owner_cannot_select_winner() {
    let clock = ManualClock::new(Timestamp::from_unix_seconds(0));
    let mut c = Procurement::new(owner(), clock.clone());
    let id = c
        .create_tender(&owner(), Hash32::ZERO, Amount::new(5), 5, 5, &[])
        .unwrap();
    clock.advance(10);
    let err = c.select_winner(&winner(), id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
}

#[test]
fn test_owner_only_payout_rejects_winner() {
    let (mut c, id) = awarded_tender(PayoutPolicy::OwnerOnly);
    c.fund_escrow(&owner(), Amount::new(10)).unwrap();
    c.approve_milestone(&owner(), id, 0).unwrap();
    let err = c
        .release_payment(&winner(), id, 0, &mut RecordedPayouts::new())
        .unwrap_err();
    assert_eq!(err, ProcurementError::PayoutNotPermitted { caller: winner() });
}

// ═══════════════════════════════════════════════════════════════════
// Simulate Replayed / Forged Reveals
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_reveal_of_someone_elses_commitment() {
    let clock = ManualClock::new(Timestamp::from_unix_seconds(0));
    let mut c = Procurement::new(owner(), clock.clone());
    let id = c
        .create_tender(&owner(), Hash32::ZERO, Amount::new(10), 5, 5, &[])
        .unwrap();
    let nonce = Nonce::random();
    let commit = compute_commitment(Amount::new(4), &nonce);
    c.submit_bid(&bidder(1), id, commit).unwrap();
    // Copy-cat submits the identical commitment
    c.submit_bid(&bidder(2), id, commit).unwrap();
    clock.advance(5);

    c.reveal_bid(&bidder(1), id, Amount::new(4), nonce).unwrap();
    // Watching the first reveal lets the copy-cat open too; each bidder's
    // reveal is checked against their own commitment only.
    assert_eq!(c.reveal_bid(&bidder(2), id, Amount::new(4), nonce), Ok(true));
    clock.advance(5);
    // Equal amounts: the earlier reveal wins
    assert_eq!(c.select_winner(&owner(), id), Ok((bidder(1), Amount::new(4))));
}

#[test]
fn test_cannot_reveal_different_amount_than_committed() {
    let clock = ManualClock::new(Timestamp::from_unix_seconds(0));
    let mut c = Procurement::new(owner(), clock.clone());
    let id = c
        .create_tender(&owner(), Hash32::ZERO, Amount::new(10), 5, 5, &[])
        .unwrap();
    let nonce = Nonce::random();
    c.submit_bid(&bidder(1), id, compute_commitment(Amount::new(9), &nonce))
        .unwrap();
    clock.advance(5);
    assert_eq!(
        c.reveal_bid(&bidder(1), id, Amount::new(1), nonce),
        Err(ProcurementError::InvalidReveal)
    );
}

#[test]
fn test_no_bids_after_award() {
    let (mut c, id) = awarded_tender(PayoutPolicy::Anyone);
    let err = c.submit_bid(&bidder(5), id, Hash32::ZERO).unwrap_err();
    assert_eq!(err, ProcurementError::TenderInactive(id));
}

// ═══════════════════════════════════════════════════════════════════
// Event Delivery
// ═══════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<EventRecord>>>);

impl EventSink for SharedSink {
    fn on_event(&mut self, record: &EventRecord) {
        self.0.lock().unwrap().push(record.clone());
    }
}

#[test]
fn test_subscribers_never_see_rolled_back_events() {
    let (mut c, id) = awarded_tender(PayoutPolicy::Anyone);
    c.fund_escrow(&owner(), Amount::new(10)).unwrap();
    c.approve_milestone(&owner(), id, 0).unwrap();
    c.approve_milestone(&owner(), id, 1).unwrap();

    let sink = SharedSink::default();
    c.subscribe(Box::new(sink.clone()));

    let mut failing = CrossMilestoneHook {
        other_index: 1,
        inner: RecordedPayouts::new(),
        fail_after: true,
    };
    assert!(c.release_payment(&owner(), id, 0, &mut failing).is_err());
    assert!(sink.0.lock().unwrap().is_empty());

    let mut succeeding = CrossMilestoneHook {
        other_index: 1,
        inner: RecordedPayouts::new(),
        fail_after: false,
    };
    c.release_payment(&owner(), id, 0, &mut succeeding).unwrap();

    let delivered = sink.0.lock().unwrap();
    let released: Vec<usize> = delivered
        .iter()
        .filter_map(|r| match &r.event {
            ProcurementEvent::PaymentReleased(e) => Some(e.milestone_index),
            _ => None,
        })
        .collect();
    // Outer release is recorded before its hook runs
    assert_eq!(released, vec![0, 1]);
    assert!(delivered.windows(2).all(|w| w[1].sequence == w[0].sequence + 1));
}

#[test]
fn test_event_sequence_is_gapless_after_rollback() {
    let (mut c, id) = awarded_tender(PayoutPolicy::Anyone);
    c.fund_escrow(&owner(), Amount::new(10)).unwrap();
    c.approve_milestone(&owner(), id, 0).unwrap();
    let mut hook = GreedyRejectingHook {
        auditor_to_add: bidder(9),
    };
    assert!(c.release_payment(&owner(), id, 0, &mut hook).is_err());
    c.release_payment(&owner(), id, 0, &mut RecordedPayouts::new())
        .unwrap();

    let sequences: Vec<u64> = c.events().iter().map(|r| r.sequence).collect();
    let expected: Vec<u64> = (1..=sequences.len() as u64).collect();
    assert_eq!(sequences, expected);
}

// ═══════════════════════════════════════════════════════════════════
// Test Upgrade Path (ABI Freeze)
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_abi_version_frozen() {
    assert_eq!(CONTRACT_ABI_VERSION, "1.0.0");
}

// ═══════════════════════════════════════════════════════════════════
// Fuzz Tests (Proptest)
// ═══════════════════════════════════════════════════════════════════

mod fuzz {
    use super::*;
    use proptest::prelude::*;

    fn bid_amount() -> impl Strategy<Value = u128> {
        1u128..50u128
    }

    proptest! {
        /// Invariant: a reveal is accepted iff it opens the commitment.
        #[test]
        fn fuzz_reveal_accepted_iff_matching(
            committed in bid_amount(),
            revealed in bid_amount(),
            nonce_bytes in any::<[u8; 32]>(),
            other_bytes in any::<[u8; 32]>(),
        ) {
            let clock = ManualClock::new(Timestamp::from_unix_seconds(0));
            let mut c = Procurement::new(owner(), clock.clone());
            let id = c.create_tender(&owner(), Hash32::ZERO, Amount::new(100), 5, 5, &[]).unwrap();
            let nonce = Nonce::new(nonce_bytes);
            c.submit_bid(&bidder(1), id, compute_commitment(Amount::new(committed), &nonce)).unwrap();
            clock.advance(5);

            let reveal_nonce = Nonce::new(other_bytes);
            let result = c.reveal_bid(&bidder(1), id, Amount::new(revealed), reveal_nonce);
            let matches = committed == revealed && nonce_bytes == other_bytes;
            prop_assert_eq!(result.is_ok(), matches);
        }

        /// Invariant: the winner holds the minimum valid revealed amount.
        #[test]
        fn fuzz_winner_is_lowest_valid(
            amounts in prop::collection::vec(1u128..30u128, 1..8),
            budget in 1u128..30u128,
        ) {
            let clock = ManualClock::new(Timestamp::from_unix_seconds(0));
            let mut c = Procurement::new(owner(), clock.clone());
            let id = c.create_tender(&owner(), Hash32::ZERO, Amount::new(budget), 5, 5, &[]).unwrap();

            let mut nonces = Vec::new();
            for (i, amount) in amounts.iter().enumerate() {
                let nonce = Nonce::random();
                c.submit_bid(&bidder(i as u8 + 1), id, compute_commitment(Amount::new(*amount), &nonce)).unwrap();
                nonces.push(nonce);
            }
            clock.advance(5);
            for (i, amount) in amounts.iter().enumerate() {
                c.reveal_bid(&bidder(i as u8 + 1), id, Amount::new(*amount), nonces[i]).unwrap();
            }
            clock.advance(5);

            let best = amounts.iter().copied().filter(|a| *a <= budget).min();
            match (c.select_winner(&owner(), id), best) {
                (Ok((winner, amount)), Some(expected)) => {
                    prop_assert_eq!(amount, Amount::new(expected));
                    // First revealer among those tied at the minimum
                    let first = amounts.iter().position(|a| *a == expected).unwrap();
                    prop_assert_eq!(winner, bidder(first as u8 + 1));
                }
                (Err(err), None) => prop_assert_eq!(err, ProcurementError::NoValidBids(id)),
                (result, expected) => prop_assert!(false, "{:?} vs {:?}", result, expected),
            }
        }

        /// Invariant: escrow + released always equals total funded.
        #[test]
        fn fuzz_escrow_conservation(
            funding in 0u128..20u128,
            order in prop::collection::vec(0usize..3, 1..10),
        ) {
            let (mut c, id) = awarded_tender(PayoutPolicy::Anyone);
            if funding > 0 {
                c.fund_escrow(&owner(), Amount::new(funding)).unwrap();
            }
            for index in 0..3 {
                c.approve_milestone(&owner(), id, index).unwrap();
            }
            let mut hook = RecordedPayouts::new();
            for index in order {
                let _ = c.release_payment(&owner(), id, index, &mut hook);
                let released = c.total_released(id).unwrap();
                prop_assert_eq!(
                    c.escrow_balance().base_units() + released.base_units(),
                    funding
                );
                prop_assert_eq!(hook.total_to(&winner()), released);
            }
        }

        /// Invariant: approved-or-paid milestones never exceed the budget.
        #[test]
        fn fuzz_committed_within_budget(
            funding in 1u128..20u128,
            steps in prop::collection::vec((any::<bool>(), 0usize..4), 1..16),
        ) {
            let (mut c, id) = awarded_tender(PayoutPolicy::Anyone);
            c.fund_escrow(&owner(), Amount::new(funding)).unwrap();
            let mut hook = RecordedPayouts::new();
            for (approve, index) in steps {
                if approve {
                    let _ = c.approve_milestone(&owner(), id, index);
                } else {
                    let _ = c.release_payment(&owner(), id, index, &mut hook);
                }
                let tender = c.get_tender(id).unwrap();
                prop_assert!(tender.committed_total() <= tender.max_budget);
                prop_assert!(tender.released_total() <= tender.committed_total());
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════

fn owner() -> Address {
    Address::repeat_byte(0xaa)
}

fn winner() -> Address {
    bidder(2)
}

fn bidder(n: u8) -> Address {
    Address::repeat_byte(n)
}

/// One tender, milestones [3, 4, 3] under budget 10, awarded to `winner()`.
fn awarded_tender(policy: PayoutPolicy) -> (Procurement, TenderId) {
    let clock = ManualClock::new(Timestamp::from_unix_seconds(0));
    let config = ProcurementConfig {
        payout_policy: policy,
        ..Default::default()
    };
    let mut c = Procurement::with_config(owner(), clock.clone(), config);
    let id = c
        .create_tender(
            &owner(),
            Hash32::ZERO,
            Amount::new(10),
            60,
            60,
            &[Amount::new(3), Amount::new(4), Amount::new(3)],
        )
        .unwrap();

    let nonce = Nonce::random();
    c.submit_bid(&winner(), id, compute_commitment(Amount::new(7), &nonce))
        .unwrap();
    clock.advance(60);
    c.reveal_bid(&winner(), id, Amount::new(7), nonce).unwrap();
    clock.advance(60);
    c.select_winner(&owner(), id).unwrap();
    (c, id)
}
