//! Contract events
//!
//! Events are immutable records emitted by committed operations. External
//! collaborators (CLI, indexers, audit dashboards) render state from them.

use procurement_types::amount::Amount;
use procurement_types::hash::{Hash32, Nonce};
use procurement_types::ids::{Address, TenderId};
use procurement_types::time::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tender opened for bidding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderCreated {
    pub tender_id: TenderId,
    pub description_hash: Hash32,
    pub max_budget: Amount,
    pub bid_deadline: Timestamp,
    pub reveal_deadline: Timestamp,
    pub milestone_amounts: Vec<Amount>,
}

/// Sealed bid committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidSubmitted {
    pub tender_id: TenderId,
    pub bidder: Address,
    pub commit_hash: Hash32,
}

/// Bid opened and checked against its commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidRevealed {
    pub tender_id: TenderId,
    pub bidder: Address,
    pub amount: Amount,
    pub nonce: Nonce,
}

/// Lowest valid bid awarded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerSelected {
    pub tender_id: TenderId,
    pub winner: Address,
    pub winning_amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneApproved {
    pub tender_id: TenderId,
    pub milestone_index: usize,
    pub auditor: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReleased {
    pub tender_id: TenderId,
    pub milestone_index: usize,
    pub winner: Address,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditorAdded {
    pub auditor: Address,
}

/// Value deposited into escrow; `balance` is the balance after the deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowFunded {
    pub funder: Address,
    pub amount: Amount,
    pub balance: Amount,
}

/// Enum wrapper for all contract events, enabling uniform handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcurementEvent {
    TenderCreated(TenderCreated),
    BidSubmitted(BidSubmitted),
    BidRevealed(BidRevealed),
    WinnerSelected(WinnerSelected),
    MilestoneApproved(MilestoneApproved),
    PaymentReleased(PaymentReleased),
    AuditorAdded(AuditorAdded),
    EscrowFunded(EscrowFunded),
}

impl ProcurementEvent {
    /// Stable event name used by journals and subscribers.
    pub fn event_type(&self) -> &'static str {
        match self {
            ProcurementEvent::TenderCreated(_) => "TenderCreated",
            ProcurementEvent::BidSubmitted(_) => "BidSubmitted",
            ProcurementEvent::BidRevealed(_) => "BidRevealed",
            ProcurementEvent::WinnerSelected(_) => "WinnerSelected",
            ProcurementEvent::MilestoneApproved(_) => "MilestoneApproved",
            ProcurementEvent::PaymentReleased(_) => "PaymentReleased",
            ProcurementEvent::AuditorAdded(_) => "AuditorAdded",
            ProcurementEvent::EscrowFunded(_) => "EscrowFunded",
        }
    }

    /// Tender the event concerns, if any.
    pub fn tender_id(&self) -> Option<TenderId> {
        match self {
            ProcurementEvent::TenderCreated(e) => Some(e.tender_id),
            ProcurementEvent::BidSubmitted(e) => Some(e.tender_id),
            ProcurementEvent::BidRevealed(e) => Some(e.tender_id),
            ProcurementEvent::WinnerSelected(e) => Some(e.tender_id),
            ProcurementEvent::MilestoneApproved(e) => Some(e.tender_id),
            ProcurementEvent::PaymentReleased(e) => Some(e.tender_id),
            ProcurementEvent::AuditorAdded(_) | ProcurementEvent::EscrowFunded(_) => None,
        }
    }
}

/// An emitted event with its position in the global event sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Gapless, starting at 1. Rolled-back calls give their numbers back.
    pub sequence: u64,
    pub event_id: Uuid,
    pub emitted_at: Timestamp,
    pub event: ProcurementEvent,
}

/// Subscriber notified of committed events.
///
/// Records arrive in sequence order, once the outermost operation that
/// produced them has committed.
pub trait EventSink: Send {
    fn on_event(&mut self, record: &EventRecord);
}
