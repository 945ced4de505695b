//! Contract error types
//!
//! One error enum for every procurement operation. Each variant belongs to
//! exactly one [`ErrorKind`] so callers can branch on the category without
//! matching individual variants.

use procurement_types::amount::Amount;
use procurement_types::ids::{Address, TenderId};
use procurement_types::time::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error category surfaced to external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Wrong caller role
    Authorization,
    /// Malformed or out-of-policy input
    Validation,
    /// Outside the operation's deadline window
    Timing,
    /// Lifecycle invariant would be violated
    State,
    /// Escrow cannot cover the payout
    InsufficientFunds,
    /// Outward transfer rejected by the recipient side
    Transfer,
}

/// Errors returned by procurement operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcurementError {
    // ── Authorization ──
    #[error("Unauthorized: {caller} is not the owner")]
    NotOwner { caller: Address },

    #[error("Unauthorized: {caller} is not an auditor")]
    NotAuditor { caller: Address },

    #[error("Unauthorized: {caller} may not release payments")]
    PayoutNotPermitted { caller: Address },

    // ── Validation ──
    #[error("Milestones exceed budget: total {total}, budget {max_budget}")]
    MilestonesExceedBudget { total: Amount, max_budget: Amount },

    #[error("Milestone total overflows")]
    MilestoneOverflow,

    #[error("Too many milestones: {count} exceeds limit {limit}")]
    TooManyMilestones { count: usize, limit: usize },

    #[error("Invalid duration: {0}")]
    InvalidDuration(&'static str),

    #[error("Deadline overflows the clock range")]
    DeadlineOverflow,

    #[error("Invalid reveal")]
    InvalidReveal,

    #[error("Funding amount must be positive")]
    InvalidFundingAmount,

    #[error("Escrow balance overflows")]
    EscrowOverflow,

    // ── Timing ──
    #[error("Bid submission closed at {deadline} (now {now})")]
    BiddingClosed { deadline: Timestamp, now: Timestamp },

    #[error("Reveal phase opens at {opens_at} (now {now})")]
    RevealNotOpen { opens_at: Timestamp, now: Timestamp },

    #[error("Reveal phase closed at {closed_at} (now {now})")]
    RevealClosed { closed_at: Timestamp, now: Timestamp },

    #[error("Reveal phase still open until {closes_at} (now {now})")]
    RevealStillOpen { closes_at: Timestamp, now: Timestamp },

    // ── State ──
    #[error("Tender not found: {0}")]
    TenderNotFound(TenderId),

    #[error("Tender not active: {0}")]
    TenderInactive(TenderId),

    #[error("Tender id space exhausted")]
    TenderIdsExhausted,

    #[error("Already submitted: {bidder} on tender {tender_id}")]
    AlreadySubmitted { tender_id: TenderId, bidder: Address },

    #[error("No bid from {bidder} on tender {tender_id}")]
    NoBid { tender_id: TenderId, bidder: Address },

    #[error("Already revealed: {bidder} on tender {tender_id}")]
    AlreadyRevealed { tender_id: TenderId, bidder: Address },

    #[error("Winner already selected for tender {0}")]
    WinnerAlreadySelected(TenderId),

    #[error("No valid bids for tender {0}")]
    NoValidBids(TenderId),

    #[error("No winner selected for tender {0}")]
    NoWinner(TenderId),

    #[error("Milestone index {index} out of range ({len} milestones)")]
    MilestoneOutOfRange { index: usize, len: usize },

    #[error("Milestone {index} of tender {tender_id} already approved")]
    AlreadyApproved { tender_id: TenderId, index: usize },

    #[error("Milestone {index} of tender {tender_id} not approved")]
    NotApproved { tender_id: TenderId, index: usize },

    #[error("Milestone {index} of tender {tender_id} already paid")]
    AlreadyPaid { tender_id: TenderId, index: usize },

    #[error("Reentrancy detected on milestone {index} of tender {tender_id}")]
    Reentrancy { tender_id: TenderId, index: usize },

    // ── Funds ──
    #[error("Insufficient escrow: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    // ── Transfer ──
    #[error("Transfer failed: {reason}")]
    TransferFailed { reason: String },
}

impl ProcurementError {
    pub fn kind(&self) -> ErrorKind {
        use ProcurementError::*;
        match self {
            NotOwner { .. } | NotAuditor { .. } | PayoutNotPermitted { .. } => {
                ErrorKind::Authorization
            }
            MilestonesExceedBudget { .. }
            | MilestoneOverflow
            | TooManyMilestones { .. }
            | InvalidDuration(_)
            | DeadlineOverflow
            | InvalidReveal
            | InvalidFundingAmount
            | EscrowOverflow => ErrorKind::Validation,
            BiddingClosed { .. }
            | RevealNotOpen { .. }
            | RevealClosed { .. }
            | RevealStillOpen { .. } => ErrorKind::Timing,
            TenderNotFound(_)
            | TenderInactive(_)
            | TenderIdsExhausted
            | AlreadySubmitted { .. }
            | NoBid { .. }
            | AlreadyRevealed { .. }
            | WinnerAlreadySelected(_)
            | NoValidBids(_)
            | NoWinner(_)
            | MilestoneOutOfRange { .. }
            | AlreadyApproved { .. }
            | NotApproved { .. }
            | AlreadyPaid { .. }
            | Reentrancy { .. } => ErrorKind::State,
            InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            TransferFailed { .. } => ErrorKind::Transfer,
        }
    }
}

/// Failure reported by a payout hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct TransferError {
    pub reason: String,
}

impl TransferError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<TransferError> for ProcurementError {
    fn from(err: TransferError) -> Self {
        ProcurementError::TransferFailed { reason: err.reason }
    }
}
