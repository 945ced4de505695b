//! Tender registry and bid ledger
//!
//! Owned arenas keyed by integer and composite identifiers:
//! - `TenderRegistry`: tender counter + Tender-by-id (milestones live inside
//!   their tender and are addressed by `(tender_id, index)`)
//! - `BidLedger`: Bid-by-(tender_id, bidder) + the global reveal counter
//!
//! `BTreeMap` keeps iteration deterministic, so winner scans and snapshots
//! never depend on hash order.

use procurement_types::amount::Amount;
use procurement_types::hash::Hash32;
use procurement_types::ids::{Address, TenderId};
use procurement_types::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ProcurementError;

/// Composite key of a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MilestoneKey {
    pub tender_id: TenderId,
    pub index: usize,
}

impl MilestoneKey {
    pub fn new(tender_id: TenderId, index: usize) -> Self {
        Self { tender_id, index }
    }
}

/// A pre-priced unit of deliverable work.
///
/// `paid` implies `approved`; both only ever go from false to true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub amount: Amount,
    pub approved: bool,
    pub paid: bool,
}

impl Milestone {
    pub fn new(amount: Amount) -> Self {
        Self {
            amount,
            approved: false,
            paid: false,
        }
    }
}

/// A tender record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tender {
    pub id: TenderId,
    pub description_hash: Hash32,
    pub max_budget: Amount,
    pub created_at: Timestamp,
    pub bid_deadline: Timestamp,
    pub reveal_deadline: Timestamp,
    pub winner: Option<Address>,
    pub winning_amount: Option<Amount>,
    pub active: bool,
    // Fixed at creation; only flags inside change.
    milestones: Vec<Milestone>,
}

impl Tender {
    pub fn new(
        id: TenderId,
        description_hash: Hash32,
        max_budget: Amount,
        created_at: Timestamp,
        bid_deadline: Timestamp,
        reveal_deadline: Timestamp,
        milestone_amounts: &[Amount],
    ) -> Self {
        Self {
            id,
            description_hash,
            max_budget,
            created_at,
            bid_deadline,
            reveal_deadline,
            winner: None,
            winning_amount: None,
            active: true,
            milestones: milestone_amounts.iter().copied().map(Milestone::new).collect(),
        }
    }

    /// Replace the milestone list, as when restoring from storage.
    ///
    /// The budget bound still holds; a milestone marked paid must also be
    /// approved.
    pub fn with_milestones(mut self, milestones: Vec<Milestone>) -> Result<Self, ProcurementError> {
        let total = Amount::checked_sum(milestones.iter().map(|m| m.amount))
            .ok_or(ProcurementError::MilestoneOverflow)?;
        if total > self.max_budget {
            return Err(ProcurementError::MilestonesExceedBudget {
                total,
                max_budget: self.max_budget,
            });
        }
        if let Some(index) = milestones.iter().position(|m| m.paid && !m.approved) {
            return Err(ProcurementError::NotApproved {
                tender_id: self.id,
                index,
            });
        }
        self.milestones = milestones;
        Ok(self)
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn milestone(&self, index: usize) -> Option<&Milestone> {
        self.milestones.get(index)
    }

    pub(crate) fn milestone_mut(&mut self, index: usize) -> Option<&mut Milestone> {
        self.milestones.get_mut(index)
    }

    /// Milestone lookup that reports the range on failure.
    pub fn require_milestone(&self, index: usize) -> Result<&Milestone, ProcurementError> {
        self.milestones
            .get(index)
            .ok_or(ProcurementError::MilestoneOutOfRange {
                index,
                len: self.milestones.len(),
            })
    }

    /// Sum of milestones that are approved or paid.
    pub fn committed_total(&self) -> Amount {
        Amount::checked_sum(
            self.milestones
                .iter()
                .filter(|m| m.approved || m.paid)
                .map(|m| m.amount),
        )
        .unwrap_or(self.max_budget)
    }

    /// Sum of milestones already paid out.
    pub fn released_total(&self) -> Amount {
        Amount::checked_sum(self.milestones.iter().filter(|m| m.paid).map(|m| m.amount))
            .unwrap_or(self.max_budget)
    }
}

/// A sealed bid, later opened by its bidder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub tender_id: TenderId,
    pub bidder: Address,
    pub commit_hash: Hash32,
    pub submitted_at: Timestamp,
    pub revealed_amount: Option<Amount>,
    /// Meaningful only once revealed.
    pub valid: bool,
    /// Global reveal order; lower revealed earlier.
    pub reveal_sequence: Option<u64>,
}

impl Bid {
    pub fn new(tender_id: TenderId, bidder: Address, commit_hash: Hash32, submitted_at: Timestamp) -> Self {
        Self {
            tender_id,
            bidder,
            commit_hash,
            submitted_at,
            revealed_amount: None,
            valid: false,
            reveal_sequence: None,
        }
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed_amount.is_some()
    }
}

/// Durable Tender-by-id store plus the id counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderRegistry {
    next_id: TenderId,
    tenders: BTreeMap<TenderId, Tender>,
}

impl TenderRegistry {
    pub fn new() -> Self {
        Self {
            next_id: TenderId::FIRST,
            tenders: BTreeMap::new(),
        }
    }

    /// Rebuild from persisted parts.
    pub fn from_parts(next_id: TenderId, tenders: BTreeMap<TenderId, Tender>) -> Self {
        Self { next_id, tenders }
    }

    /// The id the next successful creation will receive.
    pub fn peek_next_id(&self) -> TenderId {
        self.next_id
    }

    /// Take the next id. Only call once creation can no longer fail.
    pub fn allocate_id(&mut self) -> Result<TenderId, ProcurementError> {
        let id = self.next_id;
        self.next_id = id.next().ok_or(ProcurementError::TenderIdsExhausted)?;
        Ok(id)
    }

    pub fn insert(&mut self, tender: Tender) {
        self.tenders.insert(tender.id, tender);
    }

    pub fn get(&self, id: TenderId) -> Option<&Tender> {
        self.tenders.get(&id)
    }

    pub fn get_mut(&mut self, id: TenderId) -> Option<&mut Tender> {
        self.tenders.get_mut(&id)
    }

    pub fn require(&self, id: TenderId) -> Result<&Tender, ProcurementError> {
        self.tenders.get(&id).ok_or(ProcurementError::TenderNotFound(id))
    }

    pub fn require_mut(&mut self, id: TenderId) -> Result<&mut Tender, ProcurementError> {
        self.tenders
            .get_mut(&id)
            .ok_or(ProcurementError::TenderNotFound(id))
    }

    /// Number of tenders created so far.
    pub fn count(&self) -> usize {
        self.tenders.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tender> {
        self.tenders.values()
    }
}

impl Default for TenderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Durable Bid-by-(tender_id, bidder) store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidLedger {
    bids: BTreeMap<(TenderId, Address), Bid>,
    next_reveal_sequence: u64,
}

impl BidLedger {
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            next_reveal_sequence: 1,
        }
    }

    pub fn from_parts(bids: BTreeMap<(TenderId, Address), Bid>, next_reveal_sequence: u64) -> Self {
        Self {
            bids,
            next_reveal_sequence,
        }
    }

    pub fn next_reveal_sequence(&self) -> u64 {
        self.next_reveal_sequence
    }

    pub(crate) fn allocate_reveal_sequence(&mut self) -> u64 {
        let seq = self.next_reveal_sequence;
        self.next_reveal_sequence = seq.saturating_add(1);
        seq
    }

    pub fn contains(&self, tender_id: TenderId, bidder: &Address) -> bool {
        self.bids.contains_key(&(tender_id, *bidder))
    }

    pub fn get(&self, tender_id: TenderId, bidder: &Address) -> Option<&Bid> {
        self.bids.get(&(tender_id, *bidder))
    }

    pub(crate) fn get_mut(&mut self, tender_id: TenderId, bidder: &Address) -> Option<&mut Bid> {
        self.bids.get_mut(&(tender_id, *bidder))
    }

    /// Store a new bid. A second bid for the same pair is rejected, never
    /// overwritten.
    pub fn insert_new(&mut self, bid: Bid) -> Result<(), ProcurementError> {
        let key = (bid.tender_id, bid.bidder);
        if self.bids.contains_key(&key) {
            return Err(ProcurementError::AlreadySubmitted {
                tender_id: bid.tender_id,
                bidder: bid.bidder,
            });
        }
        self.bids.insert(key, bid);
        Ok(())
    }

    /// All bids on one tender, ordered by bidder address.
    pub fn for_tender(&self, tender_id: TenderId) -> impl Iterator<Item = &Bid> {
        self.bids
            .range((tender_id, Address::ZERO)..=(tender_id, Address::repeat_byte(0xff)))
            .map(|(_, bid)| bid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bid> {
        self.bids.values()
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }
}

impl Default for BidLedger {
    fn default() -> Self {
        Self::new()
    }
}
