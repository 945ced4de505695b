//! Persisted ledger layout
//!
//! The on-disk form flattens the ledger into a tender counter plus three
//! composite-keyed stores:
//! - Tender-by-id
//! - Bid-by-(id, bidder)
//! - Milestone-by-(id, index)
//!
//! alongside the owner, the auditor set, the escrow balance and the
//! sequence counters. `BTreeMap` keys keep serialization deterministic.

use procurement_contracts::registry::{Bid, BidLedger, Milestone, Tender, TenderRegistry};
use procurement_contracts::security::AccessControl;
use procurement_contracts::LedgerState;
use procurement_types::amount::Amount;
use procurement_types::hash::Hash32;
use procurement_types::ids::{Address, TenderId};
use procurement_types::time::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::snapshot::SnapshotError;

/// Tender fields without its milestones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderRecord {
    pub description_hash: Hash32,
    pub max_budget: Amount,
    pub created_at: Timestamp,
    pub bid_deadline: Timestamp,
    pub reveal_deadline: Timestamp,
    pub winner: Option<Address>,
    pub winning_amount: Option<Amount>,
    pub active: bool,
    pub milestone_count: usize,
}

/// Full ledger state in its persisted layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub owner: Address,
    pub auditors: Vec<Address>,
    /// Id the next created tender receives
    pub tender_counter: TenderId,
    pub tenders: BTreeMap<TenderId, TenderRecord>,
    pub bids: BTreeMap<(TenderId, Address), Bid>,
    pub milestones: BTreeMap<(TenderId, usize), Milestone>,
    pub escrow: Amount,
    pub next_reveal_sequence: u64,
    pub last_event_sequence: u64,
}

impl PersistedState {
    /// Flatten a live ledger.
    pub fn capture(ledger: &LedgerState) -> Self {
        let mut tenders = BTreeMap::new();
        let mut milestones = BTreeMap::new();
        for tender in ledger.tenders.iter() {
            for (index, milestone) in tender.milestones().iter().enumerate() {
                milestones.insert((tender.id, index), *milestone);
            }
            tenders.insert(
                tender.id,
                TenderRecord {
                    description_hash: tender.description_hash,
                    max_budget: tender.max_budget,
                    created_at: tender.created_at,
                    bid_deadline: tender.bid_deadline,
                    reveal_deadline: tender.reveal_deadline,
                    winner: tender.winner,
                    winning_amount: tender.winning_amount,
                    active: tender.active,
                    milestone_count: tender.milestones().len(),
                },
            );
        }

        let bids = ledger
            .bids
            .iter()
            .map(|bid| ((bid.tender_id, bid.bidder), bid.clone()))
            .collect();

        Self {
            owner: ledger.access.owner(),
            auditors: ledger.access.auditors().copied().collect(),
            tender_counter: ledger.tenders.peek_next_id(),
            tenders,
            bids,
            milestones,
            escrow: ledger.escrow,
            next_reveal_sequence: ledger.bids.next_reveal_sequence(),
            last_event_sequence: ledger.last_event_sequence,
        }
    }

    /// Rebuild the live ledger, rejecting layouts the contract could never
    /// have produced.
    pub fn restore(&self) -> Result<LedgerState, SnapshotError> {
        let mut access = AccessControl::new(self.owner);
        for auditor in &self.auditors {
            access
                .add_auditor(&self.owner, *auditor)
                .map_err(|e| SnapshotError::InvalidState(e.to_string()))?;
        }

        let mut tenders = BTreeMap::new();
        for (id, record) in &self.tenders {
            if *id >= self.tender_counter {
                return Err(SnapshotError::InvalidState(format!(
                    "tender {} not below counter {}",
                    id, self.tender_counter
                )));
            }
            let milestones = (0..record.milestone_count)
                .map(|index| {
                    self.milestones.get(&(*id, index)).copied().ok_or_else(|| {
                        SnapshotError::InvalidState(format!(
                            "tender {} missing milestone {}",
                            id, index
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let mut tender = Tender::new(
                *id,
                record.description_hash,
                record.max_budget,
                record.created_at,
                record.bid_deadline,
                record.reveal_deadline,
                &[],
            );
            tender.winner = record.winner;
            tender.winning_amount = record.winning_amount;
            tender.active = record.active;
            let tender = tender
                .with_milestones(milestones)
                .map_err(|e| SnapshotError::InvalidState(e.to_string()))?;
            tenders.insert(*id, tender);
        }

        let stored_milestones: usize = self.tenders.values().map(|t| t.milestone_count).sum();
        if stored_milestones != self.milestones.len() {
            return Err(SnapshotError::InvalidState(format!(
                "{} milestones stored, tenders declare {}",
                self.milestones.len(),
                stored_milestones
            )));
        }

        for ((tender_id, bidder), bid) in &self.bids {
            if !tenders.contains_key(tender_id) || bid.tender_id != *tender_id || bid.bidder != *bidder {
                return Err(SnapshotError::InvalidState(format!(
                    "bid key ({}, {}) does not match a tender",
                    tender_id, bidder
                )));
            }
        }

        Ok(LedgerState {
            access,
            tenders: TenderRegistry::from_parts(self.tender_counter, tenders),
            bids: BidLedger::from_parts(self.bids.clone(), self.next_reveal_sequence),
            escrow: self.escrow,
            last_event_sequence: self.last_event_sequence,
        })
    }

    /// Deterministic SHA-256 over the bincode encoding, hex-encoded.
    pub fn compute_hash(&self) -> Result<String, SnapshotError> {
        let bytes =
            bincode::serialize(self).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}
