//! Deterministic replay of committed events onto a ledger
//!
//! Every committed operation leaves exactly the events needed to redo its
//! effect, so a snapshot plus the journal tail rebuilds the live ledger.
//! Replay re-checks each event against the ledger and refuses anything the
//! live contract could not have committed.

use procurement_types::amount::Amount;
use thiserror::Error;

use crate::commitment::verify_commitment;
use crate::contract::LedgerState;
use crate::errors::ProcurementError;
use crate::events::{EventRecord, ProcurementEvent};
use crate::registry::{Bid, Tender};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("Event {sequence} rejected: {source}")]
    Rejected {
        sequence: u64,
        #[source]
        source: ProcurementError,
    },

    #[error("Event {sequence} inconsistent with ledger: {reason}")]
    Inconsistent { sequence: u64, reason: String },
}

impl LedgerState {
    /// Apply one committed event. It must carry the next sequence number.
    ///
    /// On error the ledger is unchanged.
    pub fn apply(&mut self, record: &EventRecord) -> Result<(), ReplayError> {
        let expected = self.last_event_sequence.saturating_add(1);
        if record.sequence != expected {
            return Err(ReplayError::SequenceGap {
                expected,
                got: record.sequence,
            });
        }
        self.apply_event(record)?;
        self.last_event_sequence = record.sequence;
        Ok(())
    }

    /// Apply a run of events in order.
    ///
    /// All or nothing: if any event fails the ledger is left as it was.
    pub fn apply_all<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a EventRecord>,
    ) -> Result<usize, ReplayError> {
        let mut staged = self.clone();
        let mut applied = 0;
        for record in records {
            staged.apply(record)?;
            applied += 1;
        }
        *self = staged;
        Ok(applied)
    }

    fn apply_event(&mut self, record: &EventRecord) -> Result<(), ReplayError> {
        let sequence = record.sequence;
        let rejected = |source: ProcurementError| ReplayError::Rejected { sequence, source };
        let inconsistent = |reason: &str| ReplayError::Inconsistent {
            sequence,
            reason: reason.to_string(),
        };

        match &record.event {
            ProcurementEvent::TenderCreated(e) => {
                if self.tenders.peek_next_id() != e.tender_id {
                    return Err(inconsistent("tender id out of order"));
                }
                let total = Amount::checked_sum(e.milestone_amounts.iter().copied())
                    .ok_or_else(|| rejected(ProcurementError::MilestoneOverflow))?;
                if total > e.max_budget {
                    return Err(rejected(ProcurementError::MilestonesExceedBudget {
                        total,
                        max_budget: e.max_budget,
                    }));
                }
                let id = self.tenders.allocate_id().map_err(rejected)?;
                self.tenders.insert(Tender::new(
                    id,
                    e.description_hash,
                    e.max_budget,
                    record.emitted_at,
                    e.bid_deadline,
                    e.reveal_deadline,
                    &e.milestone_amounts,
                ));
            }

            ProcurementEvent::BidSubmitted(e) => {
                let tender = self.tenders.require(e.tender_id).map_err(rejected)?;
                if !tender.active {
                    return Err(rejected(ProcurementError::TenderInactive(e.tender_id)));
                }
                self.bids
                    .insert_new(Bid::new(e.tender_id, e.bidder, e.commit_hash, record.emitted_at))
                    .map_err(rejected)?;
            }

            ProcurementEvent::BidRevealed(e) => {
                let max_budget = self.tenders.require(e.tender_id).map_err(rejected)?.max_budget;
                let no_bid = ProcurementError::NoBid {
                    tender_id: e.tender_id,
                    bidder: e.bidder,
                };
                let bid = self
                    .bids
                    .get(e.tender_id, &e.bidder)
                    .ok_or_else(|| rejected(no_bid.clone()))?;
                if bid.is_revealed() {
                    return Err(rejected(ProcurementError::AlreadyRevealed {
                        tender_id: e.tender_id,
                        bidder: e.bidder,
                    }));
                }
                if !verify_commitment(&bid.commit_hash, e.amount, &e.nonce) {
                    return Err(rejected(ProcurementError::InvalidReveal));
                }
                let reveal_sequence = self.bids.allocate_reveal_sequence();
                let bid = self
                    .bids
                    .get_mut(e.tender_id, &e.bidder)
                    .ok_or_else(|| rejected(no_bid))?;
                bid.revealed_amount = Some(e.amount);
                bid.valid = e.amount <= max_budget;
                bid.reveal_sequence = Some(reveal_sequence);
            }

            ProcurementEvent::WinnerSelected(e) => {
                let winning_bid = self
                    .bids
                    .get(e.tender_id, &e.winner)
                    .filter(|bid| bid.valid && bid.revealed_amount == Some(e.winning_amount));
                if winning_bid.is_none() {
                    return Err(inconsistent("winner has no matching valid bid"));
                }
                let tender = self.tenders.require_mut(e.tender_id).map_err(rejected)?;
                if tender.winner.is_some() {
                    return Err(rejected(ProcurementError::WinnerAlreadySelected(e.tender_id)));
                }
                tender.winner = Some(e.winner);
                tender.winning_amount = Some(e.winning_amount);
                tender.active = false;
            }

            ProcurementEvent::MilestoneApproved(e) => {
                if !self.access.is_auditor(&e.auditor) {
                    return Err(rejected(ProcurementError::NotAuditor { caller: e.auditor }));
                }
                let tender = self.tenders.require_mut(e.tender_id).map_err(rejected)?;
                if tender.winner.is_none() {
                    return Err(rejected(ProcurementError::NoWinner(e.tender_id)));
                }
                let len = tender.milestones().len();
                let milestone = tender.milestone_mut(e.milestone_index).ok_or_else(|| {
                    rejected(ProcurementError::MilestoneOutOfRange {
                        index: e.milestone_index,
                        len,
                    })
                })?;
                if milestone.approved {
                    return Err(rejected(ProcurementError::AlreadyApproved {
                        tender_id: e.tender_id,
                        index: e.milestone_index,
                    }));
                }
                milestone.approved = true;
            }

            ProcurementEvent::PaymentReleased(e) => {
                let tender = self.tenders.require_mut(e.tender_id).map_err(rejected)?;
                if tender.winner != Some(e.winner) {
                    return Err(inconsistent("payment recipient is not the winner"));
                }
                let len = tender.milestones().len();
                let milestone = tender.milestone_mut(e.milestone_index).ok_or_else(|| {
                    rejected(ProcurementError::MilestoneOutOfRange {
                        index: e.milestone_index,
                        len,
                    })
                })?;
                if !milestone.approved {
                    return Err(rejected(ProcurementError::NotApproved {
                        tender_id: e.tender_id,
                        index: e.milestone_index,
                    }));
                }
                if milestone.paid {
                    return Err(rejected(ProcurementError::AlreadyPaid {
                        tender_id: e.tender_id,
                        index: e.milestone_index,
                    }));
                }
                if milestone.amount != e.amount {
                    return Err(inconsistent("payment amount differs from milestone"));
                }
                let available = self.escrow;
                let remaining = available.checked_sub(e.amount).ok_or_else(|| {
                    rejected(ProcurementError::InsufficientFunds {
                        required: e.amount,
                        available,
                    })
                })?;
                milestone.paid = true;
                self.escrow = remaining;
            }

            ProcurementEvent::AuditorAdded(e) => {
                let owner = self.access.owner();
                let added = self.access.add_auditor(&owner, e.auditor).map_err(rejected)?;
                if !added {
                    return Err(inconsistent("auditor already present"));
                }
            }

            ProcurementEvent::EscrowFunded(e) => {
                if e.amount.is_zero() {
                    return Err(rejected(ProcurementError::InvalidFundingAmount));
                }
                let balance = self
                    .escrow
                    .checked_add(e.amount)
                    .ok_or_else(|| rejected(ProcurementError::EscrowOverflow))?;
                if balance != e.balance {
                    return Err(inconsistent("escrow balance mismatch"));
                }
                self.escrow = balance;
            }
        }
        Ok(())
    }
}
