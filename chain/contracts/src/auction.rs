//! Tender creation, sealed bidding, reveal, and winner selection
//!
//! Phases are purely time-derived:
//! - Bidding:   `now < bid_deadline`
//! - Revealing: `bid_deadline <= now < reveal_deadline`
//! - Selection: `now >= reveal_deadline`, owner picks the lowest valid bid
//!
//! Every operation validates fully before touching state, so a rejected
//! call leaves nothing behind.

use procurement_types::amount::Amount;
use procurement_types::hash::{Hash32, Nonce};
use procurement_types::ids::{Address, TenderId};
use procurement_types::time::Timestamp;
use tracing::{debug, info};

use crate::commitment::verify_commitment;
use crate::contract::Procurement;
use crate::errors::ProcurementError;
use crate::events::{BidRevealed, BidSubmitted, ProcurementEvent, TenderCreated, WinnerSelected};
use crate::registry::{Bid, Tender};

impl Procurement {
    /// Open a new tender. Owner-only.
    ///
    /// Deadlines are fixed at `now + bid_duration_secs` and
    /// `now + bid_duration_secs + reveal_duration_secs`. The milestone
    /// amounts are fixed for the life of the tender and may not add up to
    /// more than `max_budget`. A failed creation does not consume an id.
    pub fn create_tender(
        &mut self,
        caller: &Address,
        description_hash: Hash32,
        max_budget: Amount,
        bid_duration_secs: u64,
        reveal_duration_secs: u64,
        milestone_amounts: &[Amount],
    ) -> Result<TenderId, ProcurementError> {
        let mark = self.event_mark();
        let tender = self
            .prepare_tender(
                caller,
                description_hash,
                max_budget,
                bid_duration_secs,
                reveal_duration_secs,
                milestone_amounts,
            )
            .map_err(|err| self.rejected("create_tender", err))?;
        let tender_id = tender.id;

        self.emit_at(
            ProcurementEvent::TenderCreated(TenderCreated {
                tender_id,
                description_hash,
                max_budget,
                bid_deadline: tender.bid_deadline,
                reveal_deadline: tender.reveal_deadline,
                milestone_amounts: milestone_amounts.to_vec(),
            }),
            tender.created_at,
        );
        info!(
            tender_id = %tender_id,
            max_budget = %max_budget,
            milestones = milestone_amounts.len(),
            bid_deadline = %tender.bid_deadline,
            reveal_deadline = %tender.reveal_deadline,
            "Tender created"
        );
        self.state.tenders.insert(tender);
        self.commit(mark);
        Ok(tender_id)
    }

    fn prepare_tender(
        &mut self,
        caller: &Address,
        description_hash: Hash32,
        max_budget: Amount,
        bid_duration_secs: u64,
        reveal_duration_secs: u64,
        milestone_amounts: &[Amount],
    ) -> Result<Tender, ProcurementError> {
        self.state.access.require_owner(caller)?;

        let limit = self.config.max_milestones;
        if milestone_amounts.len() > limit {
            return Err(ProcurementError::TooManyMilestones {
                count: milestone_amounts.len(),
                limit,
            });
        }
        if bid_duration_secs == 0 {
            return Err(ProcurementError::InvalidDuration("bid duration must be positive"));
        }
        if reveal_duration_secs == 0 {
            return Err(ProcurementError::InvalidDuration("reveal duration must be positive"));
        }

        let total = Amount::checked_sum(milestone_amounts.iter().copied())
            .ok_or(ProcurementError::MilestoneOverflow)?;
        if total > max_budget {
            return Err(ProcurementError::MilestonesExceedBudget { total, max_budget });
        }

        let now = self.now();
        let bid_deadline = now
            .plus_seconds(bid_duration_secs)
            .ok_or(ProcurementError::DeadlineOverflow)?;
        let reveal_deadline = bid_deadline
            .plus_seconds(reveal_duration_secs)
            .ok_or(ProcurementError::DeadlineOverflow)?;

        // Last fallible step: nothing above has mutated state.
        let id = self.state.tenders.allocate_id()?;
        Ok(Tender::new(
            id,
            description_hash,
            max_budget,
            now,
            bid_deadline,
            reveal_deadline,
            milestone_amounts,
        ))
    }

    /// Commit a sealed bid while the tender is in its bidding phase.
    ///
    /// Open to anyone; one bid per bidder per tender.
    pub fn submit_bid(
        &mut self,
        caller: &Address,
        tender_id: TenderId,
        commit_hash: Hash32,
    ) -> Result<(), ProcurementError> {
        let mark = self.event_mark();
        let submitted_at = self
            .record_bid(caller, tender_id, commit_hash)
            .map_err(|err| self.rejected("submit_bid", err))?;

        self.emit_at(
            ProcurementEvent::BidSubmitted(BidSubmitted {
                tender_id,
                bidder: *caller,
                commit_hash,
            }),
            submitted_at,
        );
        debug!(tender_id = %tender_id, bidder = %caller, "Bid submitted");
        self.commit(mark);
        Ok(())
    }

    fn record_bid(
        &mut self,
        caller: &Address,
        tender_id: TenderId,
        commit_hash: Hash32,
    ) -> Result<Timestamp, ProcurementError> {
        let now = self.now();
        let tender = self.state.tenders.require(tender_id)?;
        if !tender.active {
            return Err(ProcurementError::TenderInactive(tender_id));
        }
        if now >= tender.bid_deadline {
            return Err(ProcurementError::BiddingClosed {
                deadline: tender.bid_deadline,
                now,
            });
        }
        self.state
            .bids
            .insert_new(Bid::new(tender_id, *caller, commit_hash, now))?;
        Ok(now)
    }

    /// Open the caller's sealed bid during the reveal phase.
    ///
    /// A matching reveal is recorded whatever the amount; it only counts
    /// towards selection when `amount <= max_budget`. Returns that validity.
    pub fn reveal_bid(
        &mut self,
        caller: &Address,
        tender_id: TenderId,
        amount: Amount,
        nonce: Nonce,
    ) -> Result<bool, ProcurementError> {
        let mark = self.event_mark();
        let valid = self
            .open_bid(caller, tender_id, amount, &nonce)
            .map_err(|err| self.rejected("reveal_bid", err))?;

        self.emit(ProcurementEvent::BidRevealed(BidRevealed {
            tender_id,
            bidder: *caller,
            amount,
            nonce,
        }));
        debug!(tender_id = %tender_id, bidder = %caller, amount = %amount, valid, "Bid revealed");
        self.commit(mark);
        Ok(valid)
    }

    fn open_bid(
        &mut self,
        caller: &Address,
        tender_id: TenderId,
        amount: Amount,
        nonce: &Nonce,
    ) -> Result<bool, ProcurementError> {
        let now = self.now();
        let tender = self.state.tenders.require(tender_id)?;
        if now < tender.bid_deadline {
            return Err(ProcurementError::RevealNotOpen {
                opens_at: tender.bid_deadline,
                now,
            });
        }
        if now >= tender.reveal_deadline {
            return Err(ProcurementError::RevealClosed {
                closed_at: tender.reveal_deadline,
                now,
            });
        }
        let valid = amount <= tender.max_budget;

        let no_bid = ProcurementError::NoBid {
            tender_id,
            bidder: *caller,
        };
        let bid = self.state.bids.get(tender_id, caller).ok_or_else(|| no_bid.clone())?;
        if bid.is_revealed() {
            return Err(ProcurementError::AlreadyRevealed {
                tender_id,
                bidder: *caller,
            });
        }
        if !verify_commitment(&bid.commit_hash, amount, nonce) {
            return Err(ProcurementError::InvalidReveal);
        }

        let sequence = self.state.bids.allocate_reveal_sequence();
        let bid = self.state.bids.get_mut(tender_id, caller).ok_or(no_bid)?;
        bid.revealed_amount = Some(amount);
        bid.valid = valid;
        bid.reveal_sequence = Some(sequence);
        Ok(valid)
    }

    /// Award the tender to the lowest valid revealed bid. Owner-only, once
    /// the reveal phase is over.
    ///
    /// Equal amounts go to whichever bid was revealed first. Selection
    /// closes the tender to further bidding.
    pub fn select_winner(
        &mut self,
        caller: &Address,
        tender_id: TenderId,
    ) -> Result<(Address, Amount), ProcurementError> {
        let mark = self.event_mark();
        let (winner, winning_amount) = self
            .award(caller, tender_id)
            .map_err(|err| self.rejected("select_winner", err))?;

        self.emit(ProcurementEvent::WinnerSelected(WinnerSelected {
            tender_id,
            winner,
            winning_amount,
        }));
        info!(tender_id = %tender_id, winner = %winner, amount = %winning_amount, "Winner selected");
        self.commit(mark);
        Ok((winner, winning_amount))
    }

    fn award(&mut self, caller: &Address, tender_id: TenderId) -> Result<(Address, Amount), ProcurementError> {
        self.state.access.require_owner(caller)?;

        let now = self.now();
        let tender = self.state.tenders.require(tender_id)?;
        if now < tender.reveal_deadline {
            return Err(ProcurementError::RevealStillOpen {
                closes_at: tender.reveal_deadline,
                now,
            });
        }
        if tender.winner.is_some() {
            return Err(ProcurementError::WinnerAlreadySelected(tender_id));
        }

        let (winning_amount, _, winner) = self
            .state
            .bids
            .for_tender(tender_id)
            .filter(|bid| bid.valid)
            .filter_map(|bid| {
                let amount = bid.revealed_amount?;
                let sequence = bid.reveal_sequence.unwrap_or(u64::MAX);
                Some((amount, sequence, bid.bidder))
            })
            .min()
            .ok_or(ProcurementError::NoValidBids(tender_id))?;

        let tender = self.state.tenders.require_mut(tender_id)?;
        tender.winner = Some(winner);
        tender.winning_amount = Some(winning_amount);
        tender.active = false;
        Ok((winner, winning_amount))
    }
}
