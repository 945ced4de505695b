//! Escrow funding, milestone approval, and payout release
//!
//! Payout follows checks-effects-interactions:
//! 1. Checks: caller policy, tender, index, approved, not paid, guard
//! 2. Effects: mark paid, debit escrow
//! 3. Interaction: hand the transfer to the [`PayoutHook`]
//!
//! The hook receives the contract itself and may call back into it. A
//! re-entrant release of the same milestone sees it already paid and its
//! key still held. If the hook fails, the ledger and event log are rolled
//! back to where the release started, including anything nested calls did.

use procurement_types::amount::Amount;
use procurement_types::ids::{Address, TenderId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PayoutPolicy;
use crate::contract::Procurement;
use crate::errors::{ProcurementError, TransferError};
use crate::events::{EscrowFunded, MilestoneApproved, PaymentReleased, ProcurementEvent};
use crate::registry::MilestoneKey;

/// An outward transfer the contract asks its payout hook to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutInstruction {
    pub tender_id: TenderId,
    pub milestone_index: usize,
    pub recipient: Address,
    pub amount: Amount,
}

/// Recipient-side transfer of a milestone payout.
///
/// Runs after the contract has already recorded the payout. Returning an
/// error aborts the release and undoes it.
pub trait PayoutHook {
    fn transfer(
        &mut self,
        contract: &mut Procurement,
        instruction: &PayoutInstruction,
    ) -> Result<(), TransferError>;
}

/// Hook that accepts every transfer and remembers it.
#[derive(Debug, Clone, Default)]
pub struct RecordedPayouts {
    transfers: Vec<PayoutInstruction>,
}

impl RecordedPayouts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfers(&self) -> &[PayoutInstruction] {
        &self.transfers
    }

    /// Total transferred to `recipient`.
    pub fn total_to(&self, recipient: &Address) -> Amount {
        Amount::checked_sum(
            self.transfers
                .iter()
                .filter(|t| t.recipient == *recipient)
                .map(|t| t.amount),
        )
        .unwrap_or(Amount::new(u128::MAX))
    }
}

impl PayoutHook for RecordedPayouts {
    fn transfer(
        &mut self,
        _contract: &mut Procurement,
        instruction: &PayoutInstruction,
    ) -> Result<(), TransferError> {
        self.transfers.push(*instruction);
        Ok(())
    }
}

impl Procurement {
    // ───────────────────────── Escrow ─────────────────────────

    /// Deposit value into escrow. Open to anyone. Returns the new balance.
    pub fn fund_escrow(&mut self, caller: &Address, amount: Amount) -> Result<Amount, ProcurementError> {
        let mark = self.event_mark();
        let balance = self
            .credit_escrow(amount)
            .map_err(|err| self.rejected("fund_escrow", err))?;

        self.emit(ProcurementEvent::EscrowFunded(EscrowFunded {
            funder: *caller,
            amount,
            balance,
        }));
        info!(funder = %caller, amount = %amount, balance = %balance, "Escrow funded");
        self.commit(mark);
        Ok(balance)
    }

    fn credit_escrow(&mut self, amount: Amount) -> Result<Amount, ProcurementError> {
        if amount.is_zero() {
            return Err(ProcurementError::InvalidFundingAmount);
        }
        let balance = self
            .state
            .escrow
            .checked_add(amount)
            .ok_or(ProcurementError::EscrowOverflow)?;
        self.state.escrow = balance;
        Ok(balance)
    }

    // ───────────────────────── Milestones ─────────────────────────

    /// Approve a milestone of an awarded tender. Auditor-only.
    pub fn approve_milestone(
        &mut self,
        caller: &Address,
        tender_id: TenderId,
        milestone_index: usize,
    ) -> Result<(), ProcurementError> {
        let mark = self.event_mark();
        self.mark_approved(caller, tender_id, milestone_index)
            .map_err(|err| self.rejected("approve_milestone", err))?;

        self.emit(ProcurementEvent::MilestoneApproved(MilestoneApproved {
            tender_id,
            milestone_index,
            auditor: *caller,
        }));
        info!(tender_id = %tender_id, milestone = milestone_index, auditor = %caller, "Milestone approved");
        self.commit(mark);
        Ok(())
    }

    fn mark_approved(&mut self, caller: &Address, tender_id: TenderId, index: usize) -> Result<(), ProcurementError> {
        self.state.access.require_auditor(caller)?;

        let tender = self.state.tenders.require_mut(tender_id)?;
        if tender.winner.is_none() {
            return Err(ProcurementError::NoWinner(tender_id));
        }
        let len = tender.milestones().len();
        let milestone = tender
            .milestone_mut(index)
            .ok_or(ProcurementError::MilestoneOutOfRange { index, len })?;
        if milestone.approved {
            return Err(ProcurementError::AlreadyApproved { tender_id, index });
        }
        milestone.approved = true;
        Ok(())
    }

    // ───────────────────────── Payout ─────────────────────────

    /// Release an approved milestone's amount from escrow to the winner.
    ///
    /// Who may call is governed by [`PayoutPolicy`]; the recipient is always
    /// the tender's winner. Returns the amount paid.
    pub fn release_payment(
        &mut self,
        caller: &Address,
        tender_id: TenderId,
        milestone_index: usize,
        hook: &mut dyn PayoutHook,
    ) -> Result<Amount, ProcurementError> {
        let mark = self.event_mark();
        let (winner, amount) = self
            .check_release(caller, tender_id, milestone_index)
            .map_err(|err| self.rejected("release_payment", err))?;

        let key = MilestoneKey::new(tender_id, milestone_index);
        if !self.payout_guard.acquire(&key) {
            let err = ProcurementError::Reentrancy {
                tender_id,
                index: milestone_index,
            };
            return Err(self.rejected("release_payment", err));
        }

        let checkpoint = self.checkpoint();
        let result = self.settle(key, winner, amount, hook);
        self.payout_guard.release(&key);

        match result {
            Ok(()) => {
                info!(
                    tender_id = %tender_id,
                    milestone = milestone_index,
                    winner = %winner,
                    amount = %amount,
                    "Payment released"
                );
                self.commit(mark);
                Ok(amount)
            }
            Err(err) => {
                self.restore(checkpoint);
                warn!(
                    tender_id = %tender_id,
                    milestone = milestone_index,
                    error = %err,
                    "Payment rolled back"
                );
                Err(err)
            }
        }
    }

    /// Read-only checks; returns the recipient and amount.
    fn check_release(
        &self,
        caller: &Address,
        tender_id: TenderId,
        index: usize,
    ) -> Result<(Address, Amount), ProcurementError> {
        self.check_payout_policy(caller, tender_id)?;

        let tender = self.state.tenders.require(tender_id)?;
        let winner = tender.winner.ok_or(ProcurementError::NoWinner(tender_id))?;
        let milestone = tender.require_milestone(index)?;
        if !milestone.approved {
            return Err(ProcurementError::NotApproved { tender_id, index });
        }
        if milestone.paid {
            return Err(ProcurementError::AlreadyPaid { tender_id, index });
        }
        Ok((winner, milestone.amount))
    }

    fn check_payout_policy(&self, caller: &Address, tender_id: TenderId) -> Result<(), ProcurementError> {
        let permitted = match self.config.payout_policy {
            PayoutPolicy::Anyone => true,
            PayoutPolicy::OwnerOnly => self.state.access.is_owner(caller),
            PayoutPolicy::OwnerOrWinner => {
                self.state.access.is_owner(caller)
                    || self
                        .state
                        .tenders
                        .get(tender_id)
                        .and_then(|tender| tender.winner)
                        .is_some_and(|winner| winner == *caller)
            }
        };
        if !permitted {
            return Err(ProcurementError::PayoutNotPermitted { caller: *caller });
        }
        Ok(())
    }

    /// Effects and the release event, then the outward call.
    fn settle(
        &mut self,
        key: MilestoneKey,
        winner: Address,
        amount: Amount,
        hook: &mut dyn PayoutHook,
    ) -> Result<(), ProcurementError> {
        let tender = self.state.tenders.require_mut(key.tender_id)?;
        let len = tender.milestones().len();
        let milestone = tender
            .milestone_mut(key.index)
            .ok_or(ProcurementError::MilestoneOutOfRange { index: key.index, len })?;
        milestone.paid = true;

        let available = self.state.escrow;
        self.state.escrow = available
            .checked_sub(amount)
            .ok_or(ProcurementError::InsufficientFunds {
                required: amount,
                available,
            })?;
        // Recorded before the outward call so nested events follow the debit
        self.emit(ProcurementEvent::PaymentReleased(PaymentReleased {
            tender_id: key.tender_id,
            milestone_index: key.index,
            winner,
            amount,
        }));

        let instruction = PayoutInstruction {
            tender_id: key.tender_id,
            milestone_index: key.index,
            recipient: winner,
            amount,
        };
        self.call_depth += 1;
        let transfer = hook.transfer(self, &instruction);
        self.call_depth -= 1;
        transfer.map_err(ProcurementError::from)
    }
}
