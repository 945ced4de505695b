//! The tender state machine
//!
//! Owns the ledger (access control, tenders, bids, escrow) plus the
//! non-persisted runtime pieces: the injected clock, the payout reentrancy
//! guard, the event log and its subscribers.
//!
//! Operations live in `auction.rs` (tender lifecycle) and `payment.rs`
//! (escrow and milestone payouts); this module holds construction, queries
//! and the event/checkpoint plumbing they share.

use procurement_types::amount::Amount;
use procurement_types::ids::{Address, TenderId};
use procurement_types::time::{Clock, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

use crate::config::ProcurementConfig;
use crate::errors::ProcurementError;
use crate::events::{AuditorAdded, EventRecord, EventSink, ProcurementEvent};
use crate::registry::{Bid, BidLedger, Milestone, MilestoneKey, Tender, TenderRegistry};
use crate::security::{AccessControl, ReentrancyGuard};

/// Everything a committed operation can change.
///
/// This is the unit of persistence and of rollback: a failed payout
/// restores the whole value it started from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub access: AccessControl,
    pub tenders: TenderRegistry,
    pub bids: BidLedger,
    /// Value held for milestone payouts
    pub escrow: Amount,
    /// Sequence number of the last emitted event
    pub last_event_sequence: u64,
}

impl LedgerState {
    pub fn new(owner: Address) -> Self {
        Self {
            access: AccessControl::new(owner),
            tenders: TenderRegistry::new(),
            bids: BidLedger::new(),
            escrow: Amount::ZERO,
            last_event_sequence: 0,
        }
    }
}

/// Lifecycle phase of a tender, derived from its deadlines and winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenderPhase {
    /// Before `bid_deadline`
    Bidding,
    /// `bid_deadline <= now < reveal_deadline`
    Revealing,
    /// Reveal window over, no winner yet
    AwaitingSelection,
    /// Winner selected; milestones run
    Awarded,
}

/// Saved ledger. Its last event sequence marks the event-log position.
pub(crate) struct Checkpoint {
    state: LedgerState,
}

/// Sealed-bid procurement contract.
pub struct Procurement {
    pub(crate) state: LedgerState,
    pub(crate) config: ProcurementConfig,
    clock: Box<dyn Clock>,
    pub(crate) payout_guard: ReentrancyGuard<MilestoneKey>,
    /// Emitted events log (append-only except for rollback)
    events: Vec<EventRecord>,
    sinks: Vec<Box<dyn EventSink>>,
    /// Number of outward calls currently in progress
    pub(crate) call_depth: usize,
}

impl Procurement {
    /// Create a contract owned by `owner` with the default configuration.
    pub fn new(owner: Address, clock: impl Clock + 'static) -> Self {
        Self::from_state(LedgerState::new(owner), ProcurementConfig::default(), clock)
    }

    pub fn with_config(owner: Address, clock: impl Clock + 'static, config: ProcurementConfig) -> Self {
        Self::from_state(LedgerState::new(owner), config, clock)
    }

    /// Resume from a previously persisted ledger.
    ///
    /// The event log starts empty; new events continue the persisted
    /// sequence.
    pub fn from_state(state: LedgerState, config: ProcurementConfig, clock: impl Clock + 'static) -> Self {
        info!(
            owner = %state.access.owner(),
            tenders = state.tenders.count(),
            payout_policy = ?config.payout_policy,
            "Procurement contract initialized"
        );
        Self {
            state,
            config,
            clock: Box::new(clock),
            payout_guard: ReentrancyGuard::new(),
            events: Vec::new(),
            sinks: Vec::new(),
            call_depth: 0,
        }
    }

    pub fn config(&self) -> &ProcurementConfig {
        &self.config
    }

    /// The committed ledger, for persistence.
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Current time as reported by the injected clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ───────────────────────── Roles ─────────────────────────

    pub fn owner(&self) -> Address {
        self.state.access.owner()
    }

    pub fn is_auditor(&self, account: &Address) -> bool {
        self.state.access.is_auditor(account)
    }

    /// All auditors in address order. Always contains the owner.
    pub fn auditors(&self) -> Vec<Address> {
        self.state.access.auditors().copied().collect()
    }

    /// Grant the auditor role. Owner-only.
    ///
    /// Returns whether `auditor` was newly added. `AuditorAdded` is only
    /// emitted when it was.
    pub fn add_auditor(&mut self, caller: &Address, auditor: Address) -> Result<bool, ProcurementError> {
        let mark = self.event_mark();
        let added = self
            .state
            .access
            .add_auditor(caller, auditor)
            .map_err(|err| self.rejected("add_auditor", err))?;
        if added {
            self.emit(ProcurementEvent::AuditorAdded(AuditorAdded { auditor }));
            info!(auditor = %auditor, "Auditor added");
        }
        self.commit(mark);
        Ok(added)
    }

    // ───────────────────────── Queries ─────────────────────────

    /// Number of tenders created so far.
    pub fn tender_count(&self) -> usize {
        self.state.tenders.count()
    }

    pub fn get_tender(&self, tender_id: TenderId) -> Option<&Tender> {
        self.state.tenders.get(tender_id)
    }

    pub fn tenders(&self) -> impl Iterator<Item = &Tender> {
        self.state.tenders.iter()
    }

    pub fn get_bid(&self, tender_id: TenderId, bidder: &Address) -> Option<&Bid> {
        self.state.bids.get(tender_id, bidder)
    }

    /// Bids on `tender_id`, ordered by bidder address.
    pub fn bids(&self, tender_id: TenderId) -> impl Iterator<Item = &Bid> {
        self.state.bids.for_tender(tender_id)
    }

    pub fn get_milestone(&self, tender_id: TenderId, index: usize) -> Option<&Milestone> {
        self.state
            .tenders
            .get(tender_id)
            .and_then(|tender| tender.milestone(index))
    }

    pub fn milestones(&self, tender_id: TenderId) -> Result<&[Milestone], ProcurementError> {
        Ok(self.state.tenders.require(tender_id)?.milestones())
    }

    /// Phase of `tender_id` at the current clock time.
    pub fn tender_phase(&self, tender_id: TenderId) -> Result<TenderPhase, ProcurementError> {
        let tender = self.state.tenders.require(tender_id)?;
        let now = self.now();
        let phase = if tender.winner.is_some() {
            TenderPhase::Awarded
        } else if now < tender.bid_deadline {
            TenderPhase::Bidding
        } else if now < tender.reveal_deadline {
            TenderPhase::Revealing
        } else {
            TenderPhase::AwaitingSelection
        };
        Ok(phase)
    }

    pub fn escrow_balance(&self) -> Amount {
        self.state.escrow
    }

    /// Sum already paid out on `tender_id`.
    pub fn total_released(&self, tender_id: TenderId) -> Result<Amount, ProcurementError> {
        Ok(self.state.tenders.require(tender_id)?.released_total())
    }

    // ───────────────────────── Events ─────────────────────────

    /// Register a subscriber for committed events.
    pub fn subscribe(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Remove every subscriber, handing them back to the caller.
    pub fn unsubscribe_all(&mut self) -> Vec<Box<dyn EventSink>> {
        std::mem::take(&mut self.sinks)
    }

    /// Events emitted since the last drain.
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Take and clear the event log.
    pub fn drain_events(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.events)
    }

    /// Sequence number the next emitted event will carry.
    pub(crate) fn event_mark(&self) -> u64 {
        self.state.last_event_sequence.saturating_add(1)
    }

    pub(crate) fn emit(&mut self, event: ProcurementEvent) {
        let now = self.now();
        self.emit_at(event, now);
    }

    /// Emit stamped with the time the operation itself recorded.
    pub(crate) fn emit_at(&mut self, event: ProcurementEvent, emitted_at: Timestamp) {
        let sequence = self.event_mark();
        self.state.last_event_sequence = sequence;
        self.events.push(EventRecord {
            sequence,
            event_id: Uuid::now_v7(),
            emitted_at,
            event,
        });
    }

    /// Deliver events from `mark` onwards to subscribers.
    ///
    /// Deferred while an outward call is in progress; the outermost
    /// operation delivers everything its nested calls emitted.
    pub(crate) fn commit(&mut self, mark: u64) {
        if self.call_depth > 0 {
            return;
        }
        let Self { events, sinks, .. } = self;
        for record in events.iter().filter(|r| r.sequence >= mark) {
            for sink in sinks.iter_mut() {
                sink.on_event(record);
            }
        }
    }

    // ───────────────────────── Rollback ─────────────────────────

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            state: self.state.clone(),
        }
    }

    /// Restore the ledger and drop every event emitted after the checkpoint.
    ///
    /// The reentrancy guard is not part of the checkpoint.
    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        let last = checkpoint.state.last_event_sequence;
        self.events.retain(|r| r.sequence <= last);
        self.state = checkpoint.state;
    }

    /// Log a rejected call and pass the error through.
    pub(crate) fn rejected(&self, operation: &'static str, err: ProcurementError) -> ProcurementError {
        tracing::debug!(operation, kind = ?err.kind(), error = %err, "Call rejected");
        err
    }
}

impl fmt::Debug for Procurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procurement")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("payout_guard", &self.payout_guard)
            .field("events", &self.events.len())
            .field("sinks", &self.sinks.len())
            .field("call_depth", &self.call_depth)
            .finish()
    }
}
