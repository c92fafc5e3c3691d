//! Conditional writes to a workload's lock ledger.
//!
//! Every mutation is a read-modify-CAS loop on the ledger document. A
//! conflict re-reads and retries the same mutation a bounded number of
//! times; the surrounding pass is not restarted.

use gratefulset_state::{LedgerDocument, LockLedger, Substrate, epoch_secs};
use tracing::{debug, info};

use crate::error::{ReconcileError, ReconcileResult};

/// Writer for one workload's ledger.
pub struct LedgerWriter<'a> {
    substrate: &'a dyn Substrate,
    workload_id: &'a str,
    attempts: u32,
}

impl<'a> LedgerWriter<'a> {
    pub fn new(substrate: &'a dyn Substrate, workload_id: &'a str, attempts: u32) -> Self {
        Self {
            substrate,
            workload_id,
            attempts: attempts.max(1),
        }
    }

    /// Create an empty ledger if none exists. Returns true if one was created.
    pub fn ensure(&self) -> ReconcileResult<bool> {
        if self.substrate.get_ledger(self.workload_id)?.is_some() {
            return Ok(false);
        }
        let doc = LedgerDocument {
            workload_id: self.workload_id.to_string(),
            data: Default::default(),
            updated_at: epoch_secs(),
            resource_version: 0,
        };
        match self.substrate.create_ledger(&doc) {
            Ok(_) => {
                info!(workload = %self.workload_id, "lock ledger created");
                Ok(true)
            }
            // Lost a race with another writer; the ledger exists either way.
            Err(gratefulset_state::StateError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read and decode the current ledger.
    pub fn read(&self) -> ReconcileResult<LockLedger> {
        let doc = self.load()?;
        Ok(LockLedger::from_document(&doc)?)
    }

    /// Permit `ordinal`. Returns false if it already was.
    pub fn grant(&self, ordinal: u32) -> ReconcileResult<bool> {
        let changed = self.mutate(|ledger| ledger.grant(ordinal))?;
        if changed {
            info!(workload = %self.workload_id, ordinal, "lock granted");
        }
        Ok(changed)
    }

    /// Withdraw permission for `ordinal`. Returns false if it was not permitted.
    pub fn revoke(&self, ordinal: u32) -> ReconcileResult<bool> {
        let changed = self.mutate(|ledger| ledger.revoke(ordinal))?;
        if changed {
            info!(workload = %self.workload_id, ordinal, "lock revoked");
        }
        Ok(changed)
    }

    fn load(&self) -> ReconcileResult<LedgerDocument> {
        self.substrate
            .get_ledger(self.workload_id)?
            .ok_or_else(|| ReconcileError::Transient(format!("ledger for {} missing", self.workload_id)))
    }

    /// Apply `f` under compare-and-swap. `f` returns whether it changed anything.
    fn mutate<F>(&self, f: F) -> ReconcileResult<bool>
    where
        F: Fn(&mut LockLedger) -> bool,
    {
        for attempt in 1..=self.attempts {
            let mut doc = self.load()?;
            let mut ledger = LockLedger::from_document(&doc)?;
            if !f(&mut ledger) {
                return Ok(false);
            }
            doc.data = ledger.encode();
            doc.updated_at = epoch_secs();
            match self.substrate.update_ledger(&doc) {
                Ok(_) => return Ok(true),
                Err(e) if e.is_conflict() => {
                    debug!(workload = %self.workload_id, attempt, "ledger write conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ReconcileError::Conflict(format!(
            "ledger for {} still conflicting after {} attempts",
            self.workload_id, self.attempts
        )))
    }
}
