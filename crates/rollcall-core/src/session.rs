//! Per-run attendance context.
//!
//! Holds the set of names already handled in this run so a face that stays
//! in view is checked against the ledger once, not on every frame. The
//! ledger's own per-day check still applies to the first sighting.

use crate::ledger::{Ledger, LedgerError, MarkOutcome};
use crate::notify::Announcer;
use crate::types::Identity;
use chrono::NaiveDateTime;
use std::collections::HashSet;

pub struct AttendanceSession<'a> {
    ledger: &'a Ledger,
    announcer: &'a Announcer,
    spoken: HashSet<String>,
}

impl<'a> AttendanceSession<'a> {
    pub fn new(ledger: &'a Ledger, announcer: &'a Announcer) -> Self {
        Self {
            ledger,
            announcer,
            spoken: HashSet::new(),
        }
    }

    /// Handle one recognized identity.
    ///
    /// Returns `None` when the identity is unknown or was already handled in
    /// this run; otherwise the ledger outcome.
    pub fn observe(
        &mut self,
        identity: &Identity,
        now: NaiveDateTime,
    ) -> Result<Option<MarkOutcome>, LedgerError> {
        let Identity::Known { name, .. } = identity else {
            return Ok(None);
        };
        if self.spoken.contains(name.as_str()) {
            return Ok(None);
        }
        let outcome = self.mark(name, now)?;
        self.spoken.insert(name.clone());
        Ok(Some(outcome))
    }

    /// Mark `name` in the ledger, announcing it only when newly recorded.
    pub fn mark(&self, name: &str, now: NaiveDateTime) -> Result<MarkOutcome, LedgerError> {
        let outcome = self.ledger.mark(name, now)?;
        match &outcome {
            MarkOutcome::Recorded(_) => self.announcer.announce(name),
            MarkOutcome::Duplicate => tracing::debug!(name, "already recorded today"),
            MarkOutcome::Rejected => tracing::debug!(name, "attendance rejected"),
        }
        Ok(outcome)
    }

    /// Names handled so far in this run.
    pub fn spoken(&self) -> &HashSet<String> {
        &self.spoken
    }
}
