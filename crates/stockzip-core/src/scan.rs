//! # Scan Sessions
//!
//! A batch of barcode scans taken on the floor, usually while offline.
//!
//! ```text
//! create ──► record ──► record ──► ... ──► complete
//!   │                                        │
//!   └── active: completed_at is None         └── read-only from here
//! ```
//!
//! Each scan is resolved against the local mirror when it is recorded, so a
//! session taken offline still knows which cached entity a barcode meant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// One scan inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScanEntry {
    pub id: String,

    /// Scanned code as read by the device.
    pub barcode: String,

    /// Cached entity the code resolved to, if any.
    pub entity_id: Option<String>,

    /// Counted quantity for this scan.
    pub quantity: i64,

    #[ts(as = "String")]
    pub scanned_at: DateTime<Utc>,
}

/// A batch scanning session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScanSession {
    pub id: String,

    pub name: Option<String>,

    /// Scans in the order they were taken.
    pub entries: Vec<ScanEntry>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// Bumped by every recorded scan and by completion.
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanSession {
    pub fn new(name: Option<String>) -> Self {
        let now = Utc::now();
        ScanSession {
            id: Uuid::new_v4().to_string(),
            name,
            entries: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Returns true until the session is completed.
    pub fn is_active(&self) -> bool {
        self.completed_at.is_none()
    }

    /// Appends a scan. Fails once the session is completed.
    pub fn record(
        &mut self,
        barcode: impl Into<String>,
        entity_id: Option<String>,
        quantity: i64,
    ) -> CoreResult<&ScanEntry> {
        if !self.is_active() {
            return Err(CoreError::SessionCompleted(self.id.clone()));
        }

        let now = self.touch();
        self.entries.push(ScanEntry {
            id: Uuid::new_v4().to_string(),
            barcode: barcode.into(),
            entity_id,
            quantity,
            scanned_at: now,
        });

        let last = self.entries.len() - 1;
        Ok(&self.entries[last])
    }

    /// Closes the session. Returns false if it was already completed.
    pub fn complete(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        let now = self.touch();
        self.completed_at = Some(now);
        true
    }

    /// Sum of counted quantities per resolved entity, in first-scan order.
    pub fn totals_by_entity(&self) -> Vec<(String, i64)> {
        let mut totals: Vec<(String, i64)> = Vec::new();
        for entry in &self.entries {
            let Some(entity_id) = &entry.entity_id else {
                continue;
            };
            match totals.iter_mut().find(|(id, _)| id == entity_id) {
                Some((_, total)) => *total += entry.quantity,
                None => totals.push((entity_id.clone(), entry.quantity)),
            }
        }
        totals
    }

    /// Scanned codes that matched no cached entity.
    pub fn unresolved(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries.iter().filter(|e| e.entity_id.is_none())
    }

    // updated_at never moves backwards, even if the wall clock does.
    fn touch(&mut self) -> DateTime<Utc> {
        let now = Utc::now().max(self.updated_at);
        self.updated_at = now;
        now
    }
}
