// crates/db-relay-agent/src/events.rs
// ============================================================================
// Module: Post-Connect Event Announcement
// Description: One-time logging of active promotional events.
// Purpose: Announce configured events once per process after first dispatch.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The events side file is a JSON array of `{ "id", "active" }` records.
//! [`EventAnnouncer::announce_once`] reads it on the first completed
//! dispatch of the process and logs the active ids. A missing or malformed
//! file only produces a warning; the latch fires regardless so later
//! reconnects stay quiet.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde::Deserialize;

use crate::connection::AgentError;
use crate::logging::AgentLogger;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum events file size in bytes.
const MAX_EVENTS_FILE_SIZE: u64 = 1024 * 1024;

// ============================================================================
// SECTION: Types
// ============================================================================

/// One record in the events side file.
#[derive(Debug, Deserialize)]
struct EventEntry {
    /// Event identifier.
    #[serde(default)]
    id: String,
    /// Whether the event is currently running.
    #[serde(default)]
    active: bool,
}

/// Once-per-process post-connect announcer.
pub struct EventAnnouncer {
    /// Events side file, if configured.
    path: Option<PathBuf>,
    /// Latched after the first announcement attempt.
    fired: AtomicBool,
    /// Destination for the announcement.
    logger: AgentLogger,
}

impl EventAnnouncer {
    /// Creates an announcer over an optional side file.
    #[must_use]
    pub const fn new(path: Option<PathBuf>, logger: AgentLogger) -> Self {
        Self {
            path,
            fired: AtomicBool::new(false),
            logger,
        }
    }

    /// Returns true once the latch has fired.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Logs active event ids on the first call of the process.
    ///
    /// Returns true when this call performed the announcement.
    pub fn announce_once(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(path) = &self.path else {
            return true;
        };
        match active_event_ids(path) {
            Ok(ids) => {
                let message = if ids.is_empty() {
                    "no active events".to_string()
                } else {
                    format!("active events: {}", ids.join(", "))
                };
                self.logger.info("events_active", message);
            }
            Err(err) => self.logger.warn("events_unavailable", err.to_string()),
        }
        true
    }
}

/// Reads the side file and returns the ids of active events in file order.
///
/// # Errors
///
/// Returns [`AgentError::Events`] when the file cannot be read or parsed.
pub fn active_event_ids(path: &Path) -> Result<Vec<String>, AgentError> {
    let metadata = fs::metadata(path).map_err(|err| AgentError::Events(err.to_string()))?;
    if metadata.len() > MAX_EVENTS_FILE_SIZE {
        return Err(AgentError::Events("events file exceeds size limit".to_string()));
    }
    let bytes = fs::read(path).map_err(|err| AgentError::Events(err.to_string()))?;
    let entries: Vec<EventEntry> =
        serde_json::from_slice(&bytes).map_err(|err| AgentError::Events(err.to_string()))?;
    Ok(entries
        .into_iter()
        .filter(|entry| entry.active && !entry.id.is_empty())
        .map(|entry| entry.id)
        .collect())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
