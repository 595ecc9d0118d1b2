// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded event journal.
//!
//! A single JSON document `{events, total_events, last_updated}` is read,
//! mutated in memory, and rewritten on every append. The rewrite goes
//! through a sibling temp file plus rename so a reader never observes a
//! partially written document.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Maximum number of events retained in the journal.
pub const MAX_EVENTS: usize = 1_000;

/// The broad event kind, used to namespace `id` generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A patch lifecycle event (validation error, saved, forwarded, …).
    PatchEvent,
    /// An event originating from the chat-platform collaborator.
    SlackEvent,
    /// An internal system event.
    SystemEvent,
}

impl EventKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::PatchEvent => "patch_event",
            Self::SlackEvent => "slack_event",
            Self::SystemEvent => "system_event",
        }
    }
}

/// A single journaled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// `<kind>_<ms-epoch>`, unique per append under normal clock behavior.
    pub id: String,
    /// Broad event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Free-form subkey identifying the specific event, e.g.
    /// `webhook_patch_saved`.
    pub event_type: String,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload.
    #[serde(flatten)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct JournalDocument {
    events: Vec<EventRecord>,
    total_events: u64,
    last_updated: Option<DateTime<Utc>>,
}

/// A single JSON-file-backed, capacity-bounded event journal.
pub struct EventLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventLog {
    /// Construct a journal backed by the file at `path`. The file is
    /// created on first append if it does not already exist.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> anyhow::Result<JournalDocument> {
        match fs::read(&self.path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).context("parse event journal")
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(JournalDocument::default()),
            Err(err) => Err(err).context("read event journal"),
        }
    }

    async fn store(&self, doc: &JournalDocument, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create event journal dir {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(doc).context("serialize event journal")?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &bytes)
            .await
            .with_context(|| format!("write event journal temp file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("rename event journal into place {}", path.display()))?;
        Ok(())
    }

    /// Append one event, truncating the oldest entries if the journal
    /// would exceed [`MAX_EVENTS`]. Returns the full record that was
    /// written, including its generated `id`.
    ///
    /// # Errors
    ///
    /// Propagates read, parse, serialize, and write failures.
    pub async fn append(&self, kind: EventKind, event_type: impl Into<String>, payload: Value) -> anyhow::Result<EventRecord> {
        let _guard = self.lock.lock().await;

        let mut doc = self.load().await?;
        let now = Utc::now();
        let record = EventRecord {
            id: format!("{}_{}", kind.prefix(), now.timestamp_millis()),
            kind,
            event_type: event_type.into(),
            timestamp: now,
            payload,
        };

        doc.events.push(record.clone());
        if doc.events.len() > MAX_EVENTS {
            let overflow = doc.events.len() - MAX_EVENTS;
            doc.events.drain(0..overflow);
        }
        doc.total_events += 1;
        doc.last_updated = Some(now);

        self.store(&doc, &self.path).await?;
        Ok(record)
    }

    /// Return the full set of currently retained events (oldest first).
    ///
    /// # Errors
    ///
    /// Propagates read and parse failures.
    pub async fn events(&self) -> anyhow::Result<Vec<EventRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.events)
    }

    /// Return the monotonically increasing lifetime append count (which
    /// may exceed the number of currently retained events once the cap has
    /// been hit).
    ///
    /// # Errors
    ///
    /// Propagates read and parse failures.
    pub async fn total_events(&self) -> anyhow::Result<u64> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.total_events)
    }
}
