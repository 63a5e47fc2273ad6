//! Write-behind hand-off of committed records to the persistence layer.
//!
//! Components record while still holding the lock that protects the record,
//! so the journal sees mutations of one key in commit order. Sending never
//! blocks the request path.

use causerie_shared::protocol::JournalRecord;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Clone, Default)]
pub struct Journal {
    tx: Option<mpsc::UnboundedSender<JournalRecord>>,
}

impl Journal {
    pub fn new(tx: mpsc::UnboundedSender<JournalRecord>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A journal that discards everything (tests, ephemeral engines).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Create a journal together with the receiving end for the writer task.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JournalRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn record(&self, record: JournalRecord) {
        if let Some(tx) = &self.tx {
            if tx.send(record).is_err() {
                warn!("Journal writer is gone, record dropped");
            }
        }
    }
}
