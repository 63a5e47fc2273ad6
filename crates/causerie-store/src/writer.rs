//! Write-behind journal writer.
//!
//! Drains the engine's journal channel on a blocking thread and applies each
//! record to SQLite. Records of one key arrive in commit order; a failing
//! record is logged and skipped so one bad row never stalls persistence.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use causerie_shared::protocol::JournalRecord;

use crate::database::Database;

/// Apply journal records until every sender is dropped. Returns how many
/// records were written.
pub fn spawn_journal_writer(
    db: Database,
    mut rx: mpsc::UnboundedReceiver<JournalRecord>,
) -> JoinHandle<usize> {
    tokio::task::spawn_blocking(move || {
        let mut written = 0usize;
        while let Some(record) = rx.blocking_recv() {
            match db.apply(&record) {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(error = %e, record = ?record, "Failed to persist journal record"),
            }
        }
        tracing::info!(written, "Journal writer stopped");
        written
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{sample_group, sample_message};
    use causerie_shared::UserId;

    #[tokio::test]
    async fn writer_persists_until_channel_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_journal_writer(Database::open_at(&path).unwrap(), rx);

        let owner = UserId::new();
        let conv = sample_group(owner, &[]);
        tx.send(JournalRecord::Conversation {
            conversation: conv.clone(),
            permissions: Vec::new(),
        })
        .unwrap();
        tx.send(JournalRecord::Message(sample_message(&conv, 1, owner)))
            .unwrap();
        // Orphan message: rejected by the foreign key, skipped.
        let orphan = sample_group(owner, &[]);
        tx.send(JournalRecord::Message(sample_message(&orphan, 1, owner)))
            .unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), 2);

        let snapshot = Database::open_at(&path).unwrap().load_snapshot().unwrap();
        assert_eq!(snapshot.conversations.len(), 1);
        assert_eq!(snapshot.messages.len(), 1);
    }
}
