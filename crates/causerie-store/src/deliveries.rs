use rusqlite::params;

use causerie_shared::{DeliveryRecord, DeliveryState, MessageId, UserId};

use crate::codec;
use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Upsert a delivery record without ever moving it backwards.
    ///
    /// Records for one (message, recipient) can arrive out of order from
    /// concurrent acknowledgements, so the state only grows and timestamps
    /// are set once.
    pub fn upsert_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO deliveries (message_id, recipient_id, state, sent_at, delivered_at, seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(message_id, recipient_id) DO UPDATE SET
                state = MAX(state, excluded.state),
                delivered_at = COALESCE(delivered_at, excluded.delivered_at),
                seen_at = COALESCE(seen_at, excluded.seen_at)",
            params![
                record.message_id.to_string(),
                record.recipient_id.to_string(),
                record.state.ordinal(),
                record.sent_at.to_rfc3339(),
                record.delivered_at.map(|t| t.to_rfc3339()),
                record.seen_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_deliveries_for_message(&self, message: MessageId) -> Result<Vec<DeliveryRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, recipient_id, state, sent_at, delivered_at, seen_at
             FROM deliveries WHERE message_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![message.to_string()], row_to_delivery)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Every record, in insertion order per message.
    pub fn list_deliveries(&self) -> Result<Vec<DeliveryRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, recipient_id, state, sent_at, delivered_at, seen_at
             FROM deliveries ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], row_to_delivery)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn row_to_delivery(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeliveryRecord> {
    let message: String = row.get(0)?;
    let recipient: String = row.get(1)?;
    let state: u8 = row.get(2)?;
    let sent_at: String = row.get(3)?;

    Ok(DeliveryRecord {
        message_id: MessageId(codec::uuid(0, &message)?),
        recipient_id: UserId(codec::uuid(1, &recipient)?),
        state: DeliveryState::from_ordinal(state).ok_or(rusqlite::Error::IntegralValueOutOfRange(
            2,
            i64::from(state),
        ))?,
        sent_at: codec::timestamp(3, &sent_at)?,
        delivered_at: codec::opt_timestamp(4, row.get(4)?)?,
        seen_at: codec::opt_timestamp(5, row.get(5)?)?,
    })
}
