//! Outbox delivery.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rota_db::Database;

use crate::adapters::Services;

/// Sends undelivered events in append order.
///
/// Stops at the first failed delivery so receivers never see events out of
/// order; the failed row keeps its place and its attempt count goes up.
pub fn dispatch<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<()> {
    let pending = db.pending_events(limit)?;
    let mut delivered = 0usize;
    for record in &pending {
        match services.deliver(record) {
            Ok(_) => {
                db.mark_delivered(record.seq, now)?;
                delivered += 1;
            }
            Err(err) => {
                tracing::warn!(
                    event_id = %record.event_id,
                    kind = %record.kind,
                    attempts = record.attempts + 1,
                    error = %err,
                    "event delivery failed"
                );
                db.record_delivery_failure(record.seq, &format!("{err:#}"))?;
                writeln!(
                    writer,
                    "Delivery of {} ({}) failed: {err:#}",
                    record.event_id, record.kind
                )?;
                break;
            }
        }
    }
    let remaining = db.pending_event_count()?;
    writeln!(writer, "Delivered {delivered} events, {remaining} pending")?;
    Ok(())
}
