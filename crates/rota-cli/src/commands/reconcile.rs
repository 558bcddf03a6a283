//! Worked-time reconciliation.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rota_core::{EngineConfig, Reconciler, ShiftId};
use rota_db::Database;

use super::util::write_json;

/// Finalizes every shift that ended more than the grace period ago.
pub fn sweep<W: Write>(
    writer: &mut W,
    db: &Database,
    engine: &EngineConfig,
    now: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let report = Reconciler::new(db, engine).sweep(now)?;
    if json {
        return write_json(writer, &report);
    }
    writeln!(writer, "Finalized {} shifts", report.finalized.len())?;
    for (id, status) in &report.finalized {
        writeln!(writer, "- {id}: {status}")?;
    }
    if !report.failed.is_empty() {
        writeln!(
            writer,
            "Failed {} shifts; they are retried on the next sweep",
            report.failed.len()
        )?;
        for id in &report.failed {
            writeln!(writer, "- {id}")?;
        }
    }
    Ok(())
}

/// Recomputes totals for one shift.
pub fn shift<W: Write>(
    writer: &mut W,
    db: &Database,
    engine: &EngineConfig,
    id: &str,
    json: bool,
) -> Result<()> {
    let id = ShiftId::new(id)?;
    let Some(reconciliation) = Reconciler::new(db, engine).finalize(&id)? else {
        writeln!(writer, "Shift {id} is cancelled; nothing to reconcile")?;
        return Ok(());
    };
    if json {
        return write_json(writer, &reconciliation);
    }
    writeln!(writer, "Shift {id}: {}", reconciliation.status)?;
    writeln!(
        writer,
        "Worked {} of {} scheduled minutes, pay {:.2}",
        reconciliation.worked_minutes, reconciliation.scheduled_minutes, reconciliation.total_pay
    )?;
    if reconciliation.auto_clock_out {
        writeln!(writer, "Clock-out was filled in at the scheduled end")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;
    use rota_core::{Shift, ShiftStore, UserId};

    use crate::commands::testing::{at, db_with_hosts, output};

    fn add_shift(db: &Database, id: &str) -> ShiftId {
        let shift = Shift::new(
            ShiftId::new(id).unwrap(),
            UserId::new("t1").unwrap(),
            Vec::new(),
            at(14, 0),
            at(15, 0),
            60.0,
        );
        db.insert_shift(&shift).unwrap();
        shift.id
    }

    #[test]
    fn sweep_classifies_overdue_shifts() {
        let db = db_with_hosts();
        let engine = EngineConfig::default();
        let worked = add_shift(&db, "s1");
        add_shift(&db, "s2");
        let reconciler = Reconciler::new(&db, &engine);
        reconciler.clock_in(&worked, at(14, 0)).unwrap();
        reconciler.clock_out(&worked, at(14, 30)).unwrap();

        // Still inside the grace period.
        let mut buffer = Vec::new();
        sweep(&mut buffer, &db, &engine, at(15, 3), false).unwrap();
        sweep(&mut buffer, &db, &engine, at(15, 10), false).unwrap();
        assert_snapshot!(output(buffer), @r"
        Finalized 0 shifts
        Finalized 2 shifts
        - s1: partiallyCompleted
        - s2: missed
        ");
    }

    #[test]
    fn single_shift_reports_pay() {
        let db = db_with_hosts();
        let engine = EngineConfig::default();
        let id = add_shift(&db, "s1");
        let reconciler = Reconciler::new(&db, &engine);
        reconciler.clock_in(&id, at(13, 50)).unwrap();
        reconciler.clock_out(&id, at(15, 20)).unwrap();

        let mut buffer = Vec::new();
        shift(&mut buffer, &db, &engine, "s1", false).unwrap();
        assert_snapshot!(output(buffer), @r"
        Shift s1: fullyCompleted
        Worked 60 of 60 scheduled minutes, pay 60.00
        ");
    }
}
