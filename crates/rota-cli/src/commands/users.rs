//! Contact records used for hub routing.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Args;
use rota_core::{Contact, ContactCheck, UserId, check_contact};
use rota_db::Database;
use serde_json::Value;

#[derive(Debug, Args)]
pub struct AddArgs {
    pub id: String,

    #[arg(long)]
    pub email: Option<String>,

    #[arg(long)]
    pub name: Option<String>,

    /// Mark the email as unverified, which routes the user to self-select rooms.
    #[arg(long)]
    pub unverified: bool,
}

pub fn add<W: Write>(writer: &mut W, db: &Database, args: &AddArgs) -> Result<()> {
    let contact = Contact {
        user_id: UserId::new(args.id.as_str())?,
        email: args.email.clone(),
        email_verified: !args.unverified,
        display_name: args.name.clone(),
    };
    db.upsert_contact(&contact)?;
    writeln!(writer, "Saved user {}", contact.user_id)?;
    if let ContactCheck::Risk { reason, .. } = check_contact(Some(&contact)) {
        writeln!(writer, "Warning: {reason}; this user cannot be pre-assigned to a room")?;
    }
    Ok(())
}

/// Imports user records from a JSON array or JSON Lines file (`-` for stdin).
///
/// Records are normalized to canonical contacts; malformed ones are skipped
/// and reported without stopping the import.
pub fn import<W: Write>(writer: &mut W, db: &Database, path: &Path) -> Result<()> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };

    let records = parse_records(&text)?;
    let mut imported = 0usize;
    let mut skipped = 0usize;
    for (index, record) in records.iter().enumerate() {
        match db.import_user(record) {
            Ok(contact) => {
                imported += 1;
                tracing::debug!(user_id = %contact.user_id, "imported user");
            }
            Err(err) => {
                skipped += 1;
                tracing::warn!(record = index + 1, error = %err, "skipping user record");
                writeln!(writer, "Skipped record {}: {err}", index + 1)?;
            }
        }
    }
    writeln!(writer, "Imported {imported} users ({skipped} skipped)")?;
    Ok(())
}

fn parse_records(text: &str) -> Result<Vec<Value>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let records: Vec<Value> =
            serde_json::from_str(trimmed).context("failed to parse JSON array of users")?;
        return Ok(records);
    }
    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: Value = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid JSON", line_no + 1))?;
        records.push(record);
    }
    if records.is_empty() {
        bail!("no user records found");
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;
    use rota_core::ShiftStore;

    use crate::commands::testing::output;

    #[test]
    fn import_normalizes_mixed_field_names() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("users.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"uid": "t1", "e-mail": "ada@example.org", "displayName": "Ada"}"#,
                "\n",
                r#"{"user_id": "p1", "emailAddress": "grace@example.org", "email_verified": false}"#,
                "\n\n",
                r#"{"email": "nobody@example.org"}"#,
                "\n",
            ),
        )
        .unwrap();

        let db = Database::open_in_memory().unwrap();
        let mut buffer = Vec::new();
        import(&mut buffer, &db, &path).unwrap();
        let text = output(buffer);
        assert!(text.starts_with("Skipped record 3: "));
        assert!(text.ends_with("Imported 2 users (1 skipped)\n"));

        let ada = db.contact(&UserId::new("t1").unwrap()).unwrap().unwrap();
        assert_eq!(ada.email.as_deref(), Some("ada@example.org"));
        assert_eq!(ada.display_name.as_deref(), Some("Ada"));
        let grace = db.contact(&UserId::new("p1").unwrap()).unwrap().unwrap();
        assert!(!grace.email_verified);
    }

    #[test]
    fn import_accepts_json_arrays() {
        let records = parse_records(r#"[{"id": "a"}, {"id": "b"}]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert!(parse_records("\n\n").is_err());
    }

    #[test]
    fn unverified_email_is_flagged_on_add() {
        let db = Database::open_in_memory().unwrap();
        let mut buffer = Vec::new();
        add(
            &mut buffer,
            &db,
            &AddArgs {
                id: "p1".to_string(),
                email: Some("grace@example.org".to_string()),
                name: Some("Grace".to_string()),
                unverified: true,
            },
        )
        .unwrap();
        assert_snapshot!(output(buffer), @r"
        Saved user p1
        Warning: email_not_verified; this user cannot be pre-assigned to a room
        ");
    }
}
