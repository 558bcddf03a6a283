//! First-run setup: database and a commented starter config.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::Config;

const STARTER_CONFIG: &str = r#"# rota configuration. Every key is optional; ROTA_* environment variables
# override this file, with "__" between nested keys.

# database_path = "/var/lib/rota/rota.db"

[queue]
# "local" keeps tasks in the database; run `rota tasks run-due` from cron.
backend = "local"
# backend = "http"
# base_url = "https://tasks.example.com/v1/queues/rota"
# callback_base_url = "https://rota.example.com"
# token = ""

[meetings]
# "offline" hands out placeholder links.
backend = "offline"
# backend = "http"
# base_url = "https://api.meetings.example.com/v2"
# token_url = "https://auth.meetings.example.com/oauth/token"
# client_id = ""
# client_secret = ""

[notifications]
# webhook_url = "https://hooks.example.com/rota"

[engine.hub]
# bucket_minutes = 120
# capacity = 100

[engine.allocator]
# day_start_hour = 8
# day_end_hour = 21
# utc_offset_minutes = 0
"#;

/// Writes the starter config when `config_file` does not exist yet.
pub fn run<W: Write>(writer: &mut W, config_file: Option<&Path>, config: &Config) -> Result<()> {
    writeln!(writer, "Database: {}", config.database_path.display())?;
    let Some(path) = config_file else {
        writeln!(writer, "No config directory found; using built-in defaults")?;
        return Ok(());
    };
    if path.exists() {
        writeln!(writer, "Config: {} (unchanged)", path.display())?;
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, STARTER_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;
    writeln!(writer, "Config: {} (created)", path.display())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::commands::testing::output;

    #[test]
    fn starter_config_parses_and_is_not_overwritten() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("rota").join("config.toml");
        let config = Config {
            database_path: temp.path().join("rota.db"),
            ..Config::default()
        };

        let mut buffer = Vec::new();
        run(&mut buffer, Some(&path), &config).unwrap();
        run(&mut buffer, Some(&path), &config).unwrap();
        let text = output(buffer);
        assert!(text.contains("(created)"));
        assert!(text.contains("(unchanged)"));

        let loaded = Config::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.engine, rota_core::EngineConfig::default());
    }
}
