use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Uses the given DSN, or a sqlite file under `data_dir/db/`.
pub(crate) fn resolve_dsn(input: Option<&str>, data_dir: &Path) -> anyhow::Result<String> {
    if let Some(dsn) = input.map(str::trim).filter(|dsn| !dsn.is_empty()) {
        ensure_sqlite_file(dsn)?;
        return Ok(dsn.to_string());
    }

    let db_path = data_dir.join("db").join("relay.db");
    let db_path = db_path.to_string_lossy();
    let dsn = match db_path.strip_prefix('/') {
        Some(absolute) => format!("sqlite:///{absolute}"),
        None => format!("sqlite://{db_path}"),
    };
    ensure_sqlite_file(&dsn)?;
    Ok(dsn)
}

/// sqlx refuses to open a sqlite file that does not exist yet.
fn ensure_sqlite_file(dsn: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(dsn) else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database dir {}", parent.display()))?;
    }
    if !path.exists() {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("create database file {}", path.display()))?;
    }
    Ok(())
}

fn sqlite_path(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    if rest.is_empty() || rest.starts_with(":memory:") || rest.starts_with("memory:") {
        return None;
    }
    let path = rest.split('?').next().unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}
