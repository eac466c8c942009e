use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

use crate::error::IndexError;

/// File name of the vector store inside the configured index directory.
pub const STORE_FILE: &str = "index.sqlite";

/// Open (creating if needed) the store under `dir`.
pub async fn connect(dir: &Path) -> Result<SqlitePool, IndexError> {
    std::fs::create_dir_all(dir)?;

    let options = SqliteConnectOptions::new()
        .filename(dir.join(STORE_FILE))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
