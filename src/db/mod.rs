pub mod models;
pub mod queries;
pub mod writer;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::SQLITE_BUSY_TIMEOUT_SECS;
use crate::error::Result;
use crate::whitelist::WhitelistIndex;

pub use writer::MentionWriter;

/// Opens (creating if needed) the SQLite store and applies pending migrations.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(SQLITE_BUSY_TIMEOUT_SECS));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {db_path}");
    Ok(pool)
}

/// Mirrors the whitelist into `tickers`. Market snapshot columns are left alone.
pub async fn sync_tickers(pool: &SqlitePool, whitelist: &WhitelistIndex) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let mut synced = 0usize;
    for (symbol, meta) in whitelist.iter_sorted() {
        sqlx::query(
            r"
            INSERT INTO tickers (symbol, name, sector, industry, active, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
            ON CONFLICT(symbol) DO UPDATE SET
                name = COALESCE(excluded.name, tickers.name),
                sector = COALESCE(excluded.sector, tickers.sector),
                industry = COALESCE(excluded.industry, tickers.industry),
                active = excluded.active,
                updated_at = excluded.updated_at
            ",
        )
        .bind(symbol)
        .bind(meta.name.as_deref())
        .bind(meta.sector.as_deref())
        .bind(meta.industry.as_deref())
        .bind(meta.active)
        .execute(&mut *tx)
        .await?;
        synced += 1;
    }
    tx.commit().await?;
    info!(tickers = synced, "Ticker table synced from whitelist");
    Ok(synced)
}

/// Single-connection in-memory store with the real schema. One connection keeps
/// every query on the same database.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid in-memory url")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("in-memory pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations apply");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_create_every_table() {
        let pool = test_pool().await;
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT IN ('_sqlx_migrations', 'sqlite_sequence') ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec![
                "comments",
                "crawl_logs",
                "daily_stats",
                "mentions",
                "posts",
                "redditors",
                "subreddits",
                "tickers",
                "trend_alerts",
            ]
        );
    }

    #[tokio::test]
    async fn sync_keeps_metadata_and_updates_active_flag() {
        let pool = test_pool().await;
        let first = WhitelistIndex::parse("symbol,name,active\nGME,GameStop,1\nAMC,,1\n").unwrap();
        assert_eq!(sync_tickers(&pool, &first).await.unwrap(), 2);

        let second = WhitelistIndex::parse("symbol,active\nGME,0\n").unwrap();
        sync_tickers(&pool, &second).await.unwrap();

        let (name, active): (Option<String>, bool) =
            sqlx::query_as("SELECT name, active FROM tickers WHERE symbol = 'GME'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(name.as_deref(), Some("GameStop"));
        assert!(!active);
    }
}
