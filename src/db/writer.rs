use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::WRITE_BACKOFF_MS;
use crate::error::Result;
use crate::extractor::TickerExtractor;
use crate::sentiment::SentimentScorer;
use crate::types::{Comment, ContentUnit, MentionCandidate, Post, Redditor, Sentiment, SourceKind, Subreddit};

/// Uniqueness key of a mention: one row per (unit, symbol, position).
pub fn dedup_key(kind: SourceKind, unit_id: &str, symbol: &str, position: usize) -> String {
    format!("{kind}:{unit_id}:{symbol}:{position}")
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnitOutcome {
    /// Candidates the extractor produced for the unit.
    pub candidates: usize,
    /// Mentions actually inserted; duplicates of stored rows are not counted.
    pub inserted: usize,
    /// The unit was already marked processed before this commit.
    pub refetched: bool,
}

/// Commits one content unit and its mentions atomically.
///
/// Writers of the same unit serialize on a per-unit lock; distinct units write
/// concurrently and only contend inside SQLite.
pub struct MentionWriter {
    pool: SqlitePool,
    extractor: TickerExtractor,
    scorer: Arc<dyn SentimentScorer>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MentionWriter {
    pub fn new(
        pool: SqlitePool,
        extractor: TickerExtractor,
        scorer: Arc<dyn SentimentScorer>,
    ) -> Self {
        Self {
            pool,
            extractor,
            scorer,
            locks: DashMap::new(),
        }
    }

    /// Extracts, scores and writes one unit, retrying lock contention with backoff.
    /// On error nothing of the unit is committed and it stays unprocessed.
    pub async fn ingest(&self, unit: &ContentUnit) -> Result<UnitOutcome> {
        let candidates: Vec<(MentionCandidate, Option<Sentiment>)> = self
            .extractor
            .extract(&unit.text(), unit.kind())
            .map(|c| {
                let sentiment = self.scorer.score(&c.context);
                (c, sentiment)
            })
            .collect();

        let key = unit.lock_key();
        let lock = self.lock_for(&key);
        let result = {
            let _guard = lock.lock().await;
            self.write_with_retry(unit, &candidates).await
        };
        drop(lock);
        self.locks.remove_if(&key, |_, l| Arc::strong_count(l) == 1);

        let (inserted, refetched) = result?;
        debug!(
            unit = %key,
            candidates = candidates.len(),
            inserted,
            refetched,
            "Unit committed"
        );
        Ok(UnitOutcome {
            candidates: candidates.len(),
            inserted,
            refetched,
        })
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn write_with_retry(
        &self,
        unit: &ContentUnit,
        candidates: &[(MentionCandidate, Option<Sentiment>)],
    ) -> Result<(usize, bool)> {
        let mut attempt = 0usize;
        loop {
            match self.write_unit(unit, candidates).await {
                Ok(written) => return Ok(written),
                Err(e) if e.is_retryable_write() && attempt < WRITE_BACKOFF_MS.len() => {
                    let delay = WRITE_BACKOFF_MS[attempt];
                    attempt += 1;
                    warn!(
                        unit = %unit.lock_key(),
                        attempt,
                        "Write conflict, retrying in {delay}ms: {e}"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_unit(
        &self,
        unit: &ContentUnit,
        candidates: &[(MentionCandidate, Option<Sentiment>)],
    ) -> Result<(usize, bool)> {
        let mut tx = self.pool.begin().await?;

        let seen = match unit.kind() {
            SourceKind::Post => "SELECT processed FROM posts WHERE id = ?1",
            SourceKind::Comment => "SELECT processed FROM comments WHERE id = ?1",
        };
        let refetched = sqlx::query_scalar::<_, i64>(seen)
            .bind(unit.id())
            .fetch_optional(&mut *tx)
            .await?
            .is_some_and(|processed| processed != 0);

        if let Some(author) = unit.author() {
            ensure_redditor(&mut tx, author).await?;
        }
        match unit {
            ContentUnit::Post(p) => {
                ensure_subreddit(&mut tx, &p.subreddit_id).await?;
                upsert_post(&mut tx, p).await?;
            }
            ContentUnit::Comment(c) => upsert_comment(&mut tx, c).await?,
        }

        let symbols: BTreeSet<&str> = candidates.iter().map(|(c, _)| c.symbol.as_str()).collect();
        for symbol in symbols {
            self.ensure_ticker(&mut tx, symbol).await?;
        }

        let mut inserted = 0usize;
        for (candidate, sentiment) in candidates {
            inserted += insert_mention(&mut tx, unit, candidate, sentiment.as_ref()).await?;
        }

        let mark = match unit.kind() {
            SourceKind::Post => "UPDATE posts SET processed = 1 WHERE id = ?1",
            SourceKind::Comment => "UPDATE comments SET processed = 1 WHERE id = ?1",
        };
        sqlx::query(mark).bind(unit.id()).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok((inserted, refetched))
    }

    async fn ensure_ticker(&self, conn: &mut SqliteConnection, symbol: &str) -> Result<()> {
        let meta = self.extractor.whitelist().get(symbol);
        sqlx::query(
            r"
            INSERT INTO tickers (symbol, name, sector, industry, active)
            VALUES (?1, ?2, ?3, ?4, 1)
            ON CONFLICT(symbol) DO NOTHING
            ",
        )
        .bind(symbol)
        .bind(meta.and_then(|m| m.name.as_deref()))
        .bind(meta.and_then(|m| m.sector.as_deref()))
        .bind(meta.and_then(|m| m.industry.as_deref()))
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Full subreddit metadata, refreshed on every sighting.
    pub async fn upsert_subreddit(&self, sr: &Subreddit) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO subreddits (id, title, description, subscribers, created_utc, quarantine)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                subscribers = excluded.subscribers,
                created_utc = COALESCE(excluded.created_utc, subreddits.created_utc),
                quarantine = excluded.quarantine,
                crawled_at = CURRENT_TIMESTAMP
            ",
        )
        .bind(&sr.id)
        .bind(&sr.title)
        .bind(&sr.description)
        .bind(sr.subscribers)
        .bind(sr.created_utc)
        .bind(sr.quarantine)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Known karma is never replaced by an unknown value.
    pub async fn upsert_redditors(&self, redditors: &[Redditor]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for r in redditors {
            sqlx::query(
                r"
                INSERT INTO redditors (id, link_karma, comment_karma, created_utc)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    link_karma = COALESCE(excluded.link_karma, redditors.link_karma),
                    comment_karma = COALESCE(excluded.comment_karma, redditors.comment_karma),
                    created_utc = COALESCE(excluded.created_utc, redditors.created_utc),
                    crawled_at = CURRENT_TIMESTAMP
                ",
            )
            .bind(&r.id)
            .bind(r.link_karma)
            .bind(r.comment_karma)
            .bind(r.created_utc)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(redditors.len())
    }
}

async fn ensure_redditor(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query("INSERT INTO redditors (id) VALUES (?1) ON CONFLICT(id) DO NOTHING")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

async fn ensure_subreddit(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query("INSERT INTO subreddits (id) VALUES (?1) ON CONFLICT(id) DO NOTHING")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Last committer wins on every content field; `processed` is never reset.
async fn upsert_post(conn: &mut SqliteConnection, p: &Post) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO posts (
            id, subreddit_id, author_id, title, selftext, url, permalink, score,
            upvote_ratio, num_comments, created_utc, is_self, is_video, over_18,
            spoiler, stickied, locked
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
        ON CONFLICT(id) DO UPDATE SET
            subreddit_id = excluded.subreddit_id,
            author_id = excluded.author_id,
            title = excluded.title,
            selftext = excluded.selftext,
            url = excluded.url,
            permalink = excluded.permalink,
            score = excluded.score,
            upvote_ratio = excluded.upvote_ratio,
            num_comments = excluded.num_comments,
            created_utc = excluded.created_utc,
            is_self = excluded.is_self,
            is_video = excluded.is_video,
            over_18 = excluded.over_18,
            spoiler = excluded.spoiler,
            stickied = excluded.stickied,
            locked = excluded.locked,
            crawled_at = CURRENT_TIMESTAMP
        ",
    )
    .bind(&p.id)
    .bind(&p.subreddit_id)
    .bind(&p.author)
    .bind(&p.title)
    .bind(&p.body)
    .bind(&p.url)
    .bind(&p.permalink)
    .bind(p.score)
    .bind(p.upvote_ratio)
    .bind(p.num_comments)
    .bind(p.created_utc)
    .bind(p.is_self)
    .bind(p.is_video)
    .bind(p.over_18)
    .bind(p.spoiler)
    .bind(p.stickied)
    .bind(p.locked)
    .execute(conn)
    .await?;
    Ok(())
}

async fn upsert_comment(conn: &mut SqliteConnection, c: &Comment) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO comments (
            id, post_id, parent_comment_id, depth, author_id, body, score,
            created_utc, is_submitter, stickied, locked
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(id) DO UPDATE SET
            post_id = excluded.post_id,
            parent_comment_id = excluded.parent_comment_id,
            depth = excluded.depth,
            author_id = excluded.author_id,
            body = excluded.body,
            score = excluded.score,
            created_utc = excluded.created_utc,
            is_submitter = excluded.is_submitter,
            stickied = excluded.stickied,
            locked = excluded.locked,
            crawled_at = CURRENT_TIMESTAMP
        ",
    )
    .bind(&c.id)
    .bind(&c.post_id)
    .bind(&c.parent_comment_id)
    .bind(c.depth)
    .bind(&c.author)
    .bind(&c.body)
    .bind(c.score)
    .bind(c.created_utc)
    .bind(c.is_submitter)
    .bind(c.stickied)
    .bind(c.locked)
    .execute(conn)
    .await?;
    Ok(())
}

/// Returns 1 when the row was new, 0 when the dedup key already existed.
async fn insert_mention(
    conn: &mut SqliteConnection,
    unit: &ContentUnit,
    candidate: &MentionCandidate,
    sentiment: Option<&Sentiment>,
) -> Result<usize> {
    let (post_id, comment_id) = match unit {
        ContentUnit::Post(p) => (Some(p.id.as_str()), None),
        ContentUnit::Comment(c) => (None, Some(c.id.as_str())),
    };
    let key = dedup_key(unit.kind(), unit.id(), &candidate.symbol, candidate.position);
    let done = sqlx::query(
        r"
        INSERT INTO mentions (
            symbol, post_id, comment_id, source, context, position, dedup_key,
            sentiment_score, sentiment_label, confidence
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(dedup_key) DO NOTHING
        ",
    )
    .bind(&candidate.symbol)
    .bind(post_id)
    .bind(comment_id)
    .bind(candidate.source.to_string())
    .bind(&candidate.context)
    .bind(candidate.position as i64)
    .bind(key)
    .bind(sentiment.map(|s| s.score))
    .bind(sentiment.map(|s| s.label.to_string()))
    .bind(sentiment.map(|s| s.confidence))
    .execute(conn)
    .await?;
    Ok(done.rows_affected() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::sentiment::{LexiconScorer, NoSentiment};
    use crate::whitelist::{Stoplist, WhitelistIndex};

    fn writer_with(pool: SqlitePool, scorer: Arc<dyn SentimentScorer>) -> MentionWriter {
        let whitelist = WhitelistIndex::parse(
            "symbol,name,active\nGME,GameStop Corp.,1\nAMC,AMC Entertainment,1\nALL,Allstate,1\n",
        )
        .unwrap();
        let extractor = TickerExtractor::new(
            Arc::new(whitelist),
            Arc::new(Stoplist::from_words(["ALL"])),
        );
        MentionWriter::new(pool, extractor, scorer)
    }

    fn writer(pool: SqlitePool) -> MentionWriter {
        writer_with(pool, Arc::new(NoSentiment))
    }

    fn post(id: &str, title: &str, body: &str) -> Post {
        Post {
            id: id.to_string(),
            subreddit_id: "wallstreetbets".to_string(),
            author: Some("roaring_kitty".to_string()),
            title: title.to_string(),
            body: body.to_string(),
            score: 42,
            created_utc: 1_792_108_800, // 2026-10-16T00:00:00Z
            ..Default::default()
        }
    }

    async fn count(pool: &SqlitePool, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
    }

    #[test]
    fn dedup_key_layout() {
        assert_eq!(dedup_key(SourceKind::Comment, "c9", "GME", 12), "comment:c9:GME:12");
    }

    #[tokio::test]
    async fn reingesting_a_post_keeps_one_row_per_position() {
        let pool = test_pool().await;
        let w = writer(pool.clone());
        let unit = ContentUnit::Post(post("p1", "GME and AMC", "more GME, ALL in"));

        let first = w.ingest(&unit).await.unwrap();
        assert_eq!(
            first,
            UnitOutcome {
                candidates: 3,
                inserted: 3,
                refetched: false
            }
        );
        let second = w.ingest(&unit).await.unwrap();
        assert_eq!(
            second,
            UnitOutcome {
                candidates: 3,
                inserted: 0,
                refetched: true
            }
        );

        assert_eq!(count(&pool, "SELECT COUNT(*) FROM mentions").await, 3);
        let keys: Vec<String> = sqlx::query_scalar("SELECT dedup_key FROM mentions ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(keys, vec!["post:p1:GME:0", "post:p1:AMC:8", "post:p1:GME:17"]);
        assert_eq!(count(&pool, "SELECT processed FROM posts WHERE id = 'p1'").await, 1);
    }

    #[tokio::test]
    async fn concurrent_writers_of_one_unit_do_not_duplicate() {
        let pool = test_pool().await;
        let w = writer(pool.clone());
        let unit = ContentUnit::Post(post("p1", "$GME", ""));
        let (a, b) = tokio::join!(w.ingest(&unit), w.ingest(&unit));
        assert_eq!(a.unwrap().inserted + b.unwrap().inserted, 1);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM mentions").await, 1);
        assert!(w.locks.is_empty());
    }

    #[tokio::test]
    async fn refetch_updates_fields_but_not_processed() {
        let pool = test_pool().await;
        let w = writer(pool.clone());
        let mut p = post("p1", "GME", "");
        w.ingest(&ContentUnit::Post(p.clone())).await.unwrap();
        p.score = 1_000;
        p.author = None;
        w.ingest(&ContentUnit::Post(p)).await.unwrap();

        let (score, author, processed): (i64, Option<String>, i64) =
            sqlx::query_as("SELECT score, author_id, processed FROM posts WHERE id = 'p1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(score, 1_000);
        assert_eq!(author, None);
        assert_eq!(processed, 1);
    }

    #[tokio::test]
    async fn failed_unit_is_not_seen_as_refetched_on_retry() {
        let pool = test_pool().await;
        let w = writer(pool.clone());
        let orphan = ContentUnit::Comment(Comment {
            id: "c1".to_string(),
            post_id: "p1".to_string(),
            body: "GME".to_string(),
            created_utc: 1_792_108_800,
            ..Default::default()
        });
        assert!(w.ingest(&orphan).await.is_err());

        w.ingest(&ContentUnit::Post(post("p1", "AMC", ""))).await.unwrap();
        let retried = w.ingest(&orphan).await.unwrap();
        assert!(!retried.refetched);
        assert_eq!(retried.inserted, 1);
        assert_eq!(count(&pool, "SELECT processed FROM comments WHERE id = 'c1'").await, 1);
    }

    #[tokio::test]
    async fn unknown_ticker_is_created_with_whitelist_metadata() {
        let pool = test_pool().await;
        let w = writer(pool.clone());
        w.ingest(&ContentUnit::Post(post("p1", "AMC", ""))).await.unwrap();
        let name: Option<String> = sqlx::query_scalar("SELECT name FROM tickers WHERE symbol = 'AMC'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("AMC Entertainment"));
    }

    #[tokio::test]
    async fn orphan_comment_rolls_back_everything() {
        let pool = test_pool().await;
        let w = writer(pool.clone());
        let orphan = ContentUnit::Comment(Comment {
            id: "c1".to_string(),
            post_id: "missing".to_string(),
            author: Some("someone_new".to_string()),
            body: "GME".to_string(),
            created_utc: 1_792_108_800,
            ..Default::default()
        });
        let err = w.ingest(&orphan).await.unwrap_err();
        assert!(!err.is_retryable_write());
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM redditors").await, 0);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM tickers").await, 0);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM mentions").await, 0);
    }

    #[tokio::test]
    async fn comment_mentions_reference_the_comment() {
        let pool = test_pool().await;
        let w = writer(pool.clone());
        w.ingest(&ContentUnit::Post(post("p1", "daily thread", ""))).await.unwrap();
        let reply = ContentUnit::Comment(Comment {
            id: "c1".to_string(),
            post_id: "p1".to_string(),
            author: None,
            body: "holding $GME".to_string(),
            created_utc: 1_792_108_900,
            ..Default::default()
        });
        assert_eq!(w.ingest(&reply).await.unwrap().inserted, 1);
        let (post_id, comment_id, source): (Option<String>, Option<String>, String) =
            sqlx::query_as("SELECT post_id, comment_id, source FROM mentions")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(post_id, None);
        assert_eq!(comment_id.as_deref(), Some("c1"));
        assert_eq!(source, "comment");
    }

    #[tokio::test]
    async fn sentiment_hook_fills_columns() {
        let pool = test_pool().await;
        let w = writer_with(pool.clone(), Arc::new(LexiconScorer));
        w.ingest(&ContentUnit::Post(post("p1", "GME to the moon", "")))
            .await
            .unwrap();
        let (score, label): (Option<f64>, Option<String>) =
            sqlx::query_as("SELECT sentiment_score, sentiment_label FROM mentions")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(score, Some(1.0));
        assert_eq!(label.as_deref(), Some("pos"));
    }

    #[tokio::test]
    async fn redditor_karma_is_never_cleared() {
        let pool = test_pool().await;
        let w = writer(pool.clone());
        w.upsert_redditors(&[Redditor {
            id: "dfv".to_string(),
            link_karma: Some(10),
            comment_karma: Some(20),
            created_utc: None,
        }])
        .await
        .unwrap();
        w.upsert_redditors(&[Redditor {
            id: "dfv".to_string(),
            link_karma: None,
            comment_karma: Some(25),
            created_utc: None,
        }])
        .await
        .unwrap();
        let (link, comment): (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT link_karma, comment_karma FROM redditors WHERE id = 'dfv'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!((link, comment), (Some(10), Some(25)));
    }
}
