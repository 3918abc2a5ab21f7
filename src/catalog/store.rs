//! SQLite-backed catalog.
//!
//! Timestamps are stored as Unix seconds. Slice replacement and chapter
//! deletion run inside a single transaction so readers never observe a
//! half-replaced slice list.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::models::{
    Chapter, ChapterRow, ImageSlice, NewSlice, NewWork, Work, WorkRow, WorkUpdate,
};
use super::numbering::{slugify, sort_newest_first};
use crate::error::CatalogError;
use crate::events::{self, ChapterEvent};

/// Schema, applied idempotently on startup.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS works (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        slug TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        chapters_are_vip INTEGER NOT NULL DEFAULT 0,
        default_chapters_are_vip INTEGER NOT NULL DEFAULT 0,
        recent_vip_chapter_count INTEGER NOT NULL DEFAULT 0,
        vip_tier_size INTEGER NOT NULL DEFAULT 3,
        vip_base_release_days INTEGER NOT NULL DEFAULT 7,
        vip_days_decrease_per_tier INTEGER NOT NULL DEFAULT 2,
        coin_unlock_price INTEGER NOT NULL DEFAULT 0,
        views_count INTEGER NOT NULL DEFAULT 0,
        donation_goal INTEGER NOT NULL DEFAULT 0,
        current_donations INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chapters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        work_id INTEGER NOT NULL REFERENCES works(id) ON DELETE CASCADE,
        number TEXT NOT NULL,
        slug TEXT NOT NULL,
        title TEXT NOT NULL,
        is_vip INTEGER NOT NULL DEFAULT 0,
        release_at INTEGER,
        published_at INTEGER,
        thumbnail_path TEXT,
        views INTEGER NOT NULL DEFAULT 0,
        UNIQUE (work_id, number),
        UNIQUE (work_id, slug)
    )",
    "CREATE TABLE IF NOT EXISTS image_slices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chapter_id INTEGER NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
        sort_order INTEGER NOT NULL,
        original_filename TEXT NOT NULL,
        blob_path TEXT NOT NULL,
        encrypted INTEGER NOT NULL DEFAULT 0,
        UNIQUE (chapter_id, sort_order)
    )",
    "CREATE TABLE IF NOT EXISTS wallets (
        user_id TEXT PRIMARY KEY,
        balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chapter_unlocks (
        user_id TEXT NOT NULL,
        chapter_id INTEGER NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
        cost INTEGER NOT NULL,
        unlocked_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, chapter_id)
    )",
    "CREATE TABLE IF NOT EXISTS donations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        work_id INTEGER NOT NULL REFERENCES works(id) ON DELETE CASCADE,
        amount INTEGER NOT NULL,
        donated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS outbox_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        delivered_at INTEGER,
        attempts INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS oauth_apps (
        provider TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        secret TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_chapters_work ON chapters (work_id)",
    "CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox_events (delivered_at)",
];

const WORK_COLUMNS: &str = "id, slug, title, chapters_are_vip, default_chapters_are_vip, \
     recent_vip_chapter_count, vip_tier_size, vip_base_release_days, \
     vip_days_decrease_per_tier, coin_unlock_price, views_count, donation_goal, \
     current_donations, created_at";

const CHAPTER_COLUMNS: &str = "id, work_id, number, slug, title, is_vip, release_at, \
     published_at, thumbnail_path, views";

const SLICE_COLUMNS: &str = "id, chapter_id, sort_order, original_filename, blob_path, encrypted";

/// Default connections for file-backed databases.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

// =============================================================================
// Catalog
// =============================================================================

/// Handle to the catalog database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

/// Result of looking up or creating a chapter during ingestion.
#[derive(Debug, Clone)]
pub struct ChapterUpsert {
    pub chapter: Chapter,
    pub created: bool,
}

/// What remains to clean up after a chapter row is gone.
#[derive(Debug, Clone)]
pub struct DeletedChapter {
    pub chapter: Chapter,
    pub work_slug: String,
    /// Ids of the removed slices, for cache invalidation
    pub slice_ids: Vec<i64>,
    /// Slice files plus the thumbnail, if any
    pub blob_paths: Vec<String>,
}

impl Catalog {
    /// Open (creating if missing) the database at `url` and apply the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, CatalogError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.migrate().await?;
        info!(url, "Catalog database ready");
        Ok(catalog)
    }

    /// Private in-memory database, used by tests and `--database-url sqlite::memory:`.
    ///
    /// A single connection that never expires, since each SQLite memory
    /// connection is its own database.
    pub async fn in_memory() -> Result<Self, CatalogError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.migrate().await?;
        Ok(catalog)
    }

    /// Wrap an existing pool. The schema is not applied.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all tables that do not exist yet.
    pub async fn migrate(&self) -> Result<(), CatalogError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Works
    // =========================================================================

    /// Create a work. The slug is normalized with [`slugify`].
    pub async fn create_work(&self, new: &NewWork, now: DateTime<Utc>) -> Result<Work, CatalogError> {
        let slug = slugify(&new.slug);
        if slug.is_empty() {
            return Err(CatalogError::InvalidWork {
                reason: format!("slug '{}' has no usable characters", new.slug),
            });
        }
        if new.title.trim().is_empty() {
            return Err(CatalogError::InvalidWork {
                reason: "title must not be empty".to_string(),
            });
        }
        if new.coin_unlock_price < 0 || new.donation_goal < 0 {
            return Err(CatalogError::InvalidWork {
                reason: "prices and goals must not be negative".to_string(),
            });
        }

        let tier = &new.tier;
        let sql = format!(
            "INSERT INTO works (slug, title, chapters_are_vip, default_chapters_are_vip, \
             recent_vip_chapter_count, vip_tier_size, vip_base_release_days, \
             vip_days_decrease_per_tier, coin_unlock_price, donation_goal, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {}",
            WORK_COLUMNS
        );
        let row = sqlx::query_as::<_, WorkRow>(&sql)
            .bind(&slug)
            .bind(new.title.trim())
            .bind(tier.chapters_are_vip)
            .bind(tier.default_chapters_are_vip)
            .bind(tier.recent_vip_chapter_count as i64)
            .bind(tier.vip_tier_size as i64)
            .bind(tier.vip_base_release_days as i64)
            .bind(tier.vip_days_decrease_per_tier as i64)
            .bind(new.coin_unlock_price)
            .bind(new.donation_goal)
            .bind(now.timestamp())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    CatalogError::WorkExists { slug: slug.clone() }
                }
                other => CatalogError::Database(other),
            })?;

        info!(work = %slug, "Created work");
        row.try_into()
    }

    /// Apply a partial update to a work.
    pub async fn update_work(&self, slug: &str, update: &WorkUpdate) -> Result<Work, CatalogError> {
        let mut work = self.work_by_slug(slug).await?;

        if let Some(ref title) = update.title {
            work.title = title.trim().to_string();
        }
        if let Some(tier) = update.tier {
            work.tier = tier;
        }
        if let Some(price) = update.coin_unlock_price {
            work.coin_unlock_price = price;
        }
        if let Some(goal) = update.donation_goal {
            work.donation_goal = goal;
        }
        if work.coin_unlock_price < 0 || work.donation_goal < 0 {
            return Err(CatalogError::InvalidWork {
                reason: "prices and goals must not be negative".to_string(),
            });
        }

        let tier = &work.tier;
        sqlx::query(
            "UPDATE works SET title = ?, chapters_are_vip = ?, default_chapters_are_vip = ?, \
             recent_vip_chapter_count = ?, vip_tier_size = ?, vip_base_release_days = ?, \
             vip_days_decrease_per_tier = ?, coin_unlock_price = ?, donation_goal = ?, \
             current_donations = CASE WHEN ? THEN 0 ELSE current_donations END \
             WHERE id = ?",
        )
        .bind(&work.title)
        .bind(tier.chapters_are_vip)
        .bind(tier.default_chapters_are_vip)
        .bind(tier.recent_vip_chapter_count as i64)
        .bind(tier.vip_tier_size as i64)
        .bind(tier.vip_base_release_days as i64)
        .bind(tier.vip_days_decrease_per_tier as i64)
        .bind(work.coin_unlock_price)
        .bind(work.donation_goal)
        .bind(update.reset_donations)
        .bind(work.id)
        .execute(&self.pool)
        .await?;

        debug!(work = %work.slug, "Updated work");
        self.work_by_id(work.id).await
    }

    pub async fn work_by_slug(&self, slug: &str) -> Result<Work, CatalogError> {
        let sql = format!("SELECT {} FROM works WHERE slug = ?", WORK_COLUMNS);
        sqlx::query_as::<_, WorkRow>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CatalogError::WorkNotFound {
                slug: slug.to_string(),
            })?
            .try_into()
    }

    pub async fn work_by_id(&self, id: i64) -> Result<Work, CatalogError> {
        let sql = format!("SELECT {} FROM works WHERE id = ?", WORK_COLUMNS);
        sqlx::query_as::<_, WorkRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CatalogError::WorkNotFound {
                slug: format!("#{}", id),
            })?
            .try_into()
    }

    /// All works, by title.
    pub async fn list_works(&self) -> Result<Vec<Work>, CatalogError> {
        let sql = format!("SELECT {} FROM works ORDER BY title COLLATE NOCASE", WORK_COLUMNS);
        sqlx::query_as::<_, WorkRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Work::try_from)
            .collect()
    }

    // =========================================================================
    // Chapters
    // =========================================================================

    /// Every chapter of a work, newest first.
    pub async fn chapters_for_work(&self, work_id: i64) -> Result<Vec<Chapter>, CatalogError> {
        let sql = format!("SELECT {} FROM chapters WHERE work_id = ?", CHAPTER_COLUMNS);
        let mut chapters = sqlx::query_as::<_, ChapterRow>(&sql)
            .bind(work_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Chapter::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        sort_newest_first(&mut chapters);
        Ok(chapters)
    }

    /// Find a chapter of a work by slug or by number.
    pub async fn find_chapter(&self, work: &Work, key: &str) -> Result<Chapter, CatalogError> {
        let sql = format!(
            "SELECT {} FROM chapters WHERE work_id = ? AND (slug = ? OR number = ?) \
             ORDER BY slug = ? DESC LIMIT 1",
            CHAPTER_COLUMNS
        );
        sqlx::query_as::<_, ChapterRow>(&sql)
            .bind(work.id)
            .bind(key)
            .bind(key)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CatalogError::ChapterNotFound {
                work: work.slug.clone(),
                chapter: key.to_string(),
            })?
            .try_into()
    }

    pub async fn chapter_by_id(&self, id: i64) -> Result<Chapter, CatalogError> {
        let sql = format!("SELECT {} FROM chapters WHERE id = ?", CHAPTER_COLUMNS);
        sqlx::query_as::<_, ChapterRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CatalogError::ChapterNotFound {
                work: String::new(),
                chapter: format!("#{}", id),
            })?
            .try_into()
    }

    /// Atomically count one view for a chapter and its work.
    pub async fn record_view(&self, chapter: &Chapter) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE chapters SET views = views + 1 WHERE id = ?")
            .bind(chapter.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE works SET views_count = views_count + 1 WHERE id = ?")
            .bind(chapter.work_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a chapter with its slices and unlocks.
    ///
    /// Returns the blob paths to remove once the transaction has committed.
    pub async fn delete_chapter(
        &self,
        work: &Work,
        chapter: &Chapter,
        now: DateTime<Utc>,
    ) -> Result<DeletedChapter, CatalogError> {
        let mut tx = self.pool.begin().await?;

        let slices = slices_for_chapter_in(&mut tx, chapter.id).await?;
        sqlx::query("DELETE FROM chapters WHERE id = ?")
            .bind(chapter.id)
            .execute(&mut *tx)
            .await?;

        let event = ChapterEvent::Deleted {
            work_slug: work.slug.clone(),
            chapter_number: chapter.number.clone(),
        };
        events::record(&mut tx, &event, now).await?;

        tx.commit().await?;
        info!(work = %work.slug, chapter = %chapter.number, "Deleted chapter");

        let slice_ids = slices.iter().map(|s| s.id).collect();
        let mut blob_paths: Vec<String> = slices.into_iter().map(|s| s.blob_path).collect();
        blob_paths.extend(chapter.thumbnail_path.clone());

        Ok(DeletedChapter {
            chapter: chapter.clone(),
            work_slug: work.slug.clone(),
            slice_ids,
            blob_paths,
        })
    }

    // =========================================================================
    // Slices
    // =========================================================================

    /// Slices of a chapter in display order.
    pub async fn slices_for_chapter(&self, chapter_id: i64) -> Result<Vec<ImageSlice>, CatalogError> {
        let mut conn = self.pool.acquire().await?;
        slices_for_chapter_in(&mut conn, chapter_id).await
    }

    pub async fn slice_by_id(&self, id: i64) -> Result<ImageSlice, CatalogError> {
        let sql = format!("SELECT {} FROM image_slices WHERE id = ?", SLICE_COLUMNS);
        sqlx::query_as::<_, ImageSlice>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CatalogError::SliceNotFound { id })
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================
//
// Ingestion groups several chapters into one transaction, so these take a
// connection rather than the pool.

pub(crate) async fn slices_for_chapter_in(
    conn: &mut SqliteConnection,
    chapter_id: i64,
) -> Result<Vec<ImageSlice>, CatalogError> {
    let sql = format!(
        "SELECT {} FROM image_slices WHERE chapter_id = ? ORDER BY sort_order ASC",
        SLICE_COLUMNS
    );
    Ok(sqlx::query_as::<_, ImageSlice>(&sql)
        .bind(chapter_id)
        .fetch_all(conn)
        .await?)
}

/// Find the chapter numbered `number` in `work`, creating it if needed.
///
/// New chapters are released `now` and inherit the work's default VIP flag.
pub(crate) async fn upsert_chapter(
    conn: &mut SqliteConnection,
    work: &Work,
    number: &str,
    now: DateTime<Utc>,
) -> Result<ChapterUpsert, CatalogError> {
    let sql = format!(
        "SELECT {} FROM chapters WHERE work_id = ? AND number = ?",
        CHAPTER_COLUMNS
    );
    let existing = sqlx::query_as::<_, ChapterRow>(&sql)
        .bind(work.id)
        .bind(number)
        .fetch_optional(&mut *conn)
        .await?;

    if let Some(row) = existing {
        return Ok(ChapterUpsert {
            chapter: row.try_into()?,
            created: false,
        });
    }

    let mut base = slugify(number);
    if base.is_empty() {
        base = format!("extra-{}", now.timestamp());
    }
    let slug = unique_chapter_slug(&mut *conn, work.id, &base).await?;
    let title = format!("{} - Capítulo {}", work.title, number);

    let sql = format!(
        "INSERT INTO chapters (work_id, number, slug, title, is_vip, release_at, published_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {}",
        CHAPTER_COLUMNS
    );
    let row = sqlx::query_as::<_, ChapterRow>(&sql)
        .bind(work.id)
        .bind(number)
        .bind(&slug)
        .bind(&title)
        .bind(work.tier.default_chapters_are_vip)
        .bind(now.timestamp())
        .bind(now.timestamp())
        .fetch_one(&mut *conn)
        .await?;

    Ok(ChapterUpsert {
        chapter: row.try_into()?,
        created: true,
    })
}

/// `base`, or `base-2`, `base-3`, ... when distinct numbers share a slug.
async fn unique_chapter_slug(
    conn: &mut SqliteConnection,
    work_id: i64,
    base: &str,
) -> Result<String, CatalogError> {
    let mut candidate = base.to_string();
    let mut suffix = 1;
    loop {
        let taken: Option<i64> =
            sqlx::query_scalar("SELECT id FROM chapters WHERE work_id = ? AND slug = ?")
                .bind(work_id)
                .bind(&candidate)
                .fetch_optional(&mut *conn)
                .await?;
        if taken.is_none() {
            return Ok(candidate);
        }
        suffix += 1;
        candidate = format!("{}-{}", base, suffix);
    }
}

/// Replace every slice row of a chapter.
///
/// Returns the removed rows, whose blobs the caller deletes after commit.
pub(crate) async fn replace_slices(
    conn: &mut SqliteConnection,
    chapter_id: i64,
    slices: &[NewSlice],
) -> Result<Vec<ImageSlice>, CatalogError> {
    let old = slices_for_chapter_in(&mut *conn, chapter_id).await?;

    sqlx::query("DELETE FROM image_slices WHERE chapter_id = ?")
        .bind(chapter_id)
        .execute(&mut *conn)
        .await?;

    for slice in slices {
        sqlx::query(
            "INSERT INTO image_slices (chapter_id, sort_order, original_filename, blob_path, encrypted) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chapter_id)
        .bind(slice.sort_order)
        .bind(&slice.original_filename)
        .bind(&slice.blob_path)
        .bind(slice.encrypted)
        .execute(&mut *conn)
        .await?;
    }

    Ok(old)
}

pub(crate) async fn set_thumbnail(
    conn: &mut SqliteConnection,
    chapter_id: i64,
    path: &str,
) -> Result<(), CatalogError> {
    sqlx::query("UPDATE chapters SET thumbnail_path = ? WHERE id = ?")
        .bind(path)
        .bind(chapter_id)
        .execute(conn)
        .await?;
    Ok(())
}
