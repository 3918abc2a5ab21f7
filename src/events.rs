//! Outbound chapter events.
//!
//! Producers write a [`ChapterEvent`] into the `outbox_events` table inside
//! the same transaction as the change it describes. After commit, the
//! caller hands the outbox to a [`Notifier`] with [`drain_outbox`]; events
//! whose delivery fails stay pending for the next drain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::error::CatalogError;

/// Pending events fetched per drain.
const DRAIN_BATCH: i64 = 100;

/// Something that happened to a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChapterEvent {
    /// A chapter was created or its images replaced
    Published {
        work_slug: String,
        work_title: String,
        chapter_number: String,
        chapter_slug: String,
        slice_count: usize,
        created: bool,
    },
    /// A chapter and its assets were removed
    Deleted {
        work_slug: String,
        chapter_number: String,
    },
}

impl ChapterEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChapterEvent::Published { .. } => "published",
            ChapterEvent::Deleted { .. } => "deleted",
        }
    }
}

/// A stored event awaiting delivery.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: i64,
    pub event: ChapterEvent,
    pub created_at: DateTime<Utc>,
    pub attempts: i64,
}

#[derive(Debug, FromRow)]
struct OutboxRow {
    id: i64,
    payload: String,
    created_at: i64,
    attempts: i64,
}

/// Delivers events to the outside world (chat webhooks, CDN purges, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), String>;
}

/// Notifier that only logs. Used when no delivery target is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), String> {
        match &event.event {
            ChapterEvent::Published {
                work_slug,
                chapter_number,
                slice_count,
                created,
                ..
            } => info!(
                work = %work_slug,
                chapter = %chapter_number,
                slices = slice_count,
                new_chapter = created,
                "Chapter published"
            ),
            ChapterEvent::Deleted {
                work_slug,
                chapter_number,
            } => info!(work = %work_slug, chapter = %chapter_number, "Chapter deleted"),
        }
        Ok(())
    }
}

/// Queue an event in the caller's transaction.
pub async fn record(
    conn: &mut SqliteConnection,
    event: &ChapterEvent,
    now: DateTime<Utc>,
) -> Result<(), CatalogError> {
    // ChapterEvent holds only strings and integers
    let payload = serde_json::to_string(event).unwrap_or_default();
    sqlx::query("INSERT INTO outbox_events (kind, payload, created_at) VALUES (?, ?, ?)")
        .bind(event.kind())
        .bind(payload)
        .bind(now.timestamp())
        .execute(conn)
        .await?;
    Ok(())
}

/// Events not yet delivered, oldest first.
pub async fn pending(pool: &SqlitePool) -> Result<Vec<OutboxEvent>, CatalogError> {
    let rows = sqlx::query_as::<_, OutboxRow>(
        "SELECT id, payload, created_at, attempts FROM outbox_events \
         WHERE delivered_at IS NULL ORDER BY id ASC LIMIT ?",
    )
    .bind(DRAIN_BATCH)
    .fetch_all(pool)
    .await?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_str::<ChapterEvent>(&row.payload) {
            Ok(event) => events.push(OutboxEvent {
                id: row.id,
                event,
                created_at: crate::catalog::timestamp(row.created_at)?,
                attempts: row.attempts,
            }),
            Err(e) => warn!(event_id = row.id, error = %e, "Skipping unreadable outbox event"),
        }
    }
    Ok(events)
}

/// Deliver pending events; returns how many were delivered.
pub async fn drain_outbox(
    pool: &SqlitePool,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> Result<usize, CatalogError> {
    let mut delivered = 0;

    for event in pending(pool).await? {
        match notifier.deliver(&event).await {
            Ok(()) => {
                sqlx::query(
                    "UPDATE outbox_events SET delivered_at = ?, attempts = attempts + 1 WHERE id = ?",
                )
                .bind(now.timestamp())
                .bind(event.id)
                .execute(pool)
                .await?;
                delivered += 1;
            }
            Err(e) => {
                warn!(event_id = event.id, kind = event.event.kind(), error = %e, "Event delivery failed");
                sqlx::query("UPDATE outbox_events SET attempts = attempts + 1 WHERE id = ?")
                    .bind(event.id)
                    .execute(pool)
                    .await?;
            }
        }
    }

    Ok(delivered)
}
