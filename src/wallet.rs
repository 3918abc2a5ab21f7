//! Coin wallets: balances, chapter unlocks and donations.
//!
//! Every spend debits with a single conditional statement,
//!
//! ```sql
//! UPDATE wallets SET balance = balance - ? WHERE user_id = ? AND balance >= ?
//! ```
//!
//! issued as the first write of its transaction. SQLite grants one writer at
//! a time, so a concurrent spend waits for the lock and then sees the
//! debited balance; a debit that matches no row is a
//! [`LedgerError::ConcurrentBalanceConflict`] and nothing is written.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::LedgerError;

/// Result of buying a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockReceipt {
    pub chapter_id: i64,
    pub cost: i64,
    pub balance: i64,
}

/// Result of a donation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationReceipt {
    pub work_id: i64,
    pub amount: i64,
    pub balance: i64,
    pub current_donations: i64,
    pub donation_goal: i64,
}

/// Coin ledger over the catalog database.
#[derive(Debug, Clone)]
pub struct Ledger {
    catalog: Catalog,
}

impl Ledger {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    fn pool(&self) -> &SqlitePool {
        self.catalog.pool()
    }

    /// Current balance; users without a wallet have zero.
    pub async fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT balance FROM wallets WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| r.0).unwrap_or(0))
    }

    /// Add coins, e.g. after a confirmed payment. Returns the new balance.
    pub async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let (balance,): (i64,) = sqlx::query_as(
            "INSERT INTO wallets (user_id, balance, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                balance = balance + excluded.balance,
                updated_at = excluded.updated_at
             RETURNING balance",
        )
        .bind(user_id)
        .bind(amount)
        .bind(now.timestamp())
        .fetch_one(self.pool())
        .await?;

        info!(user = %user_id, amount, balance, "Credited wallet");
        Ok(balance)
    }

    /// Buy a permanent unlock of one chapter at its work's coin price.
    pub async fn unlock_chapter(
        &self,
        user_id: &str,
        chapter_id: i64,
        now: DateTime<Utc>,
    ) -> Result<UnlockReceipt, LedgerError> {
        let chapter = self.catalog.chapter_by_id(chapter_id).await?;
        let work = self.catalog.work_by_id(chapter.work_id).await?;
        let price = work.coin_unlock_price;
        if price <= 0 {
            return Err(LedgerError::NotPurchasable { chapter_id });
        }
        if self.has_unlocked(user_id, chapter_id).await? {
            return Err(LedgerError::AlreadyUnlocked {
                user_id: user_id.to_string(),
                chapter_id,
            });
        }

        let mut tx = self.pool().begin().await?;

        let debited = sqlx::query(
            "UPDATE wallets SET balance = balance - ?, updated_at = ?
             WHERE user_id = ? AND balance >= ?",
        )
        .bind(price)
        .bind(now.timestamp())
        .bind(user_id)
        .bind(price)
        .execute(&mut *tx)
        .await?;
        if debited.rows_affected() == 0 {
            debug!(user = %user_id, chapter_id, price, "Unlock rejected: balance too low");
            return Err(LedgerError::ConcurrentBalanceConflict {
                user_id: user_id.to_string(),
                required: price,
            });
        }

        // A concurrent purchase of the same chapter may have landed first
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO chapter_unlocks (user_id, chapter_id, cost, unlocked_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(chapter_id)
        .bind(price)
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(LedgerError::AlreadyUnlocked {
                user_id: user_id.to_string(),
                chapter_id,
            });
        }

        let (balance,): (i64,) = sqlx::query_as("SELECT balance FROM wallets WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(user = %user_id, chapter_id, cost = price, balance, "Chapter unlocked with coins");
        Ok(UnlockReceipt {
            chapter_id,
            cost: price,
            balance,
        })
    }

    /// Give coins toward a work's donation goal.
    pub async fn donate(
        &self,
        user_id: &str,
        work_slug: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<DonationReceipt, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let work = self.catalog.work_by_slug(work_slug).await?;

        let mut tx = self.pool().begin().await?;

        let debited = sqlx::query(
            "UPDATE wallets SET balance = balance - ?, updated_at = ?
             WHERE user_id = ? AND balance >= ?",
        )
        .bind(amount)
        .bind(now.timestamp())
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;
        if debited.rows_affected() == 0 {
            return Err(LedgerError::ConcurrentBalanceConflict {
                user_id: user_id.to_string(),
                required: amount,
            });
        }

        let (current_donations,): (i64,) = sqlx::query_as(
            "UPDATE works SET current_donations = current_donations + ? WHERE id = ?
             RETURNING current_donations",
        )
        .bind(amount)
        .bind(work.id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO donations (user_id, work_id, amount, donated_at) VALUES (?, ?, ?, ?)")
            .bind(user_id)
            .bind(work.id)
            .bind(amount)
            .bind(now.timestamp())
            .execute(&mut *tx)
            .await?;

        let (balance,): (i64,) = sqlx::query_as("SELECT balance FROM wallets WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(user = %user_id, work = %work.slug, amount, "Donation received");
        Ok(DonationReceipt {
            work_id: work.id,
            amount,
            balance,
            current_donations,
            donation_goal: work.donation_goal,
        })
    }

    pub async fn has_unlocked(&self, user_id: &str, chapter_id: i64) -> Result<bool, LedgerError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM chapter_unlocks WHERE user_id = ? AND chapter_id = ?")
                .bind(user_id)
                .bind(chapter_id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.is_some())
    }

    /// Chapters of a work the user has bought.
    pub async fn unlocked_in_work(
        &self,
        user_id: &str,
        work_id: i64,
    ) -> Result<HashSet<i64>, LedgerError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT u.chapter_id FROM chapter_unlocks u
             JOIN chapters c ON c.id = u.chapter_id
             WHERE u.user_id = ? AND c.work_id = ?",
        )
        .bind(user_id)
        .bind(work_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
