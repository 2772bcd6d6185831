//! Metered usage and quota.
//!
//! One `usage_tracking` row per successful pipeline run, unique on report id.
//! Quota is derived from the current billing period: the active
//! subscription's period, or the calendar month for free users.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::db::{get_ts, ts, Database, DbError, FromRow, Tx};

pub const FREE_PLAN: &str = "free";

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("Database error: {0}")]
    Database(String),
}

impl From<DbError> for UsageError {
    fn from(e: DbError) -> Self {
        UsageError::Database(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Asset and audiobook runs.
    Basic,
    /// Editorial analysis runs.
    Full,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Basic => "basic",
            AnalysisKind::Full => "full",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub plan_type: String,
    pub plan_limit: u32,
    pub used_this_period: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Set when the user has a paid subscription.
    pub subscription_id: Option<String>,
}

impl Quota {
    pub fn is_exhausted(&self) -> bool {
        self.used_this_period >= self.plan_limit
    }

    pub fn remaining(&self) -> u32 {
        self.plan_limit.saturating_sub(self.used_this_period)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_type: String,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

impl Subscription {
    fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            plan_type: row.get(2)?,
            status: row.get(3)?,
            current_period_start: get_ts(row, 4)?,
            current_period_end: get_ts(row, 5)?,
            stripe_customer_id: row.get(6)?,
            stripe_subscription_id: row.get(7)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub user_id: String,
    pub subscription_id: Option<String>,
    pub plan_type: String,
    pub manuscript_id: String,
    pub report_id: String,
    pub analysis_type: AnalysisKind,
    pub credits_used: u32,
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl FromRow for UsageEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get(5)?;
        Ok(UsageEvent {
            user_id: row.get(0)?,
            subscription_id: row.get(1)?,
            plan_type: row.get(2)?,
            manuscript_id: row.get(3)?,
            report_id: row.get(4)?,
            analysis_type: if kind == "full" {
                AnalysisKind::Full
            } else {
                AnalysisKind::Basic
            },
            credits_used: row.get(6)?,
            billing_period_start: get_ts(row, 7)?,
            billing_period_end: get_ts(row, 8)?,
            created_at: get_ts(row, 9)?,
        })
    }
}

/// Calendar month containing `at`, as `[start, end)`.
pub fn calendar_month(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc
        .with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(at);
    let (year, month) = if at.month() == 12 {
        (at.year() + 1, 1)
    } else {
        (at.year(), at.month() + 1)
    };
    let end = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(at);
    (start, end)
}

/// Quota resolution and usage recording.
#[derive(Clone)]
pub struct UsageLedger {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    plans: BTreeMap<String, u32>,
}

impl UsageLedger {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, plans: BTreeMap<String, u32>) -> Self {
        Self { db, clock, plans }
    }

    fn plan_limit(&self, plan_type: &str) -> u32 {
        self.plans
            .get(plan_type)
            .or_else(|| self.plans.get(FREE_PLAN))
            .copied()
            .unwrap_or(0)
    }

    pub fn subscription(&self, user_id: &str) -> Result<Option<Subscription>, UsageError> {
        Ok(self
            .db
            .prepare(
                "SELECT id, user_id, plan_type, status, current_period_start, current_period_end, \
                 stripe_customer_id, stripe_subscription_id FROM subscriptions WHERE user_id = ?",
            )
            .bind(user_id)
            .first()?)
    }

    /// Insert or replace the user's subscription. Normally written by the
    /// billing collaborator.
    pub fn upsert_subscription(&self, sub: &Subscription) -> Result<(), UsageError> {
        let now = ts(self.clock.now());
        self.db
            .prepare(
                "INSERT INTO subscriptions (id, user_id, plan_type, status, current_period_start, \
                 current_period_end, stripe_customer_id, stripe_subscription_id, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(user_id) DO UPDATE SET plan_type = excluded.plan_type, \
                 status = excluded.status, current_period_start = excluded.current_period_start, \
                 current_period_end = excluded.current_period_end, \
                 stripe_customer_id = excluded.stripe_customer_id, \
                 stripe_subscription_id = excluded.stripe_subscription_id, \
                 updated_at = excluded.updated_at",
            )
            .bind(sub.id.as_str())
            .bind(sub.user_id.as_str())
            .bind(sub.plan_type.as_str())
            .bind(sub.status.as_str())
            .bind(ts(sub.current_period_start))
            .bind(ts(sub.current_period_end))
            .bind(sub.stripe_customer_id.as_deref())
            .bind(sub.stripe_subscription_id.as_deref())
            .bind(now.clone())
            .bind(now)
            .run()?;
        Ok(())
    }

    /// Current quota for `user_id`.
    pub fn quota(&self, user_id: &str) -> Result<Quota, UsageError> {
        let now = self.clock.now();
        let active = self.subscription(user_id)?.filter(|s| {
            s.is_active() && s.current_period_start <= now && now < s.current_period_end
        });

        let (plan_type, subscription_id, start, end) = match active {
            Some(sub) => (
                sub.plan_type,
                Some(sub.id),
                sub.current_period_start,
                sub.current_period_end,
            ),
            None => {
                let (start, end) = calendar_month(now);
                (FREE_PLAN.to_string(), None, start, end)
            }
        };

        let used: Option<i64> = self
            .db
            .prepare(
                "SELECT COALESCE(SUM(credits_used), 0) FROM usage_tracking \
                 WHERE user_id = ? AND created_at >= ? AND created_at < ?",
            )
            .bind(user_id)
            .bind(ts(start))
            .bind(ts(end))
            .scalar()?;

        Ok(Quota {
            plan_limit: self.plan_limit(&plan_type),
            plan_type,
            used_this_period: used.unwrap_or(0).max(0) as u32,
            period_start: start,
            period_end: end,
            subscription_id,
        })
    }

    /// Build the event for a finished run against the user's current quota.
    pub fn event_for(
        &self,
        quota: &Quota,
        user_id: &str,
        manuscript_id: &str,
        report_id: &str,
        analysis_type: AnalysisKind,
    ) -> UsageEvent {
        UsageEvent {
            user_id: user_id.to_string(),
            subscription_id: quota.subscription_id.clone(),
            plan_type: quota.plan_type.clone(),
            manuscript_id: manuscript_id.to_string(),
            report_id: report_id.to_string(),
            analysis_type,
            credits_used: 1,
            billing_period_start: quota.period_start,
            billing_period_end: quota.period_end,
            created_at: self.clock.now(),
        }
    }

    /// Insert inside `tx`. Returns false when this report id was already
    /// recorded.
    pub fn record_in(&self, tx: &Tx<'_>, event: &UsageEvent) -> Result<bool, UsageError> {
        let result = tx
            .prepare(
                "INSERT OR IGNORE INTO usage_tracking (user_id, subscription_id, plan_type, \
                 manuscript_id, report_id, analysis_type, credits_used, billing_period_start, \
                 billing_period_end, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(event.user_id.as_str())
            .bind(event.subscription_id.as_deref())
            .bind(event.plan_type.as_str())
            .bind(event.manuscript_id.as_str())
            .bind(event.report_id.as_str())
            .bind(event.analysis_type.as_str())
            .bind(event.credits_used)
            .bind(ts(event.billing_period_start))
            .bind(ts(event.billing_period_end))
            .bind(ts(event.created_at))
            .run()?;
        Ok(result.changes == 1)
    }

    pub fn events_for_report(&self, report_id: &str) -> Result<Vec<UsageEvent>, UsageError> {
        Ok(self
            .db
            .prepare(
                "SELECT user_id, subscription_id, plan_type, manuscript_id, report_id, analysis_type, \
                 credits_used, billing_period_start, billing_period_end, created_at \
                 FROM usage_tracking WHERE report_id = ?",
            )
            .bind(report_id)
            .all()?)
    }
}
