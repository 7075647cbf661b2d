//! Subscription ledger operations.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Row};

use crate::domain::{
    BillingCycle, MailId, Subscription, SubscriptionId, SubscriptionStatus, UserId,
};
use crate::storage::database::{Database, Result};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, mail_id, service_name, amount, currency, \
     billing_cycle, next_billing_date, status, confidence_score, user_verified, \
     first_detected, last_updated, category_id, notes";

/// Inserts a detected subscription unless `(user, service, amount)`
/// already exists. Returns whether a row was created.
pub async fn upsert_ignore(db: &Database, subscription: &Subscription) -> Result<bool> {
    let subscription = subscription.clone();

    db.with_conn(move |conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO subscriptions
                 (id, user_id, mail_id, service_name, amount, currency, billing_cycle,
                  next_billing_date, status, confidence_score, user_verified,
                  first_detected, last_updated, category_id, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                subscription.id.0,
                subscription.user_id.0,
                subscription.mail_id.as_ref().map(|m| &m.0),
                subscription.service_name,
                subscription.amount,
                subscription.currency,
                subscription.billing_cycle.as_str(),
                subscription.next_billing_date.map(|d| d.to_string()),
                subscription.status.as_str(),
                subscription.confidence_score,
                subscription.user_verified as i32,
                subscription.first_detected.to_rfc3339(),
                subscription.last_updated.to_rfc3339(),
                subscription.category_id,
                subscription.notes,
            ],
        )?;
        Ok(inserted > 0)
    })
    .await
}

/// Lists a user's subscriptions, newest detection first.
pub async fn list_for_user(db: &Database, user_id: &UserId) -> Result<Vec<Subscription>> {
    let user_id = user_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE user_id = ?1
             ORDER BY first_detected DESC"
        ))?;
        let rows = stmt.query_map([&user_id.0], row_to_subscription)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Counts a user's subscriptions.
pub async fn count_for_user(db: &Database, user_id: &UserId) -> Result<i64> {
    let user_id = user_id.clone();

    db.with_conn(move |conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM subscriptions WHERE user_id = ?1",
            [&user_id.0],
            |row| row.get(0),
        )?)
    })
    .await
}

fn row_to_subscription(row: &Row<'_>) -> std::result::Result<Subscription, rusqlite::Error> {
    let mail_id: Option<String> = row.get(2)?;
    let billing_cycle: String = row.get(6)?;
    let next_billing_date: Option<String> = row.get(7)?;
    let status: String = row.get(8)?;
    let first_detected: String = row.get(11)?;
    let last_updated: String = row.get(12)?;

    Ok(Subscription {
        id: SubscriptionId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        mail_id: mail_id.map(MailId),
        service_name: row.get(3)?,
        amount: row.get(4)?,
        currency: row.get(5)?,
        billing_cycle: BillingCycle::parse(&billing_cycle).unwrap_or(BillingCycle::Monthly),
        next_billing_date: next_billing_date
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
        status: SubscriptionStatus::parse(&status).unwrap_or(SubscriptionStatus::Active),
        confidence_score: row.get(9)?,
        user_verified: row.get::<_, i32>(10)? != 0,
        first_detected: DateTime::parse_from_rfc3339(&first_detected)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        last_updated: DateTime::parse_from_rfc3339(&last_updated)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        category_id: row.get(13)?,
        notes: row.get(14)?,
    })
}
