use crate::framework::DatabaseProcessor;
use crate::matcher::{self, EventPattern, EventPatterns};
use crmsync_sdk::objects::{SubscriptionResponse, unix_millis};
use kanau::processor::Processor;
use time::OffsetDateTime;
use uuid::Uuid;

/// Error count above which a subscription is switched off.
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: Uuid,
    pub url: String,
    pub patterns: EventPatterns,
    pub secret: String,
    pub active: bool,
    pub created_at: OffsetDateTime,
    pub last_notified_at: Option<OffsetDateTime>,
    pub success_count: u64,
    pub error_count: u64,
}

impl Subscription {
    pub fn new(url: String, patterns: EventPatterns, secret: String, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            patterns,
            secret,
            active: true,
            created_at: now,
            last_notified_at: None,
            success_count: 0,
            error_count: 0,
        }
    }

    /// Active and at least one pattern matches.
    pub fn matches(&self, event_type: &str, object_type: &str) -> bool {
        self.active && matcher::any_matches(&self.patterns, event_type, object_type)
    }

    pub fn pattern_strings(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.as_str().to_owned()).collect()
    }

    pub fn to_response(&self) -> SubscriptionResponse {
        SubscriptionResponse {
            id: self.id,
            url: self.url.clone(),
            events: self.pattern_strings(),
            active: self.active,
            created_at: unix_millis(self.created_at),
            last_notified_at: self.last_notified_at.map(unix_millis),
            success_count: self.success_count,
            error_count: self.error_count,
        }
    }
}

/// Result of recording one failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecorded {
    pub subscription: Subscription,
    /// This failure switched the subscription off.
    pub deactivated: bool,
}

// ---------------------------------------------------------------------------
// Postgres rows and queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    url: String,
    patterns: Vec<String>,
    secret: String,
    active: bool,
    created_at: OffsetDateTime,
    last_notified_at: Option<OffsetDateTime>,
    success_count: i64,
    error_count: i64,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        // Stored patterns were validated on registration; an unparsable one
        // can only come from a hand-edited row and is skipped.
        let patterns = row
            .patterns
            .iter()
            .filter_map(|p| EventPattern::parse(p).ok())
            .collect();
        Self {
            id: row.id,
            url: row.url,
            patterns,
            secret: row.secret,
            active: row.active,
            created_at: row.created_at,
            last_notified_at: row.last_notified_at,
            success_count: row.success_count.max(0) as u64,
            error_count: row.error_count.max(0) as u64,
        }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, url, patterns, secret, active, created_at, \
    last_notified_at, success_count, error_count";

#[derive(Debug, Clone)]
/// Insert or overwrite a subscription by id.
pub struct UpsertSubscription {
    pub subscription: Subscription,
}

impl Processor<UpsertSubscription> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertSubscription")]
    async fn process(&self, cmd: UpsertSubscription) -> Result<(), sqlx::Error> {
        let s = cmd.subscription;
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, url, patterns, secret, active, created_at,
                 last_notified_at, success_count, error_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                url = EXCLUDED.url,
                patterns = EXCLUDED.patterns,
                secret = EXCLUDED.secret,
                active = EXCLUDED.active,
                last_notified_at = EXCLUDED.last_notified_at,
                success_count = EXCLUDED.success_count,
                error_count = EXCLUDED.error_count
            "#,
        )
        .bind(s.id)
        .bind(&s.url)
        .bind(s.pattern_strings())
        .bind(&s.secret)
        .bind(s.active)
        .bind(s.created_at)
        .bind(s.last_notified_at)
        .bind(s.success_count as i64)
        .bind(s.error_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// All subscriptions in insertion order.
pub struct ListSubscriptions;

impl Processor<ListSubscriptions> for DatabaseProcessor {
    type Output = Vec<Subscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListSubscriptions")]
    async fn process(&self, _: ListSubscriptions) -> Result<Vec<Subscription>, sqlx::Error> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY seq ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone)]
pub struct GetSubscription {
    pub id: Uuid,
}

impl Processor<GetSubscription> for DatabaseProcessor {
    type Output = Option<Subscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetSubscription")]
    async fn process(&self, query: GetSubscription) -> Result<Option<Subscription>, sqlx::Error> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, Clone)]
/// Returns whether a row was removed.
pub struct DeleteSubscription {
    pub id: Uuid,
}

impl Processor<DeleteSubscription> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteSubscription")]
    async fn process(&self, cmd: DeleteSubscription) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(cmd.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Increment the success counter and stamp `last_notified_at` in one statement.
pub struct RecordSubscriptionSuccess {
    pub id: Uuid,
    pub at: OffsetDateTime,
}

impl Processor<RecordSubscriptionSuccess> for DatabaseProcessor {
    type Output = Option<Subscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RecordSubscriptionSuccess")]
    async fn process(
        &self,
        cmd: RecordSubscriptionSuccess,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            UPDATE subscriptions
            SET success_count = success_count + 1, last_notified_at = $2
            WHERE id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(cmd.id)
        .bind(cmd.at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct FailureRow {
    #[sqlx(flatten)]
    subscription: SubscriptionRow,
    was_active: bool,
}

#[derive(Debug, Clone)]
/// Increment the error counter and switch the subscription off once the
/// counter exceeds `threshold`, in one statement.
pub struct RecordSubscriptionFailure {
    pub id: Uuid,
    pub threshold: u64,
}

impl Processor<RecordSubscriptionFailure> for DatabaseProcessor {
    type Output = Option<FailureRecorded>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RecordSubscriptionFailure")]
    async fn process(
        &self,
        cmd: RecordSubscriptionFailure,
    ) -> Result<Option<FailureRecorded>, sqlx::Error> {
        let row = sqlx::query_as::<_, FailureRow>(
            r#"
            WITH prev AS (
                SELECT id, active FROM subscriptions WHERE id = $1 FOR UPDATE
            )
            UPDATE subscriptions AS s
            SET error_count = s.error_count + 1,
                active = s.active AND (s.error_count + 1) <= $2
            FROM prev
            WHERE s.id = prev.id
            RETURNING s.id, s.url, s.patterns, s.secret, s.active, s.created_at,
                      s.last_notified_at, s.success_count, s.error_count,
                      prev.active AS was_active
            "#,
        )
        .bind(cmd.id)
        .bind(cmd.threshold as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| {
            let subscription: Subscription = row.subscription.into();
            FailureRecorded {
                deactivated: row.was_active && !subscription.active,
                subscription,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::parse_patterns;

    fn subscription(patterns: &[&str]) -> Subscription {
        Subscription::new(
            "http://localhost:9/hook".into(),
            parse_patterns(patterns.iter().copied()).unwrap(),
            "s".into(),
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn company_prefix_matches_property_change() {
        assert!(subscription(&["company"]).matches("company.propertyChange", "company"));
        assert!(!subscription(&["contact"]).matches("company.propertyChange", "company"));
    }

    #[test]
    fn inactive_subscription_never_matches() {
        let mut s = subscription(&["*"]);
        s.active = false;
        assert!(!s.matches("company.creation", "company"));
    }

    #[test]
    fn response_hides_secret_and_keeps_pattern_order() {
        let s = subscription(&["deal", "*", "company.creation"]);
        let json = serde_json::to_value(s.to_response()).unwrap();
        assert!(json.get("secret").is_none());
        assert_eq!(
            json["events"],
            serde_json::json!(["deal", "*", "company.creation"])
        );
    }
}
