use crate::PipelineError;
use crate::framework::DatabaseProcessor;
use compact_str::CompactString;
use crmsync_sdk::objects::{ChangeEventPayload, IngressEvent, from_unix_millis, unix_millis};
use kanau::processor::Processor;
use serde_json::{Map, Value};
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

/// Event type actions that describe object creation.
const CREATION_ACTIONS: [&str; 2] = ["creation", "created"];

/// An immutable record of one CRM object mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub event_id: String,
    /// Convention: `<object>.<action>`.
    pub event_type: CompactString,
    pub object_type: CompactString,
    pub object_id: String,
    pub occurred_at: OffsetDateTime,
    /// Changed fields only, or absent on creation.
    pub properties: Option<Map<String, Value>>,
}

impl ChangeEvent {
    /// Validate an ingress body. A missing event id is generated.
    pub fn from_ingress(event: IngressEvent, now: OffsetDateTime) -> Result<Self, PipelineError> {
        let event_type = required("eventType", event.event_type)?;
        let object_type = required("objectType", event.object_type)?;
        let object_id = required("objectId", event.object_id)?;
        let event_id = event
            .event_id
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        Ok(Self {
            event_id,
            event_type: event_type.into(),
            object_type: object_type.into(),
            object_id,
            occurred_at: event.occurred_at.map(from_unix_millis).unwrap_or(now),
            properties: event.properties,
        })
    }

    /// Validate an event received inside a delivery.
    pub fn from_payload(payload: ChangeEventPayload) -> Result<Self, PipelineError> {
        let event_type = required("eventType", Some(payload.event_type))?;
        let object_type = required("objectType", Some(payload.object_type))?;
        let object_id = required("objectId", Some(payload.object_id))?;
        Ok(Self {
            event_id: payload.event_id,
            event_type: event_type.into(),
            object_type: object_type.into(),
            object_id,
            occurred_at: from_unix_millis(payload.occurred_at),
            properties: payload.properties,
        })
    }

    pub fn to_payload(&self) -> ChangeEventPayload {
        ChangeEventPayload {
            event_id: self.event_id.clone(),
            event_type: self.event_type.to_string(),
            object_type: self.object_type.to_string(),
            object_id: self.object_id.clone(),
            occurred_at: unix_millis(self.occurred_at),
            properties: self.properties.clone(),
        }
    }

    /// The part after the last `.` of the event type.
    pub fn action(&self) -> &str {
        self.event_type
            .rsplit_once('.')
            .map_or("", |(_, action)| action)
    }

    pub fn is_creation(&self) -> bool {
        let action = self.action();
        CREATION_ACTIONS
            .iter()
            .any(|c| c.eq_ignore_ascii_case(action))
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, PipelineError> {
    match value.map(|v| v.trim().to_owned()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(PipelineError::validation(format!("{field} is required"))),
    }
}

// ---------------------------------------------------------------------------
// Postgres rows and queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
struct ChangeEventRow {
    event_id: String,
    event_type: CompactString,
    object_type: CompactString,
    object_id: String,
    occurred_at: OffsetDateTime,
    properties: Option<Json<Map<String, Value>>>,
}

impl From<ChangeEventRow> for ChangeEvent {
    fn from(row: ChangeEventRow) -> Self {
        Self {
            event_id: row.event_id,
            event_type: row.event_type,
            object_type: row.object_type,
            object_id: row.object_id,
            occurred_at: row.occurred_at,
            properties: row.properties.map(|Json(p)| p),
        }
    }
}

#[derive(Debug, Clone)]
/// Record an event. A second insert with the same id keeps the first record.
pub struct InsertChangeEvent {
    pub event: ChangeEvent,
    pub recorded_at: OffsetDateTime,
}

impl Processor<InsertChangeEvent> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertChangeEvent")]
    async fn process(&self, cmd: InsertChangeEvent) -> Result<bool, sqlx::Error> {
        let e = cmd.event;
        let result = sqlx::query(
            r#"
            INSERT INTO change_events
                (event_id, event_type, object_type, object_id, occurred_at, properties, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&e.event_id)
        .bind(e.event_type.as_str())
        .bind(e.object_type.as_str())
        .bind(&e.object_id)
        .bind(e.occurred_at)
        .bind(e.properties.as_ref().map(Json))
        .bind(cmd.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Look up an event recorded at or after `recorded_after`.
pub struct GetRetainedChangeEvent {
    pub event_id: String,
    pub recorded_after: OffsetDateTime,
}

impl Processor<GetRetainedChangeEvent> for DatabaseProcessor {
    type Output = Option<ChangeEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetRetainedChangeEvent")]
    async fn process(
        &self,
        query: GetRetainedChangeEvent,
    ) -> Result<Option<ChangeEvent>, sqlx::Error> {
        let row = sqlx::query_as::<_, ChangeEventRow>(
            r#"
            SELECT event_id, event_type, object_type, object_id, occurred_at, properties
            FROM change_events
            WHERE event_id = $1 AND recorded_at >= $2
            "#,
        )
        .bind(&query.event_id)
        .bind(query.recorded_after)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, Clone)]
/// Drop events recorded before `recorded_before`, then trim to the newest
/// `keep` events. Returns the number of rows removed.
pub struct PruneChangeEvents {
    pub recorded_before: OffsetDateTime,
    pub keep: i64,
}

impl Processor<PruneChangeEvents> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PruneChangeEvents")]
    async fn process(&self, cmd: PruneChangeEvents) -> Result<u64, sqlx::Error> {
        let expired = sqlx::query("DELETE FROM change_events WHERE recorded_at < $1")
            .bind(cmd.recorded_before)
            .execute(&self.pool)
            .await?;
        let overflow = sqlx::query(
            r#"
            DELETE FROM change_events
            WHERE seq <= (
                SELECT seq FROM change_events ORDER BY seq DESC OFFSET $1 LIMIT 1
            )
            "#,
        )
        .bind(cmd.keep)
        .execute(&self.pool)
        .await?;
        Ok(expired.rows_affected() + overflow.rows_affected())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventTypeCount {
    pub event_type: String,
    pub count: i64,
}

#[derive(Debug, Clone)]
pub struct CountChangeEventsByType;

impl Processor<CountChangeEventsByType> for DatabaseProcessor {
    type Output = Vec<EventTypeCount>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CountChangeEventsByType")]
    async fn process(&self, _: CountChangeEventsByType) -> Result<Vec<EventTypeCount>, sqlx::Error> {
        sqlx::query_as::<_, EventTypeCount>(
            r#"
            SELECT event_type, COUNT(*) AS count
            FROM change_events
            GROUP BY event_type
            ORDER BY event_type
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingress(event_type: &str, object_type: &str, object_id: &str) -> IngressEvent {
        IngressEvent {
            event_type: Some(event_type.into()),
            object_type: Some(object_type.into()),
            object_id: Some(object_id.into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_fields_are_rejected() {
        let now = OffsetDateTime::now_utc();
        for event in [
            ingress("", "company", "42"),
            ingress("company.creation", " ", "42"),
            IngressEvent {
                object_id: None,
                ..ingress("company.creation", "company", "42")
            },
        ] {
            assert!(matches!(
                ChangeEvent::from_ingress(event, now),
                Err(PipelineError::Validation(_))
            ));
        }
    }

    #[test]
    fn event_id_is_generated_when_absent() {
        let now = OffsetDateTime::now_utc();
        let a = ChangeEvent::from_ingress(ingress("company.creation", "company", "1"), now).unwrap();
        let b = ChangeEvent::from_ingress(ingress("company.creation", "company", "1"), now).unwrap();
        assert!(!a.event_id.is_empty());
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.occurred_at, now);
    }

    #[test]
    fn supplied_event_id_is_kept() {
        let event = IngressEvent {
            event_id: Some("evt-1".into()),
            ..ingress("deal.propertyChange", "deal", "9")
        };
        let event = ChangeEvent::from_ingress(event, OffsetDateTime::now_utc()).unwrap();
        assert_eq!(event.event_id, "evt-1");
    }

    #[test]
    fn creation_actions() {
        let now = OffsetDateTime::now_utc();
        let created =
            ChangeEvent::from_ingress(ingress("company.creation", "company", "1"), now).unwrap();
        let changed =
            ChangeEvent::from_ingress(ingress("company.propertyChange", "company", "1"), now)
                .unwrap();
        let bare = ChangeEvent::from_ingress(ingress("created", "company", "1"), now).unwrap();
        assert!(created.is_creation());
        assert!(!changed.is_creation());
        assert!(!bare.is_creation());
        assert_eq!(changed.action(), "propertyChange");
    }

    #[test]
    fn payload_keeps_fields() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let mut props = Map::new();
        props.insert("name".into(), Value::from("Acme"));
        let event = ChangeEvent::from_ingress(
            IngressEvent {
                properties: Some(props),
                ..ingress("company.propertyChange", "company", "42")
            },
            now,
        )
        .unwrap();
        let back = ChangeEvent::from_payload(event.to_payload()).unwrap();
        assert_eq!(back, event);
    }
}
