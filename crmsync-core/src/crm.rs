//! Embedded CRM object store.
//!
//! A keyed collection of records per object type with cursor pagination.
//! Every mutation emits a [`ChangeEvent`] onto the change event channel:
//!
//! - create emits `<type>.creation` without properties,
//! - update emits `<type>.propertyChange` with only the fields that changed.

use crate::PipelineError;
use crate::collaborators::{CollaboratorError, CrmSource};
use crate::entities::ChangeEvent;
use crate::events::ChangeEventSender;
use async_trait::async_trait;
use compact_str::{CompactString, format_compact};
use crmsync_sdk::objects::{CrmObjectResponse, ListObjectsResponse, unix_millis};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct CrmObject {
    pub id: u64,
    pub object_type: CompactString,
    pub properties: Map<String, Value>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl CrmObject {
    pub fn to_response(&self) -> CrmObjectResponse {
        CrmObjectResponse {
            id: self.id.to_string(),
            object_type: self.object_type.to_string(),
            properties: self.properties.clone(),
            created_at: unix_millis(self.created_at),
            updated_at: unix_millis(self.updated_at),
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct ObjectPage {
    pub objects: Vec<CrmObject>,
    /// Id to pass as `after` for the next page.
    pub next: Option<u64>,
}

impl ObjectPage {
    pub fn to_response(&self) -> ListObjectsResponse {
        ListObjectsResponse {
            results: self.objects.iter().map(CrmObject::to_response).collect(),
            next: self.next.map(|id| id.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct Collections {
    next_id: u64,
    by_type: HashMap<CompactString, BTreeMap<u64, CrmObject>>,
}

#[derive(Debug)]
pub struct ObjectStore {
    collections: RwLock<Collections>,
    events: Option<ChangeEventSender>,
}

impl ObjectStore {
    /// A store whose mutations are published on `events`.
    pub fn new(events: ChangeEventSender) -> Self {
        Self {
            collections: RwLock::new(Collections::default()),
            events: Some(events),
        }
    }

    /// A store that emits nothing.
    pub fn detached() -> Self {
        Self {
            collections: RwLock::new(Collections::default()),
            events: None,
        }
    }

    pub async fn create(
        &self,
        object_type: &str,
        properties: Map<String, Value>,
        now: OffsetDateTime,
    ) -> Result<CrmObject, PipelineError> {
        let object_type = normalize_type(object_type)?;
        let object = {
            let mut collections = self.collections.write().await;
            collections.next_id += 1;
            let object = CrmObject {
                id: collections.next_id,
                object_type: object_type.clone(),
                properties,
                created_at: now,
                updated_at: now,
            };
            collections
                .by_type
                .entry(object_type.clone())
                .or_default()
                .insert(object.id, object.clone());
            object
        };
        self.emit(&object, "creation", None, now).await;
        Ok(object)
    }

    /// Merge `changes` into an existing object. `None` if it does not exist.
    pub async fn update(
        &self,
        object_type: &str,
        object_id: &str,
        changes: Map<String, Value>,
        now: OffsetDateTime,
    ) -> Result<Option<CrmObject>, PipelineError> {
        let object_type = normalize_type(object_type)?;
        let Some(id) = parse_id(object_id) else {
            return Ok(None);
        };
        let (object, changed) = {
            let mut collections = self.collections.write().await;
            let Some(object) = collections
                .by_type
                .get_mut(&object_type)
                .and_then(|objects| objects.get_mut(&id))
            else {
                return Ok(None);
            };
            let mut changed = Map::new();
            for (key, value) in changes {
                if object.properties.get(&key) != Some(&value) {
                    object.properties.insert(key.clone(), value.clone());
                    changed.insert(key, value);
                }
            }
            if !changed.is_empty() {
                object.updated_at = now;
            }
            (object.clone(), changed)
        };
        if !changed.is_empty() {
            self.emit(&object, "propertyChange", Some(changed), now).await;
        }
        Ok(Some(object))
    }

    pub async fn get(&self, object_type: &str, object_id: &str) -> Option<CrmObject> {
        let id = parse_id(object_id)?;
        let collections = self.collections.read().await;
        collections
            .by_type
            .get(object_type.trim())
            .and_then(|objects| objects.get(&id))
            .cloned()
    }

    /// Objects in id order, starting after the `after` cursor.
    pub async fn list(&self, object_type: &str, limit: usize, after: Option<&str>) -> ObjectPage {
        let start = after.and_then(parse_id).unwrap_or(0);
        let collections = self.collections.read().await;
        let Some(objects) = collections.by_type.get(object_type.trim()) else {
            return ObjectPage {
                objects: Vec::new(),
                next: None,
            };
        };
        let mut page: Vec<CrmObject> = objects
            .range(start.saturating_add(1)..)
            .take(limit.saturating_add(1))
            .map(|(_, o)| o.clone())
            .collect();
        let next = if page.len() > limit {
            page.truncate(limit);
            page.last().map(|o| o.id)
        } else {
            None
        };
        ObjectPage {
            objects: page,
            next,
        }
    }

    async fn emit(
        &self,
        object: &CrmObject,
        action: &str,
        properties: Option<Map<String, Value>>,
        now: OffsetDateTime,
    ) {
        let Some(events) = &self.events else {
            return;
        };
        let event = ChangeEvent {
            event_id: Uuid::now_v7().to_string(),
            event_type: format_compact!("{}.{action}", object.object_type),
            object_type: object.object_type.clone(),
            object_id: object.id.to_string(),
            occurred_at: now,
            properties,
        };
        if events.send(event).await.is_err() {
            tracing::warn!(
                object_type = %object.object_type,
                object_id = object.id,
                "Change event channel closed, event dropped"
            );
        }
    }
}

#[async_trait]
impl CrmSource for ObjectStore {
    async fn fetch_object(
        &self,
        object_type: &str,
        object_id: &str,
    ) -> Result<Option<Map<String, Value>>, CollaboratorError> {
        Ok(self
            .get(object_type, object_id)
            .await
            .map(|object| object.properties))
    }
}

fn normalize_type(object_type: &str) -> Result<CompactString, PipelineError> {
    let object_type = object_type.trim();
    if object_type.is_empty() || object_type.contains(['.', '/']) {
        return Err(PipelineError::validation(format!(
            "invalid object type {object_type:?}"
        )));
    }
    Ok(object_type.into())
}

fn parse_id(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}
