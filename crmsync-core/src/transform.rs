//! CRM record to sink data point mapping.
//!
//! Each mapped object type names the numeric properties that become metrics
//! and the properties copied onto every point as attributes. Unmapped
//! properties are dropped. A property that is missing, null or not a number
//! yields no point.

use crate::utils::calendar::sink_date;
use compact_str::CompactString;
use crmsync_sdk::objects::{SinkBatch, SinkDataPoint};
use serde_json::{Map, Value};
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub object_type: CompactString,
    /// `(source property, metric name)` pairs.
    pub metrics: Vec<(String, String)>,
    pub attributes: Vec<String>,
}

impl FieldMapping {
    pub fn new(
        object_type: &str,
        metrics: impl IntoIterator<Item = (&'static str, &'static str)>,
        attributes: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            metrics: metrics
                .into_iter()
                .map(|(p, m)| (p.to_owned(), m.to_owned()))
                .collect(),
            attributes: attributes.into_iter().map(str::to_owned).collect(),
        }
    }

    fn source_properties(&self) -> impl Iterator<Item = &str> {
        self.metrics
            .iter()
            .map(|(p, _)| p.as_str())
            .chain(self.attributes.iter().map(String::as_str))
    }
}

/// Mappings for the company and deal objects of the CRM simulator.
pub fn default_mappings() -> Vec<FieldMapping> {
    vec![
        FieldMapping::new(
            "company",
            [
                ("annualrevenue", "annual_revenue"),
                ("numberofemployees", "employees"),
                ("num_associated_deals", "associated_deals"),
            ],
            ["name", "industry", "country"],
        ),
        FieldMapping::new(
            "deal",
            [("amount", "deal_amount")],
            ["dealstage", "pipeline"],
        ),
    ]
}

#[derive(Debug, Clone)]
pub struct RecordTransformer {
    mappings: HashMap<CompactString, FieldMapping>,
    metric_prefix: String,
    source: String,
}

impl RecordTransformer {
    pub fn new(
        mappings: impl IntoIterator<Item = FieldMapping>,
        metric_prefix: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            mappings: mappings
                .into_iter()
                .map(|m| (m.object_type.to_lowercase().into(), m))
                .collect(),
            metric_prefix: metric_prefix.into(),
            source: source.into(),
        }
    }

    fn mapping(&self, object_type: &str) -> Option<&FieldMapping> {
        self.mappings
            .get(object_type)
            .or_else(|| self.mappings.get(object_type.to_lowercase().as_str()))
    }

    /// Whether `properties` already carry every property the mapping reads.
    /// Unmapped object types need nothing.
    pub fn covers(&self, object_type: &str, properties: &Map<String, Value>) -> bool {
        self.mapping(object_type)
            .is_none_or(|m| m.source_properties().all(|p| properties.contains_key(p)))
    }

    /// One point per numeric mapped metric property.
    pub fn transform(
        &self,
        object_type: &str,
        object_id: &str,
        properties: &Map<String, Value>,
        at: OffsetDateTime,
    ) -> Vec<SinkDataPoint> {
        let Some(mapping) = self.mapping(object_type) else {
            return Vec::new();
        };
        let mut attributes = Map::new();
        attributes.insert(
            format!("{}_id", mapping.object_type),
            Value::String(object_id.to_owned()),
        );
        for name in &mapping.attributes {
            if let Some(value) = properties.get(name).filter(|v| !v.is_null()) {
                attributes.insert(name.clone(), value.clone());
            }
        }
        let date = sink_date(at);
        mapping
            .metrics
            .iter()
            .filter_map(|(property, metric)| {
                let value = numeric(properties.get(property)?)?;
                Some(SinkDataPoint {
                    metric: format!("{}{metric}", self.metric_prefix),
                    value,
                    date: date.clone(),
                    attributes: attributes.clone(),
                })
            })
            .collect()
    }

    pub fn batch(&self, data: Vec<SinkDataPoint>) -> SinkBatch {
        SinkBatch {
            data,
            source: self.source.clone(),
        }
    }
}

/// Numbers, and strings that parse as numbers (CRMs often send both).
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}
