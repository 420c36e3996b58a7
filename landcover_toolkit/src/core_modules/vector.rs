// THEORY:
// Vector tables (territory layers such as biomes, municipalities or protected
// areas) arrive as collections of features: a multipolygon outline plus a bag
// of JSON properties. The selection workflow narrows a table in three ways,
// each one a plain filter over the collection:
//
// - by Brazilian state code (`UF` property),
// - by an arbitrary property chosen from the first feature's property names,
// - by one value of that property.
//
// The merged outline of whatever survives the filters is the export region.

use crate::core_modules::geometry::Region;
use geo::{MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

pub type Properties = serde_json::Map<String, Value>;

/// Property holding the numeric state code on national tables.
pub const STATE_PROPERTY: &str = "UF";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub properties: Properties,
    pub geometry: MultiPolygon<f64>,
}

impl Feature {
    pub fn new(geometry: MultiPolygon<f64>) -> Self {
        Self {
            properties: Properties::new(),
            geometry,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// The property rendered the way a pick list shows it.
    pub fn property_label(&self, name: &str) -> Option<String> {
        self.properties.get(name).map(value_label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    /// Asset identifier the collection was loaded from.
    pub id: String,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(id: impl Into<String>, features: Vec<Feature>) -> Self {
        Self {
            id: id.into(),
            features,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Last path segment of the asset id, used for layer labels.
    pub fn short_name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }

    /// Keeps features whose property renders to `label`.
    pub fn filter_by_label(&self, property: &str, label: &str) -> FeatureCollection {
        self.filter(|feature| feature.property_label(property).as_deref() == Some(label))
    }

    /// Keeps features belonging to the state with the given code.
    pub fn filter_state(&self, code: u8) -> FeatureCollection {
        self.filter(|feature| {
            feature
                .properties
                .get(STATE_PROPERTY)
                .and_then(numeric_or_parsed)
                .is_some_and(|v| v == code as f64)
        })
    }

    fn filter(&self, keep: impl Fn(&Feature) -> bool) -> FeatureCollection {
        FeatureCollection {
            id: self.id.clone(),
            features: self.features.iter().filter(|f| keep(f)).cloned().collect(),
        }
    }

    /// Property names of the first feature.
    pub fn property_names(&self) -> Vec<String> {
        self.features
            .first()
            .map(|f| f.properties.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every feature's value for `property`, sorted, as pick-list labels.
    pub fn feature_names(&self, property: &str) -> Vec<String> {
        let mut values: Vec<&Value> = self
            .features
            .iter()
            .filter_map(|f| f.properties.get(property))
            .collect();
        values.sort_by(|a, b| compare_values(a, b));
        values.into_iter().map(value_label).collect()
    }

    /// All outlines merged into one multipolygon.
    pub fn geometry(&self) -> MultiPolygon<f64> {
        let polygons: Vec<Polygon<f64>> = self
            .features
            .iter()
            .flat_map(|f| f.geometry.0.iter().cloned())
            .collect();
        MultiPolygon::new(polygons)
    }

    pub fn region(&self) -> Region {
        Region::new(self.geometry())
    }
}

pub fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn numeric_or_parsed(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numbers before strings, numbers numerically, strings lexically.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Number(_), _) => Ordering::Less,
        (_, Value::Number(_)) => Ordering::Greater,
        _ => value_label(a).cmp(&value_label(b)),
    }
}
