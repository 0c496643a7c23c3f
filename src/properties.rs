//! Build property store
//!
//! Source steps publish `revision` and `got_revision`. When a build checks out
//! several codebases each step's value lives under its codebase inside one
//! property instead of overwriting a shared scalar. Which of the two shapes a
//! build uses is fixed when its store is created, so a scalar and a
//! per-codebase write can never meet on the same property.

use std::collections::BTreeMap;
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CheckoutError;

/// How source properties are shaped in a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyLayout {
    /// One scalar per property; only the default codebase may publish
    Flat,
    /// One sub-key per codebase, the default codebase being `""`
    PerCodebase,
}

impl PropertyLayout {
    /// Whether `value` has the shape this layout stores
    pub fn admits(&self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (PropertyLayout::Flat, PropertyValue::Scalar(_))
                | (PropertyLayout::PerCodebase, PropertyValue::ByCodebase(_))
        )
    }
}

/// A stored property value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Scalar(String),
    ByCodebase(BTreeMap<String, String>),
}

impl PropertyValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            PropertyValue::Scalar(s) => Some(s),
            PropertyValue::ByCodebase(_) => None,
        }
    }

    pub fn for_codebase(&self, codebase: &str) -> Option<&str> {
        match self {
            PropertyValue::Scalar(_) => None,
            PropertyValue::ByCodebase(map) => map.get(codebase).map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Property {
    value: PropertyValue,
    source: String,
}

/// Keyed property store shared by the steps of one build
#[derive(Debug)]
pub struct PropertyStore {
    layout: PropertyLayout,
    properties: RwLock<BTreeMap<String, Property>>,
}

impl PropertyStore {
    pub fn new(layout: PropertyLayout) -> Self {
        Self {
            layout,
            properties: RwLock::new(BTreeMap::new()),
        }
    }

    /// Pick the layout from the codebases a build checks out
    pub fn for_codebases<'a>(codebases: impl IntoIterator<Item = &'a str>) -> Self {
        let layout = if codebases.into_iter().any(|c| !c.is_empty()) {
            PropertyLayout::PerCodebase
        } else {
            PropertyLayout::Flat
        };
        Self::new(layout)
    }

    pub fn layout(&self) -> PropertyLayout {
        self.layout
    }

    pub fn get(&self, name: &str) -> Option<PropertyValue> {
        self.properties.read().get(name).map(|p| p.value.clone())
    }

    /// Value of `name`, or `default` when unset
    pub fn get_or(&self, name: &str, default: PropertyValue) -> PropertyValue {
        self.get(name).unwrap_or(default)
    }

    /// Who last wrote `name`
    pub fn source(&self, name: &str) -> Option<String> {
        self.properties.read().get(name).map(|p| p.source.clone())
    }

    /// Store `value` as is; its shape must match the store's layout
    pub fn set(&self, name: &str, value: PropertyValue, source: &str) -> Result<(), CheckoutError> {
        if !self.layout.admits(&value) {
            return Err(mismatch(name, self.layout));
        }
        self.properties.write().insert(
            name.to_string(),
            Property {
                value,
                source: source.to_string(),
            },
        );
        Ok(())
    }

    /// Handle for one source step; rejects a codebase the layout cannot hold
    pub fn scope(
        self: &Arc<Self>,
        codebase: &str,
        source: &str,
    ) -> Result<SourceProperties, CheckoutError> {
        if self.layout == PropertyLayout::Flat && !codebase.is_empty() {
            return Err(CheckoutError::config(format!(
                "codebase '{}' needs a per-codebase property store",
                codebase
            )));
        }
        Ok(SourceProperties {
            store: Arc::clone(self),
            codebase: codebase.to_string(),
            source: source.to_string(),
        })
    }

    /// Snapshot of every property as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let properties = self.properties.read();
        let map = properties
            .iter()
            .map(|(name, p)| {
                let value = serde_json::to_value(&p.value).unwrap_or(serde_json::Value::Null);
                (name.clone(), serde_json::json!([value, p.source]))
            })
            .collect();
        serde_json::Value::Object(map)
    }

    fn set_source(
        &self,
        name: &str,
        codebase: &str,
        value: &str,
        source: &str,
    ) -> Result<(), CheckoutError> {
        let mut properties = self.properties.write();
        if let Some(existing) = properties.get(name) {
            if !self.layout.admits(&existing.value) {
                return Err(mismatch(name, self.layout));
            }
        }

        let value = match self.layout {
            PropertyLayout::Flat => PropertyValue::Scalar(value.to_string()),
            PropertyLayout::PerCodebase => {
                let mut map = match properties.remove(name).map(|p| p.value) {
                    Some(PropertyValue::ByCodebase(map)) => map,
                    _ => BTreeMap::new(),
                };
                map.insert(codebase.to_string(), value.to_string());
                PropertyValue::ByCodebase(map)
            }
        };
        debug!(name, codebase, source, "Set source property");
        properties.insert(
            name.to_string(),
            Property {
                value,
                source: source.to_string(),
            },
        );
        Ok(())
    }
}

fn mismatch(name: &str, layout: PropertyLayout) -> CheckoutError {
    let expected = match layout {
        PropertyLayout::Flat => "a scalar",
        PropertyLayout::PerCodebase => "a per-codebase map",
    };
    CheckoutError::config(format!("property '{}' must hold {} in this store", name, expected))
}

/// A source step's view of the build properties
#[derive(Debug, Clone)]
pub struct SourceProperties {
    store: Arc<PropertyStore>,
    codebase: String,
    source: String,
}

impl SourceProperties {
    /// Publish `value` under `name` for this step's codebase
    pub fn update(&self, name: &str, value: &str) -> Result<(), CheckoutError> {
        self.store.set_source(name, &self.codebase, value, &self.source)
    }

    /// This step's value of `name`
    pub fn get(&self, name: &str) -> Option<String> {
        let value = self.store.get(name)?;
        match self.store.layout() {
            PropertyLayout::Flat => value.as_scalar().map(str::to_string),
            PropertyLayout::PerCodebase => value.for_codebase(&self.codebase).map(str::to_string),
        }
    }

    pub fn codebase(&self) -> &str {
        &self.codebase
    }

    pub fn store(&self) -> &Arc<PropertyStore> {
        &self.store
    }
}
