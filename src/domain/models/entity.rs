//! Catalog entity and relation value models.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A search query used as a relation target instead of a literal identifier.
///
/// Resolved by the State Applier against the portal's search API at apply
/// time (see the reconciliation algorithm).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub combinator: String,
    pub rules: Vec<Value>,
}

impl SearchQuery {
    /// Whether a JSON object looks like a search query (has `combinator` and
    /// `rules` keys), which is how the mapping language distinguishes a
    /// search-query relation target from a literal identifier.
    pub fn detect(value: &Value) -> Option<SearchQuery> {
        let obj = value.as_object()?;
        if !obj.contains_key("combinator") || !obj.contains_key("rules") {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

/// The target of a relation field: one identifier, several, or a search
/// query to be resolved later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationTarget {
    Single(String),
    Many(Vec<String>),
    Search(SearchQuery),
    Null,
}

impl RelationTarget {
    pub fn from_value(value: &Value) -> Self {
        if let Some(query) = SearchQuery::detect(value) {
            return RelationTarget::Search(query);
        }
        match value {
            Value::Null => RelationTarget::Null,
            Value::String(s) => RelationTarget::Single(s.clone()),
            Value::Array(items) => RelationTarget::Many(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => RelationTarget::Null,
        }
    }

    pub fn is_search_query(&self) -> bool {
        matches!(self, RelationTarget::Search(_))
    }
}

/// A catalog object of some blueprint.
///
/// An entity is `parseable` iff `identifier` and `blueprint` are both
/// present; see [`Entity::is_parseable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub identifier: Option<String>,
    pub blueprint: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub team: Option<Value>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationTarget>,
}

impl Entity {
    /// A shallow entity carrying only identifier/blueprint, produced for
    /// records that fail their selector (see Entity Processor step 3).
    pub fn shallow(identifier: String, blueprint: String) -> Self {
        Self {
            identifier: Some(identifier),
            blueprint: Some(blueprint),
            title: None,
            team: None,
            properties: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn is_parseable(&self) -> bool {
        self.identifier.is_some() && self.blueprint.is_some()
    }

    pub fn id(&self) -> Option<&str> {
        self.identifier.as_deref()
    }
}
