//! Resource mapping configuration: selectors, split directives, and the
//! per-field expressions that produce entities from raw records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping expressions that produce an entity's fields from a raw record.
///
/// Each value is source text for an expression compiled through the
/// [`crate::domain::ports::expression::ExpressionEngine`] contract. Optional
/// fields are `None` when the mapping does not populate that field at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMapping {
    pub identifier: String,
    pub blueprint: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub relations: BTreeMap<String, String>,
}

/// The `port` block of a resource config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    pub entity: EntityMapping,
    #[serde(default)]
    pub items_to_parse: Option<String>,
}

/// One entry in the resource mapping, binding a `kind` label to a selector
/// and an entity mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub kind: String,
    #[serde(default)]
    pub selector: Option<String>,
    pub port: PortConfig,
}

impl ResourceConfig {
    /// A missing/empty selector is treated as always-true (step 2 of the
    /// Entity Processor algorithm).
    pub fn selector_expr(&self) -> &str {
        match &self.selector {
            Some(s) if !s.trim().is_empty() => s,
            _ => "true",
        }
    }

    pub fn items_to_parse_expr(&self) -> Option<&str> {
        self.port.items_to_parse.as_deref()
    }
}

/// Ordered list of resource configs. The same kind may appear more than
/// once; each entry is evaluated independently and contributes entities
/// additively to the same reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMapping {
    pub resources: Vec<ResourceConfig>,
}

impl ResourceMapping {
    pub fn for_kind<'a>(&'a self, kind: &str) -> impl Iterator<Item = &'a ResourceConfig> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for r in &self.resources {
            if !seen.contains(&r.kind.as_str()) {
                seen.push(r.kind.as_str());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(kind: &str, selector: Option<&str>) -> ResourceConfig {
        ResourceConfig {
            kind: kind.to_string(),
            selector: selector.map(str::to_string),
            port: PortConfig {
                entity: EntityMapping {
                    identifier: ".id".to_string(),
                    blueprint: "\"Project\"".to_string(),
                    title: Some(".name".to_string()),
                    team: None,
                    properties: BTreeMap::new(),
                    relations: BTreeMap::new(),
                },
                items_to_parse: None,
            },
        }
    }

    #[test]
    fn missing_selector_defaults_to_true() {
        let r = resource("project", None);
        assert_eq!(r.selector_expr(), "true");
    }

    #[test]
    fn empty_selector_defaults_to_true() {
        let r = resource("project", Some("   "));
        assert_eq!(r.selector_expr(), "true");
    }

    #[test]
    fn same_kind_may_repeat() {
        let mapping = ResourceMapping {
            resources: vec![resource("project", None), resource("project", Some(".active"))],
        };
        assert_eq!(mapping.for_kind("project").count(), 2);
        assert_eq!(mapping.kinds(), vec!["project"]);
    }
}
