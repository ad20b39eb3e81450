//! Entity Processor (§4.2): transforms raw records into entities through a
//! resource config's declarative mapping.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::models::{Entity, RelationTarget, ResourceConfig};
use crate::domain::ports::expression::{Bindings, ExpressionEngine};

/// How a raw record (or split item) was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordClassification {
    PassedSelector,
    FailedSelector,
    Misconfigured,
}

/// The outcome of processing one raw record or split item.
#[derive(Debug, Clone)]
pub struct ProcessedRecord {
    pub classification: RecordClassification,
    /// `Some` for a passed-selector record with a full mapping, a
    /// failed-selector record whose identifier/blueprint both evaluated, or
    /// `None` when the record contributes nothing at all (step 3/4).
    pub entity: Option<Entity>,
}

impl ProcessedRecord {
    fn misconfigured() -> Self {
        Self {
            classification: RecordClassification::Misconfigured,
            entity: None,
        }
    }
}

pub struct EntityProcessor {
    engine: Arc<dyn ExpressionEngine>,
}

impl EntityProcessor {
    pub fn new(engine: Arc<dyn ExpressionEngine>) -> Self {
        Self { engine }
    }

    /// Runs the full algorithm (§4.2 steps 1-6) over one raw record,
    /// yielding one [`ProcessedRecord`] per split item (or a single one if
    /// `items_to_parse` is unset).
    pub fn process(&self, record: &Value, config: &ResourceConfig) -> Vec<ProcessedRecord> {
        match config.items_to_parse_expr() {
            None => vec![self.process_item(record, config, &Bindings::new())],
            Some(expr) => match self.engine.eval(expr, record, &Bindings::new()) {
                Ok(Value::Array(items)) => items
                    .into_iter()
                    .map(|item| {
                        let mut bindings = Bindings::new();
                        bindings.insert("item".to_string(), item);
                        self.process_item(record, config, &bindings)
                    })
                    .collect(),
                Ok(_) | Err(_) => vec![ProcessedRecord::misconfigured()],
            },
        }
    }

    fn process_item(&self, root: &Value, config: &ResourceConfig, bindings: &Bindings) -> ProcessedRecord {
        let passed = match self.engine.eval(config.selector_expr(), root, bindings) {
            Ok(value) => truthy(&value),
            Err(_) => return ProcessedRecord::misconfigured(),
        };

        if !passed {
            return self.shallow_entity(root, config, bindings);
        }

        self.full_entity(root, config, bindings)
    }

    /// Step 3: a failed-selector record contributes only a shallow entity
    /// (identifier/blueprint), used solely for deletion consideration. A
    /// record whose identifier or blueprint cannot be evaluated contributes
    /// nothing.
    fn shallow_entity(&self, root: &Value, config: &ResourceConfig, bindings: &Bindings) -> ProcessedRecord {
        let mapping = &config.port.entity;
        let identifier = self.eval_string(&mapping.identifier, root, bindings);
        let blueprint = self.eval_string(&mapping.blueprint, root, bindings);
        match (identifier, blueprint) {
            (Some(identifier), Some(blueprint)) => ProcessedRecord {
                classification: RecordClassification::FailedSelector,
                entity: Some(Entity::shallow(identifier, blueprint)),
            },
            _ => ProcessedRecord {
                classification: RecordClassification::FailedSelector,
                entity: None,
            },
        }
    }

    /// Step 4: full mapping evaluation. A mapping error on `identifier` or
    /// `blueprint` marks the whole record misconfigured; errors on optional
    /// fields degrade to JSON `null` for that field (step 5 preserves
    /// falsy-but-present values as-is, never coercing them to null).
    fn full_entity(&self, root: &Value, config: &ResourceConfig, bindings: &Bindings) -> ProcessedRecord {
        let mapping = &config.port.entity;

        let (Some(identifier), Some(blueprint)) = (
            self.eval_string(&mapping.identifier, root, bindings),
            self.eval_string(&mapping.blueprint, root, bindings),
        ) else {
            return ProcessedRecord::misconfigured();
        };

        let title = mapping
            .title
            .as_deref()
            .and_then(|expr| self.eval_optional_string(expr, root, bindings));

        let team = mapping
            .team
            .as_deref()
            .map(|expr| self.engine.eval(expr, root, bindings).unwrap_or(Value::Null));

        let mut properties = std::collections::BTreeMap::new();
        for (field, expr) in &mapping.properties {
            properties.insert(field.clone(), self.engine.eval(expr, root, bindings).unwrap_or(Value::Null));
        }

        let mut relations = std::collections::BTreeMap::new();
        for (field, expr) in &mapping.relations {
            let value = self.engine.eval(expr, root, bindings).unwrap_or(Value::Null);
            relations.insert(field.clone(), RelationTarget::from_value(&value));
        }

        ProcessedRecord {
            classification: RecordClassification::PassedSelector,
            entity: Some(Entity {
                identifier: Some(identifier),
                blueprint: Some(blueprint),
                title,
                team,
                properties,
                relations,
            }),
        }
    }

    fn eval_string(&self, expr: &str, root: &Value, bindings: &Bindings) -> Option<String> {
        match self.engine.eval(expr, root, bindings) {
            Ok(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    fn eval_optional_string(&self, expr: &str, root: &Value, bindings: &Bindings) -> Option<String> {
        match self.engine.eval(expr, root, bindings) {
            Ok(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Bool(false) | Value::Null)
}
