//! Portal-facing application configuration: the resource mapping plus the
//! global reconciliation flags.

use super::resource_config::ResourceMapping;
use serde::{Deserialize, Serialize};

/// `PortAppConfig` — the resource mapping plus global flags described in
/// the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortAppConfig {
    pub resources: ResourceMapping,

    #[serde(default)]
    pub delete_dependent_entities: bool,

    #[serde(default)]
    pub create_missing_related_entities: bool,

    #[serde(default)]
    pub enable_merge_entity: bool,

    /// `None` means "no threshold" (deletes are never gated); see Open
    /// Question in the specification's design notes, resolved in
    /// DESIGN.md: unset is an explicit, documented choice, not a bug.
    #[serde(default)]
    pub entity_deletion_threshold: Option<f64>,
}

impl PortAppConfig {
    /// Whether a proposed deletion ratio exceeds the configured threshold.
    /// A `None` threshold never exceeds (no gate).
    pub fn exceeds_deletion_threshold(&self, to_delete: usize, existing: usize) -> bool {
        match self.entity_deletion_threshold {
            None => false,
            Some(threshold) => {
                let denom = existing.max(1) as f64;
                (to_delete as f64 / denom) > threshold
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: Option<f64>) -> PortAppConfig {
        PortAppConfig {
            resources: ResourceMapping::default(),
            delete_dependent_entities: false,
            create_missing_related_entities: false,
            enable_merge_entity: false,
            entity_deletion_threshold: threshold,
        }
    }

    #[test]
    fn no_threshold_never_gates() {
        let config = config(None);
        assert!(!config.exceeds_deletion_threshold(1000, 10));
    }

    #[test]
    fn threshold_gates_when_exceeded() {
        let config = config(Some(0.5));
        assert!(config.exceeds_deletion_threshold(6, 10));
        assert!(!config.exceeds_deletion_threshold(5, 10));
    }

    #[test]
    fn empty_existing_state_does_not_divide_by_zero() {
        let config = config(Some(0.9));
        assert!(!config.exceeds_deletion_threshold(0, 0));
        assert!(config.exceeds_deletion_threshold(1, 0));
    }
}
