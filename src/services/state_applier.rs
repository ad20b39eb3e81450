//! State Applier (§4.4): diffs a kind's freshly processed entities against
//! the portal's existing state and applies creates/updates/deletes in
//! dependency order.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::warn;

use crate::domain::errors::ApplyError;
use crate::domain::models::{Entity, PortAppConfig, RelationTarget};
use crate::domain::ports::{PortalClient, UserAgentLabel};
use crate::services::dag::RelationGraph;

/// How many entities go into one `upsert_entities_bulk` call.
const UPSERT_BATCH_SIZE: usize = 100;
/// How many deletes may be in flight at once (deletes have no ordering
/// requirement, so this is pure throughput, not correctness).
const DELETE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failures: Vec<ApplyError>,
}

pub struct StateApplier {
    portal: Arc<dyn PortalClient>,
}

impl StateApplier {
    pub fn new(portal: Arc<dyn PortalClient>) -> Self {
        Self { portal }
    }

    /// Runs the full algorithm (§4.4 steps 1-7) for one kind's blueprint.
    pub async fn apply(
        &self,
        blueprint: &str,
        mut new_entities: Vec<Entity>,
        failed_selector_ids: &[String],
        app_config: &PortAppConfig,
        label: &UserAgentLabel,
    ) -> ApplyReport {
        let mut failures = Vec::new();
        let new_ids: BTreeSet<String> = new_entities.iter().filter_map(|e| e.id().map(str::to_string)).collect();

        let existing_state = match self.portal.search_entities(&existing_state_query(blueprint, label)).await {
            Ok(entities) => entities,
            Err(err) => {
                warn!(error = %err, blueprint, "failed to fetch existing state; skipping apply for this kind");
                return ApplyReport { failures: vec![ApplyError::Mapping { field: "existing_state".to_string(), reason: err.to_string() }], ..Default::default() };
            }
        };
        let existing_ids: BTreeSet<String> = existing_state.iter().filter_map(|e| e.id().map(str::to_string)).collect();

        // Step 1: resolve search-query relations.
        self.resolve_search_queries(&mut new_entities, &mut failures).await;

        let excluded: BTreeSet<String> = failures
            .iter()
            .filter_map(|f| match f {
                ApplyError::AmbiguousSearchQuery { identifier, .. } => Some(identifier.clone()),
                _ => None,
            })
            .collect();
        let upsertable: Vec<Entity> = new_entities
            .into_iter()
            .filter(|e| e.id().is_none_or(|id| !excluded.contains(id)))
            .collect();

        // Step 2: topological order, excluding cyclic sub-components.
        let ordering = RelationGraph::build(&upsertable).order();
        for component in &ordering.cyclic_components {
            failures.push(ApplyError::CyclicDependency(component.clone()));
        }
        let by_id: std::collections::BTreeMap<&str, &Entity> =
            upsertable.iter().filter_map(|e| e.id().map(|id| (id, e))).collect();

        let universe: BTreeSet<&str> = existing_ids.iter().map(String::as_str).chain(by_id.keys().copied()).collect();

        let mut created = 0;
        let mut updated = 0;

        // Step 3: upsert phase.
        let (resolvable, blocked): (Vec<&Entity>, Vec<&Entity>) = ordering
            .order
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .partition(|entity| app_config.create_missing_related_entities || all_targets_resolvable(entity, &universe));

        for batch in resolvable.chunks(UPSERT_BATCH_SIZE) {
            let owned: Vec<Entity> = batch.iter().map(|e| (**e).clone()).collect();
            match self.portal.upsert_entities_bulk(blueprint, &owned, label, app_config.enable_merge_entity).await {
                Ok(()) => {
                    for entity in &owned {
                        if let Some(id) = entity.id() {
                            if existing_ids.contains(id) {
                                updated += 1;
                            } else {
                                created += 1;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, blueprint, "upsert batch failed");
                    for entity in &owned {
                        failures.push(ApplyError::Mapping {
                            field: entity.id().unwrap_or_default().to_string(),
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        if !blocked.is_empty() {
            let owned: Vec<Entity> = blocked.iter().map(|e| (**e).clone()).collect();
            match self.portal.upsert_entities_bulk(blueprint, &owned, label, app_config.enable_merge_entity).await {
                Ok(()) => {
                    for entity in &owned {
                        if let Some(id) = entity.id() {
                            if existing_ids.contains(id) {
                                updated += 1;
                            } else {
                                created += 1;
                            }
                        }
                    }
                }
                Err(_) => {
                    for entity in &owned {
                        failures.push(ApplyError::UnresolvedRelation {
                            identifier: entity.id().unwrap_or_default().to_string(),
                            relation: unresolved_relation_name(entity, &universe).unwrap_or_default(),
                        });
                    }
                }
            }
        }

        // Step 4: diff for deletion.
        let failed_selector_ids: BTreeSet<&str> = failed_selector_ids.iter().map(String::as_str).collect();
        let to_delete: Vec<String> = existing_ids
            .iter()
            .filter(|id| !new_ids.contains(id.as_str()) && !failed_selector_ids.contains(id.as_str()))
            .cloned()
            .collect();

        // Step 5: deletion safety gate.
        if app_config.exceeds_deletion_threshold(to_delete.len(), existing_ids.len()) {
            failures.push(ApplyError::DeletionThresholdExceeded {
                to_delete: to_delete.len(),
                existing: existing_ids.len(),
                threshold: app_config.entity_deletion_threshold.unwrap_or_default(),
            });
            return ApplyReport { created, updated, deleted: 0, failures };
        }

        // Step 6: delete phase, unordered, bounded concurrency.
        let deleted = self.delete_all(blueprint, &to_delete, label, app_config.delete_dependent_entities, &mut failures).await;

        ApplyReport { created, updated, deleted, failures }
    }

    /// Targeted apply path for the Live Event Processor Runtime (§4.7 step
    /// 5): upserts and deletes exactly the touched entities, with no search
    /// over the full catalog and no deletion-threshold gate (there is no
    /// "existing state" snapshot to compute a ratio against).
    pub async fn apply_targeted(
        &self,
        blueprint: &str,
        mut to_upsert: Vec<Entity>,
        to_delete: &[String],
        app_config: &PortAppConfig,
        label: &UserAgentLabel,
    ) -> ApplyReport {
        let mut failures = Vec::new();
        self.resolve_search_queries(&mut to_upsert, &mut failures).await;

        let mut updated = 0;
        if !to_upsert.is_empty() {
            match self.portal.upsert_entities_bulk(blueprint, &to_upsert, label, app_config.enable_merge_entity).await {
                Ok(()) => updated = to_upsert.len(),
                Err(err) => {
                    for entity in &to_upsert {
                        failures.push(ApplyError::Mapping {
                            field: entity.id().unwrap_or_default().to_string(),
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        let deleted = self.delete_all(blueprint, to_delete, label, app_config.delete_dependent_entities, &mut failures).await;

        ApplyReport { created: 0, updated, deleted, failures }
    }

    async fn resolve_search_queries(&self, entities: &mut [Entity], failures: &mut Vec<ApplyError>) {
        for entity in entities.iter_mut() {
            let identifier = entity.id().unwrap_or_default().to_string();
            let search_fields: Vec<String> = entity
                .relations
                .iter()
                .filter(|(_, target)| target.is_search_query())
                .map(|(field, _)| field.clone())
                .collect();

            for field in search_fields {
                let RelationTarget::Search(query) = entity.relations.get(&field).expect("just filtered") else {
                    continue;
                };
                let query_value = json!({"combinator": query.combinator, "rules": query.rules});
                match self.portal.search_entities(&query_value).await {
                    Ok(matches) if matches.is_empty() => {
                        warn!(identifier, relation = field, "search-query relation matched no entities");
                        entity.relations.insert(field, RelationTarget::Null);
                    }
                    Ok(matches) if matches.len() == 1 => {
                        let resolved = matches[0].id().unwrap_or_default().to_string();
                        entity.relations.insert(field, RelationTarget::Single(resolved));
                    }
                    Ok(matches) => {
                        failures.push(ApplyError::AmbiguousSearchQuery {
                            identifier: identifier.clone(),
                            relation: field,
                            matches: matches.len(),
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, identifier, relation = field, "search-query resolution failed");
                        entity.relations.insert(field, RelationTarget::Null);
                    }
                }
            }
        }
    }

    async fn delete_all(
        &self,
        blueprint: &str,
        to_delete: &[String],
        label: &UserAgentLabel,
        cascade: bool,
        failures: &mut Vec<ApplyError>,
    ) -> usize {
        let results: Vec<_> = stream::iter(to_delete.iter())
            .map(|id| {
                let portal = Arc::clone(&self.portal);
                async move { (id, portal.delete_entity(blueprint, id, label, cascade).await) }
            })
            .buffer_unordered(DELETE_CONCURRENCY)
            .collect()
            .await;

        let mut deleted = 0;
        for (id, result) in results {
            match result {
                Ok(()) => deleted += 1,
                Err(err) => {
                    warn!(error = %err, identifier = id, "delete failed");
                    failures.push(ApplyError::Mapping { field: id.clone(), reason: err.to_string() });
                }
            }
        }
        deleted
    }
}

fn existing_state_query(blueprint: &str, label: &UserAgentLabel) -> Value {
    json!({
        "combinator": "and",
        "rules": [
            {"property": "$blueprint", "operator": "=", "value": blueprint},
            {"property": "$integration_type", "operator": "=", "value": label.integration_type},
            {"property": "$integration_identifier", "operator": "=", "value": label.integration_identifier},
            {"property": "$feature", "operator": "=", "value": label.feature},
        ]
    })
}

fn all_targets_resolvable(entity: &Entity, universe: &BTreeSet<&str>) -> bool {
    unresolved_relation_name(entity, universe).is_none()
}

fn unresolved_relation_name(entity: &Entity, universe: &BTreeSet<&str>) -> Option<String> {
    entity.relations.iter().find_map(|(field, target)| {
        let missing = match target {
            RelationTarget::Single(id) => !universe.contains(id.as_str()),
            RelationTarget::Many(ids) => ids.iter().any(|id| !universe.contains(id.as_str())),
            RelationTarget::Search(_) | RelationTarget::Null => false,
        };
        missing.then(|| field.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::PortalError;
    use crate::domain::models::{ActionRun, PortAppConfig, ResourceMapping};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakePortal {
        existing: Vec<Entity>,
        upserted: Mutex<Vec<Entity>>,
        deleted: Mutex<Vec<String>>,
        search_results: BTreeMap<String, Vec<Entity>>,
        /// Any upsert batch containing one of these ids fails outright,
        /// simulating a portal rejecting entities with dangling relations.
        reject_batches_containing: BTreeSet<String>,
    }

    #[async_trait]
    impl PortalClient for FakePortal {
        async fn get_integration(&self, _label: &UserAgentLabel) -> Result<Value, PortalError> {
            Ok(Value::Null)
        }
        async fn update_integration_state(&self, _label: &UserAgentLabel, _state: &Value) -> Result<(), PortalError> {
            Ok(())
        }
        async fn get_app_config(&self, _label: &UserAgentLabel) -> Result<crate::domain::models::PortAppConfig, PortalError> {
            unimplemented!()
        }
        async fn search_entities(&self, query: &Value) -> Result<Vec<Entity>, PortalError> {
            if let Some(rules) = query.get("rules").and_then(Value::as_array) {
                if rules.len() == 1 {
                    if let Some(needle) = rules[0].get("value").and_then(Value::as_str) {
                        if let Some(results) = self.search_results.get(needle) {
                            return Ok(results.clone());
                        }
                    }
                }
            }
            Ok(self.existing.clone())
        }
        async fn upsert_entities_bulk(&self, _blueprint: &str, entities: &[Entity], _label: &UserAgentLabel, _merge: bool) -> Result<(), PortalError> {
            let rejected = entities.iter().any(|e| e.id().is_some_and(|id| self.reject_batches_containing.contains(id)));
            if rejected {
                return Err(PortalError::BadRequest("entity references a relation target that does not exist".to_string()));
            }
            self.upserted.lock().await.extend(entities.iter().cloned());
            Ok(())
        }
        async fn delete_entity(&self, _blueprint: &str, identifier: &str, _label: &UserAgentLabel, _cascade: bool) -> Result<(), PortalError> {
            self.deleted.lock().await.push(identifier.to_string());
            Ok(())
        }
        async fn delete_all_entities_for_blueprint(&self, _blueprint: &str, _label: &UserAgentLabel) -> Result<String, PortalError> {
            unimplemented!()
        }
        async fn get_migration(&self, _id: &str) -> Result<crate::domain::ports::MigrationStatus, PortalError> {
            unimplemented!()
        }
        async fn get_blueprint(&self, _id: &str) -> Result<Value, PortalError> {
            unimplemented!()
        }
        async fn patch_blueprint(&self, _id: &str, _patch: &Value) -> Result<(), PortalError> {
            unimplemented!()
        }
        async fn patch_run(&self, _run_id: &uuid::Uuid, _patch: &Value) -> Result<(), PortalError> {
            unimplemented!()
        }
        async fn poll_action_runs(&self, _since: Option<chrono::DateTime<chrono::Utc>>, _limit: usize) -> Result<Vec<ActionRun>, PortalError> {
            unimplemented!()
        }
    }

    fn label() -> UserAgentLabel {
        UserAgentLabel {
            integration_type: "github".to_string(),
            integration_identifier: "github-prod".to_string(),
            version: "1.0.0".to_string(),
            feature: "issues".to_string(),
        }
    }

    fn entity(id: &str) -> Entity {
        Entity::shallow(id.to_string(), "Project".to_string())
    }

    fn entity_with_relation(id: &str, relation_target: &str) -> Entity {
        let mut entity = Entity::shallow(id.to_string(), "Project".to_string());
        entity.relations.insert("parent".to_string(), RelationTarget::Single(relation_target.to_string()));
        entity
    }

    fn default_app_config() -> PortAppConfig {
        PortAppConfig {
            resources: ResourceMapping::default(),
            delete_dependent_entities: false,
            create_missing_related_entities: false,
            enable_merge_entity: false,
            entity_deletion_threshold: None,
        }
    }

    #[tokio::test]
    async fn scenario_1_basic_resync_upserts_both_no_deletes() {
        let portal = Arc::new(FakePortal::default());
        let applier = StateApplier::new(portal.clone());
        let report = applier.apply("Project", vec![entity("p1"), entity("p2")], &[], &default_app_config(), &label()).await;
        assert_eq!(report.created, 2);
        assert_eq!(report.deleted, 0);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn scenario_2_filtered_deletion() {
        let portal = Arc::new(FakePortal {
            existing: vec![entity("p1"), entity("p2")],
            ..Default::default()
        });
        let applier = StateApplier::new(portal.clone());
        let report = applier
            .apply("Project", vec![entity("p2")], &["p1".to_string()], &default_app_config(), &label())
            .await;
        assert_eq!(report.deleted, 1);
        assert_eq!(*portal.deleted.lock().await, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn scenario_4_cyclic_relations_excluded_from_upsert() {
        let mut a = entity("a");
        a.relations.insert("parent".to_string(), RelationTarget::Single("b".to_string()));
        let mut b = entity("b");
        b.relations.insert("parent".to_string(), RelationTarget::Single("a".to_string()));

        let portal = Arc::new(FakePortal::default());
        let applier = StateApplier::new(portal.clone());
        let report = applier.apply("Project", vec![a, b], &[], &default_app_config(), &label()).await;
        assert!(portal.upserted.lock().await.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], ApplyError::CyclicDependency(_)));
    }

    #[tokio::test]
    async fn dangling_relation_fails_while_unrelated_entities_still_succeed() {
        // "p1" depends on "ghost", which exists neither in the portal's
        // existing state nor in this batch, and createMissingRelatedEntities
        // is false (the default), so "p1" lands in the blocked batch. "p2"
        // has no relations and is resolvable immediately.
        let mut reject = BTreeSet::new();
        reject.insert("p1".to_string());
        let portal = Arc::new(FakePortal { reject_batches_containing: reject, ..Default::default() });
        let applier = StateApplier::new(portal.clone());

        let report = applier
            .apply("Project", vec![entity_with_relation("p1", "ghost"), entity("p2")], &[], &default_app_config(), &label())
            .await;

        assert_eq!(report.created, 1, "p2 should still be created");
        assert_eq!(*portal.upserted.lock().await, vec![entity("p2")]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            ApplyError::UnresolvedRelation { identifier, relation } if identifier == "p1" && relation == "parent"
        ));
    }

    #[tokio::test]
    async fn deletion_threshold_blocks_delete_phase() {
        let portal = Arc::new(FakePortal {
            existing: vec![entity("p1"), entity("p2"), entity("p3"), entity("p4")],
            ..Default::default()
        });
        let applier = StateApplier::new(portal.clone());
        let mut app_config = default_app_config();
        app_config.entity_deletion_threshold = Some(0.1);
        let report = applier.apply("Project", vec![], &[], &app_config, &label()).await;
        assert_eq!(report.deleted, 0);
        assert!(matches!(report.failures[0], ApplyError::DeletionThresholdExceeded { .. }));
    }

    #[tokio::test]
    async fn targeted_apply_upserts_and_deletes_only_the_named_entities() {
        let portal = Arc::new(FakePortal::default());
        let applier = StateApplier::new(portal.clone());
        let report = applier
            .apply_targeted("Project", vec![entity("p1")], &["p2".to_string()], &default_app_config(), &label())
            .await;
        assert_eq!(report.updated, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(*portal.upserted.lock().await, vec![entity("p1")]);
        assert_eq!(*portal.deleted.lock().await, vec!["p2".to_string()]);
    }

    #[tokio::test]
    async fn ambiguous_search_query_excludes_entity_and_records_error() {
        let mut a = entity("a");
        a.relations.insert(
            "parent".to_string(),
            RelationTarget::Search(crate::domain::models::SearchQuery {
                combinator: "and".to_string(),
                rules: vec![json!({"property": "slug", "operator": "=", "value": "ambiguous"})],
            }),
        );
        let mut search_results = BTreeMap::new();
        search_results.insert("ambiguous".to_string(), vec![entity("x"), entity("y")]);
        let portal = Arc::new(FakePortal { search_results, ..Default::default() });
        let applier = StateApplier::new(portal.clone());
        let report = applier.apply("Project", vec![a], &[], &default_app_config(), &label()).await;
        assert!(portal.upserted.lock().await.is_empty());
        assert!(matches!(report.failures[0], ApplyError::AmbiguousSearchQuery { .. }));
    }
}
