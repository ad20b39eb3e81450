//! Property: for any acyclic relation graph, the State Applier's
//! topological order never places an entity before something it depends on.

use ocean_resync_engine::domain::models::{Entity, RelationTarget};
use ocean_resync_engine::services::RelationGraph;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn entity_with_parent(id: &str, parent: Option<&str>) -> Entity {
    let mut relations = BTreeMap::new();
    if let Some(parent) = parent {
        relations.insert("parent".to_string(), RelationTarget::Single(parent.to_string()));
    }
    Entity {
        identifier: Some(id.to_string()),
        blueprint: Some("Project".to_string()),
        title: None,
        team: None,
        properties: BTreeMap::new(),
        relations,
    }
}

proptest! {
    /// Every even-indexed entity depends on its immediate predecessor, which
    /// is acyclic by construction regardless of chain length.
    #[test]
    fn referent_always_precedes_referer(size in 1usize..40) {
        let ids: Vec<String> = (0..size).map(|i| format!("e{i}")).collect();
        let entities: Vec<Entity> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let parent = if i > 0 && i % 2 == 0 { Some(ids[i - 1].as_str()) } else { None };
                entity_with_parent(id, parent)
            })
            .collect();

        let ordering = RelationGraph::build(&entities).order();
        prop_assert!(ordering.cyclic_components.is_empty());
        prop_assert_eq!(ordering.order.len(), size);

        let position: BTreeMap<&str, usize> = ordering.order.iter().enumerate().map(|(pos, id)| (id.as_str(), pos)).collect();
        for (i, id) in ids.iter().enumerate() {
            if i > 0 && i % 2 == 0 {
                let parent = &ids[i - 1];
                prop_assert!(position[parent.as_str()] < position[id.as_str()]);
            }
        }
    }

    /// Every entity in the batch appears exactly once in the combined
    /// order + cyclic-components output, whether or not the graph has
    /// cycles.
    #[test]
    fn every_entity_is_accounted_for(size in 1usize..40, make_cycle in any::<bool>()) {
        let ids: Vec<String> = (0..size).map(|i| format!("e{i}")).collect();
        let entities: Vec<Entity> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let parent = if make_cycle {
                    Some(ids[(i + 1) % size].as_str())
                } else if i > 0 {
                    Some(ids[i - 1].as_str())
                } else {
                    None
                };
                entity_with_parent(id, parent)
            })
            .collect();

        let ordering = RelationGraph::build(&entities).order();
        let mut accounted: Vec<String> = ordering.order.clone();
        accounted.extend(ordering.cyclic_components.into_iter().flatten());
        accounted.sort();
        let mut expected = ids.clone();
        expected.sort();
        prop_assert_eq!(accounted, expected);
    }
}
