//! Relation graph ordering for the State Applier (§4.4 step 2): builds a
//! dependency DAG from entity relations, detects cycles, and produces a
//! leaves-first topological order (referents before referers) for the
//! upsert phase. Self-loops are ignored per the specification.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::domain::models::{Entity, RelationTarget};

#[derive(Debug, Clone, Default)]
struct RelationNode {
    /// Identifiers this node's relations point at (its upsert must follow
    /// theirs).
    dependencies: BTreeSet<String>,
    /// Identifiers that point at this node.
    dependents: BTreeSet<String>,
}

/// A dependency graph over a batch of entities, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    nodes: BTreeMap<String, RelationNode>,
}

/// The result of ordering a [`RelationGraph`]: a leaves-first order for the
/// acyclic part, plus any cyclic sub-components excluded from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DagOrdering {
    /// Identifiers in upsert order: every identifier appears after all of
    /// its relation targets (that are present in this graph).
    pub order: Vec<String>,
    /// Each inner vector is one weakly-connected cyclic sub-component,
    /// excluded from `order`.
    pub cyclic_components: Vec<Vec<String>>,
}

impl RelationGraph {
    /// Builds the graph from a batch of parseable entities. Relation
    /// targets that are not identifiers of entities in this same batch are
    /// ignored for ordering purposes (they are either already-applied
    /// entities or will be created as stubs, neither of which this batch's
    /// ordering needs to account for).
    pub fn build(entities: &[Entity]) -> Self {
        let ids: BTreeSet<&str> = entities.iter().filter_map(Entity::id).collect();
        let mut nodes: BTreeMap<String, RelationNode> = ids
            .iter()
            .map(|id| (id.to_string(), RelationNode::default()))
            .collect();

        for entity in entities {
            let Some(id) = entity.id() else { continue };
            for target in entity.relations.values() {
                for target_id in relation_targets(target) {
                    if target_id == id || !ids.contains(target_id.as_str()) {
                        continue;
                    }
                    nodes.get_mut(id).expect("id is a key").dependencies.insert(target_id.clone());
                    nodes.get_mut(&target_id).expect("target_id is a key").dependents.insert(id.to_string());
                }
            }
        }

        Self { nodes }
    }

    /// Kahn's algorithm, peeling nodes whose dependencies have all been
    /// placed. Whatever remains once the queue runs dry belongs to one or
    /// more cycles; those are reported as separate weakly-connected
    /// components rather than a single blob, so independent cyclic
    /// sub-graphs get independent diagnostics.
    pub fn order(&self) -> DagOrdering {
        let mut in_degree: BTreeMap<String, usize> = self
            .nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.dependencies.len()))
            .collect();

        let mut queue: VecDeque<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| id.clone())
            .collect();

        let mut order = Vec::new();
        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            let Some(node) = self.nodes.get(&id) else { continue };
            for dependent in &node.dependents {
                let degree = in_degree.get_mut(dependent).expect("dependent is a node");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent.clone());
                }
            }
        }

        let placed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let remaining: BTreeSet<&str> = self
            .nodes
            .keys()
            .map(String::as_str)
            .filter(|id| !placed.contains(id))
            .collect();

        DagOrdering {
            order,
            cyclic_components: self.weakly_connected_components(&remaining),
        }
    }

    fn weakly_connected_components(&self, remaining: &BTreeSet<&str>) -> Vec<Vec<String>> {
        let mut unvisited: BTreeSet<&str> = remaining.clone();
        let mut components = Vec::new();

        while let Some(&start) = unvisited.iter().next() {
            let mut component = Vec::new();
            let mut queue = VecDeque::from([start]);
            unvisited.remove(start);

            while let Some(id) = queue.pop_front() {
                component.push(id.to_string());
                let Some(node) = self.nodes.get(id) else { continue };
                let neighbors = node.dependencies.iter().chain(node.dependents.iter());
                for neighbor in neighbors {
                    if remaining.contains(neighbor.as_str()) && unvisited.remove(neighbor.as_str()) {
                        queue.push_back(neighbor.as_str());
                    }
                }
            }

            component.sort();
            components.push(component);
        }

        components
    }
}

fn relation_targets(target: &RelationTarget) -> Vec<String> {
    match target {
        RelationTarget::Single(id) => vec![id.clone()],
        RelationTarget::Many(ids) => ids.clone(),
        RelationTarget::Search(_) | RelationTarget::Null => Vec::new(),
    }
}
