//! Graph structures for ontology visualization.
//!
//! Nodes and edges are derived from effective entity documents. The
//! "affected entities" of an edit are computed statelessly from a graph
//! snapshot every time the change log moves, never tracked incrementally.

use super::{ChangeStatus, EntityRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

/// Type of reference between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Category → parent category
    SubcategoryOf,
    /// Category/Subobject → property
    HasProperty,
    /// Category → subobject
    HasSubobject,
    /// Property → category supplying its allowed values
    AllowsValueFrom,
    /// Property → template
    DisplayTemplate,
    /// Resource → category
    InstanceOf,
    /// Module → declared category
    Includes,
    /// Module → module
    DependsOn,
    /// Bundle → module
    Bundles,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeKind::SubcategoryOf => "subcategory_of",
            EdgeKind::HasProperty => "has_property",
            EdgeKind::HasSubobject => "has_subobject",
            EdgeKind::AllowsValueFrom => "allows_value_from",
            EdgeKind::DisplayTemplate => "display_template",
            EdgeKind::InstanceOf => "instance_of",
            EdgeKind::Includes => "includes",
            EdgeKind::DependsOn => "depends_on",
            EdgeKind::Bundles => "bundles",
        };
        write!(f, "{}", s)
    }
}

/// A directed reference between two entities.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: EntityRef,
    pub target: EntityRef,
    pub kind: EdgeKind,
}

/// A node annotated with its draft status and module membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(flatten)]
    pub entity: EntityRef,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    pub change_status: ChangeStatus,

    /// Modules that include this entity, directly or by derivation
    #[serde(default)]
    pub modules: Vec<String>,

    /// Hops from the root of the query
    pub distance: usize,
}

/// Nodes of one module inside a neighborhood, for drawing hulls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleHull {
    pub module_key: String,
    pub members: Vec<EntityRef>,
}

/// Result of a neighborhood query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborhoodGraph {
    pub root: EntityRef,
    pub depth: usize,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub hulls: Vec<ModuleHull>,
}

/// Entities transitively affected by an edit to `edited`.
///
/// Walks edges backwards (from target to source): anything that references
/// the edited entity, directly or through a chain, is affected. Only nodes
/// present in `nodes` are reported. The edited entity itself is excluded.
pub fn compute_affected_entities(
    edited: &EntityRef,
    nodes: &[GraphNode],
    edges: &[GraphEdge],
) -> BTreeSet<EntityRef> {
    let known: HashSet<&EntityRef> = nodes.iter().map(|n| &n.entity).collect();

    let mut reverse: HashMap<&EntityRef, Vec<&EntityRef>> = HashMap::new();
    for edge in edges {
        reverse.entry(&edge.target).or_default().push(&edge.source);
    }

    let mut affected = BTreeSet::new();
    let mut visited: HashSet<&EntityRef> = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(edited);
    queue.push_back(edited);

    while let Some(current) = queue.pop_front() {
        let Some(sources) = reverse.get(current) else {
            continue;
        };
        for &source in sources {
            if visited.insert(source) {
                if known.contains(source) {
                    affected.insert(source.clone());
                }
                queue.push_back(source);
            }
        }
    }

    affected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;

    fn node(entity_type: EntityType, key: &str) -> GraphNode {
        GraphNode {
            entity: EntityRef::new(entity_type, key),
            label: None,
            change_status: ChangeStatus::Unchanged,
            modules: Vec::new(),
            distance: 0,
        }
    }

    fn edge(source: &GraphNode, target: &GraphNode, kind: EdgeKind) -> GraphEdge {
        GraphEdge {
            source: source.entity.clone(),
            target: target.entity.clone(),
            kind,
        }
    }

    #[test]
    fn test_affected_empty_graph() {
        let edited = EntityRef::new(EntityType::Property, "P");
        assert!(compute_affected_entities(&edited, &[], &[]).is_empty());
    }

    #[test]
    fn test_affected_follows_reverse_edges_transitively() {
        let prop = node(EntityType::Property, "HasCollar");
        let dog = node(EntityType::Category, "Dog");
        let module = node(EntityType::Module, "Pets");
        let unrelated = node(EntityType::Category, "Car");

        let nodes = vec![prop.clone(), dog.clone(), module.clone(), unrelated.clone()];
        let edges = vec![
            edge(&dog, &prop, EdgeKind::HasProperty),
            edge(&module, &dog, EdgeKind::Includes),
        ];

        let affected = compute_affected_entities(&prop.entity, &nodes, &edges);
        assert_eq!(affected.len(), 2);
        assert!(affected.contains(&dog.entity));
        assert!(affected.contains(&module.entity));
        assert!(!affected.contains(&unrelated.entity));
    }

    #[test]
    fn test_affected_does_not_follow_forward_edges() {
        let dog = node(EntityType::Category, "Dog");
        let animal = node(EntityType::Category, "Animal");
        let nodes = vec![dog.clone(), animal.clone()];
        let edges = vec![edge(&dog, &animal, EdgeKind::SubcategoryOf)];

        // Editing the child does not affect the parent
        assert!(compute_affected_entities(&dog.entity, &nodes, &edges).is_empty());
        // Editing the parent affects the child
        let affected = compute_affected_entities(&animal.entity, &nodes, &edges);
        assert!(affected.contains(&dog.entity));
    }

    #[test]
    fn test_affected_terminates_on_cycles() {
        let a = node(EntityType::Category, "A");
        let b = node(EntityType::Category, "B");
        let nodes = vec![a.clone(), b.clone()];
        let edges = vec![
            edge(&a, &b, EdgeKind::SubcategoryOf),
            edge(&b, &a, EdgeKind::SubcategoryOf),
        ];

        let affected = compute_affected_entities(&a.entity, &nodes, &edges);
        assert_eq!(affected.into_iter().collect::<Vec<_>>(), vec![b.entity]);
    }

    #[test]
    fn test_edge_kind_display_matches_serde() {
        let json = serde_json::to_string(&EdgeKind::AllowsValueFrom).unwrap();
        assert_eq!(json, format!("\"{}\"", EdgeKind::AllowsValueFrom));
    }
}
