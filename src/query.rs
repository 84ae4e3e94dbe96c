//! Query operations exposed to the presentation layer.
//!
//! Every query takes an optional draft id. Without one, results reflect
//! canonical state only and every `change_status` is `unchanged`.

use crate::derivation::{DerivationOptions, ModuleDerivationResult, derive_module_entities};
use crate::models::graph::{
    GraphEdge, GraphNode, ModuleHull, NeighborhoodGraph, compute_affected_entities,
};
use crate::models::ontology::{EffectiveEntityView, EntityView, ModuleView};
use crate::models::{ChangeStatus, EffectiveEntity, EntityRef, EntityType};
use crate::overlay::{EffectiveState, EffectiveStateProvider, InheritedMembers, apply_overlay};
use crate::storage::{DraftStore, EntityStore};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Largest neighborhood radius a query may ask for.
pub const MAX_GRAPH_DEPTH: usize = 5;

/// One entity as seen through a draft.
pub fn get_effective_entity<S>(
    store: &S,
    draft_id: Option<&str>,
    entity_type: EntityType,
    entity_key: &str,
) -> Result<EffectiveEntity>
where
    S: EntityStore + DraftStore + ?Sized,
{
    let canonical = store.get_entity(entity_type, entity_key)?;
    let change = match draft_id {
        Some(id) => store.get_draft_change(id, entity_type, entity_key)?,
        None => None,
    };
    apply_overlay(entity_type, entity_key, canonical.as_ref(), change.as_ref())
}

/// All entities of a type as seen through a draft, ordered by key.
pub fn list_effective_entities<S>(
    store: &S,
    draft_id: Option<&str>,
    entity_type: EntityType,
) -> Result<Vec<EffectiveEntity>>
where
    S: EntityStore + DraftStore + ?Sized,
{
    EffectiveState::new(store, draft_id)?.effective_entities_of_type(entity_type)
}

/// Members of a category including those inherited from its ancestors.
pub fn get_inherited_members<S>(
    store: &S,
    draft_id: Option<&str>,
    category_key: &str,
) -> Result<InheritedMembers>
where
    S: EntityStore + DraftStore + ?Sized,
{
    EffectiveState::new(store, draft_id)?.inherited_members(category_key)
}

/// Derive a module's closure from its effective declared categories.
pub fn get_module_derived_entities<S>(
    store: &S,
    draft_id: Option<&str>,
    module_key: &str,
    options: &DerivationOptions,
) -> Result<ModuleDerivationResult>
where
    S: EntityStore + DraftStore + ?Sized,
{
    let state = EffectiveState::new(store, draft_id)?;
    let module = state
        .get_effective_json(EntityType::Module, module_key)?
        .ok_or_else(|| Error::NotFound(format!("module:{}", module_key)))?;
    let seeds: BTreeSet<String> = ModuleView::from_json(&module).categories.into_iter().collect();
    derive_module_entities(&seeds, &state, options)
}

/// Every effective entity plus the reference edges between them.
struct GraphSnapshot {
    entities: BTreeMap<EntityRef, EffectiveEntity>,
    edges: BTreeSet<GraphEdge>,
}

impl GraphSnapshot {
    fn build<S>(state: &EffectiveState<'_, S>) -> Result<Self>
    where
        S: EntityStore + DraftStore + ?Sized,
    {
        let mut entities = BTreeMap::new();
        for entity_type in EntityType::all() {
            for effective in state.effective_entities_of_type(*entity_type)? {
                if effective.exists() {
                    entities.insert(effective.entity_ref(), effective);
                }
            }
        }

        // Edges to entities that do not exist are dropped.
        let mut edges = BTreeSet::new();
        for (source, effective) in &entities {
            let view = EntityView::from_json(source.entity_type, &effective.effective_json);
            for reference in view.references() {
                if entities.contains_key(&reference.target) {
                    edges.insert(GraphEdge {
                        source: source.clone(),
                        target: reference.target,
                        kind: reference.kind,
                    });
                }
            }
        }

        Ok(Self { entities, edges })
    }

    fn node(&self, entity: &EntityRef, distance: usize, modules: Vec<String>) -> Option<GraphNode> {
        let effective = self.entities.get(entity)?;
        Some(GraphNode {
            entity: entity.clone(),
            label: effective.label().map(str::to_string),
            change_status: effective.change_status,
            modules,
            distance,
        })
    }

    /// Undirected adjacency, sorted for deterministic traversal.
    fn adjacency(&self) -> BTreeMap<&EntityRef, BTreeSet<&EntityRef>> {
        let mut adjacency: BTreeMap<&EntityRef, BTreeSet<&EntityRef>> = BTreeMap::new();
        for edge in &self.edges {
            adjacency.entry(&edge.source).or_default().insert(&edge.target);
            adjacency.entry(&edge.target).or_default().insert(&edge.source);
        }
        adjacency
    }
}

/// Modules each entity belongs to: the module itself, its declared
/// categories and everything derived from them.
fn module_membership<S>(
    state: &EffectiveState<'_, S>,
    snapshot: &GraphSnapshot,
    options: &DerivationOptions,
) -> BTreeMap<EntityRef, BTreeSet<String>>
where
    S: EntityStore + DraftStore + ?Sized,
{
    let mut membership: BTreeMap<EntityRef, BTreeSet<String>> = BTreeMap::new();
    let modules = snapshot
        .entities
        .values()
        .filter(|e| e.entity_type == EntityType::Module && e.change_status != ChangeStatus::Deleted);

    for module in modules {
        let key = &module.entity_key;
        let view = ModuleView::from_json(&module.effective_json);
        let seeds: BTreeSet<String> = view.categories.iter().cloned().collect();

        let mut members: Vec<EntityRef> = vec![module.entity_ref()];
        members.extend(
            view.categories
                .iter()
                .map(|c| EntityRef::new(EntityType::Category, c.as_str())),
        );
        match derive_module_entities(&seeds, state, options) {
            Ok(derived) => {
                let typed = [
                    (EntityType::Category, &derived.categories),
                    (EntityType::Property, &derived.properties),
                    (EntityType::Subobject, &derived.subobjects),
                    (EntityType::Template, &derived.templates),
                    (EntityType::Resource, &derived.resources),
                ];
                for (entity_type, keys) in typed {
                    members.extend(keys.iter().map(|k| EntityRef::new(entity_type, k.as_str())));
                }
            }
            Err(e) => tracing::warn!(
                module = %key,
                "module derivation failed; using declared categories only: {}",
                e
            ),
        }

        for member in members {
            membership.entry(member).or_default().insert(key.clone());
        }
    }

    membership
}

/// Entities within `depth` hops of the root, ignoring edge direction.
///
/// Nodes carry their draft status and module membership; `hulls` group the
/// returned nodes by module.
pub fn get_neighborhood_graph<S>(
    store: &S,
    draft_id: Option<&str>,
    entity_type: EntityType,
    entity_key: &str,
    depth: usize,
    options: &DerivationOptions,
) -> Result<NeighborhoodGraph>
where
    S: EntityStore + DraftStore + ?Sized,
{
    if !(1..=MAX_GRAPH_DEPTH).contains(&depth) {
        return Err(Error::InvalidInput(format!(
            "graph depth must be between 1 and {}, got {}",
            MAX_GRAPH_DEPTH, depth
        )));
    }

    let state = EffectiveState::new(store, draft_id)?;
    let snapshot = GraphSnapshot::build(&state)?;
    let root = EntityRef::new(entity_type, entity_key);
    if !snapshot.entities.contains_key(&root) {
        return Err(Error::NotFound(root.to_string()));
    }

    let adjacency = snapshot.adjacency();
    let mut distances: BTreeMap<&EntityRef, usize> = BTreeMap::new();
    let mut order: Vec<&EntityRef> = Vec::new();
    let mut queue = VecDeque::new();
    distances.insert(&root, 0);
    order.push(&root);
    queue.push_back(&root);

    while let Some(current) = queue.pop_front() {
        let distance = distances[current];
        if distance >= depth {
            continue;
        }
        let Some(neighbors) = adjacency.get(current) else {
            continue;
        };
        for &neighbor in neighbors {
            if !distances.contains_key(neighbor) {
                distances.insert(neighbor, distance + 1);
                order.push(neighbor);
                queue.push_back(neighbor);
            }
        }
    }

    let membership = module_membership(&state, &snapshot, options);
    let nodes: Vec<GraphNode> = order
        .iter()
        .filter_map(|entity| {
            let modules = membership
                .get(*entity)
                .map(|m| m.iter().cloned().collect())
                .unwrap_or_default();
            snapshot.node(entity, distances[*entity], modules)
        })
        .collect();

    let edges: Vec<GraphEdge> = snapshot
        .edges
        .iter()
        .filter(|e| distances.contains_key(&e.source) && distances.contains_key(&e.target))
        .cloned()
        .collect();

    let mut hulls: BTreeMap<&str, Vec<EntityRef>> = BTreeMap::new();
    for node in &nodes {
        for module in &node.modules {
            hulls.entry(module.as_str()).or_default().push(node.entity.clone());
        }
    }
    let hulls = hulls
        .into_iter()
        .map(|(module_key, members)| ModuleHull {
            module_key: module_key.to_string(),
            members,
        })
        .collect();

    Ok(NeighborhoodGraph {
        root,
        depth,
        nodes,
        edges,
        hulls,
    })
}

/// Entities a draft edits directly and those that reference them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AffectedEntities {
    pub draft_id: String,
    pub edited: Vec<EntityRef>,
    /// Transitively referencing entities, excluding edited ones
    pub affected: Vec<EntityRef>,
}

/// Recompute the edited/affected sets of a draft from the current graph.
pub fn get_affected_entities<S>(store: &S, draft_id: &str) -> Result<AffectedEntities>
where
    S: EntityStore + DraftStore + ?Sized,
{
    let state = EffectiveState::new(store, Some(draft_id))?;
    let snapshot = GraphSnapshot::build(&state)?;
    let nodes: Vec<GraphNode> = snapshot
        .entities
        .keys()
        .filter_map(|entity| snapshot.node(entity, 0, Vec::new()))
        .collect();
    let edges: Vec<GraphEdge> = snapshot.edges.iter().cloned().collect();

    let edited: BTreeSet<EntityRef> = state.changes().iter().map(|c| c.entity_ref()).collect();
    let mut affected = BTreeSet::new();
    for entity in &edited {
        affected.extend(compute_affected_entities(entity, &nodes, &edges));
    }

    Ok(AffectedEntities {
        draft_id: draft_id.to_string(),
        affected: affected.difference(&edited).cloned().collect(),
        edited: edited.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::graph::EdgeKind;
    use crate::storage::MemoryStore;
    use crate::test_utils::{category, create, delete, module, property_ref, resource, update};
    use serde_json::json;

    fn pets() -> MemoryStore {
        MemoryStore::with_entities([
            category("Animal", &[], &["HasName"]),
            category("Dog", &["Animal"], &["HasOwner"]),
            category("Person", &[], &[]),
            category("Car", &[], &[]),
            property_ref("HasOwner", "Person"),
            resource("rex", "Dog"),
            module("Pets", &["Dog"]),
        ])
    }

    #[test]
    fn test_get_effective_entity_without_draft_is_unchanged() {
        let mut store = pets();
        store.put_change(delete("d1", EntityType::Category, "Dog"));

        let eff = get_effective_entity(&store, None, EntityType::Category, "Dog").unwrap();
        assert_eq!(eff.change_status, ChangeStatus::Unchanged);
        let eff = get_effective_entity(&store, Some("d1"), EntityType::Category, "Dog").unwrap();
        assert_eq!(eff.change_status, ChangeStatus::Deleted);
    }

    #[test]
    fn test_get_effective_entity_not_found() {
        let store = pets();
        let err = get_effective_entity(&store, Some("d1"), EntityType::Category, "Cat").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_module_derivation_uses_effective_categories() {
        let mut store = pets();
        store.put_change(update(
            "d1",
            EntityType::Module,
            "Pets",
            json!([{ "op": "add", "path": "/categories/-", "value": "Car" }]),
        ));

        let options = DerivationOptions::default();
        let canonical = get_module_derived_entities(&store, None, "Pets", &options).unwrap();
        assert_eq!(canonical.categories, vec!["Dog", "Person"]);
        assert_eq!(canonical.properties, vec!["HasOwner"]);
        assert_eq!(canonical.resources, vec!["rex"]);

        let drafted = get_module_derived_entities(&store, Some("d1"), "Pets", &options).unwrap();
        assert_eq!(drafted.categories, vec!["Car", "Dog", "Person"]);
    }

    #[test]
    fn test_module_derivation_unknown_module() {
        let store = pets();
        let err = get_module_derived_entities(&store, None, "Nope", &DerivationOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_neighborhood_depth_bounds() {
        let store = pets();
        let options = DerivationOptions::default();
        for depth in [0, 6] {
            let err = get_neighborhood_graph(&store, None, EntityType::Category, "Dog", depth, &options)
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)));
        }
    }

    #[test]
    fn test_neighborhood_one_hop() {
        let store = pets();
        let graph = get_neighborhood_graph(
            &store,
            None,
            EntityType::Category,
            "Dog",
            1,
            &DerivationOptions::default(),
        )
        .unwrap();

        let keys: BTreeSet<String> = graph.nodes.iter().map(|n| n.entity.to_string()).collect();
        let expected: BTreeSet<String> = [
            "category:Dog",
            "category:Animal",
            "property:HasOwner",
            "resource:rex",
            "module:Pets",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        assert_eq!(keys, expected);
        assert_eq!(graph.nodes[0].entity, EntityRef::new(EntityType::Category, "Dog"));
        assert_eq!(graph.nodes[0].distance, 0);

        // Person is two hops away through HasOwner
        assert!(!keys.contains("category:Person"));
        assert!(graph.edges.iter().any(|e| e.kind == EdgeKind::SubcategoryOf));
    }

    #[test]
    fn test_neighborhood_annotates_status_and_modules() {
        let mut store = pets();
        store.put_change(update(
            "d1",
            EntityType::Category,
            "Person",
            json!([{ "op": "add", "path": "/label", "value": "Human" }]),
        ));
        store.put_change(create(
            "d1",
            EntityType::Resource,
            "fido",
            json!({ "category": "Dog" }),
        ));

        let graph = get_neighborhood_graph(
            &store,
            Some("d1"),
            EntityType::Category,
            "Dog",
            2,
            &DerivationOptions::default(),
        )
        .unwrap();

        let node = |key: &str| {
            graph
                .nodes
                .iter()
                .find(|n| n.entity.entity_key == key)
                .unwrap()
        };
        assert_eq!(node("Person").change_status, ChangeStatus::Modified);
        assert_eq!(node("Person").label.as_deref(), Some("Human"));
        assert_eq!(node("fido").change_status, ChangeStatus::Added);
        assert_eq!(node("Person").modules, vec!["Pets"]);
        assert_eq!(node("fido").modules, vec!["Pets"]);
        assert!(node("Animal").modules.is_empty());

        let hull = graph.hulls.iter().find(|h| h.module_key == "Pets").unwrap();
        assert!(hull.members.contains(&EntityRef::new(EntityType::Property, "HasOwner")));
    }

    #[test]
    fn test_neighborhood_survives_broken_module() {
        let mut store = pets();
        store.put_entity(module("Broken", &["Missing"]));
        let graph = get_neighborhood_graph(
            &store,
            None,
            EntityType::Module,
            "Broken",
            1,
            &DerivationOptions::default(),
        )
        .unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].modules, vec!["Broken"]);
    }

    #[test]
    fn test_affected_entities_of_draft() {
        let mut store = pets();
        store.put_change(update(
            "d1",
            EntityType::Category,
            "Person",
            json!([{ "op": "add", "path": "/label", "value": "Human" }]),
        ));

        let result = get_affected_entities(&store, "d1").unwrap();
        assert_eq!(result.edited, vec![EntityRef::new(EntityType::Category, "Person")]);
        // HasOwner → Person, Dog → HasOwner, rex → Dog, Pets → Dog
        let affected: Vec<String> = result.affected.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            affected,
            vec!["category:Dog", "property:HasOwner", "module:Pets", "resource:rex"]
        );
    }
}
