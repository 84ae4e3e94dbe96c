//! Module derivation and graph query commands.

use super::draft::{require_open_draft, stage_update};
use super::{Output, json_string, open_storage, resolve_draft_id, status_marker};
use crate::derivation::{DerivationOptions, ModuleDerivationResult};
use crate::models::graph::NeighborhoodGraph;
use crate::models::{EntityRef, EntityType};
use crate::query::{self, AffectedEntities};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Result of `oh module derive`.
#[derive(Serialize)]
pub struct ModuleDerived {
    pub module_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    #[serde(flatten)]
    pub result: ModuleDerivationResult,
}

impl Output for ModuleDerived {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let r = &self.result;
        let mut lines = vec![format!(
            "Module {}: {} round(s){}",
            self.module_key,
            r.rounds,
            if r.truncated { " (truncated)" } else { "" }
        )];
        for (title, keys) in [
            ("Categories", &r.categories),
            ("Properties", &r.properties),
            ("Subobjects", &r.subobjects),
            ("Templates", &r.templates),
            ("Resources", &r.resources),
        ] {
            if keys.is_empty() {
                lines.push(format!("{}: none", title));
            } else {
                lines.push(format!("{} ({}): {}", title, keys.len(), keys.join(", ")));
            }
        }
        if let Some(provenance) = &r.provenance {
            lines.push("Provenance:".to_string());
            for (entity, step) in provenance {
                lines.push(format!("  {} round {} {}", entity, step.round, json_string(&step.reason)));
            }
        }
        lines.join("\n")
    }
}

pub fn module_derive(
    repo_path: &Path,
    draft: Option<&str>,
    module_key: &str,
    options: &DerivationOptions,
) -> Result<ModuleDerived> {
    let storage = open_storage(repo_path)?;
    let draft_id = resolve_draft_id(&storage, draft)?;
    let result =
        query::get_module_derived_entities(&storage, draft_id.as_deref(), module_key, options)?;
    Ok(ModuleDerived {
        module_key: module_key.to_string(),
        draft_id,
        result,
    })
}

/// Result of `oh module stage`.
#[derive(Serialize)]
pub struct ModuleStaged {
    pub module_key: String,
    pub draft_id: String,
    /// Patch written into the module's change
    pub patch: Value,
    /// Whether the draft holds a change for the module afterwards
    pub staged: bool,
    pub truncated: bool,
}

impl Output for ModuleStaged {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let mut line = if self.staged {
            format!("Staged derived arrays for module {} in {}", self.module_key, self.draft_id)
        } else {
            format!(
                "Derived arrays of module {} already match canonical; nothing staged",
                self.module_key
            )
        };
        if self.truncated {
            line.push_str("\nWarning: derivation was truncated");
        }
        line
    }
}

/// Derive a module through a draft and write the derived arrays into it.
pub fn module_stage(
    repo_path: &Path,
    draft: &str,
    module_key: &str,
    options: &DerivationOptions,
) -> Result<ModuleStaged> {
    let mut storage = open_storage(repo_path)?;
    let draft = require_open_draft(&storage, draft)?;
    let result =
        query::get_module_derived_entities(&storage, Some(&draft.id), module_key, options)?;
    let patch = result.derived_arrays_patch();
    let change = stage_update(&mut storage, &draft.id, EntityType::Module, module_key, &patch)?;
    tracing::debug!(module = %module_key, draft = %draft.id, staged = change.is_some(), "module derivation staged");
    Ok(ModuleStaged {
        module_key: module_key.to_string(),
        draft_id: draft.id,
        patch,
        staged: change.is_some(),
        truncated: result.truncated,
    })
}

/// Result of `oh graph neighborhood`.
#[derive(Serialize)]
pub struct Neighborhood {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    #[serde(flatten)]
    pub graph: NeighborhoodGraph,
}

impl Output for Neighborhood {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let graph = &self.graph;
        let mut lines = vec![format!(
            "Neighborhood of {} (depth {}): {} node(s), {} edge(s)",
            graph.root,
            graph.depth,
            graph.nodes.len(),
            graph.edges.len()
        )];
        for node in &graph.nodes {
            let mut line = format!(
                "  {} [{}] {}",
                status_marker(node.change_status),
                node.distance,
                node.entity
            );
            if !node.modules.is_empty() {
                line.push_str(&format!(" (modules: {})", node.modules.join(", ")));
            }
            lines.push(line);
        }
        if !graph.edges.is_empty() {
            lines.push("Edges:".to_string());
            for edge in &graph.edges {
                lines.push(format!("  {} -{}-> {}", edge.source, edge.kind, edge.target));
            }
        }
        lines.join("\n")
    }
}

pub fn graph_neighborhood(
    repo_path: &Path,
    draft: Option<&str>,
    entity_type: EntityType,
    entity_key: &str,
    depth: usize,
    options: &DerivationOptions,
) -> Result<Neighborhood> {
    let storage = open_storage(repo_path)?;
    let draft_id = resolve_draft_id(&storage, draft)?;
    let graph = query::get_neighborhood_graph(
        &storage,
        draft_id.as_deref(),
        entity_type,
        entity_key,
        depth,
        options,
    )?;
    Ok(Neighborhood { draft_id, graph })
}

/// Result of `oh graph affected`.
#[derive(Serialize)]
pub struct Affected {
    #[serde(flatten)]
    pub entities: AffectedEntities,
}

impl Output for Affected {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let list = |refs: &[EntityRef]| {
            if refs.is_empty() {
                "  (none)".to_string()
            } else {
                refs.iter()
                    .map(|r| format!("  {}", r))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        format!(
            "Draft {}\nEdited:\n{}\nAffected:\n{}",
            self.entities.draft_id,
            list(&self.entities.edited),
            list(&self.entities.affected)
        )
    }
}

pub fn graph_affected(repo_path: &Path, draft: &str) -> Result<Affected> {
    let storage = open_storage(repo_path)?;
    let draft_id = resolve_draft_id(&storage, Some(draft))?
        .ok_or_else(|| Error::NotFound(format!("draft {}", draft)))?;
    Ok(Affected {
        entities: query::get_affected_entities(&storage, &draft_id)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{draft_create, draft_show, draft_update, system_init};
    use crate::models::{ChangeType, Entity};
    use crate::storage::Storage;
    use crate::test_utils::{TestEnv, category, module, property_ref, resource};
    use serde_json::json;

    fn seeded_env() -> TestEnv {
        let env = TestEnv::new_with_env();
        system_init(env.path()).unwrap();
        let mut storage = Storage::open(env.path()).unwrap();
        storage
            .replace_canonical(&[
                category("Pet", &[], &["HasOwner"]),
                category("Person", &[], &[]),
                property_ref("HasOwner", "Person"),
                resource("rex", "Pet"),
                module("Pets", &["Pet"]),
                Entity::new(EntityType::Template, "Card", json!({ "id": "Card" })),
            ])
            .unwrap();
        env
    }

    #[test]
    fn test_module_derive_canonical() {
        let env = seeded_env();
        let derived = module_derive(env.path(), None, "Pets", &DerivationOptions::default()).unwrap();
        assert_eq!(derived.result.categories, vec!["Person", "Pet"]);
        assert_eq!(derived.result.properties, vec!["HasOwner"]);
        assert_eq!(derived.result.resources, vec!["rex"]);
        assert!(!derived.result.truncated);
    }

    #[test]
    fn test_module_derive_unknown_module() {
        let env = seeded_env();
        assert!(matches!(
            module_derive(env.path(), None, "Nope", &DerivationOptions::default()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_module_stage_writes_derived_arrays() {
        let env = seeded_env();
        let draft = draft_create(env.path(), "Derive").unwrap().draft;
        let staged =
            module_stage(env.path(), &draft.id, "Pets", &DerivationOptions::default()).unwrap();
        assert!(staged.staged);

        let shown = draft_show(env.path(), &draft.id).unwrap();
        assert_eq!(shown.changes.len(), 1);
        assert_eq!(shown.changes[0].change_type, ChangeType::Update);
        assert!(shown.changes[0].patch_error.is_none());

        // Deriving again through the draft is stable.
        let again =
            module_stage(env.path(), &draft.id, "Pets", &DerivationOptions::default()).unwrap();
        assert!(again.staged);
        assert_eq!(draft_show(env.path(), &draft.id).unwrap().changes.len(), 1);
    }

    #[test]
    fn test_neighborhood_depth_bounds() {
        let env = seeded_env();
        let options = DerivationOptions::default();
        for depth in [0, 6] {
            assert!(matches!(
                graph_neighborhood(env.path(), None, EntityType::Category, "Pet", depth, &options),
                Err(Error::InvalidInput(_))
            ));
        }
        let graph =
            graph_neighborhood(env.path(), None, EntityType::Category, "Pet", 1, &options).unwrap();
        assert_eq!(graph.graph.nodes[0].entity, EntityRef::new(EntityType::Category, "Pet"));
        assert!(graph.graph.nodes.iter().all(|n| n.distance <= 1));
    }

    #[test]
    fn test_graph_affected_through_draft() {
        let env = seeded_env();
        let draft = draft_create(env.path(), "Rename").unwrap().draft;
        draft_update(
            env.path(),
            &draft.id,
            EntityType::Category,
            "Person",
            r#"[{"op":"add","path":"/label","value":"Human"}]"#,
        )
        .unwrap();

        let affected = graph_affected(env.path(), &draft.token).unwrap();
        assert_eq!(affected.entities.draft_id, draft.id);
        assert_eq!(
            affected.entities.edited,
            vec![EntityRef::new(EntityType::Category, "Person")]
        );
        assert!(
            affected
                .entities
                .affected
                .contains(&EntityRef::new(EntityType::Property, "HasOwner"))
        );
    }
}
