//! Module derivation engine.
//!
//! A module declares a handful of categories; everything those categories pull
//! in transitively (member properties and subobjects, instance resources,
//! categories referenced by allowed-value properties, and the display
//! templates of collected properties) is *derived*.
//!
//! Expansion runs in breadth-wise rounds over the effective state:
//!
//! ```text
//! round 1: expand seeds      → members, resources, referenced categories
//! round 2: expand referenced → ...
//! ...until nothing new is pending or max_depth rounds have run
//! ```
//!
//! Each category is expanded at most once, so reference cycles end on their
//! own. `max_depth` counts rounds, and together with `max_visited_categories`
//! bounds the work on long or very wide chains. Hitting either bound stops
//! expansion and marks the result `truncated`; it is never an error.

use crate::models::ontology::{category_references, template_references};
use crate::models::{ChangeStatus, EntityRef, EntityType};
use crate::overlay::EffectiveStateProvider;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Default number of expansion rounds.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Default cap on the number of categories expanded in one derivation.
pub const DEFAULT_MAX_VISITED_CATEGORIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationOptions {
    pub max_depth: usize,
    pub max_visited_categories: usize,
    pub track_provenance: bool,
}

impl Default for DerivationOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_visited_categories: DEFAULT_MAX_VISITED_CATEGORIES,
            track_provenance: false,
        }
    }
}

impl DerivationOptions {
    pub fn with_provenance(mut self) -> Self {
        self.track_provenance = true;
        self
    }
}

/// Why an entity ended up in a derived set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivationReason {
    /// Declared by the module
    Seed,
    /// Member property or subobject of a category
    MemberOf { category: String },
    /// Resource whose category is this one
    ResourceOf { category: String },
    /// Category supplying a collected property's allowed values
    AllowedValueOf { property: String },
    /// Display template of a collected property
    DisplayTemplateOf { property: String },
}

/// First discovery step that introduced an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Expansion round, starting at 1 for the seeds
    pub round: usize,
    pub reason: DerivationReason,
}

/// Everything a module pulls in. All sets are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDerivationResult {
    /// Categories that were expanded (seeds included)
    pub categories: Vec<String>,
    pub properties: Vec<String>,
    pub subobjects: Vec<String>,
    pub templates: Vec<String>,
    pub resources: Vec<String>,

    /// Rounds of expansion that ran
    pub rounds: usize,

    /// Expansion stopped at a bound with work still pending
    pub truncated: bool,

    /// `type:key` → first discovery step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<BTreeMap<String, Provenance>>,
}

impl ModuleDerivationResult {
    /// JSON Patch writing the derived arrays into a module document.
    ///
    /// Uses `add` throughout since the arrays may be absent.
    pub fn derived_arrays_patch(&self) -> Value {
        let ops: Vec<Value> = [
            ("/properties", &self.properties),
            ("/subobjects", &self.subobjects),
            ("/templates", &self.templates),
            ("/resources", &self.resources),
        ]
        .into_iter()
        .map(|(path, values)| json!({ "op": "add", "path": path, "value": values }))
        .collect();
        Value::Array(ops)
    }
}

struct Accumulator {
    track: bool,
    provenance: BTreeMap<String, Provenance>,
}

impl Accumulator {
    fn record(&mut self, entity_type: EntityType, key: &str, round: usize, reason: DerivationReason) {
        if self.track {
            self.provenance
                .entry(EntityRef::new(entity_type, key).to_string())
                .or_insert(Provenance { round, reason });
        }
    }
}

/// Derive the transitive closure of `seeds` over the effective state.
///
/// Fails with `InvalidSeed` if a seed is not a category (canonical or
/// draft-created). Every other lookup degrades to an empty contribution.
pub fn derive_module_entities<P>(
    seeds: &BTreeSet<String>,
    provider: &P,
    options: &DerivationOptions,
) -> Result<ModuleDerivationResult>
where
    P: EffectiveStateProvider + ?Sized,
{
    for seed in seeds {
        if provider.get_effective_json(EntityType::Category, seed)?.is_none() {
            return Err(Error::InvalidSeed(seed.clone()));
        }
    }

    let mut acc = Accumulator {
        track: options.track_provenance,
        provenance: BTreeMap::new(),
    };
    // Categories are credited when expanded, so truncated ones never appear.
    let mut reasons: BTreeMap<String, DerivationReason> = seeds
        .iter()
        .map(|seed| (seed.clone(), DerivationReason::Seed))
        .collect();

    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut pending: BTreeSet<String> = seeds.clone();
    let mut properties: BTreeSet<String> = BTreeSet::new();
    let mut subobjects: BTreeSet<String> = BTreeSet::new();
    let mut resources: BTreeSet<String> = BTreeSet::new();
    let mut scanned: HashSet<String> = HashSet::new();
    let mut depth = 0;
    let mut truncated = false;

    loop {
        let mut batch: Vec<String> = pending.difference(&visited).cloned().collect();
        if batch.is_empty() {
            break;
        }
        if depth >= options.max_depth {
            tracing::warn!(
                max_depth = options.max_depth,
                pending = batch.len(),
                "module derivation stopped at max depth"
            );
            truncated = true;
            break;
        }
        let room = options.max_visited_categories.saturating_sub(visited.len());
        if batch.len() > room {
            tracing::warn!(
                max_visited_categories = options.max_visited_categories,
                dropped = batch.len() - room,
                "module derivation stopped at visited-category limit"
            );
            batch.truncate(room);
            truncated = true;
            if batch.is_empty() {
                break;
            }
        }

        let round = depth + 1;
        for category in &batch {
            if let Some(reason) = reasons.remove(category) {
                acc.record(EntityType::Category, category, round, reason);
            }
        }
        visited.extend(batch.iter().cloned());

        let mut new_properties = Vec::new();
        for category in &batch {
            let members = provider.category_members(category)?;
            for property in members.properties {
                if properties.insert(property.clone()) {
                    acc.record(
                        EntityType::Property,
                        &property,
                        round,
                        DerivationReason::MemberOf {
                            category: category.clone(),
                        },
                    );
                    new_properties.push(property);
                }
            }
            for subobject in members.subobjects {
                if subobjects.insert(subobject.clone()) {
                    acc.record(
                        EntityType::Subobject,
                        &subobject,
                        round,
                        DerivationReason::MemberOf {
                            category: category.clone(),
                        },
                    );
                }
            }
            for resource in provider.resources_for_category(category)? {
                if resources.insert(resource.clone()) {
                    acc.record(
                        EntityType::Resource,
                        &resource,
                        round,
                        DerivationReason::ResourceOf {
                            category: category.clone(),
                        },
                    );
                }
            }
        }

        for property in new_properties {
            if !scanned.insert(property.clone()) {
                continue;
            }
            let Some(json) = live_json(provider, EntityType::Property, &property)? else {
                continue;
            };
            for referenced in category_references(&json) {
                if !visited.contains(&referenced) && pending.insert(referenced.clone()) {
                    reasons.insert(
                        referenced,
                        DerivationReason::AllowedValueOf {
                            property: property.clone(),
                        },
                    );
                }
            }
        }

        tracing::debug!(
            round,
            expanded = batch.len(),
            properties = properties.len(),
            resources = resources.len(),
            "derivation round complete"
        );
        depth += 1;
    }

    let mut templates: BTreeSet<String> = BTreeSet::new();
    for property in &properties {
        let Some(json) = live_json(provider, EntityType::Property, property)? else {
            continue;
        };
        for template in template_references(&json) {
            if templates.insert(template.clone()) {
                acc.record(
                    EntityType::Template,
                    &template,
                    depth,
                    DerivationReason::DisplayTemplateOf {
                        property: property.clone(),
                    },
                );
            }
        }
    }

    Ok(ModuleDerivationResult {
        categories: visited.into_iter().collect(),
        properties: properties.into_iter().collect(),
        subobjects: subobjects.into_iter().collect(),
        templates: templates.into_iter().collect(),
        resources: resources.into_iter().collect(),
        rounds: depth,
        truncated,
        provenance: options.track_provenance.then_some(acc.provenance),
    })
}

/// Effective document of an entity the draft does not delete.
fn live_json<P>(provider: &P, entity_type: EntityType, key: &str) -> Result<Option<Value>>
where
    P: EffectiveStateProvider + ?Sized,
{
    Ok(provider
        .effective_entity(entity_type, key)?
        .filter(|e| e.change_status != ChangeStatus::Deleted && e.exists())
        .map(|e| e.effective_json))
}
