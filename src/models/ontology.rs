//! Typed views over entity documents.
//!
//! Entity documents are free-form JSON. Each entity type gets a view that
//! extracts the fields the engines care about (members, parents, references)
//! without failing on unexpected shapes: a field with the wrong type simply
//! contributes nothing.
//!
//! Two reference formats exist for property → category links and both are
//! honored everywhere:
//!
//! ```json
//! { "Allows_value_from_category": "SOP" }
//! { "allowed_values": { "from_category": "SOP" } }
//! ```

use super::graph::EdgeKind;
use super::{EntityRef, EntityType};
use serde_json::Value;

/// Flat property field naming the category that supplies allowed values.
pub const ALLOWS_VALUE_FROM_CATEGORY: &str = "Allows_value_from_category";

/// Nested form of the same reference.
pub const ALLOWED_VALUES_FROM_CATEGORY: &str = "/allowed_values/from_category";

/// An outgoing reference from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: EdgeKind,
    pub target: EntityRef,
}

impl Reference {
    fn new(kind: EdgeKind, entity_type: EntityType, key: &str) -> Self {
        Self {
            kind,
            target: EntityRef::new(entity_type, key),
        }
    }
}

/// Capability shared by every typed entity view.
pub trait EffectiveEntityView {
    fn entity_type(&self) -> EntityType;

    fn label(&self) -> Option<&str>;

    /// Entities this one points at, in document order.
    fn references(&self) -> Vec<Reference>;
}

/// Read a field that may hold a string or a list of strings.
///
/// List entries may also be objects carrying a `name` or `id`.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => obj
                    .get("name")
                    .or_else(|| obj.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn field_list(json: &Value, field: &str) -> Vec<String> {
    string_list(json.get(field))
}

fn label_of(json: &Value) -> Option<String> {
    json.get("label").and_then(Value::as_str).map(str::to_string)
}

/// Concatenate lists, dropping repeats while keeping first-seen order.
fn merge_unique(lists: &[Vec<String>]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for list in lists {
        for item in list {
            if !out.contains(item) {
                out.push(item.clone());
            }
        }
    }
    out
}

/// Categories a property draws its allowed values from.
pub fn category_references(property_json: &Value) -> Vec<String> {
    merge_unique(&[
        string_list(property_json.get(ALLOWS_VALUE_FROM_CATEGORY)),
        string_list(property_json.pointer(ALLOWED_VALUES_FROM_CATEGORY)),
    ])
}

/// Templates a property displays with.
pub fn template_references(property_json: &Value) -> Vec<String> {
    merge_unique(&[
        field_list(property_json, "has_display_template"),
        string_list(property_json.pointer("/display/template")),
    ])
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryView {
    pub label: Option<String>,
    pub parents: Vec<String>,
    pub properties: Vec<String>,
    pub subobjects: Vec<String>,
}

impl CategoryView {
    pub fn from_json(json: &Value) -> Self {
        Self {
            label: label_of(json),
            parents: field_list(json, "parents"),
            properties: merge_unique(&[
                field_list(json, "properties"),
                field_list(json, "required_properties"),
                field_list(json, "optional_properties"),
            ]),
            subobjects: merge_unique(&[
                field_list(json, "subobjects"),
                field_list(json, "required_subobjects"),
                field_list(json, "optional_subobjects"),
            ]),
        }
    }
}

impl EffectiveEntityView for CategoryView {
    fn entity_type(&self) -> EntityType {
        EntityType::Category
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn references(&self) -> Vec<Reference> {
        let parents = self
            .parents
            .iter()
            .map(|p| Reference::new(EdgeKind::SubcategoryOf, EntityType::Category, p));
        let props = self
            .properties
            .iter()
            .map(|p| Reference::new(EdgeKind::HasProperty, EntityType::Property, p));
        let subs = self
            .subobjects
            .iter()
            .map(|s| Reference::new(EdgeKind::HasSubobject, EntityType::Subobject, s));
        parents.chain(props).chain(subs).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyView {
    pub label: Option<String>,
    pub allowed_categories: Vec<String>,
    pub templates: Vec<String>,
}

impl PropertyView {
    pub fn from_json(json: &Value) -> Self {
        Self {
            label: label_of(json),
            allowed_categories: category_references(json),
            templates: template_references(json),
        }
    }
}

impl EffectiveEntityView for PropertyView {
    fn entity_type(&self) -> EntityType {
        EntityType::Property
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn references(&self) -> Vec<Reference> {
        let cats = self
            .allowed_categories
            .iter()
            .map(|c| Reference::new(EdgeKind::AllowsValueFrom, EntityType::Category, c));
        let templates = self
            .templates
            .iter()
            .map(|t| Reference::new(EdgeKind::DisplayTemplate, EntityType::Template, t));
        cats.chain(templates).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubobjectView {
    pub label: Option<String>,
    pub properties: Vec<String>,
}

impl SubobjectView {
    pub fn from_json(json: &Value) -> Self {
        Self {
            label: label_of(json),
            properties: merge_unique(&[
                field_list(json, "properties"),
                field_list(json, "required_properties"),
                field_list(json, "optional_properties"),
            ]),
        }
    }
}

impl EffectiveEntityView for SubobjectView {
    fn entity_type(&self) -> EntityType {
        EntityType::Subobject
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn references(&self) -> Vec<Reference> {
        self.properties
            .iter()
            .map(|p| Reference::new(EdgeKind::HasProperty, EntityType::Property, p))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateView {
    pub label: Option<String>,
}

impl EffectiveEntityView for TemplateView {
    fn entity_type(&self) -> EntityType {
        EntityType::Template
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }
}

/// A module: declared categories plus the derived arrays written back by
/// `oh module stage`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleView {
    pub label: Option<String>,
    pub categories: Vec<String>,
    pub dependencies: Vec<String>,
    pub properties: Vec<String>,
    pub subobjects: Vec<String>,
    pub templates: Vec<String>,
    pub resources: Vec<String>,
}

impl ModuleView {
    pub fn from_json(json: &Value) -> Self {
        Self {
            label: label_of(json),
            categories: field_list(json, "categories"),
            dependencies: field_list(json, "dependencies"),
            properties: field_list(json, "properties"),
            subobjects: field_list(json, "subobjects"),
            templates: field_list(json, "templates"),
            resources: field_list(json, "resources"),
        }
    }
}

impl EffectiveEntityView for ModuleView {
    fn entity_type(&self) -> EntityType {
        EntityType::Module
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn references(&self) -> Vec<Reference> {
        let cats = self
            .categories
            .iter()
            .map(|c| Reference::new(EdgeKind::Includes, EntityType::Category, c));
        let deps = self
            .dependencies
            .iter()
            .map(|m| Reference::new(EdgeKind::DependsOn, EntityType::Module, m));
        cats.chain(deps).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleView {
    pub label: Option<String>,
    pub modules: Vec<String>,
}

impl EffectiveEntityView for BundleView {
    fn entity_type(&self) -> EntityType {
        EntityType::Bundle
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn references(&self) -> Vec<Reference> {
        self.modules
            .iter()
            .map(|m| Reference::new(EdgeKind::Bundles, EntityType::Module, m))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardView {
    pub label: Option<String>,
    pub pages: Vec<String>,
}

impl EffectiveEntityView for DashboardView {
    fn entity_type(&self) -> EntityType {
        EntityType::Dashboard
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceView {
    pub label: Option<String>,
    pub category: Option<String>,
}

impl ResourceView {
    pub fn from_json(json: &Value) -> Self {
        Self {
            label: label_of(json),
            category: json
                .get("category")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }
}

impl EffectiveEntityView for ResourceView {
    fn entity_type(&self) -> EntityType {
        EntityType::Resource
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn references(&self) -> Vec<Reference> {
        self.category
            .iter()
            .map(|c| Reference::new(EdgeKind::InstanceOf, EntityType::Category, c))
            .collect()
    }
}

/// A typed view of any entity document.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityView {
    Category(CategoryView),
    Property(PropertyView),
    Subobject(SubobjectView),
    Template(TemplateView),
    Module(ModuleView),
    Bundle(BundleView),
    Dashboard(DashboardView),
    Resource(ResourceView),
}

impl EntityView {
    pub fn from_json(entity_type: EntityType, json: &Value) -> Self {
        match entity_type {
            EntityType::Category => EntityView::Category(CategoryView::from_json(json)),
            EntityType::Property => EntityView::Property(PropertyView::from_json(json)),
            EntityType::Subobject => EntityView::Subobject(SubobjectView::from_json(json)),
            EntityType::Template => EntityView::Template(TemplateView {
                label: label_of(json),
            }),
            EntityType::Module => EntityView::Module(ModuleView::from_json(json)),
            EntityType::Bundle => EntityView::Bundle(BundleView {
                label: label_of(json),
                modules: field_list(json, "modules"),
            }),
            EntityType::Dashboard => EntityView::Dashboard(DashboardView {
                label: label_of(json),
                pages: field_list(json, "pages"),
            }),
            EntityType::Resource => EntityView::Resource(ResourceView::from_json(json)),
        }
    }

    fn inner(&self) -> &dyn EffectiveEntityView {
        match self {
            EntityView::Category(v) => v,
            EntityView::Property(v) => v,
            EntityView::Subobject(v) => v,
            EntityView::Template(v) => v,
            EntityView::Module(v) => v,
            EntityView::Bundle(v) => v,
            EntityView::Dashboard(v) => v,
            EntityView::Resource(v) => v,
        }
    }
}

impl EffectiveEntityView for EntityView {
    fn entity_type(&self) -> EntityType {
        self.inner().entity_type()
    }

    fn label(&self) -> Option<&str> {
        self.inner().label()
    }

    fn references(&self) -> Vec<Reference> {
        self.inner().references()
    }
}
