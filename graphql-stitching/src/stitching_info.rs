//! Derived metadata about how types are merged across subschemas.
//!
//! Built once when the gateway is composed, then only read while delegating.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use indexmap::IndexMap;

use crate::error::DelegationError;
use crate::merge::DefaultMergedTypeResolver;
use crate::merge::MergedTypeResolver;
use crate::spec;
use crate::subschema::Subschema;
use crate::transforms::visitor::parse_fragment;
use crate::transforms::visitor::parse_selection_set;

/// A parsed selection set with a normalized printed form used as a lookup key.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionSet {
    key: String,
    selections: Vec<ast::Selection>,
}

impl SelectionSet {
    pub fn parse(source: &str) -> Result<Self, DelegationError> {
        Ok(Self::new(parse_selection_set(source)?))
    }

    pub fn new(selections: Vec<ast::Selection>) -> Self {
        Self {
            key: print_selection_set(&selections),
            selections,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn selections(&self) -> &[ast::Selection] {
        &self.selections
    }
}

fn print_selection_set(selections: &[ast::Selection]) -> String {
    let mut document = ast::Document::new();
    document.definitions.push(
        Node::new(ast::OperationDefinition {
            operation_type: ast::OperationType::Query,
            name: None,
            variables: Vec::new(),
            directives: ast::DirectiveList::new(),
            selection_set: selections.to_vec(),
        })
        .into(),
    );
    document.to_string()
}

/// How one object type is merged across the subschemas that declare it.
#[derive(Clone, Default)]
pub struct MergedTypeInfo {
    pub type_name: Option<Name>,
    /// Every subschema declaring the type, in subschema order.
    pub subschemas: Vec<Arc<Subschema>>,
    /// For each subschema an object may come from, the other subschemas able
    /// to resolve more of its fields.
    pub target_subschemas: IndexMap<Arc<Subschema>, Vec<Arc<Subschema>>>,
    /// Fields declared by exactly one subschema.
    pub unique_fields: IndexMap<Name, Arc<Subschema>>,
    /// Fields declared by several subschemas, in subschema order.
    pub non_unique_fields: IndexMap<Name, Vec<Arc<Subschema>>>,
    /// What each subschema needs to know about an object before resolving it.
    pub selection_sets: IndexMap<Arc<Subschema>, SelectionSet>,
    /// What each subschema needs to know about an object before resolving one of its fields.
    pub field_selection_sets: IndexMap<Arc<Subschema>, IndexMap<Name, SelectionSet>>,
    /// For each subschema, whether its declaration of the type contains a
    /// selection set, by selection set key.
    pub contains_selection_set: IndexMap<Arc<Subschema>, HashMap<String, bool>>,
    pub resolvers: IndexMap<Arc<Subschema>, Arc<dyn MergedTypeResolver>>,
}

impl MergedTypeInfo {
    pub fn new(type_name: Name) -> Self {
        Self {
            type_name: Some(type_name),
            ..Default::default()
        }
    }

    /// The subschemas that can complete an object fetched from `source`.
    pub fn target_subschemas(&self, source: &Subschema) -> &[Arc<Subschema>] {
        self.target_subschemas
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether the objects already fetched from `sources` hold every field of `selection_set`.
    pub fn sources_contain(&self, sources: &[Arc<Subschema>], selection_set: &SelectionSet) -> bool {
        let known = sources.iter().any(|source| {
            self.contains_selection_set
                .get(source)
                .and_then(|table| table.get(selection_set.key()))
                .copied()
                .unwrap_or(false)
        });
        if known {
            return true;
        }
        let Some(type_name) = &self.type_name else {
            return false;
        };
        let types: Vec<(&Schema, Name)> = sources
            .iter()
            .map(|source| (&***source.transformed_schema(), type_name.clone()))
            .collect();
        types_contain_selection_set(&types, selection_set.selections())
    }
}

impl fmt::Debug for MergedTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |subschemas: &[Arc<Subschema>]| -> Vec<String> {
            subschemas.iter().map(|s| s.name().to_owned()).collect()
        };
        f.debug_struct("MergedTypeInfo")
            .field("type_name", &self.type_name)
            .field("subschemas", &names(&self.subschemas))
            .field(
                "unique_fields",
                &self
                    .unique_fields
                    .iter()
                    .map(|(field, subschema)| (field.as_str(), subschema.name()))
                    .collect::<Vec<_>>(),
            )
            .field(
                "non_unique_fields",
                &self
                    .non_unique_fields
                    .iter()
                    .map(|(field, subschemas)| (field.as_str(), names(subschemas)))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Whether the fields of `selections` exist on at least one of `types`,
/// recursively through sub-selections and inline fragments on the type itself.
pub(crate) fn types_contain_selection_set(
    types: &[(&Schema, Name)],
    selections: &[ast::Selection],
) -> bool {
    selections.iter().all(|selection| match selection {
        ast::Selection::Field(field) => {
            if field.name.as_str() == spec::TYPENAME {
                return true;
            }
            let field_types: Vec<(&Schema, Name)> = types
                .iter()
                .filter_map(|(schema, type_name)| {
                    spec::field_type(schema, type_name, &field.name).map(|ty| (*schema, ty))
                })
                .collect();
            !field_types.is_empty()
                && (field.selection_set.is_empty()
                    || types_contain_selection_set(&field_types, &field.selection_set))
        }
        ast::Selection::InlineFragment(inline) => match (&inline.type_condition, types.first()) {
            (Some(condition), Some((_, type_name))) if condition != type_name => true,
            _ => types_contain_selection_set(types, &inline.selection_set),
        },
        ast::Selection::FragmentSpread(_) => true,
    })
}

/// Gateway-wide merge metadata.
#[derive(Clone, Default)]
pub struct StitchingInfo {
    merged_types: IndexMap<Name, Arc<MergedTypeInfo>>,
    selection_sets_by_type: IndexMap<Name, Vec<ast::Selection>>,
    selection_sets_by_field: IndexMap<Name, IndexMap<Name, Vec<ast::Selection>>>,
    fragments_by_field: IndexMap<Name, IndexMap<Name, Vec<ast::InlineFragment>>>,
}

impl StitchingInfo {
    /// Derives merge metadata from the merged type configuration of `subschemas`.
    ///
    /// Fails when a configured selection set or fragment cannot be parsed.
    pub fn new(subschemas: &[Arc<Subschema>]) -> Result<Self, DelegationError> {
        let mut info = Self::default();
        let mut declared_by: IndexMap<Name, Vec<Arc<Subschema>>> = IndexMap::new();
        for subschema in subschemas {
            let schema = subschema.transformed_schema();
            for (type_name, ty) in &schema.types {
                if !matches!(ty, ExtendedType::Object(_))
                    || ty.is_built_in()
                    || is_root_type(schema, type_name)
                {
                    continue;
                }
                declared_by
                    .entry(type_name.clone())
                    .or_default()
                    .push(subschema.clone());
            }
        }

        for (type_name, candidates) in declared_by {
            if candidates.len() < 2
                || !candidates
                    .iter()
                    .any(|candidate| candidate.merged_type(&type_name).is_some())
            {
                continue;
            }
            let merged = info.merged_type_info(type_name.clone(), candidates)?;
            info.merged_types.insert(type_name, Arc::new(merged));
        }
        tracing::debug!(
            merged_types = info.merged_types.len(),
            "built stitching info"
        );
        Ok(info)
    }

    fn merged_type_info(
        &mut self,
        type_name: Name,
        candidates: Vec<Arc<Subschema>>,
    ) -> Result<MergedTypeInfo, DelegationError> {
        let mut merged = MergedTypeInfo::new(type_name.clone());
        let mut supported_by: IndexMap<Name, Vec<Arc<Subschema>>> = IndexMap::new();
        let mut resolving = Vec::new();

        for subschema in &candidates {
            let config = subschema.merged_type(&type_name);
            let selection_set = config
                .and_then(|config| config.selection_set.as_deref())
                .map(SelectionSet::parse)
                .transpose()?;
            if let Some(config) = config {
                let mut field_selection_sets = IndexMap::new();
                for (field_name, field_config) in &config.fields {
                    if let Some(source) = &field_config.selection_set {
                        let field_selection_set = SelectionSet::parse(source)?;
                        union_into(
                            self.selection_sets_by_field
                                .entry(type_name.clone())
                                .or_default()
                                .entry(field_name.clone())
                                .or_default(),
                            field_selection_set.selections(),
                        );
                        field_selection_sets.insert(field_name.clone(), field_selection_set);
                    }
                    if let Some(source) = &field_config.fragment {
                        self.fragments_by_field
                            .entry(type_name.clone())
                            .or_default()
                            .entry(field_name.clone())
                            .or_default()
                            .push(parse_fragment(source)?);
                    }
                }
                if !field_selection_sets.is_empty() {
                    merged
                        .field_selection_sets
                        .insert(subschema.clone(), field_selection_sets);
                }
                let resolver: Option<Arc<dyn MergedTypeResolver>> =
                    match (&config.resolve, &config.field_name) {
                        (Some(resolver), _) => Some(resolver.clone()),
                        (None, Some(field_name)) => Some(Arc::new(DefaultMergedTypeResolver::new(
                            field_name.clone(),
                            config.args.clone(),
                        ))),
                        (None, None) => None,
                    };
                if let Some(resolver) = resolver {
                    merged.resolvers.insert(subschema.clone(), resolver);
                    resolving.push(subschema.clone());
                }
            }

            let schema = subschema.transformed_schema();
            if let Some(ExtendedType::Object(object)) = schema.types.get(&type_name) {
                for (field_name, field) in &object.fields {
                    // key fields do not make a subschema an owner of the field
                    let is_key = selection_set.as_ref().is_some_and(|selection_set| {
                        spec::is_leaf_type(schema, field.ty.inner_named_type())
                            && selects_top_level_field(selection_set.selections(), field_name)
                    });
                    if !is_key {
                        supported_by
                            .entry(field_name.clone())
                            .or_default()
                            .push(subschema.clone());
                    }
                }
            }
            if let Some(selection_set) = selection_set {
                union_into(
                    self.selection_sets_by_type
                        .entry(type_name.clone())
                        .or_default(),
                    selection_set.selections(),
                );
                merged.selection_sets.insert(subschema.clone(), selection_set);
            }
        }

        for (field_name, mut owners) in supported_by {
            if owners.len() == 1 {
                if let Some(owner) = owners.pop() {
                    merged.unique_fields.insert(field_name, owner);
                }
            } else {
                merged.non_unique_fields.insert(field_name, owners);
            }
        }

        for source in &candidates {
            let targets: Vec<_> = resolving
                .iter()
                .filter(|target| *target != source)
                .cloned()
                .collect();
            if !targets.is_empty() {
                merged.target_subschemas.insert(source.clone(), targets);
            }
        }

        let required: Vec<&SelectionSet> = merged
            .selection_sets
            .values()
            .chain(merged.field_selection_sets.values().flat_map(IndexMap::values))
            .collect();
        for source in &candidates {
            let types = [(&***source.transformed_schema(), type_name.clone())];
            let table = required
                .iter()
                .map(|selection_set| {
                    (
                        selection_set.key().to_owned(),
                        types_contain_selection_set(&types, selection_set.selections()),
                    )
                })
                .collect();
            merged.contains_selection_set.insert(source.clone(), table);
        }

        merged.subschemas = candidates;
        Ok(merged)
    }

    pub fn merged_types(&self) -> &IndexMap<Name, Arc<MergedTypeInfo>> {
        &self.merged_types
    }

    pub fn merged_type(&self, type_name: &str) -> Option<&Arc<MergedTypeInfo>> {
        self.merged_types.get(type_name)
    }

    /// Selections added wherever an object of `type_name` is requested.
    pub fn selection_set_for_type(&self, type_name: &str) -> Option<&[ast::Selection]> {
        self.selection_sets_by_type.get(type_name).map(Vec::as_slice)
    }

    /// Selections added to the parent selection set wherever `field_name` is
    /// requested on `type_name`.
    pub fn selection_set_for_field(&self, type_name: &str, field_name: &str) -> Option<&[ast::Selection]> {
        self.selection_sets_by_field
            .get(type_name)?
            .get(field_name)
            .map(Vec::as_slice)
    }

    /// Inline fragments added to the parent selection set wherever
    /// `field_name` is requested on `type_name`.
    pub fn fragments_for_field(&self, type_name: &str, field_name: &str) -> Option<&[ast::InlineFragment]> {
        self.fragments_by_field
            .get(type_name)?
            .get(field_name)
            .map(Vec::as_slice)
    }

    pub(crate) fn has_selection_sets(&self) -> bool {
        !self.selection_sets_by_type.is_empty() || !self.selection_sets_by_field.is_empty()
    }

    pub(crate) fn has_fragments(&self) -> bool {
        !self.fragments_by_field.is_empty()
    }
}

impl fmt::Debug for StitchingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StitchingInfo")
            .field("merged_types", &self.merged_types)
            .finish()
    }
}

fn is_root_type(schema: &Schema, type_name: &str) -> bool {
    [
        ast::OperationType::Query,
        ast::OperationType::Mutation,
        ast::OperationType::Subscription,
    ]
    .into_iter()
    .any(|operation| {
        schema
            .root_operation(operation)
            .is_some_and(|root| root.as_str() == type_name)
    })
}

fn selects_top_level_field(selections: &[ast::Selection], field_name: &str) -> bool {
    selections.iter().any(|selection| {
        matches!(selection, ast::Selection::Field(field) if field.name.as_str() == field_name)
    })
}

fn union_into(target: &mut Vec<ast::Selection>, selections: &[ast::Selection]) {
    for selection in selections {
        if !target.contains(selection) {
            target.push(selection.clone());
        }
    }
}
