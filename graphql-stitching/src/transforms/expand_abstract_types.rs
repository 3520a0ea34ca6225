use std::collections::HashSet;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;

use super::Transform;
use super::visitor;
use super::visitor::Visitor;
use crate::error::DelegationError;
use crate::graphql;
use crate::spec;
use crate::transformer::DelegationContext;

/// Expands fragments on abstract types that the target schema does not have as
/// abstract types into one fragment per possible object type.
///
/// Inline fragments are duplicated in place. Fragment spreads are replaced by
/// spreads of new fragment definitions named `_{Type}_Fragment{n}`. Selection
/// sets on the possible types select `__typename`.
#[derive(Clone)]
pub struct ExpandAbstractTypes {
    target_schema: Arc<Valid<Schema>>,
    mapping: IndexMap<Name, Vec<Name>>,
    reverse_mapping: IndexMap<Name, Vec<Name>>,
}

impl ExpandAbstractTypes {
    pub fn new(source_schema: &Schema, target_schema: Arc<Valid<Schema>>) -> Self {
        let mut mapping = IndexMap::new();
        for (type_name, ty) in &source_schema.types {
            if !matches!(ty, ExtendedType::Interface(_) | ExtendedType::Union(_))
                || spec::is_abstract_type(&target_schema, type_name)
            {
                continue;
            }
            let possible_types: Vec<Name> = spec::possible_types(source_schema, type_name)
                .into_iter()
                .filter(|possible| spec::is_object_type(&target_schema, possible))
                .collect();
            mapping.insert(type_name.clone(), possible_types);
        }
        let mut reverse_mapping: IndexMap<Name, Vec<Name>> = IndexMap::new();
        for (abstract_type, possible_types) in &mapping {
            for possible in possible_types {
                reverse_mapping
                    .entry(possible.clone())
                    .or_default()
                    .push(abstract_type.clone());
            }
        }
        Self {
            target_schema,
            mapping,
            reverse_mapping,
        }
    }

    /// Abstract source types mapped to the object types replacing them in the target.
    pub fn mapping(&self) -> &IndexMap<Name, Vec<Name>> {
        &self.mapping
    }

    fn expand(&self, document: &ast::Document) -> Result<ast::Document, DelegationError> {
        if self.mapping.is_empty() {
            return Ok(document.clone());
        }
        let mut existing_names: HashSet<Name> = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::FragmentDefinition(fragment) => Some(fragment.name.clone()),
                _ => None,
            })
            .collect();
        let mut counter = 0usize;
        let mut replacements: IndexMap<Name, Vec<(Name, Name)>> = IndexMap::new();
        let mut new_fragments = Vec::new();
        for definition in &document.definitions {
            let ast::Definition::FragmentDefinition(fragment) = definition else {
                continue;
            };
            let Some(possible_types) = self.mapping.get(&fragment.type_condition) else {
                continue;
            };
            let fragment_replacements = replacements.entry(fragment.name.clone()).or_default();
            for possible in possible_types {
                let name = loop {
                    let candidate = Name::new_unchecked(&format!("_{possible}_Fragment{counter}"));
                    counter += 1;
                    if existing_names.insert(candidate.clone()) {
                        break candidate;
                    }
                };
                new_fragments.push(ast::Definition::from(Node::new(ast::FragmentDefinition {
                    name: name.clone(),
                    type_condition: possible.clone(),
                    directives: fragment.directives.clone(),
                    selection_set: fragment.selection_set.clone(),
                })));
                fragment_replacements.push((name, possible.clone()));
            }
        }

        let mut expanded = document.clone();
        expanded.definitions.extend(new_fragments);
        tracing::debug!(
            abstract_types = self.mapping.len(),
            replaced_fragments = replacements.len(),
            "expanding abstract types"
        );
        visitor::document(
            &mut AbstractTypeExpander {
                schema: &self.target_schema,
                mapping: &self.mapping,
                reverse_mapping: &self.reverse_mapping,
                replacements: &replacements,
            },
            &expanded,
        )
    }
}

impl Transform for ExpandAbstractTypes {
    fn transform_request(
        &self,
        request: graphql::Request,
        _context: &DelegationContext,
    ) -> Result<graphql::Request, DelegationError> {
        let document = self.expand(&request.document)?;
        Ok(graphql::Request::new(document, request.variables))
    }
}

impl std::fmt::Debug for ExpandAbstractTypes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpandAbstractTypes")
            .field("mapping", &self.mapping)
            .finish()
    }
}

struct AbstractTypeExpander<'a> {
    schema: &'a Schema,
    mapping: &'a IndexMap<Name, Vec<Name>>,
    reverse_mapping: &'a IndexMap<Name, Vec<Name>>,
    replacements: &'a IndexMap<Name, Vec<(Name, Name)>>,
}

impl Visitor for AbstractTypeExpander<'_> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn selection_set(
        &mut self,
        parent_type: &Name,
        selections: &[ast::Selection],
    ) -> Vec<ast::Selection> {
        let mut expanded = Vec::with_capacity(selections.len());
        for selection in selections {
            match selection {
                ast::Selection::InlineFragment(inline) => {
                    match inline
                        .type_condition
                        .as_ref()
                        .and_then(|condition| self.mapping.get(condition))
                    {
                        Some(possible_types) => {
                            for possible in possible_types {
                                if spec::do_types_overlap(self.schema, parent_type, possible) {
                                    let mut fragment = (**inline).clone();
                                    fragment.type_condition = Some(possible.clone());
                                    expanded
                                        .push(ast::Selection::InlineFragment(Node::new(fragment)));
                                }
                            }
                        }
                        None => expanded.push(selection.clone()),
                    }
                }
                ast::Selection::FragmentSpread(spread) => {
                    match self.replacements.get(&spread.fragment_name) {
                        Some(replacements) => {
                            for (fragment_name, possible) in replacements {
                                if spec::do_types_overlap(self.schema, parent_type, possible) {
                                    expanded.push(ast::Selection::FragmentSpread(Node::new(
                                        ast::FragmentSpread {
                                            fragment_name: fragment_name.clone(),
                                            directives: spread.directives.clone(),
                                        },
                                    )));
                                }
                            }
                        }
                        None => expanded.push(selection.clone()),
                    }
                }
                ast::Selection::Field(_) => expanded.push(selection.clone()),
            }
        }
        let mut selections = visitor::selection_set(self, parent_type, &expanded);
        if self.reverse_mapping.contains_key(parent_type) && !visitor::selects_typename(&selections)
        {
            selections.push(visitor::typename_field());
        }
        selections
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SOURCE: &str = r#"
        type Query { node(id: ID!): Node }
        interface Node { id: ID! }
        type User implements Node { id: ID! name: String }
        type Post implements Node { id: ID! title: String }
    "#;

    const TARGET: &str = r#"
        type Query { node(id: ID!): NodeResult }
        union NodeResult = User | Post
        type User { id: ID! name: String }
        type Post { id: ID! title: String }
    "#;

    fn expander() -> ExpandAbstractTypes {
        let source = Schema::parse_and_validate(SOURCE, "source.graphql").unwrap();
        let target = Schema::parse_and_validate(TARGET, "target.graphql").unwrap();
        ExpandAbstractTypes::new(&source, Arc::new(target))
    }

    fn print(query: &str) -> String {
        ast::Document::parse(query, "query.graphql").unwrap().to_string()
    }

    #[test]
    fn maps_flattened_abstract_types_to_their_objects() {
        let expander = expander();
        let possible: Vec<_> = expander.mapping().get("Node").unwrap().iter().map(|name| name.as_str()).collect();
        assert_eq!(possible, ["User", "Post"]);
    }

    #[test]
    fn fragment_spreads_become_one_fragment_per_type() {
        let document = ast::Document::parse(
            r#"{ node(id: "1") { ...NodeFields } } fragment NodeFields on Node { id }"#,
            "query.graphql",
        )
        .unwrap();
        let expanded = expander().expand(&document).unwrap();
        assert_eq!(
            expanded.to_string(),
            print(
                r#"{ node(id: "1") { ..._User_Fragment0 ..._Post_Fragment1 } }
                fragment NodeFields on Node { id }
                fragment _User_Fragment0 on User { id __typename }
                fragment _Post_Fragment1 on Post { id __typename }"#
            )
        );
    }

    #[test]
    fn inline_fragments_are_duplicated() {
        let document = ast::Document::parse(
            r#"{ node(id: "1") { ... on Node { id } ... on User { name } } }"#,
            "query.graphql",
        )
        .unwrap();
        let expanded = expander().expand(&document).unwrap();
        assert_eq!(
            expanded.to_string(),
            print(
                r#"{ node(id: "1") {
                    ... on User { id __typename }
                    ... on Post { id __typename }
                    ... on User { name __typename }
                } }"#
            )
        );
    }

    #[test]
    fn generated_names_skip_existing_fragments() {
        let document = ast::Document::parse(
            r#"{ node(id: "1") { ...N } } fragment N on Node { id } fragment _User_Fragment0 on User { name }"#,
            "query.graphql",
        )
        .unwrap();
        let expanded = expander().expand(&document).unwrap().to_string();
        assert!(expanded.contains("..._User_Fragment1"));
        assert!(expanded.contains("..._Post_Fragment2"));
        assert!(!expanded.contains("...N\n"));
    }
}
