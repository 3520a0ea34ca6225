use std::collections::HashSet;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use indexmap::IndexMap;
use indexmap::IndexSet;

use super::Transform;
use super::visitor;
use super::visitor::Visitor;
use crate::error::DelegationError;
use crate::graphql;
use crate::spec;
use crate::transformer::DelegationContext;

/// Removes from a request everything its target schema does not declare.
///
/// Undeclared fields and arguments are dropped, fragments whose type condition
/// cannot apply are removed, composite fields left without selections are
/// pruned, and only the variables still referenced are defined.
#[derive(Clone, Debug, Default)]
pub struct FilterToSchema;

impl Transform for FilterToSchema {
    fn transform_request(
        &self,
        request: graphql::Request,
        context: &DelegationContext,
    ) -> Result<graphql::Request, DelegationError> {
        let document = filter_to_schema(context.target_schema(), &request.document)?;
        Ok(graphql::Request::new(document, request.variables))
    }
}

/// Filters `document` so that it only uses what `schema` declares.
pub(crate) fn filter_to_schema(
    schema: &Schema,
    document: &ast::Document,
) -> Result<ast::Document, DelegationError> {
    let valid_fragments: IndexMap<Name, &Node<ast::FragmentDefinition>> = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            ast::Definition::FragmentDefinition(fragment)
                if schema.types.contains_key(&fragment.type_condition) =>
            {
                Some((fragment.name.clone(), fragment))
            }
            _ => None,
        })
        .collect();
    let valid_fragments = prune_empty_fragments(schema, valid_fragments);

    let mut operations = Vec::new();
    let mut fragments = Vec::new();
    let mut emitted_fragments = HashSet::new();
    for definition in &document.definitions {
        let ast::Definition::OperationDefinition(operation) = definition else {
            continue;
        };
        let root_type = schema
            .root_operation(operation.operation_type)
            .cloned()
            .ok_or_else(|| {
                DelegationError::Transform(format!(
                    "target schema has no {} root type",
                    spec::operation_type_name(operation.operation_type)
                ))
            })?;
        let mut filter = SelectionFilter::new(schema, &valid_fragments);
        let selection_set = filter.selection_set(&root_type, &operation.selection_set);
        let mut used_variables = filter.used_variables;
        spec::collect_directive_variables(&operation.directives, &mut used_variables);

        // fragments may spread other fragments to any depth
        let mut worklist: Vec<Name> = filter.used_fragments.into_iter().rev().collect();
        let mut visited = HashSet::new();
        while let Some(name) = worklist.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(fragment) = valid_fragments.get(&name) else {
                continue;
            };
            let mut filter = SelectionFilter::new(schema, &valid_fragments);
            let Some(filtered) = filter.fragment_definition(fragment) else {
                continue;
            };
            worklist.extend(filter.used_fragments.into_iter().rev());
            used_variables.extend(filter.used_variables);
            spec::collect_directive_variables(&fragment.directives, &mut used_variables);
            if emitted_fragments.insert(name) {
                fragments.push(ast::Definition::from(Node::new(filtered)));
            }
        }

        let mut operation = (**operation).clone();
        operation.selection_set = selection_set;
        operation
            .variables
            .retain(|variable| used_variables.contains(&variable.name));
        operations.push(ast::Definition::from(Node::new(operation)));
    }

    let mut filtered = document.clone();
    filtered.definitions = operations;
    filtered.definitions.extend(fragments);
    Ok(filtered)
}

/// Removes the fragments left without selections once filtered, until none
/// is. Spreads of a removed fragment are dropped with it.
fn prune_empty_fragments<'a>(
    schema: &Schema,
    mut fragments: IndexMap<Name, &'a Node<ast::FragmentDefinition>>,
) -> IndexMap<Name, &'a Node<ast::FragmentDefinition>> {
    loop {
        let empty: Vec<Name> = fragments
            .iter()
            .filter(|(_, fragment)| {
                SelectionFilter::new(schema, &fragments)
                    .fragment_definition(fragment)
                    .is_none_or(|filtered| filtered.selection_set.is_empty())
            })
            .map(|(name, _)| name.clone())
            .collect();
        if empty.is_empty() {
            return fragments;
        }
        for name in &empty {
            fragments.shift_remove(name);
        }
    }
}

struct SelectionFilter<'a> {
    schema: &'a Schema,
    valid_fragments: &'a IndexMap<Name, &'a Node<ast::FragmentDefinition>>,
    used_fragments: IndexSet<Name>,
    used_variables: IndexSet<Name>,
}

impl<'a> SelectionFilter<'a> {
    fn new(
        schema: &'a Schema,
        valid_fragments: &'a IndexMap<Name, &'a Node<ast::FragmentDefinition>>,
    ) -> Self {
        Self {
            schema,
            valid_fragments,
            used_fragments: IndexSet::new(),
            used_variables: IndexSet::new(),
        }
    }

    fn applies(&self, parent_type: &str, condition: &str) -> bool {
        self.schema.types.contains_key(condition)
            && spec::do_types_overlap(self.schema, parent_type, condition)
    }
}

impl Visitor for SelectionFilter<'_> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn field(
        &mut self,
        parent_type: &Name,
        field_type: Option<&Name>,
        def: &ast::Field,
    ) -> Option<ast::Field> {
        if def.name.as_str() == spec::TYPENAME {
            spec::collect_directive_variables(&def.directives, &mut self.used_variables);
            return Some(def.clone());
        }
        let field_definition = spec::field_definition(self.schema, parent_type, &def.name)?;
        let mut field = def.clone();
        field.arguments.retain(|argument| {
            field_definition
                .arguments
                .iter()
                .any(|declared| declared.name == argument.name)
        });
        if let Some(field_type) = field_type
            && matches!(
                self.schema.types.get(field_type),
                Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_))
            )
        {
            field.selection_set = self.selection_set(field_type, &def.selection_set);
            if field.selection_set.is_empty() {
                return None;
            }
        } else {
            field.selection_set.clear();
        }
        for argument in &field.arguments {
            spec::collect_variables(&argument.value, &mut self.used_variables);
        }
        spec::collect_directive_variables(&field.directives, &mut self.used_variables);
        Some(field)
    }

    fn fragment_spread(
        &mut self,
        parent_type: &Name,
        def: &ast::FragmentSpread,
    ) -> Option<ast::FragmentSpread> {
        let fragment = self.valid_fragments.get(&def.fragment_name)?;
        if !self.applies(parent_type, &fragment.type_condition) {
            return None;
        }
        self.used_fragments.insert(def.fragment_name.clone());
        spec::collect_directive_variables(&def.directives, &mut self.used_variables);
        Some(def.clone())
    }

    fn inline_fragment(
        &mut self,
        parent_type: &Name,
        def: &ast::InlineFragment,
    ) -> Option<ast::InlineFragment> {
        if let Some(condition) = &def.type_condition
            && !self.applies(parent_type, condition)
        {
            return None;
        }
        let fragment = visitor::inline_fragment(self, parent_type, def)?;
        if fragment.selection_set.is_empty() {
            return None;
        }
        spec::collect_directive_variables(&fragment.directives, &mut self.used_variables);
        Some(fragment)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const TARGET: &str = r#"
        type Query { user(id: ID!): User node(id: ID!): Node }
        interface Node { id: ID! }
        type User implements Node { id: ID! name: String address: Address }
        type Address { city: String }
        type Post implements Node { id: ID! title: String }
    "#;

    fn filter(query: &str) -> String {
        let schema = Schema::parse_and_validate(TARGET, "schema.graphql").unwrap();
        let document = ast::Document::parse(query, "query.graphql").unwrap();
        filter_to_schema(&schema, &document).unwrap().to_string()
    }

    fn print(query: &str) -> String {
        ast::Document::parse(query, "query.graphql").unwrap().to_string()
    }

    #[test]
    fn drops_undeclared_fields_arguments_and_variables() {
        assert_eq!(
            filter(
                r#"query($id: ID!, $lang: String) {
                    user(id: $id, lang: $lang) { id name(lang: $lang) reviews { body } }
                }"#
            ),
            print(r#"query($id: ID!) { user(id: $id) { id name } }"#)
        );
    }

    #[test]
    fn prunes_fields_left_without_selections() {
        assert_eq!(
            filter(r#"query($v: Int) { user(id: "1") { id address { zip(v: $v) } } }"#),
            print(r#"{ user(id: "1") { id } }"#)
        );
    }

    #[test]
    fn removes_fragments_that_cannot_apply() {
        assert_eq!(
            filter(
                r#"{ node(id: "1") { id ... on Post { title } ... on Review { body } ...U ...R } }
                fragment U on User { name }
                fragment R on Review { body }"#
            ),
            print(
                r#"{ node(id: "1") { id ... on Post { title } ...U } }
                fragment U on User { name }"#
            )
        );
    }

    #[test]
    fn keeps_variables_used_by_nested_fragments() {
        assert_eq!(
            filter(
                r#"query($a: Boolean!, $b: Boolean!, $unused: Int) { user(id: "1") { ...A } }
                fragment A on User { id ...B @include(if: $a) }
                fragment B on User { name @skip(if: $b) }"#
            ),
            print(
                r#"query($a: Boolean!, $b: Boolean!) { user(id: "1") { ...A } }
                fragment A on User { id ...B @include(if: $a) }
                fragment B on User { name @skip(if: $b) }"#
            )
        );
    }

    #[test]
    fn drops_fragments_left_empty_and_their_spreads() {
        assert_eq!(
            filter(
                r#"{ user(id: "1") { id ...E } }
                fragment E on User { reviews }"#
            ),
            print(r#"{ user(id: "1") { id } }"#)
        );
    }

    #[test]
    fn drops_fragments_only_spreading_empty_fragments() {
        assert_eq!(
            filter(
                r#"{ user(id: "1") { id ...E ...N } }
                fragment E on User { ...F }
                fragment F on User { reviews { body } }
                fragment N on User { name }"#
            ),
            print(
                r#"{ user(id: "1") { id ...N } }
                fragment N on User { name }"#
            )
        );
    }

    #[test]
    fn cyclic_fragments_terminate() {
        let filtered = filter(
            r#"{ user(id: "1") { ...A } }
            fragment A on User { id ...B }
            fragment B on User { name ...A }"#,
        );
        assert!(filtered.contains("fragment A"));
        assert!(filtered.contains("fragment B"));
    }

    #[test]
    fn filtering_is_idempotent() {
        let once = filter(
            r#"query($id: ID!, $x: Int) { user(id: $id) { id name extra(x: $x) ... on User { address { city zip } } } }"#,
        );
        let twice = filter(&once);
        assert_eq!(once, twice);
    }
}
