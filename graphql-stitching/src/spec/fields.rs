use std::collections::HashSet;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use indexmap::IndexMap;

use super::does_fragment_type_apply;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// Field nodes grouped by response key, in selection order.
pub(crate) type FieldsByResponseKey = IndexMap<Name, Vec<Node<ast::Field>>>;

pub(crate) fn response_key(field: &ast::Field) -> &Name {
    field.alias.as_ref().unwrap_or(&field.name)
}

/// Evaluates `@skip` and `@include` against the operation variables.
pub(crate) fn should_include(directives: &ast::DirectiveList, variables: &Object) -> bool {
    let condition = |directive_name: &str| {
        directives
            .iter()
            .find(|directive| directive.name.as_str() == directive_name)
            .and_then(|directive| {
                directive
                    .arguments
                    .iter()
                    .find(|argument| argument.name.as_str() == "if")
            })
            .map(|argument| match &*argument.value {
                ast::Value::Boolean(value) => *value,
                ast::Value::Variable(name) => {
                    matches!(variables.get(name.as_str()), Some(Value::Bool(true)))
                }
                _ => false,
            })
    };
    !condition("skip").unwrap_or(false) && condition("include").unwrap_or(true)
}

/// Collects the fields selected on an object of type `type_name`, following
/// fragment spreads and inline fragments whose type condition applies.
pub(crate) fn collect_fields(
    schema: &Schema,
    fragments: &IndexMap<Name, Node<ast::FragmentDefinition>>,
    variables: &Object,
    type_name: &str,
    selections: &[ast::Selection],
    fields: &mut FieldsByResponseKey,
    visited_fragments: &mut HashSet<Name>,
) {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                if !should_include(&field.directives, variables) {
                    continue;
                }
                fields
                    .entry(response_key(field).clone())
                    .or_default()
                    .push(field.clone());
            }
            ast::Selection::InlineFragment(inline) => {
                if !should_include(&inline.directives, variables) {
                    continue;
                }
                if let Some(condition) = &inline.type_condition
                    && !does_fragment_type_apply(schema, condition, type_name)
                {
                    continue;
                }
                collect_fields(
                    schema,
                    fragments,
                    variables,
                    type_name,
                    &inline.selection_set,
                    fields,
                    visited_fragments,
                );
            }
            ast::Selection::FragmentSpread(spread) => {
                if !should_include(&spread.directives, variables)
                    || !visited_fragments.insert(spread.fragment_name.clone())
                {
                    continue;
                }
                let Some(fragment) = fragments.get(&spread.fragment_name) else {
                    continue;
                };
                if !does_fragment_type_apply(schema, &fragment.type_condition, type_name) {
                    continue;
                }
                collect_fields(
                    schema,
                    fragments,
                    variables,
                    type_name,
                    &fragment.selection_set,
                    fields,
                    visited_fragments,
                );
            }
        }
    }
}

/// Collects the sub-fields selected under every node of a merged field.
pub(crate) fn collect_sub_fields(
    schema: &Schema,
    fragments: &IndexMap<Name, Node<ast::FragmentDefinition>>,
    variables: &Object,
    type_name: &str,
    field_nodes: &[Node<ast::Field>],
) -> FieldsByResponseKey {
    let mut fields = FieldsByResponseKey::new();
    let mut visited_fragments = HashSet::new();
    for node in field_nodes {
        collect_fields(
            schema,
            fragments,
            variables,
            type_name,
            &node.selection_set,
            &mut fields,
            &mut visited_fragments,
        );
    }
    fields
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ast::Definition;
    use serde_json_bytes::json;

    use super::*;

    const SDL: &str = r#"
        type Query { me: User }
        interface Node { id: ID! }
        type User implements Node { id: ID! name: String email: String }
    "#;

    fn collect(query: &str, variables: Object) -> Vec<String> {
        let schema = Schema::parse_and_validate(SDL, "schema.graphql").unwrap();
        let document = ast::Document::parse(query, "query.graphql").unwrap();
        let mut fragments = IndexMap::new();
        let mut selections = Vec::new();
        for definition in &document.definitions {
            match definition {
                Definition::FragmentDefinition(fragment) => {
                    fragments.insert(fragment.name.clone(), fragment.clone());
                }
                Definition::OperationDefinition(operation) => {
                    selections = operation.selection_set.clone();
                }
                _ => {}
            }
        }
        let mut fields = FieldsByResponseKey::new();
        collect_fields(
            &schema,
            &fragments,
            &variables,
            "User",
            &selections,
            &mut fields,
            &mut HashSet::new(),
        );
        fields.keys().map(|key| key.to_string()).collect()
    }

    #[test]
    fn follows_fragments_that_apply() {
        let keys = collect(
            "{ id ...UserFields ... on Node { handle: id } } fragment UserFields on User { name }",
            Object::new(),
        );
        assert_eq!(keys, ["id", "name", "handle"]);
    }

    #[test]
    fn honors_skip_and_include() {
        let variables = json!({ "withEmail": false })
            .as_object()
            .cloned()
            .unwrap_or_default();
        let keys = collect(
            "query($withEmail: Boolean!) { id @skip(if: true) name @include(if: true) email @include(if: $withEmail) }",
            variables,
        );
        assert_eq!(keys, ["name"]);
    }
}
