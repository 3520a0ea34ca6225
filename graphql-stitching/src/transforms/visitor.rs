//! Rewriting traversal of request documents.
//!
//! A [`Visitor`] produces a new document: each hook returns the rewritten node,
//! or `None` to remove it. The free functions of this module are the default
//! behavior of each hook, so that implementations can wrap them.

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;

use crate::error::DelegationError;
use crate::spec;

/// Rewrites `document` with the given visitor.
pub(crate) fn document(
    visitor: &mut impl Visitor,
    document: &ast::Document,
) -> Result<ast::Document, DelegationError> {
    let mut definitions = Vec::with_capacity(document.definitions.len());
    for definition in &document.definitions {
        match definition {
            ast::Definition::OperationDefinition(def) => {
                let root_type = visitor
                    .schema()
                    .root_operation(def.operation_type)
                    .cloned()
                    .ok_or_else(|| {
                        DelegationError::Transform(format!(
                            "missing {} root type",
                            spec::operation_type_name(def.operation_type)
                        ))
                    })?;
                if let Some(operation) = visitor.operation(&root_type, def) {
                    definitions.push(Node::new(operation).into());
                }
            }
            ast::Definition::FragmentDefinition(def) => {
                if let Some(fragment) = visitor.fragment_definition(def) {
                    definitions.push(Node::new(fragment).into());
                }
            }
            other => definitions.push(other.clone()),
        }
    }
    let mut document = document.clone();
    document.definitions = definitions;
    Ok(document)
}

pub(crate) trait Visitor: Sized {
    /// The schema giving type information to the traversal.
    fn schema(&self) -> &Schema;

    /// The named type of the field `def` selected on `parent_type`, if known.
    fn field_type(&self, parent_type: &Name, def: &ast::Field) -> Option<Name> {
        spec::field_type(self.schema(), parent_type, &def.name)
    }

    /// Rewrites an operation definition.
    ///
    /// Call the [`operation`] free function for the default behavior.
    fn operation(
        &mut self,
        root_type: &Name,
        def: &ast::OperationDefinition,
    ) -> Option<ast::OperationDefinition> {
        operation(self, root_type, def)
    }

    /// Rewrites a fragment definition.
    ///
    /// Call the [`fragment_definition`] free function for the default behavior.
    fn fragment_definition(
        &mut self,
        def: &ast::FragmentDefinition,
    ) -> Option<ast::FragmentDefinition> {
        fragment_definition(self, def)
    }

    /// Rewrites a selection set whose parent type is `parent_type`.
    ///
    /// Call the [`selection_set`] free function for the default behavior.
    fn selection_set(
        &mut self,
        parent_type: &Name,
        selections: &[ast::Selection],
    ) -> Vec<ast::Selection> {
        selection_set(self, parent_type, selections)
    }

    /// Rewrites a field selected on `parent_type`. `field_type` is `None` for
    /// fields the schema does not know and for `__typename`.
    ///
    /// Call the [`field`] free function for the default behavior.
    fn field(
        &mut self,
        parent_type: &Name,
        field_type: Option<&Name>,
        def: &ast::Field,
    ) -> Option<ast::Field> {
        let _ = parent_type;
        field(self, field_type, def)
    }

    /// Rewrites a fragment spread.
    fn fragment_spread(
        &mut self,
        parent_type: &Name,
        def: &ast::FragmentSpread,
    ) -> Option<ast::FragmentSpread> {
        let _ = parent_type;
        Some(def.clone())
    }

    /// Rewrites an inline fragment. `parent_type` is the type of the enclosing
    /// selection set, not the type condition.
    ///
    /// Call the [`inline_fragment`] free function for the default behavior.
    fn inline_fragment(
        &mut self,
        parent_type: &Name,
        def: &ast::InlineFragment,
    ) -> Option<ast::InlineFragment> {
        inline_fragment(self, parent_type, def)
    }
}

/// The default behavior for rewriting an operation.
pub(crate) fn operation(
    visitor: &mut impl Visitor,
    root_type: &Name,
    def: &ast::OperationDefinition,
) -> Option<ast::OperationDefinition> {
    let mut def = def.clone();
    def.selection_set = visitor.selection_set(root_type, &def.selection_set);
    Some(def)
}

/// The default behavior for rewriting a fragment definition.
pub(crate) fn fragment_definition(
    visitor: &mut impl Visitor,
    def: &ast::FragmentDefinition,
) -> Option<ast::FragmentDefinition> {
    let mut def = def.clone();
    def.selection_set = visitor.selection_set(&def.type_condition, &def.selection_set);
    Some(def)
}

/// The default behavior for rewriting a field.
///
/// The sub-selections of a field of unknown type are kept as they are.
pub(crate) fn field(
    visitor: &mut impl Visitor,
    field_type: Option<&Name>,
    def: &ast::Field,
) -> Option<ast::Field> {
    let mut def = def.clone();
    if let Some(field_type) = field_type
        && !def.selection_set.is_empty()
    {
        def.selection_set = visitor.selection_set(field_type, &def.selection_set);
    }
    Some(def)
}

/// The default behavior for rewriting an inline fragment.
pub(crate) fn inline_fragment(
    visitor: &mut impl Visitor,
    parent_type: &Name,
    def: &ast::InlineFragment,
) -> Option<ast::InlineFragment> {
    let mut def = def.clone();
    let fragment_type = def.type_condition.clone().unwrap_or_else(|| parent_type.clone());
    def.selection_set = visitor.selection_set(&fragment_type, &def.selection_set);
    Some(def)
}

/// The default behavior for rewriting a selection set: each selection is
/// handed to its hook and removed when the hook returns `None`.
pub(crate) fn selection_set(
    visitor: &mut impl Visitor,
    parent_type: &Name,
    selections: &[ast::Selection],
) -> Vec<ast::Selection> {
    selections
        .iter()
        .filter_map(|selection| match selection {
            ast::Selection::Field(def) => {
                let field_type = visitor.field_type(parent_type, def);
                visitor
                    .field(parent_type, field_type.as_ref(), def)
                    .map(|field| ast::Selection::Field(Node::new(field)))
            }
            ast::Selection::FragmentSpread(def) => visitor
                .fragment_spread(parent_type, def)
                .map(|spread| ast::Selection::FragmentSpread(Node::new(spread))),
            ast::Selection::InlineFragment(def) => visitor
                .inline_fragment(parent_type, def)
                .map(|inline| ast::Selection::InlineFragment(Node::new(inline))),
        })
        .collect()
}

/// A `__typename` field selection.
pub(crate) fn typename_field() -> ast::Selection {
    ast::Selection::Field(Node::new(ast::Field {
        alias: None,
        name: apollo_compiler::name!("__typename"),
        arguments: Vec::new(),
        directives: ast::DirectiveList::new(),
        selection_set: Vec::new(),
    }))
}

/// Whether `selections` directly select an unaliased `__typename`.
pub(crate) fn selects_typename(selections: &[ast::Selection]) -> bool {
    selections.iter().any(|selection| {
        matches!(selection, ast::Selection::Field(field)
            if field.alias.is_none() && field.name.as_str() == spec::TYPENAME)
    })
}

/// Parses a selection set such as `{ id name }`.
pub(crate) fn parse_selection_set(source: &str) -> Result<Vec<ast::Selection>, DelegationError> {
    let document = ast::Document::parse(source, "selection_set.graphql")
        .map_err(|invalid| DelegationError::Configuration(invalid.errors.to_string()))?;
    document
        .definitions
        .iter()
        .find_map(|definition| match definition {
            ast::Definition::OperationDefinition(operation) => {
                Some(operation.selection_set.clone())
            }
            _ => None,
        })
        .ok_or_else(|| {
            DelegationError::Configuration(format!("`{source}` is not a selection set"))
        })
}

/// Parses a fragment definition such as `fragment UserId on User { id }` into
/// the equivalent inline fragment.
pub(crate) fn parse_fragment(source: &str) -> Result<ast::InlineFragment, DelegationError> {
    let document = ast::Document::parse(source, "fragment.graphql")
        .map_err(|invalid| DelegationError::Configuration(invalid.errors.to_string()))?;
    document
        .definitions
        .iter()
        .find_map(|definition| match definition {
            ast::Definition::FragmentDefinition(fragment) => Some(ast::InlineFragment {
                type_condition: Some(fragment.type_condition.clone()),
                directives: fragment.directives.clone(),
                selection_set: fragment.selection_set.clone(),
            }),
            _ => None,
        })
        .ok_or_else(|| {
            DelegationError::Configuration(format!("`{source}` is not a fragment definition"))
        })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct CountFields {
        schema: Schema,
        fields: u32,
    }

    impl Visitor for CountFields {
        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn field(
            &mut self,
            _parent_type: &Name,
            field_type: Option<&Name>,
            def: &ast::Field,
        ) -> Option<ast::Field> {
            self.fields += 1;
            field(self, field_type, def)
        }
    }

    struct DropField(Schema, &'static str);

    impl Visitor for DropField {
        fn schema(&self) -> &Schema {
            &self.0
        }

        fn field(
            &mut self,
            _parent_type: &Name,
            field_type: Option<&Name>,
            def: &ast::Field,
        ) -> Option<ast::Field> {
            if def.name.as_str() == self.1 {
                return None;
            }
            field(self, field_type, def)
        }
    }

    const SDL: &str = "type Query { a: String b: Int next: Query }";

    #[test]
    fn counts_fields_through_fragments() {
        let query = "{ a ... { b } next { ...F } } fragment F on Query { a next { a } }";
        let document = ast::Document::parse(query, "query.graphql").unwrap();
        let mut visitor = CountFields {
            schema: Schema::parse(SDL, "schema.graphql").unwrap(),
            fields: 0,
        };
        super::document(&mut visitor, &document).unwrap();
        assert_eq!(visitor.fields, 6);
    }

    #[test]
    fn removes_fields() {
        let document = ast::Document::parse("{ a b next { a b } }", "query.graphql").unwrap();
        let mut visitor = DropField(Schema::parse(SDL, "schema.graphql").unwrap(), "b");
        let rewritten = super::document(&mut visitor, &document).unwrap();
        let expected = ast::Document::parse("{ a next { a } }", "query.graphql").unwrap();
        assert_eq!(rewritten.to_string(), expected.to_string());
    }

    #[test]
    fn parses_configured_selections() {
        let selections = parse_selection_set("{ id name }").unwrap();
        assert_eq!(selections.len(), 2);
        let fragment = parse_fragment("fragment UserId on User { id }").unwrap();
        assert_eq!(fragment.type_condition.as_ref().map(|name| name.as_str()), Some("User"));
        assert!(parse_selection_set("{ id").is_err());
        assert!(parse_fragment("{ id }").is_err());
    }
}
