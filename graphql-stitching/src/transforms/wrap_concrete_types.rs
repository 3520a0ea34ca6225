use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::validation::Valid;

use super::Transform;
use super::visitor::Visitor;
use crate::error::DelegationError;
use crate::graphql;
use crate::spec;
use crate::transformer::DelegationContext;

/// Wraps the selections of delegated root fields in an inline fragment on the
/// known object return type, when the target declares those root fields with
/// an abstract type.
#[derive(Clone, Debug)]
pub struct WrapConcreteTypes {
    return_type: ast::Type,
    target_schema: Arc<Valid<Schema>>,
}

impl WrapConcreteTypes {
    pub fn new(return_type: ast::Type, target_schema: Arc<Valid<Schema>>) -> Self {
        Self {
            return_type,
            target_schema,
        }
    }

    fn wrap(&self, document: &ast::Document) -> Result<ast::Document, DelegationError> {
        let concrete_type = self.return_type.inner_named_type();
        if !spec::is_object_type(&self.target_schema, concrete_type) {
            return Ok(document.clone());
        }
        super::visitor::document(
            &mut RootFieldWrapper {
                schema: &self.target_schema,
                concrete_type,
            },
            document,
        )
    }
}

impl Transform for WrapConcreteTypes {
    fn transform_request(
        &self,
        request: graphql::Request,
        _context: &DelegationContext,
    ) -> Result<graphql::Request, DelegationError> {
        let document = self.wrap(&request.document)?;
        Ok(graphql::Request::new(document, request.variables))
    }
}

struct RootFieldWrapper<'a> {
    schema: &'a Schema,
    concrete_type: &'a Name,
}

impl Visitor for RootFieldWrapper<'_> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn operation(
        &mut self,
        root_type: &Name,
        def: &ast::OperationDefinition,
    ) -> Option<ast::OperationDefinition> {
        let mut def = def.clone();
        for selection in &mut def.selection_set {
            let ast::Selection::Field(field) = selection else {
                continue;
            };
            let Some(field_type) = self.field_type(root_type, &**field) else {
                continue;
            };
            if !spec::is_abstract_type(self.schema, &field_type) || field.selection_set.is_empty() {
                continue;
            }
            let field = field.make_mut();
            let selections = std::mem::take(&mut field.selection_set);
            field.selection_set = vec![ast::Selection::InlineFragment(Node::new(
                ast::InlineFragment {
                    type_condition: Some(self.concrete_type.clone()),
                    directives: ast::DirectiveList::new(),
                    selection_set: selections,
                },
            ))];
        }
        Some(def)
    }

    fn fragment_definition(
        &mut self,
        def: &ast::FragmentDefinition,
    ) -> Option<ast::FragmentDefinition> {
        Some(def.clone())
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;
    use pretty_assertions::assert_eq;

    use super::*;

    fn target() -> Arc<Valid<Schema>> {
        Arc::new(
            Schema::parse_and_validate(
                r#"
                type Query { node(id: ID!): Node user(id: ID!): User }
                interface Node { id: ID! }
                type User implements Node { id: ID! name: String }
                "#,
                "schema.graphql",
            )
            .unwrap(),
        )
    }

    fn print(query: &str) -> String {
        ast::Document::parse(query, "query.graphql").unwrap().to_string()
    }

    #[test]
    fn wraps_abstract_root_fields() {
        let transform = WrapConcreteTypes::new(ast::Type::Named(name!("User")), target());
        let document =
            ast::Document::parse(r#"{ node(id: "1") { id name } }"#, "query.graphql").unwrap();
        assert_eq!(
            transform.wrap(&document).unwrap().to_string(),
            print(r#"{ node(id: "1") { ... on User { id name } } }"#)
        );
    }

    #[test]
    fn concrete_root_fields_are_left_alone() {
        let transform = WrapConcreteTypes::new(ast::Type::Named(name!("User")), target());
        let document =
            ast::Document::parse(r#"{ user(id: "1") { id name } }"#, "query.graphql").unwrap();
        assert_eq!(transform.wrap(&document).unwrap().to_string(), document.to_string());
    }

    #[test]
    fn abstract_return_types_are_left_alone() {
        let transform = WrapConcreteTypes::new(ast::Type::Named(name!("Node")), target());
        let document = ast::Document::parse(r#"{ node(id: "1") { id } }"#, "query.graphql").unwrap();
        assert_eq!(transform.wrap(&document).unwrap().to_string(), document.to_string());
    }
}
