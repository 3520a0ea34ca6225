use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;

use super::Transform;
use super::add_selection_sets::root_field_type;
use super::visitor;
use super::visitor::Visitor;
use crate::error::DelegationError;
use crate::graphql;
use crate::stitching_info::StitchingInfo;
use crate::transformer::DelegationContext;

/// Adds the configured fragment of a merged field to every selection set
/// selecting that field.
#[derive(Clone, Debug, Default)]
pub struct AddFragmentsByField;

impl Transform for AddFragmentsByField {
    fn transform_request(
        &self,
        request: graphql::Request,
        context: &DelegationContext,
    ) -> Result<graphql::Request, DelegationError> {
        let (Some(schema), Some(stitching_info)) =
            (context.gateway_schema(), context.stitching_info())
        else {
            return Ok(request);
        };
        if !stitching_info.has_fragments() {
            return Ok(request);
        }
        let document = visitor::document(
            &mut FragmentAdder {
                schema,
                stitching_info,
                return_type: context.return_type().inner_named_type(),
                root_type: None,
            },
            &request.document,
        )?;
        Ok(graphql::Request::new(document, request.variables))
    }
}

struct FragmentAdder<'a> {
    schema: &'a Schema,
    stitching_info: &'a StitchingInfo,
    return_type: &'a Name,
    root_type: Option<Name>,
}

impl Visitor for FragmentAdder<'_> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn field_type(&self, parent_type: &Name, def: &ast::Field) -> Option<Name> {
        root_field_type(
            self.schema,
            self.root_type.as_ref(),
            self.return_type,
            parent_type,
            def,
        )
    }

    fn operation(
        &mut self,
        root_type: &Name,
        def: &ast::OperationDefinition,
    ) -> Option<ast::OperationDefinition> {
        self.root_type = Some(root_type.clone());
        visitor::operation(self, root_type, def)
    }

    fn selection_set(
        &mut self,
        parent_type: &Name,
        selections: &[ast::Selection],
    ) -> Vec<ast::Selection> {
        let mut selections = visitor::selection_set(self, parent_type, selections);
        let mut fragments = Vec::new();
        for selection in &selections {
            let ast::Selection::Field(field) = selection else {
                continue;
            };
            let Some(field_fragments) = self
                .stitching_info
                .fragments_for_field(parent_type, &field.name)
            else {
                continue;
            };
            for fragment in field_fragments {
                let fragment = ast::Selection::InlineFragment(Node::new(fragment.clone()));
                if !selections.contains(&fragment) && !fragments.contains(&fragment) {
                    fragments.push(fragment);
                }
            }
        }
        selections.extend(fragments);
        selections
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apollo_compiler::name;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::subschema::MergedFieldConfig;
    use crate::subschema::MergedTypeConfig;
    use crate::subschema::Subschema;

    #[test]
    fn adds_configured_fragments_once() {
        let schema = |sdl: &str| Arc::new(Schema::parse_and_validate(sdl, "schema.graphql").unwrap());
        let accounts = Subschema::new(
            "accounts",
            schema("type Query { me: User } type User { id: ID! email: String }"),
        )
        .with_merged_type(name!("User"), MergedTypeConfig::new().with_field_name(name!("me")));
        let products = Subschema::new(
            "products",
            schema("type Query { _user(id: ID!): User } type User { id: ID! shipping: Int }"),
        )
        .with_merged_type(
            name!("User"),
            MergedTypeConfig::new()
                .with_field_name(name!("_user"))
                .with_field(
                    name!("shipping"),
                    MergedFieldConfig::default().with_fragment("fragment UserEmail on User { email }"),
                ),
        );
        let stitching_info = StitchingInfo::new(&[Arc::new(accounts), Arc::new(products)]).unwrap();
        let gateway = Schema::parse_and_validate(
            "type Query { me: User } type User { id: ID! email: String shipping: Int }",
            "gateway.graphql",
        )
        .unwrap();
        let document =
            ast::Document::parse("{ me { shipping alias: shipping } }", "query.graphql").unwrap();
        let added = visitor::document(
            &mut FragmentAdder {
                schema: &gateway,
                stitching_info: &stitching_info,
                return_type: &name!("User"),
                root_type: None,
            },
            &document,
        )
        .unwrap();
        let expected = ast::Document::parse(
            "{ me { shipping alias: shipping ... on User { email } } }",
            "query.graphql",
        )
        .unwrap();
        assert_eq!(added.to_string(), expected.to_string());
    }
}
