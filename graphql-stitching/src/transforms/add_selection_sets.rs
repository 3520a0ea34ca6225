use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;

use super::Transform;
use super::visitor;
use super::visitor::Visitor;
use crate::error::DelegationError;
use crate::graphql;
use crate::stitching_info::StitchingInfo;
use crate::transformer::DelegationContext;

/// Adds the fields merged type resolvers need on an object, such as its key,
/// to every selection set on that object type.
#[derive(Clone, Debug, Default)]
pub struct AddSelectionSetsByType;

/// Adds the fields of the parent object a field depends on to every selection
/// set selecting that field.
#[derive(Clone, Debug, Default)]
pub struct AddSelectionSetsByField;

impl Transform for AddSelectionSetsByType {
    fn transform_request(
        &self,
        request: graphql::Request,
        context: &DelegationContext,
    ) -> Result<graphql::Request, DelegationError> {
        add_selection_sets(request, context, Additions::ByType)
    }
}

impl Transform for AddSelectionSetsByField {
    fn transform_request(
        &self,
        request: graphql::Request,
        context: &DelegationContext,
    ) -> Result<graphql::Request, DelegationError> {
        add_selection_sets(request, context, Additions::ByField)
    }
}

#[derive(Clone, Copy)]
enum Additions {
    ByType,
    ByField,
}

fn add_selection_sets(
    request: graphql::Request,
    context: &DelegationContext,
    additions: Additions,
) -> Result<graphql::Request, DelegationError> {
    let (Some(schema), Some(stitching_info)) = (context.gateway_schema(), context.stitching_info())
    else {
        return Ok(request);
    };
    if !stitching_info.has_selection_sets() {
        return Ok(request);
    }
    let document = visitor::document(
        &mut SelectionSetAdder {
            schema,
            stitching_info,
            return_type: context.return_type().inner_named_type(),
            root_type: None,
            additions,
        },
        &request.document,
    )?;
    Ok(graphql::Request::new(document, request.variables))
}

/// Walks the request with the gateway schema. The delegated root field may not
/// exist in the gateway, in which case its type is the delegation return type.
pub(super) struct SelectionSetAdder<'a> {
    pub(super) schema: &'a Schema,
    pub(super) stitching_info: &'a StitchingInfo,
    pub(super) return_type: &'a Name,
    pub(super) root_type: Option<Name>,
    additions: Additions,
}

pub(super) fn root_field_type(
    schema: &Schema,
    root_type: Option<&Name>,
    return_type: &Name,
    parent_type: &Name,
    def: &ast::Field,
) -> Option<Name> {
    crate::spec::field_type(schema, parent_type, &def.name).or_else(|| {
        (root_type == Some(parent_type) && def.name.as_str() != crate::spec::TYPENAME)
            .then(|| return_type.clone())
    })
}

pub(super) fn extend_selection_set(target: &mut Vec<ast::Selection>, additions: &[ast::Selection]) {
    for selection in additions {
        if !target.contains(selection) {
            target.push(selection.clone());
        }
    }
}

impl Visitor for SelectionSetAdder<'_> {
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
        match self.additions {
            Additions::ByType => {
                if let Some(additions) = self.stitching_info.selection_set_for_type(parent_type) {
                    extend_selection_set(&mut selections, additions);
                }
            }
            Additions::ByField => {
                let field_names: Vec<Name> = selections
                    .iter()
                    .filter_map(|selection| match selection {
                        ast::Selection::Field(field) => Some(field.name.clone()),
                        _ => None,
                    })
                    .collect();
                for field_name in field_names {
                    if let Some(additions) = self
                        .stitching_info
                        .selection_set_for_field(parent_type, &field_name)
                    {
                        extend_selection_set(&mut selections, additions);
                    }
                }
            }
        }
        selections
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apollo_compiler::name;
    use apollo_compiler::validation::Valid;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::subschema::MergedFieldConfig;
    use crate::subschema::MergedTypeConfig;
    use crate::subschema::Subschema;

    fn stitching_info() -> StitchingInfo {
        let schema = |sdl: &str| Arc::new(Schema::parse_and_validate(sdl, "schema.graphql").unwrap());
        let accounts = Subschema::new(
            "accounts",
            schema("type Query { me: User } type User { id: ID! name: String }"),
        )
        .with_merged_type(
            name!("User"),
            MergedTypeConfig::new()
                .with_selection_set("{ id }")
                .with_field_name(name!("userById")),
        );
        let products = Subschema::new(
            "products",
            schema("type Query { _user(id: ID!): User } type User { id: ID! weight: Int shipping: Int }"),
        )
        .with_merged_type(
            name!("User"),
            MergedTypeConfig::new()
                .with_selection_set("{ id }")
                .with_field_name(name!("_user"))
                .with_field(
                    name!("shipping"),
                    MergedFieldConfig::default().with_selection_set("{ weight }"),
                ),
        );
        StitchingInfo::new(&[Arc::new(accounts), Arc::new(products)]).unwrap()
    }

    fn gateway() -> Valid<Schema> {
        Schema::parse_and_validate(
            "type Query { me: User } type User { id: ID! name: String weight: Int shipping: Int }",
            "gateway.graphql",
        )
        .unwrap()
    }

    fn add(query: &str, additions: Additions) -> String {
        let schema = gateway();
        let stitching_info = stitching_info();
        let document = ast::Document::parse(query, "query.graphql").unwrap();
        visitor::document(
            &mut SelectionSetAdder {
                schema: &schema,
                stitching_info: &stitching_info,
                return_type: &name!("User"),
                root_type: None,
                additions,
            },
            &document,
        )
        .unwrap()
        .to_string()
    }

    fn print(query: &str) -> String {
        ast::Document::parse(query, "query.graphql").unwrap().to_string()
    }

    #[test]
    fn adds_keys_to_merged_types() {
        assert_eq!(
            add("{ me { name } }", Additions::ByType),
            print("{ me { name id } }")
        );
        assert_eq!(add("{ me { id name } }", Additions::ByType), print("{ me { id name } }"));
    }

    #[test]
    fn adds_field_requirements_next_to_the_field() {
        assert_eq!(
            add("{ me { shipping } }", Additions::ByField),
            print("{ me { shipping weight } }")
        );
        assert_eq!(add("{ me { name } }", Additions::ByField), print("{ me { name } }"));
    }

    #[test]
    fn root_fields_unknown_to_the_gateway_use_the_return_type() {
        assert_eq!(
            add(r#"{ _user(id: "1") { name } }"#, Additions::ByType),
            print(r#"{ _user(id: "1") { name id } }"#)
        );
    }
}
