use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use indexmap::IndexMap;

use super::Transform;
use crate::error::DelegationError;
use crate::graphql;
use crate::json_ext::Object;
use crate::request::update_argument;
use crate::spec;
use crate::transformer::DelegationContext;

/// Passes explicitly supplied arguments to the delegated root field as variables.
///
/// Only arguments declared by the target root field are used. Each becomes a
/// new variable, replacing any argument of the same name already in the request.
#[derive(Clone, Debug)]
pub struct AddArgumentsAsVariables {
    args: Object,
}

impl AddArgumentsAsVariables {
    pub fn new(args: Object) -> Self {
        Self { args }
    }
}

impl Transform for AddArgumentsAsVariables {
    fn transform_request(
        &self,
        request: graphql::Request,
        context: &DelegationContext,
    ) -> Result<graphql::Request, DelegationError> {
        Ok(add_arguments_as_variables(
            context.target_schema(),
            request,
            &self.args,
        ))
    }
}

pub(crate) fn add_arguments_as_variables(
    schema: &Schema,
    request: graphql::Request,
    args: &Object,
) -> graphql::Request {
    let graphql::Request {
        mut document,
        mut variables,
    } = request;
    for definition in &mut document.definitions {
        let ast::Definition::OperationDefinition(operation) = definition else {
            continue;
        };
        let Some(root_type) = schema.root_operation(operation.operation_type).cloned() else {
            continue;
        };
        let operation = operation.make_mut();
        let mut variable_definitions: IndexMap<Name, Node<ast::VariableDefinition>> = operation
            .variables
            .iter()
            .map(|definition| (definition.name.clone(), definition.clone()))
            .collect();
        for selection in &mut operation.selection_set {
            let ast::Selection::Field(field) = selection else {
                continue;
            };
            let Some(target_field) = spec::field_definition(schema, &root_type, &field.name) else {
                continue;
            };
            let field = field.make_mut();
            let mut arguments: IndexMap<Name, Node<ast::Argument>> = field
                .arguments
                .iter()
                .map(|argument| (argument.name.clone(), argument.clone()))
                .collect();
            for argument in &target_field.arguments {
                let Some(value) = args.get(argument.name.as_str()) else {
                    continue;
                };
                update_argument(
                    &mut arguments,
                    &mut variable_definitions,
                    &mut variables,
                    &argument.name,
                    &argument.ty,
                    spec::serialize_input_value(schema, &argument.ty, value),
                );
            }
            field.arguments = arguments.into_values().collect();
        }
        operation.variables = variable_definitions.into_values().collect();
    }
    graphql::Request::new(document, variables)
}
