//! Builds the request sent to a subschema for a delegated field.

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use indexmap::IndexMap;
use serde_json_bytes::ByteString;

use crate::error::DelegationError;
use crate::graphql;
use crate::info::FieldInfo;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec;

/// Where a delegated request comes from: the gateway field being resolved and
/// the operation it belongs to.
#[derive(Clone, Copy)]
pub struct RequestSource<'a> {
    /// The gateway schema, used to serialize variables and argument defaults.
    pub schema: Option<&'a Schema>,
    pub parent_type: Option<&'a Name>,
    pub field_name: Option<&'a Name>,
    pub fragments: &'a IndexMap<Name, Node<ast::FragmentDefinition>>,
    pub variable_definitions: &'a [Node<ast::VariableDefinition>],
    pub variable_values: &'a Object,
    pub target_operation: OperationType,
    /// The root field queried on the subschema. Defaults to the name of the first field node.
    pub target_field_name: Option<&'a Name>,
    /// Replaces the selections of the field nodes when set.
    pub selection_set: Option<&'a [ast::Selection]>,
    pub field_nodes: &'a [Node<ast::Field>],
}

/// Builds a request with one operation selecting one root field, followed by
/// every fragment of the source operation.
///
/// The request is not yet valid against the target schema: the transforms
/// applied before execution take care of that.
pub fn create_request(source: RequestSource<'_>) -> Result<graphql::Request, DelegationError> {
    let (selection_set, mut arguments) = match source.selection_set {
        Some(selection_set) => (selection_set.to_vec(), IndexMap::new()),
        None => {
            let selections = source
                .field_nodes
                .iter()
                .flat_map(|node| node.selection_set.iter().cloned())
                .collect();
            let arguments = source
                .field_nodes
                .first()
                .map(|node| {
                    node.arguments
                        .iter()
                        .map(|argument| (argument.name.clone(), argument.clone()))
                        .collect()
                })
                .unwrap_or_default();
            (selections, arguments)
        }
    };

    let mut variable_definitions = IndexMap::new();
    let mut variables = Object::new();
    for definition in source.variable_definitions {
        variable_definitions.insert(definition.name.clone(), definition.clone());
        if let Some(schema) = source.schema
            && let Some(value) = source.variable_values.get(definition.name.as_str())
            && let Some(serialized) = spec::serialize_input_value(schema, &definition.ty, value)
        {
            variables.insert(ByteString::from(definition.name.as_str()), serialized);
        }
    }

    if let (Some(schema), Some(parent_type), Some(field_name)) =
        (source.schema, source.parent_type, source.field_name)
    {
        update_arguments_with_defaults(
            schema,
            parent_type,
            field_name,
            &mut arguments,
            &mut variable_definitions,
            &mut variables,
        );
    }

    let root_field_name = source
        .target_field_name
        .or_else(|| source.field_nodes.first().map(|node| &node.name))
        .cloned()
        .ok_or_else(|| {
            DelegationError::InvalidRequest("no root field to delegate".to_owned())
        })?;
    let root_field = ast::Field {
        alias: None,
        name: root_field_name,
        arguments: arguments.into_values().collect(),
        directives: ast::DirectiveList::new(),
        selection_set,
    };
    let operation = ast::OperationDefinition {
        operation_type: source.target_operation,
        name: None,
        variables: variable_definitions.into_values().collect(),
        directives: ast::DirectiveList::new(),
        selection_set: vec![ast::Selection::Field(Node::new(root_field))],
    };

    let mut document = ast::Document::new();
    document.definitions.push(Node::new(operation).into());
    document
        .definitions
        .extend(source.fragments.values().cloned().map(Into::into));
    Ok(graphql::Request::new(document, variables))
}

/// Builds the request delegating the field described by `info`.
///
/// The operation defaults to the one whose root is the field's parent type,
/// and the root field to the field itself.
pub fn create_request_from_info(
    info: &FieldInfo,
    operation: Option<OperationType>,
    field_name: Option<&Name>,
    selection_set: Option<&[ast::Selection]>,
    field_nodes: Option<&[Node<ast::Field>]>,
) -> Result<graphql::Request, DelegationError> {
    let schema = info.schema();
    let operation_info = info.operation();
    create_request(RequestSource {
        schema: Some(schema),
        parent_type: Some(info.parent_type()),
        field_name: Some(info.field_name()),
        fragments: operation_info.fragments(),
        variable_definitions: &operation_info.operation().variables,
        variable_values: operation_info.variable_values(),
        target_operation: operation
            .unwrap_or_else(|| spec::operation_type_for(schema, info.parent_type())),
        target_field_name: Some(field_name.unwrap_or(info.field_name())),
        selection_set,
        field_nodes: field_nodes.unwrap_or(info.field_nodes()),
    })
}

/// Gives every argument of the source field that has a default value, and was
/// not supplied, a variable carrying that default.
fn update_arguments_with_defaults(
    schema: &Schema,
    parent_type: &Name,
    field_name: &Name,
    arguments: &mut IndexMap<Name, Node<ast::Argument>>,
    variable_definitions: &mut IndexMap<Name, Node<ast::VariableDefinition>>,
    variables: &mut Object,
) {
    let Some(field) = spec::field_definition(schema, parent_type, field_name) else {
        return;
    };
    for argument in &field.arguments {
        if arguments.contains_key(&argument.name) {
            continue;
        }
        let Some(default_value) = &argument.default_value else {
            continue;
        };
        let value = spec::ast_value_to_json(default_value, &Object::new())
            .and_then(|value| spec::serialize_input_value(schema, &argument.ty, &value));
        update_argument(
            arguments,
            variable_definitions,
            variables,
            &argument.name,
            &argument.ty,
            value,
        );
    }
}

/// Makes argument `arg_name` read a fresh variable named `_v{n}_{arg_name}`
/// declared with `arg_type` and holding `value`.
pub(crate) fn update_argument(
    arguments: &mut IndexMap<Name, Node<ast::Argument>>,
    variable_definitions: &mut IndexMap<Name, Node<ast::VariableDefinition>>,
    variables: &mut Object,
    arg_name: &Name,
    arg_type: &ast::Type,
    value: Option<Value>,
) {
    let variable_name = (0usize..)
        .map(|index| Name::new_unchecked(&format!("_v{index}_{arg_name}")))
        .find(|name| !variable_definitions.contains_key(name))
        .unwrap_or_else(|| arg_name.clone());

    arguments.insert(
        arg_name.clone(),
        Node::new(ast::Argument {
            name: arg_name.clone(),
            value: Node::new(ast::Value::Variable(variable_name.clone())),
        }),
    );
    variable_definitions.insert(
        variable_name.clone(),
        Node::new(ast::VariableDefinition {
            name: variable_name.clone(),
            ty: Node::new(arg_type.clone()),
            default_value: None,
            directives: ast::DirectiveList::new(),
        }),
    );
    match value {
        Some(value) => {
            variables.insert(ByteString::from(variable_name.as_str()), value);
        }
        None => {
            variables.remove(variable_name.as_str());
        }
    }
}
