use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use indexmap::IndexSet;
use serde_json_bytes::ByteString;

use crate::json_ext::Object;
use crate::json_ext::Value;

/// Converts a literal from a document into JSON, substituting variables.
///
/// Returns `None` when the literal references a variable with no value.
pub(crate) fn ast_value_to_json(value: &ast::Value, variables: &Object) -> Option<Value> {
    Some(match value {
        ast::Value::Null => Value::Null,
        ast::Value::Boolean(value) => Value::Bool(*value),
        ast::Value::Enum(name) => Value::String(ByteString::from(name.as_str())),
        ast::Value::String(value) => Value::String(ByteString::from(value.as_str())),
        ast::Value::Int(value) => match value.as_str().parse::<i64>() {
            Ok(int) => Value::from(int),
            Err(_) => float(value.as_str())?,
        },
        ast::Value::Float(value) => float(value.as_str())?,
        ast::Value::Variable(name) => variables.get(name.as_str())?.clone(),
        ast::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| ast_value_to_json(item, variables).unwrap_or(Value::Null))
                .collect(),
        ),
        ast::Value::Object(fields) => {
            let mut object = Object::new();
            for (name, value) in fields {
                if let Some(value) = ast_value_to_json(value, variables) {
                    object.insert(ByteString::from(name.as_str()), value);
                }
            }
            Value::Object(object)
        }
    })
}

fn float(text: &str) -> Option<Value> {
    let float = text.parse::<f64>().ok()?;
    serde_json::Number::from_f64(float).map(Value::Number)
}

/// Serializes an internal input value for transmission under the input type `ty`.
///
/// Input object fields that the type does not declare are dropped, lists are
/// serialized item by item. Returns `None` when nothing should be sent.
pub(crate) fn serialize_input_value(schema: &Schema, ty: &ast::Type, value: &Value) -> Option<Value> {
    if matches!(value, Value::Null) {
        return Some(Value::Null);
    }
    match ty {
        ast::Type::List(item_type) | ast::Type::NonNullList(item_type) => match value {
            Value::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|item| serialize_input_value(schema, item_type, item).unwrap_or(Value::Null))
                    .collect(),
            )),
            single => serialize_input_value(schema, item_type, single),
        },
        ast::Type::Named(name) | ast::Type::NonNullNamed(name) => match schema.types.get(name) {
            Some(ExtendedType::InputObject(input_object)) => {
                let Value::Object(object) = value else {
                    return None;
                };
                let mut serialized = Object::new();
                for (field_name, field) in &input_object.fields {
                    if let Some(field_value) = object.get(field_name.as_str())
                        && let Some(field_value) =
                            serialize_input_value(schema, &field.ty, field_value)
                    {
                        serialized.insert(ByteString::from(field_name.as_str()), field_value);
                    }
                }
                Some(Value::Object(serialized))
            }
            _ => Some(value.clone()),
        },
    }
}

/// Collects the variables referenced by a literal.
pub(crate) fn collect_variables(value: &ast::Value, variables: &mut IndexSet<Name>) {
    match value {
        ast::Value::Variable(name) => {
            variables.insert(name.clone());
        }
        ast::Value::List(items) => items
            .iter()
            .for_each(|item| collect_variables(item, variables)),
        ast::Value::Object(fields) => fields
            .iter()
            .for_each(|(_, value)| collect_variables(value, variables)),
        _ => {}
    }
}

pub(crate) fn collect_directive_variables(
    directives: &ast::DirectiveList,
    variables: &mut IndexSet<Name>,
) {
    for directive in directives.iter() {
        for argument in &directive.arguments {
            collect_variables(&argument.value, variables);
        }
    }
}
