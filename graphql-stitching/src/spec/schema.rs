use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast::OperationType;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;

use super::TYPENAME;

pub(crate) fn is_abstract_type(schema: &Schema, type_name: &str) -> bool {
    matches!(
        schema.types.get(type_name),
        Some(ExtendedType::Interface(_) | ExtendedType::Union(_))
    )
}

pub(crate) fn is_object_type(schema: &Schema, type_name: &str) -> bool {
    matches!(schema.types.get(type_name), Some(ExtendedType::Object(_)))
}

pub(crate) fn is_composite_type(schema: &Schema, type_name: &str) -> bool {
    matches!(
        schema.types.get(type_name),
        Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_))
    )
}

pub(crate) fn is_leaf_type(schema: &Schema, type_name: &str) -> bool {
    matches!(
        schema.types.get(type_name),
        Some(ExtendedType::Scalar(_) | ExtendedType::Enum(_))
    )
}

/// Looks up a field declared on an object or interface type.
///
/// `__typename` is not returned: callers treat it as a `String!` leaf on every
/// composite type.
pub(crate) fn field_definition<'a>(
    schema: &'a Schema,
    type_name: &str,
    field_name: &str,
) -> Option<&'a FieldDefinition> {
    match schema.types.get(type_name)? {
        ExtendedType::Object(object) => object.fields.get(field_name).map(|field| &***field),
        ExtendedType::Interface(interface) => {
            interface.fields.get(field_name).map(|field| &***field)
        }
        _ => None,
    }
}

/// The named type of a field, if the field exists on the parent type.
pub(crate) fn field_type(schema: &Schema, type_name: &str, field_name: &str) -> Option<Name> {
    if field_name == TYPENAME {
        return None;
    }
    field_definition(schema, type_name, field_name).map(|field| field.ty.inner_named_type().clone())
}

/// Whether `field_name` can be selected on `type_name` in `schema`.
pub(crate) fn has_field(schema: &Schema, type_name: &str, field_name: &str) -> bool {
    if field_name == TYPENAME {
        return is_composite_type(schema, type_name);
    }
    field_definition(schema, type_name, field_name).is_some()
}

/// The object types that may be returned where `type_name` is expected.
pub(crate) fn possible_types(schema: &Schema, type_name: &str) -> Vec<Name> {
    match schema.types.get(type_name) {
        Some(ExtendedType::Object(_)) => schema
            .types
            .get_key_value(type_name)
            .map(|(name, _)| vec![name.clone()])
            .unwrap_or_default(),
        Some(ExtendedType::Interface(_) | ExtendedType::Union(_)) => schema
            .types
            .iter()
            .filter(|(name, ty)| {
                matches!(ty, ExtendedType::Object(_)) && schema.is_subtype(type_name, name)
            })
            .map(|(name, _)| name.clone())
            .collect(),
        _ => Vec::new(),
    }
}

/// Whether some object type can be both `a` and `b`.
pub(crate) fn do_types_overlap(schema: &Schema, a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (is_abstract_type(schema, a), is_abstract_type(schema, b)) {
        (true, true) => possible_types(schema, a)
            .iter()
            .any(|possible| schema.is_subtype(b, possible)),
        (true, false) => schema.is_subtype(a, b),
        (false, true) => schema.is_subtype(b, a),
        (false, false) => false,
    }
}

/// Whether a fragment with type condition `condition` applies to objects of type `type_name`.
pub(crate) fn does_fragment_type_apply(schema: &Schema, condition: &str, type_name: &str) -> bool {
    condition == type_name || schema.is_subtype(condition, type_name)
}

/// The operation type whose root is `type_name`, defaulting to query.
pub(crate) fn operation_type_for(schema: &Schema, type_name: &str) -> OperationType {
    [OperationType::Mutation, OperationType::Subscription]
        .into_iter()
        .find(|operation| {
            schema
                .root_operation(*operation)
                .is_some_and(|root| root.as_str() == type_name)
        })
        .unwrap_or(OperationType::Query)
}

pub(crate) fn operation_type_name(operation: OperationType) -> &'static str {
    match operation {
        OperationType::Query => "query",
        OperationType::Mutation => "mutation",
        OperationType::Subscription => "subscription",
    }
}
