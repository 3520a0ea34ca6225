//! Reconstruction of subschema results into [`ExternalValue`]s.
//!
//! Errors travel with the values they concern. While reconstructing, the path
//! of an error is relative to the value being reconstructed: an error without a
//! path (or with an empty one) addresses the value itself, and the first
//! segment of any other path names the child it belongs to.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::try_join_all;
use indexmap::IndexMap;

use crate::context::Context;
use crate::error::CombinedError;
use crate::error::DelegationError;
use crate::external::ExternalError;
use crate::external::ExternalObject;
use crate::external::ExternalValue;
use crate::graphql;
use crate::info::FieldInfo;
use crate::json_ext::Object;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::merge;
use crate::spec;
use crate::spec::FieldsByResponseKey;
use crate::subschema::Subschema;
use crate::transformer::DelegationContext;

/// Turns the response of a delegated request into the value of the delegated
/// root field.
///
/// This runs after every result transform of the chain. Errors pointing below
/// the root field are attributed to the values they address; any other error
/// is attributed to the root field itself.
#[derive(Clone, Debug, Default)]
pub struct CheckResultAndHandleErrors;

impl CheckResultAndHandleErrors {
    pub fn check(
        &self,
        response: graphql::Response,
        context: &DelegationContext,
    ) -> BoxFuture<'static, Result<ExternalValue, DelegationError>> {
        let response_key = context.field_name().as_str();
        let data = match response.data {
            Some(Value::Object(mut data)) => data.remove(response_key),
            _ => None,
        };
        let errors = response
            .errors
            .into_iter()
            .map(|error| match error.first_segment() {
                Some(PathElement::Key(key)) if key == response_key => error.relative_to_child(),
                _ => error.with_path(None),
            })
            .collect();
        let schema = context
            .gateway_schema()
            .unwrap_or_else(|| context.transformed_schema())
            .clone();
        handle_result(
            data,
            errors,
            context.subschema().clone(),
            context.context().clone(),
            context.info().cloned(),
            context.return_type().clone(),
            schema,
            context.skip_type_merging(),
        )
    }
}

/// Reconstructs `value`, of type `return_type` in `schema`, fetched from `subschema`.
///
/// `info` describes the gateway field the value resolves, and drives type
/// merging: unless `skip_type_merging` is set, objects of merged types are
/// completed from the other subschemas contributing to them.
#[allow(clippy::too_many_arguments)]
pub fn handle_result(
    value: Option<Value>,
    errors: Vec<graphql::Error>,
    subschema: Arc<Subschema>,
    context: Context,
    info: Option<FieldInfo>,
    return_type: ast::Type,
    schema: Arc<Valid<Schema>>,
    skip_type_merging: bool,
) -> BoxFuture<'static, Result<ExternalValue, DelegationError>> {
    Reconstructor {
        subschema,
        schema,
        context,
    }
    .value(value, errors, info, return_type, skip_type_merging)
}

/// The value of a position that holds no data.
///
/// Errors addressing the position itself become an [`ExternalValue::Error`].
/// Errors addressing children produce an object (or a list, for index paths)
/// whose children are handled the same way. Such a list holds one item per
/// addressed index, in index order.
pub fn handle_null(errors: Vec<graphql::Error>, subschema: &Arc<Subschema>) -> ExternalValue {
    if errors.is_empty() {
        return ExternalValue::Null;
    }
    if errors.iter().any(|error| error.first_segment().is_none()) {
        return match <[graphql::Error; 1]>::try_from(errors) {
            Ok([error]) => ExternalValue::Error(ExternalError::Field(error.with_path(None))),
            Err(errors) => ExternalValue::Error(ExternalError::Combined(CombinedError::new(errors))),
        };
    }
    let by_segment = errors_by_path_segment(&errors);
    if by_segment
        .keys()
        .any(|segment| matches!(segment, PathElement::Key(_)))
    {
        let mut object = ExternalObject::new(subschema.clone()).with_errors(errors);
        for (segment, child_errors) in by_segment {
            object.insert(segment.to_string(), handle_null(child_errors, subschema));
        }
        return ExternalValue::Object(object);
    }
    // a null list has no positions: the addressed items are kept in index order
    let mut items: Vec<(usize, Vec<graphql::Error>)> = by_segment
        .into_iter()
        .filter_map(|(segment, child_errors)| match segment {
            PathElement::Index(index) => Some((index, child_errors)),
            PathElement::Key(_) => None,
        })
        .collect();
    items.sort_by_key(|(index, _)| *index);
    ExternalValue::List(
        items
            .into_iter()
            .map(|(_, child_errors)| handle_null(child_errors, subschema))
            .collect(),
    )
}

/// Groups the errors addressing children by child, relative to that child.
/// Errors addressing the current value are left out.
pub(crate) fn errors_by_path_segment(
    errors: &[graphql::Error],
) -> IndexMap<PathElement, Vec<graphql::Error>> {
    let mut by_segment: IndexMap<PathElement, Vec<graphql::Error>> = IndexMap::new();
    for error in errors {
        if let Some(segment) = error.first_segment() {
            by_segment
                .entry(segment.clone())
                .or_default()
                .push(error.relative_to_child());
        }
    }
    by_segment
}

#[derive(Clone)]
struct Reconstructor {
    subschema: Arc<Subschema>,
    schema: Arc<Valid<Schema>>,
    context: Context,
}

impl Reconstructor {
    fn value(
        self,
        value: Option<Value>,
        errors: Vec<graphql::Error>,
        info: Option<FieldInfo>,
        ty: ast::Type,
        skip_type_merging: bool,
    ) -> BoxFuture<'static, Result<ExternalValue, DelegationError>> {
        async move {
            let value = match value {
                None | Some(Value::Null) => return Ok(handle_null(errors, &self.subschema)),
                Some(value) => value,
            };
            match (ty, value) {
                (ast::Type::List(item_type) | ast::Type::NonNullList(item_type), Value::Array(items)) => {
                    self.list(items, errors, info, (*item_type).clone(), skip_type_merging)
                        .await
                }
                (ty, Value::Object(object))
                    if spec::is_composite_type(&self.schema, ty.inner_named_type()) =>
                {
                    let type_name = ty.inner_named_type().clone();
                    self.object(object, errors, info, type_name, skip_type_merging)
                        .await
                }
                (ty, value) if spec::is_leaf_type(&self.schema, ty.inner_named_type()) => {
                    Ok(parse_leaf(&self.schema, ty.inner_named_type(), value))
                }
                (_, value) => Ok(self.untyped(value, errors)),
            }
        }
        .boxed()
    }

    async fn list(
        self,
        items: Vec<Value>,
        errors: Vec<graphql::Error>,
        info: Option<FieldInfo>,
        item_type: ast::Type,
        skip_type_merging: bool,
    ) -> Result<ExternalValue, DelegationError> {
        let mut by_segment = errors_by_path_segment(&errors);
        if errors.iter().any(|error| error.first_segment().is_none()) {
            tracing::warn!(
                subschema = self.subschema.name(),
                "dropping errors reported for a non-null list"
            );
        }
        let item_errors: Vec<_> = (0..items.len())
            .map(|index| {
                by_segment
                    .swap_remove(&PathElement::Index(index))
                    .unwrap_or_default()
            })
            .collect();
        self.warn_unplaced(&by_segment, items.len());
        let items = try_join_all(items.into_iter().zip(item_errors).enumerate().map(
            |(index, (item, item_errors))| {
                self.clone().value(
                    Some(item),
                    item_errors,
                    info.as_ref().map(|info| info.at_index(index)),
                    item_type.clone(),
                    skip_type_merging,
                )
            },
        ))
        .await?;
        Ok(ExternalValue::List(items))
    }

    async fn object(
        self,
        object: Object,
        errors: Vec<graphql::Error>,
        info: Option<FieldInfo>,
        type_name: Name,
        skip_type_merging: bool,
    ) -> Result<ExternalValue, DelegationError> {
        let type_name = self.concrete_type(&object, type_name);
        let sub_fields = info
            .as_ref()
            .map(|info| info.collect_sub_fields(&type_name))
            .unwrap_or_default();
        let mut by_segment = errors_by_path_segment(&errors);

        let children = try_join_all(object.into_iter().map(|(key, value)| {
            let key = key.as_str().to_owned();
            let child_errors = by_segment
                .swap_remove(&PathElement::Key(key.clone()))
                .unwrap_or_default();
            let child = self.child(&type_name, &key, &sub_fields, info.as_ref());
            let reconstructor = self.clone();
            async move {
                let value = match child {
                    Child::Typename => ExternalValue::Leaf(value),
                    Child::Typed(child_info, ty) => {
                        reconstructor
                            .value(Some(value), child_errors, child_info, ty, false)
                            .await?
                    }
                    Child::Unknown => reconstructor.untyped(value, child_errors),
                };
                Ok::<_, DelegationError>((key, value))
            }
        }))
        .await?;

        let mut external = ExternalObject::new(self.subschema.clone()).with_errors(errors);
        for (key, value) in children {
            external.insert(key, value);
        }

        let Some(info) = info else {
            return Ok(ExternalValue::Object(external));
        };
        if skip_type_merging {
            return Ok(ExternalValue::Object(external));
        }
        let Some(merged_type) = info
            .stitching_info()
            .and_then(|stitching_info| stitching_info.merged_type(&type_name))
            .cloned()
        else {
            return Ok(ExternalValue::Object(external));
        };
        let targets = merged_type.target_subschemas(&self.subschema).to_vec();
        if targets.is_empty() {
            return Ok(ExternalValue::Object(external));
        }
        let selections = fields_not_in_subschema(&self.subschema, &type_name, &sub_fields);
        let merged = merge::merge_fields(
            merged_type,
            type_name,
            external,
            selections,
            vec![self.subschema.clone()],
            targets,
            self.context.clone(),
            info,
        )
        .await?;
        Ok(ExternalValue::Object(merged))
    }

    /// The concrete type of an object of type `type_name`, from its
    /// `__typename` when the type is abstract.
    fn concrete_type(&self, object: &Object, type_name: Name) -> Name {
        if !spec::is_abstract_type(&self.schema, &type_name) {
            return type_name;
        }
        object
            .get(spec::TYPENAME)
            .and_then(Value::as_str)
            .and_then(|concrete| {
                self.schema
                    .types
                    .get_key_value(concrete)
                    .filter(|(_, ty)| matches!(ty, ExtendedType::Object(_)))
                    .map(|(name, _)| name.clone())
            })
            .unwrap_or(type_name)
    }

    fn child(
        &self,
        type_name: &Name,
        key: &str,
        sub_fields: &FieldsByResponseKey,
        info: Option<&FieldInfo>,
    ) -> Child {
        if key == spec::TYPENAME {
            return Child::Typename;
        }
        if let (Some(field_nodes), Some(info)) = (sub_fields.get(key), info)
            && let Some(child_info) = info.child(type_name, key, field_nodes.clone())
        {
            let ty = child_info.return_type().clone();
            return Child::Typed(Some(child_info), ty);
        }
        // fields added for merged types are not selected by the gateway operation
        if let Some(field) = spec::field_definition(&self.schema, type_name, key) {
            return Child::Typed(None, field.ty.clone());
        }
        tracing::warn!(
            subschema = self.subschema.name(),
            type_name = type_name.as_str(),
            key,
            "result key does not match the gateway selection"
        );
        Child::Unknown
    }

    /// Logs the errors left over once every item of a list of `len` items
    /// took its own.
    fn warn_unplaced(&self, by_segment: &IndexMap<PathElement, Vec<graphql::Error>>, len: usize) {
        if !by_segment.is_empty() {
            tracing::warn!(
                subschema = self.subschema.name(),
                len,
                segments = ?by_segment.keys().collect::<Vec<_>>(),
                "dropping errors reported outside of the list"
            );
        }
    }

    /// Reconstructs a value whose type is unknown: objects keep their owning
    /// subschema and errors, anything else is kept as is.
    fn untyped(&self, value: Value, errors: Vec<graphql::Error>) -> ExternalValue {
        match value {
            Value::Null => handle_null(errors, &self.subschema),
            Value::Array(items) => {
                let mut by_segment = errors_by_path_segment(&errors);
                let len = items.len();
                let items = items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| {
                        let item_errors = by_segment
                            .swap_remove(&PathElement::Index(index))
                            .unwrap_or_default();
                        self.untyped(item, item_errors)
                    })
                    .collect();
                self.warn_unplaced(&by_segment, len);
                ExternalValue::List(items)
            }
            Value::Object(object) => {
                let mut by_segment = errors_by_path_segment(&errors);
                let mut external = ExternalObject::new(self.subschema.clone());
                for (key, value) in object {
                    let child_errors = by_segment
                        .swap_remove(&PathElement::Key(key.as_str().to_owned()))
                        .unwrap_or_default();
                    external.insert(key.as_str(), self.untyped(value, child_errors));
                }
                ExternalValue::Object(external.with_errors(errors))
            }
            leaf => ExternalValue::Leaf(leaf),
        }
    }
}

enum Child {
    Typename,
    Typed(Option<FieldInfo>, ast::Type),
    Unknown,
}

/// The requested sub-fields the subschema does not declare on `type_name`.
fn fields_not_in_subschema(
    subschema: &Subschema,
    type_name: &str,
    sub_fields: &FieldsByResponseKey,
) -> Vec<ast::Selection> {
    let schema = subschema.transformed_schema();
    sub_fields
        .values()
        .filter(|field_nodes| {
            field_nodes.first().is_some_and(|field| {
                field.name.as_str() != spec::TYPENAME
                    && !spec::has_field(schema, type_name, &field.name)
            })
        })
        .flatten()
        .cloned()
        .map(ast::Selection::Field)
        .collect()
}

/// Checks a leaf value against its type. Enum values must be members of the
/// enum and built-in scalars must have the right shape; `ID` accepts integers.
/// Custom scalars are kept as they are.
pub(crate) fn parse_leaf(schema: &Schema, type_name: &str, value: Value) -> ExternalValue {
    let valid = match schema.types.get(type_name) {
        Some(ExtendedType::Enum(enum_type)) => value
            .as_str()
            .is_some_and(|value| enum_type.values.contains_key(value)),
        Some(ExtendedType::Scalar(_)) => match type_name {
            "Int" => value
                .as_i64()
                .is_some_and(|int| i32::try_from(int).is_ok()),
            "Float" => value.is_number(),
            "String" => value.is_string(),
            "Boolean" => value.is_boolean(),
            "ID" => {
                if let Value::Number(number) = &value
                    && number.is_i64()
                {
                    return ExternalValue::Leaf(Value::String(number.to_string().into()));
                }
                value.is_string()
            }
            _ => true,
        },
        _ => true,
    };
    if valid {
        ExternalValue::Leaf(value)
    } else {
        ExternalValue::Error(ExternalError::Field(
            graphql::Error::builder()
                .message(format!(
                    "{type_name} cannot represent value: {}",
                    serde_json::to_string(&value).unwrap_or_default()
                ))
                .extension_code("INVALID_LEAF_VALUE")
                .build(),
        ))
    }
}
