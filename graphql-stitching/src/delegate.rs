//! The delegation driver: sends a request to a subschema and reconstructs the
//! result as the value of a gateway field.

use std::fmt;
use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::validation::Valid;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::Instrument;

use crate::context::Context;
use crate::error::DelegationError;
use crate::executor::ExecutionParams;
use crate::executor::Executor;
use crate::executor::LocalExecutor;
use crate::executor::RootValue;
use crate::executor::SubscriptionResult;
use crate::external::ExternalObject;
use crate::external::ExternalValue;
use crate::graphql;
use crate::info::FieldInfo;
use crate::json_ext::Object;
use crate::request::create_request_from_info;
use crate::results::CheckResultAndHandleErrors;
use crate::spec;
use crate::subschema::Subschema;
use crate::transformer::DelegationContext;
use crate::transformer::Transformer;
use crate::transforms::Transform;

/// A stream of subscription events, each an object holding the delegated root
/// field under its name.
pub type DelegatedStream = BoxStream<'static, Result<ExternalObject, DelegationError>>;

/// The outcome of a delegation.
pub enum Delegated {
    /// The reconstructed value of the delegated root field.
    Value(ExternalValue),
    /// The events of a subscription.
    Subscription(DelegatedStream),
}

impl Delegated {
    /// The reconstructed value. Fails for subscription streams.
    pub fn into_value(self) -> Result<ExternalValue, DelegationError> {
        match self {
            Delegated::Value(value) => Ok(value),
            Delegated::Subscription(_) => Err(DelegationError::InvalidRequest(
                "expected a single result but the subschema returned a subscription stream"
                    .to_owned(),
            )),
        }
    }

    /// The subscription events. A single value, such as the errors of a
    /// subscription that could not start, is not a stream.
    pub fn into_stream(self) -> Option<DelegatedStream> {
        match self {
            Delegated::Subscription(stream) => Some(stream),
            Delegated::Value(_) => None,
        }
    }
}

impl fmt::Debug for Delegated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delegated::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Delegated::Subscription(_) => f.write_str("Subscription"),
        }
    }
}

/// The parameters of [`delegate_request`].
pub struct DelegateRequest {
    request: graphql::Request,
    subschema: Arc<Subschema>,
    operation: Option<OperationType>,
    field_name: Option<Name>,
    args: Option<Object>,
    return_type: Option<ast::Type>,
    info: Option<FieldInfo>,
    context: Context,
    transforms: Vec<Arc<dyn Transform>>,
    transformed_schema: Option<Arc<Valid<Schema>>>,
    root_value: Option<RootValue>,
    skip_validation: bool,
    skip_type_merging: bool,
}

#[buildstructor::buildstructor]
impl DelegateRequest {
    /// Returns a builder for the parameters of a delegation.
    ///
    /// Only `request` and `subschema` are required. The operation and the root
    /// field default to those of the request, and the return type to the one
    /// of `info`, or else of the root field in the target schema.
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        request: graphql::Request,
        subschema: Arc<Subschema>,
        operation: Option<OperationType>,
        field_name: Option<Name>,
        args: Option<Object>,
        return_type: Option<ast::Type>,
        info: Option<FieldInfo>,
        context: Option<Context>,
        transforms: Vec<Arc<dyn Transform>>,
        transformed_schema: Option<Arc<Valid<Schema>>>,
        root_value: Option<RootValue>,
        skip_validation: Option<bool>,
        skip_type_merging: Option<bool>,
    ) -> Self {
        Self {
            request,
            subschema,
            operation,
            field_name,
            args,
            return_type,
            info,
            context: context.unwrap_or_default(),
            transforms,
            transformed_schema,
            root_value,
            skip_validation: skip_validation.unwrap_or_default(),
            skip_type_merging: skip_type_merging.unwrap_or_default(),
        }
    }
}

/// Sends `params.request` to the subschema through the transform chain, then
/// reconstructs the value of the delegated root field.
///
/// Queries and mutations go through the subschema executor, or execute locally
/// against the subschema when it has none. Subscriptions go through the
/// subschema subscriber, and each event is reconstructed the same way.
///
/// Fails when the transformed request is invalid against the target schema,
/// unless validation is skipped. Errors reported by the subschema are not
/// failures: they are kept in the reconstructed value.
#[tracing::instrument(skip_all, level = "trace", fields(subschema = %params.subschema.name()))]
pub async fn delegate_request(params: DelegateRequest) -> Result<Delegated, DelegationError> {
    let DelegateRequest {
        request,
        subschema,
        operation,
        field_name,
        args,
        return_type,
        info,
        context,
        transforms,
        transformed_schema,
        root_value,
        skip_validation,
        skip_type_merging,
    } = params;

    let root_operation = request.operations().next();
    let operation = operation
        .or_else(|| root_operation.map(|root| root.operation_type))
        .unwrap_or(OperationType::Query);
    let field_name = match field_name {
        Some(field_name) => field_name,
        None => root_operation
            .and_then(|root| {
                root.selection_set.iter().find_map(|selection| match selection {
                    ast::Selection::Field(field) => Some(field.name.clone()),
                    _ => None,
                })
            })
            .ok_or_else(|| {
                DelegationError::InvalidRequest("the request selects no root field".to_owned())
            })?,
    };
    let return_type = match return_type.or_else(|| info.as_ref().map(|info| info.return_type().clone())) {
        Some(return_type) => return_type,
        None => delegation_return_type(&subschema, operation, &field_name)?,
    };

    let delegation_context = DelegationContext::builder()
        .subschema(subschema.clone())
        .operation(operation)
        .field_name(field_name.clone())
        .return_type(return_type)
        .and_args(args)
        .and_info(info.clone())
        .context(context.clone())
        .and_transformed_schema(transformed_schema)
        .skip_type_merging(skip_type_merging)
        .build();
    let chain: Vec<Arc<dyn Transform>> = subschema
        .transforms()
        .iter()
        .cloned()
        .chain(transforms)
        .collect();
    let transformer = Transformer::new(delegation_context, &chain);
    let request = transformer.apply_request_transforms(request)?;
    tracing::debug!(
        query = %request.document,
        "delegating to subschema"
    );

    if !skip_validation {
        validate(subschema.schema(), &request)?;
    }

    let params = ExecutionParams {
        request,
        context,
        info,
        root_value: root_value.or_else(|| subschema.root_value().cloned()),
    };

    if operation == OperationType::Subscription {
        let subscriber = subschema
            .subscriber()
            .cloned()
            .ok_or_else(|| DelegationError::MissingSubscriber(subschema.name().to_owned()))?;
        let subscribed = subscriber
            .subscribe(params)
            .instrument(tracing::trace_span!("subscribe", subschema = subschema.name()))
            .await;
        return match subscribed {
            SubscriptionResult::Response(response) => {
                Ok(Delegated::Value(reconstruct(&transformer, response).await?))
            }
            SubscriptionResult::Stream(stream) => {
                let stream = stream
                    .then(move |response| {
                        let transformer = transformer.clone();
                        async move {
                            let value = reconstruct(&transformer, response).await?;
                            let context = transformer.context();
                            let mut root = ExternalObject::new(context.subschema().clone());
                            root.insert(context.field_name().as_str(), value);
                            Ok(root)
                        }
                    })
                    .boxed();
                Ok(Delegated::Subscription(stream))
            }
        };
    }

    let executor: Arc<dyn Executor> = match subschema.executor() {
        Some(executor) => executor.clone(),
        None => Arc::new(LocalExecutor::new(subschema.schema().clone())),
    };
    let response = executor
        .execute(params)
        .instrument(tracing::trace_span!("execute", subschema = subschema.name()))
        .await;
    Ok(Delegated::Value(reconstruct(&transformer, response).await?))
}

async fn reconstruct(
    transformer: &Transformer,
    response: graphql::Response,
) -> Result<ExternalValue, DelegationError> {
    let response = transformer.apply_result_transforms(response)?;
    CheckResultAndHandleErrors
        .check(response, transformer.context())
        .await
}

/// The parameters of [`delegate_to_schema`].
pub struct DelegateToSchema {
    subschema: Arc<Subschema>,
    info: FieldInfo,
    operation: Option<OperationType>,
    field_name: Option<Name>,
    args: Option<Object>,
    selection_set: Option<Vec<ast::Selection>>,
    field_nodes: Option<Vec<Node<ast::Field>>>,
    return_type: Option<ast::Type>,
    context: Option<Context>,
    transforms: Vec<Arc<dyn Transform>>,
    transformed_schema: Option<Arc<Valid<Schema>>>,
    root_value: Option<RootValue>,
    skip_validation: Option<bool>,
    skip_type_merging: Option<bool>,
}

#[buildstructor::buildstructor]
impl DelegateToSchema {
    /// Returns a builder for delegating the gateway field described by `info`.
    ///
    /// The root field defaults to the gateway field and its selections to the
    /// ones of the gateway operation.
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        subschema: Arc<Subschema>,
        info: FieldInfo,
        operation: Option<OperationType>,
        field_name: Option<Name>,
        args: Option<Object>,
        selection_set: Option<Vec<ast::Selection>>,
        field_nodes: Option<Vec<Node<ast::Field>>>,
        return_type: Option<ast::Type>,
        context: Option<Context>,
        transforms: Vec<Arc<dyn Transform>>,
        transformed_schema: Option<Arc<Valid<Schema>>>,
        root_value: Option<RootValue>,
        skip_validation: Option<bool>,
        skip_type_merging: Option<bool>,
    ) -> Self {
        Self {
            subschema,
            info,
            operation,
            field_name,
            args,
            selection_set,
            field_nodes,
            return_type,
            context,
            transforms,
            transformed_schema,
            root_value,
            skip_validation,
            skip_type_merging,
        }
    }
}

/// Delegates the gateway field described by `params.info` to a subschema,
/// building the request from the gateway operation.
pub async fn delegate_to_schema(params: DelegateToSchema) -> Result<Delegated, DelegationError> {
    let DelegateToSchema {
        subschema,
        info,
        operation,
        field_name,
        args,
        selection_set,
        field_nodes,
        return_type,
        context,
        transforms,
        transformed_schema,
        root_value,
        skip_validation,
        skip_type_merging,
    } = params;
    let field_name = field_name.unwrap_or_else(|| info.field_name().clone());
    let request = create_request_from_info(
        &info,
        operation,
        Some(&field_name),
        selection_set.as_deref(),
        field_nodes.as_deref(),
    )?;
    delegate_request(
        DelegateRequest::builder()
            .request(request)
            .subschema(subschema)
            .field_name(field_name)
            .and_args(args)
            .and_return_type(return_type)
            .info(info)
            .and_context(context)
            .transforms(transforms)
            .and_transformed_schema(transformed_schema)
            .and_root_value(root_value)
            .and_skip_validation(skip_validation)
            .and_skip_type_merging(skip_type_merging)
            .build(),
    )
    .await
}

fn delegation_return_type(
    subschema: &Subschema,
    operation: OperationType,
    field_name: &Name,
) -> Result<ast::Type, DelegationError> {
    let schema = subschema.schema();
    let root_type = schema
        .root_operation(operation)
        .ok_or_else(|| DelegationError::MissingRootType {
            subschema: subschema.name().to_owned(),
            operation: spec::operation_type_name(operation).to_owned(),
        })?;
    spec::field_definition(schema, root_type, field_name)
        .map(|field| field.ty.clone())
        .ok_or_else(|| DelegationError::MissingRootField {
            type_name: root_type.to_string(),
            field_name: field_name.to_string(),
        })
}

/// Validates a transformed request against the schema it is executed against.
fn validate(schema: &Valid<Schema>, request: &graphql::Request) -> Result<(), DelegationError> {
    ExecutableDocument::parse_and_validate(
        schema,
        request.document.to_string(),
        "delegated_request.graphql",
    )
    .map(|_| ())
    .map_err(|invalid| DelegationError::from_validation(&invalid.errors))
}
