//! Executors run delegated requests against a subschema.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use apollo_compiler::ast::OperationType;
use apollo_compiler::resolvers::Execution;
use apollo_compiler::resolvers::FieldError;
use apollo_compiler::resolvers::ObjectValue;
use apollo_compiler::resolvers::ResolveInfo;
use apollo_compiler::resolvers::ResolvedValue;
use apollo_compiler::validation::Valid;
use futures::Stream;

use crate::context::Context;
use crate::graphql;
use crate::info::FieldInfo;
use crate::json_ext::Value;

/// The root value handed to local execution.
pub type RootValue = Arc<dyn ObjectValue + Send + Sync>;

/// An asynchronous [`Stream`] of GraphQL [`graphql::Response`]s produced by a subscription.
pub type ResponseStream = Pin<Box<dyn Stream<Item = graphql::Response> + Send>>;

/// Everything an executor receives for one delegated request.
pub struct ExecutionParams {
    pub request: graphql::Request,
    pub context: Context,
    pub info: Option<FieldInfo>,
    pub root_value: Option<RootValue>,
}

impl fmt::Debug for ExecutionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionParams")
            .field("request", &self.request)
            .field("info", &self.info)
            .finish()
    }
}

/// Executes queries and mutations.
///
/// Failures are reported inside the response rather than raised.
#[async_trait::async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(&self, params: ExecutionParams) -> graphql::Response;
}

/// What a [`Subscriber`] produced for a subscription request.
pub enum SubscriptionResult {
    /// An event stream.
    Stream(ResponseStream),
    /// A single response, typically reporting why no stream could be opened.
    Response(graphql::Response),
}

/// Executes subscriptions.
#[async_trait::async_trait]
pub trait Subscriber: Send + Sync + 'static {
    async fn subscribe(&self, params: ExecutionParams) -> SubscriptionResult;
}

/// An [`Executor`] built from an async function.
pub struct ExecutorFn<F>(F);

/// Returns an [`Executor`] calling `f` for every request.
pub fn executor_fn<F, Fut>(f: F) -> ExecutorFn<F>
where
    F: Fn(ExecutionParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = graphql::Response> + Send + 'static,
{
    ExecutorFn(f)
}

#[async_trait::async_trait]
impl<F, Fut> Executor for ExecutorFn<F>
where
    F: Fn(ExecutionParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = graphql::Response> + Send + 'static,
{
    async fn execute(&self, params: ExecutionParams) -> graphql::Response {
        (self.0)(params).await
    }
}

/// A [`Subscriber`] built from an async function.
pub struct SubscriberFn<F>(F);

/// Returns a [`Subscriber`] calling `f` for every subscription request.
pub fn subscriber_fn<F, Fut>(f: F) -> SubscriberFn<F>
where
    F: Fn(ExecutionParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SubscriptionResult> + Send + 'static,
{
    SubscriberFn(f)
}

#[async_trait::async_trait]
impl<F, Fut> Subscriber for SubscriberFn<F>
where
    F: Fn(ExecutionParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SubscriptionResult> + Send + 'static,
{
    async fn subscribe(&self, params: ExecutionParams) -> SubscriptionResult {
        (self.0)(params).await
    }
}

/// Executes requests in process against a schema and the request's root value.
///
/// This is the executor used for subschemas that do not configure one.
#[derive(Clone)]
pub struct LocalExecutor {
    schema: Arc<Valid<Schema>>,
}

impl LocalExecutor {
    pub fn new(schema: Arc<Valid<Schema>>) -> Self {
        Self { schema }
    }
}

#[async_trait::async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, params: ExecutionParams) -> graphql::Response {
        let Some(root_value) = params.root_value else {
            return graphql::Response::from_errors(vec![
                graphql::Error::builder()
                    .message("local execution requires a root value")
                    .extension_code("MISSING_ROOT_VALUE")
                    .build(),
            ]);
        };
        execute_local(&self.schema, &params.request, &RootValueRef(&*root_value))
    }
}

/// Runs `request` synchronously against `schema`, starting from `root_value`.
pub(crate) fn execute_local(
    schema: &Valid<Schema>,
    request: &graphql::Request,
    root_value: &impl ObjectValue,
) -> graphql::Response {
    let query = request.document.to_string();
    let document = match ExecutableDocument::parse_and_validate(schema, query, "request.graphql") {
        Ok(document) => document,
        Err(invalid) => {
            return graphql::Response::from_errors(
                invalid
                    .errors
                    .iter()
                    .map(|diagnostic| diagnostic.to_json().into())
                    .collect(),
            );
        }
    };
    let operation = match document.operations.get(None) {
        Ok(operation) => operation,
        Err(error) => {
            return graphql::Response::from_errors(vec![
                error.to_graphql_error(&document.sources).into(),
            ]);
        }
    };
    if operation.operation_type == OperationType::Subscription {
        return graphql::Response::from_errors(vec![
            graphql::Error::builder()
                .message("subscriptions cannot be executed locally")
                .extension_code("SUBSCRIPTION_NOT_SUPPORTED")
                .build(),
        ]);
    }
    let result = Execution::new(schema, &document)
        .operation(operation)
        .raw_variable_values(&request.variables)
        .execute_sync(root_value);
    match result {
        Ok(response) => graphql::Response {
            data: Some(Value::from(response.data)),
            errors: response.errors.into_iter().map(Into::into).collect(),
            ..Default::default()
        },
        Err(request_error) => graphql::Response::from_errors(vec![
            request_error.to_graphql_error(&document.sources).into(),
        ]),
    }
}

/// Sized view of a shared root value.
struct RootValueRef<'a>(&'a (dyn ObjectValue + Send + Sync));

impl ObjectValue for RootValueRef<'_> {
    fn type_name(&self) -> &str {
        self.0.type_name()
    }

    fn resolve_field<'a>(
        &'a self,
        info: &'a ResolveInfo<'a>,
    ) -> Result<ResolvedValue<'a>, FieldError> {
        self.0.resolve_field(info)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::json_ext::Object;
    use crate::test_harness::MockRoot;

    fn schema() -> Arc<Valid<Schema>> {
        Arc::new(
            Schema::parse_and_validate(
                "type Query { hello(name: String!): String fail: String }",
                "schema.graphql",
            )
            .unwrap(),
        )
    }

    fn root() -> RootValue {
        Arc::new(
            MockRoot::new("Query")
                .field("hello", |args| {
                    json!(format!("hello {}", args["name"].as_str().unwrap_or_default()))
                })
                .field("fail", |_| json!({ "__error": "nope" })),
        )
    }

    fn params(query: &str, variables: Object, root_value: Option<RootValue>) -> ExecutionParams {
        ExecutionParams {
            request: graphql::Request::parse(query, variables).unwrap(),
            context: Context::new(),
            info: None,
            root_value,
        }
    }

    #[tokio::test]
    async fn executes_against_root_value() {
        let variables = json!({ "n": "ann" }).as_object().cloned().unwrap();
        let response = LocalExecutor::new(schema())
            .execute(params(
                "query($n: String!) { hello(name: $n) fail }",
                variables,
                Some(root()),
            ))
            .await;
        assert_eq!(response.data, Some(json!({ "hello": "hello ann", "fail": null })));
        assert_eq!(response.errors.len(), 1);
        assert!(response.errors[0].message.contains("nope"));
    }

    #[tokio::test]
    async fn invalid_requests_are_reported_in_the_response() {
        let response = LocalExecutor::new(schema())
            .execute(params("{ missing }", Object::new(), Some(root())))
            .await;
        assert_eq!(response.data, None);
        assert_eq!(response.errors.len(), 1);
    }

    #[tokio::test]
    async fn missing_root_value_is_reported() {
        let response = LocalExecutor::new(schema())
            .execute(params("{ fail }", Object::new(), None))
            .await;
        assert_eq!(
            response.errors[0].extension_code().as_deref(),
            Some("MISSING_ROOT_VALUE")
        );
    }

    #[tokio::test]
    async fn executor_fn_wraps_closures() {
        let executor = executor_fn(|params: ExecutionParams| async move {
            graphql::Response::from_data(json!({ "vars": Value::Object(params.request.variables) }))
        });
        let response = executor
            .execute(params("{ fail }", Object::new(), None))
            .await;
        assert_eq!(response.data, Some(json!({ "vars": {} })));
    }
}
