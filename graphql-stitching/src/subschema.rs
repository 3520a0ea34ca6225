//! Subschemas: the schemas a gateway delegates to, with how to reach them.

use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::resolvers::ObjectValue;
use apollo_compiler::validation::Valid;
use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::context::Context;
use crate::error::DelegationError;
use crate::executor::Executor;
use crate::executor::RootValue;
use crate::executor::Subscriber;
use crate::external::ExternalObject;
use crate::external::ExternalValue;
use crate::info::FieldInfo;
use crate::json_ext::Object;
use crate::merge::MergedTypeResolver;
use crate::merge::MergedTypeResolverFn;
use crate::transforms::Transform;

/// Computes the root field arguments of a merged type resolver from the
/// partially resolved object.
pub type MergedTypeArgs = Arc<dyn Fn(&ExternalObject) -> Object + Send + Sync>;

/// A schema the gateway delegates to.
///
/// Subschemas are identified by name: two subschemas with the same name are
/// the same subschema.
#[derive(Clone)]
pub struct Subschema {
    name: String,
    schema: Arc<Valid<Schema>>,
    transformed_schema: Option<Arc<Valid<Schema>>>,
    executor: Option<Arc<dyn Executor>>,
    subscriber: Option<Arc<dyn Subscriber>>,
    root_value: Option<RootValue>,
    transforms: Vec<Arc<dyn Transform>>,
    merge: IndexMap<Name, MergedTypeConfig>,
}

impl Subschema {
    /// A bare schema: executed locally, without transforms or merged types.
    pub fn new(name: impl Into<String>, schema: Arc<Valid<Schema>>) -> Self {
        Self {
            name: name.into(),
            schema,
            transformed_schema: None,
            executor: None,
            subscriber: None,
            root_value: None,
            transforms: Vec::new(),
            merge: IndexMap::new(),
        }
    }

    pub fn with_executor(mut self, executor: impl Executor) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    pub fn with_subscriber(mut self, subscriber: impl Subscriber) -> Self {
        self.subscriber = Some(Arc::new(subscriber));
        self
    }

    pub fn with_root_value(mut self, root_value: impl ObjectValue + Send + Sync + 'static) -> Self {
        self.root_value = Some(Arc::new(root_value));
        self
    }

    /// Appends a transform applied to every request delegated to this subschema.
    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Sets the schema as seen by the gateway once this subschema's transforms are applied.
    pub fn with_transformed_schema(mut self, transformed_schema: Arc<Valid<Schema>>) -> Self {
        self.transformed_schema = Some(transformed_schema);
        self
    }

    /// Declares how objects of `type_name` are fetched from this subschema.
    pub fn with_merged_type(mut self, type_name: Name, config: MergedTypeConfig) -> Self {
        self.merge.insert(type_name, config);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Valid<Schema>> {
        &self.schema
    }

    /// The schema as seen by the gateway, which is the target schema when no
    /// transformed schema is set.
    pub fn transformed_schema(&self) -> &Arc<Valid<Schema>> {
        self.transformed_schema.as_ref().unwrap_or(&self.schema)
    }

    pub fn executor(&self) -> Option<&Arc<dyn Executor>> {
        self.executor.as_ref()
    }

    pub fn subscriber(&self) -> Option<&Arc<dyn Subscriber>> {
        self.subscriber.as_ref()
    }

    pub fn root_value(&self) -> Option<&RootValue> {
        self.root_value.as_ref()
    }

    pub fn transforms(&self) -> &[Arc<dyn Transform>] {
        &self.transforms
    }

    pub fn merge(&self) -> &IndexMap<Name, MergedTypeConfig> {
        &self.merge
    }

    pub fn merged_type(&self, type_name: &str) -> Option<&MergedTypeConfig> {
        self.merge.get(type_name)
    }
}

impl PartialEq for Subschema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Subschema {}

impl Hash for Subschema {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state)
    }
}

impl fmt::Debug for Subschema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subschema")
            .field("name", &self.name)
            .field("transforms", &self.transforms.len())
            .field("merge", &self.merge.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// How a subschema contributes to a merged type.
#[derive(Clone, Default)]
pub struct MergedTypeConfig {
    /// Fields the subschema needs on the object before it can resolve it, e.g. `{ id }`.
    pub selection_set: Option<String>,
    /// The root query field used to fetch the object.
    pub field_name: Option<Name>,
    /// Arguments of the root query field.
    pub args: Option<MergedTypeArgs>,
    /// A custom resolver, used instead of delegating to `field_name`.
    pub resolve: Option<Arc<dyn MergedTypeResolver>>,
    /// Per-field requirements.
    pub fields: IndexMap<Name, MergedFieldConfig>,
}

impl MergedTypeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selection_set(mut self, selection_set: impl Into<String>) -> Self {
        self.selection_set = Some(selection_set.into());
        self
    }

    pub fn with_field_name(mut self, field_name: Name) -> Self {
        self.field_name = Some(field_name);
        self
    }

    pub fn with_args(
        mut self,
        args: impl Fn(&ExternalObject) -> Object + Send + Sync + 'static,
    ) -> Self {
        self.args = Some(Arc::new(args));
        self
    }

    pub fn with_resolver(mut self, resolver: impl MergedTypeResolver) -> Self {
        self.resolve = Some(Arc::new(resolver));
        self
    }

    pub fn with_resolver_fn<F>(self, resolver: F) -> Self
    where
        F: Fn(
                &ExternalObject,
                Context,
                FieldInfo,
                Arc<Subschema>,
                Vec<ast::Selection>,
            ) -> BoxFuture<'static, Result<ExternalValue, DelegationError>>
            + Send
            + Sync
            + 'static,
    {
        self.with_resolver(MergedTypeResolverFn::new(resolver))
    }

    pub fn with_field(mut self, field_name: Name, config: MergedFieldConfig) -> Self {
        self.fields.insert(field_name, config);
        self
    }
}

impl fmt::Debug for MergedTypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedTypeConfig")
            .field("selection_set", &self.selection_set)
            .field("field_name", &self.field_name)
            .field("args", &self.args.is_some())
            .field("resolve", &self.resolve.is_some())
            .field("fields", &self.fields)
            .finish()
    }
}

/// Requirements of one field of a merged type.
#[derive(Clone, Debug, Default)]
pub struct MergedFieldConfig {
    /// Fields of the parent object this field needs, e.g. `{ weight }`.
    pub selection_set: Option<String>,
    /// A fragment added to the field's parent selection in requests to this
    /// subschema, e.g. `fragment UserId on User { id }`.
    pub fragment: Option<String>,
}

impl MergedFieldConfig {
    pub fn with_selection_set(mut self, selection_set: impl Into<String>) -> Self {
        self.selection_set = Some(selection_set.into());
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use apollo_compiler::name;

    use super::*;

    fn schema() -> Arc<Valid<Schema>> {
        Arc::new(Schema::parse_and_validate("type Query { a: Int }", "schema.graphql").unwrap())
    }

    #[test]
    fn subschemas_are_identified_by_name() {
        let a = Arc::new(Subschema::new("a", schema()));
        let also_a = Arc::new(Subschema::new("a", schema()));
        let b = Arc::new(Subschema::new("b", schema()));
        let set: HashSet<_> = [a.clone(), also_a, b].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
    }

    #[test]
    fn transformed_schema_defaults_to_target_schema() {
        let target = schema();
        let subschema = Subschema::new("a", target.clone());
        assert!(Arc::ptr_eq(subschema.transformed_schema(), &target));

        let transformed = schema();
        let subschema = subschema.with_transformed_schema(transformed.clone());
        assert!(Arc::ptr_eq(subschema.transformed_schema(), &transformed));
        assert!(Arc::ptr_eq(subschema.schema(), &target));
    }

    #[test]
    fn merged_type_configs_are_looked_up_by_type() {
        let subschema = Subschema::new("a", schema()).with_merged_type(
            name!("User"),
            MergedTypeConfig::new()
                .with_selection_set("{ id }")
                .with_field_name(name!("userById")),
        );
        let config = subschema.merged_type("User").unwrap();
        assert_eq!(config.selection_set.as_deref(), Some("{ id }"));
        assert!(subschema.merged_type("Post").is_none());
    }
}
