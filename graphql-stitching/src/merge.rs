//! Type merging: completing an object fetched from one subschema with the
//! fields other subschemas contribute to its type.

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::try_join_all;
use indexmap::IndexMap;
use tracing::Instrument;

use crate::context::Context;
use crate::delegate::DelegateToSchema;
use crate::delegate::delegate_to_schema;
use crate::error::DelegationError;
use crate::external::ExternalError;
use crate::external::ExternalObject;
use crate::external::ExternalValue;
use crate::info::FieldInfo;
use crate::stitching_info::MergedTypeInfo;
use crate::subschema::MergedTypeArgs;
use crate::subschema::Subschema;

/// Fetches more fields of an object from a subschema.
///
/// `selections` are the fields to fetch, as selected by the gateway operation
/// on the object described by `info`.
pub trait MergedTypeResolver: Send + Sync + 'static {
    fn resolve(
        &self,
        original: &ExternalObject,
        context: Context,
        info: FieldInfo,
        subschema: Arc<Subschema>,
        selections: Vec<ast::Selection>,
    ) -> BoxFuture<'static, Result<ExternalValue, DelegationError>>;
}

/// A [`MergedTypeResolver`] built from a function.
pub struct MergedTypeResolverFn<F>(F);

impl<F> MergedTypeResolverFn<F>
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
    pub fn new(resolver: F) -> Self {
        Self(resolver)
    }
}

impl<F> MergedTypeResolver for MergedTypeResolverFn<F>
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
    fn resolve(
        &self,
        original: &ExternalObject,
        context: Context,
        info: FieldInfo,
        subschema: Arc<Subschema>,
        selections: Vec<ast::Selection>,
    ) -> BoxFuture<'static, Result<ExternalValue, DelegationError>> {
        (self.0)(original, context, info, subschema, selections)
    }
}

/// Fetches an object through a root query field of the subschema, with
/// arguments computed from the object, e.g. `_userById(id: <object id>)`.
///
/// The delegation skips type merging, so that the fetched fields are not
/// merged again.
#[derive(Clone)]
pub struct DefaultMergedTypeResolver {
    field_name: Name,
    args: Option<MergedTypeArgs>,
}

impl DefaultMergedTypeResolver {
    pub fn new(field_name: Name, args: Option<MergedTypeArgs>) -> Self {
        Self { field_name, args }
    }
}

impl MergedTypeResolver for DefaultMergedTypeResolver {
    fn resolve(
        &self,
        original: &ExternalObject,
        context: Context,
        info: FieldInfo,
        subschema: Arc<Subschema>,
        selections: Vec<ast::Selection>,
    ) -> BoxFuture<'static, Result<ExternalValue, DelegationError>> {
        let args = self
            .args
            .as_ref()
            .map(|args| args(original))
            .unwrap_or_default();
        let type_name = original
            .type_name()
            .map(Name::new_unchecked)
            .unwrap_or_else(|| info.return_type().inner_named_type().clone());
        let field_name = self.field_name.clone();
        async move {
            delegate_to_schema(
                DelegateToSchema::builder()
                    .subschema(subschema)
                    .info(info)
                    .operation(OperationType::Query)
                    .field_name(field_name)
                    .args(args)
                    .selection_set(selections)
                    .return_type(ast::Type::Named(type_name))
                    .context(context)
                    .skip_type_merging(true)
                    .build(),
            )
            .await?
            .into_value()
        }
        .boxed()
    }
}

impl fmt::Debug for DefaultMergedTypeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultMergedTypeResolver")
            .field("field_name", &self.field_name)
            .field("args", &self.args.is_some())
            .finish()
    }
}

/// Which subschema each outstanding field is fetched from in one round of
/// type merging.
#[derive(Clone, Default)]
pub struct DelegationPlan {
    pub delegation_map: IndexMap<Arc<Subschema>, Vec<ast::Selection>>,
    /// Targets whose requirements are met by the sources of this round.
    pub proxiable_subschemas: Vec<Arc<Subschema>>,
    pub non_proxiable_subschemas: Vec<Arc<Subschema>>,
    /// Fields no proxiable subschema can fetch this round.
    pub unproxiable_selections: Vec<ast::Selection>,
}

impl fmt::Debug for DelegationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |subschemas: &[Arc<Subschema>]| -> Vec<String> {
            subschemas.iter().map(|s| s.name().to_owned()).collect()
        };
        f.debug_struct("DelegationPlan")
            .field(
                "delegation_map",
                &self
                    .delegation_map
                    .iter()
                    .map(|(subschema, selections)| (subschema.name(), selections.len()))
                    .collect::<Vec<_>>(),
            )
            .field("proxiable_subschemas", &names(&self.proxiable_subschemas))
            .field("non_proxiable_subschemas", &names(&self.non_proxiable_subschemas))
            .field("unproxiable_selections", &self.unproxiable_selections.len())
            .finish()
    }
}

/// Routes the requested `selections` to the `targets` able to fetch them,
/// knowing the object was fetched from `sources`.
///
/// A target is proxiable when the sources contain its selection set, and the
/// selection sets of the requested fields it declares. A field is routed to
/// its unique owner when that owner is proxiable. A field with several owners
/// goes to an owner already chosen this round, or else to the first proxiable
/// owner. Any other field is left for a later round.
pub fn build_delegation_plan(
    merged_type: &MergedTypeInfo,
    selections: &[ast::Selection],
    sources: &[Arc<Subschema>],
    targets: &[Arc<Subschema>],
) -> DelegationPlan {
    let mut plan = DelegationPlan::default();
    for target in targets {
        let type_requirement_met = merged_type
            .selection_sets
            .get(target)
            .is_none_or(|selection_set| merged_type.sources_contain(sources, selection_set));
        let field_requirements_met = merged_type
            .field_selection_sets
            .get(target)
            .is_none_or(|field_selection_sets| {
                selections.iter().all(|selection| match selection {
                    ast::Selection::Field(field) => field_selection_sets
                        .get(&field.name)
                        .is_none_or(|selection_set| merged_type.sources_contain(sources, selection_set)),
                    _ => true,
                })
            });
        if type_requirement_met && field_requirements_met {
            plan.proxiable_subschemas.push(target.clone());
        } else {
            plan.non_proxiable_subschemas.push(target.clone());
        }
    }

    for selection in selections {
        let ast::Selection::Field(field) = selection else {
            plan.unproxiable_selections.push(selection.clone());
            continue;
        };
        if field.name.as_str() == crate::spec::TYPENAME {
            continue;
        }
        if let Some(owner) = merged_type.unique_fields.get(&field.name) {
            if plan.proxiable_subschemas.contains(owner) {
                plan.delegation_map
                    .entry(owner.clone())
                    .or_default()
                    .push(selection.clone());
            } else {
                plan.unproxiable_selections.push(selection.clone());
            }
            continue;
        }
        let owners: Vec<&Arc<Subschema>> = merged_type
            .non_unique_fields
            .get(&field.name)
            .into_iter()
            .flatten()
            .filter(|owner| plan.proxiable_subschemas.contains(owner))
            .collect();
        let chosen = owners
            .iter()
            .find(|owner| plan.delegation_map.contains_key(**owner))
            .or_else(|| owners.first());
        match chosen {
            Some(owner) => plan
                .delegation_map
                .entry((*owner).clone())
                .or_default()
                .push(selection.clone()),
            None => plan.unproxiable_selections.push(selection.clone()),
        }
    }
    plan
}

/// Fetches the `selections` missing from `object` from the `targets`, round
/// after round, until every selection is fetched or no target can fetch the
/// rest.
///
/// The resolvers of one round run concurrently. A failing resolver fails the
/// whole merge.
#[allow(clippy::too_many_arguments)]
pub fn merge_fields(
    merged_type: Arc<MergedTypeInfo>,
    type_name: Name,
    object: ExternalObject,
    selections: Vec<ast::Selection>,
    sources: Vec<Arc<Subschema>>,
    targets: Vec<Arc<Subschema>>,
    context: Context,
    info: FieldInfo,
) -> BoxFuture<'static, Result<ExternalObject, DelegationError>> {
    let span = tracing::trace_span!("merge_fields", type_name = type_name.as_str());
    async move {
        if selections.is_empty() {
            return Ok(object);
        }
        let plan = build_delegation_plan(&merged_type, &selections, &sources, &targets);
        if plan.delegation_map.is_empty() {
            return Ok(object);
        }
        tracing::debug!(type_name = type_name.as_str(), ?plan, "merging fields");

        let results = try_join_all(plan.delegation_map.into_iter().map(|(subschema, selections)| {
            let resolver = merged_type.resolvers.get(&subschema).cloned();
            let span = tracing::trace_span!("merged_type_resolver", subschema = subschema.name());
            let resolved = resolver.map(|resolver| {
                resolver.resolve(&object, context.clone(), info.clone(), subschema.clone(), selections)
            });
            let type_name = type_name.clone();
            async move {
                match resolved {
                    Some(resolved) => resolved.await,
                    None => Err(DelegationError::MissingMergedTypeResolver {
                        type_name: type_name.to_string(),
                        subschema: subschema.name().to_owned(),
                    }),
                }
            }
            .instrument(span)
        }))
        .await?;

        let object = merge_proxied_results(object, results);
        let mut sources = sources;
        sources.extend(plan.proxiable_subschemas);
        merge_fields(
            merged_type,
            type_name,
            object,
            plan.unproxiable_selections,
            sources,
            plan.non_proxiable_subschemas,
            context,
            info,
        )
        .await
    }
    .instrument(span)
    .boxed()
}

/// Deep merges the results of merged type resolvers into `target`.
///
/// Objects are merged field by field, recording which subschema each field
/// came from. Errors are added to the errors of `target`.
pub fn merge_proxied_results(
    mut target: ExternalObject,
    sources: impl IntoIterator<Item = ExternalValue>,
) -> ExternalObject {
    for source in sources {
        match source {
            ExternalValue::Object(source) => target.merge(source),
            ExternalValue::Error(error) => target.extend_errors(error.errors()),
            ExternalValue::Null => {}
            ExternalValue::Leaf(_) | ExternalValue::List(_) => {
                tracing::debug!("ignoring a merged type result that is not an object");
            }
        }
    }
    target
}

/// Resolves the field under `response_key` of a reconstructed parent value.
///
/// A parent holding an error fails with that error. A missing field resolves
/// to the errors addressing it, or to null.
pub fn default_merged_resolver(
    parent: &ExternalValue,
    response_key: &str,
) -> Result<ExternalValue, ExternalError> {
    match parent {
        ExternalValue::Error(error) => Err(error.clone()),
        ExternalValue::Object(object) => match object.resolve(response_key) {
            ExternalValue::Error(error) => Err(error),
            value => Ok(value),
        },
        ExternalValue::Null | ExternalValue::Leaf(_) | ExternalValue::List(_) => {
            Ok(ExternalValue::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;

    use apollo_compiler::Schema;
    use apollo_compiler::name;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;
    use crate::graphql;
    use crate::stitching_info::SelectionSet;
    use crate::transforms::visitor::parse_selection_set;

    fn subschema(name: &str) -> Arc<Subschema> {
        let schema = Schema::parse_and_validate(
            "type Query { a: User } type User { id: ID! name: String }",
            "schema.graphql",
        )
        .unwrap();
        Arc::new(Subschema::new(name, Arc::new(schema)))
    }

    fn field_names(selections: &[ast::Selection]) -> Vec<&str> {
        selections
            .iter()
            .filter_map(|selection| match selection {
                ast::Selection::Field(field) => Some(field.name.as_str()),
                _ => None,
            })
            .collect()
    }

    fn merged_type(s1: &Arc<Subschema>, s2: &Arc<Subschema>) -> MergedTypeInfo {
        let mut merged_type = MergedTypeInfo::new(name!("User"));
        merged_type.subschemas = vec![s1.clone(), s2.clone()];
        merged_type.unique_fields.insert(name!("id"), s1.clone());
        merged_type
            .non_unique_fields
            .insert(name!("name"), vec![s1.clone(), s2.clone()]);
        merged_type
    }

    #[test]
    fn non_unique_fields_prefer_subschemas_already_chosen() {
        let (s1, s2) = (subschema("s1"), subschema("s2"));
        let merged_type = merged_type(&s1, &s2);
        let selections = parse_selection_set("{ id name __typename }").unwrap();
        let plan = build_delegation_plan(
            &merged_type,
            &selections,
            &[s1.clone()],
            &[s1.clone(), s2.clone()],
        );
        assert_eq!(plan.delegation_map.len(), 1);
        assert_eq!(field_names(&plan.delegation_map[&s1]), ["id", "name"]);
        assert!(plan.unproxiable_selections.is_empty());
        assert_eq!(plan.proxiable_subschemas.len(), 2);
    }

    #[test]
    fn fields_without_a_proxiable_owner_are_deferred() {
        let (s1, s2) = (subschema("s1"), subschema("s2"));
        let mut merged_type = merged_type(&s1, &s2);
        merged_type.non_unique_fields.clear();
        merged_type.unique_fields.insert(name!("name"), s2.clone());
        merged_type
            .selection_sets
            .insert(s2.clone(), SelectionSet::parse("{ missing }").unwrap());
        let selections = parse_selection_set("{ name }").unwrap();
        let plan = build_delegation_plan(&merged_type, &selections, &[s1.clone()], &[s2.clone()]);
        assert!(plan.delegation_map.is_empty());
        assert_eq!(field_names(&plan.unproxiable_selections), ["name"]);
        assert_eq!(plan.non_proxiable_subschemas, [s2]);
    }

    #[test]
    fn proxied_results_are_deep_merged() {
        let (s1, s2) = (subschema("s1"), subschema("s2"));
        let mut target = ExternalObject::new(s1.clone());
        target.insert("id", ExternalValue::Leaf(json!("1")));
        let mut source = ExternalObject::new(s2.clone());
        source.insert("name", ExternalValue::Leaf(json!("Ann")));
        let failure = graphql::Error::builder().message("unavailable").build();
        let merged = merge_proxied_results(
            target,
            [
                ExternalValue::Object(source),
                ExternalValue::Error(ExternalError::Field(failure.clone())),
                ExternalValue::Null,
            ],
        );
        assert_eq!(
            ExternalValue::Object(merged.clone()).to_json(),
            json!({ "id": "1", "name": "Ann" })
        );
        assert_eq!(merged.field_subschema("name").name(), "s2");
        assert_eq!(merged.field_subschema("id").name(), "s1");
        assert_eq!(merged.annotated_errors(), [failure]);
    }

    #[test]
    fn default_merged_resolver_raises_errors() {
        let s1 = subschema("s1");
        let failure = ExternalError::Field(graphql::Error::builder().message("boom").build());
        assert_eq!(
            default_merged_resolver(&ExternalValue::Error(failure.clone()), "id").unwrap_err(),
            failure
        );

        let object = ExternalObject::new(s1).with_errors(vec![
            graphql::Error::builder()
                .message("no name")
                .path(crate::json_ext::Path::from(vec!["name"]))
                .build(),
        ]);
        let parent = ExternalValue::Object(object);
        assert!(default_merged_resolver(&parent, "name").is_err());
        assert!(default_merged_resolver(&parent, "id").unwrap().is_null());
    }

    #[tokio::test]
    async fn merge_fields_runs_resolvers_until_nothing_is_left() {
        let (s1, s2) = (subschema("s1"), subschema("s2"));
        let mut merged_type = merged_type(&s1, &s2);
        merged_type.non_unique_fields.clear();
        merged_type.unique_fields.insert(name!("name"), s2.clone());
        merged_type.resolvers.insert(
            s2.clone(),
            Arc::new(MergedTypeResolverFn::new(
                |_original: &ExternalObject,
                 _context: Context,
                 _info: FieldInfo,
                 subschema: Arc<Subschema>,
                 selections: Vec<ast::Selection>| {
                    let mut object = ExternalObject::new(subschema);
                    for name in field_names(&selections) {
                        object.insert(name, ExternalValue::Leaf(json!("Ann")));
                    }
                    async move { Ok(ExternalValue::Object(object)) }.boxed()
                },
            )),
        );
        let gateway = Arc::new(
            Schema::parse_and_validate(
                "type Query { user: User } type User { id: ID! name: String }",
                "gateway.graphql",
            )
            .unwrap(),
        );
        let document = ast::Document::parse("{ user { id name } }", "query.graphql").unwrap();
        let operation = crate::info::OperationInfo::new(
            gateway,
            &document,
            None,
            crate::json_ext::Object::new(),
        )
        .unwrap();
        let info = FieldInfo::root(Arc::new(operation), "user").unwrap();

        let mut object = ExternalObject::new(s1.clone());
        object.insert("id", ExternalValue::Leaf(json!("1")));
        let merged = merge_fields(
            Arc::new(merged_type),
            name!("User"),
            object,
            parse_selection_set("{ name }").unwrap(),
            vec![s1],
            vec![s2],
            Context::new(),
            info,
        )
        .await
        .unwrap();
        assert_eq!(
            ExternalValue::Object(merged.clone()).to_json(),
            json!({ "id": "1", "name": "Ann" })
        );
        assert_eq!(merged.field_subschema("name").name(), "s2");
    }

    #[tokio::test]
    async fn a_failing_resolver_fails_the_whole_merge() {
        let (s1, s2, s3) = (subschema("s1"), subschema("s2"), subschema("s3"));
        let mut merged_type = MergedTypeInfo::new(name!("User"));
        merged_type.subschemas = vec![s1.clone(), s2.clone(), s3.clone()];
        merged_type.unique_fields.insert(name!("id"), s1.clone());
        merged_type.unique_fields.insert(name!("name"), s2.clone());
        merged_type.unique_fields.insert(name!("email"), s3.clone());

        let name_resolved = Arc::new(AtomicBool::new(false));
        let resolved = name_resolved.clone();
        merged_type.resolvers.insert(
            s2.clone(),
            Arc::new(MergedTypeResolverFn::new(
                move |_original: &ExternalObject,
                      _context: Context,
                      _info: FieldInfo,
                      subschema: Arc<Subschema>,
                      _selections: Vec<ast::Selection>| {
                    resolved.store(true, Ordering::SeqCst);
                    let mut object = ExternalObject::new(subschema);
                    object.insert("name", ExternalValue::Leaf(json!("Ann")));
                    async move { Ok(ExternalValue::Object(object)) }.boxed()
                },
            )),
        );
        merged_type.resolvers.insert(
            s3.clone(),
            Arc::new(MergedTypeResolverFn::new(
                |_original: &ExternalObject,
                 _context: Context,
                 _info: FieldInfo,
                 _subschema: Arc<Subschema>,
                 _selections: Vec<ast::Selection>| {
                    async { Err(DelegationError::InvalidRequest("mailer is down".to_owned())) }
                        .boxed()
                },
            )),
        );
        let gateway = Arc::new(
            Schema::parse_and_validate(
                "type Query { user: User } type User { id: ID! name: String email: String }",
                "gateway.graphql",
            )
            .unwrap(),
        );
        let document =
            ast::Document::parse("{ user { id name email } }", "query.graphql").unwrap();
        let operation = crate::info::OperationInfo::new(
            gateway,
            &document,
            None,
            crate::json_ext::Object::new(),
        )
        .unwrap();
        let info = FieldInfo::root(Arc::new(operation), "user").unwrap();

        let mut object = ExternalObject::new(s1.clone());
        object.insert("id", ExternalValue::Leaf(json!("1")));
        let error = merge_fields(
            Arc::new(merged_type),
            name!("User"),
            object,
            parse_selection_set("{ name email }").unwrap(),
            vec![s1],
            vec![s2, s3],
            Context::new(),
            info,
        )
        .await
        .unwrap_err();
        assert_eq!(
            error,
            DelegationError::InvalidRequest("mailer is down".to_owned())
        );
        assert!(name_resolved.load(Ordering::SeqCst));
    }
}
