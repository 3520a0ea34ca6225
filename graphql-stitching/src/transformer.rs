//! Assembly of the transform chain of one delegation, and its application to
//! the outgoing request and the incoming response.

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::validation::Valid;

use crate::context::Context;
use crate::error::DelegationError;
use crate::graphql;
use crate::info::FieldInfo;
use crate::json_ext::Object;
use crate::stitching_info::StitchingInfo;
use crate::subschema::Subschema;
use crate::transforms::AddArgumentsAsVariables;
use crate::transforms::AddFragmentsByField;
use crate::transforms::AddSelectionSetsByField;
use crate::transforms::AddSelectionSetsByType;
use crate::transforms::AddTypenameToAbstract;
use crate::transforms::ExpandAbstractTypes;
use crate::transforms::FilterToSchema;
use crate::transforms::Transform;
use crate::transforms::WrapConcreteTypes;

/// What transforms know about the delegation they take part in.
#[derive(Clone)]
pub struct DelegationContext {
    subschema: Arc<Subschema>,
    transformed_schema: Arc<Valid<Schema>>,
    operation: OperationType,
    field_name: Name,
    return_type: ast::Type,
    args: Option<Object>,
    info: Option<FieldInfo>,
    context: Context,
    skip_type_merging: bool,
}

#[buildstructor::buildstructor]
impl DelegationContext {
    #[builder(visibility = "pub")]
    fn new(
        subschema: Arc<Subschema>,
        operation: OperationType,
        field_name: Name,
        return_type: ast::Type,
        args: Option<Object>,
        info: Option<FieldInfo>,
        context: Option<Context>,
        transformed_schema: Option<Arc<Valid<Schema>>>,
        skip_type_merging: Option<bool>,
    ) -> Self {
        Self {
            transformed_schema: transformed_schema
                .unwrap_or_else(|| subschema.transformed_schema().clone()),
            subschema,
            operation,
            field_name,
            return_type,
            args,
            info,
            context: context.unwrap_or_default(),
            skip_type_merging: skip_type_merging.unwrap_or_default(),
        }
    }

    pub fn subschema(&self) -> &Arc<Subschema> {
        &self.subschema
    }

    /// The schema the request is executed against.
    pub fn target_schema(&self) -> &Arc<Valid<Schema>> {
        self.subschema.schema()
    }

    /// The target schema as seen by the gateway.
    pub fn transformed_schema(&self) -> &Arc<Valid<Schema>> {
        &self.transformed_schema
    }

    /// The schema of the gateway operation, when delegating a gateway field.
    pub fn gateway_schema(&self) -> Option<&Arc<Valid<Schema>>> {
        self.info.as_ref().map(FieldInfo::schema)
    }

    pub fn stitching_info(&self) -> Option<&Arc<StitchingInfo>> {
        self.info.as_ref().and_then(FieldInfo::stitching_info)
    }

    pub fn operation(&self) -> OperationType {
        self.operation
    }

    /// The root field queried on the target schema.
    pub fn field_name(&self) -> &Name {
        &self.field_name
    }

    pub fn return_type(&self) -> &ast::Type {
        &self.return_type
    }

    pub fn args(&self) -> Option<&Object> {
        self.args.as_ref()
    }

    pub fn info(&self) -> Option<&FieldInfo> {
        self.info.as_ref()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn skip_type_merging(&self) -> bool {
        self.skip_type_merging
    }
}

impl fmt::Debug for DelegationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegationContext")
            .field("subschema", &self.subschema.name())
            .field("operation", &self.operation)
            .field("field_name", &self.field_name)
            .field("return_type", &self.return_type)
            .field("skip_type_merging", &self.skip_type_merging)
            .finish()
    }
}

/// The transform chain of one delegation.
#[derive(Clone)]
pub struct Transformer {
    context: DelegationContext,
    transforms: Vec<Arc<dyn Transform>>,
}

impl Transformer {
    /// Builds the chain around `transforms`, the subschema transforms followed
    /// by the transforms of the delegation call:
    ///
    /// 1. when stitching, [`AddSelectionSetsByField`] and [`AddSelectionSetsByType`]
    /// 2. [`WrapConcreteTypes`]
    /// 3. when delegating a gateway field, [`ExpandAbstractTypes`]
    /// 4. `transforms`, reversed
    /// 5. when stitching, [`AddFragmentsByField`]
    /// 6. when arguments are given, [`AddArgumentsAsVariables`]
    /// 7. [`FilterToSchema`] and [`AddTypenameToAbstract`]
    pub fn new(context: DelegationContext, transforms: &[Arc<dyn Transform>]) -> Self {
        let stitching = context.stitching_info().is_some();
        let mut chain: Vec<Arc<dyn Transform>> = Vec::new();
        if stitching {
            chain.push(Arc::new(AddSelectionSetsByField));
            chain.push(Arc::new(AddSelectionSetsByType));
        }
        chain.push(Arc::new(WrapConcreteTypes::new(
            context.return_type().clone(),
            context.transformed_schema().clone(),
        )));
        if let Some(gateway_schema) = context.gateway_schema() {
            chain.push(Arc::new(ExpandAbstractTypes::new(
                gateway_schema,
                context.transformed_schema().clone(),
            )));
        }
        chain.extend(transforms.iter().rev().cloned());
        if stitching {
            chain.push(Arc::new(AddFragmentsByField));
        }
        if let Some(args) = context.args() {
            chain.push(Arc::new(AddArgumentsAsVariables::new(args.clone())));
        }
        chain.push(Arc::new(FilterToSchema));
        chain.push(Arc::new(AddTypenameToAbstract));
        Self {
            context,
            transforms: chain,
        }
    }

    pub fn context(&self) -> &DelegationContext {
        &self.context
    }

    pub fn transforms(&self) -> &[Arc<dyn Transform>] {
        &self.transforms
    }

    pub fn apply_request_transforms(
        &self,
        request: graphql::Request,
    ) -> Result<graphql::Request, DelegationError> {
        apply_request_transforms(request, &self.transforms, &self.context)
    }

    pub fn apply_result_transforms(
        &self,
        response: graphql::Response,
    ) -> Result<graphql::Response, DelegationError> {
        apply_result_transforms(response, &self.transforms, &self.context)
    }
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("context", &self.context)
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

/// Applies the request side of `transforms`, first to last.
pub fn apply_request_transforms(
    request: graphql::Request,
    transforms: &[Arc<dyn Transform>],
    context: &DelegationContext,
) -> Result<graphql::Request, DelegationError> {
    transforms.iter().try_fold(request, |request, transform| {
        transform.transform_request(request, context)
    })
}

/// Applies the result side of `transforms`, last to first.
pub fn apply_result_transforms(
    response: graphql::Response,
    transforms: &[Arc<dyn Transform>],
    context: &DelegationContext,
) -> Result<graphql::Response, DelegationError> {
    transforms.iter().rev().try_fold(response, |response, transform| {
        transform.transform_result(response, context)
    })
}
