//! Resolution info describing the gateway field being delegated.

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::name;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;

use crate::error::DelegationError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::spec;
use crate::spec::FieldsByResponseKey;
use crate::stitching_info::StitchingInfo;

/// The gateway operation a delegated field belongs to.
pub struct OperationInfo {
    schema: Arc<Valid<Schema>>,
    operation: Node<ast::OperationDefinition>,
    fragments: IndexMap<Name, Node<ast::FragmentDefinition>>,
    variable_values: Object,
    stitching_info: Option<Arc<StitchingInfo>>,
}

impl OperationInfo {
    /// Selects the operation named `operation_name` (or the only operation) of a
    /// gateway document.
    pub fn new(
        schema: Arc<Valid<Schema>>,
        document: &ast::Document,
        operation_name: Option<&str>,
        variable_values: Object,
    ) -> Result<Self, DelegationError> {
        let mut operations = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::OperationDefinition(operation) => Some(operation),
                _ => None,
            })
            .filter(|operation| match operation_name {
                Some(operation_name) => operation
                    .name
                    .as_ref()
                    .is_some_and(|name| name.as_str() == operation_name),
                None => true,
            });
        let operation = match (operations.next(), operations.next()) {
            (Some(operation), None) => operation.clone(),
            (None, _) => {
                return Err(DelegationError::InvalidRequest(match operation_name {
                    Some(name) => format!("unknown operation named \"{name}\""),
                    None => "document does not contain an operation".to_owned(),
                }));
            }
            (Some(_), Some(_)) => {
                return Err(DelegationError::InvalidRequest(
                    "an operation name is required when the document contains several operations"
                        .to_owned(),
                ));
            }
        };
        let fragments = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::FragmentDefinition(fragment) => {
                    Some((fragment.name.clone(), fragment.clone()))
                }
                _ => None,
            })
            .collect();
        Ok(Self {
            schema,
            operation,
            fragments,
            variable_values,
            stitching_info: None,
        })
    }

    pub fn with_stitching_info(mut self, stitching_info: Arc<StitchingInfo>) -> Self {
        self.stitching_info = Some(stitching_info);
        self
    }

    pub fn schema(&self) -> &Arc<Valid<Schema>> {
        &self.schema
    }

    pub fn operation(&self) -> &Node<ast::OperationDefinition> {
        &self.operation
    }

    pub fn fragments(&self) -> &IndexMap<Name, Node<ast::FragmentDefinition>> {
        &self.fragments
    }

    pub fn variable_values(&self) -> &Object {
        &self.variable_values
    }

    pub fn stitching_info(&self) -> Option<&Arc<StitchingInfo>> {
        self.stitching_info.as_ref()
    }
}

/// A field of the gateway operation: its parent type, its merged field nodes,
/// its declared type and its position in the result.
#[derive(Clone)]
pub struct FieldInfo {
    operation: Arc<OperationInfo>,
    parent_type: Name,
    field_name: Name,
    field_nodes: Vec<Node<ast::Field>>,
    return_type: ast::Type,
    path: Path,
}

impl FieldInfo {
    /// The root field of the operation selected under `response_key`.
    pub fn root(operation: Arc<OperationInfo>, response_key: &str) -> Result<Self, DelegationError> {
        let operation_type = operation.operation.operation_type;
        let root_type = operation
            .schema
            .root_operation(operation_type)
            .cloned()
            .ok_or_else(|| DelegationError::MissingRootType {
                subschema: "gateway".to_owned(),
                operation: spec::operation_type_name(operation_type).to_owned(),
            })?;
        let mut fields = FieldsByResponseKey::new();
        spec::collect_fields(
            &operation.schema,
            &operation.fragments,
            &operation.variable_values,
            &root_type,
            &operation.operation.selection_set,
            &mut fields,
            &mut Default::default(),
        );
        let field_nodes = fields.swap_remove(response_key).ok_or_else(|| {
            DelegationError::MissingRootField {
                type_name: root_type.to_string(),
                field_name: response_key.to_owned(),
            }
        })?;
        Self::new(operation, root_type, field_nodes, Path::from(vec![response_key]))
    }

    /// Builds the info of the field selected by `field_nodes` on `parent_type`.
    pub fn new(
        operation: Arc<OperationInfo>,
        parent_type: Name,
        field_nodes: Vec<Node<ast::Field>>,
        path: Path,
    ) -> Result<Self, DelegationError> {
        let field_name = field_nodes
            .first()
            .map(|node| node.name.clone())
            .ok_or_else(|| DelegationError::InvalidRequest("empty field selection".to_owned()))?;
        let return_type = return_type(&operation.schema, &parent_type, &field_name)
            .ok_or_else(|| DelegationError::MissingReturnType(field_name.to_string()))?;
        Ok(Self {
            operation,
            parent_type,
            field_name,
            field_nodes,
            return_type,
            path,
        })
    }

    pub fn operation(&self) -> &Arc<OperationInfo> {
        &self.operation
    }

    pub fn schema(&self) -> &Arc<Valid<Schema>> {
        &self.operation.schema
    }

    pub fn stitching_info(&self) -> Option<&Arc<StitchingInfo>> {
        self.operation.stitching_info()
    }

    pub fn parent_type(&self) -> &Name {
        &self.parent_type
    }

    pub fn field_name(&self) -> &Name {
        &self.field_name
    }

    pub fn field_nodes(&self) -> &[Node<ast::Field>] {
        &self.field_nodes
    }

    pub fn return_type(&self) -> &ast::Type {
        &self.return_type
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn response_key(&self) -> &Name {
        self.field_nodes
            .first()
            .map(|node| spec::response_key(node))
            .unwrap_or(&self.field_name)
    }

    /// The sub-fields selected on this field when its value is of type `type_name`.
    pub fn collect_sub_fields(&self, type_name: &str) -> FieldsByResponseKey {
        spec::collect_sub_fields(
            &self.operation.schema,
            &self.operation.fragments,
            &self.operation.variable_values,
            type_name,
            &self.field_nodes,
        )
    }

    /// The info of a sub-field selected on a value of type `parent_type`.
    pub(crate) fn child(
        &self,
        parent_type: &Name,
        response_key: &str,
        field_nodes: Vec<Node<ast::Field>>,
    ) -> Option<FieldInfo> {
        Self::new(
            self.operation.clone(),
            parent_type.clone(),
            field_nodes,
            self.path.join(response_key),
        )
        .ok()
    }

    /// The same field, positioned at a list item.
    pub(crate) fn at_index(&self, index: usize) -> FieldInfo {
        let mut info = self.clone();
        info.path.push(index);
        info
    }
}

fn return_type(schema: &Schema, parent_type: &str, field_name: &str) -> Option<ast::Type> {
    if field_name == spec::TYPENAME {
        return Some(ast::Type::NonNullNamed(name!("String")));
    }
    spec::field_definition(schema, parent_type, field_name).map(|field| field.ty.clone())
}

impl fmt::Debug for FieldInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldInfo")
            .field("parent_type", &self.parent_type)
            .field("field_name", &self.field_name)
            .field("return_type", &self.return_type)
            .field("path", &self.path)
            .finish()
    }
}
