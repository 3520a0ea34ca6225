use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;

use super::Transform;
use super::visitor;
use super::visitor::Visitor;
use crate::error::DelegationError;
use crate::graphql;
use crate::spec;
use crate::transformer::DelegationContext;

/// Selects `__typename` in every selection set whose parent type is an
/// interface or a union, so that the concrete type of abstract values is known
/// when the result is reconstructed.
#[derive(Clone, Debug, Default)]
pub struct AddTypenameToAbstract;

impl Transform for AddTypenameToAbstract {
    fn transform_request(
        &self,
        request: graphql::Request,
        context: &DelegationContext,
    ) -> Result<graphql::Request, DelegationError> {
        let document = add_typename_to_abstract(context.target_schema(), &request.document)?;
        Ok(graphql::Request::new(document, request.variables))
    }
}

pub(crate) fn add_typename_to_abstract(
    schema: &Schema,
    document: &ast::Document,
) -> Result<ast::Document, DelegationError> {
    visitor::document(&mut TypenameAdder { schema }, document)
}

struct TypenameAdder<'a> {
    schema: &'a Schema,
}

impl Visitor for TypenameAdder<'_> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn selection_set(
        &mut self,
        parent_type: &Name,
        selections: &[ast::Selection],
    ) -> Vec<ast::Selection> {
        let mut selections = visitor::selection_set(self, parent_type, selections);
        if spec::is_abstract_type(self.schema, parent_type) && !visitor::selects_typename(&selections)
        {
            selections.push(visitor::typename_field());
        }
        selections
    }
}
