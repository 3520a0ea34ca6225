//! Request and result transforms applied around a delegated execution.

mod add_arguments_as_variables;
mod add_fragments_by_field;
mod add_selection_sets;
mod add_typename_to_abstract;
mod expand_abstract_types;
mod filter_to_schema;
pub(crate) mod visitor;
mod wrap_concrete_types;

pub use add_arguments_as_variables::AddArgumentsAsVariables;
pub use add_fragments_by_field::AddFragmentsByField;
pub use add_selection_sets::AddSelectionSetsByField;
pub use add_selection_sets::AddSelectionSetsByType;
pub use add_typename_to_abstract::AddTypenameToAbstract;
pub use expand_abstract_types::ExpandAbstractTypes;
pub use filter_to_schema::FilterToSchema;
pub use wrap_concrete_types::WrapConcreteTypes;

use crate::error::DelegationError;
use crate::graphql;
use crate::transformer::DelegationContext;

/// A rewrite of the request sent to a subschema, and of the response it returns.
///
/// Transforms are chained: requests go through the chain in order, responses
/// in the reverse order. Both hooks default to passing their input through.
pub trait Transform: Send + Sync {
    fn transform_request(
        &self,
        request: graphql::Request,
        context: &DelegationContext,
    ) -> Result<graphql::Request, DelegationError> {
        let _ = context;
        Ok(request)
    }

    fn transform_result(
        &self,
        response: graphql::Response,
        context: &DelegationContext,
    ) -> Result<graphql::Response, DelegationError> {
        let _ = context;
        Ok(response)
    }
}
