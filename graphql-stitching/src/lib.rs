//! Delegation of GraphQL fields from a stitching gateway to the subschemas
//! behind it.
//!
//! [`delegate_to_schema`] and [`delegate_request`] build a request for a
//! subschema, rewrite it through a chain of [`Transform`]s, execute it, and
//! reconstruct the result. Objects of types merged across several subschemas
//! are completed by fetching their missing fields from the other subschemas.

#![warn(unreachable_pub)]

pub mod configuration;
pub mod context;
pub mod delegate;
pub mod error;
pub mod executor;
pub mod external;
pub mod graphql;
pub mod info;
pub mod json_ext;
pub mod merge;
pub mod request;
pub mod results;
mod spec;
pub mod stitching_info;
pub mod subschema;
pub mod test_harness;
pub mod transformer;
pub mod transforms;

pub use configuration::StitchingConfiguration;
pub use context::Context;
pub use delegate::DelegateRequest;
pub use delegate::DelegateToSchema;
pub use delegate::Delegated;
pub use delegate::delegate_request;
pub use delegate::delegate_to_schema;
pub use error::DelegationError;
pub use executor::Executor;
pub use executor::LocalExecutor;
pub use executor::Subscriber;
pub use external::ExternalObject;
pub use external::ExternalValue;
pub use info::FieldInfo;
pub use info::OperationInfo;
pub use merge::MergedTypeResolver;
pub use stitching_info::StitchingInfo;
pub use subschema::MergedFieldConfig;
pub use subschema::MergedTypeConfig;
pub use subschema::Subschema;
pub use transformer::DelegationContext;
pub use transforms::Transform;
