//! Delegation errors.
use std::fmt;

use apollo_compiler::validation::DiagnosticList;
use displaydoc::Display;
use itertools::Itertools;
use thiserror::Error;

use crate::graphql;

/// Error types raised while delegating a field to a subschema.
#[derive(Error, Display, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum DelegationError {
    /// {0}
    Validation(graphql::Error),

    /// {0}
    Combined(CombinedError),

    /// target schema of subschema '{subschema}' has no {operation} root type
    MissingRootType {
        /// The subschema being delegated to.
        subschema: String,
        /// The operation type that could not be resolved.
        operation: String,
    },

    /// root type '{type_name}' has no field '{field_name}'
    MissingRootField {
        /// The root type name.
        type_name: String,
        /// The missing field.
        field_name: String,
    },

    /// cannot determine the return type of the delegated field '{0}'
    MissingReturnType(String),

    /// subschema '{0}' has no subscriber for subscription delegation
    MissingSubscriber(String),

    /// no merged type resolver for type '{type_name}' in subschema '{subschema}'
    MissingMergedTypeResolver {
        /// The merged type.
        type_name: String,
        /// The subschema that was planned as a target.
        subschema: String,
    },

    /// invalid request: {0}
    InvalidRequest(String),

    /// invalid stitching configuration: {0}
    Configuration(String),

    /// cannot transform the delegated request: {0}
    Transform(String),
}

impl DelegationError {
    /// Builds the error raised when a request fails validation against a target schema.
    ///
    /// A single failure is raised as-is, several are combined.
    pub(crate) fn from_validation(diagnostics: &DiagnosticList) -> Self {
        let mut errors: Vec<graphql::Error> = diagnostics
            .iter()
            .map(|diagnostic| diagnostic.to_json().into())
            .collect();
        match errors.len() {
            1 => DelegationError::Validation(errors.remove(0)),
            _ => DelegationError::Combined(CombinedError::new(errors)),
        }
    }

    /// Converts this error into GraphQL errors suitable for a response.
    pub fn into_graphql_errors(self) -> Vec<graphql::Error> {
        match self {
            DelegationError::Validation(error) => vec![error],
            DelegationError::Combined(combined) => combined.errors,
            other => vec![
                graphql::Error::builder()
                    .message(other.to_string())
                    .extension_code("DELEGATION_ERROR")
                    .build(),
            ],
        }
    }
}

/// Several GraphQL errors raised together for one position of the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedError {
    pub errors: Vec<graphql::Error>,
}

impl CombinedError {
    pub fn new(errors: Vec<graphql::Error>) -> Self {
        Self { errors }
    }
}

impl std::error::Error for CombinedError {}

impl fmt::Display for CombinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.errors.iter().join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ExecutableDocument;
    use apollo_compiler::Schema;

    use super::*;

    #[test]
    fn single_validation_failure_is_not_combined() {
        let schema = Schema::parse_and_validate("type Query { a: Int }", "schema.graphql").unwrap();
        let invalid = ExecutableDocument::parse_and_validate(&schema, "{ b }", "query.graphql")
            .unwrap_err();

        let error = DelegationError::from_validation(&invalid.errors);
        assert!(matches!(error, DelegationError::Validation(_)));
    }

    #[test]
    fn several_validation_failures_are_combined() {
        let schema = Schema::parse_and_validate("type Query { a: Int }", "schema.graphql").unwrap();
        let invalid = ExecutableDocument::parse_and_validate(&schema, "{ b c }", "query.graphql")
            .unwrap_err();

        match DelegationError::from_validation(&invalid.errors) {
            DelegationError::Combined(combined) => {
                assert_eq!(combined.errors.len(), 2);
                assert_eq!(combined.to_string().lines().count(), 2);
            }
            other => panic!("expected combined errors, got {other:?}"),
        }
    }
}
