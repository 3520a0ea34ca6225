//! Types related to GraphQL requests, responses, etc.

use std::fmt;

use apollo_compiler::ast;
use apollo_compiler::response::GraphQLError as CompilerExecutionError;
use apollo_compiler::response::ResponseDataPathSegment;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
/// The error location
pub struct Location {
    /// The line number
    pub line: u32,
    /// The column number
    pub column: u32,
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as found in the `errors` field of a GraphQL [`Response`].
///
/// While a result is being reconstructed, `path` is relative to the value the
/// error is attached to rather than to the response root.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[non_exhaustive]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error in the GraphQL document of the originating request.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// If this is a field error, the JSON path to that field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// The optional GraphQL extensions for this error.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Error {
    /// Returns a builder that builds a GraphQL [`Error`] from its components.
    ///
    /// Builder methods:
    ///
    /// * `.message(impl Into<`[`String`]`>)`
    ///   Required.
    ///
    /// * `.location(impl Into<`[`Location`]`>)`
    ///   Optional, may be called multiple times.
    ///
    /// * `.path(impl Into<`[`Path`]`>)`
    ///   Optional.
    ///
    /// * `.extension(impl Into<`[`ByteString`]`>, impl Into<`[`Value`]`>)`
    ///   Optional, may be called multiple times.
    ///
    /// * `.extension_code(impl Into<`[`String`]`>)`
    ///   Optional.
    ///   Sets the "code" in the extension map unless it is already present.
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Path>,
        extension_code: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        mut extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        if let Some(code) = extension_code {
            extensions
                .entry("code")
                .or_insert(Value::String(ByteString::from(code)));
        }
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }

    /// Extract the error code from [`Error::extensions`] as a String if it is set.
    pub fn extension_code(&self) -> Option<String> {
        self.extensions.get("code").and_then(|c| match c {
            Value::String(s) => Some(s.as_str().to_owned()),
            Value::Number(n) => Some(n.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Bool(_) => None,
        })
    }

    /// Returns a copy of this error with its path replaced.
    pub fn with_path(&self, path: Option<Path>) -> Self {
        let mut error = self.clone();
        error.path = path;
        error
    }

    /// The first path segment, which names the child of the current value this
    /// error belongs to. `None` for errors addressing the current value itself.
    pub(crate) fn first_segment(&self) -> Option<&PathElement> {
        self.path.as_ref().and_then(Path::first)
    }

    /// Returns a copy of this error relative to the child named by the first path segment.
    pub(crate) fn relative_to_child(&self) -> Self {
        self.with_path(self.path.as_ref().map(Path::strip_first))
    }
}

/// Displays (only) the error message.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

impl From<CompilerExecutionError> for Error {
    fn from(error: CompilerExecutionError) -> Self {
        let CompilerExecutionError {
            message,
            locations,
            path,
            extensions,
        } = error;
        let locations = locations
            .into_iter()
            .map(|location| Location {
                line: location.line as u32,
                column: location.column as u32,
            })
            .collect::<Vec<_>>();
        let path = if !path.is_empty() {
            let elements = path
                .into_iter()
                .map(|element| match element {
                    ResponseDataPathSegment::Field(name) => {
                        PathElement::Key(name.as_str().to_owned())
                    }
                    ResponseDataPathSegment::ListIndex(i) => PathElement::Index(i),
                })
                .collect();
            Some(Path(elements))
        } else {
            None
        };
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }
}

/// A GraphQL request: a parsed document and the values of its variables.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub document: ast::Document,
    pub variables: Object,
}

impl Request {
    pub fn new(document: ast::Document, variables: Object) -> Self {
        Self {
            document,
            variables,
        }
    }

    /// Parses `query` into a request without validating it against any schema.
    pub fn parse(query: &str, variables: Object) -> Result<Self, crate::error::DelegationError> {
        let document = ast::Document::parse(query, "request.graphql").map_err(|invalid| {
            crate::error::DelegationError::InvalidRequest(invalid.errors.to_string())
        })?;
        Ok(Self::new(document, variables))
    }

    pub(crate) fn operations(&self) -> impl Iterator<Item = &ast::OperationDefinition> {
        self.document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::OperationDefinition(operation) => Some(&**operation),
                _ => None,
            })
    }

    pub(crate) fn fragments(&self) -> impl Iterator<Item = &ast::FragmentDefinition> {
        self.document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::FragmentDefinition(fragment) => Some(&**fragment),
                _ => None,
            })
    }
}

/// A GraphQL response as returned by a subschema executor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The errors encountered while executing the request.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional response extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

impl Response {
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn from_errors(errors: Vec<Error>) -> Self {
        Self {
            errors,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn builder_sets_extension_code() {
        let error = Error::builder()
            .message("boom")
            .path(Path::from(vec!["user"]))
            .extension_code("INTERNAL")
            .build();
        assert_eq!(error.extension_code().as_deref(), Some("INTERNAL"));
        assert_eq!(error.path, Some(Path::from(vec!["user"])));
    }

    #[test]
    fn relative_to_child_strips_the_first_segment() {
        let error = Error::builder()
            .message("boom")
            .path(Path::from(vec!["user", "name"]))
            .build();
        assert_eq!(
            error.first_segment(),
            Some(&PathElement::Key("user".to_owned()))
        );
        assert_eq!(error.relative_to_child().path, Some(Path::from(vec!["name"])));
    }

    #[test]
    fn response_deserializes_from_json() {
        let response: Response = serde_json_bytes::from_value(json!({
            "data": { "user": null },
            "errors": [{ "message": "not found", "path": ["user"] }]
        }))
        .unwrap();
        assert_eq!(response.data, Some(json!({ "user": null })));
        assert_eq!(response.errors[0].path, Some(Path::from(vec!["user"])));
    }
}
