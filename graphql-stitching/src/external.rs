//! Values reconstructed from subschema results.
//!
//! A reconstructed value keeps, for every object, the errors that were reported
//! beneath it and the subschema it came from, so that field resolution can
//! surface errors at the right position and merged type resolution knows where
//! each field originated.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json_bytes::ByteString;

use crate::error::CombinedError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::spec::TYPENAME;
use crate::subschema::Subschema;

/// A value reconstructed from a subschema result.
#[derive(Clone, Debug)]
pub enum ExternalValue {
    Null,
    /// A scalar or enum value, or a value whose type is unknown.
    Leaf(Value),
    List(Vec<ExternalValue>),
    Object(ExternalObject),
    /// A position that is null because of errors; raised when the position is resolved.
    Error(ExternalError),
}

impl ExternalValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ExternalValue::Null)
    }

    pub fn as_object(&self) -> Option<&ExternalObject> {
        match self {
            ExternalValue::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<ExternalObject> {
        match self {
            ExternalValue::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The plain JSON data of this value. Positions holding errors become null.
    pub fn to_json(&self) -> Value {
        match self {
            ExternalValue::Null | ExternalValue::Error(_) => Value::Null,
            ExternalValue::Leaf(value) => value.clone(),
            ExternalValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            ExternalValue::Object(object) => Value::Object(object.to_json()),
        }
    }

    /// The errors held anywhere in this value, with paths relative to it.
    pub fn errors(&self) -> Vec<graphql::Error> {
        let mut errors = Vec::new();
        self.collect_errors(&Path::empty(), &mut errors);
        errors
    }

    fn collect_errors(&self, path: &Path, errors: &mut Vec<graphql::Error>) {
        match self {
            ExternalValue::Error(error) => errors.extend(
                error
                    .errors()
                    .iter()
                    .map(|error| error.with_path(Some(path.clone()))),
            ),
            ExternalValue::List(items) => {
                for (index, item) in items.iter().enumerate() {
                    item.collect_errors(&path.join(index), errors);
                }
            }
            ExternalValue::Object(object) => object.collect_errors(path, errors),
            ExternalValue::Null | ExternalValue::Leaf(_) => {}
        }
    }

    /// Deep merges `source` into this value. `source` wins, except that a null
    /// never replaces existing data.
    pub(crate) fn merge(&mut self, source: ExternalValue) {
        match (self, source) {
            (ExternalValue::Object(target), ExternalValue::Object(source)) => target.merge(source),
            (ExternalValue::List(target), ExternalValue::List(source))
                if target.len() == source.len() =>
            {
                for (target, source) in target.iter_mut().zip(source) {
                    target.merge(source);
                }
            }
            (_, ExternalValue::Null) => {}
            (target, source) => *target = source,
        }
    }
}

/// The error held at a position of a reconstructed result.
#[derive(Clone, Debug, PartialEq)]
pub enum ExternalError {
    /// A single error, relocated to the position holding it.
    Field(graphql::Error),
    /// Several errors reported for the same position.
    Combined(CombinedError),
}

impl ExternalError {
    pub fn errors(&self) -> Vec<graphql::Error> {
        match self {
            ExternalError::Field(error) => vec![error.clone()],
            ExternalError::Combined(combined) => combined.errors.clone(),
        }
    }
}

impl fmt::Display for ExternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalError::Field(error) => error.fmt(f),
            ExternalError::Combined(combined) => combined.fmt(f),
        }
    }
}

impl std::error::Error for ExternalError {}

/// An object reconstructed from a subschema result, annotated with the errors
/// reported beneath it and the subschema that produced it.
#[derive(Clone)]
pub struct ExternalObject {
    fields: IndexMap<String, ExternalValue>,
    errors: Vec<graphql::Error>,
    subschema: Arc<Subschema>,
    field_subschemas: HashMap<String, Arc<Subschema>>,
}

impl ExternalObject {
    pub fn new(subschema: Arc<Subschema>) -> Self {
        Self {
            fields: IndexMap::new(),
            errors: Vec::new(),
            subschema,
            field_subschemas: HashMap::new(),
        }
    }

    /// Sets the errors reported beneath this object, relative to it.
    pub fn with_errors(mut self, errors: Vec<graphql::Error>) -> Self {
        self.errors = errors;
        self
    }

    pub fn get(&self, key: &str) -> Option<&ExternalValue> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ExternalValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn fields(&self) -> &IndexMap<String, ExternalValue> {
        &self.fields
    }

    /// The errors reported beneath this object, with paths relative to it.
    pub fn annotated_errors(&self) -> &[graphql::Error] {
        &self.errors
    }

    /// The subschema this object was first fetched from.
    pub fn subschema(&self) -> &Arc<Subschema> {
        &self.subschema
    }

    /// The subschema the field under `key` came from.
    pub fn field_subschema(&self, key: &str) -> &Arc<Subschema> {
        self.field_subschemas.get(key).unwrap_or(&self.subschema)
    }

    /// The concrete type reported by the subschema, when `__typename` was selected.
    pub fn type_name(&self) -> Option<&str> {
        match self.fields.get(TYPENAME)? {
            ExternalValue::Leaf(Value::String(type_name)) => Some(type_name.as_str()),
            _ => None,
        }
    }

    /// Resolves the field under `response_key`.
    ///
    /// A present value is returned as is. A missing value resolves to the
    /// errors reported for that key, or to the errors reported for the object
    /// itself, or to null.
    pub fn resolve(&self, response_key: &str) -> ExternalValue {
        if let Some(value) = self.fields.get(response_key) {
            return value.clone();
        }
        let key_errors: Vec<_> = self
            .errors
            .iter()
            .filter(|error| error.first_segment().and_then(PathElement::as_key) == Some(response_key))
            .map(graphql::Error::relative_to_child)
            .collect();
        if !key_errors.is_empty() {
            return crate::results::handle_null(key_errors, &self.subschema);
        }
        let own_errors: Vec<_> = self
            .errors
            .iter()
            .filter(|error| error.first_segment().is_none())
            .cloned()
            .collect();
        crate::results::handle_null(own_errors, &self.subschema)
    }

    pub fn to_json(&self) -> Object {
        let mut object = Object::new();
        for (key, value) in &self.fields {
            object.insert(ByteString::from(key.as_str()), value.to_json());
        }
        object
    }

    fn collect_errors(&self, path: &Path, errors: &mut Vec<graphql::Error>) {
        for (key, value) in &self.fields {
            value.collect_errors(&path.join(key.as_str()), errors);
        }
        // errors that no field accounts for are reported where they point
        for error in &self.errors {
            let unaccounted = match error.first_segment().and_then(PathElement::as_key) {
                Some(key) => !self.fields.contains_key(key),
                None => true,
            };
            if unaccounted {
                let relative = error.path.clone().unwrap_or_default();
                errors.push(error.with_path(Some(path.concat(&relative))));
            }
        }
    }

    /// Deep merges the fields and errors of `source` into this object,
    /// recording that the merged fields came from the source's subschema.
    pub(crate) fn merge(&mut self, source: ExternalObject) {
        let ExternalObject {
            fields,
            errors,
            subschema,
            field_subschemas,
        } = source;
        for (key, value) in fields {
            let origin = field_subschemas
                .get(&key)
                .cloned()
                .unwrap_or_else(|| subschema.clone());
            self.field_subschemas.insert(key.clone(), origin);
            match self.fields.get_mut(&key) {
                Some(existing) => existing.merge(value),
                None => {
                    self.fields.insert(key, value);
                }
            }
        }
        self.errors.extend(errors);
    }

    pub(crate) fn extend_errors(&mut self, errors: impl IntoIterator<Item = graphql::Error>) {
        self.errors.extend(errors);
    }
}

impl fmt::Debug for ExternalObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalObject")
            .field("fields", &self.fields)
            .field("errors", &self.errors)
            .field("subschema", &self.subschema.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    fn subschema(name: &str) -> Arc<Subschema> {
        let schema = Schema::parse_and_validate("type Query { a: Int }", "schema.graphql").unwrap();
        Arc::new(Subschema::new(name, Arc::new(schema)))
    }

    fn leaf(value: Value) -> ExternalValue {
        ExternalValue::Leaf(value)
    }

    #[test]
    fn merging_records_field_origin() {
        let accounts = subschema("accounts");
        let products = subschema("products");
        let mut user = ExternalObject::new(accounts.clone());
        user.insert("id", leaf(json!("1")));
        user.insert("name", leaf(json!("Ann")));

        let mut reviews = ExternalObject::new(products.clone());
        reviews.insert("id", leaf(json!("1")));
        reviews.insert("reviews", ExternalValue::List(vec![leaf(json!("great"))]));
        user.merge(reviews);

        assert_eq!(
            Value::Object(user.to_json()),
            json!({ "id": "1", "name": "Ann", "reviews": ["great"] })
        );
        assert_eq!(user.field_subschema("name"), &accounts);
        assert_eq!(user.field_subschema("reviews"), &products);
        assert_eq!(user.subschema(), &accounts);
    }

    #[test]
    fn null_never_replaces_data() {
        let mut value = leaf(json!("Ann"));
        value.merge(ExternalValue::Null);
        assert_eq!(value.to_json(), json!("Ann"));
        value.merge(leaf(json!("Bob")));
        assert_eq!(value.to_json(), json!("Bob"));
    }

    #[test]
    fn resolving_a_missing_key_surfaces_its_errors() {
        let error = graphql::Error::builder()
            .message("reviews unavailable")
            .path(Path::from(vec!["reviews"]))
            .build();
        let object = ExternalObject::new(subschema("products")).with_errors(vec![error]);

        match object.resolve("reviews") {
            ExternalValue::Error(ExternalError::Field(error)) => {
                assert_eq!(error.message, "reviews unavailable");
                assert_eq!(error.path, None);
            }
            other => panic!("expected an error, got {other:?}"),
        }
        assert!(object.resolve("name").is_null());
    }

    #[test]
    fn errors_are_reported_at_their_position() {
        let mut object = ExternalObject::new(subschema("accounts"));
        object.insert(
            "friends",
            ExternalValue::List(vec![
                ExternalValue::Null,
                ExternalValue::Error(ExternalError::Field(
                    graphql::Error::builder().message("boom").build(),
                )),
            ]),
        );
        let errors = ExternalValue::Object(object).errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, Some(Path::from(vec![PathElement::from("friends"), PathElement::from(1usize)])));
    }
}
