//! In-memory subschemas for tests, benchmarks and local experimentation.
//!
//! A [`MockRoot`] resolves each root field with a closure over the field
//! arguments, returning JSON. Nested objects are resolved from that JSON:
//!
//! * `__typename` selects the concrete type of an object, which otherwise
//!   defaults to the field's declared type;
//! * an object of the form `{ "__error": "message" }` makes the field fail
//!   with that message.

use std::collections::HashMap;

use apollo_compiler::resolvers::FieldError;
use apollo_compiler::resolvers::ObjectValue;
use apollo_compiler::resolvers::ResolveInfo;
use apollo_compiler::resolvers::ResolvedValue;
use apollo_compiler::response::JsonMap;
use apollo_compiler::response::JsonValue;

type FieldResolver = Box<dyn Fn(&JsonMap) -> JsonValue + Send + Sync>;

/// A root value whose fields are computed from their arguments.
pub struct MockRoot {
    type_name: String,
    fields: HashMap<String, FieldResolver>,
}

impl MockRoot {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: HashMap::new(),
        }
    }

    /// Resolves `field_name` with `resolver`, which receives the coerced arguments.
    pub fn field(
        mut self,
        field_name: impl Into<String>,
        resolver: impl Fn(&JsonMap) -> JsonValue + Send + Sync + 'static,
    ) -> Self {
        self.fields.insert(field_name.into(), Box::new(resolver));
        self
    }
}

impl ObjectValue for MockRoot {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn resolve_field<'a>(
        &'a self,
        info: &'a ResolveInfo<'a>,
    ) -> Result<ResolvedValue<'a>, FieldError> {
        let field_name = info.field_name();
        let resolver = self.fields.get(field_name).ok_or_else(|| FieldError {
            message: format!("field '{field_name}' is not mocked"),
        })?;
        resolve_value(resolver(info.arguments()), info)
    }
}

struct MockObject {
    type_name: String,
    fields: JsonMap,
}

impl ObjectValue for MockObject {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn resolve_field<'a>(
        &'a self,
        info: &'a ResolveInfo<'a>,
    ) -> Result<ResolvedValue<'a>, FieldError> {
        match self.fields.get(info.field_name()) {
            Some(value) => resolve_value(value.clone(), info),
            None => Ok(ResolvedValue::leaf(JsonValue::Null)),
        }
    }
}

fn resolve_value<'a>(
    value: JsonValue,
    info: &'a ResolveInfo<'a>,
) -> Result<ResolvedValue<'a>, FieldError> {
    match value {
        JsonValue::Object(fields) => {
            if let Some(message) = fields.get("__error") {
                return Err(FieldError {
                    message: message.as_str().unwrap_or("mocked error").to_owned(),
                });
            }
            let type_name = fields
                .get("__typename")
                .and_then(|type_name| type_name.as_str())
                .map(str::to_owned)
                .unwrap_or_else(|| info.field_definition().ty.inner_named_type().to_string());
            Ok(ResolvedValue::object(MockObject { type_name, fields }))
        }
        JsonValue::Array(items) => Ok(ResolvedValue::List(Box::new(
            items.into_iter().map(move |item| resolve_value(item, info)),
        ))),
        leaf => Ok(ResolvedValue::leaf(leaf)),
    }
}
