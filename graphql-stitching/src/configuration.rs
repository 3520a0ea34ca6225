//! Declarative merged type configuration.
//!
//! Everything a [`MergedTypeConfig`] holds except custom resolvers can be
//! written as YAML:
//!
//! ```yaml
//! subschemas:
//!   products:
//!     merge:
//!       User:
//!         selection_set: "{ id }"
//!         field_name: _userById
//!         key_arguments: { id: id }
//!         fields:
//!           reviewCount: { selection_set: "{ reviews }" }
//! ```

use std::collections::BTreeMap;

use apollo_compiler::Name;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;

use crate::error::DelegationError;
use crate::json_ext::Object;
use crate::stitching_info::SelectionSet;
use crate::subschema::MergedFieldConfig;
use crate::subschema::MergedTypeConfig;
use crate::subschema::Subschema;

/// The merge configuration of every subschema, by subschema name.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct StitchingConfiguration {
    /// Subschema configurations.
    pub subschemas: BTreeMap<String, SubschemaConfiguration>,
}

/// How one subschema takes part in type merging.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SubschemaConfiguration {
    /// Merged types, by type name.
    pub merge: BTreeMap<String, MergedTypeConfiguration>,
}

/// How one subschema resolves a merged type.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct MergedTypeConfiguration {
    /// Fields needed on the object before this subschema can resolve it, e.g. `{ id }`.
    pub selection_set: Option<String>,

    /// The root query field fetching the object.
    pub field_name: Option<String>,

    /// Arguments of the root query field, mapped to the response key of the
    /// object they are read from.
    pub key_arguments: BTreeMap<String, String>,

    /// Per-field requirements, by field name.
    pub fields: BTreeMap<String, MergedFieldConfiguration>,
}

/// Requirements of one field of a merged type.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct MergedFieldConfiguration {
    /// Fields of the parent object the field needs, e.g. `{ weight }`.
    pub selection_set: Option<String>,

    /// A fragment on the parent type added next to the field, e.g.
    /// `fragment UserId on User { id }`.
    pub fragment: Option<String>,
}

impl StitchingConfiguration {
    /// Parses a YAML configuration.
    pub fn from_yaml(source: &str) -> Result<Self, DelegationError> {
        serde_yaml::from_str(source).map_err(|err| DelegationError::Configuration(err.to_string()))
    }

    pub fn subschema(&self, name: &str) -> Option<&SubschemaConfiguration> {
        self.subschemas.get(name)
    }

    /// Applies the configuration of `subschema`, if there is one.
    pub fn apply(&self, subschema: Subschema) -> Result<Subschema, DelegationError> {
        match self.subschema(subschema.name()) {
            Some(configuration) => subschema.with_configuration(configuration),
            None => Ok(subschema),
        }
    }
}

impl MergedTypeConfiguration {
    /// Builds the merged type configuration. Root field arguments are read
    /// from the object being completed, one response key per argument.
    pub fn to_merged_type_config(&self) -> Result<MergedTypeConfig, DelegationError> {
        let mut config = MergedTypeConfig::new();
        if let Some(selection_set) = &self.selection_set {
            SelectionSet::parse(selection_set)?;
            config = config.with_selection_set(selection_set.clone());
        }
        if let Some(field_name) = &self.field_name {
            config = config.with_field_name(parse_name(field_name)?);
        }
        if !self.key_arguments.is_empty() {
            for argument in self.key_arguments.keys() {
                parse_name(argument)?;
            }
            let key_arguments = self.key_arguments.clone();
            config = config.with_args(move |object| {
                let mut args = Object::new();
                for (argument, key) in &key_arguments {
                    args.insert(ByteString::from(argument.as_str()), object.resolve(key).to_json());
                }
                args
            });
        }
        for (field_name, field) in &self.fields {
            let mut field_config = MergedFieldConfig::default();
            if let Some(selection_set) = &field.selection_set {
                SelectionSet::parse(selection_set)?;
                field_config = field_config.with_selection_set(selection_set.clone());
            }
            if let Some(fragment) = &field.fragment {
                field_config = field_config.with_fragment(fragment.clone());
            }
            config = config.with_field(parse_name(field_name)?, field_config);
        }
        Ok(config)
    }
}

impl Subschema {
    /// Adds the merged types of `configuration`.
    ///
    /// A type already merged by this subschema keeps its custom resolver.
    pub fn with_configuration(
        mut self,
        configuration: &SubschemaConfiguration,
    ) -> Result<Self, DelegationError> {
        for (type_name, merged_type) in &configuration.merge {
            let type_name = parse_name(type_name)?;
            let mut config = merged_type.to_merged_type_config()?;
            if let Some(existing) = self.merged_type(&type_name) {
                config.resolve = existing.resolve.clone();
            }
            self = self.with_merged_type(type_name, config);
        }
        Ok(self)
    }
}

fn parse_name(name: &str) -> Result<Name, DelegationError> {
    Name::new(name).map_err(|err| DelegationError::Configuration(err.to_string()))
}

/// Generates the JSON schema of [`StitchingConfiguration`].
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    settings
        .into_generator()
        .into_root_schema_for::<StitchingConfiguration>()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apollo_compiler::Schema;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;
    use crate::external::ExternalObject;
    use crate::external::ExternalValue;

    const CONFIGURATION: &str = r#"
subschemas:
  products:
    merge:
      User:
        selection_set: "{ id }"
        field_name: _userById
        key_arguments: { id: id }
        fields:
          reviewCount: { selection_set: "{ reviews }" }
"#;

    fn products() -> Subschema {
        let schema = Schema::parse_and_validate(
            "type Query { _userById(id: ID!): User } type User { id: ID! reviewCount: Int }",
            "products.graphql",
        )
        .unwrap();
        Subschema::new("products", Arc::new(schema))
    }

    #[test]
    fn parses_yaml() {
        let configuration = StitchingConfiguration::from_yaml(CONFIGURATION).unwrap();
        let user = &configuration.subschemas["products"].merge["User"];
        assert_eq!(user.selection_set.as_deref(), Some("{ id }"));
        assert_eq!(user.field_name.as_deref(), Some("_userById"));
        assert_eq!(user.key_arguments["id"], "id");
        assert_eq!(
            user.fields["reviewCount"],
            MergedFieldConfiguration {
                selection_set: Some("{ reviews }".to_owned()),
                fragment: None,
            }
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = StitchingConfiguration::from_yaml(
            "subschemas: { products: { merge: { User: { selectionSet: '{ id }' } } } }",
        )
        .unwrap_err();
        assert!(matches!(error, DelegationError::Configuration(_)));
    }

    #[test]
    fn key_arguments_are_read_from_the_original_object() {
        let configuration = StitchingConfiguration::from_yaml(CONFIGURATION).unwrap();
        let subschema = Arc::new(configuration.apply(products()).unwrap());
        let user = subschema.merged_type("User").unwrap();
        assert_eq!(user.field_name.as_ref().map(Name::as_str), Some("_userById"));
        assert!(user.fields.contains_key("reviewCount"));

        let mut original = ExternalObject::new(subschema.clone());
        original.insert("id", ExternalValue::Leaf(json!("1")));
        let args = (user.args.as_ref().unwrap())(&original);
        assert_eq!(serde_json_bytes::Value::Object(args), json!({ "id": "1" }));
    }

    #[test]
    fn invalid_selection_sets_are_configuration_errors() {
        let configuration = StitchingConfiguration::from_yaml(
            "subschemas: { products: { merge: { User: { selection_set: '{ id' } } } }",
        )
        .unwrap();
        let error = configuration.apply(products()).unwrap_err();
        assert!(matches!(error, DelegationError::Configuration(_)));
    }

    #[test]
    fn subschemas_without_configuration_are_unchanged() {
        let configuration = StitchingConfiguration::from_yaml(CONFIGURATION).unwrap();
        let schema = Schema::parse_and_validate("type Query { a: Int }", "a.graphql").unwrap();
        let subschema = configuration
            .apply(Subschema::new("accounts", Arc::new(schema)))
            .unwrap();
        assert!(subschema.merge().is_empty());
    }

    #[test]
    fn config_schema_denies_unknown_fields() {
        let schema = serde_json::to_value(generate_config_schema()).unwrap();
        assert_eq!(schema["additionalProperties"], serde_json::json!(false));
        assert!(schema["properties"]["subschemas"].is_object());
    }
}
