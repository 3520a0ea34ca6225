use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::name;
use apollo_compiler::response::JsonValue;
use graphql_stitching::DelegateToSchema;
use graphql_stitching::ExternalObject;
use graphql_stitching::ExternalValue;
use graphql_stitching::FieldInfo;
use graphql_stitching::MergedTypeConfig;
use graphql_stitching::OperationInfo;
use graphql_stitching::StitchingConfiguration;
use graphql_stitching::StitchingInfo;
use graphql_stitching::Subschema;
use graphql_stitching::delegate_to_schema;
use graphql_stitching::json_ext::Object;
use graphql_stitching::test_harness::MockRoot;
use pretty_assertions::assert_eq;
use serde_json_bytes::ByteString;
use serde_json_bytes::json;

const GATEWAY: &str = r#"
    type Query { user(id: ID!): User }
    type User { id: ID! name: String reviews: [String] }
"#;

const ACCOUNTS: &str = r#"
    type Query { user(id: ID!): User }
    type User { id: ID! name: String }
"#;

const PRODUCTS: &str = r#"
    type Query { _userById(id: ID!): User }
    type User { id: ID! reviews: [String] }
"#;

const PRODUCTS_CONFIGURATION: &str = r#"
subschemas:
  products:
    merge:
      User:
        selection_set: "{ id }"
        field_name: _userById
        key_arguments: { id: id }
"#;

fn schema(sdl: &str, path: &str) -> Arc<apollo_compiler::validation::Valid<Schema>> {
    Arc::new(Schema::parse_and_validate(sdl, path).unwrap())
}

fn accounts() -> Subschema {
    Subschema::new("accounts", schema(ACCOUNTS, "accounts.graphql"))
        .with_root_value(MockRoot::new("Query").field("user", |args| {
            json!({ "id": args.get("id").cloned().unwrap_or(JsonValue::Null), "name": "Ann" })
        }))
        .with_merged_type(
            name!("User"),
            MergedTypeConfig::new()
                .with_selection_set("{ id }")
                .with_field_name(name!("user"))
                .with_args(|object: &ExternalObject| {
                    let mut args = Object::new();
                    args.insert(ByteString::from("id"), object.resolve("id").to_json());
                    args
                }),
        )
}

fn products(reviews: JsonValue) -> Subschema {
    let configuration = StitchingConfiguration::from_yaml(PRODUCTS_CONFIGURATION).unwrap();
    let subschema = Subschema::new("products", schema(PRODUCTS, "products.graphql"))
        .with_root_value(MockRoot::new("Query").field("_userById", move |args| {
            if args.get("id") == Some(&json!("1")) {
                reviews.clone()
            } else {
                JsonValue::Null
            }
        }));
    configuration.apply(subschema).unwrap()
}

async fn resolve_user(products: Subschema) -> ExternalObject {
    let accounts = Arc::new(accounts());
    let products = Arc::new(products);
    let stitching_info = StitchingInfo::new(&[accounts.clone(), products]).unwrap();

    let document =
        ast::Document::parse(r#"{ user(id: "1") { name reviews } }"#, "query.graphql").unwrap();
    let operation = OperationInfo::new(schema(GATEWAY, "gateway.graphql"), &document, None, Object::new())
        .unwrap()
        .with_stitching_info(Arc::new(stitching_info));
    let info = FieldInfo::root(Arc::new(operation), "user").unwrap();

    delegate_to_schema(
        DelegateToSchema::builder()
            .subschema(accounts)
            .info(info)
            .build(),
    )
    .await
    .unwrap()
    .into_value()
    .unwrap()
    .into_object()
    .unwrap()
}

#[tokio::test]
async fn merged_fields_are_fetched_from_other_subschemas() {
    let user = resolve_user(products(json!({ "id": "1", "reviews": ["great"] }))).await;

    assert_eq!(user.resolve("name").to_json(), json!("Ann"));
    assert_eq!(user.resolve("reviews").to_json(), json!(["great"]));
    assert_eq!(user.field_subschema("name").name(), "accounts");
    assert_eq!(user.field_subschema("reviews").name(), "products");
    assert!(user.annotated_errors().is_empty());
}

#[tokio::test]
async fn merged_type_errors_surface_on_the_missing_fields() {
    let user = resolve_user(products(json!({ "__error": "products are down" }))).await;

    assert_eq!(user.resolve("name").to_json(), json!("Ann"));
    match user.resolve("reviews") {
        ExternalValue::Error(error) => {
            let messages: Vec<_> = error.errors().into_iter().map(|error| error.message).collect();
            assert!(messages.iter().any(|message| message.contains("products are down")));
        }
        other => panic!("expected an error, got {other:?}"),
    }
}

#[tokio::test]
async fn unmatched_keys_resolve_to_null() {
    let user = resolve_user(products(JsonValue::Null)).await;

    assert_eq!(user.resolve("name").to_json(), json!("Ann"));
    assert_eq!(user.resolve("reviews").to_json(), JsonValue::Null);
}
