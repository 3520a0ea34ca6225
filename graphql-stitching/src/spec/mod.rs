//! GraphQL schema and document helpers shared by the delegation pipeline.

mod fields;
mod input;
mod schema;

pub(crate) use fields::*;
pub(crate) use input::*;
pub(crate) use schema::*;

pub(crate) const TYPENAME: &str = "__typename";
