//! # DynamoDB single-table mapper
//!
//! A schema-driven object mapper for DynamoDB single-table designs:
//! - Declarative schemas: typed fields, generated ids, value templates,
//!   nested structures, validation, unique constraints and attribute
//!   mapping, compiled once into a model registry
//! - Expression building: key conditions, filters, conditions, updates and
//!   projections with deduplicated placeholder tables
//! - Unique constraints emulated with transactional sentinel items
//! - Pagination in both directions, GSI "follow" resolution, batch and
//!   transaction accumulation with automatic retry
//! - Typed reads: dates, packed attributes, encrypted fields and nested
//!   blocks reconstructed into plain property maps
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use dynamo_mapper::schema::fields;
//! use dynamo_mapper::{
//!     item, FieldDef, IndexDef, Params, SchemaDef, SchemaParams, Table, TableParams,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dynamo_mapper::Error> {
//!     let schema = SchemaDef::new("0.0.1")
//!         .index("primary", IndexDef::new("pk", Some("sk")))
//!         .model(
//!             "User",
//!             fields([
//!                 ("pk", FieldDef::string().value("${_type}#${id}")),
//!                 ("sk", FieldDef::string().value("${_type}#")),
//!                 ("id", FieldDef::string().generate("ulid")),
//!                 ("name", FieldDef::string().required()),
//!                 ("email", FieldDef::string()),
//!             ]),
//!         )
//!         .params(SchemaParams::timestamps());
//!
//!     let client = dynamo_mapper::client::default_client().await;
//!     let table = Table::new(TableParams::new("MyTable", client).schema(schema))?;
//!
//!     let user = table
//!         .create(
//!             "User",
//!             item(json!({"name": "Alice", "email": "alice@example.com"})),
//!             &Params::new(),
//!         )
//!         .await?
//!         .expect("created item");
//!
//!     let found = table
//!         .find(
//!             "User",
//!             item(json!({"id": user["id"].as_str().unwrap()})),
//!             &Params::new(),
//!         )
//!         .await?;
//!     println!("found {} items", found.items.len());
//!     Ok(())
//! }
//! ```
#![deny(
    bad_style,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    while_true,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    deprecated,
    unreachable_code
)]

/// Backend client abstraction and the default AWS client constructor.
pub mod client;
/// Declarative schema types.
pub mod schema;
/// Identifier generation (`uuid`, `ulid`, `uid`).
pub mod uid;

mod crypto;
mod error;
mod expression;
mod model;
mod params;
mod registry;
mod table;
mod value;

pub use client::DynamoClient;
pub use crypto::CryptoParams;
pub use error::{Error, ErrorCode};
pub use expression::{Command, Operation};
pub use model::Model;
pub use params::{Exists, Params, PostFormat, ReturnValues, Stats};
pub use schema::{
    fields, FieldDef, FieldMap, FieldType, IndexDef, ModelDef, Projection, SchemaDef,
    SchemaParams, Timestamps,
};
pub use table::{
    Batch, BatchGetOutput, Monitor, OperationEvent, QueryResult, Table, TableParams,
    TransactGetOutput, Transaction, CONFIRM_DELETE_TABLE,
};
pub use value::{item, Item, Value};
