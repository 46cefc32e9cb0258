//! The table façade: owns the backend client, the compiled schema snapshot,
//! the context map and the crypto keyring, and dispatches built commands.

mod batch;
mod ops;
mod prepare;

pub use batch::{Batch, BatchGetOutput, TransactGetOutput, Transaction};
pub use ops::QueryResult;

use crate::client::DynamoClient;
use crate::crypto::{Crypto, CryptoParams};
use crate::error::Error;
use crate::expression::{Command, Operation};
use crate::model::{Model, TableDefaults};
use crate::params::Params;
use crate::registry::{self, Registry};
use crate::schema::{FieldMap, FieldType, IndexDef, SchemaDef};
use crate::value::{from_attribute_map, Item, Value};
use aws_sdk_dynamodb::operation::create_table::CreateTableInput;
use aws_sdk_dynamodb::operation::delete_item::DeleteItemInput;
use aws_sdk_dynamodb::operation::delete_table::DeleteTableInput;
use aws_sdk_dynamodb::operation::describe_table::DescribeTableInput;
use aws_sdk_dynamodb::operation::get_item::GetItemInput;
use aws_sdk_dynamodb::operation::list_tables::ListTablesInput;
use aws_sdk_dynamodb::operation::put_item::PutItemInput;
use aws_sdk_dynamodb::operation::query::QueryInput;
use aws_sdk_dynamodb::operation::scan::ScanInput;
use aws_sdk_dynamodb::operation::update_item::UpdateItemInput;
use aws_sdk_dynamodb::operation::update_time_to_live::UpdateTimeToLiveInput;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, GlobalSecondaryIndex, KeySchemaElement, KeyType,
    LocalSecondaryIndex, Projection as DynamoProjection, ProjectionType, ReturnConsumedCapacity,
    ReturnValue, ScalarAttributeType, Select, TableDescription, TimeToLiveSpecification,
};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Confirmation string required by [`Table::delete_table`].
pub const CONFIRM_DELETE_TABLE: &str = "DeleteTableForever";

/// Observation hook invoked after every backend call.
pub trait Monitor: Send + Sync {
    /// Called once per backend operation with its outcome summary.
    fn observe(&self, event: &OperationEvent<'_>);
}

/// Summary of one backend operation, delivered to a [`Monitor`].
#[derive(Debug)]
pub struct OperationEvent<'a> {
    /// Model the operation ran against.
    pub model: &'a str,
    /// Operation name (`put`, `find`, ...).
    pub op: &'a str,
    /// Wall-clock duration of the backend call.
    pub elapsed: Duration,
    /// Item count reported by the backend.
    pub count: i64,
    /// Consumed capacity units, when reported.
    pub capacity: f64,
}

/// Table configuration, built fluently and passed to [`Table::new`].
#[derive(Clone)]
pub struct TableParams {
    pub(crate) name: String,
    pub(crate) client: Arc<dyn DynamoClient>,
    pub(crate) schema: Option<SchemaDef>,
    pub(crate) hidden: bool,
    pub(crate) partial: bool,
    pub(crate) warn: bool,
    pub(crate) crypto: Option<CryptoParams>,
    pub(crate) context: Item,
    pub(crate) monitor: Option<Arc<dyn Monitor>>,
}

impl TableParams {
    /// Configuration for the named table using the given client.
    pub fn new(name: &str, client: Arc<dyn DynamoClient>) -> Self {
        TableParams {
            name: name.to_string(),
            client,
            schema: None,
            hidden: false,
            partial: false,
            warn: false,
            crypto: None,
            context: Item::new(),
            monitor: None,
        }
    }

    /// Declare the schema at construction time.
    pub fn schema(mut self, schema: SchemaDef) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Return hidden fields by default.
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// Default nested objects and arrays to partial update semantics.
    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    /// Log a warning when stored items are missing required fields.
    pub fn warn(mut self, warn: bool) -> Self {
        self.warn = warn;
        self
    }

    /// Configure field-level encryption.
    pub fn crypto(mut self, crypto: CryptoParams) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// Seed the table-level context map.
    pub fn context(mut self, context: Item) -> Self {
        self.context = context;
        self
    }

    /// Attach an operation monitor.
    pub fn monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

/// A single-table mapper over one DynamoDB table.
///
/// A `Table` is cheap to share (`&Table` across tasks); each in-flight
/// operation works on its own prepared record and expression state. The
/// compiled schema snapshot is replaced atomically by the schema mutation
/// APIs, which must not race in-flight operations.
pub struct Table {
    name: String,
    client: Arc<dyn DynamoClient>,
    registry: RwLock<Option<Arc<Registry>>>,
    context: RwLock<Item>,
    crypto: Option<Crypto>,
    pub(crate) base_defaults: TableDefaults,
    monitor: Option<Arc<dyn Monitor>>,
}

impl Table {
    /// Create a table mapper. The schema, when supplied, is compiled
    /// immediately; schema errors are argument errors.
    pub fn new(params: TableParams) -> Result<Table, Error> {
        if params.name.is_empty() {
            return Err(Error::argument("missing table name"));
        }
        let base_defaults = TableDefaults {
            partial: params.partial,
            hidden: params.hidden,
            warn: params.warn,
            ..TableDefaults::default()
        };
        let registry = params
            .schema
            .map(|schema| Registry::compile(schema, &base_defaults).map(Arc::new))
            .transpose()?;
        debug!(table = %params.name, "loading table");
        Ok(Table {
            name: params.name,
            client: params.client,
            registry: RwLock::new(registry),
            context: RwLock::new(params.context),
            crypto: params.crypto.as_ref().map(Crypto::new),
            base_defaults,
            monitor: params.monitor,
        })
    }

    /// The physical table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn registry(&self) -> Result<Arc<Registry>, Error> {
        self.registry
            .read()
            .expect("registry lock")
            .clone()
            .ok_or_else(|| {
                Error::argument("table has no schema; call set_schema or get_keys first")
            })
    }

    fn install_registry(&self, registry: Registry) {
        *self.registry.write().expect("registry lock") = Some(Arc::new(registry));
    }

    // ─── Schema API ─────────────────────────────────────────────────────

    /// Replace the active schema, returning the compiled index map.
    pub fn set_schema(&self, schema: SchemaDef) -> Result<IndexMap<String, IndexDef>, Error> {
        let registry = Registry::compile(schema, &self.base_defaults)?;
        let indexes = (*registry.indexes).clone();
        self.install_registry(registry);
        Ok(indexes)
    }

    /// The currently active schema with its resolved parameters.
    pub fn get_current_schema(&self) -> Option<SchemaDef> {
        let registry = self.registry().ok()?;
        let mut schema = registry.definition.clone()?;
        schema.params = Some(registry::current_params(&registry.defaults));
        Some(schema)
    }

    /// Fetch a compiled model by name.
    pub fn get_model(&self, name: &str) -> Result<Arc<Model>, Error> {
        self.registry()?.get_model(name)
    }

    /// Add (or replace) a model at runtime.
    pub fn add_model(&self, name: &str, fields: FieldMap) -> Result<(), Error> {
        let next = self.registry()?.with_model(name, fields)?;
        self.install_registry(next);
        Ok(())
    }

    /// Remove a model from the registry.
    pub fn remove_model(&self, name: &str) -> Result<(), Error> {
        let next = self.registry()?.without_model(name)?;
        self.install_registry(next);
        Ok(())
    }

    /// Names of all registered models.
    pub fn list_models(&self) -> Vec<String> {
        self.registry()
            .map(|r| r.list_models())
            .unwrap_or_default()
    }

    // ─── Context ────────────────────────────────────────────────────────

    /// Replace the table context, or merge into it.
    pub fn set_context(&self, context: Item, merge: bool) {
        let mut current = self.context.write().expect("context lock");
        if merge {
            for (k, v) in context {
                current.insert(k, v);
            }
        } else {
            *current = context;
        }
    }

    /// Merge values into the table context.
    pub fn add_context(&self, context: Item) {
        self.set_context(context, true);
    }

    /// A copy of the current table context.
    pub fn get_context(&self) -> Item {
        self.context.read().expect("context lock").clone()
    }

    /// Clear the table context.
    pub fn clear_context(&self) {
        *self.context.write().expect("context lock") = Item::new();
    }

    // ─── Grouping ───────────────────────────────────────────────────────

    /// Split a heterogeneous item list by type marker. Items without a
    /// marker group under `_unknown`. With `hidden(false)` the schema's
    /// hidden fields are stripped from each item.
    pub fn group_by_type(&self, items: &[Item], params: &Params) -> IndexMap<String, Vec<Item>> {
        let registry = self.registry().ok();
        let type_field = registry
            .as_ref()
            .map(|r| r.defaults.type_field.clone())
            .unwrap_or_else(|| self.base_defaults.type_field.clone());
        let mut groups: IndexMap<String, Vec<Item>> = IndexMap::new();
        for item in items {
            let type_name = item
                .get(&type_field)
                .and_then(Value::as_str)
                .unwrap_or("_unknown")
                .to_string();
            let model = registry.as_ref().and_then(|r| r.model_for_type(&type_name));
            let prepared = if params.hidden == Some(false) {
                if let Some(model) = &model {
                    item.iter()
                        .filter(|(name, _)| {
                            model
                                .block
                                .fields
                                .get(name.as_str())
                                .map_or(true, |f| !f.hidden)
                        })
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                } else {
                    item.clone()
                }
            } else {
                item.clone()
            };
            groups.entry(type_name).or_default().push(prepared);
        }
        groups
    }

    // ─── Crypto ─────────────────────────────────────────────────────────

    pub(crate) fn encrypt(&self, text: &str) -> Result<String, Error> {
        match &self.crypto {
            Some(crypto) => crypto.encrypt(text),
            None => Err(Error::argument("no crypto configuration defined")),
        }
    }

    pub(crate) fn decrypt(&self, text: &str) -> Result<String, Error> {
        match &self.crypto {
            Some(crypto) => crypto.decrypt(text),
            None => Err(Error::argument("no crypto configuration defined")),
        }
    }

    // ─── Identifier service ─────────────────────────────────────────────

    /// A random v4 UUID.
    pub fn uuid(&self) -> String {
        crate::uid::uuid()
    }

    /// A time-sortable ULID.
    pub fn ulid(&self) -> String {
        crate::uid::ulid()
    }

    /// A Crockford base-32 random id of the given length.
    pub fn uid(&self, size: usize) -> String {
        crate::uid::uid(size)
    }

    // ─── DDL ────────────────────────────────────────────────────────────

    /// Create the physical table from the schema's index definitions
    /// (billing mode pay-per-request).
    pub async fn create_table(&self) -> Result<(), Error> {
        let registry = self.registry()?;
        let mut attributes: Vec<AttributeDefinition> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        let mut key_schema: Vec<KeySchemaElement> = Vec::new();
        let mut gsis: Vec<GlobalSecondaryIndex> = Vec::new();
        let mut lsis: Vec<LocalSecondaryIndex> = Vec::new();

        for (name, index) in registry.indexes.iter() {
            let mut keys: Vec<KeySchemaElement> = Vec::new();
            for (attr, key_type) in [
                (index.hash.as_deref(), KeyType::Hash),
                (index.sort.as_deref(), KeyType::Range),
            ] {
                let Some(attr) = attr else { continue };
                keys.push(
                    KeySchemaElement::builder()
                        .attribute_name(attr)
                        .key_type(key_type)
                        .build()?,
                );
                if !seen.contains(&attr.to_string()) {
                    seen.push(attr.to_string());
                    attributes.push(
                        AttributeDefinition::builder()
                            .attribute_name(attr)
                            .attribute_type(self.attribute_key_type(&registry, attr))
                            .build()?,
                    );
                }
            }

            if name == "primary" {
                key_schema = keys;
                continue;
            }

            let projection = self.index_projection(index);
            if index.kind.as_deref() == Some("local") {
                lsis.push(
                    LocalSecondaryIndex::builder()
                        .index_name(name)
                        .set_key_schema(Some(keys))
                        .projection(projection)
                        .build()?,
                );
            } else {
                gsis.push(
                    GlobalSecondaryIndex::builder()
                        .index_name(name)
                        .set_key_schema(Some(keys))
                        .projection(projection)
                        .build()?,
                );
            }
        }

        let input = CreateTableInput::builder()
            .table_name(&self.name)
            .set_attribute_definitions(Some(attributes))
            .set_key_schema(Some(key_schema))
            .billing_mode(BillingMode::PayPerRequest)
            .set_global_secondary_indexes((!gsis.is_empty()).then_some(gsis))
            .set_local_secondary_indexes((!lsis.is_empty()).then_some(lsis))
            .build()?;
        let _ = self.client.create_table(input).await?;
        Ok(())
    }

    fn index_projection(&self, index: &IndexDef) -> DynamoProjection {
        use crate::schema::Projection as SchemaProjection;
        let builder = DynamoProjection::builder();
        match index.project.as_ref() {
            Some(SchemaProjection::Keys) => builder.projection_type(ProjectionType::KeysOnly),
            Some(SchemaProjection::Include(fields)) => builder
                .projection_type(ProjectionType::Include)
                .set_non_key_attributes(Some(fields.clone())),
            Some(SchemaProjection::All) | None => builder.projection_type(ProjectionType::All),
        }
        .build()
    }

    fn attribute_key_type(&self, registry: &Registry, attribute: &str) -> ScalarAttributeType {
        for model in registry.models.values() {
            if let Some(field) = model.field_for_attribute(attribute) {
                if field.field_type == FieldType::Number {
                    return ScalarAttributeType::N;
                }
                return ScalarAttributeType::S;
            }
        }
        ScalarAttributeType::S
    }

    /// Permanently delete the physical table. Requires the literal
    /// confirmation [`CONFIRM_DELETE_TABLE`].
    pub async fn delete_table(&self, confirmation: &str) -> Result<(), Error> {
        if confirmation != CONFIRM_DELETE_TABLE {
            return Err(Error::argument(format!(
                "missing required confirmation \"{}\"",
                CONFIRM_DELETE_TABLE
            )));
        }
        let input = DeleteTableInput::builder().table_name(&self.name).build()?;
        let _ = self.client.delete_table(input).await?;
        Ok(())
    }

    /// The backend's description of this table, if it exists.
    pub async fn describe_table(&self) -> Result<Option<TableDescription>, Error> {
        let input = DescribeTableInput::builder().table_name(&self.name).build()?;
        Ok(self.client.describe_table(input).await?.table)
    }

    /// All table names visible to the client.
    pub async fn list_tables(&self) -> Result<Vec<String>, Error> {
        let input = ListTablesInput::builder().build()?;
        Ok(self
            .client
            .list_tables(input)
            .await?
            .table_names
            .unwrap_or_default())
    }

    /// True when the physical table exists.
    pub async fn exists(&self) -> Result<bool, Error> {
        Ok(self.list_tables().await?.iter().any(|n| n == &self.name))
    }

    /// Enable or disable TTL expiry on an attribute.
    pub async fn update_ttl(&self, attribute: &str, enabled: bool) -> Result<(), Error> {
        let spec = TimeToLiveSpecification::builder()
            .attribute_name(attribute)
            .enabled(enabled)
            .build()?;
        let input = UpdateTimeToLiveInput::builder()
            .table_name(&self.name)
            .time_to_live_specification(spec)
            .build()?;
        let _ = self.client.update_time_to_live(input).await?;
        Ok(())
    }

    /// Discover the index map from the table description when no schema was
    /// supplied, and install a snapshot with the standard models.
    pub async fn get_keys(&self) -> Result<IndexMap<String, IndexDef>, Error> {
        if let Ok(registry) = self.registry() {
            return Ok((*registry.indexes).clone());
        }
        let description = self
            .describe_table()
            .await?
            .ok_or_else(|| Error::backend("table description unavailable"))?;

        let mut key_types: HashMap<String, FieldType> = HashMap::new();
        for def in description.attribute_definitions() {
            let field_type = match def.attribute_type() {
                ScalarAttributeType::N => FieldType::Number,
                _ => FieldType::String,
            };
            key_types.insert(def.attribute_name().to_string(), field_type);
        }

        let read_keys = |schema: &[KeySchemaElement]| {
            let mut index = IndexDef::default();
            for element in schema {
                match element.key_type() {
                    KeyType::Hash => index.hash = Some(element.attribute_name().to_string()),
                    _ => index.sort = Some(element.attribute_name().to_string()),
                }
            }
            index
        };

        let mut indexes: IndexMap<String, IndexDef> = IndexMap::new();
        indexes.insert("primary".to_string(), read_keys(description.key_schema()));
        for gsi in description.global_secondary_indexes() {
            if let Some(name) = gsi.index_name() {
                indexes.insert(name.to_string(), read_keys(gsi.key_schema()));
            }
        }
        for lsi in description.local_secondary_indexes() {
            if let Some(name) = lsi.index_name() {
                let mut index = read_keys(lsi.key_schema());
                index.kind = Some("local".to_string());
                indexes.insert(name.to_string(), index);
            }
        }

        let registry = Registry::from_indexes(indexes.clone(), key_types, &self.base_defaults)?;
        self.install_registry(registry);
        Ok(indexes)
    }

    // ─── Schema persistence ─────────────────────────────────────────────

    /// Persist the schema into the table through the `_Schema` model.
    pub async fn save_schema(&self, schema: Option<SchemaDef>) -> Result<(), Error> {
        let mut schema = match schema.or_else(|| self.get_current_schema()) {
            Some(schema) => schema,
            None => return Err(Error::argument("no schema to save")),
        };
        if schema.name.is_none() {
            schema.name = Some("Current".to_string());
        }
        if schema.version.is_empty() {
            schema.version = "0.0.1".to_string();
        }
        schema.format = Some(registry::SCHEMA_FORMAT.to_string());

        let json = serde_json::to_value(&schema)
            .map_err(|e| Error::backend(format!("schema serialization failed: {}", e)))?;
        let mut properties = crate::value::item(json);
        if !properties.contains_key("params") {
            properties.insert("params".to_string(), Value::Map(Item::new()));
        }
        let _ = self
            .create(
                registry::SCHEMA_MODEL,
                properties,
                &Params::new().exists(crate::params::Exists::DontCare),
            )
            .await?;
        Ok(())
    }

    /// Read the persisted schema back from the table.
    pub async fn read_schema(&self) -> Result<Option<SchemaDef>, Error> {
        let mut properties = Item::new();
        properties.insert("name".to_string(), Value::from("Current"));
        let item = self
            .get(
                registry::SCHEMA_MODEL,
                properties,
                &Params::new().hidden(true),
            )
            .await?;
        let Some(item) = item else {
            return Ok(None);
        };
        let json: serde_json::Value = Value::Map(item).into();
        serde_json::from_value(json)
            .map(Some)
            .map_err(|e| Error::backend(format!("stored schema is malformed: {}", e)))
    }

    // ─── Execution ──────────────────────────────────────────────────────

    /// Dispatch a built command through the backend client, normalising the
    /// response and classifying backend failures.
    pub(crate) async fn execute(
        &self,
        model_name: &str,
        cmd: &Command,
        params: &Params,
    ) -> Result<ExecuteOutput, Error> {
        let client = params.client.clone().unwrap_or_else(|| self.client.clone());
        let op = cmd.op;
        let start = Instant::now();
        info!(table = %cmd.table_name, model = model_name, op = %op, "execute");

        let output = match op {
            Operation::Get => {
                let out = client
                    .get_item(build_get_input(cmd)?)
                    .await
                    .map_err(|e| classify(op, model_name, e))?;
                ExecuteOutput {
                    item: out.item.map(from_attribute_map).transpose()?,
                    ..ExecuteOutput::default()
                }
            }
            Operation::Put => {
                let out = client
                    .put_item(build_put_input(cmd)?)
                    .await
                    .map_err(|e| classify(op, model_name, e))?;
                ExecuteOutput {
                    attributes: out.attributes.map(from_attribute_map).transpose()?,
                    ..ExecuteOutput::default()
                }
            }
            Operation::Delete => {
                let out = client
                    .delete_item(build_delete_input(cmd)?)
                    .await
                    .map_err(|e| classify(op, model_name, e))?;
                ExecuteOutput {
                    attributes: out.attributes.map(from_attribute_map).transpose()?,
                    ..ExecuteOutput::default()
                }
            }
            Operation::Update => {
                let out = client
                    .update_item(build_update_input(cmd)?)
                    .await
                    .map_err(|e| classify(op, model_name, e))?;
                ExecuteOutput {
                    attributes: out.attributes.map(from_attribute_map).transpose()?,
                    ..ExecuteOutput::default()
                }
            }
            Operation::Find => {
                let out = client
                    .query(build_query_input(cmd)?)
                    .await
                    .map_err(|e| classify(op, model_name, e))?;
                let mut items = Vec::new();
                for raw in out.items.unwrap_or_default() {
                    items.push(from_attribute_map(raw)?);
                }
                ExecuteOutput {
                    items,
                    count: i64::from(out.count),
                    scanned: i64::from(out.scanned_count),
                    last_evaluated_key: out
                        .last_evaluated_key
                        .map(from_attribute_map)
                        .transpose()?,
                    capacity: out
                        .consumed_capacity
                        .and_then(|c| c.capacity_units)
                        .unwrap_or_default(),
                    ..ExecuteOutput::default()
                }
            }
            Operation::Scan => {
                let out = client
                    .scan(build_scan_input(cmd)?)
                    .await
                    .map_err(|e| classify(op, model_name, e))?;
                let mut items = Vec::new();
                for raw in out.items.unwrap_or_default() {
                    items.push(from_attribute_map(raw)?);
                }
                ExecuteOutput {
                    items,
                    count: i64::from(out.count),
                    scanned: i64::from(out.scanned_count),
                    last_evaluated_key: out
                        .last_evaluated_key
                        .map(from_attribute_map)
                        .transpose()?,
                    capacity: out
                        .consumed_capacity
                        .and_then(|c| c.capacity_units)
                        .unwrap_or_default(),
                    ..ExecuteOutput::default()
                }
            }
            Operation::Check | Operation::Init => {
                return Err(Error::argument(format!(
                    "operation \"{}\" cannot be executed directly",
                    op
                )));
            }
        };

        if let Some(monitor) = &self.monitor {
            monitor.observe(&OperationEvent {
                model: model_name,
                op: op.as_str(),
                elapsed: start.elapsed(),
                count: output.count,
                capacity: output.capacity,
            });
        }
        Ok(output)
    }

    pub(crate) fn client_for(&self, params: &Params) -> Arc<dyn DynamoClient> {
        params.client.clone().unwrap_or_else(|| self.client.clone())
    }
}

/// Normalised backend response.
#[derive(Debug, Default)]
pub(crate) struct ExecuteOutput {
    pub item: Option<Item>,
    pub attributes: Option<Item>,
    pub items: Vec<Item>,
    pub count: i64,
    pub scanned: i64,
    pub last_evaluated_key: Option<Item>,
    pub capacity: f64,
}

/// Reshape a backend failure, preserving the original message so callers can
/// classify conditional failures and throughput exhaustion.
pub(crate) fn classify(op: Operation, model: &str, err: Error) -> Error {
    let msg = err.message();
    if msg.contains("ConditionalCheckFailed") && op == Operation::Put {
        return Error::backend(format!(
            "conditional create failed for \"{}\": {}",
            model, msg
        ));
    }
    if msg.contains("ProvisionedThroughputExceeded") {
        return Error::backend(format!("provisioned throughput exceeded: {}", msg));
    }
    if msg.contains("TransactionCanceled") {
        return Error::backend(format!("Transaction Cancelled: {}", msg));
    }
    Error::backend(format!("{} failed for \"{}\": {}", op, model, msg))
}

fn build_get_input(cmd: &Command) -> Result<GetItemInput, Error> {
    GetItemInput::builder()
        .table_name(&cmd.table_name)
        .set_key(cmd.key.clone())
        .set_consistent_read(cmd.consistent_read)
        .set_projection_expression(cmd.projection_expression.clone())
        .set_expression_attribute_names(cmd.names.clone())
        .build()
        .map_err(Error::from)
}

fn build_put_input(cmd: &Command) -> Result<PutItemInput, Error> {
    PutItemInput::builder()
        .table_name(&cmd.table_name)
        .set_item(cmd.item.clone())
        .set_condition_expression(cmd.condition_expression.clone())
        .set_expression_attribute_names(cmd.names.clone())
        .set_expression_attribute_values(cmd.values.clone())
        .set_return_values(cmd.return_values.as_deref().map(ReturnValue::from))
        .build()
        .map_err(Error::from)
}

fn build_delete_input(cmd: &Command) -> Result<DeleteItemInput, Error> {
    DeleteItemInput::builder()
        .table_name(&cmd.table_name)
        .set_key(cmd.key.clone())
        .set_condition_expression(cmd.condition_expression.clone())
        .set_expression_attribute_names(cmd.names.clone())
        .set_expression_attribute_values(cmd.values.clone())
        .set_return_values(cmd.return_values.as_deref().map(ReturnValue::from))
        .build()
        .map_err(Error::from)
}

fn build_update_input(cmd: &Command) -> Result<UpdateItemInput, Error> {
    UpdateItemInput::builder()
        .table_name(&cmd.table_name)
        .set_key(cmd.key.clone())
        .set_update_expression(cmd.update_expression.clone())
        .set_condition_expression(cmd.condition_expression.clone())
        .set_expression_attribute_names(cmd.names.clone())
        .set_expression_attribute_values(cmd.values.clone())
        .set_return_values(cmd.return_values.as_deref().map(ReturnValue::from))
        .build()
        .map_err(Error::from)
}

fn build_query_input(cmd: &Command) -> Result<QueryInput, Error> {
    QueryInput::builder()
        .table_name(&cmd.table_name)
        .set_index_name(cmd.index_name.clone())
        .set_key_condition_expression(cmd.key_condition_expression.clone())
        .set_filter_expression(cmd.filter_expression.clone())
        .set_projection_expression(cmd.projection_expression.clone())
        .set_expression_attribute_names(cmd.names.clone())
        .set_expression_attribute_values(cmd.values.clone())
        .set_limit(cmd.limit)
        .set_consistent_read(cmd.consistent_read)
        .set_scan_index_forward(cmd.scan_index_forward)
        .set_exclusive_start_key(cmd.exclusive_start_key.clone())
        .set_select(cmd.select.as_deref().map(Select::from))
        .set_return_consumed_capacity(
            cmd.return_consumed_capacity
                .as_deref()
                .map(ReturnConsumedCapacity::from),
        )
        .build()
        .map_err(Error::from)
}

fn build_scan_input(cmd: &Command) -> Result<ScanInput, Error> {
    ScanInput::builder()
        .table_name(&cmd.table_name)
        .set_index_name(cmd.index_name.clone())
        .set_filter_expression(cmd.filter_expression.clone())
        .set_projection_expression(cmd.projection_expression.clone())
        .set_expression_attribute_names(cmd.names.clone())
        .set_expression_attribute_values(cmd.values.clone())
        .set_limit(cmd.limit)
        .set_consistent_read(cmd.consistent_read)
        .set_exclusive_start_key(cmd.exclusive_start_key.clone())
        .set_segment(cmd.segment)
        .set_total_segments(cmd.total_segments)
        .set_select(cmd.select.as_deref().map(Select::from))
        .set_return_consumed_capacity(
            cmd.return_consumed_capacity
                .as_deref()
                .map(ReturnConsumedCapacity::from),
        )
        .build()
        .map_err(Error::from)
}
