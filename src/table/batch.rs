//! Batch and transaction accumulation.
//!
//! Operations carrying a [`Batch`] or [`Transaction`] collector stage their
//! built command instead of executing, returning a preview of the
//! transformed input. The dispatch methods replay a collector against the
//! backend, re-submitting unprocessed items with bounded exponential
//! backoff.

use crate::error::Error;
use crate::expression::{Command, Expression, Operation};
use crate::params::Params;
use crate::table::{classify, Table};
use crate::value::{from_attribute_map, Item, Value};
use aws_sdk_dynamodb::operation::batch_get_item::BatchGetItemInput;
use aws_sdk_dynamodb::operation::batch_write_item::BatchWriteItemInput;
use aws_sdk_dynamodb::operation::transact_get_items::TransactGetItemsInput;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsInput;
use aws_sdk_dynamodb::types::{
    AttributeValue, ConditionCheck, Delete, DeleteRequest, Get, KeysAndAttributes, Put, PutRequest,
    TransactGetItem, TransactWriteItem, Update, WriteRequest,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BATCH_RETRY_BASE: Duration = Duration::from_millis(10);
const MAX_BATCH_RETRIES: u32 = 11;

type AvMap = HashMap<String, AttributeValue>;

/// A caller-owned batch collector. Operations staged with
/// [`Params::batch`](crate::Params::batch) append here; dispatch with
/// [`Table::batch_get`] or [`Table::batch_write`].
#[derive(Clone, Default)]
pub struct Batch {
    inner: Arc<Mutex<BatchInner>>,
}

#[derive(Default)]
struct BatchInner {
    tables: IndexMap<String, TableBatch>,
}

#[derive(Default)]
struct TableBatch {
    keys: Vec<AvMap>,
    writes: Vec<StagedWrite>,
}

enum StagedWrite {
    Put(AvMap),
    Delete(AvMap),
}

impl Batch {
    /// An empty collector.
    pub fn new() -> Self {
        Batch::default()
    }

    /// True when nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("batch lock").tables.is_empty()
    }
}

/// A caller-owned transaction collector. Operations staged with
/// [`Params::transaction`](crate::Params::transaction) append here; commit
/// with [`Table::transact_write`] or read with [`Table::transact_get`].
#[derive(Clone, Default)]
pub struct Transaction {
    inner: Arc<Mutex<TransactInner>>,
}

#[derive(Default)]
struct TransactInner {
    timestamp: Option<DateTime<Utc>>,
    ops: Vec<(TransactKind, Command)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransactKind {
    Put,
    Update,
    Delete,
    Get,
    ConditionCheck,
}

impl Transaction {
    /// An empty collector.
    pub fn new() -> Self {
        Transaction::default()
    }

    /// True when nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("transaction lock").ops.is_empty()
    }

    /// The shared timestamp for every write staged in this transaction,
    /// fixed on first use.
    pub(crate) fn timestamp(&self) -> DateTime<Utc> {
        let mut inner = self.inner.lock().expect("transaction lock");
        *inner.timestamp.get_or_insert_with(Utc::now)
    }

    fn push(&self, kind: TransactKind, command: Command) {
        self.inner
            .lock()
            .expect("transaction lock")
            .ops
            .push((kind, command));
    }

    fn snapshot(&self) -> Vec<(TransactKind, Command)> {
        self.inner.lock().expect("transaction lock").ops.clone()
    }
}

impl Table {
    /// Stage a built command into the request's batch collector and return
    /// a best-effort preview of the transformed input.
    pub(crate) fn accumulate_batch(
        &self,
        model: &crate::model::Model,
        expr: &Expression<'_>,
        cmd: Command,
        params: &Params,
    ) -> Result<Option<Item>, Error> {
        let batch = params.batch.as_ref().expect("batch collector");
        {
            let mut inner = batch.inner.lock().expect("batch lock");
            let table = inner.tables.entry(cmd.table_name.clone()).or_default();
            match cmd.op {
                Operation::Get => {
                    table
                        .keys
                        .push(cmd.key.ok_or_else(|| Error::argument("batch get without a key"))?);
                }
                Operation::Put => {
                    table.writes.push(StagedWrite::Put(
                        cmd.item
                            .ok_or_else(|| Error::argument("batch put without an item"))?,
                    ));
                }
                Operation::Delete => {
                    table.writes.push(StagedWrite::Delete(
                        cmd.key
                            .ok_or_else(|| Error::argument("batch delete without a key"))?,
                    ));
                }
                other => {
                    return Err(Error::argument(format!(
                        "unsupported batch operation \"{}\"",
                        other
                    )));
                }
            }
        }
        Ok(Some(self.transform_read_item(
            model,
            cmd.op,
            &expr.properties,
            Some(&expr.properties),
            params,
            false,
        )))
    }

    /// Stage a built command into the request's transaction collector under
    /// the operation's transact key.
    pub(crate) fn accumulate_transaction(
        &self,
        model: &crate::model::Model,
        expr: &Expression<'_>,
        cmd: Command,
        params: &Params,
    ) -> Result<Option<Item>, Error> {
        let transaction = params.transaction.as_ref().expect("transaction collector");
        let kind = match cmd.op {
            Operation::Put => TransactKind::Put,
            Operation::Update => TransactKind::Update,
            Operation::Delete => TransactKind::Delete,
            Operation::Get => TransactKind::Get,
            Operation::Check => TransactKind::ConditionCheck,
            other => {
                return Err(Error::argument(format!(
                    "unsupported transaction operation \"{}\"",
                    other
                )));
            }
        };
        let op = cmd.op;
        transaction.push(kind, cmd);
        Ok(Some(self.transform_read_item(
            model,
            op,
            &expr.properties,
            Some(&expr.properties),
            params,
            false,
        )))
    }

    /// Dispatch the staged batch reads, retrying unprocessed keys with
    /// exponential backoff. With `parse` the stored records come back as
    /// typed items grouped into `items`; otherwise the raw per-table
    /// responses are returned.
    pub async fn batch_get(&self, batch: &Batch, params: &Params) -> Result<BatchGetOutput, Error> {
        let mut output = BatchGetOutput::default();
        if batch.is_empty() {
            return Ok(output);
        }
        let registry = self.registry()?;
        let params = params.resolved(Params::new());

        // Optional projection applies to every staged table.
        let projection = params.fields.as_ref().map(|fields| {
            let mut names: HashMap<String, String> = HashMap::new();
            let mut parts: Vec<String> = Vec::new();
            for (i, field) in fields.iter().enumerate() {
                names.insert(format!("#_{}", i), field.clone());
                parts.push(format!("#_{}", i));
            }
            (parts.join(", "), names)
        });

        let mut request_items: HashMap<String, KeysAndAttributes> = HashMap::new();
        {
            let inner = batch.inner.lock().expect("batch lock");
            for (table, staged) in &inner.tables {
                if staged.keys.is_empty() {
                    continue;
                }
                let mut builder = KeysAndAttributes::builder()
                    .set_keys(Some(staged.keys.clone()))
                    .consistent_read(params.consistent);
                if let Some((expression, names)) = &projection {
                    builder = builder
                        .projection_expression(expression)
                        .set_expression_attribute_names(Some(names.clone()));
                }
                request_items.insert(table.clone(), builder.build()?);
            }
        }
        if request_items.is_empty() {
            return Ok(output);
        }

        let client = self.client_for(&params);
        let mut retries: u32 = 0;
        loop {
            let input = BatchGetItemInput::builder()
                .set_request_items(Some(request_items.clone()))
                .build()?;
            let out = client
                .batch_get_item(input)
                .await
                .map_err(|e| classify(Operation::Get, crate::registry::GENERIC_MODEL, e))?;

            for (table, raw_items) in out.responses.unwrap_or_default() {
                for raw in raw_items {
                    let item = from_attribute_map(raw)?;
                    if params.parse {
                        let type_name = item
                            .get(&registry.defaults.type_field)
                            .and_then(Value::as_str)
                            .unwrap_or("_unknown");
                        if let Some(model) = registry.model_for_type(type_name) {
                            output.items.push(self.transform_read_item(
                                &model,
                                Operation::Get,
                                &item,
                                None,
                                &params,
                                false,
                            ));
                        }
                    } else {
                        output.responses.entry(table.clone()).or_default().push(item);
                    }
                }
            }

            match out.unprocessed_keys {
                Some(unprocessed) if !unprocessed.is_empty() => {
                    if retries >= MAX_BATCH_RETRIES {
                        return Err(Error::backend("too many unprocessed keys after retries"));
                    }
                    tokio::time::sleep(BATCH_RETRY_BASE * 2u32.pow(retries)).await;
                    retries += 1;
                    request_items = unprocessed;
                }
                _ => break,
            }
        }
        Ok(output)
    }

    /// Dispatch the staged batch writes, retrying unprocessed items with
    /// exponential backoff.
    pub async fn batch_write(&self, batch: &Batch, params: &Params) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        let params = params.resolved(Params::new());

        let mut request_items: HashMap<String, Vec<WriteRequest>> = HashMap::new();
        {
            let inner = batch.inner.lock().expect("batch lock");
            for (table, staged) in &inner.tables {
                if staged.writes.is_empty() {
                    continue;
                }
                let mut requests = Vec::with_capacity(staged.writes.len());
                for write in &staged.writes {
                    let request = match write {
                        StagedWrite::Put(item) => WriteRequest::builder()
                            .put_request(PutRequest::builder().set_item(Some(item.clone())).build()?)
                            .build(),
                        StagedWrite::Delete(key) => WriteRequest::builder()
                            .delete_request(
                                DeleteRequest::builder().set_key(Some(key.clone())).build()?,
                            )
                            .build(),
                    };
                    requests.push(request);
                }
                request_items.insert(table.clone(), requests);
            }
        }
        if request_items.is_empty() {
            return Ok(());
        }

        let client = self.client_for(&params);
        let mut retries: u32 = 0;
        loop {
            let input = BatchWriteItemInput::builder()
                .set_request_items(Some(request_items.clone()))
                .build()?;
            let out = client
                .batch_write_item(input)
                .await
                .map_err(|e| classify(Operation::Put, crate::registry::GENERIC_MODEL, e))?;
            match out.unprocessed_items {
                Some(unprocessed) if !unprocessed.is_empty() => {
                    if retries >= MAX_BATCH_RETRIES {
                        return Err(Error::backend("too many unprocessed items after retries"));
                    }
                    tokio::time::sleep(BATCH_RETRY_BASE * 2u32.pow(retries)).await;
                    retries += 1;
                    request_items = unprocessed;
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Commit the staged transactional writes atomically. Cancellation is
    /// surfaced as a runtime error with the original message preserved so
    /// the unique protocol can classify it.
    pub async fn transact_write(
        &self,
        transaction: &Transaction,
        params: &Params,
    ) -> Result<(), Error> {
        let params = params.resolved(Params::new());
        if !params.should_execute() {
            return Ok(());
        }
        let staged = transaction.snapshot();
        if staged.is_empty() {
            return Ok(());
        }
        let mut items = Vec::with_capacity(staged.len());
        for (kind, cmd) in staged {
            let item = match kind {
                TransactKind::Put => TransactWriteItem::builder()
                    .put(
                        Put::builder()
                            .table_name(&cmd.table_name)
                            .set_item(cmd.item)
                            .set_condition_expression(cmd.condition_expression)
                            .set_expression_attribute_names(cmd.names)
                            .set_expression_attribute_values(cmd.values)
                            .build()?,
                    )
                    .build(),
                TransactKind::Update => TransactWriteItem::builder()
                    .update(
                        Update::builder()
                            .table_name(&cmd.table_name)
                            .set_key(cmd.key)
                            .set_update_expression(cmd.update_expression)
                            .set_condition_expression(cmd.condition_expression)
                            .set_expression_attribute_names(cmd.names)
                            .set_expression_attribute_values(cmd.values)
                            .build()?,
                    )
                    .build(),
                TransactKind::Delete => TransactWriteItem::builder()
                    .delete(
                        Delete::builder()
                            .table_name(&cmd.table_name)
                            .set_key(cmd.key)
                            .set_condition_expression(cmd.condition_expression)
                            .set_expression_attribute_names(cmd.names)
                            .set_expression_attribute_values(cmd.values)
                            .build()?,
                    )
                    .build(),
                TransactKind::ConditionCheck => TransactWriteItem::builder()
                    .condition_check(
                        ConditionCheck::builder()
                            .table_name(&cmd.table_name)
                            .set_key(cmd.key)
                            .set_condition_expression(cmd.condition_expression)
                            .set_expression_attribute_names(cmd.names)
                            .set_expression_attribute_values(cmd.values)
                            .build()?,
                    )
                    .build(),
                TransactKind::Get => {
                    return Err(Error::argument(
                        "get operations belong in a transact_get transaction",
                    ));
                }
            };
            items.push(item);
        }
        let input = TransactWriteItemsInput::builder()
            .set_transact_items(Some(items))
            .build()?;
        let _ = self
            .client_for(&params)
            .transact_write_items(input)
            .await
            .map_err(|e| {
                let msg = e.message().to_string();
                if msg.contains("TransactionCanceled") {
                    Error::backend(format!("Transaction Cancelled: {}", msg))
                } else {
                    Error::backend(msg)
                }
            })?;
        Ok(())
    }

    /// Execute the staged transactional reads atomically.
    pub async fn transact_get(
        &self,
        transaction: &Transaction,
        params: &Params,
    ) -> Result<TransactGetOutput, Error> {
        let registry = self.registry()?;
        let params = params.resolved(Params::new());
        let mut output = TransactGetOutput::default();
        if !params.should_execute() {
            return Ok(output);
        }

        let mut items = Vec::new();
        for (kind, cmd) in transaction.snapshot() {
            if kind != TransactKind::Get {
                return Err(Error::argument(
                    "write operations belong in a transact_write transaction",
                ));
            }
            items.push(
                TransactGetItem::builder()
                    .get(
                        Get::builder()
                            .table_name(&cmd.table_name)
                            .set_key(cmd.key)
                            .set_projection_expression(cmd.projection_expression)
                            .set_expression_attribute_names(cmd.names)
                            .build()?,
                    )
                    .build(),
            );
        }
        if items.is_empty() {
            return Ok(output);
        }

        let input = TransactGetItemsInput::builder()
            .set_transact_items(Some(items))
            .build()?;
        let out = self
            .client_for(&params)
            .transact_get_items(input)
            .await
            .map_err(|e| classify(Operation::Get, crate::registry::GENERIC_MODEL, e))?;

        for response in out.responses.unwrap_or_default() {
            let item = response.item.map(from_attribute_map).transpose()?;
            if params.parse {
                if let Some(item) = &item {
                    let type_name = item
                        .get(&registry.defaults.type_field)
                        .and_then(Value::as_str)
                        .unwrap_or("_unknown");
                    if let Some(model) = registry.model_for_type(type_name) {
                        output.items.push(self.transform_read_item(
                            &model,
                            Operation::Get,
                            item,
                            None,
                            &params,
                            false,
                        ));
                    }
                }
            }
            output.responses.push(item);
        }
        Ok(output)
    }
}

/// Result of [`Table::batch_get`].
#[derive(Debug, Default)]
pub struct BatchGetOutput {
    /// Typed items, populated when the request parses responses.
    pub items: Vec<Item>,
    /// Raw per-table responses, populated otherwise.
    pub responses: IndexMap<String, Vec<Item>>,
}

/// Result of [`Table::transact_get`].
#[derive(Debug, Default)]
pub struct TransactGetOutput {
    /// Typed items, populated when the request parses responses.
    pub items: Vec<Item>,
    /// Raw responses in request order (absent items are `None`).
    pub responses: Vec<Option<Item>>,
}
