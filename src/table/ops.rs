//! The operation runner: per-model operations, the find/scan pagination
//! loop, backward-paging reversal, GSI follow resolution and the
//! unique-constraint sentinel protocol.

use crate::error::{Error, ErrorCode};
use crate::expression::{Expression, Operation};
use crate::model::{Model, PreparedField};
use crate::params::{Exists, Params, ReturnValues, Stats};
use crate::registry::{Registry, UNIQUE_MODEL};
use crate::table::{Table, Transaction};
use crate::value::{to_attribute_map, Item, Value};
use crate::schema::Timestamps;
use chrono::{SecondsFormat, Utc};
use futures_util::{future::BoxFuture, StreamExt, TryStreamExt};

/// Hard cap on backend pages fetched by one find or scan, overridable with
/// `Params::max_pages`.
const SANITY_PAGES: usize = 1000;
/// Concurrency of the follow fan-out.
const FOLLOW_CONCURRENCY: usize = 10;

/// The result of a find or scan: items plus forward/backward cursors.
#[derive(Debug, Default)]
pub struct QueryResult {
    /// Matching items, transformed unless parsing was disabled.
    pub items: Vec<Item>,
    /// Cursor for the next page, when more results may exist.
    pub next: Option<Item>,
    /// Cursor for the previous page, present when the request paginated.
    pub prev: Option<Item>,
    /// Item count, populated for count-style requests.
    pub count: i64,
    /// Accumulated capacity statistics, when requested.
    pub stats: Option<Stats>,
}

impl Table {
    /// Create a new item. Fails with [`ErrorCode::Unique`] when a unique
    /// constraint is violated and with a conditional failure when an item
    /// with the same key already exists (`Exists::MustNotExist` default).
    pub async fn create(
        &self,
        model_name: &str,
        properties: Item,
        params: &Params,
    ) -> Result<Option<Item>, Error> {
        let registry = self.registry()?;
        let model = registry.get_model(model_name)?;
        let mut params = params.resolved(
            Params::new()
                .parse(true)
                .exists(Exists::MustNotExist)
                .high(true),
        );
        if model.has_unique_fields() {
            self.create_unique(&registry, &model, properties, params).await
        } else {
            self.put_item_on(&registry, &model, properties, &mut params).await
        }
    }

    /// Retrieve a single item by its key properties. Returns `Ok(None)` when
    /// the item does not exist. A get that cannot resolve its sort value
    /// falls back to a find and fails with [`ErrorCode::NonUnique`] when it
    /// matches more than one item.
    pub async fn get(
        &self,
        model_name: &str,
        properties: Item,
        params: &Params,
    ) -> Result<Option<Item>, Error> {
        let registry = self.registry()?;
        let model = registry.get_model(model_name)?;
        self.get_on(&registry, &model, properties, params.clone()).await
    }

    /// Query items matching the given properties against the selected index.
    pub async fn find(
        &self,
        model_name: &str,
        properties: Item,
        params: &Params,
    ) -> Result<QueryResult, Error> {
        let registry = self.registry()?;
        let model = registry.get_model(model_name)?;
        let mut params = params.resolved(Params::new().parse(true).high(true));
        self.query_items(&registry, &model, properties, &mut params).await
    }

    /// Scan the table, filtering on the model type and any supplied
    /// non-key properties.
    pub async fn scan(
        &self,
        model_name: &str,
        properties: Item,
        params: &Params,
    ) -> Result<QueryResult, Error> {
        let registry = self.registry()?;
        let model = registry.get_model(model_name)?;
        let mut params = params.resolved(Params::new().parse(true).high(true));
        let mut props = properties;
        let prepared = self
            .prepare_properties(&model, Operation::Scan, &mut props, &mut params)?
            .unwrap_or(props);
        let expr = Expression::new(&model, self.name(), Operation::Scan, prepared, &params)?;
        self.run_multi(&registry, &model, expr, &params).await
    }

    /// Update an existing item (`Exists::MustExist` default).
    pub async fn update(
        &self,
        model_name: &str,
        properties: Item,
        params: &Params,
    ) -> Result<Option<Item>, Error> {
        let registry = self.registry()?;
        let model = registry.get_model(model_name)?;
        let params = params.resolved(Params::new().parse(true).exists(Exists::MustExist).high(true));
        self.dispatch_update(&registry, &model, properties, params).await
    }

    /// Update or create an item (`Exists::DontCare`): no existence condition
    /// is applied and defaults are filled for absent fields.
    pub async fn upsert(
        &self,
        model_name: &str,
        properties: Item,
        params: &Params,
    ) -> Result<Option<Item>, Error> {
        let registry = self.registry()?;
        let model = registry.get_model(model_name)?;
        let params = params.resolved(Params::new().parse(true).exists(Exists::DontCare).high(true));
        self.dispatch_update(&registry, &model, properties, params).await
    }

    /// Delete an item by its key properties. With `many(true)` the matching
    /// items are found and removed one by one.
    pub async fn remove(
        &self,
        model_name: &str,
        properties: Item,
        params: &Params,
    ) -> Result<Option<Item>, Error> {
        let registry = self.registry()?;
        let model = registry.get_model(model_name)?;
        let mut params = params.resolved(Params::new().parse(true).high(true));
        let mut props = properties;
        let prepared = self.prepare_properties(&model, Operation::Delete, &mut props, &mut params)?;
        match prepared {
            None => self.remove_by_find(&registry, &model, props, &params).await,
            Some(prepared) if params.many => {
                self.remove_by_find(&registry, &model, prepared, &params).await
            }
            Some(prepared) if model.has_unique_fields() => {
                self.remove_unique(&registry, &model, prepared, &mut params).await
            }
            Some(prepared) => {
                let expr =
                    Expression::new(&model, self.name(), Operation::Delete, prepared, &params)?;
                self.run_single(&registry, &model, expr, &params).await
            }
        }
    }

    /// Initialise a local item: defaults applied, templates evaluated,
    /// absent fields left as explicit nulls. Nothing is written.
    pub async fn init(
        &self,
        model_name: &str,
        properties: Item,
        params: &Params,
    ) -> Result<Item, Error> {
        let registry = self.registry()?;
        let model = registry.get_model(model_name)?;
        let params = params.resolved(Params::new().parse(true).high(true));
        let mut props = properties;
        self.apply_defaults(Operation::Init, &model.block, &mut props, &params);
        self.run_templates(&model, Operation::Put, model.primary(), &model.block, &mut props)?;
        let names: Vec<String> = model.block.fields.keys().cloned().collect();
        for name in names {
            if !props.contains_key(&name) {
                props.insert(name, Value::Null);
            }
        }
        Ok(props)
    }

    /// Stage a transactional condition check for this item's key. Only valid
    /// inside a transaction.
    pub async fn check(
        &self,
        model_name: &str,
        properties: Item,
        params: &Params,
    ) -> Result<Option<Item>, Error> {
        if params.transaction.is_none() {
            return Err(Error::argument("check operations require a transaction"));
        }
        let registry = self.registry()?;
        let model = registry.get_model(model_name)?;
        let mut params = params.resolved(Params::new().parse(true).high(true));
        let mut props = properties;
        let prepared = self
            .prepare_properties(&model, Operation::Check, &mut props, &mut params)?
            .ok_or_else(|| Error::argument("check operations must use the primary index"))?;
        let expr = Expression::new(&model, self.name(), Operation::Check, prepared, &params)?;
        self.run_single(&registry, &model, expr, &params).await
    }

    // ─── Internal single-item operations ────────────────────────────────

    async fn dispatch_update(
        &self,
        registry: &Registry,
        model: &Model,
        properties: Item,
        mut params: Params,
    ) -> Result<Option<Item>, Error> {
        if model.has_unique_fields() {
            let touches_unique = properties
                .keys()
                .any(|name| model.block.fields.get(name).is_some_and(|f| f.unique));
            if touches_unique {
                return self.update_unique(registry, model, properties, params).await;
            }
        }
        self.update_item_on(registry, model, properties, &mut params).await
    }

    async fn put_item_on(
        &self,
        registry: &Registry,
        model: &Model,
        properties: Item,
        params: &mut Params,
    ) -> Result<Option<Item>, Error> {
        let mut props = properties;
        if !params.prepared {
            let now = match &params.transaction {
                Some(transaction) => transaction.timestamp(),
                None => Utc::now(),
            };
            if model.timestamps.on_create() {
                props.insert(model.created_field.clone(), Value::Date(now));
            }
            if model.timestamps.on_update() {
                props.insert(model.updated_field.clone(), Value::Date(now));
            }
            props = self
                .prepare_properties(model, Operation::Put, &mut props, params)?
                .ok_or_else(|| Error::argument("write operations must use the primary index"))?;
        }
        let expr = Expression::new(model, self.name(), Operation::Put, props, &*params)?;
        self.run_single(registry, model, expr, &*params).await
    }

    pub(crate) fn get_on<'a>(
        &'a self,
        registry: &'a Registry,
        model: &'a Model,
        properties: Item,
        params: Params,
    ) -> BoxFuture<'a, Result<Option<Item>, Error>> {
        Box::pin(async move {
            let mut params = params.resolved(Params::new().parse(true).high(true));
            let mut props = properties;
            match self.prepare_properties(model, Operation::Get, &mut props, &mut params)? {
                None => {
                    // Fallback: resolve through a find on the enriched input.
                    params.limit = Some(2);
                    let result = self.query_items(registry, model, props, &mut params).await?;
                    if result.items.len() > 1 {
                        return Err(Error::coded(
                            ErrorCode::NonUnique,
                            format!(
                                "get without a sort key matched multiple \"{}\" items",
                                model.name()
                            ),
                        ));
                    }
                    Ok(result.items.into_iter().next())
                }
                Some(prepared) => {
                    let expr =
                        Expression::new(model, self.name(), Operation::Get, prepared, &params)?;
                    self.run_single(registry, model, expr, &params).await
                }
            }
        })
    }

    async fn delete_item_on(
        &self,
        registry: &Registry,
        model: &Model,
        properties: Item,
        params: &mut Params,
    ) -> Result<Option<Item>, Error> {
        let mut props = properties;
        let prepared = if params.prepared {
            props
        } else {
            self.prepare_properties(model, Operation::Delete, &mut props, params)?
                .ok_or_else(|| {
                    Error::coded(
                        ErrorCode::Missing,
                        format!("cannot delete \"{}\": unresolved key", model.name()),
                    )
                })?
        };
        let expr = Expression::new(model, self.name(), Operation::Delete, prepared, &*params)?;
        self.run_single(registry, model, expr, &*params).await
    }

    async fn update_item_on(
        &self,
        registry: &Registry,
        model: &Model,
        properties: Item,
        params: &mut Params,
    ) -> Result<Option<Item>, Error> {
        let mut props = properties;
        if model.timestamps.on_update() {
            let now = match &params.transaction {
                Some(transaction) => transaction.timestamp(),
                None => Utc::now(),
            };
            props.insert(model.updated_field.clone(), Value::Date(now));
            // Upserts set the created timestamp only when the item is new.
            if params.exists == Some(Exists::DontCare) && model.timestamps == Timestamps::Both {
                let when = if model.iso_dates {
                    now.to_rfc3339_opts(SecondsFormat::AutoSi, true)
                } else {
                    now.timestamp_millis().to_string()
                };
                params.set.insert(
                    model.created_field.clone(),
                    format!("if_not_exists(${{{}}}, {{{}}})", model.created_field, when),
                );
            }
        }
        let prepared = self
            .prepare_properties(model, Operation::Update, &mut props, params)?
            .ok_or_else(|| Error::argument("write operations must use the primary index"))?;
        let expr = Expression::new(model, self.name(), Operation::Update, prepared, &*params)?;
        self.run_single(registry, model, expr, &*params).await
    }

    pub(crate) async fn query_items(
        &self,
        registry: &Registry,
        model: &Model,
        properties: Item,
        params: &mut Params,
    ) -> Result<QueryResult, Error> {
        let mut props = properties;
        let prepared = self
            .prepare_properties(model, Operation::Find, &mut props, params)?
            .unwrap_or(props);
        let expr = Expression::new(model, self.name(), Operation::Find, prepared, &*params)?;
        self.run_multi(registry, model, expr, &*params).await
    }

    // ─── Runner ─────────────────────────────────────────────────────────

    async fn run_single(
        &self,
        registry: &Registry,
        model: &Model,
        expr: Expression<'_>,
        params: &Params,
    ) -> Result<Option<Item>, Error> {
        let cmd = expr.command()?;
        if !expr.execute {
            return Ok(Some(expr.describe(&cmd)));
        }
        if params.batch.is_some() {
            return self.accumulate_batch(model, &expr, cmd, params);
        }
        if params.transaction.is_some() {
            return self.accumulate_transaction(model, &expr, cmd, params);
        }

        let op = cmd.op;
        let output = self.execute(model.name(), &cmd, params).await?;
        if !params.parse {
            return Ok(output.item.or(output.attributes));
        }

        let raw: Vec<Item> = match op {
            // Put responses do not echo the item; the prepared record is the
            // source of truth.
            Operation::Put => vec![expr.properties.clone()],
            Operation::Get => output.item.into_iter().collect(),
            Operation::Delete | Operation::Update => output.attributes.into_iter().collect(),
            _ => Vec::new(),
        };
        let mut items = self.parse_response(registry, model, op, &expr, raw, params, false)?;

        if params.return_values == Some(ReturnValues::Get)
            && matches!(op, Operation::Put | Operation::Update)
        {
            let key = record_key(model, &expr.properties);
            if !key.is_empty() {
                if let Some(fresh) = self.reread(registry, model, key, params).await? {
                    return Ok(Some(fresh));
                }
            }
        }
        let first = items.drain(..).next();
        Ok(first)
    }

    async fn run_multi(
        &self,
        registry: &Registry,
        model: &Model,
        expr: Expression<'_>,
        params: &Params,
    ) -> Result<QueryResult, Error> {
        let mut cmd = expr.command()?;
        if !expr.execute {
            return Ok(QueryResult {
                items: vec![expr.describe(&cmd)],
                ..QueryResult::default()
            });
        }
        let op = cmd.op;
        let max_pages = params.max_pages.unwrap_or(SANITY_PAGES);
        let mut raw_items: Vec<Item> = Vec::new();
        let mut last_key: Option<Item> = None;
        let mut total: i64 = 0;
        let mut stats = Stats::default();
        let mut pages = 0usize;

        loop {
            let output = self.execute(model.name(), &cmd, params).await?;
            raw_items.extend(output.items);
            total += output.count;
            stats.count += output.count;
            stats.scanned += output.scanned;
            stats.capacity += output.capacity;

            last_key = output.last_evaluated_key;
            if let Some(lek) = &last_key {
                cmd.exclusive_start_key = Some(to_attribute_map(lek)?);
            }
            if params.limit.is_some_and(|limit| raw_items.len() >= limit) {
                break;
            }
            pages += 1;
            if last_key.is_none() || pages >= max_pages {
                break;
            }
        }

        let (index_name, index) = model.select_index(params);

        // Backward cursor: the first item's keys under the active index,
        // plus the primary keys when on a secondary index.
        let mut prev: Option<Item> = None;
        if !raw_items.is_empty() && (params.next.is_some() || params.prev.is_some()) {
            let first = &raw_items[0];
            let mut cursor = Item::new();
            if let Some(value) = first.get(index.hash_attr()) {
                cursor.insert(index.hash_attr().to_string(), value.clone());
            }
            if let Some(sort) = index.sort_attr() {
                if let Some(value) = first.get(sort) {
                    cursor.insert(sort.to_string(), value.clone());
                }
            }
            if index_name != "primary" {
                let primary = model.primary();
                if let Some(value) = first.get(primary.hash_attr()) {
                    cursor.insert(primary.hash_attr().to_string(), value.clone());
                }
                if let Some(sort) = primary.sort_attr() {
                    if let Some(value) = first.get(sort) {
                        cursor.insert(sort.to_string(), value.clone());
                    }
                }
            }
            prev = Some(cursor);
        }

        let following = op == Operation::Find && params.follow.unwrap_or(index.follow);

        let items = if params.parse {
            self.parse_response(registry, model, op, &expr, raw_items, params, following)?
        } else {
            raw_items
        };

        let mut result = QueryResult {
            items,
            next: last_key,
            prev,
            count: if params.count || params.select.as_deref() == Some("COUNT") {
                total
            } else {
                0
            },
            stats: params.stats.then_some(stats),
        };

        // Backward paging: reverse back into forward order and swap the
        // cursors so the caller keeps a forward-looking view.
        if params.prev.is_some() && params.next.is_none() && op != Operation::Scan {
            result.items.reverse();
            std::mem::swap(&mut result.next, &mut result.prev);
        }

        if following {
            let items = std::mem::take(&mut result.items);
            result.items = self.follow_items(registry, model, items, params).await?;
        }
        Ok(result)
    }

    /// Transform raw stored records into typed items, routing each through
    /// the model named by its type marker and dropping sentinel rows.
    #[allow(clippy::too_many_arguments)]
    fn parse_response(
        &self,
        registry: &Registry,
        model: &Model,
        op: Operation,
        expr: &Expression<'_>,
        raw: Vec<Item>,
        params: &Params,
        following: bool,
    ) -> Result<Vec<Item>, Error> {
        let mut items = Vec::with_capacity(raw.len());
        for item in raw {
            let type_name = item
                .get(&model.type_field)
                .and_then(Value::as_str)
                .unwrap_or_else(|| model.name())
                .to_string();
            if type_name == UNIQUE_MODEL {
                continue;
            }
            let owner = registry.model_for_type(&type_name);
            let owner: &Model = owner.as_deref().unwrap_or(model);
            items.push(self.transform_read_item(
                owner,
                op,
                &item,
                Some(&expr.properties),
                params,
                following,
            ));
        }
        Ok(items)
    }

    /// Re-read an item after a write (`ReturnValues::Get`).
    async fn reread(
        &self,
        registry: &Registry,
        model: &Model,
        key: Item,
        params: &Params,
    ) -> Result<Option<Item>, Error> {
        let mut read_params = Params::new().parse(true).resolved(Params::new());
        read_params.high = true;
        read_params.hidden = params.hidden;
        let mut key = key;
        let Some(prepared) =
            self.prepare_properties(model, Operation::Get, &mut key, &mut read_params)?
        else {
            return Ok(None);
        };
        let expr = Expression::new(model, self.name(), Operation::Get, prepared, &read_params)?;
        let cmd = expr.command()?;
        let output = self.execute(model.name(), &cmd, &read_params).await?;
        let raw: Vec<Item> = output.item.into_iter().collect();
        Ok(self
            .parse_response(registry, model, Operation::Get, &expr, raw, &read_params, false)?
            .pop())
    }

    /// Resolve items found on a secondary index through the primary index,
    /// preserving order and dropping vanished items.
    async fn follow_items(
        &self,
        registry: &Registry,
        model: &Model,
        items: Vec<Item>,
        params: &Params,
    ) -> Result<Vec<Item>, Error> {
        let mut follow_params = Params::new().parse(true);
        follow_params.high = true;
        follow_params.hidden = params.hidden;
        follow_params.follow = Some(false);
        follow_params.checked = true;

        let results: Vec<Option<Item>> = tokio_stream::iter(items.into_iter().map(|item| {
            let follow_params = follow_params.clone();
            let fut: BoxFuture<'_, Result<Option<Item>, Error>> =
                Box::pin(self.get_on(registry, model, item, follow_params));
            fut
        }))
        .buffered(FOLLOW_CONCURRENCY)
        .try_collect()
        .await?;
        Ok(results.into_iter().flatten().collect())
    }

    // ─── Unique-constraint protocol ─────────────────────────────────────

    /// Create with unique sentinels: each unique value gets a companion
    /// record written in the same transaction with an existence condition;
    /// a cancellation surfaces as a unique violation naming the fields.
    async fn create_unique(
        &self,
        registry: &Registry,
        model: &Model,
        properties: Item,
        mut params: Params,
    ) -> Result<Option<Item>, Error> {
        let transact_here = params.transaction.is_none();
        if transact_here {
            params.transaction = Some(Transaction::new());
        }
        let transaction = params.transaction.clone().expect("transaction");
        let now = transaction.timestamp();

        let mut props = properties;
        if model.timestamps.on_create() {
            props.insert(model.created_field.clone(), Value::Date(now));
        }
        if model.timestamps.on_update() {
            props.insert(model.updated_field.clone(), Value::Date(now));
        }
        let prepared = self
            .prepare_properties(model, Operation::Put, &mut props, &mut params)?
            .ok_or_else(|| Error::argument("write operations must use the primary index"))?;
        params.prepared = true;

        let unique_fields = model.unique_fields();
        let unique_names: Vec<String> =
            unique_fields.iter().map(|f| f.name.clone()).collect();
        for field in &unique_fields {
            if let Some(value) = prepared.get(&field.name).filter(|v| !v.is_null()) {
                let pk = sentinel_key(model, field, value);
                let mut sentinel = sentinel_params(&transaction, Some(Exists::MustNotExist));
                let _ = self
                    .put_item_on(registry, &registry.unique, sentinel_item(model, &pk), &mut sentinel)
                    .await?;
            }
        }

        let preview = self
            .put_item_on(registry, model, prepared.clone(), &mut params)
            .await?;
        if !transact_here {
            return Ok(preview);
        }
        match self.transact_write(&transaction, &params).await {
            Ok(()) => {
                if params.return_values == Some(ReturnValues::Get) {
                    let key = record_key(model, &prepared);
                    if let Some(fresh) = self.reread(registry, model, key, &params).await? {
                        return Ok(Some(fresh));
                    }
                }
                Ok(preview)
            }
            Err(e) if e.is_conditional_failure() => Err(Error::coded(
                ErrorCode::Unique,
                format!(
                    "cannot create unique attributes \"{}\" for \"{}\": an item with the same value already exists",
                    unique_names.join(", "),
                    model.name()
                ),
            )),
            Err(e) => Err(e),
        }
    }

    /// Update with unique sentinels: the prior record decides which
    /// sentinels to move. Unchanged values keep their sentinel; changed
    /// values delete the old sentinel and conditionally create the new one.
    async fn update_unique(
        &self,
        registry: &Registry,
        model: &Model,
        properties: Item,
        mut params: Params,
    ) -> Result<Option<Item>, Error> {
        let transact_here = params.transaction.is_none();
        if transact_here {
            params.transaction = Some(Transaction::new());
        }
        let transaction = params.transaction.clone().expect("transaction");

        let mut props = properties;
        let prepared = self
            .prepare_properties(model, Operation::Update, &mut props, &mut params)?
            .ok_or_else(|| Error::argument("write operations must use the primary index"))?;

        // The prior read is not strongly consistent; the sentinel's
        // existence condition closes the race at commit time.
        let key = record_key(model, &prepared);
        let prior: Option<Item> = Box::pin(self.get_on(
            registry,
            model,
            key,
            Params::new().hidden(true),
        ))
        .await?;
        if prior.is_none() && params.exists == Some(Exists::MustExist) {
            return Err(Error::coded(
                ErrorCode::NotFound,
                format!("cannot find existing \"{}\" item to update", model.name()),
            ));
        }
        let prior_prepared = match prior {
            Some(mut prior) => {
                let mut prior_params = Params::new().parse(true).resolved(Params::new());
                prior_params.high = true;
                self.prepare_properties(model, Operation::Update, &mut prior, &mut prior_params)?
            }
            None => None,
        };

        for field in model.unique_fields() {
            let to_remove = params.remove.iter().any(|r| r == &field.name);
            let new_value = prepared
                .get(&field.name)
                .cloned()
                .filter(|v| !v.is_null());
            let prior_value = prior_prepared
                .as_ref()
                .and_then(|p| p.get(&field.name))
                .cloned()
                .filter(|v| !v.is_null());
            if new_value.is_none() && !to_remove {
                continue;
            }
            let unchanged = match (&new_value, &prior_value) {
                (Some(a), Some(b)) => a.display_string() == b.display_string(),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                continue;
            }
            if let Some(prior_value) = &prior_value {
                let prior_pk = sentinel_key(model, field, prior_value);
                if let Some(new_value) = &new_value {
                    if sentinel_key(model, field, new_value) == prior_pk {
                        continue;
                    }
                }
                let mut sentinel = sentinel_params(&transaction, None);
                let _ = self
                    .delete_item_on(
                        registry,
                        &registry.unique,
                        sentinel_item(model, &prior_pk),
                        &mut sentinel,
                    )
                    .await?;
            }
            if let Some(new_value) = &new_value {
                if !to_remove {
                    let pk = sentinel_key(model, field, new_value);
                    let mut sentinel = sentinel_params(&transaction, Some(Exists::MustNotExist));
                    let _ = self
                        .put_item_on(registry, &registry.unique, sentinel_item(model, &pk), &mut sentinel)
                        .await?;
                }
            }
        }

        let reread_key = record_key(model, &prepared);
        let preview = self.update_item_on(registry, model, prepared, &mut params).await?;
        if !transact_here {
            return Ok(preview);
        }
        match self.transact_write(&transaction, &params).await {
            Ok(()) => {
                if params.return_values == Some(ReturnValues::Get) {
                    if let Some(fresh) = self.reread(registry, model, reread_key, &params).await? {
                        return Ok(Some(fresh));
                    }
                }
                Ok(preview)
            }
            Err(e) if e.is_conditional_failure() => Err(Error::coded(
                ErrorCode::Unique,
                format!("cannot update unique attributes for \"{}\"", model.name()),
            )),
            Err(e) => Err(e),
        }
    }

    /// Remove with unique sentinels: the prior record names the sentinels
    /// to delete alongside the main item.
    async fn remove_unique(
        &self,
        registry: &Registry,
        model: &Model,
        prepared: Item,
        params: &mut Params,
    ) -> Result<Option<Item>, Error> {
        let transact_here = params.transaction.is_none();
        if transact_here {
            params.transaction = Some(Transaction::new());
        }
        let transaction = params.transaction.clone().expect("transaction");
        params.prepared = true;

        let key = record_key(model, &prepared);
        let prior: Option<Item> = Box::pin(self.get_on(
            registry,
            model,
            key,
            Params::new().hidden(true),
        ))
        .await?;
        if prior.is_none() && params.exists != Some(Exists::MustNotExist) {
            return Err(Error::coded(
                ErrorCode::NotFound,
                format!("cannot find existing \"{}\" item to remove", model.name()),
            ));
        }
        let prior_prepared = match prior {
            Some(mut prior) => {
                let mut prior_params = Params::new().parse(true).resolved(Params::new());
                prior_params.high = true;
                self.prepare_properties(model, Operation::Update, &mut prior, &mut prior_params)?
            }
            None => None,
        };

        for field in model.unique_fields() {
            if let Some(value) = prior_prepared
                .as_ref()
                .and_then(|p| p.get(&field.name))
                .filter(|v| !v.is_null())
            {
                let pk = sentinel_key(model, field, value);
                let mut sentinel = sentinel_params(&transaction, None);
                let _ = self
                    .delete_item_on(registry, &registry.unique, sentinel_item(model, &pk), &mut sentinel)
                    .await?;
            }
        }

        let removed = self.delete_item_on(registry, model, prepared, params).await?;
        if transact_here {
            self.transact_write(&transaction, params).await?;
        }
        Ok(removed)
    }

    /// Find-then-act removal, used when the caller supplied insufficient
    /// key material or asked to remove many items.
    async fn remove_by_find(
        &self,
        registry: &Registry,
        model: &Model,
        properties: Item,
        params: &Params,
    ) -> Result<Option<Item>, Error> {
        let mut find_params = params.clone();
        find_params.parse = true;
        find_params.batch = None;
        find_params.transaction = None;
        let result = self
            .query_items(registry, model, properties, &mut find_params)
            .await?;
        if result.items.len() > 1 && !params.many {
            return Err(Error::coded(
                ErrorCode::NonUnique,
                format!(
                    "removing multiple items from \"{}\"; use many(true) to enable",
                    model.name()
                ),
            ));
        }
        let mut last = None;
        for item in result.items {
            let mut item_params = Params::new().parse(true);
            item_params.high = true;
            if let Some(transaction) = &params.transaction {
                item_params = item_params.transaction(transaction);
            }
            if let Some(return_values) = params.return_values {
                item_params = item_params.return_values(return_values);
            }
            let mut item_params = item_params.resolved(Params::new());

            let mut item = item;
            let prepared = self
                .prepare_properties(model, Operation::Delete, &mut item, &mut item_params)?
                .ok_or_else(|| {
                    Error::coded(
                        ErrorCode::Missing,
                        format!("cannot delete \"{}\": unresolved key", model.name()),
                    )
                })?;
            last = if model.has_unique_fields() {
                self.remove_unique(registry, model, prepared, &mut item_params).await?
            } else {
                let expr =
                    Expression::new(model, self.name(), Operation::Delete, prepared, &item_params)?;
                self.run_single(registry, model, expr, &item_params).await?
            };
        }
        Ok(last)
    }
}

/// Primary-key field values of a prepared record.
fn record_key(model: &Model, rec: &Item) -> Item {
    let primary = model.primary();
    let mut key = Item::new();
    for attribute in [Some(primary.hash_attr()), primary.sort_attr()]
        .into_iter()
        .flatten()
    {
        let name = model
            .field_for_attribute(attribute)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| attribute.to_string());
        if let Some(value) = rec.get(&name) {
            key.insert(name, value.clone());
        }
    }
    key
}

/// The composite key value of a unique sentinel record.
fn sentinel_key(model: &Model, field: &PreparedField, value: &Value) -> String {
    format!(
        "_unique#{}#{}#{}",
        model.name(),
        field.attribute[0],
        value.display_string()
    )
}

/// The sentinel record addressed by a sentinel key.
fn sentinel_item(model: &Model, pk: &str) -> Item {
    let primary = model.primary();
    let mut item = Item::new();
    item.insert(primary.hash_attr().to_string(), Value::from(pk));
    if let Some(sort) = primary.sort_attr() {
        item.insert(sort.to_string(), Value::from("_unique#"));
    }
    item
}

/// Parameters for a sentinel write staged into a transaction.
fn sentinel_params(transaction: &Transaction, exists: Option<Exists>) -> Params {
    let mut params = Params::new()
        .parse(true)
        .transaction(transaction)
        .return_values(ReturnValues::None);
    params.high = true;
    params.exists = exists;
    params.checked = true;
    params
}
