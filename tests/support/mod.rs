//! Shared test infrastructure: an in-memory DynamoDB double that evaluates
//! condition, filter and update expressions, plus the schema fixtures used
//! across the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use aws_sdk_dynamodb::operation::batch_get_item::{BatchGetItemInput, BatchGetItemOutput};
use aws_sdk_dynamodb::operation::batch_write_item::{BatchWriteItemInput, BatchWriteItemOutput};
use aws_sdk_dynamodb::operation::create_table::{CreateTableInput, CreateTableOutput};
use aws_sdk_dynamodb::operation::delete_item::{DeleteItemInput, DeleteItemOutput};
use aws_sdk_dynamodb::operation::delete_table::{DeleteTableInput, DeleteTableOutput};
use aws_sdk_dynamodb::operation::describe_table::{DescribeTableInput, DescribeTableOutput};
use aws_sdk_dynamodb::operation::get_item::{GetItemInput, GetItemOutput};
use aws_sdk_dynamodb::operation::list_tables::{ListTablesInput, ListTablesOutput};
use aws_sdk_dynamodb::operation::put_item::{PutItemInput, PutItemOutput};
use aws_sdk_dynamodb::operation::query::{QueryInput, QueryOutput};
use aws_sdk_dynamodb::operation::scan::{ScanInput, ScanOutput};
use aws_sdk_dynamodb::operation::transact_get_items::{
    TransactGetItemsInput, TransactGetItemsOutput,
};
use aws_sdk_dynamodb::operation::transact_write_items::{
    TransactWriteItemsInput, TransactWriteItemsOutput,
};
use aws_sdk_dynamodb::operation::update_item::{UpdateItemInput, UpdateItemOutput};
use aws_sdk_dynamodb::operation::update_time_to_live::{
    UpdateTimeToLiveInput, UpdateTimeToLiveOutput,
};
use aws_sdk_dynamodb::types::{AttributeValue, ItemResponse};
use dynamo_mapper::schema::fields;
use dynamo_mapper::{
    DynamoClient, Error, ErrorCode, FieldDef, IndexDef, Item, Projection, SchemaDef, SchemaParams,
    Table, TableParams, Value,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub type AvMap = HashMap<String, AttributeValue>;
type Names = Option<HashMap<String, String>>;
type Values = Option<AvMap>;

// ─── Mock client ─────────────────────────────────────────────────────────

/// Thread-safe in-memory DynamoDB substitute. Items are keyed by their
/// `pk`/`sk` attributes (every fixture schema uses those names); queries are
/// returned in key order with limit/cursor/direction support so pagination
/// is honestly exercised.
#[derive(Default)]
pub struct MockClient {
    tables: Mutex<BTreeMap<String, BTreeMap<String, AvMap>>>,
}

impl MockClient {
    pub fn new() -> Arc<MockClient> {
        Arc::new(MockClient::default())
    }

    pub fn count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, BTreeMap::len)
    }

    pub fn raw_item(&self, table: &str, pk: &str, sk: &str) -> Option<AvMap> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|t| t.get(&format!("{}||{}", pk, sk)))
            .cloned()
    }

    pub fn raw_items(&self, table: &str) -> Vec<AvMap> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    fn conditional_failure(context: &str) -> Error {
        Error::Runtime {
            code: ErrorCode::Runtime,
            message: format!("ConditionalCheckFailedException: {}", context),
        }
    }

    fn cancelled(context: &str) -> Error {
        Error::Runtime {
            code: ErrorCode::Runtime,
            message: format!("TransactionCanceledException: {}", context),
        }
    }
}

pub fn av_str(av: &AttributeValue) -> String {
    match av {
        AttributeValue::S(s) => s.clone(),
        AttributeValue::N(n) => n.clone(),
        AttributeValue::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

pub fn item_key(item: &AvMap) -> String {
    let pk = item.get("pk").map(av_str).unwrap_or_default();
    let sk = item.get("sk").map(av_str).unwrap_or_default();
    format!("{}||{}", pk, sk)
}

fn resolve_name(token: &str, names: &Names) -> String {
    let token = token.trim();
    names
        .as_ref()
        .and_then(|n| n.get(token).cloned())
        .unwrap_or_else(|| token.to_string())
}

fn resolve_value(token: &str, values: &Values) -> Option<AttributeValue> {
    values.as_ref().and_then(|v| v.get(token.trim()).cloned())
}

fn balanced(s: &str) -> bool {
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn split_top_level(expr: &str, sep: &str) -> Vec<String> {
    let lower = expr.to_lowercase();
    let bytes = lower.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut last = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
        if depth == 0 && lower[i..].starts_with(sep) {
            parts.push(expr[last..i].trim().to_string());
            last = i + sep.len();
            i += sep.len();
            continue;
        }
        i += 1;
    }
    parts.push(expr[last..].trim().to_string());
    parts
}

fn split_top_level_commas(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut last = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(body[last..i].trim().to_string());
                last = i + 1;
            }
            _ => {}
        }
    }
    parts.push(body[last..].trim().to_string());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Evaluate a condition/filter expression against an item. Supports
/// comparisons, `attribute_exists`/`attribute_not_exists`, `begins_with`,
/// `contains`, `and`/`or` and parenthesised sub-expressions.
pub fn eval_filter(item: &AvMap, expr: &str, names: &Names, values: &Values) -> bool {
    let expr = expr.trim();
    if expr.is_empty() {
        return true;
    }
    if expr.starts_with('(') && expr.ends_with(')') {
        let inner = &expr[1..expr.len() - 1];
        if balanced(inner) {
            return eval_filter(item, inner, names, values);
        }
    }
    let and_parts = split_top_level(expr, " and ");
    if and_parts.len() > 1 {
        return and_parts.iter().all(|p| eval_filter(item, p, names, values));
    }
    let or_parts = split_top_level(expr, " or ");
    if or_parts.len() > 1 {
        return or_parts.iter().any(|p| eval_filter(item, p, names, values));
    }

    let lower = expr.to_lowercase();
    let item_value = |attr: &str| item.get(attr).map(av_str).unwrap_or_default();

    if let Some(inner) = lower
        .strip_prefix("attribute_not_exists(")
        .and_then(|_| expr.get("attribute_not_exists(".len()..expr.len() - 1))
    {
        return !item.contains_key(&resolve_name(inner, names));
    }
    if let Some(inner) = lower
        .strip_prefix("attribute_exists(")
        .and_then(|_| expr.get("attribute_exists(".len()..expr.len() - 1))
    {
        return item.contains_key(&resolve_name(inner, names));
    }
    if lower.starts_with("begins_with(") {
        let inner = &expr["begins_with(".len()..expr.len() - 1];
        let args = split_top_level_commas(inner);
        if args.len() == 2 {
            let attr = resolve_name(&args[0], names);
            let prefix = resolve_value(&args[1], values).map(|v| av_str(&v)).unwrap_or_default();
            return item_value(&attr).starts_with(&prefix);
        }
        return false;
    }
    if lower.starts_with("contains(") {
        let inner = &expr["contains(".len()..expr.len() - 1];
        let args = split_top_level_commas(inner);
        if args.len() == 2 {
            let attr = resolve_name(&args[0], names);
            let needle = resolve_value(&args[1], values).map(|v| av_str(&v)).unwrap_or_default();
            return item_value(&attr).contains(&needle);
        }
        return false;
    }
    if let Some(between) = lower.find(" between ") {
        let attr = resolve_name(&expr[..between], names);
        let rest = &expr[between + " between ".len()..];
        let bounds: Vec<&str> = rest.splitn(2, " AND ").collect();
        let bounds = if bounds.len() == 2 {
            bounds
        } else {
            rest.splitn(2, " and ").collect()
        };
        if bounds.len() == 2 {
            let low = resolve_value(bounds[0], values).map(|v| av_str(&v)).unwrap_or_default();
            let high = resolve_value(bounds[1], values).map(|v| av_str(&v)).unwrap_or_default();
            let actual = item_value(&attr);
            return actual >= low && actual <= high;
        }
        return false;
    }

    for op in ["<>", "<=", ">=", "<", ">", "="] {
        if let Some(at) = expr.find(op) {
            let lhs = resolve_name(&expr[..at], names);
            let rhs = resolve_value(&expr[at + op.len()..], values)
                .map(|v| av_str(&v))
                .unwrap_or_default();
            let actual = item_value(&lhs);
            return match op {
                "=" => actual == rhs,
                "<>" => actual != rhs,
                "<" => actual < rhs,
                "<=" => actual <= rhs,
                ">" => actual > rhs,
                ">=" => actual >= rhs,
                _ => true,
            };
        }
    }
    true
}

// ─── Update expression application ───────────────────────────────────────

type PathSeg = (String, Option<usize>);

fn parse_path(lhs: &str, names: &Names) -> Vec<PathSeg> {
    lhs.trim()
        .split('.')
        .map(|part| match part.find('[') {
            Some(at) => {
                let index = part[at + 1..part.len() - 1].parse::<usize>().ok();
                (resolve_name(&part[..at], names), index)
            }
            None => (resolve_name(part, names), None),
        })
        .collect()
}

fn set_path(map: &mut AvMap, segs: &[PathSeg], value: AttributeValue) {
    let (name, index) = &segs[0];
    if segs.len() == 1 && index.is_none() {
        map.insert(name.clone(), value);
        return;
    }
    let entry = map.entry(name.clone()).or_insert_with(|| {
        if index.is_some() {
            AttributeValue::L(Vec::new())
        } else {
            AttributeValue::M(HashMap::new())
        }
    });
    match (entry, index) {
        (AttributeValue::L(list), Some(i)) => {
            while list.len() <= *i {
                list.push(AttributeValue::M(HashMap::new()));
            }
            if segs.len() == 1 {
                list[*i] = value;
            } else if let AttributeValue::M(inner) = &mut list[*i] {
                set_path(inner, &segs[1..], value);
            }
        }
        (AttributeValue::M(inner), None) => set_path(inner, &segs[1..], value),
        _ => {}
    }
}

fn get_path(map: &AvMap, segs: &[PathSeg]) -> Option<AttributeValue> {
    let (name, index) = &segs[0];
    let mut current = map.get(name)?.clone();
    if let Some(i) = index {
        current = match current {
            AttributeValue::L(list) => list.get(*i)?.clone(),
            _ => return None,
        };
    }
    if segs.len() == 1 {
        return Some(current);
    }
    match current {
        AttributeValue::M(inner) => get_path(&inner, &segs[1..]),
        _ => None,
    }
}

fn remove_path(map: &mut AvMap, segs: &[PathSeg]) {
    let (name, index) = &segs[0];
    if segs.len() == 1 && index.is_none() {
        map.remove(name);
        return;
    }
    if let Some(AttributeValue::M(inner)) = map.get_mut(name) {
        if index.is_none() {
            remove_path(inner, &segs[1..]);
        }
    }
}

fn split_clauses(expr: &str) -> Vec<(String, String)> {
    let lower = expr.to_lowercase();
    let mut positions: Vec<(usize, &str)> = Vec::new();
    for keyword in ["set", "remove", "add", "delete"] {
        let mut search = 0usize;
        while let Some(found) = lower[search..].find(keyword) {
            let at = search + found;
            let before_ok = at == 0 || lower.as_bytes()[at - 1] == b' ';
            let end = at + keyword.len();
            let after_ok = end < lower.len() && lower.as_bytes()[end] == b' ';
            if before_ok && after_ok {
                positions.push((at, keyword));
            }
            search = end;
        }
    }
    positions.sort_by_key(|(at, _)| *at);
    let mut clauses = Vec::new();
    for (i, (at, keyword)) in positions.iter().enumerate() {
        let end = positions.get(i + 1).map_or(expr.len(), |(next, _)| *next);
        let body = expr[at + keyword.len()..end].trim().to_string();
        clauses.push((keyword.to_string(), body));
    }
    clauses
}

fn eval_rhs(item: &AvMap, rhs: &str, names: &Names, values: &Values) -> Option<AttributeValue> {
    let rhs = rhs.trim();
    if let Some(inner) = rhs
        .strip_prefix("list_append(")
        .and_then(|r| r.strip_suffix(')'))
    {
        let args = split_top_level_commas(inner);
        if args.len() == 2 {
            let base = eval_rhs(item, &args[0], names, values);
            let extension = eval_rhs(item, &args[1], names, values);
            let mut list = match base {
                Some(AttributeValue::L(list)) => list,
                _ => Vec::new(),
            };
            if let Some(AttributeValue::L(more)) = extension {
                list.extend(more);
            }
            return Some(AttributeValue::L(list));
        }
        return None;
    }
    if let Some(inner) = rhs
        .strip_prefix("if_not_exists(")
        .and_then(|r| r.strip_suffix(')'))
    {
        let args = split_top_level_commas(inner);
        if args.len() == 2 {
            let path = parse_path(&args[0], names);
            if let Some(existing) = get_path(item, &path) {
                return Some(existing);
            }
            return eval_rhs(item, &args[1], names, values);
        }
        return None;
    }
    resolve_value(rhs, values)
}

/// Apply an update expression of the shape the mapper generates:
/// `add a :v, ... delete ... remove a, b set a = :v, b.c = :v, ...`.
pub fn apply_update_expression(item: &mut AvMap, expr: &str, names: &Names, values: &Values) {
    for (keyword, body) in split_clauses(expr) {
        match keyword.as_str() {
            "set" => {
                for assignment in split_top_level_commas(&body) {
                    let Some(eq) = assignment.find('=') else { continue };
                    let path = parse_path(&assignment[..eq], names);
                    let snapshot = item.clone();
                    if let Some(value) = eval_rhs(&snapshot, &assignment[eq + 1..], names, values) {
                        set_path(item, &path, value);
                    }
                }
            }
            "remove" => {
                for target in split_top_level_commas(&body) {
                    let path = parse_path(&target, names);
                    remove_path(item, &path);
                }
            }
            "add" => {
                for assignment in split_top_level_commas(&body) {
                    let mut parts = assignment.split_whitespace();
                    let (Some(lhs), Some(rhs)) = (parts.next(), parts.next()) else { continue };
                    let path = parse_path(lhs, names);
                    let Some(value) = resolve_value(rhs, values) else { continue };
                    let merged = match (get_path(item, &path), &value) {
                        (Some(AttributeValue::N(a)), AttributeValue::N(b)) => {
                            let sum = a.parse::<f64>().unwrap_or_default()
                                + b.parse::<f64>().unwrap_or_default();
                            AttributeValue::N(format_num(sum))
                        }
                        _ => value,
                    };
                    set_path(item, &path, merged);
                }
            }
            _ => {}
        }
    }
}

fn format_num(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn combined_filter(key_condition: &Option<String>, filter: &Option<String>) -> String {
    match (key_condition, filter) {
        (Some(k), Some(f)) => format!("{} and {}", k, f),
        (Some(k), None) => k.clone(),
        (None, Some(f)) => f.clone(),
        (None, None) => String::new(),
    }
}

fn last_key_of(item: &AvMap) -> AvMap {
    let mut key = AvMap::new();
    for attr in ["pk", "sk"] {
        if let Some(v) = item.get(attr) {
            key.insert(attr.to_string(), v.clone());
        }
    }
    key
}

#[async_trait]
impl DynamoClient for MockClient {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, Error> {
        let tables = self.tables.lock().unwrap();
        let item = input.key.as_ref().and_then(|key| {
            tables
                .get(input.table_name.as_deref().unwrap_or_default())
                .and_then(|t| t.get(&item_key(key)))
                .cloned()
        });
        Ok(GetItemOutput::builder().set_item(item).build())
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, Error> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .entry(input.table_name.clone().unwrap_or_default())
            .or_default();
        let item = input.item.unwrap_or_default();
        let key = item_key(&item);
        if let Some(condition) = &input.condition_expression {
            let existing = table.get(&key).cloned().unwrap_or_default();
            if !eval_filter(
                &existing,
                condition,
                &input.expression_attribute_names,
                &input.expression_attribute_values,
            ) {
                return Err(MockClient::conditional_failure("put condition not met"));
            }
        }
        table.insert(key, item);
        Ok(PutItemOutput::builder().build())
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, Error> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .entry(input.table_name.clone().unwrap_or_default())
            .or_default();
        let key = input.key.unwrap_or_default();
        let stored_key = item_key(&key);
        if let Some(condition) = &input.condition_expression {
            let existing = table.get(&stored_key).cloned().unwrap_or_default();
            if !eval_filter(
                &existing,
                condition,
                &input.expression_attribute_names,
                &input.expression_attribute_values,
            ) {
                return Err(MockClient::conditional_failure("delete condition not met"));
            }
        }
        let prior = table.remove(&stored_key);
        Ok(DeleteItemOutput::builder().set_attributes(prior).build())
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, Error> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .entry(input.table_name.clone().unwrap_or_default())
            .or_default();
        let key = input.key.unwrap_or_default();
        let stored_key = item_key(&key);
        let mut existing = table.get(&stored_key).cloned().unwrap_or_default();
        if let Some(condition) = &input.condition_expression {
            if !eval_filter(
                &existing,
                condition,
                &input.expression_attribute_names,
                &input.expression_attribute_values,
            ) {
                return Err(MockClient::conditional_failure("update condition not met"));
            }
        }
        for (k, v) in &key {
            existing.insert(k.clone(), v.clone());
        }
        if let Some(update) = &input.update_expression {
            apply_update_expression(
                &mut existing,
                update,
                &input.expression_attribute_names,
                &input.expression_attribute_values,
            );
        }
        table.insert(stored_key, existing.clone());
        Ok(UpdateItemOutput::builder().set_attributes(Some(existing)).build())
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, Error> {
        let tables = self.tables.lock().unwrap();
        let table = tables
            .get(input.table_name.as_deref().unwrap_or_default())
            .cloned()
            .unwrap_or_default();
        let forward = input.scan_index_forward.unwrap_or(true);
        let mut entries: Vec<(String, AvMap)> = table.into_iter().collect();
        if !forward {
            entries.reverse();
        }
        if let Some(start) = &input.exclusive_start_key {
            let start_key = item_key(start);
            entries.retain(|(key, _)| {
                if forward {
                    key > &start_key
                } else {
                    key < &start_key
                }
            });
        }
        let scanned = entries.len();
        let filter = combined_filter(&input.key_condition_expression, &input.filter_expression);
        let matched: Vec<AvMap> = entries
            .into_iter()
            .map(|(_, item)| item)
            .filter(|item| {
                eval_filter(
                    item,
                    &filter,
                    &input.expression_attribute_names,
                    &input.expression_attribute_values,
                )
            })
            .collect();
        let total = matched.len();
        let limit = input.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let page: Vec<AvMap> = matched.into_iter().take(limit).collect();
        let last_evaluated_key = if total > page.len() {
            page.last().map(last_key_of)
        } else {
            None
        };
        Ok(QueryOutput::builder()
            .set_items(Some(page.clone()))
            .count(page.len() as i32)
            .scanned_count(scanned as i32)
            .set_last_evaluated_key(last_evaluated_key)
            .build())
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, Error> {
        let tables = self.tables.lock().unwrap();
        let table = tables
            .get(input.table_name.as_deref().unwrap_or_default())
            .cloned()
            .unwrap_or_default();
        let scanned = table.len();
        let matched: Vec<AvMap> = table
            .into_values()
            .filter(|item| {
                input.filter_expression.as_deref().map_or(true, |filter| {
                    eval_filter(
                        item,
                        filter,
                        &input.expression_attribute_names,
                        &input.expression_attribute_values,
                    )
                })
            })
            .collect();
        Ok(ScanOutput::builder()
            .set_items(Some(matched.clone()))
            .count(matched.len() as i32)
            .scanned_count(scanned as i32)
            .build())
    }

    async fn batch_get_item(&self, input: BatchGetItemInput) -> Result<BatchGetItemOutput, Error> {
        let tables = self.tables.lock().unwrap();
        let mut responses: HashMap<String, Vec<AvMap>> = HashMap::new();
        for (table_name, request) in input.request_items.unwrap_or_default() {
            for key in request.keys() {
                if let Some(item) = tables
                    .get(&table_name)
                    .and_then(|t| t.get(&item_key(key)))
                {
                    responses.entry(table_name.clone()).or_default().push(item.clone());
                }
            }
        }
        Ok(BatchGetItemOutput::builder()
            .set_responses(Some(responses))
            .build())
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, Error> {
        let mut tables = self.tables.lock().unwrap();
        for (table_name, requests) in input.request_items.unwrap_or_default() {
            let table = tables.entry(table_name).or_default();
            for request in requests {
                if let Some(put) = request.put_request {
                    let item = put.item;
                    table.insert(item_key(&item), item);
                } else if let Some(delete) = request.delete_request {
                    table.remove(&item_key(&delete.key));
                }
            }
        }
        Ok(BatchWriteItemOutput::builder().build())
    }

    async fn transact_get_items(
        &self,
        input: TransactGetItemsInput,
    ) -> Result<TransactGetItemsOutput, Error> {
        let tables = self.tables.lock().unwrap();
        let mut responses = Vec::new();
        for transact in input.transact_items.unwrap_or_default() {
            let item = transact.get.and_then(|get| {
                tables
                    .get(get.table_name())
                    .and_then(|t| t.get(&item_key(get.key())))
                    .cloned()
            });
            responses.push(ItemResponse::builder().set_item(item).build());
        }
        Ok(TransactGetItemsOutput::builder()
            .set_responses(Some(responses))
            .build())
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, Error> {
        let mut tables = self.tables.lock().unwrap();
        let items = input.transact_items.unwrap_or_default();
        // First pass: every condition must hold before anything applies.
        for transact in &items {
            if let Some(put) = &transact.put {
                if let Some(condition) = put.condition_expression() {
                    let existing = tables
                        .get(put.table_name())
                        .and_then(|t| t.get(&item_key(put.item())))
                        .cloned()
                        .unwrap_or_default();
                    if !eval_filter(
                        &existing,
                        condition,
                        &put.expression_attribute_names().cloned(),
                        &put.expression_attribute_values().cloned(),
                    ) {
                        return Err(MockClient::cancelled("put condition failed"));
                    }
                }
            }
            if let Some(update) = &transact.update {
                if let Some(condition) = update.condition_expression() {
                    let existing = tables
                        .get(update.table_name())
                        .and_then(|t| t.get(&item_key(update.key())))
                        .cloned()
                        .unwrap_or_default();
                    if !eval_filter(
                        &existing,
                        condition,
                        &update.expression_attribute_names().cloned(),
                        &update.expression_attribute_values().cloned(),
                    ) {
                        return Err(MockClient::cancelled("update condition failed"));
                    }
                }
            }
            if let Some(delete) = &transact.delete {
                if let Some(condition) = delete.condition_expression() {
                    let existing = tables
                        .get(delete.table_name())
                        .and_then(|t| t.get(&item_key(delete.key())))
                        .cloned()
                        .unwrap_or_default();
                    if !eval_filter(
                        &existing,
                        condition,
                        &delete.expression_attribute_names().cloned(),
                        &delete.expression_attribute_values().cloned(),
                    ) {
                        return Err(MockClient::cancelled("delete condition failed"));
                    }
                }
            }
            if let Some(check) = &transact.condition_check {
                let existing = tables
                    .get(check.table_name())
                    .and_then(|t| t.get(&item_key(check.key())))
                    .cloned()
                    .unwrap_or_default();
                if !eval_filter(
                    &existing,
                    check.condition_expression(),
                    &check.expression_attribute_names().cloned(),
                    &check.expression_attribute_values().cloned(),
                ) {
                    return Err(MockClient::cancelled("condition check failed"));
                }
            }
        }
        // Second pass: apply.
        for transact in items {
            if let Some(put) = transact.put {
                let table = tables.entry(put.table_name().to_string()).or_default();
                let item = put.item().clone();
                table.insert(item_key(&item), item);
            } else if let Some(delete) = transact.delete {
                if let Some(table) = tables.get_mut(delete.table_name()) {
                    table.remove(&item_key(delete.key()));
                }
            } else if let Some(update) = transact.update {
                let table = tables.entry(update.table_name().to_string()).or_default();
                let key = update.key().clone();
                let stored_key = item_key(&key);
                let mut existing = table.get(&stored_key).cloned().unwrap_or_default();
                for (k, v) in &key {
                    existing.insert(k.clone(), v.clone());
                }
                apply_update_expression(
                    &mut existing,
                    update.update_expression(),
                    &update.expression_attribute_names().cloned(),
                    &update.expression_attribute_values().cloned(),
                );
                table.insert(stored_key, existing);
            }
        }
        Ok(TransactWriteItemsOutput::builder().build())
    }

    async fn create_table(&self, input: CreateTableInput) -> Result<CreateTableOutput, Error> {
        let mut tables = self.tables.lock().unwrap();
        tables.entry(input.table_name.unwrap_or_default()).or_default();
        Ok(CreateTableOutput::builder().build())
    }

    async fn delete_table(&self, input: DeleteTableInput) -> Result<DeleteTableOutput, Error> {
        let mut tables = self.tables.lock().unwrap();
        tables.remove(input.table_name.as_deref().unwrap_or_default());
        Ok(DeleteTableOutput::builder().build())
    }

    async fn describe_table(
        &self,
        _input: DescribeTableInput,
    ) -> Result<DescribeTableOutput, Error> {
        Ok(DescribeTableOutput::builder().build())
    }

    async fn list_tables(&self, _input: ListTablesInput) -> Result<ListTablesOutput, Error> {
        let tables = self.tables.lock().unwrap();
        Ok(ListTablesOutput::builder()
            .set_table_names(Some(tables.keys().cloned().collect()))
            .build())
    }

    async fn update_time_to_live(
        &self,
        _input: UpdateTimeToLiveInput,
    ) -> Result<UpdateTimeToLiveOutput, Error> {
        Ok(UpdateTimeToLiveOutput::builder().build())
    }
}

// ─── Schema fixtures ─────────────────────────────────────────────────────

pub fn default_schema() -> SchemaDef {
    SchemaDef::new("0.0.1")
        .index("primary", IndexDef::new("pk", Some("sk")))
        .index("gs1", IndexDef::new("gs1pk", Some("gs1sk")).project(Projection::All))
        .index("gs2", IndexDef::new("gs2pk", Some("gs2sk")).project(Projection::All))
        .index("gs3", IndexDef::new("gs3pk", Some("gs3sk")).project(Projection::All))
        .model(
            "User",
            fields([
                ("pk", FieldDef::string().value("${_type}#${id}")),
                ("sk", FieldDef::string().value("${_type}#")),
                ("id", FieldDef::string().generate("ulid")),
                ("name", FieldDef::string()),
                ("email", FieldDef::string()),
                ("status", FieldDef::string().default_value("idle")),
                ("age", FieldDef::number()),
                ("profile", FieldDef::object()),
                ("registered", FieldDef::date()),
                ("gs1pk", FieldDef::string().value("${_type}#${name}")),
                ("gs1sk", FieldDef::string().value("${_type}#")),
                ("gs2pk", FieldDef::string().value("type:${_type}")),
                ("gs2sk", FieldDef::string().value("${_type}#${id}")),
                ("gs3pk", FieldDef::string().value("${_type}#${status}")),
                ("gs3sk", FieldDef::string().value("${_type}#${name}")),
            ]),
        )
        .model(
            "Pet",
            fields([
                ("pk", FieldDef::string().value("${_type}")),
                ("sk", FieldDef::string().value("${_type}#${id}")),
                ("id", FieldDef::string().generate("ulid")),
                ("name", FieldDef::string()),
                (
                    "race",
                    FieldDef::string().enum_values(["dog", "cat", "fish"]).required(),
                ),
                ("breed", FieldDef::string().required()),
            ]),
        )
        .params(SchemaParams::timestamps().iso_dates(true))
}

pub fn validation_schema() -> SchemaDef {
    SchemaDef::new("0.0.1")
        .index("primary", IndexDef::new("pk", Some("sk")))
        .model(
            "User",
            fields([
                ("pk", FieldDef::string().value("user#${id}")),
                ("sk", FieldDef::string().value("user#")),
                ("id", FieldDef::string().generate("ulid")),
                (
                    "name",
                    FieldDef::string().required().validate("/^[a-zA-Z' ]+$/"),
                ),
                (
                    "email",
                    FieldDef::string().required().validate("/^[^@]+@[^@]+\\.[^@]+$/"),
                ),
                ("address", FieldDef::string().validate("/^[a-zA-Z0-9 .,'-]+$/")),
                ("city", FieldDef::string().validate("San Francisco")),
                ("zip", FieldDef::string().validate("/^[a-z0-9 ,.-]+$/")),
                ("phone", FieldDef::string().validate("/^[ 0-9\\-()+]+$/")),
                ("status", FieldDef::string().required()),
                ("age", FieldDef::number()),
            ]),
        )
}

pub fn nested_schema() -> SchemaDef {
    SchemaDef::new("0.0.1")
        .index("primary", IndexDef::new("pk", Some("sk")))
        .model(
            "User",
            fields([
                ("pk", FieldDef::string().value("${_type}#${id}")),
                ("sk", FieldDef::string().value("${_type}#")),
                ("id", FieldDef::string().generate("ulid")),
                ("name", FieldDef::string().required()),
                ("email", FieldDef::string()),
                ("status", FieldDef::string()),
                ("balance", FieldDef::number()),
                ("tokens", FieldDef::array()),
                ("started", FieldDef::date()),
                (
                    "location",
                    FieldDef::object().schema(fields([
                        ("address", FieldDef::string()),
                        ("city", FieldDef::string()),
                        ("zip", FieldDef::string()),
                        ("started", FieldDef::date()),
                    ])),
                ),
            ]),
        )
        .params(SchemaParams::timestamps())
}

pub fn mapped_schema() -> SchemaDef {
    SchemaDef::new("0.0.1")
        .index("primary", IndexDef::new("pk", Some("sk")))
        .index(
            "gs1",
            IndexDef::new("pk1", Some("sk1")).project(Projection::Include(vec![
                "pk1".to_string(),
                "sk1".to_string(),
                "data".to_string(),
            ])),
        )
        .model(
            "User",
            fields([
                ("primaryHash", FieldDef::string().value("us#${id}").map("pk")),
                ("primarySort", FieldDef::string().value("us#").map("sk")),
                ("id", FieldDef::string().generate("ulid")),
                ("name", FieldDef::string().map("nm")),
                ("email", FieldDef::string().map("em")),
                ("status", FieldDef::string().map("st")),
                ("address", FieldDef::string().map("data.address")),
                ("city", FieldDef::string().map("data.city")),
                ("zip", FieldDef::string().map("data.zip")),
                ("gs1pk", FieldDef::string().value("ty#us").map("pk1")),
                ("gs1sk", FieldDef::string().value("us#${email}").map("sk1")),
            ]),
        )
}

pub fn tenant_schema() -> SchemaDef {
    SchemaDef::new("0.0.1")
        .index("primary", IndexDef::new("pk", Some("sk")))
        .index("gs1", IndexDef::new("gs1pk", Some("gs1sk")).project(Projection::All))
        .model(
            "Account",
            fields([
                ("pk", FieldDef::string().value("${_type}#${id}")),
                ("sk", FieldDef::string().value("${_type}#")),
                ("id", FieldDef::string().generate("ulid")),
                ("name", FieldDef::string().required()),
                ("gs1pk", FieldDef::string().value("${_type}#${name}")),
                ("gs1sk", FieldDef::string().value("${_type}#")),
            ]),
        )
        .model(
            "User",
            fields([
                ("pk", FieldDef::string().value("Account#${accountId}")),
                ("sk", FieldDef::string().value("${_type}#${id}")),
                ("accountId", FieldDef::string()),
                ("id", FieldDef::string().generate("ulid")),
                ("name", FieldDef::string().required()),
                ("email", FieldDef::string().required()),
                ("gs1pk", FieldDef::string().value("${_type}#${email}")),
                ("gs1sk", FieldDef::string().value("${_type}#${accountId}")),
            ]),
        )
}

pub fn unique_schema() -> SchemaDef {
    SchemaDef::new("0.0.1")
        .index("primary", IndexDef::new("pk", Some("sk")))
        .model(
            "User",
            fields([
                ("pk", FieldDef::string().value("${_type}#${name}")),
                ("sk", FieldDef::string().value("${_type}#")),
                ("name", FieldDef::string()),
                ("email", FieldDef::string().unique().required()),
                ("phone", FieldDef::string().unique()),
                ("age", FieldDef::number()),
                (
                    "interpolated",
                    FieldDef::string().value("${name}#${email}").unique(),
                ),
            ]),
        )
}

pub fn timestamps_schema() -> SchemaDef {
    SchemaDef::new("0.0.1")
        .index("primary", IndexDef::new("pk", Some("sk")))
        .model(
            "User",
            fields([
                ("pk", FieldDef::string().value("${_type}#${id}")),
                ("sk", FieldDef::string().value("${_type}#")),
                ("id", FieldDef::string().generate("ulid")),
                ("name", FieldDef::string()),
                ("email", FieldDef::string()),
            ]),
        )
        .params(SchemaParams::timestamps().timestamp_fields("createdAt", "updatedAt"))
}

pub fn array_schema() -> SchemaDef {
    SchemaDef::new("0.0.1")
        .index("primary", IndexDef::new("pk", Some("sk")))
        .model(
            "User",
            fields([
                ("pk", FieldDef::string().value("${_type}#${email}")),
                ("sk", FieldDef::string().value("${_type}#")),
                ("email", FieldDef::string().required()),
                (
                    "addresses",
                    FieldDef::array()
                        .default_value(Value::List(Vec::new()))
                        .items(fields([
                            ("street", FieldDef::string()),
                            ("zip", FieldDef::number()),
                        ])),
                ),
            ]),
        )
}

pub fn partial_schema() -> SchemaDef {
    SchemaDef::new("0.0.1")
        .index("primary", IndexDef::new("pk", Some("sk")).project(Projection::All))
        .index("gs1", IndexDef::new("gs1pk", Some("gs1sk")).project(Projection::All))
        .model(
            "User",
            fields([
                ("pk", FieldDef::string().value("${_type}#${id}")),
                ("sk", FieldDef::string().value("${_type}#")),
                ("id", FieldDef::string().required().generate("ulid")),
                ("email", FieldDef::string().required()),
                ("status", FieldDef::string().required().default_value("active")),
                (
                    "address",
                    FieldDef::object().schema(fields([
                        ("street", FieldDef::string()),
                        ("zip", FieldDef::number()),
                        (
                            "box",
                            FieldDef::object()
                                .default_value(Value::Map(Item::new()))
                                .schema(fields([
                                    ("start", FieldDef::date()),
                                    ("end", FieldDef::date()),
                                ])),
                        ),
                    ])),
                ),
            ]),
        )
}

// ─── Table factory and assertions ────────────────────────────────────────

pub fn make_table(name: &str, schema: SchemaDef, partial: bool) -> (Table, Arc<MockClient>) {
    let mock = MockClient::new();
    let client: Arc<dyn DynamoClient> = mock.clone();
    let table = Table::new(
        TableParams::new(name, client)
            .schema(schema)
            .partial(partial),
    )
    .expect("table");
    (table, mock)
}

pub fn is_ulid(value: &Value) -> bool {
    match value.as_str() {
        Some(s) => {
            s.len() == 26 && s.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
        }
        None => false,
    }
}

pub fn assert_ulid(item: &Item, key: &str) {
    assert!(
        item.get(key).map_or(false, is_ulid),
        "expected ULID at {:?}, got {:?}",
        key,
        item.get(key)
    );
}

pub fn assert_str(item: &Item, key: &str, want: &str) {
    assert_eq!(
        item.get(key).and_then(Value::as_str),
        Some(want),
        "item[{:?}]",
        key
    );
}

pub fn assert_num(item: &Item, key: &str, want: f64) {
    assert_eq!(
        item.get(key).and_then(Value::as_f64),
        Some(want),
        "item[{:?}]",
        key
    );
}

pub fn assert_absent(item: &Item, key: &str) {
    assert!(
        item.get(key).is_none(),
        "expected item[{:?}] absent, got {:?}",
        key,
        item.get(key)
    );
}

pub fn assert_present(item: &Item, key: &str) {
    assert!(
        item.get(key).map_or(false, |v| !v.is_null()),
        "expected item[{:?}] present",
        key
    );
}

pub fn assert_recent_date(item: &Item, key: &str) {
    let date = item
        .get(key)
        .and_then(Value::as_date)
        .unwrap_or_else(|| panic!("expected date at {:?}, got {:?}", key, item.get(key)));
    let now = chrono::Utc::now();
    let delta = (now - date).num_seconds().abs();
    assert!(delta <= 5, "date {:?} not within 5s of now", date);
}
