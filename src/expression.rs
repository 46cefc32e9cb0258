use crate::error::Error;
use crate::model::{FieldBlock, Model, PreparedField};
use crate::params::{Params, ReturnValues};
use crate::value::{to_attribute_map, to_attribute_value, Item, Value};
use aws_sdk_dynamodb::types::AttributeValue;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

/// The operation an expression is being built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Write a full item.
    Put,
    /// Read a single item by key.
    Get,
    /// Delete a single item by key.
    Delete,
    /// Update attributes of a single item.
    Update,
    /// Query an index.
    Find,
    /// Scan the table.
    Scan,
    /// Transactional condition check.
    Check,
    /// Local scaffolding; never dispatched to the backend.
    Init,
}

impl Operation {
    /// Operations addressed purely by primary key.
    pub(crate) fn keys_only(self) -> bool {
        matches!(self, Operation::Get | Operation::Delete)
    }

    pub(crate) fn multi_item(self) -> bool {
        matches!(self, Operation::Find | Operation::Scan)
    }

    /// Lower-case operation name for logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Put => "put",
            Operation::Get => "get",
            Operation::Delete => "delete",
            Operation::Update => "update",
            Operation::Find => "find",
            Operation::Scan => "scan",
            Operation::Check => "check",
            Operation::Init => "init",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully built backend command, ready to be translated into the SDK's
/// typed inputs. Returned as-is (rendered to an [`Item`]) when the request
/// carries `execute: false`.
#[derive(Clone, Debug)]
pub struct Command {
    /// The operation shape.
    pub op: Operation,
    /// Target table.
    pub table_name: String,
    /// Primary key for single-item operations.
    pub key: Option<HashMap<String, AttributeValue>>,
    /// Full item for put operations.
    pub item: Option<HashMap<String, AttributeValue>>,
    /// `ConditionExpression`.
    pub condition_expression: Option<String>,
    /// `FilterExpression`.
    pub filter_expression: Option<String>,
    /// `KeyConditionExpression`.
    pub key_condition_expression: Option<String>,
    /// `UpdateExpression`.
    pub update_expression: Option<String>,
    /// `ProjectionExpression`.
    pub projection_expression: Option<String>,
    /// `#_N` → attribute-name substitutions.
    pub names: Option<HashMap<String, String>>,
    /// `:_N` → value substitutions.
    pub values: Option<HashMap<String, AttributeValue>>,
    /// Secondary index name.
    pub index_name: Option<String>,
    /// Page size.
    pub limit: Option<i32>,
    /// Strongly consistent read flag.
    pub consistent_read: Option<bool>,
    /// Traversal direction for queries.
    pub scan_index_forward: Option<bool>,
    /// Pagination cursor.
    pub exclusive_start_key: Option<HashMap<String, AttributeValue>>,
    /// `Select` passthrough.
    pub select: Option<String>,
    /// Parallel scan segment.
    pub segment: Option<i32>,
    /// Parallel scan segment count.
    pub total_segments: Option<i32>,
    /// `ReturnValues` policy.
    pub return_values: Option<String>,
    /// `ReturnConsumedCapacity` level.
    pub return_consumed_capacity: Option<String>,
}

impl Command {
    fn new(op: Operation, table_name: &str) -> Self {
        Command {
            op,
            table_name: table_name.to_string(),
            key: None,
            item: None,
            condition_expression: None,
            filter_expression: None,
            key_condition_expression: None,
            update_expression: None,
            projection_expression: None,
            names: None,
            values: None,
            index_name: None,
            limit: None,
            consistent_read: None,
            scan_index_forward: None,
            exclusive_start_key: None,
            select: None,
            segment: None,
            total_segments: None,
            return_values: None,
            return_consumed_capacity: None,
        }
    }
}

#[derive(Default, Debug)]
struct Updates {
    add: Vec<String>,
    delete: Vec<String>,
    remove: Vec<String>,
    set: Vec<String>,
}

/// Reference to the field-level facts `add` needs; synthetic entries cover
/// unknown attributes of generic models and assembled packed attributes.
struct AddField<'f> {
    name: &'f str,
    attribute: &'f [String],
    is_indexed: bool,
    filter_enabled: bool,
}

impl<'f> AddField<'f> {
    fn from_prepared(field: &'f PreparedField) -> Self {
        AddField {
            name: &field.name,
            attribute: &field.attribute,
            is_indexed: field.is_indexed,
            filter_enabled: field.filter_enabled,
        }
    }
}

/// Builds the backend command for one model operation: key map or key
/// conditions, condition/filter/update/projection expressions and the
/// deduplicated placeholder tables.
#[derive(Debug)]
pub(crate) struct Expression<'a> {
    model: &'a Model,
    params: &'a Params,
    op: Operation,
    table_name: String,
    pub(crate) properties: Item,

    index_name: Option<String>,
    hash: String,
    sort: Option<String>,

    already: HashSet<String>,
    key: Item,
    keys: Vec<String>,
    conditions: Vec<String>,
    filters: Vec<String>,
    project: Vec<String>,
    puts: Item,
    mapped: IndexMap<String, Item>,

    names: IndexMap<String, String>,
    names_index: HashMap<String, usize>,
    values: IndexMap<String, Value>,
    values_index: HashMap<String, usize>,

    updates: Updates,
    pub(crate) execute: bool,
}

impl<'a> Expression<'a> {
    pub(crate) fn new(
        model: &'a Model,
        table_name: &str,
        op: Operation,
        properties: Item,
        params: &'a Params,
    ) -> Result<Expression<'a>, Error> {
        let (index_name, index) = model.select_index(params);
        let mut expr = Expression {
            model,
            params,
            op,
            table_name: table_name.to_string(),
            properties,
            index_name: (index_name != "primary").then(|| index_name.to_string()),
            hash: index.hash_attr().to_string(),
            sort: index.sort_attr().map(str::to_string),
            already: HashSet::new(),
            key: Item::new(),
            keys: Vec::new(),
            conditions: Vec::new(),
            filters: Vec::new(),
            project: Vec::new(),
            puts: Item::new(),
            mapped: IndexMap::new(),
            names: IndexMap::new(),
            names_index: HashMap::new(),
            values: IndexMap::new(),
            values_index: HashMap::new(),
            updates: Updates::default(),
            execute: params.should_execute(),
        };
        expr.prepare()?;
        Ok(expr)
    }

    fn prepare(&mut self) -> Result<(), Error> {
        let model = self.model;
        let op = self.op;

        match op {
            Operation::Find => self.add_where_filters()?,
            Operation::Delete | Operation::Put | Operation::Update | Operation::Check => {
                self.add_conditions(op)?
            }
            Operation::Scan => {
                self.add_where_filters()?;
                // Generic scans filter on unknown attributes too.
                let props = self.properties.clone();
                for (name, value) in &props {
                    if !model.block.fields.contains_key(name) && !value.is_null() {
                        let target = self.add_name(name);
                        let variable = self.add_value(value.clone());
                        self.filters.push(format!("#_{} = :_{}", target, variable));
                    }
                }
            }
            Operation::Get | Operation::Init => {}
        }

        let props = self.properties.clone();
        self.puts = self.add_properties(op, &model.block, &props, "", true)?;

        // Every declared sub-property of a packed attribute must be present
        // before the attribute is emitted.
        let mapped = std::mem::take(&mut self.mapped);
        for (attribute, submap) in &mapped {
            let expected = model.mappings.get(attribute).map_or(0, Vec::len);
            if submap.len() != expected {
                return Err(Error::argument(format!(
                    "missing properties for mapped field \"{}\" in model \"{}\"",
                    attribute,
                    model.name()
                )));
            }
        }
        for (attribute, submap) in mapped {
            let value = Value::Map(submap);
            let synth_attr = [attribute.clone()];
            let synth = AddField {
                name: &attribute,
                attribute: &synth_attr,
                is_indexed: false,
                filter_enabled: true,
            };
            self.add(op, &props, &synth, &attribute, &value)?;
            self.puts.insert(attribute.clone(), value);
        }

        if let Some(fields) = self.params.fields.clone() {
            for name in fields {
                if self.params.batch.is_some() || model.generic {
                    let idx = self.add_name(&name);
                    self.project.push(format!("#_{}", idx));
                } else if let Some(field) = model.block.fields.get(&name) {
                    let attribute = field.attribute[0].clone();
                    let idx = self.add_name(&attribute);
                    self.project.push(format!("#_{}", idx));
                }
            }
        }
        Ok(())
    }

    /// Process one block level of properties, returning the attribute-keyed
    /// record. Nested blocks recurse; in partial update mode the recursion
    /// emits dotted-path set clauses per leaf instead of replacing the whole
    /// nested value.
    fn add_properties(
        &mut self,
        op: Operation,
        block: &FieldBlock,
        properties: &Item,
        prefix: &str,
        emit: bool,
    ) -> Result<Item, Error> {
        let model = self.model;
        let mut rec = Item::new();

        for (name, value) in properties {
            let Some(field) = block.fields.get(name) else {
                if model.generic {
                    let synth_attr = [name.clone()];
                    let synth = AddField {
                        name,
                        attribute: &synth_attr,
                        is_indexed: false,
                        filter_enabled: true,
                    };
                    self.add(op, properties, &synth, name, value)?;
                }
                rec.insert(name.clone(), value.clone());
                continue;
            };

            let attribute = field.attribute[0].clone();
            let path = if prefix.is_empty() {
                attribute.clone()
            } else {
                format!("{}.{}", prefix, attribute)
            };

            match &field.block {
                None => {
                    if emit {
                        self.add(op, properties, &AddField::from_prepared(field), &path, value)?;
                    }
                    rec.insert(attribute, value.clone());
                }
                Some(nested) => {
                    let partial = model.get_partial(field, self.params);
                    let emit_leaves = partial && op == Operation::Update;
                    match value {
                        Value::List(elements) if field.is_array => {
                            let mut out = Vec::with_capacity(elements.len());
                            for (i, element) in elements.iter().enumerate() {
                                let element_path = format!("{}[{}]", path, i);
                                match element {
                                    Value::Map(sub) => out.push(Value::Map(self.add_properties(
                                        op,
                                        nested,
                                        sub,
                                        &element_path,
                                        emit_leaves,
                                    )?)),
                                    other => out.push(other.clone()),
                                }
                            }
                            let assembled = Value::List(out);
                            if !partial {
                                self.add(
                                    op,
                                    properties,
                                    &AddField::from_prepared(field),
                                    &path,
                                    &assembled,
                                )?;
                            }
                            rec.insert(attribute, assembled);
                        }
                        Value::Map(sub) => {
                            let assembled =
                                Value::Map(self.add_properties(op, nested, sub, &path, emit_leaves)?);
                            if !partial {
                                self.add(
                                    op,
                                    properties,
                                    &AddField::from_prepared(field),
                                    &path,
                                    &assembled,
                                )?;
                            }
                            rec.insert(attribute, assembled);
                        }
                        other => {
                            rec.insert(attribute, other.clone());
                        }
                    }
                }
            }
        }
        Ok(rec)
    }

    /// Route one field value into key / filter / update state.
    fn add(
        &mut self,
        op: Operation,
        properties: &Item,
        field: &AddField<'_>,
        path: &str,
        value: &Value,
    ) -> Result<(), Error> {
        if self.already.contains(path) {
            return Ok(());
        }
        if field.attribute.len() > 1 {
            // Packed sub-property: stage until all siblings arrive.
            let top = field.attribute[0].clone();
            let sub = field.attribute[1].clone();
            self.mapped.entry(top).or_default().insert(sub, value.clone());
            return Ok(());
        }

        let is_hash = path == self.hash;
        let is_sort = Some(path) == self.sort.as_deref();
        let present = properties.get(field.name).is_some_and(|v| !v.is_null());

        if is_hash || is_sort {
            match op {
                Operation::Find => self.add_key(op, field, value)?,
                Operation::Delete | Operation::Get | Operation::Update | Operation::Check => {
                    if field.is_indexed {
                        self.add_key(op, field, value)?;
                    }
                }
                Operation::Put | Operation::Scan | Operation::Init => {}
            }
        } else {
            match op {
                Operation::Find | Operation::Scan => {
                    if present && field.filter_enabled && self.params.batch.is_none() {
                        let target = self.prepare_key(path);
                        let variable = self.add_value_exp(value.clone());
                        self.filters.push(format!("{} = {}", target, variable));
                    }
                }
                Operation::Update => self.add_update(field, path, value)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn add_key(&mut self, op: Operation, field: &AddField<'_>, value: &Value) -> Result<(), Error> {
        let attribute = field.attribute[0].clone();
        if op == Operation::Find {
            if Some(attribute.as_str()) == self.sort.as_deref() {
                if let Value::Map(operators) = value {
                    if !operators.is_empty() {
                        let operators = operators.clone();
                        for (action, operand) in &operators {
                            match action.as_str() {
                                "begins" | "begins_with" => {
                                    let n = self.add_name(&attribute);
                                    let v = self.add_value(operand.clone());
                                    self.keys.push(format!("begins_with(#_{}, :_{})", n, v));
                                }
                                "between" => {
                                    let Some([low, high]) =
                                        operand.as_list().and_then(|l| <&[Value; 2]>::try_from(l).ok())
                                    else {
                                        return Err(Error::argument(
                                            "between requires a two-element list",
                                        ));
                                    };
                                    let n = self.add_name(&attribute);
                                    let lo = self.add_value(low.clone());
                                    let hi = self.add_value(high.clone());
                                    self.keys
                                        .push(format!("#_{} BETWEEN :_{} AND :_{}", n, lo, hi));
                                }
                                "<" | "<=" | "=" | ">=" | ">" => {
                                    let n = self.add_name(&attribute);
                                    let v = self.add_value(operand.clone());
                                    self.keys.push(format!("#_{} {} :_{}", n, action, v));
                                }
                                other => {
                                    return Err(Error::argument(format!(
                                        "invalid key condition operator \"{}\"",
                                        other
                                    )));
                                }
                            }
                        }
                        return Ok(());
                    }
                }
            }
            let n = self.add_name(&attribute);
            let v = self.add_value(value.clone());
            self.keys.push(format!("#_{} = :_{}", n, v));
        } else {
            self.key.insert(attribute.clone(), value.clone());
            let _ = self.already.insert(attribute);
        }
        Ok(())
    }

    fn add_update(&mut self, field: &AddField<'_>, path: &str, value: &Value) -> Result<(), Error> {
        if path == self.hash || Some(path) == self.sort.as_deref() {
            return Ok(());
        }
        // The type marker is only (re)written when the update may create
        // the item.
        if field.name == self.model.type_field
            && self.params.exists == Some(crate::params::Exists::MustExist)
        {
            return Ok(());
        }
        if self.params.remove.iter().any(|r| r == field.name) {
            return Ok(());
        }
        let target = self.prepare_key(path);
        let variable = self.add_value_exp(value.clone());
        self.updates.set.push(format!("{} = {}", target, variable));
        Ok(())
    }

    fn add_conditions(&mut self, op: Operation) -> Result<(), Error> {
        let params = self.params;
        let hash = self.hash.clone();
        let sort = self.sort.clone();

        match params.exists {
            Some(crate::params::Exists::MustExist) => {
                let n = self.add_name(&hash);
                self.conditions.push(format!("attribute_exists(#_{})", n));
                if let Some(sort) = &sort {
                    let n = self.add_name(sort);
                    self.conditions.push(format!("attribute_exists(#_{})", n));
                }
            }
            Some(crate::params::Exists::MustNotExist) => {
                let n = self.add_name(&hash);
                self.conditions.push(format!("attribute_not_exists(#_{})", n));
                if let Some(sort) = &sort {
                    let n = self.add_name(sort);
                    self.conditions.push(format!("attribute_not_exists(#_{})", n));
                }
            }
            Some(crate::params::Exists::DontCare) | None => {}
        }

        if op == Operation::Update {
            self.add_update_conditions()?;
        }

        if let Some(clause) = params.where_clause.clone() {
            let expanded = self.expand(&clause)?;
            self.conditions.push(expanded);
        }
        Ok(())
    }

    fn add_where_filters(&mut self) -> Result<(), Error> {
        if let Some(clause) = self.params.where_clause.clone() {
            let expanded = self.expand(&clause)?;
            self.filters.push(expanded);
        }
        Ok(())
    }

    fn add_update_conditions(&mut self) -> Result<(), Error> {
        let params = self.params;

        let assert_not_key = |expr: &Self, key: &str, action: &str| -> Result<(), Error> {
            if key == expr.hash || Some(key) == expr.sort.as_deref() {
                return Err(Error::argument(format!(
                    "cannot {} the hash or sort attribute",
                    action
                )));
            }
            Ok(())
        };

        for (key, value) in params.add.clone() {
            assert_not_key(self, &key, "add")?;
            let (target, variable) = self.prepare_key_value(&key, &value)?;
            self.updates.add.push(format!("{} {}", target, variable));
        }
        for (key, value) in params.delete.clone() {
            assert_not_key(self, &key, "delete")?;
            let (target, variable) = self.prepare_key_value(&key, &value)?;
            self.updates.delete.push(format!("{} {}", target, variable));
        }
        for key in params.remove.clone() {
            assert_not_key(self, &key, "remove")?;
            let target = self.prepare_key(&key);
            self.updates.remove.push(target);
        }
        for (key, value) in params.set.clone() {
            assert_not_key(self, &key, "set")?;
            let (target, variable) = self.prepare_key_value(&key, &Value::from(value))?;
            self.updates.set.push(format!("{} = {}", target, variable));
        }
        for (key, value) in params.push.clone() {
            assert_not_key(self, &key, "push")?;
            let empty = self.add_value(Value::List(Vec::new()));
            let items = self.add_value(as_list(value));
            let target = self.prepare_key(&key);
            self.updates.set.push(format!(
                "{} = list_append(if_not_exists({}, :_{}), :_{})",
                target, target, empty, items
            ));
        }
        Ok(())
    }

    /// Expand `${field.path}`, `@{substitution}` and `{literal}` tokens of a
    /// user-provided where/set expression string.
    fn expand(&mut self, input: &str) -> Result<String, Error> {
        // ${field.path[n]} → attribute-name placeholder chains
        let step1 = replace_tokens(attr_token_re(), input, |caps| {
            let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            Ok(self.make_target(inner))
        })?;

        // @{name} / @{...name} → substitution value placeholders
        let step2 = replace_tokens(substitution_token_re(), &step1, |caps| {
            let spread = caps.get(1).is_some();
            let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let Some(value) = self.params.substitutions.get(name).cloned() else {
                return Err(Error::argument(format!(
                    "missing substitution for \"{}\"",
                    name
                )));
            };
            if spread {
                if let Value::List(values) = value {
                    let indices: Vec<String> = values
                        .into_iter()
                        .map(|v| format!(":_{}", self.add_value(v)))
                        .collect();
                    return Ok(indices.join(", "));
                }
            }
            Ok(format!(":_{}", self.add_value(value)))
        })?;

        // {literal} → value placeholders
        replace_tokens(literal_token_re(), &step2, |caps| {
            let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let value = if let Ok(number) = inner.parse::<f64>() {
                Value::Number(number)
            } else if inner == "true" {
                Value::Bool(true)
            } else if inner == "false" {
                Value::Bool(false)
            } else if inner.len() >= 2 && inner.starts_with('"') && inner.ends_with('"') {
                Value::String(inner[1..inner.len() - 1].to_string())
            } else {
                Value::String(inner.to_string())
            };
            Ok(format!(":_{}", self.add_value(value)))
        })
    }

    /// Translate a dotted field path into a chain of `#_N` references,
    /// resolving each segment through the attribute map (honouring packed
    /// sub-attributes and `[n]` subscripts).
    fn make_target(&mut self, name: &str) -> String {
        let model = self.model;
        let mut fields = Some(&model.block.fields);
        let mut targets = Vec::new();
        for part in name.split('.') {
            let (part, subscript) = match part.find('[') {
                Some(at) => (&part[..at], &part[at..]),
                None => (part, ""),
            };
            let attribute = match fields.and_then(|f| f.get(part)) {
                Some(field) => {
                    let attribute = field.attribute.clone();
                    fields = field.block.as_ref().map(|b| &b.fields);
                    attribute
                }
                None => {
                    fields = None;
                    vec![part.to_string()]
                }
            };
            // A packed sub-attribute resolves to parent.sub placeholders.
            let mut rendered: Vec<String> = Vec::with_capacity(attribute.len());
            for att in &attribute {
                let idx = self.add_name(att);
                rendered.push(format!("#_{}", idx));
            }
            targets.push(format!("{}{}", rendered.join("."), subscript));
        }
        targets.join(".")
    }

    fn prepare_key(&mut self, key: &str) -> String {
        let _ = self.already.insert(key.to_string());
        self.make_target(key)
    }

    fn prepare_key_value(&mut self, key: &str, value: &Value) -> Result<(String, String), Error> {
        let target = self.prepare_key(key);
        if let Value::String(s) = value {
            if s.contains('$') || s.contains('{') || s.contains('@') {
                let expanded = self.expand(s)?;
                return Ok((target, expanded));
            }
        }
        Ok((target, self.add_value_exp(value.clone())))
    }

    /// Intern an attribute name; repeated names share one index.
    fn add_name(&mut self, name: &str) -> usize {
        if let Some(idx) = self.names_index.get(name) {
            return *idx;
        }
        let idx = self.names.len();
        self.names.insert(format!("#_{}", idx), name.to_string());
        self.names_index.insert(name.to_string(), idx);
        idx
    }

    /// Intern a value. Scalars dedup by display form; numbers, lists and
    /// maps always get a fresh index so compound values are never aliased.
    fn add_value(&mut self, value: Value) -> usize {
        let dedup = !matches!(
            value,
            Value::Number(_) | Value::List(_) | Value::Map(_) | Value::Null
        );
        if dedup {
            let key = value.display_string();
            if let Some(idx) = self.values_index.get(&key) {
                return *idx;
            }
            let idx = self.values.len();
            self.values.insert(format!(":_{}", idx), value);
            self.values_index.insert(key, idx);
            return idx;
        }
        let idx = self.values.len();
        self.values.insert(format!(":_{}", idx), value);
        idx
    }

    fn add_value_exp(&mut self, value: Value) -> String {
        format!(":_{}", self.add_value(value))
    }

    fn and(terms: &[String]) -> String {
        if terms.len() == 1 {
            return terms[0].clone();
        }
        let wrapped: Vec<String> = terms.iter().map(|t| format!("({})", t)).collect();
        wrapped.join(" and ")
    }

    /// Assemble the final command.
    pub(crate) fn command(&self) -> Result<Command, Error> {
        let op = self.op;
        let params = self.params;

        let key = to_attribute_map(&self.key)?;
        let puts = to_attribute_map(&self.puts)?;
        let mut values: HashMap<String, AttributeValue> = HashMap::with_capacity(self.values.len());
        for (placeholder, value) in &self.values {
            values.insert(placeholder.clone(), to_attribute_value(value)?);
        }

        // Batch commands are minimal: a key or an item, nothing else.
        if params.batch.is_some() {
            if !self.filters.is_empty() {
                return Err(Error::argument("filters cannot be used with batch operations"));
            }
            let mut cmd = Command::new(op, &self.table_name);
            match op {
                Operation::Get | Operation::Delete => cmd.key = Some(key),
                Operation::Put => cmd.item = Some(puts),
                other => {
                    return Err(Error::argument(format!(
                        "unsupported batch operation \"{}\"",
                        other
                    )));
                }
            }
            return Ok(cmd);
        }

        let mut cmd = Command::new(op, &self.table_name);
        if !self.conditions.is_empty() {
            cmd.condition_expression = Some(Self::and(&self.conditions));
        }
        if !self.filters.is_empty() {
            cmd.filter_expression = Some(Self::and(&self.filters));
        }
        if !self.keys.is_empty() {
            cmd.key_condition_expression = Some(self.keys.join(" and "));
        }
        if !self.project.is_empty() {
            cmd.projection_expression = Some(self.project.join(", "));
        }
        if !self.names.is_empty() {
            cmd.names = Some(self.names.clone().into_iter().collect());
        }
        if !values.is_empty() {
            cmd.values = Some(values);
        }

        if let Some(select) = params.select.clone() {
            cmd.select = Some(select);
        } else if params.count {
            cmd.select = Some("COUNT".to_string());
        }

        if params.stats {
            cmd.return_consumed_capacity =
                Some(params.capacity.clone().unwrap_or_else(|| "TOTAL".to_string()));
        }

        let return_values = params.return_values.and_then(ReturnValues::as_dynamo);
        match op {
            Operation::Put => {
                cmd.item = Some(puts);
                cmd.return_values = Some(return_values.unwrap_or("NONE").to_string());
            }
            Operation::Update => {
                cmd.return_values = Some(return_values.unwrap_or("ALL_NEW").to_string());
                let mut parts = Vec::new();
                if !self.updates.add.is_empty() {
                    parts.push(format!("add {}", self.updates.add.join(", ")));
                }
                if !self.updates.delete.is_empty() {
                    parts.push(format!("delete {}", self.updates.delete.join(", ")));
                }
                if !self.updates.remove.is_empty() {
                    parts.push(format!("remove {}", self.updates.remove.join(", ")));
                }
                if !self.updates.set.is_empty() {
                    parts.push(format!("set {}", self.updates.set.join(", ")));
                }
                cmd.update_expression = Some(parts.join(" "));
            }
            Operation::Delete => {
                cmd.return_values = Some(return_values.unwrap_or("ALL_OLD").to_string());
            }
            _ => {}
        }

        if matches!(
            op,
            Operation::Delete | Operation::Get | Operation::Update | Operation::Check
        ) {
            cmd.key = Some(key);
        }

        if matches!(op, Operation::Find | Operation::Get | Operation::Scan) {
            cmd.consistent_read = Some(params.consistent);
            cmd.index_name = self.index_name.clone();
        }

        if op.multi_item() {
            if let Some(limit) = params.limit {
                cmd.limit = Some(limit as i32);
            }
            // Explicit reverse or backward paging (prev without next) each
            // flip traversal; combined they cancel out.
            let prev_mode = params.prev.is_some() && params.next.is_none();
            cmd.scan_index_forward = Some(!(params.reverse ^ prev_mode));

            let cursor = params.next.as_ref().or(params.prev.as_ref());
            if let Some(cursor) = cursor {
                let mut start = Item::new();
                if let Some(hash_value) = cursor.get(&self.hash) {
                    start.insert(self.hash.clone(), hash_value.clone());
                }
                if let Some(sort) = &self.sort {
                    if let Some(sort_value) = cursor.get(sort) {
                        start.insert(sort.clone(), sort_value.clone());
                    }
                }
                if self.index_name.is_some() {
                    let primary = self.model.primary();
                    if let Some(hash_value) = cursor.get(primary.hash_attr()) {
                        start.insert(primary.hash_attr().to_string(), hash_value.clone());
                    }
                    if let Some(sort) = primary.sort_attr() {
                        if let Some(sort_value) = cursor.get(sort) {
                            start.insert(sort.to_string(), sort_value.clone());
                        }
                    }
                }
                if start.get(&self.hash).is_some() {
                    cmd.exclusive_start_key = Some(to_attribute_map(&start)?);
                }
            }
        }

        if op == Operation::Scan {
            if let Some(segments) = params.segments {
                if segments > 0 {
                    cmd.total_segments = Some(segments);
                }
            }
            if let Some(segment) = params.segment {
                if segment >= 0 {
                    cmd.segment = Some(segment);
                }
            }
        }

        if let Some(hook) = &params.post_format {
            cmd = hook(cmd);
        }
        Ok(cmd)
    }

    /// Human-readable rendering of the command, returned instead of a
    /// result when the request carries `execute: false`.
    pub(crate) fn describe(&self, cmd: &Command) -> Item {
        let mut out = Item::new();
        out.insert("TableName".into(), Value::from(cmd.table_name.as_str()));
        out.insert("Operation".into(), Value::from(cmd.op.as_str()));
        let strings = [
            ("KeyConditionExpression", &cmd.key_condition_expression),
            ("FilterExpression", &cmd.filter_expression),
            ("ConditionExpression", &cmd.condition_expression),
            ("UpdateExpression", &cmd.update_expression),
            ("ProjectionExpression", &cmd.projection_expression),
            ("Select", &cmd.select),
            ("IndexName", &cmd.index_name),
            ("ReturnValues", &cmd.return_values),
        ];
        for (label, value) in strings {
            if let Some(value) = value {
                out.insert(label.into(), Value::from(value.as_str()));
            }
        }
        if !self.names.is_empty() {
            let names: Item = self
                .names
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect();
            out.insert("ExpressionAttributeNames".into(), Value::Map(names));
        }
        if !self.values.is_empty() {
            out.insert("ExpressionAttributeValues".into(), Value::Map(self.values.clone()));
        }
        if !self.key.is_empty() {
            out.insert("Key".into(), Value::Map(self.key.clone()));
        }
        if cmd.item.is_some() {
            out.insert("Item".into(), Value::Map(self.puts.clone()));
        }
        if let Some(limit) = cmd.limit {
            out.insert("Limit".into(), Value::from(i64::from(limit)));
        }
        if let Some(forward) = cmd.scan_index_forward {
            out.insert("ScanIndexForward".into(), Value::from(forward));
        }
        out
    }

    /// The primary-key portion of this expression, as field values.
    pub(crate) fn key_item(&self) -> Item {
        self.key.clone()
    }
}

fn as_list(value: Value) -> Value {
    match value {
        Value::List(_) => value,
        other => Value::List(vec![other]),
    }
}

fn replace_tokens<F>(re: &Regex, input: &str, mut f: F) -> Result<String, Error>
where
    F: FnMut(&regex::Captures<'_>) -> Result<String, Error>,
{
    let mut error = None;
    let out = re.replace_all(input, |caps: &regex::Captures<'_>| match f(caps) {
        Ok(s) => s,
        Err(e) => {
            error = Some(e);
            String::new()
        }
    });
    match error {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}

fn attr_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{(.*?)\}").expect("valid token regex"))
}

fn substitution_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@\{(\.\.\.)?([^}]+)\}").expect("valid token regex"))
}

fn literal_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^}]*)\}").expect("valid token regex"))
}
