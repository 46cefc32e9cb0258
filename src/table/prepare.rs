//! Property preparation (write side) and record transformation (read side).
//!
//! The write pipeline runs, in order: nested-block recursion, context
//! injection, type marker, defaults and generated ids, value templates in
//! dependency order, null-to-remove conversion, validation, selection and
//! type-directed write conversion. The read side reverses the stored
//! representation back into typed property maps.

use crate::error::{Error, ErrorCode};
use crate::expression::Operation;
use crate::model::{template_token_re, FieldBlock, Model, PreparedField};
use crate::params::{Exists, Params};
use crate::schema::{FieldType, IndexDef};
use crate::table::Table;
use crate::value::{format_number, property_at, Item, Value};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use indexmap::IndexMap;
use tracing::warn;

impl Table {
    /// Turn user properties into a prepared record for the operation, or
    /// `None` when the operation must fall back to find-then-act (key op on
    /// a secondary index, or a keyed op without a resolvable sort value).
    /// `properties` is mutated in place (context, defaults, templates), so a
    /// fallback find can reuse the enriched map.
    pub(crate) fn prepare_properties(
        &self,
        model: &Model,
        op: Operation,
        properties: &mut Item,
        params: &mut Params,
    ) -> Result<Option<Item>, Error> {
        let (index_name, index) = model.select_index(params);
        if model.needs_fallback(index_name, op.multi_item()) {
            return Ok(None);
        }
        let index = index.clone();
        let context = self.get_context();
        let mut fallback = false;
        let rec = self.collect_properties(
            model,
            op,
            "",
            &model.block,
            &index,
            properties,
            params,
            &context,
            &mut fallback,
            true,
        )?;
        if fallback {
            return Ok(None);
        }
        if op != Operation::Scan && model.hash_value(&rec, &index).is_none() {
            return Err(Error::coded(
                ErrorCode::Missing,
                format!(
                    "cannot {} \"{}\": missing index key value",
                    op,
                    model.name()
                ),
            ));
        }
        Ok(Some(rec))
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_properties(
        &self,
        model: &Model,
        op: Operation,
        pathname: &str,
        block: &FieldBlock,
        index: &IndexDef,
        properties: &mut Item,
        params: &mut Params,
        context: &Item,
        fallback: &mut bool,
        top: bool,
    ) -> Result<Item, Error> {
        let mut rec = Item::new();

        if model.nested && !op.keys_only() {
            self.collect_nested(
                model, op, pathname, block, index, properties, params, context, &mut rec, fallback,
            )?;
        }

        self.inject_context(model, op, block, index, properties, context);
        self.apply_defaults(op, block, properties, params);
        self.run_templates(model, op, index, block, properties)?;
        convert_nulls(block, pathname, properties, params);
        validate_properties(model, op, block, properties)?;
        self.select_properties(model, op, block, index, properties, params, &mut rec, fallback, top);
        if *fallback {
            return Ok(rec);
        }
        self.transform_properties(block, &mut rec)?;
        Ok(rec)
    }

    /// Nested object and array fields are collected before the top-level
    /// steps run. Partial mode omits absent nested properties; otherwise
    /// nested blocks default as on a fresh put.
    #[allow(clippy::too_many_arguments)]
    fn collect_nested(
        &self,
        model: &Model,
        op: Operation,
        pathname: &str,
        block: &FieldBlock,
        index: &IndexDef,
        properties: &mut Item,
        params: &mut Params,
        context: &Item,
        rec: &mut Item,
        fallback: &mut bool,
    ) -> Result<(), Error> {
        for field in block.fields.values() {
            let Some(nested) = &field.block else { continue };
            let name = &field.name;
            let mut value = properties.get(name).cloned().filter(|v| !v.is_null());

            if op == Operation::Put && value.is_none() {
                if field.required {
                    value = Some(if field.field_type == FieldType::Array {
                        Value::List(Vec::new())
                    } else {
                        Value::Map(Item::new())
                    });
                } else if let Some(default) = &field.default {
                    value = Some(default.clone());
                }
            }
            let Some(value) = value else { continue };

            let nested_context = context
                .get(name)
                .and_then(Value::as_map)
                .cloned()
                .unwrap_or_default();
            let partial = model.get_partial(field, params);
            let path = if pathname.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", pathname, name)
            };

            if field.is_array {
                let elements = match value {
                    Value::List(elements) => elements,
                    _ => continue,
                };
                let mut out = Vec::with_capacity(elements.len());
                for (i, element) in elements.into_iter().enumerate() {
                    let element_path = format!("{}[{}]", path, i);
                    let mut element_map = element.as_map().cloned().unwrap_or_default();
                    let obj = self.collect_properties(
                        model,
                        op,
                        &element_path,
                        nested,
                        index,
                        &mut element_map,
                        params,
                        &nested_context,
                        fallback,
                        false,
                    )?;
                    if !partial || !obj.is_empty() || field.default.is_some() {
                        out.push(Value::Map(obj));
                    }
                }
                rec.insert(name.clone(), Value::List(out));
            } else {
                let mut sub = value.as_map().cloned().unwrap_or_default();
                let obj = self.collect_properties(
                    model,
                    op,
                    &path,
                    nested,
                    index,
                    &mut sub,
                    params,
                    &nested_context,
                    fallback,
                    false,
                )?;
                if !partial || !obj.is_empty() || field.default.is_some() {
                    rec.insert(name.clone(), Value::Map(obj));
                }
            }
        }
        Ok(())
    }

    /// Context values fill any absent field, except primary key attributes
    /// on non-put operations so callers can address items by other keys.
    /// Non-generic models always get the type marker.
    fn inject_context(
        &self,
        model: &Model,
        op: Operation,
        block: &FieldBlock,
        index: &IndexDef,
        properties: &mut Item,
        context: &Item,
    ) {
        for field in block.fields.values() {
            if field.block.is_some() {
                continue;
            }
            let attribute = field.attribute[0].as_str();
            let is_index_key = attribute == index.hash_attr()
                || Some(attribute) == index.sort_attr();
            if op == Operation::Put || !is_index_key {
                if let Some(value) = context.get(&field.name) {
                    properties.insert(field.name.clone(), value.clone());
                }
            }
        }
        if !model.generic {
            properties.insert(
                model.type_field.clone(),
                Value::from(model.name()),
            );
        }
    }

    /// Defaults and generated identifiers apply on create and init, and on
    /// update when the operation is an upsert.
    pub(crate) fn apply_defaults(
        &self,
        op: Operation,
        block: &FieldBlock,
        properties: &mut Item,
        params: &Params,
    ) {
        let upsert = op == Operation::Update && params.exists == Some(Exists::DontCare);
        if !(op == Operation::Put || op == Operation::Init || upsert) {
            return;
        }
        for field in block.fields.values() {
            if field.block.is_some() || properties.contains_key(&field.name) {
                continue;
            }
            if field.value_template.is_some() {
                continue;
            }
            if let Some(default) = &field.default {
                properties.insert(field.name.clone(), default.clone());
            } else if op == Operation::Init {
                if field.generate.is_none() {
                    properties.insert(field.name.clone(), Value::Null);
                }
            } else if let Some(generate) = &field.generate {
                properties.insert(field.name.clone(), Value::from(crate::uid::generate(generate)));
            }
        }
    }

    /// Evaluate value templates in dependency order. Index attributes not
    /// belonging to the selected index are skipped for read operations.
    pub(crate) fn run_templates(
        &self,
        model: &Model,
        op: Operation,
        index: &IndexDef,
        block: &FieldBlock,
        properties: &mut Item,
    ) -> Result<(), Error> {
        for name in &block.deps {
            let Some(field) = block.fields.get(name) else { continue };
            if field.block.is_some() {
                continue;
            }
            if field.is_indexed && !matches!(op, Operation::Put | Operation::Update) {
                let attribute = field.attribute[0].as_str();
                if attribute != index.hash_attr() && Some(attribute) != index.sort_attr() {
                    continue;
                }
            }
            let Some(template) = field.value_template.clone() else { continue };
            if properties.contains_key(name) {
                continue;
            }
            if let Some(value) = run_template(op, index, field, properties, &template) {
                properties.insert(name.clone(), value);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn select_properties(
        &self,
        model: &Model,
        op: Operation,
        block: &FieldBlock,
        index: &IndexDef,
        properties: &Item,
        params: &Params,
        rec: &mut Item,
        fallback: &mut bool,
        top: bool,
    ) {
        let project = model.projection(index);
        for field in block.fields.values() {
            if field.block.is_some() {
                continue;
            }
            let name = &field.name;
            let mut omit = false;
            if top {
                let attribute = field.attribute[0].as_str();
                let absent = properties.get(name).map_or(true, Value::is_null);

                // A keyed operation without a resolvable sort value becomes
                // a find-then-act fallback.
                if absent
                    && Some(attribute) == index.sort_attr()
                    && params.high
                    && op.keys_only()
                {
                    *fallback = true;
                    return;
                }

                let is_index_key = attribute == index.hash_attr()
                    || Some(attribute) == index.sort_attr();
                if op.keys_only() && !is_index_key && !model.has_unique_fields() {
                    omit = true;
                } else if let Some(project) = &project {
                    if !project.iter().any(|p| p == attribute) {
                        omit = true;
                    }
                } else if name == &model.type_field && !is_index_key && op == Operation::Find {
                    omit = true;
                } else if field.encode.is_some() {
                    omit = true;
                }
            }
            if !omit {
                if let Some(value) = properties.get(name) {
                    rec.insert(name.clone(), value.clone());
                }
            }
        }
        if top {
            self.add_projected(model, op, properties, project.as_deref(), rec);
        }
    }

    /// Generic models carry through whatever the caller supplied, within the
    /// active index projection.
    fn add_projected(
        &self,
        model: &Model,
        op: Operation,
        properties: &Item,
        project: Option<&[String]>,
        rec: &mut Item,
    ) {
        if !model.generic || op.keys_only() {
            return;
        }
        for (name, value) in properties {
            if let Some(project) = project {
                if !project.iter().any(|p| p == name) {
                    continue;
                }
            }
            if rec.contains_key(name) {
                continue;
            }
            let value = match value {
                Value::Date(d) => {
                    if model.iso_dates {
                        Value::from(d.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                    } else {
                        Value::from(d.timestamp_millis())
                    }
                }
                other => other.clone(),
            };
            rec.insert(name.clone(), value);
        }
    }

    fn transform_properties(&self, block: &FieldBlock, rec: &mut Item) -> Result<(), Error> {
        for field in block.fields.values() {
            if field.block.is_some() {
                continue;
            }
            if let Some(value) = rec.get(&field.name).cloned() {
                let transformed = self.transform_write_attribute(field, value)?;
                rec.insert(field.name.clone(), transformed);
            }
        }
        Ok(())
    }

    /// Type-directed conversion into the stored representation.
    fn transform_write_attribute(
        &self,
        field: &PreparedField,
        value: Value,
    ) -> Result<Value, Error> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match field.field_type {
            FieldType::Date => Ok(transform_write_date(field, value)),
            FieldType::Number => match value {
                Value::Number(_) => Ok(value),
                Value::String(s) => s
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| {
                        Error::argument(format!(
                            "invalid number value \"{}\" for field \"{}\"",
                            s, field.name
                        ))
                    }),
                other => Ok(other),
            },
            FieldType::Boolean => match value {
                Value::Bool(_) => Ok(value),
                Value::String(s) => Ok(Value::Bool(!matches!(
                    s.as_str(),
                    "false" | "null" | "undefined" | ""
                ))),
                _ => Ok(Value::Bool(true)),
            },
            FieldType::String => match value {
                // Operator records pass through for key conditions.
                Value::Map(_) => Ok(value),
                other => {
                    let text = other.display_string();
                    if field.crypt {
                        return Ok(Value::from(self.encrypt(&text)?));
                    }
                    Ok(Value::String(text))
                }
            },
            FieldType::Array => match value {
                Value::List(elements) => Ok(Value::List(
                    elements
                        .into_iter()
                        .map(|v| transform_nested_write(field, v))
                        .collect(),
                )),
                other => Ok(other),
            },
            FieldType::Object => Ok(transform_nested_write(field, value)),
            _ if field.field_type.is_binary() => Ok(value),
            _ => Ok(value),
        }
    }

    // ─── Read transformation ────────────────────────────────────────────

    /// Reconstruct a typed domain object from a stored record.
    pub(crate) fn transform_read_item(
        &self,
        model: &Model,
        op: Operation,
        raw: &Item,
        properties: Option<&Item>,
        params: &Params,
        following: bool,
    ) -> Item {
        let show_hidden = params.hidden.unwrap_or(self.base_defaults.hidden) || following;
        let mut rec =
            self.transform_read_block(model, op, raw, properties, params, &model.block, show_hidden);
        if params.hidden == Some(true) && !model.generic && !rec.contains_key(&model.type_field) {
            rec.insert(model.type_field.clone(), Value::from(model.name()));
        }
        rec
    }

    #[allow(clippy::too_many_arguments)]
    fn transform_read_block(
        &self,
        model: &Model,
        op: Operation,
        raw: &Item,
        properties: Option<&Item>,
        params: &Params,
        block: &FieldBlock,
        show_hidden: bool,
    ) -> Item {
        let mut rec = Item::new();
        for field in block.fields.values() {
            if field.hidden && !show_hidden {
                continue;
            }
            // Put responses echo the prepared record, which is keyed by
            // field name rather than stored attribute.
            let (attribute, sub) = if op == Operation::Put {
                (field.name.as_str(), None)
            } else {
                (field.attribute[0].as_str(), field.attribute.get(1))
            };

            let mut value = raw.get(attribute).cloned();

            if value.is_none() {
                if let Some((source, separator, index)) = &field.encode {
                    if let Some(Value::String(joined)) = raw.get(source) {
                        let parts: Vec<&str> = joined.split(separator.as_str()).collect();
                        if *index < parts.len() {
                            value = Some(Value::from(parts[*index]));
                        }
                    }
                }
            }

            if let Some(sub) = sub {
                value = value
                    .as_ref()
                    .and_then(Value::as_map)
                    .and_then(|m| m.get(sub.as_str()))
                    .cloned();
            }

            if field.crypt {
                if let Some(Value::String(sealed)) = &value {
                    if let Ok(plain) = self.decrypt(sealed) {
                        value = Some(Value::from(plain));
                    }
                }
            }

            let Some(value) = value.filter(|v| !v.is_null()) else {
                if let Some(default) = &field.default {
                    let projected = params
                        .fields
                        .as_ref()
                        .map_or(true, |fields| fields.contains(&field.name));
                    if projected {
                        rec.insert(field.name.clone(), default.clone());
                    }
                } else if field.required
                    && model.warn
                    && params.transaction.is_none()
                    && params.batch.is_none()
                    && params.fields.is_none()
                {
                    warn!(
                        model = model.name(),
                        field = %field.name,
                        "required field missing from stored item"
                    );
                }
                continue;
            };

            if let Some(nested) = &field.block {
                match value {
                    Value::List(elements) => {
                        let nested_props = properties
                            .and_then(|p| p.get(&field.name))
                            .and_then(Value::as_list);
                        let mut out = Vec::with_capacity(elements.len());
                        for (i, element) in elements.iter().enumerate() {
                            if let Value::Map(element_map) = element {
                                let element_props = nested_props
                                    .and_then(|p| p.get(i))
                                    .and_then(Value::as_map);
                                out.push(Value::Map(self.transform_read_block(
                                    model,
                                    op,
                                    element_map,
                                    element_props,
                                    params,
                                    nested,
                                    show_hidden,
                                )));
                            }
                        }
                        rec.insert(field.name.clone(), Value::List(out));
                    }
                    Value::Map(nested_raw) => {
                        let nested_props = properties
                            .and_then(|p| p.get(&field.name))
                            .and_then(Value::as_map);
                        rec.insert(
                            field.name.clone(),
                            Value::Map(self.transform_read_block(
                                model,
                                op,
                                &nested_raw,
                                nested_props,
                                params,
                                nested,
                                show_hidden,
                            )),
                        );
                    }
                    _ => {}
                }
                continue;
            }

            rec.insert(field.name.clone(), transform_read_attribute(field, value));
        }

        // Generic models pass unknown stored attributes through unchanged.
        if model.generic {
            for (name, value) in raw {
                if !rec.contains_key(name) {
                    rec.insert(name.clone(), value.clone());
                }
            }
        }
        rec
    }
}

/// Expand one value template. Unresolved references are not an error: on a
/// find against the sort key a resolved prefix becomes a begins-with
/// operator record; otherwise the result is discarded.
pub(crate) fn run_template(
    op: Operation,
    index: &IndexDef,
    field: &PreparedField,
    properties: &Item,
    template: &str,
) -> Option<Value> {
    let re = template_token_re();
    let result = re.replace_all(template, |caps: &regex::Captures<'_>| {
        let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let mut parts = inner.splitn(3, ':');
        let path = parts.next().unwrap_or_default();
        match property_at(properties, path).filter(|v| !v.is_null()) {
            None => caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
            Some(value) => {
                let mut text = value.template_string(field.iso_dates);
                if let Some(width) = parts.next().and_then(|w| w.parse::<usize>().ok()) {
                    let pad = parts.next().filter(|p| !p.is_empty()).unwrap_or("0");
                    while text.len() < width {
                        text = format!("{}{}", pad, text);
                    }
                }
                text
            }
        }
    });

    if result.contains("${") {
        if op == Operation::Find && Some(field.attribute[0].as_str()) == index.sort_attr() {
            let at = result.find("${").unwrap_or_default();
            let prefix = &result[..at];
            if !prefix.is_empty() {
                let mut operator = Item::new();
                operator.insert("begins".to_string(), Value::from(prefix));
                return Some(Value::Map(operator));
            }
        }
        return None;
    }
    Some(Value::String(result.into_owned()))
}

/// Null properties become removal paths unless the field stores nulls.
/// Required fields are left for validation to flag.
fn convert_nulls(block: &FieldBlock, pathname: &str, properties: &mut Item, params: &mut Params) {
    let names: Vec<String> = properties.keys().cloned().collect();
    for name in names {
        let Some(field) = block.fields.get(&name) else { continue };
        if field.block.is_some() {
            continue;
        }
        if properties.get(&name).is_some_and(Value::is_null) && !field.nulls {
            if field.required {
                continue;
            }
            let _ = properties.shift_remove(&name);
            let path = if pathname.is_empty() {
                name
            } else {
                format!("{}.{}", pathname, name)
            };
            params.remove.push(path);
        }
    }
}

/// Required, regex and enum checks. All failures for a write are collected
/// into one validation error.
fn validate_properties(
    model: &Model,
    op: Operation,
    block: &FieldBlock,
    properties: &Item,
) -> Result<(), Error> {
    if !matches!(op, Operation::Put | Operation::Update) {
        return Ok(());
    }
    let mut details: IndexMap<String, String> = IndexMap::new();

    for (name, value) in properties {
        let Some(field) = block.fields.get(name) else { continue };
        if field.block.is_some() {
            continue;
        }
        if let Some(pattern) = &field.validate {
            let text = value.as_str().unwrap_or_default();
            if !pattern.is_match(text) {
                details.insert(
                    name.clone(),
                    format!("bad value \"{}\" for \"{}\"", value.display_string(), name),
                );
            }
        }
        if !field.enum_values.is_empty() {
            let text = value.display_string();
            if !field.enum_values.iter().any(|v| v == &text) {
                details.insert(
                    name.clone(),
                    format!("bad value \"{}\" for \"{}\"", text, name),
                );
            }
        }
    }

    for field in block.fields.values() {
        if !field.required || field.block.is_some() {
            continue;
        }
        let entry = properties.get(&field.name);
        let failed = match op {
            Operation::Put => entry.map_or(true, Value::is_null),
            Operation::Update => entry.is_some_and(Value::is_null),
            _ => false,
        };
        if failed {
            details.insert(
                field.name.clone(),
                format!("value not defined for required field \"{}\"", field.name),
            );
        }
    }

    if details.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(model.name(), details))
    }
}

/// Dates store as RFC-3339 strings or epoch milliseconds per the iso-dates
/// policy; TTL fields always store epoch seconds.
fn transform_write_date(field: &PreparedField, value: Value) -> Value {
    if field.ttl {
        return match value {
            Value::Date(d) => Value::from(d.timestamp()),
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|d| Value::from(d.timestamp()))
                .unwrap_or(Value::String(s)),
            Value::Number(n) => Value::from((n / 1000.0).ceil()),
            other => other,
        };
    }
    if field.iso_dates {
        match value {
            Value::Date(d) => Value::from(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|d| {
                    Value::from(
                        d.with_timezone(&Utc)
                            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                    )
                })
                .unwrap_or(Value::String(s)),
            Value::Number(n) => Utc
                .timestamp_millis_opt(n as i64)
                .single()
                .map(|d| Value::from(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
                .unwrap_or(Value::Number(n)),
            other => other,
        }
    } else {
        match value {
            Value::Date(d) => Value::from(d.timestamp_millis()),
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|d| Value::from(d.timestamp_millis()))
                .or_else(|_| s.parse::<i64>().map(Value::from))
                .unwrap_or(Value::String(s)),
            Value::Number(n) => Value::from(n.trunc()),
            other => other,
        }
    }
}

/// Untyped nested values still get their dates converted.
fn transform_nested_write(field: &PreparedField, value: Value) -> Value {
    match value {
        Value::Date(_) => transform_write_date(field, value),
        Value::Map(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, transform_nested_write(field, v)))
                .collect(),
        ),
        Value::List(list) => Value::List(
            list.into_iter()
                .map(|v| transform_nested_write(field, v))
                .collect(),
        ),
        other => other,
    }
}

fn transform_read_attribute(field: &PreparedField, value: Value) -> Value {
    match field.field_type {
        FieldType::Date => {
            if field.ttl {
                if let Value::Number(n) = value {
                    return Utc
                        .timestamp_opt(n as i64, 0)
                        .single()
                        .map(Value::Date)
                        .unwrap_or(Value::Number(n));
                }
            }
            match value {
                Value::String(s) => DateTime::parse_from_rfc3339(&s)
                    .map(|d| Value::Date(d.with_timezone(&Utc)))
                    .or_else(|_| {
                        s.parse::<i64>().map(|ms| {
                            Utc.timestamp_millis_opt(ms)
                                .single()
                                .map(Value::Date)
                                .unwrap_or(Value::from(format_number(ms as f64)))
                        })
                    })
                    .unwrap_or(Value::String(s)),
                Value::Number(n) => Utc
                    .timestamp_millis_opt(n as i64)
                    .single()
                    .map(Value::Date)
                    .unwrap_or(Value::Number(n)),
                other => other,
            }
        }
        _ if field.field_type.is_binary() => match value {
            Value::Bytes(_) => value,
            Value::String(s) => Value::Bytes(s.into_bytes()),
            other => other,
        },
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Model, ModelOptions, TableDefaults};
    use crate::schema::{fields, FieldDef, IndexDef};
    use crate::value::item;
    use serde_json::json;
    use std::sync::Arc;

    fn model_with(defs: crate::schema::FieldMap) -> Model {
        let mut indexes = IndexMap::new();
        indexes.insert("primary".to_string(), IndexDef::new("pk", Some("sk")));
        Model::compile(
            "User",
            ModelOptions {
                fields: defs,
                generic: false,
                timestamps: None,
            },
            Arc::new(indexes),
            &TableDefaults::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_template_padding() {
        let model = model_with(fields([
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
            ("seq", FieldDef::number()),
            ("value", FieldDef::string().value("${seq:6}")),
        ]));
        let field = &model.block.fields["value"];
        let props = item(json!({"seq": 42}));
        let out = run_template(Operation::Put, model.primary(), field, &props, "${seq:6}");
        assert_eq!(out, Some(Value::from("000042")));
    }

    #[test]
    fn test_template_custom_pad() {
        let model = model_with(fields([
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
            ("seq", FieldDef::number()),
        ]));
        let field = &model.block.fields["pk"];
        let props = item(json!({"seq": 7}));
        let out = run_template(Operation::Put, model.primary(), field, &props, "${seq:3:x}");
        assert_eq!(out, Some(Value::from("xx7")));
    }

    #[test]
    fn test_unresolved_template_becomes_begins_on_find_sort() {
        let model = model_with(fields([
            ("pk", FieldDef::string().value("${_type}#${id}")),
            ("sk", FieldDef::string().value("${_type}#${id}")),
            ("id", FieldDef::string()),
        ]));
        let field = &model.block.fields["sk"];
        let props = item(json!({"_type": "User"}));
        let out = run_template(
            Operation::Find,
            model.primary(),
            field,
            &props,
            "${_type}#${id}",
        )
        .unwrap();
        let operator = out.as_map().unwrap();
        assert_eq!(operator["begins"].as_str(), Some("User#"));
    }

    #[test]
    fn test_unresolved_template_discarded_elsewhere() {
        let model = model_with(fields([
            ("pk", FieldDef::string().value("${_type}#${id}")),
            ("sk", FieldDef::string().value("u#")),
            ("id", FieldDef::string()),
        ]));
        let field = &model.block.fields["pk"];
        let props = item(json!({}));
        assert_eq!(
            run_template(Operation::Get, model.primary(), field, &props, "${_type}#${id}"),
            None
        );
    }

    #[test]
    fn test_convert_nulls_records_remove_paths() {
        let model = model_with(fields([
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
            ("phone", FieldDef::string()),
            ("kept", FieldDef::string().nulls(true)),
        ]));
        let mut props = item(json!({"phone": null, "kept": null}));
        let mut params = Params::new();
        convert_nulls(&model.block, "", &mut props, &mut params);
        assert!(!props.contains_key("phone"));
        assert!(props.contains_key("kept"));
        assert_eq!(params.remove, vec!["phone".to_string()]);
    }

    #[test]
    fn test_validation_collects_all_failures() {
        let model = model_with(fields([
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
            ("email", FieldDef::string().required().validate("/^[^@]+@[^@]+$/")),
            ("race", FieldDef::string().enum_values(["dog", "cat"])),
            ("age", FieldDef::number()),
        ]));
        let props = item(json!({"email": "nope", "race": "dragon", "age": 4, "_type": "User"}));
        let err = validate_properties(&model, Operation::Put, &model.block, &props).unwrap_err();
        let fields = err.validation_fields().unwrap();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("race"));
        assert!(!fields.contains_key("age"));
    }

    #[test]
    fn test_required_null_rejected_on_update() {
        let model = model_with(fields([
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
            ("email", FieldDef::string().required()),
        ]));
        let props = item(json!({"email": null}));
        let err = validate_properties(&model, Operation::Update, &model.block, &props).unwrap_err();
        assert!(err.validation_fields().unwrap().contains_key("email"));
        // absent is acceptable on update
        let props = item(json!({"age": 4}));
        assert!(validate_properties(&model, Operation::Update, &model.block, &props).is_ok());
    }

    #[test]
    fn test_ttl_dates_store_epoch_seconds() {
        let model = model_with(fields([
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
            ("expires", FieldDef::date().ttl()),
        ]));
        let field = &model.block.fields["expires"];
        let when = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        assert_eq!(
            transform_write_date(field, Value::Date(when)),
            Value::from(1_700_000_000i64)
        );
        assert_eq!(
            transform_read_attribute(field, Value::from(1_700_000_000i64)),
            Value::Date(when)
        );
    }

    #[test]
    fn test_date_round_trip_epoch_and_iso() {
        let epoch_field = model_with(fields([
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
            ("at", FieldDef::date()),
        ]));
        let field = &epoch_field.block.fields["at"];
        let when = Utc.timestamp_millis_opt(1_700_000_000_123).single().unwrap();
        let stored = transform_write_date(field, Value::Date(when));
        assert_eq!(stored, Value::from(1_700_000_000_123i64));
        assert_eq!(transform_read_attribute(field, stored), Value::Date(when));

        let iso_field = model_with(fields([
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
            ("at", FieldDef::date().iso_dates(true)),
        ]));
        let field = &iso_field.block.fields["at"];
        let stored = transform_write_date(field, Value::Date(when));
        assert!(matches!(&stored, Value::String(s) if s.contains('T')));
        assert_eq!(transform_read_attribute(field, stored), Value::Date(when));
    }
}
