use crate::error::Error;
use crate::params::Params;
use crate::schema::{FieldDef, FieldMap, FieldType, IndexDef, Projection, Timestamps};
use crate::value::Value;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Resolved table-level defaults baked into every compiled model, so models
/// carry no reference back to the table.
#[derive(Clone, Debug)]
pub(crate) struct TableDefaults {
    pub type_field: String,
    pub created_field: String,
    pub updated_field: String,
    pub separator: String,
    pub iso_dates: bool,
    pub nulls: bool,
    pub timestamps: Timestamps,
    pub warn: bool,
    pub partial: bool,
    pub hidden: bool,
}

impl Default for TableDefaults {
    fn default() -> Self {
        TableDefaults {
            type_field: "_type".to_string(),
            created_field: "created".to_string(),
            updated_field: "updated".to_string(),
            separator: "#".to_string(),
            iso_dates: false,
            nulls: false,
            timestamps: Timestamps::Off,
            warn: false,
            partial: false,
            hidden: false,
        }
    }
}

/// Runtime representation of one schema field, read-only after compilation.
#[derive(Clone, Debug)]
pub(crate) struct PreparedField {
    pub name: String,
    pub field_type: FieldType,
    /// Stored attribute path: `[attr]`, or `[attr, sub]` for a packed
    /// sub-property.
    pub attribute: Vec<String>,
    pub is_indexed: bool,
    pub is_primary: bool,
    pub hidden: bool,
    pub required: bool,
    pub nulls: bool,
    pub iso_dates: bool,
    pub partial: Option<bool>,
    pub value_template: Option<String>,
    pub default: Option<Value>,
    pub generate: Option<String>,
    pub validate: Option<Regex>,
    pub enum_values: Vec<String>,
    pub encode: Option<(String, String, usize)>,
    pub crypt: bool,
    pub ttl: bool,
    pub unique: bool,
    pub filter_enabled: bool,
    pub block: Option<FieldBlock>,
    pub is_array: bool,
}

/// A set of prepared fields plus the order in which value templates must be
/// evaluated so that templates may reference other templated fields.
#[derive(Clone, Debug, Default)]
pub(crate) struct FieldBlock {
    pub fields: IndexMap<String, PreparedField>,
    pub deps: Vec<String>,
}

/// A compiled entity model: the prepared field tree for one `_type`, with
/// index membership and table defaults resolved.
#[derive(Clone, Debug)]
pub struct Model {
    pub(crate) name: String,
    pub(crate) block: FieldBlock,
    pub(crate) hash: String,
    pub(crate) sort: Option<String>,
    pub(crate) generic: bool,
    pub(crate) nested: bool,
    pub(crate) has_unique_fields: bool,
    /// Packed attribute → expected sub-property names.
    pub(crate) mappings: IndexMap<String, Vec<String>>,
    pub(crate) indexes: Arc<IndexMap<String, IndexDef>>,
    pub(crate) type_field: String,
    pub(crate) created_field: String,
    pub(crate) updated_field: String,
    pub(crate) timestamps: Timestamps,
    pub(crate) iso_dates: bool,
    pub(crate) nulls: bool,
    pub(crate) partial: bool,
    pub(crate) warn: bool,
}

pub(crate) struct ModelOptions {
    pub fields: FieldMap,
    pub generic: bool,
    /// Override of the table timestamp policy (internal models switch
    /// timestamps off).
    pub timestamps: Option<Timestamps>,
}

impl Model {
    /// The model name, used as the type discriminator value.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when any non-primary-key field carries `unique: true`.
    pub fn has_unique_fields(&self) -> bool {
        self.has_unique_fields
    }

    pub(crate) fn compile(
        name: &str,
        options: ModelOptions,
        indexes: Arc<IndexMap<String, IndexDef>>,
        defaults: &TableDefaults,
    ) -> Result<Model, Error> {
        let primary = indexes
            .get("primary")
            .ok_or_else(|| Error::argument("schema is missing a primary index"))?
            .clone();

        let mut model = Model {
            name: name.to_string(),
            block: FieldBlock::default(),
            hash: primary.hash_attr().to_string(),
            sort: primary.sort_attr().map(str::to_string),
            generic: options.generic,
            nested: false,
            has_unique_fields: false,
            mappings: IndexMap::new(),
            indexes: indexes.clone(),
            type_field: defaults.type_field.clone(),
            created_field: defaults.created_field.clone(),
            updated_field: defaults.updated_field.clone(),
            timestamps: options.timestamps.unwrap_or(defaults.timestamps),
            iso_dates: defaults.iso_dates,
            nulls: defaults.nulls,
            partial: defaults.partial,
            warn: defaults.warn,
        };

        let index_properties = index_properties(&indexes);
        let compiler = FieldCompiler {
            model_name: name,
            generic: options.generic,
            defaults,
            index_properties: &index_properties,
            primary: &primary,
            timestamps: model.timestamps,
        };

        let mut raw = options.fields;
        compiler.inject_standard_fields(&mut raw);
        model.block = compiler.compile_block(&mut model, raw, true)?;
        model.block.deps = order_fields(&model.block)?;

        // Unique flag considers only simple non-key attributes.
        model.has_unique_fields = model.block.fields.values().any(|f| {
            f.unique
                && f.attribute.len() == 1
                && f.attribute[0] != model.hash
                && Some(f.attribute[0].as_str()) != model.sort.as_deref()
        });

        Ok(model)
    }

    pub(crate) fn primary(&self) -> &IndexDef {
        &self.indexes["primary"]
    }

    /// The index selected by the request, primary unless a known name is
    /// given.
    pub(crate) fn select_index<'m>(&'m self, params: &Params) -> (&'m str, &'m IndexDef) {
        if let Some(name) = params.index.as_deref() {
            if name != "primary" {
                if let Some((key, def)) = self.indexes.get_key_value(name) {
                    return (key.as_str(), def);
                }
            }
        }
        let (key, def) = self
            .indexes
            .get_key_value("primary")
            .expect("primary index checked at compile time");
        (key.as_str(), def)
    }

    /// Key-based operations against a secondary index cannot address a
    /// single item and are re-issued as find-then-act.
    pub(crate) fn needs_fallback(&self, index_name: &str, multi_item: bool) -> bool {
        index_name != "primary" && !multi_item
    }

    pub(crate) fn get_partial(&self, field: &PreparedField, params: &Params) -> bool {
        if let Some(partial) = params.partial {
            return partial;
        }
        if let Some(partial) = field.partial {
            return partial;
        }
        self.partial
    }

    /// The attribute allowlist of an index projection, or `None` for all.
    pub(crate) fn projection(&self, index: &IndexDef) -> Option<Vec<String>> {
        let primary = self.primary();
        let keys = |extra: Vec<String>| {
            let mut all = extra;
            all.push(primary.hash_attr().to_string());
            if let Some(sort) = primary.sort_attr() {
                all.push(sort.to_string());
            }
            all.push(index.hash_attr().to_string());
            if let Some(sort) = index.sort_attr() {
                all.push(sort.to_string());
            }
            all.retain(|a| !a.is_empty());
            all.dedup();
            let mut seen = HashSet::new();
            all.retain(|a| seen.insert(a.clone()));
            all
        };
        match index.project.as_ref()? {
            Projection::All => None,
            Projection::Keys => Some(keys(Vec::new())),
            Projection::Include(fields) => Some(keys(fields.clone())),
        }
    }

    pub(crate) fn field_for_attribute(&self, attribute: &str) -> Option<&PreparedField> {
        self.block
            .fields
            .values()
            .find(|f| f.attribute[0] == attribute)
    }

    /// The hash-key value of a prepared record under the given index.
    pub(crate) fn hash_value<'v>(&self, rec: &'v crate::value::Item, index: &IndexDef) -> Option<&'v Value> {
        if self.generic {
            return rec.get(index.hash_attr()).filter(|v| !v.is_null());
        }
        let field = self
            .block
            .fields
            .values()
            .find(|f| f.attribute[0] == index.hash_attr())?;
        rec.get(&field.name).filter(|v| !v.is_null())
    }

    /// Unique fields that are not primary key attributes.
    pub(crate) fn unique_fields(&self) -> Vec<&PreparedField> {
        self.block
            .fields
            .values()
            .filter(|f| {
                f.unique
                    && f.attribute.len() == 1
                    && f.attribute[0] != self.hash
                    && Some(f.attribute[0].as_str()) != self.sort.as_deref()
            })
            .collect()
    }
}

struct FieldCompiler<'a> {
    model_name: &'a str,
    generic: bool,
    defaults: &'a TableDefaults,
    index_properties: &'a HashMap<String, String>,
    primary: &'a IndexDef,
    timestamps: Timestamps,
}

impl FieldCompiler<'_> {
    /// Inject the type discriminator and timestamp fields at the top level
    /// when the schema does not declare them.
    fn inject_standard_fields(&self, raw: &mut FieldMap) {
        if !raw.contains_key(&self.defaults.type_field) {
            let mut def = FieldDef::string().hidden(true);
            if !self.generic {
                def = def.required();
            }
            raw.insert(self.defaults.type_field.clone(), def);
        }
        if self.timestamps.on_create() && !raw.contains_key(&self.defaults.created_field) {
            raw.insert(self.defaults.created_field.clone(), FieldDef::date());
        }
        if self.timestamps.on_update() && !raw.contains_key(&self.defaults.updated_field) {
            raw.insert(self.defaults.updated_field.clone(), FieldDef::date());
        }
    }

    fn compile_block(
        &self,
        model: &mut Model,
        raw: FieldMap,
        top_level: bool,
    ) -> Result<FieldBlock, Error> {
        let mut block = FieldBlock::default();
        let mut map_targets: IndexMap<String, Vec<String>> = IndexMap::new();

        for (name, def) in raw {
            let mapped = def.map_attribute.clone();
            let mut field = self.compile_field(model, &name, def)?;

            // Attribute mapping: "attr" renames, "attr.sub" packs.
            if let Some(mapped) = mapped {
                match mapped.split_once('.') {
                    Some((attr, sub)) => {
                        field.attribute = vec![attr.to_string(), sub.to_string()];
                        map_targets
                            .entry(attr.to_string())
                            .or_default()
                            .push(sub.to_string());
                    }
                    None => {
                        field.attribute = vec![mapped.to_string()];
                    }
                }
            }

            if top_level {
                let attribute = field.attribute[0].clone();
                if let Some(index_name) = self.index_properties.get(&attribute) {
                    field.is_indexed = true;
                    if field.attribute.len() > 1 {
                        return Err(Error::argument(format!(
                            "cannot map property \"{}\" to a compound attribute",
                            name
                        )));
                    }
                    if index_name == "primary" {
                        field.is_primary = true;
                        field.required = true;
                    }
                }
            }

            block.fields.insert(name, field);
        }

        if top_level {
            // Only dot-mapped attributes require completeness tracking.
            map_targets.retain(|_, subs| !subs.is_empty());
            model.mappings = map_targets;
        }
        Ok(block)
    }

    fn compile_field(
        &self,
        model: &mut Model,
        name: &str,
        mut def: FieldDef,
    ) -> Result<PreparedField, Error> {
        let field_type = def.field_type;

        // Fields computed from a value template default to hidden.
        let hidden = def
            .hidden
            .unwrap_or_else(|| def.value.is_some());

        let validate = match def.validate.as_deref() {
            Some(pattern) => Some(compile_validation(pattern).map_err(|e| {
                Error::argument(format!(
                    "bad validation pattern for field \"{}\" in model \"{}\": {}",
                    name, self.model_name, e
                ))
            })?),
            None => None,
        };

        // Array element schemas become the nested schema of the field.
        let mut is_array = false;
        if field_type == FieldType::Array {
            if let Some(items) = def.items.take() {
                def.schema = Some(items);
                is_array = true;
            }
        }

        let block = match def.schema.take() {
            Some(nested) => {
                if !matches!(field_type, FieldType::Object | FieldType::Array) {
                    return Err(Error::argument(format!(
                        "nested schema only supported for object/array fields, not \"{}\" for field \"{}\"",
                        field_type, name
                    )));
                }
                model.nested = true;
                let mut compiled = self.compile_block(model, nested, false)?;
                compiled.deps = order_fields(&compiled)?;
                Some(compiled)
            }
            None => None,
        };

        Ok(PreparedField {
            name: name.to_string(),
            field_type,
            attribute: vec![name.to_string()],
            is_indexed: false,
            is_primary: false,
            hidden,
            required: def.required,
            nulls: def.nulls.unwrap_or(self.defaults.nulls),
            iso_dates: def.iso_dates.unwrap_or(self.defaults.iso_dates),
            partial: def.partial,
            value_template: def.value.clone(),
            default: def.default.clone(),
            generate: def.generate.clone(),
            validate,
            enum_values: def.enum_values.clone(),
            encode: def.encode.clone(),
            crypt: def.crypt,
            ttl: def.ttl,
            unique: def.unique,
            filter_enabled: def.filter.unwrap_or(true),
            block,
            is_array,
        })
    }
}

/// Attribute name → owning index name, with primary taking precedence when an
/// attribute appears in several indexes.
fn index_properties(indexes: &IndexMap<String, IndexDef>) -> HashMap<String, String> {
    let mut props = HashMap::new();
    for (index_name, index) in indexes {
        for attr in [index.hash.as_deref(), index.sort.as_deref()].into_iter().flatten() {
            let current = props.get(attr).map(String::as_str);
            if current != Some("primary") {
                props.insert(attr.to_string(), index_name.clone());
            }
        }
    }
    props
}

/// Depth-first ordering of template dependencies within one block. A field
/// whose template references another templated field is ordered after it;
/// cyclic references are a schema error.
fn order_fields(block: &FieldBlock) -> Result<Vec<String>, Error> {
    let mut deps: Vec<String> = Vec::with_capacity(block.fields.len());
    let mut done: HashSet<String> = HashSet::new();
    let mut visiting: HashSet<String> = HashSet::new();

    fn visit(
        block: &FieldBlock,
        name: &str,
        deps: &mut Vec<String>,
        done: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
    ) -> Result<(), Error> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name.to_string()) {
            return Err(Error::argument(format!(
                "cyclic value-template dependency through field \"{}\"",
                name
            )));
        }
        let field = &block.fields[name];
        if let Some(template) = field.value_template.as_deref() {
            for var in template_vars(template) {
                let target = var
                    .split('.')
                    .next()
                    .unwrap_or_default()
                    .split('[')
                    .next()
                    .unwrap_or_default();
                if target == name {
                    continue;
                }
                if let Some(reference) = block.fields.get(target) {
                    if reference.block.is_none() && reference.value_template.is_some() {
                        visit(block, target, deps, done, visiting)?;
                    }
                }
            }
        }
        visiting.remove(name);
        done.insert(name.to_string());
        deps.push(name.to_string());
        Ok(())
    }

    for name in block.fields.keys() {
        visit(block, name, &mut deps, &mut done, &mut visiting)?;
    }
    Ok(deps)
}

/// Extract the `${...}` variable paths of a value template (padding
/// directives stripped).
pub(crate) fn template_vars(template: &str) -> Vec<String> {
    let re = template_token_re();
    re.captures_iter(template)
        .map(|c| {
            let inner = c.get(1).map(|m| m.as_str()).unwrap_or_default();
            inner.split(':').next().unwrap_or_default().to_string()
        })
        .collect()
}

pub(crate) fn template_token_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{(.*?)\}").expect("valid template regex"))
}

/// Compile a `validate` declaration: `/pattern/flags` or a bare pattern.
fn compile_validation(pattern: &str) -> Result<Regex, regex::Error> {
    if let Some(rest) = pattern.strip_prefix('/') {
        if let Some(last) = rest.rfind('/') {
            let inner = &rest[..last];
            let flags = &rest[last + 1..];
            let expanded = if flags.is_empty() {
                inner.to_string()
            } else {
                format!("(?{}){}", flags, inner)
            };
            return Regex::new(&expanded);
        }
    }
    Regex::new(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{fields, IndexDef};

    fn indexes() -> Arc<IndexMap<String, IndexDef>> {
        let mut map = IndexMap::new();
        map.insert("primary".to_string(), IndexDef::new("pk", Some("sk")));
        map.insert("gs1".to_string(), IndexDef::new("gs1pk", Some("gs1sk")));
        Arc::new(map)
    }

    fn compile(raw: crate::schema::FieldMap) -> Result<Model, Error> {
        Model::compile(
            "User",
            ModelOptions {
                fields: raw,
                generic: false,
                timestamps: None,
            },
            indexes(),
            &TableDefaults::default(),
        )
    }

    #[test]
    fn test_template_fields_default_hidden() {
        let model = compile(fields([
            ("pk", FieldDef::string().value("${_type}#${id}")),
            ("sk", FieldDef::string().value("${_type}#")),
            ("id", FieldDef::string().generate("ulid")),
        ]))
        .unwrap();
        assert!(model.block.fields["pk"].hidden);
        assert!(!model.block.fields["id"].hidden);
        assert!(model.block.fields["pk"].is_primary);
        assert!(model.block.fields["pk"].required);
    }

    #[test]
    fn test_packed_attribute_path() {
        let model = compile(fields([
            ("pk", FieldDef::string().value("u#${id}")),
            ("sk", FieldDef::string().value("u#")),
            ("id", FieldDef::string()),
            ("address", FieldDef::string().map("data.address")),
            ("city", FieldDef::string().map("data.city")),
            ("name", FieldDef::string().map("nm")),
        ]))
        .unwrap();
        assert_eq!(model.block.fields["address"].attribute, vec!["data", "address"]);
        assert_eq!(model.block.fields["name"].attribute, vec!["nm"]);
        assert_eq!(model.mappings["data"], vec!["address", "city"]);
        assert!(!model.mappings.contains_key("nm"));
    }

    #[test]
    fn test_compound_mapping_of_index_attribute_rejected() {
        let err = compile(fields([
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
            ("part", FieldDef::string().map("gs1pk.sub")),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("compound attribute"));
    }

    #[test]
    fn test_template_dependency_ordering() {
        let model = compile(fields([
            ("combo", FieldDef::string().value("${base}#x")),
            ("base", FieldDef::string().value("${id}")),
            ("id", FieldDef::string()),
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
        ]))
        .unwrap();
        let deps = &model.block.deps;
        let pos = |n: &str| deps.iter().position(|d| d == n).unwrap();
        assert!(pos("base") < pos("combo"));
    }

    #[test]
    fn test_cyclic_templates_rejected() {
        let err = compile(fields([
            ("a", FieldDef::string().value("${b}")),
            ("b", FieldDef::string().value("${a}")),
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn test_unique_fields_exclude_primary_keys() {
        let model = compile(fields([
            ("pk", FieldDef::string().value("u#${email}").unique()),
            ("sk", FieldDef::string().value("u#")),
            ("email", FieldDef::string().unique()),
            ("phone", FieldDef::string().unique()),
        ]))
        .unwrap();
        assert!(model.has_unique_fields());
        let unique: Vec<&str> = model.unique_fields().iter().map(|f| f.name.as_str()).collect();
        assert!(unique.contains(&"email"));
        assert!(unique.contains(&"phone"));
        assert!(!unique.contains(&"pk"));
    }

    #[test]
    fn test_type_field_injected() {
        let model = compile(fields([
            ("pk", FieldDef::string().value("u#")),
            ("sk", FieldDef::string().value("u#")),
        ]))
        .unwrap();
        let type_field = &model.block.fields["_type"];
        assert!(type_field.hidden);
        assert!(type_field.required);
    }

    #[test]
    fn test_validation_pattern_forms() {
        assert!(compile_validation("/^[a-z]+$/").unwrap().is_match("abc"));
        assert!(compile_validation("/^[a-z]+$/i").unwrap().is_match("ABC"));
        assert!(compile_validation("San Francisco").unwrap().is_match("San Francisco"));
        assert!(!compile_validation("San Francisco").unwrap().is_match("New York"));
    }

    #[test]
    fn test_template_vars_strip_padding() {
        assert_eq!(
            template_vars("${_type}#${seq:6:0}"),
            vec!["_type".to_string(), "seq".to_string()]
        );
    }
}
