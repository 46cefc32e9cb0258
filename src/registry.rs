//! Compiled schema snapshot: the model registry and index map a table
//! operates against. Schema mutation replaces the whole snapshot atomically.

use crate::error::Error;
use crate::model::{Model, ModelOptions, TableDefaults};
use crate::schema::{FieldDef, FieldMap, FieldType, IndexDef, SchemaDef, SchemaParams, Timestamps};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) const GENERIC_MODEL: &str = "_Generic";
pub(crate) const UNIQUE_MODEL: &str = "_Unique";
pub(crate) const SCHEMA_MODEL: &str = "_Schema";
pub(crate) const MIGRATION_MODEL: &str = "_Migration";
pub(crate) const SCHEMA_KEY: &str = "_schema";
pub(crate) const MIGRATION_KEY: &str = "_migration";
pub(crate) const SCHEMA_FORMAT: &str = "onetable:1.1.0";

const MAX_LSI_COUNT: usize = 5;

/// The compiled, effectively-immutable schema state shared by all in-flight
/// operations of a table.
#[derive(Clone, Debug)]
pub(crate) struct Registry {
    pub indexes: Arc<IndexMap<String, IndexDef>>,
    pub models: IndexMap<String, Arc<Model>>,
    pub generic: Arc<Model>,
    pub unique: Arc<Model>,
    pub definition: Option<SchemaDef>,
    pub defaults: TableDefaults,
}

impl Registry {
    /// Validate and compile a declarative schema into a snapshot.
    pub(crate) fn compile(schema: SchemaDef, base: &TableDefaults) -> Result<Registry, Error> {
        let mut schema = schema;
        validate_schema(&mut schema)?;

        let defaults = resolve_defaults(base, schema.params.as_ref());
        let indexes = Arc::new(schema.indexes.clone());
        let key_types = key_types_from_schema(&schema, &indexes);

        let mut models: IndexMap<String, Arc<Model>> = IndexMap::new();
        for (name, model_def) in &schema.models {
            if name == SCHEMA_MODEL || name == MIGRATION_MODEL {
                continue;
            }
            let model = Model::compile(
                name,
                ModelOptions {
                    fields: model_def.clone(),
                    generic: false,
                    timestamps: None,
                },
                indexes.clone(),
                &defaults,
            )?;
            models.insert(name.clone(), Arc::new(model));
        }

        let mut registry = Registry {
            indexes: indexes.clone(),
            models,
            generic: Arc::new(standard_generic(&indexes, &key_types, &defaults)?),
            unique: Arc::new(standard_unique(&indexes, &key_types, &defaults)?),
            definition: Some(schema),
            defaults,
        };
        registry.install_persistence_models()?;
        Ok(registry)
    }

    /// Build a snapshot from a discovered index map (no declared models).
    pub(crate) fn from_indexes(
        indexes: IndexMap<String, IndexDef>,
        key_types: HashMap<String, FieldType>,
        base: &TableDefaults,
    ) -> Result<Registry, Error> {
        if !indexes.contains_key("primary") {
            return Err(Error::argument("discovered keys are missing a primary index"));
        }
        let indexes = Arc::new(indexes);
        let defaults = base.clone();
        let mut registry = Registry {
            indexes: indexes.clone(),
            models: IndexMap::new(),
            generic: Arc::new(standard_generic(&indexes, &key_types, &defaults)?),
            unique: Arc::new(standard_unique(&indexes, &key_types, &defaults)?),
            definition: None,
            defaults,
        };
        registry.install_persistence_models()?;
        Ok(registry)
    }

    /// The `_Schema` and `_Migration` models live in the registry proper so
    /// persistence flows can address them by name.
    fn install_persistence_models(&mut self) -> Result<(), Error> {
        let schema_model = Model::compile(
            SCHEMA_MODEL,
            ModelOptions {
                fields: schema_model_fields(&self.indexes),
                generic: false,
                timestamps: None,
            },
            self.indexes.clone(),
            &self.defaults,
        )?;
        self.models
            .insert(SCHEMA_MODEL.to_string(), Arc::new(schema_model));

        let migration_model = Model::compile(
            MIGRATION_MODEL,
            ModelOptions {
                fields: migration_model_fields(&self.indexes),
                generic: false,
                timestamps: None,
            },
            self.indexes.clone(),
            &self.defaults,
        )?;
        self.models
            .insert(MIGRATION_MODEL.to_string(), Arc::new(migration_model));
        Ok(())
    }

    /// Look up a model by name. `_Unique` and `_Generic` resolve to the
    /// internal models.
    pub(crate) fn get_model(&self, name: &str) -> Result<Arc<Model>, Error> {
        if name.is_empty() {
            return Err(Error::argument("missing model name"));
        }
        if let Some(model) = self.models.get(name) {
            return Ok(model.clone());
        }
        match name {
            UNIQUE_MODEL => Ok(self.unique.clone()),
            GENERIC_MODEL => Ok(self.generic.clone()),
            other => Err(Error::argument(format!("cannot find model \"{}\"", other))),
        }
    }

    /// Resolve the model for a stored type-marker value, if any. Sentinel
    /// items (`_Unique`) report no model and are skipped by readers.
    pub(crate) fn model_for_type(&self, type_name: &str) -> Option<Arc<Model>> {
        if type_name == UNIQUE_MODEL {
            return None;
        }
        self.models.get(type_name).cloned()
    }

    pub(crate) fn list_models(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// A copy of this snapshot with one model added or replaced.
    pub(crate) fn with_model(&self, name: &str, fields: FieldMap) -> Result<Registry, Error> {
        let model = Model::compile(
            name,
            ModelOptions {
                fields,
                generic: false,
                timestamps: None,
            },
            self.indexes.clone(),
            &self.defaults,
        )?;
        let mut next = self.clone();
        next.models.insert(name.to_string(), Arc::new(model));
        Ok(next)
    }

    /// A copy of this snapshot with a model removed.
    pub(crate) fn without_model(&self, name: &str) -> Result<Registry, Error> {
        let mut next = self.clone();
        if next.models.shift_remove(name).is_none() {
            return Err(Error::argument(format!("cannot find model \"{}\"", name)));
        }
        Ok(next)
    }
}

/// Schema-level invariants: a version, an index map with a primary hash, and
/// well-formed local secondary indexes (at most five, each inheriting the
/// primary hash and declaring a sort).
fn validate_schema(schema: &mut SchemaDef) -> Result<(), Error> {
    if schema.version.is_empty() {
        return Err(Error::argument("schema is missing a version"));
    }
    if schema.indexes.is_empty() {
        return Err(Error::argument("schema is missing indexes"));
    }
    let primary = schema
        .indexes
        .get("primary")
        .cloned()
        .ok_or_else(|| Error::argument("schema is missing a primary index"))?;
    if primary.hash.is_none() {
        return Err(Error::argument("primary index is missing a hash attribute"));
    }

    let mut lsi_count = 0;
    for (name, index) in schema.indexes.iter_mut() {
        if name == "primary" {
            continue;
        }
        let local = index.kind.as_deref() == Some("local") || index.hash.is_none();
        if !local {
            continue;
        }
        if let Some(hash) = index.hash.as_deref() {
            if Some(hash) != primary.hash.as_deref() {
                return Err(Error::argument(format!(
                    "local secondary index \"{}\" must not define a different hash than primary",
                    name
                )));
            }
        }
        if index.sort.is_none() {
            return Err(Error::argument(format!(
                "local secondary index \"{}\" must define a sort attribute",
                name
            )));
        }
        index.kind = Some("local".to_string());
        index.hash = primary.hash.clone();
        lsi_count += 1;
    }
    if lsi_count > MAX_LSI_COUNT {
        return Err(Error::argument(format!(
            "schema defines {} local secondary indexes; at most {} are supported",
            lsi_count, MAX_LSI_COUNT
        )));
    }
    Ok(())
}

fn resolve_defaults(base: &TableDefaults, params: Option<&SchemaParams>) -> TableDefaults {
    let mut defaults = base.clone();
    let Some(params) = params else {
        return defaults;
    };
    if let Some(created) = &params.created_field {
        defaults.created_field = created.clone();
    }
    if let Some(updated) = &params.updated_field {
        defaults.updated_field = updated.clone();
    }
    if let Some(type_field) = &params.type_field {
        defaults.type_field = type_field.clone();
    }
    if let Some(separator) = &params.separator {
        defaults.separator = separator.clone();
    }
    defaults.iso_dates = params.iso_dates;
    defaults.nulls = params.nulls;
    defaults.timestamps = params.timestamps;
    defaults.warn = defaults.warn || params.warn;
    defaults
}

pub(crate) fn current_params(defaults: &TableDefaults) -> SchemaParams {
    SchemaParams {
        created_field: Some(defaults.created_field.clone()),
        updated_field: Some(defaults.updated_field.clone()),
        type_field: Some(defaults.type_field.clone()),
        separator: Some(defaults.separator.clone()),
        iso_dates: defaults.iso_dates,
        nulls: defaults.nulls,
        timestamps: defaults.timestamps,
        warn: defaults.warn,
    }
}

/// Attribute → declared type across all models, for typing the key fields of
/// the internal models.
fn key_types_from_schema(
    schema: &SchemaDef,
    indexes: &IndexMap<String, IndexDef>,
) -> HashMap<String, FieldType> {
    let mut types = HashMap::new();
    for index in indexes.values() {
        for attr in [index.hash.as_deref(), index.sort.as_deref()].into_iter().flatten() {
            for model in schema.models.values() {
                for (name, def) in model {
                    let attribute = def
                        .map_attribute
                        .as_deref()
                        .map(|m| m.split('.').next().unwrap_or(m))
                        .unwrap_or(name.as_str());
                    if attribute == attr {
                        types.insert(attr.to_string(), def.field_type);
                    }
                }
            }
        }
    }
    types
}

fn key_fields(
    indexes: &IndexMap<String, IndexDef>,
    key_types: &HashMap<String, FieldType>,
) -> FieldMap {
    let primary = &indexes["primary"];
    let mut fields = FieldMap::new();
    let hash = primary.hash_attr();
    fields.insert(
        hash.to_string(),
        FieldDef::new(*key_types.get(hash).unwrap_or(&FieldType::String)),
    );
    if let Some(sort) = primary.sort_attr() {
        fields.insert(
            sort.to_string(),
            FieldDef::new(*key_types.get(sort).unwrap_or(&FieldType::String)),
        );
    }
    fields
}

fn standard_generic(
    indexes: &Arc<IndexMap<String, IndexDef>>,
    key_types: &HashMap<String, FieldType>,
    defaults: &TableDefaults,
) -> Result<Model, Error> {
    Model::compile(
        GENERIC_MODEL,
        ModelOptions {
            fields: key_fields(indexes, key_types),
            generic: true,
            timestamps: Some(Timestamps::Off),
        },
        indexes.clone(),
        defaults,
    )
}

fn standard_unique(
    indexes: &Arc<IndexMap<String, IndexDef>>,
    key_types: &HashMap<String, FieldType>,
    defaults: &TableDefaults,
) -> Result<Model, Error> {
    Model::compile(
        UNIQUE_MODEL,
        ModelOptions {
            fields: key_fields(indexes, key_types),
            generic: false,
            timestamps: Some(Timestamps::Off),
        },
        indexes.clone(),
        defaults,
    )
}

fn schema_model_fields(indexes: &IndexMap<String, IndexDef>) -> FieldMap {
    let primary = &indexes["primary"];
    let mut fields = FieldMap::new();
    fields.insert(
        primary.hash_attr().to_string(),
        FieldDef::string().required().value(SCHEMA_KEY),
    );
    if let Some(sort) = primary.sort_attr() {
        fields.insert(
            sort.to_string(),
            FieldDef::string()
                .required()
                .value(&format!("{}:${{name}}", SCHEMA_KEY))
                .hidden(true),
        );
    }
    fields.insert("name".to_string(), FieldDef::string().required());
    fields.insert("version".to_string(), FieldDef::string().required());
    fields.insert("format".to_string(), FieldDef::string().required());
    fields.insert("indexes".to_string(), FieldDef::object().required());
    fields.insert("models".to_string(), FieldDef::object().required());
    fields.insert("params".to_string(), FieldDef::object());
    fields
}

fn migration_model_fields(indexes: &IndexMap<String, IndexDef>) -> FieldMap {
    let primary = &indexes["primary"];
    let mut fields = FieldMap::new();
    fields.insert(
        primary.hash_attr().to_string(),
        FieldDef::string().value(MIGRATION_KEY),
    );
    if let Some(sort) = primary.sort_attr() {
        fields.insert(
            sort.to_string(),
            FieldDef::string().value(&format!("{}:${{version}}:${{date}}", MIGRATION_KEY)),
        );
    }
    fields.insert("date".to_string(), FieldDef::date().required());
    fields.insert("description".to_string(), FieldDef::string().required());
    fields.insert("path".to_string(), FieldDef::string().required());
    fields.insert("version".to_string(), FieldDef::string().required());
    fields.insert("status".to_string(), FieldDef::string());
    fields
}
