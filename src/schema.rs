use crate::error::Error;
use crate::value::Value;
use indexmap::IndexMap;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The declared storage type of a schema field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Ordered list, optionally with a nested element schema.
    Array,
    /// Raw bytes (`ArrayBuffer` naming kept for schema compatibility).
    #[serde(rename = "arraybuffer")]
    ArrayBuffer,
    /// Raw bytes.
    Binary,
    /// Boolean.
    Boolean,
    /// Raw bytes (`Buffer` naming kept for schema compatibility).
    Buffer,
    /// Timestamp, stored per the iso-dates and ttl policies.
    Date,
    /// Numeric value.
    Number,
    /// Nested map, optionally with a nested schema.
    Object,
    /// Set of scalars.
    Set,
    /// UTF-8 string.
    #[default]
    String,
}

impl FieldType {
    pub(crate) fn is_binary(self) -> bool {
        matches!(self, FieldType::ArrayBuffer | FieldType::Binary | FieldType::Buffer)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Array => "array",
            FieldType::ArrayBuffer => "arraybuffer",
            FieldType::Binary => "binary",
            FieldType::Boolean => "boolean",
            FieldType::Buffer => "buffer",
            FieldType::Date => "date",
            FieldType::Number => "number",
            FieldType::Object => "object",
            FieldType::Set => "set",
            FieldType::String => "string",
        };
        f.write_str(name)
    }
}

impl FromStr for FieldType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "array" => Ok(FieldType::Array),
            "arraybuffer" => Ok(FieldType::ArrayBuffer),
            "binary" => Ok(FieldType::Binary),
            "boolean" => Ok(FieldType::Boolean),
            "buffer" => Ok(FieldType::Buffer),
            "date" => Ok(FieldType::Date),
            "number" => Ok(FieldType::Number),
            "object" => Ok(FieldType::Object),
            "set" => Ok(FieldType::Set),
            "string" => Ok(FieldType::String),
            other => Err(Error::argument(format!("unknown field type \"{}\"", other))),
        }
    }
}

/// How a secondary index projects table attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    /// All attributes are projected.
    All,
    /// Only the index and primary keys are projected.
    Keys,
    /// The named attributes (plus the keys) are projected.
    Include(Vec<String>),
}

impl Serialize for Projection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Projection::All => serializer.serialize_str("all"),
            Projection::Keys => serializer.serialize_str("keys"),
            Projection::Include(fields) => fields.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Projection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ProjectionVisitor;

        impl<'de> Visitor<'de> for ProjectionVisitor {
            type Value = Projection;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("\"all\", \"keys\" or a list of attribute names")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Projection, E> {
                match v {
                    "all" => Ok(Projection::All),
                    "keys" => Ok(Projection::Keys),
                    other => Err(E::custom(format!("unknown projection \"{}\"", other))),
                }
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Projection, A::Error> {
                let mut fields = Vec::new();
                while let Some(v) = seq.next_element::<String>()? {
                    fields.push(v);
                }
                Ok(Projection::Include(fields))
            }
        }

        deserializer.deserialize_any(ProjectionVisitor)
    }
}

/// A primary or secondary index declaration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexDef {
    /// Hash (partition) attribute name. A secondary index without a hash is
    /// treated as local and inherits the primary hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Sort (range) attribute name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    /// `"local"` marks a local secondary index.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Index projection; `None` means all attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<Projection>,
    /// When true, find results on this index are resolved through the
    /// primary index by default.
    pub follow: bool,
}

impl IndexDef {
    /// An index keyed by `hash` with an optional sort attribute.
    pub fn new(hash: &str, sort: Option<&str>) -> Self {
        IndexDef {
            hash: Some(hash.to_string()),
            sort: sort.map(str::to_string),
            ..Default::default()
        }
    }

    /// A local secondary index over the given sort attribute.
    pub fn local(sort: &str) -> Self {
        IndexDef {
            sort: Some(sort.to_string()),
            kind: Some("local".to_string()),
            ..Default::default()
        }
    }

    /// Set the projection.
    pub fn project(mut self, projection: Projection) -> Self {
        self.project = Some(projection);
        self
    }

    /// Resolve items found on this index through the primary index.
    pub fn follow(mut self) -> Self {
        self.follow = true;
        self
    }

    pub(crate) fn hash_attr(&self) -> &str {
        self.hash.as_deref().unwrap_or_default()
    }

    pub(crate) fn sort_attr(&self) -> Option<&str> {
        self.sort.as_deref()
    }
}

/// A single field declaration inside a model.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldDef {
    /// Storage type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Must be present on create; must not be nulled on update.
    pub required: bool,
    /// Hidden from read results unless explicitly requested. Defaults to
    /// true for fields with a value template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    /// Default applied on create/init/upsert when the property is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Value template, e.g. `"${_type}#${id}"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Identifier directive: `uuid`, `ulid`, `uid` or `uid(N)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate: Option<String>,
    /// Validation pattern, either `/pattern/flags` or a bare pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate: Option<String>,
    /// Permitted values (case-sensitive).
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    /// Stored attribute mapping: `"attr"` renames, `"attr.sub"` packs this
    /// field into a sub-property of a shared attribute.
    #[serde(rename = "map", skip_serializing_if = "Option::is_none")]
    pub map_attribute: Option<String>,
    /// Read-only decomposition: `(source-attribute, separator, index)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encode: Option<(String, String, usize)>,
    /// Encrypt the stored string value.
    pub crypt: bool,
    /// Per-field override of the table iso-dates policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso_dates: Option<bool>,
    /// Per-field override of the table null policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nulls: Option<bool>,
    /// Enforce uniqueness through sentinel items.
    pub unique: bool,
    /// Store dates as epoch seconds for DynamoDB TTL.
    pub ttl: bool,
    /// Per-field override of partial nested updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
    /// `false` excludes this field from generated filter expressions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<bool>,
    /// Nested schema for object fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<FieldMap>,
    /// Element schema for array fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<FieldMap>,
}

impl FieldDef {
    /// A field of the given type.
    pub fn new(field_type: FieldType) -> Self {
        FieldDef {
            field_type,
            ..Default::default()
        }
    }

    /// A string field.
    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    /// A number field.
    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    /// A boolean field.
    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    /// A date field.
    pub fn date() -> Self {
        Self::new(FieldType::Date)
    }

    /// An object field.
    pub fn object() -> Self {
        Self::new(FieldType::Object)
    }

    /// An array field.
    pub fn array() -> Self {
        Self::new(FieldType::Array)
    }

    /// A binary field.
    pub fn binary() -> Self {
        Self::new(FieldType::Binary)
    }

    /// Mark required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set hidden explicitly.
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = Some(hidden);
        self
    }

    /// Set the default value.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Set the value template.
    pub fn value(mut self, template: &str) -> Self {
        self.value = Some(template.to_string());
        self
    }

    /// Set the generate directive.
    pub fn generate(mut self, spec: &str) -> Self {
        self.generate = Some(spec.to_string());
        self
    }

    /// Set the validation pattern.
    pub fn validate(mut self, pattern: &str) -> Self {
        self.validate = Some(pattern.to_string());
        self
    }

    /// Set the permitted values.
    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Map to a stored attribute (`"attr"` or `"attr.sub"`).
    pub fn map(mut self, attribute: &str) -> Self {
        self.map_attribute = Some(attribute.to_string());
        self
    }

    /// Derive this read-only field by splitting a source attribute.
    pub fn encode(mut self, source: &str, separator: &str, index: usize) -> Self {
        self.encode = Some((source.to_string(), separator.to_string(), index));
        self
    }

    /// Encrypt the stored value.
    pub fn crypt(mut self) -> Self {
        self.crypt = true;
        self
    }

    /// Override the table iso-dates policy.
    pub fn iso_dates(mut self, iso: bool) -> Self {
        self.iso_dates = Some(iso);
        self
    }

    /// Override the table null policy.
    pub fn nulls(mut self, nulls: bool) -> Self {
        self.nulls = Some(nulls);
        self
    }

    /// Enforce uniqueness via sentinel items.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Store as epoch seconds for TTL expiry.
    pub fn ttl(mut self) -> Self {
        self.ttl = true;
        self
    }

    /// Override partial nested updates for this field.
    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = Some(partial);
        self
    }

    /// Exclude from generated filter expressions when false.
    pub fn filter(mut self, filter: bool) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Attach a nested schema (object fields).
    pub fn schema(mut self, fields: FieldMap) -> Self {
        self.schema = Some(fields);
        self
    }

    /// Attach an element schema (array fields).
    pub fn items(mut self, fields: FieldMap) -> Self {
        self.items = Some(fields);
        self
    }
}

/// Field name → definition.
pub type FieldMap = IndexMap<String, FieldDef>;

/// The schema of one model (entity type).
pub type ModelDef = FieldMap;

/// Build a [`FieldMap`] from name/definition pairs.
pub fn fields<const N: usize>(defs: [(&str, FieldDef); N]) -> FieldMap {
    defs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Automatic timestamp policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Timestamps {
    /// No automatic timestamps.
    #[default]
    Off,
    /// Maintain the created field only.
    Create,
    /// Maintain the updated field only.
    Update,
    /// Maintain both fields.
    Both,
}

impl Timestamps {
    pub(crate) fn on_create(self) -> bool {
        matches!(self, Timestamps::Both | Timestamps::Create)
    }

    pub(crate) fn on_update(self) -> bool {
        matches!(self, Timestamps::Both | Timestamps::Update)
    }
}

impl Serialize for Timestamps {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Timestamps::Off => serializer.serialize_bool(false),
            Timestamps::Both => serializer.serialize_bool(true),
            Timestamps::Create => serializer.serialize_str("create"),
            Timestamps::Update => serializer.serialize_str("update"),
        }
    }
}

impl<'de> Deserialize<'de> for Timestamps {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TimestampsVisitor;

        impl<'de> Visitor<'de> for TimestampsVisitor {
            type Value = Timestamps;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean, \"create\" or \"update\"")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Timestamps, E> {
                Ok(if v { Timestamps::Both } else { Timestamps::Off })
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamps, E> {
                match v {
                    "create" => Ok(Timestamps::Create),
                    "update" => Ok(Timestamps::Update),
                    other => Err(E::custom(format!("unknown timestamps policy \"{}\"", other))),
                }
            }
        }

        deserializer.deserialize_any(TimestampsVisitor)
    }
}

/// Table-wide behavioural parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemaParams {
    /// Created-timestamp field name (default `created`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_field: Option<String>,
    /// Updated-timestamp field name (default `updated`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_field: Option<String>,
    /// Type-discriminator field name (default `_type`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_field: Option<String>,
    /// Separator used in composite key values (default `#`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    /// Store dates as RFC-3339 strings instead of epoch milliseconds.
    pub iso_dates: bool,
    /// Store explicit nulls instead of removing the attribute.
    pub nulls: bool,
    /// Automatic timestamp policy.
    pub timestamps: Timestamps,
    /// Log a warning when a stored item is missing a required field.
    pub warn: bool,
}

impl SchemaParams {
    /// Parameters with automatic timestamps on both fields.
    pub fn timestamps() -> Self {
        SchemaParams {
            timestamps: Timestamps::Both,
            ..Default::default()
        }
    }

    /// Set the iso-dates policy.
    pub fn iso_dates(mut self, iso: bool) -> Self {
        self.iso_dates = iso;
        self
    }

    /// Set the created/updated field names.
    pub fn timestamp_fields(mut self, created: &str, updated: &str) -> Self {
        self.created_field = Some(created.to_string());
        self.updated_field = Some(updated.to_string());
        self
    }

    /// Set the null storage policy.
    pub fn nulls(mut self, nulls: bool) -> Self {
        self.nulls = nulls;
        self
    }

    /// Enable missing-required-field warnings.
    pub fn warn(mut self, warn: bool) -> Self {
        self.warn = warn;
        self
    }
}

/// The top-level declarative schema.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaDef {
    /// Schema format tag, maintained on persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Schema version; required.
    pub version: String,
    /// Index declarations; must contain a `primary` entry.
    pub indexes: IndexMap<String, IndexDef>,
    /// Model name → field declarations.
    pub models: IndexMap<String, ModelDef>,
    /// Table-wide parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<SchemaParams>,
    /// Schema name, used by schema persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SchemaDef {
    /// An empty schema at the given version.
    pub fn new(version: &str) -> Self {
        SchemaDef {
            version: version.to_string(),
            ..Default::default()
        }
    }

    /// Add an index.
    pub fn index(mut self, name: &str, def: IndexDef) -> Self {
        self.indexes.insert(name.to_string(), def);
        self
    }

    /// Add a model.
    pub fn model(mut self, name: &str, def: ModelDef) -> Self {
        self.models.insert(name.to_string(), def);
        self
    }

    /// Set the table parameters.
    pub fn params(mut self, params: SchemaParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Set the schema name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}
