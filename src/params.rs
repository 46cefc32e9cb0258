use crate::client::DynamoClient;
use crate::expression::Command;
use crate::table::{Batch, Transaction};
use crate::value::{Item, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Existence requirement for a write operation.
///
/// `Params::exists` is optional; when unset each operation applies its own
/// default (create → [`Exists::MustNotExist`], update → [`Exists::MustExist`],
/// upsert → [`Exists::DontCare`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exists {
    /// The item must already exist (`attribute_exists` condition).
    MustExist,
    /// The item must not exist (`attribute_not_exists` condition).
    MustNotExist,
    /// No existence condition; updates behave as upserts.
    DontCare,
}

/// Return-value policy for write operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnValues {
    /// Return nothing.
    None,
    /// Return the item as it was before the write.
    AllOld,
    /// Return the item as it is after the write.
    AllNew,
    /// Return only the updated attributes, pre-write.
    UpdatedOld,
    /// Return only the updated attributes, post-write.
    UpdatedNew,
    /// Re-read the item after the write completes. Staged (batch or
    /// transaction) operations return the transformed input instead.
    Get,
}

impl ReturnValues {
    pub(crate) fn as_dynamo(self) -> Option<&'static str> {
        match self {
            ReturnValues::None => Some("NONE"),
            ReturnValues::AllOld => Some("ALL_OLD"),
            ReturnValues::AllNew => Some("ALL_NEW"),
            ReturnValues::UpdatedOld => Some("UPDATED_OLD"),
            ReturnValues::UpdatedNew => Some("UPDATED_NEW"),
            ReturnValues::Get => None,
        }
    }
}

/// Consumed-capacity accounting accumulated across the pages of a find or
/// scan, returned on the result when requested with [`Params::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stats {
    /// Items returned after filtering.
    pub count: i64,
    /// Items evaluated before filtering.
    pub scanned: i64,
    /// Consumed capacity units.
    pub capacity: f64,
}

/// Post-command hook, applied to the built command before dispatch.
pub type PostFormat = Arc<dyn Fn(Command) -> Command + Send + Sync>;

/// Operation modifiers, built fluently:
///
/// ```
/// use dynamo_mapper::{Exists, Params};
///
/// let params = Params::new()
///     .index("gs1")
///     .limit(25)
///     .exists(Exists::DontCare)
///     .hidden(true);
/// # let _ = params;
/// ```
#[derive(Clone, Default)]
pub struct Params {
    pub(crate) execute: Option<bool>,
    pub(crate) parse: bool,
    pub(crate) high: bool,
    pub(crate) hidden: Option<bool>,
    pub(crate) partial: Option<bool>,
    pub(crate) exists: Option<Exists>,
    pub(crate) limit: Option<usize>,
    pub(crate) next: Option<Item>,
    pub(crate) prev: Option<Item>,
    pub(crate) reverse: bool,
    pub(crate) max_pages: Option<usize>,
    pub(crate) index: Option<String>,
    pub(crate) fields: Option<Vec<String>>,
    pub(crate) consistent: bool,
    pub(crate) return_values: Option<ReturnValues>,
    pub(crate) where_clause: Option<String>,
    pub(crate) set: IndexMap<String, String>,
    pub(crate) add: Item,
    pub(crate) remove: Vec<String>,
    pub(crate) delete: Item,
    pub(crate) push: Item,
    pub(crate) substitutions: Item,
    pub(crate) segments: Option<i32>,
    pub(crate) segment: Option<i32>,
    pub(crate) count: bool,
    pub(crate) select: Option<String>,
    pub(crate) stats: bool,
    pub(crate) capacity: Option<String>,
    pub(crate) batch: Option<Batch>,
    pub(crate) transaction: Option<Transaction>,
    pub(crate) follow: Option<bool>,
    pub(crate) many: bool,
    pub(crate) post_format: Option<PostFormat>,
    pub(crate) client: Option<Arc<dyn DynamoClient>>,
    pub(crate) checked: bool,
    pub(crate) prepared: bool,
}

impl Params {
    /// Empty parameter set.
    pub fn new() -> Self {
        Params::default()
    }

    /// `false` builds and returns the command without executing it.
    pub fn execute(mut self, execute: bool) -> Self {
        self.execute = Some(execute);
        self
    }

    /// Transform backend responses into domain items (on by default for the
    /// public operations).
    pub fn parse(mut self, parse: bool) -> Self {
        self.parse = parse;
        self
    }

    /// Include hidden fields (keys, type marker) in read results.
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = Some(hidden);
        self
    }

    /// Override partial semantics for nested objects and arrays.
    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = Some(partial);
        self
    }

    /// Set the existence requirement for a write.
    pub fn exists(mut self, exists: Exists) -> Self {
        self.exists = Some(exists);
        self
    }

    /// Maximum number of items to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Forward pagination cursor from a previous result.
    pub fn next(mut self, cursor: Item) -> Self {
        self.next = Some(cursor);
        self
    }

    /// Backward pagination cursor from a previous result.
    pub fn prev(mut self, cursor: Item) -> Self {
        self.prev = Some(cursor);
        self
    }

    /// Reverse the traversal order.
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Cap the number of backend pages fetched (default 1000).
    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Query a named index instead of the primary.
    pub fn index(mut self, name: &str) -> Self {
        self.index = Some(name.to_string());
        self
    }

    /// Project only the named fields.
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Use strongly consistent reads.
    pub fn consistent(mut self, consistent: bool) -> Self {
        self.consistent = consistent;
        self
    }

    /// Set the return-value policy for a write.
    pub fn return_values(mut self, rv: ReturnValues) -> Self {
        self.return_values = Some(rv);
        self
    }

    /// Attach a `Where` clause (`${field}`, `@{substitution}` and
    /// `{literal}` tokens are expanded).
    pub fn where_clause(mut self, clause: &str) -> Self {
        self.where_clause = Some(clause.to_string());
        self
    }

    /// Add a `set` update expression for a field path.
    pub fn set(mut self, path: &str, expression: &str) -> Self {
        self.set.insert(path.to_string(), expression.to_string());
        self
    }

    /// Add an `add` update expression (numeric add / set union).
    pub fn add(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.add.insert(path.to_string(), value.into());
        self
    }

    /// Remove an attribute path on update.
    pub fn remove(mut self, path: &str) -> Self {
        self.remove.push(path.to_string());
        self
    }

    /// Add a `delete` update expression (set element removal).
    pub fn delete(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.delete.insert(path.to_string(), value.into());
        self
    }

    /// Append to a list attribute, creating it when absent.
    pub fn push(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.push.insert(path.to_string(), value.into());
        self
    }

    /// Provide a substitution value for `@{name}` tokens.
    pub fn substitution(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.substitutions.insert(name.to_string(), value.into());
        self
    }

    /// Total parallel scan segments.
    pub fn segments(mut self, segments: i32) -> Self {
        self.segments = Some(segments);
        self
    }

    /// This scan's segment number.
    pub fn segment(mut self, segment: i32) -> Self {
        self.segment = Some(segment);
        self
    }

    /// Return a count instead of items.
    pub fn count(mut self, count: bool) -> Self {
        self.count = count;
        self
    }

    /// Raw `Select` value passed through to the backend.
    pub fn select(mut self, select: &str) -> Self {
        self.select = Some(select.to_string());
        self
    }

    /// Accumulate capacity statistics onto the result.
    pub fn stats(mut self, stats: bool) -> Self {
        self.stats = stats;
        self
    }

    /// Consumed-capacity detail level (`TOTAL`, `INDEXES`, `NONE`).
    pub fn capacity(mut self, capacity: &str) -> Self {
        self.capacity = Some(capacity.to_string());
        self
    }

    /// Stage this operation into a batch collector instead of executing.
    pub fn batch(mut self, batch: &Batch) -> Self {
        self.batch = Some(batch.clone());
        self
    }

    /// Stage this operation into a transaction instead of executing.
    pub fn transaction(mut self, transaction: &Transaction) -> Self {
        self.transaction = Some(transaction.clone());
        self
    }

    /// Resolve secondary-index results through the primary index.
    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = Some(follow);
        self
    }

    /// Allow remove to match multiple items.
    pub fn many(mut self, many: bool) -> Self {
        self.many = many;
        self
    }

    /// Hook applied to the built command before dispatch.
    pub fn post_format<F>(mut self, hook: F) -> Self
    where
        F: Fn(Command) -> Command + Send + Sync + 'static,
    {
        self.post_format = Some(Arc::new(hook));
        self
    }

    /// Override the backend client for this operation.
    pub fn client(mut self, client: Arc<dyn DynamoClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub(crate) fn high(mut self, high: bool) -> Self {
        self.high = high;
        self
    }

    /// Merge this parameter set over the operation's defaults. Explicitly
    /// set caller options win; everything else comes from the defaults.
    pub(crate) fn resolved(&self, defaults: Params) -> Params {
        if self.checked {
            return self.clone();
        }
        let mut merged = defaults;
        if self.execute.is_some() {
            merged.execute = self.execute;
        }
        if self.parse {
            merged.parse = true;
        }
        if self.high {
            merged.high = true;
        }
        if self.hidden.is_some() {
            merged.hidden = self.hidden;
        }
        if self.partial.is_some() {
            merged.partial = self.partial;
        }
        if self.exists.is_some() {
            merged.exists = self.exists;
        }
        if self.limit.is_some() {
            merged.limit = self.limit;
        }
        if self.next.is_some() {
            merged.next = self.next.clone();
        }
        if self.prev.is_some() {
            merged.prev = self.prev.clone();
        }
        if self.reverse {
            merged.reverse = true;
        }
        if self.max_pages.is_some() {
            merged.max_pages = self.max_pages;
        }
        if self.index.is_some() {
            merged.index = self.index.clone();
        }
        if self.fields.is_some() {
            merged.fields = self.fields.clone();
        }
        if self.consistent {
            merged.consistent = true;
        }
        if self.return_values.is_some() {
            merged.return_values = self.return_values;
        }
        if self.where_clause.is_some() {
            merged.where_clause = self.where_clause.clone();
        }
        if !self.set.is_empty() {
            merged.set = self.set.clone();
        }
        if !self.add.is_empty() {
            merged.add = self.add.clone();
        }
        if !self.remove.is_empty() {
            merged.remove = self.remove.clone();
        }
        if !self.delete.is_empty() {
            merged.delete = self.delete.clone();
        }
        if !self.push.is_empty() {
            merged.push = self.push.clone();
        }
        if !self.substitutions.is_empty() {
            merged.substitutions = self.substitutions.clone();
        }
        if self.segments.is_some() {
            merged.segments = self.segments;
        }
        if self.segment.is_some() {
            merged.segment = self.segment;
        }
        if self.count {
            merged.count = true;
        }
        if self.select.is_some() {
            merged.select = self.select.clone();
        }
        if self.stats {
            merged.stats = true;
        }
        if self.capacity.is_some() {
            merged.capacity = self.capacity.clone();
        }
        if self.batch.is_some() {
            merged.batch = self.batch.clone();
        }
        if self.transaction.is_some() {
            merged.transaction = self.transaction.clone();
        }
        if self.follow.is_some() {
            merged.follow = self.follow;
        }
        if self.many {
            merged.many = true;
        }
        if self.post_format.is_some() {
            merged.post_format = self.post_format.clone();
        }
        if self.client.is_some() {
            merged.client = self.client.clone();
        }
        merged.checked = true;
        merged
    }

    pub(crate) fn should_execute(&self) -> bool {
        self.execute.unwrap_or(true)
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Params")
            .field("execute", &self.execute)
            .field("parse", &self.parse)
            .field("hidden", &self.hidden)
            .field("partial", &self.partial)
            .field("exists", &self.exists)
            .field("limit", &self.limit)
            .field("index", &self.index)
            .field("reverse", &self.reverse)
            .field("consistent", &self.consistent)
            .field("count", &self.count)
            .field("many", &self.many)
            .finish_non_exhaustive()
    }
}
