//! Vault-wide property summaries and batch frontmatter property edits.
//!
//! A summary reports, per property name, how many notes carry it, the shape
//! and value type its values take, and the distinct values themselves when
//! there are few enough of them to read as an enumeration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use ahash::AHashMap;
use regex::Regex;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::error::{BatchFailure, Result, VaultError};
use crate::frontmatter;
use crate::pool::fold_batches;
use crate::rewrite::{rewrite_documents, MutationSummary};
use crate::store::DocumentStore;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^https?://\S+$").unwrap());

static WIKILINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^!?\[\[[^\]]+\]\]$").unwrap());

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}[-/](0[1-9]|1[0-2])[-/](0[1-9]|[12]\d|3[01])$").unwrap()
});

static DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\d{4}[-/](0[1-9]|1[0-2])[-/](0[1-9]|[12]\d|3[01])[ T]([01]\d|2[0-3]):[0-5]\d(:[0-5]\d(\.\d+)?)?(Z|[+-]\d{2}:\d{2})?$",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Scalar,
    List,
    Object,
    Mixed,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Date,
    Datetime,
    Url,
    Wikilink,
    String,
    Object,
    Mixed,
    Unknown,
}

impl Shape {
    pub fn as_str(self) -> &'static str {
        match self {
            Shape::Scalar => "scalar",
            Shape::List => "list",
            Shape::Object => "object",
            Shape::Mixed => "mixed",
            Shape::Unknown => "unknown",
        }
    }
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Date => "date",
            ValueType::Datetime => "datetime",
            ValueType::Url => "url",
            ValueType::Wikilink => "wikilink",
            ValueType::String => "string",
            ValueType::Object => "object",
            ValueType::Mixed => "mixed",
            ValueType::Unknown => "unknown",
        }
    }

    /// Whether values of this type can be listed as a closed set.
    fn enumerable(self) -> bool {
        !matches!(
            self,
            ValueType::Url | ValueType::Date | ValueType::Datetime | ValueType::Object | ValueType::Unknown
        )
    }
}

/// Shape, detected type and flattened scalar values of one property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInfo {
    pub shape: Shape,
    pub value_type: ValueType,
    pub values: Vec<String>,
}

impl ValueInfo {
    fn scalar(value_type: ValueType, value: String) -> Self {
        Self {
            shape: Shape::Scalar,
            value_type,
            values: vec![value],
        }
    }
}

/// Classify a string by what it looks like.
pub fn analyze_text(raw: &str) -> ValueInfo {
    let value = raw.trim();
    if value.is_empty() {
        return ValueInfo {
            shape: Shape::Scalar,
            value_type: ValueType::String,
            values: Vec::new(),
        };
    }
    let value_type = if URL_RE.is_match(value) {
        ValueType::Url
    } else if WIKILINK_RE.is_match(value) {
        ValueType::Wikilink
    } else if DATETIME_RE.is_match(value) {
        ValueType::Datetime
    } else if DATE_RE.is_match(value) {
        ValueType::Date
    } else {
        ValueType::String
    };
    ValueInfo::scalar(value_type, value.to_string())
}

fn analyze_list(items: impl IntoIterator<Item = ValueInfo>) -> ValueInfo {
    let mut types = BTreeSet::new();
    let mut values = Vec::new();
    let mut nested = false;
    for item in items {
        // Nested lists make the element type ambiguous.
        if item.shape == Shape::List {
            nested = true;
        } else {
            types.insert(item.value_type);
        }
        values.extend(item.values);
    }
    let mut types = types.into_iter();
    let value_type = match (nested, types.next(), types.next()) {
        (false, None, _) => ValueType::Unknown,
        (false, Some(only), None) => only,
        _ => ValueType::Mixed,
    };
    ValueInfo {
        shape: Shape::List,
        value_type,
        values,
    }
}

/// Shape and type of a raw frontmatter value.
pub fn analyze_value(value: &Value) -> ValueInfo {
    match value {
        Value::Null => ValueInfo {
            shape: Shape::Unknown,
            value_type: ValueType::Unknown,
            values: Vec::new(),
        },
        Value::Bool(b) => ValueInfo::scalar(ValueType::Bool, b.to_string()),
        Value::Number(n) if n.is_f64() => ValueInfo::scalar(ValueType::Float, n.to_string()),
        Value::Number(n) => ValueInfo::scalar(ValueType::Int, n.to_string()),
        Value::String(s) => analyze_text(s),
        Value::Sequence(items) => analyze_list(items.iter().map(analyze_value)),
        Value::Mapping(_) => ValueInfo {
            shape: Shape::Object,
            value_type: ValueType::Object,
            values: Vec::new(),
        },
        Value::Tagged(tagged) => analyze_value(&tagged.value),
    }
}

/// Where property values are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertySource {
    #[default]
    All,
    Frontmatter,
    /// `Key:: Value` lines only.
    Inline,
}

impl FromStr for PropertySource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(PropertySource::All),
            "frontmatter" => Ok(PropertySource::Frontmatter),
            "inline" => Ok(PropertySource::Inline),
            other => Err(format!("unknown property source {other:?} (expected all, frontmatter or inline)")),
        }
    }
}

impl fmt::Display for PropertySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PropertySource::All => "all",
            PropertySource::Frontmatter => "frontmatter",
            PropertySource::Inline => "inline",
        })
    }
}

#[derive(Debug, Clone)]
pub struct PropertyOptions {
    pub source: PropertySource,
    pub exclude_tags: bool,
    /// Most distinct values a property may have and still be enumerated.
    pub enum_threshold: usize,
    /// Distinct values kept per property; `tags` is never capped.
    pub max_values: usize,
    /// Report how many notes carry each enumerated value.
    pub value_counts: bool,
}

impl Default for PropertyOptions {
    fn default() -> Self {
        Self {
            source: PropertySource::All,
            exclude_tags: false,
            enum_threshold: 10,
            max_values: 500,
            value_counts: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertySummary {
    /// Lowercased; frontmatter keys differing only in case are one property.
    pub name: String,
    pub note_count: usize,
    pub shape: Shape,
    pub value_type: ValueType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub enum_value_counts: BTreeMap<String, usize>,
    pub distinct_value_count: usize,
    /// More distinct values were seen than `max_values` allows.
    pub truncated: bool,
}

/// Per-property tallies. Merging sums everything except the capped value set.
#[derive(Debug, Default, Clone)]
struct PropertyCounts {
    notes: usize,
    shapes: AHashMap<Shape, usize>,
    types: AHashMap<ValueType, usize>,
    /// Value -> notes carrying it.
    values: BTreeMap<String, usize>,
    overflow: bool,
}

impl PropertyCounts {
    fn add_value(&mut self, value: String, notes: usize, cap: Option<usize>) {
        if let Some(n) = self.values.get_mut(&value) {
            *n += notes;
            return;
        }
        if cap.is_some_and(|cap| self.values.len() >= cap) {
            self.overflow = true;
            return;
        }
        self.values.insert(value, notes);
    }

    fn add_note(&mut self, infos: Vec<ValueInfo>, cap: Option<usize>) {
        self.notes += 1;
        let mut seen = BTreeSet::new();
        for info in infos {
            *self.shapes.entry(info.shape).or_default() += 1;
            *self.types.entry(info.value_type).or_default() += 1;
            seen.extend(
                info.values
                    .into_iter()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty()),
            );
        }
        for value in seen {
            self.add_value(value, 1, cap);
        }
    }

    fn merge(&mut self, other: PropertyCounts, cap: Option<usize>) {
        self.notes += other.notes;
        for (shape, n) in other.shapes {
            *self.shapes.entry(shape).or_default() += n;
        }
        for (value_type, n) in other.types {
            *self.types.entry(value_type).or_default() += n;
        }
        for (value, n) in other.values {
            self.add_value(value, n, cap);
        }
        self.overflow |= other.overflow;
    }
}

fn pick_or_mixed<K: Copy>(counts: &AHashMap<K, usize>, unknown: K, mixed: K) -> K {
    let mut keys = counts.keys();
    match (keys.next(), keys.next()) {
        (None, _) => unknown,
        (Some(only), None) => *only,
        _ => mixed,
    }
}

fn cap_for(name: &str, options: &PropertyOptions) -> Option<usize> {
    (name != "tags").then_some(options.max_values)
}

/// Every property of one document with its analyzed values, keyed by
/// lowercased name.
fn note_properties(content: &str, options: &PropertyOptions) -> BTreeMap<String, Vec<ValueInfo>> {
    let mut props: BTreeMap<String, Vec<ValueInfo>> = BTreeMap::new();
    if options.source != PropertySource::Inline {
        if let Some(map) = frontmatter::parse_mapping(content) {
            for (key, value) in &map {
                let Some(key) = key.as_str() else {
                    continue;
                };
                props.entry(key.to_lowercase()).or_default().push(analyze_value(value));
            }
        }
    }
    if options.source != PropertySource::Frontmatter {
        for (key, values) in frontmatter::inline_properties(content) {
            // One entry per line, so the shape stays scalar.
            let mut info = analyze_list(values.iter().map(|v| analyze_text(v)));
            info.shape = Shape::Scalar;
            props.entry(key).or_default().push(info);
        }
    }
    if options.exclude_tags {
        props.remove("tags");
    }
    props
}

/// Property summaries for `documents`, most widely used first.
///
/// Unreadable documents are skipped.
pub fn property_summaries<S: DocumentStore + ?Sized>(
    store: &S,
    documents: &[String],
    options: &PropertyOptions,
) -> Vec<PropertySummary> {
    let partials = fold_batches(documents, |batch| {
        let mut local: AHashMap<String, PropertyCounts> = AHashMap::new();
        for id in batch {
            let content = match store.content(id) {
                Ok(content) => content,
                Err(e) => {
                    warn!(document = %id, error = %e, "skipping unreadable document");
                    continue;
                }
            };
            for (name, infos) in note_properties(&content, options) {
                let cap = cap_for(&name, options);
                local.entry(name).or_default().add_note(infos, cap);
            }
        }
        local
    });

    let mut merged: AHashMap<String, PropertyCounts> = AHashMap::new();
    for partial in partials {
        for (name, counts) in partial {
            let cap = cap_for(&name, options);
            merged.entry(name).or_default().merge(counts, cap);
        }
    }
    debug!(properties = merged.len(), "summarized properties");

    let mut summaries: Vec<PropertySummary> = merged
        .into_iter()
        .map(|(name, counts)| summarize(name, counts, options))
        .collect();
    summaries.sort_by(|a, b| b.note_count.cmp(&a.note_count).then_with(|| a.name.cmp(&b.name)));
    summaries
}

fn summarize(name: String, counts: PropertyCounts, options: &PropertyOptions) -> PropertySummary {
    let shape = pick_or_mixed(&counts.shapes, Shape::Unknown, Shape::Mixed);
    let value_type = pick_or_mixed(&counts.types, ValueType::Unknown, ValueType::Mixed);
    let distinct = counts.values.len();
    let enumerate = distinct > 0
        && (name == "tags"
            || (value_type.enumerable() && distinct <= options.enum_threshold && !counts.overflow));

    let (enum_values, enum_value_counts) = if enumerate {
        let values = counts.values.keys().cloned().collect();
        let value_counts = if options.value_counts {
            counts.values
        } else {
            BTreeMap::new()
        };
        (values, value_counts)
    } else {
        (Vec::new(), BTreeMap::new())
    };

    PropertySummary {
        name,
        note_count: counts.notes,
        shape,
        value_type,
        enum_values,
        enum_value_counts,
        distinct_value_count: distinct,
        truncated: counts.overflow,
    }
}

/// A validated frontmatter property edit. Names match keys ignoring case.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyMutation {
    /// Creates the frontmatter block when a note has none.
    Set {
        key: String,
        value: Value,
        overwrite: bool,
    },
    Delete { keys: Vec<String> },
    /// Sources are removed. An existing destination keeps its value unless
    /// `merge` is set, in which case everything is flattened into one
    /// deduplicated list.
    Rename {
        from: Vec<String>,
        to: String,
        merge: bool,
    },
}

fn property_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(VaultError::InvalidProperty {
            key: name.to_string(),
            reason: "property names cannot be empty",
        });
    }
    Ok(name.to_string())
}

fn property_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>> {
    if names.is_empty() {
        return Err(VaultError::InvalidProperty {
            key: String::new(),
            reason: "no properties given",
        });
    }
    names.iter().map(|n| property_name(n.as_ref())).collect()
}

/// Read a command-line value as YAML, so `3`, `true` and `[a, b]` keep their
/// types. Anything that reads as null stays the literal text.
pub fn parse_value(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Null) | Err(_) => Value::String(raw.to_string()),
        Ok(value) => value,
    }
}

fn same_name(key: &Value, name: &str) -> bool {
    key.as_str().is_some_and(|k| k.to_lowercase() == name.to_lowercase())
}

fn key_of(map: &Mapping, name: &str) -> Option<Value> {
    map.keys().find(|k| same_name(k, name)).cloned()
}

fn push_unique(items: &mut Vec<Value>, value: Value) {
    if !items.contains(&value) {
        items.push(value);
    }
}

/// Flatten `values` (splicing in lists, dropping nulls) into one list.
fn merged_list(values: impl IntoIterator<Item = Value>) -> Value {
    let mut items = Vec::new();
    for value in values {
        match value {
            Value::Sequence(seq) => {
                for item in seq {
                    push_unique(&mut items, item);
                }
            }
            Value::Null => {}
            other => push_unique(&mut items, other),
        }
    }
    Value::Sequence(items)
}

impl PropertyMutation {
    pub fn set(key: &str, value: Value, overwrite: bool) -> Result<Self> {
        Ok(PropertyMutation::Set {
            key: property_name(key)?,
            value,
            overwrite,
        })
    }

    pub fn delete<S: AsRef<str>>(keys: &[S]) -> Result<Self> {
        Ok(PropertyMutation::Delete {
            keys: property_names(keys)?,
        })
    }

    pub fn rename<S: AsRef<str>>(from: &[S], to: &str, merge: bool) -> Result<Self> {
        let from = property_names(from)?;
        let to = property_name(to)?;
        if let Some(same) = from.iter().find(|f| f.to_lowercase() == to.to_lowercase()) {
            return Err(VaultError::InvalidProperty {
                key: same.clone(),
                reason: "cannot rename a property to itself",
            });
        }
        Ok(PropertyMutation::Rename { from, to, merge })
    }

    fn edit(&self, map: &mut Mapping, changed: &mut BTreeSet<String>) -> bool {
        match self {
            PropertyMutation::Set {
                key,
                value,
                overwrite,
            } => {
                let existing = key_of(map, key);
                if existing.is_some() && !overwrite {
                    return false;
                }
                let target = existing.unwrap_or_else(|| Value::String(key.clone()));
                if map.get(&target) == Some(value) {
                    return false;
                }
                map.insert(target, value.clone());
                changed.insert(key.clone());
                true
            }
            PropertyMutation::Delete { keys } => {
                let mut any = false;
                for name in keys {
                    while let Some(found) = key_of(map, name) {
                        map.shift_remove(&found);
                        changed.insert(name.clone());
                        any = true;
                    }
                }
                any
            }
            PropertyMutation::Rename { from, to, merge } => {
                let mut collected = Vec::new();
                for name in from {
                    while let Some(found) = key_of(map, name) {
                        if let Some(value) = map.shift_remove(&found) {
                            collected.push(value);
                        }
                        changed.insert(name.clone());
                    }
                }
                if collected.is_empty() {
                    return false;
                }
                match key_of(map, to) {
                    Some(dest) => {
                        if *merge {
                            let existing = map.get(&dest).cloned().unwrap_or(Value::Null);
                            let value = merged_list(std::iter::once(existing).chain(collected));
                            map.insert(dest, value);
                            changed.insert(to.clone());
                        }
                    }
                    None => {
                        let value = if collected.len() == 1 {
                            collected.remove(0)
                        } else {
                            merged_list(collected)
                        };
                        map.insert(Value::String(to.clone()), value);
                        changed.insert(to.clone());
                    }
                }
                true
            }
        }
    }

    /// Rewrite one document's frontmatter. `None` when nothing changed.
    pub fn apply_to(&self, content: &str) -> Option<(String, BTreeSet<String>)> {
        let mut changed = BTreeSet::new();
        let edit = |map: &mut Mapping| self.edit(map, &mut changed);
        let rewritten = match self {
            PropertyMutation::Set { .. } => frontmatter::upsert_mapping(content, edit),
            _ => frontmatter::rewrite_mapping(content, edit),
        }?;
        Some((rewritten, changed))
    }

    /// Rewrite every matching document; see [`rewrite_documents`].
    pub fn run<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        documents: &[String],
        dry_run: bool,
    ) -> std::result::Result<MutationSummary, BatchFailure> {
        rewrite_documents(store, documents, dry_run, |content| self.apply_to(content))
    }
}

/// Set `key` to `value` on every document. Existing values are kept unless
/// `overwrite` is set.
pub fn set_property<S: DocumentStore + ?Sized>(
    store: &S,
    documents: &[String],
    key: &str,
    value: Value,
    overwrite: bool,
    dry_run: bool,
) -> std::result::Result<MutationSummary, BatchFailure> {
    PropertyMutation::set(key, value, overwrite)?.run(store, documents, dry_run)
}

pub fn delete_properties<S: DocumentStore + ?Sized, T: AsRef<str>>(
    store: &S,
    documents: &[String],
    keys: &[T],
    dry_run: bool,
) -> std::result::Result<MutationSummary, BatchFailure> {
    PropertyMutation::delete(keys)?.run(store, documents, dry_run)
}

pub fn rename_properties<S: DocumentStore + ?Sized, T: AsRef<str>>(
    store: &S,
    documents: &[String],
    from: &[T],
    to: &str,
    merge: bool,
    dry_run: bool,
) -> std::result::Result<MutationSummary, BatchFailure> {
    PropertyMutation::rename(from, to, merge)?.run(store, documents, dry_run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    fn kind(text: &str) -> (Shape, ValueType) {
        let info = analyze_value(&yaml(text));
        (info.shape, info.value_type)
    }

    #[test]
    fn test_analyze_value_types() {
        assert_eq!(kind("open"), (Shape::Scalar, ValueType::String));
        assert_eq!(kind("true"), (Shape::Scalar, ValueType::Bool));
        assert_eq!(kind("3"), (Shape::Scalar, ValueType::Int));
        assert_eq!(kind("4.5"), (Shape::Scalar, ValueType::Float));
        assert_eq!(kind("2024-01-02"), (Shape::Scalar, ValueType::Date));
        assert_eq!(kind("2024/01/02 10:30"), (Shape::Scalar, ValueType::Datetime));
        assert_eq!(kind("2024-13-02"), (Shape::Scalar, ValueType::String));
        assert_eq!(kind("https://example.com/a"), (Shape::Scalar, ValueType::Url));
        assert_eq!(kind("\"[[Some Note]]\""), (Shape::Scalar, ValueType::Wikilink));
        assert_eq!(kind("[a, b]"), (Shape::List, ValueType::String));
        assert_eq!(kind("[a, 1]"), (Shape::List, ValueType::Mixed));
        assert_eq!(kind("[[a], b]"), (Shape::List, ValueType::Mixed));
        assert_eq!(kind("[]"), (Shape::List, ValueType::Unknown));
        assert_eq!(kind("{k: v}"), (Shape::Object, ValueType::Object));
        assert_eq!(kind("~"), (Shape::Unknown, ValueType::Unknown));
        assert_eq!(analyze_value(&yaml("[a, [b, c]]")).values, vec!["a", "b", "c"]);
    }

    fn vault() -> MemoryStore {
        MemoryStore::new()
            .with_document(
                "a.md",
                "---\nstatus: open\ntags: [x, y]\ndue: 2024-01-01\n---\nowner:: Ann\n",
            )
            .with_document("b.md", "---\nstatus: [open, blocked]\ncount: 3\n---\n")
            .with_document("c.md", "---\nStatus: done\ncount: 4.5\nmeta:\n  k: v\n---\n")
            .with_unreadable("d.md")
    }

    fn summaries(store: &MemoryStore, options: &PropertyOptions) -> Vec<PropertySummary> {
        let docs = store.list_documents().unwrap();
        property_summaries(store, &docs, options)
    }

    #[test]
    fn test_summaries_count_notes_shapes_and_enums() {
        let options = PropertyOptions {
            value_counts: true,
            ..Default::default()
        };
        let all = summaries(&vault(), &options);
        let names: Vec<&str> = all.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["status", "count", "due", "meta", "owner", "tags"]);

        let status = &all[0];
        assert_eq!(status.note_count, 3);
        assert_eq!(status.shape, Shape::Mixed);
        assert_eq!(status.value_type, ValueType::String);
        assert_eq!(status.enum_values, vec!["blocked", "done", "open"]);
        assert_eq!(status.enum_value_counts["open"], 2);
        assert_eq!(status.distinct_value_count, 3);

        let count = &all[1];
        assert_eq!((count.shape, count.value_type), (Shape::Scalar, ValueType::Mixed));
        assert_eq!(count.enum_values, vec!["3", "4.5"]);

        // Dates are never enumerated; objects carry no values.
        assert!(all[2].enum_values.is_empty());
        assert_eq!(all[2].distinct_value_count, 1);
        assert_eq!(all[3].value_type, ValueType::Object);
        assert_eq!(all[3].distinct_value_count, 0);
        assert_eq!(all[4].enum_values, vec!["Ann"]);
        assert_eq!(all[5].enum_values, vec!["x", "y"]);
    }

    #[test]
    fn test_summary_sources_and_tag_exclusion() {
        let store = vault();
        let only = |source: PropertySource| {
            let options = PropertyOptions {
                source,
                exclude_tags: true,
                ..Default::default()
            };
            summaries(&store, &options)
                .into_iter()
                .map(|s| s.name)
                .collect::<Vec<_>>()
        };
        assert_eq!(only(PropertySource::Inline), vec!["owner"]);
        assert_eq!(only(PropertySource::Frontmatter), vec!["status", "count", "due", "meta"]);
        assert_eq!("Inline".parse::<PropertySource>(), Ok(PropertySource::Inline));
        assert!("body".parse::<PropertySource>().is_err());
    }

    #[test]
    fn test_enum_threshold_and_value_cap() {
        let mut store = MemoryStore::new();
        for i in 0..12 {
            store = store.with_document(
                &format!("n{i:02}.md"),
                &format!("---\nid: v{i:02}\ntags: [t{i:02}]\n---\n"),
            );
        }
        let all = summaries(&store, &PropertyOptions::default());
        let id = all.iter().find(|s| s.name == "id").unwrap();
        assert_eq!(id.distinct_value_count, 12);
        assert!(id.enum_values.is_empty());
        assert!(!id.truncated);

        let capped = PropertyOptions {
            max_values: 5,
            ..Default::default()
        };
        let all = summaries(&store, &capped);
        let id = all.iter().find(|s| s.name == "id").unwrap();
        assert_eq!(id.distinct_value_count, 5);
        assert!(id.truncated);
        let tags = all.iter().find(|s| s.name == "tags").unwrap();
        assert_eq!(tags.distinct_value_count, 12);
        assert_eq!(tags.enum_values.len(), 12);
        assert!(!tags.truncated);
    }

    #[test]
    fn test_set_creates_frontmatter_and_respects_overwrite() {
        let set = PropertyMutation::set("status", parse_value("open"), false).unwrap();
        let (out, changed) = set.apply_to("# Note").unwrap();
        assert_eq!(out, "---\nstatus: open\n---\n# Note");
        assert_eq!(changed, BTreeSet::from(["status".to_string()]));
        assert!(set.apply_to("---\nStatus: done\n---\n").is_none());

        let overwrite = PropertyMutation::set("status", parse_value("open"), true).unwrap();
        let (out, _) = overwrite.apply_to("---\nStatus: done\ntitle: T\n---\n").unwrap();
        assert_eq!(out, "---\nStatus: open\ntitle: T\n---\n");
        assert!(overwrite.apply_to("---\nstatus: open\n---\n").is_none());

        assert_eq!(parse_value("3"), yaml("3"));
        assert_eq!(parse_value(""), Value::String(String::new()));
    }

    #[test]
    fn test_delete_removes_every_case_variant() {
        let delete = PropertyMutation::delete(&["status"]).unwrap();
        let (out, changed) = delete
            .apply_to("---\nstatus: open\ntitle: T\nSTATUS: x\n---\nbody")
            .unwrap();
        assert_eq!(out, "---\ntitle: T\n---\nbody");
        assert_eq!(changed.len(), 1);
        assert!(delete.apply_to("no frontmatter").is_none());
    }

    #[test]
    fn test_rename_merge_and_keep() {
        let doc = "---\nold: a\nnew:\n  - b\n---\nbody";
        let merge = PropertyMutation::rename(&["old"], "new", true).unwrap();
        let (out, changed) = merge.apply_to(doc).unwrap();
        assert_eq!(out, "---\nnew:\n- b\n- a\n---\nbody");
        assert_eq!(changed, BTreeSet::from(["new".to_string(), "old".to_string()]));

        let keep = PropertyMutation::rename(&["old"], "new", false).unwrap();
        let (out, changed) = keep.apply_to(doc).unwrap();
        assert_eq!(out, "---\nnew:\n- b\n---\nbody");
        assert_eq!(changed, BTreeSet::from(["old".to_string()]));

        let gather = PropertyMutation::rename(&["a", "b"], "c", false).unwrap();
        let (out, _) = gather.apply_to("---\na: 1\nb: [2, 1]\n---\n").unwrap();
        assert_eq!(out, "---\nc:\n- 1\n- 2\n---\n");
    }

    #[test]
    fn test_mutation_validation() {
        assert!(PropertyMutation::set("  ", parse_value("x"), false).is_err());
        assert!(PropertyMutation::delete::<&str>(&[]).is_err());
        assert!(PropertyMutation::rename(&["Status"], "status", false).is_err());
        assert!(PropertyMutation::rename(&["a"], "", false).is_err());
    }

    #[test]
    fn test_batch_edits_through_store() {
        let store = MemoryStore::new()
            .with_document("a.md", "# A")
            .with_document("b.md", "---\nstatus: done\n---\n")
            .with_unreadable("c.md");
        let docs = store.list_documents().unwrap();

        let preview = set_property(&store, &docs, "status", parse_value("open"), false, true).unwrap();
        assert_eq!(preview.files_changed, vec!["a.md"]);
        assert_eq!(store.get("a.md").unwrap(), "# A");

        let summary = set_property(&store, &docs, "status", parse_value("open"), false, false).unwrap();
        assert_eq!(summary.changes.get("status"), Some(&1));
        assert_eq!(store.get("a.md").unwrap(), "---\nstatus: open\n---\n# A");

        let summary = delete_properties(&store, &docs, &["status"], false).unwrap();
        assert_eq!(summary.notes_touched, 2);
        assert_eq!(summary.changes.get("status"), Some(&2));

        let failure = rename_properties(&store, &docs, &["x"], "x", false, false).unwrap_err();
        assert!(matches!(failure.source, VaultError::InvalidProperty { .. }));
    }
}
