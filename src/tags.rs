//! Tag extraction, hierarchy counts, and batch tag rewrites.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use ahash::AHashMap;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::error::{BatchFailure, Result, VaultError};
use crate::frontmatter::{self, PropertyValue};
use crate::pool::fold_batches;
use crate::rewrite::{rewrite_documents, MutationSummary};
use crate::store::DocumentStore;

static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)#([\p{L}\p{N}_/-]+)").unwrap());

/// Trim, drop a leading `#` and surrounding `/`, lowercase, and validate.
///
/// Rejects empty tags, tags with whitespace, and tags without a letter
/// (which covers purely numeric ones such as `#2024`).
pub fn normalize_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().trim_start_matches('#').trim_matches('/').to_lowercase();
    if tag.is_empty() || tag.contains(char::is_whitespace) {
        return None;
    }
    if !tag.chars().any(char::is_alphabetic) {
        return None;
    }
    Some(tag)
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

/// Calls `f` with each run of prose on every line outside fenced code,
/// skipping inline code spans.
fn for_each_prose_run(text: &str, mut f: impl FnMut(&str)) {
    let mut in_fence = false;
    for line in text.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        for (i, part) in line.split('`').enumerate() {
            if i % 2 == 0 {
                f(part);
            }
        }
    }
}

fn frontmatter_tag_values(value: &PropertyValue) -> Vec<String> {
    match value {
        PropertyValue::Scalar(s) => s.split(',').map(str::to_string).collect(),
        other => other.flatten().into_iter().map(str::to_string).collect(),
    }
}

/// Every valid tag in a document: frontmatter `tags` plus inline hashtags
/// outside code.
pub fn extract_tags(content: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();

    let props = frontmatter::parse_properties(content);
    for value in frontmatter::lookup(&props, "tags") {
        tags.extend(
            frontmatter_tag_values(value)
                .iter()
                .filter_map(|t| normalize_tag(t)),
        );
    }

    for_each_prose_run(frontmatter::body(content), |run| {
        for caps in HASHTAG_RE.captures_iter(run) {
            if let Some(tag) = normalize_tag(&caps[2]) {
                tags.insert(tag);
            }
        }
    });

    tags
}

/// `a/b/c` -> `a`, `a/b`, `a/b/c`.
fn prefixes(tag: &str) -> impl Iterator<Item = &str> {
    tag.match_indices('/')
        .map(move |(i, _)| &tag[..i])
        .chain(std::iter::once(tag))
}

/// Per-tag document counts. Merging is a plain sum.
#[derive(Debug, Default, Clone)]
pub struct TagCounts {
    individual: AHashMap<String, usize>,
    aggregate: AHashMap<String, usize>,
}

impl TagCounts {
    /// Count one document's (already deduplicated) tags.
    pub fn add_document(&mut self, tags: &BTreeSet<String>) {
        let mut chain: BTreeSet<&str> = BTreeSet::new();
        for tag in tags {
            *self.individual.entry(tag.clone()).or_default() += 1;
            chain.extend(prefixes(tag));
        }
        for prefix in chain {
            *self.aggregate.entry(prefix.to_string()).or_default() += 1;
        }
    }

    pub fn merge(&mut self, other: TagCounts) {
        for (tag, n) in other.individual {
            *self.individual.entry(tag).or_default() += n;
        }
        for (tag, n) in other.aggregate {
            *self.aggregate.entry(tag).or_default() += n;
        }
    }

    pub fn individual(&self, tag: &str) -> usize {
        self.individual.get(tag).copied().unwrap_or(0)
    }

    pub fn aggregate(&self, tag: &str) -> usize {
        self.aggregate.get(tag).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagNode {
    pub name: String,
    pub individual_count: usize,
    pub aggregate_count: usize,
    pub children: Vec<TagNode>,
}

/// One row of the flattened hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagSummary {
    pub name: String,
    pub individual_count: usize,
    pub aggregate_count: usize,
}

impl TagSummary {
    pub fn depth(&self) -> usize {
        self.name.matches('/').count()
    }
}

/// Top-level nodes of the prefix tree; the empty root is implicit.
/// Siblings are ordered by aggregate count descending, then name.
pub fn build_tag_tree(counts: &TagCounts) -> Vec<TagNode> {
    let mut children_of: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for name in counts.aggregate.keys() {
        let parent = name.rsplit_once('/').map_or("", |(parent, _)| parent);
        children_of.entry(parent).or_default().push(name);
    }

    fn build(name: &str, counts: &TagCounts, children_of: &BTreeMap<&str, Vec<&str>>) -> Vec<TagNode> {
        let mut nodes: Vec<TagNode> = children_of
            .get(name)
            .map(|kids| {
                kids.iter()
                    .map(|kid| TagNode {
                        name: kid.to_string(),
                        individual_count: counts.individual(kid),
                        aggregate_count: counts.aggregate(kid),
                        children: build(kid, counts, children_of),
                    })
                    .collect()
            })
            .unwrap_or_default();
        nodes.sort_by(|a, b| {
            b.aggregate_count
                .cmp(&a.aggregate_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        nodes
    }

    build("", counts, &children_of)
}

/// Pre-order walk of the tree.
pub fn flatten_tree(nodes: &[TagNode]) -> Vec<TagSummary> {
    fn walk(nodes: &[TagNode], out: &mut Vec<TagSummary>) {
        for node in nodes {
            out.push(TagSummary {
                name: node.name.clone(),
                individual_count: node.individual_count,
                aggregate_count: node.aggregate_count,
            });
            walk(&node.children, out);
        }
    }
    let mut out = Vec::new();
    walk(nodes, &mut out);
    out
}

/// Count tags over `documents` in parallel. Unreadable documents are
/// skipped.
pub fn count_tags<S: DocumentStore + ?Sized>(store: &S, documents: &[String]) -> TagCounts {
    let partials = fold_batches(documents, |batch| {
        let mut local = TagCounts::default();
        for id in batch {
            match store.content(id) {
                Ok(content) => local.add_document(&extract_tags(&content)),
                Err(e) => warn!(document = %id, error = %e, "skipping unreadable document"),
            }
        }
        local
    });

    let mut total = TagCounts::default();
    for partial in partials {
        total.merge(partial);
    }
    debug!(tags = total.individual.len(), "counted tags");
    total
}

/// Flattened tag hierarchy for `documents`.
pub fn tag_hierarchy<S: DocumentStore + ?Sized>(store: &S, documents: &[String]) -> Vec<TagSummary> {
    flatten_tree(&build_tag_tree(&count_tags(store, documents)))
}

/// A validated tag rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagMutation {
    Delete { tags: Vec<String> },
    /// Also moves descendants: `from/x` becomes `to/x`.
    Rename { from: Vec<String>, to: String },
}

fn validated(tag: &str) -> Result<String> {
    normalize_tag(tag).ok_or_else(|| VaultError::InvalidTag {
        tag: tag.to_string(),
        reason: "tags must be non-empty, contain no whitespace and contain a letter",
    })
}

enum Edit {
    Keep,
    Remove,
    Replace(String),
}

impl TagMutation {
    pub fn delete<S: AsRef<str>>(tags: &[S]) -> Result<Self> {
        if tags.is_empty() {
            return Err(VaultError::InvalidTag {
                tag: String::new(),
                reason: "no tags given",
            });
        }
        let tags = tags.iter().map(|t| validated(t.as_ref())).collect::<Result<_>>()?;
        Ok(TagMutation::Delete { tags })
    }

    pub fn rename<S: AsRef<str>>(from: &[S], to: &str) -> Result<Self> {
        if from.is_empty() {
            return Err(VaultError::InvalidTag {
                tag: String::new(),
                reason: "no source tags given",
            });
        }
        let to_norm = validated(to)?;
        let from = from
            .iter()
            .map(|t| validated(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if let Some(same) = from.iter().find(|f| **f == to_norm) {
            return Err(VaultError::InvalidTag {
                tag: same.clone(),
                reason: "cannot rename a tag to itself",
            });
        }
        // Keep the destination's spelling apart from surrounding '#' and '/'.
        let to = to.trim().trim_start_matches('#').trim_matches('/').to_string();
        Ok(TagMutation::Rename { from, to })
    }

    /// Decide what happens to one occurrence. `raw` is the tag as written.
    /// Returns the requested tag responsible for the change, if any.
    fn edit(&self, raw: &str) -> (Edit, Option<&str>) {
        let Some(tag) = normalize_tag(raw) else {
            return (Edit::Keep, None);
        };
        match self {
            TagMutation::Delete { tags } => match tags.iter().find(|t| **t == tag) {
                Some(t) => (Edit::Remove, Some(t)),
                None => (Edit::Keep, None),
            },
            TagMutation::Rename { from, to } => {
                for f in from {
                    if tag == *f {
                        return (Edit::Replace(to.clone()), Some(f));
                    }
                    if tag.starts_with(f.as_str()) && tag[f.len()..].starts_with('/') {
                        // Lowercasing can change byte lengths, so split the
                        // written form by segment count.
                        let raw = raw.trim().trim_start_matches('#').trim_matches('/');
                        let depth = f.split('/').count();
                        let suffix = raw
                            .match_indices('/')
                            .nth(depth - 1)
                            .map_or(&tag[f.len()..], |(i, _)| &raw[i..]);
                        return (Edit::Replace(format!("{to}{suffix}")), Some(f));
                    }
                }
                (Edit::Keep, None)
            }
        }
    }

    fn rewrite_frontmatter(&self, content: &str, changed: &mut BTreeSet<String>) -> Option<String> {
        frontmatter::rewrite_mapping(content, |map| {
            let Some(key) = map
                .keys()
                .find(|k| k.as_str().is_some_and(|s| s.eq_ignore_ascii_case("tags")))
                .cloned()
            else {
                return false;
            };
            let Some(existing) = map.get(&key).map(|v| frontmatter_tag_values(&frontmatter::classify(v)))
            else {
                return false;
            };

            let mut kept: Vec<String> = Vec::new();
            let mut seen: BTreeSet<String> = BTreeSet::new();
            let mut any = false;
            for raw in existing {
                let raw = raw.trim();
                if raw.is_empty() {
                    continue;
                }
                let (edit, cause) = self.edit(raw);
                if let Some(cause) = cause {
                    changed.insert(cause.to_string());
                    any = true;
                }
                let out = match edit {
                    Edit::Keep => raw.to_string(),
                    Edit::Remove => continue,
                    Edit::Replace(new) => new,
                };
                if seen.insert(out.to_lowercase()) {
                    kept.push(out);
                }
            }
            if !any {
                return false;
            }
            if kept.is_empty() {
                map.remove(&key);
            } else {
                map.insert(key, Value::Sequence(kept.into_iter().map(Value::String).collect()));
            }
            true
        })
    }

    fn rewrite_run(&self, run: &str, changed: &mut BTreeSet<String>) -> Option<String> {
        let mut any = false;
        let rewritten = HASHTAG_RE.replace_all(run, |caps: &Captures<'_>| {
            let lead = &caps[1];
            let (edit, cause) = self.edit(&caps[2]);
            if let Some(cause) = cause {
                changed.insert(cause.to_string());
                any = true;
            }
            match edit {
                Edit::Keep => caps[0].to_string(),
                Edit::Remove => String::new(),
                Edit::Replace(new) => format!("{lead}#{new}"),
            }
        });
        any.then(|| rewritten.into_owned())
    }

    /// Rewrite the prose of one line, leaving inline code spans alone.
    fn rewrite_line(&self, line: &str, changed: &mut BTreeSet<String>) -> Option<String> {
        let mut any = false;
        let mut out = String::with_capacity(line.len());
        for (i, part) in line.split('`').enumerate() {
            if i > 0 {
                out.push('`');
            }
            let rewritten = if i % 2 == 0 {
                self.rewrite_run(part, changed)
            } else {
                None
            };
            match rewritten {
                Some(new) => {
                    any = true;
                    out.push_str(&new);
                }
                None => out.push_str(part),
            }
        }
        if !any {
            return None;
        }
        // Removing a leading tag leaves the following space behind.
        if !line.starts_with(char::is_whitespace) {
            return Some(out.trim_start().to_string());
        }
        Some(out)
    }

    fn rewrite_inline(&self, content: &str, changed: &mut BTreeSet<String>) -> Option<String> {
        let body_start = frontmatter::split_frontmatter(content).map_or(0, |s| s.body_start);
        let (head, body) = content.split_at(body_start);
        let mut in_fence = false;
        let mut any = false;
        let mut out = String::with_capacity(content.len());
        out.push_str(head);

        for line in body.split_inclusive('\n') {
            let (text, newline) = match line.strip_suffix('\n') {
                Some(text) => (text, "\n"),
                None => (line, ""),
            };
            if is_fence(text) {
                in_fence = !in_fence;
            }
            if in_fence || is_fence(text) {
                out.push_str(line);
                continue;
            }
            match self.rewrite_line(text, changed) {
                Some(new) => {
                    any = true;
                    out.push_str(&new);
                    out.push_str(newline);
                }
                None => out.push_str(line),
            }
        }

        any.then_some(out)
    }

    /// Rewrite one document's text. `None` when nothing matched.
    pub fn apply_to(&self, content: &str) -> Option<(String, BTreeSet<String>)> {
        let mut changed = BTreeSet::new();
        let after_fm = self.rewrite_frontmatter(content, &mut changed);
        let current = after_fm.as_deref().unwrap_or(content);
        let after_inline = self.rewrite_inline(current, &mut changed);
        let result = after_inline.or(after_fm)?;
        Some((result, changed))
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

/// Remove `tags` (exact matches only) from every document.
pub fn delete_tags<S: DocumentStore + ?Sized, T: AsRef<str>>(
    store: &S,
    documents: &[String],
    tags: &[T],
    dry_run: bool,
) -> std::result::Result<MutationSummary, BatchFailure> {
    TagMutation::delete(tags)?.run(store, documents, dry_run)
}

/// Rename `from` tags, and their descendants, to `to`.
pub fn rename_tags<S: DocumentStore + ?Sized, T: AsRef<str>>(
    store: &S,
    documents: &[String],
    from: &[T],
    to: &str,
    dry_run: bool,
) -> std::result::Result<MutationSummary, BatchFailure> {
    TagMutation::rename(from, to)?.run(store, documents, dry_run)
}
