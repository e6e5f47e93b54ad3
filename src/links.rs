//! Wikilinks: extraction, name resolution, traversal and backlinks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use ahash::AHashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::pool::fan_out;
use crate::store::{normalize_path, DocumentStore};
use crate::tags::extract_tags;

static WIKILINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(!?)\[\[([^\[\]\n]+?)\]\]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Basic,
    Alias,
    Heading,
    Block,
    Embed,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Basic => "basic",
            LinkKind::Alias => "alias",
            LinkKind::Heading => "heading",
            LinkKind::Block => "block",
            LinkKind::Embed => "embed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wikilink {
    /// Link target as written, without the alias; may carry `#anchor`.
    pub target: String,
    pub kind: LinkKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikilinkOptions {
    /// Ignore links with a `#heading` or `#^block` anchor.
    pub skip_anchors: bool,
    /// Ignore `![[embeds]]`.
    pub skip_embeds: bool,
}

/// What to do with a link whose bare name matches several documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguityPolicy {
    /// Do not follow it.
    #[default]
    Skip,
    /// Follow the shortest identifier, then the lexicographically first.
    Shortest,
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

/// Wikilinks outside fenced code, in document order.
pub fn extract_wikilinks(content: &str, options: &WikilinkOptions) -> Vec<Wikilink> {
    let mut links = Vec::new();
    let mut in_fence = false;

    for line in content.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        for caps in WIKILINK_RE.captures_iter(line) {
            let embed = !caps[1].is_empty();
            let inner = &caps[2];
            let (target, alias) = match inner.split_once('|') {
                Some((target, _)) => (target, true),
                None => (inner, false),
            };
            let target = target.trim().replace('\\', "/");

            let kind = if embed {
                LinkKind::Embed
            } else if alias {
                LinkKind::Alias
            } else if target.contains("#^") {
                LinkKind::Block
            } else if target.contains('#') {
                LinkKind::Heading
            } else {
                LinkKind::Basic
            };

            if embed && options.skip_embeds {
                continue;
            }
            if options.skip_anchors && target.contains('#') {
                continue;
            }
            links.push(Wikilink { target, kind });
        }
    }

    links
}

pub(crate) fn strip_md(path: &str) -> &str {
    match path.len().checked_sub(3) {
        Some(cut) if path.is_char_boundary(cut) && path[cut..].eq_ignore_ascii_case(".md") => &path[..cut],
        _ => path,
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Outcome of looking up a link target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    Unique(&'a str),
    /// Sorted candidates sharing the name.
    Ambiguous(&'a [String]),
    Missing,
}

/// Lookup from link targets to document identifiers.
#[derive(Debug, Default)]
pub struct NameIndex {
    /// Extension-less path as written.
    exact: AHashMap<String, String>,
    /// Lowercased extension-less path.
    folded: AHashMap<String, Vec<String>>,
    /// Lowercased basename.
    names: AHashMap<String, Vec<String>>,
}

impl NameIndex {
    pub fn build(documents: &[String]) -> Self {
        let mut index = NameIndex::default();
        for id in documents {
            let stem = strip_md(id);
            index.exact.insert(stem.to_string(), id.clone());
            index.folded.entry(stem.to_lowercase()).or_default().push(id.clone());
            index
                .names
                .entry(basename(stem).to_lowercase())
                .or_default()
                .push(id.clone());
        }
        for ids in index.folded.values_mut().chain(index.names.values_mut()) {
            ids.sort();
            ids.dedup();
        }
        index
    }

    fn from_candidates<'a>(candidates: &'a [String]) -> Resolution<'a> {
        match candidates {
            [] => Resolution::Missing,
            [only] => Resolution::Unique(only),
            many => Resolution::Ambiguous(many),
        }
    }

    /// Resolve a link target: exact path, then path ignoring case, then
    /// basename (narrowed by any folder the link names).
    pub fn resolve(&self, target: &str) -> Resolution<'_> {
        let target = target.split('#').next().unwrap_or_default();
        let target = normalize_path(target);
        let stem = strip_md(&target);
        if stem.is_empty() {
            return Resolution::Missing;
        }

        if let Some(id) = self.exact.get(stem) {
            return Resolution::Unique(id);
        }
        let folded = stem.to_lowercase();
        if let Some(ids) = self.folded.get(&folded) {
            return Self::from_candidates(ids);
        }

        let Some(ids) = self.names.get(basename(&folded)) else {
            return Resolution::Missing;
        };
        if folded.contains('/') {
            let suffix = format!("/{folded}");
            let narrowed: Vec<&String> = ids
                .iter()
                .filter(|id| strip_md(id).to_lowercase().ends_with(&suffix))
                .collect();
            if let [only] = narrowed.as_slice() {
                return Resolution::Unique(only);
            }
        }
        Self::from_candidates(ids)
    }

    /// Resolve under `policy`; ambiguous targets are logged.
    pub fn resolve_with(&self, target: &str, policy: AmbiguityPolicy) -> Option<&str> {
        match self.resolve(target) {
            Resolution::Unique(id) => Some(id),
            Resolution::Missing => None,
            Resolution::Ambiguous(candidates) => {
                debug!(target, candidates = candidates.len(), ?policy, "ambiguous link");
                match policy {
                    AmbiguityPolicy::Skip => None,
                    AmbiguityPolicy::Shortest => candidates
                        .iter()
                        .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
                        .map(String::as_str),
                }
            }
        }
    }

    /// Basenames shared by more than one document.
    pub fn ambiguous_names(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.names
            .iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(name, ids)| (name.as_str(), ids.as_slice()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowOptions {
    /// Hops from any seed; `None` follows until nothing new is reached.
    pub max_depth: Option<usize>,
    pub links: WikilinkOptions,
    pub ambiguity: AmbiguityPolicy,
}

/// Seeds plus every document reachable within `max_depth` hops.
///
/// A single visited set spans the whole walk, so cycles terminate. Each
/// frontier is read in parallel; unreadable documents are skipped.
pub fn follow_links<S: DocumentStore + ?Sized>(
    store: &S,
    seeds: &[String],
    documents: &[String],
    options: &FollowOptions,
) -> BTreeSet<String> {
    let index = NameIndex::build(documents);
    let mut visited: BTreeSet<String> = seeds.iter().cloned().collect();
    let mut frontier: Vec<String> = visited.iter().cloned().collect();
    let mut depth = 0;

    while !frontier.is_empty() && options.max_depth.map_or(true, |max| depth < max) {
        let reached = fan_out(&frontier, |batch, tx| {
            for id in batch {
                let content = match store.content(id) {
                    Ok(content) => content,
                    Err(e) => {
                        warn!(document = %id, error = %e, "skipping unreadable document during traversal");
                        continue;
                    }
                };
                for link in extract_wikilinks(&content, &options.links) {
                    if let Some(target) = index.resolve_with(&link.target, options.ambiguity) {
                        let _ = tx.send(target.to_string());
                    }
                }
            }
        });

        let mut next: Vec<String> = reached
            .into_iter()
            .filter(|target| visited.insert(target.clone()))
            .collect();
        next.sort();
        depth += 1;
        debug!(depth, discovered = next.len(), "expanded frontier");
        frontier = next;
    }

    visited
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backlink {
    pub referrer: String,
    pub kind: LinkKind,
}

/// Documents linking to each of `targets`, scanned in parallel.
///
/// Every target gets an entry, possibly empty. A referrer appears once per
/// target with its lowest-ordered link kind. Referrers carrying any of
/// `suppressed` tags are left out.
pub fn collect_backlinks<S: DocumentStore + ?Sized>(
    store: &S,
    documents: &[String],
    targets: &[String],
    options: &FollowOptions,
    suppressed: &BTreeSet<String>,
) -> BTreeMap<String, Vec<Backlink>> {
    let index = NameIndex::build(documents);
    let wanted: BTreeSet<&str> = targets.iter().map(String::as_str).collect();

    let found = fan_out(documents, |batch, tx| {
        for referrer in batch {
            let content = match store.content(referrer) {
                Ok(content) => content,
                Err(e) => {
                    warn!(document = %referrer, error = %e, "skipping unreadable referrer");
                    continue;
                }
            };
            if !suppressed.is_empty() && !extract_tags(&content).is_disjoint(suppressed) {
                continue;
            }
            for link in extract_wikilinks(&content, &options.links) {
                let Some(target) = index.resolve_with(&link.target, options.ambiguity) else {
                    continue;
                };
                if wanted.contains(target) {
                    let _ = tx.send((target.to_string(), referrer.clone(), link.kind));
                }
            }
        }
    });

    let mut by_target: BTreeMap<String, BTreeMap<String, LinkKind>> = targets
        .iter()
        .map(|t| (t.clone(), BTreeMap::new()))
        .collect();
    for (target, referrer, kind) in found {
        let slot = by_target.entry(target).or_default().entry(referrer).or_insert(kind);
        *slot = (*slot).min(kind);
    }

    by_target
        .into_iter()
        .map(|(target, refs)| {
            let refs: Vec<Backlink> = refs
                .into_iter()
                .map(|(referrer, kind)| Backlink { referrer, kind })
                .collect();
            (target, refs)
        })
        .collect()
}
