//! Concurrent evaluation of query expressions over a vault.

use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::frontmatter::{self, normalize_property_value, Properties};
use crate::fuzzy::FuzzyPattern;
use crate::links::{
    collect_backlinks, follow_links, strip_md, AmbiguityPolicy, Backlink, FollowOptions,
    WikilinkOptions,
};
use crate::pool::fan_out;
use crate::query::{InputExpression, ListInput, ParsedQuery};
use crate::store::DocumentStore;
use crate::tags::{extract_tags, normalize_tag};

/// Meaning of a query with no terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmptyQuery {
    #[default]
    #[serde(rename = "none")]
    MatchNone,
    #[serde(rename = "all")]
    MatchAll,
}

/// Per-document attributes, each computed on first use and at most once.
///
/// Lives for one document's evaluation on one worker; never shared.
pub struct NoteContext<'a, S: ?Sized> {
    store: &'a S,
    id: &'a str,
    content: OnceCell<Option<String>>,
    frontmatter: OnceCell<Properties>,
    inline: OnceCell<BTreeMap<String, Vec<String>>>,
    tags: OnceCell<BTreeSet<String>>,
}

impl<'a, S: DocumentStore + ?Sized> NoteContext<'a, S> {
    pub fn new(store: &'a S, id: &'a str) -> Self {
        Self {
            store,
            id,
            content: OnceCell::new(),
            frontmatter: OnceCell::new(),
            inline: OnceCell::new(),
            tags: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.id
    }

    /// `None` when the document cannot be read.
    pub fn content(&self) -> Option<&str> {
        self.content
            .get_or_init(|| match self.store.content(self.id) {
                Ok(text) => Some(text),
                Err(e) => {
                    debug!(document = %self.id, error = %e, "treating unreadable document as non-matching");
                    None
                }
            })
            .as_deref()
    }

    pub fn frontmatter(&self) -> Option<&Properties> {
        let content = self.content()?;
        Some(self.frontmatter.get_or_init(|| frontmatter::parse_properties(content)))
    }

    pub fn inline_properties(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        let content = self.content()?;
        Some(self.inline.get_or_init(|| frontmatter::inline_properties(content)))
    }

    pub fn tags(&self) -> Option<&BTreeSet<String>> {
        let content = self.content()?;
        Some(self.tags.get_or_init(|| extract_tags(content)))
    }

    fn has_property(&self, key: &str, wanted: &str) -> bool {
        if let Some(props) = self.frontmatter() {
            let hit = frontmatter::lookup(props, key)
                .flat_map(|v| v.flatten())
                .any(|v| normalize_property_value(v) == wanted);
            if hit {
                return true;
            }
        }
        self.inline_properties()
            .and_then(|inline| inline.get(key))
            .is_some_and(|vals| vals.iter().any(|v| normalize_property_value(v) == wanted))
    }
}

/// Whether `id` is `prefix` itself (with or without `.md`) or lies below it.
pub fn matches_path(prefix: &str, id: &str) -> bool {
    if prefix == "*" {
        return true;
    }
    let prefix = prefix.trim_end_matches('/');
    id == prefix
        || strip_md(id) == prefix
        || id.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

/// A leaf with its per-query work done up front.
enum Matcher {
    Path(String),
    Tag(String),
    Fuzzy(FuzzyPattern),
    Property { key: String, value: String },
}

impl Matcher {
    fn compile(input: &ListInput) -> Self {
        match input {
            ListInput::PathPrefix { value } => Matcher::Path(value.clone()),
            ListInput::Tag { value } => {
                Matcher::Tag(normalize_tag(value).unwrap_or_else(|| value.to_lowercase()))
            }
            ListInput::FuzzyFind { pattern } => Matcher::Fuzzy(FuzzyPattern::new(pattern)),
            ListInput::Property { key, value } => Matcher::Property {
                key: key.trim().to_lowercase(),
                value: normalize_property_value(value),
            },
        }
    }

    fn matches<S: DocumentStore + ?Sized>(&self, ctx: &NoteContext<'_, S>) -> bool {
        match self {
            Matcher::Path(prefix) => matches_path(prefix, ctx.id()),
            Matcher::Fuzzy(pattern) => pattern.matches(ctx.id()),
            Matcher::Tag(tag) => ctx.tags().is_some_and(|tags| tags.contains(tag)),
            Matcher::Property { key, value } => ctx.has_property(key, value),
        }
    }
}

enum Compiled {
    Leaf(Matcher),
    And(Box<Compiled>, Box<Compiled>),
    Or(Box<Compiled>, Box<Compiled>),
    Not(Box<Compiled>),
}

impl Compiled {
    fn new(expr: &InputExpression) -> Self {
        match expr {
            InputExpression::Leaf(input) => Compiled::Leaf(Matcher::compile(input)),
            InputExpression::And(l, r) => Compiled::And(Box::new(Self::new(l)), Box::new(Self::new(r))),
            InputExpression::Or(l, r) => Compiled::Or(Box::new(Self::new(l)), Box::new(Self::new(r))),
            InputExpression::Not(c) => Compiled::Not(Box::new(Self::new(c))),
        }
    }

    fn eval<S: DocumentStore + ?Sized>(&self, ctx: &NoteContext<'_, S>) -> bool {
        match self {
            Compiled::Leaf(m) => m.matches(ctx),
            Compiled::And(l, r) => l.eval(ctx) && r.eval(ctx),
            Compiled::Or(l, r) => l.eval(ctx) || r.eval(ctx),
            Compiled::Not(c) => !c.eval(ctx),
        }
    }
}

/// Documents matching `expression`, evaluated across a worker pool.
///
/// Unreadable documents fail content predicates but still satisfy path
/// ones. With no expression the result follows `empty`.
pub fn evaluate<S: DocumentStore + ?Sized>(
    store: &S,
    documents: &[String],
    expression: Option<&InputExpression>,
    empty: EmptyQuery,
) -> BTreeSet<String> {
    let Some(expression) = expression else {
        return match empty {
            EmptyQuery::MatchAll => documents.iter().cloned().collect(),
            EmptyQuery::MatchNone => BTreeSet::new(),
        };
    };
    let compiled = Compiled::new(expression);

    let matched = fan_out(documents, |batch, tx| {
        for id in batch {
            let ctx = NoteContext::new(store, id);
            if compiled.eval(&ctx) {
                let _ = tx.send(id.clone());
            }
        }
    });

    debug!(documents = documents.len(), matched = matched.len(), "evaluated query");
    matched.into_iter().collect()
}

/// Keep documents that carry none of `suppressed`. Unreadable documents are
/// kept.
pub fn drop_suppressed<S: DocumentStore + ?Sized>(
    store: &S,
    ids: &[String],
    suppressed: &BTreeSet<String>,
) -> BTreeSet<String> {
    if suppressed.is_empty() {
        return ids.iter().cloned().collect();
    }
    fan_out(ids, |batch, tx| {
        for id in batch {
            let keep = match store.content(id) {
                Ok(content) => extract_tags(&content).is_disjoint(suppressed),
                Err(_) => true,
            };
            if keep {
                let _ = tx.send(id.clone());
            }
        }
    })
    .into_iter()
    .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub empty_query: EmptyQuery,
    pub suppressed_tags: Vec<String>,
    /// Expand the matches along wikilinks.
    pub follow: Option<FollowOptions>,
    /// Collect backlinks of the primary matches.
    pub backlinks: bool,
    /// Which links count when collecting backlinks.
    pub links: WikilinkOptions,
    pub ambiguity: AmbiguityPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListResult {
    /// Query matches after suppression.
    pub primary: Vec<String>,
    /// `primary`, plus documents reached by following links.
    pub matches: Vec<String>,
    pub backlinks: BTreeMap<String, Vec<Backlink>>,
}

/// Evaluate, suppress, then optionally follow links and gather backlinks.
pub fn list<S: DocumentStore + ?Sized>(
    store: &S,
    query: &ParsedQuery,
    options: &ListOptions,
) -> Result<ListResult> {
    let documents = store.list_documents()?;
    let suppressed: BTreeSet<String> = options
        .suppressed_tags
        .iter()
        .filter_map(|t| normalize_tag(t))
        .collect();

    let found = evaluate(store, &documents, query.expression.as_ref(), options.empty_query);
    let found: Vec<String> = found.into_iter().collect();
    let primary: Vec<String> = drop_suppressed(store, &found, &suppressed).into_iter().collect();

    let matches = match &options.follow {
        Some(follow) => {
            let reached: Vec<String> = follow_links(store, &primary, &documents, follow)
                .into_iter()
                .collect();
            drop_suppressed(store, &reached, &suppressed).into_iter().collect()
        }
        None => primary.clone(),
    };

    let backlinks = if options.backlinks {
        let scan = FollowOptions {
            max_depth: Some(1),
            links: options.links,
            ambiguity: options.ambiguity,
        };
        collect_backlinks(store, &documents, &primary, &scan, &suppressed)
    } else {
        BTreeMap::new()
    };

    Ok(ListResult {
        primary,
        matches,
        backlinks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_expression;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn vault() -> MemoryStore {
        MemoryStore::new()
            .with_document("X.md", "---\ntags: [work]\n---\n")
            .with_document("Y.md", "---\ntags: [work, archived]\n---\n")
            .with_document("Projects/Plan.md", "---\nstatus: Active\nowner: \"[[Ann|A.]]\"\n---\n#todo\n")
            .with_document("Projects/Sub/Deep.md", "priority:: High\n")
            .with_document("Projectsish.md", "")
            .with_unreadable("Locked/secret.md")
    }

    fn run(store: &MemoryStore, args: &[&str]) -> Vec<String> {
        let docs = store.list_documents().unwrap();
        let parsed = parse_expression(args).unwrap();
        evaluate(store, &docs, parsed.expression.as_ref(), EmptyQuery::MatchNone)
            .into_iter()
            .collect()
    }

    #[test]
    fn test_tag_and_not() {
        assert_eq!(run(&vault(), &["tag:work AND NOT tag:archived"]), vec!["X.md"]);
    }

    #[test]
    fn test_universal_path_matches_everything() {
        let store = vault();
        let docs = store.list_documents().unwrap();
        assert_eq!(run(&store, &["*"]), docs);
    }

    #[test]
    fn test_path_prefix_respects_segments() {
        assert_eq!(
            run(&vault(), &["Projects"]),
            vec!["Projects/Plan.md", "Projects/Sub/Deep.md"]
        );
        assert_eq!(run(&vault(), &["Projects/Plan"]), vec!["Projects/Plan.md"]);
    }

    #[test]
    fn test_properties_frontmatter_and_inline() {
        let store = vault();
        assert_eq!(run(&store, &["status:active"]), vec!["Projects/Plan.md"]);
        assert_eq!(run(&store, &["Owner:ann"]), vec!["Projects/Plan.md"]);
        assert_eq!(run(&store, &["priority:high"]), vec!["Projects/Sub/Deep.md"]);
        assert!(run(&store, &["status:done"]).is_empty());
    }

    #[test]
    fn test_path_match_ignores_extension_case() {
        assert!(matches_path("Projects/Plan", "Projects/Plan.MD"));
        assert!(matches_path("Projects/Plan", "Projects/Plan.Md"));
        assert!(!matches_path("Projects/Plan", "Projects/Planning.MD"));
        let store = MemoryStore::new().with_document("Notes/Upper.MD", "");
        assert_eq!(run(&store, &["Notes/Upper"]), vec!["Notes/Upper.MD"]);
    }

    #[test]
    fn test_fuzzy_find() {
        assert_eq!(run(&vault(), &["find:sub/deep"]), Vec::<String>::new());
        assert_eq!(run(&vault(), &["find:plan"]), vec!["Projects/Plan.md"]);
    }

    #[test]
    fn test_unreadable_documents() {
        let store = vault();
        // Content predicates fail, path predicates still match.
        assert!(!run(&store, &["tag:work"]).contains(&"Locked/secret.md".to_string()));
        assert_eq!(run(&store, &["Locked"]), vec!["Locked/secret.md"]);
    }

    #[test]
    fn test_or_and_monotonicity() {
        let store = vault();
        let a = run(&store, &["tag:work"]);
        let b = run(&store, &["Projects"]);
        let or = run(&store, &["tag:work", "OR", "Projects"]);
        let and = run(&store, &["tag:work AND tag:archived"]);
        assert!(a.iter().chain(b.iter()).all(|d| or.contains(d)));
        assert!(and.iter().all(|d| a.contains(d)));
    }

    #[test]
    fn test_empty_query_policy() {
        let store = vault();
        let docs = store.list_documents().unwrap();
        assert!(evaluate(&store, &docs, None, EmptyQuery::MatchNone).is_empty());
        assert_eq!(evaluate(&store, &docs, None, EmptyQuery::MatchAll).len(), docs.len());
    }

    struct CountingStore {
        inner: MemoryStore,
        reads: AtomicUsize,
    }

    impl DocumentStore for CountingStore {
        fn list_documents(&self) -> Result<Vec<String>> {
            self.inner.list_documents()
        }
        fn content(&self, id: &str) -> Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.content(id)
        }
        fn write_content(&self, id: &str, text: &str) -> Result<()> {
            self.inner.write_content(id, text)
        }
    }

    #[test]
    fn test_content_read_once_per_document() {
        let store = CountingStore {
            inner: MemoryStore::new()
                .with_document("a.md", "---\nstatus: x\n---\n#t\nk:: v\n")
                .with_document("b.md", ""),
            reads: AtomicUsize::new(0),
        };
        let docs = store.list_documents().unwrap();
        let parsed = parse_expression(&["(tag:t OR status:y OR k:nope) AND NOT tag:zzz"]).unwrap();
        let hits = evaluate(&store, &docs, parsed.expression.as_ref(), EmptyQuery::MatchNone);
        assert_eq!(hits.into_iter().collect::<Vec<_>>(), vec!["a.md"]);
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_list_suppression_follow_and_backlinks() {
        let store = MemoryStore::new()
            .with_document("hub.md", "#start [[a]] [[hidden]]")
            .with_document("a.md", "[[b]]")
            .with_document("b.md", "")
            .with_document("hidden.md", "#private")
            .with_document("fan.md", "[[hub]]");
        let query = parse_expression(&["tag:start"]).unwrap();
        let options = ListOptions {
            suppressed_tags: vec!["#Private".into()],
            follow: Some(FollowOptions { max_depth: Some(1), ..Default::default() }),
            backlinks: true,
            ..Default::default()
        };
        let result = list(&store, &query, &options).unwrap();
        assert_eq!(result.primary, vec!["hub.md"]);
        assert_eq!(result.matches, vec!["a.md", "hub.md"]);
        assert_eq!(result.backlinks["hub.md"].len(), 1);
        assert_eq!(result.backlinks["hub.md"][0].referrer, "fan.md");
    }

    #[test]
    fn test_backlinks_use_link_options_without_follow() {
        let store = MemoryStore::new()
            .with_document("target.md", "#seed")
            .with_document("embeds.md", "![[target]]")
            .with_document("plain.md", "[[target]]")
            .with_document("dir1/dup.md", "#twin")
            .with_document("dir2/dup.md", "")
            .with_document("bare.md", "[[dup]]");

        let seed = parse_expression(&["tag:seed"]).unwrap();
        let options = ListOptions {
            backlinks: true,
            links: WikilinkOptions {
                skip_embeds: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = list(&store, &seed, &options).unwrap();
        let referrers: Vec<&str> = result.backlinks["target.md"]
            .iter()
            .map(|b| b.referrer.as_str())
            .collect();
        assert_eq!(referrers, vec!["plain.md"]);

        // An ambiguous bare name only counts when the policy resolves it.
        let twin = parse_expression(&["tag:twin"]).unwrap();
        let skip = ListOptions {
            backlinks: true,
            ..Default::default()
        };
        assert!(list(&store, &twin, &skip).unwrap().backlinks["dir1/dup.md"].is_empty());
        let shortest = ListOptions {
            ambiguity: AmbiguityPolicy::Shortest,
            ..skip
        };
        let result = list(&store, &twin, &shortest).unwrap();
        assert_eq!(result.backlinks["dir1/dup.md"][0].referrer, "bare.md");
    }
}
