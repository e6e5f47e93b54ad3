//! vaultgraph - query, traverse and analyze a vault of linked Markdown notes.
//!
//! A vault is any directory of `.md` files. Notes carry YAML frontmatter,
//! `Key:: Value` inline properties, `#hashtags` and `[[wikilinks]]`; this
//! crate evaluates boolean queries over them, follows and reverses links,
//! aggregates hierarchical tags and properties, and computes link graph
//! statistics.

pub mod config;
pub mod error;
pub mod eval;
pub mod filter;
pub mod frontmatter;
pub mod fuzzy;
pub mod graph;
pub mod links;
pub mod pool;
pub mod properties;
pub mod query;
pub mod rewrite;
pub mod store;
pub mod tags;

pub use config::VaultConfig;
pub use error::{BatchFailure, ParseError, Result, VaultError};
pub use eval::{drop_suppressed, evaluate, list, EmptyQuery, ListOptions, ListResult};
pub use filter::PathFilter;
pub use graph::{graph_analysis, graph_stats, GraphAnalysis, GraphOptions, GraphStats, LinkGraph};
pub use links::{
    collect_backlinks, extract_wikilinks, follow_links, AmbiguityPolicy, Backlink, FollowOptions,
    LinkKind, NameIndex, WikilinkOptions,
};
pub use properties::{
    delete_properties, property_summaries, rename_properties, set_property, PropertyMutation,
    PropertyOptions, PropertySource, PropertySummary,
};
pub use query::{parse_expression, InputExpression, ListInput, ParsedQuery};
pub use rewrite::MutationSummary;
pub use store::{DocumentStore, FsStore, MemoryStore};
pub use tags::{delete_tags, extract_tags, rename_tags, tag_hierarchy, TagMutation, TagSummary};
