use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Instant;

use vaultgraph::properties::parse_value;
use vaultgraph::{
    graph_analysis, graph_stats, list, parse_expression, property_summaries, tag_hierarchy,
    DocumentStore, EmptyQuery, FollowOptions, FsStore, GraphOptions, ListOptions, MutationSummary,
    PathFilter, PropertyOptions, PropertySource, VaultConfig, WikilinkOptions,
};

/// vaultgraph - Query, traverse and analyze a vault of linked Markdown notes
#[derive(Parser)]
#[command(name = "vaultgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Vault root directory
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,

    /// Config file path (default: <vault>/.vaultgraph.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List notes matching a query, e.g. `tag:work AND NOT archive/`
    List {
        /// Query terms: PATH, tag:NAME, find:PATTERN, KEY:VALUE, AND, OR, NOT, ( )
        terms: Vec<String>,

        /// Also list notes reachable through wikilinks
        #[arg(short, long)]
        follow: bool,

        /// Maximum link hops when following (implies --follow)
        #[arg(short, long)]
        depth: Option<usize>,

        /// Follow links until nothing new is reached (implies --follow)
        #[arg(long, conflicts_with = "depth")]
        unbounded: bool,

        /// Ignore links with a #heading or #^block anchor
        #[arg(long)]
        skip_anchors: bool,

        /// Ignore ![[embeds]]
        #[arg(long)]
        skip_embeds: bool,

        /// Show notes linking to each match
        #[arg(short, long)]
        backlinks: bool,

        /// Drop notes carrying this tag (can be repeated)
        #[arg(short, long)]
        suppress: Vec<String>,

        /// An empty query lists every note instead of none
        #[arg(long)]
        match_all_when_empty: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the tag hierarchy with individual and aggregate counts
    Tags {
        /// Restrict to notes matching this query
        terms: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rename tags, including their descendants
    TagRename {
        /// Tags to rename
        #[arg(long, required = true, num_args = 1..)]
        from: Vec<String>,

        /// New tag name
        #[arg(long)]
        to: String,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete tags from every note
    TagDelete {
        /// Tags to delete
        #[arg(required = true)]
        tags: Vec<String>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize properties: note counts, shapes, value types and enumerated values
    Properties {
        /// Restrict to notes matching this query
        terms: Vec<String>,

        /// Where to read properties: all, frontmatter or inline
        #[arg(long, default_value = "all")]
        source: PropertySource,

        /// Leave out the tags property
        #[arg(long)]
        exclude_tags: bool,

        /// Most distinct values to list for one property
        #[arg(long, default_value = "10")]
        enum_threshold: usize,

        /// Show how many notes carry each listed value
        #[arg(long)]
        value_counts: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set a frontmatter property, creating the frontmatter if needed
    PropSet {
        /// Property name
        key: String,

        /// Value, read as YAML (`3`, `true`, `[a, b]`)
        value: String,

        /// Replace an existing value
        #[arg(long)]
        overwrite: bool,

        /// Only notes matching this query (default: every note)
        #[arg(long = "where", num_args = 1..)]
        filter: Vec<String>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete frontmatter properties
    PropDelete {
        /// Properties to delete
        #[arg(required = true)]
        keys: Vec<String>,

        /// Only notes matching this query (default: every note)
        #[arg(long = "where", num_args = 1..)]
        filter: Vec<String>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Rename frontmatter properties
    PropRename {
        /// Properties to rename
        #[arg(long, required = true, num_args = 1..)]
        from: Vec<String>,

        /// New property name
        #[arg(long)]
        to: String,

        /// Merge into an existing destination instead of keeping it as is
        #[arg(long)]
        merge: bool,

        /// Only notes matching this query (default: every note)
        #[arg(long = "where", num_args = 1..)]
        filter: Vec<String>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Link degrees, connected components and orphans
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List notes with no links in or out
    Orphans,

    /// PageRank, strong components and link communities
    Graph {
        /// Only include matching notes (directory prefix or glob, can be repeated)
        #[arg(short, long)]
        include: Vec<String>,

        /// Exclude matching notes (directory prefix or glob, can be repeated)
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Keep only reciprocated links
        #[arg(long)]
        mutual_only: bool,

        /// Drop notes with fewer links in and out
        #[arg(long, default_value = "0")]
        min_degree: usize,

        /// Rows to show per section
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = open_vault(&cli.vault, cli.config.as_deref()).and_then(|vault| match cli.command {
        Commands::List {
            terms,
            follow,
            depth,
            unbounded,
            skip_anchors,
            skip_embeds,
            backlinks,
            suppress,
            match_all_when_empty,
            json,
        } => {
            let links = WikilinkOptions {
                skip_anchors: skip_anchors || vault.config.links.skip_anchors,
                skip_embeds: skip_embeds || vault.config.links.skip_embeds,
            };
            let follow = (follow || depth.is_some() || unbounded).then(|| FollowOptions {
                max_depth: if unbounded {
                    None
                } else {
                    Some(depth.unwrap_or(vault.config.links.max_depth))
                },
                links,
                ambiguity: vault.config.ambiguous_links,
            });
            let mut suppressed_tags = vault.config.suppressed_tags.clone();
            suppressed_tags.extend(suppress);
            let options = ListOptions {
                empty_query: if match_all_when_empty {
                    EmptyQuery::MatchAll
                } else {
                    vault.config.empty_query
                },
                suppressed_tags,
                follow,
                backlinks,
                links,
                ambiguity: vault.config.ambiguous_links,
            };
            cmd_list(&vault, &terms, &options, json, cli.quiet)
        }
        Commands::Tags { terms, json } => cmd_tags(&vault, &terms, json),
        Commands::TagRename { from, to, dry_run } => cmd_tag_rename(&vault, &from, &to, dry_run, cli.quiet),
        Commands::TagDelete { tags, dry_run } => cmd_tag_delete(&vault, &tags, dry_run, cli.quiet),
        Commands::Properties {
            terms,
            source,
            exclude_tags,
            enum_threshold,
            value_counts,
            json,
        } => {
            let options = PropertyOptions {
                source,
                exclude_tags,
                enum_threshold,
                value_counts,
                ..PropertyOptions::default()
            };
            cmd_properties(&vault, &terms, &options, json)
        }
        Commands::PropSet {
            key,
            value,
            overwrite,
            filter,
            dry_run,
        } => cmd_prop_set(&vault, &key, &value, overwrite, &filter, dry_run, cli.quiet),
        Commands::PropDelete { keys, filter, dry_run } => {
            cmd_prop_delete(&vault, &keys, &filter, dry_run, cli.quiet)
        }
        Commands::PropRename {
            from,
            to,
            merge,
            filter,
            dry_run,
        } => cmd_prop_rename(&vault, &from, &to, merge, &filter, dry_run, cli.quiet),
        Commands::Stats { json } => cmd_stats(&vault, json),
        Commands::Orphans => cmd_orphans(&vault, cli.quiet),
        Commands::Graph {
            include,
            exclude,
            mutual_only,
            min_degree,
            top,
            json,
        } => {
            let mut options = graph_options(&vault.config);
            if !include.is_empty() {
                options.include = include;
            }
            if !exclude.is_empty() {
                options.exclude = exclude;
            }
            options.mutual_only = mutual_only;
            options.min_degree = min_degree;
            cmd_graph(&vault, &options, top, json, cli.quiet)
        }
    });

    if let Err(e) = result {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose { "vaultgraph=debug" } else { "vaultgraph=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(env_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

struct Vault {
    store: FsStore,
    config: VaultConfig,
}

fn open_vault(root: &Path, config: Option<&Path>) -> Result<Vault, Box<dyn std::error::Error>> {
    let config_path = match config {
        Some(path) => path.to_path_buf(),
        None => root.join(".vaultgraph.toml"),
    };
    let config = VaultConfig::load(&config_path)?;
    let store = FsStore::new(root).with_ignore(PathFilter::new(&config.ignore)?);
    Ok(Vault { store, config })
}

fn graph_options(config: &VaultConfig) -> GraphOptions {
    GraphOptions {
        links: WikilinkOptions {
            skip_anchors: config.links.skip_anchors,
            skip_embeds: config.links.skip_embeds,
        },
        ambiguity: config.ambiguous_links,
        include: config.graph.include.clone(),
        exclude: config.graph.exclude.clone(),
        damping: config.graph.damping,
        iterations: config.graph.iterations,
        ..GraphOptions::default()
    }
}

fn cmd_list(
    vault: &Vault,
    terms: &[String],
    options: &ListOptions,
    json: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let query = parse_expression(terms)?;
    let result = list(&vault.store, &query, options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    for id in &result.matches {
        if result.primary.binary_search(id).is_ok() {
            println!("{}", id);
        } else {
            println!("{} {}", id, "(linked)".dimmed());
        }
    }

    if options.backlinks {
        println!();
        println!("{}", "Backlinks".green().bold());
        for (target, referrers) in &result.backlinks {
            if referrers.is_empty() {
                continue;
            }
            println!("  {}", target.cyan());
            for backlink in referrers {
                println!("    <- {} {}", backlink.referrer, backlink.kind.as_str().dimmed());
            }
        }
    }

    if !quiet {
        let expression = query
            .expression
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "(empty)".to_string());
        eprintln!(
            "{} matches for {} ({} via links) in {:?}",
            result.primary.len().to_string().yellow().bold(),
            expression.cyan(),
            result.matches.len() - result.primary.len(),
            start.elapsed()
        );
    }

    Ok(())
}

/// Every note, or the notes matching `terms` when any are given.
fn target_documents(vault: &Vault, terms: &[String]) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    if terms.is_empty() {
        return Ok(vault.store.list_documents()?);
    }
    let query = parse_expression(terms)?;
    let options = ListOptions {
        empty_query: vault.config.empty_query,
        ..ListOptions::default()
    };
    Ok(list(&vault.store, &query, &options)?.matches)
}

fn cmd_tags(vault: &Vault, terms: &[String], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let documents = target_documents(vault, terms)?;
    let hierarchy = tag_hierarchy(&vault.store, &documents);

    if json {
        println!("{}", serde_json::to_string_pretty(&hierarchy)?);
        return Ok(());
    }

    if hierarchy.is_empty() {
        println!("{}", "No tags found.".yellow());
        return Ok(());
    }

    println!("{} across {} notes", "Tags".green().bold(), documents.len());
    println!();
    for tag in &hierarchy {
        let indent = "  ".repeat(tag.depth() + 1);
        let leaf = tag.name.rsplit('/').next().unwrap_or(&tag.name);
        let own = if tag.individual_count == tag.aggregate_count {
            String::new()
        } else {
            format!("({} direct)", tag.individual_count)
        };
        println!("{}#{} {} {}", indent, leaf.cyan(), tag.aggregate_count, own.dimmed());
    }

    Ok(())
}

fn cmd_properties(
    vault: &Vault,
    terms: &[String],
    options: &PropertyOptions,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let documents = target_documents(vault, terms)?;
    let summaries = property_summaries(&vault.store, &documents, options);

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("{}", "No properties found.".yellow());
        return Ok(());
    }

    println!("{} across {} notes ({})", "Properties".green().bold(), documents.len(), options.source);
    println!();
    for summary in &summaries {
        let kind = format!("{} {}", summary.shape.as_str(), summary.value_type.as_str());
        let truncated = if summary.truncated { "+" } else { "" };
        println!(
            "  {:<20} {:>5} notes  {:<18} {}{} values",
            summary.name.cyan(),
            summary.note_count,
            kind.dimmed(),
            summary.distinct_value_count,
            truncated
        );
        if summary.enum_values.is_empty() {
            continue;
        }
        let values: Vec<String> = summary
            .enum_values
            .iter()
            .map(|v| match summary.enum_value_counts.get(v) {
                Some(n) => format!("{} ({})", v, n),
                None => v.clone(),
            })
            .collect();
        println!("  {:<20} {}", "", values.join(", ").dimmed());
    }

    Ok(())
}

fn print_mutation(summary: &MutationSummary, marker: &str, dry_run: bool, quiet: bool) {
    if dry_run {
        println!("{}", "Dry run - no files written".yellow().bold());
    }
    for file in &summary.files_changed {
        println!("  {}", file);
    }
    if quiet {
        return;
    }
    println!();
    println!("  Notes touched:     {}", summary.notes_touched.to_string().cyan());
    for (name, notes) in &summary.changes {
        println!("  {:<18} {}", format!("{marker}{name}"), notes.to_string().cyan());
    }
}

/// Print what a batch managed, even when it stopped early.
fn report_mutation(
    result: Result<MutationSummary, vaultgraph::BatchFailure>,
    marker: &str,
    dry_run: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Ok(summary) => {
            print_mutation(&summary, marker, dry_run, quiet);
            Ok(())
        }
        Err(failure) => {
            print_mutation(&failure.completed, marker, dry_run, quiet);
            Err(failure.into())
        }
    }
}

fn cmd_tag_rename(
    vault: &Vault,
    from: &[String],
    to: &str,
    dry_run: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let documents = vault.store.list_documents()?;
    report_mutation(
        vaultgraph::rename_tags(&vault.store, &documents, from, to, dry_run),
        "#",
        dry_run,
        quiet,
    )
}

fn cmd_tag_delete(
    vault: &Vault,
    tags: &[String],
    dry_run: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let documents = vault.store.list_documents()?;
    report_mutation(
        vaultgraph::delete_tags(&vault.store, &documents, tags, dry_run),
        "#",
        dry_run,
        quiet,
    )
}

fn cmd_prop_set(
    vault: &Vault,
    key: &str,
    value: &str,
    overwrite: bool,
    filter: &[String],
    dry_run: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let documents = target_documents(vault, filter)?;
    report_mutation(
        vaultgraph::set_property(&vault.store, &documents, key, parse_value(value), overwrite, dry_run),
        "",
        dry_run,
        quiet,
    )
}

fn cmd_prop_delete(
    vault: &Vault,
    keys: &[String],
    filter: &[String],
    dry_run: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let documents = target_documents(vault, filter)?;
    report_mutation(
        vaultgraph::delete_properties(&vault.store, &documents, keys, dry_run),
        "",
        dry_run,
        quiet,
    )
}

fn cmd_prop_rename(
    vault: &Vault,
    from: &[String],
    to: &str,
    merge: bool,
    filter: &[String],
    dry_run: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let documents = target_documents(vault, filter)?;
    report_mutation(
        vaultgraph::rename_properties(&vault.store, &documents, from, to, merge, dry_run),
        "",
        dry_run,
        quiet,
    )
}

fn cmd_stats(vault: &Vault, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let documents = vault.store.list_documents()?;
    let stats = graph_stats(&vault.store, &documents, &graph_options(&vault.config))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let links: usize = stats.nodes.values().map(|n| n.outbound).sum();
    println!("{}", "Vault Statistics".green().bold());
    println!();
    println!("  Total notes:       {}", stats.nodes.len().to_string().cyan());
    println!("  Total links:       {}", links.to_string().cyan());
    println!("  Components:        {}", stats.components.len().to_string().cyan());
    println!("  Orphans:           {}", stats.orphans.len().to_string().cyan());
    println!();
    println!("{}", "Most Linked".green().bold());
    println!();

    let mut ranked: Vec<_> = stats.nodes.iter().collect();
    ranked.sort_by(|a, b| b.1.inbound.cmp(&a.1.inbound).then_with(|| a.0.cmp(b.0)));
    for (id, node) in ranked.iter().take(10).filter(|(_, n)| n.inbound > 0) {
        let bar = "=".repeat(node.inbound.min(40));
        println!("  {:>4} {:>4} {} {}", node.inbound, node.outbound, id.cyan(), bar.dimmed());
    }

    Ok(())
}

fn cmd_orphans(vault: &Vault, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    let documents = vault.store.list_documents()?;
    let stats = graph_stats(&vault.store, &documents, &graph_options(&vault.config))?;

    for id in &stats.orphans {
        println!("{}", id);
    }
    if !quiet {
        eprintln!(
            "{} orphans out of {} notes",
            stats.orphans.len().to_string().yellow().bold(),
            stats.nodes.len()
        );
    }
    Ok(())
}

fn cmd_graph(
    vault: &Vault,
    options: &GraphOptions,
    top: usize,
    json: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let documents = vault.store.list_documents()?;
    let analysis = graph_analysis(&vault.store, &documents, options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    let cycles = analysis.strong_components.iter().filter(|c| c.len() > 1).count();
    println!("{}", "Graph Analysis".green().bold());
    println!();
    println!("  Notes:             {}", analysis.node_count.to_string().cyan());
    println!("  Links:             {}", analysis.edge_count.to_string().cyan());
    println!("  Components:        {}", analysis.components.len().to_string().cyan());
    println!("  Link cycles:       {}", cycles.to_string().cyan());
    println!("  Orphans:           {}", analysis.orphans.len().to_string().cyan());
    println!("  Communities:       {}", analysis.communities.len().to_string().cyan());
    println!("  Modularity:        {}", format!("{:.3}", analysis.modularity).cyan());
    if analysis.ambiguous_links > 0 {
        println!("  Ambiguous links:   {}", analysis.ambiguous_links.to_string().yellow());
    }
    println!();

    println!("{}", format!("Top {} by PageRank", top).green().bold());
    println!();
    let mut ranked: Vec<_> = analysis.nodes.iter().collect();
    ranked.sort_by(|a, b| b.1.pagerank.total_cmp(&a.1.pagerank).then_with(|| a.0.cmp(b.0)));
    for (id, node) in ranked.iter().take(top) {
        println!(
            "  {:.4} {} {}",
            node.pagerank,
            id.cyan(),
            format!("in {} out {} {}", node.inbound, node.outbound, node.community).dimmed()
        );
    }
    println!();

    println!("{}", "Communities".green().bold());
    println!();
    for community in analysis.communities.iter().filter(|c| c.members.len() > 1).take(top) {
        println!(
            "{} {} ({} notes, density {:.2})",
            community.id.cyan().bold(),
            community.anchor.yellow(),
            community.members.len(),
            community.density
        );
        if !community.top_tags.is_empty() {
            let tags: Vec<String> = community
                .top_tags
                .iter()
                .map(|t| format!("#{} {}", t.tag, t.count))
                .collect();
            println!("  {}", tags.join(", ").dimmed());
        }
        if !community.bridges.is_empty() {
            println!("  {} {}", "bridges:".dimmed(), community.bridges.join(", "));
        }
    }

    if !quiet {
        eprintln!("\nGraph analysis: {:?}", start.elapsed());
    }

    Ok(())
}
