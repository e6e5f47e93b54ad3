//! Directed link graph over a vault and the statistics computed from it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ahash::AHashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::filter::PathFilter;
use crate::links::{extract_wikilinks, AmbiguityPolicy, NameIndex, Resolution, WikilinkOptions};
use crate::pool::fan_out;
use crate::store::DocumentStore;
use crate::tags::extract_tags;

const PAGERANK_EPSILON: f64 = 1e-9;
const MODULARITY_EPSILON: f64 = 1e-12;
const COMMUNITY_HIGHLIGHTS: usize = 5;

#[derive(Debug, Clone)]
pub struct GraphOptions {
    pub links: WikilinkOptions,
    pub ambiguity: AmbiguityPolicy,
    /// When non-empty, only matching documents become nodes.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Keep only edges whose reverse edge also exists.
    pub mutual_only: bool,
    /// Repeatedly drop nodes whose in+out degree is below this.
    pub min_degree: usize,
    pub damping: f64,
    pub iterations: usize,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            links: WikilinkOptions::default(),
            ambiguity: AmbiguityPolicy::default(),
            include: Vec::new(),
            exclude: Vec::new(),
            mutual_only: false,
            min_degree: 0,
            damping: 0.85,
            iterations: 50,
        }
    }
}

/// Nodes are kept in identifier order; edges are deduplicated.
#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    nodes: Vec<String>,
    out: Vec<BTreeSet<usize>>,
    inb: Vec<BTreeSet<usize>>,
    tags: Vec<BTreeSet<String>>,
    ambiguous_links: usize,
}

struct Scanned {
    source: usize,
    targets: Vec<String>,
    tags: BTreeSet<String>,
    ambiguous: usize,
}

impl LinkGraph {
    /// Read every (filtered) document concurrently and materialize edges.
    ///
    /// Links resolve against the full document list, so a filtered-out
    /// target simply produces no edge.
    pub fn build<S: DocumentStore + ?Sized>(
        store: &S,
        documents: &[String],
        options: &GraphOptions,
    ) -> Result<Self> {
        let include = PathFilter::new(&options.include)?;
        let exclude = PathFilter::new(&options.exclude)?;
        let mut nodes: Vec<String> = documents
            .iter()
            .filter(|id| include.is_empty() || include.matches(id))
            .filter(|id| !exclude.matches(id))
            .cloned()
            .collect();
        nodes.sort();
        nodes.dedup();

        let position: AHashMap<&str, usize> =
            nodes.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        let index = NameIndex::build(documents);
        let numbered: Vec<(usize, &String)> = nodes.iter().enumerate().collect();

        let scanned = fan_out(&numbered, |batch, tx| {
            for &(source, id) in batch {
                let content = match store.content(id) {
                    Ok(content) => content,
                    Err(e) => {
                        warn!(document = %id, error = %e, "graph node has unreadable content");
                        String::new()
                    }
                };
                let mut targets = Vec::new();
                let mut ambiguous = 0;
                for link in extract_wikilinks(&content, &options.links) {
                    if matches!(index.resolve(&link.target), Resolution::Ambiguous(_)) {
                        ambiguous += 1;
                    }
                    if let Some(target) = index.resolve_with(&link.target, options.ambiguity) {
                        targets.push(target.to_string());
                    }
                }
                let _ = tx.send(Scanned {
                    source,
                    targets,
                    tags: extract_tags(&content),
                    ambiguous,
                });
            }
        });

        let n = nodes.len();
        let mut graph = LinkGraph {
            out: vec![BTreeSet::new(); n],
            inb: vec![BTreeSet::new(); n],
            tags: vec![BTreeSet::new(); n],
            nodes: Vec::new(),
            ambiguous_links: 0,
        };
        for scan in scanned {
            graph.ambiguous_links += scan.ambiguous;
            graph.tags[scan.source] = scan.tags;
            for target in scan.targets {
                if let Some(&t) = position.get(target.as_str()) {
                    graph.out[scan.source].insert(t);
                    graph.inb[t].insert(scan.source);
                }
            }
        }
        drop(position);
        graph.nodes = nodes;

        if options.mutual_only {
            graph = graph.mutual_edges();
        }
        if options.min_degree > 0 {
            graph = graph.prune_below(options.min_degree);
        }
        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            ambiguous = graph.ambiguous_links,
            "built link graph"
        );
        Ok(graph)
    }

    /// Build from explicit edges. Unknown endpoints are ignored.
    pub fn from_edges(nodes: &[&str], edges: &[(&str, &str)]) -> Self {
        let mut ids: Vec<String> = nodes.iter().map(|s| s.to_string()).collect();
        ids.sort();
        ids.dedup();
        let position: AHashMap<&str, usize> =
            ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        let n = ids.len();
        let mut out = vec![BTreeSet::new(); n];
        let mut inb = vec![BTreeSet::new(); n];
        for (from, to) in edges {
            if let (Some(&a), Some(&b)) = (position.get(from), position.get(to)) {
                out[a].insert(b);
                inb[b].insert(a);
            }
        }
        drop(position);
        LinkGraph {
            nodes: ids,
            out,
            inb,
            tags: vec![BTreeSet::new(); n],
            ambiguous_links: 0,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.out.iter().map(BTreeSet::len).sum()
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// `(inbound, outbound)`; a self-loop counts once in each.
    pub fn degree(&self, node: usize) -> (usize, usize) {
        (self.inb[node].len(), self.out[node].len())
    }

    fn mutual_edges(mut self) -> Self {
        let out = self.out.clone();
        for (a, targets) in out.iter().enumerate() {
            for &b in targets {
                if !out[b].contains(&a) {
                    self.out[a].remove(&b);
                    self.inb[b].remove(&a);
                }
            }
        }
        self
    }

    fn prune_below(self, min_degree: usize) -> Self {
        let n = self.nodes.len();
        let mut alive = vec![true; n];
        loop {
            let mut removed = false;
            for v in 0..n {
                if !alive[v] {
                    continue;
                }
                let degree = self.out[v].iter().filter(|&&t| alive[t]).count()
                    + self.inb[v].iter().filter(|&&s| alive[s]).count();
                if degree < min_degree {
                    alive[v] = false;
                    removed = true;
                }
            }
            if !removed {
                break;
            }
        }
        self.retain(&alive)
    }

    fn retain(self, keep: &[bool]) -> Self {
        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut next = 0;
        for (old, &k) in keep.iter().enumerate() {
            if k {
                remap[old] = next;
                next += 1;
            }
        }
        let mut graph = LinkGraph {
            nodes: Vec::with_capacity(next),
            out: vec![BTreeSet::new(); next],
            inb: vec![BTreeSet::new(); next],
            tags: Vec::with_capacity(next),
            ambiguous_links: self.ambiguous_links,
        };
        for (old, (id, tags)) in self.nodes.into_iter().zip(self.tags).enumerate() {
            if !keep[old] {
                continue;
            }
            let a = remap[old];
            graph.nodes.push(id);
            graph.tags.push(tags);
            for &t in &self.out[old] {
                if keep[t] {
                    graph.out[a].insert(remap[t]);
                    graph.inb[remap[t]].insert(a);
                }
            }
        }
        graph
    }

    fn undirected_neighbors(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.out[v].union(&self.inb[v]).copied().filter(move |&u| u != v)
    }

    fn named(&self, members: impl IntoIterator<Item = usize>) -> Vec<String> {
        let mut names: Vec<String> = members.into_iter().map(|i| self.nodes[i].clone()).collect();
        names.sort();
        names
    }

    /// Connected components of the undirected view; isolated nodes are
    /// singleton components.
    pub fn weak_components(&self) -> Vec<Vec<String>> {
        let n = self.nodes.len();
        let mut seen = vec![false; n];
        let mut components = Vec::new();
        for start in 0..n {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut queue = VecDeque::from([start]);
            let mut members = Vec::new();
            while let Some(v) = queue.pop_front() {
                members.push(v);
                for u in self.undirected_neighbors(v) {
                    if !seen[u] {
                        seen[u] = true;
                        queue.push_back(u);
                    }
                }
            }
            components.push(self.named(members));
        }
        sort_components(&mut components);
        components
    }

    /// Strongly connected components (Tarjan, iterative).
    pub fn strong_components(&self) -> Vec<Vec<String>> {
        let n = self.nodes.len();
        let mut index = vec![usize::MAX; n];
        let mut low = vec![0; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut counter = 0;
        let mut components = Vec::new();

        for root in 0..n {
            if index[root] != usize::MAX {
                continue;
            }
            // (node, neighbours still to visit)
            let mut work: Vec<(usize, Vec<usize>)> = Vec::new();
            index[root] = counter;
            low[root] = counter;
            counter += 1;
            stack.push(root);
            on_stack[root] = true;
            work.push((root, self.out[root].iter().rev().copied().collect()));

            while let Some((v, pending)) = work.last_mut() {
                let v = *v;
                if let Some(w) = pending.pop() {
                    if index[w] == usize::MAX {
                        index[w] = counter;
                        low[w] = counter;
                        counter += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        work.push((w, self.out[w].iter().rev().copied().collect()));
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w]);
                    }
                    continue;
                }

                work.pop();
                if let Some((parent, _)) = work.last() {
                    low[*parent] = low[*parent].min(low[v]);
                }
                if low[v] == index[v] {
                    let mut members = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        members.push(w);
                        if w == v {
                            break;
                        }
                    }
                    components.push(self.named(members));
                }
            }
        }

        sort_components(&mut components);
        components
    }

    /// Nodes with no inbound and no outbound edges. A self-loop is an edge.
    pub fn orphans(&self) -> Vec<String> {
        (0..self.nodes.len())
            .filter(|&v| self.out[v].is_empty() && self.inb[v].is_empty())
            .map(|v| self.nodes[v].clone())
            .collect()
    }

    /// Power-iteration PageRank. Dangling nodes spread their rank evenly;
    /// scores always sum to 1.
    pub fn pagerank(&self, damping: f64, iterations: usize) -> Vec<f64> {
        let n = self.nodes.len();
        if n == 0 {
            return Vec::new();
        }
        let nf = n as f64;
        let mut rank = vec![1.0 / nf; n];

        for round in 0..iterations {
            let dangling: f64 = (0..n).filter(|&v| self.out[v].is_empty()).map(|v| rank[v]).sum();
            let base = (1.0 - damping) / nf + damping * dangling / nf;
            let next: Vec<f64> = (0..n)
                .map(|v| {
                    let inflow: f64 = self.inb[v]
                        .iter()
                        .map(|&u| rank[u] / self.out[u].len() as f64)
                        .sum();
                    base + damping * inflow
                })
                .collect();
            let delta: f64 = next.iter().zip(&rank).map(|(a, b)| (a - b).abs()).sum();
            rank = next;
            if delta < PAGERANK_EPSILON {
                debug!(rounds = round + 1, "pagerank converged");
                break;
            }
        }
        rank
    }

    /// Greedy modularity agglomeration on the undirected, loop-free view.
    ///
    /// Starts from singletons and repeatedly merges the pair of adjacent
    /// communities with the largest modularity gain until no merge helps.
    /// Ties go to the pair whose lowest node identifiers sort first.
    /// Returns each node's community label and the final modularity.
    pub fn greedy_modularity(&self) -> (Vec<usize>, f64) {
        let n = self.nodes.len();
        let mut label: Vec<usize> = (0..n).collect();

        let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();
        for v in 0..n {
            for u in self.undirected_neighbors(v) {
                edges.insert((v.min(u), v.max(u)));
            }
        }
        if edges.is_empty() {
            return (label, 0.0);
        }

        let half = 1.0 / (2.0 * edges.len() as f64);
        // e[c][d]: fraction of edge ends joining c and d (symmetric).
        let mut e: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
        let mut a = vec![0.0; n];
        for &(x, y) in &edges {
            *e[x].entry(y).or_default() += half;
            *e[y].entry(x).or_default() += half;
            a[x] += half;
            a[y] += half;
        }
        let mut members: Vec<Vec<usize>> = (0..n).map(|v| vec![v]).collect();
        let mut alive = vec![true; n];
        let mut q: f64 = -a.iter().map(|x| x * x).sum::<f64>();

        loop {
            let mut best: Option<(f64, usize, usize)> = None;
            for c in (0..n).filter(|&c| alive[c]) {
                for (&d, &w) in &e[c] {
                    if d <= c {
                        continue;
                    }
                    let gain = 2.0 * (w - a[c] * a[d]);
                    if best.map_or(true, |(g, _, _)| gain > g + MODULARITY_EPSILON) {
                        best = Some((gain, c, d));
                    }
                }
            }
            let Some((gain, c, d)) = best else { break };
            if gain <= MODULARITY_EPSILON {
                break;
            }

            // Merge d into c.
            let absorbed = std::mem::take(&mut e[d]);
            for (k, w) in absorbed {
                if k == c {
                    continue;
                }
                e[k].remove(&d);
                *e[k].entry(c).or_default() += w;
                *e[c].entry(k).or_default() += w;
            }
            e[c].remove(&d);
            a[c] += a[d];
            a[d] = 0.0;
            let moved = std::mem::take(&mut members[d]);
            members[c].extend(moved);
            alive[d] = false;
            q += gain;
        }

        for (c, group) in members.iter().enumerate() {
            for &v in group {
                label[v] = c;
            }
        }
        (label, q)
    }
}

fn sort_components(components: &mut [Vec<String>]) {
    components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.first().cmp(&b.first())));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub inbound: usize,
    pub outbound: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub nodes: BTreeMap<String, NodeStats>,
    pub components: Vec<Vec<String>>,
    pub orphans: Vec<String>,
}

/// Degrees, weak components and orphans.
pub fn graph_stats<S: DocumentStore + ?Sized>(
    store: &S,
    documents: &[String],
    options: &GraphOptions,
) -> Result<GraphStats> {
    let graph = LinkGraph::build(store, documents, options)?;
    Ok(stats_of(&graph))
}

pub fn stats_of(graph: &LinkGraph) -> GraphStats {
    let nodes = (0..graph.node_count())
        .map(|v| {
            let (inbound, outbound) = graph.degree(v);
            (graph.nodes[v].clone(), NodeStats { inbound, outbound })
        })
        .collect();
    GraphStats {
        nodes,
        components: graph.weak_components(),
        orphans: graph.orphans(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub inbound: usize,
    pub outbound: usize,
    pub pagerank: f64,
    pub community: String,
    /// Index into `GraphAnalysis::components`.
    pub component: usize,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Community {
    pub id: String,
    pub members: Vec<String>,
    /// Member with the highest PageRank.
    pub anchor: String,
    /// Directed edges between distinct members.
    pub internal_edges: usize,
    /// `internal_edges / (n * (n - 1))`.
    pub density: f64,
    /// Members with the most edges leaving the community.
    pub bridges: Vec<String>,
    pub top_tags: Vec<TagCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphAnalysis {
    pub nodes: BTreeMap<String, NodeReport>,
    pub components: Vec<Vec<String>>,
    pub strong_components: Vec<Vec<String>>,
    pub orphans: Vec<String>,
    pub communities: Vec<Community>,
    pub node_count: usize,
    pub edge_count: usize,
    pub ambiguous_links: usize,
    pub modularity: f64,
}

/// Full analysis: degrees, components, centrality and communities.
pub fn graph_analysis<S: DocumentStore + ?Sized>(
    store: &S,
    documents: &[String],
    options: &GraphOptions,
) -> Result<GraphAnalysis> {
    let graph = LinkGraph::build(store, documents, options)?;
    Ok(analyze(&graph, options.damping, options.iterations))
}

pub fn analyze(graph: &LinkGraph, damping: f64, iterations: usize) -> GraphAnalysis {
    let n = graph.node_count();
    let rank = graph.pagerank(damping, iterations);
    let (labels, modularity) = graph.greedy_modularity();
    let components = graph.weak_components();

    let position: AHashMap<&str, usize> = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut component_of = vec![0; n];
    for (ci, members) in components.iter().enumerate() {
        for id in members {
            if let Some(&v) = position.get(id.as_str()) {
                component_of[v] = ci;
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (v, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(v);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
    // Members are in node order, so the first one is the smallest identifier.
    groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

    let mut community_of = vec![0; n];
    for (ci, group) in groups.iter().enumerate() {
        for &v in group {
            community_of[v] = ci;
        }
    }

    let communities = groups
        .iter()
        .enumerate()
        .map(|(ci, group)| summarize_community(graph, ci, group, &community_of, &rank))
        .collect();

    let nodes = (0..n)
        .map(|v| {
            let (inbound, outbound) = graph.degree(v);
            let report = NodeReport {
                inbound,
                outbound,
                pagerank: rank[v],
                community: format!("c{}", community_of[v]),
                component: component_of[v],
                tags: graph.tags[v].iter().cloned().collect(),
            };
            (graph.nodes[v].clone(), report)
        })
        .collect();

    GraphAnalysis {
        nodes,
        components,
        strong_components: graph.strong_components(),
        orphans: graph.orphans(),
        communities,
        node_count: n,
        edge_count: graph.edge_count(),
        ambiguous_links: graph.ambiguous_links,
        modularity,
    }
}

fn summarize_community(
    graph: &LinkGraph,
    ci: usize,
    group: &[usize],
    community_of: &[usize],
    rank: &[f64],
) -> Community {
    let mut internal_edges = 0;
    let mut crossing: BTreeMap<usize, usize> = BTreeMap::new();
    let mut tag_counts: BTreeMap<&str, usize> = BTreeMap::new();

    for &v in group {
        for &t in &graph.out[v] {
            if t == v {
                continue;
            }
            if community_of[t] == ci {
                internal_edges += 1;
            } else {
                *crossing.entry(v).or_default() += 1;
            }
        }
        for &s in &graph.inb[v] {
            if s != v && community_of[s] != ci {
                *crossing.entry(v).or_default() += 1;
            }
        }
        for tag in &graph.tags[v] {
            *tag_counts.entry(tag.as_str()).or_default() += 1;
        }
    }

    let size = group.len();
    let density = if size < 2 {
        0.0
    } else {
        internal_edges as f64 / (size * (size - 1)) as f64
    };

    let anchor = group
        .iter()
        .copied()
        .max_by(|&x, &y| rank[x].total_cmp(&rank[y]).then_with(|| y.cmp(&x)))
        .map(|v| graph.nodes[v].clone())
        .unwrap_or_default();

    let mut bridges: Vec<(usize, usize)> = crossing.into_iter().collect();
    bridges.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let bridges = bridges
        .into_iter()
        .take(COMMUNITY_HIGHLIGHTS)
        .map(|(v, _)| graph.nodes[v].clone())
        .collect();

    let mut top_tags: Vec<TagCount> = tag_counts
        .into_iter()
        .map(|(tag, count)| TagCount { tag: tag.to_string(), count })
        .collect();
    top_tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    top_tags.truncate(COMMUNITY_HIGHLIGHTS);

    Community {
        id: format!("c{ci}"),
        members: graph.named(group.iter().copied()),
        anchor,
        internal_edges,
        density,
        bridges,
        top_tags,
    }
}
