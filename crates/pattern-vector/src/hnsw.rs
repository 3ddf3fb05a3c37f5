//! Layered proximity-graph construction and search.
//!
//! Nodes are assigned to layers 0..L following exponential decay; layer 0
//! holds every node and higher layers thin out progressively. Inserts and
//! queries both start at the entry point on the top layer, greedily descend,
//! and run a bounded beam search on the lower layers.
//!
//! The graph itself is single-threaded; `PatternIndex` wraps it in the
//! reader/writer discipline and splits each insert into a read-phase plan
//! (`plan_insert`) and a short write-phase commit (`commit_insert`).

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::node::{Node, NodeStore};
use crate::stats::ValidationReport;

/// Cooperative cancellation signal for searches.
///
/// Checked between layer descents and between beam expansion steps; a
/// cancelled search returns `IndexError::Cancelled` promptly. Inserts are
/// not cancellable.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

/// A single ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: u64,
    pub distance: f64,
    pub metadata: Vec<u8>,
}

/// A node with its computed distance, used for heaps and neighbor lists.
///
/// Ordering is `(distance, id)` ascending; the id tiebreak keeps result
/// ranking deterministic.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScoredNode {
    pub(crate) id: u64,
    pub(crate) distance: f64,
}

impl PartialEq for ScoredNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredNode {}

impl PartialOrd for ScoredNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Neighbor selection for one layer of a planned insert.
#[derive(Debug, Clone)]
pub(crate) struct LayerPlan {
    pub(crate) layer: u32,
    pub(crate) neighbors: Vec<ScoredNode>,
}

/// The read-phase result of an insert: selected neighbors per layer, from
/// the highest linked layer down to 0. Valid as long as the writer gate is
/// held, since only writers mutate the graph.
#[derive(Debug, Clone)]
pub(crate) struct InsertPlan {
    pub(crate) layers: Vec<LayerPlan>,
}

/// The layered proximity graph.
pub struct HnswGraph {
    config: IndexConfig,
    store: NodeStore,
    entry_point: Option<u64>,
    /// Set when the graph was salvaged from a corrupt snapshot; adjacency
    /// is untrusted and searches fall back to a linear scan.
    degraded: bool,
}

impl HnswGraph {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            store: NodeStore::new(),
            entry_point: None,
            degraded: false,
        }
    }

    /// Rebuild a graph handle around restored nodes.
    ///
    /// The entry point is recomputed from the data (maximum level, ties to
    /// the earliest id), never trusted from a snapshot.
    pub fn from_parts(config: IndexConfig, store: NodeStore, degraded: bool) -> Self {
        let entry_point = store
            .iter()
            .max_by_key(|n| (n.level, Reverse(n.id)))
            .map(|n| n.id);
        Self {
            config,
            store,
            entry_point,
            degraded,
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub(crate) fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Level of the current entry point.
    pub fn entry_level(&self) -> Option<u32> {
        self.entry_point
            .and_then(|id| self.store.get(id))
            .map(|n| n.level)
    }

    fn raw_distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.config.metric.compute_raw(a, b)
    }

    // ---- insert path ----

    /// Read-phase of an insert: descend from the entry point and select
    /// neighbors for every layer the new node will join.
    ///
    /// Requires a non-empty, non-degraded graph and the writer gate held,
    /// so the plan cannot be invalidated before `commit_insert`.
    pub(crate) fn plan_insert(&self, vector: &[f64], level: u32) -> InsertPlan {
        let ep_id = match self.entry_point {
            Some(id) => id,
            None => return InsertPlan { layers: Vec::new() },
        };
        let ep_node = match self.store.get(ep_id) {
            Some(node) => node,
            None => return InsertPlan { layers: Vec::new() },
        };
        let entry_level = ep_node.level;

        let mut current = ScoredNode {
            id: ep_id,
            distance: self.raw_distance(vector, &ep_node.vector),
        };

        // Greedy descent through the layers above the new node's level
        let mut layer = entry_level;
        while layer > level {
            current = self.greedy_at_layer(vector, current, layer);
            layer -= 1;
        }

        // Beam search and neighbor selection per joined layer
        let mut entry_points = vec![current];
        let mut layers = Vec::new();
        for layer in (0..=level.min(entry_level)).rev() {
            let found = self
                .search_layer(
                    vector,
                    &entry_points,
                    self.config.expansion_add,
                    layer,
                    None,
                    None,
                )
                .unwrap_or_default();
            let selected =
                self.select_neighbors(vector, found, self.config.max_neighbors(layer));
            entry_points = selected.clone();
            layers.push(LayerPlan {
                layer,
                neighbors: selected,
            });
        }

        InsertPlan { layers }
    }

    /// Write-phase of an insert: publish the node, create bidirectional
    /// edges, prune overfull neighbors, and promote the entry point.
    ///
    /// The node only becomes visible to readers once this completes under
    /// the write lock, so a concurrent search never observes a partially
    /// linked node.
    pub(crate) fn commit_insert(
        &mut self,
        vector: Vec<f64>,
        metadata: Vec<u8>,
        level: u32,
        plan: Option<InsertPlan>,
    ) -> u64 {
        let id = self.store.allocate_id();
        let node = Node::new(id, vector, metadata, level);
        match plan {
            Some(plan) => self.apply_plan(node, plan),
            // First node of the graph, or a degraded index serving linear
            // scans: no edges to create
            None => {
                let promote = match self.entry_point.and_then(|ep| self.store.get(ep)) {
                    Some(entry) => level > entry.level,
                    None => true,
                };
                self.store.insert(node);
                if promote {
                    self.entry_point = Some(id);
                }
            }
        }
        trace!(id, level, "node published");
        id
    }

    fn apply_plan(&mut self, mut node: Node, plan: InsertPlan) {
        let id = node.id;
        let level = node.level;

        for lp in &plan.layers {
            node.neighbors[lp.layer as usize] =
                lp.neighbors.iter().map(|s| s.id).collect();
        }
        self.store.insert(node);

        for lp in &plan.layers {
            let cap = self.config.max_neighbors(lp.layer);
            for selected in &lp.neighbors {
                if let Some(neighbor) = self.store.get_mut(selected.id) {
                    let list = &mut neighbor.neighbors[lp.layer as usize];
                    if !list.contains(&id) {
                        list.push(id);
                    }
                }
                self.prune_neighbors(selected.id, lp.layer, cap);
            }
        }

        let promote = match self.entry_point.and_then(|ep| self.store.get(ep)) {
            Some(entry) => level > entry.level,
            None => true,
        };
        if promote {
            debug!(id, level, "entry point promoted");
            self.entry_point = Some(id);
        }
    }

    /// Trim a node's neighbor list back to capacity with the diversity
    /// heuristic.
    fn prune_neighbors(&mut self, id: u64, layer: u32, cap: usize) {
        let new_list: Option<Vec<u64>> = {
            let node = match self.store.get(id) {
                Some(node) => node,
                None => return,
            };
            let current = node.neighbors_at(layer);
            if current.len() <= cap {
                None
            } else {
                let scored: Vec<ScoredNode> = current
                    .iter()
                    .filter_map(|&nb| {
                        self.store.get(nb).map(|n| ScoredNode {
                            id: nb,
                            distance: self.raw_distance(&node.vector, &n.vector),
                        })
                    })
                    .collect();
                let selected = self.select_neighbors(&node.vector, scored, cap);
                Some(selected.into_iter().map(|s| s.id).collect())
            }
        };
        if let Some(list) = new_list {
            if let Some(node) = self.store.get_mut(id) {
                if (layer as usize) < node.neighbors.len() {
                    node.neighbors[layer as usize] = list;
                }
            }
        }
    }

    /// Diversity-aware neighbor selection.
    ///
    /// A candidate is kept only while no already-kept neighbor is closer to
    /// it than the candidate is to the base vector; this avoids pure
    /// closest-M hub formation. Remaining slots are backfilled with the
    /// closest pruned candidates so up to `cap` edges are always kept.
    fn select_neighbors(
        &self,
        base: &[f64],
        mut candidates: Vec<ScoredNode>,
        cap: usize,
    ) -> Vec<ScoredNode> {
        if candidates.is_empty() || cap == 0 {
            return Vec::new();
        }
        candidates.sort_unstable();

        let mut selected: Vec<ScoredNode> = Vec::with_capacity(cap);
        let mut pruned: Vec<ScoredNode> = Vec::new();

        for candidate in candidates {
            if selected.len() >= cap {
                break;
            }
            let candidate_vec = match self.store.get(candidate.id) {
                Some(node) => &node.vector,
                None => continue,
            };
            let dominated = selected.iter().any(|kept| {
                self.store
                    .get(kept.id)
                    .map(|kept_node| {
                        self.raw_distance(candidate_vec, &kept_node.vector)
                            < candidate.distance
                    })
                    .unwrap_or(false)
            });
            if dominated {
                pruned.push(candidate);
            } else {
                selected.push(candidate);
            }
        }

        for candidate in pruned {
            if selected.len() >= cap {
                break;
            }
            selected.push(candidate);
        }

        selected
    }

    // ---- query path ----

    /// k-NN search.
    ///
    /// `ef` is the layer-0 beam width (already clamped to at least `k` by
    /// the facade). Results come back sorted by `(distance, id)` ascending,
    /// at most `min(k, len)` of them.
    pub fn search(
        &self,
        query: &[f64],
        k: usize,
        ef: usize,
        cancel: Option<&CancelToken>,
        deadline: Option<Instant>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if self.store.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if self.degraded {
            return self.linear_scan(query, k, cancel, deadline);
        }

        let ep_id = match self.entry_point {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };
        let ep_node = match self.store.get(ep_id) {
            Some(node) => node,
            None => return Ok(Vec::new()),
        };

        let mut current = ScoredNode {
            id: ep_id,
            distance: self.raw_distance(query, &ep_node.vector),
        };
        for layer in (1..=ep_node.level).rev() {
            check_interrupt(cancel, deadline)?;
            current = self.greedy_at_layer(query, current, layer);
        }

        let found = self.search_layer(query, &[current], ef, 0, cancel, deadline)?;
        Ok(found
            .into_iter()
            .take(k)
            .map(|scored| SearchHit {
                id: scored.id,
                distance: scored.distance,
                metadata: self
                    .store
                    .get(scored.id)
                    .map(|n| n.metadata.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Brute-force scan used by degraded indexes.
    fn linear_scan(
        &self,
        query: &[f64],
        k: usize,
        cancel: Option<&CancelToken>,
        deadline: Option<Instant>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let mut scored: Vec<ScoredNode> = Vec::with_capacity(self.store.len());
        for (i, node) in self.store.iter().enumerate() {
            if i % 1024 == 0 {
                check_interrupt(cancel, deadline)?;
            }
            scored.push(ScoredNode {
                id: node.id,
                distance: self.raw_distance(query, &node.vector),
            });
        }
        scored.sort_unstable();
        Ok(scored
            .into_iter()
            .take(k)
            .map(|s| SearchHit {
                id: s.id,
                distance: s.distance,
                metadata: self
                    .store
                    .get(s.id)
                    .map(|n| n.metadata.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Move greedily to the closest neighbor at a layer until no neighbor
    /// improves on the current position.
    fn greedy_at_layer(&self, query: &[f64], mut current: ScoredNode, layer: u32) -> ScoredNode {
        loop {
            let mut improved = false;
            let neighbor_ids: Vec<u64> = match self.store.get(current.id) {
                Some(node) => node.neighbors_at(layer).to_vec(),
                None => return current,
            };
            for nb in neighbor_ids {
                if let Some(node) = self.store.get(nb) {
                    let distance = self.raw_distance(query, &node.vector);
                    if distance < current.distance {
                        current = ScoredNode { id: nb, distance };
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Bounded beam search within one layer.
    ///
    /// Maintains a min-heap of candidates to expand and a max-heap of the
    /// `ef` best nodes seen; terminates when no unexpanded candidate can
    /// improve on the current worst-of-`ef`.
    fn search_layer(
        &self,
        query: &[f64],
        entry_points: &[ScoredNode],
        ef: usize,
        layer: u32,
        cancel: Option<&CancelToken>,
        deadline: Option<Instant>,
    ) -> Result<Vec<ScoredNode>, IndexError> {
        let mut visited: HashSet<u64> = HashSet::with_capacity(ef * 2);
        let mut candidates: BinaryHeap<Reverse<ScoredNode>> = BinaryHeap::with_capacity(ef);
        let mut results: BinaryHeap<ScoredNode> = BinaryHeap::with_capacity(ef + 1);

        for &ep in entry_points {
            if visited.insert(ep.id) {
                candidates.push(Reverse(ep));
                results.push(ep);
                if results.len() > ef {
                    results.pop();
                }
            }
        }

        while let Some(Reverse(current)) = candidates.pop() {
            let worst = results.peek().map(|n| n.distance).unwrap_or(f64::MAX);
            if results.len() >= ef && current.distance > worst {
                break;
            }
            check_interrupt(cancel, deadline)?;

            let neighbor_ids: Vec<u64> = match self.store.get(current.id) {
                Some(node) => node.neighbors_at(layer).to_vec(),
                None => continue,
            };
            for nb in neighbor_ids {
                if !visited.insert(nb) {
                    continue;
                }
                let node = match self.store.get(nb) {
                    Some(node) => node,
                    None => continue,
                };
                let distance = self.raw_distance(query, &node.vector);
                let worst = results.peek().map(|n| n.distance).unwrap_or(f64::MAX);
                if results.len() < ef || distance < worst {
                    let scored = ScoredNode { id: nb, distance };
                    candidates.push(Reverse(scored));
                    results.push(scored);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<ScoredNode> = results.into_vec();
        out.sort_unstable();
        Ok(out)
    }

    // ---- maintenance ----

    /// Count nodes reachable from the entry point over base-layer edges.
    pub fn check_connectivity(&self) -> usize {
        let start = match self.entry_point {
            Some(id) => id,
            None => return 0,
        };
        let mut seen: HashSet<u64> = HashSet::with_capacity(self.store.len());
        let mut queue = VecDeque::new();
        seen.insert(start);
        queue.push_back(start);
        while let Some(id) = queue.pop_front() {
            if let Some(node) = self.store.get(id) {
                for &nb in node.neighbors_at(0) {
                    if seen.insert(nb) {
                        queue.push_back(nb);
                    }
                }
            }
        }
        seen.len()
    }

    /// Structural audit: degree bounds, edge validity, entry placement,
    /// base-layer connectivity.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport {
            count: self.store.len() as u64,
            reachable_from_entry: 0,
            degree_violations: 0,
            issues: Vec::new(),
        };

        if self.degraded {
            report
                .issues
                .push("index is degraded: adjacency unavailable, serving linear scans".to_string());
            return report;
        }

        for node in self.store.iter() {
            for (layer, list) in node.neighbors.iter().enumerate() {
                let cap = self.config.max_neighbors(layer as u32);
                if list.len() > cap {
                    report.degree_violations += 1;
                    report.issues.push(format!(
                        "node {} exceeds degree bound at layer {}: {} > {}",
                        node.id,
                        layer,
                        list.len(),
                        cap
                    ));
                }
                for &nb in list {
                    match self.store.get(nb) {
                        None => report
                            .issues
                            .push(format!("node {} links missing node {}", node.id, nb)),
                        Some(n) if (n.level as usize) < layer => report.issues.push(format!(
                            "node {} links node {} above its level at layer {}",
                            node.id, nb, layer
                        )),
                        _ => {}
                    }
                }
            }
        }

        if let (Some(ep), Some(max_level)) = (
            self.entry_point,
            self.store.iter().map(|n| n.level).max(),
        ) {
            let ep_level = self.store.get(ep).map(|n| n.level).unwrap_or(0);
            if ep_level != max_level {
                report.issues.push(format!(
                    "entry point {} at level {} but max level is {}",
                    ep, ep_level, max_level
                ));
            }
        }

        report.reachable_from_entry = self.check_connectivity() as u64;
        if report.reachable_from_entry != report.count {
            report.issues.push(format!(
                "base layer disconnected: {} of {} nodes reachable",
                report.reachable_from_entry, report.count
            ));
        }

        report
    }

    /// Emergency prune: drop the oldest `fraction` of nodes (by id) and
    /// relink the survivors with their original ids and levels.
    ///
    /// This is the only path that removes nodes; online deletion stays out
    /// of scope.
    pub(crate) fn rebuild_dropping_oldest(&mut self, fraction: f64) -> usize {
        if self.store.is_empty() {
            return 0;
        }
        let len = self.store.len();
        let drop_count = (((len as f64) * fraction).ceil() as usize).clamp(1, len);

        let mut ids: Vec<u64> = self.store.ids().collect();
        ids.sort_unstable();
        for &id in ids.iter().take(drop_count) {
            self.store.remove(id);
        }

        let mut survivors: Vec<Node> = Vec::with_capacity(len - drop_count);
        for &id in ids.iter().skip(drop_count) {
            if let Some(node) = self.store.remove(id) {
                survivors.push(node);
            }
        }

        self.entry_point = None;
        for mut node in survivors {
            node.neighbors = vec![Vec::new(); node.level as usize + 1];
            self.relink(node);
        }

        debug!(dropped = drop_count, remaining = self.store.len(), "emergency prune complete");
        drop_count
    }

    fn relink(&mut self, node: Node) {
        if self.store.is_empty() {
            self.entry_point = Some(node.id);
            self.store.insert(node);
            return;
        }
        let plan = self.plan_insert(&node.vector, node.level);
        self.apply_plan(node, plan);
    }

    pub(crate) fn memory_estimate_bytes(&self) -> u64 {
        // Per-node fixed overhead approximates the map entry and Vec headers
        const NODE_OVERHEAD: usize = 96;
        self.store
            .iter()
            .map(|n| {
                (n.vector.len() * 8
                    + n.metadata.len()
                    + n.neighbors.iter().map(|l| l.len() * 8 + 24).sum::<usize>()
                    + NODE_OVERHEAD) as u64
            })
            .sum()
    }

    /// Node counts per top level, index 0 first.
    pub(crate) fn layer_histogram(&self) -> Vec<u64> {
        let max_level = match self.store.iter().map(|n| n.level).max() {
            Some(level) => level,
            None => return Vec::new(),
        };
        let mut histogram = vec![0u64; max_level as usize + 1];
        for node in self.store.iter() {
            histogram[node.level as usize] += 1;
        }
        histogram
    }
}

fn check_interrupt(
    cancel: Option<&CancelToken>,
    deadline: Option<Instant>,
) -> Result<(), IndexError> {
    if let Some(token) = cancel {
        if token.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
    }
    if let Some(deadline) = deadline {
        if Instant::now() >= deadline {
            return Err(IndexError::Cancelled);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;
    use crate::level::LevelGenerator;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn build_graph(metric: DistanceMetric, dimension: usize) -> (HnswGraph, LevelGenerator) {
        let config = IndexConfig::new(dimension).with_metric(metric);
        let multiplier = config.level_multiplier;
        (HnswGraph::new(config), LevelGenerator::new(multiplier, Some(0xA11CE)))
    }

    fn insert(graph: &mut HnswGraph, levels: &mut LevelGenerator, vector: Vec<f64>) -> u64 {
        let level = levels.next_level();
        let plan = if graph.is_empty() {
            None
        } else {
            Some(graph.plan_insert(&vector, level))
        };
        graph.commit_insert(vector, Vec::new(), level, plan)
    }

    fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f64> {
        (0..dim).map(|_| rng.random::<f64>() - 0.5).collect()
    }

    #[test]
    fn test_empty_graph_search() {
        let (graph, _) = build_graph(DistanceMetric::Euclidean, 8);
        let hits = graph.search(&[0.0; 8], 5, 100, None, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_single_node_reflexive() {
        let (mut graph, mut levels) = build_graph(DistanceMetric::Euclidean, 4);
        let id = insert(&mut graph, &mut levels, vec![1.0, 2.0, 3.0, 4.0]);
        let hits = graph
            .search(&[1.0, 2.0, 3.0, 4.0], 1, 100, None, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert!(hits[0].distance < 1e-12);
    }

    #[test]
    fn test_results_sorted_and_unique() {
        let (mut graph, mut levels) = build_graph(DistanceMetric::Euclidean, 16);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let v = random_vector(&mut rng, 16);
            insert(&mut graph, &mut levels, v);
        }

        let query = random_vector(&mut rng, 16);
        let hits = graph.search(&query, 10, 100, None, None).unwrap();
        assert_eq!(hits.len(), 10);
        let mut seen = HashSet::new();
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        for hit in &hits {
            assert!(seen.insert(hit.id), "duplicate id {}", hit.id);
        }
    }

    #[test]
    fn test_matches_brute_force_on_small_set() {
        let (mut graph, mut levels) = build_graph(DistanceMetric::Euclidean, 8);
        let mut rng = StdRng::seed_from_u64(99);
        let mut vectors = Vec::new();
        for _ in 0..300 {
            let v = random_vector(&mut rng, 8);
            let id = insert(&mut graph, &mut levels, v.clone());
            vectors.push((id, v));
        }

        let query = random_vector(&mut rng, 8);
        let mut expected: Vec<(u64, f64)> = vectors
            .iter()
            .map(|(id, v)| (*id, DistanceMetric::Euclidean.compute(&query, v).unwrap()))
            .collect();
        expected.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        // With ef covering the whole set, the beam search is exhaustive
        let hits = graph.search(&query, 10, 300, None, None).unwrap();
        let got: Vec<u64> = hits.iter().map(|h| h.id).collect();
        let want: Vec<u64> = expected.iter().take(10).map(|(id, _)| *id).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn test_degree_bounds_and_connectivity() {
        let (mut graph, mut levels) = build_graph(DistanceMetric::Euclidean, 8);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..400 {
            let v = random_vector(&mut rng, 8);
            insert(&mut graph, &mut levels, v);
        }

        let report = graph.validate();
        assert_eq!(report.degree_violations, 0, "{:?}", report.issues);
        assert_eq!(report.reachable_from_entry, 400);
        assert!(report.is_healthy(), "{:?}", report.issues);
    }

    #[test]
    fn test_entry_point_tracks_max_level() {
        let (mut graph, mut levels) = build_graph(DistanceMetric::Euclidean, 4);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let v = random_vector(&mut rng, 4);
            insert(&mut graph, &mut levels, v);
        }
        let max_level = graph.store().iter().map(|n| n.level).max().unwrap();
        assert_eq!(graph.entry_level(), Some(max_level));
    }

    #[test]
    fn test_cosine_scenario() {
        let (mut graph, mut levels) = build_graph(DistanceMetric::Cosine, 2);
        let id0 = insert(&mut graph, &mut levels, vec![1.0, 0.0]);
        let id1 = insert(&mut graph, &mut levels, vec![0.0, 1.0]);
        let id2 = insert(&mut graph, &mut levels, vec![0.9, 0.1]);

        let hits = graph.search(&[1.0, 0.0], 2, 100, None, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, id0);
        assert!(hits[0].distance < 1e-12);
        assert_eq!(hits[1].id, id2);
        assert!((hits[1].distance - 0.0137).abs() < 0.01);
        assert_ne!(hits[1].id, id1);
    }

    #[test]
    fn test_cancelled_search() {
        let (mut graph, mut levels) = build_graph(DistanceMetric::Euclidean, 4);
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..50 {
            let v = random_vector(&mut rng, 4);
            insert(&mut graph, &mut levels, v);
        }

        let token = CancelToken::new();
        token.cancel();
        let result = graph.search(&[0.0; 4], 5, 100, Some(&token), None);
        assert!(matches!(result, Err(IndexError::Cancelled)));
    }

    #[test]
    fn test_expired_deadline() {
        let (mut graph, mut levels) = build_graph(DistanceMetric::Euclidean, 4);
        let mut rng = StdRng::seed_from_u64(22);
        for _ in 0..50 {
            let v = random_vector(&mut rng, 4);
            insert(&mut graph, &mut levels, v);
        }

        let past = Instant::now() - std::time::Duration::from_millis(1);
        let result = graph.search(&[0.0; 4], 5, 100, None, Some(past));
        assert!(matches!(result, Err(IndexError::Cancelled)));
    }

    #[test]
    fn test_rebuild_drops_oldest() {
        let (mut graph, mut levels) = build_graph(DistanceMetric::Euclidean, 4);
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..100 {
            let v = random_vector(&mut rng, 4);
            insert(&mut graph, &mut levels, v);
        }

        let dropped = graph.rebuild_dropping_oldest(0.1);
        assert_eq!(dropped, 10);
        assert_eq!(graph.len(), 90);
        // ids 0..9 gone, survivors keep their ids
        assert!(graph.store().get(5).is_none());
        assert!(graph.store().get(42).is_some());
        // next insert does not reuse dropped ids
        let id = insert(&mut graph, &mut levels, random_vector(&mut rng, 4));
        assert_eq!(id, 100);

        let report = graph.validate();
        assert!(report.is_healthy(), "{:?}", report.issues);
    }
}
