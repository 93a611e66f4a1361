//! Multilevel k-way partitioning by recursive bisection.
//!
//! Each bisection coarsens the graph with heavy-edge matching, grows an initial
//! split on the coarsest graph from a spatial seed, then projects it back level by
//! level with boundary refinement. The only source of randomness is the matching
//! visit order, which comes from a seeded xorshift so results are reproducible.

use glam::Vec3;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::util::XorShift64;

/// Coarsening stops once a graph has at most this many nodes.
const COARSEST_NODES: usize = 48;
/// Coarsening also stops when a pass shrinks the graph by less than this factor.
const MIN_COARSEN_RATIO: f32 = 0.92;
/// Allowed overweight of a bisection side, relative to its target.
const BALANCE_TOLERANCE: f32 = 0.02;
const REFINE_PASSES: usize = 6;

/// Weighted undirected graph in CSR form.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub offsets: Vec<u32>,
    pub neighbors: Vec<u32>,
    pub edge_weights: Vec<u32>,
    pub node_weights: Vec<u32>,
    pub centroids: Vec<Vec3>,
}

impl Graph {
    /// Builds the CSR arrays from an edge list. Duplicate edges have their weights
    /// summed, self-loops are ignored.
    pub fn from_edges(node_weights: Vec<u32>, centroids: Vec<Vec3>, mut edges: Vec<(u32, u32, u32)>) -> Self {
        let n = node_weights.len();
        for e in edges.iter_mut() {
            if e.0 > e.1 {
                std::mem::swap(&mut e.0, &mut e.1);
            }
        }
        edges.retain(|e| e.0 != e.1);
        edges.sort_unstable_by_key(|e| (e.0, e.1));

        let mut merged: Vec<(u32, u32, u32)> = Vec::with_capacity(edges.len());
        for (a, b, w) in edges {
            match merged.last_mut() {
                Some(last) if last.0 == a && last.1 == b => last.2 += w,
                _ => merged.push((a, b, w)),
            }
        }

        let mut offsets = vec![0u32; n + 1];
        for &(a, b, _) in &merged {
            offsets[a as usize + 1] += 1;
            offsets[b as usize + 1] += 1;
        }
        for i in 0..n {
            offsets[i + 1] += offsets[i];
        }

        let mut cursor = offsets.clone();
        let mut neighbors = vec![0u32; merged.len() * 2];
        let mut edge_weights = vec![0u32; merged.len() * 2];
        for (a, b, w) in merged {
            let slot = cursor[a as usize] as usize;
            neighbors[slot] = b;
            edge_weights[slot] = w;
            cursor[a as usize] += 1;
            let slot = cursor[b as usize] as usize;
            neighbors[slot] = a;
            edge_weights[slot] = w;
            cursor[b as usize] += 1;
        }

        Self { offsets, neighbors, edge_weights, node_weights, centroids }
    }

    pub fn len(&self) -> usize {
        self.node_weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_weights.is_empty()
    }

    pub fn edges(&self, node: usize) -> impl Iterator<Item = (usize, u32)> + '_ {
        let start = self.offsets[node] as usize;
        let end = self.offsets[node + 1] as usize;
        self.neighbors[start..end]
            .iter()
            .zip(&self.edge_weights[start..end])
            .map(|(&n, &w)| (n as usize, w))
    }

    fn total_weight(&self) -> u64 {
        self.node_weights.iter().map(|&w| w as u64).sum()
    }

    /// Graph induced by `nodes`. Local node `i` is `nodes[i]`.
    fn subgraph(&self, nodes: &[u32], local: &mut [u32]) -> Graph {
        for (i, &n) in nodes.iter().enumerate() {
            local[n as usize] = i as u32;
        }
        let mut edges = Vec::new();
        for (i, &n) in nodes.iter().enumerate() {
            for (m, w) in self.edges(n as usize) {
                let j = local[m];
                if j != u32::MAX && (i as u32) < j {
                    edges.push((i as u32, j, w));
                }
            }
        }
        let weights = nodes.iter().map(|&n| self.node_weights[n as usize]).collect();
        let centroids = nodes.iter().map(|&n| self.centroids[n as usize]).collect();
        for &n in nodes {
            local[n as usize] = u32::MAX;
        }
        Graph::from_edges(weights, centroids, edges)
    }
}

/// Triangle adjacency: one node per triangle, an edge between triangles sharing
/// two vertices.
pub fn triangle_graph(positions: &[Vec3], indices: &[u32]) -> Graph {
    let tri_count = indices.len() / 3;
    let mut entries: Vec<(u64, u32)> = Vec::with_capacity(indices.len());
    for (t, tri) in indices.chunks_exact(3).enumerate() {
        for k in 0..3 {
            let a = tri[k];
            let b = tri[(k + 1) % 3];
            let key = ((a.min(b) as u64) << 32) | a.max(b) as u64;
            entries.push((key, t as u32));
        }
    }
    entries.sort_unstable();

    let mut edges = Vec::with_capacity(entries.len());
    let mut i = 0;
    while i < entries.len() {
        let mut j = i + 1;
        while j < entries.len() && entries[j].0 == entries[i].0 {
            j += 1;
        }
        // Chain the triangles around a shared edge; fans on non-manifold edges
        // stay connected without a quadratic blow-up.
        for k in i..j.saturating_sub(1) {
            edges.push((entries[k].1, entries[k + 1].1, 1));
        }
        i = j;
    }

    let centroids = indices
        .chunks_exact(3)
        .map(|t| (positions[t[0] as usize] + positions[t[1] as usize] + positions[t[2] as usize]) / 3.0)
        .collect();
    Graph::from_edges(vec![1; tri_count], centroids, edges)
}

/// Splits the graph into `parts` parts of near-equal node weight.
///
/// Returns the part id of every node. Parts may come back empty when the graph has
/// fewer nodes than parts; callers are expected to skip those.
pub fn partition(graph: &Graph, parts: usize, seed: u64) -> Vec<u32> {
    let mut assignment = vec![0u32; graph.len()];
    if parts <= 1 || graph.is_empty() {
        return assignment;
    }

    let mut rng = XorShift64::new(seed);
    let mut local = vec![u32::MAX; graph.len()];
    let mut stack: Vec<(Vec<u32>, u32, usize)> = vec![((0..graph.len() as u32).collect(), 0, parts)];

    while let Some((nodes, base, k)) = stack.pop() {
        if k <= 1 || nodes.len() <= 1 {
            for &n in &nodes {
                assignment[n as usize] = base;
            }
            continue;
        }
        let k_left = k / 2;
        let fraction = k_left as f32 / k as f32;

        let sub = graph.subgraph(&nodes, &mut local);
        let sides = bisect(&sub, fraction, &mut rng);

        let (mut left, mut right) = (Vec::new(), Vec::new());
        for (i, &n) in nodes.iter().enumerate() {
            if sides[i] == 0 {
                left.push(n);
            } else {
                right.push(n);
            }
        }
        stack.push((right, base + k_left as u32, k - k_left));
        stack.push((left, base, k_left));
    }
    assignment
}

/// Two-way split with side 0 targeting `fraction` of the total weight.
fn bisect(graph: &Graph, fraction: f32, rng: &mut XorShift64) -> Vec<u8> {
    let total = graph.total_weight();
    let targets = [total as f32 * fraction, total as f32 * (1.0 - fraction)];

    let mut graphs = vec![graph.clone()];
    let mut maps: Vec<Vec<u32>> = Vec::new();
    let max_node_weight = (total / 24).max(2) as u32;
    loop {
        let current = &graphs[graphs.len() - 1];
        if current.len() <= COARSEST_NODES {
            break;
        }
        let (coarse, map) = coarsen(current, max_node_weight, rng);
        if coarse.len() as f32 > current.len() as f32 * MIN_COARSEN_RATIO {
            break;
        }
        graphs.push(coarse);
        maps.push(map);
    }

    let coarsest = &graphs[graphs.len() - 1];
    let mut sides = grow_bisection(coarsest, targets[0]);
    refine(coarsest, &mut sides, targets);

    for level in (0..maps.len()).rev() {
        let fine = &graphs[level];
        let map = &maps[level];
        sides = (0..fine.len()).map(|u| sides[map[u] as usize]).collect();
        refine(fine, &mut sides, targets);
    }
    rebalance(graph, &mut sides, targets);
    sides
}

/// Heavy-edge matching. Returns the coarse graph and the fine-to-coarse map.
fn coarsen(graph: &Graph, max_node_weight: u32, rng: &mut XorShift64) -> (Graph, Vec<u32>) {
    let n = graph.len();
    let mut order: Vec<u32> = (0..n as u32).collect();
    rng.shuffle(&mut order);

    let mut mate = vec![u32::MAX; n];
    for &u in &order {
        let u = u as usize;
        if mate[u] != u32::MAX {
            continue;
        }
        let mut best: Option<(usize, u32)> = None;
        for (v, w) in graph.edges(u) {
            if mate[v] != u32::MAX || graph.node_weights[u] + graph.node_weights[v] > max_node_weight {
                continue;
            }
            if best.is_none_or(|(_, bw)| w > bw) {
                best = Some((v, w));
            }
        }
        match best {
            Some((v, _)) => {
                mate[u] = v as u32;
                mate[v] = u as u32;
            }
            None => mate[u] = u as u32,
        }
    }

    let mut map = vec![u32::MAX; n];
    let mut weights = Vec::new();
    let mut centroids = Vec::new();
    for u in 0..n {
        if map[u] != u32::MAX {
            continue;
        }
        let c = weights.len() as u32;
        let v = mate[u] as usize;
        map[u] = c;
        let (wu, pu) = (graph.node_weights[u], graph.centroids[u]);
        if v != u {
            map[v] = c;
            let wv = graph.node_weights[v];
            let sum = wu + wv;
            weights.push(sum);
            centroids.push((pu * wu as f32 + graph.centroids[v] * wv as f32) / sum.max(1) as f32);
        } else {
            weights.push(wu);
            centroids.push(pu);
        }
    }

    let mut edges = Vec::with_capacity(graph.neighbors.len() / 2);
    for u in 0..n {
        for (v, w) in graph.edges(u) {
            let (cu, cv) = (map[u], map[v]);
            if cu < cv {
                edges.push((cu, cv, w));
            }
        }
    }
    (Graph::from_edges(weights, centroids, edges), map)
}

/// Axis with the largest centroid extent, used to order spatial seeds.
fn principal_axis(graph: &Graph) -> Vec3 {
    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for &c in &graph.centroids {
        min = min.min(c);
        max = max.max(c);
    }
    let extent = max - min;
    if extent.x >= extent.y && extent.x >= extent.z {
        Vec3::X
    } else if extent.y >= extent.z {
        Vec3::Y
    } else {
        Vec3::Z
    }
}

/// Greedy graph growing: side 0 starts from the node furthest along the negative
/// principal axis and absorbs the best-gain frontier node until it reaches its
/// target weight. Disconnected remainders are reseeded in the same spatial order.
fn grow_bisection(graph: &Graph, target: f32) -> Vec<u8> {
    let n = graph.len();
    let mut sides = vec![1u8; n];
    if n == 0 {
        return sides;
    }

    let axis = principal_axis(graph);
    let mut spatial: Vec<u32> = (0..n as u32).collect();
    spatial.sort_by(|&a, &b| {
        let pa = graph.centroids[a as usize].dot(axis);
        let pb = graph.centroids[b as usize].dot(axis);
        pa.total_cmp(&pb).then(a.cmp(&b))
    });

    let mut gain: Vec<i64> = (0..n).map(|u| -(graph.edges(u).map(|(_, w)| w as i64).sum::<i64>())).collect();
    let mut heap: BinaryHeap<(i64, Reverse<u32>)> = BinaryHeap::new();
    let mut weight = 0.0f32;
    let mut next_seed = 0usize;

    while weight < target {
        let node = loop {
            match heap.pop() {
                Some((g, Reverse(u))) if sides[u as usize] == 1 && gain[u as usize] == g => break Some(u as usize),
                Some(_) => continue,
                None => {
                    while next_seed < n && sides[spatial[next_seed] as usize] == 0 {
                        next_seed += 1;
                    }
                    break spatial.get(next_seed).map(|&u| u as usize);
                }
            }
        };
        let Some(u) = node else { break };

        let w = graph.node_weights[u] as f32;
        // Stop short rather than overshoot by more than half a node.
        if weight > 0.0 && weight + w * 0.5 > target {
            break;
        }
        sides[u] = 0;
        weight += w;
        for (v, ew) in graph.edges(u) {
            if sides[v] == 1 {
                gain[v] += 2 * ew as i64;
                heap.push((gain[v], Reverse(v as u32)));
            }
        }
    }
    sides
}

fn side_weights(graph: &Graph, sides: &[u8]) -> [f32; 2] {
    let mut w = [0.0f32; 2];
    for (u, &s) in sides.iter().enumerate() {
        w[s as usize] += graph.node_weights[u] as f32;
    }
    w
}

/// External minus internal edge weight: the cut reduction of moving `u`.
fn move_gain(graph: &Graph, sides: &[u8], u: usize) -> i64 {
    let mut g = 0i64;
    for (v, w) in graph.edges(u) {
        if sides[v] == sides[u] {
            g -= w as i64;
        } else {
            g += w as i64;
        }
    }
    g
}

/// Boundary refinement: moves nodes with positive gain while the receiving side
/// stays within tolerance.
fn refine(graph: &Graph, sides: &mut [u8], targets: [f32; 2]) {
    let mut weights = side_weights(graph, sides);
    let limits = [targets[0] * (1.0 + BALANCE_TOLERANCE), targets[1] * (1.0 + BALANCE_TOLERANCE)];

    for _ in 0..REFINE_PASSES {
        let mut moved = false;
        for u in 0..graph.len() {
            let from = sides[u] as usize;
            let to = 1 - from;
            let w = graph.node_weights[u] as f32;
            if weights[to] + w > limits[to] {
                continue;
            }
            let g = move_gain(graph, sides, u);
            // Zero-gain moves are only taken when they help balance.
            if g > 0 || (g == 0 && weights[from] > targets[from] && weights[to] + w <= targets[to]) {
                sides[u] = to as u8;
                weights[from] -= w;
                weights[to] += w;
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }
}

/// Rebalance preference for moving `u` to `light`: its gain, pushed far down
/// when `u` has no neighbour on the light side yet.
fn move_score(graph: &Graph, sides: &[u8], u: usize, light: usize) -> i64 {
    let g = move_gain(graph, sides, u);
    if graph.edges(u).any(|(v, _)| sides[v] as usize == light) {
        g
    } else {
        g - (1 << 20)
    }
}

/// Moves the cheapest nodes off an overweight side until both sides are within
/// tolerance. Boundary nodes are preferred so the cut stays small.
///
/// Candidates sit in a max-heap keyed by score. Moving a node only raises the
/// scores of its heavy-side neighbours, so those are pushed again and older
/// entries are dropped when their stored score no longer matches.
fn rebalance(graph: &Graph, sides: &mut [u8], targets: [f32; 2]) {
    let mut weights = side_weights(graph, sides);
    let mut heavy = usize::MAX;
    let mut heap: BinaryHeap<(i64, Reverse<u32>)> = BinaryHeap::new();

    for _ in 0..graph.len() {
        let side = if weights[0] - targets[0] > weights[1] - targets[1] { 0 } else { 1 };
        let excess = weights[side] - targets[side];
        if excess <= targets[side] * BALANCE_TOLERANCE || excess < 1.0 {
            return;
        }
        let light = 1 - side;
        if side != heavy {
            heavy = side;
            heap = (0..graph.len())
                .filter(|&u| sides[u] as usize == heavy)
                .map(|u| (move_score(graph, sides, u, light), Reverse(u as u32)))
                .collect();
        }

        let mut picked = None;
        while let Some((score, Reverse(u))) = heap.pop() {
            let u = u as usize;
            if sides[u] as usize != heavy || score != move_score(graph, sides, u, light) {
                continue;
            }
            // The excess only shrinks while this side stays heavy.
            if graph.node_weights[u] as f32 > excess * 2.0 {
                continue;
            }
            picked = Some(u);
            break;
        }
        let Some(u) = picked else { return };

        let w = graph.node_weights[u] as f32;
        sides[u] = light as u8;
        weights[heavy] -= w;
        weights[light] += w;
        for (v, _) in graph.edges(u) {
            if sides[v] as usize == heavy {
                heap.push((move_score(graph, sides, v, light), Reverse(v as u32)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Regular grid of `w * h` unit-weight nodes with 4-neighbour edges.
    fn grid(w: u32, h: u32) -> Graph {
        let mut edges = Vec::new();
        let mut centroids = Vec::new();
        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                centroids.push(Vec3::new(x as f32, y as f32, 0.0));
                if x + 1 < w {
                    edges.push((i, i + 1, 1));
                }
                if y + 1 < h {
                    edges.push((i, i + w, 1));
                }
            }
        }
        Graph::from_edges(vec![1; (w * h) as usize], centroids, edges)
    }

    #[test]
    fn csr_merges_duplicate_edges() {
        let g = Graph::from_edges(vec![1; 3], vec![Vec3::ZERO; 3], vec![(0, 1, 1), (1, 0, 2), (1, 2, 1), (2, 2, 5)]);
        let e: Vec<_> = g.edges(1).collect();
        assert_eq!(e, vec![(0, 3), (2, 1)]);
        assert_eq!(g.edges(2).count(), 1);
    }

    #[test]
    fn triangle_graph_links_shared_edges() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE];
        let g = triangle_graph(&positions, &[0, 1, 2, 2, 1, 3]);
        assert_eq!(g.edges(0).collect::<Vec<_>>(), vec![(1, 1)]);
    }

    #[test]
    fn grid_parts_are_balanced() {
        let g = grid(40, 40);
        let parts = partition(&g, 8, 1);
        let mut sizes = [0u32; 8];
        for &p in &parts {
            sizes[p as usize] += 1;
        }
        for s in sizes {
            assert!((180..=220).contains(&s), "sizes {:?}", sizes);
        }
    }

    #[test]
    fn large_grid_parts_are_balanced() {
        let g = grid(200, 200);
        let parts = partition(&g, 16, 9);
        let mut sizes = [0u32; 16];
        for &p in &parts {
            sizes[p as usize] += 1;
        }
        for s in sizes {
            assert!((2250..=2750).contains(&s), "sizes {:?}", sizes);
        }
    }

    #[test]
    fn rebalance_peels_a_lopsided_split_from_its_border() {
        let g = grid(200, 200);
        let mut sides = vec![0u8; g.len()];
        let half = g.len() as f32 / 2.0;
        rebalance(&g, &mut sides, [half, half]);

        let [heavy, light] = side_weights(&g, &sides);
        assert!(heavy - half <= half * BALANCE_TOLERANCE, "{} vs {}", heavy, light);
        let cut: u32 = (0..g.len())
            .flat_map(|u| g.edges(u).map(move |(v, w)| (u, v, w)))
            .filter(|&(u, v, _)| u < v && sides[u] != sides[v])
            .map(|(_, _, w)| w)
            .sum();
        assert!(cut <= 400, "cut {}", cut);
    }

    #[test]
    fn partition_is_deterministic_per_seed() {
        let g = grid(30, 20);
        assert_eq!(partition(&g, 5, 42), partition(&g, 5, 42));
    }

    #[test]
    fn more_parts_than_nodes_leaves_empty_parts() {
        let g = grid(2, 1);
        let parts = partition(&g, 4, 3);
        assert_eq!(parts.len(), 2);
        assert_ne!(parts[0], parts[1]);
        assert!(parts.iter().all(|&p| p < 4));
    }
}
