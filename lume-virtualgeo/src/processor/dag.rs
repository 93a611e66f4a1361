use glam::Vec3;
use log::{debug, info};
use rayon::prelude::*;
use std::collections::HashMap;

use crate::processor::builder::{position_key, push_cluster, PositionKey};
use crate::processor::partitioner::{partition, Graph};
use crate::processor::simplifier::simplify_group;
use crate::processor::types::*;
use crate::util::fnv1a_extend;
use crate::{Cluster, Vertex, NO_PARENT};

/// Relative growth applied to merged LOD spheres so float rounding can never make
/// a parent sphere smaller than a child's.
const LOD_BOUNDS_INFLATE: f32 = 1e-5;

/// Output of simplifying one group, before it is appended to the mesh.
struct GroupResult {
    children: Vec<u32>,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    error: f32,
    stalled: bool,
}

/// Builds coarser LOD levels on top of the mesh's current top level.
///
/// Every level groups about `group_size` neighbouring clusters, simplifies each
/// group into a single coarser cluster and links the children to it. Stops at
/// `max_lod_levels` levels or once a level has `min_clusters` clusters or fewer.
pub fn build_dag(mesh: &mut ClusteredMesh, options: &DagOptions) {
    let mut level = mesh.max_lod_level;
    let mut current: Vec<u32> = mesh.clusters_at(level).map(|(i, _)| i as u32).collect();

    while current.len() > options.min_clusters.max(1) as usize && level + 1 < options.max_lod_levels {
        // Groups of two or more always shrink the level, so no stall check is needed.
        current = build_level(mesh, &current, level, options);
        level += 1;
    }

    mesh.max_lod_level = level;
    mesh.build_hash = fnv1a_extend(mesh.build_hash, &options.fingerprint().to_le_bytes());
}

/// Position-welded view of one LOD level.
struct LevelWeld {
    /// Per cluster (in level order), its triangles as welded ids.
    triangles: Vec<Vec<[u32; 3]>>,
    /// Per welded id, the first vertex carrying that position.
    vertices: Vec<Vertex>,
}

fn weld_level(mesh: &ClusteredMesh, clusters: &[u32]) -> LevelWeld {
    let mut map: HashMap<PositionKey, u32> = HashMap::new();
    let mut vertices = Vec::new();
    let mut triangles = Vec::with_capacity(clusters.len());
    for &id in clusters {
        let c = &mesh.clusters[id as usize];
        let base = c.vertex_offset as usize;
        let local = &mesh.indices[c.index_offset as usize..(c.index_offset + c.index_count()) as usize];
        let mut tris = Vec::with_capacity(c.triangle_count as usize);
        for tri in local.chunks_exact(3) {
            let w = [tri[0], tri[1], tri[2]].map(|i| {
                let v = mesh.vertices[base + i as usize];
                *map.entry(position_key(&v)).or_insert_with(|| {
                    vertices.push(v);
                    vertices.len() as u32 - 1
                })
            });
            tris.push(w);
        }
        triangles.push(tris);
    }
    LevelWeld { triangles, vertices }
}

/// Cluster adjacency weighted by the number of shared welded edges.
fn cluster_graph(mesh: &ClusteredMesh, clusters: &[u32], weld: &LevelWeld) -> Graph {
    let mut entries: Vec<(u64, u32)> = Vec::new();
    for (local, tris) in weld.triangles.iter().enumerate() {
        for tri in tris {
            for k in 0..3 {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                entries.push((((a.min(b) as u64) << 32) | a.max(b) as u64, local as u32));
            }
        }
    }
    entries.sort_unstable();
    entries.dedup();

    let mut edges = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let mut j = i + 1;
        while j < entries.len() && entries[j].0 == entries[i].0 {
            j += 1;
        }
        for k in i..j.saturating_sub(1) {
            edges.push((entries[k].1, entries[k + 1].1, 1));
        }
        i = j;
    }

    let centroids = clusters
        .iter()
        .map(|&id| {
            let s = mesh.clusters[id as usize].bounding_sphere;
            Vec3::new(s[0], s[1], s[2])
        })
        .collect();
    Graph::from_edges(vec![1; clusters.len()], centroids, edges)
}

/// Smallest-effort sphere around `spheres`, centered on their radius-weighted
/// mean and inflated slightly.
fn enclosing_sphere(spheres: impl Iterator<Item = [f32; 4]> + Clone) -> [f32; 4] {
    let mut center = Vec3::ZERO;
    let mut weight = 0.0;
    for s in spheres.clone() {
        let w = s[3].max(1e-6);
        center += Vec3::new(s[0], s[1], s[2]) * w;
        weight += w;
    }
    if weight > 0.0 {
        center /= weight;
    }
    let radius = spheres
        .map(|s| center.distance(Vec3::new(s[0], s[1], s[2])) + s[3])
        .fold(0.0f32, f32::max);
    [center.x, center.y, center.z, radius * (1.0 + LOD_BOUNDS_INFLATE) + f32::EPSILON]
}

fn simplify_group_of(
    mesh: &ClusteredMesh,
    level_clusters: &[u32],
    weld: &LevelWeld,
    shared: &[bool],
    members: &[u32],
    target_triangles: u32,
) -> GroupResult {
    let mut local_of: HashMap<u32, u32> = HashMap::new();
    let mut vertices = Vec::new();
    let mut locked = Vec::new();
    let mut indices = Vec::new();
    let mut max_child_error = 0.0f32;

    for &m in members {
        let child = &mesh.clusters[level_clusters[m as usize] as usize];
        max_child_error = max_child_error.max(child.lod_error);
        for tri in &weld.triangles[m as usize] {
            for &w in tri {
                let local = *local_of.entry(w).or_insert_with(|| {
                    vertices.push(weld.vertices[w as usize]);
                    locked.push(shared[w as usize]);
                    vertices.len() as u32 - 1
                });
                indices.push(local);
            }
        }
    }

    let input_triangles = indices.len() / 3;
    let target = (target_triangles as usize).min(input_triangles / 2).max(1);
    let simplified = simplify_group(&vertices, &indices, &locked, target);
    let children = members.iter().map(|&m| level_clusters[m as usize]).collect();

    if simplified.indices.len() / 3 >= input_triangles || simplified.indices.is_empty() {
        return GroupResult { children, vertices, indices, error: max_child_error, stalled: true };
    }
    GroupResult {
        children,
        vertices: simplified.vertices,
        indices: simplified.indices,
        error: max_child_error + simplified.error,
        stalled: false,
    }
}

/// Builds level `level + 1` from the clusters of `level` and returns the new ids.
fn build_level(mesh: &mut ClusteredMesh, current: &[u32], level: u32, options: &DagOptions) -> Vec<u32> {
    let weld = weld_level(mesh, current);
    let graph = cluster_graph(mesh, current, &weld);
    let group_count = current.len().div_ceil(options.group_size.max(2) as usize);
    let assignment = partition(&graph, group_count, options.seed ^ ((level as u64 + 1) << 32));

    let mut groups: Vec<Vec<u32>> = vec![Vec::new(); group_count];
    for (local, &g) in assignment.iter().enumerate() {
        groups[g as usize].push(local as u32);
    }
    groups.retain(|g| !g.is_empty());

    // A welded vertex touched by two groups sits on a group border and must not
    // move, or neighbouring coarse clusters would crack apart.
    let mut owner = vec![u32::MAX; weld.vertices.len()];
    let mut shared = vec![false; weld.vertices.len()];
    for (g, members) in groups.iter().enumerate() {
        for &m in members {
            for tri in &weld.triangles[m as usize] {
                for &w in tri {
                    let o = &mut owner[w as usize];
                    if *o == u32::MAX {
                        *o = g as u32;
                    } else if *o != g as u32 {
                        shared[w as usize] = true;
                    }
                }
            }
        }
    }

    let results: Vec<GroupResult> = {
        let mesh_ref: &ClusteredMesh = mesh;
        groups
            .par_iter()
            .map(|members| simplify_group_of(mesh_ref, current, &weld, &shared, members, options.target_triangles))
            .collect()
    };

    let input_tris: u32 = current.iter().map(|&id| mesh.clusters[id as usize].triangle_count).sum();
    let mut next = Vec::with_capacity(results.len());
    let mut stats = LevelStats { level: level + 1, ..Default::default() };

    for (group_index, result) in results.into_iter().enumerate() {
        let GroupResult { children, vertices, indices, error, stalled } = result;
        if stalled {
            stats.stalled_groups += 1;
        }
        let id = push_cluster(mesh, &vertices, indices, level + 1, options.optimize_vertex_cache);

        let own_sphere = mesh.clusters[id as usize].bounding_sphere;
        let child_spheres: Vec<[f32; 4]> = children.iter().map(|&c| mesh.clusters[c as usize].lod_bounds).collect();
        let lod_bounds = enclosing_sphere(child_spheres.iter().copied().chain(std::iter::once(own_sphere)));

        let debug_color = children.iter().any(|&c| mesh.clusters[c as usize].flags & Cluster::FLAG_DEBUG_COLOR != 0);
        let child_offset = mesh.children.len() as u32;
        mesh.children.extend_from_slice(&children);

        {
            let coarse = &mut mesh.clusters[id as usize];
            coarse.lod_error = error;
            coarse.lod_bounds = lod_bounds;
            coarse.child_offset = child_offset;
            coarse.child_count = children.len() as u32;
            coarse.parent_index = NO_PARENT;
            coarse.parent_error = f32::MAX;
            if debug_color {
                coarse.flags |= Cluster::FLAG_DEBUG_COLOR;
            }
        }

        for &c in &children {
            let child = &mut mesh.clusters[c as usize];
            child.parent_index = id;
            child.parent_error = error;
            child.parent_bounds = lod_bounds;
            child.group_index = group_index as u32;
            child.flags &= !Cluster::FLAG_ROOT;
        }

        stats.clusters += 1;
        stats.triangles += mesh.clusters[id as usize].triangle_count;
        next.push(id);
    }

    let summary = format!(
        "LOD {}: {} clusters -> {}, triangles {} -> {} (ratio {:.2}), {} stalled groups",
        level + 1,
        current.len(),
        next.len(),
        input_tris,
        stats.triangles,
        stats.triangles as f32 / input_tris.max(1) as f32,
        stats.stalled_groups
    );
    if options.verbose {
        info!("{}", summary);
    } else {
        debug!("{}", summary);
    }
    mesh.stats.levels.push(stats);
    next
}
