use glam::Vec3;
use log::{debug, info, warn};
use std::collections::HashMap;

use crate::processor::partitioner::{partition, triangle_graph};
use crate::processor::types::*;
use crate::{Cluster, Vertex, NO_PARENT};

/// Bit pattern of a position, used to weld vertices that only differ in attributes.
pub(crate) type PositionKey = [u32; 3];

pub(crate) fn position_key(v: &Vertex) -> PositionKey {
    // -0.0 and 0.0 must weld together.
    v.position.map(|c| if c == 0.0 { 0 } else { c.to_bits() })
}

/// Sphere around the AABB center plus the AABB itself.
pub(crate) fn bounds_of(points: impl Iterator<Item = Vec3> + Clone) -> ([f32; 4], [f32; 3], [f32; 3]) {
    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    let mut any = false;
    for p in points.clone() {
        min = min.min(p);
        max = max.max(p);
        any = true;
    }
    if !any {
        return ([0.0; 4], [0.0; 3], [0.0; 3]);
    }
    let center = (min + max) * 0.5;
    let radius = points.map(|p| p.distance(center)).fold(0.0f32, f32::max);
    ([center.x, center.y, center.z, radius], min.to_array(), max.to_array())
}

/// Appends one cluster's vertices and cluster-local indices to the mesh and
/// returns its id. Bounds are derived from the triangles; error fields are left
/// for the caller.
pub(crate) fn push_cluster(
    mesh: &mut ClusteredMesh,
    vertices: &[Vertex],
    local_indices: Vec<u32>,
    lod_level: u32,
    optimize: bool,
) -> u32 {
    let local_indices = if optimize && local_indices.len() >= 6 {
        meshopt::optimize_vertex_cache(&local_indices, vertices.len())
    } else {
        local_indices
    };

    let (sphere, aabb_min, aabb_max) = bounds_of(vertices.iter().map(|v| Vec3::from_array(v.position)));
    let cluster = Cluster {
        bounding_sphere: sphere,
        aabb_min,
        aabb_max,
        lod_error: 0.0,
        parent_error: f32::MAX,
        lod_bounds: sphere,
        parent_bounds: [0.0; 4],
        vertex_offset: mesh.vertices.len() as u32,
        vertex_count: vertices.len() as u32,
        index_offset: mesh.indices.len() as u32,
        triangle_count: (local_indices.len() / 3) as u32,
        lod_level,
        material_index: 0,
        flags: Cluster::FLAG_ROOT,
        parent_index: NO_PARENT,
        child_offset: 0,
        child_count: 0,
        group_index: 0,
        _padding: 0,
    };

    mesh.vertices.extend_from_slice(vertices);
    mesh.indices.extend_from_slice(&local_indices);
    let id = mesh.clusters.len() as u32;
    mesh.clusters.push(cluster);
    id
}

/// Recomputes the mesh-wide bounds from its LOD-0 clusters.
pub(crate) fn update_mesh_bounds(mesh: &mut ClusteredMesh) {
    let points = mesh
        .clusters
        .iter()
        .filter(|c| c.lod_level == 0)
        .flat_map(|c| {
            let start = c.vertex_offset as usize;
            mesh.vertices[start..start + c.vertex_count as usize].iter()
        })
        .map(|v| Vec3::from_array(v.position));
    let (sphere, min, max) = bounds_of(points);
    mesh.bounding_sphere = sphere;
    mesh.aabb_min = min;
    mesh.aabb_max = max;
}

/// Partitions a triangle mesh into LOD-0 clusters of roughly
/// `options.target_cluster_size` triangles.
pub fn cluster_mesh(vertices: &[Vertex], indices: &[u32], options: &ClusterOptions) -> Result<ClusteredMesh, BuildError> {
    if indices.len() % 3 != 0 {
        return Err(BuildError::InvalidIndexCount(indices.len()));
    }
    if indices.is_empty() {
        return Err(BuildError::EmptyInput);
    }
    if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
        return Err(BuildError::IndexOutOfRange { index, vertex_count: vertices.len() });
    }

    let mut stats = BuildStats { input_triangles: (indices.len() / 3) as u32, ..Default::default() };

    // Adjacency and duplicate detection run on position-welded ids so attribute
    // seams do not split the surface.
    let mut weld: HashMap<PositionKey, u32> = HashMap::with_capacity(vertices.len());
    let mut welded_positions = Vec::new();
    let weld_ids: Vec<u32> = vertices
        .iter()
        .map(|v| {
            *weld.entry(position_key(v)).or_insert_with(|| {
                welded_positions.push(Vec3::from_array(v.position));
                welded_positions.len() as u32 - 1
            })
        })
        .collect();

    let mut kept: Vec<u32> = Vec::with_capacity(indices.len() / 3);
    let mut seen = std::collections::HashSet::with_capacity(indices.len() / 3);
    for (t, tri) in indices.chunks_exact(3).enumerate() {
        let w = [weld_ids[tri[0] as usize], weld_ids[tri[1] as usize], weld_ids[tri[2] as usize]];
        let [p0, p1, p2] = w.map(|i| welded_positions[i as usize]);
        if w[0] == w[1] || w[1] == w[2] || w[0] == w[2] || (p1 - p0).cross(p2 - p0).length_squared() == 0.0 {
            stats.degenerate_triangles += 1;
            continue;
        }
        let mut sorted = w;
        sorted.sort_unstable();
        if !seen.insert(sorted) {
            stats.duplicate_triangles += 1;
            continue;
        }
        kept.push(t as u32);
    }

    let dropped = stats.dropped_triangles();
    if dropped > 0 {
        warn!(
            "clustering dropped {} triangles ({} degenerate, {} duplicate)",
            dropped, stats.degenerate_triangles, stats.duplicate_triangles
        );
    }
    if let Some(limit) = options.max_drop_ratio {
        if dropped as f32 > limit * stats.input_triangles as f32 {
            return Err(BuildError::ExcessiveDrops { dropped, total: stats.input_triangles, limit });
        }
    }
    if kept.is_empty() {
        return Err(BuildError::EmptyInput);
    }

    let mut welded_indices = Vec::with_capacity(kept.len() * 3);
    for &t in &kept {
        let tri = &indices[t as usize * 3..t as usize * 3 + 3];
        welded_indices.extend(tri.iter().map(|&i| weld_ids[i as usize]));
    }
    let graph = triangle_graph(&welded_positions, &welded_indices);

    let target = options.target_cluster_size.max(1) as usize;
    let parts = kept.len().div_ceil(target);
    let assignment = partition(&graph, parts, options.seed);

    let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); parts];
    for (i, &p) in assignment.iter().enumerate() {
        buckets[p as usize].push(kept[i]);
    }

    let mut mesh = ClusteredMesh::default();
    let mut remap: Vec<u32> = vec![u32::MAX; vertices.len()];
    for bucket in &buckets {
        if bucket.is_empty() {
            stats.empty_partitions += 1;
            continue;
        }
        let mut local_vertices = Vec::new();
        let mut local_indices = Vec::with_capacity(bucket.len() * 3);
        for &t in bucket {
            for k in 0..3 {
                let v = indices[t as usize * 3 + k] as usize;
                if remap[v] == u32::MAX {
                    remap[v] = local_vertices.len() as u32;
                    local_vertices.push(vertices[v]);
                }
                local_indices.push(remap[v]);
            }
        }
        for &t in bucket {
            for k in 0..3 {
                remap[indices[t as usize * 3 + k] as usize] = u32::MAX;
            }
        }

        let id = push_cluster(&mut mesh, &local_vertices, local_indices, 0, options.optimize_vertex_cache);
        let cluster = &mut mesh.clusters[id as usize];
        cluster.flags |= Cluster::FLAG_LEAF;
        if options.debug_colors {
            cluster.flags |= Cluster::FLAG_DEBUG_COLOR;
        }
    }

    if stats.empty_partitions > 0 {
        debug!("{} of {} partitions came back empty", stats.empty_partitions, parts);
    }

    let tri_total: u32 = mesh.clusters.iter().map(|c| c.triangle_count).sum();
    stats.levels.push(LevelStats { level: 0, clusters: mesh.clusters.len() as u32, triangles: tri_total, stalled_groups: 0 });

    let summary = format!(
        "clustered {} triangles into {} clusters (target {}, largest {})",
        tri_total,
        mesh.clusters.len(),
        target,
        mesh.clusters.iter().map(|c| c.triangle_count).max().unwrap_or(0)
    );
    if options.verbose {
        info!("{}", summary);
    } else {
        debug!("{}", summary);
    }

    mesh.max_lod_level = 0;
    mesh.build_hash = options.fingerprint();
    mesh.stats = stats;
    update_mesh_bounds(&mut mesh);
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_strip(quads: u32) -> (Vec<Vertex>, Vec<u32>) {
        let mut vertices = Vec::new();
        for x in 0..=quads {
            vertices.push(Vertex::new([x as f32, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0; 2]));
            vertices.push(Vertex::new([x as f32, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0; 2]));
        }
        let mut indices = Vec::new();
        for x in 0..quads {
            let i = x * 2;
            indices.extend_from_slice(&[i, i + 2, i + 1, i + 1, i + 2, i + 3]);
        }
        (vertices, indices)
    }

    #[test]
    fn rejects_malformed_input() {
        let v = vec![Vertex::default(); 3];
        assert_eq!(cluster_mesh(&v, &[0, 1], &ClusterOptions::default()).unwrap_err(), BuildError::InvalidIndexCount(2));
        assert_eq!(cluster_mesh(&v, &[], &ClusterOptions::default()).unwrap_err(), BuildError::EmptyInput);
        assert!(matches!(
            cluster_mesh(&v, &[0, 1, 5], &ClusterOptions::default()),
            Err(BuildError::IndexOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn drops_degenerate_and_duplicate_triangles() {
        let (vertices, mut indices) = quad_strip(4);
        indices.extend_from_slice(&[0, 0, 1]);
        indices.extend_from_slice(&[2, 1, 0]);
        let mesh = cluster_mesh(&vertices, &indices, &ClusterOptions { target_cluster_size: 4, ..Default::default() }).unwrap();
        assert_eq!(mesh.stats.degenerate_triangles, 1);
        assert_eq!(mesh.stats.duplicate_triangles, 1);
        assert_eq!(mesh.triangle_count(), 8);
        mesh.validate().unwrap();
    }

    #[test]
    fn drop_ratio_policy_fails_the_build() {
        let (vertices, mut indices) = quad_strip(2);
        indices.extend_from_slice(&[0, 0, 1, 1, 1, 2]);
        let options = ClusterOptions { max_drop_ratio: Some(0.1), ..Default::default() };
        assert!(matches!(cluster_mesh(&vertices, &indices, &options), Err(BuildError::ExcessiveDrops { dropped: 2, .. })));
    }

    #[test]
    fn clusters_are_flagged_leaves_and_roots() {
        let (vertices, indices) = quad_strip(16);
        let options = ClusterOptions { target_cluster_size: 8, debug_colors: true, ..Default::default() };
        let mesh = cluster_mesh(&vertices, &indices, &options).unwrap();
        assert_eq!(mesh.clusters.len(), 4);
        for c in &mesh.clusters {
            assert_eq!(c.flags, Cluster::FLAG_LEAF | Cluster::FLAG_ROOT | Cluster::FLAG_DEBUG_COLOR);
            assert_eq!(c.lod_error, 0.0);
        }
        assert_eq!(mesh.bounding_sphere[0], 8.0);
    }
}
