use serde::{Deserialize, Serialize};
use std::fmt;

use crate::util::{fnv1a_extend, FNV_SEED};
use crate::{Cluster, Vertex, NO_PARENT};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterOptions {
    /// Average triangles per LOD-0 cluster.
    pub target_cluster_size: u32,
    /// Upper bound on LOD levels (level 0 included) when the DAG is built.
    pub max_lod_levels: u32,
    pub debug_colors: bool,
    pub verbose: bool,
    pub seed: u64,
    /// Fail the build when more than this fraction of input triangles is dropped.
    /// `None` keeps going regardless.
    pub max_drop_ratio: Option<f32>,
    /// Reorder each cluster's triangles for the post-transform vertex cache.
    pub optimize_vertex_cache: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            target_cluster_size: 128,
            max_lod_levels: 8,
            debug_colors: false,
            verbose: false,
            seed: 0x5eed,
            max_drop_ratio: None,
            optimize_vertex_cache: true,
        }
    }
}

impl ClusterOptions {
    /// Hash of every option that changes the produced geometry.
    pub fn fingerprint(&self) -> u64 {
        let mut h = FNV_SEED;
        h = fnv1a_extend(h, &self.target_cluster_size.to_le_bytes());
        h = fnv1a_extend(h, &self.seed.to_le_bytes());
        h = fnv1a_extend(h, &[self.debug_colors as u8, self.optimize_vertex_cache as u8]);
        h
    }

    /// The `build_hash` that `process_mesh` stamps on meshes built with these
    /// options.
    pub fn pipeline_fingerprint(&self) -> u64 {
        fnv1a_extend(self.fingerprint(), &DagOptions::from(self).fingerprint().to_le_bytes())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DagOptions {
    pub max_lod_levels: u32,
    /// Clusters merged into one coarser cluster.
    pub group_size: u32,
    /// Stop once a level has this many clusters or fewer.
    pub min_clusters: u32,
    pub target_triangles: u32,
    pub seed: u64,
    pub verbose: bool,
    pub optimize_vertex_cache: bool,
}

impl Default for DagOptions {
    fn default() -> Self {
        Self::from(&ClusterOptions::default())
    }
}

impl From<&ClusterOptions> for DagOptions {
    fn from(options: &ClusterOptions) -> Self {
        Self {
            max_lod_levels: options.max_lod_levels,
            group_size: 4,
            min_clusters: 1,
            target_triangles: options.target_cluster_size,
            seed: options.seed,
            verbose: options.verbose,
            optimize_vertex_cache: options.optimize_vertex_cache,
        }
    }
}

impl DagOptions {
    pub fn fingerprint(&self) -> u64 {
        let mut h = FNV_SEED;
        h = fnv1a_extend(h, &self.max_lod_levels.to_le_bytes());
        h = fnv1a_extend(h, &self.group_size.to_le_bytes());
        h = fnv1a_extend(h, &self.min_clusters.to_le_bytes());
        h = fnv1a_extend(h, &self.target_triangles.to_le_bytes());
        fnv1a_extend(h, &self.seed.to_le_bytes())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LevelStats {
    pub level: u32,
    pub clusters: u32,
    pub triangles: u32,
    /// Groups whose simplification could not reduce the triangle count.
    pub stalled_groups: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildStats {
    pub input_triangles: u32,
    pub degenerate_triangles: u32,
    pub duplicate_triangles: u32,
    pub empty_partitions: u32,
    pub levels: Vec<LevelStats>,
}

impl BuildStats {
    pub fn dropped_triangles(&self) -> u32 {
        self.degenerate_triangles + self.duplicate_triangles
    }
}

/// Contiguous index range covering one LOD level of a mesh.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LodRange {
    pub first_index: u32,
    pub index_count: u32,
    pub cluster_count: u32,
    pub max_error: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    EmptyInput,
    InvalidIndexCount(usize),
    IndexOutOfRange { index: u32, vertex_count: usize },
    ExcessiveDrops { dropped: u32, total: u32, limit: f32 },
    InvalidMesh(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::EmptyInput => write!(f, "mesh has no triangles"),
            BuildError::InvalidIndexCount(n) => write!(f, "index count {} is not a multiple of 3", n),
            BuildError::IndexOutOfRange { index, vertex_count } => {
                write!(f, "index {} out of range for {} vertices", index, vertex_count)
            }
            BuildError::ExcessiveDrops { dropped, total, limit } => write!(
                f,
                "dropped {} of {} triangles, above the allowed ratio {:.3}",
                dropped, total, limit
            ),
            BuildError::InvalidMesh(msg) => write!(f, "invalid clustered mesh: {}", msg),
        }
    }
}

impl std::error::Error for BuildError {}

/// Cluster table plus the geometry it addresses.
///
/// `indices` are local to their cluster: index `i` of a cluster refers to
/// `vertices[cluster.vertex_offset + i]`.
#[derive(Clone, Debug, Default)]
pub struct ClusteredMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub clusters: Vec<Cluster>,
    /// Child cluster ids, addressed by `child_offset`/`child_count`.
    pub children: Vec<u32>,
    pub max_lod_level: u32,
    pub bounding_sphere: [f32; 4],
    pub aabb_min: [f32; 3],
    pub aabb_max: [f32; 3],
    /// Combined options fingerprint the mesh was built with.
    pub build_hash: u64,
    pub stats: BuildStats,
}

impl ClusteredMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn clusters_at(&self, level: u32) -> impl Iterator<Item = (usize, &Cluster)> {
        self.clusters.iter().enumerate().filter(move |(_, c)| c.lod_level == level)
    }

    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.clusters.iter().enumerate().filter(|(_, c)| c.is_root()).map(|(i, _)| i)
    }

    /// Per-level index ranges. Every level's clusters must be stored contiguously.
    pub fn lod_ranges(&self) -> Vec<LodRange> {
        let mut ranges = vec![
            LodRange { first_index: u32::MAX, ..Default::default() };
            self.max_lod_level as usize + 1
        ];
        for c in &self.clusters {
            let Some(r) = ranges.get_mut(c.lod_level as usize) else { continue };
            r.first_index = r.first_index.min(c.index_offset);
            r.index_count = r.index_count.saturating_add(c.index_count());
            r.cluster_count += 1;
            r.max_error = r.max_error.max(c.lod_error);
        }
        for r in &mut ranges {
            if r.cluster_count == 0 {
                r.first_index = 0;
            }
        }
        ranges
    }

    /// Checks the structural invariants every consumer relies on.
    pub fn validate(&self) -> Result<(), BuildError> {
        let bad = |msg: String| Err(BuildError::InvalidMesh(msg));
        if self.indices.len() % 3 != 0 {
            return bad(format!("index count {} not a multiple of 3", self.indices.len()));
        }
        for (id, c) in self.clusters.iter().enumerate() {
            let v_end = c.vertex_offset as usize + c.vertex_count as usize;
            if v_end > self.vertices.len() {
                return bad(format!("cluster {} vertex range ends at {} past {}", id, v_end, self.vertices.len()));
            }
            let i_start = c.index_offset as usize;
            let Some(i_end) = c.triangle_count.checked_mul(3).and_then(|n| c.index_offset.checked_add(n)) else {
                return bad(format!("cluster {} index range overflows u32", id));
            };
            let i_end = i_end as usize;
            if i_end > self.indices.len() {
                return bad(format!("cluster {} index range ends at {} past {}", id, i_end, self.indices.len()));
            }
            if c.triangle_count == 0 {
                return bad(format!("cluster {} has no triangles", id));
            }
            if let Some(&i) = self.indices[i_start..i_end].iter().find(|&&i| i >= c.vertex_count) {
                return bad(format!("cluster {} references local vertex {} of {}", id, i, c.vertex_count));
            }
            if c.lod_level > self.max_lod_level {
                return bad(format!("cluster {} at level {} above max {}", id, c.lod_level, self.max_lod_level));
            }
            if c.lod_level == self.max_lod_level && !c.is_root() {
                return bad(format!("cluster {} at the top level has a parent", id));
            }
            if c.parent_error < c.lod_error {
                return bad(format!("cluster {} parent error {} below own {}", id, c.parent_error, c.lod_error));
            }
            if c.is_root() {
                if c.parent_error != f32::MAX {
                    return bad(format!("root {} has finite parent error", id));
                }
                continue;
            }
            let Some(parent) = self.clusters.get(c.parent_index as usize) else {
                return bad(format!("cluster {} parent {} out of range", id, c.parent_index));
            };
            if parent.lod_level <= c.lod_level {
                return bad(format!("cluster {} parent is not coarser", id));
            }
            if parent.lod_error.to_bits() != c.parent_error.to_bits() || parent.lod_bounds != c.parent_bounds {
                return bad(format!("cluster {} parent error/bounds out of sync", id));
            }
            let start = parent.child_offset as usize;
            let kids = self.children.get(start..start + parent.child_count as usize);
            if !kids.is_some_and(|k| k.contains(&(id as u32))) {
                return bad(format!("cluster {} missing from its parent's child list", id));
            }
        }
        let ranges = self.lod_ranges();
        for (level, r) in ranges.iter().enumerate() {
            let range_end = r.first_index as u64 + r.index_count as u64;
            let covered: u64 = self
                .clusters_at(level as u32)
                .filter(|(_, c)| c.index_offset >= r.first_index && c.index_offset as u64 + c.index_count() as u64 <= range_end)
                .map(|(_, c)| c.index_count() as u64)
                .sum();
            if covered != r.index_count as u64 || range_end > self.indices.len() as u64 {
                return bad(format!("level {} index range is not contiguous", level));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri_cluster(vertex_offset: u32, index_offset: u32, level: u32) -> Cluster {
        Cluster {
            vertex_offset,
            vertex_count: 3,
            index_offset,
            triangle_count: 1,
            lod_level: level,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_out_of_range_local_index() {
        let mesh = ClusteredMesh {
            vertices: vec![Vertex::default(); 3],
            indices: vec![0, 1, 3],
            clusters: vec![tri_cluster(0, 0, 0)],
            ..Default::default()
        };
        assert!(matches!(mesh.validate(), Err(BuildError::InvalidMesh(_))));
    }

    #[test]
    fn rejects_index_ranges_past_u32() {
        for (index_offset, triangle_count) in [(u32::MAX - 1, 1), (0, u32::MAX / 2)] {
            let mesh = ClusteredMesh {
                vertices: vec![Vertex::default(); 3],
                indices: vec![0, 1, 2],
                clusters: vec![Cluster { index_offset, triangle_count, ..tri_cluster(0, 0, 0) }],
                ..Default::default()
            };
            let Err(BuildError::InvalidMesh(msg)) = mesh.validate() else { panic!("accepted {}", index_offset) };
            assert!(msg.contains("overflows"), "{}", msg);
        }
    }

    #[test]
    fn lod_ranges_cover_each_level() {
        let mut mesh = ClusteredMesh {
            vertices: vec![Vertex::default(); 9],
            indices: vec![0, 1, 2, 0, 1, 2, 0, 1, 2],
            clusters: vec![tri_cluster(0, 0, 0), tri_cluster(3, 3, 0), tri_cluster(6, 6, 1)],
            children: vec![0, 1],
            max_lod_level: 1,
            ..Default::default()
        };
        mesh.clusters[2].lod_error = 0.5;
        mesh.clusters[2].child_count = 2;
        for c in 0..2 {
            mesh.clusters[c].parent_index = 2;
            mesh.clusters[c].parent_error = 0.5;
        }
        mesh.validate().unwrap();
        let ranges = mesh.lod_ranges();
        assert_eq!(ranges[0], LodRange { first_index: 0, index_count: 6, cluster_count: 2, max_error: 0.0 });
        assert_eq!(ranges[1], LodRange { first_index: 6, index_count: 3, cluster_count: 1, max_error: 0.5 });
    }
}
