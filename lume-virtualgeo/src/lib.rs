use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod culling;
pub mod processor;
pub mod renderer;
mod util;

pub use processor::{build_dag, cluster_mesh, process_mesh, BuildError, BuildStats, ClusterOptions, ClusteredMesh, DagOptions, LodRange};
pub use renderer::{
    CullSettings, DebugMode, InstanceId, MeshId, VirtualGeoConfig, VirtualGeoError, VirtualGeoRenderer, VirtualGeoResult,
    VirtualGeoStats,
};

/// Parent sentinel for DAG roots.
pub const NO_PARENT: u32 = u32::MAX;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, normal, uv }
    }
}

/// One node of the cluster DAG, laid out identically in memory, on disk and in
/// the device's cluster buffer (128 bytes, every vec4 16-byte aligned).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Cluster {
    /// xyz center, w radius.
    pub bounding_sphere: [f32; 4],
    pub aabb_min: [f32; 3],
    pub lod_error: f32,
    pub aabb_max: [f32; 3],
    /// `f32::MAX` for roots.
    pub parent_error: f32,
    /// Sphere `lod_error` is projected with. Encloses every child's `lod_bounds`.
    pub lod_bounds: [f32; 4],
    /// The parent's `lod_bounds`, copied so the test needs no second fetch.
    pub parent_bounds: [f32; 4],

    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub triangle_count: u32,

    pub lod_level: u32,
    pub material_index: u32,
    pub flags: u32,
    pub parent_index: u32,

    pub child_offset: u32,
    pub child_count: u32,
    pub group_index: u32,
    pub _padding: u32,
}

impl Cluster {
    pub const FLAG_LEAF: u32 = 1 << 0;
    pub const FLAG_ROOT: u32 = 1 << 1;
    pub const FLAG_DEBUG_COLOR: u32 = 1 << 2;

    pub fn is_root(&self) -> bool {
        self.parent_index == NO_PARENT
    }

    pub fn index_count(&self) -> u32 {
        self.triangle_count.saturating_mul(3)
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            parent_error: f32::MAX,
            parent_index: NO_PARENT,
            ..Zeroable::zeroed()
        }
    }
}
