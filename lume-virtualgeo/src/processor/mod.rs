//! Offline build pipeline: partition a mesh into clusters, then stack coarser
//! LOD levels on top of them.

pub mod builder;
pub mod dag;
pub mod partitioner;
pub mod simplifier;
pub mod types;

pub use builder::cluster_mesh;
pub use dag::build_dag;
pub use types::*;

/// Clusters a mesh and builds its full LOD hierarchy in one go.
pub fn process_mesh(vertices: &[crate::Vertex], indices: &[u32], options: &ClusterOptions) -> Result<ClusteredMesh, BuildError> {
    let mut mesh = cluster_mesh(vertices, indices, options)?;
    build_dag(&mut mesh, &DagOptions::from(options));
    Ok(mesh)
}
