use meshopt::{simplify_scale, simplify_with_attributes_and_locks, SimplifyOptions, VertexDataAdapter};
use std::mem::{offset_of, size_of};

use crate::Vertex;

/// Weight of each normal component against the (unit-scaled) position error.
const NORMAL_WEIGHT: f32 = 0.5;

pub struct SimplifiedMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// Object-space deviation of the simplified surface from the input.
    pub error: f32,
}

impl SimplifiedMesh {
    fn unchanged(vertices: &[Vertex], indices: &[u32]) -> Self {
        Self { vertices: vertices.to_vec(), indices: indices.to_vec(), error: 0.0 }
    }
}

/// Simplifies a welded group mesh towards `target_triangles`.
///
/// Vertices on the group's open border and every `locked` vertex stay where they
/// are. When the input cannot be reduced, or a locked vertex would lose all of
/// its triangles, the input comes back unchanged with zero error.
pub fn simplify_group(vertices: &[Vertex], indices: &[u32], locked: &[bool], target_triangles: usize) -> SimplifiedMesh {
    let target_indices = target_triangles.max(1) * 3;
    if indices.len() <= target_indices || locked.len() != vertices.len() {
        return SimplifiedMesh::unchanged(vertices, indices);
    }
    let Ok(adapter) = VertexDataAdapter::new(bytemuck::cast_slice(vertices), size_of::<Vertex>(), offset_of!(Vertex, position))
    else {
        return SimplifiedMesh::unchanged(vertices, indices);
    };

    let normals: Vec<f32> = vertices.iter().flat_map(|v| v.normal).collect();
    let mut relative_error = 0.0f32;
    let simplified = simplify_with_attributes_and_locks(
        indices,
        &adapter,
        &normals,
        &[NORMAL_WEIGHT; 3],
        3 * size_of::<f32>(),
        locked,
        target_indices,
        f32::MAX,
        SimplifyOptions::LockBorder,
        Some(&mut relative_error),
    );
    if simplified.is_empty() || simplified.len() >= indices.len() {
        return SimplifiedMesh::unchanged(vertices, indices);
    }

    let mut remap = vec![u32::MAX; vertices.len()];
    let mut out_vertices = Vec::new();
    let out_indices: Vec<u32> = simplified
        .iter()
        .map(|&v| {
            let slot = &mut remap[v as usize];
            if *slot == u32::MAX {
                *slot = out_vertices.len() as u32;
                out_vertices.push(vertices[v as usize]);
            }
            *slot
        })
        .collect();

    // A dropped locked vertex would open a crack against the neighbouring group.
    if locked.iter().zip(&remap).any(|(&l, &r)| l && r == u32::MAX) {
        return SimplifiedMesh::unchanged(vertices, indices);
    }

    SimplifiedMesh {
        vertices: out_vertices,
        indices: out_indices,
        error: relative_error * simplify_scale(&adapter),
    }
}
