use bytemuck::{Pod, Zeroable};
use log::{debug, warn};
use std::collections::HashMap;

use lume_core::device::*;
use lume_core::LumeResult;

use super::hiz::DepthPyramid;
use super::pipelines::Pipelines;
use super::{MeshId, VirtualGeoConfig};
use crate::culling::{DrawIndexedIndirect, InstanceData, VisibleCluster};
use crate::processor::{ClusteredMesh, LodRange};
use crate::{Cluster, Vertex, NO_PARENT};

/// Uniform block of the draw pass (96 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DrawUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub debug_mode: u32,
    pub _padding: [u32; 3],
}

pub const DRAW_MODE_CLUSTERS: u32 = 0;
pub const DRAW_MODE_MESH: u32 = 1;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub mode: u32,
    pub lod_level: u32,
    pub _padding: [u32; 2],
}

pub(crate) fn create_buffer<D: Device>(device: &D, size: u64, usage: BufferUsage) -> LumeResult<D::Buffer> {
    device.create_buffer(BufferDescriptor { size: size.max(4), usage, mapped_at_creation: false })
}

pub(crate) fn create_buffer_init<D: Device>(device: &D, data: &[u8], usage: BufferUsage) -> LumeResult<D::Buffer> {
    let buffer = device.create_buffer(BufferDescriptor {
        size: (data.len() as u64).max(4),
        usage: usage | BufferUsage::COPY_DST,
        mapped_at_creation: true,
    })?;
    buffer.write_data(0, data)?;
    Ok(buffer)
}

/// One uploaded mesh: its own device buffers for the direct path plus the source
/// arrays the merged buffers are rebuilt from.
pub(crate) struct GpuMesh<D: Device> {
    pub vertex_buffer: D::Buffer,
    pub index_buffer: D::Buffer,
    pub cluster_buffer: D::Buffer,
    pub vertices: Vec<Vertex>,
    /// Rebased to mesh-global vertex ids.
    pub indices: Vec<u32>,
    pub clusters: Vec<Cluster>,
    pub lod_ranges: Vec<LodRange>,
    pub max_lod_level: u32,
    pub bounding_sphere: [f32; 4],
}

impl<D: Device> GpuMesh<D> {
    pub fn upload(device: &D, mesh: &ClusteredMesh) -> LumeResult<Self> {
        let mut indices = mesh.indices.clone();
        for c in &mesh.clusters {
            let range = c.index_offset as usize..(c.index_offset + c.index_count()) as usize;
            for i in &mut indices[range] {
                *i += c.vertex_offset;
            }
        }

        let vertex_buffer = create_buffer_init(device, bytemuck::cast_slice(&mesh.vertices), BufferUsage::VERTEX | BufferUsage::STORAGE)?;
        let index_buffer = create_buffer_init(device, bytemuck::cast_slice(&indices), BufferUsage::INDEX)?;
        let cluster_buffer = create_buffer_init(device, bytemuck::cast_slice(&mesh.clusters), BufferUsage::STORAGE)?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            cluster_buffer,
            vertices: mesh.vertices.clone(),
            indices,
            clusters: mesh.clusters.clone(),
            lod_ranges: mesh.lod_ranges(),
            max_lod_level: mesh.max_lod_level,
            bounding_sphere: mesh.bounding_sphere,
        })
    }
}

/// Where one mesh landed in the merged buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct MeshRange {
    pub cluster_start: u32,
    /// Resident clusters; less than the mesh has when the cluster ceiling cut it.
    pub cluster_count: u32,
    pub vertex_base: u32,
    pub index_base: u32,
}

/// Every mesh's geometry concatenated into shared buffers for the single
/// indirect draw. The cluster table lives in a fixed buffer of `max_clusters`
/// records owned by the renderer.
pub(crate) struct MergedGeometry<D: Device> {
    pub vertex_buffer: Option<D::Buffer>,
    pub index_buffer: Option<D::Buffer>,
    pub ranges: HashMap<MeshId, MeshRange>,
    pub resident_clusters: u32,
    pub dirty: bool,
}

impl<D: Device> Default for MergedGeometry<D> {
    fn default() -> Self {
        Self { vertex_buffer: None, index_buffer: None, ranges: HashMap::new(), resident_clusters: 0, dirty: true }
    }
}

/// Returns a buffer of at least `bytes`, reusing `current` when it is large enough.
fn ensure_capacity<D: Device>(device: &D, current: Option<D::Buffer>, bytes: u64, usage: BufferUsage) -> LumeResult<D::Buffer> {
    match current {
        Some(buffer) if buffer.size() >= bytes => Ok(buffer),
        _ => create_buffer(device, bytes.next_power_of_two(), usage | BufferUsage::COPY_DST),
    }
}

impl<D: Device> MergedGeometry<D> {
    /// Concatenates `meshes` in order. Clusters past `cluster_buffer`'s capacity are
    /// dropped; the number dropped is returned.
    pub fn rebuild<'a>(
        &mut self,
        device: &D,
        cluster_buffer: &D::Buffer,
        max_clusters: u32,
        meshes: impl Iterator<Item = (MeshId, &'a GpuMesh<D>)>,
    ) -> LumeResult<u32>
    where
        D: 'a,
    {
        let mut vertices: Vec<Vertex> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let mut clusters: Vec<Cluster> = Vec::new();
        let mut ranges = HashMap::new();
        let mut truncated = 0u32;

        for (id, mesh) in meshes {
            let vertex_base = vertices.len() as u32;
            let index_base = indices.len() as u32;
            let cluster_start = clusters.len() as u32;
            let room = max_clusters.saturating_sub(cluster_start) as usize;
            let resident = mesh.clusters.len().min(room);
            truncated += (mesh.clusters.len() - resident) as u32;

            vertices.extend_from_slice(&mesh.vertices);
            indices.extend(mesh.indices.iter().map(|i| i + vertex_base));
            clusters.extend(mesh.clusters[..resident].iter().map(|c| {
                let mut c = *c;
                c.vertex_offset += vertex_base;
                c.index_offset += index_base;
                if c.parent_index != NO_PARENT {
                    c.parent_index += cluster_start;
                }
                c
            }));
            ranges.insert(id, MeshRange { cluster_start, cluster_count: resident as u32, vertex_base, index_base });
        }

        if !vertices.is_empty() {
            let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
            let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
            let vb = ensure_capacity(device, self.vertex_buffer.take(), vertex_bytes.len() as u64, BufferUsage::VERTEX)?;
            let ib = ensure_capacity(device, self.index_buffer.take(), index_bytes.len() as u64, BufferUsage::INDEX)?;
            vb.write_data(0, vertex_bytes)?;
            ib.write_data(0, index_bytes)?;
            self.vertex_buffer = Some(vb);
            self.index_buffer = Some(ib);
        }
        if !clusters.is_empty() {
            cluster_buffer.write_data(0, bytemuck::cast_slice(&clusters))?;
        }

        debug!(
            "merged {} meshes: {} vertices, {} indices, {} clusters resident",
            ranges.len(),
            vertices.len(),
            indices.len(),
            clusters.len()
        );
        self.ranges = ranges;
        self.resident_clusters = clusters.len() as u32;
        self.dirty = false;
        Ok(truncated)
    }

    /// Buffers to bind for the indirect draw, if anything is resident.
    pub fn bindable(&self) -> Option<(&D::Buffer, &D::Buffer)> {
        if self.resident_clusters == 0 {
            return None;
        }
        Some((self.vertex_buffer.as_ref()?, self.index_buffer.as_ref()?))
    }
}

/// Resources one in-flight frame writes. Frame `F` uses context `F % N`.
pub(crate) struct FrameContext<D: Device> {
    pub indirect_buffer: D::Buffer,
    pub count_buffer: D::Buffer,
    pub visible_buffer: D::Buffer,
    pub draw_bind_group: D::BindGroup,
    pub pyramid: DepthPyramid<D>,
    /// The cull pass ran, so `count_buffer` holds this context's draw count.
    pub culled: bool,
    /// Frame whose depth the pyramid holds.
    pub hiz_frame: Option<u64>,
}

impl<D: Device> FrameContext<D> {
    pub fn new(
        device: &D,
        pipelines: &Pipelines<D>,
        config: &VirtualGeoConfig,
        draw_uniforms: &D::Buffer,
        instance_buffer: &D::Buffer,
        cluster_buffer: &D::Buffer,
    ) -> LumeResult<Self> {
        let max_draws = config.max_draws as u64;
        let indirect_buffer = create_buffer(
            device,
            max_draws * std::mem::size_of::<DrawIndexedIndirect>() as u64,
            BufferUsage::STORAGE | BufferUsage::INDIRECT,
        )?;
        let count_buffer = create_buffer(
            device,
            4,
            BufferUsage::STORAGE | BufferUsage::INDIRECT | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
        )?;
        let visible_buffer = create_buffer(device, max_draws * std::mem::size_of::<VisibleCluster>() as u64, BufferUsage::STORAGE)?;

        let draw_bind_group = device.create_bind_group(BindGroupDescriptor {
            layout: &pipelines.draw_bind_group_layout,
            entries: vec![
                BindGroupEntry { binding: 0, resource: BindingResource::Buffer(draw_uniforms) },
                BindGroupEntry { binding: 1, resource: BindingResource::Buffer(instance_buffer) },
                BindGroupEntry { binding: 2, resource: BindingResource::Buffer(cluster_buffer) },
                BindGroupEntry { binding: 3, resource: BindingResource::Buffer(&visible_buffer) },
            ],
        })?;

        let pyramid = DepthPyramid::new(device, pipelines, config.viewport_width, config.viewport_height)?;

        Ok(Self { indirect_buffer, count_buffer, visible_buffer, draw_bind_group, pyramid, culled: false, hiz_frame: None })
    }

    /// Reads the draw count the cull pass left in this context. Returns 0 if the
    /// pass never ran or the read fails.
    pub fn read_draw_count(&self) -> u32 {
        if !self.culled {
            return 0;
        }
        let mut bytes = [0u8; 4];
        match self.count_buffer.read_data(0, &mut bytes) {
            Ok(()) => u32::from_le_bytes(bytes),
            Err(e) => {
                warn!("draw count readback failed: {}", e);
                0
            }
        }
    }
}

/// Cull pass bindings of one context. Binding 6 is the pyramid of the context
/// that ran the frame before.
pub(crate) fn create_cull_bind_group<D: Device>(
    device: &D,
    pipelines: &Pipelines<D>,
    uniforms: &D::Buffer,
    cluster_buffer: &D::Buffer,
    instance_buffer: &D::Buffer,
    frame: &FrameContext<D>,
    previous_pyramid: &DepthPyramid<D>,
) -> LumeResult<D::BindGroup> {
    device.create_bind_group(BindGroupDescriptor {
        layout: &pipelines.cull_bind_group_layout,
        entries: vec![
            BindGroupEntry { binding: 0, resource: BindingResource::Buffer(uniforms) },
            BindGroupEntry { binding: 1, resource: BindingResource::Buffer(cluster_buffer) },
            BindGroupEntry { binding: 2, resource: BindingResource::Buffer(instance_buffer) },
            BindGroupEntry { binding: 3, resource: BindingResource::Buffer(&frame.indirect_buffer) },
            BindGroupEntry { binding: 4, resource: BindingResource::Buffer(&frame.count_buffer) },
            BindGroupEntry { binding: 5, resource: BindingResource::Buffer(&frame.visible_buffer) },
            BindGroupEntry { binding: 6, resource: BindingResource::TextureView(&previous_pyramid.full_view) },
        ],
    })
}

pub(crate) const INSTANCE_STRIDE: u64 = std::mem::size_of::<InstanceData>() as u64;
