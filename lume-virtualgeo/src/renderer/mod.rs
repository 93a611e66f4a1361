//! Runtime half of the subsystem: device-resident cluster geometry, an instance
//! table, and the per-frame cull and draw passes.
//!
//! A frame runs `begin_frame`, `dispatch_culling`, `draw`, optionally
//! `build_depth_pyramid` once the depth buffer is final, then `end_frame`. Mesh
//! and instance tables may only change outside that window.

mod arena;
mod config;
mod hiz;
mod pipelines;
mod resources;

use std::fmt;

use glam::{Mat4, Vec3};
use log::{debug, error, info, warn};

use lume_core::device::*;
use lume_core::LumeError;

pub use arena::{Arena, Handle};
pub use config::{CullSettings, DebugMode, VirtualGeoConfig};
pub use pipelines::{CULL_WGSL, CULL_WORKGROUP_SIZE, DRAW_WGSL, HIZ_WGSL};
pub use resources::{DrawPushConstants, DrawUniforms, DRAW_MODE_CLUSTERS, DRAW_MODE_MESH};

use crate::culling::{self, CullPushConstants, CullUniforms, DrawIndexedIndirect, InstanceData};
use crate::processor::ClusteredMesh;
use pipelines::Pipelines;
use resources::{create_buffer, create_cull_bind_group, FrameContext, GpuMesh, MergedGeometry, INSTANCE_STRIDE};

/// Marker for [`MeshId`].
#[derive(Debug)]
pub enum MeshMarker {}

/// Marker for [`InstanceId`].
#[derive(Debug)]
pub enum InstanceMarker {}

pub type MeshId = Handle<MeshMarker>;
pub type InstanceId = Handle<InstanceMarker>;

#[derive(Debug, Clone, PartialEq)]
pub enum VirtualGeoError {
    /// Initialization failed; the renderer draws nothing.
    NotInitialized,
    UnknownMesh(MeshId),
    UnknownInstance(InstanceId),
    InvalidMesh(String),
    InvalidConfig(String),
    CapacityExceeded { what: &'static str, limit: u32 },
    /// Mesh and instance tables are frozen between `begin_frame` and `end_frame`.
    FrameInProgress,
    FrameNotStarted,
    Device(LumeError),
}

impl fmt::Display for VirtualGeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtualGeoError::NotInitialized => write!(f, "virtual geometry renderer is not initialized"),
            VirtualGeoError::UnknownMesh(id) => write!(f, "unknown mesh {:?}", id),
            VirtualGeoError::UnknownInstance(id) => write!(f, "unknown instance {:?}", id),
            VirtualGeoError::InvalidMesh(msg) => write!(f, "invalid mesh: {}", msg),
            VirtualGeoError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            VirtualGeoError::CapacityExceeded { what, limit } => write!(f, "{} capacity of {} exceeded", what, limit),
            VirtualGeoError::FrameInProgress => write!(f, "tables cannot change while a frame is in progress"),
            VirtualGeoError::FrameNotStarted => write!(f, "no frame in progress"),
            VirtualGeoError::Device(e) => write!(f, "device error: {}", e),
        }
    }
}

impl std::error::Error for VirtualGeoError {}

impl From<LumeError> for VirtualGeoError {
    fn from(e: LumeError) -> Self {
        VirtualGeoError::Device(e)
    }
}

pub type VirtualGeoResult<T> = Result<T, VirtualGeoError>;

/// Read-only counters for external display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtualGeoStats {
    pub mesh_count: u32,
    pub instance_count: u32,
    /// Clusters across every uploaded mesh, resident or not.
    pub total_clusters: u32,
    /// GPU-driven: clusters the previous frame's cull pass emitted. Direct: the
    /// clusters of the levels drawn this frame.
    pub visible_clusters: u32,
    pub draw_calls: u32,
    pub max_lod_level: u32,
    /// Clusters left out of the merged buffers by `max_clusters`.
    pub cluster_overflow: u64,
    /// `add_instance` calls refused by `max_instances`.
    pub instance_overflow: u64,
    /// Cull pass survivors with no room below `max_draws`.
    pub draw_overflow: u64,
    /// Instances whose mesh has been removed, counted per cull or draw pass.
    pub skipped_instances: u64,
    pub frame_index: u64,
}

struct InstanceRecord {
    mesh: MeshId,
    data: InstanceData,
}

/// Device objects created at initialization. Absent if any of them failed.
struct GpuState<D: Device> {
    pipelines: Pipelines<D>,
    uniform_buffer: D::Buffer,
    draw_uniform_buffer: D::Buffer,
    instance_buffer: D::Buffer,
    cluster_buffer: D::Buffer,
    frames: Vec<FrameContext<D>>,
    /// `cull_bind_groups[i]` writes context `i` and samples the pyramid of the
    /// context before it.
    cull_bind_groups: Vec<D::BindGroup>,
    merged: MergedGeometry<D>,
}

impl<D: Device> GpuState<D> {
    fn new(device: &D, config: &VirtualGeoConfig) -> VirtualGeoResult<Self> {
        if config.max_clusters == 0 || config.max_instances == 0 || config.max_draws == 0 {
            return Err(VirtualGeoError::InvalidConfig("capacities must be nonzero".into()));
        }
        if config.frames_in_flight == 0 || config.viewport_width == 0 || config.viewport_height == 0 {
            return Err(VirtualGeoError::InvalidConfig("frames in flight and viewport must be nonzero".into()));
        }

        let pipelines = Pipelines::new(device, config)?;
        let uniform_buffer = create_buffer(
            device,
            std::mem::size_of::<CullUniforms>() as u64,
            BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        )?;
        let draw_uniform_buffer = create_buffer(
            device,
            std::mem::size_of::<DrawUniforms>() as u64,
            BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        )?;
        let instance_buffer = create_buffer(
            device,
            config.max_instances as u64 * INSTANCE_STRIDE,
            BufferUsage::STORAGE | BufferUsage::COPY_DST,
        )?;
        let cluster_buffer = create_buffer(
            device,
            config.max_clusters as u64 * std::mem::size_of::<crate::Cluster>() as u64,
            BufferUsage::STORAGE | BufferUsage::COPY_DST,
        )?;

        let frames = (0..config.frames_in_flight)
            .map(|_| FrameContext::new(device, &pipelines, config, &draw_uniform_buffer, &instance_buffer, &cluster_buffer))
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = Self {
            pipelines,
            uniform_buffer,
            draw_uniform_buffer,
            instance_buffer,
            cluster_buffer,
            frames,
            cull_bind_groups: Vec::new(),
            merged: MergedGeometry::default(),
        };
        state.rebuild_cull_bind_groups(device)?;
        Ok(state)
    }

    fn rebuild_cull_bind_groups(&mut self, device: &D) -> VirtualGeoResult<()> {
        let n = self.frames.len();
        self.cull_bind_groups = (0..n)
            .map(|i| {
                create_cull_bind_group(
                    device,
                    &self.pipelines,
                    &self.uniform_buffer,
                    &self.cluster_buffer,
                    &self.instance_buffer,
                    &self.frames[i],
                    &self.frames[(i + n - 1) % n].pyramid,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }
}

/// GPU-driven renderer for clustered meshes.
pub struct VirtualGeoRenderer<D: Device> {
    device: D,
    config: VirtualGeoConfig,
    settings: CullSettings,
    gpu: Option<GpuState<D>>,
    meshes: Arena<GpuMesh<D>, MeshMarker>,
    instances: Arena<InstanceRecord, InstanceMarker>,
    /// Frames begun so far; the frame in progress is `frames_begun - 1`.
    frames_begun: u64,
    frame_open: bool,
    /// Path chosen at `begin_frame`; settings edits mid-frame wait for the next one.
    frame_gpu_driven: bool,
    viewport: [u32; 2],
    uniforms: Option<CullUniforms>,
    stats: VirtualGeoStats,
    capacity_warned: bool,
}

impl<D: Device> VirtualGeoRenderer<D> {
    /// Creates the device resources. Failure leaves the renderer uninitialized: it
    /// logs the error and then ignores every frame call.
    pub fn new(device: D, config: VirtualGeoConfig) -> Self {
        let gpu = match GpuState::new(&device, &config) {
            Ok(state) => {
                info!(
                    "virtual geometry initialized: {} clusters, {} instances, {} draws, {} frames in flight",
                    config.max_clusters, config.max_instances, config.max_draws, config.frames_in_flight
                );
                Some(state)
            }
            Err(e) => {
                error!("virtual geometry disabled: {}", e);
                None
            }
        };
        Self {
            device,
            settings: config.cull.clone(),
            viewport: [config.viewport_width, config.viewport_height],
            config,
            gpu,
            meshes: Arena::new(),
            instances: Arena::new(),
            frames_begun: 0,
            frame_open: false,
            frame_gpu_driven: true,
            uniforms: None,
            stats: VirtualGeoStats::default(),
            capacity_warned: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn config(&self) -> &VirtualGeoConfig {
        &self.config
    }

    pub fn settings(&self) -> &CullSettings {
        &self.settings
    }

    /// Applied at the next `begin_frame`.
    pub fn settings_mut(&mut self) -> &mut CullSettings {
        &mut self.settings
    }

    pub fn stats(&self) -> VirtualGeoStats {
        let mut stats = self.stats;
        stats.mesh_count = self.meshes.len() as u32;
        stats.instance_count = self.instances.len() as u32;
        stats.total_clusters = self.meshes.iter().map(|(_, m)| m.clusters.len() as u32).sum();
        stats.max_lod_level = self.meshes.iter().map(|(_, m)| m.max_lod_level).max().unwrap_or(0);
        stats
    }

    /// Uniform block written by the last `begin_frame`.
    pub fn cull_uniforms(&self) -> Option<&CullUniforms> {
        self.uniforms.as_ref()
    }

    pub fn viewport(&self) -> [u32; 2] {
        self.viewport
    }

    fn check_mutable(&self) -> VirtualGeoResult<()> {
        if self.gpu.is_none() {
            return Err(VirtualGeoError::NotInitialized);
        }
        if self.frame_open {
            return Err(VirtualGeoError::FrameInProgress);
        }
        Ok(())
    }

    fn mark_geometry_dirty(&mut self) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.merged.dirty = true;
        }
    }

    /// Uploads a validated clustered mesh. Merged buffers are rebuilt at the next
    /// `begin_frame`.
    pub fn upload_clustered_mesh(&mut self, mesh: &ClusteredMesh) -> VirtualGeoResult<MeshId> {
        self.check_mutable()?;
        if mesh.clusters.is_empty() {
            return Err(VirtualGeoError::InvalidMesh("mesh has no clusters".into()));
        }
        mesh.validate().map_err(|e| VirtualGeoError::InvalidMesh(e.to_string()))?;

        let gpu_mesh = GpuMesh::upload(&self.device, mesh)?;
        let id = self.meshes.insert(gpu_mesh);
        self.mark_geometry_dirty();
        debug!(
            "uploaded mesh {:?}: {} clusters, {} triangles, max LOD {}",
            id,
            mesh.clusters.len(),
            mesh.triangle_count(),
            mesh.max_lod_level
        );
        Ok(id)
    }

    /// Instances of the mesh stay in the table and are skipped until removed.
    pub fn remove_clustered_mesh(&mut self, id: MeshId) -> VirtualGeoResult<()> {
        self.check_mutable()?;
        self.meshes.remove(id).ok_or(VirtualGeoError::UnknownMesh(id))?;
        self.mark_geometry_dirty();
        Ok(())
    }

    pub fn add_instance(&mut self, mesh: MeshId, transform: Mat4) -> VirtualGeoResult<InstanceId> {
        self.check_mutable()?;
        if !self.meshes.contains(mesh) {
            return Err(VirtualGeoError::UnknownMesh(mesh));
        }
        if self.instances.len() >= self.config.max_instances as usize {
            self.stats.instance_overflow += 1;
            if !self.capacity_warned {
                warn!("instance capacity {} reached; further instances are refused", self.config.max_instances);
                self.capacity_warned = true;
            }
            return Err(VirtualGeoError::CapacityExceeded { what: "instance", limit: self.config.max_instances });
        }

        let data = InstanceData::new(transform, mesh.index());
        let id = self.instances.insert(InstanceRecord { mesh, data });
        self.write_instance(id.index(), &data)?;
        Ok(id)
    }

    pub fn update_instance(&mut self, id: InstanceId, transform: Mat4) -> VirtualGeoResult<()> {
        self.check_mutable()?;
        let record = self.instances.get_mut(id).ok_or(VirtualGeoError::UnknownInstance(id))?;
        record.data = InstanceData::new(transform, record.mesh.index());
        let data = record.data;
        self.write_instance(id.index(), &data)
    }

    pub fn remove_instance(&mut self, id: InstanceId) -> VirtualGeoResult<()> {
        self.check_mutable()?;
        self.instances.remove(id).ok_or(VirtualGeoError::UnknownInstance(id))?;
        Ok(())
    }

    fn write_instance(&self, slot: u32, data: &InstanceData) -> VirtualGeoResult<()> {
        let gpu = self.gpu.as_ref().ok_or(VirtualGeoError::NotInitialized)?;
        gpu.instance_buffer.write_data(slot as u64 * INSTANCE_STRIDE, bytemuck::bytes_of(data))?;
        Ok(())
    }

    fn current_context(&self) -> usize {
        let n = self.gpu.as_ref().map_or(1, |g| g.frames.len()) as u64;
        (self.frames_begun.saturating_sub(1) % n) as usize
    }

    /// Starts a frame: collects the previous frame's cull results, advances the
    /// frame ring, rebuilds merged geometry if needed and writes the uniforms.
    pub fn begin_frame(&mut self, view: Mat4, proj: Mat4, camera_position: Vec3) -> VirtualGeoResult<()> {
        if self.frame_open {
            return Err(VirtualGeoError::FrameInProgress);
        }
        let Some(gpu) = self.gpu.as_mut() else {
            return Err(VirtualGeoError::NotInitialized);
        };
        let n = gpu.frames.len() as u64;

        if self.frames_begun > 0 {
            let previous = &gpu.frames[((self.frames_begun - 1) % n) as usize];
            if previous.culled {
                let count = previous.read_draw_count();
                let max_draws = self.config.max_draws;
                self.stats.visible_clusters = count.min(max_draws);
                if count > max_draws {
                    self.stats.draw_overflow += (count - max_draws) as u64;
                    warn!("cull pass produced {} draws, {} fit below the draw capacity", count, max_draws);
                }
            }
        }

        let frame = self.frames_begun;
        self.frames_begun += 1;
        self.stats.frame_index = frame;
        self.capacity_warned = false;
        let current = (frame % n) as usize;
        gpu.frames[current].culled = false;

        if gpu.merged.dirty {
            let max_clusters = self.config.max_clusters;
            match gpu.merged.rebuild(&self.device, &gpu.cluster_buffer, max_clusters, self.meshes.iter()) {
                Ok(0) => {}
                Ok(truncated) => {
                    self.stats.cluster_overflow += truncated as u64;
                    warn!("cluster capacity {} exceeded; {} clusters left out", max_clusters, truncated);
                }
                Err(e) => {
                    error!("merged geometry rebuild failed: {}", e);
                    gpu.merged.dirty = true;
                }
            }
        }

        let mut uniforms = CullUniforms::new(view, proj, camera_position, self.viewport, &self.settings, self.config.max_draws);
        let previous = &gpu.frames[((frame + n - 1) % n) as usize];
        if frame > 0 && previous.hiz_frame == Some(frame - 1) {
            let pyramid = &previous.pyramid;
            uniforms = uniforms.with_hiz(pyramid.width, pyramid.height, pyramid.mip_count);
        }
        gpu.uniform_buffer.write_data(0, bytemuck::bytes_of(&uniforms))?;

        let draw_uniforms = DrawUniforms {
            view_proj: uniforms.view_proj,
            camera_position: uniforms.camera_position,
            debug_mode: self.settings.debug_mode.as_u32(),
            _padding: [0; 3],
        };
        gpu.draw_uniform_buffer.write_data(0, bytemuck::bytes_of(&draw_uniforms))?;

        self.uniforms = Some(uniforms);
        self.frame_gpu_driven = self.settings.gpu_driven;
        self.frame_open = true;
        Ok(())
    }

    fn count_skipped_instances(&mut self) {
        let skipped = self.instances.iter().filter(|(_, r)| !self.meshes.contains(r.mesh)).count();
        self.stats.skipped_instances += skipped as u64;
    }

    /// Records the cull pass of the current frame. Does nothing on the direct path.
    pub fn dispatch_culling(&mut self, cmd: &mut D::CommandBuffer) -> VirtualGeoResult<()> {
        if !self.frame_open {
            return Err(VirtualGeoError::FrameNotStarted);
        }
        if !self.frame_gpu_driven {
            return Ok(());
        }
        let current = self.current_context();
        let Some(gpu) = self.gpu.as_mut() else {
            return Err(VirtualGeoError::NotInitialized);
        };
        let frame = &gpu.frames[current];

        cmd.fill_buffer(&frame.count_buffer, 0, 4, 0);
        cmd.pipeline_barrier(PipelineStage::TRANSFER, PipelineStage::COMPUTE_SHADER);
        cmd.bind_compute_pipeline(&gpu.pipelines.cull);
        cmd.bind_bind_group(0, &gpu.cull_bind_groups[current]);

        let mut dispatches = 0u32;
        for (mesh_id, mesh) in self.meshes.iter() {
            let Some(range) = gpu.merged.ranges.get(&mesh_id) else { continue };
            if range.cluster_count == 0 {
                continue;
            }
            for (instance_id, _) in self.instances.iter().filter(|(_, r)| r.mesh == mesh_id) {
                let push = CullPushConstants {
                    instance_index: instance_id.index(),
                    cluster_start: range.cluster_start,
                    cluster_count: range.cluster_count,
                    max_lod: mesh.max_lod_level,
                };
                cmd.push_constants(&gpu.pipelines.cull_layout, ShaderStage::COMPUTE, 0, bytemuck::bytes_of(&push));
                cmd.dispatch(range.cluster_count.div_ceil(CULL_WORKGROUP_SIZE), 1, 1);
                dispatches += 1;
            }
        }

        cmd.pipeline_barrier(
            PipelineStage::COMPUTE_SHADER,
            PipelineStage::DRAW_INDIRECT | PipelineStage::VERTEX_SHADER,
        );
        gpu.frames[current].culled = true;
        debug!("cull pass: {} dispatches into context {}", dispatches, current);
        self.count_skipped_instances();
        Ok(())
    }

    /// Records the draw of the current frame: one indirect draw on the GPU-driven
    /// path, one indexed draw per instance on the direct path.
    pub fn draw(&mut self, cmd: &mut D::CommandBuffer) -> VirtualGeoResult<()> {
        if !self.frame_open {
            return Err(VirtualGeoError::FrameNotStarted);
        }
        if self.frame_gpu_driven {
            self.draw_clusters(cmd)
        } else {
            self.draw_direct(cmd)
        }
    }

    fn draw_clusters(&mut self, cmd: &mut D::CommandBuffer) -> VirtualGeoResult<()> {
        let current = self.current_context();
        let gpu = self.gpu.as_ref().ok_or(VirtualGeoError::NotInitialized)?;
        let frame = &gpu.frames[current];
        let Some((vertex_buffer, index_buffer)) = gpu.merged.bindable() else {
            self.stats.draw_calls = 0;
            return Ok(());
        };
        if !frame.culled {
            warn!("draw recorded without a cull pass this frame; skipped");
            self.stats.draw_calls = 0;
            return Ok(());
        }

        cmd.bind_graphics_pipeline(&gpu.pipelines.draw);
        cmd.bind_bind_group(0, &frame.draw_bind_group);
        let push = DrawPushConstants { mode: DRAW_MODE_CLUSTERS, ..Default::default() };
        cmd.push_constants(
            &gpu.pipelines.draw_layout,
            ShaderStage::VERTEX | ShaderStage::FRAGMENT,
            0,
            bytemuck::bytes_of(&push),
        );
        cmd.bind_vertex_buffer(vertex_buffer);
        cmd.bind_index_buffer(index_buffer);
        cmd.draw_indexed_indirect_count(
            &frame.indirect_buffer,
            0,
            &frame.count_buffer,
            0,
            self.config.max_draws,
            std::mem::size_of::<DrawIndexedIndirect>() as u32,
        );
        self.stats.draw_calls = 1;
        Ok(())
    }

    fn draw_direct(&mut self, cmd: &mut D::CommandBuffer) -> VirtualGeoResult<()> {
        let current = self.current_context();
        let gpu = self.gpu.as_ref().ok_or(VirtualGeoError::NotInitialized)?;
        let uniforms = self.uniforms.ok_or(VirtualGeoError::FrameNotStarted)?;
        let frame = &gpu.frames[current];
        let planes = uniforms.frustum_planes.map(glam::Vec4::from_array);

        let mut draw_calls = 0u32;
        let mut visible_clusters = 0u32;
        let mut skipped = 0u64;
        let mut bound = false;

        for (instance_id, record) in self.instances.iter() {
            let Some(mesh) = self.meshes.get(record.mesh) else {
                skipped += 1;
                continue;
            };
            if uniforms.flags & culling::CULL_FRUSTUM != 0 {
                let (center, radius) =
                    culling::world_sphere(record.data.model(), record.data.max_scale, mesh.bounding_sphere);
                if !culling::sphere_in_frustum(&planes, center, radius) {
                    continue;
                }
            }
            let level = culling::select_mesh_lod(
                &mesh.lod_ranges,
                mesh.max_lod_level,
                mesh.bounding_sphere,
                &record.data,
                &uniforms,
            );
            let Some(range) = mesh.lod_ranges.get(level as usize).filter(|r| r.index_count > 0) else {
                continue;
            };

            if !bound {
                cmd.bind_graphics_pipeline(&gpu.pipelines.draw);
                cmd.bind_bind_group(0, &frame.draw_bind_group);
                bound = true;
            }
            let push = DrawPushConstants { mode: DRAW_MODE_MESH, lod_level: level, _padding: [0; 2] };
            cmd.push_constants(
                &gpu.pipelines.draw_layout,
                ShaderStage::VERTEX | ShaderStage::FRAGMENT,
                0,
                bytemuck::bytes_of(&push),
            );
            cmd.bind_vertex_buffer(&mesh.vertex_buffer);
            cmd.bind_index_buffer(&mesh.index_buffer);
            cmd.draw_indexed(range.index_count, 1, range.first_index, 0, instance_id.index());
            draw_calls += 1;
            visible_clusters += range.cluster_count;
        }

        self.stats.draw_calls = draw_calls;
        self.stats.visible_clusters = visible_clusters;
        self.stats.skipped_instances += skipped;
        Ok(())
    }

    /// Builds the current context's depth pyramid from this frame's finished depth
    /// buffer. The next frame's cull pass samples it. Skipped when occlusion culling
    /// is off or the depth target does not match the viewport.
    pub fn build_depth_pyramid(
        &mut self,
        cmd: &mut D::CommandBuffer,
        depth_texture: &D::Texture,
        depth_view: &D::TextureView,
    ) -> VirtualGeoResult<()> {
        if !self.frame_open {
            return Err(VirtualGeoError::FrameNotStarted);
        }
        if !self.settings.occlusion_culling || !self.frame_gpu_driven {
            return Ok(());
        }
        if [depth_texture.width(), depth_texture.height()] != self.viewport {
            warn!(
                "depth target is {}x{} but the viewport is {}x{}; call resize first",
                depth_texture.width(),
                depth_texture.height(),
                self.viewport[0],
                self.viewport[1]
            );
            return Ok(());
        }
        let current = self.current_context();
        let frame_index = self.frames_begun - 1;
        let gpu = self.gpu.as_mut().ok_or(VirtualGeoError::NotInitialized)?;
        let frame = &mut gpu.frames[current];
        frame.pyramid.record_build(&self.device, cmd, &gpu.pipelines, depth_texture, depth_view)?;
        frame.hiz_frame = Some(frame_index);
        Ok(())
    }

    pub fn end_frame(&mut self) -> VirtualGeoResult<()> {
        if !self.frame_open {
            return Err(VirtualGeoError::FrameNotStarted);
        }
        self.frame_open = false;
        Ok(())
    }

    /// Recreates the viewport-sized pyramids. Occlusion culling resumes once a
    /// pyramid of the new size has been built.
    pub fn resize(&mut self, width: u32, height: u32) -> VirtualGeoResult<()> {
        if self.frame_open {
            return Err(VirtualGeoError::FrameInProgress);
        }
        if width == 0 || height == 0 || [width, height] == self.viewport {
            return Ok(());
        }
        let gpu = self.gpu.as_mut().ok_or(VirtualGeoError::NotInitialized)?;
        for frame in &mut gpu.frames {
            frame.pyramid = hiz::DepthPyramid::new(&self.device, &gpu.pipelines, width, height)?;
            frame.hiz_frame = None;
        }
        gpu.rebuild_cull_bind_groups(&self.device)?;
        self.viewport = [width, height];
        info!("virtual geometry viewport resized to {}x{}", width, height);
        Ok(())
    }
}
