//! A CPU-only device that records command streams instead of executing them.
//!
//! Buffers are plain byte vectors. Every host write is bounds-checked and a rejected
//! write is counted, so callers can assert that nothing ever wrote past an allocation.
//! Transfer commands (`fill_buffer`, `copy_buffer_to_buffer`) are applied as they are
//! recorded; everything else is only logged into the command list for inspection.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::device::*;
use crate::{LumeError, LumeResult};

#[derive(Default)]
struct HeadlessShared {
    next_id: AtomicU64,
    buffers_created: AtomicUsize,
    bytes_allocated: AtomicU64,
    rejected_writes: AtomicUsize,
    /// Number of further buffer allocations allowed before they start failing.
    allocation_budget: Mutex<Option<usize>>,
}

impl HeadlessShared {
    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Clone, Default)]
pub struct HeadlessDevice {
    shared: Arc<HeadlessShared>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets the next `count` buffer allocations succeed and fails every one after them
    /// with `OutOfMemory`.
    pub fn fail_buffer_allocations_after(&self, count: usize) {
        if let Ok(mut budget) = self.shared.allocation_budget.lock() {
            *budget = Some(count);
        }
    }

    pub fn buffers_created(&self) -> usize {
        self.shared.buffers_created.load(Ordering::Relaxed)
    }

    pub fn bytes_allocated(&self) -> u64 {
        self.shared.bytes_allocated.load(Ordering::Relaxed)
    }

    /// Writes rejected for running past the end of their buffer.
    pub fn rejected_writes(&self) -> usize {
        self.shared.rejected_writes.load(Ordering::Relaxed)
    }

    pub fn create_command_buffer(&self) -> HeadlessCommandBuffer {
        HeadlessCommandBuffer { commands: Vec::new(), shared: self.shared.clone() }
    }
}

#[derive(Clone)]
pub struct HeadlessBuffer {
    id: u64,
    usage: BufferUsage,
    data: Arc<Mutex<Vec<u8>>>,
    shared: Arc<HeadlessShared>,
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Snapshot of the whole allocation.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().map(|d| d.clone()).unwrap_or_default()
    }

    fn check(&self, offset: u64, len: u64, size: u64) -> LumeResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => {
                self.shared.rejected_writes.fetch_add(1, Ordering::Relaxed);
                Err(LumeError::OutOfBounds { offset, len, size })
            }
        }
    }

    fn apply_fill(&self, offset: u64, size: u64, value: u32) -> LumeResult<()> {
        let mut data = self.data.lock().map_err(|_| LumeError::Generic("buffer lock poisoned"))?;
        let total = data.len() as u64;
        self.check(offset, size, total)?;
        let pattern = value.to_le_bytes();
        for (i, byte) in data[offset as usize..(offset + size) as usize].iter_mut().enumerate() {
            *byte = pattern[i % 4];
        }
        Ok(())
    }
}

impl fmt::Debug for HeadlessBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessBuffer").field("id", &self.id).field("size", &self.size()).finish()
    }
}

impl Buffer for HeadlessBuffer {
    fn size(&self) -> u64 {
        self.data.lock().map(|d| d.len() as u64).unwrap_or(0)
    }

    fn write_data(&self, offset: u64, data: &[u8]) -> LumeResult<()> {
        let mut bytes = self.data.lock().map_err(|_| LumeError::Generic("buffer lock poisoned"))?;
        let size = bytes.len() as u64;
        self.check(offset, data.len() as u64, size)?;
        bytes[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_data(&self, offset: u64, data: &mut [u8]) -> LumeResult<()> {
        let bytes = self.data.lock().map_err(|_| LumeError::Generic("buffer lock poisoned"))?;
        let size = bytes.len() as u64;
        if offset.checked_add(data.len() as u64).is_none_or(|end| end > size) {
            return Err(LumeError::OutOfBounds { offset, len: data.len() as u64, size });
        }
        data.copy_from_slice(&bytes[offset as usize..offset as usize + data.len()]);
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct HeadlessTexture {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
}

impl Texture for HeadlessTexture {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn mip_level_count(&self) -> u32 {
        self.mip_levels
    }
}

#[derive(Clone, Debug)]
pub struct HeadlessTextureView {
    pub texture_id: u64,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
}

impl TextureView for HeadlessTextureView {}

impl HeadlessDevice {
    /// Stand-in for a depth attachment owned by the caller's render loop.
    pub fn create_depth_target(&self, width: u32, height: u32) -> (HeadlessTexture, HeadlessTextureView) {
        let texture = HeadlessTexture {
            id: self.shared.id(),
            width,
            height,
            mip_levels: 1,
            format: TextureFormat::Depth32Float,
        };
        let view = HeadlessTextureView { texture_id: texture.id, base_mip_level: 0, mip_level_count: 1 };
        (texture, view)
    }
}

#[derive(Debug)]
pub struct HeadlessShaderModule {
    pub word_count: usize,
}
impl ShaderModule for HeadlessShaderModule {}

#[derive(Debug)]
pub struct HeadlessPipelineLayout {
    pub id: u64,
    pub push_constant_bytes: u32,
}
impl PipelineLayout for HeadlessPipelineLayout {}

#[derive(Debug)]
pub struct HeadlessPipeline {
    pub id: u64,
    pub entry_point: String,
}
impl GraphicsPipeline for HeadlessPipeline {}
impl ComputePipeline for HeadlessPipeline {}

#[derive(Debug)]
pub struct HeadlessBindGroupLayout {
    pub bindings: Vec<(u32, BindingType)>,
}
impl BindGroupLayout for HeadlessBindGroupLayout {}

#[derive(Debug)]
pub struct HeadlessBindGroup {
    pub id: u64,
    /// Buffers bound by binding slot, kept so tests can follow what a pass reads and writes.
    pub buffers: Vec<(u32, HeadlessBuffer)>,
}
impl BindGroup for HeadlessBindGroup {}

/// One recorded command.
#[derive(Debug, Clone)]
pub enum HeadlessCommand {
    BindGraphicsPipeline { id: u64 },
    BindComputePipeline { id: u64, entry_point: String },
    BindVertexBuffer { buffer: u64 },
    BindIndexBuffer { buffer: u64 },
    BindBindGroup { index: u32, id: u64 },
    PushConstants { layout: u64, offset: u32, data: Vec<u8> },
    Dispatch { x: u32, y: u32, z: u32 },
    DrawIndexed { index_count: u32, instance_count: u32, first_index: u32, base_vertex: i32, first_instance: u32 },
    DrawIndexedIndirectCount {
        buffer: HeadlessBuffer,
        offset: u64,
        count_buffer: HeadlessBuffer,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    },
    FillBuffer { buffer: HeadlessBuffer, offset: u64, size: u64, value: u32 },
    CopyBufferToBuffer { source: u64, destination: u64, size: u64 },
    PipelineBarrier { src: PipelineStage, dst: PipelineStage },
    TextureBarrier { texture: u64, old_layout: ImageLayout, new_layout: ImageLayout },
}

pub struct HeadlessCommandBuffer {
    commands: Vec<HeadlessCommand>,
    shared: Arc<HeadlessShared>,
}

impl HeadlessCommandBuffer {
    pub fn commands(&self) -> &[HeadlessCommand] {
        &self.commands
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl CommandBuffer for HeadlessCommandBuffer {
    type Device = HeadlessDevice;

    fn bind_graphics_pipeline(&mut self, pipeline: &HeadlessPipeline) {
        self.commands.push(HeadlessCommand::BindGraphicsPipeline { id: pipeline.id });
    }

    fn bind_compute_pipeline(&mut self, pipeline: &HeadlessPipeline) {
        self.commands.push(HeadlessCommand::BindComputePipeline {
            id: pipeline.id,
            entry_point: pipeline.entry_point.clone(),
        });
    }

    fn bind_vertex_buffer(&mut self, buffer: &HeadlessBuffer) {
        self.commands.push(HeadlessCommand::BindVertexBuffer { buffer: buffer.id });
    }

    fn bind_index_buffer(&mut self, buffer: &HeadlessBuffer) {
        self.commands.push(HeadlessCommand::BindIndexBuffer { buffer: buffer.id });
    }

    fn bind_bind_group(&mut self, index: u32, bind_group: &HeadlessBindGroup) {
        self.commands.push(HeadlessCommand::BindBindGroup { index, id: bind_group.id });
    }

    fn push_constants(&mut self, layout: &HeadlessPipelineLayout, _stages: ShaderStage, offset: u32, data: &[u8]) {
        if offset + data.len() as u32 > layout.push_constant_bytes {
            log::warn!(
                "push constants [{}..{}) exceed layout range of {} bytes",
                offset,
                offset + data.len() as u32,
                layout.push_constant_bytes
            );
            self.shared.rejected_writes.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.commands.push(HeadlessCommand::PushConstants { layout: layout.id, offset, data: data.to_vec() });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.commands.push(HeadlessCommand::Dispatch { x, y, z });
    }

    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, base_vertex: i32, first_instance: u32) {
        self.commands.push(HeadlessCommand::DrawIndexed { index_count, instance_count, first_index, base_vertex, first_instance });
    }

    fn draw_indexed_indirect_count(
        &mut self,
        buffer: &HeadlessBuffer,
        offset: u64,
        count_buffer: &HeadlessBuffer,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        self.commands.push(HeadlessCommand::DrawIndexedIndirectCount {
            buffer: buffer.clone(),
            offset,
            count_buffer: count_buffer.clone(),
            count_offset,
            max_draw_count,
            stride,
        });
    }

    fn fill_buffer(&mut self, buffer: &HeadlessBuffer, offset: u64, size: u64, value: u32) {
        if let Err(e) = buffer.apply_fill(offset, size, value) {
            log::warn!("fill_buffer rejected: {}", e);
        }
        self.commands.push(HeadlessCommand::FillBuffer { buffer: buffer.clone(), offset, size, value });
    }

    fn copy_buffer_to_buffer(&mut self, source: &HeadlessBuffer, destination: &HeadlessBuffer, size: u64) {
        let mut bytes = vec![0u8; size as usize];
        match source.read_data(0, &mut bytes).and_then(|_| destination.write_data(0, &bytes)) {
            Ok(()) => {}
            Err(e) => log::warn!("copy_buffer_to_buffer rejected: {}", e),
        }
        self.commands.push(HeadlessCommand::CopyBufferToBuffer { source: source.id, destination: destination.id, size });
    }

    fn pipeline_barrier(&mut self, src: PipelineStage, dst: PipelineStage) {
        self.commands.push(HeadlessCommand::PipelineBarrier { src, dst });
    }

    fn texture_barrier(&mut self, texture: &HeadlessTexture, old_layout: ImageLayout, new_layout: ImageLayout) {
        self.commands.push(HeadlessCommand::TextureBarrier { texture: texture.id, old_layout, new_layout });
    }
}

impl Device for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type TextureView = HeadlessTextureView;
    type ShaderModule = HeadlessShaderModule;
    type PipelineLayout = HeadlessPipelineLayout;
    type GraphicsPipeline = HeadlessPipeline;
    type ComputePipeline = HeadlessPipeline;
    type CommandBuffer = HeadlessCommandBuffer;
    type BindGroupLayout = HeadlessBindGroupLayout;
    type BindGroup = HeadlessBindGroup;

    fn create_shader_module(&self, code: &[u32]) -> LumeResult<HeadlessShaderModule> {
        if code.is_empty() {
            return Err(LumeError::ResourceCreationFailed("empty SPIR-V module".into()));
        }
        Ok(HeadlessShaderModule { word_count: code.len() })
    }

    fn create_pipeline_layout(&self, descriptor: PipelineLayoutDescriptor<Self>) -> LumeResult<HeadlessPipelineLayout> {
        let push_constant_bytes = descriptor
            .push_constant_ranges
            .iter()
            .map(|r| r.offset + r.size)
            .max()
            .unwrap_or(0);
        Ok(HeadlessPipelineLayout { id: self.shared.id(), push_constant_bytes })
    }

    fn create_graphics_pipeline(&self, descriptor: GraphicsPipelineDescriptor<Self>) -> LumeResult<HeadlessPipeline> {
        Ok(HeadlessPipeline { id: self.shared.id(), entry_point: descriptor.vertex_entry.to_string() })
    }

    fn create_compute_pipeline(&self, descriptor: ComputePipelineDescriptor<Self>) -> LumeResult<HeadlessPipeline> {
        Ok(HeadlessPipeline { id: self.shared.id(), entry_point: descriptor.entry_point.to_string() })
    }

    fn create_buffer(&self, descriptor: BufferDescriptor) -> LumeResult<HeadlessBuffer> {
        {
            let mut budget = self
                .shared
                .allocation_budget
                .lock()
                .map_err(|_| LumeError::Generic("allocation budget lock poisoned"))?;
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(LumeError::OutOfMemory);
                }
                *remaining -= 1;
            }
        }
        if descriptor.size == 0 {
            return Err(LumeError::ResourceCreationFailed("zero-sized buffer".into()));
        }
        self.shared.buffers_created.fetch_add(1, Ordering::Relaxed);
        self.shared.bytes_allocated.fetch_add(descriptor.size, Ordering::Relaxed);
        Ok(HeadlessBuffer {
            id: self.shared.id(),
            usage: descriptor.usage,
            data: Arc::new(Mutex::new(vec![0u8; descriptor.size as usize])),
            shared: self.shared.clone(),
        })
    }

    fn create_texture(&self, descriptor: TextureDescriptor) -> LumeResult<HeadlessTexture> {
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.mip_level_count == 0 {
            return Err(LumeError::ResourceCreationFailed("degenerate texture extent".into()));
        }
        Ok(HeadlessTexture {
            id: self.shared.id(),
            width: descriptor.width,
            height: descriptor.height,
            mip_levels: descriptor.mip_level_count,
            format: descriptor.format,
        })
    }

    fn create_texture_view(&self, texture: &HeadlessTexture, descriptor: TextureViewDescriptor) -> LumeResult<HeadlessTextureView> {
        if descriptor.base_mip_level >= texture.mip_levels {
            return Err(LumeError::ResourceCreationFailed(format!(
                "mip {} out of range for a {}-level texture",
                descriptor.base_mip_level, texture.mip_levels
            )));
        }
        let available = texture.mip_levels - descriptor.base_mip_level;
        let count = descriptor.mip_level_count.unwrap_or(available);
        if count == 0 || count > available {
            return Err(LumeError::ResourceCreationFailed("mip view range out of bounds".into()));
        }
        Ok(HeadlessTextureView { texture_id: texture.id, base_mip_level: descriptor.base_mip_level, mip_level_count: count })
    }

    fn create_bind_group_layout(&self, descriptor: BindGroupLayoutDescriptor) -> LumeResult<HeadlessBindGroupLayout> {
        Ok(HeadlessBindGroupLayout { bindings: descriptor.entries.iter().map(|e| (e.binding, e.ty)).collect() })
    }

    fn create_bind_group(&self, descriptor: BindGroupDescriptor<Self>) -> LumeResult<HeadlessBindGroup> {
        let mut buffers = Vec::new();
        for entry in &descriptor.entries {
            if !descriptor.layout.bindings.iter().any(|(b, _)| *b == entry.binding) {
                return Err(LumeError::ResourceCreationFailed(format!("binding {} not in layout", entry.binding)));
            }
            if let BindingResource::Buffer(buffer) = entry.resource {
                buffers.push((entry.binding, buffer.clone()));
            }
        }
        Ok(HeadlessBindGroup { id: self.shared.id(), buffers })
    }
}
