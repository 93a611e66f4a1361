pub trait Device: Sized + Clone {
    type Buffer: Buffer;
    type Texture: Texture;
    type TextureView: TextureView;
    type ShaderModule: ShaderModule;
    type PipelineLayout: PipelineLayout;
    type GraphicsPipeline: GraphicsPipeline;
    type ComputePipeline: ComputePipeline;
    type CommandBuffer: CommandBuffer<Device = Self>;
    type BindGroupLayout: BindGroupLayout;
    type BindGroup: BindGroup;

    fn create_shader_module(&self, code: &[u32]) -> crate::LumeResult<Self::ShaderModule>;
    fn create_pipeline_layout(&self, descriptor: PipelineLayoutDescriptor<Self>) -> crate::LumeResult<Self::PipelineLayout>;
    fn create_graphics_pipeline(&self, descriptor: GraphicsPipelineDescriptor<Self>) -> crate::LumeResult<Self::GraphicsPipeline>;
    fn create_compute_pipeline(&self, descriptor: ComputePipelineDescriptor<Self>) -> crate::LumeResult<Self::ComputePipeline>;
    fn create_buffer(&self, descriptor: BufferDescriptor) -> crate::LumeResult<Self::Buffer>;
    fn create_texture(&self, descriptor: TextureDescriptor) -> crate::LumeResult<Self::Texture>;
    fn create_texture_view(&self, texture: &Self::Texture, descriptor: TextureViewDescriptor) -> crate::LumeResult<Self::TextureView>;
    fn create_bind_group_layout(&self, descriptor: BindGroupLayoutDescriptor) -> crate::LumeResult<Self::BindGroupLayout>;
    fn create_bind_group(&self, descriptor: BindGroupDescriptor<Self>) -> crate::LumeResult<Self::BindGroup>;
}

pub trait CommandBuffer {
    type Device: Device;

    fn bind_graphics_pipeline(&mut self, pipeline: &<Self::Device as Device>::GraphicsPipeline);
    fn bind_compute_pipeline(&mut self, pipeline: &<Self::Device as Device>::ComputePipeline);
    fn bind_vertex_buffer(&mut self, buffer: &<Self::Device as Device>::Buffer);
    fn bind_index_buffer(&mut self, buffer: &<Self::Device as Device>::Buffer);
    fn bind_bind_group(&mut self, index: u32, bind_group: &<Self::Device as Device>::BindGroup);
    fn push_constants(&mut self, layout: &<Self::Device as Device>::PipelineLayout, stages: ShaderStage, offset: u32, data: &[u8]);

    fn dispatch(&mut self, x: u32, y: u32, z: u32);
    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, base_vertex: i32, first_instance: u32);
    /// Draws up to `max_draw_count` records of `stride` bytes from `buffer`, with the
    /// actual record count read by the device from `count_buffer` at `count_offset`.
    fn draw_indexed_indirect_count(
        &mut self,
        buffer: &<Self::Device as Device>::Buffer,
        offset: u64,
        count_buffer: &<Self::Device as Device>::Buffer,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    );

    fn fill_buffer(&mut self, buffer: &<Self::Device as Device>::Buffer, offset: u64, size: u64, value: u32);
    fn copy_buffer_to_buffer(&mut self, source: &<Self::Device as Device>::Buffer, destination: &<Self::Device as Device>::Buffer, size: u64);

    /// Makes every write performed by `src` stages visible to reads in `dst` stages.
    fn pipeline_barrier(&mut self, src: PipelineStage, dst: PipelineStage);
    fn texture_barrier(&mut self, texture: &<Self::Device as Device>::Texture, old_layout: ImageLayout, new_layout: ImageLayout);
}

pub trait ShaderModule {}
pub trait PipelineLayout {}
pub trait GraphicsPipeline: Send + Sync {}
pub trait ComputePipeline: Send + Sync {}
pub trait TextureView {}
pub trait Texture {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn mip_level_count(&self) -> u32;
}
pub trait Buffer {
    fn size(&self) -> u64;
    fn write_data(&self, offset: u64, data: &[u8]) -> crate::LumeResult<()>;
    fn read_data(&self, offset: u64, data: &mut [u8]) -> crate::LumeResult<()>;
}
pub trait BindGroupLayout {}
pub trait BindGroup {}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TextureFormat {
    Bgra8UnormSrgb,
    Rgba8UnormSrgb,
    Rgba8Unorm,
    R32Float,
    R32Uint,
    Depth32Float,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachment,
    DepthAttachment,
    TransferSrc,
    TransferDst,
    ShaderReadOnly,
    DepthReadOnly,
}

pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_level_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TextureUsage(pub u32);

impl TextureUsage {
    pub const TEXTURE_BINDING: Self = Self(1 << 0);
    pub const STORAGE_BINDING: Self = Self(1 << 1);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 2);
    pub const DEPTH_STENCIL_ATTACHMENT: Self = Self(1 << 3);
    pub const COPY_SRC: Self = Self(1 << 4);
    pub const COPY_DST: Self = Self(1 << 5);
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

pub struct TextureViewDescriptor {
    pub format: Option<TextureFormat>,
    pub base_mip_level: u32,
    /// `None` covers every level from `base_mip_level` to the end of the chain.
    pub mip_level_count: Option<u32>,
}

impl Default for TextureViewDescriptor {
    fn default() -> Self {
        Self { format: None, base_mip_level: 0, mip_level_count: None }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PushConstantRange {
    pub stages: ShaderStage,
    pub offset: u32,
    pub size: u32,
}

pub struct PipelineLayoutDescriptor<'a, D: Device> {
    pub bind_group_layouts: &'a [&'a D::BindGroupLayout],
    pub push_constant_ranges: &'a [PushConstantRange],
}

pub struct GraphicsPipelineDescriptor<'a, D: Device> {
    pub vertex_shader: &'a D::ShaderModule,
    pub vertex_entry: &'a str,
    pub fragment_shader: &'a D::ShaderModule,
    pub fragment_entry: &'a str,
    pub layout: &'a D::PipelineLayout,
    pub color_format: TextureFormat,
    pub primitive: PrimitiveState,
    pub vertex_layout: Option<VertexLayout>,
    pub depth_stencil: Option<DepthStencilState>,
}

#[derive(Clone, Copy, Debug)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug)]
pub struct PrimitiveState {
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Clone, Debug)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

#[derive(Clone, Debug)]
pub struct VertexLayout {
    pub array_stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

pub struct BufferDescriptor {
    pub size: u64,
    pub usage: BufferUsage,
    pub mapped_at_creation: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BufferUsage(pub u32);

impl BufferUsage {
    pub const VERTEX: Self = Self(1 << 0);
    pub const INDEX: Self = Self(1 << 1);
    pub const UNIFORM: Self = Self(1 << 2);
    pub const STORAGE: Self = Self(1 << 3);
    pub const COPY_SRC: Self = Self(1 << 4);
    pub const COPY_DST: Self = Self(1 << 5);
    pub const INDIRECT: Self = Self(1 << 6);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PipelineStage(pub u32);

impl PipelineStage {
    pub const TRANSFER: Self = Self(1 << 0);
    pub const COMPUTE_SHADER: Self = Self(1 << 1);
    pub const DRAW_INDIRECT: Self = Self(1 << 2);
    pub const VERTEX_SHADER: Self = Self(1 << 3);
    pub const FRAGMENT_SHADER: Self = Self(1 << 4);
    pub const HOST: Self = Self(1 << 5);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for PipelineStage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

pub struct BindGroupLayoutDescriptor {
    pub entries: Vec<BindGroupLayoutEntry>,
}

pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStage,
    pub ty: BindingType,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ShaderStage(pub u32);

impl ShaderStage {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const COMPUTE: Self = Self(1 << 2);
}

impl std::ops::BitOr for ShaderStage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    SampledTexture,
    DepthTexture,
    StorageTexture { format: TextureFormat },
}

pub struct BindGroupDescriptor<'a, D: Device> {
    pub layout: &'a D::BindGroupLayout,
    pub entries: Vec<BindGroupEntry<'a, D>>,
}

pub struct BindGroupEntry<'a, D: Device> {
    pub binding: u32,
    pub resource: BindingResource<'a, D>,
}

pub enum BindingResource<'a, D: Device> {
    Buffer(&'a D::Buffer),
    TextureView(&'a D::TextureView),
}

pub struct ComputePipelineDescriptor<'a, D: Device> {
    pub shader: &'a D::ShaderModule,
    pub entry_point: &'a str,
    pub layout: &'a D::PipelineLayout,
}
