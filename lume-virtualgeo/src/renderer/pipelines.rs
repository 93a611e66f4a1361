use lume_core::device::*;
use lume_core::shader::compile_wgsl;
use lume_core::LumeResult;

use super::VirtualGeoConfig;
use crate::Vertex;

pub const CULL_WGSL: &str = include_str!("../shaders/cull.wgsl");
pub const HIZ_WGSL: &str = include_str!("../shaders/hiz.wgsl");
pub const DRAW_WGSL: &str = include_str!("../shaders/draw.wgsl");

/// Clusters per cull workgroup; must match `@workgroup_size` in `cull.wgsl`.
pub const CULL_WORKGROUP_SIZE: u32 = 64;

const PUSH_CONSTANT_BYTES: u32 = 16;

fn entry(binding: u32, visibility: ShaderStage, ty: BindingType) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry { binding, visibility, ty }
}

fn storage(read_only: bool) -> BindingType {
    BindingType::StorageBuffer { read_only }
}

pub(crate) struct Pipelines<D: Device> {
    pub cull_bind_group_layout: D::BindGroupLayout,
    pub cull_layout: D::PipelineLayout,
    pub cull: D::ComputePipeline,

    pub hiz_copy_bind_group_layout: D::BindGroupLayout,
    pub hiz_copy_layout: D::PipelineLayout,
    pub hiz_copy: D::ComputePipeline,
    pub hiz_reduce_bind_group_layout: D::BindGroupLayout,
    pub hiz_reduce_layout: D::PipelineLayout,
    pub hiz_reduce: D::ComputePipeline,

    pub draw_bind_group_layout: D::BindGroupLayout,
    pub draw_layout: D::PipelineLayout,
    pub draw: D::GraphicsPipeline,
}

impl<D: Device> Pipelines<D> {
    pub fn new(device: &D, config: &VirtualGeoConfig) -> LumeResult<Self> {
        let compute = ShaderStage::COMPUTE;

        // Cull
        let cull_bind_group_layout = device.create_bind_group_layout(BindGroupLayoutDescriptor {
            entries: vec![
                entry(0, compute, BindingType::UniformBuffer),
                entry(1, compute, storage(true)),
                entry(2, compute, storage(true)),
                entry(3, compute, storage(false)),
                entry(4, compute, storage(false)),
                entry(5, compute, storage(false)),
                entry(6, compute, BindingType::SampledTexture),
            ],
        })?;
        let cull_layout = device.create_pipeline_layout(PipelineLayoutDescriptor {
            bind_group_layouts: &[&cull_bind_group_layout],
            push_constant_ranges: &[PushConstantRange { stages: compute, offset: 0, size: PUSH_CONSTANT_BYTES }],
        })?;
        let cull_module = device.create_shader_module(&compile_wgsl(CULL_WGSL)?)?;
        let cull = device.create_compute_pipeline(ComputePipelineDescriptor {
            shader: &cull_module,
            entry_point: "cull_clusters",
            layout: &cull_layout,
        })?;

        // Hi-Z
        let hiz_module = device.create_shader_module(&compile_wgsl(HIZ_WGSL)?)?;
        let hiz_copy_bind_group_layout = device.create_bind_group_layout(BindGroupLayoutDescriptor {
            entries: vec![
                entry(1, compute, BindingType::StorageTexture { format: TextureFormat::R32Float }),
                entry(2, compute, BindingType::DepthTexture),
            ],
        })?;
        let hiz_copy_layout = device.create_pipeline_layout(PipelineLayoutDescriptor {
            bind_group_layouts: &[&hiz_copy_bind_group_layout],
            push_constant_ranges: &[PushConstantRange { stages: compute, offset: 0, size: PUSH_CONSTANT_BYTES }],
        })?;
        let hiz_copy = device.create_compute_pipeline(ComputePipelineDescriptor {
            shader: &hiz_module,
            entry_point: "copy_depth",
            layout: &hiz_copy_layout,
        })?;
        let hiz_reduce_bind_group_layout = device.create_bind_group_layout(BindGroupLayoutDescriptor {
            entries: vec![
                entry(0, compute, BindingType::SampledTexture),
                entry(1, compute, BindingType::StorageTexture { format: TextureFormat::R32Float }),
            ],
        })?;
        let hiz_reduce_layout = device.create_pipeline_layout(PipelineLayoutDescriptor {
            bind_group_layouts: &[&hiz_reduce_bind_group_layout],
            push_constant_ranges: &[PushConstantRange { stages: compute, offset: 0, size: PUSH_CONSTANT_BYTES }],
        })?;
        let hiz_reduce = device.create_compute_pipeline(ComputePipelineDescriptor {
            shader: &hiz_module,
            entry_point: "reduce",
            layout: &hiz_reduce_layout,
        })?;

        // Draw
        let raster = ShaderStage::VERTEX | ShaderStage::FRAGMENT;
        let draw_bind_group_layout = device.create_bind_group_layout(BindGroupLayoutDescriptor {
            entries: vec![
                entry(0, raster, BindingType::UniformBuffer),
                entry(1, ShaderStage::VERTEX, storage(true)),
                entry(2, ShaderStage::VERTEX, storage(true)),
                entry(3, ShaderStage::VERTEX, storage(true)),
            ],
        })?;
        let draw_layout = device.create_pipeline_layout(PipelineLayoutDescriptor {
            bind_group_layouts: &[&draw_bind_group_layout],
            push_constant_ranges: &[PushConstantRange { stages: raster, offset: 0, size: PUSH_CONSTANT_BYTES }],
        })?;
        let draw_module = device.create_shader_module(&compile_wgsl(DRAW_WGSL)?)?;
        let draw = device.create_graphics_pipeline(GraphicsPipelineDescriptor {
            vertex_shader: &draw_module,
            vertex_entry: "vs_main",
            fragment_shader: &draw_module,
            fragment_entry: "fs_main",
            layout: &draw_layout,
            color_format: config.color_format,
            primitive: PrimitiveState { topology: PrimitiveTopology::TriangleList, cull_mode: CullMode::Back },
            vertex_layout: Some(VertexLayout {
                array_stride: std::mem::size_of::<Vertex>() as u32,
                attributes: vec![
                    VertexAttribute { location: 0, format: VertexFormat::Float32x3, offset: 0 },
                    VertexAttribute { location: 1, format: VertexFormat::Float32x3, offset: 12 },
                    VertexAttribute { location: 2, format: VertexFormat::Float32x2, offset: 24 },
                ],
            }),
            // Reversed-Z.
            depth_stencil: Some(DepthStencilState {
                format: config.depth_format,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Greater,
            }),
        })?;

        Ok(Self {
            cull_bind_group_layout,
            cull_layout,
            cull,
            hiz_copy_bind_group_layout,
            hiz_copy_layout,
            hiz_copy,
            hiz_reduce_bind_group_layout,
            hiz_reduce_layout,
            hiz_reduce,
            draw_bind_group_layout,
            draw_layout,
            draw,
        })
    }
}
