use bytemuck::{Pod, Zeroable};

use lume_core::device::*;
use lume_core::LumeResult;

use super::pipelines::Pipelines;
use crate::culling::mip_count_for;

const HIZ_WORKGROUP: u32 = 8;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HizPushConstants {
    pub src_size: [u32; 2],
    pub dst_size: [u32; 2],
}

fn mip_size(width: u32, height: u32, level: u32) -> [u32; 2] {
    [(width >> level).max(1), (height >> level).max(1)]
}

/// R32Float mip chain of one frame context. Mip 0 matches the viewport.
pub(crate) struct DepthPyramid<D: Device> {
    pub texture: D::Texture,
    /// Every mip; bound to the next frame's cull pass.
    pub full_view: D::TextureView,
    pub mip_views: Vec<D::TextureView>,
    /// `reduce_bind_groups[i]` reads mip `i` and writes mip `i + 1`.
    reduce_bind_groups: Vec<D::BindGroup>,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
}

impl<D: Device> DepthPyramid<D> {
    pub fn new(device: &D, pipelines: &Pipelines<D>, width: u32, height: u32) -> LumeResult<Self> {
        let mip_count = mip_count_for(width, height);
        let texture = device.create_texture(TextureDescriptor {
            width,
            height,
            depth: 1,
            mip_level_count: mip_count,
            format: TextureFormat::R32Float,
            usage: TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING,
        })?;
        let full_view = device.create_texture_view(&texture, TextureViewDescriptor::default())?;
        let mip_views = (0..mip_count)
            .map(|level| {
                device.create_texture_view(
                    &texture,
                    TextureViewDescriptor { format: None, base_mip_level: level, mip_level_count: Some(1) },
                )
            })
            .collect::<LumeResult<Vec<_>>>()?;

        let reduce_bind_groups = mip_views
            .windows(2)
            .map(|pair| {
                device.create_bind_group(BindGroupDescriptor {
                    layout: &pipelines.hiz_reduce_bind_group_layout,
                    entries: vec![
                        BindGroupEntry { binding: 0, resource: BindingResource::TextureView(&pair[0]) },
                        BindGroupEntry { binding: 1, resource: BindingResource::TextureView(&pair[1]) },
                    ],
                })
            })
            .collect::<LumeResult<Vec<_>>>()?;

        Ok(Self { texture, full_view, mip_views, reduce_bind_groups, width, height, mip_count })
    }

    /// Records the copy of `depth_view` into mip 0 followed by one reduction per
    /// further mip. The depth target is handed back in attachment layout.
    pub fn record_build(
        &self,
        device: &D,
        cmd: &mut D::CommandBuffer,
        pipelines: &Pipelines<D>,
        depth_texture: &D::Texture,
        depth_view: &D::TextureView,
    ) -> LumeResult<()> {
        let Some(mip0) = self.mip_views.first() else {
            return Ok(());
        };
        let copy_bind_group = device.create_bind_group(BindGroupDescriptor {
            layout: &pipelines.hiz_copy_bind_group_layout,
            entries: vec![
                BindGroupEntry { binding: 1, resource: BindingResource::TextureView(mip0) },
                BindGroupEntry { binding: 2, resource: BindingResource::TextureView(depth_view) },
            ],
        })?;

        cmd.texture_barrier(depth_texture, ImageLayout::DepthAttachment, ImageLayout::DepthReadOnly);
        cmd.texture_barrier(&self.texture, ImageLayout::Undefined, ImageLayout::General);

        let size = [self.width, self.height];
        cmd.bind_compute_pipeline(&pipelines.hiz_copy);
        cmd.bind_bind_group(0, &copy_bind_group);
        let push = HizPushConstants { src_size: size, dst_size: size };
        cmd.push_constants(&pipelines.hiz_copy_layout, ShaderStage::COMPUTE, 0, bytemuck::bytes_of(&push));
        cmd.dispatch(size[0].div_ceil(HIZ_WORKGROUP), size[1].div_ceil(HIZ_WORKGROUP), 1);

        if !self.reduce_bind_groups.is_empty() {
            cmd.bind_compute_pipeline(&pipelines.hiz_reduce);
        }
        for (i, bind_group) in self.reduce_bind_groups.iter().enumerate() {
            let level = i as u32 + 1;
            let push = HizPushConstants {
                src_size: mip_size(self.width, self.height, level - 1),
                dst_size: mip_size(self.width, self.height, level),
            };
            cmd.pipeline_barrier(PipelineStage::COMPUTE_SHADER, PipelineStage::COMPUTE_SHADER);
            cmd.bind_bind_group(0, bind_group);
            cmd.push_constants(&pipelines.hiz_reduce_layout, ShaderStage::COMPUTE, 0, bytemuck::bytes_of(&push));
            cmd.dispatch(push.dst_size[0].div_ceil(HIZ_WORKGROUP), push.dst_size[1].div_ceil(HIZ_WORKGROUP), 1);
        }

        cmd.texture_barrier(&self.texture, ImageLayout::General, ImageLayout::ShaderReadOnly);
        cmd.texture_barrier(depth_texture, ImageLayout::DepthReadOnly, ImageLayout::DepthAttachment);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_sizes_halve_down_to_one() {
        assert_eq!(mip_size(1280, 720, 0), [1280, 720]);
        assert_eq!(mip_size(1280, 720, 3), [160, 90]);
        assert_eq!(mip_size(1280, 720, 10), [1, 1]);
    }
}
