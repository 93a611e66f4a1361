//! Per-cluster visibility, evaluated exactly as `cull.wgsl` evaluates it.
//!
//! The GPU records and uniform blocks shared with the shaders live here too, so
//! the CPU model and the compute pass always read the same bytes.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};

use crate::processor::LodRange;
use crate::renderer::CullSettings;
use crate::Cluster;

pub const CULL_FRUSTUM: u32 = 1 << 0;
pub const CULL_OCCLUSION: u32 = 1 << 1;
pub const CULL_AUTO_LOD: u32 = 1 << 2;
/// The bound pyramid was built by the previous frame and may be sampled.
pub const CULL_HIZ_VALID: u32 = 1 << 3;

/// Floor for the camera-to-sphere distance in error projection.
pub const MIN_PROJECTION_DISTANCE: f32 = 1e-4;
const MIN_CLIP_W: f32 = 1e-5;

/// Uniform block of the cull pass (240 bytes, std140-compatible).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CullUniforms {
    pub view_proj: [[f32; 4]; 4],
    /// Left, right, bottom, top, then `z >= 0` and `z <= w`. Under reversed-Z
    /// those last two are the far and near planes. Normalized, pointing inwards.
    pub frustum_planes: [[f32; 4]; 6],
    pub camera_position: [f32; 4],
    pub viewport_size: [f32; 2],
    pub projection_scale: f32,
    /// Already scaled by the LOD bias.
    pub error_threshold: f32,
    pub hiz_size: [f32; 2],
    pub hiz_mip_count: u32,
    pub hiz_max_mip: u32,
    pub hiz_depth_bias: f32,
    pub hiz_no_occluder_depth: f32,
    pub forced_lod: u32,
    pub flags: u32,
    pub max_draws: u32,
    pub _padding: [u32; 3],
}

impl CullUniforms {
    pub fn new(view: Mat4, proj: Mat4, camera_position: Vec3, viewport: [u32; 2], settings: &CullSettings, max_draws: u32) -> Self {
        let view_proj = proj * view;
        let mut flags = 0;
        if settings.frustum_culling {
            flags |= CULL_FRUSTUM;
        }
        if settings.occlusion_culling {
            flags |= CULL_OCCLUSION;
        }
        if settings.auto_lod {
            flags |= CULL_AUTO_LOD;
        }
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            frustum_planes: extract_frustum_planes(view_proj).map(|p| p.to_array()),
            camera_position: camera_position.extend(1.0).to_array(),
            viewport_size: [viewport[0] as f32, viewport[1] as f32],
            projection_scale: projection_scale(proj, viewport[1]),
            error_threshold: settings.effective_threshold(),
            hiz_size: [0.0; 2],
            hiz_mip_count: 0,
            hiz_max_mip: settings.hiz_max_mip,
            hiz_depth_bias: settings.hiz_depth_bias,
            hiz_no_occluder_depth: settings.hiz_no_occluder_depth,
            forced_lod: settings.forced_lod,
            flags,
            max_draws,
            _padding: [0; 3],
        }
    }

    /// Marks a pyramid of the given base size as sampleable.
    pub fn with_hiz(mut self, width: u32, height: u32, mip_count: u32) -> Self {
        self.hiz_size = [width as f32, height as f32];
        self.hiz_mip_count = mip_count;
        self.flags |= CULL_HIZ_VALID;
        self
    }

    pub fn view_proj(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view_proj)
    }

    pub fn camera(&self) -> Vec3 {
        Vec4::from_array(self.camera_position).xyz()
    }
}

/// Per-instance record read by the cull and draw passes (144 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub model: [[f32; 4]; 4],
    /// Inverse-transpose of `model`.
    pub normal: [[f32; 4]; 4],
    /// Largest axis scale of `model`; scales bounds and errors into world space.
    pub max_scale: f32,
    pub mesh_slot: u32,
    pub _padding: [u32; 2],
}

impl InstanceData {
    pub fn new(model: Mat4, mesh_slot: u32) -> Self {
        let normal = if model.determinant().abs() > f32::EPSILON {
            model.inverse().transpose()
        } else {
            Mat4::IDENTITY
        };
        let max_scale = model
            .x_axis
            .xyz()
            .length()
            .max(model.y_axis.xyz().length())
            .max(model.z_axis.xyz().length());
        Self {
            model: model.to_cols_array_2d(),
            normal: normal.to_cols_array_2d(),
            max_scale,
            mesh_slot,
            _padding: [0; 2],
        }
    }

    pub fn model(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }
}

/// `VkDrawIndexedIndirectCommand`. `first_instance` carries the record's slot in
/// the visible-cluster buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct VisibleCluster {
    pub instance_index: u32,
    pub cluster_index: u32,
}

/// Push constants of one cull dispatch: an instance against one mesh's clusters.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CullPushConstants {
    pub instance_index: u32,
    pub cluster_start: u32,
    pub cluster_count: u32,
    pub max_lod: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterVisibility {
    CulledFrustum,
    /// Another cluster on the same DAG chain matches the view better.
    CulledError,
    CulledOccluded,
    Visible,
}

/// Gribb-Hartmann plane extraction for a `[0, 1]` depth range. A plane that
/// degenerates (the far plane of an infinite projection) becomes always-pass.
pub fn extract_frustum_planes(view_proj: Mat4) -> [Vec4; 6] {
    let r0 = view_proj.row(0);
    let r1 = view_proj.row(1);
    let r2 = view_proj.row(2);
    let r3 = view_proj.row(3);
    [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(|p| {
        let len = p.xyz().length();
        if len > f32::EPSILON { p / len } else { Vec4::new(0.0, 0.0, 0.0, 1.0) }
    })
}

pub fn sphere_in_frustum(planes: &[Vec4; 6], center: Vec3, radius: f32) -> bool {
    planes.iter().all(|p| p.xyz().dot(center) + p.w >= -radius)
}

/// Pixels per world unit at distance one.
pub fn projection_scale(proj: Mat4, viewport_height: u32) -> f32 {
    proj.y_axis.y * viewport_height as f32 * 0.5
}

/// Transforms a `[center, radius]` sphere by an instance.
pub fn world_sphere(model: Mat4, max_scale: f32, sphere: [f32; 4]) -> (Vec3, f32) {
    (model.transform_point3(Vec3::new(sphere[0], sphere[1], sphere[2])), sphere[3] * max_scale)
}

/// Screen-space size of `error` measured at the point of `sphere` closest to the
/// camera. `f32::MAX` (no parent) projects to infinity.
pub fn projected_error(error: f32, sphere: (Vec3, f32), max_scale: f32, camera: Vec3, projection_scale: f32) -> f32 {
    if error >= f32::MAX {
        return f32::INFINITY;
    }
    let distance = (sphere.0.distance(camera) - sphere.1).max(MIN_PROJECTION_DISTANCE);
    error * max_scale * projection_scale / distance
}

/// Runs frustum, LOD and occlusion tests in that order.
pub fn cull_cluster(
    cluster: &Cluster,
    instance: &InstanceData,
    max_lod: u32,
    uniforms: &CullUniforms,
    hiz: Option<&HizPyramid>,
) -> ClusterVisibility {
    let model = instance.model();

    if uniforms.flags & CULL_FRUSTUM != 0 {
        let (center, radius) = world_sphere(model, instance.max_scale, cluster.bounding_sphere);
        let planes = uniforms.frustum_planes.map(Vec4::from_array);
        if !sphere_in_frustum(&planes, center, radius) {
            return ClusterVisibility::CulledFrustum;
        }
    }

    let selected = if uniforms.flags & CULL_AUTO_LOD != 0 {
        let camera = uniforms.camera();
        let project = |error: f32, bounds: [f32; 4]| {
            projected_error(
                error,
                world_sphere(model, instance.max_scale, bounds),
                instance.max_scale,
                camera,
                uniforms.projection_scale,
            )
        };
        let own = project(cluster.lod_error, cluster.lod_bounds);
        let parent = project(cluster.parent_error, cluster.parent_bounds);
        own <= uniforms.error_threshold && parent > uniforms.error_threshold
    } else {
        let forced = if uniforms.forced_lod > max_lod { 0 } else { uniforms.forced_lod };
        cluster.lod_level == forced
    };
    if !selected {
        return ClusterVisibility::CulledError;
    }

    let hiz_ready = uniforms.flags & (CULL_OCCLUSION | CULL_HIZ_VALID) == CULL_OCCLUSION | CULL_HIZ_VALID;
    if let (true, Some(pyramid)) = (hiz_ready, hiz) {
        if is_occluded(cluster, model, uniforms, pyramid) {
            return ClusterVisibility::CulledOccluded;
        }
    }
    ClusterVisibility::Visible
}

/// Reversed-Z test of the cluster's projected AABB against the pyramid. Anything
/// uncertain (near-plane crossing, off-screen, footprint beyond the usable mips)
/// counts as visible.
fn is_occluded(cluster: &Cluster, model: Mat4, uniforms: &CullUniforms, hiz: &HizPyramid) -> bool {
    let mvp = uniforms.view_proj() * model;
    let lo = Vec3::from_array(cluster.aabb_min);
    let hi = Vec3::from_array(cluster.aabb_max);

    let mut uv_min = Vec2::splat(f32::MAX);
    let mut uv_max = Vec2::splat(f32::MIN);
    let mut nearest = 0.0f32;
    for i in 0..8 {
        let corner = Vec3::new(
            if i & 1 == 0 { lo.x } else { hi.x },
            if i & 2 == 0 { lo.y } else { hi.y },
            if i & 4 == 0 { lo.z } else { hi.z },
        );
        let clip = mvp * corner.extend(1.0);
        if clip.w <= MIN_CLIP_W {
            return false;
        }
        let ndc = clip.xyz() / clip.w;
        let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        uv_min = uv_min.min(uv);
        uv_max = uv_max.max(uv);
        nearest = nearest.max(ndc.z);
    }
    if uv_max.x < 0.0 || uv_max.y < 0.0 || uv_min.x > 1.0 || uv_min.y > 1.0 {
        return false;
    }
    let uv_min = uv_min.clamp(Vec2::ZERO, Vec2::ONE);
    let uv_max = uv_max.clamp(Vec2::ZERO, Vec2::ONE);

    let footprint = (uv_max - uv_min) * Vec2::from_array(uniforms.hiz_size);
    let mip = footprint.max_element().max(1.0).log2().ceil() as u32;
    let usable = uniforms.hiz_max_mip.min(uniforms.hiz_mip_count.min(hiz.mip_count()).saturating_sub(1));
    if mip > usable {
        return false;
    }

    let farthest = [uv_min, Vec2::new(uv_max.x, uv_min.y), Vec2::new(uv_min.x, uv_max.y), uv_max]
        .into_iter()
        .map(|uv| hiz.sample(mip, uv))
        .fold(f32::MAX, f32::min);
    if farthest <= uniforms.hiz_no_occluder_depth {
        return false;
    }
    nearest + uniforms.hiz_depth_bias < farthest
}

/// Whole-mesh level for the direct path: the forced level (0 when the mesh lacks
/// it), or else the coarsest level whose worst error, projected with the mesh's
/// bounding sphere, stays within the threshold.
pub fn select_mesh_lod(
    lods: &[LodRange],
    max_lod: u32,
    bounding_sphere: [f32; 4],
    instance: &InstanceData,
    uniforms: &CullUniforms,
) -> u32 {
    if uniforms.flags & CULL_AUTO_LOD == 0 {
        return if uniforms.forced_lod > max_lod { 0 } else { uniforms.forced_lod };
    }
    let sphere = world_sphere(instance.model(), instance.max_scale, bounding_sphere);
    let camera = uniforms.camera();
    lods.iter()
        .enumerate()
        .rev()
        .find(|(_, range)| {
            range.cluster_count > 0
                && projected_error(range.max_error, sphere, instance.max_scale, camera, uniforms.projection_scale)
                    <= uniforms.error_threshold
        })
        .map_or(0, |(level, _)| level as u32)
}

/// Number of levels of a full mip chain over `width` x `height`.
pub fn mip_count_for(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[derive(Clone, Debug)]
struct HizLevel {
    width: u32,
    height: u32,
    depth: Vec<f32>,
}

/// Minimum-depth pyramid over a reversed-Z depth buffer. Each texel holds the
/// farthest depth of its footprint; odd edges fold into the last texel so no
/// source texel is skipped.
#[derive(Clone, Debug)]
pub struct HizPyramid {
    levels: Vec<HizLevel>,
}

impl HizPyramid {
    /// `None` when `depth` does not hold `width * height` values.
    pub fn from_depth(width: u32, height: u32, depth: Vec<f32>) -> Option<Self> {
        if width == 0 || height == 0 || depth.len() != (width * height) as usize {
            return None;
        }
        let mut levels = vec![HizLevel { width, height, depth }];
        for _ in 1..mip_count_for(width, height) {
            let Some(src) = levels.last() else { break };
            let dst_w = (src.width / 2).max(1);
            let dst_h = (src.height / 2).max(1);
            let mut dst = Vec::with_capacity((dst_w * dst_h) as usize);
            for y in 0..dst_h {
                let y1 = if y == dst_h - 1 { src.height } else { (y * 2 + 2).min(src.height) };
                for x in 0..dst_w {
                    let x1 = if x == dst_w - 1 { src.width } else { (x * 2 + 2).min(src.width) };
                    let mut farthest = f32::MAX;
                    for sy in y * 2..y1 {
                        for sx in x * 2..x1 {
                            farthest = farthest.min(src.depth[(sy * src.width + sx) as usize]);
                        }
                    }
                    dst.push(farthest);
                }
            }
            levels.push(HizLevel { width: dst_w, height: dst_h, depth: dst });
        }
        Some(Self { levels })
    }

    pub fn mip_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn level_size(&self, level: u32) -> Option<(u32, u32)> {
        self.levels.get(level as usize).map(|l| (l.width, l.height))
    }

    pub fn texel(&self, level: u32, x: u32, y: u32) -> Option<f32> {
        let l = self.levels.get(level as usize)?;
        (x < l.width && y < l.height).then(|| l.depth[(y * l.width + x) as usize])
    }

    /// Point sample; `uv` is clamped to the texture.
    ///
    /// The texel is addressed through level 0 and shifted down, so a pixel in a
    /// folded odd edge lands on the last texel that actually covers it.
    pub fn sample(&self, level: u32, uv: Vec2) -> f32 {
        let (Some(base), Some(l)) = (self.levels.first(), self.levels.get(level as usize).or(self.levels.last())) else {
            return 0.0;
        };
        let shift = level.min(self.mip_count() - 1);
        let px = ((uv.x * base.width as f32) as i64).clamp(0, base.width as i64 - 1) as u32;
        let py = ((uv.y * base.height as f32) as i64).clamp(0, base.height as i64 - 1) as u32;
        let x = (px >> shift).min(l.width - 1);
        let y = (py >> shift).min(l.height - 1);
        l.depth[(y * l.width + x) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_and_record_layouts() {
        assert_eq!(std::mem::size_of::<CullUniforms>(), 240);
        assert_eq!(std::mem::offset_of!(CullUniforms, viewport_size), 176);
        assert_eq!(std::mem::offset_of!(CullUniforms, hiz_size), 192);
        assert_eq!(std::mem::offset_of!(CullUniforms, flags), 220);
        assert_eq!(std::mem::size_of::<InstanceData>(), 144);
        assert_eq!(std::mem::size_of::<DrawIndexedIndirect>(), 20);
        assert_eq!(std::mem::size_of::<CullPushConstants>(), 16);
    }

    #[test]
    fn planes_of_an_orthographic_box() {
        let planes = extract_frustum_planes(Mat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, 0.0, 10.0));
        for p in &planes {
            assert!((p.xyz().length() - 1.0).abs() < 1e-5);
        }
        assert!(sphere_in_frustum(&planes, Vec3::new(0.0, 0.0, -5.0), 0.1));
        assert!(!sphere_in_frustum(&planes, Vec3::new(3.0, 0.0, -5.0), 1.0));
        assert!(sphere_in_frustum(&planes, Vec3::new(1.5, 0.0, -5.0), 1.0));
    }

    #[test]
    fn infinite_far_plane_always_passes() {
        let planes = extract_frustum_planes(Mat4::perspective_infinite_reverse_rh(1.0, 1.0, 0.1));
        assert_eq!(planes[4], Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert!(sphere_in_frustum(&planes, Vec3::new(0.0, 0.0, -1.0e6), 1.0));
    }

    #[test]
    fn roots_project_to_infinity() {
        let e = projected_error(f32::MAX, (Vec3::ZERO, 1.0), 1.0, Vec3::new(0.0, 0.0, 10.0), 500.0);
        assert!(e.is_infinite());
        let near = projected_error(0.1, (Vec3::ZERO, 1.0), 1.0, Vec3::new(0.0, 0.0, 5.0), 500.0);
        let far = projected_error(0.1, (Vec3::ZERO, 1.0), 1.0, Vec3::new(0.0, 0.0, 50.0), 500.0);
        assert!(near > far);
    }

    #[test]
    fn pyramid_keeps_the_farthest_depth() {
        #[rustfmt::skip]
        let depth = vec![
            0.9, 0.8, 0.7,
            0.6, 0.5, 0.4,
            0.3, 0.2, 0.1,
        ];
        let hiz = HizPyramid::from_depth(3, 3, depth).unwrap();
        assert_eq!(hiz.mip_count(), 2);
        assert_eq!(hiz.level_size(1), Some((1, 1)));
        assert_eq!(hiz.texel(1, 0, 0), Some(0.1));
        assert_eq!(hiz.sample(0, Vec2::new(0.99, 0.0)), 0.7);
    }

    #[test]
    fn direct_path_picks_the_coarsest_acceptable_level() {
        let lods = [
            LodRange { first_index: 0, index_count: 300, cluster_count: 4, max_error: 0.0 },
            LodRange { first_index: 300, index_count: 150, cluster_count: 2, max_error: 0.005 },
            LodRange { first_index: 450, index_count: 60, cluster_count: 1, max_error: 0.2 },
        ];
        let proj = Mat4::perspective_infinite_reverse_rh(1.0, 1.0, 0.1);
        let instance = InstanceData::new(Mat4::IDENTITY, 0);
        let sphere = [0.0, 0.0, 0.0, 1.0];
        let at = |z: f32, settings: &CullSettings| {
            let camera = Vec3::new(0.0, 0.0, z);
            let view = Mat4::look_at_rh(camera, Vec3::ZERO, Vec3::Y);
            CullUniforms::new(view, proj, camera, [512, 512], settings, 16)
        };
        let settings = CullSettings::default();
        assert_eq!(select_mesh_lod(&lods, 2, sphere, &instance, &at(5.0, &settings)), 1);
        assert_eq!(select_mesh_lod(&lods, 2, sphere, &instance, &at(500.0, &settings)), 2);

        let forced = CullSettings { auto_lod: false, forced_lod: 7, ..Default::default() };
        assert_eq!(select_mesh_lod(&lods, 2, sphere, &instance, &at(5.0, &forced)), 0);
    }

    #[test]
    fn mip_chain_length() {
        assert_eq!(mip_count_for(1, 1), 1);
        assert_eq!(mip_count_for(1280, 720), 11);
        assert_eq!(mip_count_for(64, 3), 7);
    }
}
