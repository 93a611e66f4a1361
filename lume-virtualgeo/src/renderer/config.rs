use lume_core::device::TextureFormat;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugMode {
    #[default]
    None,
    ClusterColor,
    Normals,
    LodColor,
}

impl DebugMode {
    pub fn as_u32(self) -> u32 {
        match self {
            DebugMode::None => 0,
            DebugMode::ClusterColor => 1,
            DebugMode::Normals => 2,
            DebugMode::LodColor => 3,
        }
    }
}

/// Per-frame culling and LOD tunables. Changes take effect at the next
/// `begin_frame`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullSettings {
    /// Largest projected error, in pixels, a selected cluster may have.
    pub error_threshold: f32,
    /// Scales the threshold by `2^lod_bias`; positive values pick coarser clusters.
    pub lod_bias: f32,
    /// Level drawn when `auto_lod` is off. Levels a mesh does not have fall back to 0.
    pub forced_lod: u32,
    pub auto_lod: bool,
    pub frustum_culling: bool,
    pub occlusion_culling: bool,
    pub hiz_max_mip: u32,
    pub hiz_depth_bias: f32,
    /// Pyramid depths at or below this value count as empty space.
    pub hiz_no_occluder_depth: f32,
    /// `false` selects the direct path: one indexed draw per instance, no compute pass.
    pub gpu_driven: bool,
    pub debug_mode: DebugMode,
}

impl Default for CullSettings {
    fn default() -> Self {
        Self {
            error_threshold: 1.0,
            lod_bias: 0.0,
            forced_lod: 0,
            auto_lod: true,
            frustum_culling: true,
            occlusion_culling: true,
            hiz_max_mip: 16,
            hiz_depth_bias: 0.0,
            hiz_no_occluder_depth: 0.0,
            gpu_driven: true,
            debug_mode: DebugMode::None,
        }
    }
}

impl CullSettings {
    pub fn effective_threshold(&self) -> f32 {
        self.error_threshold * self.lod_bias.exp2()
    }
}

fn default_color_format() -> TextureFormat {
    TextureFormat::Bgra8UnormSrgb
}

fn default_depth_format() -> TextureFormat {
    TextureFormat::Depth32Float
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualGeoConfig {
    /// Clusters across every uploaded mesh; the rest are truncated at merge time.
    pub max_clusters: u32,
    pub max_instances: u32,
    /// Indirect records per frame.
    pub max_draws: u32,
    pub frames_in_flight: u32,
    #[serde(skip, default = "default_color_format")]
    pub color_format: TextureFormat,
    #[serde(skip, default = "default_depth_format")]
    pub depth_format: TextureFormat,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub cull: CullSettings,
}

impl Default for VirtualGeoConfig {
    fn default() -> Self {
        Self {
            max_clusters: 1 << 18,
            max_instances: 4096,
            max_draws: 1 << 18,
            frames_in_flight: 2,
            color_format: default_color_format(),
            depth_format: default_depth_format(),
            viewport_width: 1280,
            viewport_height: 720,
            cull: CullSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lod_bias_doubles_threshold_per_step() {
        let settings = CullSettings { error_threshold: 1.5, lod_bias: 2.0, ..Default::default() };
        assert_eq!(settings.effective_threshold(), 6.0);
    }

    #[test]
    fn debug_modes_map_to_shader_codes() {
        let modes = [DebugMode::None, DebugMode::ClusterColor, DebugMode::Normals, DebugMode::LodColor];
        assert_eq!(modes.map(DebugMode::as_u32), [0, 1, 2, 3]);
        assert_eq!(DebugMode::default(), DebugMode::None);
    }
}
