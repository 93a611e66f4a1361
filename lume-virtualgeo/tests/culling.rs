mod common;

use glam::{Mat4, Vec3};
use lume_virtualgeo::culling::{cull_cluster, ClusterVisibility, CullUniforms, HizPyramid, InstanceData};
use lume_virtualgeo::{ClusteredMesh, CullSettings, NO_PARENT};

const VIEWPORT: [u32; 2] = [1280, 720];

fn projection() -> Mat4 {
    Mat4::perspective_infinite_reverse_rh(60f32.to_radians(), 16.0 / 9.0, 0.05)
}

fn uniforms_at(camera: Vec3, settings: &CullSettings) -> CullUniforms {
    let view = Mat4::look_at_rh(camera, Vec3::ZERO, Vec3::Y);
    CullUniforms::new(view, projection(), camera, VIEWPORT, settings, 1 << 16)
}

fn visible(mesh: &ClusteredMesh, instance: &InstanceData, uniforms: &CullUniforms, hiz: Option<&HizPyramid>) -> Vec<bool> {
    mesh.clusters
        .iter()
        .map(|c| cull_cluster(c, instance, mesh.max_lod_level, uniforms, hiz) == ClusterVisibility::Visible)
        .collect()
}

fn lod_only() -> CullSettings {
    CullSettings { frustum_culling: false, occlusion_culling: false, ..Default::default() }
}

#[test]
fn lod_cut_selects_one_cluster_per_chain() {
    common::init_logging();
    let mesh = common::built_sphere(10_000, 4);
    let instance = InstanceData::new(Mat4::IDENTITY, 0);

    let mut levels_seen = std::collections::BTreeSet::new();
    for distance in [1.5f32, 4.0, 12.0, 40.0, 150.0, 1000.0] {
        for threshold in [0.5f32, 1.0, 4.0] {
            let settings = CullSettings { error_threshold: threshold, ..lod_only() };
            let selected = visible(&mesh, &instance, &uniforms_at(Vec3::new(0.3, 0.2, distance), &settings), None);

            for (leaf, _) in mesh.clusters_at(0) {
                let mut hits = 0;
                let mut node = leaf;
                loop {
                    if selected[node] {
                        hits += 1;
                        levels_seen.insert(mesh.clusters[node].lod_level);
                    }
                    match mesh.clusters[node].parent_index {
                        NO_PARENT => break,
                        parent => node = parent as usize,
                    }
                }
                assert_eq!(hits, 1, "leaf {} at distance {} threshold {}", leaf, distance, threshold);
            }
        }
    }
    assert!(levels_seen.contains(&0));
    assert!(levels_seen.len() > 1, "only levels {:?} were ever selected", levels_seen);
}

#[test]
fn forced_lod_overrides_the_error_test() {
    let mesh = common::built_sphere(10_000, 4);
    let instance = InstanceData::new(Mat4::IDENTITY, 0);

    let settings = CullSettings { auto_lod: false, forced_lod: 2, ..lod_only() };
    let selected = visible(&mesh, &instance, &uniforms_at(Vec3::new(0.0, 0.0, 3.0), &settings), None);
    for (c, &s) in mesh.clusters.iter().zip(&selected) {
        assert_eq!(s, c.lod_level == 2);
    }

    let beyond = CullSettings { auto_lod: false, forced_lod: 9, ..lod_only() };
    let selected = visible(&mesh, &instance, &uniforms_at(Vec3::new(0.0, 0.0, 3.0), &beyond), None);
    for (c, &s) in mesh.clusters.iter().zip(&selected) {
        assert_eq!(s, c.lod_level == 0);
    }
}

#[test]
fn frustum_rejects_only_clusters_outside() {
    let mesh = common::built_sphere(10_000, 1);
    let settings = CullSettings { occlusion_culling: false, auto_lod: false, ..Default::default() };
    let uniforms = uniforms_at(Vec3::new(0.0, 0.0, 5.0), &settings);

    // In front of the camera everything passes.
    let centered = InstanceData::new(Mat4::IDENTITY, 0);
    assert!(visible(&mesh, &centered, &uniforms, None).iter().all(|&v| v));

    // Far off to the side nothing does.
    let aside = InstanceData::new(Mat4::from_translation(Vec3::new(500.0, 0.0, 0.0)), 0);
    for c in &mesh.clusters {
        assert_eq!(cull_cluster(c, &aside, 0, &uniforms, None), ClusterVisibility::CulledFrustum);
    }

    // Behind the camera.
    let behind = InstanceData::new(Mat4::from_translation(Vec3::new(0.0, 0.0, 20.0)), 0);
    assert!(visible(&mesh, &behind, &uniforms, None).iter().all(|&v| !v));
}

#[test]
fn first_frame_never_occludes() {
    let mesh = common::built_sphere(10_000, 1);
    let instance = InstanceData::new(Mat4::IDENTITY, 0);
    let settings = CullSettings { auto_lod: false, ..Default::default() };

    // No pyramid has been built, so the uniforms carry no Hi-Z flag.
    let uniforms = uniforms_at(Vec3::new(0.0, 0.0, 5.0), &settings);
    let wall = HizPyramid::from_depth(VIEWPORT[0], VIEWPORT[1], vec![1.0; (VIEWPORT[0] * VIEWPORT[1]) as usize]).unwrap();
    assert!(visible(&mesh, &instance, &uniforms, Some(&wall)).iter().all(|&v| v));
    assert!(visible(&mesh, &instance, &uniforms, None).iter().all(|&v| v));
}

#[test]
fn occlusion_follows_the_pyramid() {
    let mesh = common::built_sphere(10_000, 1);
    let instance = InstanceData::new(Mat4::IDENTITY, 0);
    let settings = CullSettings { auto_lod: false, ..Default::default() };
    let (w, h) = (VIEWPORT[0], VIEWPORT[1]);
    let uniforms = uniforms_at(Vec3::new(0.0, 0.0, 5.0), &settings).with_hiz(w, h, lume_virtualgeo::culling::mip_count_for(w, h));

    // A wall right at the near plane hides the whole sphere.
    let wall = HizPyramid::from_depth(w, h, vec![1.0; (w * h) as usize]).unwrap();
    for c in &mesh.clusters {
        assert_eq!(cull_cluster(c, &instance, 0, &uniforms, Some(&wall)), ClusterVisibility::CulledOccluded);
    }

    // Cleared depth means nothing was drawn there.
    let empty = HizPyramid::from_depth(w, h, vec![0.0; (w * h) as usize]).unwrap();
    assert!(visible(&mesh, &instance, &uniforms, Some(&empty)).iter().all(|&v| v));

    // An occluder farther away than the sphere hides nothing.
    let far = HizPyramid::from_depth(w, h, vec![0.001; (w * h) as usize]).unwrap();
    assert!(visible(&mesh, &instance, &uniforms, Some(&far)).iter().all(|&v| v));

    // With occlusion disabled the wall is ignored.
    let off = CullSettings { occlusion_culling: false, ..settings };
    let uniforms = uniforms_at(Vec3::new(0.0, 0.0, 5.0), &off).with_hiz(w, h, lume_virtualgeo::culling::mip_count_for(w, h));
    assert!(visible(&mesh, &instance, &uniforms, Some(&wall)).iter().all(|&v| v));
}

/// Orthographic camera at the origin looking down -z whose x/y span maps one
/// world unit to one pixel. View depth -10..0 maps to reversed depth 0..1.
fn pixel_uniforms(width: u32, height: u32) -> CullUniforms {
    let proj = Mat4::orthographic_rh(0.0, width as f32, 0.0, height as f32, 10.0, 0.0);
    let settings = CullSettings { frustum_culling: false, auto_lod: false, ..Default::default() };
    CullUniforms::new(Mat4::IDENTITY, proj, Vec3::ZERO, [width, height], &settings, 16)
        .with_hiz(width, height, lume_virtualgeo::culling::mip_count_for(width, height))
}

fn slab(x: (f32, f32), y: (f32, f32)) -> lume_virtualgeo::Cluster {
    lume_virtualgeo::Cluster {
        aabb_min: [x.0, y.0, -5.0],
        aabb_max: [x.1, y.1, -4.0],
        ..Default::default()
    }
}

#[test]
fn folded_edge_texel_is_sampled_on_odd_levels() {
    let uniforms = pixel_uniforms(9, 1);
    let instance = InstanceData::new(Mat4::IDENTITY, 0);
    // Spans pixels 4..=6; at mip 1 pixel 6 lives in the folded texel 3.
    let cluster = slab((4.5, 6.4), (0.2, 0.8));

    let mut depth = vec![0.9; 9];
    depth[6] = 0.0;
    let holed = HizPyramid::from_depth(9, 1, depth).unwrap();
    assert_eq!(holed.level_size(1), Some((4, 1)));
    assert_eq!(cull_cluster(&cluster, &instance, 0, &uniforms, Some(&holed)), ClusterVisibility::Visible);

    let solid = HizPyramid::from_depth(9, 1, vec![0.9; 9]).unwrap();
    assert_eq!(cull_cluster(&cluster, &instance, 0, &uniforms, Some(&solid)), ClusterVisibility::CulledOccluded);
}

#[test]
fn partial_occluder_hides_only_what_it_covers() {
    let uniforms = pixel_uniforms(9, 1);
    let instance = InstanceData::new(Mat4::IDENTITY, 0);
    // Pixels 0..=4 are covered, 5..=8 are empty.
    let depth = (0..9).map(|x| if x < 5 { 0.9 } else { 0.0 }).collect();
    let hiz = HizPyramid::from_depth(9, 1, depth).unwrap();

    let behind = slab((1.2, 3.4), (0.2, 0.8));
    assert_eq!(cull_cluster(&behind, &instance, 0, &uniforms, Some(&hiz)), ClusterVisibility::CulledOccluded);

    // Reaches past the occluder's edge by one pixel.
    let straddling = slab((3.5, 5.5), (0.2, 0.8));
    assert_eq!(cull_cluster(&straddling, &instance, 0, &uniforms, Some(&hiz)), ClusterVisibility::Visible);

    let beside = slab((6.3, 8.6), (0.2, 0.8));
    assert_eq!(cull_cluster(&beside, &instance, 0, &uniforms, Some(&hiz)), ClusterVisibility::Visible);
}

#[test]
fn occlusion_is_conservative_on_odd_sized_viewports() {
    let (w, h) = (45u32, 23u32);
    let uniforms = pixel_uniforms(w, h);
    let instance = InstanceData::new(Mat4::IDENTITY, 0);
    let hole = |x: u32, y: u32| (x * 7 + y * 13) % 11 == 0;
    let depth = (0..h).flat_map(|y| (0..w).map(move |x| if hole(x, y) { 0.0 } else { 0.9 })).collect();
    let hiz = HizPyramid::from_depth(w, h, depth).unwrap();

    let (mut occluded, mut visible) = (0, 0);
    for x0 in (0..w).step_by(3) {
        for dx in [0, 1, 2, 3, 5, 8, 13, 21] {
            for y0 in (0..h).step_by(4) {
                for dy in [0, 1, 3, 6] {
                    let (x1, y1) = (x0 + dx, y0 + dy);
                    if x1 >= w || y1 >= h {
                        continue;
                    }
                    // Fractional edges keep the covered pixel range unambiguous.
                    let cluster = slab((x0 as f32 + 0.35, x1 as f32 + 0.55), (y0 as f32 + 0.35, y1 as f32 + 0.55));
                    if cull_cluster(&cluster, &instance, 0, &uniforms, Some(&hiz)) != ClusterVisibility::CulledOccluded {
                        visible += 1;
                        continue;
                    }
                    occluded += 1;
                    // Rows count down from the top of the viewport.
                    for row in (h - 1 - y1)..=(h - 1 - y0) {
                        for col in x0..=x1 {
                            assert!(!hole(col, row), "box x {}..{} y {}..{} hides the empty pixel ({}, {})", x0, x1, y0, y1, col, row);
                        }
                    }
                }
            }
        }
    }
    assert!(occluded > 0 && visible > 0, "{} occluded, {} visible", occluded, visible);
}
