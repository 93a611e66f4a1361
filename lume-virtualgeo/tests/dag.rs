mod common;

use lume_virtualgeo::{build_dag, cluster_mesh, ClusterOptions, DagOptions, NO_PARENT};

#[test]
fn four_levels_shrink_strictly() {
    common::init_logging();
    let mesh = common::built_sphere(10_000, 4);

    assert_eq!(mesh.max_lod_level, 3);
    let counts: Vec<usize> = (0..=3).map(|l| mesh.clusters_at(l).count()).collect();
    for pair in counts.windows(2) {
        assert!(pair[1] < pair[0], "cluster counts per level {:?}", counts);
    }
    assert_eq!(mesh.clusters_at(0).map(|(_, c)| c.triangle_count).sum::<u32>(), 10_000);
    assert!(mesh.validate().is_ok());
}

#[test]
fn errors_never_decrease_towards_the_roots() {
    let mesh = common::built_sphere(10_000, 4);
    for (id, c) in mesh.clusters.iter().enumerate() {
        assert!(c.parent_error >= c.lod_error, "cluster {}", id);
        let mut node = c;
        while node.parent_index != NO_PARENT {
            let parent = &mesh.clusters[node.parent_index as usize];
            assert!(parent.lod_error >= node.lod_error);
            assert_eq!(parent.lod_level, node.lod_level + 1);
            node = parent;
        }
        assert_eq!(node.lod_level, mesh.max_lod_level);
    }
}

#[test]
fn parent_links_mirror_child_lists() {
    let mesh = common::built_sphere(10_000, 4);
    for (id, c) in mesh.clusters.iter().enumerate() {
        let children = &mesh.children[c.child_offset as usize..(c.child_offset + c.child_count) as usize];
        for &child in children {
            let child = &mesh.clusters[child as usize];
            assert_eq!(child.parent_index as usize, id);
            assert_eq!(child.parent_error.to_bits(), c.lod_error.to_bits());
            assert_eq!(child.parent_bounds, c.lod_bounds);
        }
    }
    let roots: Vec<_> = mesh.roots().collect();
    assert!(!roots.is_empty());
    assert!(roots.iter().all(|&r| mesh.clusters[r].parent_error == f32::MAX));
}

#[test]
fn lod_ranges_are_contiguous() {
    let mesh = common::built_sphere(10_000, 4);
    let ranges = mesh.lod_ranges();
    assert_eq!(ranges.len(), 4);
    let mut next = 0;
    for (level, r) in ranges.iter().enumerate() {
        assert_eq!(r.first_index, next, "level {}", level);
        assert_eq!(r.cluster_count as usize, mesh.clusters_at(level as u32).count());
        next += r.index_count;
    }
    assert_eq!(next as usize, mesh.indices.len());
}

#[test]
fn single_level_budget_leaves_the_mesh_flat() {
    let (vertices, indices) = common::test_sphere();
    let options = ClusterOptions { max_lod_levels: 1, ..Default::default() };
    let mut mesh = cluster_mesh(&vertices, &indices, &options).unwrap();
    let clusters = mesh.clusters.len();
    build_dag(&mut mesh, &DagOptions::from(&options));
    assert_eq!(mesh.max_lod_level, 0);
    assert_eq!(mesh.clusters.len(), clusters);
    assert_eq!(mesh.build_hash, options.pipeline_fingerprint());
}

#[test]
fn every_built_level_is_recorded_and_linked() {
    let (vertices, indices) = common::test_sphere();
    let options = ClusterOptions { max_lod_levels: 32, ..Default::default() };
    let mut mesh = cluster_mesh(&vertices, &indices, &options).unwrap();
    build_dag(&mut mesh, &DagOptions { min_clusters: 1, ..DagOptions::from(&options) });

    assert_eq!(mesh.stats.levels.len() as u32, mesh.max_lod_level + 1);
    assert_eq!(mesh.clusters_at(mesh.max_lod_level).count(), 1);
    for (level, stats) in mesh.stats.levels.iter().enumerate() {
        assert_eq!(stats.clusters as usize, mesh.clusters_at(level as u32).count());
    }
    assert!(mesh.validate().is_ok());
}
