mod common;

use std::cell::Cell;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::time::{Duration, SystemTime};

use lume_virtualgeo::cache::{self, CacheStatus, CACHE_VERSION, HEADER_SIZE};
use lume_virtualgeo::{process_mesh, ClusterOptions};

use common::ScratchDir;

fn write_source(dir: &ScratchDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn round_trip_preserves_every_array() {
    common::init_logging();
    let dir = ScratchDir::new("roundtrip");
    let source = write_source(&dir, "sphere.obj", "# sphere\n");
    let target = cache::cache_path_for(&source);
    assert_eq!(target.extension().unwrap(), "micluster");

    let mesh = common::built_sphere(2_000, 3);
    cache::save(&target, &mesh, &source).unwrap();
    let loaded = cache::load(&target).unwrap();

    assert_eq!(bytemuck::cast_slice::<_, u8>(&loaded.vertices), bytemuck::cast_slice::<_, u8>(&mesh.vertices));
    assert_eq!(loaded.indices, mesh.indices);
    assert_eq!(bytemuck::cast_slice::<_, u8>(&loaded.clusters), bytemuck::cast_slice::<_, u8>(&mesh.clusters));
    assert_eq!(loaded.children, mesh.children);
    assert_eq!(loaded.max_lod_level, mesh.max_lod_level);
    assert_eq!(loaded.bounding_sphere, mesh.bounding_sphere);
    assert_eq!(loaded.build_hash, mesh.build_hash);
    assert!(cache::is_valid(&target, &source));
}

#[test]
fn touching_the_source_makes_the_cache_stale() {
    let dir = ScratchDir::new("mtime");
    let source = write_source(&dir, "mesh.obj", "v 0 0 0\n");
    let target = dir.join("mesh.micluster");
    cache::save(&target, &common::built_sphere(500, 1), &source).unwrap();
    assert_eq!(cache::check(&target, &source), CacheStatus::Valid);

    let file = File::options().write(true).open(&source).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(120)).unwrap();
    drop(file);
    assert!(matches!(cache::check(&target, &source), CacheStatus::Stale(_)));
    assert!(!cache::is_valid(&target, &source));

    // A fresh save is valid again.
    cache::save(&target, &common::built_sphere(500, 1), &source).unwrap();
    assert!(cache::is_valid(&target, &source));
}

#[test]
fn content_change_with_the_same_mtime_is_stale() {
    let dir = ScratchDir::new("content");
    let source = write_source(&dir, "mesh.obj", "v 0 0 0\n");
    let mtime = fs::metadata(&source).unwrap().modified().unwrap();
    let target = dir.join("mesh.micluster");
    cache::save(&target, &common::built_sphere(500, 1), &source).unwrap();

    fs::write(&source, "v 1 1 1\n").unwrap();
    File::options().write(true).open(&source).unwrap().set_modified(mtime).unwrap();
    assert_eq!(cache::check(&target, &source), CacheStatus::Stale("source content changed".into()));
}

#[test]
fn missing_and_damaged_files_are_rejected() {
    let dir = ScratchDir::new("damage");
    let source = write_source(&dir, "mesh.obj", "v 0 0 0\n");
    let target = dir.join("mesh.micluster");
    assert_eq!(cache::check(&target, &source), CacheStatus::Missing);

    cache::save(&target, &common::built_sphere(500, 2), &source).unwrap();
    let len = fs::metadata(&target).unwrap().len();

    // Flip a payload byte: the header still matches but the checksum does not.
    let mut file = OpenOptions::new().read(true).write(true).open(&target).unwrap();
    file.seek(SeekFrom::Start(HEADER_SIZE as u64 + 5)).unwrap();
    file.write_all(&[0xAB]).unwrap();
    drop(file);
    assert!(cache::load(&target).is_err());

    // Truncated payload.
    File::options().write(true).open(&target).unwrap().set_len(len - 16).unwrap();
    assert!(matches!(cache::check(&target, &source), CacheStatus::Corrupt(_)));
    assert!(cache::load(&target).is_err());

    // Garbage header.
    fs::write(&target, vec![0x5A; 64]).unwrap();
    assert!(matches!(cache::check(&target, &source), CacheStatus::Corrupt(_)));
}

#[test]
fn older_format_versions_are_stale() {
    let dir = ScratchDir::new("version");
    let source = write_source(&dir, "mesh.obj", "v 0 0 0\n");
    let target = dir.join("mesh.micluster");
    cache::save(&target, &common::built_sphere(500, 1), &source).unwrap();

    // The version follows the 4-byte magic, little-endian.
    let mut file = OpenOptions::new().write(true).open(&target).unwrap();
    file.seek(SeekFrom::Start(4)).unwrap();
    file.write_all(&(CACHE_VERSION - 1).to_le_bytes()).unwrap();
    drop(file);
    assert!(matches!(cache::check(&target, &source), CacheStatus::Stale(_)));
    assert!(cache::load(&target).is_err());
}

#[test]
fn load_or_build_rebuilds_only_on_a_miss() {
    let dir = ScratchDir::new("load-or-build");
    let source = write_source(&dir, "sphere.obj", "# sphere\n");
    let target = dir.join("sphere.micluster");
    let options = ClusterOptions { max_lod_levels: 2, ..Default::default() };
    let (vertices, indices) = common::cube_sphere_triangles(1_000);

    let builds = Cell::new(0);
    let build = || {
        builds.set(builds.get() + 1);
        process_mesh(&vertices, &indices, &options)
    };

    let first = cache::load_or_build(&target, &source, &options, build).unwrap();
    assert_eq!(builds.get(), 1);
    assert!(cache::is_valid(&target, &source));

    let second = cache::load_or_build(&target, &source, &options, build).unwrap();
    assert_eq!(builds.get(), 1);
    assert_eq!(second.clusters, first.clusters);

    let other = ClusterOptions { target_cluster_size: 64, ..options.clone() };
    cache::load_or_build(&target, &source, &other, || {
        builds.set(builds.get() + 1);
        process_mesh(&vertices, &indices, &other)
    })
    .unwrap();
    assert_eq!(builds.get(), 2);
}
