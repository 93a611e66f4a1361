#![allow(dead_code)]

use glam::Vec3;
use lume_virtualgeo::{process_mesh, ClusterOptions, ClusteredMesh, Vertex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// Cube subdivided `n` times per face and projected onto the unit sphere.
/// Vertices on shared cube edges are welded.
pub fn cube_sphere(n: u32) -> (Vec<Vertex>, Vec<u32>) {
    let mut lookup: HashMap<[u32; 3], u32> = HashMap::new();
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    let mut vertex = |p: [u32; 3]| -> u32 {
        *lookup.entry(p).or_insert_with(|| {
            let pos = (Vec3::new(p[0] as f32, p[1] as f32, p[2] as f32) * (2.0 / n as f32) - Vec3::ONE).normalize();
            let uv = [0.5 + pos.z.atan2(pos.x) / std::f32::consts::TAU, 0.5 - pos.y.asin() / std::f32::consts::PI];
            vertices.push(Vertex::new(pos.to_array(), pos.to_array(), uv));
            vertices.len() as u32 - 1
        })
    };

    // Lattice coordinates of face point (u, v); each mapping winds counter-clockwise
    // seen from outside.
    let faces: [fn(u32, u32, u32) -> [u32; 3]; 6] = [
        |u, v, n| [n, u, v],
        |u, v, _| [0, v, u],
        |u, v, n| [v, n, u],
        |u, v, _| [u, 0, v],
        |u, v, n| [u, v, n],
        |u, v, _| [v, u, 0],
    ];
    for face in faces {
        for v in 0..n {
            for u in 0..n {
                let a = vertex(face(u, v, n));
                let b = vertex(face(u + 1, v, n));
                let c = vertex(face(u + 1, v + 1, n));
                let d = vertex(face(u, v + 1, n));
                indices.extend_from_slice(&[a, b, c, a, c, d]);
            }
        }
    }
    (vertices, indices)
}

/// Cube-sphere cut down to exactly `triangles` triangles.
pub fn cube_sphere_triangles(triangles: usize) -> (Vec<Vertex>, Vec<u32>) {
    let mut n = 1;
    while (6 * 2 * n * n) < triangles as u32 {
        n += 1;
    }
    let (vertices, mut indices) = cube_sphere(n);
    indices.truncate(triangles * 3);
    (vertices, indices)
}

/// The 10,000-triangle test mesh.
pub fn test_sphere() -> (Vec<Vertex>, Vec<u32>) {
    cube_sphere_triangles(10_000)
}

pub fn built_sphere(triangles: usize, max_lod_levels: u32) -> ClusteredMesh {
    let (vertices, indices) = cube_sphere_triangles(triangles);
    let options = ClusterOptions { max_lod_levels, ..Default::default() };
    process_mesh(&vertices, &indices, &options).expect("cube-sphere builds")
}

/// Fresh directory under the system temp dir, removed on drop.
pub struct ScratchDir(PathBuf);

impl ScratchDir {
    pub fn new(tag: &str) -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        let path = std::env::temp_dir().join(format!(
            "lume-virtualgeo-{}-{}-{}",
            tag,
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).expect("create scratch dir");
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
