use anyhow::{bail, Context, Result};
use glam::Vec3;
use log::{error, info, warn};
use lume_virtualgeo::cache::{self, CacheStatus};
use lume_virtualgeo::{process_mesh, ClusterOptions, Vertex};
use rayon::prelude::*;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

const USAGE: &str = "Usage: lume-processor <input.obj>... [output.micluster] \
[--target <triangles>] [--lods <levels>] [--seed <n>] [--force] [--verbose]";

struct Args {
    jobs: Vec<(PathBuf, PathBuf)>,
    options: ClusterOptions,
    force: bool,
}

fn parse_args() -> Result<Args> {
    let mut options = ClusterOptions::default();
    let mut force = false;
    let mut positional = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().with_context(|| format!("{} needs a value", name));
        match arg.as_str() {
            "--target" => options.target_cluster_size = value("--target")?.parse().context("--target")?,
            "--lods" => options.max_lod_levels = value("--lods")?.parse().context("--lods")?,
            "--seed" => options.seed = value("--seed")?.parse().context("--seed")?,
            "--force" => force = true,
            "--verbose" => options.verbose = true,
            flag if flag.starts_with("--") => bail!("unknown flag {}\n{}", flag, USAGE),
            path => positional.push(PathBuf::from(path)),
        }
    }

    if options.target_cluster_size == 0 || options.max_lod_levels == 0 {
        bail!("--target and --lods must be positive");
    }
    // `in.obj out.micluster` names the output; otherwise each cache sits next to its source.
    let jobs = match positional.as_slice() {
        [] => bail!("{}", USAGE),
        [input, output] if output.extension().is_some_and(|e| e == cache::CACHE_EXTENSION) => {
            vec![(input.clone(), output.clone())]
        }
        inputs => inputs.iter().map(|p| (p.clone(), cache::cache_path_for(p))).collect(),
    };
    Ok(Args { jobs, options, force })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;

    let start_total = Instant::now();
    let failures: Vec<_> = args
        .jobs
        .par_iter()
        .filter_map(|(input, output)| {
            process_file(input, output, &args.options, args.force)
                .map_err(|e| {
                    error!("{}: {:#}", input.display(), e);
                    input.clone()
                })
                .err()
        })
        .collect();

    info!("Processed {} files in {:.2}s", args.jobs.len(), start_total.elapsed().as_secs_f32());
    if !failures.is_empty() {
        bail!("{} of {} files failed", failures.len(), args.jobs.len());
    }
    Ok(())
}

fn process_file(input: &Path, output: &Path, options: &ClusterOptions, force: bool) -> Result<()> {
    if !force && is_up_to_date(output, input, options) {
        info!("{} is up to date", output.display());
        return Ok(());
    }

    let load_start = Instant::now();
    let (vertices, indices) = load_obj(input)?;
    info!(
        "{}: {} vertices, {} triangles loaded and welded in {:.2}s",
        input.display(),
        vertices.len(),
        indices.len() / 3,
        load_start.elapsed().as_secs_f32()
    );

    let build_start = Instant::now();
    let mesh = process_mesh(&vertices, &indices, options).with_context(|| format!("Failed to build {}", input.display()))?;
    info!(
        "{}: {} clusters over {} LOD levels in {:.2}s",
        input.display(),
        mesh.clusters.len(),
        mesh.max_lod_level + 1,
        build_start.elapsed().as_secs_f32()
    );
    if mesh.stats.dropped_triangles() > 0 {
        warn!("{}: dropped {} triangles", input.display(), mesh.stats.dropped_triangles());
    }

    let save_start = Instant::now();
    cache::save(output, &mesh, input)?;
    info!("Saved {} in {:.2}s", output.display(), save_start.elapsed().as_secs_f32());
    Ok(())
}

fn is_up_to_date(output: &Path, input: &Path, options: &ClusterOptions) -> bool {
    match cache::check(output, input) {
        CacheStatus::Valid => cache::read_header(output).is_ok_and(|h| h.build_hash == options.pipeline_fingerprint()),
        CacheStatus::Missing => false,
        CacheStatus::Stale(reason) | CacheStatus::Corrupt(reason) => {
            info!("{}: rebuilding ({})", output.display(), reason);
            false
        }
    }
}

/// Loads every model of an OBJ file as one mesh, welds identical vertices and
/// recentres it into a 2-unit cube.
fn load_obj(path: &Path) -> Result<(Vec<Vertex>, Vec<u32>)> {
    let (models, _materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)
        .with_context(|| format!("Failed to load OBJ file: {}", path.display()))?;

    let mut raw_vertices = Vec::new();
    let mut raw_indices = Vec::new();
    let mut missing_normals = false;

    for model in models {
        let mesh = &model.mesh;
        let base = raw_vertices.len() as u32;
        let count = mesh.positions.len() / 3;
        missing_normals |= mesh.normals.len() != count * 3;
        for i in 0..count {
            let normal = mesh.normals.get(i * 3..i * 3 + 3).map_or([0.0; 3], |n| [n[0], n[1], n[2]]);
            let uv = mesh.texcoords.get(i * 2..i * 2 + 2).map_or([0.0; 2], |t| [t[0], t[1]]);
            raw_vertices.push(Vertex::new(
                [mesh.positions[i * 3], mesh.positions[i * 3 + 1], mesh.positions[i * 3 + 2]],
                normal,
                uv,
            ));
        }
        raw_indices.extend(mesh.indices.iter().map(|&i| i + base));
    }
    if raw_indices.is_empty() {
        bail!("{} contains no triangles", path.display());
    }

    use meshopt::{generate_vertex_remap, remap_index_buffer, remap_vertex_buffer};
    let (vertex_count, remap) = generate_vertex_remap(&raw_vertices, Some(&raw_indices));
    let mut vertices = remap_vertex_buffer(&raw_vertices, vertex_count, &remap);
    let indices = remap_index_buffer(Some(&raw_indices), vertex_count, &remap);

    if missing_normals {
        compute_normals(&mut vertices, &indices);
    }
    normalize(&mut vertices);
    Ok((vertices, indices))
}

/// Area-weighted vertex normals.
fn compute_normals(vertices: &mut [Vertex], indices: &[u32]) {
    let mut sums = vec![Vec3::ZERO; vertices.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from_array(vertices[i as usize].position));
        let n = (b - a).cross(c - a);
        for &i in tri {
            sums[i as usize] += n;
        }
    }
    for (v, n) in vertices.iter_mut().zip(sums) {
        v.normal = n.normalize_or_zero().to_array();
    }
}

fn normalize(vertices: &mut [Vertex]) {
    let (min, max) = vertices.iter().fold((Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)), |(lo, hi), v| {
        let p = Vec3::from_array(v.position);
        (lo.min(p), hi.max(p))
    });
    let center = (min + max) * 0.5;
    let max_dim = (max - min).max_element();
    let scale = if max_dim > 0.0 { 2.0 / max_dim } else { 1.0 };
    for v in vertices {
        v.position = ((Vec3::from_array(v.position) - center) * scale).to_array();
    }
}
