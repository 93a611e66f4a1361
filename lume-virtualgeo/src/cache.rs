//! `.micluster` files: a persisted [`ClusteredMesh`].
//!
//! Layout, all little-endian:
//!
//! | offset | contents |
//! |---|---|
//! | 0 | [`CacheHeader`], bincode fixed-int encoding, zero-padded to 128 bytes |
//! | 128 | `vertex_count` x [`Vertex`] (32 bytes) |
//! | .. | `index_count` x `u32` cluster-local indices |
//! | .. | `cluster_count` x [`Cluster`] (128 bytes) |
//! | .. | `child_count` x `u32` DAG child ids |
//!
//! Every section starts 4-byte aligned, so a memory map can be cast in place.
//! The cache is never trusted over the source: any mismatch is a miss.

use anyhow::{bail, ensure, Context, Result};
use log::{debug, info, warn};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::processor::{BuildError, BuildStats, ClusterOptions, ClusteredMesh};
use crate::util::{fnv1a_extend, FNV_SEED};
use crate::{Cluster, Vertex};

pub const CACHE_MAGIC: [u8; 4] = *b"MICL";
pub const CACHE_VERSION: u32 = 3;
pub const CACHE_EXTENSION: &str = "micluster";
pub const HEADER_SIZE: usize = 128;

/// Set when the file carries more than one LOD level.
pub const FLAG_HAS_DAG: u32 = 1 << 0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub flags: u32,
    pub vertex_count: u64,
    pub index_count: u64,
    pub cluster_count: u64,
    pub child_count: u64,
    pub lod_count: u32,
    pub source_hash: u64,
    pub source_mtime_secs: u64,
    pub source_mtime_nanos: u32,
    pub build_hash: u64,
    pub bounding_sphere: [f32; 4],
    pub aabb_min: [f32; 3],
    pub aabb_max: [f32; 3],
    pub payload_hash: u64,
}

impl CacheHeader {
    fn payload_size(&self) -> Option<u64> {
        let v = self.vertex_count.checked_mul(std::mem::size_of::<Vertex>() as u64)?;
        let i = self.index_count.checked_mul(4)?;
        let c = self.cluster_count.checked_mul(std::mem::size_of::<Cluster>() as u64)?;
        let k = self.child_count.checked_mul(4)?;
        v.checked_add(i)?.checked_add(c)?.checked_add(k)
    }
}

/// Content hash and modification time of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStamp {
    pub hash: u64,
    pub mtime_secs: u64,
    pub mtime_nanos: u32,
}

impl SourceStamp {
    pub fn of(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_context(|| format!("Failed to open source: {:?}", path))?;
        let modified = file
            .metadata()
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to read modification time of {:?}", path))?;
        let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();

        let mut hash = FNV_SEED;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hash = fnv1a_extend(hash, &buf[..n]);
        }
        Ok(Self { hash, mtime_secs: since_epoch.as_secs(), mtime_nanos: since_epoch.subsec_nanos() })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheStatus {
    Valid,
    Missing,
    /// Well-formed, but built from a different source, format or pipeline.
    Stale(String),
    /// Unreadable or inconsistent.
    Corrupt(String),
}

pub fn cache_path_for(source: &Path) -> PathBuf {
    source.with_extension(CACHE_EXTENSION)
}

fn payload_hash(mesh: &ClusteredMesh) -> u64 {
    let mut h = FNV_SEED;
    h = fnv1a_extend(h, bytemuck::cast_slice(&mesh.vertices));
    h = fnv1a_extend(h, bytemuck::cast_slice(&mesh.indices));
    h = fnv1a_extend(h, bytemuck::cast_slice(&mesh.clusters));
    fnv1a_extend(h, bytemuck::cast_slice(&mesh.children))
}

/// Writes `mesh` to `path`, stamped with the current state of `source`.
///
/// The file is written next to its destination and renamed into place, so a
/// crash never leaves a half-written cache behind.
pub fn save(path: &Path, mesh: &ClusteredMesh, source: &Path) -> Result<()> {
    let stamp = SourceStamp::of(source)?;
    let header = CacheHeader {
        magic: CACHE_MAGIC,
        version: CACHE_VERSION,
        flags: if mesh.max_lod_level > 0 { FLAG_HAS_DAG } else { 0 },
        vertex_count: mesh.vertices.len() as u64,
        index_count: mesh.indices.len() as u64,
        cluster_count: mesh.clusters.len() as u64,
        child_count: mesh.children.len() as u64,
        lod_count: mesh.max_lod_level + 1,
        source_hash: stamp.hash,
        source_mtime_secs: stamp.mtime_secs,
        source_mtime_nanos: stamp.mtime_nanos,
        build_hash: mesh.build_hash,
        bounding_sphere: mesh.bounding_sphere,
        aabb_min: mesh.aabb_min,
        aabb_max: mesh.aabb_max,
        payload_hash: payload_hash(mesh),
    };

    let mut header_bytes = bincode::serialize(&header).context("Failed to encode cache header")?;
    ensure!(header_bytes.len() <= HEADER_SIZE, "cache header grew past {} bytes", HEADER_SIZE);
    header_bytes.resize(HEADER_SIZE, 0);

    let tmp = path.with_extension(format!("{}.tmp", CACHE_EXTENSION));
    {
        let file = File::create(&tmp).with_context(|| format!("Failed to create cache file: {:?}", tmp))?;
        let mut writer = BufWriter::with_capacity(1024 * 1024, file);
        writer.write_all(&header_bytes)?;
        writer.write_all(bytemuck::cast_slice(&mesh.vertices))?;
        writer.write_all(bytemuck::cast_slice(&mesh.indices))?;
        writer.write_all(bytemuck::cast_slice(&mesh.clusters))?;
        writer.write_all(bytemuck::cast_slice(&mesh.children))?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move cache into place: {:?}", path))?;

    debug!(
        "saved {:?}: {} vertices, {} clusters, {} LODs",
        path,
        mesh.vertices.len(),
        mesh.clusters.len(),
        mesh.max_lod_level + 1
    );
    Ok(())
}

fn decode_header(bytes: &[u8]) -> Result<CacheHeader> {
    ensure!(bytes.len() >= HEADER_SIZE, "file too small to be a cluster cache ({} bytes)", bytes.len());
    let header: CacheHeader = bincode::deserialize(&bytes[..HEADER_SIZE]).context("Failed to decode cache header")?;
    ensure!(header.magic == CACHE_MAGIC, "bad magic {:?}", header.magic);
    Ok(header)
}

pub fn read_header(path: &Path) -> Result<CacheHeader> {
    let mut file = File::open(path).with_context(|| format!("Failed to open cache file: {:?}", path))?;
    let mut bytes = vec![0u8; HEADER_SIZE];
    file.read_exact(&mut bytes).context("cache header truncated")?;
    decode_header(&bytes)
}

fn section<'a, T: bytemuck::Pod>(bytes: &'a [u8], offset: &mut usize, count: u64) -> Result<&'a [T]> {
    let len = count as usize * std::mem::size_of::<T>();
    let end = offset.checked_add(len).context("section size overflow")?;
    ensure!(end <= bytes.len(), "section at {} runs past end of file", offset);
    let slice = bytemuck::try_cast_slice(&bytes[*offset..end]).map_err(|e| anyhow::anyhow!("misaligned section: {:?}", e))?;
    *offset = end;
    Ok(slice)
}

/// Maps and decodes a cache file. Any inconsistency is an error; partial data is
/// never returned.
pub fn load(path: &Path) -> Result<ClusteredMesh> {
    let file = File::open(path).with_context(|| format!("Failed to open cache file: {:?}", path))?;
    // SAFETY: the map is read-only and dropped before returning; every section is
    // copied out.
    let mmap = unsafe { Mmap::map(&file)? };

    let header = decode_header(&mmap)?;
    if header.version != CACHE_VERSION {
        bail!("cache version {} does not match {}", header.version, CACHE_VERSION);
    }
    let expected = header.payload_size().context("section counts overflow")?;
    let actual = (mmap.len() - HEADER_SIZE) as u64;
    ensure!(actual == expected, "payload is {} bytes, header describes {}", actual, expected);

    let mut offset = HEADER_SIZE;
    let vertices: &[Vertex] = section(&mmap, &mut offset, header.vertex_count)?;
    let indices: &[u32] = section(&mmap, &mut offset, header.index_count)?;
    let clusters: &[Cluster] = section(&mmap, &mut offset, header.cluster_count)?;
    let children: &[u32] = section(&mmap, &mut offset, header.child_count)?;
    ensure!(header.lod_count > 0, "cache declares zero LOD levels");

    let mesh = ClusteredMesh {
        vertices: vertices.to_vec(),
        indices: indices.to_vec(),
        clusters: clusters.to_vec(),
        children: children.to_vec(),
        max_lod_level: header.lod_count - 1,
        bounding_sphere: header.bounding_sphere,
        aabb_min: header.aabb_min,
        aabb_max: header.aabb_max,
        build_hash: header.build_hash,
        stats: BuildStats::default(),
    };
    ensure!(payload_hash(&mesh) == header.payload_hash, "payload checksum mismatch");
    mesh.validate().map_err(|e: BuildError| anyhow::anyhow!("{}", e))?;
    Ok(mesh)
}

/// Compares the cache header against the current state of `source`.
pub fn check(path: &Path, source: &Path) -> CacheStatus {
    if !path.exists() {
        return CacheStatus::Missing;
    }
    let header = match read_header(path) {
        Ok(h) => h,
        Err(e) => return CacheStatus::Corrupt(format!("{:#}", e)),
    };
    if header.version != CACHE_VERSION {
        return CacheStatus::Stale(format!("format version {} (current {})", header.version, CACHE_VERSION));
    }
    match (std::fs::metadata(path), header.payload_size()) {
        (Ok(meta), Some(size)) if meta.len() == HEADER_SIZE as u64 + size => {}
        (Ok(meta), _) => return CacheStatus::Corrupt(format!("file is {} bytes, header disagrees", meta.len())),
        (Err(e), _) => return CacheStatus::Corrupt(e.to_string()),
    }
    let stamp = match SourceStamp::of(source) {
        Ok(s) => s,
        Err(e) => return CacheStatus::Stale(format!("source unreadable: {:#}", e)),
    };
    if stamp.mtime_secs != header.source_mtime_secs || stamp.mtime_nanos != header.source_mtime_nanos {
        return CacheStatus::Stale("source modification time changed".into());
    }
    if stamp.hash != header.source_hash {
        return CacheStatus::Stale("source content changed".into());
    }
    CacheStatus::Valid
}

pub fn is_valid(path: &Path, source: &Path) -> bool {
    check(path, source) == CacheStatus::Valid
}

/// Loads the cache when it is valid for `source` and was produced with
/// `options`; otherwise runs `build` and rewrites the cache. Cache problems are
/// logged and never fail the call.
pub fn load_or_build<F>(path: &Path, source: &Path, options: &ClusterOptions, build: F) -> Result<ClusteredMesh>
where
    F: FnOnce() -> std::result::Result<ClusteredMesh, BuildError>,
{
    let build_hash = options.pipeline_fingerprint();
    match check(path, source) {
        CacheStatus::Valid => match load(path) {
            Ok(mesh) if mesh.build_hash == build_hash => {
                debug!("cache hit: {:?}", path);
                return Ok(mesh);
            }
            Ok(_) => info!("cache {:?} was built with different options, rebuilding", path),
            Err(e) => warn!("cache {:?} failed to load ({:#}), rebuilding", path, e),
        },
        CacheStatus::Missing => debug!("no cache at {:?}", path),
        CacheStatus::Stale(reason) => info!("cache {:?} is stale: {}", path, reason),
        CacheStatus::Corrupt(reason) => warn!("cache {:?} is corrupt: {}", path, reason),
    }

    let mesh = build().map_err(|e| anyhow::anyhow!("{}", e)).with_context(|| format!("Failed to build {:?}", source))?;
    if let Err(e) = save(path, &mesh, source) {
        warn!("could not write cache {:?}: {:#}", path, e);
    }
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fits_its_slot() {
        let header = CacheHeader {
            magic: CACHE_MAGIC,
            version: CACHE_VERSION,
            flags: 0,
            vertex_count: 0,
            index_count: 0,
            cluster_count: 0,
            child_count: 0,
            lod_count: 1,
            source_hash: 0,
            source_mtime_secs: 0,
            source_mtime_nanos: 0,
            build_hash: 0,
            bounding_sphere: [0.0; 4],
            aabb_min: [0.0; 3],
            aabb_max: [0.0; 3],
            payload_hash: 0,
        };
        let bytes = bincode::serialize(&header).unwrap();
        assert_eq!(bytes.len(), 124);
        assert_eq!(&bytes[..4], b"MICL");
        assert_eq!(decode_header(&[bytes, vec![0; 4]].concat()).unwrap(), header);
    }

    #[test]
    fn rejects_short_files() {
        assert!(decode_header(&[0u8; 16]).is_err());
    }
}
