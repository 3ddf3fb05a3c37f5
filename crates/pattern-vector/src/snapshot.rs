//! Snapshot codec for the on-disk index format.
//!
//! Layout (little-endian):
//!
//! ```text
//! header = magic u32 | version u32 | m u32 | ef_construction u32
//!        | metric u8 | dimension u32 | node_count u64 | checksum u64
//! record = id u64 | level u32 | vector f64 x dim
//!        | metadata_len u32 | metadata bytes
//!        | per layer 0..=level: neighbor_count u32, neighbor_ids u64 x n
//! ```
//!
//! The checksum is a crc32 (stored zero-extended) over the header minus
//! its checksum field plus the full record stream. Writes go to a temp
//! file that is fsynced and atomically renamed over the target.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::warn;

use crate::config::IndexConfig;
use crate::distance::{validate_vector, DistanceMetric};
use crate::error::IndexError;
use crate::hnsw::HnswGraph;
use crate::node::{Node, NodeStore};

pub const SNAPSHOT_MAGIC: u32 = u32::from_le_bytes(*b"PVIX");
pub const SNAPSHOT_VERSION: u32 = 1;

/// Header length; the checksum u64 occupies the final 8 bytes.
const HEADER_LEN: usize = 37;
const CHECKSUM_OFFSET: usize = HEADER_LEN - 8;

/// Upper bound accepted for a stored node level; far above anything the
/// sampler can produce, it only guards against garbage allocations.
const MAX_STORED_LEVEL: u32 = 64;

/// Serialize the graph into snapshot bytes.
pub(crate) fn encode(graph: &HnswGraph) -> Vec<u8> {
    let config = graph.config();

    let mut ids: Vec<u64> = graph.store().ids().collect();
    ids.sort_unstable();

    let mut body = Vec::new();
    for id in ids {
        let node = match graph.store().get(id) {
            Some(node) => node,
            None => continue,
        };
        body.extend_from_slice(&node.id.to_le_bytes());
        body.extend_from_slice(&node.level.to_le_bytes());
        for value in &node.vector {
            body.extend_from_slice(&value.to_le_bytes());
        }
        body.extend_from_slice(&(node.metadata.len() as u32).to_le_bytes());
        body.extend_from_slice(&node.metadata);
        for list in &node.neighbors {
            body.extend_from_slice(&(list.len() as u32).to_le_bytes());
            for nb in list {
                body.extend_from_slice(&nb.to_le_bytes());
            }
        }
    }

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(&(config.connectivity as u32).to_le_bytes());
    out.extend_from_slice(&(config.expansion_add as u32).to_le_bytes());
    out.push(config.metric.as_u8());
    out.extend_from_slice(&(config.dimension as u32).to_le_bytes());
    out.extend_from_slice(&(graph.len() as u64).to_le_bytes());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&out);
    hasher.update(&body);
    let checksum = hasher.finalize() as u64;

    out.extend_from_slice(&checksum.to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Write snapshot bytes to `path` atomically (temp file + rename).
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Load and fully validate a snapshot.
///
/// The caller rebuilds the graph from the returned store; the entry point
/// is always recomputed from the data, never read from the file.
pub fn load(path: &Path, config: &IndexConfig) -> Result<NodeStore, IndexError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes, config)
}

pub(crate) fn decode(bytes: &[u8], config: &IndexConfig) -> Result<NodeStore, IndexError> {
    let header = parse_header(bytes)?;
    header.check_params(config)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[..CHECKSUM_OFFSET]);
    hasher.update(&bytes[HEADER_LEN..]);
    let computed = hasher.finalize() as u64;
    if computed != header.checksum {
        return Err(IndexError::Corrupted(format!(
            "checksum mismatch: stored {:#x}, computed {:#x}",
            header.checksum, computed
        )));
    }

    let mut cursor = Cursor::new(&bytes[HEADER_LEN..]);
    let mut store = NodeStore::new();
    for _ in 0..header.node_count {
        let node = read_record(&mut cursor, header.dimension, true)?;
        if store.contains(node.id) {
            return Err(IndexError::Corrupted(format!("duplicate node id {}", node.id)));
        }
        store.restore(node);
    }
    if cursor.remaining() != 0 {
        return Err(IndexError::Corrupted(format!(
            "{} trailing bytes after record stream",
            cursor.remaining()
        )));
    }
    Ok(store)
}

/// Best-effort recovery from a snapshot that failed validation.
///
/// Parses records sequentially until the first malformed one. Adjacency
/// lists are discarded (untrusted); the recovered nodes serve linear-scan
/// queries in degraded mode.
pub(crate) fn salvage(path: &Path, config: &IndexConfig) -> Result<NodeStore, IndexError> {
    let bytes = std::fs::read(path)?;
    let header = parse_header(&bytes)?;
    header.check_params(config)?;

    let mut cursor = Cursor::new(&bytes[HEADER_LEN..]);
    let mut store = NodeStore::new();
    for _ in 0..header.node_count {
        match read_record(&mut cursor, header.dimension, false) {
            // A record can parse cleanly yet carry damaged content; drop
            // vectors that would no longer pass insert validation
            Ok(node)
                if store.contains(node.id)
                    || validate_vector(&node.vector, header.dimension, header.metric)
                        .is_err() =>
            {
                continue
            }
            Ok(node) => store.restore(node),
            Err(_) => break,
        }
    }
    warn!(
        recovered = store.len(),
        expected = header.node_count,
        "salvaged records from corrupt snapshot"
    );
    Ok(store)
}

/// Structural parameters read from a snapshot header, for tooling that
/// needs them before an index can be opened.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub connectivity: usize,
    pub ef_construction: usize,
    pub node_count: u64,
}

/// Read and validate only the header of a snapshot file.
pub fn read_info(path: &Path) -> Result<SnapshotInfo, IndexError> {
    use std::io::Read;
    let mut file = File::open(path)?;
    let mut buf = [0u8; HEADER_LEN];
    file.read_exact(&mut buf)?;
    let header = parse_header(&buf)?;
    Ok(SnapshotInfo {
        dimension: header.dimension,
        metric: header.metric,
        connectivity: header.m,
        ef_construction: header.ef_construction,
        node_count: header.node_count,
    })
}

struct Header {
    m: usize,
    ef_construction: usize,
    metric: DistanceMetric,
    dimension: usize,
    node_count: u64,
    checksum: u64,
}

impl Header {
    fn check_params(&self, config: &IndexConfig) -> Result<(), IndexError> {
        // ef_construction is advisory and may change between sessions;
        // dimension, metric, and connectivity are structural.
        if self.dimension != config.dimension {
            return Err(IndexError::Corrupted(format!(
                "snapshot dimension {} does not match configured {}",
                self.dimension, config.dimension
            )));
        }
        if self.metric != config.metric {
            return Err(IndexError::Corrupted(
                "snapshot metric does not match configured metric".to_string(),
            ));
        }
        if self.m != config.connectivity {
            return Err(IndexError::Corrupted(format!(
                "snapshot connectivity {} does not match configured {}",
                self.m, config.connectivity
            )));
        }
        Ok(())
    }
}

fn parse_header(bytes: &[u8]) -> Result<Header, IndexError> {
    if bytes.len() < HEADER_LEN {
        return Err(IndexError::Corrupted("file shorter than header".to_string()));
    }
    let mut cursor = Cursor::new(&bytes[..HEADER_LEN]);
    let magic = cursor.read_u32()?;
    if magic != SNAPSHOT_MAGIC {
        return Err(IndexError::Corrupted(format!(
            "bad magic: expected {:#x}, got {:#x}",
            SNAPSHOT_MAGIC, magic
        )));
    }
    let version = cursor.read_u32()?;
    if version != SNAPSHOT_VERSION {
        return Err(IndexError::Corrupted(format!(
            "unsupported snapshot version {}",
            version
        )));
    }
    let m = cursor.read_u32()? as usize;
    let ef_construction = cursor.read_u32()? as usize;
    let metric_code = cursor.read_u8()?;
    let metric = DistanceMetric::from_u8(metric_code).ok_or_else(|| {
        IndexError::Corrupted(format!("unknown metric code {}", metric_code))
    })?;
    let dimension = cursor.read_u32()? as usize;
    let node_count = cursor.read_u64()?;
    let checksum = cursor.read_u64()?;
    Ok(Header {
        m,
        ef_construction,
        metric,
        dimension,
        node_count,
        checksum,
    })
}

fn read_record(
    cursor: &mut Cursor<'_>,
    dimension: usize,
    keep_adjacency: bool,
) -> Result<Node, IndexError> {
    let id = cursor.read_u64()?;
    let level = cursor.read_u32()?;
    if level > MAX_STORED_LEVEL {
        return Err(IndexError::Corrupted(format!(
            "node {} has implausible level {}",
            id, level
        )));
    }

    let mut vector = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        vector.push(cursor.read_f64()?);
    }

    let metadata_len = cursor.read_u32()? as usize;
    if metadata_len > cursor.remaining() {
        return Err(IndexError::Corrupted(format!(
            "node {} metadata length {} exceeds remaining bytes",
            id, metadata_len
        )));
    }
    let metadata = cursor.read_bytes(metadata_len)?.to_vec();

    let mut node = Node::new(id, vector, metadata, level);
    for layer in 0..=level {
        let count = cursor.read_u32()? as usize;
        if count * 8 > cursor.remaining() {
            return Err(IndexError::Corrupted(format!(
                "node {} neighbor count {} exceeds remaining bytes",
                id, count
            )));
        }
        let mut list = Vec::with_capacity(count);
        for _ in 0..count {
            list.push(cursor.read_u64()?);
        }
        if keep_adjacency {
            node.neighbors[layer as usize] = list;
        }
    }
    Ok(node)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], IndexError> {
        if self.remaining() < len {
            return Err(IndexError::Corrupted(
                "truncated record stream".to_string(),
            ));
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, IndexError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, IndexError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    fn read_u64(&mut self) -> Result<u64, IndexError> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("length checked")))
    }

    fn read_f64(&mut self) -> Result<f64, IndexError> {
        let bytes = self.read_bytes(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().expect("length checked")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LevelGenerator;
    use tempfile::TempDir;

    fn sample_graph() -> HnswGraph {
        let config = IndexConfig::new(4)
            .with_metric(DistanceMetric::Euclidean)
            .with_seed(77);
        let mut graph = HnswGraph::new(config.clone());
        let mut levels = LevelGenerator::new(config.level_multiplier, Some(77));
        for i in 0..30u64 {
            let v = vec![i as f64, (i * 2) as f64, 0.5, -1.0];
            let level = levels.next_level();
            let plan = if graph.is_empty() {
                None
            } else {
                Some(graph.plan_insert(&v, level))
            };
            graph.commit_insert(v, format!("meta-{i}").into_bytes(), level, plan);
        }
        graph
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let graph = sample_graph();
        let bytes = encode(&graph);
        let store = decode(&bytes, graph.config()).unwrap();

        assert_eq!(store.len(), 30);
        let original = graph.store().get(7).unwrap();
        let restored = store.get(7).unwrap();
        assert_eq!(restored.vector, original.vector);
        assert_eq!(restored.metadata, b"meta-7");
        assert_eq!(restored.level, original.level);
        assert_eq!(restored.neighbors, original.neighbors);
    }

    #[test]
    fn test_save_and_load_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.pvix");
        let graph = sample_graph();

        write_atomic(&path, &encode(&graph)).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let store = load(&path, graph.config()).unwrap();
        assert_eq!(store.len(), 30);
    }

    #[test]
    fn test_bit_flip_detected() {
        let graph = sample_graph();
        let mut bytes = encode(&graph);
        let mid = HEADER_LEN + bytes[HEADER_LEN..].len() / 2;
        bytes[mid] ^= 0x40;

        let result = decode(&bytes, graph.config());
        assert!(matches!(result, Err(IndexError::Corrupted(_))));
    }

    #[test]
    fn test_truncation_detected() {
        let graph = sample_graph();
        let bytes = encode(&graph);
        let truncated = &bytes[..bytes.len() - 16];

        let result = decode(truncated, graph.config());
        assert!(matches!(result, Err(IndexError::Corrupted(_))));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let graph = sample_graph();
        let mut bytes = encode(&graph);
        bytes[0] = 0xFF;

        let result = decode(&bytes, graph.config());
        assert!(matches!(result, Err(IndexError::Corrupted(_))));
    }

    #[test]
    fn test_param_mismatch_rejected() {
        let graph = sample_graph();
        let bytes = encode(&graph);

        let other = IndexConfig::new(8).with_metric(DistanceMetric::Euclidean);
        let result = decode(&bytes, &other);
        assert!(matches!(result, Err(IndexError::Corrupted(_))));
    }

    #[test]
    fn test_salvage_recovers_prefix() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.pvix");
        let graph = sample_graph();

        let mut bytes = encode(&graph);
        // Corrupt the tail: full validation fails, a record prefix survives
        let len = bytes.len();
        bytes.truncate(len - 40);
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            load(&path, graph.config()),
            Err(IndexError::Corrupted(_))
        ));

        let store = salvage(&path, graph.config()).unwrap();
        assert!(!store.is_empty());
        assert!(store.len() < 30);
        // Salvaged nodes carry no adjacency
        for node in store.iter() {
            assert!(node.neighbors.iter().all(|l| l.is_empty()));
        }
    }
}
