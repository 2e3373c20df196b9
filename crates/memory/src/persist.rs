//! On-disk layout of the memory index.
//!
//! Two files live in the index directory:
//!
//! - `vectors.fvix`: binary header plus little-endian `f32` vectors in
//!   ordinal order.
//! - `chunks.jsonl`: a header line, then one commit line per ingestion batch
//!   holding that batch's chunk metadata.
//!
//! Both carry a generation number. An ingestion batch is appended in place:
//! vectors first, then the index header, then the metadata commit line, so a
//! crash leaves at worst an index one generation ahead of its metadata (or
//! uncommitted bytes past the header's count, which are ignored). Appends
//! keep the index's `base_generation`, which lets the loader cut such an
//! index back to the metadata's length. A rebuild rewrites both files
//! through a temp file and rename and resets `base_generation` to its own
//! generation.

use ferrule_core::error::MemoryError;
use ferrule_core::memory::{DocumentChunk, Metric};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const INDEX_FILE: &str = "vectors.fvix";
pub const METADATA_FILE: &str = "chunks.jsonl";

const MAGIC: &[u8; 4] = b"FVIX";
const FORMAT_VERSION: u32 = 1;
pub const METADATA_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 4 + 4 + 8 + 8 + 1 + 4 + 8;

/// Fixed-size header at the start of the index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub generation: u64,
    pub base_generation: u64,
    pub metric: Metric,
    pub dimension: usize,
    /// Committed vectors; bytes past them are an unfinished append
    pub count: usize,
}

impl IndexHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(MAGIC);
        out[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        out[8..16].copy_from_slice(&self.generation.to_le_bytes());
        out[16..24].copy_from_slice(&self.base_generation.to_le_bytes());
        out[24] = self.metric.as_u8();
        out[25..29].copy_from_slice(&(self.dimension as u32).to_le_bytes());
        out[29..37].copy_from_slice(&(self.count as u64).to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MemoryError> {
        let corrupt = |msg: &str| MemoryError::Corruption(format!("index file: {msg}"));

        if bytes.len() < HEADER_LEN {
            return Err(corrupt("truncated header"));
        }
        if &bytes[0..4] != MAGIC {
            return Err(corrupt("bad magic"));
        }

        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };

        let version = u32_at(4);
        if version != FORMAT_VERSION {
            return Err(MemoryError::UnsupportedVersion {
                file: INDEX_FILE,
                found: version,
                supported: FORMAT_VERSION,
            });
        }
        let header = Self {
            generation: u64_at(8),
            base_generation: u64_at(16),
            metric: Metric::from_u8(bytes[24]).ok_or_else(|| corrupt("unknown metric"))?,
            dimension: u32_at(25) as usize,
            count: u64_at(29) as usize,
        };
        if header.dimension == 0 && header.count > 0 {
            return Err(corrupt("zero dimension"));
        }
        Ok(header)
    }

    /// Byte length of the committed part of the file.
    fn committed_len(&self) -> Result<usize, MemoryError> {
        self.count
            .checked_mul(self.dimension)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| MemoryError::Corruption("index file: size overflow".into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexFile {
    pub generation: u64,
    pub base_generation: u64,
    pub metric: Metric,
    pub dimension: usize,
    pub data: Vec<f32>,
}

impl IndexFile {
    pub fn count(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn header(&self) -> IndexHeader {
        IndexHeader {
            generation: self.generation,
            base_generation: self.base_generation,
            metric: self.metric,
            dimension: self.dimension,
            count: self.count(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(&self.header().encode());
        out.extend_from_slice(&encode_values(&self.data));
        out
    }

    /// Decode the committed vectors; bytes past the header's count are
    /// dropped.
    pub fn decode(bytes: &[u8]) -> Result<Self, MemoryError> {
        let header = IndexHeader::decode(bytes)?;
        let committed = header.committed_len()?;
        if bytes.len() < committed {
            return Err(MemoryError::Corruption(format!(
                "index file: expected {} bytes of vectors, found {}",
                committed - HEADER_LEN,
                bytes.len() - HEADER_LEN
            )));
        }

        let data = bytes[HEADER_LEN..committed]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self {
            generation: header.generation,
            base_generation: header.base_generation,
            metric: header.metric,
            dimension: header.dimension,
            data,
        })
    }
}

fn encode_values(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// First line of the metadata file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataHeader {
    version: u32,
    metric: Metric,
    dimension: usize,
    /// Name of the embedder that produced the vectors
    embedder: String,
}

/// One ingestion batch in the metadata file.
#[derive(Debug, Clone, Deserialize)]
struct MetadataCommit {
    generation: u64,
    chunks: Vec<DocumentChunk>,
}

#[derive(Serialize)]
struct CommitRef<'a> {
    generation: u64,
    chunks: &'a [DocumentChunk],
}

/// The metadata file, with every commit folded together.
#[derive(Debug, Clone)]
pub struct MetadataFile {
    pub version: u32,
    /// Generation of the last complete commit
    pub generation: u64,
    pub metric: Metric,
    pub dimension: usize,
    pub embedder: String,
    pub chunks: Vec<DocumentChunk>,
}

impl MetadataFile {
    /// Header line plus a single commit holding every chunk.
    pub fn encode(&self) -> Result<Vec<u8>, MemoryError> {
        let header = MetadataHeader {
            version: self.version,
            metric: self.metric,
            dimension: self.dimension,
            embedder: self.embedder.clone(),
        };
        let mut out = json_line(&header)?;
        out.extend(commit_line(self.generation, &self.chunks)?);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MemoryError> {
        let corrupt = |msg: String| MemoryError::Corruption(format!("metadata file: {msg}"));
        let text = std::str::from_utf8(bytes).map_err(|e| corrupt(e.to_string()))?;

        let mut lines = text.split_inclusive('\n').filter(|line| !line.trim().is_empty());
        let first = lines.next().ok_or_else(|| corrupt("missing header".into()))?;
        let header: MetadataHeader = serde_json::from_str(first).map_err(|e| corrupt(e.to_string()))?;
        if header.version != METADATA_VERSION {
            return Err(MemoryError::UnsupportedVersion {
                file: METADATA_FILE,
                found: header.version,
                supported: METADATA_VERSION,
            });
        }

        let mut last: Option<u64> = None;
        let mut chunks = Vec::new();
        let mut lines = lines.peekable();
        while let Some(line) = lines.next() {
            let commit = match serde_json::from_str::<MetadataCommit>(line) {
                Ok(commit) if line.ends_with('\n') => commit,
                // A torn final line is an append that never committed.
                _ if lines.peek().is_none() => {
                    debug!("Ignoring unfinished metadata commit");
                    break;
                }
                Ok(_) => return Err(corrupt("unterminated commit".into())),
                Err(e) => return Err(corrupt(e.to_string())),
            };
            if let Some(previous) = last.filter(|&g| commit.generation <= g) {
                return Err(corrupt(format!(
                    "commit generation {} does not follow {previous}",
                    commit.generation
                )));
            }
            last = Some(commit.generation);
            chunks.extend(commit.chunks);
        }

        Ok(Self {
            version: header.version,
            generation: last.unwrap_or(0),
            metric: header.metric,
            dimension: header.dimension,
            embedder: header.embedder,
            chunks,
        })
    }
}

fn json_line<T: Serialize>(value: &T) -> Result<Vec<u8>, MemoryError> {
    let mut line = serde_json::to_vec(value)
        .map_err(|e| MemoryError::Storage(format!("Failed to serialize chunk metadata: {e}")))?;
    line.push(b'\n');
    Ok(line)
}

fn commit_line(generation: u64, chunks: &[DocumentChunk]) -> Result<Vec<u8>, MemoryError> {
    json_line(&CommitRef { generation, chunks })
}

/// A consistent (index, metadata) pair, ready to serve.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub generation: u64,
    pub base_generation: u64,
    pub metric: Metric,
    pub dimension: usize,
    pub data: Vec<f32>,
    pub chunks: Vec<DocumentChunk>,
}

/// Result of loading a directory: the data, plus a warning when something
/// had to be discarded.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub loaded: Option<Loaded>,
    pub warning: Option<String>,
}

pub fn index_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE)
}

fn storage(what: &str, path: &Path, e: std::io::Error) -> MemoryError {
    MemoryError::Storage(format!("Failed to {what} {}: {e}", path.display()))
}

/// Write `bytes` to `path` via a synced temp file and rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MemoryError> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp).map_err(|e| storage("create", &tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| storage("write", &tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| storage("replace", path, e))
}

pub fn write_index(dir: &Path, index: &IndexFile) -> Result<(), MemoryError> {
    write_atomic(&index_path(dir), &index.encode())
}

pub fn write_metadata(dir: &Path, metadata: &MetadataFile) -> Result<(), MemoryError> {
    write_atomic(&metadata_path(dir), &metadata.encode()?)
}

/// Rewrite both files for one generation: index first, then metadata.
pub fn write_pair(dir: &Path, index: &IndexFile, metadata: &MetadataFile) -> Result<(), MemoryError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| MemoryError::Storage(format!("Failed to create index directory: {e}")))?;
    write_index(dir, index)?;
    write_metadata(dir, metadata)?;
    debug!(
        dir = %dir.display(),
        generation = index.generation,
        chunks = metadata.chunks.len(),
        "Memory index rewritten"
    );
    Ok(())
}

/// Append one batch to the files described by `committed`.
///
/// Returns `Ok(false)` without touching anything when the files on disk are
/// not in the state `committed` describes; the caller then rewrites them.
pub fn append_batch(
    dir: &Path,
    committed: &IndexHeader,
    generation: u64,
    values: &[f32],
    chunks: &[DocumentChunk],
) -> Result<bool, MemoryError> {
    let added = if committed.dimension == 0 { 0 } else { values.len() / committed.dimension };
    if added != chunks.len() || added * committed.dimension != values.len() {
        return Err(MemoryError::Storage(format!(
            "batch of {} chunks carries {} values at dimension {}",
            chunks.len(),
            values.len(),
            committed.dimension
        )));
    }

    let meta_path = metadata_path(dir);
    let mut metadata = match OpenOptions::new().read(true).append(true).open(&meta_path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(storage("open", &meta_path, e)),
    };
    if !ends_with_newline(&mut metadata).map_err(|e| storage("read", &meta_path, e))? {
        return Ok(false);
    }

    let path = index_path(dir);
    let mut index = match OpenOptions::new().read(true).write(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(storage("open", &path, e)),
    };
    let mut header = [0u8; HEADER_LEN];
    if index.read_exact(&mut header).is_err() {
        return Ok(false);
    }
    match IndexHeader::decode(&header) {
        Ok(on_disk) if on_disk == *committed => {}
        _ => return Ok(false),
    }

    let end = committed.committed_len()? as u64;
    let next = IndexHeader {
        generation,
        count: committed.count + added,
        ..*committed
    };
    index
        .set_len(end)
        .and_then(|_| index.seek(SeekFrom::Start(end)))
        .and_then(|_| index.write_all(&encode_values(values)))
        .and_then(|_| index.sync_data())
        .and_then(|_| index.seek(SeekFrom::Start(0)))
        .and_then(|_| index.write_all(&next.encode()))
        .and_then(|_| index.sync_data())
        .map_err(|e| storage("append to", &path, e))?;

    metadata
        .write_all(&commit_line(generation, chunks)?)
        .and_then(|_| metadata.sync_data())
        .map_err(|e| storage("append to", &meta_path, e))?;

    debug!(dir = %dir.display(), generation, chunks = added, "Memory batch appended");
    Ok(true)
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

pub fn read_index(dir: &Path) -> Result<Option<IndexFile>, MemoryError> {
    match std::fs::read(index_path(dir)) {
        Ok(bytes) => IndexFile::decode(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MemoryError::Storage(format!("Failed to read index file: {e}"))),
    }
}

pub fn read_metadata(dir: &Path) -> Result<Option<MetadataFile>, MemoryError> {
    match std::fs::read(metadata_path(dir)) {
        Ok(bytes) => MetadataFile::decode(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MemoryError::Storage(format!("Failed to read metadata file: {e}"))),
    }
}

/// Load the most recent consistent pair from `dir`.
///
/// Never fails: unreadable, unsupported, or inconsistent files produce an
/// empty outcome with a warning.
pub fn load(dir: &Path) -> LoadOutcome {
    let pair = read_index(dir).and_then(|index| Ok((index, read_metadata(dir)?)));
    let (index, metadata) = match pair {
        Ok(pair) => pair,
        Err(e) => return discard(dir, e.to_string()),
    };

    match reconcile(index, metadata) {
        Ok((loaded, recovered)) => {
            if let Some(note) = &recovered {
                warn!(dir = %dir.display(), "{note}");
            }
            LoadOutcome {
                loaded,
                warning: recovered,
            }
        }
        Err(reason) => discard(dir, reason),
    }
}

fn discard(dir: &Path, reason: String) -> LoadOutcome {
    let warning = format!(
        "persisted memory index in {} is unusable ({reason}); starting with an empty index",
        dir.display()
    );
    warn!(dir = %dir.display(), reason = %reason, "Memory index unusable, starting empty");
    LoadOutcome {
        loaded: None,
        warning: Some(warning),
    }
}

/// Decide what can be served from an (index, metadata) pair.
///
/// A missing file counts as generation 0 with no entries. Returns the pair
/// to load and an optional recovery note, or the reason nothing can be
/// loaded.
pub fn reconcile(
    index: Option<IndexFile>,
    metadata: Option<MetadataFile>,
) -> Result<(Option<Loaded>, Option<String>), String> {
    let (index, metadata) = match (index, metadata) {
        (None, None) => return Ok((None, None)),
        (None, Some(meta)) if meta.chunks.is_empty() => return Ok((None, None)),
        (None, Some(meta)) => {
            return Err(format!(
                "metadata generation {} has no index file",
                meta.generation
            ));
        }
        (Some(index), None) => {
            if index.base_generation > 0 {
                return Err("index file has no metadata".into());
            }
            let note = (index.count() > 0).then(|| {
                format!(
                    "discarded {} vectors from an incomplete first write",
                    index.count()
                )
            });
            return Ok((None, note));
        }
        (Some(index), Some(meta)) => (index, meta),
    };

    if metadata.generation > index.generation {
        return Err(format!(
            "metadata generation {} is newer than index generation {}",
            metadata.generation, index.generation
        ));
    }
    if metadata.metric != index.metric || metadata.dimension != index.dimension {
        return Err("metadata and index disagree on metric or dimension".into());
    }

    let mut data = index.data;
    let count = metadata.chunks.len();
    let mut note = None;

    if metadata.generation < index.generation {
        if metadata.generation < index.base_generation {
            return Err(format!(
                "metadata generation {} predates index rebuild at generation {}",
                metadata.generation, index.base_generation
            ));
        }
        let index_count = data.len() / index.dimension.max(1);
        if count > index_count {
            return Err("metadata lists more chunks than the index holds".into());
        }
        data.truncate(count * index.dimension);
        note = Some(format!(
            "recovered generation {} after an incomplete write; discarded {} vectors",
            metadata.generation,
            index_count - count
        ));
    } else if data.len() != count * index.dimension {
        return Err("metadata and index disagree on chunk count".into());
    }

    if metadata
        .chunks
        .iter()
        .enumerate()
        .any(|(i, c)| c.ordinal != i as u64)
    {
        return Err("chunk ordinals are not contiguous".into());
    }

    Ok((
        Some(Loaded {
            generation: metadata.generation,
            base_generation: index.base_generation,
            metric: index.metric,
            dimension: index.dimension,
            data,
            chunks: metadata.chunks,
        }),
        note,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(ordinal: u64, text: &str) -> DocumentChunk {
        DocumentChunk {
            ordinal,
            source: "doc".into(),
            chunk_index: ordinal as u32,
            text: text.into(),
            ingested_at: Utc::now(),
            embedding: Vec::new(),
        }
    }

    fn index(generation: u64, base: u64, count: usize) -> IndexFile {
        IndexFile {
            generation,
            base_generation: base,
            metric: Metric::Cosine,
            dimension: 2,
            data: (0..count * 2).map(|i| i as f32).collect(),
        }
    }

    fn metadata(generation: u64, count: usize) -> MetadataFile {
        MetadataFile {
            version: METADATA_VERSION,
            generation,
            metric: Metric::Cosine,
            dimension: 2,
            embedder: "hashing".into(),
            chunks: (0..count as u64).map(|i| chunk(i, "t")).collect(),
        }
    }

    #[test]
    fn index_encoding_round_trips() {
        let original = IndexFile {
            generation: 7,
            base_generation: 3,
            metric: Metric::L2,
            dimension: 3,
            data: vec![0.5, -1.0, 2.25, 3.0, 4.0, 5.0],
        };
        assert_eq!(IndexFile::decode(&original.encode()).unwrap(), original);
    }

    #[test]
    fn decode_rejects_garbage_and_truncation() {
        assert!(IndexFile::decode(b"not an index at all, clearly").is_err());
        let mut bytes = index(1, 0, 3).encode();
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            IndexFile::decode(&bytes),
            Err(MemoryError::Corruption(_))
        ));
    }

    #[test]
    fn decode_ignores_uncommitted_tail() {
        let mut bytes = index(1, 0, 2).encode();
        bytes.extend_from_slice(&[0xAB; 5]);
        assert_eq!(IndexFile::decode(&bytes).unwrap(), index(1, 0, 2));
    }

    #[test]
    fn unknown_versions_are_rejected() {
        let mut bytes = index(1, 0, 1).encode();
        bytes[4] = 9;
        assert!(matches!(
            IndexFile::decode(&bytes),
            Err(MemoryError::UnsupportedVersion { found: 9, .. })
        ));

        let mut future = metadata(1, 1);
        future.version = METADATA_VERSION + 1;
        let err = MetadataFile::decode(&future.encode().unwrap()).unwrap_err();
        match err {
            MemoryError::UnsupportedVersion { file, found, supported } => {
                assert_eq!(file, METADATA_FILE);
                assert_eq!(found, METADATA_VERSION + 1);
                assert_eq!(supported, METADATA_VERSION);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_metadata_version_discards_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mut future = metadata(1, 2);
        future.version = 7;
        write_pair(dir.path(), &index(1, 0, 2), &future).unwrap();

        let outcome = load(dir.path());
        assert!(outcome.loaded.is_none());
        assert!(outcome.warning.unwrap().contains("version 7"));
    }

    #[test]
    fn metadata_torn_final_commit_is_ignored() {
        let mut bytes = metadata(1, 2).encode().unwrap();
        bytes.extend_from_slice(br#"{"generation":2,"chunks":[{"ordi"#);
        let decoded = MetadataFile::decode(&bytes).unwrap();
        assert_eq!(decoded.generation, 1);
        assert_eq!(decoded.chunks.len(), 2);
    }

    #[test]
    fn consistent_pair_loads() {
        let (loaded, note) = reconcile(Some(index(2, 0, 3)), Some(metadata(2, 3))).unwrap();
        let loaded = loaded.unwrap();
        assert_eq!(loaded.chunks.len(), 3);
        assert_eq!(loaded.data.len(), 6);
        assert!(note.is_none());
    }

    #[test]
    fn index_ahead_of_metadata_is_truncated() {
        let (loaded, note) = reconcile(Some(index(3, 0, 5)), Some(metadata(2, 3))).unwrap();
        let loaded = loaded.unwrap();
        assert_eq!(loaded.generation, 2);
        assert_eq!(loaded.data.len(), 6);
        assert!(note.unwrap().contains("discarded 2"));
    }

    #[test]
    fn metadata_newer_than_index_is_rejected() {
        let err = reconcile(Some(index(2, 0, 3)), Some(metadata(3, 3))).unwrap_err();
        assert!(err.contains("newer"));
    }

    #[test]
    fn metadata_older_than_rebuild_is_rejected() {
        assert!(reconcile(Some(index(5, 5, 2)), Some(metadata(4, 3))).is_err());
    }

    #[test]
    fn missing_files_are_empty() {
        assert!(matches!(reconcile(None, None), Ok((None, None))));
        let (loaded, note) = reconcile(Some(index(1, 0, 2)), None).unwrap();
        assert!(loaded.is_none());
        assert!(note.is_some());
        assert!(reconcile(None, Some(metadata(1, 2))).is_err());
    }

    #[test]
    fn append_extends_both_files_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let base = index(1, 0, 2);
        write_pair(dir.path(), &base, &metadata(1, 2)).unwrap();
        let index_before = std::fs::read(index_path(dir.path())).unwrap();
        let metadata_before = std::fs::read(metadata_path(dir.path())).unwrap();

        let appended = append_batch(
            dir.path(),
            &base.header(),
            2,
            &[9.0, 9.5],
            &[chunk(2, "new")],
        )
        .unwrap();
        assert!(appended);

        let index_after = std::fs::read(index_path(dir.path())).unwrap();
        let metadata_after = std::fs::read(metadata_path(dir.path())).unwrap();
        assert_eq!(index_after[HEADER_LEN..index_before.len()], index_before[HEADER_LEN..]);
        assert!(metadata_after.starts_with(&metadata_before));

        let loaded = load(dir.path()).loaded.unwrap();
        assert_eq!(loaded.generation, 2);
        assert_eq!(loaded.chunks.len(), 3);
        assert_eq!(&loaded.data[4..], &[9.0, 9.5]);
    }

    #[test]
    fn append_refuses_files_in_another_state() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!append_batch(dir.path(), &index(1, 0, 2).header(), 2, &[1.0, 1.0], &[chunk(2, "x")]).unwrap());

        write_pair(dir.path(), &index(3, 0, 2), &metadata(3, 2)).unwrap();
        let stale = index(1, 0, 2).header();
        assert!(!append_batch(dir.path(), &stale, 2, &[1.0, 1.0], &[chunk(2, "x")]).unwrap());
        assert_eq!(load(dir.path()).loaded.unwrap().generation, 3);
    }

    #[test]
    fn load_from_disk_handles_corruption() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), &index(1, 0, 2), &metadata(1, 2)).unwrap();
        let outcome = load(dir.path());
        assert_eq!(outcome.loaded.unwrap().chunks.len(), 2);
        assert!(outcome.warning.is_none());

        std::fs::write(metadata_path(dir.path()), b"{ not json").unwrap();
        let outcome = load(dir.path());
        assert!(outcome.loaded.is_none());
        assert!(outcome.warning.unwrap().contains("unusable"));
    }

    #[test]
    fn load_from_empty_dir_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = load(dir.path());
        assert!(outcome.loaded.is_none());
        assert!(outcome.warning.is_none());
    }
}
