//! On-disk snapshot of the tool records and slice vectors.
//!
//! Lets a service restart without re-embedding its whole catalog. The
//! snapshot is written on graceful shutdown and read back at startup.

use crate::error::{AppError, Result};
use crate::ingestion::{SliceKind, Tool};
use crate::search::IndexedSlice;
use crate::store::{self, slice_key, MemoryVectorStore, RecordStore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Snapshot format version. Increment when the layout changes.
const SNAPSHOT_VERSION: u32 = 1;

/// Magic bytes identifying a snapshot file.
const SNAPSHOT_MAGIC: &[u8; 8] = b"TOOLSIFT";

const HEADER_LEN: usize = 8 + 4 + 32;

pub struct Snapshot {
    pub dimension: usize,
    pub tools: Vec<Tool>,
    /// Live slices in insertion order.
    pub slices: Vec<IndexedSlice>,
}

impl Snapshot {
    /// Copy the current contents of both stores.
    pub async fn capture(
        records: &dyn RecordStore,
        vectors: &MemoryVectorStore,
        dimension: usize,
    ) -> Result<Self> {
        Ok(Self {
            dimension,
            tools: store::list_tools(records).await?,
            slices: vectors.export(),
        })
    }

    /// Load the snapshot into empty stores. Fails without touching either
    /// store if the snapshot's dimension differs from `dimension`.
    pub async fn restore(
        self,
        records: &dyn RecordStore,
        vectors: &MemoryVectorStore,
        dimension: usize,
    ) -> Result<()> {
        if self.dimension != dimension {
            return Err(AppError::StoreError(format!(
                "Snapshot has {}-dim vectors, embedder produces {}",
                self.dimension, dimension
            )));
        }

        let tools = self.tools.len();
        let slices = self.slices.len();
        for tool in &self.tools {
            store::put_tool(records, tool).await?;
        }
        vectors.restore(self.slices)?;

        tracing::info!(tools, slices, "Snapshot restored");
        Ok(())
    }

    /// File format:
    /// - 8 bytes: magic "TOOLSIFT"
    /// - 4 bytes: version (u32 LE)
    /// - 32 bytes: SHA-256 of the body
    /// - body:
    ///   - 8 bytes: dimension (u64 LE)
    ///   - 8 bytes: tool count, then per tool a u32 length and JSON bytes
    ///   - 8 bytes: slice count, then per slice: seq (u64), owner (16 bytes),
    ///     kind (u8), vector (f32 LE x dimension)
    fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&(self.dimension as u64).to_le_bytes());

        body.extend_from_slice(&(self.tools.len() as u64).to_le_bytes());
        for tool in &self.tools {
            let json = serde_json::to_vec(tool).map_err(|e| {
                AppError::StoreError(format!("Failed to serialize tool {}: {}", tool.id, e))
            })?;
            body.extend_from_slice(&(json.len() as u32).to_le_bytes());
            body.extend_from_slice(&json);
        }

        body.extend_from_slice(&(self.slices.len() as u64).to_le_bytes());
        for slice in &self.slices {
            if slice.vector.len() != self.dimension {
                return Err(AppError::StoreError(format!(
                    "Slice {} has dimension {}, snapshot expects {}",
                    slice.key,
                    slice.vector.len(),
                    self.dimension
                )));
            }
            body.extend_from_slice(&slice.seq.to_le_bytes());
            body.extend_from_slice(slice.owner.as_bytes());
            body.push(slice.kind.to_byte());
            for &val in &slice.vector {
                body.extend_from_slice(&val.to_le_bytes());
            }
        }

        let hash: [u8; 32] = Sha256::digest(&body).into();

        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.extend_from_slice(SNAPSHOT_MAGIC);
        bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&hash);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    fn decode(body: &[u8]) -> Option<Self> {
        let mut reader = ByteReader::new(body);

        let dimension = reader.u64()? as usize;

        let tool_count = reader.u64()? as usize;
        let mut tools = Vec::with_capacity(tool_count.min(body.len()));
        for _ in 0..tool_count {
            let len = reader.u32()? as usize;
            let tool: Tool = serde_json::from_slice(reader.take(len)?).ok()?;
            tools.push(tool);
        }

        let slice_count = reader.u64()? as usize;
        let mut slices = Vec::with_capacity(slice_count.min(body.len()));
        let mut positions: HashMap<Uuid, usize> = HashMap::new();
        for _ in 0..slice_count {
            let seq = reader.u64()?;
            let owner = Uuid::from_slice(reader.take(16)?).ok()?;
            let kind = SliceKind::from_byte(reader.take(1)?[0])?;
            let vector = reader
                .take(dimension.checked_mul(4)?)?
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();

            let position = positions.entry(owner).or_default();
            slices.push(IndexedSlice {
                seq,
                key: slice_key(&owner, *position),
                owner,
                kind,
                vector,
            });
            *position += 1;
        }

        reader.is_empty().then_some(Self {
            dimension,
            tools,
            slices,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::StoreError(format!("Failed to create snapshot directory: {}", e))
            })?;
        }

        let bytes = self.encode()?;

        // Readers never observe a partially written file
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)
            .map_err(|e| AppError::StoreError(format!("Failed to write snapshot: {}", e)))?;
        fs::rename(&tmp, path)
            .map_err(|e| AppError::StoreError(format!("Failed to move snapshot into place: {}", e)))?;

        tracing::info!(
            path = %path.display(),
            tools = self.tools.len(),
            slices = self.slices.len(),
            size_bytes = bytes.len(),
            "Snapshot saved"
        );

        Ok(())
    }

    /// Read a snapshot. Returns `None` when the file is missing or fails the
    /// magic, version or checksum checks.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Snapshot file does not exist");
            return Ok(None);
        }

        let bytes = fs::read(path)
            .map_err(|e| AppError::StoreError(format!("Failed to read snapshot: {}", e)))?;

        if bytes.len() < HEADER_LEN || &bytes[..8] != SNAPSHOT_MAGIC {
            tracing::warn!(path = %path.display(), "Invalid snapshot magic, ignoring");
            return Ok(None);
        }

        let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if version != SNAPSHOT_VERSION {
            tracing::warn!(
                path = %path.display(),
                snapshot_version = version,
                expected_version = SNAPSHOT_VERSION,
                "Snapshot version mismatch, ignoring"
            );
            return Ok(None);
        }

        let body = &bytes[HEADER_LEN..];
        let hash: [u8; 32] = Sha256::digest(body).into();
        if hash[..] != bytes[12..HEADER_LEN] {
            tracing::warn!(path = %path.display(), "Snapshot checksum mismatch, ignoring");
            return Ok(None);
        }

        let Some(snapshot) = Self::decode(body) else {
            tracing::warn!(path = %path.display(), "Snapshot body is malformed, ignoring");
            return Ok(None);
        };

        tracing::info!(
            path = %path.display(),
            tools = snapshot.tools.len(),
            slices = snapshot.slices.len(),
            dimension = snapshot.dimension,
            "Snapshot loaded"
        );

        Ok(Some(snapshot))
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.bytes.len() < n {
            return None;
        }
        let (head, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        Some(head)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)?.try_into().ok().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8)?.try_into().ok().map(u64::from_le_bytes)
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
