//! Append-only chain log.
//!
//! Blocks are persisted as length-prefixed canonical JSON records in a
//! single append-only file, with a JSON sidecar mapping block hash and
//! height to byte offsets. The sidecar is a pure accelerator: the log alone
//! fully reconstructs the chain (and the index).

use doin_types::{to_canonical_json, Block, Digest, DoinError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const LOG_FILE: &str = "chain.log";
const INDEX_FILE: &str = "chain.idx";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SidecarIndex {
    by_hash: HashMap<String, u64>,
    by_height: BTreeMap<u64, u64>,
}

pub struct ChainLog {
    log_path: PathBuf,
    index_path: PathBuf,
    index: SidecarIndex,
    end_offset: u64,
}

impl ChainLog {
    /// Open (or create) the chain log in `dir`. A missing or stale sidecar
    /// index is rebuilt from the log.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| DoinError::ChainCorruption(format!("cannot create chain dir: {}", e)))?;
        let log_path = dir.join(LOG_FILE);
        let index_path = dir.join(INDEX_FILE);

        let mut log = Self {
            log_path,
            index_path,
            index: SidecarIndex::default(),
            end_offset: 0,
        };

        if log.log_path.exists() {
            match log.try_load_sidecar() {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!("Sidecar index missing or stale, rebuilding from log");
                    log.rebuild_index()?;
                }
            }
        }
        Ok(log)
    }

    /// Append a block and update the sidecar.
    pub fn append(&mut self, block: &Block) -> Result<()> {
        let json = to_canonical_json(block)?;
        let bytes = json.as_bytes();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| DoinError::ChainCorruption(format!("cannot open chain log: {}", e)))?;

        let offset = self.end_offset;
        file.write_all(&(bytes.len() as u32).to_be_bytes())
            .and_then(|_| file.write_all(bytes))
            .map_err(|e| DoinError::ChainCorruption(format!("chain log write failed: {}", e)))?;

        self.end_offset = offset + 4 + bytes.len() as u64;
        self.index.by_hash.insert(block.hash.to_hex(), offset);
        self.index.by_height.insert(block.index(), offset);
        self.persist_sidecar()?;
        Ok(())
    }

    /// Read one block at a known byte offset.
    pub fn read_at(&self, offset: u64) -> Result<Block> {
        let mut file = File::open(&self.log_path)
            .map_err(|e| DoinError::ChainCorruption(format!("cannot open chain log: {}", e)))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| DoinError::ChainCorruption(e.to_string()))?;

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)
            .map_err(|e| DoinError::ChainCorruption(format!("truncated record length: {}", e)))?;
        let len = u32::from_be_bytes(len_buf) as usize;

        let mut record = vec![0u8; len];
        file.read_exact(&mut record)
            .map_err(|e| DoinError::ChainCorruption(format!("truncated record: {}", e)))?;
        serde_json::from_slice(&record)
            .map_err(|e| DoinError::ChainCorruption(format!("unparseable record: {}", e)))
    }

    pub fn get_by_height(&self, height: u64) -> Result<Option<Block>> {
        match self.index.by_height.get(&height) {
            Some(offset) => Ok(Some(self.read_at(*offset)?)),
            None => Ok(None),
        }
    }

    pub fn get_by_hash(&self, hash: &Digest) -> Result<Option<Block>> {
        match self.index.by_hash.get(&hash.to_hex()) {
            Some(offset) => Ok(Some(self.read_at(*offset)?)),
            None => Ok(None),
        }
    }

    /// Replay the whole log in append order.
    pub fn load_all(&self) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        if !self.log_path.exists() {
            return Ok(blocks);
        }
        let mut file = File::open(&self.log_path)
            .map_err(|e| DoinError::ChainCorruption(format!("cannot open chain log: {}", e)))?;

        loop {
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(DoinError::ChainCorruption(format!(
                        "chain log read failed: {}",
                        e
                    )))
                }
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut record = vec![0u8; len];
            file.read_exact(&mut record).map_err(|e| {
                DoinError::ChainCorruption(format!("truncated chain log record: {}", e))
            })?;
            let block: Block = serde_json::from_slice(&record).map_err(|e| {
                DoinError::ChainCorruption(format!("unparseable chain log record: {}", e))
            })?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    pub fn record_count(&self) -> usize {
        self.index.by_hash.len()
    }

    fn try_load_sidecar(&mut self) -> Result<bool> {
        if !self.index_path.exists() {
            return Ok(false);
        }
        let data = std::fs::read_to_string(&self.index_path)
            .map_err(|e| DoinError::ChainCorruption(e.to_string()))?;
        let index: SidecarIndex =
            serde_json::from_str(&data).map_err(|e| DoinError::ChainCorruption(e.to_string()))?;

        let log_len = std::fs::metadata(&self.log_path)
            .map(|m| m.len())
            .unwrap_or(0);
        // Stale if any recorded offset lies beyond the log.
        let consistent = index
            .by_height
            .values()
            .chain(index.by_hash.values())
            .all(|&offset| offset < log_len.max(1));
        if !consistent {
            return Ok(false);
        }
        self.index = index;
        self.end_offset = log_len;
        Ok(true)
    }

    fn persist_sidecar(&self) -> Result<()> {
        let json = serde_json::to_string(&self.index)
            .map_err(|e| DoinError::ChainCorruption(e.to_string()))?;
        std::fs::write(&self.index_path, json)
            .map_err(|e| DoinError::ChainCorruption(format!("sidecar write failed: {}", e)))
    }

    fn rebuild_index(&mut self) -> Result<()> {
        self.index = SidecarIndex::default();
        let mut offset = 0u64;
        for block in self.load_all()? {
            self.index.by_hash.insert(block.hash.to_hex(), offset);
            self.index.by_height.insert(block.index(), offset);
            let json = to_canonical_json(&block)?;
            offset += 4 + json.len() as u64;
        }
        self.end_offset = offset;
        self.persist_sidecar()?;
        info!(records = self.index.by_height.len(), "Chain log index rebuilt");
        Ok(())
    }
}
