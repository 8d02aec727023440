//! Write-Ahead Log (WAL) for durability.
//!
//! Format: each entry is `[4-byte CRC32][4-byte length][JSON batch]\n`.
//! One entry holds one atomic batch. On recovery, replay all valid entries;
//! a torn or corrupt tail entry is dropped as a whole.

use crate::record::WalBatch;
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("WAL CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },
}

/// Fsync policy for the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync after every batch.
    Always,
    /// Fsync periodically (caller controls).
    Batch,
    /// Never explicitly fsync (OS decides).
    None,
}

impl FsyncPolicy {
    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "always" => Self::Always,
            "none" => Self::None,
            _ => Self::Batch,
        }
    }
}

/// Result of replaying a WAL file.
#[derive(Debug, Default)]
pub struct WalReplay {
    /// Valid batches, in write order.
    pub batches: Vec<WalBatch>,
    /// Length of the valid prefix. Bytes past it belong to a torn or
    /// corrupt entry and must be cut off before appending.
    pub valid_len: u64,
}

/// An append-only write-ahead log.
#[derive(Debug)]
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    fsync: FsyncPolicy,
    entries_written: u64,
}

impl Wal {
    /// Open or create a WAL file at the given path.
    pub fn open(path: &Path, fsync: FsyncPolicy) -> Result<Self, WalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            fsync,
            entries_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch to the WAL as a single framed entry.
    pub fn append(&mut self, batch: &WalBatch) -> Result<(), WalError> {
        let payload = serde_json::to_vec(batch)?;

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let len = payload.len() as u32;

        // CRC(4) + LEN(4) + PAYLOAD + \n
        let mut frame = Vec::with_capacity(payload.len() + 9);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.push(b'\n');

        self.writer.write_all(&frame)?;
        self.writer.flush()?;

        if self.fsync == FsyncPolicy::Always {
            self.writer.get_ref().sync_all()?;
        }

        self.entries_written += 1;
        Ok(())
    }

    /// Explicitly fsync the WAL (for batch mode).
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Number of entries written since open.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Replay all valid batches from a WAL file, in order.
    /// Stops at the first torn or corrupt entry.
    pub fn replay(path: &Path) -> Result<WalReplay, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(WalReplay::default()),
            Err(e) => return Err(WalError::Io(e)),
        };

        let mut reader = BufReader::new(file);
        let mut batches = Vec::new();
        let mut entry_num = 0u64;
        let mut valid_len = 0u64;

        loop {
            let mut crc_buf = [0u8; 4];
            match io::Read::read_exact(&mut reader, &mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(WalError::Io(e)),
            }
            let expected_crc = u32::from_le_bytes(crc_buf);

            // UnexpectedEof mid-entry means a torn write: stop replay.
            macro_rules! read_or_break {
                ($reader:expr, $buf:expr) => {
                    match io::Read::read_exact($reader, $buf) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                            tracing::warn!(
                                "WAL truncated mid-entry at entry {}; stopping replay",
                                entry_num
                            );
                            break;
                        }
                        Err(e) => return Err(WalError::Io(e)),
                    }
                };
            }

            let mut len_buf = [0u8; 4];
            read_or_break!(&mut reader, &mut len_buf);
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            read_or_break!(&mut reader, &mut payload);

            let mut nl = [0u8; 1];
            read_or_break!(&mut reader, &mut nl);

            let mut hasher = Hasher::new();
            hasher.update(&payload);
            let actual_crc = hasher.finalize();

            if actual_crc != expected_crc {
                tracing::warn!(
                    "{}; stopping replay at entry {}",
                    WalError::CrcMismatch {
                        expected: expected_crc,
                        actual: actual_crc
                    },
                    entry_num
                );
                break;
            }

            let batch: WalBatch = serde_json::from_slice(&payload)?;
            batches.push(batch);
            entry_num += 1;
            valid_len += 9 + len as u64;
        }

        Ok(WalReplay { batches, valid_len })
    }

    /// Cut `path` back to `valid_len` bytes if a torn tail follows it.
    /// Returns the number of bytes dropped.
    pub fn truncate_tail(path: &Path, valid_len: u64) -> Result<u64, WalError> {
        let file = match OpenOptions::new().write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(WalError::Io(e)),
        };
        let len = file.metadata()?.len();
        if len <= valid_len {
            return Ok(0);
        }
        file.set_len(valid_len)?;
        file.sync_all()?;
        Ok(len - valid_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BatchOp;
    use tempfile::TempDir;

    fn put_batch(key: &str, value: &str) -> WalBatch {
        WalBatch::new(vec![BatchOp::put(key.as_bytes(), value.as_bytes())])
    }

    #[test]
    fn test_wal_write_and_replay() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join("test.wal");

        {
            let mut wal = Wal::open(&wal_path, FsyncPolicy::Always).unwrap();
            wal.append(&put_batch("k1", "v1")).unwrap();
            wal.append(&put_batch("k2", "v2")).unwrap();
            wal.append(&put_batch("k3", "v3")).unwrap();
            assert_eq!(wal.entries_written(), 3);
        }

        let replay = Wal::replay(&wal_path).unwrap();
        assert_eq!(replay.valid_len, std::fs::metadata(&wal_path).unwrap().len());
        let batches = replay.batches;
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].ops[0].key(), b"k1");
        assert_eq!(batches[2].ops[0].key(), b"k3");
    }

    #[test]
    fn test_wal_replay_empty() {
        let dir = TempDir::new().unwrap();
        let replay = Wal::replay(&dir.path().join("empty.wal")).unwrap();
        assert!(replay.batches.is_empty());
        assert_eq!(replay.valid_len, 0);
    }

    #[test]
    fn test_wal_replay_truncated_drops_whole_batch() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join("trunc.wal");

        {
            let mut wal = Wal::open(&wal_path, FsyncPolicy::Always).unwrap();
            wal.append(&put_batch("k1", "v1")).unwrap();
            wal.append(&WalBatch::new(vec![
                BatchOp::put(b"k2".to_vec(), b"v2".to_vec()),
                BatchOp::put(b"k3".to_vec(), b"v3".to_vec()),
            ]))
            .unwrap();
        }

        {
            let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
            let len = file.metadata().unwrap().len();
            file.set_len(len - 5).unwrap();
        }

        let batches = Wal::replay(&wal_path).unwrap().batches;
        assert_eq!(batches.len(), 1, "torn multi-op batch must not half-apply");
        assert_eq!(batches[0].ops[0].key(), b"k1");
    }

    #[test]
    fn test_wal_replay_stops_at_crc_mismatch() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join("crc.wal");

        {
            let mut wal = Wal::open(&wal_path, FsyncPolicy::Always).unwrap();
            wal.append(&put_batch("k1", "v1")).unwrap();
            wal.append(&put_batch("k2", "v2")).unwrap();
        }

        // Flip a payload byte inside the second entry.
        let mut bytes = std::fs::read(&wal_path).unwrap();
        let last = bytes.len() - 3;
        bytes[last] ^= 0xff;
        std::fs::write(&wal_path, &bytes).unwrap();

        let batches = Wal::replay(&wal_path).unwrap().batches;
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_truncate_tail_then_append_replays_new_entries() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join("tail.wal");

        {
            let mut wal = Wal::open(&wal_path, FsyncPolicy::Always).unwrap();
            wal.append(&put_batch("k1", "v1")).unwrap();
            wal.append(&put_batch("k2", "v2")).unwrap();
        }
        {
            let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
            let len = file.metadata().unwrap().len();
            file.set_len(len - 5).unwrap();
        }

        let replay = Wal::replay(&wal_path).unwrap();
        assert_eq!(replay.batches.len(), 1);
        assert!(Wal::truncate_tail(&wal_path, replay.valid_len).unwrap() > 0);
        assert_eq!(Wal::truncate_tail(&wal_path, replay.valid_len).unwrap(), 0);

        {
            let mut wal = Wal::open(&wal_path, FsyncPolicy::Always).unwrap();
            wal.append(&put_batch("k3", "v3")).unwrap();
        }

        let batches = Wal::replay(&wal_path).unwrap().batches;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].ops[0].key(), b"k3");
    }

    #[test]
    fn test_fsync_policy_from_config() {
        assert_eq!(FsyncPolicy::from_str_config("ALWAYS"), FsyncPolicy::Always);
        assert_eq!(FsyncPolicy::from_str_config("none"), FsyncPolicy::None);
        assert_eq!(FsyncPolicy::from_str_config("whatever"), FsyncPolicy::Batch);
    }
}
