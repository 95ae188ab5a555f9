//! File transfer over the stream: sealing, chunking and reassembly.
//!
//! A file is sealed as a whole with ChaCha20-Poly1305 under a fresh key,
//! then cut into chunks that travel as FILE_CHUNK segments.  Every chunk's
//! metadata names its transfer; chunk 0 additionally carries the descriptor
//! the receiver needs to open the result:
//!
//! ```json
//! {"transfer_id":"3f9c0b1e7d2a4c55","chunk_id":0,
//!  "name":"notes.txt","size":1044,"key":"<base64>","nonce":"<base64>"}
//! ```
//!
//! The stream delivers chunks in order, so [`FileAssembler`] only appends.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::Rng;
use serde_json::Value;
use thiserror::Error;

use crate::segment::Metadata;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Errors from sealing or reassembling a file.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("encryption failed")]
    Seal,

    #[error("transfer {0}: authentication failed")]
    Open(String),

    #[error("file chunk without a transfer id")]
    MissingTransferId,

    #[error("transfer {transfer_id}: invalid `{field}` in file metadata")]
    BadMetadata {
        transfer_id: String,
        field: &'static str,
    },

    #[error("transfer {transfer_id}: received {received} bytes, expected {expected}")]
    SizeMismatch {
        transfer_id: String,
        received: u64,
        expected: u64,
    },
}

/// Everything the receiver needs to open a sealed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub transfer_id: String,
    pub name: String,
    /// Length of the sealed bytes.
    pub size: u64,
    pub key: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// A sealed file ready to be enqueued.
#[derive(Debug, Clone)]
pub struct OutboundFile {
    pub descriptor: FileDescriptor,
    pub sealed: Vec<u8>,
}

/// A file fully received and opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub transfer_id: String,
    pub from: String,
    pub name: String,
    pub data: Vec<u8>,
}

/// Random 64-bit identifier rendered as 16 hex digits.
pub fn new_transfer_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

/// Seal `data` under a fresh key and nonce.
pub fn seal(name: &str, data: &[u8]) -> Result<OutboundFile, TransferError> {
    let key = ChaCha20Poly1305::generate_key(&mut OsRng);
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let sealed = ChaCha20Poly1305::new(&key)
        .encrypt(&nonce, data)
        .map_err(|_| TransferError::Seal)?;

    Ok(OutboundFile {
        descriptor: FileDescriptor {
            transfer_id: new_transfer_id(),
            name: name.to_owned(),
            size: sealed.len() as u64,
            key: key.to_vec(),
            nonce: nonce.to_vec(),
        },
        sealed,
    })
}

/// Open bytes sealed by [`seal`].
pub fn open(descriptor: &FileDescriptor, sealed: &[u8]) -> Result<Vec<u8>, TransferError> {
    let bad = |field| TransferError::BadMetadata {
        transfer_id: descriptor.transfer_id.clone(),
        field,
    };
    if descriptor.key.len() != KEY_LEN {
        return Err(bad("key"));
    }
    if descriptor.nonce.len() != NONCE_LEN {
        return Err(bad("nonce"));
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&descriptor.key));
    cipher
        .decrypt(Nonce::from_slice(&descriptor.nonce), sealed)
        .map_err(|_| TransferError::Open(descriptor.transfer_id.clone()))
}

impl OutboundFile {
    /// Split the sealed bytes into `(payload, metadata)` pairs of at most
    /// `chunk_len` bytes each.
    pub fn chunks(&self, chunk_len: usize) -> Vec<(&[u8], Metadata)> {
        self.sealed
            .chunks(chunk_len.max(1))
            .enumerate()
            .map(|(i, chunk)| (chunk, self.chunk_metadata(i as u64)))
            .collect()
    }

    fn chunk_metadata(&self, chunk_id: u64) -> Metadata {
        let d = &self.descriptor;
        let mut meta = Metadata::new();
        meta.insert("transfer_id".into(), Value::from(d.transfer_id.clone()));
        meta.insert("chunk_id".into(), Value::from(chunk_id));
        if chunk_id == 0 {
            meta.insert("name".into(), Value::from(d.name.clone()));
            meta.insert("size".into(), Value::from(d.size));
            meta.insert("key".into(), Value::from(STANDARD.encode(&d.key)));
            meta.insert("nonce".into(), Value::from(STANDARD.encode(&d.nonce)));
        }
        meta
    }
}

#[derive(Debug, Default)]
struct PendingFile {
    descriptor: Option<FileDescriptor>,
    data: Vec<u8>,
}

/// Receive-side reassembly, one pending file per transfer id.
#[derive(Debug, Default)]
pub struct FileAssembler {
    pending: HashMap<String, PendingFile>,
}

impl FileAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transfers started but not finished.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Append one delivered chunk.
    ///
    /// Returns the opened file once the last chunk arrives.  On error the
    /// transfer is dropped.
    pub fn accept(
        &mut self,
        from: &str,
        payload: Vec<u8>,
        metadata: Option<&Metadata>,
    ) -> Result<Option<ReceivedFile>, TransferError> {
        let meta = metadata.ok_or(TransferError::MissingTransferId)?;
        let transfer_id = meta
            .get("transfer_id")
            .and_then(Value::as_str)
            .ok_or(TransferError::MissingTransferId)?
            .to_owned();

        let descriptor = match parse_descriptor(&transfer_id, meta) {
            Ok(d) => d,
            Err(e) => {
                self.pending.remove(&transfer_id);
                return Err(e);
            }
        };

        let entry = self.pending.entry(transfer_id.clone()).or_default();
        if descriptor.is_some() {
            entry.descriptor = descriptor;
        }
        entry.data.extend_from_slice(&payload);

        let Some(expected) = entry.descriptor.as_ref().map(|d| d.size) else {
            return Ok(None);
        };
        let received = entry.data.len() as u64;
        if received < expected {
            return Ok(None);
        }

        let Some(done) = self.pending.remove(&transfer_id) else {
            return Ok(None);
        };
        let Some(descriptor) = done.descriptor else {
            return Ok(None);
        };
        if received > expected {
            return Err(TransferError::SizeMismatch {
                transfer_id,
                received,
                expected,
            });
        }

        let data = open(&descriptor, &done.data)?;
        log::info!(
            "[transfer] {} complete: {} ({} bytes) from {from}",
            descriptor.transfer_id,
            descriptor.name,
            data.len()
        );
        Ok(Some(ReceivedFile {
            transfer_id: descriptor.transfer_id,
            from: from.to_owned(),
            name: descriptor.name,
            data,
        }))
    }
}

/// Read the descriptor fields if this chunk carries them.
fn parse_descriptor(
    transfer_id: &str,
    meta: &Metadata,
) -> Result<Option<FileDescriptor>, TransferError> {
    let Some(name) = meta.get("name") else {
        return Ok(None);
    };
    let bad = |field| TransferError::BadMetadata {
        transfer_id: transfer_id.to_owned(),
        field,
    };
    let bytes = |field: &'static str| -> Result<Vec<u8>, TransferError> {
        let text = meta.get(field).and_then(Value::as_str).ok_or(bad(field))?;
        STANDARD.decode(text).map_err(|_| bad(field))
    };

    Ok(Some(FileDescriptor {
        transfer_id: transfer_id.to_owned(),
        name: name.as_str().ok_or(bad("name"))?.to_owned(),
        size: meta
            .get("size")
            .and_then(Value::as_u64)
            .ok_or(bad("size"))?,
        key: bytes("key")?,
        nonce: bytes("nonce")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(
        asm: &mut FileAssembler,
        file: &OutboundFile,
        chunk_len: usize,
    ) -> Option<ReceivedFile> {
        let mut result = None;
        for (chunk, meta) in file.chunks(chunk_len) {
            result = asm.accept("alice", chunk.to_vec(), Some(&meta)).unwrap();
        }
        result
    }

    #[test]
    fn seal_then_open() {
        let file = seal("a.txt", b"attack at dawn").unwrap();
        assert_eq!(file.descriptor.size, file.sealed.len() as u64);
        assert_ne!(&file.sealed[..14], b"attack at dawn");
        assert_eq!(open(&file.descriptor, &file.sealed).unwrap(), b"attack at dawn");
    }

    #[test]
    fn tampered_bytes_fail_authentication() {
        let mut file = seal("a.txt", b"attack at dawn").unwrap();
        file.sealed[0] ^= 1;
        assert!(matches!(
            open(&file.descriptor, &file.sealed),
            Err(TransferError::Open(_))
        ));
    }

    #[test]
    fn only_first_chunk_carries_descriptor() {
        let file = seal("big.bin", &[7u8; 5000]).unwrap();
        let chunks = file.chunks(2048);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].1.contains_key("key"));
        assert!(!chunks[1].1.contains_key("key"));
        assert_eq!(chunks[2].1["chunk_id"], 2);
        let tid = &file.descriptor.transfer_id;
        assert!(chunks.iter().all(|(_, m)| m["transfer_id"] == tid.as_str()));
    }

    #[test]
    fn assembler_reassembles_in_order_chunks() {
        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let file = seal("big.bin", &data).unwrap();
        let mut asm = FileAssembler::new();

        let received = feed(&mut asm, &file, 2048).unwrap();
        assert_eq!(received.name, "big.bin");
        assert_eq!(received.from, "alice");
        assert_eq!(received.data, data);
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn empty_file_still_completes() {
        let file = seal("empty", b"").unwrap();
        let mut asm = FileAssembler::new();
        let received = feed(&mut asm, &file, 2048).unwrap();
        assert!(received.data.is_empty());
    }

    #[test]
    fn interleaved_transfers_kept_apart() {
        let a = seal("a", &[1u8; 3000]).unwrap();
        let b = seal("b", &[2u8; 3000]).unwrap();
        let mut asm = FileAssembler::new();

        let a_chunks = a.chunks(1024);
        let b_chunks = b.chunks(1024);
        let mut done = Vec::new();
        for (ca, cb) in a_chunks.iter().zip(b_chunks.iter()) {
            if let Some(f) = asm.accept("x", ca.0.to_vec(), Some(&ca.1)).unwrap() {
                done.push(f);
            }
            if let Some(f) = asm.accept("x", cb.0.to_vec(), Some(&cb.1)).unwrap() {
                done.push(f);
            }
        }
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].data, vec![1u8; 3000]);
        assert_eq!(done[1].data, vec![2u8; 3000]);
    }

    #[test]
    fn chunk_without_transfer_id_rejected() {
        let mut asm = FileAssembler::new();
        assert!(matches!(
            asm.accept("x", vec![1], None),
            Err(TransferError::MissingTransferId)
        ));
        assert!(matches!(
            asm.accept("x", vec![1], Some(&Metadata::new())),
            Err(TransferError::MissingTransferId)
        ));
    }

    #[test]
    fn bad_key_drops_transfer() {
        let file = seal("a", b"hello").unwrap();
        let (chunk, mut meta) = file.chunks(1024).into_iter().next().unwrap();
        meta.insert("key".into(), Value::from("not base64!"));
        let mut asm = FileAssembler::new();
        assert!(matches!(
            asm.accept("x", chunk.to_vec(), Some(&meta)),
            Err(TransferError::BadMetadata { field: "key", .. })
        ));
        assert_eq!(asm.pending(), 0);
    }
}
