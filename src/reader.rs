use std::sync::Arc;

use chardetng::EncodingDetector;
use encoding_rs::Encoding;

use crate::error::Result;
use crate::model::{ClassifiedLogFile, RawContentChunk, RemoteFileDescriptor};
use crate::webdav::RemoteStore;

/// 尾部优先读取器:大文件只取末尾字节,并把原始字节规整为按行对齐的文本。
#[derive(Clone)]
pub struct TailedReader {
    store: Arc<dyn RemoteStore>,
}

impl TailedReader {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn read(
        &self,
        file: &ClassifiedLogFile,
        max_bytes: u64,
        tail_only: bool,
    ) -> Result<RawContentChunk> {
        self.read_descriptor(&file.descriptor, max_bytes, tail_only).await
    }

    /// Tail reads and forced tails (size over `max_bytes`) go through a
    /// suffix range; everything else fetches the whole file.
    pub async fn read_descriptor(
        &self,
        descriptor: &RemoteFileDescriptor,
        max_bytes: u64,
        tail_only: bool,
    ) -> Result<RawContentChunk> {
        if descriptor.size_bytes == 0 {
            return Ok(RawContentChunk {
                file_name: descriptor.name.clone(),
                text: String::new(),
                was_truncated: false,
                truncation_offset: 0,
            });
        }
        if tail_only || descriptor.size_bytes > max_bytes {
            let bytes = self.store.fetch_range(&descriptor.name, max_bytes).await?;
            return Ok(chunk_from_suffix(&descriptor.name, bytes, descriptor.size_bytes));
        }
        let bytes = self.store.fetch_full(&descriptor.name).await?;
        Ok(chunk_from_full(&descriptor.name, bytes))
    }
}

fn chunk_from_full(name: &str, bytes: Vec<u8>) -> RawContentChunk {
    RawContentChunk {
        file_name: name.to_string(),
        text: decode_bytes(&bytes),
        was_truncated: false,
        truncation_offset: 0,
    }
}

/// A suffix that turns out to cover the whole file is not truncated at all.
/// Otherwise the partial first line is discarded; its entry lost its header
/// to the cut-away prefix.
fn chunk_from_suffix(name: &str, bytes: Vec<u8>, file_size: u64) -> RawContentChunk {
    if bytes.len() as u64 >= file_size {
        return chunk_from_full(name, bytes);
    }
    let fetched = bytes.len() as u64;
    let (skipped, clean) = match bytes.iter().position(|&b| b == b'\n') {
        Some(idx) => (idx + 1, &bytes[idx + 1..]),
        // No newline in the window: nothing line-aligned survives.
        None => (bytes.len(), &[][..]),
    };
    RawContentChunk {
        file_name: name.to_string(),
        text: decode_bytes(clean),
        was_truncated: true,
        truncation_offset: file_size - fetched + skipped as u64,
    }
}

fn decode_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    let (encoding, bom_len) = detect_from_prefix(bytes);
    let (text, _, _) = encoding.decode(&bytes[bom_len..]);
    text.into_owned()
}

fn detect_from_prefix(prefix: &[u8]) -> (&'static Encoding, usize) {
    if prefix.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return (encoding_rs::UTF_8, 3);
    }
    if prefix.starts_with(&[0xFF, 0xFE]) {
        return (encoding_rs::UTF_16LE, 2);
    }
    if prefix.starts_with(&[0xFE, 0xFF]) {
        return (encoding_rs::UTF_16BE, 2);
    }
    let mut detector = EncodingDetector::new();
    detector.feed(&prefix[..prefix.len().min(8192)], true);
    (detector.guess(None, true), 0)
}
