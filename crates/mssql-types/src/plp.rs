//! Partially length-prefixed (PLP) chunk producer for `(max)` values.
//!
//! After the u64 total length written by the length prefix, the data goes
//! out as `u32` length + bytes chunks and ends with a zero-length chunk.

use bytes::Bytes;

/// Largest data chunk emitted.
pub const PLP_CHUNK_SIZE: usize = 8192;

const TERMINATOR: [u8; 4] = [0; 4];

/// Iterator over the chunk headers and data slices of one PLP value.
#[derive(Debug)]
pub struct PlpChunks {
    remaining: Bytes,
    pending: Option<Bytes>,
    finished: bool,
}

impl PlpChunks {
    /// Chunks of `data`; slices share its storage.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self {
            remaining: data,
            pending: None,
            finished: false,
        }
    }
}

impl Iterator for PlpChunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if let Some(data) = self.pending.take() {
            return Some(data);
        }
        if self.finished {
            return None;
        }
        if self.remaining.is_empty() {
            self.finished = true;
            return Some(Bytes::from_static(&TERMINATOR));
        }
        let take = self.remaining.len().min(PLP_CHUNK_SIZE);
        let data = self.remaining.split_to(take);
        self.pending = Some(data);
        Some(Bytes::copy_from_slice(&(take as u32).to_le_bytes()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use tds_protocol::types::read_plp;

    #[test]
    fn chunks_then_terminator() {
        let data = Bytes::from(vec![7u8; PLP_CHUNK_SIZE + 10]);
        let chunks: Vec<Bytes> = PlpChunks::new(data.clone()).collect();
        assert_eq!(chunks.len(), 5);
        assert_eq!(&chunks[0][..], &(PLP_CHUNK_SIZE as u32).to_le_bytes());
        assert_eq!(&chunks[2][..], &10u32.to_le_bytes());
        assert_eq!(&chunks[4][..], &TERMINATOR);

        let mut wire = BytesMut::new();
        wire.put_u64_le(data.len() as u64);
        for chunk in chunks {
            wire.put_slice(&chunk);
        }
        assert_eq!(read_plp(&mut wire.freeze()).unwrap().unwrap(), data);
    }

    #[test]
    fn empty_value_is_only_terminator() {
        let chunks: Vec<Bytes> = PlpChunks::new(Bytes::new()).collect();
        assert_eq!(chunks, vec![Bytes::from_static(&TERMINATOR)]);
    }
}
