//! SQL batch requests and the `ALL_HEADERS` prefix shared by every request.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16;

/// Size of an `ALL_HEADERS` block carrying only the transaction descriptor.
pub const ALL_HEADERS_SIZE: usize = 22;

const TRANSACTION_DESCRIPTOR_HEADER: u16 = 0x0002;

/// Write `ALL_HEADERS` with a single transaction descriptor header.
///
/// `descriptor` is the value from the last BeginTransaction env-change, or
/// zero outside an explicit transaction. Without MARS the outstanding
/// request count is always one.
pub fn write_all_headers(dst: &mut impl BufMut, descriptor: u64) {
    dst.put_u32_le(ALL_HEADERS_SIZE as u32);
    dst.put_u32_le(18);
    dst.put_u16_le(TRANSACTION_DESCRIPTOR_HEADER);
    dst.put_u64_le(descriptor);
    dst.put_u32_le(1);
}

/// A SQL batch (packet type 0x01).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBatch {
    sql: String,
    transaction_descriptor: u64,
}

impl SqlBatch {
    /// Batch running in auto-commit mode.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            transaction_descriptor: 0,
        }
    }

    /// Run inside the transaction identified by `descriptor`.
    #[must_use]
    pub fn with_transaction(mut self, descriptor: u64) -> Self {
        self.transaction_descriptor = descriptor;
        self
    }

    /// Statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Encode the message payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ALL_HEADERS_SIZE + self.sql.len() * 2);
        write_all_headers(&mut buf, self.transaction_descriptor);
        write_utf16(&mut buf, &self.sql);
        buf.freeze()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn batch_layout() {
        let payload = SqlBatch::new("SELECT 1").encode();
        assert_eq!(payload.len(), ALL_HEADERS_SIZE + 16);
        assert_eq!(&payload[0..4], &[22, 0, 0, 0]);
        assert_eq!(&payload[4..8], &[18, 0, 0, 0]);
        assert_eq!(&payload[8..10], &[0x02, 0x00]);
        assert_eq!(&payload[10..18], &[0; 8]);
        assert_eq!(&payload[18..22], &[1, 0, 0, 0]);
        assert_eq!(&payload[22..26], &[b'S', 0, b'E', 0]);
    }

    #[test]
    fn descriptor_is_echoed() {
        let payload = SqlBatch::new("COMMIT").with_transaction(0x0102_0304_0506_0708).encode();
        assert_eq!(&payload[10..18], &[8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn empty_batch_is_just_headers() {
        assert_eq!(SqlBatch::new("").encode().len(), ALL_HEADERS_SIZE);
    }
}
