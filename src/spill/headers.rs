//! # Spill Page Header
//!
//! Every page written to a spill file is framed by a fixed 16-byte header:
//!
//! ```text
//! Offset  Size  Field
//! 0       4     magic      SPILL_PAGE_MAGIC
//! 4       4     row_count  rows encoded in the payload
//! 8       4     data_len   payload length in bytes
//! 12      4     checksum   CRC-32/ISCSI over the payload
//! ```
//!
//! All fields are little-endian. The payload is the concatenation of
//! `row_count` rows encoded with `RowSerde`.

use crc::{Crc, CRC_32_ISCSI};
use eyre::{bail, ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{SPILL_PAGE_HEADER_SIZE, SPILL_PAGE_MAGIC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SpillPageHeader {
    magic: U32,
    row_count: U32,
    data_len: U32,
    checksum: U32,
}

const _: () = assert!(std::mem::size_of::<SpillPageHeader>() == SPILL_PAGE_HEADER_SIZE);

impl SpillPageHeader {
    zerocopy_accessors! {
        magic: u32,
        row_count: u32,
        data_len: u32,
        checksum: u32,
    }

    pub fn for_payload(row_count: u32, payload: &[u8]) -> Self {
        Self {
            magic: U32::new(SPILL_PAGE_MAGIC),
            row_count: U32::new(row_count),
            data_len: U32::new(payload.len() as u32),
            checksum: U32::new(compute_checksum(payload)),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = match Self::read_from_bytes(bytes) {
            Ok(h) => h,
            Err(_) => bail!(
                "page header needs {} bytes, got {}",
                SPILL_PAGE_HEADER_SIZE,
                bytes.len()
            ),
        };
        ensure!(
            header.magic() == SPILL_PAGE_MAGIC,
            "bad page magic 0x{:08x}",
            header.magic()
        );
        Ok(header)
    }

    pub fn validate(&self, payload: &[u8]) -> Result<()> {
        ensure!(
            payload.len() == self.data_len() as usize,
            "payload length {} does not match header length {}",
            payload.len(),
            self.data_len()
        );
        let computed = compute_checksum(payload);
        ensure!(
            computed == self.checksum(),
            "checksum mismatch: stored 0x{:08x}, computed 0x{:08x}",
            self.checksum(),
            computed
        );
        Ok(())
    }
}

pub fn compute_checksum(payload: &[u8]) -> u32 {
    CRC32.checksum(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes_round_trip() {
        let payload = b"some encoded rows";
        let header = SpillPageHeader::for_payload(3, payload);
        let bytes = header.as_bytes();
        assert_eq!(bytes.len(), SPILL_PAGE_HEADER_SIZE);

        let parsed = SpillPageHeader::from_bytes(bytes).unwrap();
        assert_eq!(parsed.row_count(), 3);
        assert_eq!(parsed.data_len() as usize, payload.len());
        parsed.validate(payload).unwrap();
    }

    #[test]
    fn flipped_payload_bit_fails_checksum() {
        let mut payload = b"abcdefgh".to_vec();
        let header = SpillPageHeader::for_payload(1, &payload);
        payload[3] ^= 0x40;
        let err = header.validate(&payload).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut header = SpillPageHeader::for_payload(0, &[]);
        header.set_magic(0xDEAD_BEEF);
        assert!(SpillPageHeader::from_bytes(header.as_bytes()).is_err());
    }
}
