//! File-backed FIFO queue implementation
//!
//! This module provides the structures and functions behind the durable
//! queue file. It consists of several components:
//!
//! - Header codec for the fixed 16-byte control block at the front of the
//!   file, whose single-write update is the commit point of every mutation
//! - Element locators identifying one length-prefixed record in the ring
//! - A pure expansion planner for file growth and defragmentation
//! - Bounded per-record readers for streamed consumption
//! - The queue itself, tying ring I/O and the commit protocol together
//!
//! On-disk layout (all integers big-endian):
//!
//! ```text
//!   Format:
//!     Header              (16 bytes)
//!     Element Ring Buffer (File Length - 16 bytes)
//!
//!   Header:
//!     File Length            (4 bytes)
//!     Element Count          (4 bytes)
//!     First Element Position (4 bytes, =0 if none)
//!     Last Element Position  (4 bytes, =0 if none)
//!
//!   Element:
//!     Length (4 bytes)
//!     Data   (Length bytes)
//! ```

pub mod durable;
pub mod growth;
pub mod reader;

/// Length of the file header in bytes.
pub const HEADER_LENGTH: u32 = 16;

/// Initial file size in bytes: one file system block.
pub const INITIAL_FILE_LENGTH: u32 = 4096;

/// Stores a `u32` into `buf` at `offset` in big-endian byte order.
///
/// The header and every record length prefix go through this codec so the
/// on-disk format is byte-exact regardless of host endianness.
#[inline]
pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// Reads a big-endian `u32` from `buf` at `offset`.
#[inline]
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

/// Wraps `position` back into the ring region `[16, file_length)` if it
/// runs past the end of the file.
#[inline]
pub(crate) fn wrap_position(position: u32, file_length: u32) -> u32 {
    if position < file_length {
        position
    } else {
        HEADER_LENGTH + position - file_length
    }
}

/// File header: the queue's control block
///
/// The header is the sole commit point. Data bytes written into the ring
/// are invisible garbage until a header referencing them is written, so a
/// crash at any point between header writes reproduces the last committed
/// state on reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total file size in bytes. Always a power of two, minimum 4096.
    pub file_length: u32,
    /// Number of stored records.
    pub element_count: u32,
    /// Position of the oldest record's length prefix (0 = none).
    pub first_position: u32,
    /// Position of the newest record's length prefix (0 = none).
    pub last_position: u32,
}

impl Header {
    /// Size of the encoded header in bytes.
    pub const SIZE: usize = HEADER_LENGTH as usize;

    /// Header of a freshly initialized, empty 4096-byte file.
    pub fn initial() -> Self {
        Self {
            file_length: INITIAL_FILE_LENGTH,
            element_count: 0,
            first_position: 0,
            last_position: 0,
        }
    }

    /// Encodes the header into its 16-byte on-disk form.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        write_u32(&mut buf, 0, self.file_length);
        write_u32(&mut buf, 4, self.element_count);
        write_u32(&mut buf, 8, self.first_position);
        write_u32(&mut buf, 12, self.last_position);
        buf
    }

    /// Decodes a header from its 16-byte on-disk form.
    pub fn decode(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            file_length: read_u32(buf, 0),
            element_count: read_u32(buf, 4),
            first_position: read_u32(buf, 8),
            last_position: read_u32(buf, 12),
        }
    }
}

/// A locator for one record in the ring buffer
///
/// Elements are plain values reconstructed from the 4-byte length prefix
/// stored at `position`; they never reference live queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    /// Byte offset of the record's length prefix within the file.
    pub position: u32,
    /// Length of the record data in bytes.
    pub length: u32,
}

impl Element {
    /// Length of the record length prefix in bytes.
    pub const PREFIX_LENGTH: u32 = 4;

    /// The null element, representing "no record".
    pub const NULL: Element = Element {
        position: 0,
        length: 0,
    };

    /// Returns true if this is the null element.
    pub fn is_null(&self) -> bool {
        self.position == 0
    }

    /// Offset one past the end of this record's data, before wrapping.
    pub(crate) fn end(&self) -> u32 {
        self.position + Self::PREFIX_LENGTH + self.length
    }
}
