//! Bounded reader for streamed record consumption
//!
//! `peek_stream` and `for_each` hand callers an [`ElementReader`] instead
//! of a buffered copy, so large records can be consumed without allocating
//! them whole. The reader is scoped to exactly one record, follows the
//! ring across the end-of-file seam, and is single-pass: once the bytes
//! are consumed there is no rewinding.
//!
//! A reader lives inside the queue's exclusive lock for its entire
//! lifetime; a slow consumer blocks every other queue operation until its
//! callback returns. Removing the record being streamed is unsupported.

use std::io::{self, Read};

use crate::queue::{wrap_position, Element, HEADER_LENGTH};

/// A bounded, single-pass reader over one record's data bytes.
pub struct ElementReader<'a> {
    /// The whole mapped file.
    file: &'a [u8],
    file_length: u32,
    position: u32,
    remaining: u32,
}

impl<'a> ElementReader<'a> {
    pub(crate) fn new(file: &'a [u8], file_length: u32, element: Element) -> Self {
        Self {
            file,
            file_length,
            position: wrap_position(element.position + Element::PREFIX_LENGTH, file_length),
            remaining: element.length,
        }
    }

    /// Number of unread bytes left in the record.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Read for ElementReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = buf.len().min(self.remaining as usize);
        if count == 0 {
            return Ok(0);
        }

        let position = self.position as usize;
        let file_length = self.file_length as usize;
        if position + count <= file_length {
            buf[..count].copy_from_slice(&self.file[position..position + count]);
        } else {
            // The read overlaps the EOF; finish it from the ring start.
            let before_eof = file_length - position;
            buf[..before_eof].copy_from_slice(&self.file[position..file_length]);
            buf[before_eof..count].copy_from_slice(
                &self.file[HEADER_LENGTH as usize..HEADER_LENGTH as usize + count - before_eof],
            );
        }

        #[allow(clippy::cast_possible_truncation)]
        let count_u32 = count as u32;
        self.position = wrap_position(self.position + count_u32, self.file_length);
        self.remaining -= count_u32;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 64-byte fake file: header region [0, 16), ring region [16, 64).
    fn fake_file() -> Vec<u8> {
        let mut file = vec![0u8; 64];
        for (i, byte) in file.iter_mut().enumerate() {
            *byte = i as u8;
        }
        file
    }

    #[test]
    fn test_read_contiguous_record() {
        let file = fake_file();
        let element = Element {
            position: 20,
            length: 8,
        };

        let mut reader = ElementReader::new(&file, 64, element);
        assert_eq!(reader.remaining(), 8);

        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert_eq!(data, &file[24..32]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_read_wrapped_record() {
        let file = fake_file();
        // Prefix at [56, 60), data [60, 64) then wrapping to [16, 22).
        let element = Element {
            position: 56,
            length: 10,
        };

        let mut reader = ElementReader::new(&file, 64, element);
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();

        let mut expected = file[60..64].to_vec();
        expected.extend_from_slice(&file[16..22]);
        assert_eq!(data, expected);
    }

    #[test]
    fn test_partial_reads_are_bounded() {
        let file = fake_file();
        let element = Element {
            position: 16,
            length: 6,
        };

        let mut reader = ElementReader::new(&file, 64, element);
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(reader.remaining(), 2);
        // A larger buffer only yields what is left of the record.
        let mut big = [0u8; 32];
        assert_eq!(reader.read(&mut big).unwrap(), 2);
        assert_eq!(reader.read(&mut big).unwrap(), 0);
    }

    #[test]
    fn test_zero_length_record() {
        let file = fake_file();
        let element = Element {
            position: 16,
            length: 0,
        };

        let mut reader = ElementReader::new(&file, 64, element);
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert!(data.is_empty());
    }
}
