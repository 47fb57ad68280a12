//! Expansion planning for file growth and defragmentation
//!
//! Growth is expressed as a pure function from the current on-disk state
//! and a required byte count to an [`ExpansionPlan`]: the new file length,
//! an optional tail copy that makes a wrapped ring contiguous again, and
//! the resulting last-element position. Applying the plan (resize, copy,
//! header commit) is the queue's job; planning it is side-effect free and
//! unit-tested in isolation.

use crate::error::{QueueError, Result};
use crate::queue::{wrap_position, Element, HEADER_LENGTH};

/// Maximum file length the queue will grow to: 1 GiB.
///
/// The doubling loop stops here so a runaway producer fails with
/// [`QueueError::CapacityExceeded`] instead of filling the disk.
pub const MAX_FILE_LENGTH: u32 = 1 << 30;

/// Instruction to copy the wrapped tail of the ring into the capacity
/// gained by an expansion.
///
/// When the record layout wraps past end-of-file, the bytes from offset 16
/// up to the old end of the last record are logically the tail of the
/// queue. Growing the file inserts the new capacity in the middle of that
/// logical ring, so those bytes must move to the old physical end before
/// the new header is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailCopy {
    /// Destination offset: the old file length.
    pub destination: u32,
    /// Number of bytes to copy from offset 16.
    pub count: u32,
}

/// A computed expansion: what the file must become to fit one more record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionPlan {
    /// New total file length. Always a power of two.
    pub new_file_length: u32,
    /// Tail copy to perform before the header commit, if the ring wraps.
    pub copy: Option<TailCopy>,
    /// Last-element position to commit: relocated if the tail moved,
    /// otherwise unchanged.
    pub new_last_position: u32,
}

/// Plans an expansion for a record of `data_length` bytes, or `None` when
/// the file already has room.
///
/// `file_length`, `used_bytes`, `first` and `last` describe the current
/// committed state. The file length is doubled until the accumulated free
/// space fits the record's `4 + data_length` bytes.
pub fn plan_expansion(
    file_length: u32,
    used_bytes: u32,
    first: Element,
    last: Element,
    data_length: u32,
) -> Result<Option<ExpansionPlan>> {
    let element_length = u64::from(Element::PREFIX_LENGTH) + u64::from(data_length);
    let mut remaining = u64::from(file_length - used_bytes);
    if remaining >= element_length {
        return Ok(None);
    }

    // Double the length until the new data fits.
    let mut previous = u64::from(file_length);
    let mut new_length = previous;
    while remaining < element_length {
        remaining += previous;
        new_length = previous << 1;
        previous = new_length;
    }
    if new_length > u64::from(MAX_FILE_LENGTH) {
        return Err(QueueError::CapacityExceeded {
            needed: new_length,
            max: MAX_FILE_LENGTH,
        });
    }
    #[allow(clippy::cast_possible_truncation)]
    let new_file_length = new_length as u32;

    // The ring wraps if records continue past EOF into the front region,
    // or if the last record's own data straddles EOF.
    let raw_end = last.end();
    let end_of_last = wrap_position(raw_end, file_length);
    let wraps = last.position < first.position || raw_end > file_length;

    let copy = if wraps {
        Some(TailCopy {
            destination: file_length,
            count: end_of_last - HEADER_LENGTH,
        })
    } else {
        None
    };

    // Only a fully wrapped tail relocates the last element; a straddling
    // last record keeps its prefix in place and just regains its data tail.
    let new_last_position = if last.position < first.position {
        file_length + last.position - HEADER_LENGTH
    } else {
        last.position
    };

    Ok(Some(ExpansionPlan {
        new_file_length,
        copy,
        new_last_position,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_expansion_when_space_remains() {
        let first = Element {
            position: 16,
            length: 100,
        };
        let plan = plan_expansion(4096, 16 + 104, first, first, 200).unwrap();
        assert!(plan.is_none());
    }

    #[test]
    fn test_single_doubling_contiguous() {
        let first = Element {
            position: 16,
            length: 100,
        };
        let last = Element {
            position: 3800,
            length: 100,
        };
        let plan = plan_expansion(4096, 4000, first, last, 300)
            .unwrap()
            .unwrap();

        assert_eq!(plan.new_file_length, 8192);
        assert_eq!(plan.copy, None);
        assert_eq!(plan.new_last_position, 3800);
    }

    #[test]
    fn test_multiple_doublings() {
        let first = Element {
            position: 16,
            length: 100,
        };
        let last = Element {
            position: 2000,
            length: 100,
        };
        // 10_000 bytes cannot fit after one doubling (4096 - 3000 + 4096),
        // so the plan doubles twice.
        let plan = plan_expansion(4096, 3000, first, last, 10_000)
            .unwrap()
            .unwrap();

        assert_eq!(plan.new_file_length, 16384);
        assert_eq!(plan.copy, None);
    }

    #[test]
    fn test_wrapped_tail_is_copied_and_relocated() {
        let first = Element {
            position: 3000,
            length: 500,
        };
        let last = Element {
            position: 16,
            length: 184,
        };
        let plan = plan_expansion(4096, 3900, first, last, 300)
            .unwrap()
            .unwrap();

        assert_eq!(plan.new_file_length, 8192);
        // Bytes [16, 204) are the logical tail and move to the old EOF.
        assert_eq!(
            plan.copy,
            Some(TailCopy {
                destination: 4096,
                count: 188,
            })
        );
        assert_eq!(plan.new_last_position, 4096 + 16 - 16);
    }

    #[test]
    fn test_straddling_last_record_copies_without_relocating() {
        let first = Element {
            position: 2000,
            length: 100,
        };
        // Last record runs past EOF: [4000, 4096) plus [16, 124).
        let last = Element {
            position: 4000,
            length: 200,
        };
        let plan = plan_expansion(4096, 3900, first, last, 300)
            .unwrap()
            .unwrap();

        let copy = plan.copy.unwrap();
        assert_eq!(copy.destination, 4096);
        assert_eq!(copy.count, 108);
        // The prefix never moved, so neither does the last position.
        assert_eq!(plan.new_last_position, 4000);
    }

    #[test]
    fn test_record_ending_exactly_at_eof_needs_no_copy() {
        let first = Element {
            position: 16,
            length: 100,
        };
        let last = Element {
            position: 3892,
            length: 200,
        };
        // last.end() == 4096: nothing wrapped yet.
        let plan = plan_expansion(4096, 4080, first, last, 300)
            .unwrap()
            .unwrap();

        assert_eq!(plan.copy, None);
        assert_eq!(plan.new_last_position, 3892);
    }

    #[test]
    fn test_growth_ceiling() {
        let first = Element {
            position: 16,
            length: 100,
        };
        let last = Element {
            position: MAX_FILE_LENGTH - 200,
            length: 100,
        };
        let result = plan_expansion(MAX_FILE_LENGTH, MAX_FILE_LENGTH - 20, first, last, 100);

        assert!(matches!(
            result,
            Err(QueueError::CapacityExceeded { max, .. }) if max == MAX_FILE_LENGTH
        ));
    }
}
