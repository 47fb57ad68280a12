//! Durable queue implementation over a single backing file
//!
//! This module implements the file-backed FIFO queue. Key aspects:
//!
//! - Memory-mapped file access with per-range flushes, so every durable
//!   state transition reaches storage before the operation returns
//! - A single 16-byte header write as the commit point of every mutation
//! - Ring reads and writes that split transfers straddling end-of-file
//! - Power-of-two growth with defragmentation of wrapped data
//! - One coarse lock serializing all public operations
//!
//! The in-memory mirror of the header (`file_length`, `element_count`,
//! `first`, `last`) is only updated after the corresponding header write
//! has been flushed. A failed mutation therefore leaves the queue's
//! observable state untouched; any data bytes it already wrote are
//! unreferenced garbage in the ring.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{QueueError, Result};
use crate::queue::growth::{plan_expansion, MAX_FILE_LENGTH};
use crate::queue::reader::ElementReader;
use crate::queue::{
    read_u32, wrap_position, write_u32, Element, Header, HEADER_LENGTH, INITIAL_FILE_LENGTH,
};

/// A reliable, efficient, file-based FIFO queue of byte records.
///
/// Additions and removals are O(1) and synchronous: data is on disk before
/// an operation returns. If an I/O error occurs during a mutation, the
/// change is aborted and the queue remains usable with its prior contents.
///
/// `peek` and `remove` are used in conjunction: retrieve the oldest record
/// with [`peek`](Self::peek), then drop it with [`remove`](Self::remove)
/// once it has been processed. A crash between the two leaves the record
/// queued.
///
/// Commit atomicity rests on the underlying storage performing the single
/// 16-byte header write atomically; on file systems without atomic small
/// writes a power loss mid-commit can corrupt the file.
pub struct DurableQueue {
    /// Path to the backing file.
    path: PathBuf,
    /// All queue state, behind one coarse lock. Every public operation,
    /// including the full lifetime of a streamed reader callback, holds it.
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    mmap: MmapMut,
    /// Cached file length. Always a power of two.
    file_length: u32,
    /// Number of elements.
    element_count: u32,
    /// Locator of the first (oldest) element.
    first: Element,
    /// Locator of the last (newest) element.
    last: Element,
}

impl DurableQueue {
    /// Largest record length `add` accepts. Anything bigger could never
    /// fit even in a file grown to [`MAX_FILE_LENGTH`].
    pub const MAX_RECORD_LENGTH: u32 = MAX_FILE_LENGTH - HEADER_LENGTH - Element::PREFIX_LENGTH;

    /// Opens the queue backed by the given file, creating it if absent.
    ///
    /// Creation writes a complete initial 4096-byte file to a `.tmp`
    /// sibling and atomically renames it into place, so a crash can never
    /// leave a partially initialized file under the final name. Opening an
    /// existing file validates its header; a stored file length exceeding
    /// the actual on-disk size fails with [`QueueError::Truncated`].
    ///
    /// Only one `DurableQueue` instance should access a given file at a
    /// time.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            Self::initialize(&path)?;
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let actual_length = file.metadata()?.len();
        if actual_length < Header::SIZE as u64 {
            return Err(QueueError::Truncated {
                expected: INITIAL_FILE_LENGTH,
                actual: actual_length,
            });
        }

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        let mut header_buf = [0u8; Header::SIZE];
        header_buf.copy_from_slice(&mmap[..Header::SIZE]);
        let header = Header::decode(&header_buf);
        if u64::from(header.file_length) > actual_length {
            return Err(QueueError::Truncated {
                expected: header.file_length,
                actual: actual_length,
            });
        }

        let mut inner = Inner {
            file,
            mmap,
            file_length: header.file_length,
            element_count: header.element_count,
            first: Element::NULL,
            last: Element::NULL,
        };
        inner.first = inner.read_element(header.first_position);
        inner.last = inner.read_element(header.last_position);

        debug!(
            path = %path.display(),
            file_length = header.file_length,
            element_count = header.element_count,
            "opened queue file"
        );

        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    /// Atomically initializes a new file.
    fn initialize(path: &Path) -> Result<()> {
        // Use a temp file so we don't leave a partially-initialized file.
        let mut temp_name = path.as_os_str().to_os_string();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        {
            let mut file = File::create(&temp_path)?;
            file.set_len(u64::from(INITIAL_FILE_LENGTH))?;
            file.write_all(&Header::initial().encode())?;
            file.sync_all()?;
        }

        // A rename is atomic. Callers who need the new name itself to
        // survive a crash must sync the parent directory afterwards.
        fs::rename(&temp_path, path)?;
        debug!(path = %path.display(), "created queue file");
        Ok(())
    }

    /// Get the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds an element to the end of the queue.
    ///
    /// The file is grown first if needed, then the record's length prefix
    /// and data bytes are written into the ring, and finally the header
    /// commit makes the record visible. An error anywhere along the way
    /// leaves the queue unchanged.
    pub fn add(&self, data: &[u8]) -> Result<()> {
        if data.len() as u64 > u64::from(Self::MAX_RECORD_LENGTH) {
            return Err(QueueError::RecordTooLarge {
                length: data.len(),
                max: Self::MAX_RECORD_LENGTH,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let count = data.len() as u32;

        let mut inner = self.inner.lock();
        inner.expand_if_necessary(count)?;

        // Insert a new element after the current last element.
        let was_empty = inner.element_count == 0;
        let position = if was_empty {
            HEADER_LENGTH
        } else {
            inner.wrap(inner.last.end())
        };
        let new_last = Element {
            position,
            length: count,
        };

        // Write length prefix, then data.
        let mut prefix = [0u8; Element::PREFIX_LENGTH as usize];
        write_u32(&mut prefix, 0, count);
        inner.ring_write(new_last.position, &prefix)?;
        inner.ring_write(new_last.position + Element::PREFIX_LENGTH, data)?;

        // Commit the addition. If the queue was empty, first == last.
        let first_position = if was_empty {
            new_last.position
        } else {
            inner.first.position
        };
        let header = Header {
            file_length: inner.file_length,
            element_count: inner.element_count + 1,
            first_position,
            last_position: new_last.position,
        };
        inner.write_header(header)?;

        inner.last = new_last;
        inner.element_count += 1;
        if was_empty {
            inner.first = new_last;
        }
        Ok(())
    }

    /// Reads the oldest element without removing it. Returns `None` if
    /// the queue is empty.
    pub fn peek(&self) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.lock();
        if inner.element_count == 0 {
            return Ok(None);
        }
        let mut data = vec![0u8; inner.first.length as usize];
        inner.ring_read(inner.first.position + Element::PREFIX_LENGTH, &mut data);
        Ok(Some(data))
    }

    /// Invokes `reader` with a bounded stream over the oldest element and
    /// its length, if one is available.
    ///
    /// The callback runs while the queue's lock is held: no other
    /// operation can proceed until it returns, and removing the record
    /// being streamed is unsupported. The reader is single-pass.
    pub fn peek_stream<F>(&self, reader: F) -> Result<()>
    where
        F: FnOnce(&mut ElementReader<'_>, u32) -> io::Result<()>,
    {
        let inner = self.inner.lock();
        if inner.element_count > 0 {
            let mut element_reader =
                ElementReader::new(&inner.mmap, inner.file_length, inner.first);
            reader(&mut element_reader, inner.first.length)?;
        }
        Ok(())
    }

    /// Invokes `reader` once for each element in the queue, from oldest to
    /// most recently added, each time with a stream bounded to just that
    /// record.
    ///
    /// As with [`peek_stream`](Self::peek_stream), the queue's lock is
    /// held for the entire iteration.
    pub fn for_each<F>(&self, mut reader: F) -> Result<()>
    where
        F: FnMut(&mut ElementReader<'_>, u32) -> io::Result<()>,
    {
        let inner = self.inner.lock();
        let mut position = inner.first.position;
        for _ in 0..inner.element_count {
            let current = inner.read_element(position);
            let mut element_reader = ElementReader::new(&inner.mmap, inner.file_length, current);
            reader(&mut element_reader, current.length)?;
            position = inner.wrap(current.end());
        }
        Ok(())
    }

    /// Removes the oldest element.
    ///
    /// Returns [`QueueError::Empty`] if the queue contains no elements.
    pub fn remove(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.element_count == 0 {
            return Err(QueueError::Empty);
        }
        if inner.element_count == 1 {
            return inner.clear();
        }

        let new_first_position = inner.wrap(inner.first.end());
        let mut prefix = [0u8; Element::PREFIX_LENGTH as usize];
        inner.ring_read(new_first_position, &mut prefix);
        let length = read_u32(&prefix, 0);

        let header = Header {
            file_length: inner.file_length,
            element_count: inner.element_count - 1,
            first_position: new_first_position,
            last_position: inner.last.position,
        };
        inner.write_header(header)?;

        inner.element_count -= 1;
        inner.first = Element {
            position: new_first_position,
            length,
        };
        Ok(())
    }

    /// Clears the queue and truncates the file back to its initial size.
    pub fn clear(&self) -> Result<()> {
        self.inner.lock().clear()
    }

    /// Returns the number of elements in the queue.
    pub fn size(&self) -> u32 {
        self.inner.lock().element_count
    }

    /// Returns true if the queue contains no elements.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the number of file bytes occupied by the header and the
    /// stored records.
    pub fn used_bytes(&self) -> u32 {
        self.inner.lock().used_bytes()
    }

    /// Returns the current backing file length in bytes.
    pub fn file_length(&self) -> u32 {
        self.inner.lock().file_length
    }

    /// Flushes and closes the underlying file.
    pub fn close(self) -> Result<()> {
        let inner = self.inner.into_inner();
        inner.mmap.flush()?;
        inner.file.sync_all()?;
        Ok(())
    }
}

impl fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("DurableQueue")
            .field("path", &self.path)
            .field("file_length", &inner.file_length)
            .field("size", &inner.element_count)
            .field("first", &inner.first)
            .field("last", &inner.last)
            .finish()
    }
}

impl Inner {
    /// Wraps the position if it exceeds the end of the file.
    fn wrap(&self, position: u32) -> u32 {
        wrap_position(position, self.file_length)
    }

    /// Returns the Element for the given stored position.
    fn read_element(&self, position: u32) -> Element {
        if position == 0 {
            return Element::NULL;
        }
        let mut prefix = [0u8; Element::PREFIX_LENGTH as usize];
        self.ring_read(position, &mut prefix);
        Element {
            position,
            length: read_u32(&prefix, 0),
        }
    }

    /// Reads `buf.len()` bytes starting at the wrapped position,
    /// splitting the transfer if it straddles end-of-file.
    fn ring_read(&self, position: u32, buf: &mut [u8]) {
        let position = self.wrap(position) as usize;
        let file_length = self.file_length as usize;
        let count = buf.len();
        if position + count <= file_length {
            buf.copy_from_slice(&self.mmap[position..position + count]);
        } else {
            // The read overlaps the EOF.
            let before_eof = file_length - position;
            buf[..before_eof].copy_from_slice(&self.mmap[position..file_length]);
            let ring_start = HEADER_LENGTH as usize;
            buf[before_eof..].copy_from_slice(&self.mmap[ring_start..ring_start + count - before_eof]);
        }
    }

    /// Writes `buf` starting at the wrapped position and flushes the
    /// touched ranges, splitting the transfer if it straddles end-of-file.
    fn ring_write(&mut self, position: u32, buf: &[u8]) -> Result<()> {
        let position = self.wrap(position) as usize;
        let file_length = self.file_length as usize;
        let count = buf.len();
        if position + count <= file_length {
            self.mmap[position..position + count].copy_from_slice(buf);
            self.mmap.flush_range(position, count)?;
        } else {
            // The write overlaps the EOF.
            let before_eof = file_length - position;
            self.mmap[position..file_length].copy_from_slice(&buf[..before_eof]);
            let ring_start = HEADER_LENGTH as usize;
            self.mmap[ring_start..ring_start + count - before_eof]
                .copy_from_slice(&buf[before_eof..]);
            self.mmap.flush_range(position, before_eof)?;
            self.mmap.flush_range(ring_start, count - before_eof)?;
        }
        Ok(())
    }

    /// Writes and flushes the header: the commit point of every mutation.
    ///
    /// The caller's in-memory mirror must not have changed yet; it is
    /// updated only after this call returns successfully.
    fn write_header(&mut self, header: Header) -> Result<()> {
        self.mmap[..Header::SIZE].copy_from_slice(&header.encode());
        self.mmap.flush_range(0, Header::SIZE)?;
        Ok(())
    }

    /// Returns the number of used bytes, header included.
    fn used_bytes(&self) -> u32 {
        if self.element_count == 0 {
            return HEADER_LENGTH;
        }

        if self.last.position >= self.first.position {
            // Contiguous queue.
            (self.last.position - self.first.position)
                + Element::PREFIX_LENGTH
                + self.last.length
                + HEADER_LENGTH
        } else {
            // tail < head. The queue wraps.
            self.last.position + Element::PREFIX_LENGTH + self.last.length + self.file_length
                - self.first.position
        }
    }

    /// Resizes the backing file and rebuilds the map over the new length.
    /// The size change is synced to storage before anything depends on it.
    fn resize(&mut self, new_length: u32) -> Result<()> {
        self.file.set_len(u64::from(new_length))?;
        self.file.sync_all()?;
        self.mmap = unsafe { MmapOptions::new().map_mut(&self.file)? };
        Ok(())
    }

    /// If necessary, expands the file to accommodate an additional
    /// element of the given length, defragmenting wrapped data into the
    /// gained capacity.
    fn expand_if_necessary(&mut self, data_length: u32) -> Result<()> {
        let plan = match plan_expansion(
            self.file_length,
            self.used_bytes(),
            self.first,
            self.last,
            data_length,
        )? {
            None => return Ok(()),
            Some(plan) => plan,
        };

        debug!(
            old_length = self.file_length,
            new_length = plan.new_file_length,
            "expanding queue file"
        );
        self.resize(plan.new_file_length)?;

        // If the buffer wraps, make it contiguous by moving the logical
        // tail into the newly gained space at the old physical end.
        if let Some(copy) = plan.copy {
            let source = HEADER_LENGTH as usize;
            let destination = copy.destination as usize;
            let count = copy.count as usize;
            assert!(
                destination + count <= self.mmap.len(),
                "tail copy of {count} bytes to {destination} exceeds file of {} bytes",
                self.mmap.len()
            );
            self.mmap.copy_within(source..source + count, destination);
            self.mmap.flush_range(destination, count)?;
        }

        // Commit the expansion.
        self.write_header(Header {
            file_length: plan.new_file_length,
            element_count: self.element_count,
            first_position: self.first.position,
            last_position: plan.new_last_position,
        })?;

        self.file_length = plan.new_file_length;
        if !self.last.is_null() {
            self.last = Element {
                position: plan.new_last_position,
                length: self.last.length,
            };
        }
        Ok(())
    }

    /// Clears the queue. Truncates the file to the initial size.
    fn clear(&mut self) -> Result<()> {
        let grown = self.file_length > INITIAL_FILE_LENGTH;
        self.write_header(Header::initial())?;

        self.element_count = 0;
        self.first = Element::NULL;
        self.last = Element::NULL;
        self.file_length = INITIAL_FILE_LENGTH;

        if grown {
            debug!("shrinking queue file back to {INITIAL_FILE_LENGTH} bytes");
            self.resize(INITIAL_FILE_LENGTH)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_new_queue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.queue");

        let queue = DurableQueue::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(fs::metadata(&path).unwrap().len(), 4096);
        assert!(queue.is_empty());
        assert_eq!(queue.file_length(), INITIAL_FILE_LENGTH);
        assert_eq!(queue.used_bytes(), HEADER_LENGTH);
    }

    #[test]
    fn test_add_peek_remove() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path().join("test.queue")).unwrap();

        queue.add(&[1, 2, 3]).unwrap();
        assert_eq!(queue.peek().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(queue.size(), 1);

        queue.remove().unwrap();
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.peek().unwrap(), None);
    }

    #[test]
    fn test_remove_on_empty_queue() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path().join("test.queue")).unwrap();

        assert!(matches!(queue.remove(), Err(QueueError::Empty)));
    }

    #[test]
    fn test_add_updates_first_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.queue");
        let expected = vec![7u8; 253];

        let queue = DurableQueue::open(&path).unwrap();
        queue.add(&expected).unwrap();
        assert_eq!(queue.peek().unwrap(), Some(expected.clone()));
        queue.close().unwrap();

        let queue = DurableQueue::open(&path).unwrap();
        assert_eq!(queue.peek().unwrap(), Some(expected));
    }

    #[test]
    fn test_oversized_record_is_rejected() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path().join("test.queue")).unwrap();

        // Too big to ever fit; checked before any file mutation.
        let result = queue.add(&vec![0u8; DurableQueue::MAX_RECORD_LENGTH as usize + 1]);
        assert!(matches!(result, Err(QueueError::RecordTooLarge { .. })));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_open_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.queue");

        // Header claims 4096 bytes but the file is cut short.
        DurableQueue::open(&path).unwrap().close().unwrap();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(64).unwrap();
        drop(file);

        assert!(matches!(
            DurableQueue::open(&path),
            Err(QueueError::Truncated {
                expected: 4096,
                actual: 64
            })
        ));
    }
}
