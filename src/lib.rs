//! Durable Queue - a reliable, file-backed FIFO queue of opaque byte
//! records with O(1) additions and removals.
//!
//! # Overview
//!
//! A [`DurableQueue`] stores an ordered sequence of byte records in a single
//! on-disk file. Writes are synchronous: data reaches storage before an
//! operation returns, and every mutation is committed by a single 16-byte
//! header write, so the file survives process and even system crashes
//! without a separate journal. A mutation interrupted before its header
//! commit leaves only unreferenced garbage bytes; reopening the file yields
//! exactly the pre-mutation state.
//!
//! # Key Features
//!
//! - Single-file storage with a fixed 16-byte header and a ring-buffer
//!   data region that wraps at end-of-file
//! - Memory-mapped I/O with range flushes for flush-through durability
//! - Atomic temp-file-plus-rename creation
//! - Automatic power-of-two growth with defragmentation of wrapped data
//! - Streamed, bounded per-record readers for buffer-free consumption
//!
//! # Usage
//!
//! `peek` and `remove` are used in conjunction: `peek` retrieves the oldest
//! record, `remove` drops it after successful processing. If the process
//! crashes between the two, the record remains queued for the next run.
//!
//! Exactly one `DurableQueue` instance should access a given file at a
//! time; there is no cross-process locking. After creating a brand-new
//! queue file, callers that need the file name itself to survive a crash
//! should sync the containing directory.

#![deny(missing_docs)]

mod error;
mod queue;

pub use error::{QueueError, Result};
pub use queue::durable::DurableQueue;
pub use queue::reader::ElementReader;
pub use queue::{Element, Header};
