#![warn(missing_docs)]
//! Packbench IPC Protocol
//!
//! Binary wire protocol for coordinator-worker communication. Messages are
//! serialized with rkyv and exchanged as length-prefixed frames over a
//! reliable, order-preserving byte stream (one pipe pair per worker).

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{WorkRequest, WorkResponse};
