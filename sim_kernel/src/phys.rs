//! Physical page frames for SimulatedKernel
//!
//! Frames are reference counted by the number of page-table entries (or
//! directory slots) pointing at them. A frame returns to the free pool when
//! its last reference is dropped, so one frame can back the same virtual
//! page in several address spaces at once.

use core_types::PGSIZE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a physical page frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(u32);

impl FrameId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

#[derive(Debug)]
struct Frame {
    data: Box<[u8]>,
    refs: u32,
}

/// Fixed-capacity pool of page frames
#[derive(Debug)]
pub struct PhysMemory {
    frames: Vec<Option<Frame>>,
    free_slots: Vec<u32>,
    capacity: usize,
    in_use: usize,
}

impl PhysMemory {
    /// Creates a pool that can hand out at most `capacity` frames at a time
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::new(),
            free_slots: Vec::new(),
            capacity,
            in_use: 0,
        }
    }

    /// Allocates a zeroed frame with no references
    ///
    /// The caller must take a reference (see [`PhysMemory::incref`]) before
    /// the frame can be observed by anyone else.
    pub fn alloc(&mut self) -> Option<FrameId> {
        if self.in_use >= self.capacity {
            return None;
        }

        let frame = Frame {
            data: vec![0u8; PGSIZE as usize].into_boxed_slice(),
            refs: 0,
        };

        let id = match self.free_slots.pop() {
            Some(slot) => {
                self.frames[slot as usize] = Some(frame);
                FrameId(slot)
            }
            None => {
                self.frames.push(Some(frame));
                FrameId((self.frames.len() - 1) as u32)
            }
        };

        self.in_use += 1;
        Some(id)
    }

    pub fn incref(&mut self, frame: FrameId) {
        if let Some(f) = self.frame_mut(frame) {
            f.refs += 1;
        }
    }

    /// Drops one reference; frees the frame when none remain
    pub fn decref(&mut self, frame: FrameId) {
        let freed = match self.frame_mut(frame) {
            Some(f) => {
                f.refs = f.refs.saturating_sub(1);
                f.refs == 0
            }
            None => false,
        };

        if freed {
            self.frames[frame.index()] = None;
            self.free_slots.push(frame.0);
            self.in_use -= 1;
        }
    }

    /// Number of mappings referencing `frame` (0 if it is free)
    pub fn refcount(&self, frame: FrameId) -> u32 {
        self.frame(frame).map(|f| f.refs).unwrap_or(0)
    }

    pub fn bytes(&self, frame: FrameId) -> Option<&[u8]> {
        self.frame(frame).map(|f| &f.data[..])
    }

    pub fn bytes_mut(&mut self, frame: FrameId) -> Option<&mut [u8]> {
        self.frame_mut(frame).map(|f| &mut f.data[..])
    }

    pub fn free_frames(&self) -> usize {
        self.capacity - self.in_use
    }

    pub fn frames_in_use(&self) -> usize {
        self.in_use
    }

    fn frame(&self, frame: FrameId) -> Option<&Frame> {
        self.frames.get(frame.index()).and_then(|f| f.as_ref())
    }

    fn frame_mut(&mut self, frame: FrameId) -> Option<&mut Frame> {
        self.frames.get_mut(frame.index()).and_then(|f| f.as_mut())
    }
}
