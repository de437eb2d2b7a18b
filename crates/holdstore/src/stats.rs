//! Memory accounting snapshots.

use std::ops::AddAssign;

use crate::buffer_state::{BufferLifecycle, BufferState};

/// Element and byte counts aggregated over buffers.
///
/// `hold_*` covers elements on element hold and, for buffers in the Hold
/// state, every element that is not already dead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemStats {
    /// Elements allocated across active and held buffers.
    pub alloc_elems: u64,
    /// Elements written.
    pub used_elems: u64,
    /// Elements no longer referenced.
    pub dead_elems: u64,
    /// Elements waiting for reader generations to pass.
    pub hold_elems: u64,
    /// Bytes allocated, including bytes outside element storage.
    pub alloc_bytes: u64,
    /// Bytes written.
    pub used_bytes: u64,
    /// Bytes no longer referenced.
    pub dead_bytes: u64,
    /// Bytes waiting for reader generations to pass.
    pub hold_bytes: u64,
    /// Buffers in the Free state.
    pub free_buffers: u32,
    /// Buffers in the Active state.
    pub active_buffers: u32,
    /// Buffers in the Hold state.
    pub hold_buffers: u32,
}

impl MemStats {
    /// Account one buffer.
    pub fn add_buffer(&mut self, state: &BufferState) {
        let elem = state.element_size() as u64;
        match state.lifecycle() {
            BufferLifecycle::Free => {
                self.free_buffers += 1;
                return;
            }
            BufferLifecycle::Active => {
                self.active_buffers += 1;
                self.hold_elems += state.hold_elems();
                self.hold_bytes += state.hold_elems() * elem + state.extra_hold_bytes();
            }
            BufferLifecycle::Hold => {
                self.hold_buffers += 1;
                let held = state.used_elems().saturating_sub(state.dead_elems());
                self.hold_elems += held;
                self.hold_bytes += held * elem + state.extra_hold_bytes();
            }
        }
        self.alloc_elems += state.capacity();
        self.used_elems += state.used_elems();
        self.dead_elems += state.dead_elems();
        self.alloc_bytes += state.capacity() * elem + state.extra_used_bytes();
        self.used_bytes += state.used_elems() * elem + state.extra_used_bytes();
        self.dead_bytes += state.dead_elems() * elem;
    }
}

impl AddAssign for MemStats {
    fn add_assign(&mut self, rhs: Self) {
        self.alloc_elems += rhs.alloc_elems;
        self.used_elems += rhs.used_elems;
        self.dead_elems += rhs.dead_elems;
        self.hold_elems += rhs.hold_elems;
        self.alloc_bytes += rhs.alloc_bytes;
        self.used_bytes += rhs.used_bytes;
        self.dead_bytes += rhs.dead_bytes;
        self.hold_bytes += rhs.hold_bytes;
        self.free_buffers += rhs.free_buffers;
        self.active_buffers += rhs.active_buffers;
        self.hold_buffers += rhs.hold_buffers;
    }
}

/// Byte-level summary for runtime introspection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes allocated.
    pub allocated_bytes: u64,
    /// Bytes written.
    pub used_bytes: u64,
    /// Bytes no longer referenced.
    pub dead_bytes: u64,
    /// Bytes waiting for reader generations to pass, including storage
    /// replaced by in-place growth.
    pub allocated_bytes_on_hold: u64,
}

impl MemoryUsage {
    /// Bytes in use and not yet reclaimable.
    pub fn live_bytes(&self) -> u64 {
        self.used_bytes
            .saturating_sub(self.dead_bytes)
            .saturating_sub(self.allocated_bytes_on_hold)
    }
}

impl AddAssign for MemoryUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.allocated_bytes += rhs.allocated_bytes;
        self.used_bytes += rhs.used_bytes;
        self.dead_bytes += rhs.dead_bytes;
        self.allocated_bytes_on_hold += rhs.allocated_bytes_on_hold;
    }
}

impl From<MemStats> for MemoryUsage {
    fn from(stats: MemStats) -> Self {
        Self {
            allocated_bytes: stats.alloc_bytes,
            used_bytes: stats.used_bytes,
            dead_bytes: stats.dead_bytes,
            allocated_bytes_on_hold: stats.hold_bytes,
        }
    }
}
