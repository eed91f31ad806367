// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register port over a memory-mapped register window.

use crate::RegisterPort;

/// Reads outside the window, or at unaligned offsets, return this.
const BAD_READ: u32 = 0xffff_ffff;

///
/// The SCD's register window as mapped into our address space.  Every
/// access is a single volatile 32-bit load or store; accesses outside the
/// window are dropped (writes) or read back as all ones, which is what a
/// read of an absent device looks like on the bus anyway.
///
pub struct MmioPort {
    base: *mut u32,
    size: usize,
}

// The window is plain device memory; the master locks order accesses to
// any one engine.
unsafe impl Send for MmioPort {}
unsafe impl Sync for MmioPort {}

impl MmioPort {
    /// # Safety
    ///
    /// `base` must point to a mapping of at least `size` bytes of device
    /// registers, aligned to four bytes, that stays mapped for the life of
    /// the port.
    pub unsafe fn new(base: *mut u8, size: usize) -> Self {
        Self {
            base: base.cast(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn slot(&self, addr: u32) -> Option<*mut u32> {
        let offset = addr as usize;
        if offset % 4 != 0 || offset.checked_add(4)? > self.size {
            return None;
        }
        // Safety: in bounds of the mapping, per the contract of `new`.
        Some(unsafe { self.base.add(offset / 4) })
    }
}

impl RegisterPort for MmioPort {
    fn read32(&self, addr: u32) -> u32 {
        match self.slot(addr) {
            // Safety: `slot` checked bounds and alignment.
            Some(p) => unsafe { p.read_volatile() },
            None => BAD_READ,
        }
    }

    fn write32(&self, addr: u32, val: u32) {
        if let Some(p) = self.slot(addr) {
            // Safety: `slot` checked bounds and alignment.
            unsafe { p.write_volatile(val) }
        }
    }
}
