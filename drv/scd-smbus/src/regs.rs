// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register layouts for the SCD SMBus master engine.
//!
//! Every register is a plain 32-bit word; the accessors below are the only
//! place that knows where a field lives.  Bit 0 is the least significant
//! bit.

use bitfield::bitfield;

/// Offset of the request FIFO from the engine's base address.
pub const REQUEST_OFFSET: u32 = 0x10;
/// Offset of the control/status register from the engine's base address.
pub const CONTROL_STATUS_OFFSET: u32 = 0x20;
/// Offset of the response FIFO from the engine's base address.
pub const RESPONSE_OFFSET: u32 = 0x30;

/// Per-byte bus time in microseconds, indexed by the speed class.
pub const PER_BYTE_DELAY_US: [u64; 4] = [110, 35, 14, 14];

bitfield! {
    /// Control/status register.  `fe` is write-one-to-clear; `nrs`, `nrq`,
    /// `brb`, `ver`, `fsz` and `sp` are read-only.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct ControlStatus(u32);
    impl Debug;
    /// Responses waiting to be read.
    pub u16, nrs, set_nrs: 9, 0;
    /// FIFO size class; see [`fifo_capacity`].
    pub u8, fsz, set_fsz: 12, 10;
    /// Force-one-error: stop the session at the first error.
    pub foe, set_foe: 13;
    /// Bus speed class, indexes [`PER_BYTE_DELAY_US`].
    pub u8, sp, set_sp: 15, 14;
    /// Requests not yet processed.
    pub u16, nrq, set_nrq: 25, 16;
    /// Backlog.
    pub brb, set_brb: 26;
    /// Protocol version.
    pub u8, ver, set_ver: 29, 28;
    /// Frame empty: the engine finished the current session.
    pub fe, set_fe: 30;
    /// Reset.
    pub rst, set_rst: 31;
}

impl ControlStatus {
    /// True if the engine holds any state from a previous session.
    pub fn is_dirty(&self) -> bool {
        self.fe() || self.brb() || self.nrq() != 0 || self.nrs() != 0
    }

    pub fn capacity(&self) -> Option<usize> {
        fifo_capacity(self.fsz())
    }

    pub fn per_byte_delay_us(&self) -> u64 {
        PER_BYTE_DELAY_US[usize::from(self.sp() & 0b11)]
    }
}

/// Session capacity for a FIFO size class; classes 4 and up are reserved.
pub fn fifo_capacity(fsz: u8) -> Option<usize> {
    match fsz {
        0 => Some(127),
        1 => Some(255),
        2 => Some(511),
        3 => Some(1023),
        _ => None,
    }
}

bitfield! {
    /// One item written to the request FIFO.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct Request(u32);
    impl Debug;
    /// Data byte (or address byte for an address item).
    pub u8, d, set_d: 7, 0;
    /// Session size; only meaningful on a session's first item.
    pub u8, ss, set_ss: 13, 8;
    /// Extra data (PEC) follows this item.
    pub ed, set_ed: 14;
    /// Block read: this item's response is a byte count.
    pub br, set_br: 15;
    /// Data-ack timing.
    pub u8, dat, set_dat: 17, 16;
    /// Timing class.
    pub u8, t, set_t: 19, 18;
    /// Stop after this item.
    pub sp, set_sp: 20;
    /// Acknowledge the byte read by this item.
    pub da, set_da: 21;
    /// Drive `d` onto the bus; clear for read placeholders.
    pub dod, set_dod: 22;
    /// Start (or repeated start) before this item.
    pub st, set_st: 23;
    /// Bus selector.
    pub u8, bs, set_bs: 27, 24;
    /// Transfer index.
    pub u8, ti, set_ti: 31, 28;
}

bitfield! {
    /// One item read from the response FIFO.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct Response(u32);
    impl Debug;
    pub u8, d, set_d: 7, 0;
    pub bus_conflict_error, set_bus_conflict_error: 8;
    pub timeout_error, set_timeout_error: 9;
    pub ack_error, set_ack_error: 10;
    pub flushed, set_flushed: 11;
    pub u8, ti, set_ti: 15, 12;
    pub u8, ss, set_ss: 21, 16;
    /// The response FIFO overflowed.
    pub foe, set_foe: 30;
    pub fe, set_fe: 31;
}

/// Session sizes travel in a six-bit field.
pub fn ss_field(ss: usize) -> u8 {
    (ss & 0x3f) as u8
}

/// The exact response word the engine returns when the first address of a
/// session is not acknowledged: a bare ack error on item 0.
pub fn nack_signature(ss: usize) -> Response {
    let mut rsp = Response(0);
    rsp.set_ti(0);
    rsp.set_ss(ss_field(ss));
    rsp.set_ack_error(true);
    rsp
}
