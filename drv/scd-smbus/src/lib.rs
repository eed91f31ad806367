// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the SCD SMBus master engines
//!
//! The SCD (system control device) carries a number of SMBus master
//! engines.  Each engine is driven through three 32-bit registers: a request
//! FIFO that accepts one item per bus byte, a control/status register, and a
//! response FIFO that yields one item per request.  A single engine
//! multiplexes up to sixteen logical buses, selected per item.
//!
//! The driver turns a list of I2C/SMBus [`Message`]s into a *session* of
//! request items, waits for the engine to drain it, and validates and
//! decodes the responses back into the messages.  All sessions against an
//! engine are serialized by that engine's [`Master`] lock; sessions against
//! different engines proceed in parallel.
//!
//! Register access goes through the [`RegisterPort`] trait, and time through
//! [`Clock`], so that the same code runs against the memory-mapped device
//! ([`mmio::MmioPort`]) and against the register simulator in `sim`.
//!
//! With the `std` feature, [`StdClock`] supplies real time and the `sim`
//! module is built.  Without it the crate is `no_std`, and the embedding
//! firmware provides a [`Clock`] over its own timer and sleep primitive.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod config;
pub mod context;
pub mod master;
pub mod mmio;
pub mod params;
pub mod regs;
pub mod xfer;

#[cfg(feature = "std")]
mod clock;
#[cfg(feature = "std")]
pub mod sim;

pub use context::{BusHandle, ScdContext};
pub use drv_scd_smbus_api::{
    Functionality, Message, MessageFlags, ResponseCode, SmbusDevice,
    SmbusTransport,
};
pub use master::{Master, MasterState, MasterStats};
pub use params::BusParams;

#[cfg(feature = "std")]
pub use clock::StdClock;

use ringbuf::ringbuf;

/// Register-level access to the SCD's resource window.  Addresses are byte
/// offsets from the start of the window.
pub trait RegisterPort {
    fn read32(&self, addr: u32) -> u32;
    fn write32(&self, addr: u32, val: u32);
}

impl<T: RegisterPort + ?Sized> RegisterPort for &T {
    fn read32(&self, addr: u32) -> u32 {
        (**self).read32(addr)
    }

    fn write32(&self, addr: u32, val: u32) {
        (**self).write32(addr, val)
    }
}

/// Monotonic time and sleeping.
pub trait Clock {
    /// Microseconds since an arbitrary epoch; never goes backwards.
    fn now_us(&self) -> u64;

    fn sleep_us(&self, us: u64);

    fn sleep_ms(&self, ms: u64) {
        self.sleep_us(ms.saturating_mul(1000));
    }
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn sleep_us(&self, us: u64) {
        (**self).sleep_us(us)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Trace {
    None,
    CsRead(u32, u32),
    CsWrite(u32, u32),
    Request(u32, u32),
    Response(u32, u32),
    Version { master: u32, version: u8 },
    Recovering { master: u32, cs: u32 },
    RecoveryFailed { master: u32, cs: u32 },
    ResetStuck { master: u32, cs: u32 },
    Delay { master: u32, us: u32 },
    Timeout { bus: u8, addr: u16, cs: u32 },
    Overflow { bus: u8, addr: u16, cs: u32 },
    Drain { master: u32, count: u16 },
    AddrNack { bus: u8, addr: u16 },
    BadResponse { bus: u8, addr: u16, ti: u8, rsp: u32 },
    BadBlockLength { bus: u8, addr: u16, len: u8 },
    Continuation { bus: u8, addr: u16, len: u8 },
    Tweak { adapter: u16, addr: u8 },
}

ringbuf!(TRACE, Trace, 128, Trace::None);
