// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client API for the SCD SMBus masters
//!
//! The SCD exposes a number of SMBus master engines, each of which
//! multiplexes several logical buses.  A client never sees the engines
//! directly: it opens a logical bus by its adapter number through an
//! [`SmbusTransport`] and hands it lists of [`Message`]s, exactly as it
//! would to any other I2C adapter.  The types in this crate are shared by
//! the driver and its clients, and work on both the host and the target.

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use num_derive::FromPrimitive;

mod device;

pub use device::SmbusDevice;

/// Largest payload of an SMBus block transfer, not counting the length byte.
pub const SMBUS_BLOCK_MAX: usize = 32;

/// The response code returned from an SMBus transfer or a configuration
/// request.  As with the I2C server, these are deliberately specific so that
/// upstack software has some context surrounding the error -- but callers
/// are not expected to handle the I/O failure flavors differently (see
/// [`ResponseCode::is_io_failure`]).
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum ResponseCode {
    /// A message was malformed: its length exceeds its buffer, or a block
    /// read has no room for the announced payload.
    BadArg = 1,
    /// The request uses a feature the engine does not implement: ten-bit
    /// addressing, or more than one block read in a call.
    OperationNotSupported,
    /// The session does not fit in the engine's request FIFO, or the
    /// response FIFO filled up while waiting for completion.
    SessionOverflow,
    /// The engine made no progress for 100 ms.
    Timeout,
    /// A response carried an error flag (address or data NACK, bus timeout,
    /// bus conflict, flush, FIFO overflow), or the engine could not be
    /// brought out of reset.
    Io,
    /// A response carried frame-empty before the session was consumed.
    UnexpectedFrameEnd,
    /// A response carried a transfer index other than the one expected.
    IndexMismatch,
    /// A block read announced a length outside `1..=32`.
    Protocol,
    /// No logical bus is registered under the requested adapter number.
    BadBus,
    /// A configuration line was malformed or had an out-of-range field.
    BadConfig,
    /// A master with the requested id already exists.
    MasterExists,
    /// A fixed-capacity table (masters, buses, parameter records) is full.
    NoSpace,
    /// The device has finished initialization and no longer accepts new
    /// objects.
    Busy,
}

impl ResponseCode {
    /// Returns true for the codes that denote a failed exchange with the
    /// engine.  The distinct flavors exist for diagnostics only.
    pub fn is_io_failure(self) -> bool {
        matches!(
            self,
            ResponseCode::Io
                | ResponseCode::UnexpectedFrameEnd
                | ResponseCode::IndexMismatch
        )
    }
}

bitflags! {
    /// Modifier flags carried by each [`Message`].
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct MessageFlags: u16 {
        /// Read from the device (otherwise write).
        const READ = 1 << 0;
        /// The address is a ten-bit address.  Not supported.
        const TEN_BIT = 1 << 4;
        /// Do not issue a start condition before this message's address.
        const NO_START = 1 << 14;
        /// SMBus block read: the first byte read announces the number of
        /// bytes that follow.
        const RECV_LEN = 1 << 10;
    }
}

bitflags! {
    /// What a bus can do, as reported to the host bus framework.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Functionality: u32 {
        const I2C = 0x0000_0001;
        const NOSTART = 0x0000_0010;
        const SMBUS_QUICK = 0x0001_0000;
        const SMBUS_READ_BYTE = 0x0002_0000;
        const SMBUS_WRITE_BYTE = 0x0004_0000;
        const SMBUS_READ_BYTE_DATA = 0x0008_0000;
        const SMBUS_WRITE_BYTE_DATA = 0x0010_0000;
        const SMBUS_READ_WORD_DATA = 0x0020_0000;
        const SMBUS_WRITE_WORD_DATA = 0x0040_0000;
        const SMBUS_READ_BLOCK_DATA = 0x0100_0000;
        const SMBUS_WRITE_BLOCK_DATA = 0x0200_0000;
        const SMBUS_READ_I2C_BLOCK = 0x0400_0000;
        const SMBUS_WRITE_I2C_BLOCK = 0x0800_0000;

        const SMBUS_BYTE =
            Self::SMBUS_READ_BYTE.bits() | Self::SMBUS_WRITE_BYTE.bits();
        const SMBUS_BYTE_DATA = Self::SMBUS_READ_BYTE_DATA.bits()
            | Self::SMBUS_WRITE_BYTE_DATA.bits();
        const SMBUS_WORD_DATA = Self::SMBUS_READ_WORD_DATA.bits()
            | Self::SMBUS_WRITE_WORD_DATA.bits();
        const SMBUS_BLOCK_DATA = Self::SMBUS_READ_BLOCK_DATA.bits()
            | Self::SMBUS_WRITE_BLOCK_DATA.bits();
        const SMBUS_I2C_BLOCK = Self::SMBUS_READ_I2C_BLOCK.bits()
            | Self::SMBUS_WRITE_I2C_BLOCK.bits();
    }
}

///
/// A single bus transaction: one address phase followed by `len` data
/// bytes.  For writes, `buf[..len]` is sent; for reads, the bytes read are
/// deposited into `buf[..len]`.  A block read ([`MessageFlags::RECV_LEN`])
/// starts out with `len` covering the length byte (and any trailing extra
/// byte), and comes back with `len` grown by the announced count; `buf` must
/// have room for that growth.
///
#[derive(Debug)]
pub struct Message<'a> {
    pub addr: u16,
    pub flags: MessageFlags,
    pub len: usize,
    pub buf: &'a mut [u8],
}

impl<'a> Message<'a> {
    pub fn write(addr: u8, buf: &'a mut [u8]) -> Self {
        Self {
            addr: addr.into(),
            flags: MessageFlags::empty(),
            len: buf.len(),
            buf,
        }
    }

    pub fn read(addr: u8, buf: &'a mut [u8]) -> Self {
        Self {
            addr: addr.into(),
            flags: MessageFlags::READ,
            len: buf.len(),
            buf,
        }
    }

    /// A block read; `buf` needs room for the length byte and up to
    /// [`SMBUS_BLOCK_MAX`] bytes of payload.
    pub fn block_read(addr: u8, buf: &'a mut [u8]) -> Self {
        Self {
            addr: addr.into(),
            flags: MessageFlags::READ | MessageFlags::RECV_LEN,
            len: 1,
            buf,
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn is_read(&self) -> bool {
        self.flags.contains(MessageFlags::READ)
    }

    /// The bytes covered by `len`.
    pub fn data(&self) -> &[u8] {
        let len = self.len.min(self.buf.len());
        &self.buf[..len]
    }
}

///
/// The interface the host bus framework sees.  A transport hands out
/// handles for logical buses by adapter number, and runs message lists
/// against them.  Each call is all-or-nothing: there is no partial success,
/// so a caller that wants partial data must split its work into several
/// calls.
///
pub trait SmbusTransport {
    type Handle: Copy;

    fn open(&self, adapter: u16) -> Result<Self::Handle, ResponseCode>;

    fn transfer(
        &self,
        handle: Self::Handle,
        msgs: &mut [Message<'_>],
    ) -> Result<(), ResponseCode>;

    fn functionality(&self, handle: Self::Handle) -> Functionality;
}
