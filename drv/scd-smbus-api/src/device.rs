// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SMBus protocol operations, emulated over plain message lists.

use crate::{
    Message, MessageFlags, ResponseCode, SmbusTransport, SMBUS_BLOCK_MAX,
};

///
/// A device on a logical bus.  This pairs a transport handle with a 7-bit
/// device address and provides the SMBus protocol operations in terms of
/// [`SmbusTransport::transfer`]: every operation is a single call, so the
/// combined write/read forms use a repeated start rather than a stop between
/// the command byte and the read.
///
pub struct SmbusDevice<'a, T: SmbusTransport> {
    transport: &'a T,
    handle: T::Handle,
    address: u8,
}

impl<'a, T: SmbusTransport> SmbusDevice<'a, T> {
    pub fn new(transport: &'a T, handle: T::Handle, address: u8) -> Self {
        Self {
            transport,
            handle,
            address,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    fn xfer(&self, msgs: &mut [Message<'_>]) -> Result<(), ResponseCode> {
        self.transport.transfer(self.handle, msgs)
    }

    /// Quick command: an address phase with the read/write bit and no data.
    pub fn quick(&self, read: bool) -> Result<(), ResponseCode> {
        let mut empty = [0u8; 0];
        let mut msg = Message::write(self.address, &mut empty);
        if read {
            msg.flags |= MessageFlags::READ;
        }
        self.xfer(&mut [msg])
    }

    pub fn receive_byte(&self) -> Result<u8, ResponseCode> {
        let mut val = [0u8; 1];
        self.xfer(&mut [Message::read(self.address, &mut val)])?;
        Ok(val[0])
    }

    pub fn send_byte(&self, val: u8) -> Result<(), ResponseCode> {
        let mut out = [val];
        self.xfer(&mut [Message::write(self.address, &mut out)])
    }

    pub fn read_byte_data(&self, cmd: u8) -> Result<u8, ResponseCode> {
        let mut reg = [cmd];
        let mut val = [0u8; 1];
        self.xfer(&mut [
            Message::write(self.address, &mut reg),
            Message::read(self.address, &mut val),
        ])?;
        Ok(val[0])
    }

    pub fn write_byte_data(
        &self,
        cmd: u8,
        val: u8,
    ) -> Result<(), ResponseCode> {
        let mut out = [cmd, val];
        self.xfer(&mut [Message::write(self.address, &mut out)])
    }

    /// SMBus words go out least significant byte first.
    pub fn read_word_data(&self, cmd: u8) -> Result<u16, ResponseCode> {
        let mut reg = [cmd];
        let mut val = [0u8; 2];
        self.xfer(&mut [
            Message::write(self.address, &mut reg),
            Message::read(self.address, &mut val),
        ])?;
        Ok(u16::from_le_bytes(val))
    }

    pub fn write_word_data(
        &self,
        cmd: u8,
        val: u16,
    ) -> Result<(), ResponseCode> {
        let [lo, hi] = val.to_le_bytes();
        let mut out = [cmd, lo, hi];
        self.xfer(&mut [Message::write(self.address, &mut out)])
    }

    ///
    /// Performs an SMBus block read into `buf`, returning the number of
    /// bytes the device announced.  As with the I2C server's `read_block`,
    /// the byte count is only returned from the function; it is *not*
    /// present as the payload's first byte.
    ///
    pub fn read_block_data(
        &self,
        cmd: u8,
        buf: &mut [u8],
    ) -> Result<usize, ResponseCode> {
        let mut reg = [cmd];
        let mut block = [0u8; 1 + SMBUS_BLOCK_MAX];
        self.xfer(&mut [
            Message::write(self.address, &mut reg),
            Message::block_read(self.address, &mut block),
        ])?;

        let count = usize::from(block[0]);
        if count > SMBUS_BLOCK_MAX {
            return Err(ResponseCode::Protocol);
        }
        let dest = buf.get_mut(..count).ok_or(ResponseCode::BadArg)?;
        dest.copy_from_slice(&block[1..=count]);
        Ok(count)
    }

    pub fn write_block_data(
        &self,
        cmd: u8,
        data: &[u8],
    ) -> Result<(), ResponseCode> {
        if data.len() > SMBUS_BLOCK_MAX {
            return Err(ResponseCode::BadArg);
        }

        let mut out = [0u8; 2 + SMBUS_BLOCK_MAX];
        out[0] = cmd;
        out[1] = data.len() as u8;
        out[2..2 + data.len()].copy_from_slice(data);

        let len = 2 + data.len();
        self.xfer(&mut [Message::write(self.address, &mut out[..len])])
    }

    /// Reads `buf.len()` bytes starting at `cmd`, without a length byte.
    pub fn read_i2c_block_data(
        &self,
        cmd: u8,
        buf: &mut [u8],
    ) -> Result<(), ResponseCode> {
        if buf.is_empty() || buf.len() > SMBUS_BLOCK_MAX {
            return Err(ResponseCode::BadArg);
        }

        let mut reg = [cmd];
        self.xfer(&mut [
            Message::write(self.address, &mut reg),
            Message::read(self.address, buf),
        ])
    }
}
