// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device timing parameters

use drv_scd_smbus_api::ResponseCode;
use heapless::Vec;

/// One past the largest 7-bit device address; a bus can hold at most one
/// record per address.
pub const MAX_PARAM_RECORDS: usize = 128;

/// The record at this address applies to every device on the bus that has
/// no record of its own.
pub const BUS_WIDE: u16 = 0;

///
/// Timing parameters used when addressing one device on one bus.  `t` is
/// the timing class carried in every request item; `datr` and `datw` are the
/// data-ack timings for reads and writes; `ed` requests an extra (PEC) byte
/// at the end of a transfer.
///
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusParams {
    pub addr: u8,
    pub t: u8,
    pub datr: u8,
    pub datw: u8,
    pub ed: bool,
}

impl BusParams {
    pub const DEFAULT_T: u8 = 1;
    pub const DEFAULT_DATR: u8 = 3;
    pub const DEFAULT_DATW: u8 = 3;

    /// The parameters used for a device with no record of its own.
    pub const fn default_for(addr: u8) -> Self {
        Self {
            addr,
            t: Self::DEFAULT_T,
            datr: Self::DEFAULT_DATR,
            datw: Self::DEFAULT_DATW,
            ed: false,
        }
    }

    /// Builds a record from raw configuration values, rejecting any that do
    /// not fit their register fields.
    pub fn new(
        addr: u16,
        t: u32,
        datr: u32,
        datw: u32,
        ed: u32,
    ) -> Result<Self, ResponseCode> {
        let field = |v: u32, max: u32| {
            if v <= max {
                Ok(v as u8)
            } else {
                Err(ResponseCode::BadConfig)
            }
        };

        Ok(Self {
            addr: field(addr.into(), 0x7f)?,
            t: field(t, 3)?,
            datr: field(datr, 3)?,
            datw: field(datw, 3)?,
            ed: field(ed, 1)? != 0,
        })
    }
}

///
/// The parameter records of one logical bus.  Lookups fall back to the
/// bus-wide record and then to [`BusParams::default_for`]; updates replace
/// an existing record for the same address in place.  The store itself is
/// unsynchronized: it lives inside the owning master's lock, so a transfer
/// never observes a half-applied update.
///
#[derive(Clone, Debug, Default)]
pub struct ParamStore {
    records: Vec<BusParams, MAX_PARAM_RECORDS>,
}

impl ParamStore {
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Returns the record for `addr`, else the bus-wide record (address 0),
    /// else the compiled defaults.
    pub fn lookup(&self, addr: u16) -> BusParams {
        let find =
            |a: u16| self.records.iter().find(|p| u16::from(p.addr) == a);

        find(addr)
            .or_else(|| find(BUS_WIDE))
            .copied()
            .unwrap_or(BusParams::default_for(addr as u8))
    }

    pub fn update(&mut self, params: BusParams) -> Result<(), ResponseCode> {
        match self.records.iter_mut().find(|p| p.addr == params.addr) {
            Some(p) => {
                *p = params;
                Ok(())
            }
            None => self
                .records
                .push(params)
                .map_err(|_| ResponseCode::NoSpace),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BusParams> + '_ {
        self.records.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
