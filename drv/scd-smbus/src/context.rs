// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One SCD device: its register window, its masters, and the configuration
//! surface through which masters are created and buses tuned.

use core::fmt::Write;

use crate::config::{self, NewObject, Tweak};
use crate::master::{Bus, Master, BUS_NAME_LEN, MAX_BUSES};
use crate::params::{BusParams, ParamStore};
use crate::{xfer, Clock, RegisterPort, Trace, TRACE};
use drv_scd_smbus_api::{
    Functionality, Message, ResponseCode, SmbusTransport,
};
use heapless::{String, Vec};
use ringbuf::ringbuf_entry;

/// Masters per device.
pub const MAX_MASTERS: usize = 16;

/// Tuning lines accepted in one write.
pub const MAX_TWEAK_LINES: usize = 64;

/// Room for a PCI-style device name such as `0000:02:00.0`.
pub const DEVICE_NAME_LEN: usize = 32;

/// What a client of a logical bus holds on to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusHandle {
    pub master: u32,
    pub bus: u8,
    pub adapter: u16,
}

///
/// The driver's view of one SCD.  Masters live in a fixed-capacity table
/// keyed by id; their buses get adapter numbers handed out sequentially
/// from `first_adapter` as they are registered.
///
pub struct ScdContext<P: RegisterPort, C: Clock> {
    name: String<DEVICE_NAME_LEN>,
    port: P,
    clock: C,
    res_size: u32,
    masters: Vec<Master, MAX_MASTERS>,
    next_adapter: u16,
    initialized: bool,
}

impl<P: RegisterPort, C: Clock> ScdContext<P, C> {
    pub fn new(
        name: &str,
        port: P,
        clock: C,
        res_size: u32,
        first_adapter: u16,
    ) -> Self {
        let mut n = String::new();
        for c in name.chars() {
            if n.push(c).is_err() {
                break;
            }
        }

        Self {
            name: n,
            port,
            clock,
            res_size,
            masters: Vec::new(),
            next_adapter: first_adapter,
            initialized: false,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn masters(&self) -> &[Master] {
        &self.masters
    }

    pub fn master(&self, id: u32) -> Option<&Master> {
        self.masters.iter().find(|m| m.id() == id)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Marks the device fully configured; object creation is closed from
    /// here on.
    pub fn finish_init(&mut self) {
        self.initialized = true;
    }

    ///
    /// Creates a master at register offset `addr` with `bus_count` buses,
    /// resets it, and registers its buses.
    ///
    pub fn add_smbus_master(
        &mut self,
        addr: u32,
        id: u32,
        bus_count: u32,
    ) -> Result<(), ResponseCode> {
        if addr > self.res_size
            || bus_count == 0
            || bus_count as usize > MAX_BUSES
        {
            return Err(ResponseCode::BadConfig);
        }

        if self.master(id).is_some() {
            return Err(ResponseCode::MasterExists);
        }

        if self.masters.is_full() {
            return Err(ResponseCode::NoSpace);
        }

        let mut buses = Vec::new();
        let mut adapter = self.next_adapter;
        for b in 0..bus_count as u8 {
            let mut name = String::new();
            write!(name, "SCD {} SMBus master {} bus {}", self.name, id, b)
                .map_err(|_| ResponseCode::BadConfig)?;
            buses
                .push(Bus {
                    id: b,
                    adapter,
                    name,
                    params: ParamStore::new(),
                })
                .map_err(|_| ResponseCode::NoSpace)?;
            adapter = adapter.checked_add(1).ok_or(ResponseCode::NoSpace)?;
        }

        let master = Master::new(id, addr, buses);
        master.init(&self.port, &self.clock);

        self.masters
            .push(master)
            .map_err(|_| ResponseCode::NoSpace)?;
        self.next_adapter = adapter;
        Ok(())
    }

    ///
    /// Handles a write of object creation lines.  Every line is parsed
    /// before any object is created; creation then proceeds in order and
    /// stops at the first failure.
    ///
    pub fn new_object(&mut self, text: &str) -> Result<(), ResponseCode> {
        if self.initialized {
            return Err(ResponseCode::Busy);
        }

        for line in config::lines(text) {
            config::parse_new_object(line)?;
        }

        for line in config::lines(text) {
            match config::parse_new_object(line)? {
                NewObject::SmbusMaster {
                    addr,
                    id,
                    bus_count,
                } => self.add_smbus_master(addr, id, bus_count)?,
            }
        }

        Ok(())
    }

    fn find_adapter(&self, adapter: u16) -> Option<(&Master, u8)> {
        self.masters.iter().find_map(|m| {
            m.with_buses(|buses| {
                buses.iter().find(|b| b.adapter == adapter).map(|b| b.id)
            })
            .map(|bus| (m, bus))
        })
    }

    /// Sets the parameters for one device on the bus registered as
    /// `adapter`.  The update happens under the owning master's lock.
    pub fn set_smbus_params(
        &self,
        adapter: u16,
        params: BusParams,
    ) -> Result<(), ResponseCode> {
        let (master, bus) =
            self.find_adapter(adapter).ok_or(ResponseCode::BadBus)?;

        ringbuf_entry!(
            TRACE,
            Trace::Tweak {
                adapter,
                addr: params.addr
            }
        );

        master
            .with_bus(bus, |b| b.params.update(params))
            .ok_or(ResponseCode::BadBus)?
    }

    ///
    /// Handles a write of tuning lines.  Every line is parsed, and its
    /// adapter checked, before any parameters change.
    ///
    pub fn smbus_tweaks(&self, text: &str) -> Result<(), ResponseCode> {
        let mut tweaks: Vec<Tweak, MAX_TWEAK_LINES> = Vec::new();

        for line in config::lines(text) {
            let tweak = config::parse_tweak(line)?;
            if self.find_adapter(tweak.adapter).is_none() {
                return Err(ResponseCode::BadBus);
            }
            tweaks.push(tweak).map_err(|_| ResponseCode::NoSpace)?;
        }

        for tweak in &tweaks {
            self.set_smbus_params(tweak.adapter, tweak.params)?;
        }

        Ok(())
    }

    ///
    /// Writes one line per parameter record:
    /// `<master>/<bus>/<addr>: adap=<nr> t=<t> datr=<datr> datw=<datw> ed=<ed>`
    ///
    pub fn dump_smbus_tweaks(
        &self,
        out: &mut impl Write,
    ) -> core::fmt::Result {
        for master in self.masters.iter() {
            master.with_buses(|buses| {
                for bus in buses {
                    for p in bus.params.iter() {
                        writeln!(
                            out,
                            "{}/{}/{:02x}: adap={} t={} datr={} datw={} ed={}",
                            master.id(),
                            bus.id,
                            p.addr,
                            bus.adapter,
                            p.t,
                            p.datr,
                            p.datw,
                            u8::from(p.ed),
                        )?;
                    }
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Name under which the bus registered as `adapter` is known.
    pub fn bus_name(&self, adapter: u16) -> Option<String<BUS_NAME_LEN>> {
        let (master, bus) = self.find_adapter(adapter)?;
        master.with_bus(bus, |b| b.name.clone())
    }

    ///
    /// Tears down every master: first its buses are unregistered, so no new
    /// transfer can find them; then the engine is reset (waiting out any
    /// transfer still in flight, since that needs the master lock); then
    /// the master is freed.
    ///
    pub fn remove_all(&mut self) {
        for master in self.masters.iter() {
            master.unregister_buses();
        }

        for master in self.masters.iter() {
            let mut session = master.lock(&self.port, &self.clock);
            // A master that cannot be reset is freed all the same.
            let _ = session.reset();
        }

        self.masters.clear();
    }
}

impl<P: RegisterPort, C: Clock> Drop for ScdContext<P, C> {
    fn drop(&mut self) {
        self.remove_all();
    }
}

impl<P: RegisterPort, C: Clock> SmbusTransport for ScdContext<P, C> {
    type Handle = BusHandle;

    fn open(&self, adapter: u16) -> Result<BusHandle, ResponseCode> {
        let (master, bus) =
            self.find_adapter(adapter).ok_or(ResponseCode::BadBus)?;
        Ok(BusHandle {
            master: master.id(),
            bus,
            adapter,
        })
    }

    fn transfer(
        &self,
        handle: BusHandle,
        msgs: &mut [Message<'_>],
    ) -> Result<(), ResponseCode> {
        let master = self.master(handle.master).ok_or(ResponseCode::BadBus)?;
        xfer::transfer(master, &self.port, &self.clock, handle.bus, msgs)
    }

    fn functionality(&self, _handle: BusHandle) -> Functionality {
        Functionality::I2C
            | Functionality::NOSTART
            | Functionality::SMBUS_QUICK
            | Functionality::SMBUS_BYTE
            | Functionality::SMBUS_BYTE_DATA
            | Functionality::SMBUS_WORD_DATA
            | Functionality::SMBUS_I2C_BLOCK
            | Functionality::SMBUS_BLOCK_DATA
    }
}
