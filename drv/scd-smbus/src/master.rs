// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Master control: one SMBus engine and the logical buses behind it.
//!
//! All register traffic for an engine happens inside a [`Session`], which is
//! only obtainable by taking the master's lock.  The lock covers the whole
//! of a transfer (enter, encode, wait, decode, leave) as well as every read
//! or update of the buses' parameter stores.

use crate::params::ParamStore;
use crate::regs::{
    ControlStatus, Request, Response, CONTROL_STATUS_OFFSET, REQUEST_OFFSET,
    RESPONSE_OFFSET,
};
use crate::{Clock, RegisterPort, Trace, TRACE};
use drv_scd_smbus_api::ResponseCode;
use heapless::{String, Vec};
use ringbuf::ringbuf_entry;
use spin::mutex::{Mutex, MutexGuard};

/// The bus selector is four bits wide.
pub const MAX_BUSES: usize = 16;

/// Room for `SCD <device> SMBus master <m> bus <b>`.
pub const BUS_NAME_LEN: usize = 64;

/// Backoff between polls while waiting for a reset to take, in ms.
const RESET_BACKOFF_MS: [u64; 4] = [1, 2, 4, 8];

/// Settling time around the reset pulse issued when a master is created.
const INIT_RESET_SETTLE_MS: u64 = 50;

/// A session may go this long without the request count moving.
pub const PROGRESS_TIMEOUT_US: u64 = 100_000;

/// How a thread waiting for a master passes the time.  Hosted builds give
/// the CPU back between attempts.
#[cfg(feature = "std")]
type Relax = spin::relax::Yield;
#[cfg(not(feature = "std"))]
type Relax = spin::relax::Spin;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MasterState {
    Idle,
    Entering,
    Ready,
    /// Entering failed; the next session starts with a full recovery.
    Faulted,
}

/// Counters kept per master, readable at any time.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MasterStats {
    /// Sessions that made it past `enter`.
    pub sessions: u32,
    /// Sessions aborted by a NACK of their first address.
    pub addr_nacks: u32,
    /// Responses that failed validation for any other reason.
    pub bad_responses: u32,
    /// Times `enter` had to reset a dirty engine.
    pub recoveries: u32,
    /// Responses popped and discarded by `leave`.
    pub drained: u32,
    pub timeouts: u32,
}

/// One channel behind a master.
#[derive(Clone, Debug)]
pub struct Bus {
    pub id: u8,
    pub adapter: u16,
    pub name: String<BUS_NAME_LEN>,
    pub params: ParamStore,
}

struct Inner {
    state: MasterState,
    version: u8,
    stats: MasterStats,
    buses: Vec<Bus, MAX_BUSES>,
}

///
/// One SMBus engine.  The lock is held for the whole of a session,
/// including every clock sleep inside it: the reset settle in `init`, the
/// backoff in `enter` and the polling in `wait`.  A thread that wants the
/// master meanwhile keeps retrying the lock; with the `std` feature it
/// yields to the scheduler between attempts, otherwise it spins.
///
pub struct Master {
    id: u32,
    base: u32,
    inner: Mutex<Inner, Relax>,
}

impl Master {
    pub fn new(id: u32, base: u32, buses: Vec<Bus, MAX_BUSES>) -> Self {
        Self {
            id,
            base,
            inner: Mutex::new(Inner {
                state: MasterState::Idle,
                version: 0,
                stats: MasterStats::default(),
                buses,
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Protocol version, as read when the master was initialized.
    pub fn version(&self) -> u8 {
        self.inner.lock().version
    }

    pub fn state(&self) -> MasterState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> MasterStats {
        self.inner.lock().stats
    }

    /// Whether some session currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn bus_count(&self) -> usize {
        self.inner.lock().buses.len()
    }

    /// Runs `f` against one bus with the master lock held.
    pub fn with_bus<R>(
        &self,
        bus: u8,
        f: impl FnOnce(&mut Bus) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.buses.iter_mut().find(|b| b.id == bus).map(f)
    }

    /// Runs `f` against every bus with the master lock held.
    pub fn with_buses<R>(&self, f: impl FnOnce(&[Bus]) -> R) -> R {
        f(&self.inner.lock().buses)
    }

    /// Drops every bus, so that none can be looked up by adapter.
    pub(crate) fn unregister_buses(&self) {
        self.inner.lock().buses.clear();
    }

    pub fn lock<'a, P: RegisterPort, C: Clock>(
        &'a self,
        port: &'a P,
        clock: &'a C,
    ) -> Session<'a, P, C> {
        Session {
            master: self,
            inner: self.inner.lock(),
            port,
            clock,
        }
    }

    ///
    /// Brings a freshly created master into a known state: pulses reset
    /// with force-one-error set, then records the protocol version.  A
    /// failure here is not fatal; it leaves the master Faulted so that the
    /// first transfer starts with a full recovery.
    ///
    pub fn init<P: RegisterPort, C: Clock>(&self, port: &P, clock: &C) {
        let mut session = self.lock(port, clock);

        let mut cs = session.read_cs();
        cs.set_rst(true);
        cs.set_foe(true);
        session.write_cs(cs);
        clock.sleep_ms(INIT_RESET_SETTLE_MS);

        cs.set_rst(false);
        session.write_cs(cs);
        clock.sleep_ms(INIT_RESET_SETTLE_MS);

        let cs = session.read_cs();
        session.inner.version = cs.ver();
        ringbuf_entry!(
            TRACE,
            Trace::Version {
                master: self.id,
                version: cs.ver()
            }
        );

        session.inner.state = if cs.rst() {
            ringbuf_entry!(
                TRACE,
                Trace::ResetStuck {
                    master: self.id,
                    cs: cs.0
                }
            );
            MasterState::Faulted
        } else {
            MasterState::Idle
        };
    }
}

///
/// Exclusive access to one master's registers.  Holding a `Session` means
/// holding the master lock; dropping it releases the lock.
///
pub struct Session<'a, P: RegisterPort, C: Clock> {
    master: &'a Master,
    inner: MutexGuard<'a, Inner>,
    port: &'a P,
    clock: &'a C,
}

impl<'a, P: RegisterPort, C: Clock> Session<'a, P, C> {
    pub fn master(&self) -> &Master {
        self.master
    }

    pub fn clock(&self) -> &C {
        self.clock
    }

    pub fn state(&self) -> MasterState {
        self.inner.state
    }

    pub(crate) fn stats_mut(&mut self) -> &mut MasterStats {
        &mut self.inner.stats
    }

    /// A copy of one bus's parameter store, taken under the lock.
    pub fn params(&self, bus: u8) -> Option<ParamStore> {
        self.inner
            .buses
            .iter()
            .find(|b| b.id == bus)
            .map(|b| b.params.clone())
    }

    pub fn read_cs(&self) -> ControlStatus {
        let addr = self.master.base + CONTROL_STATUS_OFFSET;
        let cs = ControlStatus(self.port.read32(addr));
        ringbuf_entry!(TRACE, Trace::CsRead(addr, cs.0));
        cs
    }

    pub fn write_cs(&self, cs: ControlStatus) {
        let addr = self.master.base + CONTROL_STATUS_OFFSET;
        ringbuf_entry!(TRACE, Trace::CsWrite(addr, cs.0));
        self.port.write32(addr, cs.0);
    }

    pub fn write_request(&self, req: Request) {
        let addr = self.master.base + REQUEST_OFFSET;
        ringbuf_entry!(TRACE, Trace::Request(addr, req.0));
        self.port.write32(addr, req.0);
    }

    /// Pops one response.  The read is destructive.
    pub fn read_response(&self) -> Response {
        let addr = self.master.base + RESPONSE_OFFSET;
        let rsp = Response(self.port.read32(addr));
        ringbuf_entry!(TRACE, Trace::Response(addr, rsp.0));
        rsp
    }

    fn fault(&mut self, cs: ControlStatus) -> ResponseCode {
        ringbuf_entry!(
            TRACE,
            Trace::RecoveryFailed {
                master: self.master.id,
                cs: cs.0
            }
        );
        self.inner.state = MasterState::Faulted;
        ResponseCode::Io
    }

    /// Polls with backoff until the reset (already asserted) has flushed
    /// the engine.
    fn await_reset(&mut self) -> Result<ControlStatus, ResponseCode> {
        let mut cs = ControlStatus(0);
        for ms in RESET_BACKOFF_MS {
            cs = self.read_cs();
            if cs.rst() && !cs.is_dirty() {
                return Ok(cs);
            }
            self.clock.sleep_ms(ms);
        }
        Err(self.fault(cs))
    }

    ///
    /// Full reset: assert reset and force-one-error, wait for the FIFOs to
    /// flush, release reset and check that it released.
    ///
    pub fn reset(&mut self) -> Result<(), ResponseCode> {
        let mut cs = self.read_cs();
        cs.set_rst(true);
        cs.set_foe(true);
        self.write_cs(cs);

        let mut cs = self.await_reset()?;
        cs.set_rst(false);
        self.write_cs(cs);

        let cs = self.read_cs();
        if cs.rst() {
            return Err(self.fault(cs));
        }

        self.inner.state = MasterState::Idle;
        Ok(())
    }

    ///
    /// Prepares the engine for a session, recovering it first if a
    /// previous session left anything behind.  On success the returned
    /// status reflects the engine as the session starts: reset released,
    /// `foe` as requested, FIFOs empty.
    ///
    pub fn enter(&mut self, foe: bool) -> Result<ControlStatus, ResponseCode> {
        let faulted = self.inner.state == MasterState::Faulted;
        self.inner.state = MasterState::Entering;

        let mut cs = self.read_cs();
        if faulted || cs.is_dirty() {
            ringbuf_entry!(
                TRACE,
                Trace::Recovering {
                    master: self.master.id,
                    cs: cs.0
                }
            );
            self.inner.stats.recoveries =
                self.inner.stats.recoveries.wrapping_add(1);
            cs.set_rst(true);
            self.write_cs(cs);
            cs = self.await_reset()?;
        }

        if cs.rst() || cs.foe() != foe {
            cs.set_rst(false);
            cs.set_foe(foe);
            self.write_cs(cs);
            cs = self.read_cs();
            if cs.rst() {
                return Err(self.fault(cs));
            }
        }

        self.inner.state = MasterState::Ready;
        self.inner.stats.sessions = self.inner.stats.sessions.wrapping_add(1);
        Ok(cs)
    }

    ///
    /// Ends a session.  On success, responses nobody asked for (trailing
    /// PEC bytes, say) are discarded; whatever remains after that is
    /// cleaned up by asserting reset, which the next `enter` completes.
    ///
    pub fn leave(&mut self, had_error: bool) {
        let mut cs = self.read_cs();

        if !had_error && cs.nrs() > 0 {
            let count = cs.nrs();
            ringbuf_entry!(
                TRACE,
                Trace::Drain {
                    master: self.master.id,
                    count
                }
            );
            for _ in 0..count {
                self.read_response();
            }
            self.inner.stats.drained =
                self.inner.stats.drained.wrapping_add(u32::from(count));
            cs = self.read_cs();
        }

        if cs.is_dirty() {
            cs.set_rst(true);
            self.write_cs(cs);
        }

        if self.inner.state != MasterState::Faulted {
            self.inner.state = MasterState::Idle;
        }
    }

    ///
    /// Waits for the engine to finish the session it has been handed.  The
    /// poll interval tracks the work still queued; the timeout restarts
    /// whenever the queue moves.
    ///
    pub fn wait(&mut self, bus: u8, addr: u16) -> Result<(), ResponseCode> {
        let mut cs = self.read_cs();
        let mut nrq = cs.nrq();
        let mut progress = self.clock.now_us();

        while !cs.fe() {
            if let Some(capacity) = cs.capacity() {
                if usize::from(cs.nrs()) >= capacity {
                    ringbuf_entry!(
                        TRACE,
                        Trace::Overflow { bus, addr, cs: cs.0 }
                    );
                    return Err(ResponseCode::SessionOverflow);
                }
            }

            if self.clock.now_us().saturating_sub(progress)
                > PROGRESS_TIMEOUT_US
            {
                ringbuf_entry!(TRACE, Trace::Timeout { bus, addr, cs: cs.0 });
                self.inner.stats.timeouts =
                    self.inner.stats.timeouts.wrapping_add(1);
                return Err(ResponseCode::Timeout);
            }

            let us = (u64::from(nrq) + 1) * cs.per_byte_delay_us();
            ringbuf_entry!(
                TRACE,
                Trace::Delay {
                    master: self.master.id,
                    us: us as u32
                }
            );
            self.clock.sleep_us(us);

            cs = self.read_cs();
            if cs.nrq() != nrq {
                nrq = cs.nrq();
                progress = self.clock.now_us();
            }
        }

        // fe is write-one-to-clear.
        self.write_cs(cs);
        Ok(())
    }
}
