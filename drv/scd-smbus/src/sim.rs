// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A software model of the SCD SMBus engine, for running the driver on a
//! host.
//!
//! [`SimController`] answers register accesses for any number of engines,
//! each at its own base offset, and each with devices attached to its
//! buses.  An engine only makes progress when its control/status register
//! is read, so a test sees exactly the polling behavior the driver would
//! see on hardware.  [`SimClock`] is a virtual clock: sleeping advances
//! time instantly and is recorded.
//!
//! The model is deliberately small.  It knows enough about sessions to
//! number responses, to recognize a session's end, to run version-2 block
//! reads by itself, and to misbehave on request: NACKs, injected response
//! errors, stuck resets, hangs and full FIFOs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::regs::{
    fifo_capacity, ControlStatus, Request, Response, CONTROL_STATUS_OFFSET,
    REQUEST_OFFSET, RESPONSE_OFFSET,
};
use crate::{Clock, RegisterPort};

/// What a read of an unmapped offset returns.
const ABSENT: u32 = 0xffff_ffff;

/// A virtual monotonic clock.
#[derive(Debug, Default)]
pub struct SimClock {
    now: AtomicU64,
    sleeps: Mutex<Vec<u64>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sleep so far, in microseconds.
    pub fn sleeps(&self) -> Vec<u64> {
        self.sleeps.lock().clone()
    }

    pub fn clear(&self) {
        self.sleeps.lock().clear();
    }

    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_us(&self, us: u64) {
        self.sleeps.lock().push(us);
        self.advance(us);
    }
}

#[derive(Clone, Debug)]
enum DeviceKind {
    /// Remembers the last write; reads play it back.
    Scratch(Vec<u8>),
    /// The first byte written selects a register; reads and further
    /// writes go through an auto-incrementing pointer.
    Registers {
        regs: [u8; 256],
        pointer: u8,
        fresh: bool,
    },
    /// Reads always play back the same stream from the start.
    Fixed(Vec<u8>),
}

/// A device on a simulated bus.
#[derive(Clone, Debug)]
pub struct SimDevice {
    kind: DeviceKind,
    cursor: usize,
    /// Every byte ever written to the device.
    pub written: Vec<u8>,
}

impl SimDevice {
    fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            cursor: 0,
            written: Vec::new(),
        }
    }

    pub fn scratch() -> Self {
        Self::new(DeviceKind::Scratch(Vec::new()))
    }

    pub fn registers(image: &[u8]) -> Self {
        let mut regs = [0u8; 256];
        for (r, b) in regs.iter_mut().zip(image) {
            *r = *b;
        }
        Self::new(DeviceKind::Registers {
            regs,
            pointer: 0,
            fresh: false,
        })
    }

    /// A device whose reads return `stream`; a block device announcing
    /// five bytes would be `fixed(&[5, 1, 2, 3, 4, 5])`.
    pub fn fixed(stream: &[u8]) -> Self {
        Self::new(DeviceKind::Fixed(stream.to_vec()))
    }

    fn address(&mut self, read: bool) {
        self.cursor = 0;
        match &mut self.kind {
            DeviceKind::Scratch(data) if !read => data.clear(),
            DeviceKind::Registers { fresh, .. } if !read => *fresh = true,
            _ => (),
        }
    }

    fn write(&mut self, b: u8) {
        self.written.push(b);
        match &mut self.kind {
            DeviceKind::Scratch(data) => data.push(b),
            DeviceKind::Registers {
                regs,
                pointer,
                fresh,
            } => {
                if *fresh {
                    *pointer = b;
                    *fresh = false;
                } else {
                    regs[usize::from(*pointer)] = b;
                    *pointer = pointer.wrapping_add(1);
                }
            }
            DeviceKind::Fixed(_) => (),
        }
    }

    fn read(&mut self) -> u8 {
        match &mut self.kind {
            DeviceKind::Scratch(data) | DeviceKind::Fixed(data) => {
                let b = data.get(self.cursor).copied().unwrap_or(0xff);
                self.cursor += 1;
                b
            }
            DeviceKind::Registers { regs, pointer, .. } => {
                let b = regs[usize::from(*pointer)];
                *pointer = pointer.wrapping_add(1);
                b
            }
        }
    }
}

/// An error to plant in one response.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SimFault {
    AckError,
    BusTimeout,
    BusConflict,
    Flushed,
    FifoOverflow,
    FrameEnd,
    /// The response carries the wrong transfer index.
    WrongIndex,
}

/// Static properties of a simulated engine.
#[derive(Copy, Clone, Debug)]
pub struct SimEngine {
    pub version: u8,
    pub fsz: u8,
    pub speed: u8,
    /// Items the engine gets through between two status reads; `None`
    /// runs the whole queue at once.
    pub items_per_poll: Option<usize>,
}

impl SimEngine {
    pub fn new(version: u8) -> Self {
        Self {
            version,
            fsz: 1,
            speed: 0,
            items_per_poll: None,
        }
    }
}

#[derive(Debug)]
struct OpenSession {
    declared: u8,
    processed: usize,
    emitted: usize,
}

#[derive(Debug)]
struct EngineState {
    base: u32,
    cfg: SimEngine,
    rst: bool,
    foe: bool,
    fe: bool,
    brb: bool,
    pending: VecDeque<Request>,
    responses: VecDeque<Response>,
    session: Option<OpenSession>,
    target: Option<(u8, u8)>,
    nacked: bool,
    devices: HashMap<(u8, u8), SimDevice>,
    faults: Vec<(usize, SimFault)>,
    reset_stall: u32,
    stuck_reset: bool,
    hung: bool,
    full: bool,
    log: Vec<Request>,
    responses_read: usize,
    owner: Option<u8>,
    interleaved: bool,
}

impl EngineState {
    fn new(base: u32, cfg: SimEngine) -> Self {
        Self {
            base,
            cfg,
            rst: false,
            foe: false,
            fe: false,
            brb: false,
            pending: VecDeque::new(),
            responses: VecDeque::new(),
            session: None,
            target: None,
            nacked: false,
            devices: HashMap::new(),
            faults: Vec::new(),
            reset_stall: 0,
            stuck_reset: false,
            hung: false,
            full: false,
            log: Vec::new(),
            responses_read: 0,
            owner: None,
            interleaved: false,
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.responses.clear();
        self.session = None;
        self.target = None;
        self.nacked = false;
        self.fe = false;
        self.brb = false;
        self.hung = false;
        self.full = false;
        self.owner = None;
    }

    fn settle_owner(&mut self) {
        if self.session.is_none()
            && self.pending.is_empty()
            && self.responses.is_empty()
        {
            self.owner = None;
        }
    }

    fn respond(&mut self, mut rsp: Response) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let pos = session.emitted;
        session.emitted += 1;

        rsp.set_ti((pos & 0xf) as u8);
        if pos == 0 {
            rsp.set_ss(session.declared);
        }

        if let Some(i) = self.faults.iter().position(|(p, _)| *p == pos) {
            let (_, fault) = self.faults.remove(i);
            match fault {
                SimFault::AckError => rsp.set_ack_error(true),
                SimFault::BusTimeout => rsp.set_timeout_error(true),
                SimFault::BusConflict => rsp.set_bus_conflict_error(true),
                SimFault::Flushed => rsp.set_flushed(true),
                SimFault::FifoOverflow => rsp.set_foe(true),
                SimFault::FrameEnd => rsp.set_fe(true),
                SimFault::WrongIndex => {
                    rsp.set_ti(((pos + 1) & 0xf) as u8);
                }
            }
        }

        self.responses.push_back(rsp);
    }

    fn data(&mut self, d: u8) {
        let mut rsp = Response(0);
        rsp.set_d(d);
        self.respond(rsp);
    }

    fn device(&mut self) -> Option<&mut SimDevice> {
        let key = self.target?;
        self.devices.get_mut(&key)
    }

    fn read_byte(&mut self) -> u8 {
        self.device().map_or(0xff, |dev| dev.read())
    }

    fn process(&mut self, req: Request) {
        if self.session.is_none() {
            self.session = Some(OpenSession {
                declared: req.ss(),
                processed: 0,
                emitted: 0,
            });
            self.nacked = false;
        }

        if self.nacked {
            let mut rsp = Response(0);
            rsp.set_flushed(true);
            self.respond(rsp);
        } else if req.st() {
            let addr = req.d() >> 1;
            let read = req.d() & 1 != 0;
            match self.devices.get_mut(&(req.bs(), addr)) {
                Some(dev) => {
                    dev.address(read);
                    self.target = Some((req.bs(), addr));
                    self.data(req.d());
                }
                None => {
                    self.target = None;
                    self.nacked = true;
                    let mut rsp = Response(0);
                    rsp.set_ack_error(true);
                    self.respond(rsp);
                }
            }
        } else if req.dod() {
            match self.device() {
                Some(dev) => {
                    dev.write(req.d());
                    self.data(req.d());
                }
                None => {
                    let mut rsp = Response(0);
                    rsp.set_ack_error(true);
                    self.respond(rsp);
                }
            }
        } else {
            let b = self.read_byte();
            self.data(b);

            if req.br() && self.cfg.version >= 2 {
                for _ in 0..b {
                    let b = self.read_byte();
                    self.data(b);
                }
            }
        }

        // A PEC byte follows the last byte of the transfer.
        if !self.nacked
            && req.ed()
            && (req.sp() || (req.br() && self.cfg.version >= 2))
        {
            let b = if req.dod() { 0 } else { self.read_byte() };
            self.data(b);
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.processed += 1;

        let counted = session.declared != 0
            && (session.processed & 0x3f) == usize::from(session.declared)
            && self.pending.is_empty();

        if req.sp() || (req.br() && self.cfg.version >= 2) || counted {
            self.session = None;
            self.fe = true;
        }
    }

    fn tick(&mut self) {
        if self.rst || self.hung || self.full {
            return;
        }

        let mut left = self.cfg.items_per_poll.unwrap_or(usize::MAX);
        while left > 0 {
            let Some(req) = self.pending.pop_front() else {
                break;
            };
            self.process(req);
            left -= 1;
        }
    }

    fn read_cs(&mut self) -> ControlStatus {
        let stalled = self.rst && self.reset_stall > 0;
        if stalled {
            self.reset_stall -= 1;
        }

        self.tick();
        self.status(stalled)
    }

    fn status(&self, stalled: bool) -> ControlStatus {
        let mut cs = ControlStatus(0);
        let nrs = if self.full {
            fifo_capacity(self.cfg.fsz).unwrap_or(1023)
        } else {
            self.responses.len()
        };
        cs.set_nrs(nrs.min(1023) as u16);
        cs.set_fsz(self.cfg.fsz);
        cs.set_foe(self.foe);
        cs.set_sp(self.cfg.speed);
        cs.set_nrq(self.pending.len().min(1023) as u16);
        cs.set_brb(self.brb || stalled);
        cs.set_ver(self.cfg.version);
        cs.set_fe(self.fe && !self.full);
        cs.set_rst(self.rst);
        cs
    }

    fn write_cs(&mut self, cs: ControlStatus) {
        if cs.fe() {
            self.fe = false;
        }
        self.foe = cs.foe();

        if cs.rst() {
            self.rst = true;
            self.flush();
        } else if !self.stuck_reset {
            self.rst = false;
        }
    }

    fn write_request(&mut self, req: Request) {
        self.log.push(req);
        match self.owner {
            Some(bus) if bus != req.bs() => self.interleaved = true,
            Some(_) => (),
            None => self.owner = Some(req.bs()),
        }
        if !self.rst {
            self.pending.push_back(req);
        }
    }

    fn read_response(&mut self) -> Response {
        let rsp = match self.responses.pop_front() {
            Some(rsp) => {
                self.responses_read += 1;
                rsp
            }
            None => {
                let mut rsp = Response(0);
                rsp.set_fe(true);
                rsp
            }
        };
        self.settle_owner();
        rsp
    }
}

///
/// Register port backed by simulated engines.  Reads of offsets that belong
/// to no engine return all ones; writes to them are dropped.
///
#[derive(Default)]
pub struct SimController {
    engines: Mutex<Vec<EngineState>>,
}

impl SimController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_engine(&self, base: u32, cfg: SimEngine) {
        self.engines.lock().push(EngineState::new(base, cfg));
    }

    fn with<R>(
        &self,
        base: u32,
        f: impl FnOnce(&mut EngineState) -> R,
    ) -> Option<R> {
        self.engines.lock().iter_mut().find(|e| e.base == base).map(f)
    }

    pub fn attach(&self, base: u32, bus: u8, addr: u8, dev: SimDevice) {
        self.with(base, |e| e.devices.insert((bus, addr), dev));
    }

    /// A copy of a device, to look at what was written to it.
    pub fn device(&self, base: u32, bus: u8, addr: u8) -> Option<SimDevice> {
        self.with(base, |e| e.devices.get(&(bus, addr)).cloned())
            .flatten()
    }

    /// Plants `fault` in the response at position `pos` of the next session
    /// that gets that far.
    pub fn inject(&self, base: u32, pos: usize, fault: SimFault) {
        self.with(base, |e| e.faults.push((pos, fault)));
    }

    /// Leaves the engine with a backlog, as an interrupted session would.
    pub fn make_dirty(&self, base: u32) {
        self.with(base, |e| e.brb = true);
    }

    /// The next `polls` status reads with reset asserted still report a
    /// backlog.
    pub fn stall_reset(&self, base: u32, polls: u32) {
        self.with(base, |e| e.reset_stall = polls);
    }

    /// Reset no longer releases.
    pub fn stick_reset(&self, base: u32) {
        self.with(base, |e| e.stuck_reset = true);
    }

    /// The engine stops processing requests until it is next reset.
    pub fn hang(&self, base: u32) {
        self.with(base, |e| e.hung = true);
    }

    /// The response FIFO reports full, without frame-empty, until the
    /// engine is next reset.
    pub fn fill_responses(&self, base: u32) {
        self.with(base, |e| e.full = true);
    }

    /// The control/status register as it stands, without letting the
    /// engine make progress.
    pub fn control_status(&self, base: u32) -> ControlStatus {
        self.with(base, |e| e.status(false))
            .unwrap_or(ControlStatus(ABSENT))
    }

    /// Every request item written so far.
    pub fn requests(&self, base: u32) -> Vec<Request> {
        self.with(base, |e| e.log.clone()).unwrap_or_default()
    }

    pub fn clear_requests(&self, base: u32) {
        self.with(base, |e| e.log.clear());
    }

    /// Responses popped by the driver so far.
    pub fn responses_read(&self, base: u32) -> usize {
        self.with(base, |e| e.responses_read).unwrap_or(0)
    }

    /// True if requests for two different buses were ever queued within
    /// one session.
    pub fn interleaved(&self, base: u32) -> bool {
        self.with(base, |e| e.interleaved).unwrap_or(false)
    }

    fn decode(&self, addr: u32) -> Option<(u32, u32)> {
        self.engines.lock().iter().find_map(|e| {
            let offset = addr.checked_sub(e.base)?;
            matches!(
                offset,
                REQUEST_OFFSET | CONTROL_STATUS_OFFSET | RESPONSE_OFFSET
            )
            .then_some((e.base, offset))
        })
    }
}

impl RegisterPort for SimController {
    fn read32(&self, addr: u32) -> u32 {
        let Some((base, offset)) = self.decode(addr) else {
            return ABSENT;
        };

        self.with(base, |e| match offset {
            CONTROL_STATUS_OFFSET => e.read_cs().0,
            RESPONSE_OFFSET => e.read_response().0,
            _ => ABSENT,
        })
        .unwrap_or(ABSENT)
    }

    fn write32(&self, addr: u32, val: u32) {
        let Some((base, offset)) = self.decode(addr) else {
            return;
        };

        self.with(base, |e| match offset {
            CONTROL_STATUS_OFFSET => e.write_cs(ControlStatus(val)),
            REQUEST_OFFSET => e.write_request(Request(val)),
            _ => (),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_records_sleeps() {
        let clock = SimClock::new();
        clock.sleep_us(10);
        clock.sleep_ms(2);
        assert_eq!(clock.now_us(), 2010);
        assert_eq!(clock.sleeps(), vec![10, 2000]);
    }

    #[test]
    fn unmapped_offsets_read_as_ones() {
        let sim = SimController::new();
        sim.add_engine(0x100, SimEngine::new(2));
        assert_eq!(sim.read32(0x0), ABSENT);
        assert_eq!(sim.read32(0x100), ABSENT);
        assert_ne!(sim.read32(0x120), ABSENT);
    }

    #[test]
    fn register_device_uses_a_pointer() {
        let mut dev = SimDevice::registers(&[0, 0x11, 0x22, 0x33]);
        dev.address(false);
        dev.write(2);
        dev.address(true);
        assert_eq!(dev.read(), 0x22);
        assert_eq!(dev.read(), 0x33);
    }

    #[test]
    fn missing_device_is_nacked() {
        let sim = SimController::new();
        sim.add_engine(0, SimEngine::new(2));

        let mut req = Request(0);
        req.set_st(true);
        req.set_dod(true);
        req.set_sp(true);
        req.set_ss(1);
        req.set_d(0x42 << 1);
        sim.write32(REQUEST_OFFSET, req.0);

        let cs = ControlStatus(sim.read32(CONTROL_STATUS_OFFSET));
        assert!(cs.fe());
        assert_eq!(cs.nrs(), 1);
        assert_eq!(sim.read32(RESPONSE_OFFSET), 0x0001_0400);
    }
}
