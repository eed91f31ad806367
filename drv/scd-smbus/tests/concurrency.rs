// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Several threads driving one device.

use drv_scd_smbus::master::Bus;
use drv_scd_smbus::params::ParamStore;
use drv_scd_smbus::sim::{SimClock, SimController, SimDevice, SimEngine};
use drv_scd_smbus::xfer;
use drv_scd_smbus::{Master, Message, RegisterPort, ScdContext, SmbusTransport};
use drv_scd_smbus_api::SMBUS_BLOCK_MAX;
use std::sync::atomic::{AtomicUsize, Ordering};

const ROUNDS: usize = 200;

fn context<'a>(
    sim: &'a SimController,
    objects: &str,
) -> ScdContext<&'a SimController, SimClock> {
    let mut ctx =
        ScdContext::new("0000:04:00.0", sim, SimClock::new(), 0x10000, 0);
    ctx.new_object(objects).unwrap();
    ctx
}

fn hammer(
    ctx: &ScdContext<&SimController, SimClock>,
    adapter: u16,
    seed: u8,
) {
    let h = ctx.open(adapter).unwrap();

    for i in 0..ROUNDS {
        let pattern = [seed, i as u8, seed ^ i as u8];

        let mut out = pattern;
        ctx.transfer(h, &mut [Message::write(0x50, &mut out)]).unwrap();

        let mut back = [0u8; 3];
        ctx.transfer(h, &mut [Message::read(0x50, &mut back)]).unwrap();
        assert_eq!(back, pattern);
    }
}

#[test]
fn buses_of_one_master_never_interleave() {
    let sim = SimController::new();
    sim.add_engine(0x8000, SimEngine::new(2));
    sim.attach(0x8000, 0, 0x50, SimDevice::scratch());
    sim.attach(0x8000, 1, 0x50, SimDevice::scratch());

    let ctx = context(&sim, "smbus_master 0x8000 0 2");

    std::thread::scope(|s| {
        s.spawn(|| hammer(&ctx, 0, 0xa5));
        s.spawn(|| hammer(&ctx, 1, 0x5a));
    });

    assert!(!sim.interleaved(0x8000));

    let stats = ctx.master(0).unwrap().stats();
    assert_eq!(stats.sessions as usize, 4 * ROUNDS);
    assert_eq!(stats.bad_responses, 0);
    assert_eq!(stats.recoveries, 0);
}

#[test]
fn masters_run_independently() {
    let sim = SimController::new();
    for base in [0x8000, 0x8100] {
        sim.add_engine(base, SimEngine::new(2));
        sim.attach(base, 0, 0x50, SimDevice::scratch());
    }

    let ctx = context(
        &sim,
        "smbus_master 0x8000 0 1\nsmbus_master 0x8100 1 1\n",
    );

    std::thread::scope(|s| {
        s.spawn(|| hammer(&ctx, 0, 0x11));
        s.spawn(|| hammer(&ctx, 1, 0x22));
    });

    for (id, base) in [(0, 0x8000), (1, 0x8100)] {
        let stats = ctx.master(id).unwrap().stats();
        assert_eq!(stats.sessions as usize, 2 * ROUNDS);

        let dev = sim.device(base, 0, 0x50).unwrap();
        assert_eq!(dev.written.len(), 3 * ROUNDS);
    }
}

#[test]
fn parameters_update_while_transfers_run() {
    let sim = SimController::new();
    sim.add_engine(0x8000, SimEngine::new(2));
    sim.attach(0x8000, 0, 0x50, SimDevice::scratch());

    let ctx = context(&sim, "smbus_master 0x8000 0 1");

    std::thread::scope(|s| {
        s.spawn(|| hammer(&ctx, 0, 0x33));
        s.spawn(|| {
            for t in 0..ROUNDS {
                let line = format!("0 0x50 {} 3 3 0", t % 4);
                ctx.smbus_tweaks(&line).unwrap();
            }
        });
    });

    // Every session was encoded against one consistent set of parameters.
    let reqs = sim.requests(0x8000);
    let mut k = 0;
    while k < reqs.len() {
        let n = reqs[k].ss() as usize;
        assert!(n > 0);
        assert!(reqs[k..k + n].iter().all(|r| r.t() == reqs[k].t()));
        k += n;
    }
}

/// Passes register traffic through to the simulator, noting any access
/// made while the master is unlocked.
struct LockWatch<'a> {
    sim: &'a SimController,
    master: &'a Master,
    accesses: AtomicUsize,
    unlocked: AtomicUsize,
}

impl<'a> LockWatch<'a> {
    fn new(sim: &'a SimController, master: &'a Master) -> Self {
        Self {
            sim,
            master,
            accesses: AtomicUsize::new(0),
            unlocked: AtomicUsize::new(0),
        }
    }

    fn note(&self) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        if !self.master.is_locked() {
            self.unlocked.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl RegisterPort for LockWatch<'_> {
    fn read32(&self, addr: u32) -> u32 {
        self.note();
        self.sim.read32(addr)
    }

    fn write32(&self, addr: u32, val: u32) {
        self.note();
        self.sim.write32(addr, val)
    }
}

#[test]
fn lock_is_held_for_every_register_access() {
    let sim = SimController::new();
    // Version 1 engines read blocks by continuation.
    sim.add_engine(0x8000, SimEngine::new(1));
    sim.attach(0x8000, 0, 0x50, SimDevice::scratch());
    sim.attach(0x8000, 0, 0x0b, SimDevice::fixed(&[5, 1, 2, 3, 4, 5]));

    let mut buses = heapless::Vec::new();
    buses
        .push(Bus {
            id: 0,
            adapter: 0,
            name: heapless::String::new(),
            params: ParamStore::new(),
        })
        .unwrap();
    let master = Master::new(0, 0x8000, buses);
    let clock = SimClock::new();
    let port = LockWatch::new(&sim, &master);

    master.init(&port, &clock);

    let mut out = [1, 2, 3];
    let mut msgs = [Message::write(0x50, &mut out)];
    xfer::transfer(&master, &port, &clock, 0, &mut msgs).unwrap();

    let mut cmd = [0x9a];
    let mut buf = [0u8; 1 + SMBUS_BLOCK_MAX];
    let mut msgs = [
        Message::write(0x0b, &mut cmd),
        Message::block_read(0x0b, &mut buf),
    ];
    xfer::transfer(&master, &port, &clock, 0, &mut msgs).unwrap();
    assert_eq!(msgs[1].data(), &[5, 1, 2, 3, 4, 5]);

    // Write (4 items), block read (4), its continuation (5).
    let reqs = sim.requests(0x8000);
    assert_eq!(reqs.len(), 4 + 4 + 5);
    assert_eq!(reqs[8].ss(), 5);

    assert!(port.accesses.load(Ordering::Relaxed) > reqs.len());
    assert_eq!(port.unlocked.load(Ordering::Relaxed), 0);
    assert!(!master.is_locked());
}
