// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_scd_smbus::sim::{
    SimClock, SimController, SimDevice, SimEngine, SimFault,
};
use drv_scd_smbus::{
    BusHandle, MasterState, Message, MessageFlags, ResponseCode, ScdContext,
    SmbusDevice, SmbusTransport,
};

const BASE: u32 = 0x8000;

fn controller(cfg: SimEngine) -> SimController {
    let sim = SimController::new();
    sim.add_engine(BASE, cfg);
    sim
}

/// One master with four buses, registered as adapters 0 to 3.
fn context(sim: &SimController) -> ScdContext<&SimController, SimClock> {
    let mut ctx =
        ScdContext::new("0000:04:00.0", sim, SimClock::new(), 0x10000, 0);
    ctx.new_object("smbus_master 0x8000 0 4").unwrap();
    ctx
}

fn write(
    ctx: &ScdContext<&SimController, SimClock>,
    h: BusHandle,
    addr: u8,
    data: &[u8],
) -> Result<(), ResponseCode> {
    let mut buf = data.to_vec();
    ctx.transfer(h, &mut [Message::write(addr, &mut buf)])
}

fn read(
    ctx: &ScdContext<&SimController, SimClock>,
    h: BusHandle,
    addr: u8,
    len: usize,
) -> Result<Vec<u8>, ResponseCode> {
    let mut buf = vec![0u8; len];
    ctx.transfer(h, &mut [Message::read(addr, &mut buf)])?;
    Ok(buf)
}

#[test]
fn written_bytes_read_back() {
    let sim = controller(SimEngine::new(2));
    sim.attach(BASE, 1, 0x50, SimDevice::scratch());
    let ctx = context(&sim);
    let h = ctx.open(1).unwrap();

    write(&ctx, h, 0x50, &[0x11, 0x22, 0x33]).unwrap();
    assert_eq!(read(&ctx, h, 0x50, 3), Ok(vec![0x11, 0x22, 0x33]));

    let dev = sim.device(BASE, 1, 0x50).unwrap();
    assert_eq!(dev.written, vec![0x11, 0x22, 0x33]);

    let stats = ctx.master(0).unwrap().stats();
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.drained, 0);
    assert_eq!(ctx.master(0).unwrap().state(), MasterState::Idle);
}

#[test]
fn buses_are_separate() {
    let sim = controller(SimEngine::new(2));
    sim.attach(BASE, 1, 0x50, SimDevice::scratch());
    let ctx = context(&sim);

    let h = ctx.open(2).unwrap();
    assert_eq!(write(&ctx, h, 0x50, &[1]), Err(ResponseCode::Io));
}

#[test]
fn first_address_nack_is_expected() {
    let sim = controller(SimEngine::new(2));
    sim.attach(BASE, 0, 0x50, SimDevice::scratch());
    let ctx = context(&sim);
    let h = ctx.open(0).unwrap();

    assert_eq!(read(&ctx, h, 0x42, 1), Err(ResponseCode::Io));

    let stats = ctx.master(0).unwrap().stats();
    assert_eq!(stats.addr_nacks, 1);
    assert_eq!(stats.bad_responses, 0);

    // The engine is usable straight away.
    write(&ctx, h, 0x50, &[9]).unwrap();
    assert_eq!(read(&ctx, h, 0x50, 1), Ok(vec![9]));
}

#[test]
fn later_address_nack_is_a_bad_response() {
    let sim = controller(SimEngine::new(2));
    sim.attach(BASE, 0, 0x50, SimDevice::scratch());
    let ctx = context(&sim);
    let h = ctx.open(0).unwrap();

    let mut reg = [0u8];
    let mut val = [0u8; 2];
    assert_eq!(
        ctx.transfer(
            h,
            &mut [
                Message::write(0x50, &mut reg),
                Message::read(0x42, &mut val),
            ]
        ),
        Err(ResponseCode::Io)
    );

    let stats = ctx.master(0).unwrap().stats();
    assert_eq!(stats.addr_nacks, 0);
    assert_eq!(stats.bad_responses, 1);
}

fn block_read(
    ctx: &ScdContext<&SimController, SimClock>,
    h: BusHandle,
) -> Result<Vec<u8>, ResponseCode> {
    let mut cmd = [0x9a];
    let mut buf = [0u8; 1 + 32];
    let mut msgs = [
        Message::write(0x0b, &mut cmd),
        Message::block_read(0x0b, &mut buf),
    ];
    ctx.transfer(h, &mut msgs)?;
    Ok(msgs[1].data().to_vec())
}

#[test]
fn block_read_inline() {
    let sim = controller(SimEngine::new(2));
    sim.attach(BASE, 0, 0x0b, SimDevice::fixed(&[5, 1, 2, 3, 4, 5, 0xee]));
    let ctx = context(&sim);
    let h = ctx.open(0).unwrap();

    assert_eq!(block_read(&ctx, h), Ok(vec![5, 1, 2, 3, 4, 5]));

    // Command write (2), block read address and length (2), payload (5).
    assert_eq!(sim.responses_read(BASE), 9);
    assert_eq!(sim.requests(BASE).len(), 4);
    assert!(sim.requests(BASE)[3].br());
}

#[test]
fn block_read_by_continuation() {
    let sim = controller(SimEngine::new(1));
    sim.attach(BASE, 0, 0x0b, SimDevice::fixed(&[5, 1, 2, 3, 4, 5, 0xee]));
    let ctx = context(&sim);
    let h = ctx.open(0).unwrap();

    assert_eq!(block_read(&ctx, h), Ok(vec![5, 1, 2, 3, 4, 5]));
    assert_eq!(sim.responses_read(BASE), 9);

    let reqs = sim.requests(BASE);
    assert_eq!(reqs.len(), 4 + 5);
    assert!(!reqs[3].br());

    let cont = &reqs[4..];
    assert_eq!(cont[0].ss(), 5);
    for (k, r) in cont.iter().enumerate() {
        assert_eq!(r.ti() as usize, k);
        assert!(!r.st());
        assert_eq!(r.sp(), k == 4);
    }
}

#[test]
fn bad_block_lengths_are_protocol_errors() {
    for version in [1, 2] {
        for len in [0u8, 33] {
            let sim = controller(SimEngine::new(version));
            let mut stream = vec![len];
            stream.extend(0..40);
            sim.attach(BASE, 0, 0x0b, SimDevice::fixed(&stream));
            let ctx = context(&sim);
            let h = ctx.open(0).unwrap();

            assert_eq!(block_read(&ctx, h), Err(ResponseCode::Protocol));

            // Nothing past the length byte was consumed, and nothing was
            // issued after it.
            assert_eq!(sim.responses_read(BASE), 4);
            assert_eq!(sim.requests(BASE).len(), 4);

            // The leftovers are cleaned up on the way into the next call.
            sim.attach(BASE, 0, 0x50, SimDevice::scratch());
            write(&ctx, h, 0x50, &[7]).unwrap();
        }
    }
}

#[test]
fn oversized_session_never_reaches_the_engine() {
    let mut cfg = SimEngine::new(2);
    cfg.fsz = 0;
    let sim = controller(cfg);
    sim.attach(BASE, 0, 0x50, SimDevice::scratch());
    let ctx = context(&sim);
    let h = ctx.open(0).unwrap();

    assert_eq!(
        write(&ctx, h, 0x50, &[0u8; 127]),
        Err(ResponseCode::SessionOverflow)
    );
    assert!(sim.requests(BASE).is_empty());

    // 126 bytes and the address item fill the FIFO exactly.
    write(&ctx, h, 0x50, &[0u8; 126]).unwrap();
}

#[test]
fn unsupported_requests_are_rejected_up_front() {
    let sim = controller(SimEngine::new(2));
    let ctx = context(&sim);
    let h = ctx.open(0).unwrap();

    let mut a = [0u8; 1];
    assert_eq!(
        ctx.transfer(
            h,
            &mut [
                Message::write(0x50, &mut a).with_flags(MessageFlags::TEN_BIT)
            ]
        ),
        Err(ResponseCode::OperationNotSupported)
    );

    let mut b = [0u8; 33];
    let mut c = [0u8; 1];
    assert_eq!(
        ctx.transfer(
            h,
            &mut [
                Message::block_read(0x0b, &mut b),
                Message::read(0x0b, &mut c),
            ]
        ),
        Err(ResponseCode::OperationNotSupported)
    );

    assert!(sim.requests(BASE).is_empty());
    assert_eq!(ctx.master(0).unwrap().stats().sessions, 0);
}

#[test]
fn response_faults_map_to_codes() {
    let cases = [
        (SimFault::WrongIndex, ResponseCode::IndexMismatch),
        (SimFault::FrameEnd, ResponseCode::UnexpectedFrameEnd),
        (SimFault::AckError, ResponseCode::Io),
        (SimFault::BusTimeout, ResponseCode::Io),
        (SimFault::BusConflict, ResponseCode::Io),
        (SimFault::Flushed, ResponseCode::Io),
        (SimFault::FifoOverflow, ResponseCode::Io),
    ];

    for (fault, code) in cases {
        let sim = controller(SimEngine::new(2));
        sim.attach(BASE, 0, 0x50, SimDevice::scratch());
        let ctx = context(&sim);
        let h = ctx.open(0).unwrap();

        sim.inject(BASE, 2, fault);
        assert_eq!(read(&ctx, h, 0x50, 3), Err(code));
        assert!(code.is_io_failure());
        assert_eq!(ctx.master(0).unwrap().stats().bad_responses, 1);

        assert!(read(&ctx, h, 0x50, 3).is_ok());
    }
}

#[test]
fn dirty_engine_is_recovered_by_the_next_call() {
    let sim = controller(SimEngine::new(2));
    sim.attach(BASE, 0, 0x50, SimDevice::scratch());
    let ctx = context(&sim);
    let h = ctx.open(0).unwrap();

    sim.make_dirty(BASE);
    sim.stall_reset(BASE, 3);
    ctx.clock().clear();

    write(&ctx, h, 0x50, &[1, 2]).unwrap();
    assert_eq!(ctx.clock().sleeps()[..3], [1000, 2000, 4000]);
    assert_eq!(ctx.master(0).unwrap().stats().recoveries, 1);
}

#[test]
fn exhausted_recovery_is_an_io_failure() {
    let sim = controller(SimEngine::new(2));
    sim.attach(BASE, 0, 0x50, SimDevice::scratch());
    let ctx = context(&sim);
    let h = ctx.open(0).unwrap();

    sim.make_dirty(BASE);
    sim.stall_reset(BASE, 4);

    assert_eq!(write(&ctx, h, 0x50, &[1, 2]), Err(ResponseCode::Io));
    assert!(sim.requests(BASE).is_empty());
    assert_eq!(ctx.master(0).unwrap().state(), MasterState::Faulted);

    write(&ctx, h, 0x50, &[1, 2]).unwrap();
    assert_eq!(ctx.master(0).unwrap().state(), MasterState::Idle);
}

#[test]
fn stalled_engine_times_out_and_recovers() {
    let sim = controller(SimEngine::new(2));
    sim.attach(BASE, 0, 0x50, SimDevice::scratch());
    let ctx = context(&sim);
    let h = ctx.open(0).unwrap();

    sim.hang(BASE);
    assert_eq!(write(&ctx, h, 0x50, &[1, 2]), Err(ResponseCode::Timeout));
    assert_eq!(ctx.master(0).unwrap().stats().timeouts, 1);

    write(&ctx, h, 0x50, &[3]).unwrap();
    assert_eq!(read(&ctx, h, 0x50, 1), Ok(vec![3]));
}

#[test]
fn trailing_pec_byte_is_drained() {
    let sim = controller(SimEngine::new(2));
    sim.attach(BASE, 1, 0x50, SimDevice::fixed(&[0xaa, 0xbb, 0xcc]));
    let ctx = context(&sim);
    ctx.smbus_tweaks("1 0x50 1 3 3 1").unwrap();
    let h = ctx.open(1).unwrap();

    assert_eq!(read(&ctx, h, 0x50, 2), Ok(vec![0xaa, 0xbb]));

    let stats = ctx.master(0).unwrap().stats();
    assert_eq!(stats.drained, 1);
    assert!(!sim.control_status(BASE).is_dirty());
}

#[test]
fn parameters_follow_precedence() {
    let sim = controller(SimEngine::new(2));
    for addr in [0x50, 0x51] {
        sim.attach(BASE, 1, addr, SimDevice::scratch());
        sim.attach(BASE, 2, addr, SimDevice::scratch());
    }
    let ctx = context(&sim);
    ctx.smbus_tweaks("1 0 2 3 3 0\n1 0x51 3 3 3 0\n").unwrap();

    let timing = |adapter: u16, addr: u8| {
        sim.clear_requests(BASE);
        write(&ctx, ctx.open(adapter).unwrap(), addr, &[0]).unwrap();
        let reqs = sim.requests(BASE);
        assert!(reqs.iter().all(|r| r.t() == reqs[0].t()));
        reqs[0].t()
    };

    assert_eq!(timing(1, 0x50), 2);
    assert_eq!(timing(1, 0x51), 3);
    assert_eq!(timing(2, 0x50), 1);
}

#[test]
fn smbus_helpers_over_transfer() {
    let sim = controller(SimEngine::new(2));
    sim.attach(BASE, 3, 0x48, SimDevice::registers(&[0x10, 0x20, 0x30]));
    sim.attach(BASE, 3, 0x0b, SimDevice::fixed(&[3, 7, 8, 9]));
    let ctx = context(&sim);
    let h = ctx.open(3).unwrap();

    let dev = SmbusDevice::new(&ctx, h, 0x48);
    assert_eq!(dev.read_byte_data(2), Ok(0x30));
    dev.write_word_data(4, 0xbeef).unwrap();
    assert_eq!(dev.read_word_data(4), Ok(0xbeef));
    dev.quick(false).unwrap();

    let battery = SmbusDevice::new(&ctx, h, 0x0b);
    let mut out = [0u8; 32];
    assert_eq!(battery.read_block_data(0x20, &mut out), Ok(3));
    assert_eq!(&out[..3], &[7, 8, 9]);

    let absent = SmbusDevice::new(&ctx, h, 0x49);
    assert_eq!(absent.quick(true), Err(ResponseCode::Io));
}

#[test]
fn unknown_adapter_is_rejected() {
    let sim = controller(SimEngine::new(2));
    let ctx = context(&sim);
    assert_eq!(ctx.open(4), Err(ResponseCode::BadBus));
}
