// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The transfer engine: message lists in, sessions out, and back again.
//!
//! A call is encoded as one session: for every message, an address item
//! followed by one item per byte.  Items are numbered from zero (modulo 16)
//! and the engine echoes that number in each response, which is how
//! responses are matched back to the message bytes they belong to.
//!
//! SMBus block reads need the device's length byte before the engine knows
//! how many more bytes to clock in.  Engines at protocol version 2 and up
//! do this themselves when the length item has `br` set; older engines get
//! a second, continuation session once the length has been decoded.

use crate::master::Session;
use crate::params::{BusParams, ParamStore};
use crate::regs::{nack_signature, ss_field, Request, Response};
use crate::{Clock, Master, RegisterPort, Trace, TRACE};
use drv_scd_smbus_api::{
    Message, MessageFlags, ResponseCode, SMBUS_BLOCK_MAX,
};
use ringbuf::ringbuf_entry;

/// Why a response failed validation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResponseError {
    /// Frame-empty showed up before the session was consumed.
    EarlyFrameEnd,
    AckError,
    BusTimeout,
    BusConflict,
    Flushed,
    /// The response's transfer index is not the one expected.
    IndexMismatch,
    FifoOverflow,
}

impl From<ResponseError> for ResponseCode {
    fn from(e: ResponseError) -> Self {
        match e {
            ResponseError::EarlyFrameEnd => ResponseCode::UnexpectedFrameEnd,
            ResponseError::IndexMismatch => ResponseCode::IndexMismatch,
            ResponseError::AckError
            | ResponseError::BusTimeout
            | ResponseError::BusConflict
            | ResponseError::Flushed
            | ResponseError::FifoOverflow => ResponseCode::Io,
        }
    }
}

/// Validates the response expected at position `ti` of its session.
pub fn check_response(rsp: Response, ti: usize) -> Result<(), ResponseError> {
    if rsp.fe() {
        Err(ResponseError::EarlyFrameEnd)
    } else if rsp.ack_error() {
        Err(ResponseError::AckError)
    } else if rsp.timeout_error() {
        Err(ResponseError::BusTimeout)
    } else if rsp.bus_conflict_error() {
        Err(ResponseError::BusConflict)
    } else if rsp.flushed() {
        Err(ResponseError::Flushed)
    } else if rsp.ti() != (ti & 0xf) as u8 {
        Err(ResponseError::IndexMismatch)
    } else if rsp.foe() {
        Err(ResponseError::FifoOverflow)
    } else {
        Ok(())
    }
}

///
/// Checks a message list before anything touches the hardware, and
/// returns its session size: one item per message plus one per byte.
///
pub fn session_size(msgs: &[Message<'_>]) -> Result<usize, ResponseCode> {
    let last = msgs.len().checked_sub(1).ok_or(ResponseCode::BadArg)?;
    let mut ss = 0;

    for (i, msg) in msgs.iter().enumerate() {
        if msg.flags.contains(MessageFlags::TEN_BIT) {
            return Err(ResponseCode::OperationNotSupported);
        }

        if msg.addr > 0x7f || msg.len > msg.buf.len() {
            return Err(ResponseCode::BadArg);
        }

        if msg.flags.contains(MessageFlags::RECV_LEN) {
            // The length item decides how much more is read, so nothing
            // may follow it.
            if i != last {
                return Err(ResponseCode::OperationNotSupported);
            }

            if !msg.is_read()
                || msg.len == 0
                || msg.buf.len() < msg.len + SMBUS_BLOCK_MAX
            {
                return Err(ResponseCode::BadArg);
            }
        }

        ss += 1 + msg.len;
    }

    Ok(ss)
}

fn item(bus: u8, pos: usize, ss: usize, t: u8) -> Request {
    let mut req = Request(0);
    req.set_ti((pos & 0xf) as u8);
    req.set_bs(bus & 0xf);
    req.set_t(t);
    if pos == 0 {
        req.set_ss(ss_field(ss));
    }
    req.set_sp(pos + 1 == ss);
    req
}

///
/// Encodes a message list as one session of `ss` items, handing each item
/// to `emit` in order.  `version` is the engine's protocol version, which
/// decides whether a block read's length item asks the engine to read the
/// block itself.
///
pub fn encode(
    bus: u8,
    version: u8,
    ss: usize,
    msgs: &[Message<'_>],
    params: &ParamStore,
    mut emit: impl FnMut(Request),
) {
    let mut pos = 0;

    for msg in msgs {
        let p = params.lookup(msg.addr);
        let rd = msg.is_read();

        let mut req = item(bus, pos, ss, p.t);
        req.set_st(pos == 0 || !msg.flags.contains(MessageFlags::NO_START));
        req.set_dod(true);
        req.set_d(((msg.addr as u8) << 1) | u8::from(rd));
        emit(req);
        pos += 1;

        for i in 0..msg.len {
            let mut req = item(bus, pos, ss, p.t);

            if i == 0 && msg.flags.contains(MessageFlags::RECV_LEN) {
                req.set_sp(false);
                req.set_br(version >= 2);
                req.set_da(true);
                req.set_ed(p.ed);
            } else {
                let stop = req.sp();
                if rd {
                    req.set_da(!stop);
                } else {
                    req.set_dod(true);
                    req.set_d(msg.buf.get(i).copied().unwrap_or(0));
                }
                req.set_ed(stop && p.ed);
            }

            emit(req);
            pos += 1;
        }
    }
}

/// Encodes the session that clocks in the `n` bytes of a block read on an
/// engine that cannot do it by itself.  The device is still addressed, so
/// there is neither a start nor an address item.
pub fn encode_continuation(
    bus: u8,
    n: usize,
    p: BusParams,
    mut emit: impl FnMut(Request),
) {
    for pos in 0..n {
        let mut req = item(bus, pos, n, p.t);
        let stop = req.sp();
        req.set_da(!stop);
        req.set_ed(stop && p.ed);
        emit(req);
    }
}

///
/// Runs one call against a logical bus of `master`.  The master lock is
/// held from before the engine is entered until after it is left, so calls
/// on any of the master's buses never interleave.
///
pub fn transfer<P: RegisterPort, C: Clock>(
    master: &Master,
    port: &P,
    clock: &C,
    bus: u8,
    msgs: &mut [Message<'_>],
) -> Result<(), ResponseCode> {
    let ss = session_size(msgs)?;

    let mut session = master.lock(port, clock);
    let result = run(&mut session, bus, ss, msgs);
    session.leave(result.is_err());
    result
}

fn run<P: RegisterPort, C: Clock>(
    session: &mut Session<'_, P, C>,
    bus: u8,
    ss: usize,
    msgs: &mut [Message<'_>],
) -> Result<(), ResponseCode> {
    let params = session.params(bus).ok_or(ResponseCode::BadBus)?;

    let cs = session.enter(true)?;
    if let Some(capacity) = cs.capacity() {
        if ss > capacity {
            return Err(ResponseCode::SessionOverflow);
        }
    }

    let version = cs.ver();
    encode(bus, version, ss, msgs, &params, |req| session.write_request(req));

    let addr = msgs.last().map_or(0, |m| m.addr);
    session.wait(bus, addr)?;

    decode(session, bus, ss, version, &params, msgs)
}

fn check<P: RegisterPort, C: Clock>(
    session: &mut Session<'_, P, C>,
    bus: u8,
    addr: u16,
    rsp: Response,
    ti: usize,
) -> Result<(), ResponseCode> {
    check_response(rsp, ti).map_err(|e| {
        ringbuf_entry!(
            TRACE,
            Trace::BadResponse {
                bus,
                addr,
                ti: (ti & 0xf) as u8,
                rsp: rsp.0
            }
        );
        let stats = session.stats_mut();
        stats.bad_responses = stats.bad_responses.wrapping_add(1);
        e.into()
    })
}

fn decode<P: RegisterPort, C: Clock>(
    session: &mut Session<'_, P, C>,
    bus: u8,
    ss: usize,
    version: u8,
    params: &ParamStore,
    msgs: &mut [Message<'_>],
) -> Result<(), ResponseCode> {
    let mut ti = 0;

    for msg in msgs.iter_mut() {
        let rsp = session.read_response();
        if ti == 0 && rsp == nack_signature(ss) {
            // Nobody home at the first address: expected when probing.
            ringbuf_entry!(TRACE, Trace::AddrNack { bus, addr: msg.addr });
            let stats = session.stats_mut();
            stats.addr_nacks = stats.addr_nacks.wrapping_add(1);
            return Err(ResponseCode::Io);
        }
        check(session, bus, msg.addr, rsp, ti)?;
        ti += 1;

        let rd = msg.is_read();
        let block = msg.flags.contains(MessageFlags::RECV_LEN);
        let mut remaining = 0;

        let mut i = 0;
        while i < msg.len {
            let rsp = session.read_response();
            check(session, bus, msg.addr, rsp, ti)?;
            ti += 1;

            if rd {
                if let Some(byte) = msg.buf.get_mut(i) {
                    *byte = rsp.d();
                }
            }

            if i == 0 && block {
                let n = rsp.d();
                if n == 0 || usize::from(n) > SMBUS_BLOCK_MAX {
                    ringbuf_entry!(
                        TRACE,
                        Trace::BadBlockLength {
                            bus,
                            addr: msg.addr,
                            len: n
                        }
                    );
                    return Err(ResponseCode::Protocol);
                }

                if version >= 2 {
                    msg.len += usize::from(n);
                } else {
                    remaining = usize::from(n);
                }
            }

            i += 1;
        }

        if remaining > 0 {
            let p = params.lookup(msg.addr);
            continuation(session, bus, p, msg, remaining)?;
        }
    }

    Ok(())
}

fn continuation<P: RegisterPort, C: Clock>(
    session: &mut Session<'_, P, C>,
    bus: u8,
    p: BusParams,
    msg: &mut Message<'_>,
    n: usize,
) -> Result<(), ResponseCode> {
    ringbuf_entry!(
        TRACE,
        Trace::Continuation {
            bus,
            addr: msg.addr,
            len: n as u8
        }
    );

    encode_continuation(bus, n, p, |req| session.write_request(req));
    session.wait(bus, msg.addr)?;

    for ti in 0..n {
        let rsp = session.read_response();
        check(session, bus, msg.addr, rsp, ti)?;

        if let Some(byte) = msg.buf.get_mut(msg.len) {
            *byte = rsp.d();
        }
        msg.len += 1;
    }

    Ok(())
}
