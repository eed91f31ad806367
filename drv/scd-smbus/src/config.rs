// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Text configuration front end.
//!
//! Objects are created, and buses tuned, by writing lines of text:
//!
//! ```text
//! smbus_master <register-address> <master-id> [<bus-count>]
//! <adapter> <device-address> <t> <datr> <datw> <ed>
//! ```
//!
//! Integers are in C's base-0 notation: `0x` introduces hex, a leading `0`
//! octal, anything else is decimal.  A write may carry several lines;
//! blank lines are skipped.

use crate::params::BusParams;
use drv_scd_smbus_api::ResponseCode;

/// Buses created for a master when the creation line does not say.
pub const DEFAULT_BUS_COUNT: u32 = 8;

/// Lines this long or longer are rejected.
pub const MAX_CONFIG_LINE: usize = 100;

/// Parses an unsigned integer in base-0 notation.
pub fn parse_int(tok: &str) -> Result<u32, ResponseCode> {
    let (digits, radix) = if let Some(hex) =
        tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X"))
    {
        (hex, 16)
    } else if tok.len() > 1 && tok.starts_with('0') {
        (&tok[1..], 8)
    } else {
        (tok, 10)
    };

    // from_str_radix tolerates a sign; base-0 input does not.
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return Err(ResponseCode::BadConfig);
    }

    u32::from_str_radix(digits, radix).map_err(|_| ResponseCode::BadConfig)
}

fn parse_field<T: TryFrom<u32>>(tok: Option<&str>) -> Result<T, ResponseCode> {
    let v = parse_int(tok.ok_or(ResponseCode::BadConfig)?)?;
    T::try_from(v).map_err(|_| ResponseCode::BadConfig)
}

/// Splits a configuration write into its non-blank lines.
pub fn lines(text: &str) -> impl Iterator<Item = &str> + '_ {
    text.split('\n').filter(|l| !l.is_empty())
}

fn check_length(line: &str) -> Result<(), ResponseCode> {
    if line.len() >= MAX_CONFIG_LINE {
        Err(ResponseCode::BadConfig)
    } else {
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NewObject {
    SmbusMaster { addr: u32, id: u32, bus_count: u32 },
}

/// Parses one object creation line.
pub fn parse_new_object(line: &str) -> Result<NewObject, ResponseCode> {
    check_length(line)?;
    let mut toks = line.split_ascii_whitespace();

    match toks.next() {
        Some("smbus_master") => {
            let addr = parse_field(toks.next())?;
            let id = parse_field(toks.next())?;
            let bus_count = match toks.next() {
                Some(tok) => parse_int(tok)?,
                None => DEFAULT_BUS_COUNT,
            };

            if toks.next().is_some() {
                return Err(ResponseCode::BadConfig);
            }

            Ok(NewObject::SmbusMaster {
                addr,
                id,
                bus_count,
            })
        }
        _ => Err(ResponseCode::BadConfig),
    }
}

/// A parameter update aimed at the bus with adapter number `adapter`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Tweak {
    pub adapter: u16,
    pub params: BusParams,
}

/// Parses one tuning line.
pub fn parse_tweak(line: &str) -> Result<Tweak, ResponseCode> {
    check_length(line)?;
    let mut toks = line.split_ascii_whitespace();

    let adapter = parse_field(toks.next())?;
    let addr = parse_field(toks.next())?;
    let t = parse_field(toks.next())?;
    let datr = parse_field(toks.next())?;
    let datw = parse_field(toks.next())?;
    let ed = parse_field(toks.next())?;

    if toks.next().is_some() {
        return Err(ResponseCode::BadConfig);
    }

    Ok(Tweak {
        adapter,
        params: BusParams::new(addr, t, datr, datw, ed)?,
    })
}
