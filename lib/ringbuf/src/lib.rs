// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for instrumenting SCD drivers
//!
//! This contains an implementation for a static ring buffer designed to be
//! used to instrument arbitrary contexts, including register-level driver
//! code that runs from several host threads at once.  Entries are typed: a
//! driver declares an `enum` describing the events it cares about (register
//! reads and writes, computed delays, errors) and records values of that
//! type as it goes.
//!
//! ## Constraints
//!
//! The type in the ring buffer must implement both `Copy` and `PartialEq`.
//!
//! If you use the variants of the `ringbuf!` macro that leave the name of the
//! data structure implicit, you can only have one per module. (You can lift
//! this constraint by providing a name.)
//!
//! ## Creating a ring buffer
//!
//! Ring buffers are instantiated with the [`ringbuf!`] macro, to which one
//! must provide the type of per-entry payload, the number of entries, and a
//! static initializer.  For example, to define a 16-entry ring buffer with
//! each entry containing a [`u32`]:
//!
//! ```ignore
//! ringbuf!(u32, 16, 0);
//! ```
//!
//! Ring buffer entries are generated with [`ringbuf_entry!`] specifying a
//! payload of the appropriate type, e.g.:
//!
//! ```ignore
//! ringbuf_entry!(cs.0);
//! ```
//!
//! You can also provide a name for the ring buffer, to distinguish between
//! them if you have more than one:
//!
//! ```ignore
//! ringbuf!(SMBUS_RINGBUF, Trace, 64, Trace::None);
//!
//! // ...
//!
//! ringbuf_entry!(SMBUS_RINGBUF, Trace::CsRead(cs.0));
//! ```
//!
//! ## Reading a ring buffer
//!
//! [`Ringbuf::entries`] walks the live entries from oldest to newest.  This
//! is what tests use to check that a given event was (or was not) recorded;
//! on a running system the same walk backs a debug dump.

#![cfg_attr(not(test), no_std)]

/// Re-export the lock so that code generated by the macros is guaranteed to
/// be able to find it.
pub use spin::Mutex;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The resulting ringbuffer will be static, so `NAME` should be uppercase.
/// Its actual type is `Mutex<Ringbuf<T, N>>`.
///
/// To support the common case of having one quickly-installed ringbuffer per
/// module, if you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::Mutex<$crate::Ringbuf<$t, $n>> =
            $crate::Mutex::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: $init,
                }; $n],
            });
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the `ringbuf!` macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ringbuffer called
/// `NAME`.
///
/// If you declared your ringbuffer without a name, you can also use this
/// without a name, and it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate both buf and payload, without letting them access each
        // other, by evaluating them in a tuple where each cannot
        // accidentally use the other's binding.
        let (p, buf) = ($payload, &$buf);
        $crate::Ringbuf::entry(&mut *buf.lock(), line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.  In practice, instantiating
/// this directly is strange -- see the [`ringbuf!`] macro.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    pub fn entry(&mut self, line: u16, payload: T) {
        // A fresh ring buffer has no last entry; treat that as an
        // out-of-range index so that the first entry lands in slot 0.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        if let Some(ent) = self.buffer.get_mut(ndx) {
            *ent = RingbufEntry {
                line,
                payload,
                count: 1,
                generation: ent.generation.wrapping_add(1),
            };
            self.last = Some(ndx);
        }
    }

    /// Iterates over the live entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last + 1,
            None => N,
        };

        (0..N)
            .map(move |i| (start + i) % N.max(1))
            .filter_map(move |ndx| self.buffer.get(ndx))
            .filter(|ent| ent.count != 0)
    }

    /// Returns true if any live entry carries a payload matching `pred`.
    pub fn contains(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.entries().any(|ent| pred(&ent.payload))
    }
}
