// Copyright 2026. The capmap developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A pure software capability oracle.
//!
//! [`SimSpace`] models an address space holding capability slots;
//! [`SimCap`] implements [`Capability`] against it. This backs the test
//! suite and the demo binary, and doubles as a harness for experimenting
//! with scan behavior on machines without capability hardware.
//!
//! The simulation enforces the same rules the hardware would: loading
//! through a capability asserts the tag, unsealed-ness, load permissions,
//! and bounds. Violations are programming errors in the embedding code and
//! panic rather than returning untagged junk.

use core::fmt;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::cap::{CapPerms, Capability, OType};
use crate::range::Range;
use crate::sparse::SparseRange;

/// The architectural fields of a simulated capability.
#[derive(Clone, Copy, PartialEq, Eq)]
struct CapBits {
    tag: bool,
    base: u64,
    length: u64,
    addr: u64,
    perms: CapPerms,
    otype: OType,
}

const NULL: CapBits = CapBits {
    tag: false,
    base: 0,
    length: 0,
    addr: 0,
    perms: CapPerms::empty(),
    otype: OType::Unsealed,
};

#[derive(Default)]
struct Inner {
    /// Capability slots, keyed by their word-aligned address.
    slots: BTreeMap<u64, CapBits>,
    /// Pages the simulated OS reports as readable + capability-readable.
    mapped: SparseRange,
}

/// A simulated capability address space.
///
/// Cheap to clone; clones refer to the same space.
#[derive(Clone, Default)]
pub struct SimSpace {
    inner: Rc<RefCell<Inner>>,
}

impl SimSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `range` as mapped, readable, and capability-readable.
    pub fn map_region(&self, range: Range) {
        self.inner.borrow_mut().mapped.combine(range);
    }

    /// The mapped regions, as the OS virtual-memory query would report
    /// them.
    pub fn vmmap(&self) -> SparseRange {
        self.inner.borrow().mapped.clone()
    }

    /// Place `cap` in the capability slot at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not capability-word aligned.
    pub fn store(&self, addr: u64, cap: &SimCap) {
        assert!(
            addr % SimCap::WORD == 0,
            "capability store must be word-aligned"
        );
        self.inner.borrow_mut().slots.insert(addr, cap.bits);
    }

    /// An unsealed capability for `[base, base + length)` pointing at its
    /// own base.
    pub fn cap(&self, base: u64, length: u64, perms: CapPerms) -> SimCap {
        SimCap {
            bits: CapBits {
                tag: true,
                base,
                length,
                addr: base,
                perms,
                otype: OType::Unsealed,
            },
            space: self.clone(),
        }
    }

    /// A sentry: sealed for branching, pointing at `entry` within the
    /// given bounds.
    pub fn sentry(&self, entry: u64, base: u64, length: u64, perms: CapPerms) -> SimCap {
        SimCap {
            bits: CapBits {
                tag: true,
                base,
                length,
                addr: entry,
                perms,
                otype: OType::Sentry,
            },
            space: self.clone(),
        }
    }

    /// A capability sealed with an ordinary object type.
    pub fn sealed(&self, otype: u64, base: u64, length: u64, perms: CapPerms) -> SimCap {
        SimCap {
            bits: CapBits {
                tag: true,
                base,
                length,
                addr: base,
                perms,
                otype: OType::Other(otype),
            },
            space: self.clone(),
        }
    }

    /// The canonical untagged capability: the all-zero pattern.
    pub fn null(&self) -> SimCap {
        SimCap {
            bits: NULL,
            space: self.clone(),
        }
    }
}

/// A capability within a [`SimSpace`].
#[derive(Clone)]
pub struct SimCap {
    bits: CapBits,
    space: SimSpace,
}

impl PartialEq for SimCap {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl Eq for SimCap {}

impl fmt::Debug for SimCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.bits.tag {
            return f.write_str("SimCap(untagged)");
        }
        write!(
            f,
            "SimCap({:#x} in {:?}, {:?}, {:?})",
            self.bits.addr,
            Range::from_cap(self),
            self.bits.perms,
            self.bits.otype,
        )
    }
}

impl Capability for SimCap {
    const WORD: u64 = 16;

    fn tag(&self) -> bool {
        self.bits.tag
    }

    fn base(&self) -> u64 {
        self.bits.base
    }

    fn length(&self) -> u64 {
        self.bits.length
    }

    fn address(&self) -> u64 {
        self.bits.addr
    }

    fn perms(&self) -> CapPerms {
        self.bits.perms
    }

    fn otype(&self) -> OType {
        self.bits.otype
    }

    fn load_cap(&self, addr: u64) -> Self {
        assert!(self.bits.tag, "load through an untagged capability");
        assert!(!self.is_sealed(), "load through a sealed capability");
        assert!(
            self.bits.perms.contains(CapPerms::LOAD_CAPS),
            "load without LOAD | LOAD_CAP"
        );
        let word = Range::from_base_length(addr, Self::WORD);
        assert!(
            Range::from_cap(self).includes(word),
            "load at {addr:#x} outside capability bounds {:?}",
            Range::from_cap(self)
        );

        let bits = self
            .space
            .inner
            .borrow()
            .slots
            .get(&addr)
            .copied()
            .unwrap_or(NULL);
        SimCap {
            bits,
            space: self.space.clone(),
        }
    }

    fn raw_parts(&self) -> (u64, u64) {
        // Not an architectural encoding: a stable, readable packing for
        // report dumps. The low word is the address, as on real hardware.
        let ot = match self.bits.otype {
            OType::Unsealed => 0,
            OType::Sentry => 1,
            OType::Other(n) => n & 0xffff,
        };
        let hi = (u64::from(self.bits.perms.bits()) << 48) | (ot << 32) | (self.bits.base >> 32);
        (hi, self.bits.addr)
    }
}
