// Copyright 2026. The capmap developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::cap::{CapPerms, Capability};
use crate::range::Range;
use crate::sparse::SparseRange;

/// A classifier with a custom combination rule.
///
/// Every time the [`Mapper`][crate::Mapper] visits a capability, it offers
/// it to each installed map through [`Map::try_combine`].
pub trait Map<C: Capability> {
    /// A user-facing name for the map.
    fn name(&self) -> &str;

    /// A user-facing name for the address space the map describes.
    fn address_space(&self) -> &str;

    /// Everything classified into the map so far.
    fn ranges(&self) -> &SparseRange;

    /// If the capability has the permissions this map is interested in,
    /// ingest its bounds (possibly shrunk for alignment) and return `true`.
    ///
    /// Must return `false`, without side effects, for capabilities the map
    /// rejects; untagged capabilities are always rejected.
    fn try_combine(&mut self, cap: &C) -> bool;
}

/// Memory from which further capabilities can be loaded.
///
/// This is the map that drives the traversal: its contents double as the
/// already-explored set. Bounds are shrunk to capability-word alignment
/// before combining, since a partially covered word cannot hold a loadable
/// capability.
///
/// Sealed capabilities are rejected; they cannot be dereferenced at all
/// until unsealed, and this library never unseals.
#[derive(Default)]
pub struct LoadCapMap {
    ranges: SparseRange,
}

impl LoadCapMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sparse_range(&self) -> &SparseRange {
        &self.ranges
    }

    /// If one whole capability word starting at `addr` is already inside
    /// the map, return the address a scan for new capabilities may continue
    /// from. Otherwise return `None`.
    pub fn includes_cap<C: Capability>(&self, addr: u64) -> Option<u64> {
        let word = Range::from_base_length(addr, C::WORD);
        if self.ranges.includes(word) {
            // Mirrors the hardware's wrapping address arithmetic at the top
            // of the address space.
            Some(addr.wrapping_add(C::WORD))
        } else {
            None
        }
    }
}

impl<C: Capability> Map<C> for LoadCapMap {
    fn name(&self) -> &str {
        "load capabilities"
    }

    fn address_space(&self) -> &str {
        "virtual memory"
    }

    fn ranges(&self) -> &SparseRange {
        &self.ranges
    }

    fn try_combine(&mut self, cap: &C) -> bool {
        if !cap.tag() || cap.is_sealed() || !cap.perms().contains(CapPerms::LOAD_CAPS) {
            return false;
        }

        self.ranges
            .combine(Range::from_cap(cap).shrunk_to_alignment(C::WORD));
        true
    }
}

/// Memory from which data can be loaded.
///
/// Sealed capabilities are rejected, as for [`LoadCapMap`]. For any set of
/// visited capabilities this map covers at least what [`LoadCapMap`] does.
#[derive(Default)]
pub struct LoadMap {
    ranges: SparseRange,
}

impl LoadMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sparse_range(&self) -> &SparseRange {
        &self.ranges
    }
}

impl<C: Capability> Map<C> for LoadMap {
    fn name(&self) -> &str {
        "load"
    }

    fn address_space(&self) -> &str {
        "virtual memory"
    }

    fn ranges(&self) -> &SparseRange {
        &self.ranges
    }

    fn try_combine(&mut self, cap: &C) -> bool {
        if !cap.tag() || cap.is_sealed() || !cap.perms().contains(CapPerms::LOAD) {
            return false;
        }

        self.ranges.combine(Range::from_cap(cap));
        true
    }
}

/// Memory reachable with a caller-chosen permission combination.
///
/// Sealed-ness is deliberately not filtered: a sealed capability still
/// names memory with these permissions, which is what a permission census
/// wants to see. Callers that disagree can compose their own map.
pub struct PermissionMap {
    name: String,
    address_space: String,
    required: CapPerms,
    ranges: SparseRange,
}

impl PermissionMap {
    pub fn new(
        name: impl Into<String>,
        address_space: impl Into<String>,
        required: CapPerms,
    ) -> Self {
        Self {
            name: name.into(),
            address_space: address_space.into(),
            required,
            ranges: SparseRange::new(),
        }
    }
}

impl<C: Capability> Map<C> for PermissionMap {
    fn name(&self) -> &str {
        &self.name
    }

    fn address_space(&self) -> &str {
        &self.address_space
    }

    fn ranges(&self) -> &SparseRange {
        &self.ranges
    }

    fn try_combine(&mut self, cap: &C) -> bool {
        if !cap.tag() || !cap.perms().contains(self.required) {
            return false;
        }

        self.ranges.combine(Range::from_cap(cap));
        true
    }
}

/// Available branch targets.
///
/// Records addresses that can be branched to directly, not the PCC bounds
/// that would result. Two forms are accepted:
///
///  - an unsealed executable (and loadable) capability contributes its
///    whole bounds,
///  - a sentry contributes only its entry point, as a unit range.
///
/// Alignment is not tracked; depending on the low address bits an entry
/// may be an A64 target, a C64 target, or not fetchable at all, and that
/// distinction is left to the consumer.
#[derive(Default)]
pub struct BranchMap {
    ranges: SparseRange,
}

impl BranchMap {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Capability> Map<C> for BranchMap {
    fn name(&self) -> &str {
        "branch"
    }

    fn address_space(&self) -> &str {
        "virtual memory"
    }

    fn ranges(&self) -> &SparseRange {
        &self.ranges
    }

    fn try_combine(&mut self, cap: &C) -> bool {
        if !cap.tag() {
            return false;
        }

        if !cap.is_sealed() {
            if cap.perms().contains(CapPerms::LOAD | CapPerms::EXECUTE) {
                self.ranges.combine(Range::from_cap(cap));
                return true;
            }
            return false;
        }

        if cap.is_sentry() {
            let entry = cap.address();
            self.ranges.combine(Range::from_base_last(entry, entry));
            return true;
        }

        false
    }
}

/// Flags any capability that reaches into a given poison region.
///
/// Classifies like a [`PermissionMap`], but additionally invokes the
/// callback, exactly once per accepted capability, whenever the accepted
/// bounds overlap the poison set. The callback's return value is reserved
/// and currently ignored.
///
/// The callback must not re-enter the owning [`Mapper`][crate::Mapper].
pub struct PoisonMap<C> {
    name: String,
    address_space: String,
    required: CapPerms,
    poison: SparseRange,
    callback: Box<dyn FnMut(&C) -> bool>,
    ranges: SparseRange,
}

impl<C: Capability> PoisonMap<C> {
    pub fn new(
        name: impl Into<String>,
        address_space: impl Into<String>,
        required: CapPerms,
        poison: SparseRange,
        callback: impl FnMut(&C) -> bool + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            address_space: address_space.into(),
            required,
            poison,
            callback: Box::new(callback),
            ranges: SparseRange::new(),
        }
    }
}

impl<C: Capability> Map<C> for PoisonMap<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn address_space(&self) -> &str {
        &self.address_space
    }

    fn ranges(&self) -> &SparseRange {
        &self.ranges
    }

    fn try_combine(&mut self, cap: &C) -> bool {
        if !cap.tag() || !cap.perms().contains(self.required) {
            return false;
        }

        let bounds = Range::from_cap(cap);
        self.ranges.combine(bounds);
        if self.poison.overlaps(bounds) {
            log::debug!("poisoned capability {cap:?}");
            (self.callback)(cap);
        }
        true
    }
}
