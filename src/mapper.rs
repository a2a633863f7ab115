// Copyright 2026. The capmap developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::cap::Capability;
use crate::maps::{LoadCapMap, Map};
use crate::range::Range;
use crate::sparse::SparseRange;

/// The capability registers of a thread, harvested by the embedder.
///
/// Harvesting is a per-architecture register dump and lives outside this
/// library; the scanner only consumes the populated record, slot by named
/// slot, via [`Mapper::scan_roots`].
pub struct Roots<C> {
    /// General-purpose capability registers `c0`..`c30`.
    pub c: [C; 31],
    /// The stack capability.
    pub csp: C,
    /// The default data capability.
    pub ddc: C,
    /// The program counter capability on entry to the harvester.
    pub pcc: C,
    /// The compartment-id register.
    pub cid_el0: C,
}

impl<C: Clone> Roots<C> {
    /// A root record with every slot set to `fill` (typically an untagged
    /// capability; untagged roots are skipped by the scanner).
    pub fn new(fill: C) -> Self {
        Self {
            c: core::array::from_fn(|_| fill.clone()),
            csp: fill.clone(),
            ddc: fill.clone(),
            pcc: fill.clone(),
            cid_el0: fill,
        }
    }

    pub fn name_c(index: usize) -> &'static str {
        const NAMES: [&str; 31] = [
            "c0", "c1", "c2", "c3", "c4", "c5", "c6", "c7", "c8", "c9", "c10", "c11", "c12", "c13",
            "c14", "c15", "c16", "c17", "c18", "c19", "c20", "c21", "c22", "c23", "c24", "c25",
            "c26", "c27", "c28", "c29", "c30",
        ];
        NAMES[index]
    }

    /// Every slot with its register name, in scan order.
    pub fn iter_named(&self) -> impl Iterator<Item = (&'static str, &C)> {
        self.c
            .iter()
            .enumerate()
            .map(|(i, cap)| (Self::name_c(i), cap))
            .chain([
                ("csp", &self.csp),
                ("DDC", &self.ddc),
                ("PCC", &self.pcc),
                ("CID_EL0", &self.cid_el0),
            ])
    }
}

/// The primary container, and expected API entry point.
///
/// A `Mapper` walks the closure of capabilities reachable from the roots
/// it is given, feeding every visited capability to the installed
/// classifier [`Map`]s. The mandatory [`LoadCapMap`] both records
/// capability-loadable memory and serves as the already-explored set that
/// terminates cycles.
pub struct Mapper<C: Capability> {
    /// Memory ranges eligible for scanning. Capabilities to memory outside
    /// these ranges are still classified, but never dereferenced.
    include: SparseRange,

    /// Memory used by the mapper itself, re-derived on every scan entry so
    /// the scanner does not discover its own state.
    exclude_self: SparseRange,

    /// Always tracked: drives the graph walk.
    load_cap_map: LoadCapMap,

    /// User-installed classifiers, in installation order.
    maps: Vec<Box<dyn Map<C>>>,

    max_scan_depth: u64,
    max_seen_scan_depth: u64,

    /// Tagged roots fed in so far, for reporting.
    roots: Vec<(String, C)>,
}

impl<C: Capability> Mapper<C> {
    /// A mapper that will dereference capabilities only inside `include`.
    ///
    /// On CheriBSD, [`Mapper::with_os_include`] seeds this from the
    /// process's capability-readable pages; everywhere else the embedder
    /// chooses.
    pub fn new(include: SparseRange) -> Self {
        Self {
            include,
            exclude_self: SparseRange::new(),
            load_cap_map: LoadCapMap::new(),
            maps: Vec::new(),
            max_scan_depth: u64::MAX,
            max_seen_scan_depth: 0,
            roots: Vec::new(),
        }
    }

    /// A mapper whose inclusion set is everything the OS maps with both
    /// read and read-capability protection.
    #[cfg(target_os = "freebsd")]
    pub fn with_os_include() -> Result<Self, crate::vmquery::Error> {
        Ok(Self::new(crate::vmquery::read_cap_mappings()?))
    }

    /// Limit the number of dereference hops from a root.
    ///
    /// With a limit of zero the roots themselves are classified but never
    /// dereferenced. Unbounded by default.
    pub fn set_max_scan_depth(&mut self, max: u64) {
        self.max_scan_depth = max;
    }

    /// The deepest hop count any scan actually reached.
    pub fn max_seen_scan_depth(&self) -> u64 {
        self.max_seen_scan_depth
    }

    pub fn include(&self) -> &SparseRange {
        &self.include
    }

    pub fn include_mut(&mut self) -> &mut SparseRange {
        &mut self.include
    }

    pub fn load_cap_map(&self) -> &LoadCapMap {
        &self.load_cap_map
    }

    /// Install a classifier. Maps are offered capabilities in installation
    /// order.
    pub fn push_map(&mut self, map: Box<dyn Map<C>>) {
        self.maps.push(map);
    }

    pub fn maps(&self) -> &[Box<dyn Map<C>>] {
        &self.maps
    }

    pub fn maps_mut(&mut self) -> &mut Vec<Box<dyn Map<C>>> {
        &mut self.maps
    }

    /// The tagged roots scanned so far, in scan order.
    pub fn roots(&self) -> impl Iterator<Item = (&str, &C)> {
        self.roots.iter().map(|(name, cap)| (name.as_str(), cap))
    }

    pub(crate) fn exclude_self(&self) -> &SparseRange {
        &self.exclude_self
    }

    /// Scan every slot of a harvested root record.
    ///
    /// The result is incorporated into the existing map.
    pub fn scan_roots(&mut self, roots: &Roots<C>) {
        for (name, cap) in roots.iter_named() {
            self.scan(cap.clone(), name);
        }
    }

    /// Scan the given capability.
    ///
    /// Untagged capabilities are silently ignored; zeroed registers are
    /// common and expected. The result is incorporated into the existing
    /// map.
    pub fn scan(&mut self, cap: C, name: impl Into<String>) {
        self.update_self_ranges();
        if !cap.tag() {
            return;
        }
        let name = name.into();
        log::debug!("scanning root {name}: {cap:?}");
        self.roots.push((name, cap.clone()));
        self.scan_inner(&cap, 0);
    }

    fn update_self_ranges(&mut self) {
        // Heap allocations owned by the maps are not covered; the mapper
        // may still discover its own map state as noise.
        self.exclude_self = SparseRange::from(Range::from_object(self as *const Self));
    }

    fn scan_inner(&mut self, cap: &C, depth: u64) {
        log::trace!("scan {cap:?} depth={depth}");
        if depth > self.max_seen_scan_depth {
            self.max_seen_scan_depth = depth;
        }

        // Classification is unconditional: an out-of-include destination
        // is still worth reporting, even though it won't be dereferenced.
        for map in &mut self.maps {
            map.try_combine(cap);
        }

        // What is left to look at: the capability's own bounds, minus
        // memory already explored, minus the mapper itself, minus
        // everything outside the inclusion set. Computed before the
        // combine below so a self-referential capability still scans its
        // own bounds once.
        let mut scan_ranges = SparseRange::from(Range::from_cap(cap));
        scan_ranges.remove_sparse(self.load_cap_map.sparse_range());
        scan_ranges.remove_sparse(&self.exclude_self);
        let mut excluded = SparseRange::from(Range::full_64bit());
        excluded.remove_sparse(&self.include);
        scan_ranges.remove_sparse(&excluded);

        if !self.load_cap_map.try_combine(cap) {
            // Not load-capability-capable: nothing can be loaded through
            // it, so descent is impossible.
            return;
        }
        if depth >= self.max_scan_depth {
            log::trace!("depth limit reached, not descending");
            return;
        }

        for region in scan_ranges.parts() {
            let region = region.shrunk_to_alignment(C::WORD);
            let mut addr = region.base();
            loop {
                match addr.checked_add(C::WORD - 1) {
                    Some(end) if end <= region.last() => {}
                    _ => break,
                }

                let candidate = cap.load_cap(addr);
                if candidate.tag() {
                    log::trace!("recursing at {addr:#x}: {candidate:?}");
                    self.scan_inner(&candidate, depth + 1);
                }

                match addr.checked_add(C::WORD) {
                    Some(next) => addr = next,
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::CapPerms;
    use crate::sim::SimSpace;

    #[test]
    fn untagged_roots_are_ignored() {
        let space = SimSpace::new();
        let mut mapper = Mapper::new(SparseRange::from(Range::full_64bit()));
        mapper.scan(space.null(), "czr");

        assert_eq!(mapper.roots().count(), 0);
        assert!(mapper.load_cap_map().sparse_range().is_empty());
        assert_eq!(mapper.max_seen_scan_depth(), 0);
    }

    #[test]
    fn scan_roots_visits_every_slot() {
        let space = SimSpace::new();
        space.map_region(Range::from_base_last(0x1000, 0x1fff));

        let mut roots = Roots::new(space.null());
        roots.c[3] = space.cap(0x1000, 0x40, CapPerms::LOAD_CAPS);
        roots.csp = space.cap(0x1800, 0x100, CapPerms::LOAD_CAPS);

        let mut mapper = Mapper::new(space.vmmap());
        mapper.scan_roots(&roots);

        let named: Vec<_> = mapper.roots().map(|(name, _)| name.to_string()).collect();
        assert_eq!(named, vec!["c3", "csp"]);
        assert!(mapper
            .load_cap_map()
            .sparse_range()
            .includes(Range::from_base_last(0x1000, 0x103f)));
        assert!(mapper
            .load_cap_map()
            .sparse_range()
            .includes(Range::from_base_last(0x1800, 0x18ff)));
    }

    #[test]
    fn depth_zero_never_dereferences() {
        let space = SimSpace::new();
        space.map_region(Range::from_base_last(0x1000, 0x1fff));
        // A tagged capability in the middle; at depth zero it must never
        // be loaded, so the slot contents are irrelevant.
        space.store(0x1000, &space.cap(0x1_0000, 0x10, CapPerms::LOAD_CAPS));

        let mut mapper = Mapper::new(space.vmmap());
        mapper.set_max_scan_depth(0);
        mapper.scan(space.cap(0x1000, 0x100, CapPerms::LOAD_CAPS), "root");

        assert_eq!(mapper.max_seen_scan_depth(), 0);
        assert_eq!(
            mapper.load_cap_map().sparse_range().parts().collect::<Vec<_>>(),
            vec![Range::from_base_last(0x1000, 0x10ff)]
        );
    }
}
