// Copyright 2026. The capmap developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The OS virtual-memory query used to seed the default inclusion set.
//!
//! Only CheriBSD has pages with capability-read protection, so the query
//! is only available on FreeBSD targets; elsewhere this module offers just
//! the error type and embedders seed the inclusion set themselves (the
//! simulator exposes [`vmmap`][crate::sim::SimSpace::vmmap] for that).

#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// The virtual-memory query was refused by the OS
    Io(#[from] std::io::Error),
}

/// All mapped regions of the current process from which capabilities could
/// be loaded, at the page-table level: pages protected both readable and
/// capability-readable.
#[cfg(target_os = "freebsd")]
pub fn read_cap_mappings() -> Result<crate::SparseRange, Error> {
    use crate::{Range, SparseRange};

    // CheriBSD extends the kinfo protection bits; these are not in the
    // stock sys/user.h and so not in the libc crate.
    const KVME_PROT_READ: libc::c_int = 0x1;
    const KVME_PROT_READ_CAP: libc::c_int = 0x10;
    const WANTED: libc::c_int = KVME_PROT_READ | KVME_PROT_READ_CAP;

    // Safety: kinfo_getvmmap allocates a buffer of `count` entries for the
    // given pid, or returns null; the buffer is owned by us and must be
    // released with free().
    unsafe {
        let mut count: libc::c_int = 0;
        let entries = libc::kinfo_getvmmap(libc::getpid(), &mut count);
        if entries.is_null() {
            return Err(std::io::Error::last_os_error().into());
        }

        let mut map = SparseRange::new();
        for i in 0..count as usize {
            let entry = &*entries.add(i);
            if entry.kve_protection & WANTED == WANTED {
                map.combine(Range::from_base_limit(
                    entry.kve_start as u64,
                    entry.kve_end as u64,
                ));
            }
        }

        libc::free(entries.cast());
        Ok(map)
    }
}
