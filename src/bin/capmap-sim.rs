// Copyright 2026. The capmap developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Scan a small simulated process image and print the capability map.
//!
//! This is the no-hardware-needed counterpart of "harvest the registers,
//! scan, print": it wires up a stack, a heap object graph, and a code
//! region in a [`SimSpace`], then maps what a thread holding those
//! registers could reach.

use std::io;

use capmap::sim::SimSpace;
use capmap::{BranchMap, CapPerms, LoadMap, Mapper, PermissionMap, Range, Roots};

fn main() -> serde_json::Result<()> {
    let space = SimSpace::new();

    // The simulated OS view: a stack page, a heap page, a code page.
    let stack = Range::from_base_last(0x7fff_f000, 0x7fff_ffff);
    let heap = Range::from_base_last(0x2000_0000, 0x2000_3fff);
    let text = Range::from_base_last(0x0010_0000, 0x0010_ffff);
    space.map_region(stack);
    space.map_region(heap);
    space.map_region(text);

    let rw = CapPerms::LOAD | CapPerms::STORE | CapPerms::LOAD_CAP | CapPerms::STORE_CAP;

    // A heap object graph: a list node pointing at a buffer, both
    // reachable from a capability spilled to the stack.
    let buffer = space.cap(0x2000_1000, 0x200, rw);
    let node = space.cap(0x2000_0000, 0x40, rw);
    space.store(0x2000_0000, &buffer);
    space.store(0x7fff_f040, &node);

    // A function pointer (sentry) and a store-only scratch region, also
    // spilled to the stack.
    let entry = space.sentry(0x0010_1234, text.base(), 0x1_0000, CapPerms::LOAD | CapPerms::EXECUTE);
    let scratch = space.cap(0x2000_3000, 0x100, CapPerms::STORE | CapPerms::STORE_CAP);
    space.store(0x7fff_f050, &entry);
    space.store(0x7fff_f060, &scratch);

    let mut roots = Roots::new(space.null());
    roots.csp = space.cap(stack.base(), 0x1000, rw);
    roots.pcc = space.cap(text.base(), 0x1_0000, CapPerms::LOAD | CapPerms::EXECUTE);
    roots.c[0] = space.cap(0x2000_0000, 0x40, rw);

    let mut mapper = Mapper::new(space.vmmap());
    mapper.push_map(Box::new(LoadMap::new()));
    mapper.push_map(Box::new(BranchMap::new()));
    mapper.push_map(Box::new(PermissionMap::new(
        "store",
        "virtual memory",
        CapPerms::STORE,
    )));
    mapper.scan_roots(&roots);

    mapper.write_json(io::stdout().lock())?;
    println!();
    Ok(())
}
