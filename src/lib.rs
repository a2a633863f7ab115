// Copyright 2026. The capmap developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Build a capability map of a running CHERI process.
//!
//! Starting from a set of *root* capabilities (typically the live
//! capability registers of the current thread), a [`Mapper`] walks every
//! capability reachable by loading through capability-permitting memory
//! and offers each one to a set of classifier [`Map`]s: which regions are
//! loadable, storable, branchable, sealed with which types, and so on.
//! The result serializes to JSON.
//!
//! The walk is pruned by a [`SparseRange`] algebra: the mandatory
//! [`LoadCapMap`] records what has already been explored, so every
//! capability-sized word of memory is examined at most once and cycles in
//! the capability graph terminate naturally.
//!
//! Architecture access goes through the single [`Capability`] trait. On
//! machines without capability hardware the [`sim`] module provides a
//! software oracle, which is also what the test suite runs against.
//!
//! The scanner assumes a quiescent snapshot: it makes no attempt to
//! tolerate concurrent mutation of the memory it walks, and dereferencing
//! a capability to an unmapped page is a fault. The inclusion set exists
//! to keep the walk on mapped memory; see [`Mapper::new`].

mod cap;
mod maps;
mod mapper;
mod range;
mod report;
pub mod sim;
mod sparse;
pub mod vmquery;

pub use cap::{CapPerms, Capability, OType};
pub use maps::{BranchMap, LoadCapMap, LoadMap, Map, PermissionMap, PoisonMap};
pub use mapper::{Mapper, Roots};
pub use range::Range;
pub use report::Report;
pub use sparse::SparseRange;
