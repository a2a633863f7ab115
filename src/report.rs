// Copyright 2026. The capmap developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! JSON serialization of a [`Mapper`]'s state.
//!
//! Purely a serializer; no decisions. Addresses render as `0x`-prefixed
//! lowercase hex strings (raw hex literals would not be valid JSON), and
//! root capabilities dump as `0x<tag>:<high>:<low>`. The output is stable
//! enough for golden-file comparison but is not a versioned wire format.

use std::io;

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

use crate::cap::Capability;
use crate::mapper::Mapper;
use crate::sparse::SparseRange;

/// A serializable view of a [`Mapper`].
///
/// Obtained from [`Mapper::report`]; hand it to any serde serializer, or
/// use [`Mapper::write_json`] for the common case.
pub struct Report<'a, C: Capability> {
    mapper: &'a Mapper<C>,
}

impl<C: Capability> Mapper<C> {
    pub fn report(&self) -> Report<'_, C> {
        Report { mapper: self }
    }

    /// Write the report as pretty-printed JSON to `sink`.
    pub fn write_json<W: io::Write>(&self, sink: W) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(sink, &self.report())
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.report())
    }
}

impl<C: Capability> Serialize for Report<'_, C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut top = serializer.serialize_map(Some(1))?;
        top.serialize_entry("capmap", &Body { mapper: self.mapper })?;
        top.end()
    }
}

struct Body<'a, C: Capability> {
    mapper: &'a Mapper<C>,
}

impl<C: Capability> Serialize for Body<'_, C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut body = serializer.serialize_struct("capmap", 3)?;
        body.serialize_field("roots", &RootsJson { mapper: self.mapper })?;
        body.serialize_field(
            "scan",
            &ScanJson {
                include: Parts(self.mapper.include()),
                exclude: Parts(self.mapper.exclude_self()),
                depth: self.mapper.max_seen_scan_depth(),
            },
        )?;
        body.serialize_field("maps", &MapsJson { mapper: self.mapper })?;
        body.end()
    }
}

struct RootsJson<'a, C: Capability> {
    mapper: &'a Mapper<C>,
}

impl<C: Capability> Serialize for RootsJson<'_, C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (name, cap) in self.mapper.roots() {
            let (hi, lo) = cap.raw_parts();
            map.serialize_entry(name, &format!("0x{}:{hi:x}:{lo:x}", u8::from(cap.tag())))?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct ScanJson<'a> {
    include: Parts<'a>,
    exclude: Parts<'a>,
    depth: u64,
}

struct MapsJson<'a, C: Capability> {
    mapper: &'a Mapper<C>,
}

impl<C: Capability> Serialize for MapsJson<'_, C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let load_cap_map: &dyn crate::maps::Map<C> = self.mapper.load_cap_map();
        let mut maps = serializer.serialize_map(Some(1 + self.mapper.maps().len()))?;
        maps.serialize_entry(
            load_cap_map.name(),
            &MapJson {
                address_space: load_cap_map.address_space(),
                ranges: Parts(load_cap_map.ranges()),
            },
        )?;
        for map in self.mapper.maps() {
            maps.serialize_entry(
                map.name(),
                &MapJson {
                    address_space: map.address_space(),
                    ranges: Parts(map.ranges()),
                },
            )?;
        }
        maps.end()
    }
}

#[derive(Serialize)]
struct MapJson<'a> {
    #[serde(rename = "address-space")]
    address_space: &'a str,
    ranges: Parts<'a>,
}

struct Parts<'a>(&'a SparseRange);

impl Serialize for Parts<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.parts().map(|part| PartJson {
            base: Hex(part.base()),
            last: Hex(part.last()),
        }))
    }
}

#[derive(Serialize)]
struct PartJson {
    base: Hex,
    last: Hex,
}

struct Hex(u64);

impl Serialize for Hex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{:#x}", self.0))
    }
}
