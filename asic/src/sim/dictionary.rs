// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! A fixed field dictionary standing in for the one generated by the P4
//! compiler.

use aal::ChipFamily;
use aal::FieldInfo;

use crate::chip::layout_for;

struct SimField {
    name: &'static str,
    offset: u32,
    width: u32,
    // First stage in which the field is part of the trigger key
    first_stage: u8,
}

const fn field(
    name: &'static str,
    offset: u32,
    width: u32,
    first_stage: u8,
) -> SimField {
    SimField {
        name,
        offset,
        width,
        first_stage,
    }
}

// Names are stored normalized.  The ipv6 addresses don't fit in the smaller
// Tofino1 key.
const FIELDS: &[SimField] = &[
    field("ingress_port", 0, 16, 0),
    field("egress_port", 16, 16, 0),
    field("hdr_ethernet_dst_addr", 32, 48, 0),
    field("hdr_ethernet_src_addr", 80, 48, 0),
    field("hdr_ethernet_ether_type", 128, 16, 0),
    field("hdr_ipv4_src_addr", 144, 32, 0),
    field("hdr_ipv4_dst_addr", 176, 32, 0),
    field("hdr_ipv4_protocol", 208, 8, 0),
    field("meta_route_hit", 216, 1, 3),
    field("hdr_ipv6_src_addr", 256, 128, 0),
    field("hdr_ipv6_dst_addr", 384, 128, 0),
];

pub(crate) fn resolve(
    family: ChipFamily,
    stage: u8,
    name: &str,
) -> Option<FieldInfo> {
    let key_bits = layout_for(family).trigger_key_words() * 32;
    FIELDS
        .iter()
        .find(|f| f.name == name)
        .filter(|f| stage >= f.first_stage)
        .filter(|f| (f.offset + f.width) as usize <= key_bits)
        .map(|f| FieldInfo {
            offset: f.offset,
            width: f.width,
        })
}

/// The names of every field the simulated program defines.
pub fn field_names() -> impl Iterator<Item = &'static str> {
    FIELDS.iter().map(|f| f.name)
}
