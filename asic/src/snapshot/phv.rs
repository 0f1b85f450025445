// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Unpacking the captured packet header vector.
//!
//! The capture memory holds the PHV as packed 32-bit words: each container
//! class occupies a contiguous run of words starting at its `word_offset`,
//! with 16-bit containers two to a word and 8-bit containers four to a word,
//! lowest-numbered container in the low bits.  Validity is a separate
//! bitmap indexed by global container number.

use schemars::JsonSchema;
use serde::Serialize;

use aal::AsicError;
use aal::AsicResult;
use aal::ChipFamily;

use crate::chip::PhvClass;
use crate::chip::PhvLayout;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct PhvContainer<T> {
    pub value: T,
    pub valid: bool,
}

/// A decoded PHV, with one flat array per container width.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct Phv {
    pub family: ChipFamily,
    pub c32: Box<[PhvContainer<u32>]>,
    pub c16: Box<[PhvContainer<u16>]>,
    pub c8: Box<[PhvContainer<u8>]>,
}

fn is_valid(valid: &[u32], idx: usize) -> bool {
    (valid[idx / 32] >> (idx % 32)) & 1 == 1
}

fn unpack_class<T>(
    class: &PhvClass,
    data: &[u32],
    valid: &[u32],
    conv: impl Fn(u32) -> T,
) -> Box<[PhvContainer<T>]> {
    let per_word = class.per_word();
    let mask = match class.width {
        32 => u32::MAX,
        w => (1 << w) - 1,
    };
    (0..class.count)
        .map(|i| {
            let word = data[class.word_offset + i / per_word];
            let shift = (i % per_word) as u32 * class.width;
            PhvContainer {
                value: conv((word >> shift) & mask),
                valid: is_valid(valid, class.base + i),
            }
        })
        .collect()
}

fn pack_class<T: Copy>(
    class: &PhvClass,
    containers: &[PhvContainer<T>],
    data: &mut [u32],
    valid: &mut [u32],
    conv: impl Fn(T) -> u32,
) {
    let per_word = class.per_word();
    for (i, c) in containers.iter().enumerate().take(class.count) {
        let shift = (i % per_word) as u32 * class.width;
        data[class.word_offset + i / per_word] |= conv(c.value) << shift;
        if c.valid {
            let g = class.base + i;
            valid[g / 32] |= 1 << (g % 32);
        }
    }
}

impl Phv {
    /// Split the packed capture words into containers.
    pub fn unpack(
        family: ChipFamily,
        layout: &PhvLayout,
        data: &[u32],
        valid: &[u32],
    ) -> AsicResult<Phv> {
        if data.len() != layout.data_words()
            || valid.len() != layout.valid_words()
        {
            return Err(AsicError::Internal(format!(
                "PHV capture for {family} is {}+{} words, expected {}+{}",
                data.len(),
                valid.len(),
                layout.data_words(),
                layout.valid_words()
            )));
        }
        Ok(Phv {
            family,
            c32: unpack_class(&layout.c32, data, valid, |w| w),
            c16: unpack_class(&layout.c16, data, valid, |w| w as u16),
            c8: unpack_class(&layout.c8, data, valid, |w| w as u8),
        })
    }

    /// Build the packed capture words for this PHV.  This is the inverse of
    /// `unpack`, used to model the capture memory.
    pub fn pack(&self, layout: &PhvLayout) -> (Vec<u32>, Vec<u32>) {
        let mut data = vec![0u32; layout.data_words()];
        let mut valid = vec![0u32; layout.valid_words()];
        pack_class(&layout.c32, &self.c32, &mut data, &mut valid, |v| v);
        pack_class(&layout.c16, &self.c16, &mut data, &mut valid, u32::from);
        pack_class(&layout.c8, &self.c8, &mut data, &mut valid, u32::from);
        (data, valid)
    }

    pub fn containers(&self) -> usize {
        self.c32.len() + self.c16.len() + self.c8.len()
    }

    /// Are all of the containers valid?
    pub fn all_valid(&self) -> bool {
        self.c32.iter().all(|c| c.valid)
            && self.c16.iter().all(|c| c.valid)
            && self.c8.iter().all(|c| c.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::layout_for;

    #[test]
    fn test_unpack_tf1() {
        let layout = *layout_for(ChipFamily::Tofino1).phv();
        let mut data = vec![0u32; layout.data_words()];
        let mut valid = vec![0u32; layout.valid_words()];

        data[0] = 0xdead_beef; // c32[0]
        data[63] = 0x1234_5678; // c32[63]
        data[64] = 0x4433_2211; // c8[0..4]
        data[80] = 0xbbbb_aaaa; // c16[0..2]
        data[127] = 0x0002_0001; // c16[94..96]

        valid[0] = 1; // global 0 -> c32[0]
        valid[2] = 1 << 1; // global 65 -> c8[1]
        valid[4] = 1 << 1; // global 129 -> c16[1]

        let phv =
            Phv::unpack(ChipFamily::Tofino1, &layout, &data, &valid).unwrap();
        assert_eq!(phv.c32.len(), 64);
        assert_eq!(phv.c16.len(), 96);
        assert_eq!(phv.c8.len(), 64);

        assert_eq!(phv.c32[0].value, 0xdead_beef);
        assert!(phv.c32[0].valid);
        assert_eq!(phv.c32[63].value, 0x1234_5678);
        assert!(!phv.c32[63].valid);

        assert_eq!(phv.c8[0].value, 0x11);
        assert_eq!(phv.c8[1].value, 0x22);
        assert_eq!(phv.c8[3].value, 0x44);
        assert!(!phv.c8[0].valid);
        assert!(phv.c8[1].valid);

        assert_eq!(phv.c16[0].value, 0xaaaa);
        assert_eq!(phv.c16[1].value, 0xbbbb);
        assert!(phv.c16[1].valid);
        assert_eq!(phv.c16[94].value, 1);
        assert_eq!(phv.c16[95].value, 2);
    }

    // On tofino3 the 16-bit class precedes the 8-bit class in both the data
    // and the validity bitmap.
    #[test]
    fn test_unpack_tf3_order() {
        let layout = *layout_for(ChipFamily::Tofino3).phv();
        let mut data = vec![0u32; layout.data_words()];
        let mut valid = vec![0u32; layout.valid_words()];
        data[80] = 0x0000_5555; // c16[0]
        data[140] = 0x0000_0077; // c8[0]
        valid[80 / 32] |= 1 << (80 % 32); // c16[0]
        valid[200 / 32] |= 1 << (200 % 32); // c8[0]

        let phv =
            Phv::unpack(ChipFamily::Tofino3, &layout, &data, &valid).unwrap();
        assert_eq!(phv.c16[0], PhvContainer { value: 0x5555, valid: true });
        assert_eq!(phv.c8[0], PhvContainer { value: 0x77, valid: true });
        assert!(!phv.c32[0].valid);
    }

    #[test]
    fn test_unpack_bad_length() {
        let layout = *layout_for(ChipFamily::Tofino2).phv();
        let data = vec![0u32; layout.data_words() - 1];
        let valid = vec![0u32; layout.valid_words()];
        assert!(Phv::unpack(ChipFamily::Tofino2, &layout, &data, &valid)
            .is_err());
    }

    #[test]
    fn test_pack() {
        let layout = *layout_for(ChipFamily::Tofino2).phv();
        let phv = Phv {
            family: ChipFamily::Tofino2,
            c32: (0..80u32)
                .map(|i| PhvContainer { value: i << 20, valid: true })
                .collect(),
            c16: (0..120u16)
                .map(|i| PhvContainer { value: i * 3, valid: i % 2 == 0 })
                .collect(),
            c8: (0..80u8)
                .map(|i| PhvContainer { value: i, valid: false })
                .collect(),
        };
        let (data, valid) = phv.pack(&layout);
        assert_eq!(data[1], 1 << 20);
        // c8[4..8] share word 80 + 1
        assert_eq!(data[81], 0x0706_0504);
        // c16[2..4] share word 100 + 1
        assert_eq!(data[101], (9 << 16) | 6);
        assert_eq!(valid[0], u32::MAX);
        assert_eq!(
            Phv::unpack(ChipFamily::Tofino2, &layout, &data, &valid).unwrap(),
            phv
        );
    }
}
