// SPDX-License-Identifier: MPL-2.0

//! Translation between legacy line numbers and vectors.

use crate::{
    layout::{IrqLayout, IrqNum},
    prelude::*,
};

/// The legacy-to-vector translation of a platform and its inverse.
///
/// Lines outside the legacy range translate to themselves.
/// The map is built once by [`LegacyMap::new`] and is immutable afterwards.
#[derive(Debug)]
pub struct LegacyMap {
    to_vector: &'static [IrqNum],
    to_legacy: Box<[IrqNum]>,
}

impl LegacyMap {
    /// Builds the reverse map from the forward table of `layout`.
    ///
    /// # Panics
    ///
    /// The forward table is a build-time constant, so any inconsistency in it
    /// is fatal: a vector beyond `nr_irqs`, two legacy lines sharing one vector,
    /// or a legacy line translated into another legacy line.
    pub fn new(layout: &IrqLayout) -> Self {
        let nr_legacy = layout.nr_legacy();
        let mut to_legacy: Box<[IrqNum]> = (0..layout.nr_irqs).collect();
        let mut taken: Vec<bool> = alloc::vec![false; layout.nr_irqs];

        for (legacy, &vector) in layout.legacy_vectors.iter().enumerate() {
            assert!(
                vector < layout.nr_irqs,
                "legacy IRQ {} maps to vector {:#x} beyond {} IRQs",
                legacy,
                vector,
                layout.nr_irqs
            );
            assert!(
                !taken[vector],
                "legacy IRQ {} maps to vector {:#x}, which is already taken",
                legacy,
                vector
            );
            assert!(
                vector >= nr_legacy || vector == legacy,
                "legacy IRQ {} maps into legacy IRQ {}",
                legacy,
                vector
            );
            taken[vector] = true;
            to_legacy[vector] = legacy;
        }

        Self {
            to_vector: layout.legacy_vectors,
            to_legacy,
        }
    }

    /// Translates a legacy line to its vector.
    ///
    /// Lines outside the legacy range are returned unchanged.
    pub fn to_vector(&self, line: IrqNum) -> IrqNum {
        self.to_vector.get(line).copied().unwrap_or(line)
    }

    /// Translates a vector back to the legacy line that maps to it.
    ///
    /// Vectors that no legacy line maps to are returned unchanged.
    pub fn to_legacy(&self, vector: IrqNum) -> IrqNum {
        self.to_legacy.get(vector).copied().unwrap_or(vector)
    }

    /// Returns the first line past the legacy range.
    pub fn first_vectored(&self) -> IrqNum {
        self.to_vector.len()
    }

    /// Returns whether `line` is in the legacy range.
    pub fn is_legacy(&self, line: IrqNum) -> bool {
        line < self.to_vector.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::TEST_LAYOUT;

    #[test]
    fn non_legacy_lines_map_to_themselves() {
        let map = LegacyMap::new(&TEST_LAYOUT);
        for line in map.first_vectored()..TEST_LAYOUT.nr_irqs {
            assert_eq!(map.to_vector(line), line);
        }
        assert_eq!(map.to_vector(TEST_LAYOUT.nr_irqs + 3), TEST_LAYOUT.nr_irqs + 3);
    }

    #[test]
    fn legacy_lines_round_trip() {
        let map = LegacyMap::new(&TEST_LAYOUT);
        for line in 0..map.first_vectored() {
            let vector = map.to_vector(line);
            assert_eq!(map.to_vector(line), vector);
            assert_eq!(map.to_legacy(vector), line);
        }
        assert_eq!(map.to_vector(0), 0x30);
        assert_eq!(map.to_legacy(0x30), 0);
    }

    #[test]
    fn ia64_isa_lines() {
        let map = LegacyMap::new(&IrqLayout::IA64);
        assert_eq!(map.first_vectored(), 16);
        assert_eq!(map.to_vector(0), 0x2f);
        assert_eq!(map.to_vector(1), 0x20);
        assert_eq!(map.to_legacy(0x21), 15);
        assert!(map.is_legacy(15));
        assert!(!map.is_legacy(16));
    }

    #[test]
    #[should_panic(expected = "already taken")]
    fn duplicate_vectors_are_fatal() {
        static VECTORS: [IrqNum; 2] = [0x20, 0x20];
        let layout = IrqLayout {
            legacy_vectors: &VECTORS,
            ..TEST_LAYOUT
        };
        let _ = LegacyMap::new(&layout);
    }

    #[test]
    #[should_panic(expected = "beyond")]
    fn out_of_range_vectors_are_fatal() {
        static VECTORS: [IrqNum; 1] = [0x400];
        let layout = IrqLayout {
            legacy_vectors: &VECTORS,
            ..TEST_LAYOUT
        };
        let _ = LegacyMap::new(&layout);
    }
}
