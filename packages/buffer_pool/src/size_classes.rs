use std::num::NonZero;

use new_zealand::nz;

use crate::{Error, Result};

/// The largest number of size classes a single pool can be divided into.
pub const MAX_SLOTS: NonZero<usize> = nz!(256);

/// Divides an inclusive range of buffer sizes into contiguous, equally wide size classes.
///
/// Each size class (slot) serves all sizes in `[min_size + i * step, min_size + (i + 1) * step)`
/// with blocks whose capacity is the largest size in that interval. The capacity of the last
/// slot may exceed `max_size` because the range is not always evenly divisible.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct SizeClasses {
    min_size: usize,
    max_size: usize,

    /// Width of every size class in bytes.
    step: NonZero<usize>,

    /// Block capacity served by each slot. Strictly increasing, never empty.
    capacities: Vec<usize>,
}

impl SizeClasses {
    /// Computes the size classes for `[min_size, max_size]` using at most `requested_slots`
    /// classes. Fewer classes are used if the range contains fewer distinct sizes.
    pub(crate) fn new(min_size: usize, max_size: usize, requested_slots: usize) -> Result<Self> {
        if min_size > max_size {
            return Err(Error::InvalidRange { min_size, max_size });
        }

        if requested_slots == 0 || requested_slots > MAX_SLOTS.get() {
            return Err(Error::InvalidSlotCount {
                requested: requested_slots,
                max: MAX_SLOTS.get(),
            });
        }

        // Cannot wrap because we just verified min_size <= max_size.
        //
        // The number of distinct sizes is span + 1, which would overflow for a range covering
        // all of usize, so the calculations below are expressed in terms of the span instead.
        let span = max_size.wrapping_sub(min_size);

        let slot_count = if span < requested_slots {
            // Cannot overflow because span < requested_slots <= MAX_SLOTS.
            span.wrapping_add(1)
        } else {
            requested_slots
        };

        // ceil((span + 1) / slot_count) == span / slot_count + 1 for any span.
        // Adding one only overflows for a single slot spanning all of usize.
        #[expect(
            clippy::integer_division,
            reason = "floor division is the intent, the ceiling is restored by adding one"
        )]
        #[expect(
            clippy::arithmetic_side_effects,
            reason = "slot_count is never zero at this point"
        )]
        let quotient = span / slot_count;

        let step = quotient
            .checked_add(1)
            .and_then(NonZero::new)
            .ok_or(Error::CapacityOverflow {
                capacity: usize::MAX,
            })?;

        let capacities = (0..slot_count)
            .map(|index| {
                index
                    .checked_mul(step.get())
                    .and_then(|offset| offset.checked_add(min_size))
                    .and_then(|start| start.checked_add(step.get().wrapping_sub(1)))
                    .ok_or(Error::CapacityOverflow {
                        capacity: usize::MAX,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            min_size,
            max_size,
            step,
            capacities,
        })
    }

    #[must_use]
    pub(crate) fn min_size(&self) -> usize {
        self.min_size
    }

    #[must_use]
    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    #[must_use]
    pub(crate) fn step(&self) -> NonZero<usize> {
        self.step
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.capacities.len()
    }

    #[must_use]
    pub(crate) fn capacities(&self) -> &[usize] {
        &self.capacities
    }

    #[must_use]
    pub(crate) fn capacity(&self, index: usize) -> Option<usize> {
        self.capacities.get(index).copied()
    }

    /// Returns the index of the size class that serves `size`, or `None` if `size` is
    /// outside the configured range.
    #[must_use]
    pub(crate) fn index_of(&self, size: usize) -> Option<usize> {
        if size < self.min_size || size > self.max_size {
            return None;
        }

        // Cannot wrap because we just verified size >= min_size.
        let offset = size.wrapping_sub(self.min_size);

        #[expect(
            clippy::integer_division,
            reason = "flooring to the containing size class is the intent"
        )]
        let index = offset / self.step;

        debug_assert!(index < self.capacities.len());

        Some(index)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use super::*;

    fn assert_covers_range(classes: &SizeClasses) {
        for size in classes.min_size()..=classes.max_size() {
            let index = classes.index_of(size).expect("size is within range");
            assert!(index < classes.len(), "size {size} mapped to index {index}");
            assert!(
                classes.capacities()[index] >= size,
                "size {size} mapped to slot {index} with capacity {}",
                classes.capacities()[index]
            );
        }
    }

    fn assert_strictly_increasing(classes: &SizeClasses) {
        for pair in classes.capacities().windows(2) {
            assert!(pair[0] < pair[1], "capacities not increasing: {pair:?}");
        }

        assert!(*classes.capacities().last().unwrap() >= classes.max_size());
    }

    #[test]
    fn network_packet_range() {
        let classes = SizeClasses::new(100, 1500, 10).unwrap();

        assert_eq!(classes.len(), 10);
        assert_eq!(classes.step().get(), 141);
        assert_eq!(classes.capacity(0), Some(240));
        assert_eq!(classes.capacity(9), Some(1509));
        assert_eq!(classes.capacity(10), None);

        assert_covers_range(&classes);
        assert_strictly_increasing(&classes);
    }

    #[test]
    fn range_edges_map_to_first_and_last_slot() {
        let classes = SizeClasses::new(100, 1500, 10).unwrap();

        assert_eq!(classes.index_of(100), Some(0));
        assert_eq!(classes.index_of(240), Some(0));
        assert_eq!(classes.index_of(241), Some(1));
        assert_eq!(classes.index_of(1500), Some(9));
    }

    #[test]
    fn out_of_range_has_no_index() {
        let classes = SizeClasses::new(100, 1500, 10).unwrap();

        assert_eq!(classes.index_of(99), None);
        assert_eq!(classes.index_of(1501), None);
        assert_eq!(classes.index_of(0), None);
        assert_eq!(classes.index_of(usize::MAX), None);
    }

    #[test]
    fn slot_count_limited_by_distinct_sizes() {
        let classes = SizeClasses::new(10, 14, 200).unwrap();

        assert_eq!(classes.len(), 5);
        assert_eq!(classes.step().get(), 1);
        assert_eq!(classes.capacities(), &[10, 11, 12, 13, 14]);

        assert_covers_range(&classes);
    }

    #[test]
    fn single_size_range() {
        let classes = SizeClasses::new(64, 64, 16).unwrap();

        assert_eq!(classes.len(), 1);
        assert_eq!(classes.capacities(), &[64]);
        assert_eq!(classes.index_of(64), Some(0));
    }

    #[test]
    fn single_slot_covers_whole_range() {
        let classes = SizeClasses::new(1, 1000, 1).unwrap();

        assert_eq!(classes.len(), 1);
        assert_eq!(classes.capacities(), &[1000]);
        assert_covers_range(&classes);
    }

    #[test]
    fn uneven_division_rounds_step_up() {
        // 11 distinct sizes over 4 slots needs a step of 3.
        let classes = SizeClasses::new(0, 10, 4).unwrap();

        assert_eq!(classes.step().get(), 3);
        assert_eq!(classes.capacities(), &[2, 5, 8, 11]);
        assert_covers_range(&classes);
        assert_strictly_increasing(&classes);
    }

    #[test]
    fn coverage_holds_across_many_configurations() {
        for min_size in [0_usize, 1, 7, 100] {
            for width in [0_usize, 1, 2, 15, 255, 256, 257, 1000] {
                for slots in [1_usize, 2, 3, 10, 255, 256] {
                    let classes = SizeClasses::new(min_size, min_size + width, slots).unwrap();

                    assert!(classes.len() <= slots);
                    assert!(classes.len() <= width + 1);
                    assert_covers_range(&classes);
                    assert_strictly_increasing(&classes);
                }
            }
        }
    }

    #[test]
    fn min_greater_than_max_is_rejected() {
        let result = SizeClasses::new(10, 5, 1);

        assert!(matches!(
            result,
            Err(Error::InvalidRange {
                min_size: 10,
                max_size: 5
            })
        ));
    }

    #[test]
    fn zero_slots_is_rejected() {
        let result = SizeClasses::new(100, 1500, 0);

        assert!(matches!(
            result,
            Err(Error::InvalidSlotCount { requested: 0, .. })
        ));
    }

    #[test]
    fn too_many_slots_is_rejected() {
        let result = SizeClasses::new(100, 1500, MAX_SLOTS.get() + 1);

        assert!(matches!(
            result,
            Err(Error::InvalidSlotCount {
                requested: 257,
                max: 256
            })
        ));

        SizeClasses::new(100, 1500, MAX_SLOTS.get()).unwrap();
    }

    #[test]
    fn full_width_range_does_not_overflow_step() {
        let result = SizeClasses::new(0, usize::MAX, 1);

        assert!(matches!(result, Err(Error::CapacityOverflow { .. })));
    }

    #[test]
    fn wide_range_reports_overflowing_capacity() {
        // The last slot would have to extend beyond usize::MAX.
        let result = SizeClasses::new(usize::MAX - 10, usize::MAX, 4);

        assert!(matches!(result, Err(Error::CapacityOverflow { .. })));
    }
}
