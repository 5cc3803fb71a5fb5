//! Batched vector codec: packs values into fixed-width slots and back.
//!
//! Values are grouped `values_per_slot` at a time. Within a group, value `i`
//! is shifted to bit offset `i · element_width`:
//!
//! ```text
//!   slot k (slot_width bits, low-order lane first)
//!   ┌──────────┬───────────────┬───────────────┬───────────────┐
//!   │  unused  │ v[3k+2]       │ v[3k+1]       │ v[3k]         │
//!   └──────────┴───────────────┴───────────────┴───────────────┘
//!               ◄ element_w ►   ◄ element_w ►   ◄ element_w ►
//! ```
//!
//! Each lane carries `headroom_bits` of zero padding above the value, which
//! absorbs the carries of up to `max_additions` slot-wise additions.

use rayon::prelude::*;
use tracing::trace;

use crate::{
    error::{Error, Result},
    params::{EncodingLayout, EncodingParameters, Slot, Value},
};

/// Below this many values the codec stays on the calling thread.
const PARALLEL_MIN_VALUES: usize = 1 << 14;

/// Immutable codec; `encode` and `decode` are pure and thread-safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchedCodec {
    layout: EncodingLayout,
}

impl BatchedCodec {
    pub fn new(params: EncodingParameters) -> Result<Self> {
        Ok(Self {
            layout: params.layout()?,
        })
    }

    pub fn layout(&self) -> &EncodingLayout {
        &self.layout
    }

    pub fn params(&self) -> &EncodingParameters {
        &self.layout.params
    }

    /// Number of slots in every encoded vector
    pub fn slot_count(&self) -> usize {
        self.layout.slot_count
    }

    /// Pack `values` into `slot_count` slots.
    ///
    /// Inputs shorter than `vector_length` are padded with zeros; longer
    /// inputs are a [`Error::Shape`]. A value outside `[0, 2^value_width)`
    /// is a [`Error::Range`] and nothing is packed.
    pub fn encode(&self, values: &[Value]) -> Result<Vec<Slot>> {
        let layout = &self.layout;
        if values.len() > layout.params.vector_length {
            return Err(Error::Shape(format!(
                "expected at most {} values, got {}",
                layout.params.vector_length,
                values.len()
            )));
        }

        let vps = layout.values_per_slot;
        let mut slots: Vec<Slot> = if values.len() >= PARALLEL_MIN_VALUES {
            values
                .par_chunks(vps)
                .enumerate()
                .map(|(k, group)| self.pack(k * vps, group))
                .collect::<Result<_>>()?
        } else {
            values
                .chunks(vps)
                .enumerate()
                .map(|(k, group)| self.pack(k * vps, group))
                .collect::<Result<_>>()?
        };

        // Missing trailing values are zero lanes, i.e. zero slots
        slots.resize(layout.slot_count, 0);

        trace!(values = values.len(), slots = slots.len(), "encoded vector");
        Ok(slots)
    }

    /// Unpack exactly `vector_length` values from `slot_count` slots.
    ///
    /// Every slot but the last yields `values_per_slot` lanes; the last yields
    /// the remainder. Zero lanes are therefore returned as zeros rather than
    /// dropped. Slots may hold aggregated sums of up to `max_additions`
    /// encoded vectors.
    pub fn decode(&self, slots: &[Slot]) -> Result<Vec<Value>> {
        let layout = &self.layout;
        if slots.len() != layout.slot_count {
            return Err(Error::Shape(format!(
                "expected {} slots, got {}",
                layout.slot_count,
                slots.len()
            )));
        }

        let vps = layout.values_per_slot;
        let mut values = vec![0; layout.params.vector_length];
        if values.len() >= PARALLEL_MIN_VALUES {
            values
                .par_chunks_mut(vps)
                .zip(slots.par_iter())
                .enumerate()
                .try_for_each(|(k, (lanes, &slot))| self.unpack(k, slot, lanes))?;
        } else {
            values
                .chunks_mut(vps)
                .zip(slots)
                .enumerate()
                .try_for_each(|(k, (lanes, &slot))| self.unpack(k, slot, lanes))?;
        }

        trace!(slots = slots.len(), values = values.len(), "decoded vector");
        Ok(values)
    }

    /// Add `other` into `acc` slot by slot, as the aggregation primitive does
    /// under encryption.
    ///
    /// Fails if either side is not `slot_count` long or a sum leaves
    /// `[0, 2^slot_width)`; `acc` is left untouched on failure.
    pub fn aggregate(&self, acc: &mut [Slot], other: &[Slot]) -> Result<()> {
        let layout = &self.layout;
        if acc.len() != layout.slot_count || other.len() != layout.slot_count {
            return Err(Error::Shape(format!(
                "cannot aggregate {} slots with {} slots (expected {})",
                acc.len(),
                other.len(),
                layout.slot_count
            )));
        }

        let sums = acc
            .iter()
            .zip(other)
            .enumerate()
            .map(|(k, (&a, &b))| {
                a.checked_add(b)
                    .filter(|&sum| layout.fits_slot(sum))
                    .ok_or_else(|| {
                        Error::Shape(format!(
                            "slot {k} overflows {} bits after aggregation",
                            layout.params.slot_width
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        acc.copy_from_slice(&sums);
        Ok(())
    }

    /// Pack one group; `first` is the vector index of `group[0]`.
    fn pack(&self, first: usize, group: &[Value]) -> Result<Slot> {
        let max_value = self.layout.max_value();
        let width = self.layout.element_width as usize;

        let mut slot: Slot = 0;
        for (i, &value) in group.iter().enumerate() {
            if value > max_value {
                return Err(Error::Range {
                    index: first + i,
                    value,
                    value_width: self.layout.params.value_width,
                });
            }
            slot |= (value as Slot) << (i * width);
        }
        Ok(slot)
    }

    /// Unpack slot `k` into `lanes`, rejecting bits above its last lane.
    fn unpack(&self, k: usize, slot: Slot, lanes: &mut [Value]) -> Result<()> {
        let layout = &self.layout;
        if !layout.fits_slot(slot) {
            return Err(Error::Shape(format!(
                "slot {k} does not fit in {} bits",
                layout.params.slot_width
            )));
        }

        let width = layout.element_width as usize;
        let mask = layout.lane_mask();
        for (i, lane) in lanes.iter_mut().enumerate() {
            *lane = ((slot >> (i * width)) & mask) as Value;
        }

        // Anything above the packed lanes means a lane overflowed or the
        // slot was not produced by this layout
        let used_bits = lanes.len() * width;
        if used_bits < Slot::BITS as usize && slot >> used_bits != 0 {
            return Err(Error::Shape(format!(
                "slot {k} has bits set above its {} packed lanes",
                lanes.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_codec() -> BatchedCodec {
        BatchedCodec::new(EncodingParameters::new(64, 4, 16, 7)).unwrap()
    }

    #[test]
    fn test_encode_literal_example() {
        let codec = example_codec();
        let slots = codec.encode(&[1, 2, 3, 4, 5, 6, 7]).unwrap();

        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0], 1 + (2 << 18) + (3 << 36));
        assert_eq!(slots[1], 4 + (5 << 18) + (6 << 36));
        assert_eq!(slots[2], 7);

        assert_eq!(codec.decode(&slots).unwrap(), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_zero_lanes_survive_decode() {
        let codec = example_codec();
        let values = vec![5, 0, 0, 0, 0, 9, 0];
        let slots = codec.encode(&values).unwrap();
        assert_eq!(slots[1], 9 << 36);
        assert_eq!(slots[2], 0);
        assert_eq!(codec.decode(&slots).unwrap(), values);
    }

    #[test]
    fn test_short_input_is_zero_padded() {
        let codec = example_codec();
        let slots = codec.encode(&[1, 2, 3, 4]).unwrap();
        assert_eq!(slots, vec![1 + (2 << 18) + (3 << 36), 4, 0]);
        assert_eq!(codec.decode(&slots).unwrap(), vec![1, 2, 3, 4, 0, 0, 0]);

        let empty = codec.encode(&[]).unwrap();
        assert_eq!(empty, vec![0; 3]);
    }

    #[test]
    fn test_encode_rejects_long_input() {
        let codec = example_codec();
        let err = codec.encode(&[1; 8]).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let codec = example_codec();
        let err = codec.encode(&[1, 2, 3, 4, 0x1_0000, 6, 7]).unwrap_err();
        assert_eq!(
            err,
            Error::Range {
                index: 4,
                value: 0x1_0000,
                value_width: 16
            }
        );
        // Largest in-range value is accepted
        assert!(codec.encode(&[0xFFFF; 7]).is_ok());
    }

    #[test]
    fn test_decode_rejects_wrong_slot_count() {
        let codec = example_codec();
        assert!(matches!(codec.decode(&[1, 2]), Err(Error::Shape(_))));
        assert!(matches!(codec.decode(&[1, 2, 3, 4]), Err(Error::Shape(_))));
    }

    #[test]
    fn test_decode_rejects_oversized_slot() {
        let codec = example_codec();
        let err = codec.decode(&[1 << 64, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn test_decode_rejects_bits_above_lanes() {
        let codec = example_codec();
        // Three 18-bit lanes use 54 bits; bit 60 is outside every lane
        assert!(matches!(codec.decode(&[1 << 60, 0, 0]), Err(Error::Shape(_))));
        // The final slot carries one lane only
        assert!(matches!(codec.decode(&[0, 0, 1 << 18]), Err(Error::Shape(_))));
    }

    #[test]
    fn test_aggregate_up_to_max_additions() {
        let codec = example_codec();
        let values: Vec<Value> = vec![0xFFFF, 1, 0xFFFF, 2, 0xFFFF, 3, 0xFFFF];

        let mut acc = codec.encode(&values).unwrap();
        for _ in 1..4 {
            let slots = codec.encode(&values).unwrap();
            codec.aggregate(&mut acc, &slots).unwrap();
        }

        let expected: Vec<Value> = values.iter().map(|v| v * 4).collect();
        assert_eq!(codec.decode(&acc).unwrap(), expected);
        assert!(expected.iter().all(|&v| v <= codec.layout().max_lane_value()));
    }

    #[test]
    fn test_aggregate_rejects_mismatched_lengths() {
        let codec = example_codec();
        let mut acc = vec![0; 3];
        let err = codec.aggregate(&mut acc, &[1, 2]).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
        assert_eq!(acc, vec![0; 3]);
    }

    #[test]
    fn test_aggregate_rejects_slot_overflow() {
        let codec = BatchedCodec::new(EncodingParameters::new(16, 2, 7, 2)).unwrap();
        assert_eq!(codec.layout().values_per_slot, 2);

        let mut acc = vec![0xFFFF];
        let err = codec.aggregate(&mut acc, &[1]).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
        assert_eq!(acc, vec![0xFFFF]);
    }

    #[test]
    fn test_full_width_slots() {
        let codec = BatchedCodec::new(EncodingParameters::new(128, 1, 64, 3)).unwrap();
        let values = vec![u64::MAX, 0, u64::MAX];
        let slots = codec.encode(&values).unwrap();
        assert_eq!(slots, vec![Slot::from(u64::MAX), Slot::from(u64::MAX)]);
        assert_eq!(codec.decode(&slots).unwrap(), values);
    }

    #[test]
    fn test_parallel_path_matches_sequential() {
        let len = PARALLEL_MIN_VALUES * 2 + 5;
        let codec = BatchedCodec::new(EncodingParameters::new(64, 4, 16, len)).unwrap();
        let values: Vec<Value> = (0..len as u64).map(|i| i % 0x1_0000).collect();

        let slots = codec.encode(&values).unwrap();
        assert_eq!(slots.len(), len.div_ceil(3));

        let sequential: Vec<Slot> = values
            .chunks(3)
            .enumerate()
            .map(|(k, group)| codec.pack(k * 3, group).unwrap())
            .collect();
        assert_eq!(slots, sequential);
        assert_eq!(codec.decode(&slots).unwrap(), values);
    }

    #[test]
    fn test_parallel_path_reports_range_error() {
        let len = PARALLEL_MIN_VALUES + 1;
        let codec = BatchedCodec::new(EncodingParameters::new(64, 4, 16, len)).unwrap();
        let mut values = vec![1; len];
        values[len - 1] = 1 << 16;
        assert!(matches!(
            codec.encode(&values),
            Err(Error::Range { index, .. }) if index == len - 1
        ));
    }
}
