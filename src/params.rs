use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Native integer holding one plaintext slot.
pub type Slot = u128;

/// Native integer holding one (possibly aggregated) value.
pub type Value = u64;

/// Caller-supplied encoding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingParameters {
    pub slot_width: u32,      // Bits per plaintext slot (≤ 128)
    pub max_additions: u64,   // Vectors summed into one slot before decoding
    pub value_width: u32,     // Bits per raw input value
    pub vector_length: usize, // Values per encoded vector
}

impl Default for EncodingParameters {
    /// 64-bit slots, 16-bit values, up to 1024 parties, 2^17 values.
    fn default() -> Self {
        Self {
            slot_width: 64,
            max_additions: 1024,
            value_width: 16,
            vector_length: 1 << 17,
        }
    }
}

impl EncodingParameters {
    pub fn new(
        slot_width: u32,
        max_additions: u64,
        value_width: u32,
        vector_length: usize,
    ) -> Self {
        Self {
            slot_width,
            max_additions,
            value_width,
            vector_length,
        }
    }

    pub fn with_slot_width(mut self, slot_width: u32) -> Self {
        self.slot_width = slot_width;
        self
    }

    pub fn with_max_additions(mut self, max_additions: u64) -> Self {
        self.max_additions = max_additions;
        self
    }

    pub fn with_value_width(mut self, value_width: u32) -> Self {
        self.value_width = value_width;
        self
    }

    pub fn with_vector_length(mut self, vector_length: usize) -> Self {
        self.vector_length = vector_length;
        self
    }

    /// Derive the slot layout, rejecting parameters that cannot hold one lane.
    pub fn layout(&self) -> Result<EncodingLayout> {
        EncodingLayout::new(*self)
    }
}

/// Bits needed to absorb `max_additions` summands: ⌈log2(max_additions)⌉.
pub fn headroom_bits(max_additions: u64) -> u32 {
    // ⌈log2 m⌉ = bit length of (m - 1)
    u64::BITS - max_additions.saturating_sub(1).leading_zeros()
}

/// Slot layout derived once from [`EncodingParameters`].
///
/// Lane `i` of a slot occupies bits `[i·element_width, (i+1)·element_width)`.
/// Every lane is wide enough to hold the sum of `max_additions` raw values,
/// so slot-wise integer addition never carries from one lane into the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingLayout {
    pub params: EncodingParameters,
    pub headroom_bits: u32,
    pub element_width: u32,
    pub values_per_slot: usize,
    pub slot_count: usize,
}

impl EncodingLayout {
    pub fn new(params: EncodingParameters) -> Result<Self> {
        let EncodingParameters {
            slot_width,
            max_additions,
            value_width,
            vector_length,
        } = params;

        if slot_width == 0 || slot_width > Slot::BITS {
            return Err(Error::Configuration(format!(
                "slot_width must be in 1..={}, got {slot_width}",
                Slot::BITS
            )));
        }
        if max_additions < 1 {
            return Err(Error::Configuration(
                "max_additions must be at least 1".to_string(),
            ));
        }
        if value_width == 0 || value_width > Value::BITS {
            return Err(Error::Configuration(format!(
                "value_width must be in 1..={}, got {value_width}",
                Value::BITS
            )));
        }
        if vector_length == 0 {
            return Err(Error::Configuration(
                "vector_length must be positive".to_string(),
            ));
        }

        let headroom_bits = headroom_bits(max_additions);
        let element_width = value_width + headroom_bits;

        if element_width > slot_width {
            return Err(Error::Configuration(format!(
                "element width {element_width} ({value_width} value bits + {headroom_bits} headroom bits) \
                 exceeds slot width {slot_width}"
            )));
        }
        // Decoded lanes are returned as `Value`
        if element_width > Value::BITS {
            return Err(Error::Configuration(format!(
                "element width {element_width} exceeds the {}-bit value type",
                Value::BITS
            )));
        }

        let values_per_slot = (slot_width / element_width) as usize;
        let slot_count = vector_length.div_ceil(values_per_slot);

        debug!(
            slot_width,
            max_additions,
            value_width,
            vector_length,
            headroom_bits,
            element_width,
            values_per_slot,
            slot_count,
            "derived slot layout"
        );

        Ok(Self {
            params,
            headroom_bits,
            element_width,
            values_per_slot,
            slot_count,
        })
    }

    /// Mask selecting the low `element_width` bits.
    #[inline]
    pub fn lane_mask(&self) -> Slot {
        low_bits(self.element_width)
    }

    /// Largest raw value accepted by `encode`.
    #[inline]
    pub fn max_value(&self) -> Value {
        low_bits(self.params.value_width) as Value
    }

    /// Largest value a single lane can hold after aggregation.
    #[inline]
    pub fn max_lane_value(&self) -> Value {
        self.lane_mask() as Value
    }

    /// Whether `slot` lies in `[0, 2^slot_width)`.
    #[inline]
    pub fn fits_slot(&self, slot: Slot) -> bool {
        self.params.slot_width >= Slot::BITS || slot >> self.params.slot_width == 0
    }

    /// Number of lanes packed into slot `k`, or `None` past the last slot.
    #[inline]
    pub fn lanes_in_slot(&self, k: usize) -> Option<usize> {
        if k >= self.slot_count {
            return None;
        }
        // k < slot_count keeps start below vector_length
        let start = k * self.values_per_slot;
        Some((self.params.vector_length - start).min(self.values_per_slot))
    }

    /// Average number of values carried per slot.
    pub fn compression_ratio(&self) -> f64 {
        self.params.vector_length as f64 / self.slot_count as f64
    }

    /// Serialized size of one encoded vector, one byte-aligned slot at a time.
    pub fn encoded_size_bytes(&self) -> usize {
        self.slot_count * (self.params.slot_width as usize).div_ceil(8)
    }
}

/// All-ones in the low `bits` bits (`bits` ≤ 128).
#[inline]
fn low_bits(bits: u32) -> Slot {
    if bits >= Slot::BITS {
        Slot::MAX
    } else {
        (1 << bits) - 1
    }
}
