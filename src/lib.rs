//! Overflow-aware batched vector packing for secure aggregation
//!
//! Packs a vector of small non-negative integers into fixed-width plaintext
//! slots for an additively homomorphic aggregation primitive, and unpacks the
//! aggregated slots back into per-position sums. Each packed value carries
//! `⌈log2(max_additions)⌉` headroom bits, so summing up to `max_additions`
//! encoded vectors never carries one value into its neighbour.
//!
//! # Example
//!
//! ```
//! use vecpack::{BatchedCodec, EncodingParameters};
//!
//! # fn main() -> Result<(), vecpack::Error> {
//! // 64-bit slots, at most 4 parties, 16-bit values, 7 values per vector
//! let codec = BatchedCodec::new(EncodingParameters::new(64, 4, 16, 7))?;
//! assert_eq!(codec.layout().values_per_slot, 3);
//!
//! let mut total = codec.encode(&[1, 2, 3, 4, 5, 6, 7])?;
//! let other = codec.encode(&[10, 20, 30, 40, 50, 60, 70])?;
//! codec.aggregate(&mut total, &other)?;
//!
//! assert_eq!(codec.decode(&total)?, vec![11, 22, 33, 44, 55, 66, 77]);
//! # Ok(())
//! # }
//! ```

pub mod aggregation;
pub mod codec;
pub mod error;
pub mod params;

pub use aggregation::{AggregationPrimitive, SecureAggregation, next_power_of_two};
pub use codec::BatchedCodec;
pub use error::{Error, Result};
pub use params::{EncodingLayout, EncodingParameters, Slot, Value, headroom_bits};
