//! Glue between the codec and an additively homomorphic aggregation primitive.
//!
//! The primitive (key sampling, encryption, slot-wise ciphertext addition,
//! decryption) lives outside this crate and is reached through
//! [`AggregationPrimitive`]. [`SecureAggregation`] pairs a primitive with a
//! [`BatchedCodec`]:
//!
//! 1. Each party encodes its values and encrypts the slots, zero-padded to a
//!    power-of-two length.
//! 2. The aggregator sums ciphertexts with [`SecureAggregation::aggregate`].
//! 3. Whoever holds the summed key decrypts, drops the padding, and decodes.

use rand::Rng;
use tracing::trace;

use crate::{
    codec::BatchedCodec,
    error::{Error, Result},
    params::{Slot, Value},
};

/// Additively homomorphic encryption over vectors of slots.
///
/// `aggregate` must add plaintext slots without reducing them below
/// `2^slot_width`, so that the codec's lane headroom is what bounds growth.
pub trait AggregationPrimitive {
    /// Secret key
    type Key;
    /// Encrypted vector of slots
    type Ciphertext;

    /// Bits available in one plaintext slot
    fn slot_width(&self) -> u32;

    /// Modulus the key coefficient vectors live in
    fn key_modulus(&self) -> Slot;

    /// Public seed every party must share to derive the same public parameters
    fn seed(&self) -> &[u8];

    fn sample_key(&self, rng: &mut impl Rng) -> Self::Key;

    /// Flatten a key into its coefficient vector (keys are summed this way)
    fn key_to_vector(&self, key: &Self::Key) -> Vec<Slot>;

    /// Rebuild a key from its coefficient vector
    fn vector_to_key(&self, vector: &[Slot]) -> Self::Key;

    fn encrypt(
        &self,
        key: &Self::Key,
        plaintext: &[Slot],
        rng: &mut impl Rng,
    ) -> Self::Ciphertext;

    fn decrypt(&self, key: &Self::Key, ciphertext: &Self::Ciphertext) -> Vec<Slot>;

    /// Slot-wise homomorphic addition
    fn aggregate(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Self::Ciphertext;

    /// Key that decrypts `aggregate(ct_a, ct_b)`: coefficient-wise sum of
    /// both keys mod [`key_modulus`](Self::key_modulus).
    fn sum_keys(&self, a: &Self::Key, b: &Self::Key) -> Self::Key {
        let q = self.key_modulus();
        let sum: Vec<Slot> = self
            .key_to_vector(a)
            .into_iter()
            .zip(self.key_to_vector(b))
            .map(|(x, y)| add_mod(x, y, q))
            .collect();
        self.vector_to_key(&sum)
    }
}

/// `(x + y) mod q` for `x, y < q`, without overflowing `Slot`.
#[inline]
fn add_mod(x: Slot, y: Slot, q: Slot) -> Slot {
    let (sum, carry) = x.overflowing_add(y);
    if carry || sum >= q {
        sum.wrapping_sub(q)
    } else {
        sum
    }
}

/// Smallest power of two ≥ `n`.
pub fn next_power_of_two(n: usize) -> Result<usize> {
    if n == 0 {
        return Err(Error::Shape("length must be positive".to_string()));
    }
    n.checked_next_power_of_two()
        .ok_or_else(|| Error::Shape(format!("no power of two ≥ {n} fits in usize")))
}

/// Encode-encrypt / aggregate / decrypt-decode session over one primitive.
pub struct SecureAggregation<P> {
    codec: BatchedCodec,
    primitive: P,
    padded_len: usize,
}

impl<P: AggregationPrimitive> SecureAggregation<P> {
    pub fn new(codec: BatchedCodec, primitive: P) -> Result<Self> {
        let slot_width = codec.params().slot_width;
        if slot_width > primitive.slot_width() {
            return Err(Error::Configuration(format!(
                "codec slot width {slot_width} exceeds primitive slot width {}",
                primitive.slot_width()
            )));
        }
        let padded_len = next_power_of_two(codec.slot_count())?;
        Ok(Self {
            codec,
            primitive,
            padded_len,
        })
    }

    pub fn codec(&self) -> &BatchedCodec {
        &self.codec
    }

    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    /// Plaintext length handed to the primitive (slot count rounded up)
    pub fn padded_len(&self) -> usize {
        self.padded_len
    }

    pub fn sample_key(&self, rng: &mut impl Rng) -> P::Key {
        self.primitive.sample_key(rng)
    }

    pub fn sum_keys(&self, a: &P::Key, b: &P::Key) -> P::Key {
        self.primitive.sum_keys(a, b)
    }

    pub fn key_modulus(&self) -> Slot {
        self.primitive.key_modulus()
    }

    pub fn seed(&self) -> &[u8] {
        self.primitive.seed()
    }

    pub fn encrypt(
        &self,
        key: &P::Key,
        values: &[Value],
        rng: &mut impl Rng,
    ) -> Result<P::Ciphertext> {
        let mut slots = self.codec.encode(values)?;
        slots.resize(self.padded_len, 0);
        trace!(
            slots = self.codec.slot_count(),
            padded = self.padded_len,
            "encrypting"
        );
        Ok(self.primitive.encrypt(key, &slots, rng))
    }

    pub fn aggregate(&self, a: &P::Ciphertext, b: &P::Ciphertext) -> P::Ciphertext {
        self.primitive.aggregate(a, b)
    }

    /// Decrypt with the (summed) key and decode `vector_length` values.
    pub fn decrypt(&self, key: &P::Key, ciphertext: &P::Ciphertext) -> Result<Vec<Value>> {
        let mut slots = self.primitive.decrypt(key, ciphertext);
        if slots.len() < self.codec.slot_count() {
            return Err(Error::Shape(format!(
                "primitive returned {} slots, expected at least {}",
                slots.len(),
                self.codec.slot_count()
            )));
        }
        slots.truncate(self.codec.slot_count());
        self.codec.decode(&slots)
    }
}
