//! A simple growable bit-set over ordinals, and its standard wire format.
//!
//! This is the "populated ordinals" collaborator: `prev`/`curr` membership,
//! `added`/`removed` computed via [`BitSet::and_not`], and the serialized
//! form appended to the end of a snapshot (`framing.rs`).

use std::io::{self, Write};

use crate::varint::{read_vlong, write_vint, write_vlong};

const BITS_PER_WORD: usize = 64;

/// A bit per ordinal, backed by `u64` words.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Builds a bit-set with the given ordinals set.
    pub fn from_ordinals<I: IntoIterator<Item = usize>>(ordinals: I) -> Self {
        let mut set = Self::new();
        for ord in ordinals {
            set.set(ord);
        }
        set
    }

    pub fn set(&mut self, ordinal: usize) {
        let word = ordinal / BITS_PER_WORD;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (ordinal % BITS_PER_WORD);
    }

    #[inline]
    pub fn get(&self, ordinal: usize) -> bool {
        let word = ordinal / BITS_PER_WORD;
        match self.words.get(word) {
            Some(w) => (w >> (ordinal % BITS_PER_WORD)) & 1 == 1,
            None => false,
        }
    }

    /// Smallest set ordinal `>= from`, if any.
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        let mut word_idx = from / BITS_PER_WORD;
        if word_idx >= self.words.len() {
            return None;
        }
        let mut mask = !0u64 << (from % BITS_PER_WORD);
        while word_idx < self.words.len() {
            let bits = self.words[word_idx] & mask;
            if bits != 0 {
                return Some(word_idx * BITS_PER_WORD + bits.trailing_zeros() as usize);
            }
            word_idx += 1;
            mask = !0u64;
        }
        None
    }

    /// Highest set ordinal, if any.
    pub fn max_set_bit(&self) -> Option<i64> {
        for (word_idx, &word) in self.words.iter().enumerate().rev() {
            if word != 0 {
                let bit = BITS_PER_WORD - 1 - word.leading_zeros() as usize;
                return Some((word_idx * BITS_PER_WORD + bit) as i64);
            }
        }
        None
    }

    /// `self \ other`, i.e. set bits in `self` that are clear in `other`.
    pub fn and_not(&self, other: &BitSet) -> BitSet {
        let len = self.words.len();
        let mut words = Vec::with_capacity(len);
        for i in 0..len {
            let other_word = other.words.get(i).copied().unwrap_or(0);
            words.push(self.words[i] & !other_word);
        }
        BitSet { words }
    }

    /// `self | other`.
    pub fn or(&self, other: &BitSet) -> BitSet {
        let len = self.words.len().max(other.words.len());
        let mut words = Vec::with_capacity(len);
        for i in 0..len {
            let a = self.words.get(i).copied().unwrap_or(0);
            let b = other.words.get(i).copied().unwrap_or(0);
            words.push(a | b);
        }
        BitSet { words }
    }

    pub fn iter_set_bits(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = self.next_set_bit(0);
        std::iter::from_fn(move || {
            let current = next?;
            next = self.next_set_bit(current + 1);
            Some(current)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// The framework's standard packed bit-set wire format: a var-long of
    /// `highest_set_bit + 1` (0 when empty), a var-int word count, then that
    /// many big-endian 64-bit words.
    pub fn serialize_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let bit_length = match self.max_set_bit() {
            Some(max) => (max + 1) as u64,
            None => 0,
        };
        let mut header = Vec::new();
        write_vlong(&mut header, bit_length);
        let num_words = if bit_length == 0 {
            0
        } else {
            ((bit_length as usize) + BITS_PER_WORD - 1) / BITS_PER_WORD
        };
        write_vint(&mut header, num_words as u32);
        out.write_all(&header)?;
        for &word in self.words.iter().take(num_words) {
            out.write_all(&word.to_be_bytes())?;
        }
        Ok(())
    }

    /// Inverse of [`BitSet::serialize_to`].
    pub fn deserialize_from(bytes: &[u8]) -> (Self, usize) {
        let mut pos = 0;
        let bit_length = read_vlong(bytes, &mut pos);
        let num_words = crate::varint::read_vint(bytes, &mut pos) as usize;
        let _ = bit_length;
        let mut words = Vec::with_capacity(num_words);
        for _ in 0..num_words {
            let word = u64::from_be_bytes(bytes[pos..pos + 8].try_into().unwrap());
            pos += 8;
            words.push(word);
        }
        (BitSet { words }, pos)
    }
}
