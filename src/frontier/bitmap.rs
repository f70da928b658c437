//! Thread-safe bitmap with parallel bulk operations.
//!
//! Bits can be set concurrently (`set_bit_atomic`) while whole-map scans
//! (count, empty, reset) run as parallel word loops.

use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

pub const BITS_PER_WORD: usize = 64;

pub struct Bitmap {
    words: Vec<AtomicU64>,
    size: usize,
}

impl Bitmap {
    /// Creates a zeroed bitmap covering `size` positions.
    ///
    /// # Arguments
    /// * `size` - Number of addressable bit positions
    ///
    /// # Returns
    /// A bitmap with every bit cleared.
    pub fn new(size: usize) -> Self {
        let num_words = (size + BITS_PER_WORD - 1) / BITS_PER_WORD;
        let mut words = Vec::with_capacity(num_words);
        words.resize_with(num_words, || AtomicU64::new(0));
        Self { words, size }
    }

    #[inline]
    pub fn word_offset(pos: usize) -> usize {
        pos >> 6
    }

    #[inline]
    pub fn bit_offset(pos: usize) -> usize {
        pos & (BITS_PER_WORD - 1)
    }

    /// Reassembles a position from a word index and a bit index.
    ///
    /// # Arguments
    /// * `word` - Word index
    /// * `bit` - Bit index within the word
    ///
    /// # Returns
    /// The absolute bit position.
    #[inline]
    pub fn get_pos(word: usize, bit: usize) -> usize {
        (word << 6) | bit
    }

    /// First position of the word following the one holding `pos`.
    #[inline]
    pub fn pos_in_next_word(pos: usize) -> usize {
        ((pos >> 6) + 1) << 6
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    /// Clears every word in parallel.
    pub fn reset_parallel(&self) {
        self.words
            .par_iter()
            .for_each(|w| w.store(0, Ordering::Relaxed));
    }

    /// Sets every word in parallel. Bits beyond `size` in the last word are
    /// masked off so that `count` stays exact.
    pub fn set_all_parallel(&self) {
        let num_words = self.words.len();
        let tail_bits = self.size & (BITS_PER_WORD - 1);
        self.words.par_iter().enumerate().for_each(|(i, w)| {
            let word = if tail_bits != 0 && i == num_words - 1 {
                (1u64 << tail_bits) - 1
            } else {
                u64::MAX
            };
            w.store(word, Ordering::Relaxed);
        });
    }

    /// Sets bit `pos` without synchronization against other writers of the
    /// same word. Safe only when a single thread owns the map.
    ///
    /// # Arguments
    /// * `pos` - Bit position to set
    pub fn set_bit(&self, pos: usize) {
        let word = &self.words[Self::word_offset(pos)];
        let cur = word.load(Ordering::Relaxed);
        word.store(cur | (1u64 << Self::bit_offset(pos)), Ordering::Relaxed);
    }

    /// Atomically sets bit `pos`.
    pub fn set_bit_atomic(&self, pos: usize) {
        self.words[Self::word_offset(pos)].fetch_or(1u64 << Self::bit_offset(pos), Ordering::Relaxed);
    }

    #[inline]
    pub fn get_bit(&self, pos: usize) -> bool {
        (self.words[Self::word_offset(pos)].load(Ordering::Relaxed) >> Self::bit_offset(pos)) & 1 != 0
    }

    #[inline]
    pub fn get_word(&self, word: usize) -> u64 {
        self.words[word].load(Ordering::Relaxed)
    }

    pub fn set_word(&self, word: usize, value: u64) {
        self.words[word].store(value, Ordering::Relaxed);
    }

    /// Number of set bits, computed as a parallel popcount reduction.
    ///
    /// # Returns
    /// The population count over all words.
    pub fn count(&self) -> usize {
        self.words
            .par_iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// True iff no bit is set.
    pub fn empty(&self) -> bool {
        self.words
            .par_iter()
            .all(|w| w.load(Ordering::Relaxed) == 0)
    }

    /// Word-wise intersection: `self &= other`.
    ///
    /// # Arguments
    /// * `other` - The mask to intersect with
    ///
    /// # Panics
    /// * If the two maps cover different numbers of positions
    pub fn and_with(&self, other: &Bitmap) {
        assert_eq!(self.size, other.size, "bitmap size mismatch in and_with");
        self.words
            .par_iter()
            .zip(other.words.par_iter())
            .for_each(|(a, b)| {
                let word = a.load(Ordering::Relaxed) & b.load(Ordering::Relaxed);
                a.store(word, Ordering::Relaxed);
            });
    }

    /// Invokes `f` for every set position, scanning words in parallel.
    ///
    /// # Arguments
    /// * `f` - Function invoked with each set bit position
    pub fn for_each_set<F>(&self, f: F)
    where
        F: Fn(usize) + Sync,
    {
        self.words.par_iter().enumerate().for_each(|(pos, w)| {
            let mut word = w.load(Ordering::Relaxed);
            while word != 0 {
                let bit = word.trailing_zeros() as usize;
                f(Self::get_pos(pos, bit));
                word &= word - 1;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_set_get_count() {
        let bm = Bitmap::new(128);
        assert!(bm.empty());
        bm.set_bit_atomic(0);
        bm.set_bit_atomic(3);
        bm.set_bit_atomic(17);
        bm.set_bit_atomic(64);
        assert!(bm.get_bit(17));
        assert!(!bm.get_bit(16));
        assert_eq!(bm.count(), 4);
        assert!(!bm.empty());
    }

    #[test]
    fn test_set_all_masks_tail() {
        let bm = Bitmap::new(70);
        bm.set_all_parallel();
        assert_eq!(bm.count(), 70);
        bm.reset_parallel();
        assert_eq!(bm.count(), 0);
    }

    #[test]
    fn test_and_with() {
        let a = Bitmap::new(128);
        let b = Bitmap::new(128);
        a.set_bit_atomic(1);
        a.set_bit_atomic(2);
        a.set_bit_atomic(100);
        b.set_bit_atomic(2);
        b.set_bit_atomic(100);
        a.and_with(&b);
        assert!(!a.get_bit(1));
        assert!(a.get_bit(2));
        assert!(a.get_bit(100));
        assert_eq!(a.count(), 2);
    }

    #[test]
    fn test_for_each_set_visits_all() {
        let bm = Bitmap::new(256);
        for pos in [0usize, 63, 64, 65, 200, 255] {
            bm.set_bit_atomic(pos);
        }
        let visited = AtomicUsize::new(0);
        bm.for_each_set(|_| {
            visited.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        });
        assert_eq!(visited.load(std::sync::atomic::Ordering::Relaxed), 6);
    }
}
