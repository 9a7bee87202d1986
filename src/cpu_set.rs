// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::sync::atomic::{AtomicU64, Ordering};

/// Number of CPUs a `CpuSet` can hold.
pub const CPU_SET_SIZE: usize = 256;

const WORDS: usize = CPU_SET_SIZE / 64;

fn word_and_bit(id: usize) -> Option<(usize, u64)> {
    if id >= CPU_SET_SIZE {
        return None;
    }
    Some((id / 64, 1 << (id % 64)))
}

/// A set of CPU indices, either vCPU IDs or host CPU IDs depending on context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuSet([u64; WORDS]);

impl CpuSet {
    /// Creates an empty set.
    pub const fn new() -> Self {
        Self([0; WORDS])
    }

    /// Adds `id`, returning true if it wasn't already present. IDs beyond `CPU_SET_SIZE` are
    /// ignored.
    pub fn insert(&mut self, id: usize) -> bool {
        let Some((word, bit)) = word_and_bit(id) else {
            return false;
        };
        let was_set = self.0[word] & bit != 0;
        self.0[word] |= bit;
        !was_set
    }

    /// Removes `id`, returning true if it was present.
    pub fn remove(&mut self, id: usize) -> bool {
        let Some((word, bit)) = word_and_bit(id) else {
            return false;
        };
        let was_set = self.0[word] & bit != 0;
        self.0[word] &= !bit;
        was_set
    }

    pub fn contains(&self, id: usize) -> bool {
        word_and_bit(id).is_some_and(|(word, bit)| self.0[word] & bit != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if every member of `self` is also in `other`.
    pub fn is_subset(&self, other: &CpuSet) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a & !b == 0)
    }

    /// Iterates over the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(i, word)| {
            let mut bits = *word;
            core::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(i * 64 + bit)
            })
        })
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = CpuSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

/// A `CpuSet` updated with lock-free atomic operations.
#[derive(Debug, Default)]
pub struct AtomicCpuSet([AtomicU64; WORDS]);

impl AtomicCpuSet {
    /// Creates an empty set.
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: AtomicU64 = AtomicU64::new(0);
        Self([EMPTY; WORDS])
    }

    /// Adds `id`, returning true if it wasn't already present.
    pub fn insert(&self, id: usize) -> bool {
        let Some((word, bit)) = word_and_bit(id) else {
            return false;
        };
        self.0[word].fetch_or(bit, Ordering::AcqRel) & bit == 0
    }

    /// Removes `id`, returning true if it was present.
    pub fn remove(&self, id: usize) -> bool {
        let Some((word, bit)) = word_and_bit(id) else {
            return false;
        };
        self.0[word].fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    pub fn contains(&self, id: usize) -> bool {
        word_and_bit(id).is_some_and(|(word, bit)| self.0[word].load(Ordering::Acquire) & bit != 0)
    }

    /// Returns a snapshot of the set. Words are read individually, so the snapshot is only
    /// consistent with respect to concurrent updates of the same word.
    pub fn load(&self) -> CpuSet {
        let mut set = CpuSet::new();
        for (dst, src) in set.0.iter_mut().zip(self.0.iter()) {
            *dst = src.load(Ordering::Acquire);
        }
        set
    }

    /// Removes every member.
    pub fn clear(&self) {
        for word in self.0.iter() {
            word.store(0, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove() {
        let mut set = CpuSet::new();
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(200));
        assert!(!set.insert(CPU_SET_SIZE));
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().collect::<std::vec::Vec<_>>(), [3, 200]);
        assert!(set.remove(3));
        assert!(!set.contains(3));
        assert!(set.contains(200));
    }

    #[test]
    fn subsets() {
        let small: CpuSet = [1, 65].into_iter().collect();
        let big: CpuSet = [1, 2, 65].into_iter().collect();
        assert!(small.is_subset(&big));
        assert!(!big.is_subset(&small));
        assert!(CpuSet::new().is_subset(&small));
    }

    #[test]
    fn atomic_set() {
        let set = AtomicCpuSet::new();
        assert!(set.insert(64));
        assert!(!set.insert(64));
        assert!(set.contains(64));
        assert_eq!(set.load(), [64].into_iter().collect());
        assert!(set.remove(64));
        assert!(!set.remove(64));
        set.insert(5);
        set.clear();
        assert!(set.load().is_empty());
    }
}
