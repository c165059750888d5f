// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{mix_hash, Hash256, Transaction};
use std::cmp::Ordering;
use std::fmt;

/// A transaction paired with its per-shard sort key `MixHash(id, seed)`.
///
/// The order is total: keys first, transaction id as the tie-break. Key
/// collisions require a SHA-256 collision, but the rule is part of the
/// protocol so that every implementation agrees byte for byte.
#[derive(Clone)]
pub struct SortableTx {
    pub tx: Transaction,
    pub key: Hash256,
}

impl SortableTx {
    #[must_use]
    pub fn new(tx: Transaction, shard_seed: &Hash256) -> Self {
        let key = mix_hash(&tx.id, shard_seed);
        Self { tx, key }
    }

    /// Byte `pos` of the 64 byte composite `key ‖ id` used by the radix pass
    #[inline]
    fn radix_byte(&self, pos: usize) -> u8 {
        if pos < 32 {
            self.key.0[pos]
        } else {
            self.tx.id.0[pos - 32]
        }
    }
}

impl PartialEq for SortableTx {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.tx.id == other.tx.id
    }
}

impl Eq for SortableTx {}

impl PartialOrd for SortableTx {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortableTx {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.tx.id.cmp(&other.tx.id))
    }
}

impl fmt::Debug for SortableTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortableTx")
            .field("id", &self.tx.id)
            .field("key", &self.key)
            .finish()
    }
}

/// The seven race algorithms, in protocol order. The list and the modulus-7
/// selector are consensus-critical: every implementation must map a given
/// seed to the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortAlgorithm {
    Quick,
    Merge,
    Heap,
    Radix,
    Tim,
    Intro,
    Shell,
}

impl SortAlgorithm {
    pub const ALL: [SortAlgorithm; 7] = [
        SortAlgorithm::Quick,
        SortAlgorithm::Merge,
        SortAlgorithm::Heap,
        SortAlgorithm::Radix,
        SortAlgorithm::Tim,
        SortAlgorithm::Intro,
        SortAlgorithm::Shell,
    ];

    /// Select the race algorithm from a post-mining seed
    #[must_use]
    pub fn select(seed: &Hash256) -> Self {
        Self::ALL[(seed.0[31] % 7) as usize]
    }

    /// Diagnostic name. Never serialized into consensus-relevant bytes.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Quick => "QUICK_SORT",
            Self::Merge => "MERGE_SORT",
            Self::Heap => "HEAP_SORT",
            Self::Radix => "RADIX_SORT",
            Self::Tim => "TIM_SORT",
            Self::Intro => "INTRO_SORT",
            Self::Shell => "SHELL_SORT",
        }
    }

    /// Sort `data` into the canonical order. All seven variants produce
    /// byte-identical output; they differ only in how they get there.
    #[must_use]
    pub fn sort(&self, data: Vec<SortableTx>) -> Vec<SortableTx> {
        match self {
            Self::Quick => {
                let mut data = data;
                quick_sort(&mut data);
                data
            }
            Self::Merge => merge_sort(data),
            Self::Heap => {
                let mut data = data;
                heap_sort(&mut data);
                data
            }
            Self::Radix => radix_sort(data),
            Self::Tim => {
                let mut data = data;
                tim_sort(&mut data);
                data
            }
            Self::Intro => {
                let mut data = data;
                intro_sort(&mut data);
                data
            }
            Self::Shell => {
                let mut data = data;
                shell_sort(&mut data);
                data
            }
        }
    }
}

impl fmt::Display for SortAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn quick_sort(arr: &mut [SortableTx]) {
    if arr.len() <= 1 {
        return;
    }

    let pivot = partition(arr);
    let (left, right) = arr.split_at_mut(pivot);
    quick_sort(left);
    quick_sort(&mut right[1..]);
}

/// Lomuto partition around the last element
fn partition(arr: &mut [SortableTx]) -> usize {
    let high = arr.len() - 1;
    let mut store = 0;

    for j in 0..high {
        if arr[j] < arr[high] {
            arr.swap(store, j);
            store += 1;
        }
    }
    arr.swap(store, high);
    store
}

fn merge_sort(data: Vec<SortableTx>) -> Vec<SortableTx> {
    if data.len() <= 1 {
        return data;
    }

    let mut data = data;
    let right = data.split_off(data.len() / 2);
    merge(merge_sort(data), merge_sort(right))
}

fn merge(left: Vec<SortableTx>, right: Vec<SortableTx>) -> Vec<SortableTx> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => {
                if l <= r {
                    out.push(left.next().unwrap());
                } else {
                    out.push(right.next().unwrap());
                }
            }
            (Some(_), None) => out.push(left.next().unwrap()),
            (None, Some(_)) => out.push(right.next().unwrap()),
            (None, None) => break,
        }
    }

    out
}

fn heap_sort(arr: &mut [SortableTx]) {
    let n = arr.len();

    for i in (0..n / 2).rev() {
        heapify(arr, n, i);
    }

    for i in (1..n).rev() {
        arr.swap(0, i);
        heapify(arr, i, 0);
    }
}

fn heapify(arr: &mut [SortableTx], n: usize, i: usize) {
    let mut largest = i;
    let left = 2 * i + 1;
    let right = 2 * i + 2;

    if left < n && arr[left] > arr[largest] {
        largest = left;
    }
    if right < n && arr[right] > arr[largest] {
        largest = right;
    }

    if largest != i {
        arr.swap(i, largest);
        heapify(arr, n, largest);
    }
}

/// LSD counting sort over the 64 byte composite `key ‖ id`. Each pass is
/// stable, so the final order matches the comparison sorts including the
/// id tie-break.
fn radix_sort(data: Vec<SortableTx>) -> Vec<SortableTx> {
    if data.len() <= 1 {
        return data;
    }

    let mut data = data;
    for pos in (0..64).rev() {
        data = counting_pass(data, pos);
    }
    data
}

fn counting_pass(arr: Vec<SortableTx>, pos: usize) -> Vec<SortableTx> {
    let mut count = [0usize; 256];
    for item in &arr {
        count[item.radix_byte(pos) as usize] += 1;
    }
    for i in 1..256 {
        count[i] += count[i - 1];
    }

    let mut output: Vec<Option<SortableTx>> = (0..arr.len()).map(|_| None).collect();
    for item in arr.into_iter().rev() {
        let bucket = item.radix_byte(pos) as usize;
        count[bucket] -= 1;
        output[count[bucket]] = Some(item);
    }

    output.into_iter().map(|item| item.unwrap()).collect()
}

const MIN_MERGE: usize = 32;

/// Simplified Timsort: insertion-sorted runs of `MIN_MERGE`, then doubling
/// bottom-up merges
fn tim_sort(arr: &mut [SortableTx]) {
    let n = arr.len();
    if n <= 1 {
        return;
    }

    let mut start = 0;
    while start < n {
        let end = (start + MIN_MERGE).min(n);
        insertion_sort(arr, start, end - 1);
        start += MIN_MERGE;
    }

    let mut size = MIN_MERGE;
    while size < n {
        let mut start = 0;
        while start < n {
            let mid = start + size - 1;
            let end = (start + 2 * size - 1).min(n - 1);
            if mid < end {
                merge_runs(arr, start, mid, end);
            }
            start += 2 * size;
        }
        size *= 2;
    }
}

/// Insertion sort over the inclusive range `[left, right]`
fn insertion_sort(arr: &mut [SortableTx], left: usize, right: usize) {
    for i in left + 1..=right {
        let mut j = i;
        while j > left && arr[j - 1] > arr[j] {
            arr.swap(j - 1, j);
            j -= 1;
        }
    }
}

fn merge_runs(arr: &mut [SortableTx], left: usize, mid: usize, right: usize) {
    let merged = merge(arr[left..=mid].to_vec(), arr[mid + 1..=right].to_vec());
    for (offset, item) in merged.into_iter().enumerate() {
        arr[left + offset] = item;
    }
}

/// Introsort: quicksort partitioning with a depth limit, falling back to
/// heapsort past the limit and insertion sort on small ranges
fn intro_sort(arr: &mut [SortableTx]) {
    let n = arr.len();
    if n <= 1 {
        return;
    }

    let max_depth = 2 * n.ilog2() as usize;
    intro_sort_recursive(arr, 0, n - 1, max_depth);
}

fn intro_sort_recursive(arr: &mut [SortableTx], low: usize, high: usize, depth_limit: usize) {
    let mut low = low;
    let mut high = high;
    let mut depth_limit = depth_limit;

    while high - low > 16 {
        if depth_limit == 0 {
            heap_sort(&mut arr[low..=high]);
            return;
        }
        depth_limit -= 1;

        let p = partition_range(arr, low, high);

        // Recur on the smaller side, iterate on the larger. Unsigned
        // indices: skip empty sides instead of wrapping.
        if p - low < high - p {
            if p > low {
                intro_sort_recursive(arr, low, p - 1, depth_limit);
            }
            low = p + 1;
        } else {
            if p < high {
                intro_sort_recursive(arr, p + 1, high, depth_limit);
            }
            high = p - 1;
        }
    }

    insertion_sort(arr, low, high);
}

fn partition_range(arr: &mut [SortableTx], low: usize, high: usize) -> usize {
    let mut store = low;
    for j in low..high {
        if arr[j] < arr[high] {
            arr.swap(store, j);
            store += 1;
        }
    }
    arr.swap(store, high);
    store
}

/// Shellsort with the halving gap sequence
fn shell_sort(arr: &mut [SortableTx]) {
    let n = arr.len();
    let mut gap = n / 2;

    while gap > 0 {
        for i in gap..n {
            let mut j = i;
            while j >= gap && arr[j - gap] > arr[j] {
                arr.swap(j - gap, j);
                j -= gap;
            }
        }
        gap /= 2;
    }
}
