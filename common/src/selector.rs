use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{binary_heap, BinaryHeap};
use std::fmt;

/// Capacities up to this size keep the retained set in a `Vec` and scan it
/// for the eviction victim; larger ones switch to a binary heap.
const LINEAR_SCAN_MAX: usize = 16;

/// Upper bound on the heap allocated up front for large capacities.
const PREALLOC_MAX: usize = 1024;

/// Which of two equally-scored items the selector prefers to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum TieBreak {
    /// An item never displaces a retained item with the same score.
    #[default]
    #[serde(rename = "first_seen")]
    FirstSeenWins,
    /// A newcomer displaces the oldest retained item with the same score.
    #[serde(rename = "last_seen")]
    LastSeenWins,
}

/// How the retained set is stored. Both strategies pick the same victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// O(K) scan for the minimum on every full offer.
    LinearScan,
    /// O(log K) min-heap.
    Heap,
}

impl Strategy {
    pub fn for_capacity(capacity: usize) -> Self {
        if capacity <= LINEAR_SCAN_MAX {
            Strategy::LinearScan
        } else {
            Strategy::Heap
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// An item the selector has accepted, with its score and arrival number.
#[derive(Debug, Clone)]
pub struct ScoredItem<T> {
    pub item: T,
    pub score: f64,
    /// Position of the offer within the session, starting at 0.
    pub arrival: u64,
}

/// Outcome of an offer with a finite score.
#[derive(Debug)]
#[must_use]
pub enum Offer<T> {
    /// The item is now part of the retained set.
    Retained { evicted: Option<ScoredItem<T>> },
    /// The item did not make the cut and is handed back.
    Discarded(T),
}

impl<T> Offer<T> {
    pub fn is_retained(&self) -> bool {
        matches!(self, Offer::Retained { .. })
    }
}

/// Returned by [`TopKSelector::offer`] for NaN or infinite scores. The
/// rejected item is handed back to the caller.
pub struct InvalidScore<T> {
    score: f64,
    item: T,
}

impl<T> InvalidScore<T> {
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn into_item(self) -> T {
        self.item
    }
}

impl<T> fmt::Debug for InvalidScore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidScore")
            .field("score", &self.score)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for InvalidScore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "score {} is not a finite number", self.score)
    }
}

impl<T> std::error::Error for InvalidScore<T> {}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SelectorError {
    #[error("selector capacity must be non-negative, got {0}")]
    InvalidCapacity(i64),
}

/// Counters for one selector over one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectorStats {
    /// Offers with a finite score.
    pub offered: u64,
    /// Offers that entered the retained set.
    pub admitted: u64,
    /// Retained items pushed out by a better newcomer.
    pub evicted: u64,
    /// Offers handed back without changing the retained set.
    pub discarded: u64,
    /// Offers refused for a non-finite score.
    pub invalid: u64,
}

/// `Greater` when `a` should be evicted before `b`.
fn eviction_cmp<T>(tie_break: TieBreak, a: &ScoredItem<T>, b: &ScoredItem<T>) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| match tie_break {
        TieBreak::FirstSeenWins => a.arrival.cmp(&b.arrival),
        TieBreak::LastSeenWins => b.arrival.cmp(&a.arrival),
    })
}

fn output_cmp<T>(order: SortOrder, a: &ScoredItem<T>, b: &ScoredItem<T>) -> Ordering {
    let by_score = match order {
        SortOrder::Ascending => a.score.total_cmp(&b.score),
        SortOrder::Descending => b.score.total_cmp(&a.score),
    };
    by_score.then_with(|| a.arrival.cmp(&b.arrival))
}

/// Heap entry ordered so the next victim sits on top of the max-heap.
struct Victim<T> {
    tie_break: TieBreak,
    entry: ScoredItem<T>,
}

impl<T> PartialEq for Victim<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Victim<T> {}

impl<T> PartialOrd for Victim<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Victim<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        eviction_cmp(self.tie_break, &self.entry, &other.entry)
    }
}

enum Retained<T> {
    Linear(Vec<ScoredItem<T>>),
    Heap(BinaryHeap<Victim<T>>),
}

impl<T> Retained<T> {
    fn new(strategy: Strategy, capacity: usize) -> Self {
        match strategy {
            Strategy::LinearScan => Retained::Linear(Vec::with_capacity(capacity)),
            Strategy::Heap => Retained::Heap(BinaryHeap::with_capacity(capacity.min(PREALLOC_MAX))),
        }
    }

    fn strategy(&self) -> Strategy {
        match self {
            Retained::Linear(_) => Strategy::LinearScan,
            Retained::Heap(_) => Strategy::Heap,
        }
    }

    fn len(&self) -> usize {
        match self {
            Retained::Linear(items) => items.len(),
            Retained::Heap(heap) => heap.len(),
        }
    }

    fn worst_index(items: &[ScoredItem<T>], tie_break: TieBreak) -> Option<usize> {
        items
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| eviction_cmp(tie_break, a, b))
            .map(|(i, _)| i)
    }

    fn worst(&self, tie_break: TieBreak) -> Option<&ScoredItem<T>> {
        match self {
            Retained::Linear(items) => Self::worst_index(items, tie_break).map(|i| &items[i]),
            Retained::Heap(heap) => heap.peek().map(|v| &v.entry),
        }
    }

    fn pop_worst(&mut self, tie_break: TieBreak) -> Option<ScoredItem<T>> {
        match self {
            Retained::Linear(items) => {
                let idx = Self::worst_index(items, tie_break)?;
                Some(items.swap_remove(idx))
            }
            Retained::Heap(heap) => heap.pop().map(|v| v.entry),
        }
    }

    fn push(&mut self, entry: ScoredItem<T>, tie_break: TieBreak) {
        match self {
            Retained::Linear(items) => items.push(entry),
            Retained::Heap(heap) => heap.push(Victim { tie_break, entry }),
        }
    }

    fn clear(&mut self) {
        match self {
            Retained::Linear(items) => items.clear(),
            Retained::Heap(heap) => heap.clear(),
        }
    }

    fn take_all(&mut self) -> Vec<ScoredItem<T>> {
        match self {
            Retained::Linear(items) => std::mem::take(items),
            Retained::Heap(heap) => std::mem::take(heap)
                .into_vec()
                .into_iter()
                .map(|v| v.entry)
                .collect(),
        }
    }
}

/// Lazy view over the retained items, in storage order.
pub struct Snapshot<'a, T> {
    inner: SnapshotIter<'a, T>,
}

enum SnapshotIter<'a, T> {
    Linear(std::slice::Iter<'a, ScoredItem<T>>),
    Heap(binary_heap::Iter<'a, Victim<T>>),
}

impl<'a, T> Iterator for Snapshot<'a, T> {
    type Item = &'a ScoredItem<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            SnapshotIter::Linear(it) => it.next(),
            SnapshotIter::Heap(it) => it.next().map(|v| &v.entry),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.inner {
            SnapshotIter::Linear(it) => it.size_hint(),
            SnapshotIter::Heap(it) => it.size_hint(),
        }
    }
}

impl<T> ExactSizeIterator for Snapshot<'_, T> {}

/// Keeps the K highest-scoring items from an unbounded stream of offers.
///
/// Capacity is fixed at construction. Once the set is full, every offer either
/// leaves it untouched or evicts exactly the current minimum. The selector has
/// no internal synchronisation; a single owner drives it.
pub struct TopKSelector<T> {
    capacity: usize,
    tie_break: TieBreak,
    retained: Retained<T>,
    next_arrival: u64,
    stats: SelectorStats,
}

impl<T> TopKSelector<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_tie_break(capacity, TieBreak::default())
    }

    pub fn with_tie_break(capacity: usize, tie_break: TieBreak) -> Self {
        Self::with_strategy(capacity, tie_break, Strategy::for_capacity(capacity))
    }

    pub fn with_strategy(capacity: usize, tie_break: TieBreak, strategy: Strategy) -> Self {
        Self {
            capacity,
            tie_break,
            retained: Retained::new(strategy, capacity),
            next_arrival: 0,
            stats: SelectorStats::default(),
        }
    }

    /// Build from a signed capacity, as read from configuration.
    pub fn try_new(capacity: i64, tie_break: TieBreak) -> Result<Self, SelectorError> {
        let capacity =
            usize::try_from(capacity).map_err(|_| SelectorError::InvalidCapacity(capacity))?;
        Ok(Self::with_tie_break(capacity, tie_break))
    }

    /// Offer an item with its score.
    ///
    /// Non-finite scores are refused and the item is returned inside the error.
    /// With capacity 0 every item is discarded.
    pub fn offer(&mut self, item: T, score: f64) -> Result<Offer<T>, InvalidScore<T>> {
        if !score.is_finite() {
            self.stats.invalid += 1;
            return Err(InvalidScore { score, item });
        }
        // -0.0 and 0.0 tie
        let score = score + 0.0;
        self.stats.offered += 1;

        if self.capacity == 0 {
            self.stats.discarded += 1;
            return Ok(Offer::Discarded(item));
        }

        let arrival = self.next_arrival;
        self.next_arrival += 1;
        let entry = ScoredItem {
            item,
            score,
            arrival,
        };

        if self.retained.len() < self.capacity {
            self.retained.push(entry, self.tie_break);
            self.stats.admitted += 1;
            return Ok(Offer::Retained { evicted: None });
        }

        let admit = match self.retained.worst(self.tie_break) {
            Some(worst) => self.beats(score, worst.score),
            None => true,
        };
        if !admit {
            self.stats.discarded += 1;
            return Ok(Offer::Discarded(entry.item));
        }

        let evicted = self.retained.pop_worst(self.tie_break);
        self.retained.push(entry, self.tie_break);
        self.stats.admitted += 1;
        if evicted.is_some() {
            self.stats.evicted += 1;
        }
        Ok(Offer::Retained { evicted })
    }

    fn beats(&self, score: f64, worst: f64) -> bool {
        match self.tie_break {
            TieBreak::FirstSeenWins => score > worst,
            TieBreak::LastSeenWins => score >= worst,
        }
    }

    /// Iterate the retained items in unspecified order. Has no side effects.
    pub fn snapshot(&self) -> Snapshot<'_, T> {
        let inner = match &self.retained {
            Retained::Linear(items) => SnapshotIter::Linear(items.iter()),
            Retained::Heap(heap) => SnapshotIter::Heap(heap.iter()),
        };
        Snapshot { inner }
    }

    /// Retained items sorted by score; equal scores keep arrival order.
    pub fn sorted(&self, order: SortOrder) -> Vec<&ScoredItem<T>> {
        let mut items: Vec<_> = self.snapshot().collect();
        items.sort_by(|a, b| output_cmp(order, a, b));
        items
    }

    /// Empty the selector, returning everything it held in sorted order.
    pub fn drain_sorted(&mut self, order: SortOrder) -> Vec<ScoredItem<T>> {
        let mut items = self.retained.take_all();
        items.sort_by(|a, b| output_cmp(order, a, b));
        items
    }

    /// Reset to an empty selector with the same capacity and policy.
    pub fn clear(&mut self) {
        self.retained.clear();
        self.next_arrival = 0;
        self.stats = SelectorStats::default();
    }

    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.retained.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    pub fn strategy(&self) -> Strategy {
        self.retained.strategy()
    }

    /// Score of the item that would be evicted next.
    pub fn min_score(&self) -> Option<f64> {
        self.retained.worst(self.tie_break).map(|w| w.score)
    }

    pub fn stats(&self) -> SelectorStats {
        self.stats
    }
}

impl<T> fmt::Debug for TopKSelector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopKSelector")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("tie_break", &self.tie_break)
            .field("strategy", &self.strategy())
            .field("min_score", &self.min_score())
            .finish()
    }
}
