//! Shared machinery of the aggregators: the attribute-set keyed tracker map,
//! atomic value storage, and the numeric abstraction over `u64`/`i64`/`f64`.

mod aggregate;
mod histogram;
mod last_value;
mod precomputed_sum;
mod sum;

use core::fmt;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem::swap;
use std::ops::{Add, AddAssign, DerefMut, Sub};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use once_cell::sync::Lazy;

pub(crate) use aggregate::{AggregateBuilder, AggregateFns, ComputeAggregation, Measure};

use crate::common::KeyValue;

/// The attribute set marking the single series measurements overflow into
/// once a stream's cardinality limit is reached.
pub(crate) static STREAM_OVERFLOW_ATTRIBUTES: Lazy<Vec<KeyValue>> =
    Lazy::new(|| vec![KeyValue::new("otel.metric.overflow", "true")]);

/// Per-attribute-set aggregation state.
pub(crate) trait Aggregator {
    /// The static configuration needed to initialize a tracker, e.g. bucket
    /// bounds and the exemplar reservoir shape.
    type InitConfig;

    /// Some aggregators pre-compute part of the update outside the tracker
    /// to keep [`Aggregator::update`] as short as possible.
    type PreComputedValue;

    /// Called every time a new attribute set is stored.
    fn create(init: &Self::InitConfig) -> Self;

    /// Called for each measurement.
    fn update(&self, value: Self::PreComputedValue);

    /// Return the current value (and pending exemplars) as a fresh tracker,
    /// resetting this instance for the next interval.
    fn clone_and_reset(&self, init: &Self::InitConfig) -> Self;
}

struct NoAttribs<A> {
    tracker: A,
    is_set: AtomicBool,
}

/// The storage shared by all aggregations: a concurrent mapping from
/// attribute sets to trackers, with a reserved overflow series.
///
/// Lookups in the measurement hot path go through a read lock over a map
/// keyed by the attributes in caller order; misses fall back to a mutex over
/// the map keyed by sorted-deduplicated attributes, which is also the map
/// collection iterates.
pub(crate) struct ValueMap<A>
where
    A: Aggregator,
{
    // measurements with no attributes take a dedicated fast path
    no_attribs: NoAttribs<A>,
    // keyed by attributes in the order the caller provided them
    all_attribs: RwLock<HashMap<Vec<KeyValue>, Arc<A>>>,
    // keyed by sorted attributes; the authoritative set for collection
    sorted_attribs: Mutex<HashMap<Vec<KeyValue>, Arc<A>>>,
    config: A::InitConfig,
    // the configured stream limit; novel series are admitted while the
    // sorted map holds fewer than limit - 1, the last slot being overflow
    cardinality_limit: usize,
    overflow_logged: AtomicBool,
    /// Swapped with `sorted_attribs` on every `collect_and_reset`.
    for_collect_after_reset: Mutex<HashMap<Vec<KeyValue>, Arc<A>>>,
}

impl<A> ValueMap<A>
where
    A: Aggregator,
{
    pub(crate) fn new(config: A::InitConfig, cardinality_limit: usize) -> Self {
        ValueMap {
            no_attribs: NoAttribs {
                tracker: A::create(&config),
                is_set: AtomicBool::new(false),
            },
            all_attribs: RwLock::new(Default::default()),
            sorted_attribs: Mutex::new(Default::default()),
            config,
            cardinality_limit: cardinality_limit.max(1),
            overflow_logged: AtomicBool::new(false),
            for_collect_after_reset: Mutex::new(Default::default()),
        }
    }

    pub(crate) fn measure(&self, value: A::PreComputedValue, attributes: &[KeyValue]) {
        if attributes.is_empty() {
            self.no_attribs.tracker.update(value);
            self.no_attribs.is_set.store(true, Ordering::Release);
            return;
        }

        // Try to retrieve and update the tracker with the attributes in the
        // provided order first.
        match self.all_attribs.read() {
            Ok(trackers) => {
                if let Some(tracker) = trackers.get(attributes) {
                    tracker.update(value);
                    return;
                }
            }
            Err(_) => return,
        };

        // Get or create a tracker keyed by sorted attributes.
        let sorted_attrs = sort_and_dedup(attributes);
        let Ok(mut sorted_trackers) = self.sorted_attribs.lock() else {
            return;
        };

        let sorted_count = sorted_trackers.len();
        let new_tracker = match sorted_trackers.entry(sorted_attrs) {
            Entry::Occupied(occupied_entry) => occupied_entry.get().clone(),
            Entry::Vacant(vacant_entry) => {
                if sorted_count + 1 >= self.cardinality_limit {
                    let overflow_logged = &self.overflow_logged;
                    sorted_trackers
                        .entry(STREAM_OVERFLOW_ATTRIBUTES.clone())
                        .or_insert_with(|| {
                            if !overflow_logged.swap(true, Ordering::Relaxed) {
                                otel_warn!(
                                    name: "ValueMap.Overflow",
                                    message = "Maximum data points for metric stream exceeded. Entry added to overflow. Subsequent overflows to the same metric until next collect will not be logged."
                                );
                            }
                            Arc::new(A::create(&self.config))
                        })
                        .update(value);
                    return;
                }
                let new_tracker = Arc::new(A::create(&self.config));
                vacant_entry.insert(new_tracker).clone()
            }
        };
        drop(sorted_trackers);

        new_tracker.update(value);

        // Insert the tracker under the caller's ordering so the next
        // measurement takes the read path.
        let Ok(mut all_trackers) = self.all_attribs.write() else {
            return;
        };
        all_trackers.insert(attributes.to_vec(), new_tracker);
    }

    /// Iterate through all attribute sets and populate data points in
    /// read-only mode, for Cumulative temporality where the map survives the
    /// collection.
    pub(crate) fn collect_readonly<Res, MapFn>(&self, dest: &mut Vec<Res>, mut map_fn: MapFn)
    where
        MapFn: FnMut(Vec<KeyValue>, &A) -> Res,
    {
        let trackers = match self.sorted_attribs.lock() {
            // Release the lock as fast as possible to avoid blocking
            // insertion of new attribute sets.
            Ok(trackers) => trackers.clone(),
            Err(_) => return,
        };

        prepare_data(dest, trackers.len());

        if self.no_attribs.is_set.load(Ordering::Acquire) {
            dest.push(map_fn(vec![], &self.no_attribs.tracker));
        }

        for (attrs, tracker) in trackers.into_iter() {
            dest.push(map_fn(attrs, &tracker));
        }
    }

    /// Iterate through all attribute sets, populate data points and reset,
    /// for Delta temporality where the map is cleared by the collection.
    pub(crate) fn collect_and_reset<Res, MapFn>(&self, dest: &mut Vec<Res>, mut map_fn: MapFn)
    where
        MapFn: FnMut(Vec<KeyValue>, A) -> Res,
    {
        let mut to_collect = self
            .for_collect_after_reset
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        // Swap the sorted trackers out so new attribute sets land in a fresh
        // map while this collection proceeds.
        match self.sorted_attribs.lock() {
            Ok(mut trackers) => {
                swap(trackers.deref_mut(), to_collect.deref_mut());
            }
            Err(_) => return,
        };
        // Clear the ordered index so every attribute set re-resolves through
        // the new map.
        match self.all_attribs.write() {
            Ok(mut all_trackers) => all_trackers.clear(),
            Err(_) => return,
        };
        self.overflow_logged.store(false, Ordering::Relaxed);

        prepare_data(dest, to_collect.len());

        if self.no_attribs.is_set.swap(false, Ordering::AcqRel) {
            dest.push(map_fn(
                vec![],
                self.no_attribs.tracker.clone_and_reset(&self.config),
            ));
        }

        for (attrs, tracker) in to_collect.drain() {
            let tracker = match Arc::try_unwrap(tracker) {
                Ok(tracker) => tracker,
                // A concurrent writer still holds a reference; snapshot it.
                Err(tracker) => tracker.clone_and_reset(&self.config),
            };
            dest.push(map_fn(attrs, tracker));
        }
    }
}

/// Clear and allocate exactly the space needed for all attribute sets.
fn prepare_data<T>(data: &mut Vec<T>, list_len: usize) {
    data.clear();
    let total_len = list_len + 1; // to account for the no-attributes series
    if total_len > data.capacity() {
        data.reserve_exact(total_len - data.capacity());
    }
}

fn sort_and_dedup(attributes: &[KeyValue]) -> Vec<KeyValue> {
    let mut sorted = attributes.to_vec();
    sorted.sort_unstable_by(|a, b| a.key.cmp(&b.key));
    sorted.dedup_by(|a, b| a.key == b.key);
    sorted
}

/// Marks a type that can have a value added and retrieved atomically.
pub(crate) trait AtomicTracker<T>: Sync + Send + 'static {
    fn store(&self, _value: T);
    fn add(&self, _value: T);
    fn get_value(&self) -> T;
    fn get_and_reset_value(&self) -> T;
}

/// Marks a type that can have an atomic tracker generated for it.
pub(crate) trait AtomicallyUpdate<T> {
    type AtomicTracker: AtomicTracker<T>;
    fn new_atomic_tracker(init: T) -> Self::AtomicTracker;
}

/// The numeric types measurements arrive as.
pub(crate) trait Number:
    Add<Output = Self>
    + AddAssign
    + Sub<Output = Self>
    + PartialOrd
    + fmt::Debug
    + Clone
    + Copy
    + PartialEq
    + Default
    + Send
    + Sync
    + 'static
    + AtomicallyUpdate<Self>
{
    fn min() -> Self;
    fn max() -> Self;

    fn into_float(self) -> f64;

    /// Whether the value may be aggregated; rejects NaN floats.
    fn is_valid_sample(self) -> bool {
        true
    }
}

impl Number for i64 {
    fn min() -> Self {
        i64::MIN
    }

    fn max() -> Self {
        i64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }
}

impl Number for u64 {
    fn min() -> Self {
        u64::MIN
    }

    fn max() -> Self {
        u64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }
}

impl Number for f64 {
    fn min() -> Self {
        f64::MIN
    }

    fn max() -> Self {
        f64::MAX
    }

    fn into_float(self) -> f64 {
        self
    }

    fn is_valid_sample(self) -> bool {
        !self.is_nan()
    }
}

impl AtomicTracker<u64> for AtomicU64 {
    fn store(&self, value: u64) {
        self.store(value, Ordering::Relaxed);
    }

    fn add(&self, value: u64) {
        self.fetch_add(value, Ordering::Relaxed);
    }

    fn get_value(&self) -> u64 {
        self.load(Ordering::Relaxed)
    }

    fn get_and_reset_value(&self) -> u64 {
        self.swap(0, Ordering::Relaxed)
    }
}

impl AtomicallyUpdate<u64> for u64 {
    type AtomicTracker = AtomicU64;

    fn new_atomic_tracker(init: u64) -> Self::AtomicTracker {
        AtomicU64::new(init)
    }
}

impl AtomicTracker<i64> for AtomicI64 {
    fn store(&self, value: i64) {
        self.store(value, Ordering::Relaxed);
    }

    fn add(&self, value: i64) {
        self.fetch_add(value, Ordering::Relaxed);
    }

    fn get_value(&self) -> i64 {
        self.load(Ordering::Relaxed)
    }

    fn get_and_reset_value(&self) -> i64 {
        self.swap(0, Ordering::Relaxed)
    }
}

impl AtomicallyUpdate<i64> for i64 {
    type AtomicTracker = AtomicI64;

    fn new_atomic_tracker(init: i64) -> Self::AtomicTracker {
        AtomicI64::new(init)
    }
}

/// Floating points lack a native atomic; arithmetic is performed on the bit
/// representation with a CAS loop.
pub(crate) struct F64AtomicTracker {
    inner: AtomicU64,
}

impl F64AtomicTracker {
    fn new(init: f64) -> Self {
        F64AtomicTracker {
            inner: AtomicU64::new(init.to_bits()),
        }
    }
}

impl AtomicTracker<f64> for F64AtomicTracker {
    fn store(&self, value: f64) {
        self.inner.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, value: f64) {
        let mut current_value_as_u64 = self.inner.load(Ordering::Relaxed);

        loop {
            let current_value = f64::from_bits(current_value_as_u64);
            let new_value_as_u64 = (current_value + value).to_bits();
            match self.inner.compare_exchange(
                current_value_as_u64,
                new_value_as_u64,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                // Another thread changed the value; retry against the latest.
                Err(v) => current_value_as_u64 = v,
            }
        }
    }

    fn get_value(&self) -> f64 {
        f64::from_bits(self.inner.load(Ordering::Relaxed))
    }

    fn get_and_reset_value(&self) -> f64 {
        let value = self.inner.swap(0.0_f64.to_bits(), Ordering::Relaxed);
        f64::from_bits(value)
    }
}

impl AtomicallyUpdate<f64> for f64 {
    type AtomicTracker = F64AtomicTracker;

    fn new_atomic_tracker(init: f64) -> Self::AtomicTracker {
        F64AtomicTracker::new(init)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_add_and_reset_u64_atomic_value() {
        let atomic = u64::new_atomic_tracker(0);
        atomic.add(15);
        atomic.add(10);
        assert_eq!(atomic.get_value(), 25);

        assert_eq!(atomic.get_and_reset_value(), 25);
        assert_eq!(atomic.get_value(), 0);
    }

    #[test]
    fn can_store_i64_atomic_value() {
        let atomic = i64::new_atomic_tracker(0);
        AtomicTracker::store(&atomic, -25);
        assert_eq!(atomic.get_value(), -25);
        atomic.add(15);
        assert_eq!(atomic.get_value(), -10);
    }

    #[test]
    fn can_add_and_reset_f64_atomic_value() {
        let atomic = f64::new_atomic_tracker(0.0);
        atomic.add(15.3);
        atomic.add(10.4);
        assert!((atomic.get_value() - 25.7).abs() < 0.0001);

        assert!((atomic.get_and_reset_value() - 25.7).abs() < 0.0001);
        assert!(atomic.get_value().abs() < 0.0001);
    }

    #[test]
    fn nan_is_not_a_valid_sample() {
        assert!(!f64::NAN.is_valid_sample());
        assert!(1.0_f64.is_valid_sample());
        assert!(5_u64.is_valid_sample());
    }
}
