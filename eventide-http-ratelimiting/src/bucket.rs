//! Bucket bookkeeping owned by the limiter actor.
//!
//! Buckets are keyed provisionally by [`RouteKey`] until a response names the
//! server-side bucket, at which point the route is bound and the provisional
//! entry migrates into the confirmed one. The table is bounded; idle entries
//! are evicted least-recently-seen first.

use crate::request::{RequestId, RouteKey};
use std::{
    collections::{HashMap, VecDeque},
    time::Instant,
};
use tokio::sync::oneshot;

/// Sentinel for ratelimit values not yet learned from a response.
pub(crate) const UNKNOWN: u64 = u64::MAX;

/// Admission decision sent back to a waiting acquire call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Verdict {
    /// The request may be sent.
    Pass,
    /// The request can not be served within the allowed wait.
    Drop,
}

/// A deferred admission, woken when its bucket refreshes.
#[derive(Debug)]
pub(crate) struct Waiter {
    pub id: RequestId,
    pub tx: oneshot::Sender<Verdict>,
}

/// Identity of a bucket in the table.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) enum BucketKey {
    /// No response has named a bucket for the route yet.
    Provisional(RouteKey),
    /// Bucket named by the `x-ratelimit-bucket` header.
    Confirmed(Box<str>),
}

/// Ratelimit state of a single bucket.
#[derive(Debug)]
pub(crate) struct BucketState {
    /// Total requests allotted in the window, or [`UNKNOWN`].
    pub limit: u64,
    /// Requests remaining in the window, or [`UNKNOWN`].
    pub remaining: u64,
    /// When the window refreshes, if a response has told us.
    pub reset_at: Option<Instant>,
    /// Last time the bucket was touched, for eviction ordering.
    pub last_seen: Instant,
}

impl BucketState {
    pub fn new(now: Instant) -> Self {
        Self {
            limit: UNKNOWN,
            remaining: UNKNOWN,
            reset_at: None,
            last_seen: now,
        }
    }

    /// Whether a response has populated the state.
    pub const fn is_known(&self) -> bool {
        self.limit != UNKNOWN
    }

    /// Refill the window if its reset instant has passed.
    pub fn try_reset(&mut self, now: Instant) -> bool {
        match self.reset_at {
            Some(at) if at <= now => {
                if self.is_known() {
                    self.remaining = self.limit;
                }

                self.reset_at = None;

                true
            }
            _ => false,
        }
    }

    /// Consume one slot from the window.
    ///
    /// Unknown state admits optimistically without consuming anything; the
    /// next response will populate the window.
    pub fn take_slot(&mut self) -> bool {
        if self.remaining == UNKNOWN {
            return true;
        }

        if self.remaining > 0 {
            self.remaining -= 1;

            true
        } else {
            false
        }
    }

    /// Return a slot consumed by [`Self::take_slot`].
    pub fn give_back_slot(&mut self) {
        if self.remaining != UNKNOWN && (self.limit == UNKNOWN || self.remaining < self.limit) {
            self.remaining += 1;
        }
    }

    /// Apply ratelimit values learned from a response.
    ///
    /// The server's `remaining` is authoritative in both directions, but an
    /// update whose reset instant is older than the current one reflects a
    /// response that was overtaken in flight and is discarded.
    pub fn apply(
        &mut self,
        limit: u64,
        remaining: u64,
        reset_at: Option<Instant>,
        now: Instant,
    ) -> bool {
        if let (Some(current), Some(new)) = (self.reset_at, reset_at) {
            if new < current {
                return false;
            }
        }

        self.limit = limit;
        self.remaining = remaining;

        if let Some(reset_at) = reset_at {
            self.reset_at = Some(reset_at);
        }

        self.last_seen = now;

        true
    }
}

/// A bucket's state plus its queue of deferred admissions.
#[derive(Debug)]
pub(crate) struct Bucket {
    pub state: BucketState,
    pub queue: VecDeque<Waiter>,
    /// Whether a wakeup is already scheduled for [`BucketState::reset_at`].
    pub timer_armed: bool,
}

impl Bucket {
    pub fn new(now: Instant) -> Self {
        Self {
            state: BucketState::new(now),
            queue: VecDeque::new(),
            timer_armed: false,
        }
    }
}

/// Bounded map of buckets plus the route-to-bucket bindings.
#[derive(Debug)]
pub(crate) struct BucketTable {
    buckets: HashMap<BucketKey, Bucket>,
    routes: HashMap<RouteKey, Box<str>>,
    capacity: usize,
}

impl BucketTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            buckets: HashMap::new(),
            routes: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Key the route currently maps to: its bound bucket, else itself.
    pub fn key_for(&self, route: &RouteKey) -> BucketKey {
        match self.routes.get(route) {
            Some(bucket) => BucketKey::Confirmed(bucket.clone()),
            None => BucketKey::Provisional(route.clone()),
        }
    }

    pub fn get(&self, key: &BucketKey) -> Option<&Bucket> {
        self.buckets.get(key)
    }

    pub fn get_mut(&mut self, key: &BucketKey) -> Option<&mut Bucket> {
        self.buckets.get_mut(key)
    }

    /// Bucket for the key, created empty if absent.
    pub fn entry(&mut self, key: &BucketKey, now: Instant) -> &mut Bucket {
        self.buckets
            .entry(key.clone())
            .or_insert_with(|| Bucket::new(now))
    }

    /// Record that the route belongs to the named bucket.
    ///
    /// The first observed binding wins for the lifetime of the entry; any
    /// provisional state and queued waiters for the route migrate into the
    /// confirmed bucket. Multiple routes may alias one bucket.
    pub fn bind(&mut self, route: &RouteKey, bucket_id: &str, now: Instant) -> BucketKey {
        if let Some(bound) = self.routes.get(route) {
            if &**bound != bucket_id {
                tracing::debug!(
                    %route,
                    bound = %bound,
                    observed = bucket_id,
                    "bucket binding conflict, keeping first observation",
                );
            }

            return BucketKey::Confirmed(bound.clone());
        }

        let id: Box<str> = bucket_id.into();
        self.routes.insert(route.clone(), id.clone());
        let key = BucketKey::Confirmed(id);

        let provisional = self.buckets.remove(&BucketKey::Provisional(route.clone()));
        let confirmed = self.entry(&key, now);

        if let Some(provisional) = provisional {
            confirmed.queue.extend(provisional.queue);
            confirmed.timer_armed |= provisional.timer_armed;
        }

        key
    }

    /// Drop least-recently-seen idle buckets until within capacity.
    ///
    /// Buckets with queued waiters are never evicted.
    pub fn evict_idle(&mut self) {
        while self.buckets.len() > self.capacity {
            let oldest = self
                .buckets
                .iter()
                .filter(|(_, bucket)| bucket.queue.is_empty())
                .min_by_key(|(_, bucket)| bucket.state.last_seen)
                .map(|(key, _)| key.clone());

            let Some(key) = oldest else {
                break;
            };

            tracing::debug!(?key, "evicting idle bucket");
            self.buckets.remove(&key);

            if let BucketKey::Confirmed(id) = &key {
                self.routes.retain(|_, bound| bound != id);
            }
        }
    }

    /// Keys of buckets with deferred admissions queued.
    pub fn queued_keys(&self) -> Vec<BucketKey> {
        self.buckets
            .iter()
            .filter(|(_, bucket)| !bucket.queue.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }
}
