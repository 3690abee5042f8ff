//! Single-writer coordinator owning all ratelimit state.
//!
//! Every mutation of the bucket table and the global block happens on one
//! task, fed by a mailbox processed sequentially; per-bucket admission order
//! is therefore ingress order by construction. Timer wakeups are sleeps that
//! post messages back to the mailbox through a weak sender, so outstanding
//! timers never keep a shut-down actor alive.

use crate::{
    bucket::{BucketKey, BucketTable, Verdict, Waiter},
    headers::RatelimitHeaders,
    request::{RequestId, RouteKey},
    BucketInfo, RatelimiterConfig,
};
use std::{
    collections::{HashSet, VecDeque},
    time::{Duration, Instant},
};
use tokio::sync::{
    mpsc::{UnboundedReceiver, WeakUnboundedSender},
    oneshot,
};

/// Message processed by the actor.
#[derive(Debug)]
pub(crate) enum Command {
    /// A request wants to pass the limiter.
    Acquire {
        route: RouteKey,
        id: RequestId,
        tx: oneshot::Sender<Verdict>,
    },
    /// A response (or the lack of one) was observed for an admitted request.
    Complete {
        route: RouteKey,
        id: RequestId,
        headers: Option<RatelimitHeaders>,
        received_at: Instant,
    },
    /// An admitted request was cancelled before any response was observed.
    Release { route: RouteKey, id: RequestId },
    /// Snapshot the bucket a route currently maps to.
    Bucket {
        route: RouteKey,
        tx: oneshot::Sender<Option<BucketInfo>>,
    },
    /// Whether a global ratelimit is in place.
    GloballyLocked { tx: oneshot::Sender<bool> },
    /// A bucket's reset instant has passed.
    BucketReset { key: BucketKey },
    /// The global block's reset instant has passed.
    GlobalReset,
}

pub(crate) struct Actor {
    rx: UnboundedReceiver<Command>,
    /// Weak handle for timers posting back into the mailbox.
    tx: WeakUnboundedSender<Command>,
    table: BucketTable,
    /// Admitted requests for which no response has been observed yet.
    in_flight: HashSet<RequestId>,
    global_until: Option<Instant>,
    global_queue: VecDeque<(RouteKey, RequestId, oneshot::Sender<Verdict>)>,
    global_timer_armed: bool,
    config: RatelimiterConfig,
}

impl Actor {
    pub fn new(
        rx: UnboundedReceiver<Command>,
        tx: WeakUnboundedSender<Command>,
        config: RatelimiterConfig,
    ) -> Self {
        Self {
            rx,
            tx,
            table: BucketTable::new(config.max_buckets),
            in_flight: HashSet::new(),
            global_until: None,
            global_queue: VecDeque::new(),
            global_timer_armed: false,
            config,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!("ratelimiter started");

        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }

        // Remaining waiters are dropped here; their acquire futures resolve
        // as closed.
        tracing::debug!("ratelimiter shutting down");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Acquire { route, id, tx } => self.acquire(route, id, tx),
            Command::Complete {
                route,
                id,
                headers,
                received_at,
            } => self.complete(&route, id, headers, received_at),
            Command::Release { route, id } => self.release(&route, id),
            Command::Bucket { route, tx } => {
                let key = self.table.key_for(&route);
                let info = self
                    .table
                    .get(&key)
                    .map(|bucket| BucketInfo::of(&bucket.state, Instant::now()));

                let _ = tx.send(info);
            }
            Command::GloballyLocked { tx } => {
                let locked = matches!(self.global_until, Some(until) if until > Instant::now());

                let _ = tx.send(locked);
            }
            Command::BucketReset { key } => {
                if let Some(bucket) = self.table.get_mut(&key) {
                    bucket.timer_armed = false;
                }

                self.drain(&key, Instant::now());
            }
            Command::GlobalReset => self.global_reset(),
        }
    }

    fn acquire(&mut self, route: RouteKey, id: RequestId, tx: oneshot::Sender<Verdict>) {
        let now = Instant::now();

        if let Some(until) = self.global_until {
            if until > now {
                if until - now > self.config.max_allowed_wait {
                    tracing::debug!(%route, "global ratelimit outlasts allowed wait, dropping");
                    let _ = tx.send(Verdict::Drop);
                } else {
                    self.global_queue.push_back((route, id, tx));
                }

                return;
            }

            self.global_until = None;
        }

        self.admit(route, id, tx, now);
    }

    fn admit(&mut self, route: RouteKey, id: RequestId, tx: oneshot::Sender<Verdict>, now: Instant) {
        let key = self.table.key_for(&route);
        self.drain(&key, now);

        let max_wait = self.config.max_allowed_wait;
        let bucket = self.table.entry(&key, now);
        bucket.state.last_seen = now;

        if bucket.queue.is_empty() {
            if bucket.state.take_slot() {
                if tx.send(Verdict::Pass).is_ok() {
                    self.in_flight.insert(id);
                } else {
                    bucket.state.give_back_slot();
                }

                return;
            }

            if bucket.state.reset_at.is_none() {
                // Depleted, but the reset is not known; admit optimistically
                // and let the next response correct the window.
                if tx.send(Verdict::Pass).is_ok() {
                    self.in_flight.insert(id);
                }

                return;
            }
        }

        // The wait is bounded inclusively; a reset exactly at the allowed
        // wait still defers. An unknown reset with queued waiters keeps FIFO
        // order and waits for the next update to schedule a wakeup.
        let within_budget = match bucket.state.reset_at {
            Some(at) => at.saturating_duration_since(now) <= max_wait,
            None => true,
        };

        if !within_budget {
            tracing::debug!(%route, "bucket reset outlasts allowed wait, dropping");
            let _ = tx.send(Verdict::Drop);

            return;
        }

        bucket.queue.push_back(Waiter { id, tx });

        if !bucket.timer_armed {
            if let Some(at) = bucket.state.reset_at {
                bucket.timer_armed = true;
                spawn_bucket_timer(self.tx.clone(), key, at);
            }
        }
    }

    fn complete(
        &mut self,
        route: &RouteKey,
        id: RequestId,
        headers: Option<RatelimitHeaders>,
        received_at: Instant,
    ) {
        self.in_flight.remove(&id);

        let Some(headers) = headers else {
            return;
        };

        match headers {
            RatelimitHeaders::None => {}
            RatelimitHeaders::GlobalLimited(global) => {
                let until = received_at + Duration::from_millis(global.reset_after());
                self.block_globally(until);
            }
            RatelimitHeaders::Present(present) => {
                let now = Instant::now();
                let key = match present.bucket() {
                    Some(bucket_id) => self.table.bind(route, bucket_id, now),
                    None => self.table.key_for(route),
                };

                let reset_at = present.reset_instant(self.config.relative_time, received_at);
                let bucket = self.table.entry(&key, now);

                if bucket
                    .state
                    .apply(present.limit(), present.remaining(), reset_at, now)
                {
                    tracing::debug!(
                        %route,
                        limit = present.limit(),
                        remaining = present.remaining(),
                        "updated bucket",
                    );
                }

                self.drain(&key, now);
                self.table.evict_idle();
            }
        }
    }

    fn release(&mut self, route: &RouteKey, id: RequestId) {
        // Only credit the slot back if no response was observed; a response
        // already set the authoritative window.
        if !self.in_flight.remove(&id) {
            return;
        }

        let key = self.table.key_for(route);

        if let Some(bucket) = self.table.get_mut(&key) {
            bucket.state.give_back_slot();
        }

        self.drain(&key, Instant::now());
    }

    fn block_globally(&mut self, until: Instant) {
        let now = Instant::now();

        if until <= now {
            return;
        }

        if self.global_until.map_or(true, |current| until > current) {
            self.global_until = Some(until);
        }

        tracing::debug!(
            wait = %until.saturating_duration_since(now).as_millis(),
            "globally ratelimited",
        );

        if !self.global_timer_armed {
            self.global_timer_armed = true;
            spawn_global_timer(self.tx.clone(), until);
        }
    }

    fn global_reset(&mut self) {
        self.global_timer_armed = false;
        let now = Instant::now();

        if let Some(until) = self.global_until {
            if until > now {
                // The block was extended by another global 429 in the
                // meantime; sleep again.
                self.global_timer_armed = true;
                spawn_global_timer(self.tx.clone(), until);

                return;
            }
        }

        self.global_until = None;

        for key in self.table.queued_keys() {
            self.drain(&key, now);
        }

        let queue = std::mem::take(&mut self.global_queue);

        for (route, id, tx) in queue {
            self.admit(route, id, tx, now);
        }
    }

    /// Pass queued waiters while the bucket has slots, refilling first if the
    /// window elapsed. No-op while a global block is in place.
    fn drain(&mut self, key: &BucketKey, now: Instant) {
        if matches!(self.global_until, Some(until) if until > now) {
            return;
        }

        let mut passed = Vec::new();
        let mut rearm = None;

        if let Some(bucket) = self.table.get_mut(key) {
            bucket.state.try_reset(now);

            while !bucket.queue.is_empty() {
                if !bucket.state.take_slot() {
                    break;
                }

                let waiter = bucket.queue.pop_front().expect("queue is non-empty");

                if waiter.tx.send(Verdict::Pass).is_ok() {
                    passed.push(waiter.id);
                } else {
                    // Waiter cancelled while queued; it never held a slot.
                    bucket.state.give_back_slot();
                }
            }

            if !bucket.queue.is_empty() && !bucket.timer_armed {
                if let Some(at) = bucket.state.reset_at {
                    bucket.timer_armed = true;
                    rearm = Some(at);
                }
            }
        }

        for id in passed {
            self.in_flight.insert(id);
        }

        if let Some(at) = rearm {
            spawn_bucket_timer(self.tx.clone(), key.clone(), at);
        }
    }
}

fn spawn_bucket_timer(tx: WeakUnboundedSender<Command>, key: BucketKey, at: Instant) {
    tokio::spawn(async move {
        tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;

        if let Some(tx) = tx.upgrade() {
            let _ = tx.send(Command::BucketReset { key });
        }
    });
}

fn spawn_global_timer(tx: WeakUnboundedSender<Command>, at: Instant) {
    tokio::spawn(async move {
        tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;

        if let Some(tx) = tx.upgrade() {
            let _ = tx.send(Command::GlobalReset);
        }
    });
}
