//! Bounded ingress buffer feeding the dispatch loop.
//!
//! Capacity is accounted with a semaphore: each queued job holds one permit,
//! returned when the job is popped. Backpressure pushes wait for a permit;
//! the dropping policies displace jobs instead, handing the victims back to
//! the caller so every displaced request still receives an answer.

use crate::{config::OverflowPolicy, worker::Job};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::{Notify, Semaphore, TryAcquireError};

/// Why a push did not enqueue the job.
pub(crate) enum PushError<T, C> {
    /// The queue has been closed.
    Closed(Job<T, C>),
    /// The overflow policy rejected the job.
    Rejected(Job<T, C>),
}

impl<T, C> std::fmt::Debug for PushError<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Closed(_) => f.write_str("PushError::Closed(..)"),
            PushError::Rejected(_) => f.write_str("PushError::Rejected(..)"),
        }
    }
}

pub(crate) struct IngressQueue<T, C> {
    shared: Arc<Shared<T, C>>,
}

impl<T, C> Clone for IngressQueue<T, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<T, C> {
    closed: AtomicBool,
    jobs: Mutex<VecDeque<Job<T, C>>>,
    notify: Notify,
    policy: OverflowPolicy,
    semaphore: Semaphore,
}

impl<T, C> IngressQueue<T, C> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);

        Self {
            shared: Arc::new(Shared {
                closed: AtomicBool::new(false),
                jobs: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
                policy,
                semaphore: Semaphore::new(capacity),
            }),
        }
    }

    /// Enqueue a job according to the overflow policy.
    ///
    /// Returns the jobs displaced to make room, if any; the caller must
    /// answer each of them.
    pub async fn push(&self, job: Job<T, C>) -> Result<Vec<Job<T, C>>, PushError<T, C>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PushError::Closed(job));
        }

        if let OverflowPolicy::Backpressure = self.shared.policy {
            return match self.shared.semaphore.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    self.enqueue(job);

                    Ok(Vec::new())
                }
                Err(_) => Err(PushError::Closed(job)),
            };
        }

        match self.shared.semaphore.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.enqueue(job);

                Ok(Vec::new())
            }
            Err(TryAcquireError::Closed) => Err(PushError::Closed(job)),
            Err(TryAcquireError::NoPermits) => self.overflow(job),
        }
    }

    /// Apply the overflow policy to a job arriving at a full buffer.
    fn overflow(&self, job: Job<T, C>) -> Result<Vec<Job<T, C>>, PushError<T, C>> {
        match self.shared.policy {
            OverflowPolicy::Backpressure => unreachable!("backpressure pushes wait for a permit"),
            OverflowPolicy::DropNew => Err(PushError::Rejected(job)),
            OverflowPolicy::DropOld => {
                let victim = {
                    let mut jobs = self.shared.jobs.lock().expect("ingress queue poisoned");
                    let victim = jobs.pop_front();
                    jobs.push_back(job);

                    victim
                };

                self.shared.notify.notify_one();

                Ok(victim.into_iter().collect())
            }
            OverflowPolicy::DropBuffer => {
                let victims = {
                    let mut jobs = self.shared.jobs.lock().expect("ingress queue poisoned");
                    let victims: Vec<_> = jobs.drain(..).collect();
                    jobs.push_back(job);

                    victims
                };

                // The displaced jobs' permits transfer: one to the new job,
                // the rest back to the semaphore.
                self.shared
                    .semaphore
                    .add_permits(victims.len().saturating_sub(1));
                self.shared.notify.notify_one();

                Ok(victims)
            }
            OverflowPolicy::Fail => {
                self.close();

                Err(PushError::Rejected(job))
            }
        }
    }

    fn enqueue(&self, job: Job<T, C>) {
        self.shared
            .jobs
            .lock()
            .expect("ingress queue poisoned")
            .push_back(job);
        self.shared.notify.notify_one();
    }

    /// Stop accepting jobs. Already queued jobs are still popped.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.semaphore.close();
        self.shared.notify.notify_one();
    }

    /// Next job in ingress order, or `None` once the queue is closed and
    /// empty.
    pub async fn pop(&self) -> Option<Job<T, C>> {
        loop {
            {
                let mut jobs = self.shared.jobs.lock().expect("ingress queue poisoned");

                if let Some(job) = jobs.pop_front() {
                    self.shared.semaphore.add_permits(1);

                    return Some(job);
                }

                if self.shared.closed.load(Ordering::Acquire) {
                    return None;
                }
            }

            self.shared.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IngressQueue, PushError};
    use crate::{
        config::OverflowPolicy,
        request::{empty_parser, Request},
        worker::{Job, Responder},
    };
    use eventide_http_ratelimiting::request::{Method, RequestId};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn job(id: u64) -> Job<(), u64> {
        let request = Request::builder(Method::Get, "gateway", empty_parser(), id)
            .identifier(RequestId::new(id))
            .build();
        let route = request.route();
        let (tx, _rx) = oneshot::channel();

        Job {
            attempts: 0,
            request,
            responder: Responder::Once(tx),
            route,
        }
    }

    #[tokio::test]
    async fn pops_in_ingress_order() {
        let queue = IngressQueue::new(4, OverflowPolicy::Backpressure);

        queue.push(job(1)).await.unwrap();
        queue.push(job(2)).await.unwrap();

        assert_eq!(RequestId::new(1), queue.pop().await.unwrap().request.identifier);
        assert_eq!(RequestId::new(2), queue.pop().await.unwrap().request.identifier);
    }

    #[tokio::test]
    async fn backpressure_waits_for_room() {
        let queue = IngressQueue::new(1, OverflowPolicy::Backpressure);
        queue.push(job(1)).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), queue.push(job(2))).await;
        assert!(blocked.is_err(), "push should wait while the buffer is full");

        let consumer = queue.clone();
        let popper = tokio::spawn(async move { consumer.pop().await });

        queue.push(job(3)).await.unwrap();
        assert_eq!(
            RequestId::new(1),
            popper.await.unwrap().unwrap().request.identifier,
        );
    }

    #[tokio::test]
    async fn drop_new_rejects_the_arrival() {
        let queue = IngressQueue::new(1, OverflowPolicy::DropNew);
        queue.push(job(1)).await.unwrap();

        match queue.push(job(2)).await {
            Err(PushError::Rejected(rejected)) => {
                assert_eq!(RequestId::new(2), rejected.request.identifier);
            }
            _ => panic!("expected the arrival to be rejected"),
        }

        assert_eq!(RequestId::new(1), queue.pop().await.unwrap().request.identifier);
    }

    #[tokio::test]
    async fn drop_old_displaces_the_oldest() {
        let queue = IngressQueue::new(2, OverflowPolicy::DropOld);
        queue.push(job(1)).await.unwrap();
        queue.push(job(2)).await.unwrap();

        let victims = queue.push(job(3)).await.unwrap();
        assert_eq!(1, victims.len());
        assert_eq!(RequestId::new(1), victims[0].request.identifier);

        assert_eq!(RequestId::new(2), queue.pop().await.unwrap().request.identifier);
        assert_eq!(RequestId::new(3), queue.pop().await.unwrap().request.identifier);
    }

    #[tokio::test]
    async fn drop_buffer_displaces_everything() {
        let queue = IngressQueue::new(2, OverflowPolicy::DropBuffer);
        queue.push(job(1)).await.unwrap();
        queue.push(job(2)).await.unwrap();

        let victims = queue.push(job(3)).await.unwrap();
        assert_eq!(2, victims.len());

        assert_eq!(RequestId::new(3), queue.pop().await.unwrap().request.identifier);

        // The displaced permits are back; the buffer accepts new jobs.
        queue.push(job(4)).await.unwrap();
    }

    #[tokio::test]
    async fn fail_closes_the_queue() {
        let queue = IngressQueue::new(1, OverflowPolicy::Fail);
        queue.push(job(1)).await.unwrap();

        assert!(matches!(
            queue.push(job(2)).await,
            Err(PushError::Rejected(_)),
        ));
        assert!(matches!(
            queue.push(job(3)).await,
            Err(PushError::Closed(_)),
        ));

        // Already queued jobs drain before the queue reports end of input.
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_a_waiting_consumer() {
        let queue: IngressQueue<(), u64> = IngressQueue::new(1, OverflowPolicy::Backpressure);
        let consumer = queue.clone();
        let popper = tokio::spawn(async move { consumer.pop().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        assert!(popper.await.unwrap().is_none());
    }
}
