//! FIFO work queue shared between pipeline stages
//!
//! Producers push without ever waiting; consumers suspend on `pop` while the
//! queue is empty. Besides the queued items the queue counts *unfinished*
//! work: an item stays unfinished from `push` until its consumer calls
//! `task_done`, so `wait_idle` only returns once dequeued items have also
//! been fully handled.

use chatsense_common::config::OverflowPolicy;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::warn;

/// Result of a non-blocking push
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    /// Item queued
    Queued,
    /// Queue was full; the oldest item was evicted to make room
    Evicted(T),
    /// Queue was full; the pushed item was rejected
    Rejected(T),
    /// Queue is closed; the pushed item was rejected
    Closed(T),
}

/// Item handed to a consumer
///
/// Tickets are assigned in dequeue order, which is also queue order, so they
/// can be used to restore FIFO order after parallel processing.
#[derive(Debug)]
pub struct Dequeued<T> {
    pub ticket: u64,
    pub item: T,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
    next_ticket: u64,
}

pub struct WorkQueue<T> {
    name: &'static str,
    capacity: Option<usize>,
    policy: OverflowPolicy,
    inner: Mutex<QueueInner<T>>,
    item_ready: Notify,
    unfinished: AtomicUsize,
    idle: Notify,
}

impl<T> WorkQueue<T> {
    /// Queue holding at most `capacity` items; `policy` decides what gives way when full
    pub fn bounded(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Self {
        Self::with_capacity(name, Some(capacity), policy)
    }

    /// Queue without a size bound
    pub fn unbounded(name: &'static str) -> Self {
        Self::with_capacity(name, None, OverflowPolicy::DropNewest)
    }

    fn with_capacity(name: &'static str, capacity: Option<usize>, policy: OverflowPolicy) -> Self {
        Self {
            name,
            capacity,
            policy,
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
                next_ticket: 0,
            }),
            item_ready: Notify::new(),
            unfinished: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push without waiting
    pub fn push(&self, item: T) -> PushOutcome<T> {
        let mut inner = self.lock();

        if inner.closed {
            return PushOutcome::Closed(item);
        }

        let full = self
            .capacity
            .is_some_and(|capacity| inner.items.len() >= capacity);

        if full {
            return match self.policy {
                OverflowPolicy::DropNewest => PushOutcome::Rejected(item),
                OverflowPolicy::DropOldest => match inner.items.pop_front() {
                    // Evicted slot is reused, unfinished count stays the same
                    Some(oldest) => {
                        inner.items.push_back(item);
                        drop(inner);
                        self.item_ready.notify_one();
                        PushOutcome::Evicted(oldest)
                    }
                    None => PushOutcome::Rejected(item),
                },
            };
        }

        inner.items.push_back(item);
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        drop(inner);

        self.item_ready.notify_one();
        PushOutcome::Queued
    }

    /// Wait for the next item
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<Dequeued<T>> {
        loop {
            // Registered before checking so a push or close in between is not missed
            let notified = self.item_ready.notified();

            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    let ticket = inner.next_ticket;
                    inner.next_ticket += 1;
                    return Some(Dequeued { ticket, item });
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark one dequeued item as fully handled
    pub fn task_done(&self) {
        match self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(1) => self.idle.notify_waiters(),
            Ok(_) => {}
            Err(_) => warn!(queue = self.name, "task_done called more often than push"),
        }
    }

    /// Wait until every pushed item has been handled
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.unfinished() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting items; consumers drain what is left and then see `None`
    pub fn close(&self) {
        self.lock().closed = true;
        self.item_ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Items waiting to be dequeued
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items pushed and not yet marked done (queued + in flight)
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
