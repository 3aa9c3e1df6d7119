// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A pool of timer queues, each driven by its own worker thread sitting on a `base::Timer`
//! (the teacher's `timerfd` wrapper). Mirrors the way the teacher runs one thread per event
//! source rather than a single global reactor: short critical sections, no shared run loop to
//! starve.

use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use remain::sorted;
use thiserror::Error as ThisError;

use base::Timer;

#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    /// No queue in the pool had room for another timer.
    #[error("timer pool is full")]
    TooMany,
    /// The referenced timer id is not (or no longer) registered.
    #[error("unknown timer id {0}")]
    UnknownId(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handle returned by `TimerQueue::add`/`TimerPool::add`, needed to cancel the timer later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(u64);

type Callback = Box<dyn FnMut() + Send>;

struct Entry {
    interval: Option<Duration>,
    boundary: bool,
    level: u8,
    generation: u64,
    callback: Callback,
}

struct HeapItem {
    deadline: Instant,
    id: u64,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest deadline first.
        Reverse(self.deadline).cmp(&Reverse(other.deadline))
    }
}

struct State {
    entries: HashMap<u64, Entry>,
    heap: BinaryHeap<HeapItem>,
    next_id: u64,
    running_id: Option<u64>,
    shutdown: bool,
}

/// A single queue: one worker thread, one `timerfd`, a bounded set of entries. Entries fire in
/// monotonic deadline order within the queue; cross-queue ordering is not guaranteed, same as the
/// teacher's multi-queue timer pool.
pub struct TimerQueue {
    state: Arc<Mutex<State>>,
    cv: Arc<Condvar>,
    capacity: usize,
    thread: Option<JoinHandle<()>>,
}

fn boundary_deadline(now: Instant, interval: Duration) -> Instant {
    // Align the first fire to the next multiple of `interval` since process start, rather than
    // exactly `interval` from `now`.
    let interval_ms = interval.as_millis().max(1) as u64;
    let elapsed_ms = now.elapsed().as_millis() as u64;
    let remainder_ms = interval_ms - (elapsed_ms % interval_ms);
    now + Duration::from_millis(remainder_ms)
}

impl TimerQueue {
    pub fn new(capacity: usize) -> Self {
        let state = Arc::new(Mutex::new(State {
            entries: HashMap::new(),
            heap: BinaryHeap::new(),
            next_id: 1,
            running_id: None,
            shutdown: false,
        }));
        let cv = Arc::new(Condvar::new());

        let worker_state = state.clone();
        let worker_cv = cv.clone();
        let thread = thread::spawn(move || run_worker(worker_state, worker_cv));

        TimerQueue {
            state,
            cv,
            capacity,
            thread: Some(thread),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a new timer. `boundary` aligns the first fire to the next boundary modulo
    /// `interval` rather than firing exactly `interval` from now.
    pub fn add(
        &self,
        interval: Duration,
        boundary: bool,
        level: u8,
        callback: impl FnMut() + Send + 'static,
    ) -> Result<TimerId> {
        let mut st = self.state.lock().unwrap();
        if st.entries.len() >= self.capacity {
            return Err(Error::TooMany);
        }
        let id = st.next_id;
        st.next_id += 1;

        let now = Instant::now();
        let deadline = if boundary {
            boundary_deadline(now, interval)
        } else {
            now + interval
        };

        st.entries.insert(
            id,
            Entry {
                interval: Some(interval),
                boundary,
                level,
                generation: 0,
                callback: Box::new(callback),
            },
        );
        st.heap.push(HeapItem { deadline, id });
        self.cv.notify_all();
        Ok(TimerId(id))
    }

    /// Cancels `id`. If its callback is currently executing on the worker thread, blocks until it
    /// finishes, matching the teacher's synchronous-cancellation guarantee.
    pub fn remove(&self, id: TimerId) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        loop {
            if st.running_id == Some(id.0) {
                st = self.cv.wait(st).unwrap();
                continue;
            }
            return match st.entries.remove(&id.0) {
                Some(_) => Ok(()),
                None => Err(Error::UnknownId(id.0)),
            };
        }
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        {
            let mut st = self.state.lock().unwrap();
            st.shutdown = true;
        }
        self.cv.notify_all();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

fn run_worker(state: Arc<Mutex<State>>, cv: Arc<Condvar>) {
    let mut timer = match Timer::new() {
        Ok(t) => t,
        Err(e) => {
            log::error!("timer_wheel: failed to create timerfd: {:?}", e);
            return;
        }
    };

    loop {
        let wait_for = {
            let st = state.lock().unwrap();
            if st.shutdown {
                return;
            }
            match st.heap.peek() {
                Some(item) => {
                    let now = Instant::now();
                    Some(item.deadline.saturating_duration_since(now))
                }
                None => None,
            }
        };

        match wait_for {
            Some(d) => {
                if timer.reset(d.max(Duration::from_micros(1)), None).is_err() {
                    thread::sleep(Duration::from_millis(1));
                }
                let _ = timer.wait_for(Some(d + Duration::from_millis(5)));
            }
            None => {
                // No timers pending: poll occasionally for shutdown/new entries.
                thread::sleep(Duration::from_millis(20));
            }
        }

        let now = Instant::now();
        let due: Vec<u64> = {
            let mut st = state.lock().unwrap();
            if st.shutdown {
                return;
            }
            let mut ids = Vec::new();
            while let Some(top) = st.heap.peek() {
                if top.deadline > now {
                    break;
                }
                ids.push(st.heap.pop().unwrap().id);
            }
            ids
        };

        for id in due {
            let mut cb = {
                let mut st = state.lock().unwrap();
                match st.entries.get_mut(&id) {
                    Some(entry) => {
                        st.running_id = Some(id);
                        // Take the callback out so we can call it without holding the lock;
                        // it is restored (or the entry dropped) once it returns.
                        std::mem::replace(&mut entry.callback, Box::new(|| {}))
                    }
                    None => continue,
                }
            };

            cb();

            let mut st = state.lock().unwrap();
            st.running_id = None;
            if let Some(entry) = st.entries.get_mut(&id) {
                entry.callback = cb;
                entry.generation += 1;
                if let Some(interval) = entry.interval {
                    let deadline = Instant::now() + interval;
                    st.heap.push(HeapItem { deadline, id });
                } else {
                    st.entries.remove(&id);
                }
            }
            drop(st);
            cv.notify_all();
        }
    }
}

/// A fixed pool of queues. New timers go to the least-loaded queue that still has room.
pub struct TimerPool {
    queues: Vec<TimerQueue>,
    queue_capacity: usize,
}

impl TimerPool {
    pub fn new(num_queues: usize, queue_capacity: usize) -> Self {
        TimerPool {
            queues: (0..num_queues.max(1))
                .map(|_| TimerQueue::new(queue_capacity))
                .collect(),
            queue_capacity,
        }
    }

    /// Adds another queue to the pool, used when callers hit `TooMany` repeatedly.
    pub fn add_queue(&mut self) {
        self.queues.push(TimerQueue::new(self.queue_capacity));
    }

    pub fn add(
        &self,
        interval: Duration,
        boundary: bool,
        level: u8,
        callback: impl FnMut() + Send + 'static,
    ) -> Result<(usize, TimerId)> {
        let mut best: Option<(usize, usize)> = None;
        for (idx, q) in self.queues.iter().enumerate() {
            let len = q.len();
            if len < self.queue_capacity && best.map_or(true, |(_, best_len)| len < best_len) {
                best = Some((idx, len));
            }
        }
        let idx = best.ok_or(Error::TooMany)?.0;
        let id = self.queues[idx].add(interval, boundary, level, callback)?;
        Ok((idx, id))
    }

    pub fn remove(&self, queue_idx: usize, id: TimerId) -> Result<()> {
        self.queues
            .get(queue_idx)
            .ok_or(Error::UnknownId(id.0))?
            .remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering as AtomicOrdering;

    #[test]
    fn fires_once_shot_timer() {
        let q = TimerQueue::new(8);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        q.add(Duration::from_millis(5), false, 0, move || {
            hits2.fetch_add(1, AtomicOrdering::SeqCst);
        })
        .unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn pool_rejects_when_full() {
        let pool = TimerPool::new(1, 1);
        pool.add(Duration::from_secs(60), false, 0, || {}).unwrap();
        assert!(matches!(
            pool.add(Duration::from_secs(60), false, 0, || {}),
            Err(Error::TooMany)
        ));
    }

    #[test]
    fn remove_cancels_before_fire() {
        let q = TimerQueue::new(8);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let id = q
            .add(Duration::from_millis(50), false, 0, move || {
                hits2.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .unwrap();
        q.remove(id).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 0);
    }
}
