// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Periodic tasks: a single worker thread wakes every `sleep_ms` and runs each registered
//! callback once. Used to drive NIO transmit drains and bandwidth-governor counter resets, where
//! a dedicated `timerfd` per task would be wasteful.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

type Callback = Box<dyn FnMut() + Send>;

struct State {
    tasks: HashMap<u64, Callback>,
    next_id: u64,
    pending_removals: Vec<u64>,
    shutdown: bool,
}

/// Handle returned by `PeriodicTasks::add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(u64);

/// The periodic-task scheduler. One worker thread serves every registered task.
pub struct PeriodicTasks {
    state: Arc<Mutex<State>>,
    thread: Option<JoinHandle<()>>,
}

impl PeriodicTasks {
    pub fn new(sleep: Duration) -> Self {
        let state = Arc::new(Mutex::new(State {
            tasks: HashMap::new(),
            next_id: 1,
            pending_removals: Vec::new(),
            shutdown: false,
        }));
        let worker_state = state.clone();
        let thread = thread::spawn(move || run_worker(worker_state, sleep));
        PeriodicTasks {
            state,
            thread: Some(thread),
        }
    }

    pub fn add(&self, callback: impl FnMut() + Send + 'static) -> TaskId {
        let mut st = self.state.lock().unwrap();
        let id = st.next_id;
        st.next_id += 1;
        st.tasks.insert(id, Box::new(callback));
        TaskId(id)
    }

    /// Removes a task. Safe to call from within the task's own callback: removal is deferred
    /// until the current sweep finishes.
    pub fn remove(&self, id: TaskId) {
        let mut st = self.state.lock().unwrap();
        if st.tasks.remove(&id.0).is_none() {
            st.pending_removals.push(id.0);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PeriodicTasks {
    fn drop(&mut self) {
        self.state.lock().unwrap().shutdown = true;
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

fn run_worker(state: Arc<Mutex<State>>, sleep: Duration) {
    loop {
        thread::sleep(sleep);

        let ids: Vec<u64> = {
            let st = state.lock().unwrap();
            if st.shutdown {
                return;
            }
            st.tasks.keys().copied().collect()
        };

        for id in ids {
            let mut cb = {
                let mut st = state.lock().unwrap();
                if st.pending_removals.contains(&id) {
                    continue;
                }
                match st.tasks.remove(&id) {
                    Some(cb) => cb,
                    None => continue,
                }
            };

            cb();

            let mut st = state.lock().unwrap();
            st.pending_removals.retain(|removed| *removed != id);
            if !st.shutdown {
                st.tasks.entry(id).or_insert(cb);
            }
        }

        let mut st = state.lock().unwrap();
        st.pending_removals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[test]
    fn runs_every_tick() {
        let pt = PeriodicTasks::new(Duration::from_millis(10));
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        pt.add(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(55));
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn task_can_remove_itself() {
        let pt = PeriodicTasks::new(Duration::from_millis(10));
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let state = pt.state.clone();
        let id_cell: Arc<Mutex<Option<TaskId>>> = Arc::new(Mutex::new(None));
        let id_cell2 = id_cell.clone();
        let id = pt.add(move || {
            count2.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *id_cell2.lock().unwrap() {
                let mut st = state.lock().unwrap();
                st.pending_removals.push(id.0);
            }
        });
        *id_cell.lock().unwrap() = Some(id);
        thread::sleep(Duration::from_millis(80));
        let after = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), after);
    }
}
