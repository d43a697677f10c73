// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Periodic task scheduling.
//!
//! A [`ThreadedLogger`](crate::ThreadedLogger) registers one recurring flush with a [`Scheduler`]
//! when it is built and unregisters it when it is closed. [`ThreadScheduler`] runs every
//! registration on one dedicated background thread.
//!
//! Unregistering one task never waits on another: it returns at once unless that very task is
//! running, in which case it waits for the run to end.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::thread::ThreadId;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use crossbeam_channel::unbounded;

use crate::Error;
use crate::ErrorKind;

/// A recurring unit of work.
pub trait Task: Send + Sync + 'static {
    /// Run the task once.
    fn fire(&self);
}

impl<F: Fn() + Send + Sync + 'static> Task for F {
    fn fire(&self) {
        self()
    }
}

/// Handle identifying one registration with a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration(u64);

impl Registration {
    /// Create a handle from a scheduler-specific id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The scheduler-specific id of this handle.
    pub const fn id(&self) -> u64 {
        self.0
    }
}

/// A runner invoking tasks periodically on a background execution context.
pub trait Scheduler: fmt::Debug + Send + Sync + 'static {
    /// Invoke `task` roughly every `period` until unregistered.
    ///
    /// Missed ticks are not compensated.
    fn register(&self, period: Duration, task: Arc<dyn Task>) -> Result<Registration, Error>;

    /// Stop invoking the task behind `registration`.
    ///
    /// Once this returns, the task is not running and will not run again, unless this is called
    /// from within a task on the scheduler's own context, where it only guarantees the latter.
    /// It must not wait on any other registration's task.
    fn unregister(&self, registration: Registration);
}

enum Command {
    Register(Entry),
    Unregister(u64),
}

struct Entry {
    id: u64,
    period: Duration,
    deadline: Instant,
    task: Arc<dyn Task>,
    slot: Arc<Slot>,
}

// Run state of one registration, shared between the scheduler thread and `unregister`.
#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    idle: Condvar,
}

#[derive(Debug, Default)]
struct SlotState {
    cancelled: bool,
    running: bool,
}

impl Slot {
    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark the task running. Return false if it has been cancelled.
    fn begin(&self) -> bool {
        let mut state = self.state();
        if state.cancelled {
            return false;
        }
        state.running = true;
        true
    }

    fn end(&self) {
        self.state().running = false;
        self.idle.notify_all();
    }

    fn cancel(&self, wait: bool) {
        let mut state = self.state();
        state.cancelled = true;
        while wait && state.running {
            state = self.idle.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn is_cancelled(&self) -> bool {
        self.state().cancelled
    }
}

/// A [`Scheduler`] running all registrations on one dedicated thread.
///
/// Dropping the scheduler stops the thread and waits for it to exit.
#[derive(Debug)]
pub struct ThreadScheduler {
    sender: Option<Sender<Command>>,
    next_id: AtomicU64,
    slots: Mutex<HashMap<u64, Arc<Slot>>>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl ThreadScheduler {
    /// Spawn the scheduler thread with the given name.
    pub fn new(thread_name: impl Into<String>) -> Result<Self, Error> {
        let (sender, receiver) = unbounded();
        let handle = std::thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || run(receiver))
            .map_err(|err| {
                Error::new(ErrorKind::Unexpected, "failed to spawn scheduler thread")
                    .with_source(err)
            })?;

        Ok(Self {
            sender: Some(sender),
            next_id: AtomicU64::new(0),
            slots: Mutex::new(HashMap::new()),
            thread_id: handle.thread().id(),
            handle: Some(handle),
        })
    }

    fn send(&self, command: Command) -> Result<(), Error> {
        self.sender
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::Unexpected, "scheduler is shut down"))?
            .send(command)
            .map_err(|_| Error::new(ErrorKind::Unexpected, "scheduler thread has exited"))
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<u64, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Scheduler for ThreadScheduler {
    fn register(&self, period: Duration, task: Arc<dyn Task>) -> Result<Registration, Error> {
        if period.is_zero() {
            return Err(Error::new(
                ErrorKind::Unexpected,
                "task period must be greater than zero",
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot::default());
        self.slots().insert(id, slot.clone());

        let entry = Entry {
            id,
            period,
            deadline: Instant::now() + period,
            task,
            slot,
        };
        if let Err(err) = self.send(Command::Register(entry)) {
            self.slots().remove(&id);
            return Err(err);
        }
        Ok(Registration(id))
    }

    fn unregister(&self, registration: Registration) {
        let id = registration.id();
        let Some(slot) = self.slots().remove(&id) else {
            return;
        };

        // A task unregistering itself would wait on its own run.
        let wait = std::thread::current().id() != self.thread_id;
        slot.cancel(wait);

        // wake the thread so it drops the entry
        let _ = self.send(Command::Unregister(id));
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        // drop our sender, the thread breaks its loop once the channel is disconnected
        drop(self.sender.take());

        if let Some(handle) = self.handle.take() {
            if std::thread::current().id() != self.thread_id {
                let _ = handle.join();
            }
        }
    }
}

fn run(receiver: Receiver<Command>) {
    let mut entries: Vec<Entry> = vec![];

    loop {
        let now = Instant::now();
        for entry in entries.iter_mut().filter(|entry| entry.deadline <= now) {
            if entry.slot.begin() {
                entry.task.fire();
                entry.slot.end();
            }
            entry.deadline = Instant::now() + entry.period;
        }
        entries.retain(|entry| !entry.slot.is_cancelled());

        let next_deadline = entries.iter().map(|entry| entry.deadline).min();
        let command = match next_deadline {
            Some(deadline) => receiver.recv_deadline(deadline),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(Command::Register(entry)) => entries.push(entry),
            Ok(Command::Unregister(id)) => entries.retain(|entry| entry.id != id),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use crossbeam_channel::bounded;

    use super::*;

    #[test]
    fn test_task_fires_periodically() {
        let scheduler = ThreadScheduler::new("scheduler-periodic").unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let registration = scheduler
            .register(Duration::from_millis(10), Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        thread::sleep(Duration::from_millis(200));
        scheduler.unregister(registration);
        assert!(fired.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_unregister_stops_further_fires() {
        let scheduler = ThreadScheduler::new("scheduler-unregister").unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let registration = scheduler
            .register(Duration::from_millis(5), Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        scheduler.unregister(registration);
        let after_unregister = fired.load(Ordering::SeqCst);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), after_unregister);
    }

    #[test]
    fn test_zero_period_is_rejected() {
        let scheduler = ThreadScheduler::new("scheduler-zero").unwrap();
        let err = scheduler
            .register(Duration::ZERO, Arc::new(|| {}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn test_registrations_get_distinct_ids() {
        let scheduler = ThreadScheduler::new("scheduler-ids").unwrap();
        let first = scheduler
            .register(Duration::from_secs(60), Arc::new(|| {}))
            .unwrap();
        let second = scheduler
            .register(Duration::from_secs(60), Arc::new(|| {}))
            .unwrap();
        assert_ne!(first, second);

        scheduler.unregister(first);
        scheduler.unregister(second);
    }

    #[test]
    fn test_unregister_does_not_wait_for_another_running_task() {
        let scheduler = Arc::new(ThreadScheduler::new("scheduler-stalled").unwrap());
        let (started_tx, started_rx) = bounded(1);
        let (release_tx, release_rx) = bounded::<()>(1);

        let stalled = scheduler
            .register(Duration::from_millis(5), Arc::new(move || {
                let _ = started_tx.try_send(());
                let _ = release_rx.recv();
            }))
            .unwrap();
        let idle = scheduler
            .register(Duration::from_secs(60), Arc::new(|| {}))
            .unwrap();

        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("stalled task never ran");

        let (done_tx, done_rx) = bounded(1);
        let unregistering = {
            let scheduler = scheduler.clone();
            thread::spawn(move || {
                scheduler.unregister(idle);
                done_tx.send(()).unwrap();
            })
        };
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        unregistering.join().unwrap();

        drop(release_tx);
        scheduler.unregister(stalled);
    }

    #[test]
    fn test_unregister_waits_for_the_same_task_to_finish() {
        let scheduler = Arc::new(ThreadScheduler::new("scheduler-running").unwrap());
        let (started_tx, started_rx) = bounded(1);
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        let registration = scheduler
            .register(Duration::from_millis(5), Arc::new(move || {
                if started_tx.try_send(()).is_ok() {
                    thread::sleep(Duration::from_millis(100));
                    flag.store(true, Ordering::SeqCst);
                }
            }))
            .unwrap();

        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("task never ran");
        scheduler.unregister(registration);
        assert!(finished.load(Ordering::SeqCst));
    }
}
