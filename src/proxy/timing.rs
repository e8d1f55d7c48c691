use crate::proxy::{Mailbox, MailboxId, ProxyMsg};

use log::trace;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval of the scheduler thread. Timers never fire early;
/// this bounds how late they can fire.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Entry {
    deadline: Instant,
    subscriber: Mailbox,
    msg: ProxyMsg,
}

/// The central timing service: a single scheduler with a monotonic
/// clock that delivers scheduled messages into subscriber mailboxes.
///
/// Entries are delivered (and erased) on the first poll at or after
/// their deadline. Cancellation drops every pending entry of one
/// subscriber.
pub struct Timing {
    entries: Mutex<Vec<Entry>>,
    running: AtomicBool,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Timing {
    /// Creates the service without a scheduler thread; ticks must be
    /// driven manually. Used by tests and by [`Timing::start`].
    pub fn new() -> Arc<Timing> {
        Arc::new(Timing {
            entries: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
        })
    }

    /// Creates the service and spawns its scheduler thread.
    pub fn start() -> Arc<Timing> {
        let timing = Timing::new();
        timing.running.store(true, Ordering::SeqCst);
        let worker = Arc::clone(&timing);
        let handle = thread::Builder::new()
            .name("timing".to_string())
            .spawn(move || {
                while worker.running.load(Ordering::SeqCst) {
                    thread::sleep(POLL_INTERVAL);
                    worker.tick(Instant::now());
                }
            })
            .expect("failed to spawn the timing thread");
        *timing.thread.lock().unwrap() = Some(handle);
        timing
    }

    /// Schedules `msg` for delivery to `subscriber` after `delay`.
    pub fn add(&self, delay: Duration, subscriber: &Mailbox, msg: ProxyMsg) {
        let mut entries = self.entries.lock().unwrap();
        entries.push(Entry {
            deadline: Instant::now() + delay,
            subscriber: subscriber.clone(),
            msg,
        });
    }

    /// Drops all pending entries of `subscriber`.
    pub fn cancel(&self, subscriber: MailboxId) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.subscriber.id() != subscriber);
    }

    /// Number of pending entries.
    pub fn pending(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Delivers everything due at `now`. Messages are sent outside of
    /// the entry lock: a full subscriber mailbox blocks delivery, not
    /// scheduling.
    pub fn tick(&self, now: Instant) {
        let due: Vec<Entry> = {
            let mut entries = self.entries.lock().unwrap();
            let mut due = Vec::new();
            let mut remaining = Vec::with_capacity(entries.len());
            for entry in entries.drain(..) {
                if entry.deadline <= now {
                    due.push(entry);
                } else {
                    remaining.push(entry);
                }
            }
            *entries = remaining;
            due
        };
        for entry in due {
            trace!("timing: delivering a due message");
            entry.subscriber.send(entry.msg);
        }
    }

    /// Stops and joins the scheduler thread.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delivers_due_entries_only() {
        let timing = Timing::new();
        let mb = Mailbox::new(16);
        timing.add(Duration::from_millis(0), &mb, ProxyMsg::Test(1));
        timing.add(Duration::from_secs(3600), &mb, ProxyMsg::Test(2));

        timing.tick(Instant::now() + Duration::from_millis(1));
        assert!(matches!(mb.try_recv(), Some(ProxyMsg::Test(1))));
        assert!(mb.try_recv().is_none());
        assert_eq!(timing.pending(), 1);

        // never before the deadline, late is fine
        timing.tick(Instant::now() + Duration::from_secs(7200));
        assert!(matches!(mb.try_recv(), Some(ProxyMsg::Test(2))));
        assert_eq!(timing.pending(), 0);
    }

    #[test]
    fn cancel_drops_only_one_subscriber() {
        let timing = Timing::new();
        let a = Mailbox::new(16);
        let b = Mailbox::new(16);
        timing.add(Duration::from_millis(0), &a, ProxyMsg::Test(1));
        timing.add(Duration::from_millis(0), &b, ProxyMsg::Test(2));

        timing.cancel(a.id());
        timing.tick(Instant::now() + Duration::from_millis(1));
        assert!(a.try_recv().is_none());
        assert!(matches!(b.try_recv(), Some(ProxyMsg::Test(2))));
    }

    #[test]
    fn threaded_delivery() {
        let timing = Timing::start();
        let mb = Mailbox::new(16);
        timing.add(Duration::from_millis(10), &mb, ProxyMsg::Test(7));
        // the poll loop delivers within a few intervals
        match mb.recv() {
            ProxyMsg::Test(7) => {}
            other => panic!("unexpected message {:?}", other),
        }
        timing.stop();
    }
}
