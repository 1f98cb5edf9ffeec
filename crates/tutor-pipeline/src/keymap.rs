//! Small keyed-map primitives shared by the transcription and reasoning
//! schedulers — the coarse-map idiom generalized from this codebase's
//! `SessionLockMap`/`CancelMap` rather than a per-session actor (see
//! DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

pub fn page_key(session_id: &str, page: i32) -> String {
    format!("{session_id}:{page}")
}

/// One `Notify` per key, replaced wholesale on `reset` so that any task still
/// holding a clone of the old `Notify` observes nothing further — it simply
/// never fires, the same as an event being superseded.
#[derive(Default)]
pub struct ReadyMap {
    inner: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ReadyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the notifier for `key` with a fresh one.
    pub fn reset(&self, key: &str) {
        self.inner.lock().insert(key.to_string(), Arc::new(Notify::new()));
    }

    /// Wake any current waiters for `key`.
    pub fn signal(&self, key: &str) {
        let notify = self
            .inner
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        notify.notify_waiters();
    }

    fn current(&self, key: &str) -> Arc<Notify> {
        self.inner
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Wait for the next signal on `key`, up to `timeout`. Returns `true` if
    /// signaled, `false` on timeout.
    pub async fn wait(&self, key: &str, timeout: std::time::Duration) -> bool {
        let notify = self.current(key);
        tokio::time::timeout(timeout, notify.notified())
            .await
            .is_ok()
    }

    pub fn remove(&self, key: &str) {
        self.inner.lock().remove(key);
    }
}

/// A join-handle map used to enforce "at most one in-flight task per key",
/// cancelling the predecessor before a new one is scheduled.
#[derive(Default)]
pub struct TaskMap {
    inner: Mutex<HashMap<String, tokio::task::JoinHandle<()>>>,
}

impl TaskMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort any existing task for `key` and register the new one.
    pub fn replace(&self, key: &str, handle: tokio::task::JoinHandle<()>) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.insert(key.to_string(), handle) {
            old.abort();
        }
    }

    /// Abort and remove the task for `key`, if any.
    pub fn cancel(&self, key: &str) {
        if let Some(old) = self.inner.lock().remove(key) {
            old.abort();
        }
    }

    pub fn remove(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn page_key_joins_session_and_page() {
        assert_eq!(page_key("s1", 3), "s1:3");
    }

    #[tokio::test]
    async fn ready_map_wait_times_out_without_signal() {
        let ready = ReadyMap::new();
        ready.reset("s1:1");
        let signaled = ready.wait("s1:1", Duration::from_millis(20)).await;
        assert!(!signaled);
    }

    #[tokio::test]
    async fn ready_map_signal_wakes_waiter() {
        let ready = Arc::new(ReadyMap::new());
        ready.reset("s1:1");
        let ready2 = ready.clone();
        let handle = tokio::spawn(async move { ready2.wait("s1:1", Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        ready.signal("s1:1");
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn ready_map_reset_does_not_wake_old_waiters() {
        let ready = Arc::new(ReadyMap::new());
        ready.reset("s1:1");
        let ready2 = ready.clone();
        let handle = tokio::spawn(async move { ready2.wait("s1:1", Duration::from_millis(100)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        // A reset models "scheduling a new transcription" — old waiters on
        // the previous notifier should not be woken by a signal issued
        // against the key after the reset swaps the Arc.
        ready.reset("s1:1");
        ready.signal("s1:1");
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn task_map_replace_aborts_previous_task() {
        let map = TaskMap::new();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        let first = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ran2.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        map.replace("s1:1", first);
        let second = tokio::spawn(async {});
        map.replace("s1:1", second);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
