//! Timeline sync objects.
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use minstant::Instant;

use crate::Error;

#[derive(Debug)]
struct State {
    value: u64,
    lost: bool,
}

/// A 64-bit timeline. Waiters block until the value reaches a point.
#[derive(Debug)]
pub struct SyncObject {
    id: u32,
    state: Mutex<State>,
    cond: Condvar,
}

impl SyncObject {
    pub(crate) fn new(id: u32, initial: u64) -> Self {
        SyncObject {
            id,
            state: Mutex::new(State {
                value: initial,
                lost: false,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn read(&self) -> u64 {
        self.lock().value
    }

    /// Set the value unconditionally and wake all waiters.
    pub fn write(&self, value: u64) {
        self.lock().value = value;
        self.cond.notify_all();
    }

    /// Restart the timeline at `initial`.
    pub fn reset(&self, initial: u64) {
        let mut state = self.lock();
        state.value = initial;
        state.lost = false;
        drop(state);
        self.cond.notify_all();
    }

    /// Advance the timeline to `point`. Never moves it backwards.
    pub fn signal(&self, point: u64) {
        let mut state = self.lock();
        state.value = state.value.max(point);
        drop(state);
        self.cond.notify_all();
    }

    /// Fail every current and future wait that has not been satisfied.
    pub(crate) fn mark_lost(&self) {
        self.lock().lost = true;
        self.cond.notify_all();
    }

    /// Block until the value reaches `point`, `timeout` elapses or the
    /// renderer is lost. `None` waits forever.
    pub fn wait_until(&self, point: u64, timeout: Option<Duration>) -> Result<(), Error> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            if state.value >= point {
                return Ok(());
            }
            if state.lost {
                return Err(Error::Lost);
            }

            state = match deadline {
                None => self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn signal_wakes_waiter() {
        let sync = Arc::new(SyncObject::new(1, 0));
        crossbeam::thread::scope(|s| {
            s.spawn(|_| sync.wait_until(3, None).unwrap());
            sync.signal(1);
            sync.signal(3);
        })
        .unwrap();

        sync.signal(2);
        assert_eq!(sync.read(), 3);
        sync.write(1);
        assert_eq!(sync.read(), 1);
    }

    #[test]
    fn wait_times_out() {
        let sync = SyncObject::new(1, 5);
        assert!(sync.wait_until(5, Some(Duration::ZERO)).is_ok());
        assert!(matches!(
            sync.wait_until(6, Some(Duration::from_millis(10))),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn lost_fails_waiters() {
        let sync = SyncObject::new(1, 0);
        sync.mark_lost();
        assert!(matches!(sync.wait_until(1, None), Err(Error::Lost)));
        // already reached points still succeed
        assert!(sync.wait_until(0, None).is_ok());
        sync.reset(0);
        assert!(sync.wait_until(1, Some(Duration::ZERO)).is_err());
    }
}
