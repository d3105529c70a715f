//! Alarms owned by the reactor.
//!
//! The dispatcher never sleeps or spawns timers itself. It asks the reactor
//! for [`Alarm`] handles at construction time, arms them, and expects the
//! reactor to call [`Dispatcher::on_alarm`](super::Dispatcher::on_alarm) once a
//! deadline passes, outside of any other callback.
//!
//! [`TimerQueue`] is the single-threaded implementation used by the worker
//! loop and by the tests: alarms are shared deadline cells that the loop polls.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// What an alarm is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmKind {
    /// Drop sessions staged on the deferred deletion queue.
    DeleteSessions,
    /// Expire time-wait entries.
    TimeWaitCleanup,
}

/// A one-shot alarm.
pub trait Alarm {
    /// Arm (or re-arm) the alarm for `deadline`.
    fn set(&mut self, deadline: Instant);

    fn cancel(&mut self);

    fn deadline(&self) -> Option<Instant>;

    fn is_set(&self) -> bool {
        self.deadline().is_some()
    }
}

/// Creates alarms on behalf of the dispatcher.
pub trait AlarmFactory {
    fn create_alarm(&mut self, kind: AlarmKind) -> Box<dyn Alarm>;
}

/// Alarm backed by a deadline cell shared with its [`TimerQueue`].
pub struct TimerAlarm {
    deadline: Rc<Cell<Option<Instant>>>,
}

impl Alarm for TimerAlarm {
    fn set(&mut self, deadline: Instant) {
        self.deadline.set(Some(deadline));
    }

    fn cancel(&mut self) {
        self.deadline.set(None);
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline.get()
    }
}

/// Poll-driven alarm registry for a single-threaded event loop.
#[derive(Default, Clone)]
pub struct TimerQueue {
    slots: Rc<std::cell::RefCell<Vec<(AlarmKind, Rc<Cell<Option<Instant>>>)>>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest armed deadline, if any.
    #[cfg(test)]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .borrow()
            .iter()
            .filter_map(|(_, cell)| cell.get())
            .min()
    }

    /// Disarm and return every alarm whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&self, now: Instant) -> Vec<AlarmKind> {
        let mut due: Vec<(Instant, AlarmKind)> = Vec::new();
        for (kind, cell) in self.slots.borrow().iter() {
            if let Some(deadline) = cell.get() {
                if deadline <= now {
                    cell.set(None);
                    due.push((deadline, *kind));
                }
            }
        }
        due.sort_by_key(|(deadline, _)| *deadline);
        due.into_iter().map(|(_, kind)| kind).collect()
    }

    /// Deadline of the alarm of the given kind, if armed.
    pub fn deadline_of(&self, kind: AlarmKind) -> Option<Instant> {
        self.slots
            .borrow()
            .iter()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, cell)| cell.get())
    }
}

impl AlarmFactory for TimerQueue {
    fn create_alarm(&mut self, kind: AlarmKind) -> Box<dyn Alarm> {
        let deadline = Rc::new(Cell::new(None));
        self.slots.borrow_mut().push((kind, Rc::clone(&deadline)));
        Box::new(TimerAlarm { deadline })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_take_due_disarms_and_orders() {
        let mut timers = TimerQueue::new();
        let mut delete = timers.create_alarm(AlarmKind::DeleteSessions);
        let mut cleanup = timers.create_alarm(AlarmKind::TimeWaitCleanup);

        let now = Instant::now();
        cleanup.set(now);
        delete.set(now + Duration::from_millis(1));
        assert_eq!(timers.next_deadline(), Some(now));

        assert!(timers.take_due(now).contains(&AlarmKind::TimeWaitCleanup));
        assert!(!cleanup.is_set());
        assert!(delete.is_set());

        let later = now + Duration::from_millis(5);
        assert_eq!(timers.take_due(later), vec![AlarmKind::DeleteSessions]);
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_cancel() {
        let mut timers = TimerQueue::new();
        let mut alarm = timers.create_alarm(AlarmKind::DeleteSessions);
        alarm.set(Instant::now());
        alarm.cancel();
        assert!(timers.take_due(Instant::now()).is_empty());
    }
}
