//! Per-category task queues and fd-interest tracking.

use crate::error::{Interest, SchedError, SchedResult};
use crate::scheduler::pool::{TaskList, TaskPool};
use crate::scheduler::task::{Task, TaskArg, TaskHandle, TaskKind};
use crate::time::TimeVal;
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::os::fd::RawFd;

/// Position of each queued category in `TaskQueues::lists`.
fn list_index(kind: TaskKind) -> Option<usize> {
    match kind {
        TaskKind::Read => Some(0),
        TaskKind::Write => Some(1),
        TaskKind::Timer => Some(2),
        TaskKind::Event => Some(3),
        TaskKind::Ready => Some(4),
        TaskKind::Background => Some(5),
        TaskKind::Unused | TaskKind::Execute => None,
    }
}

const EVENT: usize = 3;
const READY: usize = 4;

/// Queue slot of a category that is known to be queued.
fn queue_slot(kind: TaskKind) -> usize {
    list_index(kind).unwrap_or_else(|| unreachable!("{:?} tasks are never queued", kind))
}

/// All category queues of one scheduler, backed by a single task pool.
pub(crate) struct TaskQueues {
    pub(crate) pool: TaskPool,
    lists: [TaskList; 6],
    read_fds: BTreeSet<RawFd>,
    write_fds: BTreeSet<RawFd>,
}

impl TaskQueues {
    pub(crate) fn new(max_tasks: Option<usize>) -> Self {
        Self {
            pool: TaskPool::new(max_tasks),
            lists: [TaskList::default(); 6],
            read_fds: BTreeSet::new(),
            write_fds: BTreeSet::new(),
        }
    }

    fn list_mut(&mut self, kind: TaskKind) -> &mut TaskList {
        &mut self.lists[queue_slot(kind)]
    }

    /// Length of a category queue. `Unused` reports the free list.
    pub(crate) fn len(&self, kind: TaskKind) -> usize {
        match list_index(kind) {
            Some(idx) => self.lists[idx].len(),
            None if kind == TaskKind::Unused => self.pool.free_count(),
            None => 0,
        }
    }

    fn interest_set(&mut self, interest: Interest) -> &mut BTreeSet<RawFd> {
        match interest {
            Interest::Read => &mut self.read_fds,
            Interest::Write => &mut self.write_fds,
        }
    }

    pub(crate) fn has_interest(&self, fd: RawFd, interest: Interest) -> bool {
        match interest {
            Interest::Read => self.read_fds.contains(&fd),
            Interest::Write => self.write_fds.contains(&fd),
        }
    }

    /// Copy of the watched descriptors, read then write.
    pub(crate) fn snapshot_interest(&self) -> (Vec<RawFd>, Vec<RawFd>) {
        (
            self.read_fds.iter().copied().collect(),
            self.write_fds.iter().copied().collect(),
        )
    }

    // ------------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------------

    /// Queue a Read or Write task, marking fd interest.
    ///
    /// Fails without side effects if the fd already has that interest.
    pub(crate) fn insert_fd(
        &mut self,
        task: Task,
        fd: RawFd,
        interest: Interest,
    ) -> SchedResult<TaskHandle> {
        if self.has_interest(fd, interest) {
            return Err(SchedError::DuplicateRegistration { fd, interest });
        }
        let kind = task.kind;
        let handle = self.pool.acquire(task)?;
        self.interest_set(interest).insert(fd);
        self.append(kind, handle.index);
        Ok(handle)
    }

    /// Queue a Timer or Background task ahead of the first entry whose wake
    /// time is not earlier than its own.
    ///
    /// Among equal wake times the newest task ends up first.
    pub(crate) fn insert_sorted(&mut self, task: Task, wake: TimeVal) -> SchedResult<TaskHandle> {
        let kind = task.kind;
        let handle = self.pool.acquire(task)?;

        let mut point = None;
        let mut cur = self.list_mut(kind).head();
        while let Some(idx) = cur {
            if self.wake_of(idx) >= wake {
                point = Some(idx);
                break;
            }
            cur = self.pool.next_of(idx);
        }

        let li = queue_slot(kind);
        match point {
            Some(point) => self.pool.insert_before(&mut self.lists[li], point, handle.index),
            None => self.pool.push_back(&mut self.lists[li], handle.index),
        }
        Ok(handle)
    }

    /// Queue a task at the tail of its category (Event).
    pub(crate) fn insert_fifo(&mut self, task: Task) -> SchedResult<TaskHandle> {
        let kind = task.kind;
        let handle = self.pool.acquire(task)?;
        self.append(kind, handle.index);
        Ok(handle)
    }

    fn append(&mut self, kind: TaskKind, idx: u32) {
        let li = queue_slot(kind);
        self.pool.push_back(&mut self.lists[li], idx);
    }

    fn wake_of(&self, idx: u32) -> TimeVal {
        self.pool
            .get(idx)
            .and_then(Task::wake_at)
            .unwrap_or(TimeVal::ZERO)
    }

    fn fd_of(&self, idx: u32) -> Option<RawFd> {
        self.pool.get(idx).and_then(Task::fd)
    }

    // ------------------------------------------------------------------------
    // Promotion
    // ------------------------------------------------------------------------

    fn promote(&mut self, from: TaskKind, idx: u32) {
        let (src, dst) = split_pair(&mut self.lists, queue_slot(from), READY);
        self.pool.unlink(src, idx);
        self.pool.push_back(dst, idx);
        self.pool.set_kind(idx, TaskKind::Ready);
    }

    /// Move every task of `kind` to Ready, keeping order.
    pub(crate) fn promote_all(&mut self, kind: TaskKind) -> usize {
        let mut moved = 0;
        let mut cur = self.list_mut(kind).head();
        while let Some(idx) = cur {
            cur = self.pool.next_of(idx);
            self.promote(kind, idx);
            moved += 1;
        }
        moved
    }

    /// Move the sorted-queue prefix whose wake time is not after `now`.
    pub(crate) fn promote_due(&mut self, kind: TaskKind, now: TimeVal) -> usize {
        let mut moved = 0;
        let mut cur = self.list_mut(kind).head();
        while let Some(idx) = cur {
            if now < self.wake_of(idx) {
                break;
            }
            cur = self.pool.next_of(idx);
            self.promote(kind, idx);
            moved += 1;
        }
        moved
    }

    /// Move Read (or Write) tasks whose fd is in `ready`, clearing interest.
    pub(crate) fn promote_fds(
        &mut self,
        kind: TaskKind,
        interest: Interest,
        ready: &FxHashSet<RawFd>,
    ) -> usize {
        let mut moved = 0;
        let mut cur = self.list_mut(kind).head();
        while let Some(idx) = cur {
            cur = self.pool.next_of(idx);
            let Some(fd) = self.fd_of(idx) else { continue };
            if ready.contains(&fd) {
                self.interest_set(interest).remove(&fd);
                self.promote(kind, idx);
                moved += 1;
            }
        }
        moved
    }

    /// Earliest wake time of a sorted queue.
    pub(crate) fn head_wake(&self, kind: TaskKind) -> Option<TimeVal> {
        let li = list_index(kind)?;
        self.lists[li].head().map(|idx| self.wake_of(idx))
    }

    /// Detach the head of Ready, recycle its slot, and hand the task out.
    pub(crate) fn pop_ready(&mut self) -> Option<Task> {
        let idx = self.pool.pop_front(&mut self.lists[READY])?;
        self.pool.take(idx)
    }

    // ------------------------------------------------------------------------
    // Lookup and cancellation
    // ------------------------------------------------------------------------

    pub(crate) fn get(&self, handle: TaskHandle) -> Option<&Task> {
        let idx = self.pool.resolve(handle)?;
        self.pool.get(idx)
    }

    /// Detach a queued task and return it to the pool.
    pub(crate) fn cancel(&mut self, handle: TaskHandle) -> bool {
        let Some(idx) = self.pool.resolve(handle) else {
            return false;
        };
        let kind = self.pool.kind(idx);
        let Some(li) = list_index(kind) else {
            return false;
        };
        match kind {
            TaskKind::Read => {
                if let Some(fd) = self.fd_of(idx) {
                    self.read_fds.remove(&fd);
                }
            }
            TaskKind::Write => {
                if let Some(fd) = self.fd_of(idx) {
                    self.write_fds.remove(&fd);
                }
            }
            _ => {}
        }
        self.pool.unlink(&mut self.lists[li], idx);
        self.pool.release(idx);
        true
    }

    /// Cancel every Event task whose argument is `arg` (by identity).
    pub(crate) fn cancel_events_by_arg(&mut self, arg: &TaskArg) -> usize {
        let li = EVENT;
        let mut removed = 0;
        let mut cur = self.lists[li].head();
        while let Some(idx) = cur {
            cur = self.pool.next_of(idx);
            let matches = self.pool.get(idx).is_some_and(|t| t.arg.same(arg));
            if matches {
                self.pool.unlink(&mut self.lists[li], idx);
                self.pool.release(idx);
                removed += 1;
            }
        }
        removed
    }

    /// Destroy every queued and pooled task.
    pub(crate) fn clear(&mut self) {
        self.lists = [TaskList::default(); 6];
        self.read_fds.clear();
        self.write_fds.clear();
        self.pool.clear();
    }
}

/// Two distinct mutable elements of the list array.
fn split_pair(lists: &mut [TaskList; 6], a: usize, b: usize) -> (&mut TaskList, &mut TaskList) {
    debug_assert_ne!(a, b);
    if a < b {
        let (lo, hi) = lists.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = lists.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::Payload;
    use crate::scheduler::Scheduler;

    fn noop(_: &mut Scheduler, _: &Task) -> i32 {
        0
    }

    fn task(kind: TaskKind, name: &str, payload: Payload) -> Task {
        Task::new(kind, noop, TaskArg::none(), name.to_string(), payload)
    }

    fn timer(name: &str, sec: i64) -> (Task, TimeVal) {
        let wake = TimeVal::from_secs(sec);
        (task(TaskKind::Timer, name, Payload::WakeAt(wake)), wake)
    }

    fn names(q: &TaskQueues, kind: TaskKind) -> Vec<String> {
        let li = list_index(kind).unwrap();
        let mut out = Vec::new();
        let mut cur = q.lists[li].head();
        while let Some(idx) = cur {
            cur = q.pool.next_of(idx);
            out.push(q.pool.get(idx).unwrap().name().to_string());
        }
        out
    }

    #[test]
    fn test_sorted_insert_reverse_arrival_tie_break() {
        let mut q = TaskQueues::new(None);
        for (name, sec) in [("c", 9), ("a", 5), ("b", 5), ("d", 1)] {
            let (t, wake) = timer(name, sec);
            q.insert_sorted(t, wake).unwrap();
        }
        assert_eq!(names(&q, TaskKind::Timer), ["d", "b", "a", "c"]);
        assert_eq!(q.head_wake(TaskKind::Timer), Some(TimeVal::from_secs(1)));
    }

    #[test]
    fn test_duplicate_fd_rejected_without_side_effects() {
        let mut q = TaskQueues::new(None);
        q.insert_fd(task(TaskKind::Read, "first", Payload::Fd(3)), 3, Interest::Read)
            .unwrap();
        let alloc = q.pool.alloc();

        let err = q
            .insert_fd(task(TaskKind::Read, "second", Payload::Fd(3)), 3, Interest::Read)
            .unwrap_err();
        assert!(matches!(
            err,
            SchedError::DuplicateRegistration { fd: 3, interest: Interest::Read }
        ));
        assert_eq!(q.pool.alloc(), alloc);
        assert_eq!(names(&q, TaskKind::Read), ["first"]);

        // Write interest on the same fd is independent
        q.insert_fd(task(TaskKind::Write, "w", Payload::Fd(3)), 3, Interest::Write)
            .unwrap();
        assert_eq!(q.snapshot_interest(), (vec![3], vec![3]));
    }

    #[test]
    fn test_promote_due_stops_at_future_entry() {
        let mut q = TaskQueues::new(None);
        for (name, sec) in [("a", 1), ("b", 2), ("c", 3)] {
            let (t, wake) = timer(name, sec);
            q.insert_sorted(t, wake).unwrap();
        }
        assert_eq!(q.promote_due(TaskKind::Timer, TimeVal::from_secs(2)), 2);
        assert_eq!(names(&q, TaskKind::Ready), ["a", "b"]);
        assert_eq!(names(&q, TaskKind::Timer), ["c"]);

        let first = q.pop_ready().unwrap();
        assert_eq!(first.kind(), TaskKind::Ready);
        assert_eq!(first.origin(), TaskKind::Timer);
    }

    #[test]
    fn test_promote_fds_clears_interest() {
        let mut q = TaskQueues::new(None);
        for fd in [4, 5, 6] {
            let t = task(TaskKind::Read, &format!("r{}", fd), Payload::Fd(fd));
            q.insert_fd(t, fd, Interest::Read).unwrap();
        }
        let ready: FxHashSet<RawFd> = [6, 4].into_iter().collect();
        assert_eq!(q.promote_fds(TaskKind::Read, Interest::Read, &ready), 2);

        // Queue order, not readiness order
        assert_eq!(names(&q, TaskKind::Ready), ["r4", "r6"]);
        assert!(!q.has_interest(4, Interest::Read));
        assert!(q.has_interest(5, Interest::Read));
    }

    #[test]
    fn test_cancel_events_by_arg() {
        let mut q = TaskQueues::new(None);
        let owner = TaskArg::new(String::from("adjacency"));
        let args = [owner.clone(), TaskArg::none(), owner.clone()];
        for (i, arg) in args.into_iter().enumerate() {
            let payload = Payload::Value(i as i32);
            let t = Task::new(TaskKind::Event, noop, arg, format!("e{}", i), payload);
            q.insert_fifo(t).unwrap();
        }
        assert_eq!(q.cancel_events_by_arg(&owner), 2);
        assert_eq!(names(&q, TaskKind::Event), ["e1"]);
        assert_eq!(q.len(TaskKind::Unused), 2);
    }

    #[test]
    fn test_cancel_events_with_empty_arg() {
        let mut q = TaskQueues::new(None);
        let owner = TaskArg::new(7u32);
        let args = [TaskArg::none(), owner.clone(), TaskArg::none()];
        for (i, arg) in args.into_iter().enumerate() {
            let payload = Payload::Value(i as i32);
            let t = Task::new(TaskKind::Event, noop, arg, format!("e{}", i), payload);
            q.insert_fifo(t).unwrap();
        }
        let (t, wake) = timer("t", 1);
        q.insert_sorted(t, wake).unwrap();

        assert_eq!(q.cancel_events_by_arg(&TaskArg::none()), 2);
        assert_eq!(names(&q, TaskKind::Event), ["e1"]);
        assert_eq!(names(&q, TaskKind::Timer), ["t"]);
    }

    #[test]
    fn test_cancel_stale_handle() {
        let mut q = TaskQueues::new(None);
        let h = q.insert_fifo(task(TaskKind::Event, "e", Payload::Value(0))).unwrap();
        assert!(q.cancel(h));
        assert!(!q.cancel(h));
        assert!(q.get(h).is_none());
    }
}
