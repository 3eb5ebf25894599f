//! Task arena with a free list for recycling task objects.
//!
//! Every task lives in a slot of one growable arena. Queues are doubly linked
//! lists threaded through the slots by index, so moving a task between queues
//! or back onto the free list only rewrites indices. A slot's generation is
//! bumped whenever it is recycled, which turns any outstanding
//! [`TaskHandle`] for the old task stale.

use crate::error::{SchedError, SchedResult};
use crate::scheduler::task::{Task, TaskHandle, TaskKind};

/// One arena slot.
struct Slot {
    task: Option<Task>,
    kind: TaskKind,
    generation: u32,
    prev: Option<u32>,
    next: Option<u32>,
}

/// Head/tail/length of one index-linked queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaskList {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl TaskList {
    pub(crate) fn head(&self) -> Option<u32> {
        self.head
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn push_back(&mut self, slots: &mut [Slot], idx: u32) {
        let i = idx as usize;
        slots[i].next = None;
        slots[i].prev = self.tail;
        match self.tail {
            Some(t) => slots[t as usize].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    fn insert_before(&mut self, slots: &mut [Slot], point: u32, idx: u32) {
        let prev = slots[point as usize].prev;
        let i = idx as usize;
        slots[i].next = Some(point);
        slots[i].prev = prev;
        match prev {
            Some(p) => slots[p as usize].next = Some(idx),
            None => self.head = Some(idx),
        }
        slots[point as usize].prev = Some(idx);
        self.len += 1;
    }

    fn unlink(&mut self, slots: &mut [Slot], idx: u32) {
        let i = idx as usize;
        let (prev, next) = (slots[i].prev, slots[i].next);
        match next {
            Some(n) => slots[n as usize].prev = prev,
            None => self.tail = prev,
        }
        match prev {
            Some(p) => slots[p as usize].next = next,
            None => self.head = next,
        }
        slots[i].prev = None;
        slots[i].next = None;
        self.len -= 1;
    }

    fn pop_front(&mut self, slots: &mut [Slot]) -> Option<u32> {
        let head = self.head?;
        self.unlink(slots, head);
        Some(head)
    }
}

/// Arena of task slots plus the free list of recycled ones.
pub(crate) struct TaskPool {
    slots: Vec<Slot>,
    free: TaskList,
    /// Task objects ever created minus those destroyed.
    alloc: usize,
    max_tasks: Option<usize>,
}

impl TaskPool {
    pub(crate) fn new(max_tasks: Option<usize>) -> Self {
        Self {
            slots: Vec::new(),
            free: TaskList::default(),
            alloc: 0,
            max_tasks,
        }
    }

    /// Store `task` in a recycled slot if one is free, else in a fresh one.
    ///
    /// The slot is not linked into any queue yet.
    pub(crate) fn acquire(&mut self, mut task: Task) -> SchedResult<TaskHandle> {
        let idx = match self.free.pop_front(&mut self.slots) {
            Some(idx) => idx,
            None => self.grow()?,
        };
        let slot = &mut self.slots[idx as usize];
        let handle = TaskHandle {
            index: idx,
            generation: slot.generation,
        };
        task.handle = handle;
        slot.kind = task.kind;
        slot.task = Some(task);
        Ok(handle)
    }

    fn grow(&mut self) -> SchedResult<u32> {
        let exhausted = SchedError::PoolExhausted { live: self.alloc };
        if self.max_tasks.is_some_and(|max| self.alloc >= max) {
            return Err(exhausted);
        }
        let idx = u32::try_from(self.slots.len()).map_err(|_| SchedError::PoolExhausted {
            live: self.alloc,
        })?;
        self.slots.try_reserve(1).map_err(|_| exhausted)?;
        self.slots.push(Slot {
            task: None,
            kind: TaskKind::Unused,
            generation: 0,
            prev: None,
            next: None,
        });
        self.alloc += 1;
        Ok(idx)
    }

    /// Return a detached slot to the free list. Drops its task, display name
    /// included, and invalidates outstanding handles.
    pub(crate) fn release(&mut self, idx: u32) {
        let slot = &mut self.slots[idx as usize];
        debug_assert!(slot.prev.is_none() && slot.next.is_none());
        slot.task = None;
        slot.kind = TaskKind::Unused;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push_back(&mut self.slots, idx);
    }

    /// Move the task out of a detached slot and recycle the slot.
    pub(crate) fn take(&mut self, idx: u32) -> Option<Task> {
        let task = self.slots[idx as usize].task.take();
        self.release(idx);
        task
    }

    /// Resolve a handle to its slot index if it is still current.
    pub(crate) fn resolve(&self, handle: TaskHandle) -> Option<u32> {
        let slot = self.slots.get(handle.index as usize)?;
        (slot.generation == handle.generation && slot.task.is_some()).then_some(handle.index)
    }

    pub(crate) fn get(&self, idx: u32) -> Option<&Task> {
        self.slots.get(idx as usize)?.task.as_ref()
    }

    pub(crate) fn kind(&self, idx: u32) -> TaskKind {
        self.slots[idx as usize].kind
    }

    pub(crate) fn set_kind(&mut self, idx: u32, kind: TaskKind) {
        let slot = &mut self.slots[idx as usize];
        slot.kind = kind;
        if let Some(task) = slot.task.as_mut() {
            task.kind = kind;
        }
    }

    pub(crate) fn next_of(&self, idx: u32) -> Option<u32> {
        self.slots[idx as usize].next
    }

    pub(crate) fn push_back(&mut self, list: &mut TaskList, idx: u32) {
        list.push_back(&mut self.slots, idx);
    }

    pub(crate) fn insert_before(&mut self, list: &mut TaskList, point: u32, idx: u32) {
        list.insert_before(&mut self.slots, point, idx);
    }

    pub(crate) fn unlink(&mut self, list: &mut TaskList, idx: u32) {
        list.unlink(&mut self.slots, idx);
    }

    pub(crate) fn pop_front(&mut self, list: &mut TaskList) -> Option<u32> {
        list.pop_front(&mut self.slots)
    }

    /// Live task objects, queued or pooled.
    pub(crate) fn alloc(&self) -> usize {
        self.alloc
    }

    /// Slots waiting on the free list.
    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Destroy every task object, queued or pooled.
    pub(crate) fn clear(&mut self) {
        self.alloc -= self.slots.len();
        self.slots.clear();
        self.free = TaskList::default();
    }
}
