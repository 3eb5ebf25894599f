//! Task structure and identity types

use crate::scheduler::Scheduler;
use crate::time::TimeVal;
use std::any::Any;
use std::os::fd::RawFd;
use std::rc::Rc;

/// Callback run when a task is dispatched.
///
/// Receives the scheduler (so it can register or cancel work) and its own
/// task. The returned status is the callback's business; the scheduler
/// ignores it.
pub type TaskFn = fn(&mut Scheduler, &Task) -> i32;

/// Category of a task. A queued task's category always names the one queue
/// it is linked into.
///
/// The discriminants are the bit positions used by [`KindSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskKind {
    /// Waiting for its fd to become readable.
    Read = 0,
    /// Waiting for its fd to become writable.
    Write = 1,
    /// Foreground timer.
    Timer = 2,
    /// Deferred event, dispatched before any I/O or timer work.
    Event = 3,
    /// Promoted and awaiting dispatch.
    Ready = 4,
    /// Background timer, lowest priority.
    Background = 5,
    /// On the free list.
    Unused = 6,
    /// Run inline by `Scheduler::execute`. Only ever an origin, never queued.
    Execute = 7,
}

impl TaskKind {
    /// Every category, in bit order.
    pub const ALL: [TaskKind; 8] = [
        TaskKind::Read,
        TaskKind::Write,
        TaskKind::Timer,
        TaskKind::Event,
        TaskKind::Ready,
        TaskKind::Background,
        TaskKind::Unused,
        TaskKind::Execute,
    ];

    /// Single-bit mask for this category.
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// One-letter tag used in reports.
    pub const fn letter(self) -> char {
        match self {
            TaskKind::Read => 'R',
            TaskKind::Write => 'W',
            TaskKind::Timer => 'T',
            TaskKind::Event => 'E',
            TaskKind::Ready => 'r',
            TaskKind::Background => 'B',
            TaskKind::Unused => 'U',
            TaskKind::Execute => 'X',
        }
    }
}

/// Bitmask of task categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KindSet(u8);

impl KindSet {
    /// No categories.
    pub const EMPTY: KindSet = KindSet(0);
    /// Every category.
    pub const ALL: KindSet = KindSet(u8::MAX);

    /// Set holding one category.
    pub const fn of(kind: TaskKind) -> Self {
        KindSet(kind.bit())
    }

    /// Add a category.
    pub fn insert(&mut self, kind: TaskKind) {
        self.0 |= kind.bit();
    }

    /// Builder form of [`insert`](Self::insert).
    pub const fn with(self, kind: TaskKind) -> Self {
        KindSet(self.0 | kind.bit())
    }

    /// Whether `kind` is in the set.
    pub const fn contains(self, kind: TaskKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Categories in either set.
    pub const fn union(self, other: KindSet) -> Self {
        KindSet(self.0 | other.0)
    }

    /// Whether the two sets share a category.
    pub const fn intersects(self, other: KindSet) -> bool {
        self.0 & other.0 != 0
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether the set is empty.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Identity of a callback: the full-width address of its `fn` pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(usize);

impl CallbackId {
    /// Identity of `func`.
    pub fn of(func: TaskFn) -> Self {
        CallbackId(func as usize)
    }

    /// Raw address.
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Stable reference to a queued task: arena slot plus generation.
///
/// Once the slot is recycled the generation moves on and the handle goes
/// stale; operations on a stale handle do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl TaskHandle {
    /// Arena slot index.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation this handle was issued for.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// What a task is waiting on. Exactly one variant is meaningful per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// Read/Write: the watched descriptor.
    Fd(RawFd),
    /// Timer/Background: absolute monotonic wake time.
    WakeAt(TimeVal),
    /// Event/Execute: caller-supplied value.
    Value(i32),
}

/// Caller-owned context passed through to the callback.
///
/// The scheduler never looks inside. `cancel_by_arg` compares arguments by
/// allocation identity, not by value; an empty argument matches only other
/// empty arguments.
#[derive(Clone, Default)]
pub struct TaskArg(Option<Rc<dyn Any>>);

impl TaskArg {
    /// No argument.
    pub fn none() -> Self {
        TaskArg(None)
    }

    /// Wrap a fresh value.
    pub fn new<T: Any>(value: T) -> Self {
        TaskArg(Some(Rc::new(value)))
    }

    /// Share an existing allocation.
    pub fn from_rc<T: Any>(rc: Rc<T>) -> Self {
        let rc: Rc<dyn Any> = rc;
        TaskArg(Some(rc))
    }

    /// Whether there is no argument.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Identity comparison. Two empty arguments are the same.
    pub fn same(&self, other: &TaskArg) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const (),
            (None, None) => true,
            _ => false,
        }
    }

    /// Borrow the argument as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Clone out the argument as `Rc<T>`.
    pub fn downcast_rc<T: Any>(&self) -> Option<Rc<T>> {
        self.0.clone().and_then(|v| v.downcast::<T>().ok())
    }
}

impl std::fmt::Debug for TaskArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(rc) => write!(f, "TaskArg({:p})", Rc::as_ptr(rc) as *const ()),
            None => f.write_str("TaskArg(none)"),
        }
    }
}

/// A scheduled unit of work.
pub struct Task {
    pub(crate) handle: TaskHandle,
    pub(crate) kind: TaskKind,
    /// Category the task was registered with; survives promotion to Ready.
    pub(crate) origin: TaskKind,
    pub(crate) func: TaskFn,
    pub(crate) name: String,
    pub(crate) arg: TaskArg,
    pub(crate) payload: Payload,
    /// Bound on first execution.
    pub(crate) profile: Option<CallbackId>,
    /// Monotonic time the current invocation started.
    pub(crate) started: TimeVal,
}

impl Task {
    pub(crate) fn new(
        kind: TaskKind,
        func: TaskFn,
        arg: TaskArg,
        name: String,
        payload: Payload,
    ) -> Self {
        Self {
            handle: TaskHandle {
                index: u32::MAX,
                generation: 0,
            },
            kind,
            origin: kind,
            func,
            name,
            arg,
            payload,
            profile: None,
            started: TimeVal::ZERO,
        }
    }

    /// Handle the task was queued under. Stale once the task is fetched.
    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    /// Current category.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Category the task was registered with.
    pub fn origin(&self) -> TaskKind {
        self.origin
    }

    /// Trimmed display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Callback identity.
    pub fn callback_id(&self) -> CallbackId {
        CallbackId::of(self.func)
    }

    /// Opaque argument.
    pub fn arg(&self) -> &TaskArg {
        &self.arg
    }

    /// Raw payload.
    pub fn payload(&self) -> Payload {
        self.payload
    }

    /// Descriptor of a Read/Write task.
    pub fn fd(&self) -> Option<RawFd> {
        match self.payload {
            Payload::Fd(fd) => Some(fd),
            _ => None,
        }
    }

    /// Wake time of a Timer/Background task.
    pub fn wake_at(&self) -> Option<TimeVal> {
        match self.payload {
            Payload::WakeAt(tv) => Some(tv),
            _ => None,
        }
    }

    /// Value of an Event/Execute task.
    pub fn value(&self) -> Option<i32> {
        match self.payload {
            Payload::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Monotonic time at which the current invocation began.
    pub fn started(&self) -> TimeVal {
        self.started
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("origin", &self.origin)
            .field("name", &self.name)
            .field("payload", &self.payload)
            .field("arg", &self.arg)
            .finish()
    }
}

/// Trim a callback's display name for diagnostics.
///
/// Cuts to `limit` characters, then strips leading spaces and `(` and
/// trailing spaces and `)`. `"(my_handler) "` becomes `"my_handler"`.
pub fn strip_name(name: &str, limit: usize) -> String {
    let cut = match name.char_indices().nth(limit) {
        Some((idx, _)) => &name[..idx],
        None => name,
    };
    cut.trim_start_matches([' ', '('])
        .trim_end_matches([' ', ')'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Scheduler, _: &Task) -> i32 {
        0
    }

    fn other(_: &mut Scheduler, _: &Task) -> i32 {
        1
    }

    #[test]
    fn test_strip_name() {
        assert_eq!(strip_name("  (isis_run_dr) ", 99), "isis_run_dr");
        assert_eq!(strip_name("send_lsp", 99), "send_lsp");
        assert_eq!(strip_name("((()))", 99), "");
        assert_eq!(strip_name("abcdef", 3), "abc");
        assert_eq!(strip_name("  abc)", 4), "ab");
    }

    #[test]
    fn test_kind_set() {
        let mut set = KindSet::EMPTY;
        assert!(set.is_empty());
        set.insert(TaskKind::Timer);
        set.insert(TaskKind::Execute);
        assert!(set.contains(TaskKind::Timer));
        assert!(!set.contains(TaskKind::Read));
        assert_eq!(set.bits(), 0b1000_0100);
        assert!(set.intersects(KindSet::of(TaskKind::Execute)));
        assert!(!set.intersects(KindSet::of(TaskKind::Read).with(TaskKind::Write)));
    }

    #[test]
    fn test_callback_identity() {
        assert_eq!(CallbackId::of(noop), CallbackId::of(noop));
        assert_ne!(CallbackId::of(noop), CallbackId::of(other));
    }

    #[test]
    fn test_arg_identity() {
        let shared = Rc::new(7u32);
        let a = TaskArg::from_rc(shared.clone());
        let b = TaskArg::from_rc(shared);
        let c = TaskArg::new(7u32);

        assert!(a.same(&b));
        assert!(!a.same(&c));
        assert!(TaskArg::none().same(&TaskArg::none()));
        assert!(!TaskArg::none().same(&a));
        assert!(!a.same(&TaskArg::none()));
        assert_eq!(c.downcast_ref::<u32>(), Some(&7));
        assert!(c.downcast_ref::<i64>().is_none());
        assert_eq!(*a.downcast_rc::<u32>().unwrap(), 7);
    }

    #[test]
    fn test_payload_accessors() {
        let task = Task::new(
            TaskKind::Read,
            noop,
            TaskArg::none(),
            "r".into(),
            Payload::Fd(5),
        );
        assert_eq!(task.fd(), Some(5));
        assert_eq!(task.wake_at(), None);
        assert_eq!(task.value(), None);
        assert_eq!(task.origin(), TaskKind::Read);
        assert_eq!(task.callback_id(), CallbackId::of(noop));
    }
}
