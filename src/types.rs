use derive_more::{BitOr, Display};
use indexmap::{IndexMap as _IndexMap, IndexSet as _IndexSet};
use rustc_hash::FxBuildHasher;

/// Stable handle to a dependency entry (job, group or barrier) living in a
/// manager's arena.
///
/// The generation changes every time the slot is reused, so a handle to a
/// destroyed entry never resolves to whatever took its place.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("entry#{index}.{generation}")]
pub struct EntryHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Handle to an entry created by `Manager::create_job`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("job:{_0}")]
#[repr(transparent)]
pub struct JobHandle(pub(crate) EntryHandle);

/// Handle to an entry created by `Manager::create_group`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("group:{_0}")]
#[repr(transparent)]
pub struct GroupHandle(pub(crate) EntryHandle);

impl From<JobHandle> for EntryHandle {
    fn from(JobHandle(handle): JobHandle) -> Self {
        handle
    }
}

impl From<GroupHandle> for EntryHandle {
    fn from(GroupHandle(handle): GroupHandle) -> Self {
        handle
    }
}

/// Dispatch priority of a job.
///
/// Ready jobs are served strictly from `High` down to `Idle`, FIFO within a
/// level. Lower levels may starve while higher ones stay busy.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    High,
    AboveNormal,
    #[default]
    Normal,
    Low,
    VeryLow,
    Idle,
}

impl Priority {
    pub const COUNT: usize = 6;
    /// All levels, highest first.
    pub const ALL: [Self; Self::COUNT] = [
        Self::High,
        Self::AboveNormal,
        Self::Normal,
        Self::Low,
        Self::VeryLow,
        Self::Idle,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Creation flags of a job, group or barrier. Combine with `|`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, BitOr)]
pub struct JobFlags(u8);

impl JobFlags {
    pub const NONE: Self = Self(0);
    /// Allocate an event so `Manager::sync` can block on completion.
    pub const SYNC_EVENT: Self = Self(1);
    /// Remove the job from the arena right after `on_executed`.
    pub const AUTO_DESTROY: Self = Self(1 << 1);

    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// `IndexMap` type with fast hasher.
pub type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
