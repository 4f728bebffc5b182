use crate::{
    job::Job,
    mt::Event,
    types::{EntryHandle, JobFlags, Priority},
};
use crossbeam_utils::CachePadded;
use derive_more::Debug;
use parking_lot::{Mutex, RwLock};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI32, Ordering},
};

/// A node of the dependency graph.
///
/// `dependency_count` is the number of unresolved prerequisites, plus one for
/// jobs: a job's own execution is the last gate it waits for, so a job is
/// ready to run at count `1` and complete at `0`. Groups and barriers have no
/// such self gate and complete at `0`.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) dependency_count: CachePadded<AtomicI32>,
    /// Entries released when this one completes. Drained on completion.
    pub(crate) dependency_table: Mutex<Vec<EntryHandle>>,
    pub(crate) sync_event: Option<Event>,
    pub(crate) kind: EntryKind,
}

#[derive(Debug)]
pub(crate) enum EntryKind {
    Barrier,
    Group {
        /// Entries released on every completion of the group; never drained.
        static_table: Mutex<Vec<EntryHandle>>,
    },
    Job(JobState),
}

#[derive(Debug)]
pub(crate) struct JobState {
    pub(crate) priority: Priority,
    pub(crate) auto_destroy: bool,
    /// The caller called `Manager::schedule` for the current run.
    pub(crate) submitted: AtomicBool,
    /// The job went into a ready queue for the current run.
    pub(crate) scheduled: AtomicBool,
    pub(crate) executed: AtomicBool,
    #[debug(skip)]
    pub(crate) payload: Mutex<Box<dyn Job>>,
}

impl JobState {
    /// Forget the previous run.
    pub(crate) fn rearm(&self) {
        self.submitted.store(false, Ordering::Release);
        self.scheduled.store(false, Ordering::Release);
        self.executed.store(false, Ordering::Release);
    }
}

impl Entry {
    pub(crate) fn job(flags: JobFlags, priority: Priority, payload: Box<dyn Job>) -> Self {
        Self::with_kind(
            1,
            flags,
            EntryKind::Job(JobState {
                priority,
                auto_destroy: flags.contains(JobFlags::AUTO_DESTROY),
                submitted: AtomicBool::new(false),
                scheduled: AtomicBool::new(false),
                executed: AtomicBool::new(false),
                payload: Mutex::new(payload),
            }),
        )
    }

    pub(crate) fn group(flags: JobFlags) -> Self {
        Self::with_kind(
            0,
            flags,
            EntryKind::Group {
                static_table: Mutex::new(Vec::new()),
            },
        )
    }

    pub(crate) fn barrier(flags: JobFlags) -> Self {
        Self::with_kind(0, flags, EntryKind::Barrier)
    }

    fn with_kind(initial_count: i32, flags: JobFlags, kind: EntryKind) -> Self {
        Self {
            dependency_count: CachePadded::new(AtomicI32::new(initial_count)),
            dependency_table: Mutex::new(Vec::new()),
            sync_event: flags
                .contains(JobFlags::SYNC_EVENT)
                .then(|| Event::new(initial_count == 0)),
            kind,
        }
    }

    #[inline]
    pub(crate) fn count(&self) -> i32 {
        self.dependency_count.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn as_job(&self) -> Option<&JobState> {
        match &self.kind {
            EntryKind::Job(job) => Some(job),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn static_table(&self) -> Option<&Mutex<Vec<EntryHandle>>> {
        match &self.kind {
            EntryKind::Group { static_table } => Some(static_table),
            _ => None,
        }
    }
}

/// Slab of entries addressed by generational handles.
#[derive(Debug, Default)]
pub(crate) struct EntryArena {
    inner: RwLock<ArenaInner>,
}

#[derive(Debug, Default)]
struct ArenaInner {
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
    live: usize,
}

#[derive(Debug)]
struct ArenaSlot {
    generation: u32,
    entry: Option<Arc<Entry>>,
}

impl EntryArena {
    pub(crate) fn insert(&self, entry: Entry) -> EntryHandle {
        let mut inner = self.inner.write();
        let entry = Some(Arc::new(entry));
        inner.live += 1;
        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.entry = entry;
            return EntryHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(inner.slots.len()).expect("EntryArena::insert: arena is full");
        inner.slots.push(ArenaSlot {
            generation: 0,
            entry,
        });
        EntryHandle {
            index,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, handle: EntryHandle) -> Option<Arc<Entry>> {
        let inner = self.inner.read();
        let slot = inner.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.clone()
    }

    pub(crate) fn remove(&self, handle: EntryHandle) -> Option<Arc<Entry>> {
        let mut inner = self.inner.write();
        let slot = inner.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(handle.index);
        inner.live -= 1;
        Some(entry)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().live
    }
}
