//! Generation-checked handles and the arenas that own handle objects
//!
//! A handle is an `(index, generation)` pair. Releasing a slot bumps its
//! generation, so a stale handle never resolves again even after the slot is
//! recycled for a new allocation.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub struct $name(HandleId);

        impl $name {
            pub fn id(&self) -> HandleId {
                self.0
            }
        }
    };
}

typed_handle!(
    /// Environment handle
    EnvHandle
);
typed_handle!(
    /// Connection handle
    ConnHandle
);
typed_handle!(
    /// Statement handle
    StmtHandle
);

/// Any handle, for operations accepting more than one kind
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Handle {
    Environment(EnvHandle),
    Connection(ConnHandle),
    Statement(StmtHandle),
}

impl From<EnvHandle> for Handle {
    fn from(h: EnvHandle) -> Self {
        Handle::Environment(h)
    }
}

impl From<ConnHandle> for Handle {
    fn from(h: ConnHandle) -> Self {
        Handle::Connection(h)
    }
}

impl From<StmtHandle> for Handle {
    fn from(h: StmtHandle) -> Self {
        Handle::Statement(h)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

/// Slot arena with free-list recycling
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    capacity: usize,
}

impl<T> Arena<T> {
    pub(crate) fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
        }
    }

    /// `None` when the arena is full
    pub(crate) fn insert(&mut self, value: T) -> Option<HandleId> {
        let value = Arc::new(value);
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Some(HandleId {
                index,
                generation: slot.generation,
            });
        }
        if self.slots.len() >= self.capacity {
            return None;
        }
        let index = u32::try_from(self.slots.len()).ok()?;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Some(HandleId {
            index,
            generation: 0,
        })
    }

    pub(crate) fn get(&self, id: HandleId) -> Option<Arc<T>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.clone()
    }

    pub(crate) fn remove(&mut self, id: HandleId) -> Option<Arc<T>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// Thread-safe arena for one handle kind
pub(crate) struct HandleTable<T> {
    arena: RwLock<Arena<T>>,
}

impl<T> HandleTable<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            arena: RwLock::new(Arena::with_capacity_limit(capacity)),
        }
    }

    pub(crate) fn insert(&self, value: T) -> Option<HandleId> {
        self.arena.write().insert(value)
    }

    pub(crate) fn get(&self, id: HandleId) -> Option<Arc<T>> {
        self.arena.read().get(id)
    }

    pub(crate) fn remove(&self, id: HandleId) -> Option<Arc<T>> {
        self.arena.write().remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.read().len()
    }
}

pub(crate) fn env_handle(id: HandleId) -> EnvHandle {
    EnvHandle(id)
}

pub(crate) fn conn_handle(id: HandleId) -> ConnHandle {
    ConnHandle(id)
}

pub(crate) fn stmt_handle(id: HandleId) -> StmtHandle {
    StmtHandle(id)
}
