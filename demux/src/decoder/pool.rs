use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Buffers that can be emptied before going back to their pool.
pub trait Reusable: Default {
    fn clear(&mut self);
}

impl Reusable for Vec<u8> {
    fn clear(&mut self) {
        Vec::clear(self);
    }
}

#[derive(Debug)]
struct Slots<T> {
    buffers: Vec<T>,
    /// Indices of the buffers in the pool, the next one to hand out last.
    free: Vec<usize>,
}

/// A fixed set of reusable buffers, allocated once.
///
/// Acquired buffers remember their slot and a weak handle to the pool, and
/// return there when dropped. Buffers outliving the pool are simply freed.
#[derive(Debug)]
pub struct BufferPool<T> {
    slots: Arc<Mutex<Slots<T>>>,
    capacity: usize,
}

impl<T: Reusable> BufferPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_buffers(capacity, T::default)
    }

    /// Creates `capacity` buffers with `make`.
    pub fn with_buffers(capacity: usize, make: impl FnMut() -> T) -> Self {
        let buffers = std::iter::repeat_with(make).take(capacity).collect();
        Self {
            slots: Arc::new(Mutex::new(Slots {
                buffers,
                free: (0..capacity).rev().collect(),
            })),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a free buffer, or `None` while every buffer is out.
    pub fn acquire(&self) -> Option<PooledBuffer<T>> {
        let mut slots = self.lock();
        let index = slots.free.pop()?;
        let buffer = std::mem::take(&mut slots.buffers[index]);
        Some(PooledBuffer {
            buffer,
            index,
            owner: Arc::downgrade(&self.slots),
        })
    }

    pub fn available(&self) -> usize {
        self.lock().free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PooledBuffer<T: Reusable> {
    buffer: T,
    index: usize,
    owner: Weak<Mutex<Slots<T>>>,
}

impl<T: Reusable> PooledBuffer<T> {
    /// Slot of this buffer in its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the buffer to its pool.
    pub fn release(self) {}
}

impl<T: Reusable> Deref for PooledBuffer<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.buffer
    }
}

impl<T: Reusable> DerefMut for PooledBuffer<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.buffer
    }
}

impl<T: Reusable + fmt::Debug> fmt::Debug for PooledBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("index", &self.index)
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl<T: Reusable> Drop for PooledBuffer<T> {
    fn drop(&mut self) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();

        let mut slots = owner.lock().unwrap_or_else(PoisonError::into_inner);
        slots.buffers[self.index] = buffer;
        slots.free.push(self.index);
    }
}
