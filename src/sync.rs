//! Many-readers / one-writer lock built on a reader counter and a condition variable.
//!
//! Readers only touch the counter long enough to bump it, so they never block one
//! another. A writer takes the counter mutex, waits until the count drops to zero and
//! keeps the mutex held for the lifetime of its guard; new readers queue on that mutex.
//!
//! There is no writer preference: a steady stream of overlapping readers can keep a
//! writer waiting indefinitely.

use crate::error::AppError;
use std::ops::{Deref, DerefMut};
use std::sync::{
    Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// The inner `RwLock` only stores the value. The counter decides who gets in, so
/// taking the inner lock never contends.
pub struct ReadWriteLock<T> {
    readers: Mutex<usize>,
    no_readers: Condvar,
    value: RwLock<T>,
}

impl<T> ReadWriteLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            readers: Mutex::new(0),
            no_readers: Condvar::new(),
            value: RwLock::new(value),
        }
    }

    /// Acquire a shared guard. Blocks only while a writer holds the lock.
    pub fn read(&self) -> Result<ReadGuard<'_, T>, AppError> {
        {
            let mut readers = self.readers.lock().map_err(|_| AppError::StateLock)?;
            *readers += 1;
        }
        let registration = ReaderRegistration { lock: self };
        let value = self.value.read().map_err(|_| AppError::StateLock)?;
        Ok(ReadGuard {
            value,
            _registration: registration,
        })
    }

    /// Acquire the exclusive guard once every reader has released.
    pub fn write(&self) -> Result<WriteGuard<'_, T>, AppError> {
        let mut readers = self.readers.lock().map_err(|_| AppError::StateLock)?;
        while *readers > 0 {
            readers = self
                .no_readers
                .wait(readers)
                .map_err(|_| AppError::StateLock)?;
        }
        let value = self.value.write().map_err(|_| AppError::StateLock)?;
        Ok(WriteGuard {
            value,
            _held: readers,
        })
    }

    pub fn active_readers(&self) -> Result<usize, AppError> {
        self.readers
            .lock()
            .map(|readers| *readers)
            .map_err(|_| AppError::StateLock)
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_read(&self) {
        // Recover from poisoning so the count stays balanced even after a panic.
        let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        *readers = readers.saturating_sub(1);
        if *readers == 0 {
            self.no_readers.notify_all();
        }
    }
}

impl<T: Default> Default for ReadWriteLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for ReadWriteLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadWriteLock").finish_non_exhaustive()
    }
}

struct ReaderRegistration<'a, T> {
    lock: &'a ReadWriteLock<T>,
}

impl<T> Drop for ReaderRegistration<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

// Fields drop in order: the inner read guard goes before the count is released.
pub struct ReadGuard<'a, T> {
    value: RwLockReadGuard<'a, T>,
    _registration: ReaderRegistration<'a, T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

pub struct WriteGuard<'a, T> {
    value: RwLockWriteGuard<'a, T>,
    _held: MutexGuard<'a, usize>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
