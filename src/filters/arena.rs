use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::FrameError;

struct ArenaInner {
    budget: usize,
    in_use: AtomicUsize,
}

/// Budgeted texture memory shared by the filters of one pipeline.
///
/// Allocations are returned as [`Texture`] guards that give their bytes back
/// when dropped, so releasing a filter handle releases its storage.
#[derive(Clone)]
pub struct TextureArena {
    inner: Arc<ArenaInner>,
}

impl TextureArena {
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Arc::new(ArenaInner {
                budget,
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    pub fn budget(&self) -> usize {
        self.inner.budget
    }

    pub fn bytes_in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Reserve a zeroed texture of `len` texels.
    pub fn allocate<T: Copy + Default>(&self, len: usize) -> Result<Texture<T>, FrameError> {
        let bytes = len * std::mem::size_of::<T>();
        let budget = self.inner.budget;

        self.inner
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_use| {
                in_use.checked_add(bytes).filter(|total| *total <= budget)
            })
            .map_err(|in_use| FrameError::ResourceExhausted {
                requested: bytes,
                in_use,
                budget,
            })?;

        Ok(Texture {
            data: vec![T::default(); len],
            bytes,
            arena: self.inner.clone(),
        })
    }
}

impl std::fmt::Debug for TextureArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureArena")
            .field("budget", &self.budget())
            .field("in_use", &self.bytes_in_use())
            .finish()
    }
}

/// Texture storage owned by exactly one filter.
pub struct Texture<T> {
    data: Vec<T>,
    bytes: usize,
    arena: Arc<ArenaInner>,
}

impl<T> Texture<T> {
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<T> std::fmt::Debug for Texture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("len", &self.data.len())
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl<T> Drop for Texture<T> {
    fn drop(&mut self) {
        self.arena.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_released_on_drop() {
        let arena = TextureArena::new(1024);
        let a = arena.allocate::<u8>(600).unwrap();
        assert_eq!(arena.bytes_in_use(), 600);

        let err = arena.allocate::<f32>(200).unwrap_err();
        assert_eq!(
            err,
            FrameError::ResourceExhausted {
                requested: 800,
                in_use: 600,
                budget: 1024
            }
        );

        drop(a);
        assert_eq!(arena.bytes_in_use(), 0);
        assert!(arena.allocate::<f32>(200).is_ok());
        assert_eq!(arena.bytes_in_use(), 0);
    }
}
