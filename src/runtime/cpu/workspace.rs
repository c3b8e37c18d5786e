//! Workspace arena and the cross-partition staging area
//!
//! The workspace is a fixed-capacity bump arena sized by the partition plan. Regions are
//! handed out as typed [`Region`] handles and every access is bounds-checked against
//! the arena, so a handle can never reach past the memory it was carved from.

use crate::dtype::WorkingFloat;
use crate::error::{Error, Result};
use crate::runtime::cpu::kernels::WelfordPartial;
use parking_lot::{Mutex, RwLock};
use std::marker::PhantomData;
use tracing::trace;

// ============================================================================
// Arena
// ============================================================================

/// Handle to a contiguous run of `len` elements inside a [`Workspace`]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Region<W> {
    offset: usize,
    len: usize,
    _marker: PhantomData<fn() -> W>,
}

impl<W> Clone for Region<W> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<W> Copy for Region<W> {}

impl<W> Region<W> {
    /// Element offset inside the arena
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in elements
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region holds no elements
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Fixed-capacity bump arena of working-precision elements
#[derive(Clone, Debug)]
pub struct Workspace<W> {
    data: Vec<W>,
    used: usize,
}

impl<W: WorkingFloat> Workspace<W> {
    /// Arena holding `capacity` elements
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![W::ZERO; capacity],
            used: 0,
        }
    }

    /// Arena covering as many whole elements as fit in `bytes`
    pub fn from_bytes(bytes: usize) -> Self {
        Self::with_capacity(bytes / std::mem::size_of::<W>())
    }

    /// Capacity in elements
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Elements not yet handed out
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.used
    }

    /// Carve a region of `len` elements
    pub fn alloc(&mut self, len: usize) -> Result<Region<W>> {
        if len > self.remaining() {
            let elem = std::mem::size_of::<W>();
            return Err(Error::InsufficientWorkspace {
                required: (self.used + len) * elem,
                available: self.capacity() * elem,
            });
        }
        let region = Region {
            offset: self.used,
            len,
            _marker: PhantomData,
        };
        self.used += len;
        Ok(region)
    }

    /// Borrow a region
    pub fn get(&self, region: Region<W>) -> Result<&[W]> {
        let end = self.check(region)?;
        Ok(&self.data[region.offset..end])
    }

    /// Borrow a region mutably
    pub fn get_mut(&mut self, region: Region<W>) -> Result<&mut [W]> {
        let end = self.check(region)?;
        Ok(&mut self.data[region.offset..end])
    }

    /// Release every region; previously issued handles stay bounds-checked but alias
    /// whatever is allocated next
    pub fn reset(&mut self) {
        self.used = 0;
    }

    fn check(&self, region: Region<W>) -> Result<usize> {
        let end = region.offset + region.len;
        if end > self.used {
            return Err(Error::IndexOutOfBounds {
                index: end,
                size: self.used,
            });
        }
        Ok(end)
    }
}

// ============================================================================
// Staging area
// ============================================================================

#[derive(Copy, Clone, Debug)]
struct StagingSlot<W> {
    mean: Region<W>,
    m2: Region<W>,
}

/// Shared store for per-worker partial statistics.
///
/// Each worker publishes exactly once before the merge barrier; afterwards the area
/// is only read. Means and M2 sums live in the workspace arena, counts beside it.
#[derive(Debug)]
pub struct StagingArea<W> {
    arena: RwLock<Workspace<W>>,
    slots: Vec<StagingSlot<W>>,
    counts: Mutex<Vec<Option<usize>>>,
    channels: usize,
}

impl<W: WorkingFloat> StagingArea<W> {
    /// Carve slots for `workers` partials of `channels` channels out of `workspace`
    pub fn new(mut workspace: Workspace<W>, workers: usize, channels: usize) -> Result<Self> {
        let mut slots = Vec::with_capacity(workers);
        for _ in 0..workers {
            slots.push(StagingSlot {
                mean: workspace.alloc(channels)?,
                m2: workspace.alloc(channels)?,
            });
        }
        Ok(Self {
            arena: RwLock::new(workspace),
            slots,
            counts: Mutex::new(vec![None; workers]),
            channels,
        })
    }

    /// Number of worker slots
    #[inline]
    pub fn workers(&self) -> usize {
        self.slots.len()
    }

    /// Store `partial` as worker `worker`'s contribution
    pub fn publish(&self, worker: usize, partial: &WelfordPartial<W>) -> Result<()> {
        let slot = *self.slots.get(worker).ok_or(Error::IndexOutOfBounds {
            index: worker,
            size: self.slots.len(),
        })?;
        if partial.channels() != self.channels {
            return Err(Error::shape_mismatch(
                &[self.channels],
                &[partial.channels()],
            ));
        }

        let mut counts = self.counts.lock();
        if counts[worker].is_some() {
            return Err(Error::Internal(format!(
                "worker {worker} published its partial twice"
            )));
        }
        {
            let mut arena = self.arena.write();
            arena.get_mut(slot.mean)?.copy_from_slice(&partial.mean);
            arena.get_mut(slot.m2)?.copy_from_slice(&partial.m2);
        }
        counts[worker] = Some(partial.count);
        trace!(worker, count = partial.count, "partial published");
        Ok(())
    }

    /// Read back every worker's partial, in worker order
    pub fn collect(&self) -> Result<Vec<WelfordPartial<W>>> {
        let counts = self.counts.lock().clone();
        let arena = self.arena.read();
        self.slots
            .iter()
            .zip(counts)
            .enumerate()
            .map(|(worker, (slot, count))| {
                let count = count.ok_or_else(|| {
                    Error::Internal(format!("worker {worker} reached the merge without a partial"))
                })?;
                Ok(WelfordPartial {
                    mean: arena.get(slot.mean)?.to_vec(),
                    m2: arena.get(slot.m2)?.to_vec(),
                    count,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_bounds() {
        let mut ws = Workspace::<f32>::with_capacity(8);
        let a = ws.alloc(3).unwrap();
        let b = ws.alloc(5).unwrap();
        assert_eq!((a.offset(), b.offset()), (0, 3));
        ws.get_mut(b).unwrap().fill(2.0);
        assert_eq!(ws.get(b).unwrap(), &[2.0; 5]);
        assert_eq!(ws.get(a).unwrap(), &[0.0; 3]);

        let err = ws.alloc(1).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientWorkspace {
                required: 36,
                available: 32
            }
        ));
    }

    #[test]
    fn test_stale_handle_rejected_after_reset() {
        let mut ws = Workspace::<f64>::from_bytes(64);
        assert_eq!(ws.capacity(), 8);
        let r = ws.alloc(6).unwrap();
        ws.reset();
        ws.alloc(2).unwrap();
        assert!(matches!(ws.get(r), Err(Error::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_staging_publish_once_and_collect() {
        let staging = StagingArea::new(Workspace::<f32>::with_capacity(8), 2, 2).unwrap();
        let p0 = WelfordPartial {
            mean: vec![1.0, 2.0],
            m2: vec![0.0, 0.5],
            count: 4,
        };
        staging.publish(0, &p0).unwrap();
        assert!(staging.publish(0, &p0).is_err());
        assert!(staging.collect().is_err());

        let p1 = WelfordPartial {
            mean: vec![3.0, 4.0],
            m2: vec![1.0, 1.5],
            count: 2,
        };
        staging.publish(1, &p1).unwrap();
        assert_eq!(staging.collect().unwrap(), vec![p0, p1]);
    }

    #[test]
    fn test_staging_undersized_workspace() {
        let err = StagingArea::new(Workspace::<f32>::with_capacity(7), 2, 2).unwrap_err();
        assert!(matches!(err, Error::InsufficientWorkspace { .. }));
    }
}
