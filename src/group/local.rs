//! An in-process group with one rank per thread.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::{Condvar, Mutex};

use super::{ProcessGroup, ProcessGroupError, ProcessGroupTraits};

#[derive(Debug, Default)]
struct LocalGroupState {
    aborted: bool,
    barrier_arrived: usize,
    barrier_generation: u64,
    /// Broadcast rounds fully received by every rank.
    bcast_completed: u64,
    bcast_payload: Option<Vec<u8>>,
    bcast_remaining: usize,
}

#[derive(Debug, Default)]
struct LocalGroupShared {
    state: Mutex<LocalGroupState>,
    cv: Condvar,
}

/// A process group whose ranks are threads of the current process.
///
/// Create the handles of a group with [`LocalProcessGroup::new_group`] and move one to each thread,
/// or run a closure on every rank with [`LocalProcessGroup::run`].
#[derive(Debug)]
pub struct LocalProcessGroup {
    rank: usize,
    size: usize,
    shared: Arc<LocalGroupShared>,
    /// Broadcast rounds this rank has taken part in.
    bcast_round: AtomicU64,
}

impl LocalProcessGroup {
    /// Create the handles of a group of `size` ranks, ordered by rank.
    ///
    /// # Panics
    /// Panics if `size` is zero.
    #[must_use]
    pub fn new_group(size: usize) -> Vec<ProcessGroup> {
        Self::new_group_shared(size).1
    }

    fn new_group_shared(size: usize) -> (Arc<LocalGroupShared>, Vec<ProcessGroup>) {
        assert!(size > 0, "a process group must have at least one rank");
        let shared = Arc::new(LocalGroupShared::default());
        let groups = (0..size)
            .map(|rank| {
                Arc::new(Self {
                    rank,
                    size,
                    shared: shared.clone(),
                    bcast_round: AtomicU64::new(0),
                }) as ProcessGroup
            })
            .collect();
        (shared, groups)
    }

    /// Run `f` on every rank of a new group of `size` ranks, one scoped thread per rank.
    ///
    /// Returns the results ordered by rank.
    /// If a rank panics, the group is aborted so that the other ranks fail their next collective instead of blocking, and the panic is resumed.
    ///
    /// # Panics
    /// Panics if `size` is zero or if `f` panics on any rank.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(ProcessGroup) -> R + Sync,
    {
        let (shared, groups) = Self::new_group_shared(size);
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = groups
                .into_iter()
                .map(|group| {
                    let shared = shared.clone();
                    scope.spawn(move || {
                        let _guard = AbortOnPanic(shared);
                        f(group)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }

    /// Abort the group: every pending and future collective call of every rank fails with [`ProcessGroupError::Aborted`].
    pub fn abort(&self) {
        self.shared.abort();
    }
}

impl LocalGroupShared {
    fn abort(&self) {
        self.state.lock().aborted = true;
        self.cv.notify_all();
    }
}

struct AbortOnPanic(Arc<LocalGroupShared>);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort();
        }
    }
}

impl ProcessGroupTraits for LocalProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), ProcessGroupError> {
        let mut state = self.shared.state.lock();
        if state.aborted {
            return Err(ProcessGroupError::Aborted);
        }
        let generation = state.barrier_generation;
        state.barrier_arrived += 1;
        if state.barrier_arrived == self.size {
            state.barrier_arrived = 0;
            state.barrier_generation = state.barrier_generation.wrapping_add(1);
            self.shared.cv.notify_all();
            return Ok(());
        }
        while state.barrier_generation == generation {
            if state.aborted {
                return Err(ProcessGroupError::Aborted);
            }
            self.shared.cv.wait(&mut state);
        }
        Ok(())
    }

    fn broadcast_bytes(&self, bytes: Vec<u8>, root: usize) -> Result<Vec<u8>, ProcessGroupError> {
        if root >= self.size {
            return Err(ProcessGroupError::InvalidRoot(root, self.size));
        }
        if self.size == 1 {
            return Ok(bytes);
        }
        let round = self.bcast_round.fetch_add(1, Ordering::Relaxed);
        let mut state = self.shared.state.lock();
        if self.rank == root {
            // Wait until every rank has received the previous round
            while state.bcast_completed != round {
                if state.aborted {
                    return Err(ProcessGroupError::Aborted);
                }
                self.shared.cv.wait(&mut state);
            }
            state.bcast_payload = Some(bytes.clone());
            state.bcast_remaining = self.size - 1;
            self.shared.cv.notify_all();
            while state.bcast_completed == round {
                if state.aborted {
                    return Err(ProcessGroupError::Aborted);
                }
                self.shared.cv.wait(&mut state);
            }
            Ok(bytes)
        } else {
            while state.bcast_completed != round || state.bcast_payload.is_none() {
                if state.aborted {
                    return Err(ProcessGroupError::Aborted);
                }
                self.shared.cv.wait(&mut state);
            }
            let received = state.bcast_payload.clone().unwrap_or_default();
            state.bcast_remaining -= 1;
            if state.bcast_remaining == 0 {
                state.bcast_payload = None;
                state.bcast_completed += 1;
                self.shared.cv.notify_all();
            }
            Ok(received)
        }
    }

    fn shares_address_space(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn local_process_group_ranks() {
        let ranks = LocalProcessGroup::run(4, |group| (group.rank(), group.size(), group.is_root()));
        assert_eq!(
            ranks,
            vec![(0, 4, true), (1, 4, false), (2, 4, false), (3, 4, false)]
        );
    }

    #[test]
    fn local_process_group_barrier() {
        let arrived = AtomicUsize::new(0);
        let observed = LocalProcessGroup::run(5, |group| {
            arrived.fetch_add(1, Ordering::SeqCst);
            group.barrier().unwrap();
            let observed = arrived.load(Ordering::SeqCst);
            group.barrier().unwrap();
            arrived.fetch_add(1, Ordering::SeqCst);
            group.barrier().unwrap();
            (observed, arrived.load(Ordering::SeqCst))
        });
        for (first, second) in observed {
            assert_eq!(first, 5);
            assert_eq!(second, 10);
        }
    }

    #[test]
    fn local_process_group_broadcast_rounds() {
        let results = LocalProcessGroup::run(3, |group| {
            (0..20)
                .map(|round| {
                    let root = round % group.size();
                    let bytes = if group.rank() == root {
                        vec![u8::try_from(round).unwrap(); round + 1]
                    } else {
                        Vec::new()
                    };
                    group.broadcast_bytes(bytes, root).unwrap()
                })
                .collect::<Vec<_>>()
        });
        for received in results {
            for (round, bytes) in received.into_iter().enumerate() {
                assert_eq!(bytes, vec![u8::try_from(round).unwrap(); round + 1]);
            }
        }
    }

    #[test]
    fn local_process_group_invalid_root() {
        let groups = LocalProcessGroup::new_group(2);
        assert!(matches!(
            groups[0].broadcast_bytes(vec![1], 2),
            Err(ProcessGroupError::InvalidRoot(2, 2))
        ));
    }

    #[test]
    fn local_process_group_abort_on_panic() {
        let result = std::panic::catch_unwind(|| {
            LocalProcessGroup::run(3, |group| {
                if group.rank() == 1 {
                    panic!("rank failure");
                }
                group.barrier()
            })
        });
        assert!(result.is_err());
    }
}
