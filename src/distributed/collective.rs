//! Collective building blocks shared by the distributed handles.

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use rayon_iter_concurrent_limit::iter_concurrent_limit;

use crate::{config::global_config, group::ProcessGroupTraits};

use super::{DistributedError, RoundRobinPartition, SharedError};

/// Run a root-only mutation and fence it.
///
/// The root runs `op` and broadcasts its outcome, so every rank leaves together.
/// Returns the value of `op` on the root and [`None`] elsewhere.
///
/// # Errors
/// On the root, returns the error of `op`.
/// On other ranks, returns the same error kind rebuilt from its [`SharedError`] form.
pub(crate) fn on_root<T>(
    group: &dyn ProcessGroupTraits,
    op: impl FnOnce() -> Result<T, DistributedError>,
) -> Result<Option<T>, DistributedError> {
    if group.is_root() {
        let result = op();
        let outcome: Result<(), SharedError> = match &result {
            Ok(_) => Ok(()),
            Err(err) => Err(SharedError::from(err)),
        };
        let _: Result<(), SharedError> = crate::group::broadcast(group, Some(&outcome), 0)?;
        result.map(Some)
    } else {
        let outcome: Result<(), SharedError> = crate::group::broadcast(group, None, 0)?;
        outcome.map(|()| None).map_err(DistributedError::from)
    }
}

/// Run a root-only mutation producing plain data and give every rank the root's value.
///
/// # Errors
/// Fails on every rank if `op` fails on the root, as in [`on_root`].
pub(crate) fn from_root<T: serde::Serialize + serde::de::DeserializeOwned>(
    group: &dyn ProcessGroupTraits,
    op: impl FnOnce() -> Result<T, DistributedError>,
) -> Result<T, DistributedError> {
    let (outcome, root_error) = if group.is_root() {
        match op() {
            Ok(value) => (Some(Ok(value)), None),
            Err(err) => (Some(Err(SharedError::from(&err))), Some(err)),
        }
    } else {
        (None, None)
    };
    let outcome: Result<T, SharedError> = crate::group::broadcast(group, outcome.as_ref(), 0)?;
    if let Some(err) = root_error {
        return Err(err);
    }
    outcome.map_err(DistributedError::from)
}

/// Check that every rank issued the same collective call.
///
/// A no-op unless collective call validation is enabled in the global [`Config`](crate::config::Config).
/// The root broadcasts its tag, then every rank in turn broadcasts whether its own tag diverged.
///
/// # Errors
/// Returns [`DistributedError::CollectiveProtocolViolation`] on every rank if any rank diverged.
pub(crate) fn validate_collective_call(
    group: &dyn ProcessGroupTraits,
    tag: impl FnOnce() -> String,
) -> Result<(), DistributedError> {
    let validate = global_config().validate_collective_calls();
    if !validate {
        return Ok(());
    }
    let tag = tag();
    let expected: String = crate::group::broadcast(group, Some(&tag), 0)?;
    let divergent = (tag != expected).then_some(tag);

    let mut violation = None;
    for rank in 0..group.size() {
        let got: Option<String> = crate::group::broadcast(group, Some(&divergent), rank)?;
        if violation.is_none() {
            violation = got;
        }
    }
    match violation {
        Some(got) => {
            log::warn!("collective protocol violation: root called {expected}, a rank called {got}");
            Err(DistributedError::CollectiveProtocolViolation { expected, got })
        }
        None => Ok(()),
    }
}

/// Join the trailing barrier of a bulk operation, then return this rank's result.
///
/// A rank that failed mid-shard still reaches the barrier, so the others are not left blocked.
pub(crate) fn finish_bulk(
    group: &dyn ProcessGroupTraits,
    result: Result<(), DistributedError>,
) -> Result<(), DistributedError> {
    let fence = group.barrier();
    result?;
    Ok(fence?)
}

/// Run `op` for every chunk ordinal in `partition`, stopping at the first error.
///
/// Chunks are processed concurrently up to the shard concurrent limit of the global [`Config`](crate::config::Config).
pub(crate) fn for_each_in_shard<F>(
    partition: &RoundRobinPartition,
    op: F,
) -> Result<(), DistributedError>
where
    F: Fn(u64) -> Result<(), DistributedError> + Send + Sync,
{
    let shard_concurrent_limit = global_config().shard_concurrent_limit();
    log::debug!(
        "rank {} processing {} of {} chunks (concurrent limit {shard_concurrent_limit})",
        partition.rank(),
        partition.len(),
        partition.total_chunks()
    );
    if shard_concurrent_limit > 1 {
        let ordinals: Vec<u64> = partition.iter().collect();
        iter_concurrent_limit!(shard_concurrent_limit, ordinals, try_for_each, |ordinal: u64| {
            op(ordinal)
        })
    } else {
        partition.iter().try_for_each(op)
    }
}

#[cfg(test)]
mod tests {
    use crate::group::{LocalProcessGroup, ProcessGroup};

    use super::*;

    #[test]
    fn on_root_propagates_failure() {
        let results = LocalProcessGroup::run(3, |group: ProcessGroup| {
            on_root(group.as_ref(), || -> Result<(), DistributedError> {
                Err(DistributedError::ShapeMismatch {
                    expected: vec![4],
                    got: vec![group.rank() as u64],
                })
            })
        });
        // Every rank sees the root's error
        for result in results {
            match result {
                Err(DistributedError::ShapeMismatch { expected, got }) => {
                    assert_eq!(expected, vec![4]);
                    assert_eq!(got, vec![0]);
                }
                _ => panic!("expected a shape mismatch"),
            }
        }
    }

    #[test]
    fn on_root_unshared_failure() {
        let results = LocalProcessGroup::run(2, |group: ProcessGroup| {
            on_root(group.as_ref(), || -> Result<(), DistributedError> {
                Err(crate::group::ProcessGroupError::MissingRootValue(0).into())
            })
        });
        assert!(matches!(results[0], Err(DistributedError::ProcessGroup(_))));
        assert!(matches!(results[1], Err(DistributedError::RootOperationFailed(_))));
    }

    #[test]
    fn from_root_shares_value() {
        let results = LocalProcessGroup::run(4, |group: ProcessGroup| {
            from_root(group.as_ref(), || Ok(vec![group.rank(), 7])).unwrap()
        });
        assert!(results.iter().all(|value| value == &vec![0, 7]));
    }

    #[test]
    fn finish_bulk_joins_barrier_on_error() {
        let results = LocalProcessGroup::run(3, |group: ProcessGroup| {
            let result = if group.rank() == 1 {
                Err(DistributedError::RootOperationFailed("rank 1".to_string()))
            } else {
                Ok(())
            };
            finish_bulk(group.as_ref(), result).is_ok()
        });
        assert_eq!(results, vec![true, false, true]);
    }

    #[test]
    fn for_each_in_shard_visits_owned_chunks() {
        let visited = parking_lot::Mutex::new(Vec::new());
        let partition = RoundRobinPartition::new(1, 3, 10);
        for_each_in_shard(&partition, |ordinal| {
            visited.lock().push(ordinal);
            Ok(())
        })
        .unwrap();
        let mut visited = visited.into_inner();
        visited.sort_unstable();
        assert_eq!(visited, vec![1, 4, 7]);
    }
}
