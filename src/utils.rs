use crossbeam_utils::thread::scope;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::panic;

use crate::btree::Comparator;
use crate::error::{Error, Result};

/// Holds the first error raised by any worker of a parallel phase. Later
/// errors are dropped.
#[derive(Debug, Default)]
pub(crate) struct ErrorCell(Mutex<Option<Error>>);

impl ErrorCell {
    pub(crate) fn set(&self, e: Error) {
        let mut guard = self.0.lock();
        if guard.is_none() {
            *guard = Some(e);
        }
    }

    pub(crate) fn take(&self) -> Option<Error> {
        self.0.lock().take()
    }
}

/// Partition `items` into contiguous chunks, run `f` over each chunk on its
/// own scoped worker, and wait for all of them. Results come back in the
/// order of `items` regardless of which worker finished first.
///
/// Every worker runs to completion even after another has failed; the first
/// error captured is returned once the barrier is passed.
pub(crate) fn fan_out<T, R, F>(workers: usize, items: Vec<T>, f: F) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R> + Sync,
{
    if workers <= 1 || items.len() <= 1 {
        return items.into_iter().map(f).collect();
    }

    let chunk_size = items.len().div_ceil(workers);
    let mut chunks: Vec<Vec<T>> = Vec::with_capacity(workers);
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(chunk_size).collect());
    }

    let first_err = ErrorCell::default();
    let f = &f;
    let err_ref = &first_err;

    let joined = scope(|s| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                s.spawn(move |_| {
                    chunk
                        .into_iter()
                        .filter_map(|item| match f(item) {
                            Ok(r) => Some(r),
                            Err(e) => {
                                err_ref.set(e);
                                None
                            }
                        })
                        .collect::<Vec<R>>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
    });

    let joined = match joined {
        Ok(j) => j,
        Err(p) => panic::resume_unwind(p),
    };

    let mut results = Vec::new();
    for out in joined {
        match out {
            Ok(mut r) => results.append(&mut r),
            Err(p) => panic::resume_unwind(p),
        }
    }

    match first_err.take() {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

/// Binary search over a slice ordered by `cmp`. Same contract as
/// `slice::binary_search`: `Ok(idx)` on an exact match, otherwise
/// `Err(idx)` where the value would be inserted.
pub(crate) fn slice_search<V>(slice: &[V], v: &V, cmp: &dyn Comparator<V>) -> Result<usize, usize> {
    slice.binary_search_by(|probe| cmp.compare(probe, v))
}

/// The index of the first element strictly greater than `v`.
pub(crate) fn slice_upper_bound<V>(slice: &[V], v: &V, cmp: &dyn Comparator<V>) -> usize {
    slice.partition_point(|probe| cmp.compare(probe, v) != Ordering::Greater)
}
