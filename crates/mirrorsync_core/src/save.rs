//! Capped save-until-stable loop.
//!
//! Saving one entity may require touching others (relationship fix-ups
//! cascading from a single write). The loop below re-runs a save pass over
//! the follow-up work each pass produces until no work remains, and fails
//! once the pass cap is exceeded.

use crate::error::{CoreError, CoreResult};

/// Maximum number of save passes before a cascade is treated as cyclic.
pub const MAX_SAVE_PASSES: usize = 3;

/// Runs `pass` over `initial`, then over whatever each pass returns, until
/// a pass returns no further work.
///
/// Returns the number of passes run. Fails with
/// [`CoreError::SaveLoopExceeded`] if work remains after `max_passes`.
pub fn save_until_stable<W, F>(initial: Vec<W>, max_passes: usize, mut pass: F) -> CoreResult<usize>
where
    F: FnMut(Vec<W>) -> CoreResult<Vec<W>>,
{
    let mut pending = initial;
    let mut passes = 0;
    while !pending.is_empty() {
        if passes == max_passes {
            tracing::warn!(max_passes, remaining = pending.len(), "save loop exceeded");
            return Err(CoreError::SaveLoopExceeded { max_passes });
        }
        passes += 1;
        pending = pass(pending)?;
    }
    Ok(passes)
}
