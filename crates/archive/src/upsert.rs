//! Conflict resolution between incoming and local entities.

use crate::UpdatePolicy;
use time::UtcDateTime;

/// Fate of one incoming entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Insert,
    Update,
    Skip,
}

/// Decide what to do with an incoming entity.
///
/// `exists` says whether its natural key is already known locally, and
/// `incoming_is_newer` whether it was modified after the local copy. Entity
/// types without a reliable modification time pass `false`, which makes
/// [`OnlyNewer`](UpdatePolicy::OnlyNewer) behave like
/// [`Skip`](UpdatePolicy::Skip) for them.
pub(crate) fn decide(policy: UpdatePolicy, exists: bool, incoming_is_newer: bool) -> Decision {
    match (exists, policy) {
        (false, _) => Decision::Insert,
        (true, UpdatePolicy::Overwrite) => Decision::Update,
        (true, UpdatePolicy::OnlyNewer) if incoming_is_newer => Decision::Update,
        (true, _) => Decision::Skip,
    }
}

/// Coarse "is newer" for cover files.
///
/// Modification times are compared in milliseconds with the low 16 bits
/// dropped, so anything within roughly 65 seconds counts as the same time.
/// Copies between filesystems with slightly different clocks or timestamp
/// resolution don't look newer than they are. A genuinely newer file
/// modified within the same window is missed.
pub(crate) fn cover_is_newer(incoming: UtcDateTime, existing: UtcDateTime) -> bool {
    (millis(incoming) >> 16) > (millis(existing) >> 16)
}

fn millis(timestamp: UtcDateTime) -> i64 {
    (timestamp.unix_timestamp_nanos() / 1_000_000) as i64
}
