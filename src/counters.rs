//! Performance counters: count how many times we do various important
//! operations, so a long-running host can log a summary at shutdown.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering, fence};

use enum_map::{Enum, EnumMap};
use tracing::debug;

#[derive(Debug, Copy, Clone, Enum)]
pub enum Op {
    ObjectAdded,
    ObjectDeduplicated,
    ObjectCacheHit,
    ObjectCacheMiss,
    ManifestPublished,
    UploadFileSkippedAlreadyPresent,
    DownloadStreamedFromWire,
    DownloadCopiedLocally,
}

fn counter_map() -> &'static EnumMap<Op, AtomicUsize> {
    static MAP: OnceLock<EnumMap<Op, AtomicUsize>> = OnceLock::new();
    MAP.get_or_init(EnumMap::default)
}

#[inline]
pub fn bump(which: Op) {
    add(which, 1);
}

pub fn add(to: Op, amount: usize) {
    counter_map()[to].fetch_add(amount, Ordering::Relaxed);
}

pub fn log_counts() {
    // We're probably calling this once at program exit.
    fence(Ordering::SeqCst);

    let counts = counter_map()
        .iter()
        .map(|(k, v)| (k, v.load(Ordering::Relaxed)))
        .filter(|(_k, v)| *v > 0)
        .collect::<Vec<_>>();

    if counts.is_empty() {
        return;
    }

    let opname = |op| match op {
        Op::ObjectAdded => "objects added",
        Op::ObjectDeduplicated => "object uploads deduplicated",
        Op::ObjectCacheHit => "local cache hits",
        Op::ObjectCacheMiss => "local cache misses",
        Op::ManifestPublished => "manifests published",
        Op::UploadFileSkippedAlreadyPresent => "upload files skipped, already present",
        Op::DownloadStreamedFromWire => "objects streamed off the wire",
        Op::DownloadCopiedLocally => "objects copied from an earlier local file",
    };

    debug!("Counters:");
    for (op, count) in &counts {
        debug!("{count:6} {}", opname(*op));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bump_increments_the_right_counter() {
        let before = counter_map()[Op::ObjectAdded].load(Ordering::Relaxed);
        bump(Op::ObjectAdded);
        let after = counter_map()[Op::ObjectAdded].load(Ordering::Relaxed);
        assert_eq!(after, before + 1);
    }
}
