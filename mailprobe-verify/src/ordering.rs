use std::collections::HashSet;

use mailprobe_common::{Exchanger, HostKey};
use rand::{Rng, seq::SliceRandom};

/// Puts exchangers in the order they should be tried.
///
/// Ascending priority is preference order. Exchangers sharing a priority
/// are equally preferred, so with `randomize` each such group is shuffled
/// in place; groups never trade positions. Repeated hosts keep only their
/// most preferred entry, and at most `max` exchangers remain.
pub fn order_exchangers<R: Rng + ?Sized>(
    mut exchangers: Vec<Exchanger>,
    max: usize,
    randomize: bool,
    rng: &mut R,
) -> Vec<Exchanger> {
    exchangers.sort_by_key(|mx| mx.priority);

    let mut seen: HashSet<HostKey> = HashSet::with_capacity(exchangers.len());
    exchangers.retain(|mx| seen.insert(mx.key()));

    if randomize {
        for group in exchangers.chunk_by_mut(|a, b| a.priority == b.priority) {
            group.shuffle(rng);
        }
    }

    exchangers.truncate(max);
    exchangers
}
