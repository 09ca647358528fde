use std::collections::HashMap;
use std::convert::Infallible;
use std::hash::Hash;

/// Keep the first item of every key, preserving order.
pub fn dedup_by_key<T, K, F>(items: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    match dedup_by_key_with(items, key, |_, _| Ok::<_, Infallible>(false)) {
        Ok(kept) => kept,
        Err(never) => match never {},
    }
}

/// Deduplicate by key, letting `replace(kept, incoming)` decide collisions.
///
/// When `replace` returns `true` the incoming item takes the kept item's slot,
/// so the output order is always first-occurrence order of the keys.
pub fn dedup_by_key_with<T, K, E, F, R>(
    items: impl IntoIterator<Item = T>,
    mut key: F,
    mut replace: R,
) -> Result<Vec<T>, E>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
    R: FnMut(&T, &T) -> Result<bool, E>,
{
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut kept: Vec<T> = Vec::new();

    for item in items {
        let k = key(&item);
        match slots.get(&k).copied() {
            Some(slot) => {
                if replace(&kept[slot], &item)? {
                    kept[slot] = item;
                }
            }
            None => {
                slots.insert(k, kept.len());
                kept.push(item);
            }
        }
    }

    Ok(kept)
}
