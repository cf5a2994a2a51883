//! Reference resolution: natural keys (import ids, license names, urls) to
//! surrogate ids. Each fill pass bulk-fetches the keys of one read-ahead chunk
//! that are not already cached, so per-record lookups stay in memory.
use std::collections::HashMap;
use std::hash::Hash;

use anyhow::Result;
use itertools::Itertools;
use tracing::debug;
use uuid::Uuid;

use crate::store::Store;

/// Raw records to read ahead before resolving their references. Independent of
/// the write-batch size.
pub const RESOLVE_CHUNK_SIZE: usize = 10_000;

/// Natural key -> surrogate id. Entries are only ever added; the cache lives
/// for one load call and is dropped with it.
#[derive(Debug, Default)]
pub struct IdCache<K> {
    map: HashMap<K, Uuid>,
}

impl<K: Eq + Hash> IdCache<K> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<Uuid> {
        self.map.get(key).copied()
    }

    pub fn insert(&mut self, key: K, id: Uuid) {
        self.map.insert(key, id);
    }

    pub fn extend(&mut self, pairs: impl IntoIterator<Item = (K, Uuid)>) {
        self.map.extend(pairs);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Distinct keys from `keys` not yet cached, in first-seen order.
    pub fn missing_from<'a, I>(&self, keys: I) -> Vec<K>
    where
        K: Clone + 'a,
        I: IntoIterator<Item = &'a K>,
    {
        keys.into_iter()
            .filter(|&key| !self.map.contains_key(key))
            .unique()
            .cloned()
            .collect()
    }
}

pub async fn fill_package_ids<'a, S, I>(
    store: &S,
    cache: &mut IdCache<String>,
    import_ids: I,
) -> Result<()>
where
    S: Store,
    I: IntoIterator<Item = &'a String>,
{
    let missing = cache.missing_from(import_ids);
    if missing.is_empty() {
        return Ok(());
    }
    debug!(count = missing.len(), "querying packages");
    cache.extend(store.package_ids_by_import_ids(&missing).await?);
    debug!(cached = cache.len(), "cached packages");
    Ok(())
}

pub async fn fill_version_ids<'a, S, I>(
    store: &S,
    cache: &mut IdCache<String>,
    import_ids: I,
) -> Result<()>
where
    S: Store,
    I: IntoIterator<Item = &'a String>,
{
    let missing = cache.missing_from(import_ids);
    if missing.is_empty() {
        return Ok(());
    }
    debug!(count = missing.len(), "querying versions");
    cache.extend(store.version_ids_by_import_ids(&missing).await?);
    debug!(cached = cache.len(), "cached versions");
    Ok(())
}

/// Licenses are create-on-first-sight vocabulary: names absent after the bulk
/// pass are created one by one and cached, so every name resolves.
pub async fn fill_license_ids<'a, S, I>(
    store: &S,
    cache: &mut IdCache<String>,
    names: I,
) -> Result<()>
where
    S: Store,
    I: IntoIterator<Item = &'a String>,
{
    let missing = cache.missing_from(names);
    if missing.is_empty() {
        return Ok(());
    }
    debug!(count = missing.len(), "querying licenses");
    cache.extend(store.license_ids_by_names(&missing).await?);
    for name in missing {
        if cache.get(&name).is_some() {
            continue;
        }
        let id = store.get_or_create_license(&name).await?;
        cache.insert(name, id);
    }
    debug!(cached = cache.len(), "cached licenses");
    Ok(())
}

pub async fn fill_user_ids<'a, S, I>(
    store: &S,
    cache: &mut IdCache<String>,
    import_ids: I,
    source_id: Uuid,
) -> Result<()>
where
    S: Store,
    I: IntoIterator<Item = &'a String>,
{
    let missing = cache.missing_from(import_ids);
    if missing.is_empty() {
        return Ok(());
    }
    debug!(count = missing.len(), "querying users");
    cache.extend(store.user_ids_by_import_ids(&missing, source_id).await?);
    debug!(cached = cache.len(), "cached users");
    Ok(())
}

pub async fn fill_url_ids<'a, S, I>(
    store: &S,
    cache: &mut IdCache<(String, Uuid)>,
    pairs: I,
) -> Result<()>
where
    S: Store,
    I: IntoIterator<Item = &'a (String, Uuid)>,
{
    let missing = cache.missing_from(pairs);
    if missing.is_empty() {
        return Ok(());
    }
    debug!(count = missing.len(), "querying urls");
    let found = store.url_ids_by_pairs(&missing).await?;
    cache.extend(found.into_iter().map(|(url, ty, id)| ((url, ty), id)));
    debug!(cached = cache.len(), "cached urls");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPackage;
    use crate::store::MemStore;

    fn seed_package(import_id: &str) -> NewPackage {
        NewPackage {
            id: Uuid::new_v4(),
            derived_id: format!("crates/{import_id}"),
            name: import_id.to_string(),
            package_manager_id: Uuid::new_v4(),
            import_id: import_id.to_string(),
            readme: None,
        }
    }

    #[test]
    fn missing_from_dedups_and_skips_cached() {
        let mut cache = IdCache::new();
        cache.insert("a".to_string(), Uuid::new_v4());
        let keys = vec!["a".to_string(), "b".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(cache.missing_from(keys.iter()), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn second_fill_only_queries_unseen_keys() {
        let store = MemStore::new();
        store
            .insert_packages(&[seed_package("p1"), seed_package("p2"), seed_package("p3")])
            .await
            .unwrap();

        let mut cache = IdCache::new();
        let first: Vec<String> = vec!["p1".into(), "p2".into()];
        fill_package_ids(&store, &mut cache, first.iter())
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);

        let second: Vec<String> = vec!["p2".into(), "p3".into()];
        fill_package_ids(&store, &mut cache, second.iter())
            .await
            .unwrap();
        assert_eq!(cache.len(), 3);
        // first pass asked for two keys, second only for the one unseen
        assert_eq!(store.lookup_log(), vec![("package", 2), ("package", 1)]);
    }

    #[tokio::test]
    async fn fully_cached_chunk_issues_no_query() {
        let store = MemStore::new();
        store.insert_packages(&[seed_package("p1")]).await.unwrap();

        let mut cache = IdCache::new();
        let keys: Vec<String> = vec!["p1".into()];
        fill_package_ids(&store, &mut cache, keys.iter())
            .await
            .unwrap();
        fill_package_ids(&store, &mut cache, keys.iter())
            .await
            .unwrap();
        assert_eq!(store.lookup_log().len(), 1);
    }

    #[tokio::test]
    async fn unknown_package_keys_stay_unresolved() {
        let store = MemStore::new();
        let mut cache = IdCache::new();
        let keys: Vec<String> = vec!["ghost".into()];
        fill_package_ids(&store, &mut cache, keys.iter())
            .await
            .unwrap();
        assert_eq!(cache.get(&"ghost".to_string()), None);
    }

    #[tokio::test]
    async fn license_fill_creates_unseen_names_once() {
        let store = MemStore::new();
        let mut cache = IdCache::new();
        let names: Vec<String> = vec!["MIT".into(), "MIT".into(), "Apache-2.0".into()];
        fill_license_ids(&store, &mut cache, names.iter())
            .await
            .unwrap();
        assert_eq!(store.license_count(), 2);
        let mit = cache.get(&"MIT".to_string());
        assert!(mit.is_some());
        assert_eq!(mit, store.license_id("MIT"));

        // refilling with the same names neither queries nor creates
        fill_license_ids(&store, &mut cache, names.iter())
            .await
            .unwrap();
        assert_eq!(store.license_count(), 2);
        assert_eq!(store.lookup_log().len(), 1);
    }
}
