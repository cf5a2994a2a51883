//! In-memory `Store` with the same conflict-skip semantics as Postgres.
//! Intended for this crate's tests and, behind the `mock` feature, for other
//! crates' dev-dependencies.
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::Store;
use crate::models::{
    NewDependency, NewPackage, NewPackageUrl, NewUrl, NewUser, NewUserPackage, NewUserVersion,
    NewVersion,
};

#[derive(Default)]
struct Inner {
    packages: Vec<NewPackage>,
    package_by_import: HashMap<String, Uuid>,
    versions: Vec<NewVersion>,
    version_by_import: HashMap<String, Uuid>,
    dependencies: Vec<NewDependency>,
    dependency_keys: HashSet<(Uuid, Uuid)>,
    users: Vec<NewUser>,
    user_by_key: HashMap<(String, Uuid), Uuid>,
    user_packages: Vec<NewUserPackage>,
    user_package_keys: HashSet<(Uuid, Uuid)>,
    user_versions: Vec<NewUserVersion>,
    user_version_keys: HashSet<(Uuid, Uuid)>,
    urls: Vec<NewUrl>,
    url_by_key: HashMap<(String, Uuid), Uuid>,
    package_urls: Vec<NewPackageUrl>,
    package_url_keys: HashSet<(Uuid, Uuid)>,
    licenses: HashMap<String, Uuid>,
    sources: HashMap<String, Uuid>,
    url_types: HashMap<String, Uuid>,
    package_managers: Vec<(Uuid, Uuid)>,
    load_history: Vec<Uuid>,
    // telemetry for assertions: (table, rows) per insert, (key kind, keys) per bulk lookup
    insert_log: Vec<(&'static str, usize)>,
    lookup_log: Vec<(&'static str, usize)>,
    fail_after_inserts: Option<usize>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make every insert call past the first `n` fail, to exercise the
    /// abort-on-flush-error path.
    pub fn fail_after_inserts(&self, n: usize) {
        self.lock().fail_after_inserts = Some(n);
    }

    pub fn packages(&self) -> Vec<NewPackage> {
        self.lock().packages.clone()
    }

    pub fn versions(&self) -> Vec<NewVersion> {
        self.lock().versions.clone()
    }

    pub fn dependencies(&self) -> Vec<NewDependency> {
        self.lock().dependencies.clone()
    }

    pub fn users(&self) -> Vec<NewUser> {
        self.lock().users.clone()
    }

    pub fn user_packages(&self) -> Vec<NewUserPackage> {
        self.lock().user_packages.clone()
    }

    pub fn user_versions(&self) -> Vec<NewUserVersion> {
        self.lock().user_versions.clone()
    }

    pub fn urls(&self) -> Vec<NewUrl> {
        self.lock().urls.clone()
    }

    pub fn package_urls(&self) -> Vec<NewPackageUrl> {
        self.lock().package_urls.clone()
    }

    pub fn package_id(&self, import_id: &str) -> Option<Uuid> {
        self.lock().package_by_import.get(import_id).copied()
    }

    pub fn version_id(&self, import_id: &str) -> Option<Uuid> {
        self.lock().version_by_import.get(import_id).copied()
    }

    pub fn license_id(&self, name: &str) -> Option<Uuid> {
        self.lock().licenses.get(name).copied()
    }

    pub fn license_count(&self) -> usize {
        self.lock().licenses.len()
    }

    pub fn source_count(&self) -> usize {
        self.lock().sources.len()
    }

    pub fn url_type_count(&self) -> usize {
        self.lock().url_types.len()
    }

    pub fn load_history(&self) -> Vec<Uuid> {
        self.lock().load_history.clone()
    }

    /// (table, rows) per insert statement, in execution order.
    pub fn insert_log(&self) -> Vec<(&'static str, usize)> {
        self.lock().insert_log.clone()
    }

    /// (key kind, distinct keys) per bulk lookup, in execution order.
    pub fn lookup_log(&self) -> Vec<(&'static str, usize)> {
        self.lock().lookup_log.clone()
    }

    fn begin_insert(inner: &mut Inner, table: &'static str, rows: usize) -> Result<()> {
        if let Some(limit) = inner.fail_after_inserts {
            if inner.insert_log.len() >= limit {
                bail!("injected failure inserting into {table}");
            }
        }
        inner.insert_log.push((table, rows));
        Ok(())
    }
}

#[async_trait]
impl Store for MemStore {
    async fn insert_packages(&self, rows: &[NewPackage]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();
        Self::begin_insert(&mut inner, "packages", rows.len())?;
        let mut inserted = 0;
        for r in rows {
            if inner.package_by_import.contains_key(&r.import_id) {
                continue;
            }
            inner.package_by_import.insert(r.import_id.clone(), r.id);
            inner.packages.push(r.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_versions(&self, rows: &[NewVersion]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();
        Self::begin_insert(&mut inner, "versions", rows.len())?;
        let mut inserted = 0;
        for r in rows {
            if inner.version_by_import.contains_key(&r.import_id) {
                continue;
            }
            inner.version_by_import.insert(r.import_id.clone(), r.id);
            inner.versions.push(r.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_dependencies(&self, rows: &[NewDependency]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();
        Self::begin_insert(&mut inner, "dependencies", rows.len())?;
        let mut inserted = 0;
        for r in rows {
            if !inner.dependency_keys.insert((r.version_id, r.dependency_id)) {
                continue;
            }
            inner.dependencies.push(r.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_users(&self, rows: &[NewUser]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();
        Self::begin_insert(&mut inner, "users", rows.len())?;
        let mut inserted = 0;
        for r in rows {
            let key = (r.import_id.clone(), r.source_id);
            if inner.user_by_key.contains_key(&key) {
                continue;
            }
            inner.user_by_key.insert(key, r.id);
            inner.users.push(r.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_user_packages(&self, rows: &[NewUserPackage]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();
        Self::begin_insert(&mut inner, "user_packages", rows.len())?;
        let mut inserted = 0;
        for r in rows {
            if !inner.user_package_keys.insert((r.user_id, r.package_id)) {
                continue;
            }
            inner.user_packages.push(r.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_user_versions(&self, rows: &[NewUserVersion]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();
        Self::begin_insert(&mut inner, "user_versions", rows.len())?;
        let mut inserted = 0;
        for r in rows {
            if !inner.user_version_keys.insert((r.user_id, r.version_id)) {
                continue;
            }
            inner.user_versions.push(r.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_urls(&self, rows: &[NewUrl]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();
        Self::begin_insert(&mut inner, "urls", rows.len())?;
        let mut inserted = 0;
        for r in rows {
            let key = (r.url.clone(), r.url_type_id);
            if inner.url_by_key.contains_key(&key) {
                continue;
            }
            inner.url_by_key.insert(key, r.id);
            inner.urls.push(r.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_package_urls(&self, rows: &[NewPackageUrl]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();
        Self::begin_insert(&mut inner, "package_urls", rows.len())?;
        let mut inserted = 0;
        for r in rows {
            if !inner.package_url_keys.insert((r.package_id, r.url_id)) {
                continue;
            }
            inner.package_urls.push(r.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn package_ids_by_import_ids(
        &self,
        import_ids: &[String],
    ) -> Result<Vec<(String, Uuid)>> {
        if import_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.lock();
        inner.lookup_log.push(("package", import_ids.len()));
        Ok(import_ids
            .iter()
            .filter_map(|iid| {
                inner
                    .package_by_import
                    .get(iid)
                    .map(|id| (iid.clone(), *id))
            })
            .collect())
    }

    async fn version_ids_by_import_ids(
        &self,
        import_ids: &[String],
    ) -> Result<Vec<(String, Uuid)>> {
        if import_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.lock();
        inner.lookup_log.push(("version", import_ids.len()));
        Ok(import_ids
            .iter()
            .filter_map(|iid| {
                inner
                    .version_by_import
                    .get(iid)
                    .map(|id| (iid.clone(), *id))
            })
            .collect())
    }

    async fn license_ids_by_names(&self, names: &[String]) -> Result<Vec<(String, Uuid)>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.lock();
        inner.lookup_log.push(("license", names.len()));
        Ok(names
            .iter()
            .filter_map(|n| inner.licenses.get(n).map(|id| (n.clone(), *id)))
            .collect())
    }

    async fn user_ids_by_import_ids(
        &self,
        import_ids: &[String],
        source_id: Uuid,
    ) -> Result<Vec<(String, Uuid)>> {
        if import_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.lock();
        inner.lookup_log.push(("user", import_ids.len()));
        Ok(import_ids
            .iter()
            .filter_map(|iid| {
                inner
                    .user_by_key
                    .get(&(iid.clone(), source_id))
                    .map(|id| (iid.clone(), *id))
            })
            .collect())
    }

    async fn url_ids_by_pairs(&self, pairs: &[(String, Uuid)]) -> Result<Vec<(String, Uuid, Uuid)>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.lock();
        inner.lookup_log.push(("url", pairs.len()));
        Ok(pairs
            .iter()
            .filter_map(|key| {
                inner
                    .url_by_key
                    .get(key)
                    .map(|id| (key.0.clone(), key.1, *id))
            })
            .collect())
    }

    async fn get_or_create_source(&self, name: &str) -> Result<Uuid> {
        let mut inner = self.lock();
        let id = *inner
            .sources
            .entry(name.to_string())
            .or_insert_with(Uuid::new_v4);
        Ok(id)
    }

    async fn get_or_create_license(&self, name: &str) -> Result<Uuid> {
        let mut inner = self.lock();
        let id = *inner
            .licenses
            .entry(name.to_string())
            .or_insert_with(Uuid::new_v4);
        Ok(id)
    }

    async fn get_or_create_url_type(&self, name: &str) -> Result<Uuid> {
        let mut inner = self.lock();
        let id = *inner
            .url_types
            .entry(name.to_string())
            .or_insert_with(Uuid::new_v4);
        Ok(id)
    }

    async fn get_or_create_package_manager(&self, source_id: Uuid) -> Result<Uuid> {
        let mut inner = self.lock();
        if let Some((id, _)) = inner.package_managers.iter().find(|(_, s)| *s == source_id) {
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        inner.package_managers.push((id, source_id));
        Ok(id)
    }

    async fn package_manager_by_source_name(&self, name: &str) -> Result<Option<Uuid>> {
        let inner = self.lock();
        let Some(source_id) = inner.sources.get(name).copied() else {
            return Ok(None);
        };
        Ok(inner
            .package_managers
            .iter()
            .find(|(_, s)| *s == source_id)
            .map(|(id, _)| *id))
    }

    async fn package_manager_name(&self, id: Uuid) -> Result<Option<String>> {
        let inner = self.lock();
        let Some((_, source_id)) = inner.package_managers.iter().find(|(m, _)| *m == id) else {
            return Ok(None);
        };
        Ok(inner
            .sources
            .iter()
            .find(|(_, sid)| **sid == *source_id)
            .map(|(name, _)| name.clone()))
    }

    async fn record_load_history(&self, package_manager_id: Uuid) -> Result<()> {
        self.lock().load_history.push(package_manager_id);
        Ok(())
    }
}
