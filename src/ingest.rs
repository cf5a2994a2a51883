//! The upsert engine facade: one load operation per entity kind, each wiring
//! raw records through its builder (with per-chunk reference resolution) into
//! a batch writer, plus the get-or-create operations for the small reference
//! tables.
//!
//! Loads are sequential within one entity kind. Kinds that reference other
//! kinds (versions -> packages, dependencies -> versions and packages, the
//! user edges) must be loaded after their referents have committed, or their
//! rows resolve to nothing and are dropped. That ordering is the caller's
//! contract.
use anyhow::Result;
use futures::future::BoxFuture;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::batch::{BatchStats, BatchWriter, DEFAULT_BATCH_SIZE, RESOLVED_BATCH_SIZE};
use crate::build;
use crate::models::{
    EntityKind, NewDependency, NewPackage, NewPackageUrl, NewUrl, NewUser, NewUserPackage,
    NewUserVersion, NewVersion,
};
use crate::records::{
    DependencyRecord, PackageRecord, PackageUrlRecord, UrlRecord, UserPackageRecord, UserRecord,
    UserVersionRecord, VersionRecord,
};
use crate::resolve::{self, IdCache, RESOLVE_CHUNK_SIZE};
use crate::store::Store;

/// Outcome of one load operation.
///
/// `rows` is what survived the builders and went to the store; `inserted` is
/// what the store actually wrote (replays and in-stream duplicates conflict
/// away); `skipped` is records dropped on unresolved references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub rows: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub flushes: u64,
}

impl LoadSummary {
    fn new(records: u64, stats: BatchStats) -> Self {
        Self {
            rows: stats.rows,
            inserted: stats.inserted,
            skipped: records - stats.rows,
            flushes: stats.flushes,
        }
    }
}

fn finish_load(kind: EntityKind, records: u64, stats: BatchStats) -> LoadSummary {
    let summary = LoadSummary::new(records, stats);
    info!(
        kind = kind.as_str(),
        rows = summary.rows,
        inserted = summary.inserted,
        skipped = summary.skipped,
        flushes = summary.flushes,
        "load complete"
    );
    summary
}

fn flush_packages<'a, S: Store>(s: &'a S, rows: &'a [NewPackage]) -> BoxFuture<'a, Result<u64>> {
    s.insert_packages(rows)
}

fn flush_versions<'a, S: Store>(s: &'a S, rows: &'a [NewVersion]) -> BoxFuture<'a, Result<u64>> {
    s.insert_versions(rows)
}

fn flush_dependencies<'a, S: Store>(
    s: &'a S,
    rows: &'a [NewDependency],
) -> BoxFuture<'a, Result<u64>> {
    s.insert_dependencies(rows)
}

fn flush_users<'a, S: Store>(s: &'a S, rows: &'a [NewUser]) -> BoxFuture<'a, Result<u64>> {
    s.insert_users(rows)
}

fn flush_user_packages<'a, S: Store>(
    s: &'a S,
    rows: &'a [NewUserPackage],
) -> BoxFuture<'a, Result<u64>> {
    s.insert_user_packages(rows)
}

fn flush_user_versions<'a, S: Store>(
    s: &'a S,
    rows: &'a [NewUserVersion],
) -> BoxFuture<'a, Result<u64>> {
    s.insert_user_versions(rows)
}

fn flush_urls<'a, S: Store>(s: &'a S, rows: &'a [NewUrl]) -> BoxFuture<'a, Result<u64>> {
    s.insert_urls(rows)
}

fn flush_package_urls<'a, S: Store>(
    s: &'a S,
    rows: &'a [NewPackageUrl],
) -> BoxFuture<'a, Result<u64>> {
    s.insert_package_urls(rows)
}

/// Facade over one store. Batch and chunk sizes default to the module
/// constants; orchestrators can override them per instance.
pub struct Ingest<'s, S> {
    store: &'s S,
    write_batch: usize,
    resolved_batch: usize,
    resolve_chunk: usize,
}

impl<'s, S: Store> Ingest<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            write_batch: DEFAULT_BATCH_SIZE,
            resolved_batch: RESOLVED_BATCH_SIZE,
            resolve_chunk: RESOLVE_CHUNK_SIZE,
        }
    }

    /// Write batch for entities built without lookups.
    pub fn with_write_batch(mut self, rows: usize) -> Self {
        self.write_batch = rows.max(1);
        self
    }

    /// Write batch for entities that needed reference resolution.
    pub fn with_resolved_batch(mut self, rows: usize) -> Self {
        self.resolved_batch = rows.max(1);
        self
    }

    /// Read-ahead chunk feeding each resolver fill pass.
    pub fn with_resolve_chunk(mut self, records: usize) -> Self {
        self.resolve_chunk = records.max(1);
        self
    }

    pub fn store(&self) -> &S {
        self.store
    }

    #[instrument(skip(self, records))]
    pub async fn load_packages<I>(
        &self,
        records: I,
        manager_id: Uuid,
        manager_name: &str,
    ) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = PackageRecord>,
    {
        let mut writer =
            BatchWriter::new(self.store, EntityKind::Packages, self.write_batch, flush_packages);
        let mut seen: u64 = 0;
        for record in records {
            seen += 1;
            writer
                .push(build::build_package(record, manager_id, manager_name))
                .await?;
        }
        Ok(finish_load(EntityKind::Packages, seen, writer.finish().await?))
    }

    #[instrument(skip(self, records))]
    pub async fn load_versions<I>(&self, records: I) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = VersionRecord>,
    {
        let mut packages = IdCache::new();
        let mut licenses = IdCache::new();
        let mut writer = BatchWriter::new(
            self.store,
            EntityKind::Versions,
            self.resolved_batch,
            flush_versions,
        );
        let mut seen: u64 = 0;

        // Read ahead without an iterator adaptor so the future stays Send.
        let mut records = records.into_iter();
        loop {
            let chunk: Vec<VersionRecord> = records.by_ref().take(self.resolve_chunk).collect();
            if chunk.is_empty() {
                break;
            }
            seen += chunk.len() as u64;
            resolve::fill_package_ids(self.store, &mut packages, chunk.iter().map(|r| &r.crate_id))
                .await?;
            resolve::fill_license_ids(
                self.store,
                &mut licenses,
                chunk.iter().filter_map(|r| r.license.as_ref()),
            )
            .await?;
            for record in chunk {
                if let Some(row) = build::build_version(record, &packages, &licenses) {
                    writer.push(row).await?;
                }
            }
        }
        Ok(finish_load(EntityKind::Versions, seen, writer.finish().await?))
    }

    #[instrument(skip(self, records))]
    pub async fn load_dependencies<I>(&self, records: I) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = DependencyRecord>,
    {
        let mut versions = IdCache::new();
        let mut packages = IdCache::new();
        let mut writer = BatchWriter::new(
            self.store,
            EntityKind::Dependencies,
            self.resolved_batch,
            flush_dependencies,
        );
        let mut seen: u64 = 0;

        let mut records = records.into_iter();
        loop {
            let chunk: Vec<DependencyRecord> = records.by_ref().take(self.resolve_chunk).collect();
            if chunk.is_empty() {
                break;
            }
            seen += chunk.len() as u64;
            resolve::fill_version_ids(self.store, &mut versions, chunk.iter().map(|r| &r.start_id))
                .await?;
            resolve::fill_package_ids(self.store, &mut packages, chunk.iter().map(|r| &r.end_id))
                .await?;
            for record in chunk {
                if let Some(row) = build::build_dependency(record, &versions, &packages) {
                    writer.push(row).await?;
                }
            }
        }
        Ok(finish_load(EntityKind::Dependencies, seen, writer.finish().await?))
    }

    /// Users carry no resolvable references; the source they belong to is
    /// fixed by the caller for the whole stream.
    #[instrument(skip(self, records))]
    pub async fn load_users<I>(&self, records: I, source_id: Uuid) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = UserRecord>,
    {
        let mut writer =
            BatchWriter::new(self.store, EntityKind::Users, self.write_batch, flush_users);
        let mut seen: u64 = 0;
        for record in records {
            seen += 1;
            writer.push(build::build_user(record, source_id)).await?;
        }
        Ok(finish_load(EntityKind::Users, seen, writer.finish().await?))
    }

    #[instrument(skip(self, records))]
    pub async fn load_user_packages<I>(&self, records: I, source_id: Uuid) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = UserPackageRecord>,
    {
        let mut users = IdCache::new();
        let mut packages = IdCache::new();
        let mut writer = BatchWriter::new(
            self.store,
            EntityKind::UserPackages,
            self.resolved_batch,
            flush_user_packages,
        );
        let mut seen: u64 = 0;

        let mut records = records.into_iter();
        loop {
            let chunk: Vec<UserPackageRecord> = records.by_ref().take(self.resolve_chunk).collect();
            if chunk.is_empty() {
                break;
            }
            seen += chunk.len() as u64;
            resolve::fill_user_ids(
                self.store,
                &mut users,
                chunk.iter().map(|r| &r.owner_id),
                source_id,
            )
            .await?;
            resolve::fill_package_ids(self.store, &mut packages, chunk.iter().map(|r| &r.crate_id))
                .await?;
            for record in chunk {
                if let Some(row) = build::build_user_package(record, &users, &packages) {
                    writer.push(row).await?;
                }
            }
        }
        Ok(finish_load(EntityKind::UserPackages, seen, writer.finish().await?))
    }

    #[instrument(skip(self, records))]
    pub async fn load_user_versions<I>(&self, records: I, source_id: Uuid) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = UserVersionRecord>,
    {
        let mut users = IdCache::new();
        let mut versions = IdCache::new();
        let mut writer = BatchWriter::new(
            self.store,
            EntityKind::UserVersions,
            self.resolved_batch,
            flush_user_versions,
        );
        let mut seen: u64 = 0;

        let mut records = records.into_iter();
        loop {
            let chunk: Vec<UserVersionRecord> = records.by_ref().take(self.resolve_chunk).collect();
            if chunk.is_empty() {
                break;
            }
            seen += chunk.len() as u64;
            resolve::fill_user_ids(
                self.store,
                &mut users,
                chunk.iter().map(|r| &r.published_by),
                source_id,
            )
            .await?;
            resolve::fill_version_ids(
                self.store,
                &mut versions,
                chunk.iter().map(|r| &r.version_id),
            )
            .await?;
            for record in chunk {
                if let Some(row) = build::build_user_version(record, &users, &versions) {
                    writer.push(row).await?;
                }
            }
        }
        Ok(finish_load(EntityKind::UserVersions, seen, writer.finish().await?))
    }

    #[instrument(skip(self, records))]
    pub async fn load_urls<I>(&self, records: I) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = UrlRecord>,
    {
        let mut writer =
            BatchWriter::new(self.store, EntityKind::Urls, self.write_batch, flush_urls);
        let mut seen: u64 = 0;
        for record in records {
            seen += 1;
            writer.push(build::build_url(record)).await?;
        }
        Ok(finish_load(EntityKind::Urls, seen, writer.finish().await?))
    }

    #[instrument(skip(self, records))]
    pub async fn load_package_urls<I>(&self, records: I) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = PackageUrlRecord>,
    {
        let mut packages = IdCache::new();
        let mut urls = IdCache::new();
        let mut writer = BatchWriter::new(
            self.store,
            EntityKind::PackageUrls,
            self.resolved_batch,
            flush_package_urls,
        );
        let mut seen: u64 = 0;

        let mut records = records.into_iter();
        loop {
            let chunk: Vec<PackageUrlRecord> = records.by_ref().take(self.resolve_chunk).collect();
            if chunk.is_empty() {
                break;
            }
            seen += chunk.len() as u64;
            resolve::fill_package_ids(
                self.store,
                &mut packages,
                chunk.iter().map(|r| &r.import_id),
            )
            .await?;
            let pairs: Vec<(String, Uuid)> = chunk
                .iter()
                .map(|r| (r.url.clone(), r.url_type_id))
                .collect();
            resolve::fill_url_ids(self.store, &mut urls, pairs.iter()).await?;
            for record in chunk {
                if let Some(row) = build::build_package_url(record, &packages, &urls) {
                    writer.push(row).await?;
                }
            }
        }
        Ok(finish_load(EntityKind::PackageUrls, seen, writer.finish().await?))
    }

    pub async fn get_or_create_source(&self, name: &str) -> Result<Uuid> {
        self.store.get_or_create_source(name).await
    }

    pub async fn get_or_create_license(&self, name: &str) -> Result<Uuid> {
        self.store.get_or_create_license(name).await
    }

    pub async fn get_or_create_url_type(&self, name: &str) -> Result<Uuid> {
        self.store.get_or_create_url_type(name).await
    }

    pub async fn get_or_create_package_manager(&self, source_id: Uuid) -> Result<Uuid> {
        self.store.get_or_create_package_manager(source_id).await
    }

    /// Manager for a source name, creating the source and manager as needed.
    pub async fn get_or_create_package_manager_by_name(&self, name: &str) -> Result<Uuid> {
        if let Some(id) = self.store.package_manager_by_source_name(name).await? {
            return Ok(id);
        }
        let source_id = self.store.get_or_create_source(name).await?;
        self.store.get_or_create_package_manager(source_id).await
    }

    pub async fn package_manager_name(&self, id: Uuid) -> Result<Option<String>> {
        self.store.package_manager_name(id).await
    }

    pub async fn homepage_url_type_id(&self) -> Result<Uuid> {
        self.store.get_or_create_url_type("homepage").await
    }

    pub async fn repository_url_type_id(&self) -> Result<Uuid> {
        self.store.get_or_create_url_type("repository").await
    }

    pub async fn documentation_url_type_id(&self) -> Result<Uuid> {
        self.store.get_or_create_url_type("documentation").await
    }

    /// Mark a completed ingestion run for this manager.
    pub async fn record_load_history(&self, package_manager_id: Uuid) -> Result<()> {
        self.store.record_load_history(package_manager_id).await
    }
}
