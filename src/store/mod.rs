//! Storage contract and backends.
//!
//! `Store` is the seam between the upsert engine and the relational backend:
//! bulk ignore-on-duplicate inserts, bulk natural-key lookups, and atomic
//! get-or-create for the small reference vocabularies. `PgStore` talks to
//! Postgres; `MemStore` (tests, `mock` feature) mirrors the same conflict
//! semantics in memory.

#[cfg(any(test, feature = "mock"))]
mod mem;
mod pg;

#[cfg(any(test, feature = "mock"))]
pub use self::mem::MemStore;
pub use self::pg::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    NewDependency, NewPackage, NewPackageUrl, NewUrl, NewUser, NewUserPackage, NewUserVersion,
    NewVersion,
};

/// Relational backend as the engine sees it.
///
/// Insert calls execute one bulk statement with conflicts skipped and commit
/// before returning; the returned count is rows actually written, not rows
/// offered. Lookup calls are one round trip each. Get-or-create calls are
/// atomic under concurrent writers racing on the same natural key.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_packages(&self, rows: &[NewPackage]) -> Result<u64>;
    async fn insert_versions(&self, rows: &[NewVersion]) -> Result<u64>;
    async fn insert_dependencies(&self, rows: &[NewDependency]) -> Result<u64>;
    async fn insert_users(&self, rows: &[NewUser]) -> Result<u64>;
    async fn insert_user_packages(&self, rows: &[NewUserPackage]) -> Result<u64>;
    async fn insert_user_versions(&self, rows: &[NewUserVersion]) -> Result<u64>;
    async fn insert_urls(&self, rows: &[NewUrl]) -> Result<u64>;
    async fn insert_package_urls(&self, rows: &[NewPackageUrl]) -> Result<u64>;

    /// Resolve package import_ids to ids. Unknown keys are simply absent
    /// from the result, never an error.
    async fn package_ids_by_import_ids(&self, import_ids: &[String])
        -> Result<Vec<(String, Uuid)>>;
    async fn version_ids_by_import_ids(&self, import_ids: &[String])
        -> Result<Vec<(String, Uuid)>>;
    async fn license_ids_by_names(&self, names: &[String]) -> Result<Vec<(String, Uuid)>>;
    /// User import_ids are namespaced per source.
    async fn user_ids_by_import_ids(
        &self,
        import_ids: &[String],
        source_id: Uuid,
    ) -> Result<Vec<(String, Uuid)>>;
    /// Resolve (url, url_type_id) pairs; yields (url, url_type_id, id).
    async fn url_ids_by_pairs(&self, pairs: &[(String, Uuid)]) -> Result<Vec<(String, Uuid, Uuid)>>;

    async fn get_or_create_source(&self, name: &str) -> Result<Uuid>;
    async fn get_or_create_license(&self, name: &str) -> Result<Uuid>;
    async fn get_or_create_url_type(&self, name: &str) -> Result<Uuid>;
    /// One manager per source; keyed by source_id.
    async fn get_or_create_package_manager(&self, source_id: Uuid) -> Result<Uuid>;

    /// Manager id via its source's name ("crates", "npm", ...).
    async fn package_manager_by_source_name(&self, name: &str) -> Result<Option<Uuid>>;
    /// Reverse of the above: the source name behind a manager id.
    async fn package_manager_name(&self, id: Uuid) -> Result<Option<String>>;

    /// Append one load-history row marking a completed run.
    async fn record_load_history(&self, package_manager_id: Uuid) -> Result<()>;
}
