//! Row types headed for the store. Each carries a client-generated surrogate id;
//! uniqueness on the natural key is the store's job (conflicting rows are skipped).
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Entity label attached to flush telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Packages,
    Versions,
    Dependencies,
    Users,
    UserPackages,
    UserVersions,
    Urls,
    PackageUrls,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Packages => "packages",
            EntityKind::Versions => "versions",
            EntityKind::Dependencies => "dependencies",
            EntityKind::Users => "users",
            EntityKind::UserPackages => "user_packages",
            EntityKind::UserVersions => "user_versions",
            EntityKind::Urls => "urls",
            EntityKind::PackageUrls => "package_urls",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPackage {
    pub id: Uuid,
    // "<manager_name>/<name>", the human-readable key
    pub derived_id: String,
    pub name: String,
    pub package_manager_id: Uuid,
    pub import_id: String,
    pub readme: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewVersion {
    pub id: Uuid,
    pub package_id: Uuid,
    pub version: String,
    pub import_id: String,
    pub size: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub license_id: Option<Uuid>,
    pub downloads: Option<i64>,
    pub checksum: Option<String>,
}

/// Directed edge version -> package it depends on.
#[derive(Debug, Clone)]
pub struct NewDependency {
    pub id: Uuid,
    pub version_id: Uuid,
    pub dependency_id: Uuid,
    pub semver_range: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    // namespaced per source: the same import_id can exist under github and gitlab
    pub import_id: String,
    pub source_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewUserPackage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub package_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewUserVersion {
    pub id: Uuid,
    pub user_id: Uuid,
    pub version_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewUrl {
    pub id: Uuid,
    pub url: String,
    pub url_type_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewPackageUrl {
    pub id: Uuid,
    pub package_id: Uuid,
    pub url_id: Uuid,
}
