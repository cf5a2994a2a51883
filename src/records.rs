//! Raw records as handed over by source connectors, one type per entity kind.
//! Field names follow the connector payloads: `crate_id` / `start_id` / `end_id`
//! and friends are registry import ids, not internal ids.
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub import_id: String,
    #[serde(default)]
    pub readme: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionRecord {
    // import_id of the owning package
    pub crate_id: String,
    #[serde(default)]
    pub license: Option<String>,
    pub version: String,
    pub import_id: String,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub downloads: Option<i64>,
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependencyRecord {
    // version import_id on the depending side
    pub start_id: String,
    // package import_id being depended on
    pub end_id: String,
    #[serde(default)]
    pub semver_range: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub import_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserPackageRecord {
    pub crate_id: String,
    // user import_id of the owner
    pub owner_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserVersionRecord {
    pub version_id: String,
    // user import_id of the publisher
    pub published_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub url_type_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackageUrlRecord {
    pub import_id: String,
    pub url: String,
    pub url_type_id: Uuid,
}
