//! Record -> row builders. Pure against the caches they are handed: no store
//! access, no retries. A reference that did not resolve is an expected
//! condition (registries point at packages outside the current snapshot), so
//! the row is dropped with a warning instead of failing the load.
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    NewDependency, NewPackage, NewPackageUrl, NewUrl, NewUser, NewUserPackage, NewUserVersion,
    NewVersion,
};
use crate::records::{
    DependencyRecord, PackageRecord, PackageUrlRecord, UrlRecord, UserPackageRecord, UserRecord,
    UserVersionRecord, VersionRecord,
};
use crate::resolve::IdCache;

pub fn build_package(record: PackageRecord, manager_id: Uuid, manager_name: &str) -> NewPackage {
    NewPackage {
        id: Uuid::new_v4(),
        derived_id: format!("{manager_name}/{}", record.name),
        name: record.name,
        package_manager_id: manager_id,
        import_id: record.import_id,
        readme: record.readme,
    }
}

/// A version cannot exist without its package; a version without a license
/// name simply carries no license id.
pub fn build_version(
    record: VersionRecord,
    packages: &IdCache<String>,
    licenses: &IdCache<String>,
) -> Option<NewVersion> {
    let Some(package_id) = packages.get(&record.crate_id) else {
        warn!(import_id = %record.crate_id, "package not found");
        return None;
    };
    let license_id = record.license.as_ref().and_then(|name| licenses.get(name));
    Some(NewVersion {
        id: Uuid::new_v4(),
        package_id,
        version: record.version,
        import_id: record.import_id,
        size: record.size,
        published_at: record.published_at,
        license_id,
        downloads: record.downloads,
        checksum: record.checksum,
    })
}

pub fn build_dependency(
    record: DependencyRecord,
    versions: &IdCache<String>,
    packages: &IdCache<String>,
) -> Option<NewDependency> {
    let Some(version_id) = versions.get(&record.start_id) else {
        warn!(import_id = %record.start_id, "version not found");
        return None;
    };
    let Some(dependency_id) = packages.get(&record.end_id) else {
        warn!(import_id = %record.end_id, "package not found");
        return None;
    };
    let now = Utc::now();
    Some(NewDependency {
        id: Uuid::new_v4(),
        version_id,
        dependency_id,
        semver_range: record.semver_range,
        created_at: now,
        updated_at: now,
    })
}

pub fn build_user(record: UserRecord, source_id: Uuid) -> NewUser {
    NewUser {
        id: Uuid::new_v4(),
        username: record.username,
        import_id: record.import_id,
        source_id,
    }
}

pub fn build_user_package(
    record: UserPackageRecord,
    users: &IdCache<String>,
    packages: &IdCache<String>,
) -> Option<NewUserPackage> {
    let Some(user_id) = users.get(&record.owner_id) else {
        warn!(import_id = %record.owner_id, "user not found");
        return None;
    };
    let Some(package_id) = packages.get(&record.crate_id) else {
        warn!(import_id = %record.crate_id, "package not found");
        return None;
    };
    Some(NewUserPackage {
        id: Uuid::new_v4(),
        user_id,
        package_id,
    })
}

pub fn build_user_version(
    record: UserVersionRecord,
    users: &IdCache<String>,
    versions: &IdCache<String>,
) -> Option<NewUserVersion> {
    let Some(user_id) = users.get(&record.published_by) else {
        warn!(import_id = %record.published_by, "user not found");
        return None;
    };
    let Some(version_id) = versions.get(&record.version_id) else {
        warn!(import_id = %record.version_id, "version not found");
        return None;
    };
    Some(NewUserVersion {
        id: Uuid::new_v4(),
        user_id,
        version_id,
    })
}

pub fn build_url(record: UrlRecord) -> NewUrl {
    NewUrl {
        id: Uuid::new_v4(),
        url: record.url,
        url_type_id: record.url_type_id,
    }
}

pub fn build_package_url(
    record: PackageUrlRecord,
    packages: &IdCache<String>,
    urls: &IdCache<(String, Uuid)>,
) -> Option<NewPackageUrl> {
    let Some(package_id) = packages.get(&record.import_id) else {
        warn!(import_id = %record.import_id, "package not found");
        return None;
    };
    let key = (record.url, record.url_type_id);
    let Some(url_id) = urls.get(&key) else {
        warn!(url = %key.0, "url not found");
        return None;
    };
    Some(NewPackageUrl {
        id: Uuid::new_v4(),
        package_id,
        url_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version_record(crate_id: &str, license: Option<&str>) -> VersionRecord {
        VersionRecord {
            crate_id: crate_id.to_string(),
            license: license.map(str::to_string),
            version: "1.0.0".to_string(),
            import_id: "v1".to_string(),
            size: Some(10),
            published_at: None,
            downloads: Some(0),
            checksum: Some("x".to_string()),
        }
    }

    #[test]
    fn package_derived_id_joins_manager_and_name() {
        let record = PackageRecord {
            name: "serde".to_string(),
            import_id: "serde".to_string(),
            readme: None,
        };
        let row = build_package(record, Uuid::new_v4(), "crates");
        assert_eq!(row.derived_id, "crates/serde");
        assert_eq!(row.name, "serde");
    }

    #[test]
    fn version_skipped_when_package_unresolved() {
        let packages = IdCache::new();
        let licenses = IdCache::new();
        assert!(build_version(version_record("ghost", Some("MIT")), &packages, &licenses).is_none());
    }

    #[test]
    fn version_without_license_name_has_no_license_id() {
        let mut packages = IdCache::new();
        packages.insert("p1".to_string(), Uuid::new_v4());
        let licenses = IdCache::new();
        let row = build_version(version_record("p1", None), &packages, &licenses)
            .expect("package resolves");
        assert_eq!(row.license_id, None);
    }

    #[test]
    fn version_carries_resolved_ids() {
        let package_id = Uuid::new_v4();
        let license_id = Uuid::new_v4();
        let mut packages = IdCache::new();
        packages.insert("p1".to_string(), package_id);
        let mut licenses = IdCache::new();
        licenses.insert("MIT".to_string(), license_id);
        let row = build_version(version_record("p1", Some("MIT")), &packages, &licenses)
            .expect("both resolve");
        assert_eq!(row.package_id, package_id);
        assert_eq!(row.license_id, Some(license_id));
        assert_eq!(row.import_id, "v1");
    }

    #[test]
    fn dependency_requires_both_ends() {
        let mut versions = IdCache::new();
        versions.insert("v1".to_string(), Uuid::new_v4());
        let mut packages = IdCache::new();
        packages.insert("p1".to_string(), Uuid::new_v4());

        let record = |start: &str, end: &str| DependencyRecord {
            start_id: start.to_string(),
            end_id: end.to_string(),
            semver_range: Some("^1".to_string()),
        };
        assert!(build_dependency(record("v1", "p1"), &versions, &packages).is_some());
        assert!(build_dependency(record("vX", "p1"), &versions, &packages).is_none());
        assert!(build_dependency(record("v1", "pX"), &versions, &packages).is_none());
    }

    #[test]
    fn dependency_timestamps_are_set_together() {
        let mut versions = IdCache::new();
        versions.insert("v1".to_string(), Uuid::new_v4());
        let mut packages = IdCache::new();
        packages.insert("p1".to_string(), Uuid::new_v4());
        let row = build_dependency(
            DependencyRecord {
                start_id: "v1".to_string(),
                end_id: "p1".to_string(),
                semver_range: None,
            },
            &versions,
            &packages,
        )
        .expect("both resolve");
        assert_eq!(row.created_at, row.updated_at);
    }

    #[test]
    fn user_always_builds() {
        let source_id = Uuid::new_v4();
        let row = build_user(
            UserRecord {
                username: "alice".to_string(),
                import_id: "u1".to_string(),
            },
            source_id,
        );
        assert_eq!(row.source_id, source_id);
        assert_eq!(row.username, "alice");
    }

    #[test]
    fn package_url_requires_package_and_url() {
        let url_type_id = Uuid::new_v4();
        let mut packages = IdCache::new();
        packages.insert("p1".to_string(), Uuid::new_v4());
        let mut urls = IdCache::new();
        urls.insert(("https://a".to_string(), url_type_id), Uuid::new_v4());

        let record = |import_id: &str, url: &str| PackageUrlRecord {
            import_id: import_id.to_string(),
            url: url.to_string(),
            url_type_id,
        };
        assert!(build_package_url(record("p1", "https://a"), &packages, &urls).is_some());
        assert!(build_package_url(record("pX", "https://a"), &packages, &urls).is_none());
        assert!(build_package_url(record("p1", "https://b"), &packages, &urls).is_none());
    }
}
