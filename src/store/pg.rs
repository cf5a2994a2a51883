use anyhow::Result;
use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, QueryBuilder, Row,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::Store;
use crate::config;
use crate::models::{
    NewDependency, NewPackage, NewPackageUrl, NewUrl, NewUser, NewUserPackage, NewUserVersion,
    NewVersion,
};

/// Postgres-backed store. Cheap to clone; all methods share one pool.
#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        // PgBouncer txn mode safe
        let connect_options = connect_options.statement_cache_capacity(0);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");
        Ok(Self { pool })
    }

    /// Connect using the DSN from the configured env var.
    pub async fn connect_from_env(max_connections: u32) -> Result<Self> {
        let url = config::database_url()?;
        Self::connect(&url, max_connections).await
    }

    async fn select_id_by_text(&self, sql: &str, key: &str) -> Result<Option<Uuid>> {
        let rec = sqlx::query(sql)
            .persistent(false)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rec.map(|r| r.get("id")))
    }

    /// Shared get-or-create body for the name-keyed reference tables.
    /// Insert-with-conflict-skip keeps concurrent creators from duplicating
    /// the row; whoever loses the race reads the winner's id back.
    async fn get_or_create_by_name(
        &self,
        select_sql: &str,
        insert_sql: &str,
        name: &str,
    ) -> Result<Uuid> {
        if let Some(id) = self.select_id_by_text(select_sql, name).await? {
            return Ok(id);
        }
        if let Some(rec) = sqlx::query(insert_sql)
            .persistent(false)
            .bind(Uuid::new_v4())
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(rec.get("id"));
        }
        // Lost the race; the winner's row exists now.
        let rec = sqlx::query(select_sql)
            .persistent(false)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.get("id"))
    }

    fn pairs_from_rows(rows: Vec<sqlx::postgres::PgRow>) -> Vec<(String, Uuid)> {
        rows.into_iter()
            .map(|r| (r.get::<String, _>(0), r.get::<Uuid, _>(1)))
            .collect()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_packages(&self, rows: &[NewPackage]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO packages (id, derived_id, name, package_manager_id, import_id, readme) ",
        );
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.id)
                .push_bind(&r.derived_id)
                .push_bind(&r.name)
                .push_bind(r.package_manager_id)
                .push_bind(&r.import_id)
                .push_bind(r.readme.as_ref());
        });
        // ON CONFLICT DO NOTHING so replayed inputs skip rows instead of failing.
        qb.push(" ON CONFLICT DO NOTHING");
        let res = qb.build().persistent(false).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn insert_versions(&self, rows: &[NewVersion]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO versions (id, package_id, version, import_id, size, published_at, license_id, downloads, checksum) ",
        );
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.id)
                .push_bind(r.package_id)
                .push_bind(&r.version)
                .push_bind(&r.import_id)
                .push_bind(r.size)
                .push_bind(r.published_at)
                .push_bind(r.license_id)
                .push_bind(r.downloads)
                .push_bind(r.checksum.as_ref());
        });
        qb.push(" ON CONFLICT DO NOTHING");
        let res = qb.build().persistent(false).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn insert_dependencies(&self, rows: &[NewDependency]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO dependencies (id, version_id, dependency_id, semver_range, created_at, updated_at) ",
        );
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.id)
                .push_bind(r.version_id)
                .push_bind(r.dependency_id)
                .push_bind(r.semver_range.as_ref())
                .push_bind(r.created_at)
                .push_bind(r.updated_at);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        let res = qb.build().persistent(false).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn insert_users(&self, rows: &[NewUser]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new("INSERT INTO users (id, username, import_id, source_id) ");
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.id)
                .push_bind(&r.username)
                .push_bind(&r.import_id)
                .push_bind(r.source_id);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        let res = qb.build().persistent(false).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn insert_user_packages(&self, rows: &[NewUserPackage]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new("INSERT INTO user_packages (id, user_id, package_id) ");
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.id).push_bind(r.user_id).push_bind(r.package_id);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        let res = qb.build().persistent(false).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn insert_user_versions(&self, rows: &[NewUserVersion]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new("INSERT INTO user_versions (id, user_id, version_id) ");
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.id).push_bind(r.user_id).push_bind(r.version_id);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        let res = qb.build().persistent(false).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn insert_urls(&self, rows: &[NewUrl]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new("INSERT INTO urls (id, url, url_type_id) ");
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.id).push_bind(&r.url).push_bind(r.url_type_id);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        let res = qb.build().persistent(false).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn insert_package_urls(&self, rows: &[NewPackageUrl]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new("INSERT INTO package_urls (id, package_id, url_id) ");
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.id).push_bind(r.package_id).push_bind(r.url_id);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        let res = qb.build().persistent(false).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn package_ids_by_import_ids(
        &self,
        import_ids: &[String],
    ) -> Result<Vec<(String, Uuid)>> {
        if import_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT import_id, id FROM packages WHERE import_id = ANY($1)")
            .persistent(false)
            .bind(import_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(Self::pairs_from_rows(rows))
    }

    async fn version_ids_by_import_ids(
        &self,
        import_ids: &[String],
    ) -> Result<Vec<(String, Uuid)>> {
        if import_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT import_id, id FROM versions WHERE import_id = ANY($1)")
            .persistent(false)
            .bind(import_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(Self::pairs_from_rows(rows))
    }

    async fn license_ids_by_names(&self, names: &[String]) -> Result<Vec<(String, Uuid)>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT name, id FROM licenses WHERE name = ANY($1)")
            .persistent(false)
            .bind(names)
            .fetch_all(&self.pool)
            .await?;
        Ok(Self::pairs_from_rows(rows))
    }

    async fn user_ids_by_import_ids(
        &self,
        import_ids: &[String],
        source_id: Uuid,
    ) -> Result<Vec<(String, Uuid)>> {
        if import_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT import_id, id FROM users WHERE import_id = ANY($1) AND source_id = $2",
        )
        .persistent(false)
        .bind(import_ids)
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(Self::pairs_from_rows(rows))
    }

    async fn url_ids_by_pairs(&self, pairs: &[(String, Uuid)]) -> Result<Vec<(String, Uuid, Uuid)>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new("SELECT url, url_type_id, id FROM urls WHERE (url, url_type_id) IN ");
        qb.push_tuples(pairs, |mut b, pair| {
            b.push_bind(&pair.0).push_bind(pair.1);
        });
        let rows = qb.build().persistent(false).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.get::<String, _>("url"),
                    r.get::<Uuid, _>("url_type_id"),
                    r.get::<Uuid, _>("id"),
                )
            })
            .collect())
    }

    async fn get_or_create_source(&self, name: &str) -> Result<Uuid> {
        self.get_or_create_by_name(
            "SELECT id FROM sources WHERE type = $1",
            "INSERT INTO sources (id, type) VALUES ($1, $2) ON CONFLICT (type) DO NOTHING RETURNING id",
            name,
        )
        .await
    }

    async fn get_or_create_license(&self, name: &str) -> Result<Uuid> {
        self.get_or_create_by_name(
            "SELECT id FROM licenses WHERE name = $1",
            "INSERT INTO licenses (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING RETURNING id",
            name,
        )
        .await
    }

    async fn get_or_create_url_type(&self, name: &str) -> Result<Uuid> {
        self.get_or_create_by_name(
            "SELECT id FROM url_types WHERE name = $1",
            "INSERT INTO url_types (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING RETURNING id",
            name,
        )
        .await
    }

    async fn get_or_create_package_manager(&self, source_id: Uuid) -> Result<Uuid> {
        if let Some(rec) = sqlx::query("SELECT id FROM package_managers WHERE source_id = $1")
            .persistent(false)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(rec.get("id"));
        }
        if let Some(rec) = sqlx::query(
            "INSERT INTO package_managers (id, source_id) VALUES ($1, $2) \
             ON CONFLICT (source_id) DO NOTHING RETURNING id",
        )
        .persistent(false)
        .bind(Uuid::new_v4())
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(rec.get("id"));
        }
        let rec = sqlx::query("SELECT id FROM package_managers WHERE source_id = $1")
            .persistent(false)
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.get("id"))
    }

    async fn package_manager_by_source_name(&self, name: &str) -> Result<Option<Uuid>> {
        self.select_id_by_text(
            "SELECT pm.id FROM package_managers pm \
             JOIN sources s ON pm.source_id = s.id \
             WHERE s.type = $1",
            name,
        )
        .await
    }

    async fn package_manager_name(&self, id: Uuid) -> Result<Option<String>> {
        let rec = sqlx::query(
            "SELECT s.type FROM sources s \
             JOIN package_managers pm ON pm.source_id = s.id \
             WHERE pm.id = $1",
        )
        .persistent(false)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rec.map(|r| r.get("type")))
    }

    async fn record_load_history(&self, package_manager_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO load_history (id, package_manager_id, created_at) VALUES ($1, $2, $3)",
        )
        .persistent(false)
        .bind(Uuid::new_v4())
        .bind(package_manager_id)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
