use async_trait::async_trait;

use crate::{
    application::repos::{OriginsRepo, RepoError},
    domain::origin::{OriginServer, SiteIdentifier},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct OriginRow {
    site_identifier: String,
    origin_url: String,
}

impl TryFrom<OriginRow> for OriginServer {
    type Error = RepoError;

    fn try_from(row: OriginRow) -> Result<Self, Self::Error> {
        OriginServer::parse(&row.site_identifier, &row.origin_url).map_err(|err| {
            RepoError::Integrity {
                message: format!("stored origin `{}` is invalid: {err}", row.site_identifier),
            }
        })
    }
}

#[async_trait]
impl OriginsRepo for PostgresRepositories {
    async fn find_by_site(&self, site: &SiteIdentifier) -> Result<Option<OriginServer>, RepoError> {
        let row = sqlx::query_as::<_, OriginRow>(
            r#"
            SELECT site_identifier, origin_url
            FROM origin_servers
            WHERE site_identifier = $1
            "#,
        )
        .bind(site.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(OriginServer::try_from).transpose()
    }

    async fn insert_if_absent(&self, origin: &OriginServer) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO origin_servers (site_identifier, origin_url)
            VALUES ($1, $2)
            ON CONFLICT (site_identifier) DO NOTHING
            "#,
        )
        .bind(origin.site_identifier.as_str())
        .bind(origin.origin_url.as_str())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }
}
