//! Request and response bodies.

use chrono::{DateTime, Utc};
use scape_core::{CatalogStats, UploadRecord};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Multipart body of `POST /api/upload`. Only used for the OpenAPI document.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadRes {
    pub success: bool,
    pub message: String,
    pub id: u32,
}

/// A catalog record as served to clients.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadDto {
    pub id: u32,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub tags: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

impl From<UploadRecord> for UploadDto {
    fn from(record: UploadRecord) -> Self {
        Self {
            id: record.id.get(),
            owner_id: record.owner_id.to_string(),
            title: record.title,
            description: record.description,
            tags: record.tags,
            filename: record.filename,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListUploadsRes {
    pub uploads: Vec<UploadDto>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteRes {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsRes {
    pub uploads: usize,
    pub owners: usize,
}

impl From<CatalogStats> for StatsRes {
    fn from(stats: CatalogStats) -> Self {
        Self {
            uploads: stats.uploads,
            owners: stats.owners,
        }
    }
}

/// Query string of `GET /api/uploads`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Case-insensitive text matched against title, description and tags
    pub q: Option<String>,
    /// Only uploads by this owner
    pub owner: Option<String>,
    /// Maximum number of results
    pub limit: Option<usize>,
}
