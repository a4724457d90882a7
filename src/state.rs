use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{config::AppConfig, db::build_pool, error::AppError, models::Building};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
    pub s3_client: Option<aws_sdk_s3::Client>,
    pub building_cache: Cache<Uuid, Building>,
}

impl AppState {
    pub async fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = build_pool(&config)?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let s3_client = if config.slip_bucket.is_some() {
            Some(build_s3_client(&config).await)
        } else {
            tracing::warn!("SLIP_BUCKET is not set; verified slips will not be stored");
            None
        };

        let building_cache = Cache::builder()
            .max_capacity(config.building_cache_max_entries)
            .time_to_live(Duration::from_secs(config.building_cache_ttl_seconds.max(1)))
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            s3_client,
            building_cache,
        })
    }

    pub fn db_pool(&self) -> Result<&PgPool, AppError> {
        self.db_pool.as_ref().ok_or_else(|| {
            AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
        })
    }
}

async fn build_s3_client(config: &AppConfig) -> aws_sdk_s3::Client {
    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.s3_region.clone()))
        .load()
        .await;

    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    if let Some(endpoint) = config.s3_endpoint_url.as_deref() {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }
    aws_sdk_s3::Client::from_conf(builder.build())
}
