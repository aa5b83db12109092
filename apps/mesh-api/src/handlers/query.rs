//! Host/graph traversal and vector similarity, fronted by a per-identity
//! query rate limit. Query handlers never return a partial graph: any
//! downstream error surfaces unambiguously rather than as a best-effort
//! truncated response.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::Json;
use mesh_models::EMBEDDING_DIMENSION;
use mesh_store::{GraphQuery, HostSummary, HostView};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, MeshJson};
use crate::state::AppState;

fn query_identity(addr: &SocketAddr) -> String {
    addr.ip().to_string()
}

#[derive(Debug, Deserialize)]
pub struct HostQueryParams {
    #[serde(default)]
    pub depth: Option<u8>,
}

pub async fn host_view(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(ip): Path<String>,
    Query(params): Query<HostQueryParams>,
) -> Result<Json<HostView>, ApiError> {
    state.query_limiter.check(&query_identity(&addr))?;

    let depth = params.depth.unwrap_or(0);
    if depth > 5 {
        return Err(ApiError::LimitOutOfRange("depth must be in 0..=5".into()));
    }

    let view = state.store.host_view(&ip, depth).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "query_type", rename_all = "snake_case")]
pub enum GraphQueryRequest {
    ByAsn {
        asn: Option<u32>,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        offset: Option<u32>,
    },
    ByLocation {
        #[serde(default)]
        city: Option<String>,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        country: Option<String>,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        offset: Option<u32>,
    },
    ByVuln {
        cve: Option<String>,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        offset: Option<u32>,
    },
    ByService {
        #[serde(default)]
        product: Option<String>,
        #[serde(default)]
        service: Option<String>,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        offset: Option<u32>,
    },
}

#[derive(Debug, Serialize)]
pub struct GraphResultPage {
    pub items: Vec<HostSummary>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
    pub next_offset: Option<u32>,
}

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

fn validated_limit(limit: Option<u32>) -> Result<u32, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(ApiError::LimitOutOfRange(format!("limit must be in 1..={MAX_LIMIT}")));
    }
    Ok(limit)
}

pub async fn graph_query(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    MeshJson(req): MeshJson<GraphQueryRequest>,
) -> Result<Json<GraphResultPage>, ApiError> {
    state.query_limiter.check(&query_identity(&addr))?;

    let (query, limit, offset) = match req {
        GraphQueryRequest::ByAsn { asn, limit, offset } => {
            let asn = asn.ok_or(ApiError::MissingField("asn"))?;
            (GraphQuery::ByAsn { asn }, validated_limit(limit)?, offset.unwrap_or(0))
        }
        GraphQueryRequest::ByLocation { city, region, country, limit, offset } => {
            if city.is_none() && region.is_none() && country.is_none() {
                return Err(ApiError::MissingField("location"));
            }
            (
                GraphQuery::ByLocation { city, region, country },
                validated_limit(limit)?,
                offset.unwrap_or(0),
            )
        }
        GraphQueryRequest::ByVuln { cve, limit, offset } => {
            let cve = cve.ok_or(ApiError::MissingField("cve"))?;
            (GraphQuery::ByVuln { cve }, validated_limit(limit)?, offset.unwrap_or(0))
        }
        GraphQueryRequest::ByService { product, service, limit, offset } => {
            if product.is_none() && service.is_none() {
                return Err(ApiError::MissingField("service"));
            }
            (
                GraphQuery::ByService { product, service },
                validated_limit(limit)?,
                offset.unwrap_or(0),
            )
        }
    };

    let page = state.store.graph_query(query, limit, offset).await?;
    let next_offset = if page.has_more { Some(offset + page.items.len() as u32) } else { None };

    Ok(Json(GraphResultPage {
        items: page.items,
        total: page.total,
        limit,
        offset,
        has_more: page.has_more,
        next_offset,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SimilarRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct SimilarResponse {
    pub query: String,
    pub results: Vec<mesh_store::SimilarResult>,
    pub count: usize,
    pub timestamp: i64,
}

pub async fn similar(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    MeshJson(req): MeshJson<SimilarRequest>,
) -> Result<Json<SimilarResponse>, ApiError> {
    state.query_limiter.check(&query_identity(&addr))?;

    let k = req.k.unwrap_or(10);
    if k == 0 || k > 50 {
        return Err(ApiError::LimitOutOfRange("k must be in 1..=50".into()));
    }
    let min_score = req.min_score.unwrap_or(0.0);

    let embedding = state.embedding.embed(&req.query).await.map_err(|err| match err {
        mesh_embedding::EmbeddingError::InvalidApiKey => ApiError::InvalidApiKey,
        mesh_embedding::EmbeddingError::InvalidDimension { expected, actual } => {
            ApiError::InvalidEmbedding(format!("embedding has {actual} dimensions, expected {expected}"))
        }
        other => ApiError::ServiceUnavailable(other.to_string()),
    })?;

    if embedding.len() != EMBEDDING_DIMENSION {
        return Err(ApiError::InvalidEmbedding(format!(
            "embedding has {} dimensions, expected {EMBEDDING_DIMENSION}",
            embedding.len()
        )));
    }

    let results = state.store.similar(&embedding, k, min_score).await?;
    let count = results.len();

    Ok(Json(SimilarResponse {
        query: req.query,
        results,
        count,
        timestamp: chrono::Utc::now().timestamp(),
    }))
}
