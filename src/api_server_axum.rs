use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

use crate::config;
use crate::error::ReportError;
use crate::models::{ChipAnalysis, ChipStatus, ContractTarget, OptionReport, QuoteOverlay};
use crate::processor::{self, ChipThresholds};
use crate::quotes::{taipei_today, QuoteClient};
use crate::settlement::{SettlementResolver, DATE_FMT};
use crate::taifex_client::TaifexClient;

// -----------------------------------------------
// API REQUEST/RESPONSE MODELS
// -----------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChipAnalysisQuery {
    /// Optional anchor date (`YYYY/MM/DD`); defaults to today in Taipei.
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettlementQuery {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub processing_time_ms: Option<u64>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T, start: Instant) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            processing_time_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    fn err(message: String, start: Instant) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            processing_time_ms: Some(start.elapsed().as_millis() as u64),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChipAnalysisResponse {
    pub status: ChipStatus,
    pub report_date: String,
    pub targets: Vec<ContractTarget>,
    pub quotes: QuoteOverlay,
}

#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    pub code: String,
    /// `YYYY/MM/DD`, or the far-future sentinel for unresolvable codes.
    pub settlement: String,
    pub resolved: bool,
}

// -----------------------------------------------
// APPLICATION STATE
// -----------------------------------------------

#[derive(Clone)]
pub struct AppState {
    taifex: Arc<TaifexClient>,
    quotes: Arc<QuoteClient>,
    resolver: Arc<SettlementResolver>,
    cache: Arc<RwLock<Cache>>,
}

#[derive(Default)]
struct Cache {
    /// Keyed by anchor date; the daily report only changes once per day.
    reports: HashMap<String, (OptionReport, Instant)>,
    overlay: Option<(QuoteOverlay, Instant)>,
}

impl AppState {
    pub fn new() -> Result<Self> {
        Ok(Self {
            taifex: Arc::new(TaifexClient::new()?),
            quotes: Arc::new(QuoteClient::new()?),
            resolver: Arc::new(SettlementResolver::from_env()),
            cache: Arc::new(RwLock::new(Cache::default())),
        })
    }

    /// Report for the anchor date, via the TTL cache.
    async fn report_for(&self, anchor: NaiveDate) -> Result<OptionReport, ReportError> {
        let key = anchor.format(DATE_FMT).to_string();

        {
            let cache = self.cache.read().await;
            if let Some((report, cached_at)) = cache.reports.get(&key) {
                if cached_at.elapsed() < config::REPORT_CACHE_DURATION {
                    return Ok(report.clone());
                }
            }
        }

        let report = self
            .taifex
            .fetch_latest_report(anchor, config::get_max_lookback_days())
            .await?;

        {
            let mut cache = self.cache.write().await;
            cache.reports.insert(key, (report.clone(), Instant::now()));
        }

        Ok(report)
    }

    /// Spot/futures overlay, via the (much shorter) TTL cache.
    async fn overlay(&self) -> QuoteOverlay {
        {
            let cache = self.cache.read().await;
            if let Some((overlay, cached_at)) = &cache.overlay {
                if cached_at.elapsed() < config::QUOTE_CACHE_DURATION {
                    return overlay.clone();
                }
            }
        }

        let overlay = self.quotes.fetch_overlay().await;

        {
            let mut cache = self.cache.write().await;
            cache.overlay = Some((overlay.clone(), Instant::now()));
        }

        overlay
    }
}

// -----------------------------------------------
// API HANDLERS
// -----------------------------------------------

/// GET /api/chip-analysis?date=2025/03/10 - Aggregated OI per strike for the
/// selected contracts, plus the live price overlay
async fn get_chip_analysis(
    Query(query): Query<ChipAnalysisQuery>,
    State(app_state): State<AppState>,
) -> Result<Json<ApiResponse<ChipAnalysisResponse>>, StatusCode> {
    let start_time = Instant::now();

    let anchor = match &query.date {
        Some(raw) => match NaiveDate::parse_from_str(raw.trim(), DATE_FMT) {
            Ok(date) => date,
            Err(_) => {
                return Ok(Json(ApiResponse::err(
                    format!("Invalid date '{}', expected YYYY/MM/DD", raw),
                    start_time,
                )));
            }
        },
        None => taipei_today(),
    };

    let analysis = match app_state.report_for(anchor).await {
        Ok(report) => processor::aggregate(
            &report.rows,
            report.as_of,
            &app_state.resolver,
            &ChipThresholds::from_env(),
        ),
        // A quiet source is a status, not a failure: the frontend shows
        // "no data" instead of an error banner.
        Err(ReportError::NotFound(_)) => ChipAnalysis {
            status: ChipStatus::NoData,
            report_date: anchor,
            targets: vec![],
        },
        Err(e) => return Ok(Json(ApiResponse::err(e.to_string(), start_time))),
    };

    let quotes = app_state.overlay().await;

    Ok(Json(ApiResponse::ok(
        ChipAnalysisResponse {
            status: analysis.status,
            report_date: analysis.report_date.format(DATE_FMT).to_string(),
            targets: analysis.targets,
            quotes,
        },
        start_time,
    )))
}

/// GET /api/quote - Current spot/futures overlay only
async fn get_quote(
    State(app_state): State<AppState>,
) -> Result<Json<ApiResponse<QuoteOverlay>>, StatusCode> {
    let start_time = Instant::now();
    let overlay = app_state.overlay().await;
    Ok(Json(ApiResponse::ok(overlay, start_time)))
}

/// GET /api/settlement?code=202503W1 - Resolve one contract code
async fn get_settlement(
    Query(query): Query<SettlementQuery>,
    State(app_state): State<AppState>,
) -> Result<Json<ApiResponse<SettlementResponse>>, StatusCode> {
    let start_time = Instant::now();
    let resolved = app_state.resolver.resolve(&query.code);
    Ok(Json(ApiResponse::ok(
        SettlementResponse {
            settlement: app_state.resolver.resolve_display(&query.code),
            resolved: resolved.is_some(),
            code: query.code,
        },
        start_time,
    )))
}

/// GET /api/health
async fn get_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// -----------------------------------------------
// SERVER SETUP
// -----------------------------------------------

pub async fn start_server(port: u16) -> Result<()> {
    let app_state = AppState::new()?;

    let app = Router::new()
        .route("/api/chip-analysis", get(get_chip_analysis))
        .route("/api/quote", get(get_quote))
        .route("/api/settlement", get(get_settlement))
        .route("/api/health", get(get_health))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("🚀 TXO API Server running on http://{}", addr);
    println!("📋 Available endpoints:");
    println!("   GET  /api/chip-analysis?date=2025/03/10");
    println!("   GET  /api/quote");
    println!("   GET  /api/settlement?code=202503W1");
    println!("   GET  /api/health");
    println!();

    axum::serve(listener, app).await?;
    Ok(())
}
