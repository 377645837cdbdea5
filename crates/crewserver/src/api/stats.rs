use super::AppState;
use crate::error::ApiError;
use actix_web::{get, web, HttpResponse};
use serde::Deserialize;

const DEFAULT_SUMMARY_DAYS: u32 = 7;
const DEFAULT_TOP_AGENTS: usize = 5;

#[derive(Debug, Deserialize)]
struct SummaryParams {
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TopParams {
    limit: Option<usize>,
}

#[get("/api/stats/agents")]
async fn agent_stats(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.runtime.agent_stats().await)
}

#[get("/api/stats/agents/top")]
async fn top_agents(data: web::Data<AppState>, params: web::Query<TopParams>) -> HttpResponse {
    let limit = params.limit.unwrap_or(DEFAULT_TOP_AGENTS);
    HttpResponse::Ok().json(data.runtime.top_agents(limit).await)
}

#[get("/api/stats/workflows")]
async fn workflow_stats(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.runtime.workflow_stats().await)
}

#[get("/api/stats/summary")]
async fn summary(
    data: web::Data<AppState>,
    params: web::Query<SummaryParams>,
) -> Result<HttpResponse, ApiError> {
    let days = params.days.unwrap_or(DEFAULT_SUMMARY_DAYS).clamp(1, 365);
    let summary = data.runtime.summary(days).await?;
    Ok(HttpResponse::Ok().json(summary))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(top_agents)
        .service(agent_stats)
        .service(workflow_stats)
        .service(summary);
}
