//! HTTP handlers for the dashboard and query surface

mod agents;
mod events;
mod executions;
mod stats;
mod workflows;

use crate::error::ApiError;
use actix_web::{get, web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use crewcore::{Cursor, ListQuery, Page};
use crewruntime::CrewRuntime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Application state shared across handlers
pub struct AppState {
    pub runtime: Arc<CrewRuntime>,
}

/// List criteria as they arrive on the query string
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    status: Option<String>,
    kind: Option<String>,
    #[serde(alias = "search")]
    text: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    cursor: Option<String>,
    limit: Option<usize>,
}

impl ListParams {
    pub fn into_query(self) -> Result<ListQuery, ApiError> {
        let mut query = ListQuery::new().between(self.since, self.until);
        query.status = self.status;
        query.kind = self.kind;
        query.text = self.text;
        query.limit = self.limit;
        if let Some(raw) = self.cursor.filter(|c| !c.is_empty()) {
            let cursor: Cursor = raw.parse().map_err(ApiError::BadRequest)?;
            query = query.after(cursor);
        }
        Ok(query)
    }
}

/// One page of results with the cursor rendered as an opaque string
#[derive(Debug, Serialize)]
pub struct PageBody<T> {
    items: Vec<T>,
    total: usize,
    next_cursor: Option<String>,
}

impl<T> From<Page<T>> for PageBody<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            items: page.items,
            total: page.total,
            next_cursor: page.next_cursor.map(|c| c.to_string()),
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "crewengine",
        "invokers": data.runtime.registry().list_invokers(),
    }))
}

/// List registered invokers
#[get("/api/invokers")]
async fn list_invokers(data: web::Data<AppState>) -> impl Responder {
    let registry = data.runtime.registry();
    let invokers: Vec<_> = registry
        .list_invokers()
        .iter()
        .map(|name| {
            let metadata = registry.get_metadata(name);
            serde_json::json!({
                "name": name,
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
            })
        })
        .collect();
    HttpResponse::Ok().json(invokers)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_invokers)
        .configure(agents::configure)
        .configure(workflows::configure)
        .configure(executions::configure)
        .configure(stats::configure)
        .service(events::websocket_events);
}

#[cfg(test)]
mod tests;
