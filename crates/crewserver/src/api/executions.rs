use super::{AppState, ListParams, PageBody};
use crate::error::ApiError;
use actix_web::{delete, get, post, web, HttpResponse};
use uuid::Uuid;

#[get("/api/executions")]
async fn list_executions(
    data: web::Data<AppState>,
    params: web::Query<ListParams>,
) -> Result<HttpResponse, ApiError> {
    let query = params.into_inner().into_query()?;
    let page = data.runtime.list_executions(&query).await?;
    Ok(HttpResponse::Ok().json(PageBody::from(page)))
}

#[get("/api/executions/{id}")]
async fn get_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let execution = data.runtime.get_execution(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(execution))
}

#[delete("/api/executions/{id}")]
async fn delete_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    data.runtime.delete_execution(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/api/executions/{id}/log")]
async fn execution_log(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let log = data.runtime.execution_log(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(log))
}

#[get("/api/executions/{id}/metrics")]
async fn execution_metrics(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let metrics = data.runtime.execution_metrics(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(metrics))
}

#[post("/api/executions/{id}/cancel")]
async fn cancel_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let execution = data.runtime.cancel(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(execution))
}

#[post("/api/executions/{id}/pause")]
async fn pause_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let execution = data.runtime.pause(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(execution))
}

#[post("/api/executions/{id}/resume")]
async fn resume_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let execution = data.runtime.resume(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(execution))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_executions)
        .service(get_execution)
        .service(delete_execution)
        .service(execution_log)
        .service(execution_metrics)
        .service(cancel_execution)
        .service(pause_execution)
        .service(resume_execution);
}
