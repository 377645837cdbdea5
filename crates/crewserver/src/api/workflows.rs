use super::{AppState, ListParams, PageBody};
use crate::error::ApiError;
use actix_web::{delete, get, post, put, web, HttpResponse};
use crewcore::Workflow;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct VersionParams {
    version: Option<u32>,
}

/// Request body for starting a run
#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    #[serde(default)]
    input: serde_json::Value,
}

#[get("/api/workflows")]
async fn list_workflows(
    data: web::Data<AppState>,
    params: web::Query<ListParams>,
) -> Result<HttpResponse, ApiError> {
    let query = params.into_inner().into_query()?;
    let page = data.runtime.list_workflows(&query).await?;
    Ok(HttpResponse::Ok().json(PageBody::from(page)))
}

#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    workflow: web::Json<Workflow>,
) -> Result<HttpResponse, ApiError> {
    let workflow = data.runtime.create_workflow(workflow.into_inner()).await?;
    Ok(HttpResponse::Created().json(workflow))
}

#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    params: web::Query<VersionParams>,
) -> Result<HttpResponse, ApiError> {
    let workflow = data
        .runtime
        .get_workflow(path.into_inner(), params.version)
        .await?;
    Ok(HttpResponse::Ok().json(workflow))
}

#[put("/api/workflows/{id}")]
async fn update_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    workflow: web::Json<Workflow>,
) -> Result<HttpResponse, ApiError> {
    let mut workflow = workflow.into_inner();
    workflow.id = path.into_inner();
    let workflow = data.runtime.update_workflow(workflow).await?;
    Ok(HttpResponse::Ok().json(workflow))
}

#[delete("/api/workflows/{id}")]
async fn delete_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.runtime.delete_workflow(id).await?;
    tracing::info!("Deleted workflow: {}", id);
    Ok(HttpResponse::NoContent().finish())
}

/// Start an execution; the body is optional
#[post("/api/workflows/{id}/run")]
async fn run_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let workflow_id = path.into_inner();
    let request: RunRequest = if body.is_empty() {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid run request: {}", e)))?
    };

    tracing::info!("Running workflow: {}", workflow_id);
    let execution = data.runtime.run(workflow_id, request.input).await?;
    Ok(HttpResponse::Accepted().json(execution))
}

#[post("/api/workflows/{id}/pause")]
async fn pause_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let workflow = data.runtime.pause_workflow(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(workflow))
}

#[post("/api/workflows/{id}/resume")]
async fn resume_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let workflow = data.runtime.resume_workflow(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(workflow))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_workflows)
        .service(create_workflow)
        .service(get_workflow)
        .service(update_workflow)
        .service(delete_workflow)
        .service(run_workflow)
        .service(pause_workflow)
        .service(resume_workflow);
}
