use super::{AppState, ListParams, PageBody};
use crate::error::ApiError;
use actix_web::{delete, get, post, put, web, HttpResponse};
use crewcore::{Agent, AgentStatus, AgentTestRequest};
use uuid::Uuid;

#[get("/api/agents")]
async fn list_agents(
    data: web::Data<AppState>,
    params: web::Query<ListParams>,
) -> Result<HttpResponse, ApiError> {
    let query = params.into_inner().into_query()?;
    let page = data.runtime.list_agents(&query).await?;
    Ok(HttpResponse::Ok().json(PageBody::from(page)))
}

#[post("/api/agents")]
async fn create_agent(
    data: web::Data<AppState>,
    agent: web::Json<Agent>,
) -> Result<HttpResponse, ApiError> {
    let agent = data.runtime.create_agent(agent.into_inner()).await?;
    Ok(HttpResponse::Created().json(agent))
}

#[get("/api/agents/{id}")]
async fn get_agent(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let agent = data.runtime.get_agent(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(agent))
}

#[put("/api/agents/{id}")]
async fn update_agent(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    agent: web::Json<Agent>,
) -> Result<HttpResponse, ApiError> {
    let mut agent = agent.into_inner();
    agent.id = path.into_inner();
    let agent = data.runtime.update_agent(agent).await?;
    Ok(HttpResponse::Ok().json(agent))
}

#[delete("/api/agents/{id}")]
async fn delete_agent(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.runtime.delete_agent(id).await?;
    tracing::info!("Deleted agent: {}", id);
    Ok(HttpResponse::NoContent().finish())
}

#[post("/api/agents/{id}/activate")]
async fn activate_agent(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let agent = data
        .runtime
        .set_agent_status(path.into_inner(), AgentStatus::Active)
        .await?;
    Ok(HttpResponse::Ok().json(agent))
}

#[post("/api/agents/{id}/deactivate")]
async fn deactivate_agent(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let agent = data
        .runtime
        .set_agent_status(path.into_inner(), AgentStatus::Inactive)
        .await?;
    Ok(HttpResponse::Ok().json(agent))
}

#[get("/api/agents/{id}/capabilities")]
async fn agent_capabilities(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let sheet = data.runtime.agent_capabilities(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(sheet))
}

#[post("/api/agents/{id}/test")]
async fn test_agent(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    request: web::Json<AgentTestRequest>,
) -> Result<HttpResponse, ApiError> {
    let result = data
        .runtime
        .test_agent(path.into_inner(), request.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(result))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_agents)
        .service(create_agent)
        .service(get_agent)
        .service(update_agent)
        .service(delete_agent)
        .service(activate_agent)
        .service(deactivate_agent)
        .service(agent_capabilities)
        .service(test_agent);
}
