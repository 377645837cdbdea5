use super::AppState;
use actix_web::{get, web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_ws::Message;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct EventFilter {
    execution_id: Option<Uuid>,
}

/// WebSocket endpoint for real-time events, optionally scoped to one execution
#[get("/api/events")]
pub async fn websocket_events(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    filter: web::Query<EventFilter>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let only = filter.execution_id;

    tracing::info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if only.map_or(false, |id| id != event.execution_id()) {
                                continue;
                            }
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!("WebSocket client lagged, {} events dropped", missed);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        tracing::info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}
