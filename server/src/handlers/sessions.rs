use crate::session_registry::SessionRegistry;
use actix_web::{error, web, HttpResponse, Responder};
use syncout_system::epoch_seconds;
use syncout_system::serde_json::json;

pub fn configure_session_handlers(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/sessions").route(web::post().to(create_session)))
        .service(web::resource("/sessions/{session_id}").route(web::get().to(show_session)))
        .service(web::resource("/stats").route(web::get().to(stats)));
}

async fn create_session(
    registry: web::Data<SessionRegistry>,
) -> Result<impl Responder, actix_web::error::Error> {
    let handle = registry.create();
    Ok(HttpResponse::Ok().json(json!({
        "session_id": handle.id,
        "created_at": epoch_seconds(handle.created_at),
        "join_url": format!("/session/{}", handle.id),
    })))
}

async fn show_session(
    path: web::Path<String>,
    registry: web::Data<SessionRegistry>,
) -> Result<impl Responder, actix_web::error::Error> {
    let handle = match registry.get(&path.into_inner()) {
        Some(handle) => handle,
        None => {
            return Ok(HttpResponse::Ok().json(json!({
                "error": "Session not found",
                "exists": false,
            })))
        }
    };

    let summary = handle
        .describe()
        .await
        .map_err(error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(json!({
        "session_id": summary.session_id,
        "language": summary.language,
        "users_count": summary.users_count,
        "revision": summary.revision,
        "exists": true,
    })))
}

async fn stats(registry: web::Data<SessionRegistry>) -> impl Responder {
    let stats = registry.stats().await;
    HttpResponse::Ok().json(json!({
        "active_sessions": stats.active_sessions,
        "total_users": stats.total_users,
        "uptime": "running",
    }))
}
