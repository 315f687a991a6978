use crate::connection::ws_index;
use crate::handlers::execute::configure_execute_handlers;
use crate::handlers::sessions::configure_session_handlers;
use actix_web::{web, HttpResponse, Responder};
use syncout_system::serde_json::json;

mod execute;
mod sessions;

pub fn root(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws/{session_id}").route(web::get().to(ws_index)))
        .service(web::resource("/health").route(web::get().to(health)));

    cfg.service(
        web::scope("/api")
            .configure(configure_session_handlers)
            .configure(configure_execute_handlers),
    );
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}
