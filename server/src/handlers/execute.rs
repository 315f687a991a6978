use crate::executor::Executor;
use actix_web::{web, HttpResponse, Responder};
use syncout_system::ExecutionRequest;

pub fn configure_execute_handlers(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/execute").route(web::post().to(execute)));
}

async fn execute(
    request: web::Json<ExecutionRequest>,
    executor: web::Data<dyn Executor>,
) -> impl Responder {
    let request = request.into_inner();
    log::info!("One-shot {} execution", request.language);
    HttpResponse::Ok().json(executor.execute(request).await)
}
