use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::sync::Arc;

use syncout_server::config::Config;
use syncout_server::executor::{Executor, ProcessExecutor};
use syncout_server::handlers;
use syncout_server::session_registry::SessionRegistry;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let registry = web::Data::new(SessionRegistry::new(config.session_buffer));
    let executor: Arc<dyn Executor> = Arc::new(ProcessExecutor::default());
    let executor = web::Data::from(executor);
    let settings = web::Data::new(config.connection_settings());

    log::info!("SYNCOUT listening on {}", config.bind);
    HttpServer::new(move || {
        App::new()
            .app_data(registry.clone())
            .app_data(executor.clone())
            .app_data(settings.clone())
            .configure(handlers::root)
    })
    .bind(&config.bind)?
    .run()
    .await
}
