use crate::http::handlers::{
    handle_create_function, handle_delete_function, handle_execute, handle_get_function, handle_list_functions,
    handle_metrics, handle_ping, handle_update_function,
};
use crate::worker_api::hearth_worker::HearthWorker;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct HttpServer {
    pub addr: SocketAddr,
    pub worker: Arc<HearthWorker>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, worker: Arc<HearthWorker>) -> Self {
        Self { addr, worker }
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting HTTP server on: {}", self.addr);
        let app = Router::new()
            .route("/ping", get(handle_ping))
            .route("/functions", post(handle_create_function).get(handle_list_functions))
            .route(
                "/functions/:function_id",
                get(handle_get_function)
                    .put(handle_update_function)
                    .delete(handle_delete_function),
            )
            .route("/execute/:function_id", post(handle_execute))
            .route("/metrics", get(handle_metrics))
            .layer(Extension(self.clone()));
        let listener = TcpListener::bind(self.addr).await?;
        axum::serve(listener, app.into_make_service()).await?;
        Ok(())
    }
}

pub async fn create_http_server(address: &str, port: u16, worker: Arc<HearthWorker>) -> Result<HttpServer> {
    let addr: SocketAddr = format!("{}:{}", address, port).parse()?;
    Ok(HttpServer::new(addr, worker))
}
