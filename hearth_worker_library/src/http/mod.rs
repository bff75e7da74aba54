pub mod handlers;
pub mod http_server;

pub use http_server::create_http_server;
