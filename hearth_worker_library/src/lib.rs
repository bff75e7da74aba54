pub mod http;
pub mod services;
pub mod worker_api;
