pub mod bootstrap;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod store;

pub use config::{AppConfig, RedisConfig};
pub use server::{AppParts, EduhubServer, ServerBuilder, build_app, build_parts, router};
pub use store::{RedisStore, StoreBackend, create_shared_store};
