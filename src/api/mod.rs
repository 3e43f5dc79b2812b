/// HTTP surface: `/health`, `/preload` and `/embeddings`.
pub mod handlers;
pub mod server;
