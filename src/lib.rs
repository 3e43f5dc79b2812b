//! # embedserve — local embedding server
//!
//! Loads a text-embedding model, either GGUF weights through llama.cpp or an
//! ONNX MiniLM-style graph through ONNX Runtime, and serves vectors over HTTP.
//!
//! ## Architecture
//!
//! - **[`config`]** — Configuration loading and validation
//! - **[`embedder`]** — `Embedder` trait, WordPiece tokenizer, ONNX and GGUF backends, HuggingFace downloads
//! - **[`cache`]** — Single-slot holder for the active embedder
//! - **[`preload`]** — Resolve/download model files and install an embedder
//! - **[`api`]** — axum routes: `/health`, `/preload`, `/embeddings`

pub mod api;
pub mod cache;
pub mod config;
pub mod embedder;
pub mod preload;
