pub mod acquire;
pub mod app;
pub mod chembl;
pub mod collect;
pub mod config;
pub mod database;
pub mod domain;
pub mod embeddings;
pub mod error;
pub mod filter;
pub mod http;
pub mod image_array;
pub mod imaging;
pub mod output;
pub mod paginate;
pub mod progress;
pub mod reference;
pub mod store;
