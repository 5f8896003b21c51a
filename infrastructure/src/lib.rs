pub mod chunker;
pub mod config;
pub mod embedder;
pub mod embedding_storage;
pub mod file_scanner;
pub mod ollama_client;
pub mod pdf_converter;
pub mod search;
pub mod vector_index;
