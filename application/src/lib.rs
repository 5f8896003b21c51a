pub mod chat_engine;
pub mod prompt;
pub mod rag_service;
pub mod retriever;
