pub mod category_repository;
pub mod config;
pub mod credential_store;
pub mod entry_mapper;
pub mod error;
pub mod local_cache;
pub mod noko_client;
pub mod storage;
