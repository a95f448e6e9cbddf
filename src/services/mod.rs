pub mod archive_service;
pub mod cancellation;
pub mod content;
pub mod delivery;
pub mod memory_store;
pub mod object_store;
pub mod range_resolver;
pub mod storage_service;
pub mod upload_pipeline;
pub mod zip_codec;
