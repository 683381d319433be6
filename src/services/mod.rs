//! Storage core: chunked content, object catalog, location tree and tags.

pub mod chunk_store;
pub mod library;
pub mod location_tree;
pub mod object_catalog;
pub mod replace_workflow;
pub mod tag_registry;
pub mod user_documents;
