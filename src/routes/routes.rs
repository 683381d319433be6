//! Routes for the file/link library.
//!
//! ## Structure
//! - **Files** (byte content, streamed)
//!   - `POST   /files?name=..`: upload, optional `semester_id`/`subject_id`/`topic_id`
//!   - `GET    /files/{id}`: download
//!   - `PUT    /files/{id}`: replace content
//!   - `GET    /files/{id}/verify`: chunk integrity report
//!
//! - **Objects** (files and links alike)
//!   - `POST   /links`
//!   - `GET    /objects`: list/search
//!   - `GET    /objects/{id}`, `DELETE /objects/{id}`
//!   - `PUT    /objects/{id}/name`, `PUT /objects/{id}/location`
//!   - `POST   /objects/{id}/tags`, `DELETE /objects/{id}/tags/{name}`
//!
//! - **Tags**: `GET /tags`, `PUT /tags/{id}`, `POST /tags/gc`
//!
//! - **Locations**: `GET /locations`, `GET /locations/path`, and create /
//!   rename / delete for each level under `/locations/semesters`.
//!
//! Every route except the health probes requires the `x-owner-id` header.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        location_handlers::{
            add_semester, add_subject, add_topic, delete_semester, delete_subject, delete_topic,
            get_tree, rename_semester, rename_subject, rename_topic, resolve_path,
        },
        object_handlers::{
            create_link, delete_object, download_file, get_object, list_objects, move_object,
            rename_object, replace_file, upload_file, verify_file,
        },
        tag_handlers::{attach_tag, collect_tags, detach_tag, list_tags, rename_tag},
    },
    services::library::Library,
};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Build the router. The `Library` is attached as state by the caller.
pub fn routes() -> Router<Library> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Files
        .route("/files", post(upload_file))
        .route("/files/{id}", get(download_file).put(replace_file))
        .route("/files/{id}/verify", get(verify_file))
        // Objects
        .route("/links", post(create_link))
        .route("/objects", get(list_objects))
        .route("/objects/{id}", get(get_object).delete(delete_object))
        .route("/objects/{id}/name", put(rename_object))
        .route("/objects/{id}/location", put(move_object))
        .route("/objects/{id}/tags", post(attach_tag))
        .route("/objects/{id}/tags/{name}", delete(detach_tag))
        // Tags
        .route("/tags", get(list_tags))
        .route("/tags/gc", post(collect_tags))
        .route("/tags/{id}", put(rename_tag))
        // Locations
        .route("/locations", get(get_tree))
        .route("/locations/path", get(resolve_path))
        .route("/locations/semesters", post(add_semester))
        .route(
            "/locations/semesters/{semester_id}",
            put(rename_semester).delete(delete_semester),
        )
        .route(
            "/locations/semesters/{semester_id}/subjects",
            post(add_subject),
        )
        .route(
            "/locations/semesters/{semester_id}/subjects/{subject_id}",
            put(rename_subject).delete(delete_subject),
        )
        .route(
            "/locations/semesters/{semester_id}/subjects/{subject_id}/topics",
            post(add_topic),
        )
        .route(
            "/locations/semesters/{semester_id}/subjects/{subject_id}/topics/{topic_id}",
            put(rename_topic).delete(delete_topic),
        )
}
