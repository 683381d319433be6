//! Semester / subject / topic tree endpoints.

use crate::{
    errors::AppError,
    handlers::OwnerId,
    models::location::{Hierarchy, NodeRef, Semester, Subject, Topic},
    services::library::Library,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct NodeNameReq {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub semester_id: Uuid,
    pub subject_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PathResp {
    pub names: Vec<String>,
}

/// `GET /locations`
pub async fn get_tree(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
) -> Result<Json<Hierarchy>, AppError> {
    Ok(Json(library.locations.get(&owner).await?))
}

/// `GET /locations/path?semester_id=..[&subject_id=..[&topic_id=..]]`
pub async fn resolve_path(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Query(q): Query<PathQuery>,
) -> Result<Json<PathResp>, AppError> {
    let names = library
        .locations
        .resolve_path(&owner, q.semester_id, q.subject_id, q.topic_id)
        .await?;
    Ok(Json(PathResp { names }))
}

pub async fn add_semester(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Json(req): Json<NodeNameReq>,
) -> Result<(StatusCode, Json<Semester>), AppError> {
    let node = library.locations.add_semester(&owner, &req.name).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

pub async fn add_subject(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(semester_id): Path<Uuid>,
    Json(req): Json<NodeNameReq>,
) -> Result<(StatusCode, Json<Subject>), AppError> {
    let node = library
        .locations
        .add_subject(&owner, semester_id, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(node)))
}

pub async fn add_topic(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path((semester_id, subject_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<NodeNameReq>,
) -> Result<(StatusCode, Json<Topic>), AppError> {
    let node = library
        .locations
        .add_topic(&owner, semester_id, subject_id, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn rename_node(
    library: &Library,
    owner: &str,
    node: NodeRef,
    name: &str,
) -> Result<StatusCode, AppError> {
    library.locations.rename(owner, node, name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_node(library: &Library, owner: &str, node: NodeRef) -> Result<StatusCode, AppError> {
    library.locations.delete(owner, node).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn rename_semester(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(semester_id): Path<Uuid>,
    Json(req): Json<NodeNameReq>,
) -> Result<StatusCode, AppError> {
    rename_node(&library, &owner, NodeRef::Semester { semester_id }, &req.name).await
}

pub async fn rename_subject(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path((semester_id, subject_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<NodeNameReq>,
) -> Result<StatusCode, AppError> {
    let node = NodeRef::Subject {
        semester_id,
        subject_id,
    };
    rename_node(&library, &owner, node, &req.name).await
}

pub async fn rename_topic(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path((semester_id, subject_id, topic_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(req): Json<NodeNameReq>,
) -> Result<StatusCode, AppError> {
    let node = NodeRef::Topic {
        semester_id,
        subject_id,
        topic_id,
    };
    rename_node(&library, &owner, node, &req.name).await
}

/// Removing a node leaves objects placed beneath it untouched.
pub async fn delete_semester(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(semester_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    delete_node(&library, &owner, NodeRef::Semester { semester_id }).await
}

pub async fn delete_subject(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path((semester_id, subject_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let node = NodeRef::Subject {
        semester_id,
        subject_id,
    };
    delete_node(&library, &owner, node).await
}

pub async fn delete_topic(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path((semester_id, subject_id, topic_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let node = NodeRef::Topic {
        semester_id,
        subject_id,
        topic_id,
    };
    delete_node(&library, &owner, node).await
}
