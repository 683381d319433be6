use crate::{
    errors::AppError,
    handlers::OwnerId,
    models::{object::StoredObject, tag::Tag},
    services::library::Library,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct TagNameReq {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct TaggedResp {
    pub tag: Tag,
    pub object: StoredObject,
}

#[derive(Debug, Serialize)]
pub struct RenamedResp {
    pub objects_updated: u64,
}

#[derive(Debug, Serialize)]
pub struct CollectedResp {
    pub removed: usize,
}

/// `GET /tags`
pub async fn list_tags(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
) -> Result<Json<Vec<Tag>>, AppError> {
    Ok(Json(library.tags.list(&owner).await?))
}

/// `PUT /tags/{id}`
pub async fn rename_tag(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(tag_id): Path<Uuid>,
    Json(req): Json<TagNameReq>,
) -> Result<Json<RenamedResp>, AppError> {
    let objects_updated = library.tags.rename(&owner, tag_id, &req.name).await?;
    Ok(Json(RenamedResp { objects_updated }))
}

/// `POST /tags/gc`
pub async fn collect_tags(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
) -> Result<Json<CollectedResp>, AppError> {
    let removed = library.tags.garbage_collect(&owner).await?;
    Ok(Json(CollectedResp { removed }))
}

/// `POST /objects/{id}/tags`
pub async fn attach_tag(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(object_id): Path<Uuid>,
    Json(req): Json<TagNameReq>,
) -> Result<(StatusCode, Json<TaggedResp>), AppError> {
    let (tag, object) = library.tag_object(&owner, object_id, &req.name).await?;
    Ok((StatusCode::OK, Json(TaggedResp { tag, object })))
}

/// `DELETE /objects/{id}/tags/{name}`
pub async fn detach_tag(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path((object_id, name)): Path<(Uuid, String)>,
) -> Result<Json<StoredObject>, AppError> {
    Ok(Json(library.untag_object(&owner, object_id, &name).await?))
}
