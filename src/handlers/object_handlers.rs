//! HTTP handlers for files and links.
//! Streams file bodies in both directions to avoid buffering in memory and
//! delegates storage concerns to `Library`.

use crate::{
    errors::AppError,
    handlers::OwnerId,
    models::object::{LocationRef, StoredObject},
    services::{
        library::{IntegrityReport, Library, NewFile},
        object_catalog::ObjectFilter,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use uuid::Uuid;

/// Query params accepted by `POST /files`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub name: String,
    pub semester_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkReq {
    pub name: String,
    pub url: String,
    pub location: Option<LocationRef>,
}

#[derive(Debug, Deserialize)]
pub struct RenameReq {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveReq {
    pub location: Option<LocationRef>,
}

/// Build a placement from separate query params; all three or none.
fn location_from_parts(
    semester_id: Option<Uuid>,
    subject_id: Option<Uuid>,
    topic_id: Option<Uuid>,
) -> Result<Option<LocationRef>, AppError> {
    match (semester_id, subject_id, topic_id) {
        (Some(semester_id), Some(subject_id), Some(topic_id)) => Ok(Some(LocationRef {
            semester_id,
            subject_id,
            topic_id,
        })),
        (None, None, None) => Ok(None),
        _ => Err(AppError::bad_request(
            "semester_id, subject_id and topic_id must be given together",
        )),
    }
}

fn content_type_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn body_stream(body: Body) -> impl futures::Stream<Item = io::Result<bytes::Bytes>> + Send {
    body.into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other))
}

/// `POST /files?name=..[&semester_id=..&subject_id=..&topic_id=..]`
pub async fn upload_file(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Query(q): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<StoredObject>), AppError> {
    let file = NewFile {
        display_name: q.name,
        content_type: content_type_of(&headers),
        location: location_from_parts(q.semester_id, q.subject_id, q.topic_id)?,
    };
    let object = library
        .upload_file(&owner, file, body_stream(body))
        .await?;
    Ok((StatusCode::CREATED, Json(object)))
}

/// `GET /files/{id}`: stream the file back as a download.
pub async fn download_file(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (meta, stream) = library.open_file(&owner, id).await?;
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// `PUT /files/{id}`: replace the content, keeping metadata.
pub async fn replace_file(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<StoredObject>, AppError> {
    let object = library
        .replace
        .replace(&owner, id, content_type_of(&headers), body_stream(body))
        .await?;
    Ok(Json(object))
}

/// `GET /files/{id}/verify`
pub async fn verify_file(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
) -> Result<Json<IntegrityReport>, AppError> {
    Ok(Json(library.verify_file(&owner, id).await?))
}

/// `POST /links`
pub async fn create_link(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Json(req): Json<CreateLinkReq>,
) -> Result<(StatusCode, Json<StoredObject>), AppError> {
    let object = library
        .create_link(&owner, &req.name, &req.url, req.location)
        .await?;
    Ok((StatusCode::CREATED, Json(object)))
}

/// `GET /objects`: list/search, supports location, kind, name and tag filters.
pub async fn list_objects(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Query(filter): Query<ObjectFilter>,
) -> Result<Json<Vec<StoredObject>>, AppError> {
    Ok(Json(library.catalog.find(&owner, &filter).await?))
}

/// `GET /objects/{id}`
pub async fn get_object(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
) -> Result<Json<StoredObject>, AppError> {
    Ok(Json(library.catalog.get(&owner, id).await?))
}

/// `PUT /objects/{id}/name`
pub async fn rename_object(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameReq>,
) -> Result<Json<StoredObject>, AppError> {
    Ok(Json(library.catalog.rename(&owner, id, &req.name).await?))
}

/// `PUT /objects/{id}/location`: `{"location": null}` unplaces the object.
pub async fn move_object(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
    Json(req): Json<MoveReq>,
) -> Result<Json<StoredObject>, AppError> {
    Ok(Json(
        library.catalog.move_object(&owner, id, req.location).await?,
    ))
}

/// `DELETE /objects/{id}`
pub async fn delete_object(
    State(library): State<Library>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    library.delete_object(&owner, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_file_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let (size_bytes, content_type, etag) = match &meta.kind {
        crate::models::object::ObjectKind::File {
            size_bytes,
            content_type,
            etag,
        } => (*size_bytes, content_type.as_deref(), etag.as_deref()),
        crate::models::object::ObjectKind::Link { .. } => (0, None, None),
    };

    let content_type = content_type.unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Some(etag) = etag {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&meta.display_name),
    );

    if let Ok(value) = HeaderValue::from_str(&meta.created_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// `attachment` disposition echoing the display name, with an ASCII fallback
/// and an RFC 5987 `filename*` for everything else.
fn content_disposition(display_name: &str) -> HeaderValue {
    let fallback: String = display_name
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(display_name)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_echoes_ascii_name() {
        let value = content_disposition("lecture notes.pdf");
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"lecture notes.pdf\"; filename*=UTF-8''lecture%20notes.pdf"
        );
    }

    #[test]
    fn disposition_escapes_quotes_and_unicode() {
        let value = content_disposition("\"Übung\".txt");
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"__bung_.txt\"; filename*=UTF-8''%22%C3%9Cbung%22.txt"
        );
    }

    #[test]
    fn partial_location_is_rejected() {
        let err = location_from_parts(Some(Uuid::new_v4()), None, None).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(location_from_parts(None, None, None).unwrap().is_none());
    }
}
