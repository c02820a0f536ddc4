use axum::{
    Json,
    extract::{
        Multipart, Path, Query, State,
        multipart::Field,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use tracing::{error, info};
use validator::Validate;

use crate::{
    auth::TypeAdmin,
    error::{AppError, Result},
    models::*,
    state::AppState,
    utils::MAX_TYPE_NAME_LEN,
};

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>)>;

fn ok<T>(message: &str, data: T) -> ApiResult<T> {
    respond(StatusCode::OK, message, Some(data))
}

fn respond<T>(status: StatusCode, message: &str, data: Option<T>) -> ApiResult<T> {
    Ok((status, Json(ApiResponse::new(status.as_u16(), message, data))))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub type_id: Option<i64>,
    pub type_name: Option<String>,
    pub keyword: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterTypeRequest {
    pub type_id: i64,
    #[validate(length(min = 1, max = 50))]
    pub type_name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RenameTypeRequest {
    #[validate(length(min = 1, max = 50))]
    pub type_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDescriptionRequest {
    pub description: Option<String>,
}

/// Text fields never need more than this.
const MAX_TEXT_FIELD_BYTES: u64 = 64 * 1024;

/// Fields of an upload form, read once from the multipart stream.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<BatchEntry>,
    pub type_id: Option<i64>,
    pub type_name: Option<String>,
    pub tags: Option<String>,
    pub description: Option<String>,
}

impl UploadForm {
    /// Reads the form. Files larger than `max_file_size` and files past `max_files`
    /// are drained without buffering and kept as rejected entries.
    pub async fn read(mut multipart: Multipart, max_file_size: u64, max_files: usize) -> Result<Self> {
        let mut form = UploadForm::default();

        // Parse multipart fields
        while let Some(mut field) = multipart.next_field().await.map_err(|e| {
            error!("Error parsing multipart: {}", e);
            AppError::InvalidArgument(format!("Failed to parse multipart form: {}", e))
        })? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "file" | "files" => {
                    let filename = field.file_name().unwrap_or("").to_string();
                    let content_type = field.content_type().map(|s| s.to_string());

                    if form.files.len() >= max_files {
                        read_capped(&mut field, 0).await?;
                        form.files.push(BatchEntry::Rejected {
                            filename,
                            error: AppError::InvalidArgument(format!(
                                "Too many files. Maximum allowed is {}",
                                max_files
                            )),
                        });
                        continue;
                    }

                    // Read file bytes
                    let entry = match read_capped(&mut field, max_file_size).await? {
                        Some(data) => BatchEntry::File(UploadFile { filename, content_type, data }),
                        None => BatchEntry::Rejected {
                            filename,
                            error: AppError::InvalidArgument(format!(
                                "File size exceeds maximum limit of {} bytes",
                                max_file_size
                            )),
                        },
                    };
                    form.files.push(entry);
                }
                "type_id" => {
                    let value = text(&mut field).await?;
                    if !value.is_empty() {
                        let id = value.trim().parse().map_err(|_| {
                            AppError::InvalidArgument(format!("type_id must be an integer, got {}", value))
                        })?;
                        form.type_id = Some(id);
                    }
                }
                "type_name" => form.type_name = non_empty(text(&mut field).await?),
                "tags" => form.tags = non_empty(text(&mut field).await?),
                "description" => form.description = non_empty(text(&mut field).await?),
                _ => {
                    read_capped(&mut field, 0).await?;
                }
            }
        }

        Ok(form)
    }

    fn type_key(&self) -> Result<TypeKey> {
        TypeKey::from_parts(self.type_id, self.type_name.clone())
            .ok_or_else(|| AppError::MissingParameter("type_id or type_name is required".into()))
    }
}

/// Reads at most `limit` bytes of a field. Anything beyond is drained and
/// discarded, and `None` comes back.
async fn read_capped(field: &mut Field<'_>, limit: u64) -> Result<Option<Bytes>> {
    let mut buf = BytesMut::new();
    let mut oversized = false;

    while let Some(chunk) = field.chunk().await.map_err(|e| {
        error!("Error reading multipart field: {}", e);
        AppError::InvalidArgument(format!("Failed to read the file: {}", e))
    })? {
        if oversized {
            continue;
        }
        if (buf.len() + chunk.len()) as u64 > limit {
            oversized = true;
            buf = BytesMut::new();
            continue;
        }
        buf.extend_from_slice(&chunk);
    }

    Ok((!oversized).then(|| buf.freeze()))
}

async fn text(field: &mut Field<'_>) -> Result<String> {
    let data = read_capped(field, MAX_TEXT_FIELD_BYTES)
        .await?
        .ok_or_else(|| AppError::InvalidArgument("Form field is too long".into()))?;
    String::from_utf8(data.to_vec())
        .map_err(|_| AppError::InvalidArgument("Form field is not valid UTF-8".into()))
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn validation_error(e: validator::ValidationErrors) -> AppError {
    AppError::InvalidArgument(format!(
        "type_name must be 1-{} characters: {}",
        MAX_TYPE_NAME_LEN, e
    ))
}

/// Response carrying raw file bytes. `attachment` adds a download disposition.
fn file_response(content: FileContent, attachment: bool) -> Response {
    let mut response = Response::new(content.data.into());

    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_str(&content.mime_type)
            .unwrap_or_else(|_| header::HeaderValue::from_static("application/octet-stream")),
    );

    if attachment {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, attachment_disposition(&content.filename));
    }

    response
}

/// `attachment` disposition preserving the original filename: an ASCII fallback
/// in `filename` and the exact UTF-8 name in `filename*` (RFC 5987).
pub fn attachment_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// Upload one image using multipart/form-data.
pub async fn upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<ImageRecord> {
    // A second file is only drained, just enough to refuse the request
    let mut form = UploadForm::read(multipart, state.config().max_file_size, 1).await?;
    let type_key = form.type_key()?;

    if form.files.len() > 1 {
        return Err(AppError::InvalidArgument(
            "Only one file is accepted here, use the batch endpoint for more".into(),
        ));
    }
    let file = match form.files.pop() {
        Some(BatchEntry::File(file)) => file,
        Some(BatchEntry::Rejected { error, .. }) => return Err(error),
        None => return Err(AppError::MissingParameter("No file provided".into())),
    };

    let outcome = state
        .store
        .upload(file, &type_key, form.tags, form.description)
        .await?;

    match outcome {
        UploadOutcome::Created(record) => {
            respond(StatusCode::CREATED, "Image uploaded successfully", Some(record))
        }
        UploadOutcome::Duplicate(record) => ok("Duplicate image found", record),
    }
}

/// Upload several images; each file gets its own result entry.
pub async fn upload_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Vec<BatchItemResult>> {
    let config = state.config();
    let form = UploadForm::read(multipart, config.max_file_size, config.max_files_per_batch).await?;
    let type_key = form.type_key()?;

    let results = state.store.upload_many(form.files, &type_key, form.tags).await?;

    let succeeded = results.iter().filter(|r| r.success).count();
    info!("Batch upload: {} of {} files succeeded", succeeded, results.len());

    let message = format!("Processed {} files, {} succeeded", results.len(), succeeded);
    ok(&message, results)
}

pub async fn list_images(
    State(state): State<AppState>,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<ImagePage> {
    let Query(query) = query.map_err(|e| AppError::InvalidArgument(e.body_text()))?;

    // A type name filter is resolved to its id
    let type_id = match (query.type_id, non_empty(query.type_name.unwrap_or_default())) {
        (Some(id), _) => Some(id),
        (None, Some(name)) => Some(state.store.registry().resolve(&TypeKey::Name(name)).await?.type_id),
        (None, None) => None,
    };

    let page = state
        .store
        .list(ListFilter {
            page: query.page,
            page_size: query.page_size,
            type_id,
            keyword: query.keyword,
        })
        .await?;

    ok("Images retrieved successfully", page)
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Stats> {
    ok("Statistics retrieved successfully", state.store.stats().await?)
}

pub async fn get_status(State(state): State<AppState>) -> ApiResult<CatalogStatus> {
    ok("Catalog status retrieved successfully", state.store.status().await?)
}

pub async fn get_image(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<ImageRecord> {
    ok("Image retrieved successfully", state.store.get(id).await?)
}

pub async fn update_description(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: std::result::Result<Json<UpdateDescriptionRequest>, JsonRejection>,
) -> ApiResult<ImageRecord> {
    let Json(body) = body.map_err(|e| AppError::InvalidArgument(e.body_text()))?;
    let record = state.store.update_description(id, body.description).await?;
    ok("Description updated successfully", record)
}

/// Soft-delete an image. Its files stay on disk.
pub async fn delete_image(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.store.soft_delete(id).await?;
    respond(StatusCode::OK, "Image deleted successfully", None)
}

/// Download an image under its original filename.
pub async fn download_image(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Response> {
    let content = state.store.download(id).await?;
    Ok(file_response(content, true))
}

pub async fn list_types(State(state): State<AppState>, _admin: TypeAdmin) -> ApiResult<Vec<ImageType>> {
    ok("Image types retrieved successfully", state.store.registry().list().await?)
}

pub async fn get_type(State(state): State<AppState>, Path(type_id): Path<i64>) -> ApiResult<ImageType> {
    ok("Image type retrieved successfully", state.store.registry().get(type_id).await?)
}

pub async fn register_type(
    State(state): State<AppState>,
    _admin: TypeAdmin,
    body: std::result::Result<Json<RegisterTypeRequest>, JsonRejection>,
) -> ApiResult<ImageType> {
    let Json(body) = body.map_err(|e| AppError::InvalidArgument(e.body_text()))?;
    body.validate().map_err(validation_error)?;

    let image_type = state
        .store
        .registry()
        .register(body.type_id, &body.type_name, &body.description)
        .await?;

    respond(StatusCode::CREATED, "Image type created successfully", Some(image_type))
}

pub async fn rename_type(
    State(state): State<AppState>,
    _admin: TypeAdmin,
    Path(type_id): Path<i64>,
    body: std::result::Result<Json<RenameTypeRequest>, JsonRejection>,
) -> ApiResult<ImageType> {
    let Json(body) = body.map_err(|e| AppError::InvalidArgument(e.body_text()))?;
    body.validate().map_err(validation_error)?;

    let image_type = state
        .store
        .registry()
        .rename(type_id, &body.type_name, body.description.as_deref())
        .await?;

    ok("Image type updated successfully", image_type)
}

pub async fn remove_type(
    State(state): State<AppState>,
    _admin: TypeAdmin,
    Path(type_id): Path<i64>,
) -> ApiResult<()> {
    state.store.registry().remove(type_id).await?;
    respond(StatusCode::OK, "Image type deleted successfully", None)
}

pub async fn get_thumbnail(State(state): State<AppState>, Path(filename): Path<String>) -> Result<Response> {
    let content = state.store.get_thumbnail(&filename).await?;
    Ok(file_response(content, false))
}

/// Serve an original by `{folder}/{filename}`; only the last segment is used.
pub async fn get_raw_image(State(state): State<AppState>, Path(path): Path<String>) -> Result<Response> {
    let content = state.store.get_raw(&path).await?;
    Ok(file_response(content, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_keeps_plain_names() {
        let value = attachment_disposition("a.JPG");
        assert_eq!(value, "attachment; filename=\"a.JPG\"; filename*=UTF-8''a.JPG");
    }

    #[test]
    fn disposition_escapes_quotes_and_non_ascii() {
        let value = attachment_disposition("say \"hi\".png");
        assert_eq!(
            value,
            "attachment; filename=\"say _hi_.png\"; filename*=UTF-8''say%20%22hi%22.png"
        );

        let value = attachment_disposition("café.jpg");
        assert_eq!(
            value,
            "attachment; filename=\"caf_.jpg\"; filename*=UTF-8''caf%C3%A9.jpg"
        );
    }
}
