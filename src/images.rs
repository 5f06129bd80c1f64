//! 头像静态资源读取，支持条件请求。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use httpdate::fmt_http_date;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::assets::AssetStore;
use crate::error::ApiError;
use crate::etag::{etag_from_metadata, is_not_modified};
use crate::storage::StorageError;

/// 按精确文件名返回头像内容。
pub async fn serve_image(
    Path(filename): Path<String>,
    request_headers: HeaderMap,
    Extension(assets): Extension<Arc<AssetStore>>,
) -> Result<Response, ApiError> {
    let (path, file) = match assets.open(&filename).await {
        Ok(found) => found,
        Err(StorageError::NotFound | StorageError::InvalidKey) => {
            return Err(ApiError::NotFound("image not found".into()));
        }
        Err(err) => return Err(err.into()),
    };
    let metadata = file.metadata().await?;
    let etag = etag_from_metadata(&metadata);
    let mime = mime_guess::from_path(&path).first_or_octet_stream();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag).map_err(|_| ApiError::Internal("invalid etag".into()))?,
    );
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("invalid last-modified".into()))?,
        );
    }

    if is_not_modified(&request_headers, &etag) {
        debug!(filename, "image not modified");
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::Internal("invalid content length".into()))?,
    );
    debug!(filename, size = metadata.len(), "serve image");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
