//! 档案上传处理器：解析表单、暂存头像、注入图片链接并写入档案。

use axum::body::{Body as AxumBody, Bytes};
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Extension, FromRequest, Multipart, Path};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::Json as JsonResponse;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::assets::{AssetStore, StagedAsset, asset_key};
use crate::error::ApiError;
use crate::http::public_base_url;
use crate::profile::{PROFILE_IMAGE_URL_FIELD, ProfileStore};

pub const PROFILE_FIELD: &str = "profile";
pub const IMAGE_FIELD: &str = "image";
pub const IMAGES_ROUTE: &str = "/images";

#[derive(Debug)]
pub struct UploadConfig {
    pub public_url: Option<String>,
    pub max_upload_size: usize,
}

#[derive(Default)]
struct UploadPayload {
    profile: Option<Bytes>,
    image: Option<StagedAsset>,
}

impl UploadPayload {
    async fn discard_image(&mut self) {
        if let Some(staged) = self.image.take() {
            staged.discard().await;
        }
    }
}

/// 上传或覆盖指定名称的档案，可附带头像。
pub async fn upload_profile(
    Path(name): Path<String>,
    Extension(profiles): Extension<Arc<ProfileStore>>,
    Extension(assets): Extension<Arc<AssetStore>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    request: Request<AxumBody>,
) -> Result<JsonResponse<Value>, ApiError> {
    ProfileStore::validate_name(&name)?;
    let base_url = public_base_url(upload.public_url.as_deref(), request.headers());

    let mut payload = read_payload(request, &assets, &name).await?;
    let mut document = match parse_profile(payload.profile.as_deref(), payload.image.is_some()) {
        Ok(document) => document,
        Err(err) => {
            warn!(name, "rejected profile upload");
            payload.discard_image().await;
            return Err(err);
        }
    };

    if let Some(staged) = payload.image.take() {
        let size = staged.written();
        let key = staged.commit().await?;
        let url = format!("{base_url}{IMAGES_ROUTE}/{key}");
        if let Some(fields) = document.as_object_mut() {
            fields.insert(PROFILE_IMAGE_URL_FIELD.to_string(), Value::String(url));
        }
        info!(name, key, size, "stored profile image");
    }

    profiles.put(&name, &document).await?;
    info!(name, "stored profile");
    Ok(JsonResponse(document))
}

async fn read_payload(
    request: Request<AxumBody>,
    assets: &AssetStore,
    name: &str,
) -> Result<UploadPayload, ApiError> {
    match content_type(request.headers()).as_deref() {
        Some("multipart/form-data") => {
            let multipart = Multipart::from_request(request, &())
                .await
                .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
            read_multipart(multipart, assets, name).await
        }
        _ => {
            let body = Bytes::from_request(request, &())
                .await
                .map_err(|rejection| rejection_error(rejection.status(), rejection.body_text()))?;
            Ok(UploadPayload {
                profile: Some(body),
                image: None,
            })
        }
    }
}

async fn read_multipart(
    mut multipart: Multipart,
    assets: &AssetStore,
    name: &str,
) -> Result<UploadPayload, ApiError> {
    let mut payload = UploadPayload::default();
    if let Err(err) = collect_fields(&mut multipart, assets, name, &mut payload).await {
        payload.discard_image().await;
        return Err(err);
    }
    Ok(payload)
}

async fn collect_fields(
    multipart: &mut Multipart,
    assets: &AssetStore,
    name: &str,
    payload: &mut UploadPayload,
) -> Result<(), ApiError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some(PROFILE_FIELD) if payload.profile.is_none() => {
                payload.profile = Some(field.bytes().await.map_err(multipart_error)?);
            }
            Some(IMAGE_FIELD) if payload.image.is_none() => {
                payload.image = stage_image(&mut field, assets, name).await?;
            }
            _ => {
                while field.chunk().await.map_err(multipart_error)?.is_some() {}
            }
        }
    }
    Ok(())
}

/// 空文件字段（浏览器未选择文件时发送）视为未附带头像。
async fn stage_image(
    field: &mut Field<'_>,
    assets: &AssetStore,
    name: &str,
) -> Result<Option<StagedAsset>, ApiError> {
    let key = asset_key(name, field.file_name());
    let mut staged = assets.stage(&key).await?;
    if let Err(err) = copy_field(field, &mut staged).await {
        staged.discard().await;
        return Err(err);
    }
    if staged.written() == 0 {
        staged.discard().await;
        return Ok(None);
    }
    Ok(Some(staged))
}

async fn copy_field(field: &mut Field<'_>, staged: &mut StagedAsset) -> Result<(), ApiError> {
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        staged.write(&chunk).await?;
    }
    Ok(())
}

fn parse_profile(raw: Option<&[u8]>, has_image: bool) -> Result<Value, ApiError> {
    let raw = raw
        .filter(|raw| !raw.is_empty())
        .ok_or(ApiError::MissingPayload)?;
    let document: Value = serde_json::from_slice(raw)
        .map_err(|err| ApiError::InvalidPayload(format!("Invalid profile JSON: {err}")))?;
    if has_image && !document.is_object() {
        return Err(ApiError::InvalidPayload(
            "Profile must be a JSON object to attach an image".into(),
        ));
    }
    Ok(document)
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
}

fn multipart_error(err: MultipartError) -> ApiError {
    rejection_error(err.status(), err.body_text())
}

fn rejection_error(status: StatusCode, body: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadRequest(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    use crate::storage::memory::MemoryDocumentStore;
    use crate::storage::Namespace;

    const BOUNDARY: &str = "profile-drive-test-boundary";

    struct Fixture {
        _temp: tempfile::TempDir,
        images: std::path::PathBuf,
        profiles: Arc<ProfileStore>,
        assets: Arc<AssetStore>,
        upload: Arc<UploadConfig>,
    }

    fn make_fixture() -> Fixture {
        let temp = tempdir().expect("tempdir");
        let images = temp.path().join("images");
        std::fs::create_dir_all(&images).expect("create images root");
        Fixture {
            profiles: Arc::new(ProfileStore::new(Arc::new(MemoryDocumentStore::default()))),
            assets: Arc::new(AssetStore::new(Namespace::new(images.clone()))),
            upload: Arc::new(UploadConfig {
                public_url: Some("http://cdn.test".into()),
                max_upload_size: 1024 * 1024,
            }),
            images,
            _temp: temp,
        }
    }

    fn multipart_body(profile: Option<&str>, image: Option<(&str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some((filename, bytes)) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        if let Some(profile) = profile {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"profile\"\r\n\r\n{profile}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart_request(body: Vec<u8>) -> Request<AxumBody> {
        Request::builder()
            .method("POST")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(body))
            .expect("build request")
    }

    async fn upload(
        fixture: &Fixture,
        name: &str,
        request: Request<AxumBody>,
    ) -> Result<Value, ApiError> {
        upload_profile(
            Path(name.to_string()),
            Extension(fixture.profiles.clone()),
            Extension(fixture.assets.clone()),
            Extension(fixture.upload.clone()),
            request,
        )
        .await
        .map(|JsonResponse(document)| document)
    }

    #[tokio::test]
    async fn raw_json_body_is_stored_verbatim() {
        let fixture = make_fixture();
        let request = Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(r#"{"Name":"Ayla","Level":3}"#))
            .expect("build request");

        let document = upload(&fixture, "Ayla", request).await.expect("upload");
        assert_eq!(document, json!({ "Name": "Ayla", "Level": 3 }));
        assert_eq!(fixture.profiles.get("Ayla").await.expect("get"), document);
    }

    #[tokio::test]
    async fn form_content_type_still_reads_raw_json_body() {
        let fixture = make_fixture();
        let request = Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(AxumBody::from(r#"{"Name":"Ayla"}"#))
            .expect("build request");

        let document = upload(&fixture, "Ayla", request).await.expect("upload");
        assert_eq!(document, json!({ "Name": "Ayla" }));
    }

    #[tokio::test]
    async fn image_upload_injects_url_and_stores_bytes() {
        let fixture = make_fixture();
        let body = multipart_body(
            Some(r#"{"Name":"Reggie","ProfileImageUrl":"http://old"}"#),
            Some(("portrait.jpg", &b"jpeg-bytes"[..])),
        );

        let document = upload(&fixture, "Sir Reginald/The Bold", multipart_request(body))
            .await
            .expect("upload");
        assert_eq!(
            document[PROFILE_IMAGE_URL_FIELD],
            "http://cdn.test/images/Sir_Reginald_The_Bold.jpg"
        );
        assert_eq!(
            std::fs::read(fixture.images.join("Sir_Reginald_The_Bold.jpg")).expect("read asset"),
            b"jpeg-bytes"
        );
        assert_eq!(
            fixture
                .profiles
                .get("Sir Reginald/The Bold")
                .await
                .expect("get"),
            document
        );
    }

    #[tokio::test]
    async fn second_image_upload_replaces_stored_asset() {
        let fixture = make_fixture();
        for bytes in [&b"first-portrait"[..], &b"second"[..]] {
            let body = multipart_body(Some(r#"{"Name":"Ayla"}"#), Some(("portrait.png", bytes)));
            upload(&fixture, "Ayla", multipart_request(body))
                .await
                .expect("upload");
        }

        assert_eq!(
            std::fs::read(fixture.images.join("Ayla.png")).expect("read asset"),
            b"second"
        );
        assert_eq!(std::fs::read_dir(&fixture.images).expect("read dir").count(), 1);
        assert_eq!(
            fixture.profiles.get("Ayla").await.expect("get")[PROFILE_IMAGE_URL_FIELD],
            "http://cdn.test/images/Ayla.png"
        );
    }

    #[tokio::test]
    async fn caller_image_url_passes_through_without_attachment() {
        let fixture = make_fixture();
        let body = multipart_body(Some(r#"{"ProfileImageUrl":"http://elsewhere/x.png"}"#), None);

        let document = upload(&fixture, "Ayla", multipart_request(body))
            .await
            .expect("upload");
        assert_eq!(document[PROFILE_IMAGE_URL_FIELD], "http://elsewhere/x.png");
    }

    #[tokio::test]
    async fn empty_image_field_counts_as_no_attachment() {
        let fixture = make_fixture();
        let body = multipart_body(Some(r#"{"Name":"Ayla"}"#), Some(("", &b""[..])));

        let document = upload(&fixture, "Ayla", multipart_request(body))
            .await
            .expect("upload");
        assert!(document.get(PROFILE_IMAGE_URL_FIELD).is_none());
        assert_eq!(std::fs::read_dir(&fixture.images).expect("read dir").count(), 0);
    }

    #[tokio::test]
    async fn missing_profile_field_rejects_without_writing() {
        let fixture = make_fixture();
        let body = multipart_body(None, Some(("portrait.png", &b"png-bytes"[..])));

        let result = upload(&fixture, "Ayla", multipart_request(body)).await;
        assert!(matches!(result, Err(ApiError::MissingPayload)));
        assert!(matches!(
            fixture.profiles.get("Ayla").await,
            Err(ApiError::ProfileNotFound)
        ));
        assert_eq!(std::fs::read_dir(&fixture.images).expect("read dir").count(), 0);
    }

    #[tokio::test]
    async fn empty_raw_body_is_missing_payload() {
        let fixture = make_fixture();
        let request = Request::builder()
            .method("POST")
            .body(AxumBody::empty())
            .expect("build request");
        let result = upload(&fixture, "Ayla", request).await;
        assert!(matches!(result, Err(ApiError::MissingPayload)));
    }

    #[tokio::test]
    async fn invalid_json_keeps_existing_profile_and_image() {
        let fixture = make_fixture();
        let original = json!({ "Name": "Ayla" });
        fixture.profiles.put("Ayla", &original).await.expect("seed");
        std::fs::write(fixture.images.join("Ayla.png"), b"old").expect("seed image");

        let body = multipart_body(Some("{not json"), Some(("new.png", &b"new"[..])));
        let result = upload(&fixture, "Ayla", multipart_request(body)).await;

        assert!(matches!(result, Err(ApiError::InvalidPayload(_))));
        assert_eq!(fixture.profiles.get("Ayla").await.expect("get"), original);
        assert_eq!(
            std::fs::read(fixture.images.join("Ayla.png")).expect("read"),
            b"old"
        );
        assert_eq!(std::fs::read_dir(&fixture.images).expect("read dir").count(), 1);
    }

    #[tokio::test]
    async fn image_with_non_object_profile_is_rejected() {
        let fixture = make_fixture();
        let body = multipart_body(Some("[1,2,3]"), Some(("a.png", &b"png"[..])));
        let result = upload(&fixture, "Ayla", multipart_request(body)).await;
        assert!(matches!(result, Err(ApiError::InvalidPayload(_))));
        assert_eq!(std::fs::read_dir(&fixture.images).expect("read dir").count(), 0);
    }

    #[tokio::test]
    async fn traversal_name_is_rejected_before_any_write() {
        let fixture = make_fixture();
        let body = multipart_body(Some("{}"), Some(("a.png", &b"png"[..])));
        let result = upload(&fixture, "../escape", multipart_request(body)).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert_eq!(std::fs::read_dir(&fixture.images).expect("read dir").count(), 0);
    }

    #[test]
    fn parse_profile_distinguishes_missing_and_invalid() {
        assert!(matches!(
            parse_profile(None, false),
            Err(ApiError::MissingPayload)
        ));
        assert!(matches!(
            parse_profile(Some(b""), false),
            Err(ApiError::MissingPayload)
        ));
        assert!(matches!(
            parse_profile(Some(b"   "), false),
            Err(ApiError::InvalidPayload(_))
        ));
        assert_eq!(
            parse_profile(Some(b"\"just a string\""), false).expect("parse"),
            json!("just a string")
        );
    }
}
