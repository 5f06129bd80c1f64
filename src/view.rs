//! 档案读取处理器。

use axum::extract::{Extension, Path};
use axum::response::Json as JsonResponse;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::profile::ProfileStore;

/// 按名称返回已存储的档案，不存在时返回结构化 404。
pub async fn view_profile(
    Path(name): Path<String>,
    Extension(profiles): Extension<Arc<ProfileStore>>,
) -> Result<JsonResponse<Value>, ApiError> {
    let document = profiles.get(&name).await?;
    debug!(name, "view profile");
    Ok(JsonResponse(document))
}
