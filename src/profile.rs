//! 角色档案存储：按名称读写 JSON 文档。

use serde_json::Value;
use std::sync::Arc;

use crate::error::ApiError;
use crate::storage::{DocumentStore, StorageError, normalize_key};

/// 服务端唯一会改写的保留字段。
pub const PROFILE_IMAGE_URL_FIELD: &str = "ProfileImageUrl";

const RECORD_EXTENSION: &str = ".json";

#[derive(Clone)]
pub struct ProfileStore {
    backend: Arc<dyn DocumentStore>,
}

impl ProfileStore {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self { backend }
    }

    /// 名称不得为空，也不得越出档案命名空间。
    pub fn validate_name(name: &str) -> Result<(), ApiError> {
        normalize_key(name)
            .map(|_| ())
            .map_err(|_| ApiError::BadRequest("invalid profile name".into()))
    }

    /// 以格式化 JSON 整体覆盖写入。
    pub async fn put(&self, name: &str, document: &Value) -> Result<(), ApiError> {
        Self::validate_name(name)?;
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        self.backend.put(&record_key(name), &bytes).await?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Value, ApiError> {
        Self::validate_name(name)?;
        let bytes = match self.backend.get(&record_key(name)).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound) => return Err(ApiError::ProfileNotFound),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|err| ApiError::Internal(format!("corrupt profile record {name}: {err}")))
    }
}

fn record_key(name: &str) -> String {
    format!("{name}{RECORD_EXTENSION}")
}
