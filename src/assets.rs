//! 头像资源存储：文件名净化、暂存与原子落盘。

use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::atomic::AtomicFile;
use crate::storage::{Namespace, StorageError};

pub const DEFAULT_ASSET_EXTENSION: &str = ".png";

/// 将 `[A-Za-z0-9_@-]` 以外的每个字符替换为 `_`。
pub fn sanitize_asset_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '@' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// 取原始文件名的扩展名（含前导点），缺省为 `.png`。
pub fn asset_extension(original_filename: Option<&str>) -> String {
    original_filename
        .map(Path::new)
        .and_then(Path::extension)
        .map(|ext| ext.to_string_lossy())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", sanitize_asset_name(&ext)))
        .unwrap_or_else(|| DEFAULT_ASSET_EXTENSION.to_string())
}

/// 资源键：净化后的名称加扩展名。
pub fn asset_key(name: &str, original_filename: Option<&str>) -> String {
    format!(
        "{}{}",
        sanitize_asset_name(name),
        asset_extension(original_filename)
    )
}

#[derive(Clone, Debug)]
pub struct AssetStore {
    namespace: Namespace,
}

impl AssetStore {
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }

    /// 在资源目录中打开暂存文件，提交前不影响已有资源。
    pub async fn stage(&self, key: &str) -> Result<StagedAsset, StorageError> {
        let target = self.namespace.resolve_checked(key, true).await?;
        let file = AtomicFile::new(&target).await?;
        Ok(StagedAsset {
            key: key.to_string(),
            file,
            written: 0,
        })
    }

    /// 按精确文件名打开资源；隐藏文件（含暂存文件）不对外提供。
    pub async fn open(&self, filename: &str) -> Result<(PathBuf, File), StorageError> {
        if filename.is_empty() || filename.starts_with('.') || filename.contains(['/', '\\']) {
            return Err(StorageError::NotFound);
        }
        let path = self.namespace.resolve_checked(filename, false).await?;
        let metadata = fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound);
        }
        let file = File::open(&path).await?;
        Ok((path, file))
    }
}

pub struct StagedAsset {
    key: String,
    file: AtomicFile,
    written: u64,
}

impl StagedAsset {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        self.file.file_mut().write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// 覆盖同名的已有资源。
    pub async fn commit(self) -> Result<String, StorageError> {
        self.file.finalize().await?;
        Ok(self.key)
    }

    pub async fn discard(self) {
        self.file.cleanup().await;
    }
}
