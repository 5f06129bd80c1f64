//! 命名空间路径解析与文档存储接口。

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWriteExt, ErrorKind};

use crate::atomic::AtomicFile;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage key")]
    InvalidKey,
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 文件系统上的一个命名空间（profiles 或 images）。
#[derive(Clone, Debug)]
pub struct Namespace {
    root: PathBuf,
}

impl Namespace {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 解析键对应的路径，拒绝越界与符号链接。
    pub async fn resolve_checked(
        &self,
        key: &str,
        allow_missing_leaf: bool,
    ) -> Result<PathBuf, StorageError> {
        let target = self.resolve(key)?;
        self.ensure_no_symlink_components(&target, allow_missing_leaf)
            .await?;
        Ok(target)
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(normalize_key(key)?))
    }

    async fn ensure_no_symlink_components(
        &self,
        target: &Path,
        allow_missing_leaf: bool,
    ) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidKey)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidKey);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        if allow_missing_leaf {
                            return Err(StorageError::InvalidKey);
                        }
                        return Err(StorageError::NotFound);
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    if allow_missing_leaf {
                        return Ok(());
                    }
                    return Err(StorageError::NotFound);
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }
}

/// 将键规整为命名空间内的相对路径，拒绝 `..`、绝对路径、NUL 与空键。
pub fn normalize_key(key: &str) -> Result<PathBuf, StorageError> {
    if key.contains('\0') {
        return Err(StorageError::InvalidKey);
    }
    let mut normalized = PathBuf::new();
    let trimmed = key.trim_start_matches(['/', '\\']);
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::InvalidKey);
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(StorageError::InvalidKey);
    }
    Ok(normalized)
}

/// 按键整体读写记录的存储后端。写入为整体覆盖，后写者胜出。
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// 键不存在时返回 [`StorageError::NotFound`]。
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// 每条记录对应命名空间下一个文件。
#[derive(Clone, Debug)]
pub struct FsDocumentStore {
    namespace: Namespace,
}

impl FsDocumentStore {
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let target = self.namespace.resolve_checked(key, true).await?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut atomic = AtomicFile::new(&target).await?;
        if let Err(err) = atomic.file_mut().write_all(bytes).await {
            atomic.cleanup().await;
            return Err(err.into());
        }
        atomic.finalize().await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.namespace.resolve_checked(key, false).await?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(err) if err.kind() == ErrorKind::IsADirectory => Err(StorageError::NotFound),
            Err(err) => Err(err.into()),
        }
    }
}
