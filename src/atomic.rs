//! 临时写入与原子替换的辅助方法。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use uuid::Uuid;

/// 写在目标同目录下、完成后原子替换目标的临时文件。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_path = parent.join(format!(".{base}.tmp.{}", Uuid::new_v4()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 放弃写入，目标文件保持不变。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步落盘后重命名覆盖目标。
    pub async fn finalize(self) -> io::Result<()> {
        if let Err(err) = self.file.sync_all().await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok() {
                    fs::rename(&self.temp_path, &self.target).await?;
                } else {
                    let _ = fs::remove_file(&self.temp_path).await;
                    return Err(err);
                }
            }
            #[cfg(not(windows))]
            {
                let _ = fs::remove_file(&self.temp_path).await;
                return Err(err);
            }
        }

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(())
    }
}

#[cfg(unix)]
async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || std::fs::File::open(path)?.sync_all())
        .await
        .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(not(unix))]
async fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
