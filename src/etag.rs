//! 资源 ETag 计算与条件读取。

use axum::http::{HeaderMap, header};
use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// 根据文件大小与修改时间生成弱 ETag。
pub fn etag_from_metadata(metadata: &Metadata) -> String {
    let size = metadata.len();
    if let Ok(modified) = metadata.modified()
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        return format!(
            "W/\"{}-{}-{}\"",
            size,
            duration.as_secs(),
            duration.subsec_nanos()
        );
    }
    format!("W/\"{}\"", size)
}

/// `If-None-Match` 命中当前 ETag 时返回 true（弱比较）。
pub fn is_not_modified(headers: &HeaderMap, current_etag: &str) -> bool {
    let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    if value.trim() == "*" {
        return true;
    }
    let current = strip_weak(current_etag);
    value
        .split(',')
        .map(str::trim)
        .any(|item| strip_weak(item) == current)
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}
