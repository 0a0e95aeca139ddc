//! API 响应视图
//!
//! 服务端响应是无版本信封的普通对象，这里按键是否存在做投影。

use url::Url;

use crate::{array_get, array_length, get_bool, get_number, get_string, JsonValue};

/// API 响应错误
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Malformed response body")]
    Malformed,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid server address: {0}")]
    InvalidUrl(String),
}

/// 登录响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub token: String,
}

impl LoginResponse {
    pub fn from_json(root: &JsonValue) -> Result<Self, ApiError> {
        if let Some(token) = get_string(root, "token") {
            return Ok(Self {
                token: token.to_owned(),
            });
        }
        match response_error(root) {
            Some(msg) => Err(ApiError::Auth(msg.to_owned())),
            None => Err(ApiError::MissingField("token")),
        }
    }

    /// 直接从响应体解析
    pub fn from_body(body: &[u8]) -> Result<Self, ApiError> {
        let root = crate::parse_slice(body).ok_or(ApiError::Malformed)?;
        Self::from_json(&root)
    }
}

/// 媒体库条目
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    /// 秒
    pub duration: Option<f64>,
    pub size: Option<u64>,
}

impl MediaEntry {
    /// 缺少 `name` 的条目视为无效
    pub fn from_json(item: &JsonValue) -> Option<Self> {
        let name = get_string(item, "name")?;
        let path = get_string(item, "path").unwrap_or(name);
        let is_directory = get_bool(item, "isDirectory", false)
            || matches!(
                get_string(item, "type"),
                Some("directory" | "folder" | "dir")
            );

        Some(Self {
            name: name.to_owned(),
            path: path.to_owned(),
            is_directory,
            duration: get_number(item, "duration").filter(|d| d.is_finite() && *d >= 0.0),
            size: get_number(item, "size")
                .filter(|s| s.is_finite() && *s >= 0.0)
                .map(|s| s as u64),
        })
    }
}

/// 列表数组所在的候选键
const LISTING_KEYS: [&str; 3] = ["files", "items", "results"];

/// 解析目录/搜索列表
pub fn parse_listing(root: &JsonValue) -> Result<Vec<MediaEntry>, ApiError> {
    let list = match root {
        JsonValue::Array(_) => root,
        JsonValue::Object(_) => {
            match LISTING_KEYS.iter().find_map(|key| crate::get_array(root, key)) {
                Some(list) => list,
                None => {
                    return Err(match response_error(root) {
                        Some(msg) => ApiError::Server(msg.to_owned()),
                        None => ApiError::MissingField("files"),
                    })
                }
            }
        }
        _ => return Err(ApiError::Malformed),
    };

    let count = array_length(list);
    let entries: Vec<MediaEntry> = (0..count as i64)
        .filter_map(|i| array_get(list, i))
        .filter_map(MediaEntry::from_json)
        .collect();

    if entries.len() < count {
        log::debug!("Skipped {} listing entries without a name", count - entries.len());
    }
    Ok(entries)
}

/// 取 `error` 字段
pub fn response_error(root: &JsonValue) -> Option<&str> {
    get_string(root, "error")
}

/// 构造交给播放引擎的流地址
///
/// `base` 可以带子路径 (`http://nas/nedflix/`)，条目路径作为查询参数编码。
pub fn stream_url(base: &str, entry: &MediaEntry) -> Result<String, ApiError> {
    let mut url = Url::parse(base).map_err(|e| ApiError::InvalidUrl(format!("{base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ApiError::InvalidUrl(base.to_owned()))?
        .pop_if_empty()
        .extend(["api", "stream"]);
    url.query_pairs_mut().append_pair("path", &entry.path);
    Ok(url.into())
}
