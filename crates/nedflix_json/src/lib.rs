//! nedflix_json - 最小 JSON 解析库
//!
//! 递归下降解析 API 响应，提供按键/下标的类型化访问。
//! 解析失败一律返回 `None`，不会 panic。

#[cfg(test)]
mod alloc_count;
pub mod api;
mod parser;
mod value;
mod writer;

pub use parser::*;
pub use value::*;

/// 解析错误
///
/// `parse` 对外只暴露 `Option`，此类型供内部与测试区分失败原因。
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty input")]
    Empty,

    #[error("Unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("Unexpected end of input")]
    UnexpectedEnd,

    #[error("Nesting deeper than {0} levels")]
    TooDeep(usize),

    #[error("Invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),
}
