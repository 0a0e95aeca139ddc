//! nedflix_audio - 流式音频双缓冲引擎
//!
//! 主循环调用 `Engine::update` 填充缓冲槽（生产者），
//! 输出设备回调通过 `StreamConsumer` 取走数据（消费者）。

mod buffer;
mod command;
mod config;
mod engine;
mod output;
mod source;
mod wav;

pub use buffer::*;
pub use command::*;
pub use config::*;
pub use engine::*;
pub use output::*;
pub use source::*;
pub use wav::*;
