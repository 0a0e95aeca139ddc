//! 引擎命令和事件定义

use std::time::Duration;

use crate::PcmFormat;

/// 引擎命令（UI -> 引擎）
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// 播放路径或 URL
    Play(String),
    /// 暂停
    Pause,
    /// 恢复
    Resume,
    /// 停止
    Stop,
    /// 跳转到指定位置
    Seek(Duration),
    /// 设置音量 (0 - 100)
    SetVolume(i32),
    /// 关闭引擎
    Shutdown,
}

/// 引擎事件（引擎 -> UI）
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// 状态变更
    StateChanged(PlaybackState),
    /// 当前曲目信息
    TrackInfo(TrackInfo),
    /// 曲目播放结束
    TrackEnded,
    /// 错误
    Error(String),
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// 曲目信息
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub descriptor: String,
    pub format: PcmFormat,
    pub duration: Duration,
    /// 源未声明时长，`duration` 为估计值
    pub duration_estimated: bool,
}

/// 缓冲统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub underruns: u64,
    pub ready_slots: usize,
    pub current_slot: usize,
}
