//! 引擎配置

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// PCM 格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub const fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels)
    }

    /// 每秒字节数
    pub fn byte_rate(&self) -> u64 {
        u64::from(self.sample_rate) * self.bytes_per_frame() as u64
    }

    /// 字节数对应的播放时长
    pub fn duration_of(&self, bytes: u64) -> Duration {
        match self.byte_rate() {
            0 => Duration::ZERO,
            rate => {
                let nanos = u128::from(bytes % rate) * 1_000_000_000 / u128::from(rate);
                Duration::new(bytes / rate, nanos as u32)
            }
        }
    }

    /// 时间点对应的字节偏移（按帧对齐）
    pub fn offset_of(&self, time: Duration) -> u64 {
        let frames = time.as_nanos() * u128::from(self.sample_rate) / 1_000_000_000;
        u64::try_from(frames)
            .unwrap_or(u64::MAX / 8)
            .saturating_mul(self.bytes_per_frame() as u64)
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::new(44100, 2, 16)
    }
}

/// 目标平台（决定缓冲槽大小）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Dreamcast,
    Xbox360,
    Desktop,
}

/// 配置错误
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("slot_count must be at least 2, got {0}")]
    SlotCount(usize),

    #[error("slot_size must be a non-zero multiple of 4, got {0}")]
    SlotSize(usize),

    #[error("volume must be within 0..=100, got {0}")]
    Volume(u8),

    #[error("slot_size {slot_size} cannot hold a {frame}-byte frame")]
    SlotTooSmall { slot_size: usize, frame: usize },
}

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 单个缓冲槽字节数
    pub slot_size: usize,
    /// 缓冲槽数量（至少 2）
    pub slot_count: usize,
    /// 源未声明格式时使用的输出格式
    pub default_format: PcmFormat,
    /// 源未声明时长时的估计值（秒）
    pub default_duration_secs: u64,
    /// 初始音量 (0 - 100)
    pub volume: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_platform(Platform::Desktop)
    }
}

impl EngineConfig {
    pub fn for_platform(platform: Platform) -> Self {
        let slot_size = match platform {
            Platform::Dreamcast => 16 * 1024,
            Platform::Xbox360 | Platform::Desktop => 32 * 1024,
        };
        Self {
            slot_size,
            slot_count: 2,
            default_format: PcmFormat::default(),
            default_duration_secs: 180,
            volume: 100,
        }
    }

    pub fn default_duration(&self) -> Duration {
        Duration::from_secs(self.default_duration_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_count < 2 {
            return Err(ConfigError::SlotCount(self.slot_count));
        }
        // 保证 8/16 位单声道、立体声的帧都不会跨槽
        if self.slot_size == 0 || self.slot_size % 4 != 0 {
            return Err(ConfigError::SlotSize(self.slot_size));
        }
        if self.volume > 100 {
            return Err(ConfigError::Volume(self.volume));
        }
        Ok(())
    }

    /// 按帧对齐后每个槽实际使用的字节数
    ///
    /// 多声道格式的帧长未必整除 `slot_size`，槽尾不足一帧的部分不使用。
    pub fn slot_len_for(&self, format: &PcmFormat) -> Result<usize, ConfigError> {
        let frame = format.bytes_per_frame().max(1);
        match self.slot_size - self.slot_size % frame {
            0 => Err(ConfigError::SlotTooSmall {
                slot_size: self.slot_size,
                frame,
            }),
            len => Ok(len),
        }
    }
}
