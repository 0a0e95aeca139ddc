//! 音频输出
//!
//! 使用 cpal 进行音频播放

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};

use crate::{PcmFormat, StreamConsumer};

/// 音频输出错误
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    #[error("No output device available")]
    NoDevice,
    #[error("No supported config for {0:?}")]
    NoConfig(PcmFormat),
    #[error("Stream error: {0}")]
    Stream(String),
}

/// 输出设备
///
/// 设备在自己的线程上通过 `StreamConsumer` 拉取数据。
pub trait OutputDevice {
    /// 以指定格式开始（或重新开始）输出
    fn start(&mut self, format: PcmFormat) -> Result<(), OutputError>;
    fn pause(&mut self) -> Result<(), OutputError>;
    fn resume(&mut self) -> Result<(), OutputError>;
    fn stop(&mut self);
    /// 音量 (0 - 100)
    fn set_volume(&mut self, volume: u8);
}

/// cpal 输出设备
pub struct CpalOutput {
    device: Device,
    consumer: Arc<StreamConsumer>,
    volume: Arc<AtomicU8>,
    stream: Option<Stream>,
}

impl CpalOutput {
    /// 使用默认输出设备
    pub fn new(consumer: StreamConsumer) -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(OutputError::NoDevice)?;

        Ok(Self::with_device(device, consumer))
    }

    /// 使用指定设备
    pub fn with_device(device: Device, consumer: StreamConsumer) -> Self {
        if let Ok(name) = device.name() {
            log::debug!("Using output device: {}", name);
        }
        Self {
            device,
            consumer: Arc::new(consumer),
            volume: Arc::new(AtomicU8::new(100)),
            stream: None,
        }
    }

    fn build_stream(&self, format: PcmFormat) -> Result<Stream, OutputError> {
        let supported_config = self
            .device
            .supported_output_configs()
            .map_err(|e| OutputError::Stream(e.to_string()))?
            .find(|c| {
                c.channels() == format.channels
                    && c.min_sample_rate().0 <= format.sample_rate
                    && c.max_sample_rate().0 >= format.sample_rate
                    && c.sample_format() == SampleFormat::F32
            })
            .ok_or(OutputError::NoConfig(format))?;

        let stream_config: StreamConfig = supported_config
            .with_sample_rate(cpal::SampleRate(format.sample_rate))
            .into();

        let consumer = Arc::clone(&self.consumer);
        let volume = Arc::clone(&self.volume);
        let bytes_per_sample = format.bytes_per_sample();
        let mut scratch: Vec<u8> = vec![0; 8192];

        self.device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let needed = data.len() * bytes_per_sample;
                    if scratch.len() < needed {
                        scratch.resize(needed, 0);
                    }

                    // 一次回调可能跨越两个槽
                    let mut filled = 0;
                    while filled < needed {
                        let n = consumer.read_into(&mut scratch[filled..needed]);
                        if n == 0 {
                            break;
                        }
                        filled += n;
                    }

                    let gain = f32::from(volume.load(Ordering::Relaxed)) / 100.0;
                    let written = pcm_to_f32(&scratch[..filled], bytes_per_sample, data, gain);
                    // 欠载或结束：剩余部分填充静音
                    data[written..].fill(0.0);
                },
                |err| {
                    log::warn!("Audio output error: {}", err);
                },
                None,
            )
            .map_err(|e| OutputError::Stream(e.to_string()))
    }
}

impl OutputDevice for CpalOutput {
    fn start(&mut self, format: PcmFormat) -> Result<(), OutputError> {
        // 先释放旧流，保证同一时刻只有一个回调在消费
        self.stream = None;

        let stream = self.build_stream(format)?;
        stream.play().map_err(|e| OutputError::Stream(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), OutputError> {
        match &self.stream {
            Some(stream) => stream.pause().map_err(|e| OutputError::Stream(e.to_string())),
            None => Ok(()),
        }
    }

    fn resume(&mut self) -> Result<(), OutputError> {
        match &self.stream {
            Some(stream) => stream.play().map_err(|e| OutputError::Stream(e.to_string())),
            None => Ok(()),
        }
    }

    fn stop(&mut self) {
        self.stream = None;
    }

    fn set_volume(&mut self, volume: u8) {
        self.volume.store(volume.min(100), Ordering::Relaxed);
    }
}

/// 将 8 位无符号 / 16 位有符号小端 PCM 转为 f32，返回写出的采样数
pub fn pcm_to_f32(bytes: &[u8], bytes_per_sample: usize, out: &mut [f32], gain: f32) -> usize {
    let mut written = 0;
    match bytes_per_sample {
        1 => {
            for (dst, &b) in out.iter_mut().zip(bytes) {
                *dst = (f32::from(b) - 128.0) / 128.0 * gain;
                written += 1;
            }
        }
        2 => {
            for (dst, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                *dst = f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0 * gain;
                written += 1;
            }
        }
        _ => {}
    }
    written
}
