//! 播放引擎
//!
//! `Engine` 是生产者：在主循环中打开字节源、填充缓冲槽并驱动状态机。
//! 消费者是输出设备回调中的 `StreamConsumer`。

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::buffer::{BufferSlot, SharedStream};
use crate::{
    ByteSource, ConfigError, CpalOutput, EngineCommand, EngineConfig, EngineEvent, EngineStats,
    FileOpener, OutputDevice, OutputError, PlaybackState, SourceError, SourceOpener,
    StreamConsumer, TrackInfo,
};

/// 引擎错误
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),
}

/// 单个槽的填充结果
enum FillOutcome {
    Full,
    /// 源暂时无数据，已写入部分保持不可见
    Pending,
    Ended { had_data: bool },
}

/// 播放引擎
pub struct Engine {
    config: EngineConfig,
    shared: Arc<SharedStream>,
    opener: Box<dyn SourceOpener>,
    device: Box<dyn OutputDevice>,
    /// 当前字节源，仅生产者持有
    source: Option<Box<dyn ByteSource>>,
    /// 下一个待填充的槽
    fill_slot: usize,
    volume: u8,
    evt_tx: Sender<EngineEvent>,
    evt_rx: Receiver<EngineEvent>,
}

impl Engine {
    /// 分配缓冲槽并创建输出设备
    ///
    /// `make_device` 收到唯一的消费端句柄。设备创建失败时返回错误，
    /// 调用方应将音频视为不可用。
    pub fn init<F>(
        config: EngineConfig,
        opener: impl SourceOpener + 'static,
        make_device: F,
    ) -> Result<Self, EngineError>
    where
        F: FnOnce(StreamConsumer) -> Result<Box<dyn OutputDevice>, OutputError>,
    {
        config.validate()?;

        let shared = Arc::new(SharedStream::new(
            config.slot_count,
            config.slot_size,
            config.default_format,
        ));

        let mut device = make_device(StreamConsumer::new(Arc::clone(&shared))).map_err(|e| {
            log::warn!("Audio output unavailable: {}", e);
            e
        })?;
        device.set_volume(config.volume);

        let (evt_tx, evt_rx) = bounded(64);

        log::debug!(
            "Audio engine ready: {} slots x {} bytes",
            config.slot_count,
            config.slot_size
        );

        Ok(Self {
            volume: config.volume,
            config,
            shared,
            opener: Box::new(opener),
            device,
            source: None,
            fill_slot: 0,
            evt_tx,
            evt_rx,
        })
    }

    /// 默认 cpal 设备 + 本地文件源
    pub fn with_default_output(config: EngineConfig) -> Result<Self, EngineError> {
        Self::init(config, FileOpener, |consumer| {
            let device: Box<dyn OutputDevice> = Box::new(CpalOutput::new(consumer)?);
            Ok(device)
        })
    }

    /// 事件接收端
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.evt_rx.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // 状态机
    // ========================================================================

    /// 打开并开始播放；已在播放时先停止
    pub fn play(&mut self, descriptor: &str) -> Result<(), EngineError> {
        self.stop();

        let source = match self.opener.open(descriptor) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Failed to open {}: {}", descriptor, e);
                self.emit(EngineEvent::Error(format!("Failed to open source: {}", e)));
                return Err(e.into());
            }
        };

        let format = source.format().unwrap_or(self.config.default_format);
        // 裸 PCM 没有时长信息，但已知字节数时可按格式换算
        let known = source
            .duration()
            .or_else(|| source.byte_len().map(|len| format.duration_of(len)));
        let (duration, duration_estimated) = match known {
            Some(d) => (d, false),
            None => (self.config.default_duration(), true),
        };

        let slot_len = match self.config.slot_len_for(&format) {
            Ok(len) => len,
            Err(e) => {
                log::warn!("Cannot play {}: {}", descriptor, e);
                self.emit(EngineEvent::Error(e.to_string()));
                return Err(e.into());
            }
        };

        {
            let mut st = self.shared.lock_state();
            st.invalidate_slots();
            st.format = format;
            st.duration = duration;
            st.slot_len = slot_len;
            st.position_base = Duration::ZERO;
            st.position_bytes = 0;
            st.descriptor = Some(descriptor.to_owned());
        }
        for index in 0..self.shared.slot_count() {
            self.shared.lock_slot(index).set_len(slot_len);
        }
        self.source = Some(source);
        self.fill_slot = 0;
        self.prefill();

        if let Err(e) = self.device.start(format) {
            log::warn!("Failed to start output: {}", e);
            self.reset_to_idle();
            self.emit(EngineEvent::Error(format!("Audio output error: {}", e)));
            return Err(e.into());
        }
        self.device.set_volume(self.volume);

        {
            let mut st = self.shared.lock_state();
            st.playing = true;
            st.paused = false;
        }

        log::debug!(
            "Playing {} ({} Hz, {} ch, {:?}{})",
            descriptor,
            format.sample_rate,
            format.channels,
            duration,
            if duration_estimated { ", estimated" } else { "" }
        );

        self.emit(EngineEvent::TrackInfo(TrackInfo {
            descriptor: descriptor.to_owned(),
            format,
            duration,
            duration_estimated,
        }));
        self.emit(EngineEvent::StateChanged(PlaybackState::Playing));
        Ok(())
    }

    /// 停止播放并关闭字节源；重复调用无副作用
    pub fn stop(&mut self) {
        if self.source.is_none() {
            return;
        }
        self.reset_to_idle();
        log::debug!("Playback stopped");
        self.emit(EngineEvent::StateChanged(PlaybackState::Idle));
    }

    pub fn pause(&mut self) {
        {
            let mut st = self.shared.lock_state();
            if !st.playing || st.paused {
                return;
            }
            st.paused = true;
        }
        if let Err(e) = self.device.pause() {
            log::warn!("Failed to pause output: {}", e);
        }
        self.emit(EngineEvent::StateChanged(PlaybackState::Paused));
    }

    pub fn resume(&mut self) {
        {
            let mut st = self.shared.lock_state();
            if !st.playing || !st.paused {
                return;
            }
            st.paused = false;
        }
        if let Err(e) = self.device.resume() {
            log::warn!("Failed to resume output: {}", e);
        }
        self.emit(EngineEvent::StateChanged(PlaybackState::Playing));
    }

    /// 设置音量，超出 0..=100 的值被截断
    pub fn set_volume(&mut self, volume: i32) {
        self.volume = volume.clamp(0, 100) as u8;
        if self.source.is_some() {
            self.device.set_volume(self.volume);
        }
    }

    /// 跳转到指定位置，目标被限制在 `[0, duration]`
    ///
    /// 源支持定位时重新填充缓冲槽；否则只更新报告的位置。
    pub fn seek(&mut self, target: Duration) {
        let (target, format) = {
            let st = self.shared.lock_state();
            if !st.playing {
                return;
            }
            (target.min(st.duration), st.format)
        };

        let repositioned = match self.source.as_mut() {
            Some(source) => match source.seek_to_byte(format.offset_of(target)) {
                Ok(moved) => moved,
                Err(e) => {
                    log::warn!("Seek failed: {}", e);
                    false
                }
            },
            None => false,
        };

        {
            let mut st = self.shared.lock_state();
            st.position_base = target;
            st.position_bytes = 0;
            if repositioned {
                st.invalidate_slots();
            }
        }

        if repositioned {
            for index in 0..self.shared.slot_count() {
                self.shared.lock_slot(index).reset_fill();
            }
            self.fill_slot = 0;
            self.prefill();
        }

        log::debug!("Seek to {:?} (repositioned: {})", target, repositioned);
    }

    /// 每帧调用一次：填充未就绪的槽，检测播放结束
    pub fn update(&mut self) {
        if self.source.is_none() {
            return;
        }

        let mut finished = {
            let st = self.shared.lock_state();
            !st.playing || (st.source_exhausted && !st.any_ready())
        };

        if !finished {
            for _ in 0..self.shared.slot_count() {
                if !self.fill_next() {
                    break;
                }
            }
            let st = self.shared.lock_state();
            finished = st.source_exhausted && !st.any_ready();
        }

        if finished {
            log::debug!("Track finished");
            self.reset_to_idle();
            self.emit(EngineEvent::TrackEnded);
            self.emit(EngineEvent::StateChanged(PlaybackState::Idle));
        }
    }

    /// 处理一条命令，`Shutdown` 时返回 false
    pub fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Play(descriptor) => {
                // 失败已通过事件上报
                let _ = self.play(&descriptor);
            }
            EngineCommand::Pause => self.pause(),
            EngineCommand::Resume => self.resume(),
            EngineCommand::Stop => self.stop(),
            EngineCommand::Seek(pos) => self.seek(pos),
            EngineCommand::SetVolume(vol) => self.set_volume(vol),
            EngineCommand::Shutdown => return false,
        }
        true
    }

    /// 主循环：处理命令并按 `tick` 间隔调用 `update`
    ///
    /// 每次 `update` 之后调用 `on_tick`，返回 false 时退出。
    pub fn run<F>(&mut self, cmd_rx: &Receiver<EngineCommand>, tick: Duration, mut on_tick: F)
    where
        F: FnMut(&Engine) -> bool,
    {
        loop {
            loop {
                match cmd_rx.try_recv() {
                    Ok(cmd) => {
                        if !self.handle_command(cmd) {
                            return;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }

            self.update();
            if !on_tick(self) {
                return;
            }

            // 避免 CPU 空转
            thread::sleep(tick);
        }
    }

    // ========================================================================
    // 查询
    // ========================================================================

    pub fn state(&self) -> PlaybackState {
        let st = self.shared.lock_state();
        match (st.playing, st.paused) {
            (true, true) => PlaybackState::Paused,
            (true, false) => PlaybackState::Playing,
            _ => PlaybackState::Idle,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock_state().playing
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock_state().paused
    }

    pub fn position(&self) -> Duration {
        self.shared.lock_state().position()
    }

    /// 总时长，空闲时为 0
    pub fn duration(&self) -> Duration {
        self.shared.lock_state().duration
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn current_descriptor(&self) -> Option<String> {
        self.shared.lock_state().descriptor.clone()
    }

    pub fn stats(&self) -> EngineStats {
        let st = self.shared.lock_state();
        EngineStats {
            underruns: st.underruns,
            ready_slots: st.ready.iter().filter(|&&r| r).count(),
            current_slot: st.current_slot,
        }
    }

    // ========================================================================
    // 生产者
    // ========================================================================

    fn prefill(&mut self) {
        for _ in 0..self.shared.slot_count() {
            if !self.fill_next() {
                break;
            }
        }
    }

    /// 按消费顺序填充下一个槽，填满并置为就绪时返回 true
    fn fill_next(&mut self) -> bool {
        let index = self.fill_slot;
        let silence = {
            let st = self.shared.lock_state();
            if st.ready[index] || st.source_exhausted {
                return false;
            }
            // 8 位 PCM 为无符号，静音是 0x80
            if st.format.bits_per_sample == 8 {
                0x80
            } else {
                0
            }
        };

        let Some(source) = self.source.as_mut() else {
            return false;
        };

        // 读源时不持有状态锁；未就绪的槽不会被消费者访问
        let outcome = {
            let mut slot = self.shared.lock_slot(index);
            fill_from(source.as_mut(), &mut slot, silence)
        };

        let mut st = self.shared.lock_state();
        match outcome {
            FillOutcome::Full => {
                st.ready[index] = true;
                self.fill_slot = (index + 1) % st.ready.len();
                true
            }
            FillOutcome::Pending => false,
            FillOutcome::Ended { had_data } => {
                if had_data {
                    st.ready[index] = true;
                    self.fill_slot = (index + 1) % st.ready.len();
                }
                st.source_exhausted = true;
                log::debug!("Source exhausted");
                false
            }
        }
    }

    /// 回到空闲：先在锁内翻转全部标志，再在锁外停止设备、关闭源
    fn reset_to_idle(&mut self) {
        {
            let mut st = self.shared.lock_state();
            st.playing = false;
            st.paused = false;
            st.position_base = Duration::ZERO;
            st.position_bytes = 0;
            st.duration = Duration::ZERO;
            st.descriptor = None;
            st.invalidate_slots();
            for index in 0..self.shared.slot_count() {
                self.shared.lock_slot(index).clear();
            }
        }

        self.device.stop();
        self.source = None;
        self.fill_slot = 0;
    }

    fn emit(&self, event: EngineEvent) {
        if self.evt_tx.try_send(event).is_err() {
            log::trace!("Event queue full, dropping event");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn fill_from(source: &mut dyn ByteSource, slot: &mut BufferSlot, silence: u8) -> FillOutcome {
    // 已填满但未就绪说明上一轮已消费完
    if slot.is_full() {
        slot.reset_fill();
    }

    while !slot.is_full() {
        match source.read(slot.unfilled()) {
            Ok(0) => {
                let had_data = slot.fill_position() > 0;
                if had_data {
                    slot.pad_with_silence(silence);
                }
                return FillOutcome::Ended { had_data };
            }
            Ok(n) => slot.advance_fill(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return FillOutcome::Pending,
            Err(e) => {
                log::warn!("Source read failed: {}", e);
                return FillOutcome::Pending;
            }
        }
    }
    FillOutcome::Full
}
