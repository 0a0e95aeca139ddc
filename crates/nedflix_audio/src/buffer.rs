//! 双缓冲槽与消费端
//!
//! 槽的就绪标志、游标和播放标志统一放在 `StreamState` 互斥锁中，
//! 只在翻转标志时短暂持有；槽内数据各自一把锁，由就绪标志划分归属：
//! 未就绪的槽只有生产者访问，就绪的槽只有消费者读取。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::PcmFormat;

/// 缓冲槽数据
pub(crate) struct BufferSlot {
    data: Box<[u8]>,
    /// 本曲目使用的长度（按帧对齐，不超过容量）
    len: usize,
    /// 填充游标，源暂时无数据时跨多次 `update` 保留
    fill_position: usize,
}

impl BufferSlot {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
            len: size,
            fill_position: 0,
        }
    }

    pub fn fill_position(&self) -> usize {
        self.fill_position
    }

    /// 设置使用长度并清空填充游标
    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
        self.fill_position = 0;
    }

    /// 待填充的剩余空间
    pub(crate) fn unfilled(&mut self) -> &mut [u8] {
        &mut self.data[self.fill_position..self.len]
    }

    pub(crate) fn advance_fill(&mut self, n: usize) {
        self.fill_position = (self.fill_position + n).min(self.len);
    }

    pub(crate) fn is_full(&self) -> bool {
        self.fill_position == self.len
    }

    /// 流结束时用静音补齐
    pub(crate) fn pad_with_silence(&mut self, silence: u8) {
        self.data[self.fill_position..self.len].fill(silence);
        self.fill_position = self.len;
    }

    pub(crate) fn clear(&mut self) {
        self.data.fill(0);
        self.fill_position = 0;
    }

    pub(crate) fn reset_fill(&mut self) {
        self.fill_position = 0;
    }
}

/// 锁内共享状态
#[derive(Debug)]
pub(crate) struct StreamState {
    pub playing: bool,
    pub paused: bool,
    pub ready: Vec<bool>,
    /// 每个槽的可读长度，始终是整帧
    pub slot_len: usize,
    /// 正在被消费的槽
    pub current_slot: usize,
    /// 当前槽内的读取游标
    pub drain_cursor: usize,
    pub format: PcmFormat,
    pub duration: Duration,
    /// 最近一次 seek 的位置
    pub position_base: Duration,
    /// 自 `position_base` 起已输出的字节数
    pub position_bytes: u64,
    /// 源已读到结尾
    pub source_exhausted: bool,
    /// `play`/`stop`/`seek` 时递增，作废进行中的读取
    pub generation: u64,
    pub underruns: u64,
    pub descriptor: Option<String>,
}

impl StreamState {
    fn new(slot_count: usize, slot_len: usize, format: PcmFormat) -> Self {
        Self {
            playing: false,
            paused: false,
            ready: vec![false; slot_count],
            slot_len,
            current_slot: 0,
            drain_cursor: 0,
            format,
            duration: Duration::ZERO,
            position_base: Duration::ZERO,
            position_bytes: 0,
            source_exhausted: false,
            generation: 0,
            underruns: 0,
            descriptor: None,
        }
    }

    /// 当前位置，始终落在 `[0, duration]` 内
    pub fn position(&self) -> Duration {
        (self.position_base + self.format.duration_of(self.position_bytes)).min(self.duration)
    }

    pub fn any_ready(&self) -> bool {
        self.ready.iter().any(|&r| r)
    }

    /// 所有槽置为未就绪，游标归零
    pub fn invalidate_slots(&mut self) {
        self.ready.fill(false);
        self.current_slot = 0;
        self.drain_cursor = 0;
        self.source_exhausted = false;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// 生产者与消费者共享的缓冲区
pub(crate) struct SharedStream {
    state: Mutex<StreamState>,
    slots: Box<[Mutex<BufferSlot>]>,
}

impl SharedStream {
    pub fn new(slot_count: usize, slot_size: usize, format: PcmFormat) -> Self {
        let slots = (0..slot_count)
            .map(|_| Mutex::new(BufferSlot::new(slot_size)))
            .collect();
        Self {
            state: Mutex::new(StreamState::new(slot_count, slot_size, format)),
            slots,
        }
    }

    // 回调线程 panic 不应拖垮主循环，中毒的锁直接接管
    pub fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lock_slot(&self, index: usize) -> MutexGuard<'_, BufferSlot> {
        self.slots[index]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

/// 消费端句柄，交给输出设备回调使用
///
/// 每个引擎只有一个消费端，因此不实现 `Clone`。
pub struct StreamConsumer {
    shared: Arc<SharedStream>,
}

impl StreamConsumer {
    pub(crate) fn new(shared: Arc<SharedStream>) -> Self {
        Self { shared }
    }

    /// 从当前槽读出最多 `out.len()` 字节，返回实际字节数
    ///
    /// 未播放、暂停或当前槽未就绪（欠载）时返回 0，调用方输出静音。
    /// 一次调用不会跨槽；读到槽尾时切换到下一个槽。
    pub fn read_into(&self, out: &mut [u8]) -> usize {
        let (index, start, len, generation) = {
            let mut st = self.shared.lock_state();
            if !st.playing || st.paused || out.is_empty() {
                return 0;
            }
            let index = st.current_slot;
            if !st.ready[index] {
                st.underruns += 1;
                log::trace!("Underrun on slot {}", index);
                return 0;
            }
            let remaining = st.slot_len - st.drain_cursor;
            (index, st.drain_cursor, out.len().min(remaining), st.generation)
        };

        // 拷贝时不持有状态锁；就绪的槽不会被生产者改写
        {
            let slot = self.shared.lock_slot(index);
            out[..len].copy_from_slice(&slot.data[start..start + len]);
        }

        let mut st = self.shared.lock_state();
        if st.generation != generation {
            // 拷贝期间发生了 stop/seek，数据已过期
            return 0;
        }
        st.drain_cursor += len;
        st.position_bytes += len as u64;
        if st.drain_cursor >= st.slot_len {
            st.ready[index] = false;
            st.current_slot = (index + 1) % st.ready.len();
            st.drain_cursor = 0;

            if st.source_exhausted && !st.any_ready() {
                log::debug!("Last slot drained, playback finished");
                st.playing = false;
                st.paused = false;
            }
        }
        len
    }

    /// 当前 PCM 格式（设备据此换算采样）
    pub fn format(&self) -> PcmFormat {
        self.shared.lock_state().format
    }
}
