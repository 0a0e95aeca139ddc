//! 字节源
//!
//! 引擎从 `ByteSource` 拉取原始 PCM 字节。本地文件与内存缓冲由
//! `PcmStream` 实现；网络传输由宿主实现 `SourceOpener` 接入。

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use crate::{PcmFormat, WavHeader, RIFF_MAGIC};

/// 字节源错误
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid header: {0}")]
    InvalidHeader(&'static str),

    #[error("Unsupported source: {0}")]
    Unsupported(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Connection failed: {0}")]
    Connect(String),
}

/// 原始音频字节源
///
/// `read` 返回 `Ok(0)` 表示流结束；`WouldBlock` 等错误表示暂时无数据。
/// 丢弃即关闭。
pub trait ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 源声明的 PCM 格式
    fn format(&self) -> Option<PcmFormat> {
        None
    }

    /// 源声明的总时长
    fn duration(&self) -> Option<Duration> {
        None
    }

    /// PCM 数据总字节数
    fn byte_len(&self) -> Option<u64> {
        None
    }

    /// 跳到 PCM 数据中的字节偏移；不支持定位时返回 `Ok(false)`
    fn seek_to_byte(&mut self, _offset: u64) -> Result<bool, SourceError> {
        Ok(false)
    }
}

/// 根据描述符（路径或 URL）打开字节源
pub trait SourceOpener {
    fn open(&self, descriptor: &str) -> Result<Box<dyn ByteSource>, SourceError>;
}

impl<F> SourceOpener for F
where
    F: Fn(&str) -> Result<Box<dyn ByteSource>, SourceError>,
{
    fn open(&self, descriptor: &str) -> Result<Box<dyn ByteSource>, SourceError> {
        self(descriptor)
    }
}

/// PCM 数据流（WAV 或裸 PCM）
pub struct PcmStream<R> {
    inner: R,
    format: Option<PcmFormat>,
    duration: Option<Duration>,
    data_offset: u64,
    /// PCM 数据总长，未知为 `None`
    data_len: Option<u64>,
    /// 剩余未读的 PCM 字节
    remaining: Option<u64>,
}

impl<R: Read + Seek> PcmStream<R> {
    /// 解析 WAV 头，流停在 PCM 数据起点
    pub fn open_wav(mut inner: R) -> Result<Self, SourceError> {
        inner.seek(SeekFrom::Start(0))?;
        let header = WavHeader::read_from(&mut inner)?;
        let data_len = header.data_size.map(u64::from);

        log::debug!(
            "WAV source: {} Hz, {} ch, {} bit, {:?} bytes",
            header.format.sample_rate,
            header.format.channels,
            header.format.bits_per_sample,
            data_len
        );

        Ok(Self {
            inner,
            format: Some(header.format),
            duration: header.duration(),
            data_offset: header.data_offset,
            data_len,
            remaining: data_len,
        })
    }

    /// 无头的裸 PCM，格式由调用方给出或使用引擎默认值
    pub fn raw(mut inner: R, format: Option<PcmFormat>) -> Result<Self, SourceError> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            format,
            duration: format.map(|f| f.duration_of(len)),
            data_offset: 0,
            data_len: Some(len),
            remaining: Some(len),
        })
    }

    /// 以 RIFF 魔数判断是否为 WAV
    pub fn sniff(mut inner: R) -> Result<Self, SourceError> {
        let mut magic = [0u8; 4];
        inner.seek(SeekFrom::Start(0))?;
        let is_wav = match inner.read_exact(&mut magic) {
            Ok(()) => magic == RIFF_MAGIC,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(e.into()),
        };

        if is_wav {
            Self::open_wav(inner)
        } else {
            Self::raw(inner, None)
        }
    }
}

impl<R: Read + Seek> ByteSource for PcmStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = match self.remaining {
            Some(0) => return Ok(0),
            Some(remaining) => buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX)),
            None => buf.len(),
        };

        let n = self.inner.read(&mut buf[..limit])?;
        if let Some(remaining) = &mut self.remaining {
            *remaining -= n as u64;
        }
        Ok(n)
    }

    fn format(&self) -> Option<PcmFormat> {
        self.format
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn byte_len(&self) -> Option<u64> {
        self.data_len
    }

    fn seek_to_byte(&mut self, offset: u64) -> Result<bool, SourceError> {
        // 对齐到帧，避免声道错位
        let frame = self.format.map_or(1, |f| f.bytes_per_frame().max(1)) as u64;
        let mut offset = offset - offset % frame;
        if let Some(len) = self.data_len {
            offset = offset.min(len);
        }

        self.inner.seek(SeekFrom::Start(self.data_offset + offset))?;
        self.remaining = self.data_len.map(|len| len - offset);
        Ok(true)
    }
}

/// 本地文件字节源
pub type FileSource = PcmStream<File>;

/// 内存字节源（例如 HTTP 响应体）
pub type MemorySource = PcmStream<io::Cursor<Vec<u8>>>;

impl FileSource {
    pub fn open_path(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        let is_raw = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "pcm" | "raw"));

        if is_raw {
            return Self::raw(file, None);
        }

        let stream = Self::sniff(file)?;
        if stream.format.is_none() {
            // 不解码压缩格式
            let ext = path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("")
                .to_owned();
            return Err(SourceError::Unsupported(format!("container .{}", ext)));
        }
        Ok(stream)
    }
}

impl MemorySource {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, SourceError> {
        Self::sniff(io::Cursor::new(bytes))
    }
}

/// 打开本地路径与 `file://` URL
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOpener;

impl SourceOpener for FileOpener {
    fn open(&self, descriptor: &str) -> Result<Box<dyn ByteSource>, SourceError> {
        let path = match descriptor.split_once("://") {
            Some(("file", rest)) => rest,
            Some((scheme, _)) => return Err(SourceError::UnsupportedScheme(scheme.to_owned())),
            None => descriptor,
        };
        Ok(Box::new(FileSource::open_path(Path::new(path))?))
    }
}
