//! RIFF/WAVE 头解析

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

use crate::{PcmFormat, SourceError};

pub const RIFF_MAGIC: [u8; 4] = *b"RIFF";
pub const WAVE_MAGIC: [u8; 4] = *b"WAVE";

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// 流式写出的 WAV 在 data 大小处填 0xFFFFFFFF
const UNKNOWN_DATA_SIZE: u32 = u32::MAX;

/// 解析后的 WAV 头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format: PcmFormat,
    /// PCM 数据字节数，未知为 `None`
    pub data_size: Option<u32>,
    /// PCM 数据在文件中的起始偏移
    pub data_offset: u64,
}

impl WavHeader {
    /// 读取 RIFF 头并遍历 chunk，返回时 reader 停在 PCM 数据起点
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, SourceError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != RIFF_MAGIC {
            return Err(SourceError::InvalidHeader("missing RIFF magic"));
        }
        let _riff_size = r.read_u32::<LittleEndian>()?;
        r.read_exact(&mut magic)?;
        if magic != WAVE_MAGIC {
            return Err(SourceError::InvalidHeader("missing WAVE magic"));
        }

        let mut offset: u64 = 12;
        let mut format = None;

        loop {
            let mut id = [0u8; 4];
            match r.read_exact(&mut id) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(SourceError::InvalidHeader("no data chunk"));
                }
                Err(e) => return Err(e.into()),
            }
            let size = r.read_u32::<LittleEndian>()?;
            offset += 8;

            match &id {
                b"fmt " => {
                    if size < 16 {
                        return Err(SourceError::InvalidHeader("fmt chunk too short"));
                    }
                    let audio_format = r.read_u16::<LittleEndian>()?;
                    let channels = r.read_u16::<LittleEndian>()?;
                    let sample_rate = r.read_u32::<LittleEndian>()?;
                    let _byte_rate = r.read_u32::<LittleEndian>()?;
                    let _block_align = r.read_u16::<LittleEndian>()?;
                    let bits_per_sample = r.read_u16::<LittleEndian>()?;
                    skip(r, u64::from(size - 16) + u64::from(size & 1))?;
                    offset += u64::from(size) + u64::from(size & 1);

                    if audio_format != WAVE_FORMAT_PCM && audio_format != WAVE_FORMAT_EXTENSIBLE {
                        return Err(SourceError::Unsupported(format!(
                            "WAV encoding 0x{:04x}",
                            audio_format
                        )));
                    }
                    format = Some(PcmFormat::new(sample_rate, channels, bits_per_sample));
                }
                b"data" => {
                    let format =
                        format.ok_or(SourceError::InvalidHeader("data chunk before fmt chunk"))?;
                    validate(&format)?;
                    return Ok(Self {
                        format,
                        data_size: (size != UNKNOWN_DATA_SIZE).then_some(size),
                        data_offset: offset,
                    });
                }
                _ => {
                    // LIST/fact 等 chunk 直接跳过（奇数长度有 1 字节填充）
                    let padded = u64::from(size) + u64::from(size & 1);
                    skip(r, padded)?;
                    offset += padded;
                }
            }
        }
    }

    /// 按头部信息计算时长
    pub fn duration(&self) -> Option<std::time::Duration> {
        self.data_size
            .map(|size| self.format.duration_of(u64::from(size)))
    }
}

fn validate(format: &PcmFormat) -> Result<(), SourceError> {
    if format.sample_rate == 0 || format.channels == 0 {
        return Err(SourceError::InvalidHeader("zero sample rate or channel count"));
    }
    if !matches!(format.bits_per_sample, 8 | 16) {
        return Err(SourceError::Unsupported(format!(
            "{}-bit PCM",
            format.bits_per_sample
        )));
    }
    Ok(())
}

fn skip<R: Read>(r: &mut R, len: u64) -> Result<(), SourceError> {
    let copied = io::copy(&mut r.take(len), &mut io::sink())?;
    if copied < len {
        return Err(SourceError::InvalidHeader("truncated chunk"));
    }
    Ok(())
}

/// 生成标准 44 字节 PCM WAV 头
pub fn encode_wav_header(format: &PcmFormat, data_size: u32) -> Vec<u8> {
    let block_align = format.bytes_per_frame() as u16;
    let mut buf = Vec::with_capacity(44);
    buf.extend_from_slice(&RIFF_MAGIC);
    buf.extend_from_slice(&(36u32.wrapping_add(data_size)).to_le_bytes());
    buf.extend_from_slice(&WAVE_MAGIC);
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
    buf.extend_from_slice(&format.channels.to_le_bytes());
    buf.extend_from_slice(&format.sample_rate.to_le_bytes());
    buf.extend_from_slice(&(format.byte_rate() as u32).to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&format.bits_per_sample.to_le_bytes());
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    #[test]
    fn test_canonical_header() {
        let format = PcmFormat::new(22050, 1, 16);
        let bytes = encode_wav_header(&format, 44100);
        assert_eq!(bytes.len(), 44);

        let header = WavHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.format, format);
        assert_eq!(header.data_size, Some(44100));
        assert_eq!(header.data_offset, 44);
        assert_eq!(header.duration(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_skips_extra_chunks() {
        let format = PcmFormat::default();
        let canonical = encode_wav_header(&format, 8);
        let mut bytes = canonical[..36].to_vec();
        // 奇数长度的 LIST chunk 带 1 字节填充
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"abc\0");
        bytes.extend_from_slice(&canonical[36..]);
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut cur = Cursor::new(&bytes);
        let header = WavHeader::read_from(&mut cur).unwrap();
        assert_eq!(header.data_offset, 56);
        assert_eq!(cur.position(), 56);
    }

    #[test]
    fn test_streaming_size_is_unknown() {
        let bytes = encode_wav_header(&PcmFormat::default(), u32::MAX);
        let header = WavHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.data_size, None);
        assert_eq!(header.duration(), None);
    }

    #[test]
    fn test_rejects_bad_headers() {
        let err = WavHeader::read_from(&mut Cursor::new(b"RIFX\0\0\0\0WAVE")).unwrap_err();
        assert!(matches!(err, SourceError::InvalidHeader(_)));

        let mut bytes = encode_wav_header(&PcmFormat::new(44100, 2, 24), 0);
        let err = WavHeader::read_from(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, SourceError::Unsupported(_)));

        // 压缩编码 (0x0055 = MP3)
        bytes = encode_wav_header(&PcmFormat::default(), 0);
        bytes[20] = 0x55;
        let err = WavHeader::read_from(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, SourceError::Unsupported(_)));

        // 截断在 fmt 中
        let good = encode_wav_header(&PcmFormat::default(), 0);
        let err = WavHeader::read_from(&mut Cursor::new(&good[..30])).unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));

        // 没有 data chunk
        let err = WavHeader::read_from(&mut Cursor::new(&good[..36])).unwrap_err();
        assert!(matches!(err, SourceError::InvalidHeader("no data chunk")));
    }
}
