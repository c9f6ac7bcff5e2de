// 数据流传输引擎 - multipart/mixed 帧格式
//
// 帧格式：
//
// ```text
// \r\n--<boundary>\r\n
// Content-Type: application/octet-stream\r\n
// Content-Disposition: attachment; filename="<name>"\r\n
// X-Part-Name: "<name>"\r\n
// \r\n
// <raw bytes>
// ... (更多部分)
// \r\n--<boundary>--\r\n
// ```
//
// `MultipartDecoder` 是对应的增量解码器，供下载客户端使用。

use crate::error::TransportError;
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// 固定的分隔符
pub const BOUNDARY: &str = "DATA_STREAMER_BOUNDARY";

/// 单条目响应的Content-Type
pub const OCTET_STREAM: &str = "application/octet-stream";

/// 部分名称头
pub const PART_NAME_HEADER: &str = "X-Part-Name";

/// 部分头部块的最大长度
const MAX_HEADER_BLOCK: usize = 8192;

/// multipart响应的Content-Type
pub fn content_type() -> String {
    format!("multipart/mixed; boundary={}", BOUNDARY)
}

/// Content-Disposition头的值
pub fn content_disposition(name: &str) -> String {
    format!("attachment; filename=\"{}\"", name)
}

/// 检查名称能否放进带引号的部分头部
///
/// 控制字符（包括CR/LF）会破坏帧结构，双引号会截断带引号的值，二者都拒绝。
pub fn validate_part_name(name: &str) -> Result<(), TransportError> {
    if name.chars().any(|c| c.is_control() || c == '"') {
        return Err(TransportError::InvalidHeader(name.escape_debug().to_string()));
    }
    Ok(())
}

/// 部分的前导：分隔符加部分头部
///
/// 名称须先通过 `validate_part_name`。
pub fn part_preamble(name: &str) -> Bytes {
    Bytes::from(format!(
        "\r\n--{boundary}\r\n\
         Content-Type: {OCTET_STREAM}\r\n\
         Content-Disposition: {disposition}\r\n\
         {PART_NAME_HEADER}: \"{name}\"\r\n\r\n",
        boundary = BOUNDARY,
        disposition = content_disposition(name),
    ))
}

/// 结束分隔符
pub fn closing_delimiter() -> Bytes {
    Bytes::from(format!("\r\n--{}--\r\n", BOUNDARY))
}

/// 从Content-Disposition值中提取文件名
pub fn disposition_filename(value: &str) -> Option<&str> {
    let start = value.find("filename=")? + "filename=".len();
    let rest = &value[start..];
    let name = match rest.strip_prefix('"') {
        Some(quoted) => &quoted[..quoted.find('"')?],
        None => rest.split(';').next()?.trim(),
    };
    (!name.is_empty()).then_some(name)
}

/// 解码错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultipartError {
    #[error("Malformed part delimiter")]
    MalformedDelimiter,

    #[error("Part headers too large")]
    HeadersTooLarge,

    #[error("Part has no name")]
    MissingPartName,

    #[error("Stream ended before closing delimiter")]
    Truncated,
}

/// 解码事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartEvent {
    /// 新部分开始
    PartStart { name: String },
    /// 当前部分的数据
    Data(Bytes),
    /// 遇到结束分隔符
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Preamble,
    AfterDelimiter,
    Headers,
    Body,
    Done,
}

/// multipart/mixed 增量解码器
///
/// 可以按任意边界喂入字节；只保留足以识别跨边界分隔符的尾部数据。
#[derive(Debug)]
pub struct MultipartDecoder {
    delimiter: Vec<u8>,
    buf: BytesMut,
    state: DecoderState,
}

impl MultipartDecoder {
    pub fn new(boundary: &str) -> Self {
        Self {
            delimiter: format!("\r\n--{}", boundary).into_bytes(),
            buf: BytesMut::new(),
            state: DecoderState::Preamble,
        }
    }

    /// 从Content-Type中解析boundary并创建解码器
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let start = content_type.find("boundary=")? + "boundary=".len();
        let boundary = content_type[start..]
            .split(';')
            .next()?
            .trim()
            .trim_matches('"');
        (!boundary.is_empty()).then(|| Self::new(boundary))
    }

    /// 是否已遇到结束分隔符
    pub fn is_done(&self) -> bool {
        self.state == DecoderState::Done
    }

    /// 喂入数据，返回解码出的事件
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<MultipartEvent>, MultipartError> {
        let mut events = Vec::new();
        if self.state == DecoderState::Done {
            return Ok(events);
        }
        self.buf.extend_from_slice(data);

        loop {
            match self.state {
                DecoderState::Preamble => match find(&self.buf, &self.delimiter) {
                    Some(pos) => {
                        self.buf.advance(pos + self.delimiter.len());
                        self.state = DecoderState::AfterDelimiter;
                    }
                    None => {
                        let keep = self.delimiter.len() - 1;
                        if self.buf.len() > keep {
                            let discard = self.buf.len() - keep;
                            self.buf.advance(discard);
                        }
                        return Ok(events);
                    }
                },
                DecoderState::AfterDelimiter => {
                    if self.buf.len() < 2 {
                        return Ok(events);
                    }
                    if self.buf.starts_with(b"--") {
                        self.buf.clear();
                        self.state = DecoderState::Done;
                        events.push(MultipartEvent::End);
                        return Ok(events);
                    }
                    if !self.buf.starts_with(b"\r\n") {
                        return Err(MultipartError::MalformedDelimiter);
                    }
                    self.buf.advance(2);
                    self.state = DecoderState::Headers;
                }
                DecoderState::Headers => {
                    if self.buf.starts_with(b"\r\n") {
                        return Err(MultipartError::MissingPartName);
                    }
                    let Some(end) = find(&self.buf, b"\r\n\r\n") else {
                        if self.buf.len() > MAX_HEADER_BLOCK {
                            return Err(MultipartError::HeadersTooLarge);
                        }
                        return Ok(events);
                    };
                    let block = self.buf.split_to(end + 4);
                    let name = part_name(&String::from_utf8_lossy(&block[..end]))
                        .ok_or(MultipartError::MissingPartName)?;
                    events.push(MultipartEvent::PartStart { name });
                    self.state = DecoderState::Body;
                }
                DecoderState::Body => match find(&self.buf, &self.delimiter) {
                    Some(pos) => {
                        if pos > 0 {
                            events.push(MultipartEvent::Data(self.buf.split_to(pos).freeze()));
                        }
                        self.buf.advance(self.delimiter.len());
                        self.state = DecoderState::AfterDelimiter;
                    }
                    None => {
                        let keep = self.delimiter.len() - 1;
                        if self.buf.len() > keep {
                            let safe = self.buf.len() - keep;
                            events.push(MultipartEvent::Data(self.buf.split_to(safe).freeze()));
                        }
                        return Ok(events);
                    }
                },
                DecoderState::Done => return Ok(events),
            }
        }
    }

    /// 输入结束时检查是否已完整解码
    pub fn finish(&self) -> Result<(), MultipartError> {
        if self.is_done() {
            Ok(())
        } else {
            Err(MultipartError::Truncated)
        }
    }
}

/// 从部分头部块中提取名称：优先X-Part-Name，其次Content-Disposition的filename
fn part_name(headers: &str) -> Option<String> {
    let mut disposition = None;
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if key.trim().eq_ignore_ascii_case(PART_NAME_HEADER) {
            let name = value.trim_matches('"');
            if !name.is_empty() {
                return Some(name.to_string());
            }
        } else if key.trim().eq_ignore_ascii_case("content-disposition") {
            disposition = disposition_filename(value).map(str::to_string);
        }
    }
    disposition
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
