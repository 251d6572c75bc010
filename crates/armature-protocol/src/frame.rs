//! 帧编解码
//!
//! 帧头 8 字节 + bincode 负载：
//!
//! ```text
//! byte 0      : 消息类型（0x01 请求 / 0x02 通知 / 0x81 响应）
//! byte 1      : 协议版本
//! byte 2..=3  : 负载长度（u16，小端）
//! byte 4..=7  : 序列号（u32，小端），响应回显请求的序列号
//! ```

use crate::error::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// 帧头长度（字节）
pub const FRAME_HEADER_LEN: usize = 8;

/// 当前协议版本
pub const PROTOCOL_VERSION: u8 = 1;

/// 单帧最大负载（受 UDP 数据报大小限制）
pub const MAX_PAYLOAD_LEN: usize = 65_507 - FRAME_HEADER_LEN;

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    /// 需要响应的请求
    Request = 0x01,
    /// 单向请求（接收方不回复）
    Notify = 0x02,
    Response = 0x81,
}

impl MessageType {
    /// 接收方是否需要回复
    pub fn expects_reply(self) -> bool {
        matches!(self, MessageType::Request)
    }
}

/// 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub version: u8,
    pub length: u16,
    pub sequence: u32,
}

impl FrameHeader {
    pub fn new(message_type: MessageType, length: u16, sequence: u32) -> Self {
        Self {
            message_type,
            version: PROTOCOL_VERSION,
            length,
            sequence,
        }
    }

    /// 编码帧头到缓冲区
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[0] = self.message_type.into();
        buf[1] = self.version;
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf
    }

    /// 从缓冲区解码帧头
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(ProtocolError::TooShort {
                expected: FRAME_HEADER_LEN,
                actual: buf.len(),
            });
        }

        let message_type =
            MessageType::try_from(buf[0]).map_err(|_| ProtocolError::InvalidMessageType(buf[0]))?;
        let version = buf[1];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        Ok(Self {
            message_type,
            version,
            length: u16::from_le_bytes([buf[2], buf[3]]),
            sequence: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

/// 编码一帧
///
/// # 错误
/// - `ProtocolError::Codec`: 负载序列化失败
/// - `ProtocolError::PayloadTooLarge`: 负载超过单帧上限
pub fn encode_frame<T: Serialize>(
    message_type: MessageType,
    sequence: u32,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let body = bincode::serialize(payload)?;
    if body.len() > MAX_PAYLOAD_LEN || body.len() > u16::MAX as usize {
        return Err(ProtocolError::PayloadTooLarge(body.len()));
    }

    let header = FrameHeader::new(message_type, body.len() as u16, sequence);
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// 解码一帧
///
/// 负载长度必须与帧头声明一致。
pub fn decode_frame<T: DeserializeOwned>(buf: &[u8]) -> Result<(FrameHeader, T), ProtocolError> {
    let header = FrameHeader::decode(buf)?;
    let body = &buf[FRAME_HEADER_LEN..];
    if body.len() != header.length as usize {
        return Err(ProtocolError::LengthMismatch {
            declared: header.length as usize,
            actual: body.len(),
        });
    }

    let payload = bincode::deserialize(body)?;
    Ok((header, payload))
}
