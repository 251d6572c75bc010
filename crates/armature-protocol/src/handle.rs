//! 远程命令句柄
//!
//! 连接跨越进程边界时，代理通过固定 10 字节的句柄指明对端的命令实例：
//!
//! ```text
//! byte 0      : ' ' (0x20) 前导哨兵
//! byte 1      : 类型标签 V/R/W/Q/r/q
//! byte 2..=9  : 目标命令 ID（u64，小端）
//! ```
//!
//! 句柄只是一个 ID，不携带任何指针；对端通过自己的 ID 表解析命令。

use crate::error::ProtocolError;
use crate::value::Signature;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 句柄长度（字节）
pub const COMMAND_HANDLE_LEN: usize = 10;

/// 前导哨兵
pub const HANDLE_SENTINEL: u8 = b' ';

/// 命令类型（同时作为句柄类型标签）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum CommandKind {
    /// 无参数、无结果（'V'）
    Void = 0x56,
    /// 读取，无参数、有结果，在调用者线程直接执行（'R'）
    Read = 0x52,
    /// 写入，1-2 个参数、无结果（'W'）
    Write = 0x57,
    /// 限定读取，1-2 个参数、有结果，在调用者线程直接执行（'Q'）
    QualifiedRead = 0x51,
    /// 无参数、有结果，排队执行（'r'）
    VoidReturn = 0x72,
    /// 1-2 个参数、有结果，排队执行（'q'）
    WriteReturn = 0x71,
}

impl CommandKind {
    /// 所有类型
    pub const ALL: [CommandKind; 6] = [
        CommandKind::Void,
        CommandKind::Read,
        CommandKind::Write,
        CommandKind::QualifiedRead,
        CommandKind::VoidReturn,
        CommandKind::WriteReturn,
    ];

    /// 类型标签（ASCII）
    pub fn tag(self) -> u8 {
        self.into()
    }

    /// 是否产生结果值
    pub fn has_result(self) -> bool {
        matches!(
            self,
            CommandKind::Read
                | CommandKind::QualifiedRead
                | CommandKind::VoidReturn
                | CommandKind::WriteReturn
        )
    }

    /// 是否只读（在调用者线程直接执行，不进入邮箱）
    pub fn is_read(self) -> bool {
        matches!(self, CommandKind::Read | CommandKind::QualifiedRead)
    }

    /// 检查签名形状是否符合该类型
    pub fn accepts_signature(self, signature: &Signature) -> bool {
        let arity = signature.arity();
        let has_result = signature.result().is_some();
        match self {
            CommandKind::Void => arity == 0 && !has_result,
            CommandKind::Write => (1..=2).contains(&arity) && !has_result,
            CommandKind::Read | CommandKind::VoidReturn => arity == 0 && has_result,
            CommandKind::QualifiedRead | CommandKind::WriteReturn => {
                (1..=2).contains(&arity) && has_result
            },
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag() as char)
    }
}

/// 远程命令句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHandle {
    pub kind: CommandKind,
    pub id: u64,
}

impl CommandHandle {
    pub fn new(kind: CommandKind, id: u64) -> Self {
        Self { kind, id }
    }

    /// 编码为 10 字节记录
    pub fn encode(&self) -> [u8; COMMAND_HANDLE_LEN] {
        let mut buf = [0u8; COMMAND_HANDLE_LEN];
        buf[0] = HANDLE_SENTINEL;
        buf[1] = self.kind.tag();
        buf[2..10].copy_from_slice(&self.id.to_le_bytes());
        buf
    }

    /// 从缓冲区解码
    ///
    /// # 错误
    /// - `ProtocolError::TooShort`: 缓冲区不足 10 字节
    /// - `ProtocolError::InvalidSentinel`: byte 0 不是 `' '`
    /// - `ProtocolError::InvalidTag`: byte 1 不在 6 个合法标签之内
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < COMMAND_HANDLE_LEN {
            return Err(ProtocolError::TooShort {
                expected: COMMAND_HANDLE_LEN,
                actual: buf.len(),
            });
        }
        if buf[0] != HANDLE_SENTINEL {
            return Err(ProtocolError::InvalidSentinel(buf[0]));
        }
        let kind = CommandKind::try_from(buf[1]).map_err(|_| ProtocolError::InvalidTag(buf[1]))?;

        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&buf[2..10]);

        Ok(Self {
            kind,
            id: u64::from_le_bytes(id_bytes),
        })
    }

    /// 检查缓冲区是否为合法句柄（不解析 ID）
    pub fn is_valid(buf: &[u8]) -> bool {
        buf.len() >= COMMAND_HANDLE_LEN
            && buf[0] == HANDLE_SENTINEL
            && CommandKind::try_from(buf[1]).is_ok()
    }
}

impl fmt::Display for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, hex::encode(self.id.to_be_bytes()))
    }
}

// 线上格式即 10 字节记录本身；解码失败的句柄在反序列化阶段即被拒绝
impl Serialize for CommandHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.encode().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CommandHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = <[u8; COMMAND_HANDLE_LEN]>::deserialize(deserializer)?;
        CommandHandle::decode(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;
    use proptest::prelude::*;

    #[test]
    fn test_encode_layout() {
        let handle = CommandHandle::new(CommandKind::Write, 0x0102_0304_0506_0708);
        let buf = handle.encode();
        assert_eq!(buf[0], b' ');
        assert_eq!(buf[1], b'W');
        assert_eq!(&buf[2..], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_tags_are_ascii() {
        let tags: Vec<char> = CommandKind::ALL.iter().map(|k| k.tag() as char).collect();
        assert_eq!(tags, vec!['V', 'R', 'W', 'Q', 'r', 'q']);
    }

    #[test]
    fn test_decode_rejects_bad_sentinel() {
        let mut buf = CommandHandle::new(CommandKind::Void, 7).encode();
        buf[0] = b'_';
        assert!(matches!(
            CommandHandle::decode(&buf),
            Err(ProtocolError::InvalidSentinel(b'_'))
        ));
        assert!(!CommandHandle::is_valid(&buf));
    }

    #[test]
    fn test_decode_rejects_bad_tag() {
        let mut buf = CommandHandle::new(CommandKind::Void, 7).encode();
        buf[1] = b'X';
        assert!(matches!(
            CommandHandle::decode(&buf),
            Err(ProtocolError::InvalidTag(b'X'))
        ));
        assert!(!CommandHandle::is_valid(&buf));
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        assert!(matches!(
            CommandHandle::decode(&[b' ', b'V', 0, 0]),
            Err(ProtocolError::TooShort {
                expected: 10,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_kind_signature_shapes() {
        assert!(CommandKind::Void.accepts_signature(&Signature::void()));
        assert!(CommandKind::Write.accepts_signature(&Signature::write(ValueType::Int)));
        assert!(!CommandKind::Write.accepts_signature(&Signature::void()));
        assert!(CommandKind::Read.accepts_signature(&Signature::read(ValueType::Double)));
        assert!(CommandKind::VoidReturn.accepts_signature(&Signature::read(ValueType::Double)));
        assert!(
            CommandKind::WriteReturn
                .accepts_signature(&Signature::qualified(ValueType::Int, ValueType::Int))
        );
        assert!(!CommandKind::QualifiedRead.accepts_signature(&Signature::write(ValueType::Int)));
    }

    #[test]
    fn test_display() {
        let handle = CommandHandle::new(CommandKind::VoidReturn, 0xFF);
        assert_eq!(format!("{}", handle), "r:00000000000000ff");
    }

    #[test]
    fn test_bincode_uses_fixed_record() {
        let handle = CommandHandle::new(CommandKind::QualifiedRead, 99);
        let bytes = bincode::serialize(&handle).unwrap();
        assert_eq!(bytes.len(), COMMAND_HANDLE_LEN);
        assert_eq!(bytes.as_slice(), &handle.encode());
        let back: CommandHandle = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, handle);
    }

    #[test]
    fn test_bincode_rejects_invalid_record() {
        let mut raw = CommandHandle::new(CommandKind::Read, 1).encode();
        raw[1] = b'Z';
        let result: Result<CommandHandle, _> = bincode::deserialize(&raw);
        assert!(result.is_err());
    }

    fn any_kind() -> impl Strategy<Value = CommandKind> {
        prop::sample::select(CommandKind::ALL.to_vec())
    }

    proptest! {
        /// 所有合法标签和任意 ID 都能往返
        #[test]
        fn handle_roundtrip(kind in any_kind(), id in any::<u64>()) {
            let handle = CommandHandle::new(kind, id);
            let buf = handle.encode();
            prop_assert!(CommandHandle::is_valid(&buf));
            let decoded = CommandHandle::decode(&buf).unwrap();
            prop_assert_eq!(decoded.kind, kind);
            prop_assert_eq!(decoded.id, id);
        }

        /// 非法标签一律拒绝
        #[test]
        fn invalid_tag_rejected(tag in any::<u8>(), id in any::<u64>()) {
            prop_assume!(CommandKind::try_from(tag).is_err());
            let mut buf = CommandHandle::new(CommandKind::Void, id).encode();
            buf[1] = tag;
            prop_assert!(CommandHandle::decode(&buf).is_err());
            prop_assert!(!CommandHandle::is_valid(&buf));
        }

        /// 非法哨兵一律拒绝
        #[test]
        fn invalid_sentinel_rejected(sentinel in any::<u8>(), kind in any_kind()) {
            prop_assume!(sentinel != HANDLE_SENTINEL);
            let mut buf = CommandHandle::new(kind, 1).encode();
            buf[0] = sentinel;
            prop_assert!(CommandHandle::decode(&buf).is_err());
        }
    }
}
