//! 执行结果码
//!
//! 所有 Command/Function 调用返回扁平的 [`ExecutionResult`]，
//! 不在接口边界上抛出 panic 或错误链。

use crate::value::{Value, ValueKind};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 执行结果码
///
/// `CommandQueued` 不是失败：表示调用已被接受，结果稍后产生。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum ExecutionResult {
    Ok = 0,
    NotOk = 1,
    BadCommand = 2,
    NoMailbox = 3,
    BadInput = 4,
    NoInterface = 5,
    MailboxFull = 6,
    Disabled = 7,
    CommandFailed = 8,
    FunctionNotBound = 9,
    CommandQueued = 10,
    /// 阻塞等待超时（调用可能仍在对端执行）
    TimedOut = 11,
    /// 传输层故障
    NetworkError = 12,
}

impl ExecutionResult {
    pub fn is_ok(self) -> bool {
        self == ExecutionResult::Ok
    }

    /// 调用已被接受（立即成功或已入队）
    pub fn is_accepted(self) -> bool {
        matches!(self, ExecutionResult::Ok | ExecutionResult::CommandQueued)
    }

    pub fn is_queued(self) -> bool {
        self == ExecutionResult::CommandQueued
    }

    /// 静态描述
    pub fn description(self) -> &'static str {
        match self {
            ExecutionResult::Ok => "command succeeded",
            ExecutionResult::NotOk => "command reported not ok",
            ExecutionResult::BadCommand => "invalid command",
            ExecutionResult::NoMailbox => "no mailbox",
            ExecutionResult::BadInput => "invalid input type",
            ExecutionResult::NoInterface => "no such interface",
            ExecutionResult::MailboxFull => "mailbox full",
            ExecutionResult::Disabled => "command disabled",
            ExecutionResult::CommandFailed => "command failed",
            ExecutionResult::FunctionNotBound => "function not bound",
            ExecutionResult::CommandQueued => "command queued",
            ExecutionResult::TimedOut => "timed out waiting for completion",
            ExecutionResult::NetworkError => "network error",
        }
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// 一次调用的结果：结果码 + 可选输出值（查询类命令的出参）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub code: ExecutionResult,
    pub value: Option<Value>,
}

impl Outcome {
    /// 成功，无输出值
    #[inline]
    pub fn ok() -> Self {
        Self {
            code: ExecutionResult::Ok,
            value: None,
        }
    }

    /// 成功，带输出值
    #[inline]
    pub fn ok_with(value: Value) -> Self {
        Self {
            code: ExecutionResult::Ok,
            value: Some(value),
        }
    }

    /// 仅结果码
    #[inline]
    pub fn code(code: ExecutionResult) -> Self {
        Self { code, value: None }
    }

    #[inline]
    pub fn queued() -> Self {
        Self::code(ExecutionResult::CommandQueued)
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// 取出输出值；结果码非 `Ok` 时返回该结果码
    pub fn into_value(self) -> Result<Value, ExecutionResult> {
        match self.code {
            ExecutionResult::Ok => Ok(self.value.unwrap_or_default()),
            code => Err(code),
        }
    }

    /// 取出类型化输出值；类型不匹配时返回 `BadInput`
    pub fn into_kind<T: ValueKind>(self) -> Result<T, ExecutionResult> {
        self.into_value()
            .and_then(|v| T::from_value(v).ok_or(ExecutionResult::BadInput))
    }
}

impl From<ExecutionResult> for Outcome {
    fn from(code: ExecutionResult) -> Self {
        Outcome::code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_u8_conversion() {
        let raw: u8 = ExecutionResult::CommandQueued.into();
        assert_eq!(raw, 10);
        assert_eq!(
            ExecutionResult::try_from(6u8).unwrap(),
            ExecutionResult::MailboxFull
        );
        assert!(ExecutionResult::try_from(200u8).is_err());
    }

    #[test]
    fn test_queued_is_accepted_not_ok() {
        let r = ExecutionResult::CommandQueued;
        assert!(r.is_accepted());
        assert!(!r.is_ok());
        assert!(r.is_queued());
        assert!(!ExecutionResult::MailboxFull.is_accepted());
    }

    #[test]
    fn test_outcome_into_kind() {
        let out = Outcome::ok_with(Value::Double(2.5));
        assert_eq!(out.into_kind::<f64>(), Ok(2.5));

        let out = Outcome::ok_with(Value::Int(1));
        assert_eq!(out.into_kind::<f64>(), Err(ExecutionResult::BadInput));

        let out = Outcome::code(ExecutionResult::Disabled);
        assert_eq!(out.into_value(), Err(ExecutionResult::Disabled));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ExecutionResult::MailboxFull), "mailbox full");
    }
}
