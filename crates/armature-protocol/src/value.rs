//! 参数/结果值模型
//!
//! 命令的参数和结果统一使用 [`Value`] 表示。每个值带有一个可比较的
//! 类型标签 [`ValueType`]，命令在注册时记录参数原型（一组 `ValueType`），
//! 调用时只需比较标签即可完成 `BadInput` 检查，无需运行时类型反射。

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// 值类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    Void = 0,
    Bool = 1,
    Int = 2,
    UInt = 3,
    Double = 4,
    Text = 5,
    Vector = 6,
    Bytes = 7,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Void => "void",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::UInt => "uint",
            ValueType::Double => "double",
            ValueType::Text => "text",
            ValueType::Vector => "vector",
            ValueType::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// 带类型标签的值
///
/// `Vector` 为双精度向量，覆盖关节位置、位姿等常见的机器人状态量。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Void,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
    Vector(Vec<f64>),
    Bytes(Vec<u8>),
}

impl Value {
    /// 获取值的类型标签
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Void => ValueType::Void,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::UInt(_) => ValueType::UInt,
            Value::Double(_) => ValueType::Double,
            Value::Text(_) => ValueType::Text,
            Value::Vector(_) => ValueType::Vector,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    /// 创建指定类型的默认值（用作原型）
    pub fn default_of(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Void => Value::Void,
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::UInt => Value::UInt(0),
            ValueType::Double => Value::Double(0.0),
            ValueType::Text => Value::Text(String::new()),
            ValueType::Vector => Value::Vector(Vec::new()),
            ValueType::Bytes => Value::Bytes(Vec::new()),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// 转换为具体类型（类型不匹配时返回 `None`）
    pub fn into_kind<T: ValueKind>(self) -> Option<T> {
        T::from_value(self)
    }
}

/// 可以装入 [`Value`] 的具体类型
///
/// 类型化的注册接口（如 `add_command_write::<f64, _>`）通过 `TYPE`
/// 在注册时一次性确定参数原型。
pub trait ValueKind: Sized + Send + 'static {
    /// 对应的类型标签
    const TYPE: ValueType;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_value_kind {
    ($ty:ty, $tag:ident) => {
        impl ValueKind for $ty {
            const TYPE: ValueType = ValueType::$tag;

            #[inline]
            fn into_value(self) -> Value {
                Value::$tag(self)
            }

            #[inline]
            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$tag(v) => Some(v),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$tag(v)
            }
        }
    };
}

impl_value_kind!(bool, Bool);
impl_value_kind!(i64, Int);
impl_value_kind!(u64, UInt);
impl_value_kind!(f64, Double);
impl_value_kind!(String, Text);
impl_value_kind!(Vec<f64>, Vector);
impl_value_kind!(Vec<u8>, Bytes);

impl ValueKind for () {
    const TYPE: ValueType = ValueType::Void;

    fn into_value(self) -> Value {
        Value::Void
    }

    fn from_value(value: Value) -> Option<Self> {
        value.is_void().then_some(())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// 命令签名：参数原型 + 可选结果类型
///
/// 参数槽位最多 2 个。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    args: SmallVec<[ValueType; 2]>,
    result: Option<ValueType>,
}

impl Signature {
    /// 最大参数个数
    pub const MAX_ARGS: usize = 2;

    /// 创建签名
    ///
    /// # 错误
    /// - `ProtocolError::TooManyArguments`: 参数个数超过 2
    pub fn new(args: &[ValueType], result: Option<ValueType>) -> Result<Self, ProtocolError> {
        if args.len() > Self::MAX_ARGS {
            return Err(ProtocolError::TooManyArguments(args.len()));
        }
        Ok(Self {
            args: args.iter().copied().collect(),
            result,
        })
    }

    /// 无参数、无结果
    pub fn void() -> Self {
        Self::default()
    }

    /// 单参数、无结果
    pub fn write(arg: ValueType) -> Self {
        Self {
            args: smallvec::smallvec![arg],
            result: None,
        }
    }

    /// 无参数、有结果
    pub fn read(result: ValueType) -> Self {
        Self {
            args: SmallVec::new(),
            result: Some(result),
        }
    }

    /// 单参数、有结果
    pub fn qualified(arg: ValueType, result: ValueType) -> Self {
        Self {
            args: smallvec::smallvec![arg],
            result: Some(result),
        }
    }

    pub fn args(&self) -> &[ValueType] {
        &self.args
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn result(&self) -> Option<ValueType> {
        self.result
    }

    /// 检查实参是否与参数原型一致（个数和类型标签）
    pub fn accepts(&self, args: &[Value]) -> bool {
        self.args.len() == args.len()
            && self.args.iter().zip(args).all(|(expected, actual)| *expected == actual.value_type())
    }

    /// 检查返回值是否与结果原型一致
    pub fn accepts_result(&self, value: &Value) -> bool {
        match self.result {
            Some(expected) => expected == value.value_type(),
            None => value.is_void(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")?;
        if let Some(result) = self.result {
            write!(f, " -> {}", result)?;
        }
        Ok(())
    }
}
