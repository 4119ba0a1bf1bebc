//! 操作符与组件常量定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 内置条件操作符
///
/// 规则上的 `op` 是开放字符串，调用方可以注册任意自定义操作符；
/// 这里只枚举引擎自带的那一组。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    // 通用比较
    Eq,
    Ne,

    // 有序比较
    Lt,
    Lte,
    Gt,
    Gte,

    // 包含检查
    Contains,
    In,
    Nin,
}

impl Operator {
    pub const ALL: [Operator; 9] = [
        Self::Eq,
        Self::Ne,
        Self::Lt,
        Self::Lte,
        Self::Gt,
        Self::Gte,
        Self::Contains,
        Self::In,
        Self::Nin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Contains => "contains",
            Self::In => "in",
            Self::Nin => "nin",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知的内置操作符名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperator(pub String);

impl fmt::Display for UnknownOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown operator: {}", self.0)
    }
}

impl std::error::Error for UnknownOperator {}

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperator(s.to_string()))
    }
}

/// 内置字段组件类型
pub mod component {
    pub const TEXT: &str = "text";
    pub const NUMBER: &str = "number";
    pub const DATE: &str = "date";
    pub const DATETIME: &str = "datetime";
    pub const SELECT: &str = "select";
    pub const MULTISELECT: &str = "multiselect";
    pub const BOOLEAN: &str = "boolean";
}

/// 组件类型的内置默认操作符集合，首个元素即默认操作符
pub fn default_operations(component: &str) -> &'static [Operator] {
    use Operator::*;

    match component {
        component::TEXT => &[Eq, Contains, Ne],
        component::NUMBER | component::DATE | component::DATETIME => {
            &[Eq, Ne, Lt, Gt, Lte, Gte]
        }
        component::SELECT | component::BOOLEAN => &[Eq, Ne],
        component::MULTISELECT => &[In, Nin],
        _ => &[],
    }
}
