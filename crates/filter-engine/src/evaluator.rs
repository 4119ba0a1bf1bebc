//! 条件评估器
//!
//! 实现内置操作符的比较语义。字段值为 `None` 表示记录中不存在该字段。

use crate::operators::Operator;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::cmp::Ordering;

/// 内置条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估内置操作符
    ///
    /// # Arguments
    /// * `field_value` - 从记录中提取的字段值
    /// * `operator` - 操作符
    /// * `expected_value` - 规则中定义的期望值
    pub fn evaluate(field_value: Option<&Value>, operator: Operator, expected_value: &Value) -> bool {
        match operator {
            Operator::Eq => Self::eq(field_value, expected_value),
            Operator::Ne => !Self::eq(field_value, expected_value),
            Operator::Contains => Self::contains(field_value, expected_value),
            Operator::Lt => Self::compare(field_value, expected_value, Ordering::is_lt),
            Operator::Lte => Self::compare(field_value, expected_value, Ordering::is_le),
            Operator::Gt => Self::compare(field_value, expected_value, Ordering::is_gt),
            Operator::Gte => Self::compare(field_value, expected_value, Ordering::is_ge),
            Operator::In => Self::in_list(field_value, expected_value),
            Operator::Nin => Self::not_in_list(field_value, expected_value),
        }
    }

    /// 严格相等，不做跨类型转换
    fn eq(field: Option<&Value>, expected: &Value) -> bool {
        match field {
            Some(field) => Self::strict_eq(field, expected),
            None => false,
        }
    }

    /// 数值按值比较（100 == 100.0），其余类型按结构比较
    pub fn strict_eq(left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => a == b,
            },
            _ => left == right,
        }
    }

    /// 大小写不敏感的子串匹配，两侧都必须是字符串
    fn contains(field: Option<&Value>, expected: &Value) -> bool {
        match (field, expected) {
            (Some(Value::String(haystack)), Value::String(needle)) => haystack
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => false,
        }
    }

    /// 有序比较，类型不可比时返回 false
    fn compare(field: Option<&Value>, expected: &Value, accept: fn(Ordering) -> bool) -> bool {
        field
            .and_then(|field| Self::ordering(field, expected))
            .is_some_and(accept)
    }

    fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => {
                match (Self::parse_datetime(a), Self::parse_datetime(b)) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => Some(a.cmp(b)),
                }
            }
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// 解析 RFC 3339 时间或纯日期
    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }

        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// 字段值是规则数组中的一员
    fn in_list(field: Option<&Value>, expected: &Value) -> bool {
        match (field, expected) {
            (Some(field), Value::Array(items)) => {
                items.iter().any(|item| Self::strict_eq(field, item))
            }
            _ => false,
        }
    }

    /// 规则值不是数组时默认成立
    fn not_in_list(field: Option<&Value>, expected: &Value) -> bool {
        match expected {
            Value::Array(items) => match field {
                Some(field) => !items.iter().any(|item| Self::strict_eq(field, item)),
                None => true,
            },
            _ => true,
        }
    }
}
