//! 字段配置与默认值
//!
//! 由调用方提供的字段配置推导出规则的默认操作符、允许的操作符和初始过滤树。

use crate::models::{FilterAst, FilterGroup, FilterRule, RuleDraft};
use crate::operators;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// 兜底操作符
pub const FALLBACK_OPERATOR: &str = "eq";

/// 下拉选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    pub label: String,
    pub value: Value,
}

/// 单个可过滤字段的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    pub field: String,
    pub label: String,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FieldOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl FieldConfig {
    pub fn new(
        field: impl Into<String>,
        label: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            label: label.into(),
            component: component.into(),
            operations: None,
            options: None,
            default_op: None,
            meta: None,
        }
    }

    pub fn with_default_op(mut self, op: impl Into<String>) -> Self {
        self.default_op = Some(op.into());
        self
    }

    pub fn with_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operations = Some(operations.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_options(mut self, options: Vec<FieldOption>) -> Self {
        self.options = Some(options);
        self
    }
}

/// 过滤配置：字段列表与按组件类型覆盖的操作符表
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_operations: Option<HashMap<String, Vec<String>>>,
}

/// 校验问题
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// 规则引用了未配置的字段
    UnknownField { rule_id: String, field: String },
    /// 操作符不在该字段允许的范围内
    OperatorNotAllowed {
        rule_id: String,
        field: String,
        op: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownField { rule_id, field } => {
                write!(f, "规则 {} 引用了未配置的字段 {}", rule_id, field)
            }
            Self::OperatorNotAllowed { rule_id, field, op } => {
                write!(f, "规则 {} 的字段 {} 不允许操作符 {}", rule_id, field, op)
            }
        }
    }
}

impl FilterConfig {
    pub fn new(fields: Vec<FieldConfig>) -> Self {
        Self {
            fields,
            default_operations: None,
        }
    }

    pub fn with_default_operations<I, S>(mut self, component: impl Into<String>, ops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_operations
            .get_or_insert_with(HashMap::new)
            .insert(component.into(), ops.into_iter().map(Into::into).collect());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|f| f.field == name)
    }

    fn table_for(&self, component: &str) -> Option<&[String]> {
        self.default_operations
            .as_ref()
            .and_then(|table| table.get(component))
            .map(Vec::as_slice)
    }

    /// 字段默认操作符
    ///
    /// 优先级：字段 `default_op` → 配置表中该组件的第一个 → 内置表第一个 → "eq"
    pub fn default_operator(&self, field: &FieldConfig) -> String {
        if let Some(op) = &field.default_op {
            return op.clone();
        }

        if let Some(op) = self.table_for(&field.component).and_then(|ops| ops.first()) {
            return op.clone();
        }

        operators::default_operations(&field.component)
            .first()
            .map(|op| op.as_str())
            .unwrap_or(FALLBACK_OPERATOR)
            .to_string()
    }

    /// 字段允许的操作符：字段 `operations` → 配置表 → 内置表
    pub fn allowed_operations(&self, field: &FieldConfig) -> Vec<String> {
        if let Some(ops) = &field.operations {
            return ops.clone();
        }

        if let Some(ops) = self.table_for(&field.component) {
            return ops.to_vec();
        }

        operators::default_operations(&field.component)
            .iter()
            .map(|op| op.as_str().to_string())
            .collect()
    }

    /// 字段对应的默认规则
    pub fn default_rule(&self, field: &FieldConfig) -> FilterRule {
        let mut draft = RuleDraft::new(
            field.field.as_str(),
            self.default_operator(field),
            field.component.as_str(),
        );
        if let Some(meta) = &field.meta {
            draft = draft.meta(meta.clone());
        }
        draft.into_rule()
    }

    /// 初始过滤树：and 根分组，按配置顺序每个字段一条默认规则
    pub fn initial_state(&self) -> FilterAst {
        self.fields
            .iter()
            .fold(FilterGroup::and(), |root, field| {
                root.with_child(self.default_rule(field))
            })
    }

    /// 检查树中规则的字段和操作符是否与配置一致
    pub fn validate(&self, ast: &FilterAst) -> Vec<ValidationIssue> {
        ast.rules()
            .into_iter()
            .filter_map(|rule| match self.field(&rule.field) {
                None => Some(ValidationIssue::UnknownField {
                    rule_id: rule.id.clone(),
                    field: rule.field.clone(),
                }),
                Some(field) if !self.allowed_operations(field).contains(&rule.op) => {
                    Some(ValidationIssue::OperatorNotAllowed {
                        rule_id: rule.id.clone(),
                        field: rule.field.clone(),
                        op: rule.op.clone(),
                    })
                }
                Some(_) => None,
            })
            .collect()
    }
}

/// 字段默认操作符
pub fn default_operator(field: &FieldConfig, config: &FilterConfig) -> String {
    config.default_operator(field)
}

/// 字段允许的操作符
pub fn allowed_operations(field: &FieldConfig, config: &FilterConfig) -> Vec<String> {
    config.allowed_operations(field)
}

/// 由配置合成初始过滤树
pub fn initial_state(config: &FilterConfig) -> FilterAst {
    config.initial_state()
}
