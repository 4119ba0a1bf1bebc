//! 过滤树领域模型

use crate::operators::{component, Operator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// 生成全局唯一的节点 ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// 组件类型对应的规则默认值：多选为空数组，其余为 null
pub fn default_value(component: &str) -> Value {
    if component == component::MULTISELECT {
        Value::Array(Vec::new())
    } else {
        Value::Null
    }
}

/// 过滤树根节点（总是一个分组）
pub type FilterAst = FilterGroup;

/// 过滤树节点（规则或分组）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterNode {
    Rule(FilterRule),
    Group(FilterGroup),
}

impl FilterNode {
    pub fn id(&self) -> &str {
        match self {
            Self::Rule(rule) => &rule.id,
            Self::Group(group) => &group.id,
        }
    }

    pub fn as_node_ref(&self) -> NodeRef<'_> {
        match self {
            Self::Rule(rule) => NodeRef::Rule(rule),
            Self::Group(group) => NodeRef::Group(group),
        }
    }
}

impl From<FilterRule> for FilterNode {
    fn from(rule: FilterRule) -> Self {
        Self::Rule(rule)
    }
}

impl From<FilterGroup> for FilterNode {
    fn from(group: FilterGroup) -> Self {
        Self::Group(group)
    }
}

/// 节点的只读引用，根分组也能以此形式返回
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeRef<'a> {
    Rule(&'a FilterRule),
    Group(&'a FilterGroup),
}

impl<'a> NodeRef<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            Self::Rule(rule) => &rule.id,
            Self::Group(group) => &group.id,
        }
    }

    pub fn as_rule(&self) -> Option<&'a FilterRule> {
        match self {
            Self::Rule(rule) => Some(rule),
            Self::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&'a FilterGroup> {
        match self {
            Self::Group(group) => Some(group),
            Self::Rule(_) => None,
        }
    }

    pub fn to_node(&self) -> FilterNode {
        match self {
            Self::Rule(rule) => FilterNode::Rule((*rule).clone()),
            Self::Group(group) => FilterNode::Group((*group).clone()),
        }
    }
}

/// 规则节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredRule")]
pub struct FilterRule {
    pub id: String,
    /// 点号分隔的字段路径，如 "tags.primary"
    pub field: String,
    pub op: String,
    pub value: Value,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

/// 分组组合方式
///
/// 未识别的组合方式原样保留，求值时按 false 处理。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Combinator {
    #[default]
    And,
    Or,
    Other(String),
}

impl From<String> for Combinator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "and" => Self::And,
            "or" => Self::Or,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for Combinator {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<Combinator> for String {
    fn from(c: Combinator) -> Self {
        match c {
            Combinator::And => "and".to_string(),
            Combinator::Or => "or".to_string(),
            Combinator::Other(s) => s,
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str("and"),
            Self::Or => f.write_str("or"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// 分组节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub id: String,
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default)]
    pub children: Vec<FilterNode>,
}

impl FilterGroup {
    pub fn new(combinator: Combinator) -> Self {
        Self {
            id: new_id(),
            combinator,
            children: Vec::new(),
        }
    }

    pub fn and() -> Self {
        Self::new(Combinator::And)
    }

    pub fn or() -> Self {
        Self::new(Combinator::Or)
    }

    pub fn with_child(mut self, child: impl Into<FilterNode>) -> Self {
        self.children.push(child.into());
        self
    }
}

impl Default for FilterGroup {
    fn default() -> Self {
        Self::and()
    }
}

// ==================== 插入草稿 ====================

/// 不带 ID 的规则，插入时由存储分配 ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RuleRepr")]
pub struct RuleDraft {
    pub field: String,
    pub op: String,
    pub value: Value,
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

/// 规则的线上形态：缺省 value 按组件补默认值，显式 null 保留
#[derive(Deserialize)]
struct RuleRepr {
    field: String,
    op: String,
    #[serde(default, deserialize_with = "present_value")]
    value: Option<Value>,
    component: String,
    #[serde(default)]
    meta: Option<Map<String, Value>>,
}

impl From<RuleRepr> for RuleDraft {
    fn from(repr: RuleRepr) -> Self {
        let value = repr
            .value
            .unwrap_or_else(|| default_value(&repr.component));
        Self {
            field: repr.field,
            op: repr.op,
            value,
            component: repr.component,
            meta: repr.meta,
        }
    }
}

#[derive(Deserialize)]
struct StoredRule {
    id: String,
    #[serde(flatten)]
    draft: RuleDraft,
}

impl From<StoredRule> for FilterRule {
    fn from(stored: StoredRule) -> Self {
        let RuleDraft {
            field,
            op,
            value,
            component,
            meta,
        } = stored.draft;
        Self {
            id: stored.id,
            field,
            op,
            value,
            component,
            meta,
        }
    }
}

impl RuleDraft {
    /// 以组件默认值创建规则草稿
    pub fn new(
        field: impl Into<String>,
        op: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        let component = component.into();
        Self {
            field: field.into(),
            op: op.into(),
            value: default_value(&component),
            component,
            meta: None,
        }
    }

    /// 使用内置操作符创建
    pub fn with_operator(
        field: impl Into<String>,
        op: Operator,
        component: impl Into<String>,
    ) -> Self {
        Self::new(field, op.as_str(), component)
    }

    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }

    pub fn meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn into_rule(self) -> FilterRule {
        FilterRule {
            id: new_id(),
            field: self.field,
            op: self.op,
            value: self.value,
            component: self.component,
            meta: self.meta,
        }
    }
}

/// 不带 ID 的分组，子节点同样是草稿
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupDraft {
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default)]
    pub children: Vec<NodeDraft>,
}

impl GroupDraft {
    pub fn new(combinator: Combinator) -> Self {
        Self {
            combinator,
            children: Vec::new(),
        }
    }

    pub fn child(mut self, child: impl Into<NodeDraft>) -> Self {
        self.children.push(child.into());
        self
    }

    /// 递归为整棵子树分配新 ID
    pub fn into_group(self) -> FilterGroup {
        FilterGroup {
            id: new_id(),
            combinator: self.combinator,
            children: self.children.into_iter().map(NodeDraft::into_node).collect(),
        }
    }
}

/// 节点草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDraft {
    Rule(RuleDraft),
    Group(GroupDraft),
}

impl NodeDraft {
    pub fn into_node(self) -> FilterNode {
        match self {
            Self::Rule(draft) => FilterNode::Rule(draft.into_rule()),
            Self::Group(draft) => FilterNode::Group(draft.into_group()),
        }
    }
}

impl From<RuleDraft> for NodeDraft {
    fn from(draft: RuleDraft) -> Self {
        Self::Rule(draft)
    }
}

impl From<GroupDraft> for NodeDraft {
    fn from(draft: GroupDraft) -> Self {
        Self::Group(draft)
    }
}

// ==================== 局部更新 ====================

/// 规则局部更新，ID 不可修改
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePatch {
    pub field: Option<String>,
    pub op: Option<String>,
    /// 显式的 null 也是一次更新，只有缺省才表示不修改
    #[serde(deserialize_with = "present_value")]
    pub value: Option<Value>,
    pub component: Option<String>,
    pub meta: Option<Map<String, Value>>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RulePatch {
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn apply(&self, rule: &mut FilterRule) {
        if let Some(field) = &self.field {
            rule.field = field.clone();
        }
        if let Some(op) = &self.op {
            rule.op = op.clone();
        }
        if let Some(value) = &self.value {
            rule.value = value.clone();
        }
        if let Some(component) = &self.component {
            rule.component = component.clone();
        }
        if let Some(meta) = &self.meta {
            rule.meta = Some(meta.clone());
        }
    }
}

/// 分组局部更新，ID 和子节点只能通过增删操作改变
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupPatch {
    pub combinator: Option<Combinator>,
}

impl GroupPatch {
    pub fn combinator(mut self, combinator: impl Into<Combinator>) -> Self {
        self.combinator = Some(combinator.into());
        self
    }

    pub fn apply(&self, group: &mut FilterGroup) {
        if let Some(combinator) = &self.combinator {
            group.combinator = combinator.clone();
        }
    }
}
