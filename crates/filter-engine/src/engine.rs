//! 过滤树求值引擎
//!
//! 直接解释过滤树，对单条记录给出布尔结果。分组短路求值；
//! 单条规则的异常（未知操作符、处理函数失败）只记录告警并按 false 处理，
//! 不会中断整棵树的求值。

use crate::evaluator::ConditionEvaluator;
use crate::models::{Combinator, FilterAst, FilterGroup, FilterNode, FilterRule};
use crate::operators::Operator;
use filter_shared::observability::metrics::record_evaluation_anomaly;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// 自定义操作符：(字段值, 规则值) -> 是否匹配
pub type OperatorFn = Arc<dyn Fn(Option<&Value>, &Value) -> anyhow::Result<bool> + Send + Sync>;

/// 自定义字段提取：记录 -> 字段值
pub type ExtractorFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// 求值配置：自定义操作符和字段提取函数
#[derive(Clone, Default)]
pub struct EvaluationConfig {
    operators: HashMap<String, OperatorFn>,
    extractors: HashMap<String, ExtractorFn>,
}

impl EvaluationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册自定义操作符，同名时覆盖内置操作符
    pub fn with_operator<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<&Value>, &Value) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.operators.insert(name.into(), Arc::new(handler));
        self
    }

    /// 为字段注册自定义提取函数，替代默认的点号路径访问
    pub fn with_extractor<F>(mut self, field: impl Into<String>, extractor: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.extractors.insert(field.into(), Arc::new(extractor));
        self
    }

    fn resolve(&self, op: &str) -> Option<ResolvedOperator<'_>> {
        if let Some(handler) = self.operators.get(op) {
            return Some(ResolvedOperator::Custom(handler));
        }
        op.parse().ok().map(ResolvedOperator::Builtin)
    }
}

impl fmt::Debug for EvaluationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationConfig")
            .field("operators", &self.operators.keys().collect::<Vec<_>>())
            .field("extractors", &self.extractors.keys().collect::<Vec<_>>())
            .finish()
    }
}

enum ResolvedOperator<'a> {
    Custom(&'a OperatorFn),
    Builtin(Operator),
}

/// 按点号路径读取嵌套字段（支持数组下标，如 "items.0.name"）
pub fn get_path<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(item, |current, part| match current {
        Value::Object(map) => map.get(part),
        Value::Array(arr) => part.parse::<usize>().ok().and_then(|i| arr.get(i)),
        _ => None,
    })
}

/// 对单条记录求值任意节点
pub fn evaluate(item: &Value, node: &FilterNode, config: &EvaluationConfig) -> bool {
    match node {
        FilterNode::Rule(rule) => evaluate_rule(item, rule, config),
        FilterNode::Group(group) => evaluate_group(item, group, config),
    }
}

/// 对单条记录求值整棵树
pub fn evaluate_ast(item: &Value, ast: &FilterAst, config: &EvaluationConfig) -> bool {
    evaluate_group(item, ast, config)
}

/// 评估分组节点（短路求值），空分组恒为 true
fn evaluate_group(item: &Value, group: &FilterGroup, config: &EvaluationConfig) -> bool {
    if group.children.is_empty() {
        return true;
    }

    match &group.combinator {
        // AND: 遇到 false 立即返回
        Combinator::And => group
            .children
            .iter()
            .all(|child| evaluate(item, child, config)),
        // OR: 遇到 true 立即返回
        Combinator::Or => group
            .children
            .iter()
            .any(|child| evaluate(item, child, config)),
        Combinator::Other(name) => {
            warn!(group_id = %group.id, combinator = %name, "未知的组合方式，按不匹配处理");
            record_evaluation_anomaly("unknown_combinator");
            false
        }
    }
}

/// 评估规则节点
fn evaluate_rule(item: &Value, rule: &FilterRule, config: &EvaluationConfig) -> bool {
    let field_value: Option<Cow<'_, Value>> = match config.extractors.get(&rule.field) {
        Some(extractor) => extractor(item).map(Cow::Owned),
        None => get_path(item, &rule.field).map(Cow::Borrowed),
    };
    let field_value = field_value.as_deref();

    // 规则值为空时只判断字段是否存在，优先于操作符表
    if rule.value.is_null() {
        let absent = field_value.is_none_or(Value::is_null);
        return if rule.op == Operator::Eq.as_str() {
            absent
        } else {
            !absent
        };
    }

    match config.resolve(&rule.op) {
        Some(ResolvedOperator::Builtin(op)) => {
            ConditionEvaluator::evaluate(field_value, op, &rule.value)
        }
        Some(ResolvedOperator::Custom(handler)) => match handler(field_value, &rule.value) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(
                    rule_id = %rule.id,
                    op = %rule.op,
                    error = %e,
                    "操作符执行失败，按不匹配处理"
                );
                record_evaluation_anomaly("operator_failed");
                false
            }
        },
        None => {
            warn!(rule_id = %rule.id, op = %rule.op, "未知的操作符，按不匹配处理");
            record_evaluation_anomaly("unknown_operator");
            false
        }
    }
}

/// 过滤求值器
///
/// 持有求值配置，对内存中的记录集合进行本地过滤。
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    config: EvaluationConfig,
}

impl Evaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn evaluate(&self, item: &Value, node: &FilterNode) -> bool {
        evaluate(item, node, &self.config)
    }

    pub fn matches(&self, item: &Value, ast: &FilterAst) -> bool {
        evaluate_ast(item, ast, &self.config)
    }

    /// 返回匹配记录组成的新集合，输入集合不变
    pub fn filter(&self, items: &[Value], ast: &FilterAst) -> Vec<Value> {
        items
            .iter()
            .filter(|item| self.matches(item, ast))
            .cloned()
            .collect()
    }

    pub fn count(&self, items: &[Value], ast: &FilterAst) -> usize {
        items.iter().filter(|item| self.matches(item, ast)).count()
    }
}
