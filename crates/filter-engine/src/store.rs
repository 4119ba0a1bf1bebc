//! 过滤树存储
//!
//! 单一所有者持有一棵过滤树。每次变更都基于当前快照的副本构建新树，
//! 再以一次原子替换发布：读者要么看到变更前的树，要么看到变更后的树。
//! 快照通过 `ArcSwap` 无锁读取，变更通知通过 `watch` channel 推送。

use crate::defaults::FilterConfig;
use crate::error::{FilterError, Result};
use crate::models::{
    FilterAst, FilterGroup, FilterNode, FilterRule, GroupDraft, GroupPatch, NodeRef, RuleDraft,
    RulePatch,
};
use crate::tree::NodeKind;
use arc_swap::ArcSwap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

/// 过滤树存储
pub struct FilterStore {
    /// 当前快照（写端持有，供借用式查询）
    ast: Arc<FilterAst>,
    /// 已发布快照，读端通过 StoreReader 无锁读取
    published: Arc<ArcSwap<FilterAst>>,
    tx: watch::Sender<Arc<FilterAst>>,
    /// 每次发布变更自增
    version: u64,
}

/// 跨线程只读句柄，总是读取最新发布的快照
#[derive(Clone)]
pub struct StoreReader {
    published: Arc<ArcSwap<FilterAst>>,
}

impl StoreReader {
    pub fn load(&self) -> Arc<FilterAst> {
        self.published.load_full()
    }
}

impl FilterStore {
    /// 创建空根分组（组合方式为 and）
    pub fn new() -> Self {
        Self::from_ast(FilterGroup::and())
    }

    /// 从已有的树重建存储，ID、结构和顺序保持不变
    pub fn from_ast(ast: FilterAst) -> Self {
        let ast = Arc::new(ast);
        let (tx, _rx) = watch::channel(ast.clone());
        Self {
            published: Arc::new(ArcSwap::new(ast.clone())),
            ast,
            tx,
            version: 0,
        }
    }

    /// 从 JSON 快照重建存储
    pub fn from_json(json: &str) -> Result<Self> {
        let ast: FilterAst = serde_json::from_str(json)?;
        Ok(Self::from_ast(ast))
    }

    /// 由字段配置合成初始树
    pub fn from_config(config: &FilterConfig) -> Self {
        Self::from_ast(config.initial_state())
    }

    // ==================== 快照与订阅 ====================

    pub fn snapshot(&self) -> Arc<FilterAst> {
        self.ast.clone()
    }

    pub fn reader(&self) -> StoreReader {
        StoreReader {
            published: self.published.clone(),
        }
    }

    /// 订阅变更通知，每次成功改变树之后推送新快照
    pub fn subscribe(&self) -> watch::Receiver<Arc<FilterAst>> {
        self.tx.subscribe()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root(&self) -> &FilterAst {
        &self.ast
    }

    pub fn root_id(&self) -> &str {
        &self.ast.id
    }

    // ==================== 结构变更 ====================

    /// 添加规则，未指定父分组时追加到根分组末尾，返回新规则 ID
    #[instrument(skip(self, draft), fields(field = %draft.field, op = %draft.op))]
    pub fn add_rule(&mut self, draft: RuleDraft, parent_id: Option<&str>) -> Result<String> {
        let rule = draft.into_rule();
        let id = rule.id.clone();
        self.insert(FilterNode::Rule(rule), parent_id)?;

        debug!(rule_id = %id, "规则已添加");
        Ok(id)
    }

    /// 添加分组（连同草稿中的子节点），返回新分组 ID
    #[instrument(skip(self, draft), fields(combinator = %draft.combinator))]
    pub fn add_group(&mut self, draft: GroupDraft, parent_id: Option<&str>) -> Result<String> {
        let group = draft.into_group();
        let id = group.id.clone();
        self.insert(FilterNode::Group(group), parent_id)?;

        debug!(group_id = %id, "分组已添加");
        Ok(id)
    }

    fn insert(&mut self, node: FilterNode, parent_id: Option<&str>) -> Result<()> {
        let parent_id = parent_id.unwrap_or(self.ast.id.as_str()).to_string();
        if self.ast.find_group(&parent_id).is_none() {
            return Err(FilterError::ParentNotFound(parent_id));
        }

        self.mutate(|ast| {
            ast.find_group_mut(&parent_id)
                .map(|parent| parent.children.push(node))
        });
        Ok(())
    }

    /// 合并更新规则；目标不存在或是分组时不做任何事，返回是否命中
    #[instrument(skip(self, patch))]
    pub fn update_rule(&mut self, rule_id: &str, patch: RulePatch) -> bool {
        let Some(current) = self.find_rule(rule_id) else {
            return false;
        };

        let mut updated = current.clone();
        patch.apply(&mut updated);
        if &updated != current {
            self.mutate(|ast| ast.find_rule_mut(rule_id).map(|rule| *rule = updated));
        }
        true
    }

    /// 合并更新分组；目标不存在或是规则时不做任何事，返回是否命中
    #[instrument(skip(self, patch))]
    pub fn update_group(&mut self, group_id: &str, patch: GroupPatch) -> bool {
        let Some(current) = self.ast.find_group(group_id) else {
            return false;
        };

        let changed = patch
            .combinator
            .as_ref()
            .is_some_and(|combinator| *combinator != current.combinator);
        if changed {
            self.mutate(|ast| ast.find_group_mut(group_id).map(|group| patch.apply(group)));
        }
        true
    }

    /// 删除规则，ID 不存在或不是规则时为空操作
    pub fn remove_rule(&mut self, rule_id: &str) -> Option<FilterNode> {
        self.remove(rule_id, Some(NodeKind::Rule))
    }

    /// 删除分组及其整棵子树，ID 不存在或不是分组时为空操作
    pub fn remove_group(&mut self, group_id: &str) -> Option<FilterNode> {
        self.remove(group_id, Some(NodeKind::Group))
    }

    /// 删除任意节点（分组连同子树）
    pub fn remove_node(&mut self, node_id: &str) -> Option<FilterNode> {
        self.remove(node_id, None)
    }

    #[instrument(skip(self))]
    fn remove(&mut self, id: &str, kind: Option<NodeKind>) -> Option<FilterNode> {
        if !self.ast.contains(id) {
            debug!("删除不存在的节点，忽略");
            return None;
        }

        let removed = self.mutate(|ast| ast.remove(id, kind));
        if removed.is_some() {
            debug!("节点已删除");
        }
        removed
    }

    /// 整树替换
    pub fn replace(&mut self, ast: FilterAst) {
        if *self.ast != ast {
            self.commit(ast);
            info!(root_id = %self.ast.id, "过滤树已整体替换");
        }
    }

    /// 清空所有条件，保留根分组 ID 和组合方式
    pub fn reset(&mut self) {
        let mut root = FilterGroup::clone(&self.ast);
        root.children.clear();
        self.replace(root);
    }

    /// 在当前树的副本上执行变更，闭包返回 Some 时才发布新树
    fn mutate<T>(&mut self, f: impl FnOnce(&mut FilterAst) -> Option<T>) -> Option<T> {
        let mut next = FilterGroup::clone(&self.ast);
        let outcome = f(&mut next)?;
        self.commit(next);
        Some(outcome)
    }

    fn commit(&mut self, next: FilterAst) {
        let next = Arc::new(next);
        self.ast = next.clone();
        self.published.store(next.clone());
        self.version += 1;
        self.tx.send_replace(next);
    }

    // ==================== 查询 ====================

    /// 先序深度优先查找，第一个命中的节点胜出
    pub fn get_node(&self, id: &str) -> Option<NodeRef<'_>> {
        self.ast.find(id)
    }

    pub fn get_group(&self, id: &str) -> Option<&FilterGroup> {
        self.ast.find_group(id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.ast.contains(id)
    }

    fn find_rule(&self, id: &str) -> Option<&FilterRule> {
        self.get_node(id).and_then(|node| node.as_rule())
    }

    pub fn get_all_rules(&self) -> Vec<&FilterRule> {
        self.ast.rules()
    }

    /// 所有分组，包含根分组
    pub fn get_all_groups(&self) -> Vec<&FilterGroup> {
        self.ast.groups()
    }

    // ==================== 序列化 ====================

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(&*self.ast)?)
    }
}

impl Default for FilterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FilterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string_pretty(&*self.ast).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl fmt::Debug for FilterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterStore")
            .field("version", &self.version)
            .field("ast", &self.ast)
            .finish()
    }
}
