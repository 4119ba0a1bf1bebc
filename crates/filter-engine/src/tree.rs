//! 过滤树遍历
//!
//! 所有查找都按先序、从左到右进行，第一个命中的节点胜出。

use crate::models::{FilterGroup, FilterNode, FilterRule, NodeRef};

/// 节点类型过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Rule,
    Group,
}

impl NodeKind {
    fn matches(self, node: &FilterNode) -> bool {
        matches!(
            (self, node),
            (Self::Rule, FilterNode::Rule(_)) | (Self::Group, FilterNode::Group(_))
        )
    }
}

impl FilterGroup {
    /// 先序遍历整棵树（包含自身）
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(NodeRef<'a>)) {
        visit(NodeRef::Group(self));
        for child in &self.children {
            match child {
                FilterNode::Rule(rule) => visit(NodeRef::Rule(rule)),
                FilterNode::Group(group) => group.walk(visit),
            }
        }
    }

    /// 按 ID 查找节点，根分组自身也可命中
    pub fn find(&self, id: &str) -> Option<NodeRef<'_>> {
        if self.id == id {
            return Some(NodeRef::Group(self));
        }

        self.children.iter().find_map(|child| match child {
            FilterNode::Rule(rule) if rule.id == id => Some(NodeRef::Rule(rule)),
            FilterNode::Rule(_) => None,
            FilterNode::Group(group) => group.find(id),
        })
    }

    /// 只匹配分组的查找
    pub fn find_group(&self, id: &str) -> Option<&FilterGroup> {
        self.find(id).and_then(|node| node.as_group())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn find_group_mut(&mut self, id: &str) -> Option<&mut FilterGroup> {
        if self.id == id {
            return Some(self);
        }

        self.children.iter_mut().find_map(|child| match child {
            FilterNode::Group(group) => group.find_group_mut(id),
            FilterNode::Rule(_) => None,
        })
    }

    pub fn find_rule_mut(&mut self, id: &str) -> Option<&mut FilterRule> {
        self.children.iter_mut().find_map(|child| match child {
            FilterNode::Rule(rule) if rule.id == id => Some(rule),
            FilterNode::Rule(_) => None,
            FilterNode::Group(group) => group.find_rule_mut(id),
        })
    }

    /// 从父分组中摘除节点（分组连同整棵子树），返回被摘除的节点
    ///
    /// `kind` 为 `Some` 时只摘除对应类型的节点。根分组自身不会被摘除。
    pub fn remove(&mut self, id: &str, kind: Option<NodeKind>) -> Option<FilterNode> {
        for index in 0..self.children.len() {
            let child = &self.children[index];
            if child.id() == id && kind.is_none_or(|k| k.matches(child)) {
                return Some(self.children.remove(index));
            }

            if let FilterNode::Group(group) = &mut self.children[index] {
                if let Some(removed) = group.remove(id, kind) {
                    return Some(removed);
                }
            }
        }

        None
    }

    /// 先序收集所有规则
    pub fn rules(&self) -> Vec<&FilterRule> {
        let mut rules = Vec::new();
        self.walk(&mut |node| {
            if let NodeRef::Rule(rule) = node {
                rules.push(rule);
            }
        });
        rules
    }

    /// 先序收集所有分组（包含根分组和全部嵌套分组）
    pub fn groups(&self) -> Vec<&FilterGroup> {
        let mut groups = Vec::new();
        self.walk(&mut |node| {
            if let NodeRef::Group(group) = node {
                groups.push(group);
            }
        });
        groups
    }

    /// 树中节点总数（包含自身）
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }
}
