//! 结果缓存中间件
//!
//! 以过滤树的 JSON 序列化作为缓存键。命中时直接返回，不调度下游；
//! 未命中时调度下游并在成功后写入缓存，错误不缓存。

use super::{ExecutionContext, Middleware, Next};
use crate::error::PipelineResult;
use crate::models::FilterAst;
use async_trait::async_trait;
use dashmap::DashMap;
use filter_shared::config::CacheConfig;
use filter_shared::observability::metrics::record_cache_lookup;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 缓存存储，由调用方提供，需支持并发读写
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<Value>>;

    fn insert(&self, key: String, value: Vec<Value>);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<Value>,
    inserted_at: Instant,
}

/// 进程内缓存默认最多保留的结果条数
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// 进程内缓存，可选过期时间
///
/// 条目数有上限：写入新键且已满时先清理过期条目，仍满则淘汰最早写入的条目。
/// 并发写入时上限是近似的。
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Option<Duration>,
    max_entries: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: None,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl MemoryCache {
    /// 永不过期的缓存
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    /// 设置条目上限，至少为 1
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.inserted_at.elapsed() >= ttl)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// 清理全部过期条目，返回清理数量
    pub fn purge_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_expired(entry));
        before.saturating_sub(self.entries.len())
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<Value>> {
        if let Some(entry) = self.entries.get(key) {
            if !self.is_expired(&entry) {
                return Some(entry.value.clone());
            }
        }

        // 读锁释放后再清理过期条目
        self.entries
            .remove_if(key, |_, entry| self.is_expired(entry));
        None
    }

    fn insert(&self, key: String, value: Vec<Value>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            let purged = self.purge_expired();
            let evicted = self.entries.len() >= self.max_entries;
            if evicted {
                self.evict_oldest();
            }
            debug!(purged, evicted, max_entries = self.max_entries, "缓存已满");
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }
}

/// 缓存中间件
#[derive(Clone)]
pub struct CacheMiddleware {
    store: Arc<dyn CacheStore>,
}

impl CacheMiddleware {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// 使用进程内缓存，`ttl` 为 `None` 时永不过期
    pub fn in_memory(ttl: Option<Duration>) -> Self {
        let cache = match ttl {
            Some(ttl) => MemoryCache::with_ttl(ttl),
            None => MemoryCache::new(),
        };
        Self::new(Arc::new(cache))
    }

    /// 按配置创建进程内缓存
    pub fn from_config(config: &CacheConfig) -> Self {
        let cache = match config.ttl() {
            Some(ttl) => MemoryCache::with_ttl(ttl),
            None => MemoryCache::new(),
        };
        Self::new(Arc::new(cache.max_entries(config.max_entries)))
    }

    /// 缓存键：过滤树的稳定 JSON 序列化
    pub fn cache_key(ast: &FilterAst) -> serde_json::Result<String> {
        serde_json::to_string(ast)
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        "cache"
    }

    async fn handle(
        &self,
        ast: &FilterAst,
        ctx: &ExecutionContext,
        next: &Next<'_>,
    ) -> PipelineResult<Vec<Value>> {
        let key = match Self::cache_key(ast) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "无法生成缓存键，跳过缓存");
                return next.run(ast, ctx).await;
            }
        };

        if let Some(cached) = self.store.get(&key) {
            record_cache_lookup(true);
            debug!(request_id = %ctx.request_id, results = cached.len(), "缓存命中");
            return Ok(cached);
        }
        record_cache_lookup(false);

        let items = next.run(ast, ctx).await?;
        self.store.insert(key, items.clone());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleDraft;
    use crate::pipeline::{MockExecutor, Pipeline};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ast_with_rule() -> FilterAst {
        FilterAst::default()
            .with_child(RuleDraft::new("style", "eq", "select").value("IPA").into_rule())
    }

    #[tokio::test]
    async fn test_identical_trees_hit_cache() {
        let mut terminal = MockExecutor::new();
        terminal
            .expect_execute()
            .times(1)
            .returning(|_, _| Ok(vec![json!({ "style": "IPA" })]));

        let pipeline = Pipeline::builder()
            .middleware(CacheMiddleware::in_memory(None))
            .terminal(terminal)
            .build()
            .unwrap();

        let ast = ast_with_rule();
        let first = pipeline.execute(&ast).await.unwrap();
        let second = pipeline.execute(&ast.clone()).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_different_trees_miss() {
        let mut terminal = MockExecutor::new();
        terminal.expect_execute().times(2).returning(|_, _| Ok(vec![]));

        let pipeline = Pipeline::builder()
            .middleware(CacheMiddleware::in_memory(None))
            .terminal(terminal)
            .build()
            .unwrap();

        pipeline.execute(&ast_with_rule()).await.unwrap();
        pipeline.execute(&ast_with_rule()).await.unwrap();
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut terminal = MockExecutor::new();
        terminal.expect_execute().times(2).returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow::anyhow!("transient").into())
            } else {
                Ok(vec![json!(1)])
            }
        });

        let pipeline = Pipeline::builder()
            .middleware(CacheMiddleware::in_memory(None))
            .terminal(terminal)
            .build()
            .unwrap();

        let ast = ast_with_rule();
        assert!(pipeline.execute(&ast).await.is_err());
        assert_eq!(pipeline.execute(&ast).await.unwrap(), vec![json!(1)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_memory_cache_ttl() {
        let cache = MemoryCache::with_ttl(Duration::ZERO);
        cache.insert("k".to_string(), vec![json!(1)]);

        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());

        let cache = MemoryCache::new();
        cache.insert("k".to_string(), vec![json!(1)]);
        assert_eq!(cache.get("k"), Some(vec![json!(1)]));
        cache.invalidate("k");
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_full_cache_evicts_oldest_entry() {
        let cache = MemoryCache::new().max_entries(2);
        cache.insert("a".to_string(), vec![json!("a")]);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b".to_string(), vec![json!("b")]);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c".to_string(), vec![json!("c")]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some(vec![json!("b")]));
        assert_eq!(cache.get("c"), Some(vec![json!("c")]));

        // 覆盖已有键不触发淘汰
        cache.insert("b".to_string(), vec![json!("b2")]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("c"), Some(vec![json!("c")]));
    }

    #[test]
    fn test_full_cache_sweeps_expired_entries_first() {
        let cache = MemoryCache::with_ttl(Duration::ZERO).max_entries(2);
        cache.insert("a".to_string(), vec![json!(1)]);
        cache.insert("b".to_string(), vec![json!(2)]);
        assert_eq!(cache.len(), 2);

        cache.insert("c".to_string(), vec![json!(3)]);
        assert_eq!(cache.len(), 1);

        let cache = MemoryCache::with_ttl(Duration::ZERO);
        for key in ["x", "y", "z"] {
            cache.insert(key.to_string(), vec![]);
        }
        assert_eq!(cache.purge_expired(), 3);
        assert!(cache.is_empty());
        assert_eq!(MemoryCache::new().purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_from_config_bounds_entries() {
        let config = CacheConfig {
            enabled: true,
            ttl_secs: 0,
            max_entries: 1,
        };
        let mut terminal = MockExecutor::new();
        terminal.expect_execute().times(3).returning(|_, _| Ok(vec![]));

        let pipeline = Pipeline::builder()
            .middleware(CacheMiddleware::from_config(&config))
            .terminal(terminal)
            .build()
            .unwrap();

        let first = ast_with_rule();
        let second = ast_with_rule();
        pipeline.execute(&first).await.unwrap();
        pipeline.execute(&second).await.unwrap();
        // first 已被 second 挤出
        pipeline.execute(&first).await.unwrap();
    }

    #[tokio::test]
    async fn test_caller_supplied_store_is_shared() {
        let store = Arc::new(MemoryCache::new());
        let mut terminal = MockExecutor::new();
        terminal.expect_execute().times(1).returning(|_, _| Ok(vec![json!(1)]));

        let pipeline = Pipeline::builder()
            .middleware(CacheMiddleware::new(store.clone()))
            .terminal(terminal)
            .build()
            .unwrap();

        pipeline.execute(&ast_with_rule()).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
