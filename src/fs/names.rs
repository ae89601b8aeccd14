//! 文件名缓存
//!
//! 文件名只保存在每个文件块 0 的 FileCluster 中。按名字查找需要读取
//! 所有文件的块 0 头部，这里用 `lru::LruCache` 缓存 objId -> 文件名，
//! 避免重复读取闪存。

use alloc::string::String;
use core::num::NonZeroUsize;
use lru::LruCache;

/// 文件名缓存
pub struct NameCache {
    cache: LruCache<u16, String>,
}

impl NameCache {
    /// 创建缓存，容量为 0 时按 1 处理
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
        }
    }

    /// 查找文件名（命中时更新 LRU 顺序）
    pub fn get(&mut self, obj_id: u16) -> Option<&String> {
        self.cache.get(&obj_id)
    }

    /// 插入或更新文件名
    pub fn put(&mut self, obj_id: u16, name: String) {
        log::trace!("[NAMES] cache objId={} name={}", obj_id, name);
        self.cache.put(obj_id, name);
    }

    /// 移除文件名
    pub fn invalidate(&mut self, obj_id: u16) {
        self.cache.pop(&obj_id);
    }

    /// 清空缓存
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
