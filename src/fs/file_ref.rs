//! 文件的内存表示

use alloc::vec::Vec;

/// 块表：下标为逻辑块号，值为当前保存该块的簇号
///
/// 写入超出末尾的下标时自动增长，空洞以 0 填充。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTable {
    clusters: Vec<u16>,
}

impl BlockTable {
    /// 创建空块表
    pub fn new() -> Self {
        Self::default()
    }

    /// 块数
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// 获取逻辑块对应的簇号
    pub fn get(&self, block_id: usize) -> Option<u16> {
        self.clusters.get(block_id).copied()
    }

    /// 设置逻辑块对应的簇号，必要时增长
    pub fn set(&mut self, block_id: usize, cluster_id: u16) {
        if block_id >= self.clusters.len() {
            self.clusters.resize(block_id + 1, 0);
        }
        self.clusters[block_id] = cluster_id;
    }

    /// 截断到 `len` 个块
    pub fn truncate(&mut self, len: usize) {
        self.clusters.truncate(len);
    }

    /// 按逻辑块顺序遍历簇号
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.clusters.iter().copied()
    }
}

/// 内存中的文件
///
/// 跟踪文件总大小、组成文件内容的簇以及当前打开的句柄数。
/// 块 0 是 FileCluster（同时携带文件名、创建时间和文件开头的数据），
/// 之后的块都是 DataCluster。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// 唯一对象 ID
    pub obj_id: u16,
    /// 文件大小（字节）
    pub file_size: u32,
    /// 打开的句柄数
    pub open_count: u16,
    /// 组成文件内容的簇
    pub blocks: BlockTable,
}

impl FileRef {
    /// 创建空文件
    pub fn new(obj_id: u16) -> Self {
        Self {
            obj_id,
            file_size: 0,
            open_count: 0,
            blocks: BlockTable::new(),
        }
    }

    /// 是否有打开的句柄
    pub fn is_open(&self) -> bool {
        self.open_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_table_grows_on_set() {
        let mut table = BlockTable::new();
        table.set(3, 42);
        assert_eq!(table.len(), 4);
        assert_eq!(table.get(3), Some(42));
        assert_eq!(table.get(1), Some(0));
        assert_eq!(table.get(4), None);
    }

    #[test]
    fn test_block_table_truncate() {
        let mut table = BlockTable::new();
        for (i, c) in [10u16, 11, 12, 13].into_iter().enumerate() {
            table.set(i, c);
        }
        table.truncate(2);
        assert_eq!(table.iter().collect::<Vec<_>>(), [10, 11]);
        assert_eq!(table.get(2), None);
    }

    #[test]
    fn test_file_ref_open_state() {
        let mut file = FileRef::new(7);
        assert!(!file.is_open());
        file.open_count += 1;
        assert!(file.is_open());
    }
}
