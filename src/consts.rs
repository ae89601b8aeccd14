//! 闪存文件系统常量定义
//!
//! 这个模块包含了磁盘布局相关的所有常量，包括：
//! - 簇标记字节
//! - 簇头部各字段的偏移与长度
//! - 时间戳纪元
//! - 默认配置

//=============================================================================
// 簇标记
//=============================================================================
//
// 每次状态迁移只清除比特位（0xFF -> 0x7F -> 0x3F -> 0x1F -> 0x0F），
// NOR 闪存无需擦除即可按字节编程完成迁移。

/// 已擦除（原始闪存）
pub const MARKER_ERASED: u8 = 0xFF;

/// 已格式化扇区（仅用于扇区第一个簇）
pub const MARKER_FORMATTED_SECTOR: u8 = 0x7F;

/// 已写入数据但尚未提交
pub const MARKER_PENDING: u8 = 0x3F;

/// 已提交的有效数据
pub const MARKER_ALLOCATED: u8 = 0x1F;

/// 已被替代，可回收
pub const MARKER_ORPHANED: u8 = 0x0F;

//=============================================================================
// 簇布局
//=============================================================================

/// 文件名最大字节数（UTF-8）
pub const MAX_FILE_NAME_LENGTH: usize = 16;

/// 公共头部大小：marker(1) + objId(2) + blockId(2) + dataLength(2)
pub const COMMON_HEADER_SIZE: usize = 1 + 2 + 2 + 2;

/// FileCluster 头部大小：公共头部 + 文件名长度(1) + 文件名(16) + 创建时间(8)
pub const FILE_CLUSTER_HEADER_SIZE: usize = COMMON_HEADER_SIZE + 1 + MAX_FILE_NAME_LENGTH + 8;

/// DataCluster 头部大小
pub const DATA_CLUSTER_HEADER_SIZE: usize = COMMON_HEADER_SIZE;

/// 标记字节偏移
pub const MARKER_OFFSET: usize = 0;

/// 对象 ID 偏移
pub const OBJ_ID_OFFSET: usize = 1;

/// 逻辑块号偏移
pub const BLOCK_ID_OFFSET: usize = 3;

/// 有效数据长度偏移
pub const DATA_LENGTH_OFFSET: usize = 5;

/// 文件名长度偏移
pub const FILE_NAME_LENGTH_OFFSET: usize = 7;

/// 文件名偏移
pub const FILE_NAME_OFFSET: usize = 8;

/// 创建时间偏移
pub const CREATION_TIME_OFFSET: usize = 24;

//=============================================================================
// 时间戳
//=============================================================================

/// 每秒的 tick 数（1 tick = 100ns）
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// 0001-01-01 到 Unix 纪元（1970-01-01）之间的 tick 数
pub const UNIX_EPOCH_TICKS: u64 = 621_355_968_000_000_000;

//=============================================================================
// 默认配置
//=============================================================================

/// 默认保留扇区数（压缩所需的空闲余量）
pub const DEFAULT_RESERVED_SECTORS: u16 = 2;

/// 默认文件名缓存容量
pub const DEFAULT_NAME_CACHE_SIZE: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(COMMON_HEADER_SIZE, 7);
        assert_eq!(FILE_CLUSTER_HEADER_SIZE, 32);
        assert_eq!(FILE_NAME_OFFSET, FILE_NAME_LENGTH_OFFSET + 1);
        assert_eq!(CREATION_TIME_OFFSET, FILE_NAME_OFFSET + MAX_FILE_NAME_LENGTH);
        assert_eq!(CREATION_TIME_OFFSET + 8, FILE_CLUSTER_HEADER_SIZE);
    }

    #[test]
    fn test_marker_transitions_only_clear_bits() {
        let chain = [
            MARKER_ERASED,
            MARKER_FORMATTED_SECTOR,
            MARKER_PENDING,
            MARKER_ALLOCATED,
            MARKER_ORPHANED,
        ];
        for pair in chain.windows(2) {
            assert_eq!(pair[0] & pair[1], pair[1]);
        }
    }
}
