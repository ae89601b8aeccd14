//! 簇生命周期标记

use crate::consts::*;

/// 簇标记
///
/// 扇区第一个簇额外允许 `FormattedSector` 状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClusterMarker {
    /// 已擦除
    Erased = MARKER_ERASED,
    /// 已格式化扇区
    FormattedSector = MARKER_FORMATTED_SECTOR,
    /// 数据已写入，尚未提交
    Pending = MARKER_PENDING,
    /// 已提交
    Allocated = MARKER_ALLOCATED,
    /// 已废弃
    Orphaned = MARKER_ORPHANED,
}

impl ClusterMarker {
    /// 从标记字节解析，无法识别时返回 `None`
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            MARKER_ERASED => Some(Self::Erased),
            MARKER_FORMATTED_SECTOR => Some(Self::FormattedSector),
            MARKER_PENDING => Some(Self::Pending),
            MARKER_ALLOCATED => Some(Self::Allocated),
            MARKER_ORPHANED => Some(Self::Orphaned),
            _ => None,
        }
    }

    /// 标记字节
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// 簇可供日志写入
    pub fn is_available(self) -> bool {
        matches!(self, Self::Erased | Self::FormattedSector)
    }

    /// 簇不含有效数据但占用空间（未提交的写入同样视为废弃）
    pub fn is_orphaned(self) -> bool {
        matches!(self, Self::Pending | Self::Orphaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_roundtrip() {
        for marker in [
            ClusterMarker::Erased,
            ClusterMarker::FormattedSector,
            ClusterMarker::Pending,
            ClusterMarker::Allocated,
            ClusterMarker::Orphaned,
        ] {
            assert_eq!(ClusterMarker::from_byte(marker.as_byte()), Some(marker));
        }
        assert_eq!(ClusterMarker::from_byte(0x00), None);
        assert_eq!(ClusterMarker::from_byte(0x55), None);
    }

    #[test]
    fn test_transitions_only_clear_bits() {
        let chain = [
            ClusterMarker::Erased,
            ClusterMarker::FormattedSector,
            ClusterMarker::Pending,
            ClusterMarker::Allocated,
            ClusterMarker::Orphaned,
        ];
        for pair in chain.windows(2) {
            let (prev, next) = (pair[0].as_byte(), pair[1].as_byte());
            assert_eq!(prev & next, next);
            assert_ne!(prev, next);
        }
        // 已擦除的簇可以直接写成任意状态
        for marker in chain {
            assert_eq!(0xFF & marker.as_byte(), marker.as_byte());
        }
    }

    #[test]
    fn test_marker_classification() {
        assert!(ClusterMarker::Erased.is_available());
        assert!(ClusterMarker::FormattedSector.is_available());
        assert!(!ClusterMarker::Allocated.is_available());
        assert!(ClusterMarker::Pending.is_orphaned());
        assert!(ClusterMarker::Orphaned.is_orphaned());
        assert!(!ClusterMarker::Allocated.is_orphaned());
    }
}
