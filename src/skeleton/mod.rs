//! 骨骼系统
//!
//! 核心设计思想：
//! - Joint: 单个关节节点，父子关系只存句柄
//! - JointArena: 持有所有关节，提供层级操作与全局变换缓存
//! - segmentation: 效应器链构建、分叉点检测、处理顺序

mod hierarchy;
mod joint;
pub mod segmentation;

pub use hierarchy::{HierarchyLimits, JointArena};
pub use joint::{orthogonalize, validate_matrix, Joint, JointFlags};
pub use segmentation::{
    analyze_chains, build_chain, find_junctions, get_processing_order, Chain, EffectorKind,
    EffectorTarget,
};

use std::fmt;

// ============================================================================
// 公共类型定义
// ============================================================================

/// 关节句柄（arena 索引 + 代数）
///
/// 关节销毁后槽位代数递增，旧句柄随之失效。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JointId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl JointId {
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}
