//! 关节节点
//!
//! Joint 是层级中的单个节点，只保存句柄形式的父子关系，
//! 由 JointArena 统一持有。

use std::cell::Cell;

use bitflags::bitflags;
use glam::{Mat4, Quat, Vec3};

use super::JointId;

// ============================================================================
// 关节标志
// ============================================================================

bitflags! {
    /// 关节标志位
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct JointFlags: u32 {
        /// 可被 IK 旋转
        const ROTATABLE = 1 << 0;
        /// 全局变换去除缩放（基向量归一化）
        const DISABLE_SCALE = 1 << 1;
    }
}

impl Default for JointFlags {
    fn default() -> Self {
        JointFlags::ROTATABLE
    }
}

// ============================================================================
// 关节节点
// ============================================================================

/// 关节节点
///
/// - 静态数据：名称、父子句柄、标志
/// - 动态数据：本地变换
/// - 缓存：全局变换 + 脏标记（读取时惰性重算）
#[derive(Clone, Debug)]
pub struct Joint {
    /// 关节名称
    pub name: String,

    /// 父关节（非拥有句柄）
    pub(crate) parent: Option<JointId>,

    /// 子关节（按插入顺序）
    pub(crate) children: Vec<JointId>,

    /// 关节标志
    pub(crate) flags: JointFlags,

    /// 本地变换 (local_to_parent)
    pub(crate) local_transform: Mat4,

    /// 全局变换缓存 (local_to_world)
    pub(crate) global_cache: Cell<Mat4>,

    /// 缓存是否失效
    pub(crate) dirty: Cell<bool>,
}

impl Joint {
    /// 创建新关节
    pub fn new(name: String) -> Self {
        Self {
            name,
            parent: None,
            children: Vec::new(),
            flags: JointFlags::default(),
            local_transform: Mat4::IDENTITY,
            global_cache: Cell::new(Mat4::IDENTITY),
            dirty: Cell::new(true),
        }
    }

    #[inline]
    pub fn parent(&self) -> Option<JointId> {
        self.parent
    }

    #[inline]
    pub fn children(&self) -> &[JointId] {
        &self.children
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    #[inline]
    pub fn flags(&self) -> JointFlags {
        self.flags
    }

    #[inline]
    pub fn local_transform(&self) -> Mat4 {
        self.local_transform
    }

    #[inline]
    pub fn is_rotatable(&self) -> bool {
        self.flags.contains(JointFlags::ROTATABLE)
    }

    #[inline]
    pub fn disable_scale(&self) -> bool {
        self.flags.contains(JointFlags::DISABLE_SCALE)
    }

    /// 本地旋转
    #[inline]
    pub fn local_rotation(&self) -> Quat {
        let (_, rotation, _) = self.local_transform.to_scale_rotation_translation();
        rotation
    }

    /// 本地平移
    #[inline]
    pub fn local_translation(&self) -> Vec3 {
        self.local_transform.col(3).truncate()
    }

    #[inline]
    pub(crate) fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

/// 正交化：保留平移和旋转，去除缩放
pub fn orthogonalize(m: Mat4) -> Mat4 {
    let x = m.col(0).truncate().normalize_or_zero();
    let y = m.col(1).truncate().normalize_or_zero();
    let z = m.col(2).truncate().normalize_or_zero();
    if x == Vec3::ZERO || y == Vec3::ZERO || z == Vec3::ZERO {
        // 退化基：只保留平移
        return Mat4::from_translation(m.col(3).truncate());
    }
    Mat4::from_cols(
        x.extend(0.0),
        y.extend(0.0),
        z.extend(0.0),
        m.col(3),
    )
}

/// 校验矩阵：所有元素有限且不超过幅值上限
pub fn validate_matrix(m: &Mat4, max_magnitude: f32) -> bool {
    m.to_cols_array()
        .iter()
        .all(|v| v.is_finite() && v.abs() <= max_magnitude)
}
