//! 运动传播
//!
//! 沿链按几何衰减分配每个关节的调整量，
//! 多个效应器作用于同一关节时按效应器权重混合。

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};

use crate::config::get_config;
use crate::skeleton::{EffectorKind, JointArena, JointId};

// ============================================================================
// 关节调整量
// ============================================================================

/// 单个关节本地变换的增量（旋转右乘，平移相加）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointAdjustment {
    pub rotation: Quat,
    pub translation: Vec3,
}

impl Default for JointAdjustment {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl JointAdjustment {
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
    };

    pub fn new(rotation: Quat, translation: Vec3) -> Self {
        Self { rotation, translation }
    }

    /// 从 `from` 到 `to` 的本地变换增量
    pub fn between(from: Mat4, to: Mat4) -> Self {
        let (_, from_rot, from_pos) = from.to_scale_rotation_translation();
        let (_, to_rot, to_pos) = to.to_scale_rotation_translation();
        Self {
            rotation: (from_rot.inverse() * to_rot).normalize(),
            translation: to_pos - from_pos,
        }
    }

    /// 作用到本地变换上（保留缩放）
    pub fn apply_to(&self, local: Mat4) -> Mat4 {
        let (scale, rotation, translation) = local.to_scale_rotation_translation();
        Mat4::from_scale_rotation_translation(
            scale,
            (rotation * self.rotation).normalize(),
            translation + self.translation,
        )
    }

    /// 按比例缩放：旋转从单位四元数 slerp，平移线性缩放
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            rotation: Quat::IDENTITY.slerp(self.rotation, factor).normalize(),
            translation: self.translation * factor,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.rotation.is_finite() && self.translation.is_finite()
    }
}

// ============================================================================
// 传播因子
// ============================================================================

/// 传播配置
#[derive(Clone, Copy, Debug)]
pub struct PropagationConfig {
    pub effector_id: JointId,
    pub base_influence: f32,
    /// [0, 1]
    pub decay_rate: f32,
}

impl PropagationConfig {
    pub fn new(effector_id: JointId, base_influence: f32) -> Self {
        Self {
            effector_id,
            base_influence,
            decay_rate: get_config().decay_rate.clamp(0.0, 1.0),
        }
    }

    pub fn with_decay(mut self, decay_rate: f32) -> Self {
        self.decay_rate = decay_rate.clamp(0.0, 1.0);
        self
    }
}

/// 第 i 个关节（0 为效应器）的因子 = influence × decay^i
pub fn calculate_propagation_factors(chain: &[JointId], config: &PropagationConfig) -> HashMap<JointId, f32> {
    let mut factors = HashMap::with_capacity(chain.len());
    let mut factor = config.base_influence;
    for joint in chain {
        factors.entry(*joint).or_insert(factor);
        factor *= config.decay_rate;
    }
    factors
}

/// 层级权重策略
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum HierarchyBias {
    /// 所有关节权重 1.0
    #[default]
    Uniform,
    /// 权重 = falloff^depth（根为 1.0）
    DepthFalloff(f32),
}

pub fn hierarchy_weight(hierarchy: &JointArena, joint: JointId, bias: HierarchyBias) -> f32 {
    match bias {
        HierarchyBias::Uniform => 1.0,
        HierarchyBias::DepthFalloff(falloff) => match hierarchy.depth(joint) {
            Ok(depth) => falloff.clamp(0.0, 1.0).powi(depth as i32),
            Err(_) => 1.0,
        },
    }
}

/// 按传播因子与层级权重缩放每个关节的调整量；没有因子的关节原样保留
pub fn apply_propagation(
    adjustments: &HashMap<JointId, JointAdjustment>,
    factors: &HashMap<JointId, f32>,
    hierarchy: &JointArena,
    bias: HierarchyBias,
) -> HashMap<JointId, JointAdjustment> {
    adjustments
        .iter()
        .map(|(joint, adjustment)| {
            let scaled = match factors.get(joint) {
                Some(factor) => adjustment.scaled(factor * hierarchy_weight(hierarchy, *joint, bias)),
                None => *adjustment,
            };
            (*joint, scaled)
        })
        .collect()
}

// ============================================================================
// 多效应器合并
// ============================================================================

/// 单个效应器的求解结果
#[derive(Clone, Debug)]
pub struct EffectorSolution {
    pub effector: JointId,
    pub kind: EffectorKind,
    pub base_weight: f32,
    pub adjustments: HashMap<JointId, JointAdjustment>,
}

/// 效应器类型权重：末端 ×1.2，中间点 ×0.8，其他不变
pub fn effector_type_weight(kind: EffectorKind, base_weight: f32) -> f32 {
    match kind {
        EffectorKind::Ultimate => base_weight * 1.2,
        EffectorKind::Intermediary => base_weight * 0.8,
        EffectorKind::Other => base_weight,
    }
}

/// 合并所有效应器的关节调整
///
/// 只被一个效应器触及的关节直接透传；多个效应器共享的关节
/// 按类型权重加权平均，权重不可用时退化为首个效应器优先。
pub fn combine_multi_effector_solutions(solutions: &[EffectorSolution]) -> HashMap<JointId, JointAdjustment> {
    let mut grouped: HashMap<JointId, Vec<(f32, JointAdjustment)>> = HashMap::new();
    for solution in solutions {
        let weight = effector_type_weight(solution.kind, solution.base_weight);
        for (joint, adjustment) in &solution.adjustments {
            grouped.entry(*joint).or_default().push((weight, *adjustment));
        }
    }

    grouped
        .into_iter()
        .map(|(joint, entries)| {
            let combined = if entries.len() == 1 {
                entries[0].1
            } else {
                blend_adjustments(&entries).unwrap_or_else(|| {
                    log::debug!("[EWBIK] 关节 {} 无可用权重，使用首个效应器结果", joint);
                    entries[0].1
                })
            };
            (joint, combined)
        })
        .collect()
}

/// 加权平均；权重全部无效时返回 None
fn blend_adjustments(entries: &[(f32, JointAdjustment)]) -> Option<JointAdjustment> {
    let usable: Vec<(f32, JointAdjustment)> = entries
        .iter()
        .filter(|(w, a)| w.is_finite() && *w > 0.0 && a.is_finite())
        .copied()
        .collect();
    let total: f32 = usable.iter().map(|(w, _)| w).sum();
    if usable.is_empty() || total <= f32::EPSILON {
        return None;
    }

    let rotations: Vec<(Quat, f32)> = usable.iter().map(|(w, a)| (a.rotation, *w)).collect();
    let rotation = blend_rotations(&rotations)?;
    let translation = usable
        .iter()
        .fold(Vec3::ZERO, |acc, (w, a)| acc + a.translation * *w)
        / total;

    Some(JointAdjustment { rotation, translation })
}

/// 四元数加权平均（对齐半球后归一化求和）
pub fn blend_rotations(rotations: &[(Quat, f32)]) -> Option<Quat> {
    let (reference, _) = *rotations.first()?;
    let sum = rotations.iter().fold(Quat::from_xyzw(0.0, 0.0, 0.0, 0.0), |acc, (q, w)| {
        let aligned = if q.dot(reference) < 0.0 { -*q } else { *q };
        acc + aligned * *w
    });
    if sum.length_squared() <= f32::EPSILON {
        return None;
    }
    Some(sum.normalize())
}

/// 帧间平滑：previous + (current - previous) × s；没有上一帧值的关节直接透传
pub fn smooth_propagation(
    current: &HashMap<JointId, f32>,
    previous: &HashMap<JointId, f32>,
    smoothing_factor: f32,
) -> HashMap<JointId, f32> {
    current
        .iter()
        .map(|(joint, value)| {
            let smoothed = match previous.get(joint) {
                Some(prev) => prev + (value - prev) * smoothing_factor,
                None => *value,
            };
            (*joint, smoothed)
        })
        .collect()
}
