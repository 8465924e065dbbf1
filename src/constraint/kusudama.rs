//! Kusudama 锥形方向约束
//!
//! 每个关节一组锥体（中心朝向 + 角半径），相邻锥体之间可用
//! tangent_radius 定义过渡带。约束应用是全函数：永不失败，
//! 最坏情况下返回当前朝向。

use std::collections::HashMap;
use std::f32::consts::PI;

use glam::Quat;

use crate::config::get_config;
use crate::skeleton::JointId;

/// 扭转与锥体交替投影的最大轮数
const PROJECTION_ROUNDS: usize = 8;

// ============================================================================
// 锥体
// ============================================================================

/// 约束锥
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cone {
    /// 中心朝向
    pub center: Quat,
    /// 角半径（弧度，测地角）
    pub radius: f32,
    /// 与下一个锥体之间的过渡带半宽（弧度）
    pub tangent_radius: Option<f32>,
}

/// 创建锥体；半径限制在 [0, π]
pub fn create_cone(center: Quat, radius: f32, tangent_radius: Option<f32>) -> Cone {
    let center = if center.length_squared() > 1e-12 && center.is_finite() {
        center.normalize()
    } else {
        Quat::IDENTITY
    };
    let clamp_radius = |r: f32| if r.is_finite() { r.abs().min(PI) } else { 0.0 };
    Cone {
        center,
        radius: clamp_radius(radius),
        tangent_radius: tangent_radius.map(clamp_radius),
    }
}

/// 两个朝向之间的测地角（旋转角，[0, π]）
#[inline]
pub fn geodesic_angle(a: Quat, b: Quat) -> f32 {
    2.0 * a.dot(b).abs().clamp(-1.0, 1.0).acos()
}

// ============================================================================
// 约束
// ============================================================================

/// Kusudama 约束
#[derive(Clone, Debug, PartialEq)]
pub struct KusudamaConstraint {
    pub joint_id: JointId,
    pub cones: Vec<Cone>,
    /// 扭转限制（度），默认 (-180, 180)
    pub twist_limits: (f32, f32),
    pub(crate) epsilon: f32,
    pub(crate) tangent_samples: usize,
}

/// 约束违规记录
#[derive(Clone, Debug)]
pub struct ConstraintViolation {
    pub joint_id: JointId,
    pub orientation: Quat,
    pub constraint: KusudamaConstraint,
}

pub fn create_constraint(joint_id: JointId, cones: Vec<Cone>) -> KusudamaConstraint {
    let config = get_config();
    KusudamaConstraint {
        joint_id,
        cones,
        twist_limits: (-180.0, 180.0),
        epsilon: config.cone_epsilon,
        tangent_samples: config.tangent_samples.max(2),
    }
}

pub fn set_twist_limits(constraint: KusudamaConstraint, min_deg: f32, max_deg: f32) -> KusudamaConstraint {
    let (min_deg, max_deg) = if min_deg <= max_deg { (min_deg, max_deg) } else { (max_deg, min_deg) };
    KusudamaConstraint {
        twist_limits: (min_deg.max(-180.0), max_deg.min(180.0)),
        ..constraint
    }
}

pub fn apply_constraint(constraint: &KusudamaConstraint, current: Quat, target: Quat) -> Quat {
    constraint.apply(current, target)
}

/// 检查姿态中所有受约束关节；姿态中不存在的关节直接跳过
pub fn validate_constraints(
    constraints: &[KusudamaConstraint],
    pose: &HashMap<JointId, Quat>,
) -> std::result::Result<(), Vec<ConstraintViolation>> {
    let violations: Vec<ConstraintViolation> = constraints
        .iter()
        .filter_map(|c| {
            let orientation = *pose.get(&c.joint_id)?;
            if c.contains(orientation) {
                None
            } else {
                Some(ConstraintViolation {
                    joint_id: c.joint_id,
                    orientation,
                    constraint: c.clone(),
                })
            }
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

impl KusudamaConstraint {
    /// 扭转限制是否比完整范围更窄
    #[inline]
    fn twist_restricted(&self) -> bool {
        self.twist_limits.0 > -180.0 || self.twist_limits.1 < 180.0
    }

    /// 朝向是否在约束区域内（任一锥体或过渡带，且满足扭转限制）
    pub fn contains(&self, orientation: Quat) -> bool {
        if !orientation.is_finite() {
            return false;
        }
        if self.twist_restricted() {
            let twist = twist_angle(orientation).to_degrees();
            if twist < self.twist_limits.0 - self.epsilon.to_degrees()
                || twist > self.twist_limits.1 + self.epsilon.to_degrees()
            {
                return false;
            }
        }
        self.inside_cones(orientation)
    }

    fn inside_cones(&self, q: Quat) -> bool {
        if self.cones.is_empty() {
            return true;
        }
        if self
            .cones
            .iter()
            .any(|cone| geodesic_angle(q, cone.center) <= cone.radius + self.epsilon)
        {
            return true;
        }
        self.bands().any(|(a, b, width)| {
            let (_, distance) = self.closest_on_path(a.center, b.center, q);
            distance <= width + self.epsilon
        })
    }

    /// 应用约束：区域内原样返回，否则投影到最近边界
    ///
    /// 扭转限制与锥体交替投影；未收敛时在可行锚点（扭转修正后的锥体中心
    /// 或当前朝向）与候选之间二分逼近边界。两者无交集时返回锥体边界上的点。
    pub fn apply(&self, current: Quat, target: Quat) -> Quat {
        if !target.is_finite() || target.length_squared() < 1e-12 {
            return current;
        }
        if self.contains(target) {
            return target;
        }

        let goal = target.normalize();
        let mut candidate = goal;
        let mut on_cones = None;
        for _ in 0..PROJECTION_ROUNDS {
            if self.twist_restricted() {
                candidate = self.clamp_twist(candidate);
                if self.contains(candidate) {
                    return candidate;
                }
            }
            let Some(projected) = self.project_to_cones(candidate) else {
                break;
            };
            if self.contains(projected) {
                log::trace!("[Kusudama] 关节 {} 朝向越界，投影到锥体边界", self.joint_id);
                return projected;
            }
            on_cones = Some(projected);
            candidate = projected;
        }

        let outside = if self.twist_restricted() {
            self.clamp_twist(candidate)
        } else {
            candidate
        };
        let anchor = self
            .cones
            .iter()
            .map(|cone| {
                if self.twist_restricted() {
                    self.clamp_twist(cone.center)
                } else {
                    cone.center
                }
            })
            .chain(std::iter::once(current))
            .filter(|q| self.contains(*q))
            .min_by(|a, b| geodesic_angle(*a, goal).total_cmp(&geodesic_angle(*b, goal)));

        match anchor {
            Some(anchor) => self.refine_toward(anchor, outside),
            None => {
                log::debug!(
                    "[Kusudama] 关节 {} 的扭转限制与锥体无交集，仅满足锥体",
                    self.joint_id
                );
                on_cones.unwrap_or(current)
            }
        }
    }

    /// 投影到最近的锥体或过渡带边界；没有锥体时返回 None
    fn project_to_cones(&self, q: Quat) -> Option<Quat> {
        let mut best: Option<(f32, Quat)> = None;
        let mut consider = |distance: f32, candidate: Quat| {
            if candidate.is_finite() && best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, candidate));
            }
        };

        for cone in &self.cones {
            let angle = geodesic_angle(q, cone.center);
            consider(angle - cone.radius, project_toward(cone.center, q, cone.radius, angle));
        }
        for (a, b, width) in self.bands() {
            let (t, distance) = self.closest_on_path(a.center, b.center, q);
            let anchor = a.center.slerp(b.center, t);
            consider(distance - width, project_toward(anchor, q, width, distance));
        }

        best.map(|(_, projected)| projected)
    }

    /// 沿 outside → inside 的测地线二分，返回仍在区域内且最靠近 outside 的点
    fn refine_toward(&self, inside: Quat, outside: Quat) -> Quat {
        let (mut lo, mut hi) = (0.0_f32, 1.0_f32);
        for _ in 0..24 {
            let mid = 0.5 * (lo + hi);
            if self.contains(outside.slerp(inside, mid)) {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        let refined = outside.slerp(inside, hi).normalize();
        if self.contains(refined) {
            refined
        } else {
            inside
        }
    }

    /// 相邻锥体之间的过渡带（多于两个锥体时首尾闭合）
    fn bands(&self) -> impl Iterator<Item = (&Cone, &Cone, f32)> + '_ {
        let n = self.cones.len();
        let pairs = match n {
            0 | 1 => 0,
            2 => 1,
            _ => n,
        };
        (0..pairs).filter_map(move |i| {
            let a = &self.cones[i];
            let b = &self.cones[(i + 1) % n];
            a.tangent_radius.map(|width| (a, b, width))
        })
    }

    /// 中心连线（测地线）上离 q 最近的参数与距离：采样 + 三分细化
    fn closest_on_path(&self, a: Quat, b: Quat, q: Quat) -> (f32, f32) {
        let samples = self.tangent_samples;
        let distance_at = |t: f32| geodesic_angle(a.slerp(b, t), q);

        let mut best_t = 0.0;
        let mut best_d = f32::MAX;
        for i in 0..=samples {
            let t = i as f32 / samples as f32;
            let d = distance_at(t);
            if d < best_d {
                best_d = d;
                best_t = t;
            }
        }

        let step = 1.0 / samples as f32;
        let mut lo = (best_t - step).max(0.0);
        let mut hi = (best_t + step).min(1.0);
        for _ in 0..20 {
            let m1 = lo + (hi - lo) / 3.0;
            let m2 = hi - (hi - lo) / 3.0;
            if distance_at(m1) < distance_at(m2) {
                hi = m2;
            } else {
                lo = m1;
            }
        }
        let t = 0.5 * (lo + hi);
        let d = distance_at(t);
        if d < best_d {
            (t, d)
        } else {
            (best_t, best_d)
        }
    }

    /// 将绕本地 Y 轴的扭转限制到 twist_limits
    fn clamp_twist(&self, q: Quat) -> Quat {
        let twist = twist_angle(q);
        let (min, max) = (self.twist_limits.0.to_radians(), self.twist_limits.1.to_radians());
        let clamped = twist.clamp(min, max);
        if clamped == twist {
            return q;
        }
        let swing = q * Quat::from_rotation_y(twist).inverse();
        (swing * Quat::from_rotation_y(clamped)).normalize()
    }
}

/// 从 anchor 沿测地线朝 q 走 `radius` 的点
fn project_toward(anchor: Quat, q: Quat, radius: f32, angle: f32) -> Quat {
    if angle <= 1e-6 {
        return anchor;
    }
    anchor.slerp(q, (radius / angle).clamp(0.0, 1.0)).normalize()
}

/// 绕 Y 轴的扭转角（swing-twist 分解），范围 (-π, π]
pub fn twist_angle(q: Quat) -> f32 {
    let (y, w) = if q.w < 0.0 { (-q.y, -q.w) } else { (q.y, q.w) };
    if y.abs() < 1e-9 && w.abs() < 1e-9 {
        return 0.0;
    }
    2.0 * y.atan2(w)
}
