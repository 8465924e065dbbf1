//! Wahba 问题求解 - 加权方向对的最优旋转
//!
//! 使用 SVD（Kabsch）：H = Σ wᵢ · fromᵢ · toᵢᵀ = U Σ Vᵀ，R = V Uᵀ，
//! det(R) < 0 时翻转最小奇异值对应的列。

use glam::{Quat, Vec3};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// 加权方向对：希望旋转后 `from` 指向 `to`
#[derive(Clone, Copy, Debug)]
pub struct Heading {
    pub from: Vec3,
    pub to: Vec3,
    pub weight: f32,
}

impl Heading {
    pub fn new(from: Vec3, to: Vec3, weight: f32) -> Self {
        Self { from, to, weight }
    }
}

#[inline]
fn to_na(v: Vec3) -> Vector3<f32> {
    Vector3::new(v.x, v.y, v.z)
}

/// 求使加权方向对误差最小的旋转；退化或数值失败时返回 None
pub fn best_fit_rotation(headings: &[Heading]) -> Option<Quat> {
    let mut h = Matrix3::<f32>::zeros();
    let mut total = 0.0;
    for heading in headings {
        if !heading.weight.is_finite() || heading.weight <= 0.0 {
            continue;
        }
        if !heading.from.is_finite() || !heading.to.is_finite() {
            continue;
        }
        h += to_na(heading.from) * to_na(heading.to).transpose() * heading.weight;
        total += heading.weight;
    }
    if total <= f32::EPSILON {
        return None;
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    let mut rotation_matrix = v_t.transpose() * u.transpose();

    // 反射修正（det(R) = -1）
    if rotation_matrix.determinant() < 0.0 {
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation_matrix = v * u.transpose();
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_matrix));
    let q = rotation.quaternion();
    // 取 w >= 0 的半球，使轴角在 [0, π]
    let result = if q.w < 0.0 {
        Quat::from_xyzw(-q.i, -q.j, -q.k, -q.w)
    } else {
        Quat::from_xyzw(q.i, q.j, q.k, q.w)
    };
    if result.is_finite() && result.length_squared() > f32::EPSILON {
        Some(result.normalize())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_known_rotation() {
        let expected = Quat::from_euler(glam::EulerRot::XYZ, 0.3, -0.7, 1.1);
        let headings: Vec<Heading> = [Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(1.0, 1.0, 0.0).normalize()]
            .iter()
            .map(|v| Heading::new(*v, expected * *v, 1.0))
            .collect();
        let result = best_fit_rotation(&headings).unwrap();
        assert!(result.angle_between(expected) < 1e-3);
    }

    #[test]
    fn test_single_heading_with_anchors() {
        // 单方向对加弱锚点：绕 X×Y 轴旋转，角度略小于 90°
        let mut headings = vec![Heading::new(Vec3::X, Vec3::Y, 1.0)];
        for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
            headings.push(Heading::new(axis, axis, 0.05));
        }
        let result = best_fit_rotation(&headings).unwrap();
        let (axis, angle) = result.to_axis_angle();
        assert!(axis.dot(Vec3::Z) > 0.99);
        assert!(angle > 1.2 && angle < std::f32::consts::FRAC_PI_2 + 1e-3);
    }

    #[test]
    fn test_empty_returns_none() {
        assert!(best_fit_rotation(&[]).is_none());
        assert!(best_fit_rotation(&[Heading::new(Vec3::X, Vec3::Y, 0.0)]).is_none());
    }
}
