//! EWBIK 求解器
//!
//! 设计原则：
//! - 每条链快照为纯数据后求解，求解过程不触碰 arena
//! - 每个关节每次迭代做一次 Wahba 最优旋转拟合
//! - 单步角度限制 → 传播衰减 → Kusudama 约束
//! - 预算耗尽时返回最佳姿态，不视为错误
//! - 多效应器：各链并行求解（rayon），汇合后按权重混合共享关节

use std::collections::{BTreeMap, HashMap, HashSet};

use glam::{Mat4, Quat, Vec3};
use rayon::prelude::*;

use super::propagation::{
    calculate_propagation_factors, combine_multi_effector_solutions, hierarchy_weight, EffectorSolution,
    HierarchyBias, JointAdjustment, PropagationConfig,
};
use super::wahba::{best_fit_rotation, Heading};
use crate::config::get_config;
use crate::constraint::KusudamaConstraint;
use crate::skeleton::{
    analyze_chains, build_chain, find_junctions, get_processing_order, orthogonalize, Chain,
    EffectorTarget, JointArena, JointId,
};
use crate::{EwbikError, Result};

/// 姿态：关节 → 本地变换
pub type Pose = BTreeMap<JointId, Mat4>;

// ============================================================================
// 配置与结果
// ============================================================================

/// 求解器配置
#[derive(Clone, Copy, Debug)]
pub struct SolverConfig {
    /// 迭代预算
    pub iterations: u32,
    /// 收敛距离
    pub tolerance: f32,
    /// 单次迭代每个关节的最大旋转角（弧度）
    pub max_step_angle: f32,
    /// 保持当前姿态的阻尼权重
    pub stiffness: f32,
    /// 目标朝向权重
    pub orientation_weight: f32,
    /// 沿链衰减率
    pub decay_rate: f32,
    /// 层级权重策略
    pub hierarchy_bias: HierarchyBias,
    pub debug_log: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let config = get_config();
        Self {
            iterations: config.iterations,
            tolerance: config.tolerance,
            max_step_angle: config.max_step_angle,
            stiffness: config.stiffness,
            orientation_weight: config.orientation_weight,
            decay_rate: config.decay_rate,
            hierarchy_bias: HierarchyBias::Uniform,
            debug_log: config.debug_log,
        }
    }
}

/// 单效应器求解结果
#[derive(Clone, Debug)]
pub struct SolveResult {
    pub pose: Pose,
    pub converged: bool,
    /// 实际执行的迭代次数
    pub iterations: u32,
    /// 返回姿态下效应器到目标的距离
    pub distance: f32,
}

/// 多效应器中单个效应器的结果
#[derive(Clone, Debug)]
pub struct EffectorReport {
    pub effector: JointId,
    pub converged: bool,
    pub iterations: u32,
    /// 合并后姿态下的距离
    pub distance: f32,
}

/// 多效应器求解结果
#[derive(Clone, Debug)]
pub struct MultiSolveResult {
    pub pose: Pose,
    pub effectors: Vec<EffectorReport>,
    pub processing_order: Vec<JointId>,
    pub junctions: Vec<JointId>,
}

// ============================================================================
// 链快照
// ============================================================================

/// 链的纯数据快照（效应器在前）
#[derive(Clone, Debug)]
struct ChainSnapshot {
    joints: Vec<JointId>,
    locals: Vec<Mat4>,
    /// 根关节父节点的全局变换
    base: Mat4,
    rotatable: Vec<bool>,
    disable_scale: Vec<bool>,
    constraints: Vec<Option<KusudamaConstraint>>,
    factors: Vec<f32>,
}

impl ChainSnapshot {
    /// 前向运动学：从根向效应器累乘
    fn forward(&self, locals: &[Mat4]) -> Vec<Mat4> {
        let mut globals = vec![Mat4::IDENTITY; locals.len()];
        self.update_globals(locals, &mut globals, locals.len().saturating_sub(1));
        globals
    }

    /// 重算索引 `from` 及其以下（靠近效应器）的全局变换
    fn update_globals(&self, locals: &[Mat4], globals: &mut [Mat4], from: usize) {
        if locals.is_empty() {
            return;
        }
        for i in (0..=from).rev() {
            let parent = if i + 1 < locals.len() { globals[i + 1] } else { self.base };
            let mut global = parent * locals[i];
            if self.disable_scale[i] {
                global = orthogonalize(global);
            }
            globals[i] = global;
        }
    }

    fn parent_global(&self, globals: &[Mat4], i: usize) -> Mat4 {
        if i + 1 < globals.len() {
            globals[i + 1]
        } else {
            self.base
        }
    }
}

/// 单条链的求解输出
#[derive(Clone, Debug)]
struct ChainOutcome {
    locals: Vec<Mat4>,
    converged: bool,
    iterations: u32,
    distance: f32,
}

#[inline]
fn position(m: &Mat4) -> Vec3 {
    m.col(3).truncate()
}

// ============================================================================
// 求解器
// ============================================================================

/// EWBIK 求解器
#[derive(Clone, Debug, Default)]
pub struct EwbikSolver {
    pub config: SolverConfig,
    constraints: HashMap<JointId, KusudamaConstraint>,
}

impl EwbikSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            constraints: HashMap::new(),
        }
    }

    /// 添加约束（同一关节后加入的覆盖先前的）
    pub fn add_constraint(&mut self, constraint: KusudamaConstraint) {
        self.constraints.insert(constraint.joint_id, constraint);
    }

    pub fn constraint(&self, joint: JointId) -> Option<&KusudamaConstraint> {
        self.constraints.get(&joint)
    }

    pub fn constraints(&self) -> impl Iterator<Item = &KusudamaConstraint> {
        self.constraints.values()
    }

    // ========================================
    // 单效应器
    // ========================================

    /// 求解单个效应器；只有链无法构建时返回错误
    pub fn solve(&self, skeleton: &JointArena, target: &EffectorTarget) -> Result<SolveResult> {
        let joints = build_chain(skeleton, target.joint);
        if joints.is_empty() {
            return Err(EwbikError::NoChainFound(target.joint.to_string()));
        }
        let chain = Chain { joints, target: *target };
        let snapshot = self.snapshot(skeleton, &chain)?;
        let outcome = solve_chain(&snapshot, target, &self.config);

        Ok(SolveResult {
            pose: snapshot.joints.iter().copied().zip(outcome.locals).collect(),
            converged: outcome.converged,
            iterations: outcome.iterations,
            distance: outcome.distance,
        })
    }

    // ========================================
    // 多效应器
    // ========================================

    /// 多效应器求解：各链独立并行求解，再合并共享关节
    pub fn solve_multi(&self, skeleton: &JointArena, targets: &[EffectorTarget]) -> Result<MultiSolveResult> {
        let chains = analyze_chains(skeleton, targets)?;
        let processing_order = get_processing_order(&chains);
        let junctions = find_junctions(&chains);

        let snapshots = chains
            .iter()
            .map(|chain| self.snapshot(skeleton, chain))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| EwbikError::ChainAnalysisFailed(e.to_string()))?;

        if self.config.debug_log {
            log::debug!(
                "[EWBIK] 多效应器求解: {} 条链, {} 个关节, {} 个分叉点",
                chains.len(),
                processing_order.len(),
                junctions.len()
            );
        }

        // fork：各链互不依赖
        let config = self.config;
        let outcomes: Vec<ChainOutcome> = snapshots
            .par_iter()
            .zip(chains.par_iter())
            .map(|(snapshot, chain)| solve_chain(snapshot, &chain.target, &config))
            .collect();

        // join：按效应器权重合并
        let mut solutions = Vec::with_capacity(chains.len());
        for ((chain, snapshot), outcome) in chains.iter().zip(&snapshots).zip(&outcomes) {
            let mut adjustments = HashMap::with_capacity(chain.len());
            for (i, joint) in snapshot.joints.iter().enumerate() {
                let adjustment = JointAdjustment::between(snapshot.locals[i], outcome.locals[i]);
                if !adjustment.is_finite() {
                    return Err(EwbikError::MultiEffectorSolveFailed(format!(
                        "effector {} produced a non-finite adjustment at joint {}",
                        chain.effector(),
                        joint
                    )));
                }
                adjustments.insert(*joint, adjustment);
            }
            solutions.push(EffectorSolution {
                effector: chain.effector(),
                kind: chain.target.kind,
                base_weight: chain.target.priority,
                adjustments,
            });
        }
        let combined = combine_multi_effector_solutions(&solutions);
        let shared: HashSet<JointId> = junctions.iter().copied().collect();

        let mut pose = Pose::new();
        for joint in &processing_order {
            let initial = skeleton
                .local_transform(*joint)
                .map_err(|e| EwbikError::MultiEffectorSolveFailed(e.to_string()))?;
            let adjustment = combined.get(joint).copied().unwrap_or_default();
            let mut local = adjustment.apply_to(initial);

            // 混合后的朝向可能离开约束区域，重新约束
            if let Some(constraint) = self.constraints.get(joint).filter(|_| shared.contains(joint)) {
                let (scale, current, translation) = initial.to_scale_rotation_translation();
                let (_, blended, new_translation) = local.to_scale_rotation_translation();
                let constrained = constraint.apply(current, blended);
                local = Mat4::from_scale_rotation_translation(
                    scale,
                    constrained,
                    if new_translation.is_finite() { new_translation } else { translation },
                );
            }

            if !local.is_finite() {
                return Err(EwbikError::MultiEffectorSolveFailed(format!(
                    "combined transform for joint {} is not finite",
                    joint
                )));
            }
            pose.insert(*joint, local);
        }

        let effectors = chains
            .iter()
            .zip(&snapshots)
            .zip(&outcomes)
            .map(|((chain, snapshot), outcome)| {
                let locals: Vec<Mat4> = snapshot
                    .joints
                    .iter()
                    .zip(&snapshot.locals)
                    .map(|(j, l)| pose.get(j).copied().unwrap_or(*l))
                    .collect();
                let globals = snapshot.forward(&locals);
                let distance = globals
                    .first()
                    .map(|g| position(g).distance(chain.target.position))
                    .unwrap_or(f32::MAX);
                EffectorReport {
                    effector: chain.effector(),
                    converged: outcome.converged,
                    iterations: outcome.iterations,
                    distance,
                }
            })
            .collect();

        Ok(MultiSolveResult {
            pose,
            effectors,
            processing_order,
            junctions,
        })
    }

    /// 把姿态写回 arena
    pub fn commit(skeleton: &mut JointArena, pose: &Pose) -> Result<()> {
        for (joint, local) in pose {
            skeleton.set_local_transform(*joint, *local)?;
        }
        Ok(())
    }

    fn snapshot(&self, skeleton: &JointArena, chain: &Chain) -> Result<ChainSnapshot> {
        let n = chain.joints.len();
        let mut locals = Vec::with_capacity(n);
        let mut rotatable = Vec::with_capacity(n);
        let mut disable_scale = Vec::with_capacity(n);
        let mut constraints = Vec::with_capacity(n);

        for joint_id in &chain.joints {
            let joint = skeleton.joint(*joint_id)?;
            locals.push(joint.local_transform());
            rotatable.push(joint.is_rotatable());
            disable_scale.push(joint.disable_scale());
            constraints.push(self.constraints.get(joint_id).cloned());
        }

        let base = match chain.root().map(|root| skeleton.parent(root)).transpose()?.flatten() {
            Some(parent) => skeleton.global_transform(parent)?,
            None => Mat4::IDENTITY,
        };

        let propagation = PropagationConfig::new(chain.effector(), chain.target.influence)
            .with_decay(self.config.decay_rate);
        let factor_map = calculate_propagation_factors(&chain.joints, &propagation);
        let factors = chain
            .joints
            .iter()
            .map(|j| {
                let bias = hierarchy_weight(skeleton, *j, self.config.hierarchy_bias);
                factor_map.get(j).copied().unwrap_or(0.0) * bias
            })
            .collect();

        Ok(ChainSnapshot {
            joints: chain.joints.clone(),
            locals,
            base,
            rotatable,
            disable_scale,
            constraints,
            factors,
        })
    }
}

// ============================================================================
// 单链迭代
// ============================================================================

/// 迭代求解一条链，返回最佳姿态
fn solve_chain(snapshot: &ChainSnapshot, target: &EffectorTarget, config: &SolverConfig) -> ChainOutcome {
    let mut locals = snapshot.locals.clone();
    let mut globals = snapshot.forward(&locals);

    let distance_of = |globals: &[Mat4]| -> f32 {
        globals
            .first()
            .map(|g| position(g).distance(target.position))
            .unwrap_or(f32::MAX)
    };
    // 朝向误差（弧度），无朝向目标时为 0
    let orientation_error = |globals: &[Mat4]| -> f32 {
        match (target.orientation, globals.first()) {
            (Some(goal), Some(g)) => {
                let (_, rotation, _) = g.to_scale_rotation_translation();
                rotation.angle_between(goal)
            }
            _ => 0.0,
        }
    };
    let score = |distance: f32, angle: f32| distance + config.orientation_weight * angle;

    let mut distance = distance_of(&globals);
    let mut angle = orientation_error(&globals);
    let mut best_distance = distance;
    let mut best_score = score(distance, angle);
    let mut best_locals = locals.clone();
    let mut converged = distance < config.tolerance && angle < config.tolerance;
    let mut iterations = 0;

    while !converged && iterations < config.iterations {
        solve_iteration(snapshot, target, config, &mut locals, &mut globals);
        iterations += 1;

        distance = distance_of(&globals);
        angle = orientation_error(&globals);
        let current = score(distance, angle);
        if current < best_score {
            best_score = current;
            best_distance = distance;
            best_locals.clone_from(&locals);
        }
        converged = distance < config.tolerance && angle < config.tolerance;

        if config.debug_log {
            log::debug!(
                "[EWBIK] 效应器 {} 迭代 {}: 距离 {:.6}, 朝向误差 {:.6}",
                target.joint,
                iterations,
                distance,
                angle
            );
        }
    }

    if !converged && config.debug_log {
        log::debug!(
            "[EWBIK] 效应器 {} 未收敛，返回最佳距离 {:.6}",
            target.joint,
            best_distance
        );
    }

    ChainOutcome {
        locals: best_locals,
        converged,
        iterations,
        distance: best_distance,
    }
}

/// 单次迭代：从效应器向根逐个关节拟合
fn solve_iteration(
    snapshot: &ChainSnapshot,
    target: &EffectorTarget,
    config: &SolverConfig,
    locals: &mut [Mat4],
    globals: &mut [Mat4],
) {
    // 只有位置目标时效应器自身旋转不影响误差
    let start = if target.orientation.is_some() { 0 } else { 1 };

    for i in start..locals.len() {
        if !snapshot.rotatable[i] || snapshot.factors[i] <= 0.0 {
            continue;
        }

        let pivot = position(&globals[i]);
        let effector = globals[0];
        let mut headings = Vec::with_capacity(7);

        let reach = position(&effector) - pivot;
        let desired = target.position - pivot;
        if reach.length_squared() > 1e-10 && desired.length_squared() > 1e-10 {
            headings.push(Heading::new(reach.normalize(), desired.normalize(), 1.0));
        }
        if let Some(orientation) = target.orientation {
            let (_, effector_rotation, _) = effector.to_scale_rotation_translation();
            for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
                headings.push(Heading::new(
                    effector_rotation * axis,
                    orientation * axis,
                    config.orientation_weight,
                ));
            }
        }
        if headings.is_empty() {
            continue;
        }
        // 阻尼：倾向保持当前姿态
        if config.stiffness > 0.0 {
            for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
                headings.push(Heading::new(axis, axis, config.stiffness));
            }
        }

        let Some(mut delta) = best_fit_rotation(&headings) else {
            continue;
        };

        // 单步角度限制
        let (axis, angle) = delta.to_axis_angle();
        if angle > config.max_step_angle {
            delta = Quat::from_axis_angle(axis, config.max_step_angle);
        }
        // 传播衰减
        let delta = Quat::IDENTITY.slerp(delta, snapshot.factors[i].min(1.0)).normalize();
        if delta.angle_between(Quat::IDENTITY) < 1e-7 {
            continue;
        }

        // 绕关节世界位置旋转后反推本地变换
        let rotated = Mat4::from_translation(pivot)
            * Mat4::from_quat(delta)
            * Mat4::from_translation(-pivot)
            * globals[i];
        let parent = snapshot.parent_global(globals, i);
        let candidate = parent.inverse() * rotated;

        let (scale, current_rotation, translation) = locals[i].to_scale_rotation_translation();
        let (_, new_rotation, _) = candidate.to_scale_rotation_translation();
        let new_rotation = match &snapshot.constraints[i] {
            Some(constraint) => constraint.apply(current_rotation, new_rotation),
            None => new_rotation,
        };
        let new_local = Mat4::from_scale_rotation_translation(scale, new_rotation.normalize(), translation);
        if !new_local.is_finite() {
            continue;
        }

        locals[i] = new_local;
        snapshot.update_globals(locals, globals, i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{create_cone, create_constraint};
    use crate::skeleton::EffectorKind;

    /// root → mid → tip，沿 Y 轴每段长度 1
    fn arm() -> (JointArena, JointId, JointId, JointId) {
        let mut arena = JointArena::new();
        let root = arena.create("root", None).unwrap();
        let mid = arena.create("mid", Some(root)).unwrap();
        let tip = arena.create("tip", Some(mid)).unwrap();
        arena.set_local_transform(mid, Mat4::from_translation(Vec3::Y)).unwrap();
        arena.set_local_transform(tip, Mat4::from_translation(Vec3::Y)).unwrap();
        (arena, root, mid, tip)
    }

    fn config(iterations: u32) -> SolverConfig {
        SolverConfig {
            iterations,
            tolerance: 0.001,
            ..SolverConfig::default()
        }
    }

    #[test]
    fn test_target_at_effector_converges_immediately() {
        let (arena, _, _, tip) = arm();
        let solver = EwbikSolver::new(config(10));
        let target = EffectorTarget::new(tip, arena.world_position(tip).unwrap());
        let result = solver.solve(&arena, &target).unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_zero_iterations_returns_initial_pose() {
        let (arena, root, mid, tip) = arm();
        let solver = EwbikSolver::new(config(0));
        let result = solver.solve(&arena, &EffectorTarget::new(tip, Vec3::new(1.0, 1.0, 0.0))).unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 0);
        for id in [root, mid, tip] {
            assert_eq!(result.pose[&id], arena.local_transform(id).unwrap());
        }
    }

    #[test]
    fn test_reaches_target() {
        let (mut arena, _, _, tip) = arm();
        let solver = EwbikSolver::new(config(200));
        let goal = Vec3::new(1.0, 1.0, 0.0);
        let initial = arena.world_position(tip).unwrap().distance(goal);
        let result = solver.solve(&arena, &EffectorTarget::new(tip, goal)).unwrap();
        assert!(result.distance < initial);
        assert!(result.distance < 0.01);

        EwbikSolver::commit(&mut arena, &result.pose).unwrap();
        let reached = arena.world_position(tip).unwrap();
        assert!((reached.distance(goal) - result.distance).abs() < 1e-4);
    }

    #[test]
    fn test_missing_effector_is_error() {
        let (mut arena, _, _, tip) = arm();
        arena.destroy(tip).unwrap();
        let solver = EwbikSolver::new(config(10));
        let err = solver.solve(&arena, &EffectorTarget::new(tip, Vec3::ZERO)).unwrap_err();
        assert!(matches!(err, EwbikError::NoChainFound(_)));
    }

    #[test]
    fn test_constraints_are_respected() {
        let (arena, root, _, tip) = arm();
        let mut solver = EwbikSolver::new(config(50));
        solver.add_constraint(create_constraint(root, vec![create_cone(Quat::IDENTITY, 0.2, None)]));
        let result = solver.solve(&arena, &EffectorTarget::new(tip, Vec3::new(2.0, 0.0, 0.0))).unwrap();

        let (_, root_rotation, _) = result.pose[&root].to_scale_rotation_translation();
        assert!(solver.constraint(root).unwrap().contains(root_rotation));
    }

    #[test]
    fn test_locked_joint_is_not_rotated() {
        let (mut arena, root, mid, tip) = arm();
        arena.set_rotatable(root, false).unwrap();
        let solver = EwbikSolver::new(config(20));
        let result = solver.solve(&arena, &EffectorTarget::new(tip, Vec3::new(1.0, 1.0, 0.0))).unwrap();
        assert_eq!(result.pose[&root], arena.local_transform(root).unwrap());
        assert_ne!(result.pose[&mid], arena.local_transform(mid).unwrap());
    }

    #[test]
    fn test_orientation_target() {
        let (mut arena, _, _, tip) = arm();
        let solver = EwbikSolver::new(config(100));
        let goal_rotation = Quat::from_rotation_y(0.8);
        let target = EffectorTarget::new(tip, arena.world_position(tip).unwrap()).with_orientation(goal_rotation);
        let result = solver.solve(&arena, &target).unwrap();
        assert!(result.iterations > 0);

        EwbikSolver::commit(&mut arena, &result.pose).unwrap();
        let (_, tip_rotation, _) = arena.global_transform(tip).unwrap().to_scale_rotation_translation();
        assert!(tip_rotation.angle_between(goal_rotation) < 0.2);
    }

    fn body() -> (JointArena, Vec<JointId>) {
        let mut arena = JointArena::new();
        let root = arena.create("root", None).unwrap();
        let spine = arena.create("spine", Some(root)).unwrap();
        let arm_l = arena.create("arm_l", Some(spine)).unwrap();
        let hand_l = arena.create("hand_l", Some(arm_l)).unwrap();
        let arm_r = arena.create("arm_r", Some(spine)).unwrap();
        let hand_r = arena.create("hand_r", Some(arm_r)).unwrap();
        arena.set_local_transform(spine, Mat4::from_translation(Vec3::Y)).unwrap();
        arena.set_local_transform(arm_l, Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0))).unwrap();
        arena.set_local_transform(hand_l, Mat4::from_translation(Vec3::X)).unwrap();
        arena.set_local_transform(arm_r, Mat4::from_translation(Vec3::new(-0.5, 0.0, 0.0))).unwrap();
        arena.set_local_transform(hand_r, Mat4::from_translation(Vec3::NEG_X)).unwrap();
        (arena, vec![root, spine, arm_l, hand_l, arm_r, hand_r])
    }

    #[test]
    fn test_multi_effector_solve() {
        let (mut arena, ids) = body();
        let (root, spine, hand_l, hand_r) = (ids[0], ids[1], ids[3], ids[5]);
        // 共享关节锁定时两条手臂互不干扰
        arena.set_rotatable(root, false).unwrap();
        arena.set_rotatable(spine, false).unwrap();

        let goal_l = Vec3::new(1.0, 0.5, 0.5);
        let goal_r = Vec3::new(-1.0, 0.5, 0.5);
        let before_l = arena.world_position(hand_l).unwrap().distance(goal_l);
        let before_r = arena.world_position(hand_r).unwrap().distance(goal_r);

        let solver = EwbikSolver::new(config(50));
        let targets = [
            EffectorTarget::new(hand_l, goal_l),
            EffectorTarget::new(hand_r, goal_r).with_kind(EffectorKind::Intermediary),
        ];
        let result = solver.solve_multi(&arena, &targets).unwrap();

        assert_eq!(result.pose.len(), 6);
        assert_eq!(result.junctions, vec![spine, root]);
        assert_eq!(result.processing_order.last(), Some(&root));
        assert!(result.pose[&spine].abs_diff_eq(arena.local_transform(spine).unwrap(), 1e-6));

        EwbikSolver::commit(&mut arena, &result.pose).unwrap();
        let after_l = arena.world_position(hand_l).unwrap().distance(goal_l);
        let after_r = arena.world_position(hand_r).unwrap().distance(goal_r);
        assert!(after_l < before_l);
        assert!(after_r < before_r);
        assert!((result.effectors[0].distance - after_l).abs() < 1e-3);
        assert!((result.effectors[1].distance - after_r).abs() < 1e-3);
    }

    #[test]
    fn test_multi_effector_shared_joints_blend() {
        let (mut arena, ids) = body();
        let solver = EwbikSolver::new(config(30));
        let targets = [
            EffectorTarget::new(ids[3], Vec3::new(1.0, 0.5, 0.5)),
            EffectorTarget::new(ids[5], Vec3::new(-1.0, 0.5, 0.5)),
        ];
        let result = solver.solve_multi(&arena, &targets).unwrap();
        assert!(result.pose.values().all(|m| m.is_finite()));
        assert_eq!(result.effectors.len(), 2);

        EwbikSolver::commit(&mut arena, &result.pose).unwrap();
        for (report, target) in result.effectors.iter().zip(&targets) {
            let reached = arena.world_position(report.effector).unwrap();
            assert!((reached.distance(target.position) - report.distance).abs() < 1e-3);
        }
    }

    #[test]
    fn test_multi_effector_shared_joint_constraint() {
        let (arena, ids) = body();
        let spine = ids[1];
        let mut solver = EwbikSolver::new(config(30));
        solver.add_constraint(create_constraint(spine, vec![create_cone(Quat::IDENTITY, 0.1, None)]));

        // 两只手往相反方向拉，脊柱两侧的解互相冲突
        let targets = [
            EffectorTarget::new(ids[3], Vec3::new(1.0, 2.2, 0.6)),
            EffectorTarget::new(ids[5], Vec3::new(-1.0, -0.2, -0.6)),
        ];
        let result = solver.solve_multi(&arena, &targets).unwrap();
        assert!(result.junctions.contains(&spine));

        let (_, spine_rotation, spine_translation) = result.pose[&spine].to_scale_rotation_translation();
        assert!(solver.constraint(spine).unwrap().contains(spine_rotation));
        assert!((spine_translation - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_multi_effector_invalid_effector() {
        let (mut arena, ids) = body();
        arena.destroy(ids[5]).unwrap();
        let solver = EwbikSolver::new(config(10));
        let targets = [EffectorTarget::new(ids[3], Vec3::X), EffectorTarget::new(ids[5], Vec3::NEG_X)];
        let err = solver.solve_multi(&arena, &targets).unwrap_err();
        assert!(matches!(err, EwbikError::ChainAnalysisFailed(_)));
        assert!(err.to_string().starts_with("Chain analysis failed:"));
    }
}
