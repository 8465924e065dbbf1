//! 链分段
//!
//! 为每个效应器构建 效应器 → 根 的关节链，检测多链共享的分叉点，
//! 并给出叶先于祖先的处理顺序。

use std::collections::{HashMap, HashSet, VecDeque};

use glam::{Quat, Vec3};

use super::{JointArena, JointId};
use crate::config::get_config;
use crate::{EwbikError, Result};

// ============================================================================
// 效应器
// ============================================================================

/// 效应器类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EffectorKind {
    /// 真正的末端目标（手、脚）
    #[default]
    Ultimate,
    /// 中间协调点
    Intermediary,
    /// 其他（权重不变）
    Other,
}

/// 效应器目标
#[derive(Clone, Copy, Debug)]
pub struct EffectorTarget {
    /// 效应器关节
    pub joint: JointId,
    /// 目标世界位置
    pub position: Vec3,
    /// 目标世界朝向（可选）
    pub orientation: Option<Quat>,
    /// 类型
    pub kind: EffectorKind,
    /// 基础优先级权重
    pub priority: f32,
    /// 影响力（传播因子的起点）
    pub influence: f32,
}

impl EffectorTarget {
    pub fn new(joint: JointId, position: Vec3) -> Self {
        Self {
            joint,
            position,
            orientation: None,
            kind: EffectorKind::Ultimate,
            priority: 1.0,
            influence: get_config().effector_influence,
        }
    }

    pub fn with_orientation(mut self, orientation: Quat) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn with_kind(mut self, kind: EffectorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_influence(mut self, influence: f32) -> Self {
        self.influence = influence;
        self
    }
}

// ============================================================================
// 链
// ============================================================================

/// 效应器链（效应器在前，根在后）
#[derive(Clone, Debug)]
pub struct Chain {
    pub joints: Vec<JointId>,
    pub target: EffectorTarget,
}

impl Chain {
    #[inline]
    pub fn effector(&self) -> JointId {
        self.target.joint
    }

    #[inline]
    pub fn root(&self) -> Option<JointId> {
        self.joints.last().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn contains(&self, joint: JointId) -> bool {
        self.joints.contains(&joint)
    }
}

/// 从效应器沿父链走到根；效应器不存在时返回空列表
pub fn build_chain(skeleton: &JointArena, effector: JointId) -> Vec<JointId> {
    let mut chain = Vec::new();
    let max_len = skeleton.limits().max_depth + 1;
    let mut current = Some(effector);

    while let Some(id) = current {
        let Some(joint) = skeleton.get(id) else {
            break;
        };
        chain.push(id);
        if chain.len() > max_len {
            log::warn!("[EWBIK] 关节链超过最大深度 {}，截断于 {}", max_len, id);
            break;
        }
        current = joint.parent();
    }

    chain
}

/// 为每个效应器构建一条链；任何效应器无效时失败并指明该效应器
pub fn analyze_chains(skeleton: &JointArena, targets: &[EffectorTarget]) -> Result<Vec<Chain>> {
    let mut chains = Vec::with_capacity(targets.len());
    let mut seen = HashSet::new();

    for target in targets {
        if !seen.insert(target.joint) {
            return Err(EwbikError::ChainAnalysisFailed(format!(
                "effector {} is listed more than once",
                target.joint
            )));
        }
        let joints = build_chain(skeleton, target.joint);
        if joints.is_empty() {
            return Err(EwbikError::ChainAnalysisFailed(format!(
                "invalid effector {}: joint not found in skeleton",
                target.joint
            )));
        }
        chains.push(Chain { joints, target: *target });
    }

    Ok(chains)
}

/// 合并所有链并按 叶 → 祖先 排序，共享关节只出现一次
///
/// 拓扑排序（Kahn），同层保持首次出现顺序。
pub fn get_processing_order(chains: &[Chain]) -> Vec<JointId> {
    let mut appearance: Vec<JointId> = Vec::new();
    let mut seen: HashSet<JointId> = HashSet::new();
    let mut parent_of: HashMap<JointId, JointId> = HashMap::new();
    let mut pending_children: HashMap<JointId, usize> = HashMap::new();

    for chain in chains {
        for (i, joint) in chain.joints.iter().enumerate() {
            if seen.insert(*joint) {
                pending_children.entry(*joint).or_insert(0);
                appearance.push(*joint);
            }
            if let Some(parent) = chain.joints.get(i + 1) {
                if parent_of.insert(*joint, *parent).is_none() {
                    *pending_children.entry(*parent).or_insert(0) += 1;
                }
            }
        }
    }

    let mut queue: VecDeque<JointId> = appearance
        .iter()
        .filter(|j| pending_children.get(j) == Some(&0))
        .copied()
        .collect();
    let mut order = Vec::with_capacity(appearance.len());

    while let Some(joint) = queue.pop_front() {
        order.push(joint);
        if let Some(parent) = parent_of.get(&joint) {
            if let Some(count) = pending_children.get_mut(parent) {
                *count -= 1;
                if *count == 0 {
                    queue.push_back(*parent);
                }
            }
        }
    }

    order
}

/// 分叉点：出现在多条链中的关节（按首次出现顺序）
pub fn find_junctions(chains: &[Chain]) -> Vec<JointId> {
    let mut counts: HashMap<JointId, usize> = HashMap::new();
    let mut appearance = Vec::new();

    for chain in chains {
        for joint in &chain.joints {
            let count = counts.entry(*joint).or_insert(0);
            if *count == 0 {
                appearance.push(*joint);
            }
            *count += 1;
        }
    }

    appearance
        .into_iter()
        .filter(|j| counts.get(j).copied().unwrap_or(0) > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Body {
        arena: JointArena,
        root: JointId,
        spine: JointId,
        arm_l: JointId,
        hand_l: JointId,
        arm_r: JointId,
        hand_r: JointId,
    }

    fn body() -> Body {
        let mut arena = JointArena::new();
        let root = arena.create("root", None).unwrap();
        let spine = arena.create("spine", Some(root)).unwrap();
        let arm_l = arena.create("arm_l", Some(spine)).unwrap();
        let hand_l = arena.create("hand_l", Some(arm_l)).unwrap();
        let arm_r = arena.create("arm_r", Some(spine)).unwrap();
        let hand_r = arena.create("hand_r", Some(arm_r)).unwrap();
        Body { arena, root, spine, arm_l, hand_l, arm_r, hand_r }
    }

    #[test]
    fn test_build_chain_names() {
        let mut arena = JointArena::new();
        let root = arena.create("root", None).unwrap();
        let middle = arena.create("middle", Some(root)).unwrap();
        arena.create("leaf", Some(middle)).unwrap();

        let leaf = arena.find_by_name("leaf").unwrap();
        let names: Vec<&str> = build_chain(&arena, leaf)
            .into_iter()
            .map(|id| arena.name(id).unwrap())
            .collect();
        assert_eq!(names, vec!["leaf", "middle", "root"]);
    }

    #[test]
    fn test_build_chain_missing_effector() {
        let mut arena = JointArena::new();
        let ghost = arena.create("ghost", None).unwrap();
        arena.destroy(ghost).unwrap();
        assert!(build_chain(&arena, ghost).is_empty());
    }

    #[test]
    fn test_analyze_two_effectors() {
        let b = body();
        let targets = [
            EffectorTarget::new(b.hand_l, Vec3::X),
            EffectorTarget::new(b.hand_r, Vec3::NEG_X),
        ];
        let chains = analyze_chains(&b.arena, &targets).unwrap();
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].joints, vec![b.hand_l, b.arm_l, b.spine, b.root]);
        assert_eq!(chains[1].effector(), b.hand_r);

        let union: HashSet<JointId> = chains.iter().flat_map(|c| c.joints.iter().copied()).collect();
        let expected: HashSet<JointId> = b.arena.ids().collect();
        assert_eq!(union, expected);
    }

    #[test]
    fn test_analyze_invalid_effector() {
        let mut b = body();
        let gone = b.arena.create("gone", Some(b.spine)).unwrap();
        b.arena.destroy(gone).unwrap();
        let targets = [EffectorTarget::new(b.hand_l, Vec3::X), EffectorTarget::new(gone, Vec3::Y)];
        let err = analyze_chains(&b.arena, &targets).unwrap_err();
        match err {
            EwbikError::ChainAnalysisFailed(reason) => assert!(reason.contains(&gone.to_string())),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_processing_order_leaves_first() {
        let b = body();
        let targets = [
            EffectorTarget::new(b.hand_l, Vec3::X),
            EffectorTarget::new(b.hand_r, Vec3::NEG_X),
        ];
        let chains = analyze_chains(&b.arena, &targets).unwrap();
        let order = get_processing_order(&chains);
        assert_eq!(order.len(), 6);

        let pos = |id: JointId| order.iter().position(|j| *j == id).unwrap();
        assert!(pos(b.hand_l) < pos(b.arm_l));
        assert!(pos(b.hand_r) < pos(b.arm_r));
        assert!(pos(b.arm_l) < pos(b.spine));
        assert!(pos(b.arm_r) < pos(b.spine));
        assert!(pos(b.spine) < pos(b.root));
    }

    #[test]
    fn test_junctions() {
        let b = body();
        let targets = [
            EffectorTarget::new(b.hand_l, Vec3::X),
            EffectorTarget::new(b.hand_r, Vec3::NEG_X),
        ];
        let chains = analyze_chains(&b.arena, &targets).unwrap();
        assert_eq!(find_junctions(&chains), vec![b.spine, b.root]);
    }
}
