//! 求解器
//!
//! - wahba: 加权方向对的最优旋转（SVD）
//! - propagation: 沿链衰减与多效应器混合
//! - ewbik: 迭代求解主循环（单链 / 多链并行）

mod ewbik;
pub mod propagation;
pub mod wahba;

pub use ewbik::{EffectorReport, EwbikSolver, MultiSolveResult, Pose, SolveResult, SolverConfig};
pub use propagation::{
    apply_propagation, blend_rotations, calculate_propagation_factors,
    combine_multi_effector_solutions, effector_type_weight, hierarchy_weight, smooth_propagation,
    EffectorSolution, HierarchyBias, JointAdjustment, PropagationConfig,
};
pub use wahba::{best_fit_rotation, Heading};
