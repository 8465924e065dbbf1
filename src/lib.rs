//! EWBIK Engine - 多效应器 IK 求解器与 BMesh 拓扑引擎
//!
//! 提供：
//! - 关节层级（arena + 代数句柄，脏标记缓存全局变换）
//! - 链分段（效应器 → 根，分叉点检测，处理顺序）
//! - Kusudama 锥形方向约束
//! - 多效应器运动传播与冲突混合
//! - EWBIK 迭代求解（Wahba 最优旋转拟合）
//! - BMesh 半边网格（非流形径向环）

pub mod config;
pub mod constraint;
pub mod mesh;
pub mod skeleton;
pub mod solver;

pub use config::{get_config, reset_config, set_config, EngineConfig};
pub use constraint::{Cone, ConstraintViolation, KusudamaConstraint};
pub use mesh::{BMesh, EdgeId, FaceId, LoopId, VertexId};
pub use skeleton::{Chain, EffectorKind, EffectorTarget, Joint, JointArena, JointFlags, JointId};
pub use solver::{
    EffectorReport, EwbikSolver, HierarchyBias, JointAdjustment, MultiSolveResult, Pose, SolveResult,
    SolverConfig,
};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EwbikError {
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    #[error("Invalid transform: {0}")]
    InvalidTransform(String),

    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    #[error("Hierarchy too deep: depth {depth} exceeds limit {limit}")]
    HierarchyTooDeep { depth: usize, limit: usize },

    #[error("Too many children: {count} exceeds limit {limit}")]
    TooManyChildren { count: usize, limit: usize },

    #[error("No chain found for effector {0}")]
    NoChainFound(String),

    #[error("Chain analysis failed: {0}")]
    ChainAnalysisFailed(String),

    #[error("Multi-effector solving failed: {0}")]
    MultiEffectorSolveFailed(String),

    #[error("Invalid mesh element: {0}")]
    InvalidElement(String),
}

pub type Result<T> = std::result::Result<T, EwbikError>;
