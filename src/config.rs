//! 引擎配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。
//! 全局实例只提供默认值，各操作仍显式接收自己的配置。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 引擎配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // ========== 关节层级 ==========
    /// 最大层级深度，默认 100
    pub max_hierarchy_depth: usize,
    /// 单个节点最大子节点数，默认 1000
    pub max_children: usize,
    /// 变换矩阵元素最大绝对值，默认 1e12
    pub max_transform_magnitude: f32,

    // ========== 求解器 ==========
    /// 迭代次数，默认 10
    pub iterations: u32,
    /// 收敛距离，默认 0.001
    pub tolerance: f32,
    /// 单次迭代每个关节的最大旋转角（弧度）
    pub max_step_angle: f32,
    /// 关节保持当前姿态的权重（Wahba 拟合中的阻尼项）
    pub stiffness: f32,
    /// 目标朝向在拟合中的权重
    pub orientation_weight: f32,

    // ========== 传播 ==========
    /// 沿链衰减率，默认 0.8
    pub decay_rate: f32,
    /// 效应器影响力，默认 1.0
    pub effector_influence: f32,

    // ========== 约束 ==========
    /// 锥体包含判定容差（弧度）
    pub cone_epsilon: f32,
    /// 切线过渡带采样数
    pub tangent_samples: usize,

    // ========== 调试 ==========
    /// 是否输出调试日志，默认 false
    pub debug_log: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // ====== 关节层级 ======
            max_hierarchy_depth: 100,
            max_children: 1000,
            max_transform_magnitude: 1.0e12,

            // ====== 求解器 ======
            iterations: 10,
            tolerance: 0.001,
            // 防止单步翻转
            max_step_angle: std::f32::consts::FRAC_PI_4,
            stiffness: 0.05,
            orientation_weight: 0.5,

            // ====== 传播 ======
            decay_rate: 0.8,
            effector_influence: 1.0,

            // ====== 约束 ======
            cone_epsilon: 1.0e-4,
            tangent_samples: 16,

            // ====== 调试 ======
            debug_log: false,
        }
    }
}

/// 全局配置实例
static ENGINE_CONFIG: Lazy<RwLock<EngineConfig>> = Lazy::new(|| {
    RwLock::new(EngineConfig::default())
});

/// 获取当前配置（只读）
pub fn get_config() -> EngineConfig {
    ENGINE_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: EngineConfig) {
    *ENGINE_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *ENGINE_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = EngineConfig::default();
}
