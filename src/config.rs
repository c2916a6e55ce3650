//! 求解器全局调参
//!
//! 所有参数扁平化，直接修改默认值即可。`solve()` 每次调用开始时
//! 读取一份快照，迭代过程中不再访问全局状态。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 求解器调参（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct SolverConfig {
    // ========== 迭代 ==========
    /// 每次 solve 的最少 FABRIK 迭代数，默认 4
    pub min_iterations: u32,
    /// 每次 solve 的最多迭代数，默认 16
    pub max_iterations: u32,

    // ========== 收敛辅助 ==========
    /// 求解前向静息姿态回拉的混合系数，默认 0.25
    /// 消除约束可行域内部的浮点漂移，并提供回归静息姿态的压力
    pub initial_relaxation_factor: f32,
    /// 旋转目标回压系数，默认 0.5
    /// 外向遍历时关节世界旋转向目标旋转插值的比例
    pub rot_target_backpressure: f32,

    // ========== CCD（实验性）==========
    /// CCD 单步摆动系数，默认 0.1
    /// 较小的值让摆动沿链长均摊
    pub ccd_swing_factor: f32,

    // ========== 调试 ==========
    /// 是否输出逐步调试日志，默认 false
    pub debug_log: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            // ====== 迭代 ======
            // 至少迭代 4 次再检查收敛，最多 16 次强制返回
            min_iterations: 4,
            max_iterations: 16,

            // ====== 收敛辅助 ======
            initial_relaxation_factor: 0.25,
            rot_target_backpressure: 0.5,

            // ====== CCD ======
            ccd_swing_factor: 0.1,

            // ====== 调试 ======
            debug_log: false,
        }
    }
}

/// 全局配置实例
static SOLVER_CONFIG: Lazy<RwLock<SolverConfig>> = Lazy::new(|| {
    RwLock::new(SolverConfig::default())
});

/// 获取当前配置（只读快照）
pub fn get_config() -> SolverConfig {
    SOLVER_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: SolverConfig) {
    *SOLVER_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *SOLVER_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = SolverConfig::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SolverConfig::default();
        assert_eq!(config.min_iterations, 4);
        assert_eq!(config.max_iterations, 16);
        assert!((config.initial_relaxation_factor - 0.25).abs() < f32::EPSILON);
        assert!((config.rot_target_backpressure - 0.5).abs() < f32::EPSILON);
        assert!((config.ccd_swing_factor - 0.1).abs() < f32::EPSILON);
        assert!(!config.debug_log);
    }
}
