//! 人形骨骼逆向运动学（IK）求解器
//!
//! 求解器使用 FABRIK (Forward And Backward Reaching Inverse Kinematics)
//! 算法迭代逼近目标：
//!
//!     http://andreasaristidou.com/FABRIK.html
//!
//! 核心设计：
//! - Joint: 骨骼树节点，维护本地/世界双坐标系变换
//! - Constraint: 七种旋转约束，限制关节的父系相对旋转
//! - Solver: 把激活关节划分为链（chain），交替执行内向/外向遍历
//! - ConstraintFactory: 从 JSON 文档加载约束，按结构哈希去重共享
//!
//! 求解核心不抛错误：非法输入记录警告后跳过（见各方法文档）。
//! 只有约束文档加载会返回 [`IkError`]。

pub mod config;
pub mod constraint;
pub mod math;
pub mod skeleton;

pub use config::{get_config, reset_config, set_config, SolverConfig};
pub use constraint::{Constraint, ConstraintFactory, ConstraintKind};
pub use skeleton::{ConfigFlags, IkFlags, Joint, JointConfig, JointId, JointInfo, Solver};

use thiserror::Error;

/// 错误类型（仅约束文档加载路径会产生）
#[derive(Debug, Error)]
pub enum IkError {
    /// 文件读取失败
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 文档整体不是合法 JSON
    #[error("约束文档解析失败: {0}")]
    DocParse(String),

    /// 单条约束定义缺字段或类型未知
    #[error("约束定义无效: {0}")]
    BadConstraint(String),
}

/// Result 别名
pub type Result<T> = std::result::Result<T, IkError>;
