//! 骨骼树与 IK 求解
//!
//! 核心设计：
//! - Joint: 骨骼树的单个节点，维护本地/世界双坐标系变换
//! - Solver: 持有 id → Joint 映射，负责所有跨关节操作
//! - JointConfig: 单次求解的逐关节输入（目标位置/旋转、本地覆盖）
//!
//! 关节树不用共享所有权：每个关节只记父/子关节的 id，所有
//! 树遍历都经过求解器的 id 映射。

mod joint;
mod solver;

pub use joint::Joint;
pub use solver::Solver;

use bitflags::bitflags;
use glam::{Quat, Vec3};

// ============================================================================
// 公共类型定义
// ============================================================================

/// 关节 ID（16 位有符号；合法关节 >= 0，负的父 id 表示"无父关节"）
pub type JointId = i16;

/// 默认可接受位置误差：半毫米
pub const DEFAULT_ACCEPTABLE_ERROR: f32 = 5.0e-4;

bitflags! {
    /// 单次求解的逐关节配置标志
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ConfigFlags: u8 {
        /// 覆盖本地位置
        const LOCAL_POS = 1 << 0;
        /// 覆盖并锁定本地旋转
        const LOCAL_ROT = 1 << 1;
        /// 覆盖本地缩放
        const LOCAL_SCALE = 1 << 2;
        /// 本次求解跳过该关节的约束
        const DISABLE_CONSTRAINT = 1 << 3;
        /// 世界坐标系末端位置目标
        const TARGET_POS = 1 << 4;
        /// 世界坐标系旋转目标
        const TARGET_ROT = 1 << 5;
        /// 实验性：目标已转移给父关节，跳过建链但保持激活
        const DELEGATED = 1 << 6;
    }
}

impl ConfigFlags {
    /// 位置类标志
    pub const MASK_POS: Self = Self::TARGET_POS.union(Self::LOCAL_POS);
    /// 旋转类标志
    pub const MASK_ROT: Self = Self::TARGET_ROT.union(Self::LOCAL_ROT);
    /// 求解结束后需要回收的本地覆盖类标志
    pub const MASK_LOCAL: Self = Self::LOCAL_POS
        .union(Self::LOCAL_ROT)
        .union(Self::DISABLE_CONSTRAINT);
}

bitflags! {
    /// IK 过程中的逐关节状态标志
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct IkFlags: u8 {
        /// IK 已调整 local_rot，求解结束后调用方要回收
        /// （与 ConfigFlags::LOCAL_ROT 共用位号，便于合并回收掩码）
        const LOCAL_ROT = 1 << 1;
        /// 本次求解的参与者
        const ACTIVE = 1 << 5;
        /// local_rot 在 IK 期间锁定（根关节，或显式本地旋转覆盖）
        const LOCAL_ROT_LOCKED = 1 << 7;
    }
}

// ============================================================================
// 静息几何
// ============================================================================

/// 关节的静息几何，来自宿主骨骼描述（只读，添加关节时读取一次）
#[derive(Clone, Copy, Debug)]
pub struct JointInfo {
    /// 静息 tip 位置（父坐标系）
    pub rest_pos: Vec3,
    /// 静息骨骼向量：tip → end（本地坐标系）
    pub rest_end: Vec3,
    /// 静息缩放，逐分量作用在 rest_pos 和 rest_end 上
    pub rest_scale: Vec3,
}

impl JointInfo {
    pub fn new(rest_pos: Vec3, rest_end: Vec3, rest_scale: Vec3) -> Self {
        Self {
            rest_pos,
            rest_end,
            rest_scale,
        }
    }
}

// ============================================================================
// 逐关节配置
// ============================================================================

/// 单次 solve() 的逐关节输入
///
/// 每项设置都是可选的，由对应的标志位指示。本地信息在父坐标系，
/// 目标信息在骨骼根坐标系（"世界"坐标系）。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct JointConfig {
    local_pos: Vec3,
    local_rot: Quat,
    local_scale: Vec3,
    target_pos: Vec3,
    target_rot: Quat,
    /// 以该关节为链外端时的最大链长，0 表示不限
    chain_limit: u8,
    flags: ConfigFlags,
}

impl JointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================
    // 本地覆盖（父坐标系）
    // ========================================

    #[inline]
    pub fn has_local_pos(&self) -> bool {
        self.flags.contains(ConfigFlags::LOCAL_POS)
    }

    #[inline]
    pub fn has_local_rot(&self) -> bool {
        self.flags.contains(ConfigFlags::LOCAL_ROT)
    }

    #[inline]
    pub fn has_local_scale(&self) -> bool {
        self.flags.contains(ConfigFlags::LOCAL_SCALE)
    }

    #[inline]
    pub fn constraint_is_disabled(&self) -> bool {
        self.flags.contains(ConfigFlags::DISABLE_CONSTRAINT)
    }

    pub fn set_local_pos(&mut self, pos: Vec3) {
        self.local_pos = pos;
        self.flags |= ConfigFlags::LOCAL_POS;
    }

    /// 设置并锁定本地旋转（IK 不会再改它）
    pub fn set_local_rot(&mut self, rot: Quat) {
        self.local_rot = rot.normalize();
        self.flags |= ConfigFlags::LOCAL_ROT;
    }

    pub fn set_local_scale(&mut self, scale: Vec3) {
        self.local_scale = scale;
        self.flags |= ConfigFlags::LOCAL_SCALE;
    }

    pub fn disable_constraint(&mut self) {
        self.flags |= ConfigFlags::DISABLE_CONSTRAINT;
    }

    #[inline]
    pub fn local_pos(&self) -> Vec3 {
        self.local_pos
    }

    #[inline]
    pub fn local_rot(&self) -> Quat {
        self.local_rot
    }

    #[inline]
    pub fn local_scale(&self) -> Vec3 {
        self.local_scale
    }

    // ========================================
    // 目标（骨骼根坐标系）
    // ========================================

    #[inline]
    pub fn has_target_pos(&self) -> bool {
        self.flags.contains(ConfigFlags::TARGET_POS)
    }

    #[inline]
    pub fn has_target_rot(&self) -> bool {
        self.flags.contains(ConfigFlags::TARGET_ROT)
    }

    pub fn set_target_pos(&mut self, pos: Vec3) {
        self.target_pos = pos;
        self.flags |= ConfigFlags::TARGET_POS;
    }

    pub fn set_target_rot(&mut self, rot: Quat) {
        self.target_rot = rot.normalize();
        self.flags |= ConfigFlags::TARGET_ROT;
    }

    #[inline]
    pub fn target_pos(&self) -> Vec3 {
        self.target_pos
    }

    #[inline]
    pub fn target_rot(&self) -> Quat {
        self.target_rot
    }

    // ========================================
    // 其它
    // ========================================

    /// 以该关节为链外端时的最大链长（0 = 不限）
    pub fn set_chain_limit(&mut self, limit: u8) {
        self.chain_limit = limit;
    }

    #[inline]
    pub fn chain_limit(&self) -> u8 {
        self.chain_limit
    }

    /// 实验性：把目标转移给父关节后调用，跳过建链但保持激活
    pub fn delegate(&mut self) {
        self.flags |= ConfigFlags::DELEGATED;
    }

    #[inline]
    pub fn has_delegated(&self) -> bool {
        self.flags.contains(ConfigFlags::DELEGATED)
    }

    #[inline]
    pub fn flags(&self) -> ConfigFlags {
        self.flags
    }

    /// 合并另一份配置：对方设置过的项覆盖本配置的对应项
    pub fn update_from(&mut self, other: &JointConfig) {
        if self.flags == other.flags {
            *self = *other;
            return;
        }
        if other.has_local_pos() {
            self.set_local_pos(other.local_pos);
        }
        if other.has_local_rot() {
            self.set_local_rot(other.local_rot);
        }
        if other.has_target_pos() {
            self.set_target_pos(other.target_pos);
        }
        if other.has_target_rot() {
            self.set_target_rot(other.target_rot);
        }
        if other.has_local_scale() {
            self.set_local_scale(other.local_scale);
        }
        if other.constraint_is_disabled() {
            self.disable_constraint();
        }
    }
}
