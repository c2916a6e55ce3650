//! 骨骼关节节点
//!
//! Joint 是骨骼树的基本单元，通常有父关节、父坐标系中固定的
//! tip 位置 local_pos，以及自身本地坐标系中固定的骨骼向量 bone。
//! 重要成员一览：
//!
//!     local_pos = tip 在父坐标系中的位置
//!     local_rot = 相对父坐标系的旋转
//!     bone      = 本地坐标系中 tip → end 的不变偏移
//!     world_pos = tip 在世界坐标系（骨骼根坐标系）中的位置
//!     world_rot = 世界坐标系中的旋转
//!
//! 两条基本公式：
//!
//!     world_pos = parent.world_pos + parent.world_rot * local_pos
//!     world_rot = parent.world_rot * local_rot
//!
//! 关节的世界末端位置：
//!
//!     world_end_pos = world_pos + world_rot * bone
//!
//! 需要同时触碰多个关节的操作（内向/外向更新、约束 enforce、
//! 松弛）都在 Solver 上实现，这里只放单关节自身的状态操作。

use std::sync::Arc;

use glam::{Quat, Vec3};

use super::{ConfigFlags, IkFlags, JointConfig, JointId, JointInfo};
use crate::constraint::Constraint;

/// 缩放分量低于此值视为不可逆（防止除零引入 NaN）
const MIN_INVERTABLE_SCALE: f32 = 1.0e-15;

/// 骨骼树节点
#[derive(Clone, Debug)]
pub struct Joint {
    // ========================================
    // 静态数据（构建后不变）
    // ========================================
    pub(crate) id: JointId,
    /// 父关节 id，根关节为 None
    pub(crate) parent_id: Option<JointId>,
    /// 子关节 id 列表
    pub(crate) children: Vec<JointId>,
    /// 静息几何，resetFromInfo 时重新读取
    pub(crate) info: JointInfo,

    // ========================================
    // 动态数据（IK 过程更新）
    // ========================================
    /// 当前父坐标系中的 tip 位置
    pub(crate) local_pos: Vec3,
    /// 世界坐标系中的 tip 位置
    pub(crate) world_pos: Vec3,
    /// 相对父坐标系的旋转
    pub(crate) local_rot: Quat,
    /// 世界坐标系中的旋转
    pub(crate) world_rot: Quat,
    /// 本地坐标系中 tip → end 的骨骼向量
    pub(crate) bone: Vec3,
    /// 在静息几何之上的额外缩放
    pub(crate) local_scale: Vec3,
    /// local_pos 长度缓存
    pub(crate) local_pos_length: f32,

    pub(crate) constraint: Option<Arc<Constraint>>,
    /// 本轮求解的配置副本（建链时装入，resetFlags 时清除）
    pub(crate) config: Option<JointConfig>,
    /// config.flags() 的缓存
    pub(crate) config_flags: ConfigFlags,
    pub(crate) ik_flags: IkFlags,
}

impl Joint {
    pub(crate) fn new(id: JointId, info: JointInfo) -> Self {
        let mut joint = Self {
            id,
            parent_id: None,
            children: Vec::new(),
            info,
            local_pos: Vec3::ZERO,
            world_pos: Vec3::ZERO,
            local_rot: Quat::IDENTITY,
            world_rot: Quat::IDENTITY,
            bone: Vec3::ZERO,
            local_scale: Vec3::ONE,
            local_pos_length: 0.0,
            constraint: None,
            config: None,
            config_flags: ConfigFlags::empty(),
            ik_flags: IkFlags::empty(),
        };
        joint.reset_from_info();
        joint
    }

    /// 设置父关节。根关节的 local_rot 永远不被 IK 更新，开始时是
    /// 什么结束时就是什么，所以直接标记为锁定；这也简化了别处的
    /// 逻辑：所有未锁定的关节都可以假定有父关节。
    pub(crate) fn set_parent(&mut self, parent_id: Option<JointId>) {
        self.parent_id = parent_id;
        if parent_id.is_none() {
            self.ik_flags = IkFlags::LOCAL_ROT_LOCKED;
        }
    }

    /// 从静息几何重建本地变换
    pub(crate) fn reset_from_info(&mut self) {
        let scale = self.info.rest_scale;
        self.local_pos = self.info.rest_pos * scale;
        self.bone = self.info.rest_end * scale;
        self.local_pos_length = self.local_pos.length();
        // 注意：静息缩放不存进 local_scale。local_scale 表示在
        // 静息几何之上的额外调整。
        self.local_scale = Vec3::ONE;
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn id(&self) -> JointId {
        self.id
    }

    #[inline]
    pub fn parent_id(&self) -> Option<JointId> {
        self.parent_id
    }

    #[inline]
    pub fn children(&self) -> &[JointId] {
        &self.children
    }

    #[inline]
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    #[inline]
    pub fn local_pos(&self) -> Vec3 {
        self.local_pos
    }

    #[inline]
    pub fn local_rot(&self) -> Quat {
        self.local_rot
    }

    /// tip 的世界位置
    #[inline]
    pub fn world_tip_pos(&self) -> Vec3 {
        self.world_pos
    }

    #[inline]
    pub fn world_rot(&self) -> Quat {
        self.world_rot
    }

    #[inline]
    pub fn bone(&self) -> Vec3 {
        self.bone
    }

    #[inline]
    pub fn bone_length(&self) -> f32 {
        self.bone.length()
    }

    #[inline]
    pub fn local_pos_length(&self) -> f32 {
        self.local_pos_length
    }

    #[inline]
    pub fn local_scale(&self) -> Vec3 {
        self.local_scale
    }

    #[inline]
    pub fn constraint(&self) -> Option<&Arc<Constraint>> {
        self.constraint.as_ref()
    }

    #[inline]
    pub fn config(&self) -> Option<&JointConfig> {
        self.config.as_ref()
    }

    /// end 的世界位置
    #[inline]
    pub fn compute_world_end_pos(&self) -> Vec3 {
        self.world_pos + self.world_rot * self.bone
    }

    // ========================================
    // 标志
    // ========================================

    #[inline]
    pub fn activate(&mut self) {
        self.ik_flags |= IkFlags::ACTIVE;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.ik_flags.contains(IkFlags::ACTIVE)
    }

    #[inline]
    pub fn local_rot_locked(&self) -> bool {
        self.ik_flags.contains(IkFlags::LOCAL_ROT_LOCKED)
    }

    #[inline]
    pub fn has_pos_target(&self) -> bool {
        self.config_flags.contains(ConfigFlags::TARGET_POS)
    }

    #[inline]
    pub fn has_rot_target(&self) -> bool {
        self.config_flags.contains(ConfigFlags::TARGET_ROT)
    }

    #[inline]
    pub fn has_disabled_constraint(&self) -> bool {
        self.config_flags.contains(ConfigFlags::DISABLE_CONSTRAINT)
    }

    #[inline]
    pub fn has_delegated(&self) -> bool {
        self.config_flags.contains(ConfigFlags::DELEGATED)
    }

    #[inline]
    pub fn config_flags(&self) -> ConfigFlags {
        self.config_flags
    }

    /// 预计该关节会被 IK 更新时调用，提醒之后回收它的 local_rot
    #[inline]
    pub fn flag_for_harvest(&mut self) {
        self.ik_flags |= IkFlags::LOCAL_ROT;
    }

    /// 求解结束后调用方要回收的标志集合
    #[inline]
    pub fn harvest_flags(&self) -> ConfigFlags {
        ConfigFlags::from_bits_truncate(self.config_flags.bits() | self.ik_flags.bits())
            & ConfigFlags::MASK_LOCAL
    }

    /// 记住本轮的配置；实际应用发生在建链阶段
    pub(crate) fn set_config(&mut self, config: &JointConfig) {
        self.config = Some(*config);
        self.config_flags = config.flags();
    }

    /// 清除配置与 IK 状态。根关节始终保持 LOCAL_ROT_LOCKED。
    pub(crate) fn reset_flags(&mut self) {
        self.config = None;
        self.config_flags = ConfigFlags::empty();
        self.ik_flags = if self.parent_id.is_some() {
            IkFlags::empty()
        } else {
            IkFlags::LOCAL_ROT_LOCKED
        };
    }

    // ========================================
    // 变换写入
    // ========================================

    #[inline]
    pub(crate) fn set_world_pos(&mut self, pos: Vec3) {
        self.world_pos = pos;
    }

    #[inline]
    pub(crate) fn set_world_rot(&mut self, rot: Quat) {
        self.world_rot = rot;
    }

    #[inline]
    pub(crate) fn shift_pos(&mut self, shift: Vec3) {
        self.world_pos += shift;
    }

    /// 锁定状态下写入无效
    pub(crate) fn set_local_rot(&mut self, new_local_rot: Quat) {
        if !self.local_rot_locked() {
            self.local_rot = new_local_rot;
        }
    }

    /// 锁定本地旋转并激活（根关节的局部坐标系就是世界坐标系）
    pub(crate) fn lock_local_rot(&mut self, local_rot: Quat) {
        self.local_rot = local_rot;
        self.ik_flags |= IkFlags::LOCAL_ROT_LOCKED;
        self.activate();
        if self.parent_id.is_none() {
            self.world_rot = local_rot;
        }
    }

    /// 覆盖本地位置。只应在 IK 迭代开始之前调用一次。
    pub(crate) fn set_local_pos(&mut self, pos: Vec3) {
        self.local_pos = pos * self.local_scale;
        self.local_pos_length = self.local_pos.length();
        if self.parent_id.is_none() {
            self.world_pos = self.local_pos;
        }
    }

    /// 相对重缩放：记录新的 local_scale，并把 new/old 的比值立即
    /// 作用到 local_pos 和 bone 上。第一次调用相当于乘 scale 本身
    /// （local_scale 初始为 1），之后的调用乘的是增量比值。
    /// 只应在 IK 迭代开始之前调用。
    pub(crate) fn set_local_scale(&mut self, scale: Vec3) {
        let mut re_scale = Vec3::ZERO;
        for i in 0..3 {
            re_scale[i] = if self.local_scale[i] > MIN_INVERTABLE_SCALE {
                scale[i] / self.local_scale[i]
            } else {
                0.0
            };
        }
        self.local_scale = scale;
        self.bone *= re_scale;
        self.local_pos *= re_scale;
        self.local_pos_length = self.local_pos.length();
    }

    /// 返回去掉静息缩放后的 local_pos
    ///
    /// IK 期间 local_pos 一直携带静息缩放以免反复重算，回收时
    /// 调用方需要未缩放坐标系中的值。
    pub fn pre_scaled_local_pos(&self) -> Vec3 {
        let mut inv_scale = self.info.rest_scale;
        for i in 0..3 {
            inv_scale[i] = if inv_scale[i] > MIN_INVERTABLE_SCALE {
                1.0 / inv_scale[i]
            } else {
                0.0
            };
        }
        self.local_pos * inv_scale
    }

    /// 修改配置副本中的目标位置（用于连续末端目标修正）
    pub(crate) fn set_target_pos(&mut self, pos: Vec3) {
        if self.has_pos_target() {
            if let Some(config) = self.config.as_mut() {
                config.set_target_pos(pos);
            }
        }
    }

    pub(crate) fn set_constraint(&mut self, constraint: Option<Arc<Constraint>>) {
        self.constraint = constraint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_info() -> JointInfo {
        JointInfo::new(
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.5, 0.0, 0.0),
            Vec3::ONE,
        )
    }

    #[test]
    fn test_new_joint_reads_info() {
        let joint = Joint::new(3, test_info());
        assert_eq!(joint.id(), 3);
        assert_eq!(joint.local_pos(), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(joint.bone(), Vec3::new(0.5, 0.0, 0.0));
        assert!((joint.local_pos_length() - 1.0).abs() < 1.0e-6);
        assert_eq!(joint.local_scale(), Vec3::ONE);
    }

    #[test]
    fn test_info_scale_applied() {
        let info = JointInfo::new(
            Vec3::new(1.0, 2.0, 0.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(2.0, 0.5, 1.0),
        );
        let joint = Joint::new(0, info);
        assert_eq!(joint.local_pos(), Vec3::new(2.0, 1.0, 0.0));
        assert_eq!(joint.bone(), Vec3::new(2.0, 0.0, 1.0));
        // local_scale 依然是 1：静息缩放不计入
        assert_eq!(joint.local_scale(), Vec3::ONE);
    }

    #[test]
    fn test_parentless_joint_is_locked() {
        let mut joint = Joint::new(0, test_info());
        joint.set_parent(None);
        assert!(joint.local_rot_locked());

        let mut child = Joint::new(1, test_info());
        child.set_parent(Some(0));
        assert!(!child.local_rot_locked());
    }

    #[test]
    fn test_set_local_rot_respects_lock() {
        let mut joint = Joint::new(0, test_info());
        joint.set_parent(None);
        let rot = Quat::from_axis_angle(Vec3::Z, 1.0);
        joint.set_local_rot(rot);
        assert_eq!(joint.local_rot(), Quat::IDENTITY);

        joint.lock_local_rot(rot);
        assert_eq!(joint.local_rot(), rot);
        assert_eq!(joint.world_rot(), rot);
    }

    #[test]
    fn test_relative_rescale() {
        let mut joint = Joint::new(0, test_info());
        // 第一次：按 scale 本身缩放
        joint.set_local_scale(Vec3::splat(2.0));
        assert_eq!(joint.local_pos(), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(joint.bone(), Vec3::new(1.0, 0.0, 0.0));

        // 第二次：按 new/old = 3/2 的比值缩放
        joint.set_local_scale(Vec3::splat(3.0));
        assert_eq!(joint.local_pos(), Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(joint.bone(), Vec3::new(1.5, 0.0, 0.0));
        assert!((joint.local_pos_length() - 3.0).abs() < 1.0e-6);
    }

    #[test]
    fn test_near_zero_scale_guard() {
        let mut joint = Joint::new(0, test_info());
        joint.set_local_scale(Vec3::new(0.0, 1.0, 1.0));
        // 零分量直接坍缩为 0，之后的重缩放不会引入 NaN
        joint.set_local_scale(Vec3::new(2.0, 1.0, 1.0));
        assert!(joint.local_pos().is_finite());
        assert_eq!(joint.local_pos().x, 0.0);
    }

    #[test]
    fn test_pre_scaled_local_pos() {
        let info = JointInfo::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::X,
            Vec3::new(2.0, 2.0, 2.0),
        );
        let joint = Joint::new(0, info);
        let pre = joint.pre_scaled_local_pos();
        assert!((pre - Vec3::new(1.0, 2.0, 3.0)).length() < 1.0e-5);
    }

    #[test]
    fn test_reset_flags_preserves_root_lock() {
        let mut root = Joint::new(0, test_info());
        root.set_parent(None);
        root.activate();
        root.flag_for_harvest();
        root.reset_flags();
        assert!(root.local_rot_locked());
        assert!(!root.is_active());

        let mut child = Joint::new(1, test_info());
        child.set_parent(Some(0));
        let mut config = JointConfig::new();
        config.set_local_rot(Quat::from_axis_angle(Vec3::Y, 0.5));
        child.set_config(&config);
        child.lock_local_rot(config.local_rot());
        child.reset_flags();
        assert!(!child.local_rot_locked());
        assert!(child.config().is_none());
    }

    #[test]
    fn test_harvest_flags() {
        let mut joint = Joint::new(1, test_info());
        joint.set_parent(Some(0));
        joint.flag_for_harvest();
        assert!(joint.harvest_flags().contains(ConfigFlags::LOCAL_ROT));

        let mut config = JointConfig::new();
        config.set_local_pos(Vec3::X);
        config.disable_constraint();
        joint.set_config(&config);
        let flags = joint.harvest_flags();
        assert!(flags.contains(ConfigFlags::LOCAL_POS));
        assert!(flags.contains(ConfigFlags::DISABLE_CONSTRAINT));
        // 目标类标志不在回收集合里
        assert!(!flags.contains(ConfigFlags::TARGET_POS));
    }

    #[test]
    fn test_world_end_pos() {
        let mut joint = Joint::new(0, test_info());
        joint.set_world_pos(Vec3::new(0.0, 1.0, 0.0));
        joint.set_world_rot(Quat::from_axis_angle(Vec3::Z, std::f32::consts::FRAC_PI_2));
        let end = joint.compute_world_end_pos();
        // bone (0.5,0,0) 绕 z 转 90° → (0,0.5,0)
        assert!((end - Vec3::new(0.0, 1.5, 0.0)).length() < 1.0e-5);
    }
}
