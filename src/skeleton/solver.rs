//! IK 求解器
//!
//! Solver 持有整棵骨骼树（id → Joint 映射）和本轮配置，计算各
//! 关节的父系相对旋转，使末端执行器到达（或尽量接近）目标。
//!
//! 求解流程：
//! 1. 按配置重建链（chain）：把激活关节集划分为有序链段
//! 2. 从每个激活根出发向静息姿态松弛一小步
//! 3. 迭代 FABRIK：内向遍历（链按外端 id 降序）→ 刷新激活根的
//!    子关节本地旋转 → 外向遍历（链按外端 id 升序）
//! 4. 统计最大位置误差，达标或迭代耗尽后返回
//!
//! 所有跨关节操作（内向/外向更新、约束 enforce、松弛、CCD 摆动）
//! 都实现在这里：先把父/子关节的 Copy 变换字段读进局部变量，再
//! 写回目标关节，避免共享所有权。
//!
//! 求解核心不抛错误：非法 id 记录警告后跳过，未收敛时照常返回
//! 误差由调用方检查。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use glam::{Quat, Vec3};

use super::{
    ConfigFlags, Joint, JointConfig, JointId, JointInfo, DEFAULT_ACCEPTABLE_ERROR,
};
use crate::config::{get_config, SolverConfig};
use crate::constraint::{Constraint, ConstraintKind};
use crate::math::{
    normalized_or_identity, quat_almost_equal, quat_near_identity, shortest_arc, VERY_SMALL_ANGLE,
};

/// 世界坐标系铰链 enforce 中叉积枢轴的最小长度
const MIN_PIVOT_LENGTH: f32 = 1.0e-6;

/// 膝关节扭转低于此值时不做消除
const MIN_KNEE_TWIST: f32 = 0.1;

/// IK 求解器
///
/// 骨骼通过 `add_joint` 按 id 升序构建一次，之后拓扑不变；每轮
/// 求解只有变换和逐关节配置会变化。
#[derive(Debug)]
pub struct Solver {
    /// 骨骼树，根关节 id 最小
    skeleton: BTreeMap<JointId, Joint>,
    /// 本轮配置（按 id 升序）
    configs: BTreeMap<JointId, JointConfig>,
    /// 链映射：外端关节 id → 由外向内的关节序列
    chains: BTreeMap<JointId, Vec<JointId>>,
    /// sub-base 白名单：骨骼拓扑靠不住时由外部指定
    sub_base_ids: BTreeSet<JointId>,
    /// sub-root 白名单：链不越过这些关节继续向根延伸
    sub_root_ids: BTreeSet<JointId>,
    /// 链内端中父关节缺失或未激活的关节
    active_roots: BTreeSet<JointId>,
    /// 本轮全部激活关节
    active_joints: Vec<JointId>,
    /// 腕关节列表，供 drop-elbow 类修正使用
    wrist_ids: Vec<JointId>,
    acceptable_error: f32,
    last_error: f32,
    root_id: JointId,
    /// 实验性：用 CCD 代替 FABRIK
    ccd_enabled: bool,
    /// solve() 开始时的调参快照
    tuning: SolverConfig,
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver {
    pub fn new() -> Self {
        Self {
            skeleton: BTreeMap::new(),
            configs: BTreeMap::new(),
            chains: BTreeMap::new(),
            sub_base_ids: BTreeSet::new(),
            sub_root_ids: BTreeSet::new(),
            active_roots: BTreeSet::new(),
            active_joints: Vec::new(),
            wrist_ids: Vec::new(),
            acceptable_error: DEFAULT_ACCEPTABLE_ERROR,
            last_error: 0.0,
            root_id: -1,
            ccd_enabled: false,
            tuning: SolverConfig::default(),
        }
    }

    // ========================================================================
    // 骨骼构建
    // ========================================================================

    pub fn set_root_id(&mut self, root_id: JointId) {
        self.root_id = root_id;
    }

    #[inline]
    pub fn root_id(&self) -> JointId {
        self.root_id
    }

    /// 添加关节。必须按 id 升序调用：父关节要么已存在，要么
    /// parent_id 小于根 id（此时该关节就是无父的根）。
    /// 非法输入记录警告后忽略。
    pub fn add_joint(
        &mut self,
        joint_id: JointId,
        parent_id: JointId,
        info: JointInfo,
        constraint: Option<Arc<Constraint>>,
    ) {
        if joint_id < 0 {
            log::warn!("[IK] 添加失败: joint_id={} 非法", joint_id);
            return;
        }
        if self.skeleton.contains_key(&joint_id) {
            log::warn!("[IK] 添加失败: joint_id={} 已存在", joint_id);
            return;
        }
        let parent = if self.skeleton.contains_key(&parent_id) {
            Some(parent_id)
        } else if parent_id >= self.root_id {
            log::warn!(
                "[IK] 添加 joint_id={} 失败: 找不到 parent_id={}",
                joint_id,
                parent_id
            );
            return;
        } else {
            None
        };

        let mut joint = Joint::new(joint_id, info);
        joint.set_parent(parent);
        joint.set_constraint(constraint);
        if let Some(pid) = parent {
            if let Some(parent_joint) = self.skeleton.get_mut(&pid) {
                parent_joint.children.push(joint_id);
            }
        }
        self.skeleton.insert(joint_id, joint);
        self.reset_joint(joint_id);
    }

    /// 指定一个腕关节，供 drop-elbow 修正定位手臂
    pub fn add_wrist_id(&mut self, wrist_id: JointId) {
        if !self.skeleton.contains_key(&wrist_id) {
            log::warn!("[IK] 找不到 wrist_id={}", wrist_id);
            return;
        }
        self.wrist_ids.push(wrist_id);
    }

    /// 指定已知有多条子链的关节（如胸、腕），代替拓扑推断
    pub fn set_sub_base_ids(&mut self, ids: BTreeSet<JointId>) {
        self.sub_base_ids = ids;
    }

    /// 指定链的截止关节：链走到这里就停，不再向根延伸
    pub fn set_sub_root_ids(&mut self, ids: BTreeSet<JointId>) {
        self.sub_root_ids = ids;
    }

    pub fn set_acceptable_error(&mut self, slop: f32) {
        self.acceptable_error = slop;
    }

    /// 实验性：切换到 CCD 求解
    pub fn set_ccd_enabled(&mut self, enabled: bool) {
        self.ccd_enabled = enabled;
    }

    #[inline]
    pub fn last_error(&self) -> f32 {
        self.last_error
    }

    #[inline]
    pub fn num_joints(&self) -> usize {
        self.skeleton.len()
    }

    /// 本轮激活关节 id（回收 local_rot 用）
    #[inline]
    pub fn active_joints(&self) -> &[JointId] {
        &self.active_joints
    }

    #[inline]
    pub fn wrist_ids(&self) -> &[JointId] {
        &self.wrist_ids
    }

    fn is_sub_base(&self, joint_id: JointId) -> bool {
        self.sub_base_ids.contains(&joint_id)
    }

    fn is_sub_root(&self, joint_id: JointId) -> bool {
        !self.sub_root_ids.is_empty() && self.sub_root_ids.contains(&joint_id)
    }

    // ========================================================================
    // 逐关节读写
    // ========================================================================

    /// 只读访问单个关节
    pub fn joint(&self, joint_id: JointId) -> Option<&Joint> {
        self.skeleton.get(&joint_id)
    }

    pub fn get_joint_local_pos(&self, joint_id: JointId) -> Option<Vec3> {
        self.skeleton.get(&joint_id).map(|j| j.local_pos())
    }

    pub fn get_joint_local_rot(&self, joint_id: JointId) -> Option<Quat> {
        self.skeleton.get(&joint_id).map(|j| j.local_rot())
    }

    pub fn get_joint_local_transform(&self, joint_id: JointId) -> Option<(Vec3, Quat)> {
        self.skeleton
            .get(&joint_id)
            .map(|j| (j.local_pos(), j.local_rot()))
    }

    pub fn get_joint_world_tip_pos(&self, joint_id: JointId) -> Option<Vec3> {
        self.skeleton.get(&joint_id).map(|j| j.world_tip_pos())
    }

    pub fn get_joint_world_end_pos(&self, joint_id: JointId) -> Option<Vec3> {
        self.skeleton
            .get(&joint_id)
            .map(|j| j.compute_world_end_pos())
    }

    pub fn get_joint_world_rot(&self, joint_id: JointId) -> Option<Quat> {
        self.skeleton.get(&joint_id).map(|j| j.world_rot())
    }

    /// 重读静息几何并替换约束
    ///
    /// 所有关节几何重置完之后调用方需要重新计算 reach 类缓存。
    pub fn reset_joint_geometry(&mut self, joint_id: JointId, constraint: Option<Arc<Constraint>>) {
        let Some(joint) = self.skeleton.get_mut(&joint_id) else {
            log::warn!("[IK] 重置失败: 未知 joint_id={}", joint_id);
            return;
        };
        joint.reset_from_info();
        joint.set_constraint(constraint);
    }

    /// 整棵骨骼回到静息姿态（如人形的 T-Pose）
    pub fn reset_skeleton(&mut self) {
        let Some((&first_id, _)) = self.skeleton.iter().next() else {
            return;
        };
        self.reset_joint_recursively(first_id);
    }

    /// 从 from_id 的 tip 到 to_id 的 end 的静息偏移；参数反序时取负
    pub fn compute_reach(&self, to_id: JointId, from_id: JointId) -> Vec3 {
        let (ancestor, descendent, swapped) = if from_id > to_id {
            (to_id, from_id, true)
        } else {
            (from_id, to_id, false)
        };
        let mut reach = Vec3::ZERO;
        if let Some(joint) = self.skeleton.get(&descendent) {
            // 从后代向上走到祖先
            let mut chain_reach = joint.bone;
            let mut current = Some(joint);
            while let Some(j) = current {
                chain_reach += j.local_pos;
                current = j.parent_id.and_then(|pid| self.skeleton.get(&pid));
                if let Some(parent) = current {
                    if parent.id == ancestor {
                        reach = chain_reach;
                        break;
                    }
                }
            }
        }
        if swapped {
            -reach
        } else {
            reach
        }
    }

    // ========================================================================
    // 配置
    // ========================================================================

    /// 应用新一轮配置；与上一轮逐项相同时返回 false，
    /// 调用方可据此跳过 solve()。
    pub fn update_joint_configs(&mut self, configs: &BTreeMap<JointId, JointConfig>) -> bool {
        let mut something_changed = configs.len() != self.configs.len();
        if !something_changed {
            for (joint_id, old_config) in &self.configs {
                let Some(new_config) = configs.get(joint_id) else {
                    something_changed = true;
                    break;
                };
                let mask = old_config.flags();
                if mask != new_config.flags() {
                    something_changed = true;
                    break;
                }
                if mask.contains(ConfigFlags::TARGET_POS)
                    && old_config.target_pos().distance(new_config.target_pos())
                        > self.acceptable_error
                {
                    something_changed = true;
                    break;
                }
                if mask.contains(ConfigFlags::TARGET_ROT)
                    && !quat_almost_equal(old_config.target_rot(), new_config.target_rot())
                {
                    something_changed = true;
                    break;
                }
                if mask.contains(ConfigFlags::LOCAL_POS)
                    && old_config.local_pos().distance(new_config.local_pos())
                        > self.acceptable_error
                {
                    something_changed = true;
                    break;
                }
                if mask.contains(ConfigFlags::LOCAL_ROT)
                    && !quat_almost_equal(old_config.local_rot(), new_config.local_rot())
                {
                    something_changed = true;
                    break;
                }
            }
        }
        if something_changed {
            self.configs = configs.clone();
        }
        something_changed
    }

    // ========================================================================
    // 求解入口
    // ========================================================================

    /// 求解当前配置，返回最大位置误差
    pub fn solve(&mut self) -> f32 {
        self.tuning = get_config();
        self.rebuild_all_chains();

        // 每次求解前向静息姿态松弛一小步：消除约束可行域内部的
        // 浮点漂移，同时给解一个回归静息姿态的压力
        let relaxation_factor = self.tuning.initial_relaxation_factor;
        let roots: Vec<JointId> = self.active_roots.iter().copied().collect();
        for root_id in roots {
            self.relax_rotations_recursively(root_id, relaxation_factor);
        }

        let mut max_error = f32::MAX;
        let mut iteration = 0;
        while iteration < self.tuning.min_iterations
            || (iteration < self.tuning.max_iterations && max_error > self.acceptable_error)
        {
            if self.tuning.debug_log {
                log::debug!("[IK] 迭代 {} 误差 {}", iteration, max_error);
            }
            max_error = self.solve_once();
            iteration += 1;
        }
        self.last_error = max_error;
        max_error
    }

    fn solve_once(&mut self) -> f32 {
        if self.ccd_enabled {
            // CCD - 实验性
            self.execute_ccd_pass();
        } else {
            // FABRIK
            self.execute_fabrik_pass(true);
        }
        self.measure_max_error()
    }

    // ========================================================================
    // 链构建
    // ========================================================================

    /// 把激活关节集划分为链段
    ///
    /// 每条链从一个外端（位置目标关节或 sub-base）出发，沿父链
    /// 向根走，终止于：根、sub-root、另一条链的外端（已有位置
    /// 目标的祖先）、或分叉的 sub-base。内向遍历按外端 id 降序
    /// 处理链，保证 sub-base 被更新时它的激活子关节都已就位，
    /// 可以求末端质心；外向遍历按升序处理。
    fn rebuild_all_chains(&mut self) {
        // 清掉上一轮的激活状态与配置缓存
        let old_active = std::mem::take(&mut self.active_joints);
        for joint_id in old_active {
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.reset_flags();
            }
        }
        self.chains.clear();
        self.active_roots.clear();

        // configs 按 id 升序，建链逻辑依赖这一点：父关节的配置
        // 一定先于子关节被应用
        let configs: Vec<(JointId, JointConfig)> =
            self.configs.iter().map(|(id, c)| (*id, *c)).collect();
        let mut sub_bases: BTreeSet<JointId> = BTreeSet::new();

        for (joint_id, config) in &configs {
            let Some(joint) = self.skeleton.get_mut(joint_id) else {
                continue;
            };
            // 关节缓存一份配置副本，本轮求解期间有效
            joint.set_config(config);

            if *joint_id == self.root_id {
                // 根关节：局部坐标系就是世界坐标系
                let flags = config.flags();
                if flags.intersects(ConfigFlags::MASK_ROT) {
                    let rot = if flags.contains(ConfigFlags::LOCAL_ROT) {
                        config.local_rot()
                    } else {
                        config.target_rot()
                    };
                    joint.lock_local_rot(rot);
                    self.active_roots.insert(*joint_id);
                }
                if flags.intersects(ConfigFlags::MASK_POS) {
                    let pos = if flags.contains(ConfigFlags::LOCAL_POS) {
                        config.local_pos()
                    } else {
                        config.target_pos()
                    };
                    if let Some(joint) = self.skeleton.get_mut(joint_id) {
                        joint.set_local_pos(pos);
                        joint.activate();
                    }
                }
                if flags.contains(ConfigFlags::LOCAL_SCALE) {
                    if let Some(joint) = self.skeleton.get_mut(joint_id) {
                        joint.set_local_scale(config.local_scale());
                    }
                }
                continue;
            }

            if config.has_local_rot() {
                joint.lock_local_rot(config.local_rot());
            }

            if config.has_delegated() {
                // 目标已转移给父关节，不为它建链
                continue;
            }

            if config.has_target_pos() {
                let chain = self.build_chain(*joint_id, effective_limit(config), &mut sub_bases);
                self.chains.insert(*joint_id, chain);

                // 连续末端目标修正：父子同时有位置目标时无法保证
                // 调用方给的两个位置是可解的。以子目标为准，把父
                // 目标搬到两目标连线上恰好一段 tip 间距之外，保证
                // 骨长不被拉伸。
                let parent_id = self.skeleton.get(joint_id).and_then(|j| j.parent_id);
                if let Some(pid) = parent_id {
                    let parent_has_target = self
                        .skeleton
                        .get(&pid)
                        .map_or(false, |p| p.has_pos_target());
                    if parent_has_target {
                        let child_target = config.target_pos();
                        let parent_target = self.skeleton[&pid]
                            .config()
                            .map(|c| c.target_pos())
                            .unwrap_or(child_target);
                        let distance = self
                            .skeleton
                            .get(joint_id)
                            .map_or(0.0, |j| j.local_pos_length());
                        let direction =
                            (parent_target - child_target).normalize_or_zero() * distance;
                        if let Some(parent) = self.skeleton.get_mut(&pid) {
                            parent.set_target_pos(child_target + direction);
                        }
                    }
                }
            } else if config.has_target_rot() {
                let chain = self.build_chain(*joint_id, effective_limit(config), &mut sub_bases);
                self.chains.insert(*joint_id, chain);
            }

            // 本地覆盖在建链阶段一次性应用，不参与迭代
            if config.has_local_pos() || config.has_local_scale() {
                if let Some(joint) = self.skeleton.get_mut(joint_id) {
                    if config.has_local_pos() {
                        joint.set_local_pos(config.local_pos());
                        joint.activate();
                    }
                    if config.has_local_scale() {
                        joint.set_local_scale(config.local_scale());
                        joint.activate();
                    }
                }
            }
        }

        // 每个 sub-base 获得自己的链；链的内端可能又是新的 sub-base
        while !sub_bases.is_empty() {
            let mut new_sub_bases = BTreeSet::new();
            for joint_id in sub_bases {
                let chain = self.build_chain(joint_id, usize::MAX, &mut new_sub_bases);
                self.chains.insert(joint_id, chain);
            }
            sub_bases = new_sub_bases;
        }

        // 消除"假 sub-base"：外端既没有位置目标也不在白名单里，
        // 且只有一个激活子关节的链，是拓扑分叉但 IK 不分叉的产物，
        // 把它拼接进以它为内端的那条链
        let mut joins: Vec<JointId> = Vec::new();
        for chain in self.chains.values() {
            let Some(&outer_id) = chain.first() else {
                continue;
            };
            let outer_has_target = self
                .skeleton
                .get(&outer_id)
                .map_or(false, |j| j.has_pos_target());
            if !outer_has_target
                && !self.is_sub_base(outer_id)
                && self.single_active_child(outer_id).is_some()
            {
                joins.push(outer_id);
            }
        }
        for join_id in joins {
            let recipient_key = self
                .chains
                .iter()
                .find(|(key, chain)| **key != join_id && chain.last() == Some(&join_id))
                .map(|(key, _)| *key);
            if let Some(key) = recipient_key {
                if let Some(donor) = self.chains.remove(&join_id) {
                    if let Some(recipient) = self.chains.get_mut(&key) {
                        recipient.extend_from_slice(&donor[1..]);
                    }
                }
            }
        }

        // 记录激活根：链内端的父关节缺失或未激活
        let inner_ends: Vec<JointId> = self
            .chains
            .values()
            .filter_map(|chain| chain.last().copied())
            .collect();
        for inner_id in inner_ends {
            let parent_active = self
                .skeleton
                .get(&inner_id)
                .and_then(|j| j.parent_id)
                .and_then(|pid| self.skeleton.get(&pid))
                .map_or(false, |p| p.is_active());
            if !parent_active {
                self.active_roots.insert(inner_id);
            }
        }

        // 缓存激活关节列表并标记回收
        self.active_joints = self
            .skeleton
            .iter()
            .filter(|(_, j)| j.is_active())
            .map(|(id, _)| *id)
            .collect();
        for joint_id in &self.active_joints {
            if let Some(joint) = self.skeleton.get_mut(joint_id) {
                joint.flag_for_harvest();
            }
        }
    }

    /// 从外端出发沿父链向内构建一条链
    ///
    /// 停在：sub-root、根、有位置目标的祖先（另一条链的外端）、
    /// 或 sub-base（插入 sub_bases 供下一轮取链）。终止关节也会
    /// 进链（作为内端）。途经关节全部激活。
    fn build_chain(
        &mut self,
        start_id: JointId,
        chain_limit: usize,
        sub_bases: &mut BTreeSet<JointId>,
    ) -> Vec<JointId> {
        let mut chain = vec![start_id];
        let mut current = match self.skeleton.get_mut(&start_id) {
            Some(joint) => {
                joint.activate();
                joint.parent_id
            }
            None => None,
        };
        while let Some(joint_id) = current {
            if chain.len() >= chain_limit {
                break;
            }
            let Some(joint) = self.skeleton.get_mut(&joint_id) else {
                break;
            };
            chain.push(joint_id);
            joint.activate();
            let parent_id = joint.parent_id;
            let num_children = joint.children.len();
            let has_pos_target = joint.has_pos_target();

            if self.is_sub_root(joint_id) {
                break;
            }
            if joint_id == self.root_id {
                break;
            }
            if has_pos_target {
                // 在有目标的祖先处截断，那是另一条链的外端
                break;
            }
            if (self.sub_base_ids.is_empty() && num_children > 1) || self.is_sub_base(joint_id) {
                sub_bases.insert(joint_id);
                break;
            }
            current = parent_id;
        }
        chain
    }

    /// 唯一的激活子关节；没有或多于一个时返回 None
    fn single_active_child(&self, joint_id: JointId) -> Option<JointId> {
        let joint = self.skeleton.get(&joint_id)?;
        let mut found = None;
        for &child_id in &joint.children {
            let active = self
                .skeleton
                .get(&child_id)
                .map_or(false, |c| c.is_active());
            if active {
                if found.is_some() {
                    return None;
                }
                found = Some(child_id);
            }
        }
        found
    }

    // ========================================================================
    // FABRIK
    // ========================================================================

    fn execute_fabrik_pass(&mut self, enforce_constraints: bool) {
        // chains 按外端 id 升序排列；内向遍历必须逆序，让远端的
        // 链先收敛到它们的 sub-base
        let chains: Vec<Vec<JointId>> = self.chains.values().cloned().collect();
        for chain in chains.iter().rev() {
            self.execute_fabrik_inward(chain, enforce_constraints);
        }

        // 内向遍历不更新链内端的子关节 local_rot，对激活根手动补上
        // 注意这里只刷新子关节，不 enforce 约束：根自身的约束留给
        // 外向遍历
        let roots: Vec<JointId> = self.active_roots.iter().copied().collect();
        for root_id in roots {
            self.update_child_local_rots(root_id);
        }

        // 外向遍历按外端 id 升序，保证靠根的链先解
        for chain in &chains {
            self.execute_fabrik_outward(chain, enforce_constraints);
        }
        // 到这里所有激活关节的本地/世界变换都应当一致
    }

    fn execute_fabrik_inward(&mut self, chain: &[JointId], enforce_constraints: bool) {
        // 链按由外向内排列。外端特殊：它要么有目标，要么是带
        // 激活子关节的 sub-base
        let Some(&outer_id) = chain.first() else {
            return;
        };
        self.update_end_inward(outer_id, enforce_constraints);

        // 跳过外端（刚处理过）和内端（它要么是别的链的外端，
        // 要么是激活根，轮不到这条链动它）
        let last_index = chain.len().saturating_sub(1);
        for i in 1..last_index {
            self.update_inward(chain[i], chain[i - 1], enforce_constraints);
        }
    }

    fn execute_fabrik_outward(&mut self, chain: &[JointId], enforce_constraints: bool) {
        // 内端在这一步不动，从内端旁边的关节开始逆序走到外端
        let last_index = chain.len().saturating_sub(1);
        for i in (1..last_index).rev() {
            self.update_outward(chain[i], enforce_constraints);
        }
        if let Some(&outer_id) = chain.first() {
            self.update_end_outward(outer_id, enforce_constraints);
        }
    }

    /// 内向遍历的外端更新
    fn update_end_inward(&mut self, joint_id: JointId, enforce_constraints: bool) {
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return;
        };
        if joint.has_rot_target() {
            let Some(config) = joint.config().copied() else {
                return;
            };
            let target_rot = config.target_rot();
            let mut new_pos = joint.world_pos;
            if joint.has_pos_target() {
                new_pos = config.target_pos() - target_rot * joint.bone;
            }
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.set_world_rot(target_rot);
                joint.set_world_pos(new_pos);
            }
        } else {
            let (local_targets, world_targets) = self.collect_target_positions(joint_id);
            let num_targets = local_targets.len();
            let joint = &self.skeleton[&joint_id];
            if num_targets == 1 {
                // 最常见的单目标情形单独处理
                let bone_dir = (world_targets[0] - joint.world_pos).normalize_or_zero();
                let new_pos = world_targets[0] - local_targets[0].length() * bone_dir;
                let old_bone = joint.world_rot * local_targets[0];
                let new_rot =
                    (shortest_arc(old_bone, bone_dir) * joint.world_rot).normalize();
                if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                    joint.set_world_pos(new_pos);
                    joint.set_world_rot(new_rot);
                }
            } else if num_targets > 1 {
                let mut new_pos = Vec3::ZERO;
                // 平均多个调整量时从四元数空间原点 <0,0,0,0> 开始累加
                let mut avg_adjustment = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
                for i in 0..num_targets {
                    let mut new_bone = (world_targets[i] - joint.world_pos).normalize_or_zero();
                    new_bone *= local_targets[i].length();
                    new_pos += world_targets[i] - new_bone;

                    let old_bone = joint.world_rot * local_targets[i];
                    let adjustment = shortest_arc(old_bone, new_bone);
                    if adjustment.w < 0.0 {
                        // 取反，让所有累加停留在同一半球
                        avg_adjustment = avg_adjustment - adjustment;
                    } else {
                        avg_adjustment = avg_adjustment + adjustment;
                    }
                }
                let parent_active = joint
                    .parent_id
                    .and_then(|pid| self.skeleton.get(&pid))
                    .map_or(false, |p| p.is_active());
                let new_rot = (normalized_or_identity(avg_adjustment) * joint.world_rot).normalize();
                if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                    if parent_active {
                        joint.set_world_pos(new_pos / num_targets as f32);
                    }
                    joint.set_world_rot(new_rot);
                }
            }
        }
        // 此时本关节的 local_rot 还不能更新（父关节位置未知），
        // 但世界旋转已定，可以刷新子关节的 local_rot
        let children = self.skeleton[&joint_id].children.clone();
        let mut something_changed = false;
        for &child_id in &children {
            let child_active = self
                .skeleton
                .get(&child_id)
                .map_or(false, |c| c.is_active());
            if child_active {
                something_changed =
                    self.update_local_rot(child_id, enforce_constraints) || something_changed;
            }
        }
        if something_changed {
            // 内向遍历中子关节的约束 enforce 会反过来摆动本关节，
            // 需要从子关节反推世界旋转；多个子关节时取平均。
            // 累加在循环内归一化并逐次写回。
            let mut avg_rot = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
            let mut new_rot = self.skeleton[&joint_id].world_rot;
            for &child_id in &children {
                let Some(child) = self.skeleton.get(&child_id) else {
                    continue;
                };
                // child.world_rot = world_rot * child.local_rot
                // 反解 world_rot = child.world_rot * child.local_rot⁻¹
                let rot = child.world_rot * child.local_rot.inverse();
                if rot.w < 0.0 {
                    avg_rot = avg_rot - rot;
                } else {
                    avg_rot = avg_rot + rot;
                }
                avg_rot = normalized_or_identity(avg_rot);
                new_rot = avg_rot;
            }
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.set_world_rot(new_rot);
            }
        }
    }

    /// 内向遍历的中段更新。本关节可能有多个子关节，所以由
    /// 调用方指明这条链上的子关节。
    fn update_inward(&mut self, joint_id: JointId, child_id: JointId, enforce_constraints: bool) {
        let (child_pos, child_local_pos, child_local_pos_length) = {
            let Some(child) = self.skeleton.get(&child_id) else {
                return;
            };
            (child.world_pos, child.local_pos, child.local_pos_length)
        };
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return;
        };
        let bone_dir = (child_pos - joint.world_pos).normalize_or_zero();
        let new_pos = child_pos - child_local_pos_length * bone_dir;
        let old_bone = joint.world_rot * child_local_pos;
        let new_rot = (shortest_arc(old_bone, bone_dir) * joint.world_rot).normalize();
        if let Some(joint) = self.skeleton.get_mut(&joint_id) {
            joint.set_world_pos(new_pos);
            joint.set_world_rot(new_rot);
        }

        // 本关节世界旋转已定，更新子关节的 local_rot
        if self.update_local_rot(child_id, enforce_constraints) {
            // 子关节约束 enforce 时会摆动本关节，反推回来：
            //     child.world_rot = world_rot * child.local_rot
            //  => world_rot = child.world_rot * child.local_rot⁻¹
            //     child.world_pos = world_pos + world_rot * child.local_pos
            //  => world_pos = child.world_pos - world_rot * child.local_pos
            let Some(child) = self.skeleton.get(&child_id) else {
                return;
            };
            let rot = (child.world_rot * child.local_rot.inverse()).normalize();
            let pos = child.world_pos - rot * child.local_pos;
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.set_world_rot(rot);
                joint.set_world_pos(pos);
            }
        }
        // 本关节的 local_rot 等父关节就位后再更新
    }

    /// 外向遍历的中段更新：保持世界末端位置，把 tip 拉回父关节
    /// 决定的锚点，再摆动世界旋转补偿
    fn update_outward(&mut self, joint_id: JointId, enforce_constraints: bool) {
        let Some((parent_pos, parent_rot)) = self.parent_transform(joint_id) else {
            return;
        };
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return;
        };
        let old_end_pos = joint.world_pos + joint.world_rot * joint.bone;
        let new_pos = parent_pos + parent_rot * joint.local_pos;
        let new_bone = old_end_pos - new_pos;
        let old_bone = joint.world_rot * joint.bone;
        let new_rot = (shortest_arc(old_bone, new_bone) * joint.world_rot).normalize();
        if let Some(joint) = self.skeleton.get_mut(&joint_id) {
            joint.set_world_pos(new_pos);
            joint.set_world_rot(new_rot);
        }
        if self.update_local_rot(joint_id, enforce_constraints) {
            self.apply_local_rot(joint_id);
        }
    }

    /// 外向遍历的外端更新
    fn update_end_outward(&mut self, joint_id: JointId, enforce_constraints: bool) {
        let Some((parent_pos, parent_rot)) = self.parent_transform(joint_id) else {
            return;
        };
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return;
        };
        let mut new_pos = parent_pos + parent_rot * joint.local_pos;

        if joint.local_rot_locked() {
            let new_rot = (parent_rot * joint.local_rot).normalize();
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.set_world_pos(new_pos);
                joint.set_world_rot(new_rot);
            }
            return;
        }

        if joint.has_rot_target() {
            let Some(config) = joint.config().copied() else {
                return;
            };
            let new_rot = config.target_rot();
            if joint.has_pos_target() {
                new_pos = config.target_pos() - new_rot * joint.bone;
            }
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.set_world_pos(new_pos);
                joint.set_world_rot(new_rot);
            }
        } else {
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.set_world_pos(new_pos);
            }
            let (local_targets, world_targets) = self.collect_target_positions(joint_id);
            let num_targets = local_targets.len();
            let joint = &self.skeleton[&joint_id];
            let adjustment = if num_targets == 1 {
                let new_bone = world_targets[0] - joint.world_pos;
                let old_bone = joint.world_rot * local_targets[0];
                shortest_arc(old_bone, new_bone)
            } else if num_targets > 1 {
                let mut avg_adjustment = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
                for i in 0..num_targets {
                    let new_bone = world_targets[i] - joint.world_pos;
                    let old_bone = joint.world_rot * local_targets[i];
                    let adj = shortest_arc(old_bone, new_bone);
                    if adj.w < 0.0 {
                        avg_adjustment = avg_adjustment - adj;
                    } else {
                        avg_adjustment = avg_adjustment + adj;
                    }
                }
                normalized_or_identity(avg_adjustment)
            } else {
                Quat::IDENTITY
            };
            let new_rot = (adjustment * joint.world_rot).normalize();
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.set_world_rot(new_rot);
            }
        }

        if self.update_local_rot(joint_id, enforce_constraints) {
            self.apply_local_rot(joint_id);
        }
    }

    /// 外端的目标集合：有位置目标时就是 (bone, target_pos)，
    /// 否则每个激活子关节贡献一对 (child.local_pos, child.world_pos)
    fn collect_target_positions(&self, joint_id: JointId) -> (Vec<Vec3>, Vec<Vec3>) {
        let mut local_targets = Vec::new();
        let mut world_targets = Vec::new();
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return (local_targets, world_targets);
        };
        if joint.has_pos_target() {
            if let Some(config) = joint.config() {
                local_targets.push(joint.bone);
                world_targets.push(config.target_pos());
            }
        } else {
            for &child_id in &joint.children {
                if let Some(child) = self.skeleton.get(&child_id) {
                    if child.is_active() {
                        local_targets.push(child.local_pos);
                        world_targets.push(child.world_pos);
                    }
                }
            }
        }
        (local_targets, world_targets)
    }

    /// 由世界旋转反推 local_rot；变化超过容差且未锁定时写入，
    /// 并视需要 enforce 约束。返回"约束是否实际生效"。
    fn update_local_rot(&mut self, joint_id: JointId, enforce_constraints: bool) -> bool {
        let Some((_, parent_rot)) = self.parent_transform(joint_id) else {
            return false;
        };
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return false;
        };
        let new_local_rot = (parent_rot.inverse() * joint.world_rot).normalize();
        let mut constraint_was_enforced = false;
        if !quat_almost_equal(new_local_rot, joint.local_rot) {
            if joint.local_rot_locked() {
                constraint_was_enforced = true;
            } else {
                if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                    joint.set_local_rot(new_local_rot);
                }
                if enforce_constraints {
                    constraint_was_enforced = self.enforce_constraint(joint_id);
                }
            }
        }
        constraint_was_enforced
    }

    /// 用 local_rot 刷新世界旋转；有旋转目标时施加回压：
    /// 世界旋转向目标旋转插值，再反推 local_rot
    fn apply_local_rot(&mut self, joint_id: JointId) {
        let Some((_, parent_rot)) = self.parent_transform(joint_id) else {
            // 根关节：局部坐标系就是世界坐标系
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.world_rot = joint.local_rot;
            }
            return;
        };
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return;
        };
        if joint.has_rot_target() {
            let Some(config) = joint.config().copied() else {
                return;
            };
            let new_rot = parent_rot * joint.local_rot;
            let blended = config
                .target_rot()
                .lerp(new_rot, self.tuning.rot_target_backpressure);
            let new_local_rot = (parent_rot.inverse() * blended).normalize();
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.set_world_rot(blended);
                joint.set_local_rot(new_local_rot);
            }
        } else {
            let new_rot = (parent_rot * joint.local_rot).normalize();
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.set_world_rot(new_rot);
            }
        }
    }

    /// 世界旋转已定后刷新所有激活子关节的 local_rot。
    /// 这一步不 enforce 子关节约束。
    fn update_child_local_rots(&mut self, joint_id: JointId) {
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return;
        };
        let children = joint.children.clone();
        for child_id in children {
            let child_active = self
                .skeleton
                .get(&child_id)
                .map_or(false, |c| c.is_active());
            if child_active {
                self.update_local_rot(child_id, false);
            }
        }
    }

    /// 从父关节刷新世界变换
    fn update_pos_and_rot_from_parent(&mut self, joint_id: JointId) {
        let Some((parent_pos, parent_rot)) = self.parent_transform(joint_id) else {
            return;
        };
        let Some(joint) = self.skeleton.get_mut(&joint_id) else {
            return;
        };
        joint.world_pos = parent_pos + parent_rot * joint.local_pos;
        joint.world_rot = (parent_rot * joint.local_rot).normalize();
    }

    /// 父关节的 (world_pos, world_rot)；无父关节时 None
    fn parent_transform(&self, joint_id: JointId) -> Option<(Vec3, Quat)> {
        let parent_id = self.skeleton.get(&joint_id)?.parent_id?;
        let parent = self.skeleton.get(&parent_id)?;
        Some((parent.world_pos, parent.world_rot))
    }

    /// tip 相对父关节锚点的偏移
    fn compute_world_tip_offset(&self, joint_id: JointId) -> Vec3 {
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return Vec3::ZERO;
        };
        match self.parent_transform(joint_id) {
            Some((parent_pos, parent_rot)) => {
                joint.world_pos - (parent_pos + parent_rot * joint.local_pos)
            }
            None => joint.world_pos,
        }
    }

    // ========================================================================
    // 约束 enforce
    // ========================================================================

    /// enforce 本关节的约束，返回是否有改动
    ///
    /// 默认路径：project 当前 local_rot，有变化就写回（世界旋转
    /// 由调用方刷新）。Elbow / Knee 在有父关节时走世界坐标系路径，
    /// 会同时调整父关节。
    fn enforce_constraint(&mut self, joint_id: JointId) -> bool {
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return false;
        };
        if joint.local_rot_locked() || joint.has_disabled_constraint() {
            return false;
        }
        let Some(constraint) = joint.constraint.clone() else {
            return false;
        };
        let has_parent = joint.parent_id.is_some();
        match constraint.kind() {
            ConstraintKind::Elbow {
                pivot,
                min_twist,
                max_twist,
                ..
            } if has_parent => {
                self.enforce_bend_hinge(joint_id, *pivot, Some((*min_twist, *max_twist)))
            }
            ConstraintKind::Knee { pivot, .. } if has_parent => {
                self.enforce_bend_hinge(joint_id, *pivot, None)
            }
            _ => self.enforce_projection(joint_id, &constraint),
        }
    }

    fn enforce_projection(&mut self, joint_id: JointId, constraint: &Constraint) -> bool {
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return false;
        };
        let local_rot = joint.local_rot;
        let adjusted = constraint.project(local_rot);
        if !quat_almost_equal(adjusted, local_rot) {
            // 只更新 local_rot，世界旋转由调用方负责刷新
            if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                joint.set_local_rot(adjusted);
            }
            true
        } else {
            false
        }
    }

    /// Elbow / Knee 的世界坐标系 enforce
    ///
    /// 下段骨骼（前臂/小腿）扭转到与弯曲枢轴对齐，上段骨骼
    /// （上臂/大腿）反向旋转消化剩余的错位。twist_range 给区间
    /// 时按肘处理（扭转钳制到区间），None 时按膝处理（超过最小
    /// 阈值的扭转全部移除）。
    fn enforce_bend_hinge(
        &mut self,
        joint_id: JointId,
        pivot_axis: Vec3,
        twist_range: Option<(f32, f32)>,
    ) -> bool {
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return false;
        };
        let Some(parent_id) = joint.parent_id else {
            return false;
        };
        let Some(parent) = self.skeleton.get(&parent_id) else {
            return false;
        };

        // 上段起点 - 本关节 tip - 本关节 end 三点
        let parent_pos = parent.world_pos;
        let mut parent_rot = parent.world_rot;
        let joint_pos = joint.world_pos;
        let mut joint_rot = joint.world_rot;
        let end_pos = joint.compute_world_end_pos();

        // 两段骨骼各自的枢轴
        let lower_pivot = joint_rot * pivot_axis;
        let upper_pivot = parent_rot * pivot_axis;

        // 实际弯曲决定的枢轴
        let lower = (end_pos - joint_pos).normalize_or_zero();
        let upper = (joint_pos - parent_pos).normalize_or_zero();
        let mut bend_pivot = upper.cross(lower);
        let length = bend_pivot.length();
        if length < MIN_PIVOT_LENGTH {
            // 两段骨骼基本伸直，弯曲枢轴无定义，用上段的枢轴顶替
            bend_pivot = upper_pivot;
        } else {
            bend_pivot /= length;
        }

        let mut something_changed = false;

        // 测量下段骨骼相对 bend_pivot 的带符号扭转
        let adjustment = shortest_arc(bend_pivot, lower_pivot);
        let (axis, mut angle) = adjustment.to_axis_angle();
        if axis.dot(lower) < 0.0 {
            angle = -angle;
        }

        match twist_range {
            Some((min_twist, max_twist)) => {
                let new_twist = crate::math::clamp_periodic(angle, min_twist, max_twist);
                if new_twist != angle {
                    let twist_fix = Quat::from_axis_angle(lower, new_twist - angle);
                    joint_rot = (twist_fix * joint_rot).normalize();
                    if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                        joint.set_world_rot(joint_rot);
                    }
                    something_changed = true;
                }
            }
            None => {
                // 不允许扭转：超过最小阈值就全部移除
                if angle.abs() > MIN_KNEE_TWIST {
                    let twist_fix = Quat::from_axis_angle(lower, -angle);
                    joint_rot = (twist_fix * joint_rot).normalize();
                    if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                        joint.set_world_rot(joint_rot);
                    }
                    something_changed = true;
                }
            }
        }

        // 下段扭转已经贴近 bend_pivot，再反向旋转上段，让它的
        // 枢轴与 bend_pivot 一致
        let adjustment = shortest_arc(upper_pivot, bend_pivot);
        if !quat_near_identity(adjustment, VERY_SMALL_ANGLE) {
            parent_rot = (adjustment * parent_rot).normalize();
            if let Some(parent) = self.skeleton.get_mut(&parent_id) {
                parent.set_world_rot(parent_rot);
            }
            let parent_has_parent = self
                .skeleton
                .get(&parent_id)
                .map_or(false, |p| p.parent_id.is_some());
            if parent_has_parent {
                self.update_local_rot(parent_id, false);
            } else if let Some(parent) = self.skeleton.get_mut(&parent_id) {
                parent.set_local_rot(parent_rot);
            }
            something_changed = true;
        }

        if something_changed {
            // 由两个世界旋转反推本关节的 local_rot
            self.update_local_rot(joint_id, false);
        }
        something_changed
    }

    /// 实验性 drop-elbow：把肩的单个激活子关节（肘）压向自然
    /// 位置——绕"肩到腕"轴旋转肩，让肘的弯曲枢轴指向水平
    ///
    /// 不在求解循环内调用，留给外部姿态修正逻辑按需使用
    /// （配合 `add_wrist_id` 注册的腕关节定位手臂）。
    pub fn drop_elbow(&mut self, shoulder_id: JointId) -> bool {
        let Some(elbow_id) = self.single_active_child(shoulder_id) else {
            return false;
        };
        // 确保肘的世界变换是新的
        self.update_pos_and_rot_from_parent(elbow_id);

        let Some(shoulder) = self.skeleton.get(&shoulder_id) else {
            return false;
        };
        let Some(elbow) = self.skeleton.get(&elbow_id) else {
            return false;
        };
        let shoulder_pos = shoulder.world_pos;
        let shoulder_rot = shoulder.world_rot;
        let elbow_pos = elbow.world_pos;
        let wrist_pos = elbow.compute_world_end_pos();

        // 三角形的三条边
        let reach = (wrist_pos - shoulder_pos).normalize_or_zero();
        let upper_arm = (elbow_pos - shoulder_pos).normalize_or_zero();

        // 当前的肩部枢轴与目标枢轴
        let mut pivot = reach.cross(upper_arm);
        let pivot_length = pivot.length();
        if pivot_length < 0.003 {
            return false;
        }
        pivot /= pivot_length;

        let target_pivot = Vec3::Z.cross(reach).normalize_or_zero();

        let adjustment = shortest_arc(pivot, target_pivot);
        if quat_near_identity(adjustment, VERY_SMALL_ANGLE) {
            return false;
        }

        // 调整肩的世界旋转，并刷新它的 local_rot
        let new_shoulder_rot = (adjustment * shoulder_rot).normalize();
        if let Some(shoulder) = self.skeleton.get_mut(&shoulder_id) {
            shoulder.set_world_rot(new_shoulder_rot);
        }
        let has_collar = self
            .skeleton
            .get(&shoulder_id)
            .map_or(false, |s| s.parent_id.is_some());
        if has_collar {
            self.update_local_rot(shoulder_id, false);
        } else if let Some(shoulder) = self.skeleton.get_mut(&shoulder_id) {
            shoulder.set_local_rot(new_shoulder_rot);
        }

        // 肘的世界变换跟着肩走；它的 local_rot 保持世界末端不变
        self.update_pos_and_rot_from_parent(elbow_id);
        if let Some(hand_id) = self.single_active_child(shoulder_id) {
            self.update_local_rot(hand_id, false);
        }
        true
    }

    // ========================================================================
    // 松弛与重置
    // ========================================================================

    /// 向静息姿态（单位旋转）松弛本关节及其激活后代
    fn relax_rotations_recursively(&mut self, joint_id: JointId, blend_factor: f32) {
        let blend_factor = blend_factor.clamp(0.0, 1.0);
        self.relax_rot(joint_id, blend_factor);
        let children = match self.skeleton.get(&joint_id) {
            Some(joint) => joint.children.clone(),
            None => return,
        };
        for child_id in children {
            let child_active = self
                .skeleton
                .get(&child_id)
                .map_or(false, |c| c.is_active());
            if child_active {
                self.relax_rotations_recursively(child_id, blend_factor);
            }
        }
    }

    fn relax_rot(&mut self, joint_id: JointId, blend_factor: f32) {
        let parent = self.parent_transform(joint_id);
        let Some(joint) = self.skeleton.get_mut(&joint_id) else {
            return;
        };
        if !joint.local_rot_locked() {
            joint.local_rot = joint.local_rot.lerp(Quat::IDENTITY, blend_factor);
        }
        // 父关节可能也松弛过了，世界变换一律重算
        match parent {
            Some((parent_pos, parent_rot)) => {
                joint.world_rot = (parent_rot * joint.local_rot).normalize();
                joint.world_pos = parent_pos + parent_rot * joint.local_pos;
            }
            None => {
                joint.world_rot = joint.local_rot;
                joint.world_pos = joint.local_pos;
            }
        }
    }

    /// 单关节回静息：重读几何、单位本地旋转、按父关节摆世界变换
    fn reset_joint(&mut self, joint_id: JointId) {
        let parent = self.parent_transform(joint_id);
        let Some(joint) = self.skeleton.get_mut(&joint_id) else {
            return;
        };
        joint.reset_from_info();
        joint.local_rot = Quat::IDENTITY;
        match parent {
            Some((parent_pos, parent_rot)) => {
                joint.world_pos = parent_pos + parent_rot * joint.local_pos;
                joint.world_rot = parent_rot;
            }
            None => {
                joint.world_pos = joint.local_pos;
                joint.world_rot = joint.local_rot;
            }
        }
    }

    fn reset_joint_recursively(&mut self, joint_id: JointId) {
        self.reset_joint(joint_id);
        let children = match self.skeleton.get(&joint_id) {
            Some(joint) => joint.children.clone(),
            None => return,
        };
        for child_id in children {
            self.reset_joint_recursively(child_id);
        }
    }

    // ========================================================================
    // CCD（实验性）
    // ========================================================================
    //
    // 收敛不错，但 enforce 约束时比 FABRIK 更容易抖。保留实现，
    // 由 set_ccd_enabled 切换。

    fn execute_ccd_pass(&mut self) {
        // 内向算法，链按外端 id 降序处理
        let chains: Vec<Vec<JointId>> = self.chains.values().cloned().collect();
        for chain in chains.iter().rev() {
            self.execute_ccd_inward(chain);
        }

        // execute_ccd_inward 重算了链上关节的世界变换，但链与
        // sub-base 的连接处还有缝，整条链平移回去对上
        for chain in &chains {
            self.shift_chain_to_base(chain);
        }
    }

    fn execute_ccd_inward(&mut self, chain: &[JointId]) {
        let Some(&outer_id) = chain.first() else {
            return;
        };

        // 外端的目标在本地/世界坐标系各有一份，内向逐关节摆动，
        // 让本地目标转到世界目标上
        let (mut local_targets, world_targets) = self.collect_target_positions(outer_id);
        if !self.swing_toward_targets(outer_id, &local_targets, &world_targets) {
            // 目标已经够近
            return;
        }

        // 跳过外端（刚摆过）和内端（别的链或激活根负责），
        // 有一个关节拒绝动就停
        let last_index = chain.len().saturating_sub(1);
        let mut last_swung_index = 0;
        for i in 1..last_index {
            self.transform_targets_to_parent_local(chain[i - 1], &mut local_targets);
            if !self.swing_toward_targets(chain[i], &local_targets, &world_targets) {
                break;
            }
            last_swung_index = i;
        }

        // 从最内侧被摆动的关节向外重算世界变换
        for i in (0..last_swung_index).rev() {
            self.update_pos_and_rot_from_parent(chain[i]);
        }

        // 最后补上外端子关节的 local_rot；这一步不 enforce 约束
        self.update_child_local_rots(outer_id);
    }

    /// CCD 单步：向目标集合摆动本关节
    ///
    /// 返回 false 表示本关节拒绝移动（调整量低于阈值），链的
    /// 内向传播就此打住。
    fn swing_toward_targets(
        &mut self,
        joint_id: JointId,
        local_targets: &[Vec3],
        world_targets: &[Vec3],
    ) -> bool {
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return false;
        };
        if joint.local_rot_locked() {
            // 本关节不动，但目标大概率还没到，让链继续传播
            return true;
        }

        let mut something_changed = false;
        if joint.has_rot_target() {
            let target_rot = joint.config().map(|c| c.target_rot());
            if let Some(target_rot) = target_rot {
                if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                    joint.set_world_rot(target_rot);
                }
                something_changed = true;
            }
        } else {
            let num_targets = local_targets.len();
            let adjustment = if num_targets == 1 {
                let old_bone = joint.world_rot * local_targets[0];
                let new_bone = world_targets[0] - joint.world_pos;
                shortest_arc(old_bone, new_bone)
            } else {
                let mut avg = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
                for i in 0..num_targets {
                    let old_bone = joint.world_rot * local_targets[i];
                    let new_bone = world_targets[i] - joint.world_pos;
                    let adj = shortest_arc(old_bone, new_bone);
                    if adj.w < 0.0 {
                        avg = avg - adj;
                    } else {
                        avg = avg + adj;
                    }
                }
                normalized_or_identity(avg)
            };

            if !quat_near_identity(adjustment, VERY_SMALL_ANGLE) {
                // 只取调整量的一部分，让摆动沿链长均摊
                let adjustment = Quat::IDENTITY.lerp(adjustment, self.tuning.ccd_swing_factor);
                let new_rot = (adjustment * joint.world_rot).normalize();
                if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                    joint.set_world_rot(new_rot);
                }
                something_changed = true;
            }
        }

        if something_changed {
            // 直接由父关节世界旋转反推 local_rot
            if let Some((_, parent_rot)) = self.parent_transform(joint_id) {
                let Some(joint) = self.skeleton.get(&joint_id) else {
                    return something_changed;
                };
                let new_local_rot = (parent_rot.inverse() * joint.world_rot).normalize();
                if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                    joint.set_local_rot(new_local_rot);
                }
                self.enforce_constraint(joint_id);
                // 约束即便改了 local_rot 也不在这里刷新世界旋转：
                // CCD 之后有统一的外向刷新
            }
        }
        something_changed
    }

    /// 把世界目标集合换算到本关节父坐标系（CCD 内向传播用）
    fn transform_targets_to_parent_local(&self, joint_id: JointId, local_targets: &mut [Vec3]) {
        let Some((parent_pos, parent_rot)) = self.parent_transform(joint_id) else {
            return;
        };
        let Some(joint) = self.skeleton.get(&joint_id) else {
            return;
        };
        let world_to_parent = parent_rot.inverse();
        for target in local_targets.iter_mut() {
            let world_target = (joint.world_pos + joint.world_rot * *target) - parent_pos;
            *target = world_to_parent * world_target;
        }
    }

    /// 整条链平移，使内端旁的关节贴回 sub-base 的锚点
    fn shift_chain_to_base(&mut self, chain: &[JointId]) {
        let last_index = chain.len().saturating_sub(1);
        if last_index < 1 {
            return;
        }
        let inner_end_child = chain[last_index - 1];
        let offset = self.compute_world_tip_offset(inner_end_child);
        if offset.length_squared() > self.acceptable_error * self.acceptable_error {
            for &joint_id in &chain[..last_index] {
                if let Some(joint) = self.skeleton.get_mut(&joint_id) {
                    joint.shift_pos(-offset);
                }
            }
        }
    }

    // ========================================================================
    // 误差
    // ========================================================================

    /// 所有位置目标中最大的末端误差（根关节不计，转移过的目标不计）
    fn measure_max_error(&self) -> f32 {
        let mut max_error = 0.0f32;
        for (joint_id, joint) in &self.skeleton {
            if *joint_id == self.root_id {
                continue;
            }
            if !joint.has_pos_target() || joint.has_delegated() {
                continue;
            }
            let Some(config) = joint.config() else {
                continue;
            };
            let dist = joint.compute_world_end_pos().distance(config.target_pos());
            if dist > max_error {
                max_error = dist;
            }
        }
        max_error
    }
}

/// 链长限制：0 表示不限
fn effective_limit(config: &JointConfig) -> usize {
    match config.chain_limit() {
        0 => usize::MAX,
        limit => limit as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_6;

    /// 两骨手臂：root(0) 在原点，J1、J2 依次沿 +x，各段长 1
    fn two_bone_arm() -> Solver {
        let mut solver = Solver::new();
        solver.set_root_id(0);
        solver.add_joint(
            0,
            -1,
            JointInfo::new(Vec3::ZERO, Vec3::X, Vec3::ONE),
            None,
        );
        solver.add_joint(1, 0, JointInfo::new(Vec3::X, Vec3::X, Vec3::ONE), None);
        solver.add_joint(2, 1, JointInfo::new(Vec3::X, Vec3::X, Vec3::ONE), None);
        solver
    }

    fn configs_with_target(joint_id: JointId, target: Vec3) -> BTreeMap<JointId, JointConfig> {
        let mut config = JointConfig::new();
        config.set_target_pos(target);
        BTreeMap::from([(joint_id, config)])
    }

    /// 激活关节的本地/世界变换必须一致（单位四元数、两条基本公式）
    fn assert_world_consistent(solver: &Solver) {
        for (joint_id, joint) in &solver.skeleton {
            if !joint.is_active() {
                continue;
            }
            assert!(
                (joint.world_rot.length() - 1.0).abs() <= 1.0e-4,
                "joint {} world_rot 未归一", joint_id
            );
            assert!(
                (joint.local_rot.length() - 1.0).abs() <= 1.0e-4,
                "joint {} local_rot 未归一", joint_id
            );
            if let Some(pid) = joint.parent_id {
                let parent = &solver.skeleton[&pid];
                let expected_pos = parent.world_pos + parent.world_rot * joint.local_pos;
                assert!(
                    (joint.world_pos - expected_pos).length() <= 1.0e-3,
                    "joint {} world_pos 与父链不一致", joint_id
                );
                let expected_rot = parent.world_rot * joint.local_rot;
                assert!(
                    joint.world_rot.dot(expected_rot).abs() >= 1.0 - 1.0e-4,
                    "joint {} world_rot 与父链不一致", joint_id
                );
            }
        }
    }

    #[test]
    fn test_add_joint_validations() {
        let mut solver = Solver::new();
        solver.set_root_id(0);
        let info = JointInfo::new(Vec3::ZERO, Vec3::X, Vec3::ONE);

        solver.add_joint(-3, -1, info, None);
        assert_eq!(solver.num_joints(), 0);

        solver.add_joint(0, -1, info, None);
        assert_eq!(solver.num_joints(), 1);

        // 重复 id 被忽略
        solver.add_joint(0, -1, info, None);
        assert_eq!(solver.num_joints(), 1);

        // 父关节不存在且 parent_id 不小于根 id：孤儿，忽略
        solver.add_joint(5, 3, info, None);
        assert_eq!(solver.num_joints(), 1);
    }

    #[test]
    fn test_rest_pose_world_transforms() {
        let solver = two_bone_arm();
        assert_eq!(solver.get_joint_world_tip_pos(0), Some(Vec3::ZERO));
        assert_eq!(solver.get_joint_world_tip_pos(1), Some(Vec3::X));
        assert_eq!(solver.get_joint_world_tip_pos(2), Some(Vec3::new(2.0, 0.0, 0.0)));
        assert_eq!(
            solver.get_joint_world_end_pos(2),
            Some(Vec3::new(3.0, 0.0, 0.0))
        );
    }

    #[test]
    fn test_solve_no_configs_is_rest() {
        let mut solver = two_bone_arm();
        let error = solver.solve();
        assert_eq!(error, 0.0);
        assert_eq!(
            solver.get_joint_world_end_pos(2),
            Some(Vec3::new(3.0, 0.0, 0.0))
        );
        assert_eq!(solver.get_joint_local_rot(1), Some(Quat::IDENTITY));
    }

    #[test]
    fn test_two_bone_reach() {
        let mut solver = two_bone_arm();
        let target = Vec3::new(0.0, 1.0, 2.0f32.sqrt());
        assert!(solver.update_joint_configs(&configs_with_target(2, target)));
        let error = solver.solve();
        let end = solver.get_joint_world_end_pos(2).unwrap();
        assert!(
            (end - target).length() <= 5.0e-4,
            "end = {:?}, error = {}", end, error
        );
        assert_world_consistent(&solver);
    }

    #[test]
    fn test_unreachable_target() {
        let mut solver = two_bone_arm();
        let target = Vec3::new(10.0, 0.0, 0.0);
        solver.update_joint_configs(&configs_with_target(2, target));
        let error = solver.solve();
        let end = solver.get_joint_world_end_pos(2).unwrap();
        // 手臂完全伸直指向 +x
        assert!((end - Vec3::new(3.0, 0.0, 0.0)).length() <= 1.0e-3, "end = {:?}", end);
        assert!((error - 7.0).abs() <= 1.0e-3, "error = {}", error);
    }

    #[test]
    fn test_constraint_clamps_solution() {
        let mut solver = Solver::new();
        solver.set_root_id(0);
        solver.add_joint(0, -1, JointInfo::new(Vec3::ZERO, Vec3::X, Vec3::ONE), None);
        let cone = Arc::new(Constraint::simple_cone(Vec3::X, FRAC_PI_6));
        solver.add_joint(1, 0, JointInfo::new(Vec3::X, Vec3::X, Vec3::ONE), Some(cone.clone()));
        solver.add_joint(2, 1, JointInfo::new(Vec3::X, Vec3::X, Vec3::ONE), None);

        // 要求 J1 弯 90° 才能精确到达的目标
        solver.update_joint_configs(&configs_with_target(2, Vec3::new(0.0, 3.0, 0.0)));
        let error = solver.solve();

        // J1 的 forward 轴最多偏离 +x 30°（留一点数值余量）
        let j1_rot = solver.get_joint_local_rot(1).unwrap();
        let forward = j1_rot * Vec3::X;
        let bend = forward.dot(Vec3::X).clamp(-1.0, 1.0).acos();
        assert!(bend <= FRAC_PI_6 + 1.0e-3, "bend = {}", bend);
        // 约束下到不了，残差必须为正
        assert!(error > 0.0);
        // 解仍然满足约束投影不动点
        let projected = cone.project(j1_rot);
        assert!(quat_almost_equal(projected, j1_rot));
    }

    #[test]
    fn test_locked_root_rotation() {
        let mut solver = two_bone_arm();
        let rot = Quat::from_axis_angle(Vec3::Z, 0.3);
        let mut config = JointConfig::new();
        config.set_local_rot(rot);
        let stored = config.local_rot();
        solver.update_joint_configs(&BTreeMap::from([(0, config)]));
        solver.solve();
        // 锁定的根旋转按位不变
        assert_eq!(solver.get_joint_local_rot(0), Some(stored));
        assert_eq!(solver.get_joint_world_rot(0), Some(stored));
    }

    #[test]
    fn test_locked_joint_local_rot_round_trip() {
        let mut solver = two_bone_arm();
        let rot = Quat::from_axis_angle(Vec3::Y, 0.4);
        let mut j1_config = JointConfig::new();
        j1_config.set_local_rot(rot);
        let stored = j1_config.local_rot();
        let mut configs = configs_with_target(2, Vec3::new(1.5, 1.0, 0.0));
        configs.insert(1, j1_config);
        solver.update_joint_configs(&configs);
        solver.solve();
        assert_eq!(solver.get_joint_local_rot(1), Some(stored));
    }

    #[test]
    fn test_sequential_targets_fixed_up() {
        let mut solver = two_bone_arm();
        let mut configs = BTreeMap::new();
        let mut j1_config = JointConfig::new();
        j1_config.set_target_pos(Vec3::new(5.0, 0.0, 0.0));
        configs.insert(1, j1_config);
        let mut j2_config = JointConfig::new();
        j2_config.set_target_pos(Vec3::X);
        configs.insert(2, j2_config);
        solver.update_joint_configs(&configs);
        solver.rebuild_all_chains();

        // 子目标优先：父目标被搬到两目标连线上恰好一段 tip 间距处
        let j1_target = solver.skeleton[&1].config().unwrap().target_pos();
        let dist = (j1_target - Vec3::X).length();
        let expected = solver.skeleton[&2].local_pos_length();
        assert!((dist - expected).abs() <= 1.0e-6, "dist = {}", dist);
        assert_eq!(j1_target, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_chain_of_length_two() {
        let mut solver = two_bone_arm();
        solver.update_joint_configs(&configs_with_target(1, Vec3::new(1.0, 1.0, 0.0)));
        solver.rebuild_all_chains();
        assert_eq!(solver.chains.len(), 1);
        assert_eq!(solver.chains[&1], vec![1, 0]);
        let error = solver.solve();
        assert!(error <= 5.0e-4, "error = {}", error);
    }

    #[test]
    fn test_chain_limit_truncates() {
        let mut solver = Solver::new();
        solver.set_root_id(0);
        let info = |p: Vec3| JointInfo::new(p, Vec3::X, Vec3::ONE);
        solver.add_joint(0, -1, info(Vec3::ZERO), None);
        for id in 1..5 {
            solver.add_joint(id, id - 1, info(Vec3::X), None);
        }
        let mut config = JointConfig::new();
        config.set_target_pos(Vec3::new(2.0, 2.0, 0.0));
        config.set_chain_limit(2);
        solver.update_joint_configs(&BTreeMap::from([(4, config)]));
        solver.rebuild_all_chains();
        assert_eq!(solver.chains[&4], vec![4, 3]);
        // 链之外的关节不激活
        assert!(!solver.skeleton[&2].is_active());
        // 内端 3 的父关节未激活，3 是激活根
        assert!(solver.active_roots.contains(&3));
    }

    #[test]
    fn test_sub_root_stops_chain() {
        let mut solver = Solver::new();
        solver.set_root_id(0);
        let info = |p: Vec3| JointInfo::new(p, Vec3::X, Vec3::ONE);
        solver.add_joint(0, -1, info(Vec3::ZERO), None);
        for id in 1..5 {
            solver.add_joint(id, id - 1, info(Vec3::X), None);
        }
        solver.set_sub_root_ids(BTreeSet::from([2]));
        solver.update_joint_configs(&configs_with_target(4, Vec3::new(2.0, 2.0, 0.0)));
        solver.rebuild_all_chains();
        // 链在 sub-root 处截止，不再向根延伸
        assert_eq!(solver.chains[&4], vec![4, 3, 2]);
        assert!(!solver.skeleton[&1].is_active());
    }

    #[test]
    fn test_branching_builds_sub_base_chain() {
        // root(0)-1-2 为躯干，2 分叉出 3-4 和 5-6 两条臂
        let mut solver = Solver::new();
        solver.set_root_id(0);
        let info = |p: Vec3| JointInfo::new(p, Vec3::X, Vec3::ONE);
        solver.add_joint(0, -1, info(Vec3::ZERO), None);
        solver.add_joint(1, 0, info(Vec3::X), None);
        solver.add_joint(2, 1, info(Vec3::X), None);
        solver.add_joint(3, 2, JointInfo::new(Vec3::new(0.5, 0.5, 0.0), Vec3::X, Vec3::ONE), None);
        solver.add_joint(4, 3, info(Vec3::X), None);
        solver.add_joint(5, 2, JointInfo::new(Vec3::new(0.5, -0.5, 0.0), Vec3::X, Vec3::ONE), None);
        solver.add_joint(6, 5, info(Vec3::X), None);

        let mut configs = BTreeMap::new();
        let mut a = JointConfig::new();
        a.set_target_pos(Vec3::new(3.0, 1.5, 0.0));
        configs.insert(4, a);
        let mut b = JointConfig::new();
        b.set_target_pos(Vec3::new(3.0, -1.5, 0.0));
        configs.insert(6, b);
        solver.update_joint_configs(&configs);
        solver.rebuild_all_chains();

        // 两条目标链终止于分叉的 sub-base(2)，sub-base 自己拿一条到根的链
        assert_eq!(solver.chains[&4], vec![4, 3, 2]);
        assert_eq!(solver.chains[&6], vec![6, 5, 2]);
        assert_eq!(solver.chains[&2], vec![2, 1, 0]);
        assert!(solver.active_roots.contains(&0));

        let error = solver.solve();
        assert!(error.is_finite());
        assert_world_consistent(&solver);
    }

    #[test]
    fn test_false_sub_base_condensed() {
        // 1 有两个子关节，但只有通往 2 的分支激活：
        // 1 是"假 sub-base"，它的链应拼进 2 的链
        let mut solver = Solver::new();
        solver.set_root_id(0);
        let info = |p: Vec3| JointInfo::new(p, Vec3::X, Vec3::ONE);
        solver.add_joint(0, -1, info(Vec3::ZERO), None);
        solver.add_joint(1, 0, info(Vec3::X), None);
        solver.add_joint(2, 1, JointInfo::new(Vec3::new(0.5, 0.5, 0.0), Vec3::X, Vec3::ONE), None);
        solver.add_joint(3, 1, JointInfo::new(Vec3::new(0.5, -0.5, 0.0), Vec3::X, Vec3::ONE), None);

        solver.update_joint_configs(&configs_with_target(2, Vec3::new(1.0, 1.5, 0.0)));
        solver.rebuild_all_chains();

        assert_eq!(solver.chains.len(), 1);
        assert_eq!(solver.chains[&2], vec![2, 1, 0]);
        assert!(!solver.skeleton[&3].is_active());
    }

    #[test]
    fn test_update_joint_configs_diff() {
        let mut solver = two_bone_arm();
        let configs = configs_with_target(2, Vec3::new(1.0, 1.0, 1.0));
        assert!(solver.update_joint_configs(&configs));
        // 一模一样的配置不需要重解
        assert!(!solver.update_joint_configs(&configs));
        // 目标挪出容差后需要重解
        let moved = configs_with_target(2, Vec3::new(1.0, 1.0, 1.1));
        assert!(solver.update_joint_configs(&moved));
        // 标志位变化需要重解
        let mut with_rot = configs_with_target(2, Vec3::new(1.0, 1.0, 1.1));
        with_rot
            .get_mut(&2)
            .unwrap()
            .set_target_rot(Quat::IDENTITY);
        assert!(solver.update_joint_configs(&with_rot));
    }

    #[test]
    fn test_relaxation_monotone() {
        let mut solver = two_bone_arm();
        // 手动激活并扭出一个非静息姿态
        for id in [0, 1, 2] {
            solver.skeleton.get_mut(&id).unwrap().activate();
        }
        let start = Quat::from_axis_angle(Vec3::Z, 1.2);
        solver.skeleton.get_mut(&1).unwrap().local_rot = start;

        let mut prev_angle = 1.2f32;
        for _ in 0..6 {
            solver.relax_rotations_recursively(0, 0.25);
            let rot = solver.skeleton[&1].local_rot;
            let angle = 2.0 * rot.w.abs().clamp(0.0, 1.0).acos();
            assert!(angle <= prev_angle + 1.0e-6, "angle = {}", angle);
            prev_angle = angle;
        }
        // 充分松弛后接近单位旋转
        assert!(prev_angle < 0.3);
    }

    #[test]
    fn test_reset_skeleton_restores_rest() {
        let mut solver = two_bone_arm();
        solver.update_joint_configs(&configs_with_target(2, Vec3::new(0.0, 2.0, 0.0)));
        solver.solve();
        assert!(solver.get_joint_local_rot(1) != Some(Quat::IDENTITY));

        solver.reset_skeleton();
        assert_eq!(solver.get_joint_local_rot(1), Some(Quat::IDENTITY));
        assert_eq!(
            solver.get_joint_world_end_pos(2),
            Some(Vec3::new(3.0, 0.0, 0.0))
        );
    }

    #[test]
    fn test_compute_reach() {
        let solver = two_bone_arm();
        // 0 的 tip 到 2 的 end：local_pos(1) + local_pos(2) + bone(2)
        let reach = solver.compute_reach(2, 0);
        assert_eq!(reach, Vec3::new(3.0, 0.0, 0.0));
        // 参数反序取负
        assert_eq!(solver.compute_reach(0, 2), Vec3::new(-3.0, 0.0, 0.0));
    }

    #[test]
    fn test_harvest_flags_after_solve() {
        let mut solver = two_bone_arm();
        solver.update_joint_configs(&configs_with_target(2, Vec3::new(1.0, 1.0, 1.0)));
        solver.solve();
        assert_eq!(solver.active_joints(), &[0, 1, 2]);
        for &joint_id in solver.active_joints() {
            let joint = solver.joint(joint_id).unwrap();
            assert!(joint.harvest_flags().contains(ConfigFlags::LOCAL_ROT));
        }
    }

    #[test]
    fn test_disabled_constraint_ignored() {
        let mut solver = Solver::new();
        solver.set_root_id(0);
        solver.add_joint(0, -1, JointInfo::new(Vec3::ZERO, Vec3::X, Vec3::ONE), None);
        let cone = Arc::new(Constraint::simple_cone(Vec3::X, 0.05));
        solver.add_joint(1, 0, JointInfo::new(Vec3::X, Vec3::X, Vec3::ONE), Some(cone));
        solver.add_joint(2, 1, JointInfo::new(Vec3::X, Vec3::X, Vec3::ONE), None);

        let target = Vec3::new(0.0, 1.0, 2.0f32.sqrt());
        let mut config = JointConfig::new();
        config.set_target_pos(target);
        solver.update_joint_configs(&BTreeMap::from([(2, config)]));
        let constrained_error = solver.solve();
        assert!(constrained_error > 5.0e-4);

        // 禁用约束后目标可达
        let mut config = JointConfig::new();
        config.set_target_pos(target);
        let mut j1 = JointConfig::new();
        j1.disable_constraint();
        solver.update_joint_configs(&BTreeMap::from([(1, j1), (2, config)]));
        let free_error = solver.solve();
        assert!(free_error <= 5.0e-4, "error = {}", free_error);
    }

    #[test]
    fn test_elbow_enforce_world_space() {
        // root(0) - 肩(1) - 肘(2)：肘的约束在世界坐标系 enforce，
        // 可能反过来旋转肩；求解后整树仍然一致且肘扭转在范围内
        let mut solver = Solver::new();
        solver.set_root_id(0);
        solver.add_joint(0, -1, JointInfo::new(Vec3::ZERO, Vec3::X, Vec3::ONE), None);
        solver.add_joint(1, 0, JointInfo::new(Vec3::X, Vec3::X, Vec3::ONE), None);
        let elbow = Arc::new(Constraint::elbow(Vec3::X, Vec3::Z, -2.5, 2.5, -0.4, 0.4));
        solver.add_joint(2, 1, JointInfo::new(Vec3::X, Vec3::X, Vec3::ONE), Some(elbow));

        solver.update_joint_configs(&configs_with_target(2, Vec3::new(1.0, 1.2, 0.3)));
        let error = solver.solve();
        assert!(error.is_finite());
        // 世界坐标系 enforce 会反推肩关节；旋转必须保持归一且
        // 肘的本地/世界旋转与父链一致
        for id in [0, 1, 2] {
            let joint = &solver.skeleton[&id];
            assert!((joint.world_rot.length() - 1.0).abs() <= 1.0e-4);
            assert!((joint.local_rot.length() - 1.0).abs() <= 1.0e-4);
        }
        let shoulder = &solver.skeleton[&1];
        let elbow = &solver.skeleton[&2];
        let expected_rot = shoulder.world_rot * elbow.local_rot;
        assert!(elbow.world_rot.dot(expected_rot).abs() >= 1.0 - 1.0e-3);
    }

    #[test]
    fn test_ccd_pass_reduces_error() {
        let mut solver = two_bone_arm();
        solver.set_ccd_enabled(true);
        let target = Vec3::new(0.0, 1.0, 2.0f32.sqrt());
        solver.update_joint_configs(&configs_with_target(2, target));
        let initial_dist = (Vec3::new(3.0, 0.0, 0.0) - target).length();
        let error = solver.solve();
        assert!(error < initial_dist, "error = {}", error);
        assert!(error.is_finite());
    }

    #[test]
    fn test_drop_elbow_runs() {
        let mut solver = Solver::new();
        solver.set_root_id(0);
        solver.add_joint(0, -1, JointInfo::new(Vec3::ZERO, Vec3::X, Vec3::ONE), None);
        solver.add_joint(1, 0, JointInfo::new(Vec3::X, Vec3::X, Vec3::ONE), None);
        solver.add_joint(2, 1, JointInfo::new(Vec3::X, Vec3::X, Vec3::ONE), None);
        solver.add_wrist_id(2);
        assert_eq!(solver.wrist_ids(), &[2]);

        // 先把手臂弯出平面，再尝试 drop-elbow
        solver.update_joint_configs(&configs_with_target(2, Vec3::new(1.0, 1.0, 1.0)));
        solver.solve();
        solver.drop_elbow(1);
        // 肘的世界变换仍然与肩一致
        let shoulder = &solver.skeleton[&1];
        let elbow = &solver.skeleton[&2];
        let expected = shoulder.world_pos + shoulder.world_rot * elbow.local_pos;
        assert!((elbow.world_pos - expected).length() <= 1.0e-4);
    }

    #[test]
    fn test_reset_joint_geometry_replaces_constraint() {
        let mut solver = two_bone_arm();
        let cone = Arc::new(Constraint::simple_cone(Vec3::X, 0.5));
        solver.reset_joint_geometry(1, Some(cone.clone()));
        assert!(solver.joint(1).unwrap().constraint().is_some());
        // 未知 id 只留警告，不崩溃
        solver.reset_joint_geometry(99, None);
    }
}
