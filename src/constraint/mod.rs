//! 关节旋转约束
//!
//! 约束挂在关节上，限制其父系相对旋转（local_rot）的可行域。
//! 七种具体约束共享同一个头部（forward 轴）和同一个接口：
//! `project` 把候选旋转投影回可行域内最近的姿态。
//!
//! Elbow / Knee 两种约束在有父关节时有更强的 enforce 逻辑，会在
//! 世界坐标系中同时调整关节与其父关节，该逻辑在 `skeleton::solver`
//! 中实现（它需要访问整棵关节树）。
//!
//! 约束对象构造后不可变，可以在关节之间、求解器之间安全共享。

mod factory;

pub use factory::ConstraintFactory;

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use glam::{Quat, Vec3};
use serde_json::{json, Value};

use crate::math::{clamp_periodic, compute_angle_limits, normalize_angle, shortest_arc};

/// 构造正交坐标系时的最小向量长度
const MIN_PERP_LENGTH: f32 = 1.0e-4;

// ============================================================================
// 约束类型
// ============================================================================

/// 关节旋转约束：共享的 forward 轴 + 具体类型
#[derive(Clone, Debug)]
pub struct Constraint {
    /// 关节本地坐标系中的"瞄准"方向（静息骨骼方向），单位向量
    forward: Vec3,
    kind: ConstraintKind,
}

/// 七种具体约束
///
/// 角度全部为弧度。派生量（cos/sin/cot 缓存、正交化后的轴）在
/// 构造时算好存进变体里。
#[derive(Clone, Debug)]
pub enum ConstraintKind {
    /// 绕 forward 自由扭转，弯曲被限制在对称锥内
    SimpleCone {
        max_angle: f32,
        cos_cone: f32,
        sin_cone: f32,
    },

    /// 锥形弯曲限制 + 扭转区间限制
    TwistLimitedCone {
        cone_angle: f32,
        cos_cone: f32,
        sin_cone: f32,
        min_twist: f32,
        max_twist: f32,
    },

    /// 肘：只绕 pivot 弯曲（带区间），绕 forward 的扭转有区间限制
    Elbow {
        /// 弯曲枢轴，已正交化到垂直于 forward
        pivot: Vec3,
        /// pivot × forward，弯曲平面内垂直于 forward 的方向
        pivot_x_forward: Vec3,
        min_bend: f32,
        max_bend: f32,
        min_twist: f32,
        max_twist: f32,
    },

    /// 膝：只绕 pivot 弯曲（带区间），完全不允许扭转
    Knee {
        pivot: Vec3,
        pivot_x_forward: Vec3,
        min_bend: f32,
        max_bend: f32,
    },

    /// 椭圆锥：up / left / down / right 四个方向半径不同，
    /// 每个象限由一段椭圆弧界定
    AcuteEllipsoidalCone {
        up: Vec3,
        left: Vec3,
        radius_forward: f32,
        radius_up: f32,
        radius_left: f32,
        radius_down: f32,
        radius_right: f32,
        /// 每个象限把 left 分量缩放到"椭圆变成圆"的坐标系
        quadrant_scales: [f32; 4],
        quadrant_cos_angles: [f32; 4],
        quadrant_cot_angles: [f32; 4],
    },

    /// 双轴限位铰链：偏航 × 俯仰，不允许扭转
    DoubleLimitedHinge {
        up: Vec3,
        /// up × forward
        left: Vec3,
        min_yaw: f32,
        max_yaw: f32,
        /// 俯仰限制在 [-π/2, π/2]
        min_pitch: f32,
        max_pitch: f32,
    },

    /// 实验性肩部约束：投影暂时禁用（原样返回输入），
    /// 仅提供 drop-elbow 辅助所需的锥轴
    Shoulder { cone_axis: Vec3 },
}

// ============================================================================
// 构造
// ============================================================================

impl Constraint {
    /// 对称锥约束
    pub fn simple_cone(forward_axis: Vec3, max_angle: f32) -> Self {
        let forward = forward_axis.normalize();
        let max_angle = max_angle.abs();
        Self {
            forward,
            kind: ConstraintKind::SimpleCone {
                max_angle,
                cos_cone: max_angle.cos(),
                sin_cone: max_angle.sin(),
            },
        }
    }

    /// 锥 + 扭转区间约束
    pub fn twist_limited_cone(
        forward_axis: Vec3,
        cone_angle: f32,
        min_twist: f32,
        max_twist: f32,
    ) -> Self {
        let forward = forward_axis.normalize();
        let (min_twist, max_twist) = compute_angle_limits(min_twist, max_twist);
        Self {
            forward,
            kind: ConstraintKind::TwistLimitedCone {
                cone_angle,
                cos_cone: cone_angle.cos(),
                sin_cone: cone_angle.sin(),
                min_twist,
                max_twist,
            },
        }
    }

    /// 肘约束
    pub fn elbow(
        forward_axis: Vec3,
        pivot_axis: Vec3,
        min_bend: f32,
        max_bend: f32,
        min_twist: f32,
        max_twist: f32,
    ) -> Self {
        let forward = forward_axis.normalize();
        // 把枢轴正交化到垂直于 forward
        let pivot = forward.cross(pivot_axis.cross(forward)).normalize();
        let pivot_x_forward = pivot.cross(forward);
        let (min_bend, max_bend) = compute_angle_limits(min_bend, max_bend);
        let (min_twist, max_twist) = compute_angle_limits(min_twist, max_twist);
        Self {
            forward,
            kind: ConstraintKind::Elbow {
                pivot,
                pivot_x_forward,
                min_bend,
                max_bend,
                min_twist,
                max_twist,
            },
        }
    }

    /// 膝约束
    pub fn knee(forward_axis: Vec3, pivot_axis: Vec3, min_bend: f32, max_bend: f32) -> Self {
        let forward = forward_axis.normalize();
        let pivot = forward.cross(pivot_axis.cross(forward)).normalize();
        let pivot_x_forward = pivot.cross(forward);
        let (min_bend, max_bend) = compute_angle_limits(min_bend, max_bend);
        Self {
            forward,
            kind: ConstraintKind::Knee {
                pivot,
                pivot_x_forward,
                min_bend,
                max_bend,
            },
        }
    }

    /// 椭圆锥约束
    ///
    /// 五个半径描述在 forward 方向一个单位处的截面"十字"：四个
    /// 象限各由相邻两条半径的椭圆弧界定。
    pub fn acute_ellipsoidal_cone(
        forward_axis: Vec3,
        up_axis: Vec3,
        radius_forward: f32,
        radius_up: f32,
        radius_left: f32,
        radius_down: f32,
        radius_right: f32,
    ) -> Self {
        let up = up_axis.normalize();
        // forward 被重新正交化到垂直于 up
        let forward = up.cross(forward_axis).cross(up).normalize();
        let left = up.cross(forward);

        // 全部除以 forward 半径，把所有三角形的邻边归一化为 1，
        // 后面的三角函数缓存都建立在这个归一化之上
        let up_r = (radius_up / radius_forward).abs();
        let left_r = (radius_left / radius_forward).abs();
        let down_r = (radius_down / radius_forward).abs();
        let right_r = (radius_right / radius_forward).abs();

        // 象限编号（forward 指向纸内）：
        //             up
        //              |
        //          1   |   0
        //              |
        //  left ------(x)------ right
        //              |
        //          2   |   3
        //              |
        //            down
        let quadrant_scales = [up_r / right_r, up_r / left_r, down_r / left_r, down_r / right_r];

        // cosine = 邻边 / 斜边, cotangent = 邻边 / 对边
        let cos_up = 1.0 / (up_r * up_r + 1.0).sqrt();
        let cot_up = 1.0 / up_r;
        let cos_down = 1.0 / (down_r * down_r + 1.0).sqrt();
        let cot_down = 1.0 / down_r;
        let quadrant_cos_angles = [cos_up, cos_up, cos_down, cos_down];
        let quadrant_cot_angles = [cot_up, cot_up, cot_down, cot_down];

        Self {
            forward,
            kind: ConstraintKind::AcuteEllipsoidalCone {
                up,
                left,
                radius_forward,
                radius_up,
                radius_left,
                radius_down,
                radius_right,
                quadrant_scales,
                quadrant_cos_angles,
                quadrant_cot_angles,
            },
        }
    }

    /// 双轴限位铰链约束
    pub fn double_limited_hinge(
        forward_axis: Vec3,
        up_axis: Vec3,
        min_yaw: f32,
        max_yaw: f32,
        min_pitch: f32,
        max_pitch: f32,
    ) -> Self {
        let forward = forward_axis.normalize();
        let up = forward.cross(up_axis.cross(forward)).normalize();
        let left = up.cross(forward);
        let (min_yaw, max_yaw) = compute_angle_limits(min_yaw, max_yaw);

        // 俯仰保持在 [-π/2, π/2]
        const HALF_PI: f32 = 0.5 * std::f32::consts::PI;
        let mut min_pitch = normalize_angle(min_pitch).clamp(-HALF_PI, HALF_PI);
        let mut max_pitch = normalize_angle(max_pitch).clamp(-HALF_PI, HALF_PI);
        if min_pitch > max_pitch {
            std::mem::swap(&mut min_pitch, &mut max_pitch);
        }

        Self {
            forward,
            kind: ConstraintKind::DoubleLimitedHinge {
                up,
                left,
                min_yaw,
                max_yaw,
                min_pitch,
                max_pitch,
            },
        }
    }

    /// 肩约束（实验性，参数硬编码）
    pub fn shoulder(forward_axis: Vec3) -> Self {
        let forward = forward_axis.normalize();
        let cone_axis = (forward + Vec3::X - 1.5 * Vec3::Z).normalize();
        Self {
            forward,
            kind: ConstraintKind::Shoulder { cone_axis },
        }
    }

    // ========================================
    // 访问器
    // ========================================

    /// 本地坐标系中的瞄准方向
    #[inline]
    pub fn forward_axis(&self) -> Vec3 {
        self.forward
    }

    #[inline]
    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    /// 是否允许绕 forward 扭转（只有膝不允许）
    #[inline]
    pub fn allows_twist(&self) -> bool {
        !matches!(self.kind, ConstraintKind::Knee { .. })
    }

    /// 文档中使用的类型名
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ConstraintKind::SimpleCone { .. } => "SIMPLE_CONE",
            ConstraintKind::TwistLimitedCone { .. } => "TWIST_LIMITED_CONE",
            ConstraintKind::Elbow { .. } => "ELBOW",
            ConstraintKind::Knee { .. } => "KNEE",
            ConstraintKind::AcuteEllipsoidalCone { .. } => "ACUTE_ELLIPSOIDAL_CONE",
            ConstraintKind::DoubleLimitedHinge { .. } => "DOUBLE_LIMITED_HINGE",
            ConstraintKind::Shoulder { .. } => "SHOULDER",
        }
    }

    // ========================================
    // 投影
    // ========================================

    /// 把候选的 local_rot 投影到可行域内最近的姿态
    ///
    /// 可行域内的输入原样返回（幂等）。
    pub fn project(&self, local_rot: Quat) -> Quat {
        match &self.kind {
            ConstraintKind::SimpleCone { cos_cone, sin_cone, .. } => {
                self.project_onto_cone(local_rot, *cos_cone, *sin_cone)
            }
            ConstraintKind::TwistLimitedCone {
                cos_cone,
                sin_cone,
                min_twist,
                max_twist,
                ..
            } => self.project_twist_limited_cone(
                local_rot, *cos_cone, *sin_cone, *min_twist, *max_twist,
            ),
            ConstraintKind::Elbow {
                pivot,
                pivot_x_forward,
                min_bend,
                max_bend,
                min_twist,
                max_twist,
            } => self.project_elbow(
                local_rot,
                *pivot,
                *pivot_x_forward,
                *min_bend,
                *max_bend,
                *min_twist,
                *max_twist,
            ),
            ConstraintKind::Knee {
                pivot,
                pivot_x_forward,
                min_bend,
                max_bend,
            } => self.project_knee(local_rot, *pivot, *pivot_x_forward, *min_bend, *max_bend),
            ConstraintKind::AcuteEllipsoidalCone {
                up,
                left,
                quadrant_scales,
                quadrant_cos_angles,
                quadrant_cot_angles,
                ..
            } => self.project_ellipsoidal_cone(
                local_rot,
                *up,
                *left,
                quadrant_scales,
                quadrant_cos_angles,
                quadrant_cot_angles,
            ),
            ConstraintKind::DoubleLimitedHinge {
                up,
                left,
                min_yaw,
                max_yaw,
                min_pitch,
                max_pitch,
            } => self.project_double_limited_hinge(
                local_rot, *up, *left, *min_yaw, *max_yaw, *min_pitch, *max_pitch,
            ),
            // 肩约束的投影暂时禁用
            // TODO: 修好肩约束的锥/扭转投影后恢复
            ConstraintKind::Shoulder { .. } => local_rot,
        }
    }

    /// 锥形弯曲限制：把越界的 forward 投影到锥面上
    fn project_onto_cone(&self, local_rot: Quat, cos_cone: f32, sin_cone: f32) -> Quat {
        let forward = local_rot * self.forward;
        let forward_component = forward.dot(self.forward);
        if forward_component < cos_cone {
            // 关节的 forward 落在锥外，投影到锥面：
            //   projection = (forward 部分) + (正交部分)
            let perp = (forward - forward_component * self.forward).normalize_or_zero();
            if perp == Vec3::ZERO {
                // forward 与锥轴反向平行，弯曲方向无定义，保持原样
                return local_rot;
            }
            let new_forward = cos_cone * self.forward + sin_cone * perp;
            let adjustment = shortest_arc(forward, new_forward);
            (adjustment * local_rot).normalize()
        } else {
            local_rot
        }
    }

    fn project_twist_limited_cone(
        &self,
        local_rot: Quat,
        cos_cone: f32,
        sin_cone: f32,
        min_twist: f32,
        max_twist: f32,
    ) -> Quat {
        let mut adjusted = local_rot;
        let mut forward = local_rot * self.forward;
        let mut forward_component = forward.dot(self.forward);
        if forward_component < cos_cone {
            let perp = (forward - forward_component * self.forward).normalize_or_zero();
            if perp != Vec3::ZERO {
                let new_forward = cos_cone * self.forward + sin_cone * perp;
                adjusted = (shortest_arc(forward, new_forward) * local_rot).normalize();
                forward = new_forward;
                forward_component = forward.dot(self.forward);
            }
        }

        // 构造垂直于 forward 的两条轴：perp_x 与弯曲轴平行
        let mut perp_x = self.forward.cross(forward);
        if perp_x.length() < MIN_PERP_LENGTH {
            perp_x = Vec3::X.cross(forward);
            if perp_x.length() < MIN_PERP_LENGTH {
                perp_x = forward.cross(Vec3::Y);
            }
        }
        let perp_x = perp_x.normalize();
        let perp_y = forward.cross(perp_x);

        // perp_x 已在弯曲后的坐标系里且与弯曲轴平行，
        // 把 perp_y 也旋入弯曲后的坐标系
        let bend_angle = forward_component.clamp(-1.0, 1.0).acos();
        let bend_rot = Quat::from_axis_angle(perp_x, bend_angle);
        let bent_perp_y = bend_rot * perp_y;

        // 把 perp_x 旋入关节坐标系：它平行于弯曲轴，效果全是扭转
        let rotated_perp_x = adjusted * perp_x;

        // rotated_perp_x 在 perp_x 和 bent_perp_y 上的分量给出扭转角
        let twist = rotated_perp_x
            .dot(perp_x)
            .atan2(rotated_perp_x.dot(bent_perp_y));

        let new_twist = clamp_periodic(twist, min_twist, max_twist);
        if new_twist != twist {
            let new_rotated_perp_x = new_twist.cos() * perp_x + new_twist.sin() * bent_perp_y;
            let adjustment = shortest_arc(rotated_perp_x, new_rotated_perp_x);
            adjusted = (adjustment * adjusted).normalize();
        }
        adjusted
    }

    /// 肘投影：关节没有父关节时的后备路径
    /// （有父关节时由求解器在世界坐标系中 enforce）
    fn project_elbow(
        &self,
        local_rot: Quat,
        pivot: Vec3,
        pivot_x_forward: Vec3,
        min_bend: f32,
        max_bend: f32,
        min_twist: f32,
        max_twist: f32,
    ) -> Quat {
        let forward = local_rot * self.forward;

        // 先把 forward 拉回铰链平面（垂直于 pivot 的平面）
        let projected_forward = forward - forward.dot(pivot) * pivot;
        let mut adjusted = shortest_arc(forward, projected_forward) * local_rot;
        let mut new_forward = adjusted * self.forward;

        // 测量并钳制扭转
        let twisted_pivot = adjusted * pivot;
        let cos_part = twisted_pivot.dot(pivot);
        let sin_part = (adjusted * pivot_x_forward).dot(pivot);
        let twist = sin_part.atan2(cos_part);

        let new_twist = clamp_periodic(twist, min_twist, max_twist);
        if new_twist != twist {
            let swung_left_axis = pivot.cross(new_forward);
            let new_twisted_pivot =
                new_twist.cos() * pivot - new_twist.sin() * swung_left_axis;
            adjusted = shortest_arc(twisted_pivot, new_twisted_pivot) * adjusted;
            new_forward = adjusted * self.forward;
        }

        // 测量并钳制弯曲
        let bend = new_forward
            .dot(pivot_x_forward)
            .atan2(new_forward.dot(self.forward));
        let new_bend = clamp_periodic(bend, min_bend, max_bend);
        if new_bend != bend {
            let target_forward = new_bend.cos() * self.forward + new_bend.sin() * pivot_x_forward;
            adjusted = shortest_arc(forward, target_forward) * adjusted;
        }
        adjusted.normalize()
    }

    fn project_knee(
        &self,
        local_rot: Quat,
        pivot: Vec3,
        pivot_x_forward: Vec3,
        min_bend: f32,
        max_bend: f32,
    ) -> Quat {
        // 先把旋转后的枢轴对齐回 pivot，消除全部扭转
        let joint_axis = local_rot * pivot;
        let mut adjusted = shortest_arc(joint_axis, pivot) * local_rot;

        let forward = adjusted * self.forward;
        let new_forward = forward;

        // 测量并钳制弯曲
        let bend = new_forward
            .dot(pivot_x_forward)
            .atan2(new_forward.dot(self.forward));
        let new_bend = clamp_periodic(bend, min_bend, max_bend);
        if new_bend != bend {
            let target_forward = new_bend.cos() * self.forward + new_bend.sin() * pivot_x_forward;
            adjusted = shortest_arc(forward, target_forward) * adjusted;
        }
        adjusted.normalize()
    }

    fn project_ellipsoidal_cone(
        &self,
        local_rot: Quat,
        up: Vec3,
        left: Vec3,
        quadrant_scales: &[f32; 4],
        quadrant_cos_angles: &[f32; 4],
        quadrant_cot_angles: &[f32; 4],
    ) -> Quat {
        let forward = local_rot * self.forward;

        // 按 up / left 分量的符号确定象限
        let up_component = forward.dot(up);
        let left_component = forward.dot(left);
        let q = if up_component < 0.0 {
            if left_component < 0.0 {
                2
            } else {
                3
            }
        } else if left_component < 0.0 {
            1
        } else {
            0
        };

        // 把 left 分量缩放到该象限的椭圆变成圆的坐标系
        let scaled_left_component = left_component * quadrant_scales[q];

        // 在缩放坐标系里重组方向；它不再是单位向量，检查越界时
        // 必须用它的长度修正 forward 分量
        let forward_component = forward.dot(self.forward);
        let scaled = forward_component * self.forward + up_component * up + scaled_left_component * left;
        if forward_component / scaled.length() < quadrant_cos_angles[q] {
            // 越界，投影到锥面。正交分量不变，用
            //     adjacent = opposite * cot(angle)
            // 算出缩放坐标系中修正后的 forward 分量
            let orthogonal_component = (scaled_left_component * scaled_left_component
                + up_component * up_component)
                .sqrt();
            let new_forward_component = orthogonal_component * quadrant_cot_angles[q];

            // 回到非缩放坐标系重组方向（长度无所谓，shortest_arc 会归一化）
            let new_forward = new_forward_component * self.forward
                + up_component * up
                + left_component * left;

            let adjustment = shortest_arc(forward, new_forward);
            (adjustment * local_rot).normalize()
        } else {
            local_rot
        }
    }

    fn project_double_limited_hinge(
        &self,
        local_rot: Quat,
        up: Vec3,
        left: Vec3,
        min_yaw: f32,
        max_yaw: f32,
        min_pitch: f32,
        max_pitch: f32,
    ) -> Quat {
        // 先消除扭转：把旋转后的 left 轴拉回水平面
        let joint_left = local_rot * left;
        let adjustment = shortest_arc(joint_left, joint_left - joint_left.dot(up) * up);
        let mut adjusted = adjustment * local_rot;

        let forward = adjusted * self.forward;

        // 偏航
        let mut up_component = forward.dot(up);
        let mut horizontal_axis = forward - up_component * up;
        let yaw = horizontal_axis
            .dot(left)
            .atan2(horizontal_axis.dot(self.forward));
        let new_yaw = clamp_periodic(yaw, min_yaw, max_yaw);
        if new_yaw != yaw {
            horizontal_axis = new_yaw.cos() * self.forward + new_yaw.sin() * left;
        } else {
            horizontal_axis = horizontal_axis.normalize_or_zero();
        }

        // 俯仰
        // 俯仰轴是 left，按右手定则正俯仰把 forward 往下压，
        // 所以对边（sin 项）取负的 up 分量
        let mut horizontal_component = (1.0 - up_component * up_component).max(0.0).sqrt();
        let pitch = (-up_component).atan2(horizontal_component);
        let new_pitch = clamp_periodic(pitch, min_pitch, max_pitch);
        if new_pitch != pitch {
            up_component = -new_pitch.sin();
            horizontal_component = (1.0 - up_component * up_component).max(0.0).sqrt();
        }

        let new_forward =
            (horizontal_component * horizontal_axis + up_component * up).normalize_or_zero();
        if forward.distance(new_forward) > 1.0e-3 {
            adjusted = shortest_arc(forward, new_forward) * adjusted;
        }
        adjusted.normalize()
    }

    // ========================================
    // 哈希与文档
    // ========================================

    /// 结构哈希：参数完全相同的约束哈希相等，用于工厂去重
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        hasher.write(self.type_name().as_bytes());
        hash_vec3(&mut hasher, self.forward);
        match &self.kind {
            ConstraintKind::SimpleCone { max_angle, .. } => {
                hash_f32(&mut hasher, *max_angle);
            }
            ConstraintKind::TwistLimitedCone {
                cone_angle,
                min_twist,
                max_twist,
                ..
            } => {
                hash_f32(&mut hasher, *cone_angle);
                hash_f32(&mut hasher, *min_twist);
                hash_f32(&mut hasher, *max_twist);
            }
            ConstraintKind::Elbow {
                pivot,
                min_bend,
                max_bend,
                min_twist,
                max_twist,
                ..
            } => {
                hash_vec3(&mut hasher, *pivot);
                hash_f32(&mut hasher, *min_bend);
                hash_f32(&mut hasher, *max_bend);
                hash_f32(&mut hasher, *min_twist);
                hash_f32(&mut hasher, *max_twist);
            }
            ConstraintKind::Knee {
                pivot,
                min_bend,
                max_bend,
                ..
            } => {
                hash_vec3(&mut hasher, *pivot);
                hash_f32(&mut hasher, *min_bend);
                hash_f32(&mut hasher, *max_bend);
            }
            ConstraintKind::AcuteEllipsoidalCone {
                up,
                radius_forward,
                radius_up,
                radius_left,
                radius_down,
                radius_right,
                ..
            } => {
                hash_vec3(&mut hasher, *up);
                hash_f32(&mut hasher, *radius_forward);
                hash_f32(&mut hasher, *radius_up);
                hash_f32(&mut hasher, *radius_left);
                hash_f32(&mut hasher, *radius_down);
                hash_f32(&mut hasher, *radius_right);
            }
            ConstraintKind::DoubleLimitedHinge {
                up,
                min_yaw,
                max_yaw,
                min_pitch,
                max_pitch,
                ..
            } => {
                hash_vec3(&mut hasher, *up);
                hash_f32(&mut hasher, *min_yaw);
                hash_f32(&mut hasher, *max_yaw);
                hash_f32(&mut hasher, *min_pitch);
                hash_f32(&mut hasher, *max_pitch);
            }
            ConstraintKind::Shoulder { .. } => {}
        }
        hasher.finish()
    }

    /// 导出自描述文档（角度转回度，与加载格式一致）
    pub fn as_document(&self) -> Value {
        let mut doc = json!({
            "type": self.type_name(),
            "forward_axis": [self.forward.x, self.forward.y, self.forward.z],
        });
        match &self.kind {
            ConstraintKind::SimpleCone { max_angle, .. } => {
                doc["max_angle"] = json!(max_angle.to_degrees());
            }
            ConstraintKind::TwistLimitedCone {
                cone_angle,
                min_twist,
                max_twist,
                ..
            } => {
                doc["cone_angle"] = json!(cone_angle.to_degrees());
                doc["min_twist"] = json!(min_twist.to_degrees());
                doc["max_twist"] = json!(max_twist.to_degrees());
            }
            ConstraintKind::Elbow {
                pivot,
                min_bend,
                max_bend,
                min_twist,
                max_twist,
                ..
            } => {
                doc["pivot_axis"] = json!([pivot.x, pivot.y, pivot.z]);
                doc["min_bend"] = json!(min_bend.to_degrees());
                doc["max_bend"] = json!(max_bend.to_degrees());
                doc["min_twist"] = json!(min_twist.to_degrees());
                doc["max_twist"] = json!(max_twist.to_degrees());
            }
            ConstraintKind::Knee {
                pivot,
                min_bend,
                max_bend,
                ..
            } => {
                doc["pivot_axis"] = json!([pivot.x, pivot.y, pivot.z]);
                doc["min_bend"] = json!(min_bend.to_degrees());
                doc["max_bend"] = json!(max_bend.to_degrees());
            }
            ConstraintKind::AcuteEllipsoidalCone {
                up,
                radius_forward,
                radius_up,
                radius_left,
                radius_down,
                radius_right,
                ..
            } => {
                doc["up_axis"] = json!([up.x, up.y, up.z]);
                doc["forward"] = json!(radius_forward);
                doc["up"] = json!(radius_up);
                doc["left"] = json!(radius_left);
                doc["down"] = json!(radius_down);
                doc["right"] = json!(radius_right);
            }
            ConstraintKind::DoubleLimitedHinge {
                up,
                min_yaw,
                max_yaw,
                min_pitch,
                max_pitch,
                ..
            } => {
                doc["up_axis"] = json!([up.x, up.y, up.z]);
                doc["min_yaw"] = json!(min_yaw.to_degrees());
                doc["max_yaw"] = json!(max_yaw.to_degrees());
                doc["min_pitch"] = json!(min_pitch.to_degrees());
                doc["max_pitch"] = json!(max_pitch.to_degrees());
            }
            ConstraintKind::Shoulder { .. } => {}
        }
        doc
    }
}

#[inline]
fn hash_f32<H: Hasher>(state: &mut H, value: f32) {
    state.write_u32(value.to_bits());
}

#[inline]
fn hash_vec3<H: Hasher>(state: &mut H, v: Vec3) {
    hash_f32(state, v.x);
    hash_f32(state, v.y);
    hash_f32(state, v.z);
}
