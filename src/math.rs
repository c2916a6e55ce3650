//! 数学工具 - 四元数与周期角处理
//!
//! IK 迭代中大量使用"最短弧旋转"（把一个方向转到另一个方向的
//! 最小旋转）和跨越 ±π 不连续点的角度钳制，集中放在这里。

use glam::{Quat, Vec3};
use std::f32::consts::{PI, TAU};

/// 可以忽略不计的微小旋转角（弧度）
pub const VERY_SMALL_ANGLE: f32 = 0.001 * PI;

/// 判定两个单位四元数"几乎相等"的点积容差
const ALMOST_EQUAL_TOLERANCE: f32 = 1.0e-5;

/// 计算把向量 a 转到向量 b 的最小旋转
///
/// 输入不要求归一化；零向量输入返回单位旋转。
/// a ≈ -b 时任选一条垂直轴做 π 旋转。
pub fn shortest_arc(a: Vec3, b: Vec3) -> Quat {
    let a = a.normalize_or_zero();
    let b = b.normalize_or_zero();
    if a == Vec3::ZERO || b == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    Quat::from_rotation_arc(a, b)
}

/// 两个单位四元数是否表示几乎相同的旋转
///
/// 点积绝对值超过 1 - 1e-5 视为相等（q 与 -q 表示同一旋转）。
#[inline]
pub fn quat_almost_equal(a: Quat, b: Quat) -> bool {
    a.dot(b).abs() > 1.0 - ALMOST_EQUAL_TOLERANCE
}

/// 旋转角是否小于给定容差（与单位旋转比较）
#[inline]
pub fn quat_near_identity(q: Quat, angle_tolerance: f32) -> bool {
    q.w.abs() > (0.5 * angle_tolerance).cos()
}

/// 归一化可能退化的四元数累加和
///
/// 多目标平均会把若干最短弧旋转按分量求和再归一化，
/// 和向量可能退化为零（目标相互抵消），此时返回单位旋转。
pub(crate) fn normalized_or_identity(q: Quat) -> Quat {
    let length = q.length();
    if length > 1.0e-8 {
        Quat::from_xyzw(q.x / length, q.y / length, q.z / length, q.w / length)
    } else {
        Quat::IDENTITY
    }
}

/// 把角度归一化到 (-π, π]
#[inline]
pub fn normalize_angle(angle: f32) -> f32 {
    angle - TAU * ((angle + PI) / TAU).floor()
}

/// 归一化一对角度上下限并保证 min <= max
pub fn compute_angle_limits(min_angle: f32, max_angle: f32) -> (f32, f32) {
    let min_angle = normalize_angle(min_angle);
    let max_angle = normalize_angle(max_angle);
    if min_angle > max_angle {
        (max_angle, min_angle)
    } else {
        (min_angle, max_angle)
    }
}

/// 把周期角钳制到 [min_angle, max_angle]
///
/// min_angle 和 max_angle 必须已归一化到 (-π, π]。越界角落在
/// 禁区时取"最近的端点"：禁区被其角平分线一分为二，落在
/// max 一侧返回 max_angle，否则返回 min_angle。
///
/// ```text
///                max_angle
///                  \
///                   \
///                    (o)--------> 0
///                 .-'  \
///              .-'      \
///    invalid_bisector    min_angle
/// ```
pub fn clamp_periodic(angle: f32, min_angle: f32, max_angle: f32) -> f32 {
    if angle <= max_angle && angle >= min_angle {
        return angle;
    }
    // 禁区的角平分线
    let invalid_bisector = max_angle + 0.5 * (TAU - (max_angle - min_angle));

    // 去掉整圈
    let angle = angle - (angle / TAU).trunc() * TAU;

    if (angle > max_angle && angle < invalid_bisector) || angle < invalid_bisector - TAU {
        // 越界且靠近 max_angle
        max_angle
    } else if angle < min_angle || angle > invalid_bisector {
        // 越界且靠近 min_angle
        min_angle
    } else {
        angle
    }
}
