//! 约束工厂与约束文档加载
//!
//! 约束文档是一个 JSON 映射：骨骼关节名 → 约束定义。每条定义
//! 自描述（带 `type` 字段），角度以**度**存储，加载时转为弧度。
//!
//! 约束对象无状态，工厂按结构哈希去重：参数完全相同的定义共享
//! 同一个 `Arc<Constraint>` 实例。
//!
//! 文档缺失或损坏不是致命错误：整体解析失败返回 `Err`，调用方
//! 降级为警告即可（空工厂是合法状态）；单条定义非法则记录警告
//! 后跳过，对应关节不挂约束。

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use glam::Vec3;
use serde::Deserialize;
use serde_json::Value;

use super::Constraint;
use crate::{IkError, Result};

// ============================================================================
// 文档条目
// ============================================================================

/// 约束文档中的单条定义（角度单位：度；半径无单位）
#[derive(Debug, Deserialize)]
struct ConstraintSpec {
    #[serde(rename = "type")]
    kind: String,
    forward_axis: [f32; 3],

    // 锥
    #[serde(default)]
    max_angle: Option<f32>,
    #[serde(default)]
    cone_angle: Option<f32>,

    // 扭转
    #[serde(default)]
    min_twist: Option<f32>,
    #[serde(default)]
    max_twist: Option<f32>,

    // 铰链
    #[serde(default)]
    pivot_axis: Option<[f32; 3]>,
    #[serde(default)]
    min_bend: Option<f32>,
    #[serde(default)]
    max_bend: Option<f32>,

    // 椭圆锥
    #[serde(default)]
    up_axis: Option<[f32; 3]>,
    #[serde(default)]
    forward: Option<f32>,
    #[serde(default)]
    up: Option<f32>,
    #[serde(default)]
    down: Option<f32>,
    #[serde(default)]
    left: Option<f32>,
    #[serde(default)]
    right: Option<f32>,

    // 双轴铰链
    #[serde(default)]
    min_yaw: Option<f32>,
    #[serde(default)]
    max_yaw: Option<f32>,
    #[serde(default)]
    min_pitch: Option<f32>,
    #[serde(default)]
    max_pitch: Option<f32>,
}

impl ConstraintSpec {
    /// 取必填角度字段并转为弧度
    fn angle(&self, value: Option<f32>, name: &str) -> Result<f32> {
        value
            .map(f32::to_radians)
            .ok_or_else(|| IkError::BadConstraint(format!("{} 缺少字段 '{}'", self.kind, name)))
    }

    /// 取必填标量字段（不做角度转换）
    fn scalar(&self, value: Option<f32>, name: &str) -> Result<f32> {
        value.ok_or_else(|| IkError::BadConstraint(format!("{} 缺少字段 '{}'", self.kind, name)))
    }

    /// 取必填向量字段
    fn axis(&self, value: Option<[f32; 3]>, name: &str) -> Result<Vec3> {
        value
            .map(Vec3::from_array)
            .ok_or_else(|| IkError::BadConstraint(format!("{} 缺少字段 '{}'", self.kind, name)))
    }
}

// ============================================================================
// 工厂
// ============================================================================

/// 约束工厂：按结构哈希去重的共享实例池 + 关节名映射
#[derive(Debug, Default)]
pub struct ConstraintFactory {
    /// 结构哈希 → 共享实例
    cache: HashMap<u64, Arc<Constraint>>,
    /// 关节名 → 共享实例
    joint_mapping: HashMap<String, Arc<Constraint>>,
}

impl ConstraintFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从文件加载约束文档
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let doc: Value =
            serde_json::from_str(&text).map_err(|e| IkError::DocParse(e.to_string()))?;
        Ok(Self::from_document(&doc))
    }

    /// 从已解析的 JSON 文档构建工厂
    ///
    /// 非法条目记录警告后跳过，不影响其余条目。
    pub fn from_document(doc: &Value) -> Self {
        let mut factory = Self::new();
        let Some(mappings) = doc.as_object() else {
            log::warn!("[IK] 约束文档顶层不是映射，忽略");
            return factory;
        };
        for (joint_name, def) in mappings {
            match Self::create(def) {
                Ok(constraint) => {
                    let shared = factory.intern(constraint);
                    factory.joint_mapping.insert(joint_name.clone(), shared);
                }
                Err(e) => {
                    log::warn!("[IK] 关节 '{}' 的约束定义无效，跳过: {}", joint_name, e);
                }
            }
        }
        factory
    }

    /// 放入实例池：已有结构相同的实例则返回共享实例
    pub fn intern(&mut self, constraint: Constraint) -> Arc<Constraint> {
        let hash = constraint.structural_hash();
        self.cache
            .entry(hash)
            .or_insert_with(|| Arc::new(constraint))
            .clone()
    }

    /// 按骨骼关节名查找约束
    pub fn constraint_for_joint(&self, joint_name: &str) -> Option<Arc<Constraint>> {
        self.joint_mapping.get(joint_name).cloned()
    }

    /// 去重后的约束实例数
    pub fn num_constraints(&self) -> usize {
        self.cache.len()
    }

    /// 按单条定义构造约束
    fn create(def: &Value) -> Result<Constraint> {
        let spec: ConstraintSpec = serde_json::from_value(def.clone())
            .map_err(|e| IkError::BadConstraint(e.to_string()))?;
        let forward_axis = Vec3::from_array(spec.forward_axis);
        let kind = spec.kind.to_uppercase();
        match kind.as_str() {
            "SIMPLE_CONE" => Ok(Constraint::simple_cone(
                forward_axis,
                spec.angle(spec.max_angle, "max_angle")?,
            )),
            "TWIST_LIMITED_CONE" => Ok(Constraint::twist_limited_cone(
                forward_axis,
                spec.angle(spec.cone_angle, "cone_angle")?,
                spec.angle(spec.min_twist, "min_twist")?,
                spec.angle(spec.max_twist, "max_twist")?,
            )),
            "ELBOW" => Ok(Constraint::elbow(
                forward_axis,
                spec.axis(spec.pivot_axis, "pivot_axis")?,
                spec.angle(spec.min_bend, "min_bend")?,
                spec.angle(spec.max_bend, "max_bend")?,
                spec.angle(spec.min_twist, "min_twist")?,
                spec.angle(spec.max_twist, "max_twist")?,
            )),
            "KNEE" => Ok(Constraint::knee(
                forward_axis,
                spec.axis(spec.pivot_axis, "pivot_axis")?,
                spec.angle(spec.min_bend, "min_bend")?,
                spec.angle(spec.max_bend, "max_bend")?,
            )),
            "ACUTE_ELLIPSOIDAL_CONE" => Ok(Constraint::acute_ellipsoidal_cone(
                forward_axis,
                spec.axis(spec.up_axis, "up_axis")?,
                spec.scalar(spec.forward, "forward")?,
                spec.scalar(spec.up, "up")?,
                spec.scalar(spec.left, "left")?,
                spec.scalar(spec.down, "down")?,
                spec.scalar(spec.right, "right")?,
            )),
            "DOUBLE_LIMITED_HINGE" => Ok(Constraint::double_limited_hinge(
                forward_axis,
                spec.axis(spec.up_axis, "up_axis")?,
                spec.angle(spec.min_yaw, "min_yaw")?,
                spec.angle(spec.max_yaw, "max_yaw")?,
                spec.angle(spec.min_pitch, "min_pitch")?,
                spec.angle(spec.max_pitch, "max_pitch")?,
            )),
            "SHOULDER" => Ok(Constraint::shoulder(forward_axis)),
            other => Err(IkError::BadConstraint(format!("未知约束类型 '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> Value {
        json!({
            "mElbowLeft": {
                "type": "ELBOW",
                "forward_axis": [1.0, 0.0, 0.0],
                "pivot_axis": [0.0, 0.0, 1.0],
                "min_bend": -150.0,
                "max_bend": 0.0,
                "min_twist": -30.0,
                "max_twist": 30.0
            },
            "mElbowRight": {
                "type": "ELBOW",
                "forward_axis": [1.0, 0.0, 0.0],
                "pivot_axis": [0.0, 0.0, 1.0],
                "min_bend": -150.0,
                "max_bend": 0.0,
                "min_twist": -30.0,
                "max_twist": 30.0
            },
            "mKneeLeft": {
                "type": "KNEE",
                "forward_axis": [0.0, 0.0, -1.0],
                "pivot_axis": [0.0, 1.0, 0.0],
                "min_bend": 0.0,
                "max_bend": 150.0
            },
            "mWristLeft": {
                "type": "DOUBLE_LIMITED_HINGE",
                "forward_axis": [1.0, 0.0, 0.0],
                "up_axis": [0.0, 0.0, 1.0],
                "min_yaw": -40.0,
                "max_yaw": 40.0,
                "min_pitch": -60.0,
                "max_pitch": 60.0
            }
        })
    }

    #[test]
    fn test_load_document() {
        let factory = ConstraintFactory::from_document(&sample_document());
        assert!(factory.constraint_for_joint("mElbowLeft").is_some());
        assert!(factory.constraint_for_joint("mKneeLeft").is_some());
        assert!(factory.constraint_for_joint("mChest").is_none());
    }

    #[test]
    fn test_dedup_identical_specs() {
        let factory = ConstraintFactory::from_document(&sample_document());
        // 左右肘的参数完全相同，必须共享同一个实例
        let left = factory.constraint_for_joint("mElbowLeft").unwrap();
        let right = factory.constraint_for_joint("mElbowRight").unwrap();
        assert!(Arc::ptr_eq(&left, &right));
        // 4 个关节映射，3 个去重后的实例
        assert_eq!(factory.num_constraints(), 3);
    }

    #[test]
    fn test_degrees_converted_to_radians() {
        let factory = ConstraintFactory::from_document(&sample_document());
        let wrist = factory.constraint_for_joint("mWristLeft").unwrap();
        let crate::constraint::ConstraintKind::DoubleLimitedHinge { max_yaw, .. } = wrist.kind()
        else {
            panic!("wrong kind");
        };
        assert!((max_yaw - 40.0f32.to_radians()).abs() < 1.0e-6);
    }

    #[test]
    fn test_malformed_entry_skipped() {
        let doc = json!({
            "mGood": {
                "type": "SIMPLE_CONE",
                "forward_axis": [1.0, 0.0, 0.0],
                "max_angle": 30.0
            },
            "mMissingField": {
                "type": "SIMPLE_CONE",
                "forward_axis": [1.0, 0.0, 0.0]
            },
            "mUnknownType": {
                "type": "MYSTERY",
                "forward_axis": [1.0, 0.0, 0.0]
            }
        });
        let factory = ConstraintFactory::from_document(&doc);
        assert!(factory.constraint_for_joint("mGood").is_some());
        assert!(factory.constraint_for_joint("mMissingField").is_none());
        assert!(factory.constraint_for_joint("mUnknownType").is_none());
        assert_eq!(factory.num_constraints(), 1);
    }

    #[test]
    fn test_non_map_document() {
        let factory = ConstraintFactory::from_document(&json!([1, 2, 3]));
        assert_eq!(factory.num_constraints(), 0);
    }

    #[test]
    fn test_document_round_trip() {
        let factory = ConstraintFactory::from_document(&sample_document());
        let knee = factory.constraint_for_joint("mKneeLeft").unwrap();
        // 导出文档再加载，结构哈希必须一致
        let doc = json!({ "mKnee": knee.as_document() });
        let reloaded = ConstraintFactory::from_document(&doc);
        let knee2 = reloaded.constraint_for_joint("mKnee").unwrap();
        assert_eq!(knee.structural_hash(), knee2.structural_hash());
    }

    #[test]
    fn test_type_name_case_insensitive() {
        let doc = json!({
            "mJoint": {
                "type": "simple_cone",
                "forward_axis": [0.0, 1.0, 0.0],
                "max_angle": 45.0
            }
        });
        let factory = ConstraintFactory::from_document(&doc);
        assert!(factory.constraint_for_joint("mJoint").is_some());
    }
}
