//! `geometry_msgs` payloads.
//!
//! Covariance arrays are row-major 6×6 matrices.  Brokers frequently omit
//! them, so they default to all zeros when absent.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::RosMessage;

const COVARIANCE_LEN: usize = 36;

/// Row-major 6×6 covariance matrix.
pub type Covariance = Vec<f64>;

fn zero_covariance() -> Covariance {
    vec![0.0; COVARIANCE_LEN]
}

/// Accepts either an empty array (treated as unknown, i.e. zeros) or exactly
/// 36 entries.
fn covariance<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Covariance, D::Error> {
    let values = Vec::<f64>::deserialize(deserializer)?;
    match values.len() {
        0 => Ok(zero_covariance()),
        COVARIANCE_LEN => Ok(values),
        n => Err(D::Error::custom(format!(
            "covariance must have {COVARIANCE_LEN} entries, got {n}"
        ))),
    }
}

/// `geometry_msgs/Vector3`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl RosMessage for Vector3 {
    const TYPE_TAG: &'static str = "geometry_msgs/Vector3";
}

/// `geometry_msgs/Point`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl RosMessage for Point {
    const TYPE_TAG: &'static str = "geometry_msgs/Point";
}

/// `geometry_msgs/Quaternion`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "unit_w")]
    pub w: f64,
}

fn unit_w() -> f64 {
    1.0
}

impl Quaternion {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl RosMessage for Quaternion {
    const TYPE_TAG: &'static str = "geometry_msgs/Quaternion";
}

/// `geometry_msgs/Pose`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    #[serde(default)]
    pub position: Point,
    #[serde(default)]
    pub orientation: Quaternion,
}

impl RosMessage for Pose {
    const TYPE_TAG: &'static str = "geometry_msgs/Pose";
}

/// `geometry_msgs/PoseWithCovariance`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseWithCovariance {
    #[serde(default)]
    pub pose: Pose,
    #[serde(default = "zero_covariance", deserialize_with = "covariance")]
    pub covariance: Covariance,
}

impl PoseWithCovariance {
    pub fn new(pose: Pose) -> Self {
        Self {
            pose,
            covariance: zero_covariance(),
        }
    }
}

impl Default for PoseWithCovariance {
    fn default() -> Self {
        Self::new(Pose::default())
    }
}

impl RosMessage for PoseWithCovariance {
    const TYPE_TAG: &'static str = "geometry_msgs/PoseWithCovariance";
}

/// `geometry_msgs/Twist`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    #[serde(default)]
    pub linear: Vector3,
    #[serde(default)]
    pub angular: Vector3,
}

impl Twist {
    /// Differential-drive command: forward speed (m/s) and yaw rate (rad/s).
    pub fn drive(linear: f64, angular: f64) -> Self {
        Self {
            linear: Vector3::new(linear, 0.0, 0.0),
            angular: Vector3::new(0.0, 0.0, angular),
        }
    }

    /// All-zero command that halts the base.
    pub fn stop() -> Self {
        Self::default()
    }
}

impl RosMessage for Twist {
    const TYPE_TAG: &'static str = "geometry_msgs/Twist";
}

/// `geometry_msgs/TwistWithCovariance`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwistWithCovariance {
    #[serde(default)]
    pub twist: Twist,
    #[serde(default = "zero_covariance", deserialize_with = "covariance")]
    pub covariance: Covariance,
}

impl Default for TwistWithCovariance {
    fn default() -> Self {
        Self {
            twist: Twist::default(),
            covariance: zero_covariance(),
        }
    }
}

impl RosMessage for TwistWithCovariance {
    const TYPE_TAG: &'static str = "geometry_msgs/TwistWithCovariance";
}
