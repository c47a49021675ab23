//! `nav_msgs` payloads.

use serde::{Deserialize, Serialize};

use crate::RosMessage;
use crate::geometry_msgs::{PoseWithCovariance, TwistWithCovariance};
use crate::std_msgs::Header;

/// `nav_msgs/Odometry`
///
/// The robot's GPS pose stream reuses this type with WGS84 coordinates packed
/// into `pose.pose.position` (x = longitude, y = latitude, z = altitude).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Odometry {
    #[serde(default)]
    pub header: Header,
    #[serde(default)]
    pub child_frame_id: String,
    #[serde(default)]
    pub pose: PoseWithCovariance,
    #[serde(default)]
    pub twist: TwistWithCovariance,
}

impl RosMessage for Odometry {
    const TYPE_TAG: &'static str = "nav_msgs/Odometry";
}
