//! `std_msgs` payloads.

use serde::{Deserialize, Serialize};

use crate::RosMessage;

/// `std_msgs/String`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringMsg {
    pub data: String,
}

impl StringMsg {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}

impl RosMessage for StringMsg {
    const TYPE_TAG: &'static str = "std_msgs/String";
}

/// `std_msgs/Float32`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Float32Msg {
    pub data: f32,
}

impl RosMessage for Float32Msg {
    const TYPE_TAG: &'static str = "std_msgs/Float32";
}

/// `std_msgs/Bool`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolMsg {
    pub data: bool,
}

impl RosMessage for BoolMsg {
    const TYPE_TAG: &'static str = "std_msgs/Bool";
}

/// ROS `time` primitive as rosbridge encodes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    #[serde(default)]
    pub secs: u32,
    #[serde(default)]
    pub nsecs: u32,
}

/// `std_msgs/Header`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub seq: u32,
    #[serde(default)]
    pub stamp: Time,
    #[serde(default)]
    pub frame_id: String,
}

impl RosMessage for Header {
    const TYPE_TAG: &'static str = "std_msgs/Header";
}
