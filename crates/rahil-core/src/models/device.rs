use serde::{Deserialize, Serialize};

/// This installation's stable identity, sent when registering the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "Platform")]
    pub platform: String,
}

impl DeviceIdentity {
    pub fn new(uuid: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            platform: platform.into(),
        }
    }
}

/// Reply from `POST /api/devices/register`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: u64,
}
