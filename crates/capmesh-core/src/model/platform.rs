use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

/// An entity category of the host framework.
///
/// Declaration order is the default allocation priority: earlier platforms
/// get first pick of a device's capabilities.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    Climate,
    Fan,
    Light,
    Lock,
    Cover,
    Switch,
    BinarySensor,
    Sensor,
    Scene,
    Number,
    Select,
    Button,
    Text,
    Vacuum,
    Valve,
    Update,
}

/// Default allocation priority, highest first.
pub const PLATFORMS: [Platform; 16] = [
    Platform::Climate,
    Platform::Fan,
    Platform::Light,
    Platform::Lock,
    Platform::Cover,
    Platform::Switch,
    Platform::BinarySensor,
    Platform::Sensor,
    Platform::Scene,
    Platform::Number,
    Platform::Select,
    Platform::Button,
    Platform::Text,
    Platform::Vacuum,
    Platform::Valve,
    Platform::Update,
];
