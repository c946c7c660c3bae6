use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use edgeflow_core::{DataFormat, DataParserConfig};

/// Delivery guarantee
///
/// Configured either by level (`0`, `1`, `2`) or by name (`AT_LEAST_ONCE`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MqttQos {
    /// QoS 0
    #[default]
    AtMostOnce,
    /// QoS 1
    AtLeastOnce,
    /// QoS 2
    ExactlyOnce,
}

impl MqttQos {
    fn from_level(level: u64) -> Option<Self> {
        match level {
            0 => Some(MqttQos::AtMostOnce),
            1 => Some(MqttQos::AtLeastOnce),
            2 => Some(MqttQos::ExactlyOnce),
            _ => None,
        }
    }
}

struct QosVisitor;

impl<'de> Visitor<'de> for QosVisitor {
    type Value = MqttQos;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a QoS level 0, 1 or 2, or AT_MOST_ONCE, AT_LEAST_ONCE, EXACTLY_ONCE")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<MqttQos, E> {
        MqttQos::from_level(v).ok_or_else(|| E::invalid_value(de::Unexpected::Unsigned(v), &self))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<MqttQos, E> {
        u64::try_from(v)
            .ok()
            .and_then(MqttQos::from_level)
            .ok_or_else(|| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<MqttQos, E> {
        if v.fract() == 0.0 && (0.0..=2.0).contains(&v) {
            self.visit_u64(v as u64)
        } else {
            Err(E::invalid_value(de::Unexpected::Float(v), &self))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<MqttQos, E> {
        match v {
            "AT_MOST_ONCE" | "0" => Ok(MqttQos::AtMostOnce),
            "AT_LEAST_ONCE" | "1" => Ok(MqttQos::AtLeastOnce),
            "EXACTLY_ONCE" | "2" => Ok(MqttQos::ExactlyOnce),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }
}

impl<'de> Deserialize<'de> for MqttQos {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QosVisitor)
    }
}

impl From<MqttQos> for rumqttc::QoS {
    fn from(qos: MqttQos) -> Self {
        match qos {
            MqttQos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            MqttQos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            MqttQos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Broker connection options (`commonConf.*`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MqttCommonConfig {
    /// `tcp://` or `ssl://` URL
    pub broker_url: String,
    /// Client id; the stage name is used when empty
    pub client_id: String,
    /// QoS for subscriptions and publishes
    pub qos: MqttQos,
    /// Optional user name
    pub username: String,
    /// Password, used with `username`
    pub password: String,
    /// Keep-alive in seconds
    pub keep_alive: u64,
    /// Start without a stored session
    pub clean_session: bool,
}

impl Default for MqttCommonConfig {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".to_string(),
            client_id: String::new(),
            qos: MqttQos::default(),
            username: String::new(),
            password: String::new(),
            keep_alive: 60,
            clean_session: true,
        }
    }
}

/// Subscriber options (`conf.*`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MqttOriginConfig {
    /// Topic filters to subscribe to
    pub topic_filter: Vec<String>,
    /// Payload format
    pub data_format: DataFormat,
    /// Payload format options
    pub data_format_config: DataParserConfig,
    /// Longest wait for the first record of a batch, in milliseconds
    pub max_wait_time: u64,
}

impl Default for MqttOriginConfig {
    fn default() -> Self {
        Self {
            topic_filter: Vec::new(),
            data_format: DataFormat::default(),
            data_format_config: DataParserConfig::default(),
            max_wait_time: 2000,
        }
    }
}

/// Publisher options (`conf.*`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MqttDestinationConfig {
    /// Topic to publish to
    pub topic: String,
    /// Publish with the retain flag
    pub retained: bool,
}
