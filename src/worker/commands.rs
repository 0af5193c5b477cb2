use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub name: String,
    pub partitions: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicsRequest {
    pub count: u32,
    pub partitions_per_topic: u32,
    #[serde(default)]
    pub topic_name: Option<String>,
    #[serde(default)]
    pub name_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSubscription {
    pub topic: String,
    pub subscription: String,
    pub consumer_index: u32,
    #[serde(default)]
    pub partition: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerAssignment {
    pub topics_subscriptions: Vec<TopicSubscription>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyDistributorType {
    #[default]
    NoKey,
    KeyRoundRobin,
    RandomNano,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerWorkAssignment {
    pub key_distributor_type: KeyDistributorType,
    pub publish_rate: f64,
    #[serde(serialize_with = "serialize_payload", deserialize_with = "deserialize_payload")]
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRate {
    pub publish_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub const OK: StatusResponse = StatusResponse { status: "ok" };
}

fn serialize_payload<S>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&B64.encode(payload))
}

fn deserialize_payload<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    B64.decode(encoded.as_bytes())
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

/// RPC paths of the worker endpoint.
pub(super) mod paths {
    pub(crate) const INITIALIZE_DRIVER: &str = "/initialize-driver";
    pub(crate) const CREATE_TOPICS: &str = "/create-topics";
    pub(crate) const NOTIFY_TOPIC_CREATION: &str = "/notify-topic-creation";
    pub(crate) const CREATE_PRODUCERS: &str = "/create-producers";
    pub(crate) const CREATE_CONSUMERS: &str = "/create-consumers";
    pub(crate) const PROBE_PRODUCERS: &str = "/probe-producers";
    pub(crate) const START_LOAD: &str = "/start-load";
    pub(crate) const ADJUST_PUBLISH_RATE: &str = "/adjust-publish-rate";
    pub(crate) const PAUSE_CONSUMERS: &str = "/pause-consumers";
    pub(crate) const RESUME_CONSUMERS: &str = "/resume-consumers";
    pub(crate) const PAUSE_PRODUCERS: &str = "/pause-producers";
    pub(crate) const RESUME_PRODUCERS: &str = "/resume-producers";
    pub(crate) const PERIOD_STATS: &str = "/period-stats";
    pub(crate) const CUMULATIVE_LATENCIES: &str = "/cumulative-latencies";
    pub(crate) const COUNTERS_STATS: &str = "/counters-stats";
    pub(crate) const RESET_STATS: &str = "/reset-stats";
    pub(crate) const STOP_ALL: &str = "/stop-all";
    pub(crate) const HEALTH_CHECK: &str = "/health-check";

    pub(crate) const ALL: [&str; 18] = [
        INITIALIZE_DRIVER,
        CREATE_TOPICS,
        NOTIFY_TOPIC_CREATION,
        CREATE_PRODUCERS,
        CREATE_CONSUMERS,
        PROBE_PRODUCERS,
        START_LOAD,
        ADJUST_PUBLISH_RATE,
        PAUSE_CONSUMERS,
        RESUME_CONSUMERS,
        PAUSE_PRODUCERS,
        RESUME_PRODUCERS,
        PERIOD_STATS,
        CUMULATIVE_LATENCIES,
        COUNTERS_STATS,
        RESET_STATS,
        STOP_ALL,
        HEALTH_CHECK,
    ];
}
