pub const TOPIC_READING_FILTER: &str = "rack/sensor/+/reading";
pub const TOPIC_SENSOR_STATUS: &str = "rack/sensor/status";

pub const TOPIC_LAMP_SET: &str = "rack/lamp/set";

const READING_PREFIX: &str = "rack/sensor/";
const READING_SUFFIX: &str = "/reading";

pub fn reading_topic(sensor_id: &str) -> String {
    format!("{READING_PREFIX}{sensor_id}{READING_SUFFIX}")
}

pub fn sensor_id_from_topic(topic: &str) -> Option<&str> {
    let id = topic
        .strip_prefix(READING_PREFIX)?
        .strip_suffix(READING_SUFFIX)?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}
