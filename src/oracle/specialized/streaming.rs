//! Streaming platforms.
//!
//! Normalized fields: `isLive`, `hoursStreamed` and `followerCount`.

use serde_json::{Map, Value};

use super::{flag_field, lower_str, number_field, round2, set_number, Domain, Preset};

pub struct Streaming;

const TWITCH: Preset = Preset {
    query: &[("channel", "user_login"), ("broadcasterId", "broadcaster_id")],
    response: &[
        ("isLive", "data.0.type"),
        ("title", "data.0.title"),
        ("viewerCount", "data.0.viewer_count"),
        ("followers", "total"),
        ("minutesStreamed", "stats.minutes_streamed"),
    ],
};

const YOUTUBE: Preset = Preset {
    query: &[("channelId", "id"), ("part", "part")],
    response: &[
        ("isLive", "items.0.snippet.liveBroadcastContent"),
        ("title", "items.0.snippet.title"),
        ("viewerCount", "items.0.liveStreamingDetails.concurrentViewers"),
        ("followers", "items.0.statistics.subscriberCount"),
    ],
};

impl Domain for Streaming {
    const NAME: &'static str = "streaming";

    fn preset(name: &str) -> Option<Preset> {
        match name {
            "twitch" => Some(TWITCH),
            "youtube" => Some(YOUTUBE),
            _ => None,
        }
    }

    fn normalize(data: &mut Map<String, Value>) {
        let live = match lower_str(data, "isLive").as_deref() {
            Some("live") | Some("online") => Some(true),
            Some("none") | Some("offline") | Some("upcoming") | Some("") => Some(false),
            _ => flag_field(data, "isLive"),
        };
        data.insert("isLive".into(), Value::Bool(live.unwrap_or(false)));

        let hours = number_field(data, "hoursStreamed")
            .or_else(|| number_field(data, "minutesStreamed").map(|m| m / 60.0))
            .or_else(|| number_field(data, "secondsStreamed").map(|s| s / 3600.0));
        if let Some(hours) = hours {
            set_number(data, "hoursStreamed", round2(hours.max(0.0)));
        }

        let followers = number_field(data, "followerCount").or_else(|| number_field(data, "followers"));
        if let Some(count) = followers {
            set_number(data, "followerCount", count.max(0.0).floor());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalized(value: Value) -> Value {
        let mut map = value.as_object().cloned().unwrap();
        Streaming::normalize(&mut map);
        Value::Object(map)
    }

    #[test]
    fn twitch_live_stream() {
        let data = normalized(json!({"isLive": "live", "followers": 1520, "minutesStreamed": 90}));
        assert_eq!(data["isLive"], true);
        assert_eq!(data["followerCount"], 1520);
        assert_eq!(data["hoursStreamed"], json!(1.5));
    }

    #[test]
    fn youtube_offline_with_string_counts() {
        let data = normalized(json!({"isLive": "none", "followers": "2048"}));
        assert_eq!(data["isLive"], false);
        assert_eq!(data["followerCount"], 2048);
    }

    #[test]
    fn missing_live_flag_defaults_to_offline() {
        assert_eq!(normalized(json!({}))["isLive"], false);
        assert_eq!(normalized(json!({"isLive": true}))["isLive"], true);
    }
}
