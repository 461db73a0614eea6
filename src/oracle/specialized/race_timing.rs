//! Race timing services (chip results).
//!
//! Normalized fields: `status` (finished | didNotFinish | didNotStart |
//! disqualified | registered | unknown), `rawStatus`, `finishTimeSeconds`,
//! `distanceKm`, `paceSecondsPerKm` and `completed`.

use serde_json::{Map, Value};

use super::{lower_str, number_field, round2, set_number, Domain, Preset};

const KM_PER_MILE: f64 = 1.609_344;

pub struct RaceTiming;

const RUNSIGNUP: Preset = Preset {
    query: &[("raceId", "race_id"), ("eventId", "event_id"), ("bib", "bib_num")],
    response: &[
        ("status", "results.0.status"),
        ("finishTime", "results.0.chip_time"),
        ("distanceKm", "results.0.distance_km"),
        ("place", "results.0.place"),
        ("athleteName", "results.0.name"),
    ],
};

const ATHLINKS: Preset = Preset {
    query: &[("eventId", "eventId"), ("athleteId", "racerId")],
    response: &[
        ("status", "Result.EntryStatus"),
        ("finishTime", "Result.Time"),
        ("distanceMiles", "Result.Course.DistanceMiles"),
        ("place", "Result.OverallRank"),
        ("athleteName", "Result.DisplayName"),
    ],
};

const GENERIC: Preset = Preset {
    query: &[],
    response: &[
        ("status", "status"),
        ("finishTime", "finishTime"),
        ("distanceKm", "distanceKm"),
        ("place", "place"),
    ],
};

impl Domain for RaceTiming {
    const NAME: &'static str = "race timing";

    fn preset(name: &str) -> Option<Preset> {
        match name {
            "runsignup" => Some(RUNSIGNUP),
            "athlinks" => Some(ATHLINKS),
            "generic" => Some(GENERIC),
            _ => None,
        }
    }

    fn normalize(data: &mut Map<String, Value>) {
        let raw_status = lower_str(data, "status");
        if let Some(raw) = data.get("status").cloned() {
            data.insert("rawStatus".into(), raw);
        }
        let status = raw_status.as_deref().map(normalize_status);
        if let Some(status) = status {
            data.insert("status".into(), Value::from(status));
        }

        let finish = data
            .get("finishTimeSeconds")
            .or_else(|| data.get("finishTime"))
            .and_then(parse_duration);
        if let Some(seconds) = finish {
            set_number(data, "finishTimeSeconds", seconds);
        }

        let distance = number_field(data, "distanceKm")
            .or_else(|| number_field(data, "distanceMiles").map(|mi| mi * KM_PER_MILE));
        if let Some(km) = distance {
            set_number(data, "distanceKm", round2(km));
        }

        if let (Some(seconds), Some(km)) = (finish, distance) {
            if km > 0.0 {
                set_number(data, "paceSecondsPerKm", round2(seconds / km));
            }
        }

        let completed = match status {
            Some(s) => s == "finished",
            None => finish.is_some(),
        };
        data.insert("completed".into(), Value::Bool(completed));
    }
}

fn normalize_status(raw: &str) -> &'static str {
    match raw {
        "finished" | "finisher" | "finish" | "complete" | "completed" | "fin" | "f" => "finished",
        "dnf" | "did not finish" | "did_not_finish" | "didnotfinish" => "didNotFinish",
        "dns" | "did not start" | "did_not_start" | "didnotstart" | "no show" => "didNotStart",
        "dq" | "dsq" | "disqualified" => "disqualified",
        "registered" | "confirmed" | "entered" | "pending" => "registered",
        _ => "unknown",
    }
}

/// Seconds from `H:MM:SS(.f)`, `MM:SS` or a plain number of seconds.
fn parse_duration(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|s| *s >= 0.0),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.split(':').try_fold(0.0, |acc, part| {
                part.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|p| *p >= 0.0)
                    .map(|p| acc * 60.0 + p)
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalized(value: Value) -> Value {
        let mut map = value.as_object().cloned().unwrap();
        RaceTiming::normalize(&mut map);
        Value::Object(map)
    }

    #[test]
    fn finisher_gets_time_and_pace() {
        let data = normalized(json!({"status": "FIN", "finishTime": "3:30:00", "distanceKm": 42.195}));
        assert_eq!(data["status"], "finished");
        assert_eq!(data["rawStatus"], "FIN");
        assert_eq!(data["finishTimeSeconds"], 12_600);
        assert_eq!(data["paceSecondsPerKm"], json!(298.61));
        assert_eq!(data["completed"], true);
    }

    #[test]
    fn miles_are_converted() {
        let data = normalized(json!({"status": "Finisher", "finishTime": "25:00", "distanceMiles": 3.1}));
        assert_eq!(data["distanceKm"], json!(4.99));
        assert_eq!(data["finishTimeSeconds"], 1_500);
    }

    #[test]
    fn non_finish_statuses() {
        assert_eq!(normalized(json!({"status": "DNF"}))["status"], "didNotFinish");
        assert_eq!(normalized(json!({"status": "dns"}))["status"], "didNotStart");
        assert_eq!(normalized(json!({"status": "DSQ"}))["status"], "disqualified");
        assert_eq!(normalized(json!({"status": "Registered"}))["status"], "registered");
        let odd = normalized(json!({"status": "teleported", "finishTime": "1:00:00"}));
        assert_eq!(odd["status"], "unknown");
        assert_eq!(odd["completed"], false);
    }

    #[test]
    fn time_alone_implies_completion() {
        let data = normalized(json!({"finishTime": 3600}));
        assert_eq!(data["completed"], true);
        assert!(data.get("paceSecondsPerKm").is_none());
    }

    #[test]
    fn known_presets() {
        assert!(RaceTiming::preset("runsignup").is_some());
        assert!(RaceTiming::preset("athlinks").is_some());
        assert!(RaceTiming::preset("stopwatch").is_none());
    }
}
