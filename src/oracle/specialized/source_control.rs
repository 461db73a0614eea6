//! Source control services (pull/merge requests).
//!
//! Normalized fields: `state` (open | closed | merged), `merged` and
//! `commitCount`.

use serde_json::{Map, Value};

use super::{flag_field, lower_str, number_field, set_number, Domain, Preset};

pub struct SourceControl;

const GITHUB: Preset = Preset {
    query: &[("owner", "owner"), ("repo", "repo"), ("pullNumber", "pull_number")],
    response: &[
        ("state", "state"),
        ("merged", "merged"),
        ("mergedAt", "merged_at"),
        ("commitCount", "commits"),
        ("title", "title"),
        ("author", "user.login"),
    ],
};

const GITLAB: Preset = Preset {
    query: &[("projectId", "id"), ("mergeRequestIid", "merge_request_iid")],
    response: &[
        ("state", "state"),
        ("mergedAt", "merged_at"),
        ("title", "title"),
        ("author", "author.username"),
    ],
};

impl Domain for SourceControl {
    const NAME: &'static str = "source control";

    fn preset(name: &str) -> Option<Preset> {
        match name {
            "github" => Some(GITHUB),
            "gitlab" => Some(GITLAB),
            _ => None,
        }
    }

    fn normalize(data: &mut Map<String, Value>) {
        let merged_flag = flag_field(data, "merged");
        let merged_at = data.get("mergedAt").is_some_and(|v| !v.is_null());
        let state = lower_str(data, "state");

        let merged = merged_flag == Some(true) || merged_at || state.as_deref() == Some("merged");
        let normalized = if merged {
            "merged"
        } else {
            match state.as_deref() {
                Some("closed") | Some("locked") => "closed",
                _ => "open",
            }
        };

        data.insert("state".into(), Value::from(normalized));
        data.insert("merged".into(), Value::Bool(merged));

        let commits = match data.get("commits").or_else(|| data.get("commitCount")) {
            Some(Value::Array(items)) => Some(items.len() as f64),
            _ => number_field(data, "commitCount").or_else(|| number_field(data, "commits")),
        };
        if let Some(count) = commits {
            set_number(data, "commitCount", count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalized(value: Value) -> Value {
        let mut map = value.as_object().cloned().unwrap();
        SourceControl::normalize(&mut map);
        Value::Object(map)
    }

    #[test]
    fn github_closed_and_merged_is_merged() {
        let data = normalized(json!({"state": "closed", "merged": true, "commitCount": 4}));
        assert_eq!(data["state"], "merged");
        assert_eq!(data["merged"], true);
        assert_eq!(data["commitCount"], 4);
    }

    #[test]
    fn closed_without_merge() {
        let data = normalized(json!({"state": "closed", "merged": false, "mergedAt": null}));
        assert_eq!(data["state"], "closed");
        assert_eq!(data["merged"], false);
    }

    #[test]
    fn gitlab_merged_state_and_opened() {
        assert_eq!(normalized(json!({"state": "merged"}))["merged"], true);
        assert_eq!(normalized(json!({"state": "opened"}))["state"], "open");
    }

    #[test]
    fn commit_lists_are_counted() {
        let data = normalized(json!({"state": "open", "commits": [{}, {}, {}]}));
        assert_eq!(data["commitCount"], 3);
    }
}
