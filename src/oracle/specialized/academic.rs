//! Academic records: transcripts and learning management systems.
//!
//! Normalized fields: `status` (enrolled | completed | graduated | withdrawn
//! | unknown), `creditsEarned`, `gpa` on a 4.0 scale and `degreeConferred`.

use serde_json::{Map, Value};

use super::{flag_field, lower_str, number_field, round2, set_number, Domain, Preset};

pub struct Academic;

const TRANSCRIPT: Preset = Preset {
    query: &[("studentId", "student_id"), ("institutionId", "institution")],
    response: &[
        ("status", "student.status"),
        ("creditsEarned", "student.credits_earned"),
        ("gpa", "student.gpa"),
        ("gpaScale", "student.gpa_scale"),
        ("degreeConferred", "student.degree_conferred"),
        ("degree", "student.degree"),
    ],
};

const LMS: Preset = Preset {
    query: &[("courseId", "course_id"), ("userId", "user_id")],
    response: &[
        ("status", "enrollment.enrollment_state"),
        ("creditsEarned", "enrollment.credits"),
        ("gpa", "enrollment.grades.gpa"),
        ("completionPercent", "enrollment.progress.completion"),
    ],
};

impl Domain for Academic {
    const NAME: &'static str = "academic";

    fn preset(name: &str) -> Option<Preset> {
        match name {
            "transcript" => Some(TRANSCRIPT),
            "lms" => Some(LMS),
            _ => None,
        }
    }

    fn normalize(data: &mut Map<String, Value>) {
        let status = lower_str(data, "status").map(|s| normalize_status(&s));
        if let Some(status) = status {
            data.insert("status".into(), Value::from(status));
        }

        if let Some(credits) = number_field(data, "creditsEarned") {
            set_number(data, "creditsEarned", credits.max(0.0));
        }

        if let Some(gpa) = number_field(data, "gpa") {
            let scale = number_field(data, "gpaScale").filter(|s| *s > 0.0).unwrap_or(4.0);
            set_number(data, "gpa", round2((gpa / scale * 4.0).clamp(0.0, 4.0)));
        }

        let conferred = flag_field(data, "degreeConferred").unwrap_or(false) || status == Some("graduated");
        data.insert("degreeConferred".into(), Value::Bool(conferred));
    }
}

fn normalize_status(raw: &str) -> &'static str {
    match raw {
        "enrolled" | "active" | "in progress" | "in_progress" | "invited" => "enrolled",
        "completed" | "complete" | "passed" | "finished" => "completed",
        "graduated" | "conferred" | "awarded" | "alumni" => "graduated",
        "withdrawn" | "dropped" | "deleted" | "inactive" => "withdrawn",
        _ => "unknown",
    }
}
