use crate::job::{DiagnosisResult, JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Patient intake submitted to start a diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PatientForm {
    pub patient_name: String,
    pub patient_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_phone: Option<String>,
    pub age: u32,
    pub gender: String,
    pub symptoms: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_history: Option<String>,
}

impl PatientForm {
    /// Intake checks run by the front end before submitting. Returns one
    /// message per failed rule; empty means the form is acceptable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.patient_name.trim().chars().count() < 2 {
            errors.push("Full name must be at least 2 characters".to_string());
        }
        if self.age > 150 {
            errors.push("Please enter a valid age".to_string());
        }
        if !self.patient_email.contains('@') {
            errors.push("Please enter a valid email address".to_string());
        }
        if let Some(ref phone) = self.patient_phone {
            if phone.chars().filter(|c| c.is_ascii_digit()).count() < 10 {
                errors.push("Phone number must be at least 10 digits".to_string());
            }
        }
        if self.symptoms.trim().is_empty() {
            errors.push("Please describe the symptoms".to_string());
        }

        errors
    }
}

/// Row of the prior-cases dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    pub id: JobId,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, alias = "fullName")]
    pub patient_name: Option<String>,
    #[serde(default, alias = "complaint")]
    pub symptoms: Option<String>,
    #[serde(default, alias = "diagnosis_result", alias = "result")]
    pub diagnosis: Option<DiagnosisResult>,
    #[serde(default, deserialize_with = "crate::timestamp::deserialize_option")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatReply {
    #[serde(alias = "reply")]
    pub response: String,
    /// Set locally when the reply is the canned apology rather than a
    /// backend answer.
    #[serde(default, skip_serializing)]
    pub fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Liveness payload; its shape belongs to the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct HealthStatus(pub Value);

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        match self.0.get("status").and_then(Value::as_str) {
            Some(s) => matches!(s, "ok" | "healthy" | "up"),
            None => true,
        }
    }
}

/// Clinician verdict on a diagnosis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Positive,
    Negative,
}

impl std::str::FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "up" | "+" => Ok(FeedbackKind::Positive),
            "negative" | "down" | "-" => Ok(FeedbackKind::Negative),
            other => Err(format!("expected positive or negative, got {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackRequest {
    pub case_id: JobId,
    pub feedback_type: FeedbackKind,
    /// Star rating, 1 to 5.
    pub rating: u8,
    #[serde(default)]
    pub comments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackAck {
    #[serde(default)]
    pub message: String,
    pub feedback_id: String,
}

/// Full case dump as served for download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseExport {
    #[serde(alias = "id")]
    pub case_id: JobId,
    #[serde(default)]
    pub export_data: Value,
    #[serde(default, deserialize_with = "crate::timestamp::deserialize_option")]
    pub exported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DashboardStats {
    #[serde(default)]
    pub total_cases: u64,
    #[serde(default)]
    pub pending_cases: u64,
    #[serde(default)]
    pub diagnosed_cases: u64,
    #[serde(default)]
    pub recent_cases: u64,
}

/// Replacement model-provider key, authorised by the admin's date of birth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiKeyUpdate {
    pub dob: String,
    pub provider: String,
    pub api_key: String,
}

impl ApiKeyUpdate {
    /// Both the date of birth and the key are required; blank input is
    /// never sent.
    pub fn is_complete(&self) -> bool {
        !self.dob.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

/// Body of endpoints that only confirm an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Acknowledgement {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form() -> PatientForm {
        PatientForm {
            patient_name: "Ada Lovelace".into(),
            patient_email: "ada@example.com".into(),
            patient_phone: Some("+44 20 7946 0958".into()),
            age: 36,
            gender: "female".into(),
            symptoms: "headache and nausea".into(),
            medical_history: None,
        }
    }

    #[test]
    fn test_valid_form_passes() {
        assert!(form().validate().is_empty());
    }

    #[test]
    fn test_invalid_form_collects_every_problem() {
        let bad = PatientForm {
            patient_name: "A".into(),
            patient_email: "nope".into(),
            patient_phone: Some("123".into()),
            age: 151,
            symptoms: "  ".into(),
            ..form()
        };
        assert_eq!(bad.validate().len(), 5);
    }

    #[test]
    fn test_form_omits_absent_optionals() {
        let value = serde_json::to_value(form()).unwrap();
        assert!(value.get("medical_history").is_none());
        assert_eq!(value["patient_name"], "Ada Lovelace");
    }

    #[test]
    fn test_summary_and_reply_aliases() {
        let summary: JobSummary = serde_json::from_value(json!({
            "id": 3,
            "status": "in-progress",
            "fullName": "Grace Hopper",
            "created_at": "2025-01-05T09:00:00"
        }))
        .unwrap();
        assert_eq!(summary.status, JobStatus::Processing);
        assert_eq!(summary.patient_name.as_deref(), Some("Grace Hopper"));
        assert!(summary.created_at.is_some());

        let reply: ChatReply = serde_json::from_value(json!({"reply": "hello"})).unwrap();
        assert_eq!(reply.response, "hello");
        assert!(!reply.fallback);
    }

    #[test]
    fn test_feedback_kind_parses_and_serialises_lowercase() {
        assert_eq!("Positive".parse::<FeedbackKind>().unwrap(), FeedbackKind::Positive);
        assert_eq!("down".parse::<FeedbackKind>().unwrap(), FeedbackKind::Negative);
        assert!("meh".parse::<FeedbackKind>().is_err());

        let body = serde_json::to_value(FeedbackRequest {
            case_id: JobId::from("12"),
            feedback_type: FeedbackKind::Negative,
            rating: 2,
            comments: String::new(),
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"case_id": "12", "feedback_type": "negative", "rating": 2, "comments": ""})
        );
    }

    #[test]
    fn test_key_update_requires_dob_and_key() {
        let mut update = ApiKeyUpdate {
            dob: "1990-04-01".into(),
            provider: "gemini".into(),
            api_key: "  ".into(),
        };
        assert!(!update.is_complete());
        update.api_key = "sk-123".into();
        assert!(update.is_complete());
    }
}
