use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Backend-assigned job identifier. Records use numeric ids, queued
/// sessions use strings; both collapse to a string here.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(d)? {
            Raw::Text(s) => JobId(s),
            Raw::Number(n) => JobId(n.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Map the spellings the backend and older records use onto the four
    /// lifecycle states.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Some(JobStatus::Pending),
            "processing" | "in-progress" | "in_progress" | "running" => Some(JobStatus::Processing),
            "completed" | "diagnosed" | "regenerated" => Some(JobStatus::Completed),
            "failed" | "error" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position in the lifecycle. A status may only move to a higher rank.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        JobStatus::from_wire(&raw).ok_or_else(|| {
            de::Error::unknown_variant(&raw, &["pending", "processing", "completed", "failed"])
        })
    }
}

/// Diagnosis content as produced by the backend. Either a prose report or
/// a structured object; which one is decided once, at decode time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DiagnosisResult {
    Text(String),
    Structured(Value),
}

impl DiagnosisResult {
    /// The structured view of the result. Prose reports frequently wrap a
    /// JSON object in model chatter; the outermost `{ ... }` is tried.
    pub fn structured(&self) -> Option<Value> {
        match self {
            DiagnosisResult::Structured(v) => Some(v.clone()),
            DiagnosisResult::Text(text) => {
                let start = text.find('{')?;
                let end = text.rfind('}')?;
                if end <= start {
                    return None;
                }
                serde_json::from_str::<Value>(&text[start..=end])
                    .ok()
                    .filter(Value::is_object)
            }
        }
    }

    pub fn primary_diagnosis(&self) -> Option<String> {
        let value = self.structured()?;
        value
            .get("primary_diagnosis")
            .or_else(|| value.get("diagnosis"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// One status poll response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<u32>,
    #[serde(default, alias = "status_message")]
    pub message: Option<String>,
}

/// Acknowledgement of a submission, with the identifier resolved.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmitAck {
    pub id: JobId,
    pub status: JobStatus,
}

impl<'de> Deserialize<'de> for SubmitAck {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            id: Option<JobId>,
            #[serde(default)]
            session_id: Option<JobId>,
            #[serde(default)]
            case_id: Option<JobId>,
            #[serde(default)]
            status: Option<JobStatus>,
        }

        let raw = Raw::deserialize(d)?;
        let id = raw
            .id
            .or(raw.session_id)
            .or(raw.case_id)
            .ok_or_else(|| de::Error::custom("submission response carries neither `id` nor `session_id`"))?;
        Ok(SubmitAck {
            id,
            status: raw.status.unwrap_or(JobStatus::Processing),
        })
    }
}

/// Answer to a regeneration request. Backends that finish synchronously
/// include the new result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegenerateAck {
    #[serde(alias = "id")]
    pub case_id: JobId,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default, alias = "diagnosis_result", alias = "diagnosis")]
    pub result: Option<DiagnosisResult>,
}

/// Locally cached snapshot of a diagnosis job. Never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisJob {
    pub id: JobId,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default, alias = "message")]
    pub status_message: Option<String>,
    #[serde(default, alias = "diagnosis", alias = "diagnosis_result")]
    pub result: Option<DiagnosisResult>,
    #[serde(default = "Utc::now", deserialize_with = "crate::timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    /// Patient and bookkeeping fields owned by the backend.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl DiagnosisJob {
    pub fn submitted(ack: &SubmitAck) -> Self {
        Self {
            id: ack.id.clone(),
            status: ack.status,
            progress: None,
            status_message: None,
            result: None,
            created_at: Utc::now(),
            details: Map::new(),
        }
    }

    /// Fold a poll response into the snapshot. Status only moves forward,
    /// displayed progress never drops below the highest value seen, and the
    /// message is replaced wholesale. Returns whether anything changed.
    /// Fresh local copy after a regeneration. Without a status the job is
    /// taken to be running again.
    pub fn regenerated(ack: &RegenerateAck) -> Self {
        let status = ack.status.unwrap_or(JobStatus::Processing);
        Self {
            id: ack.case_id.clone(),
            status,
            progress: if status == JobStatus::Completed { Some(100) } else { None },
            status_message: None,
            result: ack.result.clone(),
            created_at: Utc::now(),
            details: Map::new(),
        }
    }

    pub fn apply_status(&mut self, update: &StatusUpdate) -> bool {
        let mut changed = false;

        if update.status.rank() > self.status.rank() {
            self.status = update.status;
            changed = true;
        }

        if let Some(reported) = update.progress {
            let reported = reported.min(100) as u8;
            if self.progress.map_or(true, |current| reported > current) {
                self.progress = Some(reported);
                changed = true;
            }
        }

        if let Some(ref message) = update.message {
            if self.status_message.as_ref() != Some(message) {
                self.status_message = Some(message.clone());
                changed = true;
            }
        }

        changed
    }

    /// Take the content of a freshly fetched full record while keeping the
    /// forward-only status, the progress high-water mark and `created_at`.
    pub fn merge_record(&mut self, record: DiagnosisJob) {
        if record.status.rank() > self.status.rank() {
            self.status = record.status;
        }
        self.progress = match (self.progress, record.progress) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if record.status_message.is_some() {
            self.status_message = record.status_message;
        }
        if record.result.is_some() {
            self.result = record.result;
        }
        self.details = record.details;
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }
}
