pub mod interval;
pub mod job;
pub mod timestamp;
pub mod wire;

pub use interval::parse_interval;
pub use job::{DiagnosisJob, DiagnosisResult, JobId, JobStatus, StatusUpdate, SubmitAck};
pub use job::RegenerateAck;
pub use wire::{
    Acknowledgement, ApiKeyUpdate, CaseExport, ChatReply, ChatRequest, DashboardStats,
    FeedbackAck, FeedbackKind, FeedbackRequest, HealthStatus, JobSummary, LoginRequest,
    PatientForm, TokenPair,
};

// Backend locations
pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_UPSTREAM_URL: &str = "https://medrag-final.loca.lt";

// Proxy routes
pub const DEFAULT_PROXY_ROUTE: &str = "/auth/login";
pub const KEY_UPDATE_ROUTE: &str = "/gi";
pub const DEFAULT_GATEWAY_PORT: u16 = 3000;

// Timing
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const SESSION_LIFETIME_MINUTES: i64 = 30;

// Persisted session keys
pub const AUTH_TOKEN_KEY: &str = "authToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const SESSION_EXPIRY_KEY: &str = "sessionExpiry";
pub const USER_EMAIL_KEY: &str = "userEmail";

pub const DEFAULT_SESSION_FILE: &str = "~/.config/medrag/session.json";
pub const USER_SESSION_FILE: &str = "medrag-session.json";
