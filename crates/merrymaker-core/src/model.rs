use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One of `guest`, `user`, `admin`, `transport` (§4.8). Ordered so callers can write
/// `session.role >= Role::User` at a gate instead of matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    User,
    Admin,
    Transport,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Admin => "admin",
            Role::Transport => "transport",
        }
    }
}

/// What the external identity provider hands back after authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub groups: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// A role-mapped, TTL-bound session (§3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// How a scheduler handles a task whose previous fire is still in flight (§4.2, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrunPolicy {
    Skip,
    Queue,
    Reschedule,
}

impl Default for OverrunPolicy {
    fn default() -> Self {
        OverrunPolicy::Skip
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub task_name: String,
    pub interval_seconds: i64,
    pub last_queued_at: Option<DateTime<Utc>>,
    pub active_fire_key: Option<String>,
    pub active_fire_key_set_at: Option<DateTime<Utc>>,
    pub overrun_policy: OverrunPolicy,
    pub enabled: bool,
}

impl ScheduledTask {
    /// A task is due when it has never fired, or its interval has elapsed (§3).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_queued_at {
            None => true,
            Some(last) => last + chrono::Duration::seconds(self.interval_seconds) <= now,
        }
    }

    /// `taskID + ":" + floor(now_unix / interval_seconds)` (glossary: Fire key).
    pub fn fire_key(&self, now: DateTime<Utc>) -> String {
        fire_key(&self.id, self.interval_seconds, now)
    }
}

pub fn fire_key(task_id: &Uuid, interval_seconds: i64, now: DateTime<Utc>) -> String {
    let slot = now.timestamp().div_euclid(interval_seconds.max(1));
    format!("{task_id}:{slot}")
}

/// Terminal/non-terminal job states (§4.1 state machine).
///
/// Stored as plain `text` (not a native Postgres enum) so the store layer binds and
/// matches on `&str`, the way the teacher harness handles `state.tasks.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Failed,
    Expired,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => JobState::Pending,
            "active" => JobState::Active,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            "expired" => JobState::Expired,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub task_name: String,
    pub payload: Value,
    pub state: JobState,
    pub attempts: i32,
    pub max_attempts: i32,
    pub idempotency_key: Option<String>,
    pub lease_until: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
}

/// Whether `JobStore::create` inserted a brand-new row or returned an existing one
/// because the idempotency key collided with a non-terminal job for the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone)]
pub struct CreatedJob {
    pub job: Job,
    pub outcome: CreateOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub outcome: String,
    pub produced_at: DateTime<Utc>,
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct JobStats {
    pub pending: i64,
    pub active: i64,
    pub failed_last_hour: i64,
}

/// Wire contract between the browser worker and the pipeline (§6). Unknown `event_type`
/// values are dropped upstream; unknown fields inside `payload` are preserved opaquely
/// because `payload` is untyped JSON.
/// The parent scan record's lifecycle state, as transitioned by the scan-event pipeline
/// (§4.6) and by whichever queue events touch it. Ordered so repeated/out-of-order
/// notifications can be resolved by "last writer wins by monotonic state rank"
/// (§9 Open Question) instead of guessing at event arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Queued,
    Active,
    Complete,
    Error,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Queued => "queued",
            ScanState::Active => "active",
            ScanState::Complete => "complete",
            ScanState::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => ScanState::Queued,
            "active" => ScanState::Active,
            "complete" => ScanState::Complete,
            "error" => ScanState::Error,
            _ => return None,
        })
    }

    /// Rank used to resolve concurrent/out-of-order transition attempts: a transition is
    /// only applied if its rank is `>=` the current rank, so a late `active` notification
    /// can never regress a scan that has already reached `complete`/`error`.
    pub fn rank(&self) -> i32 {
        match self {
            ScanState::Queued => 0,
            ScanState::Active => 1,
            ScanState::Complete => 2,
            ScanState::Error => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanEventType {
    WebRequest,
    JsCall,
    Cookie,
    Console,
    Screenshot,
    Complete,
    Error,
    RuleAlert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    pub scan_id: Uuid,
    #[serde(default)]
    pub test: bool,
    #[serde(rename = "type")]
    pub event_type: ScanEventType,
    pub payload: Value,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl ScanLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanLogLevel::Debug => "debug",
            ScanLogLevel::Info => "info",
            ScanLogLevel::Warn => "warn",
            ScanLogLevel::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "debug" => ScanLogLevel::Debug,
            "info" => ScanLogLevel::Info,
            "warn" => ScanLogLevel::Warn,
            "error" => ScanLogLevel::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLog {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub entry: String,
    pub level: ScanLogLevel,
    pub event: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule: String,
    pub scan_id: Uuid,
    pub site_id: Option<Uuid>,
    pub message: String,
    pub context: Value,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IocType {
    Fqdn,
    Ip,
    Literal,
}

impl IocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IocType::Fqdn => "fqdn",
            IocType::Ip => "ip",
            IocType::Literal => "literal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "fqdn" => IocType::Fqdn,
            "ip" => IocType::Ip,
            "literal" => IocType::Literal,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ioc {
    pub id: Uuid,
    pub ioc_type: IocType,
    pub value: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowListEntry {
    pub id: Uuid,
    pub entry_type: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenString {
    pub id: Uuid,
    pub entry_type: String,
    pub key: String,
    pub last_cached: DateTime<Utc>,
}
