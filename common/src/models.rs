use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Schedule models
// ============================================================================

/// All seven day bits set (Sunday through Saturday).
pub const ALL_DAYS_MASK: u8 = 0b0111_1111;

/// Bit for a weekday in a `days_of_week_mask`: bit 0 = Sunday .. bit 6 = Saturday.
pub fn day_bit(day: Weekday) -> u8 {
    1 << day.num_days_from_sunday()
}

/// Build a day mask from a set of weekdays.
pub fn days_to_mask(days: &[Weekday]) -> u8 {
    days.iter().fold(0u8, |mask, day| mask | day_bit(*day))
}

/// Decode a day mask back into weekdays, ordered Sunday through Saturday.
pub fn mask_to_days(mask: u8) -> Vec<Weekday> {
    use Weekday::*;
    [Sun, Mon, Tue, Wed, Thu, Fri, Sat]
        .into_iter()
        .filter(|day| mask & day_bit(*day) != 0)
        .collect()
}

/// ScheduleSpec is one recurring day/time slot belonging to an auto-list.
///
/// `time_of_day` carries no date and no timezone; it is interpreted in the
/// process-wide reference clock. Firing granularity is minute-aligned even
/// though the field has second resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub id: Uuid,
    pub list_id: Uuid,
    /// 7-bit mask, bit 0 = Sunday .. bit 6 = Saturday. Invariant: mask != 0.
    pub days_of_week_mask: u8,
    pub time_of_day: NaiveTime,
}

impl ScheduleSpec {
    /// A spec with an empty or out-of-range mask can never fire.
    pub fn is_valid(&self) -> bool {
        self.days_of_week_mask != 0 && self.days_of_week_mask <= ALL_DAYS_MASK
    }
}

/// AutoList is a user-owned recurring publication schedule with an ordered,
/// logically-circular content queue and a set of destination accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoList {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub enabled: bool,
    /// Round-robin cursor into the content queue.
    pub queue_position: i32,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Content & destination models
// ============================================================================

/// Kind of media a content item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// One item in an auto-list's content queue. Media bytes live in external
/// object storage behind `media_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub list_id: Uuid,
    pub position: i32,
    pub media_kind: MediaKind,
    pub media_url: String,
    pub caption: Option<String>,
}

/// Destination platforms with a publisher implementation (or room for one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Instagram,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Instagram => write!(f, "instagram"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instagram" => Ok(Platform::Instagram),
            other => Err(format!("Unknown platform: {}", other)),
        }
    }
}

/// Destination identity. The encrypted credential is owned by an external
/// collaborator; the core only ever sees a decrypted [`PlatformCredential`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platform: Platform,
    pub external_account_id: String,
}

/// Decrypted, platform-ready credential handle. Transient: never persisted
/// by the core and never logged in full.
#[derive(Clone)]
pub struct PlatformCredential {
    pub access_token: String,
    pub external_account_id: String,
}

impl fmt::Debug for PlatformCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformCredential")
            .field("external_account_id", &self.external_account_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Publication models
// ============================================================================

/// Publication lifecycle status. The variant names are part of the external
/// wire contract and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicationStatus {
    None,
    Scheduled,
    Processing,
    Published,
    Failed,
}

impl PublicationStatus {
    /// Valid transitions: None -> Scheduled -> Processing -> Published | Failed.
    /// No transition skips a state; terminal states admit none.
    pub fn can_transition(self, next: PublicationStatus) -> bool {
        use PublicationStatus::*;
        matches!(
            (self, next),
            (None, Scheduled) | (Scheduled, Processing) | (Processing, Published) | (Processing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PublicationStatus::Published | PublicationStatus::Failed)
    }
}

impl fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublicationStatus::None => "None",
            PublicationStatus::Scheduled => "Scheduled",
            PublicationStatus::Processing => "Processing",
            PublicationStatus::Published => "Published",
            PublicationStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PublicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(PublicationStatus::None),
            "Scheduled" => Ok(PublicationStatus::Scheduled),
            "Processing" => Ok(PublicationStatus::Processing),
            "Published" => Ok(PublicationStatus::Published),
            "Failed" => Ok(PublicationStatus::Failed),
            other => Err(format!("Unknown publication status: {}", other)),
        }
    }
}

/// One attempt to publish one content item to one destination account.
/// Created Scheduled before any network call so a crash leaves a durably
/// observable stuck record instead of a lost one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub id: Uuid,
    pub content_item_id: Uuid,
    pub account_id: Uuid,
    pub list_id: Uuid,
    pub user_id: Uuid,
    pub status: PublicationStatus,
    pub public_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

impl PublicationRecord {
    pub fn new(content_item_id: Uuid, account_id: Uuid, list_id: Uuid, user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content_item_id,
            account_id,
            list_id,
            user_id,
            status: PublicationStatus::Scheduled,
            public_url: None,
            error_message: None,
            created_at: now,
            last_transition_at: now,
        }
    }
}

/// Transient outcome of a platform publish call; folded into the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationResult {
    pub status: PublicationStatus,
    pub public_url: Option<String>,
    pub error_message: Option<String>,
    /// Stable failure label for metrics. The free-form message carries
    /// response bodies and must never become a label value.
    pub failure_kind: Option<&'static str>,
}

impl PublicationResult {
    pub fn published(public_url: Option<String>) -> Self {
        Self {
            status: PublicationStatus::Published,
            public_url,
            error_message: None,
            failure_kind: None,
        }
    }

    pub fn failed(kind: &'static str, error_message: impl Into<String>) -> Self {
        Self {
            status: PublicationStatus::Failed,
            public_url: None,
            error_message: Some(error_message.into()),
            failure_kind: Some(kind),
        }
    }
}

// ============================================================================
// Wire events
// ============================================================================

/// Event emitted by the trigger dispatcher when a slot fires.
/// Field names are part of the external contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequested {
    pub list_id: Uuid,
    pub requested_at: DateTime<Utc>,
}

/// Event emitted on every publication record transition.
/// Field names are part of the external contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged {
    pub publication_record_id: Uuid,
    pub user_id: Uuid,
    pub status: PublicationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
