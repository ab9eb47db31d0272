use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    Availability, ConversationId, DeviceId, MeetingId, NotifyPref, Privacy, ProfileId, RoomId,
    RoomType, Visibility,
};

pub const DEVICE_CAP_PUSH_DELIVERY_RECEIPTS: u32 = 1 << 0;
pub const DEVICE_CAP_PRESENCE_PUSH: u32 = 1 << 1;
pub const DEVICE_CAP_PRESENCE_SUBSCRIPTION: u32 = 1 << 3;

/// Header carrying the next page token of a contacts listing.
pub const CONTACTS_NEXT_TOKEN_HEADER: &str = "aws-ucbuzz-nexttoken";

// ── Registration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegistrationRequest {
    #[serde(rename = "Device")]
    pub device: DeviceRegistration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceRegistration {
    pub platform: String,
    pub device_token: String,
    pub platform_device_id: String,
    pub capabilities: u32,
}

impl DeviceRegistrationRequest {
    pub fn new(platform: impl Into<String>, device_token: impl Into<String>) -> Self {
        let device_token = device_token.into();
        Self {
            device: DeviceRegistration {
                platform: platform.into(),
                platform_device_id: device_token.clone(),
                device_token,
                capabilities: DEVICE_CAP_PUSH_DELIVERY_RECEIPTS
                    | DEVICE_CAP_PRESENCE_PUSH
                    | DEVICE_CAP_PRESENCE_SUBSCRIPTION,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    #[serde(rename = "Session")]
    pub session: RegisteredSession,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisteredSession {
    pub session_token: String,
    pub session_id: String,
    pub profile: SelfProfileRecord,
    pub device: DeviceRecord,
    pub service_config: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfProfileRecord {
    pub id: ProfileId,
    pub display_name: String,
    pub email: String,
    pub profile_channel: String,
    pub presence_channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceConfig {
    pub presence: RestService,
    pub push: PushService,
    pub profile: RestService,
    pub contacts: RestService,
    pub messaging: RestService,
    pub conference: RestService,
    pub feature: RestService,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestService {
    #[serde(rename = "RestUrl")]
    pub rest_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PushService {
    pub reachability_url: String,
    pub websocket_url: String,
}

// ── Token renewal ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewTokenRequest {
    #[serde(rename = "Token")]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewTokenResponse {
    #[serde(rename = "SessionToken")]
    pub session_token: String,
}

// ── Channel socket ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelControlKind {
    Subscribe,
    Unsubscribe,
}

impl ChannelControlKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelControlKind::Subscribe => "subscribe",
            ChannelControlKind::Unsubscribe => "unsubscribe",
        }
    }
}

/// Outbound subscription control object carried in a JSON data frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelControl {
    #[serde(rename = "type")]
    pub kind: ChannelControlKind,
    pub channel: String,
}

/// Inbound push envelope: the channel it was published on plus the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEnvelope {
    pub channel: String,
    pub data: Value,
}

/// Common shape of a push `data` object: `{"klass": .., "type": .., "record": ..}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushData {
    pub klass: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
}

// ── Contacts and presence ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: ProfileId,
    pub email: String,
    pub full_name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_channel: Option<String>,
}

/// A contact as embedded in conversation membership lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MemberRecord {
    pub profile_id: ProfileId,
    pub email: String,
    pub full_name: String,
    pub display_name: String,
    pub presence_channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PresenceRecord {
    pub profile_id: ProfileId,
    pub revision: i64,
    pub availability: Availability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PresenceListResponse {
    pub presences: Vec<PresenceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteContactRequest {
    pub profile: InviteProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteProfile {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusRequest {
    #[serde(rename = "Status")]
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PresenceSettingsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_availability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_visibility: Option<String>,
}

// ── Rooms and conversations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationPreferences {
    pub desktop_notification_preferences: NotifyPref,
    pub mobile_notification_preferences: NotifyPref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Preferences {
    pub notification_preferences: NotificationPreferences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoomRecord {
    pub room_id: RoomId,
    pub name: String,
    pub privacy: Privacy,
    #[serde(rename = "Type")]
    pub room_type: RoomType,
    pub visibility: Visibility,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mentioned: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
    pub preferences: Preferences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoomsPage {
    pub rooms: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoomEnvelope {
    pub room: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConversationRecord {
    pub conversation_id: ConversationId,
    pub name: String,
    pub visibility: Visibility,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
    pub members: Vec<MemberRecord>,
    pub preferences: Preferences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConversationsPage {
    pub conversations: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConversationEnvelope {
    pub conversation: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateConversationRequest {
    pub profile_ids: Vec<ProfileId>,
}

// ── Messages ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SendMessageRequest {
    pub content: String,
    /// Lets the service drop a resent duplicate.
    pub client_request_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageRecord {
    pub message_id: String,
    pub content: String,
    pub sender: ProfileId,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SentMessageResponse {
    pub message: MessageRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLastReadRequest {
    #[serde(rename = "LastReadMessageId")]
    pub last_read_message_id: String,
}

// ── Meetings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub id: MeetingId,
    pub summary: String,
    pub klass: String,
    pub meeting_chat_room: MeetingChatRoom,
    pub organizer: ContactRecord,
    #[serde(default)]
    pub attendances: Vec<AttendanceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passcode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingChatRoom {
    pub id: RoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<ProfileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passcode: Option<String>,
}

/// `JoinableMeetings` push record: the complete current listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinableMeetingsRecord {
    pub meetings: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinJoinRequest {
    pub pin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinJoinResponse {
    pub meeting: Value,
}

/// Dial-in and join details for scheduling a meeting on the caller's bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledMeeting {
    pub bridge_screenshare_url: String,
    pub meeting_id_for_display: String,
    pub vanity_url: String,
    pub vanity_name: String,
    pub meeting_join_url: String,
    pub international_dialin_info_url: String,
    pub delegate_scheduling_email: String,
    pub display_vanity_url: String,
    pub bridge_passcode: String,
    pub scheduling_address: String,
    pub display_vanity_url_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toll_dialin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toll_free_dialin: Option<String>,
    pub international_dialin_info: Vec<DialinRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialinRecord {
    pub number: String,
    pub display_string: String,
    pub country: String,
    pub iso: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toll: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toll_free: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_code: Option<String>,
}
