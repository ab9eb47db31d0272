use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(ProfileId);
id_newtype!(RoomId);
id_newtype!(ConversationId);
id_newtype!(MeetingId);
id_newtype!(DeviceId);

/// Presence availability as reported by the presence service.
///
/// The numeric values are the ones carried in `Availability` fields of presence
/// records; anything outside the known range maps to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Availability {
    #[default]
    Unknown,
    Offline,
    Available,
    Away,
    Busy,
    Mobile,
    Private,
    DoNotDisturb,
}

impl From<i64> for Availability {
    fn from(value: i64) -> Self {
        match value {
            1 => Self::Offline,
            2 => Self::Available,
            3 => Self::Away,
            4 => Self::Busy,
            5 => Self::Mobile,
            6 => Self::Private,
            7 => Self::DoNotDisturb,
            _ => Self::Unknown,
        }
    }
}

impl From<Availability> for i64 {
    fn from(value: Availability) -> Self {
        match value {
            Availability::Unknown => 0,
            Availability::Offline => 1,
            Availability::Available => 2,
            Availability::Away => 3,
            Availability::Busy => 4,
            Availability::Mobile => 5,
            Availability::Private => 6,
            Availability::DoNotDisturb => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Standard,
    Meeting,
    Organization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    Private,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotifyPref {
    #[default]
    Always,
    DirectOnly,
    Never,
}

/// Meeting flavours, named after the `klass` of their push records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeetingKind {
    AdHocMeeting,
    GoogleCalendarMeeting,
    ConferenceBridgeMeeting,
    Webinar,
}

impl MeetingKind {
    pub const ALL: [MeetingKind; 4] = [
        MeetingKind::AdHocMeeting,
        MeetingKind::GoogleCalendarMeeting,
        MeetingKind::ConferenceBridgeMeeting,
        MeetingKind::Webinar,
    ];

    pub fn klass(self) -> &'static str {
        match self {
            MeetingKind::AdHocMeeting => "AdHocMeeting",
            MeetingKind::GoogleCalendarMeeting => "GoogleCalendarMeeting",
            MeetingKind::ConferenceBridgeMeeting => "ConferenceBridgeMeeting",
            MeetingKind::Webinar => "Webinar",
        }
    }
}

/// The domain subsystems whose first full sync gates the Connected state,
/// plus the channel socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Contacts,
    Rooms,
    Conversations,
    Meetings,
    ChannelSocket,
}

impl Subsystem {
    pub const ALL: [Subsystem; 5] = [
        Subsystem::Contacts,
        Subsystem::Rooms,
        Subsystem::Conversations,
        Subsystem::Meetings,
        Subsystem::ChannelSocket,
    ];

    pub fn bit(self) -> u8 {
        match self {
            Subsystem::Contacts => 1 << 0,
            Subsystem::Rooms => 1 << 1,
            Subsystem::Conversations => 1 << 2,
            Subsystem::Meetings => 1 << 3,
            Subsystem::ChannelSocket => 1 << 4,
        }
    }
}
