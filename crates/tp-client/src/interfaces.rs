//! D-Bus names used by the proxies

pub const PROPERTIES: &str = "org.freedesktop.DBus.Properties";

pub const CONNECTION: &str = "org.freedesktop.Telepathy.Connection";
pub const CONNECTION_CONTACTS: &str = "org.freedesktop.Telepathy.Connection.Interface.Contacts";
pub const CONNECTION_ALIASING: &str = "org.freedesktop.Telepathy.Connection.Interface.Aliasing";
pub const CONNECTION_AVATARS: &str = "org.freedesktop.Telepathy.Connection.Interface.Avatars";
pub const CONNECTION_CONTACT_CAPABILITIES: &str =
    "org.freedesktop.Telepathy.Connection.Interface.ContactCapabilities";
pub const CONNECTION_CONTACT_INFO: &str =
    "org.freedesktop.Telepathy.Connection.Interface.ContactInfo";
pub const CONNECTION_LOCATION: &str = "org.freedesktop.Telepathy.Connection.Interface.Location";
pub const CONNECTION_SIMPLE_PRESENCE: &str =
    "org.freedesktop.Telepathy.Connection.Interface.SimplePresence";
pub const CONNECTION_CONTACT_GROUPS: &str =
    "org.freedesktop.Telepathy.Connection.Interface.ContactGroups";
pub const CONNECTION_CONTACT_LIST: &str = "org.freedesktop.Telepathy.Connection.Interface.ContactList";

pub const CHANNEL: &str = "org.freedesktop.Telepathy.Channel";
pub const CHANNEL_TYPE_TEXT: &str = "org.freedesktop.Telepathy.Channel.Type.Text";
pub const CHANNEL_TYPE_STREAMED_MEDIA: &str = "org.freedesktop.Telepathy.Channel.Type.StreamedMedia";
pub const CHANNEL_TYPE_CALL: &str = "org.freedesktop.Telepathy.Channel.Type.Call.DRAFT";
pub const CHANNEL_TYPE_ROOM_LIST: &str = "org.freedesktop.Telepathy.Channel.Type.RoomList";
pub const CHANNEL_TYPE_FILE_TRANSFER: &str = "org.freedesktop.Telepathy.Channel.Type.FileTransfer";
pub const CHANNEL_INTERFACE_HOLD: &str = "org.freedesktop.Telepathy.Channel.Interface.Hold";
pub const CHANNEL_REQUEST: &str = "org.freedesktop.Telepathy.ChannelRequest";

pub const CALL_CONTENT: &str = "org.freedesktop.Telepathy.Call.Content.DRAFT";
pub const CALL_STREAM: &str = "org.freedesktop.Telepathy.Call.Stream.DRAFT";

/// Qualified immutable channel properties
pub mod property {
    pub const CHANNEL_TYPE: &str = "org.freedesktop.Telepathy.Channel.ChannelType";
    pub const TARGET_HANDLE_TYPE: &str = "org.freedesktop.Telepathy.Channel.TargetHandleType";
    pub const REQUESTED: &str = "org.freedesktop.Telepathy.Channel.Requested";
    pub const INITIAL_AUDIO: &str = "org.freedesktop.Telepathy.Channel.Type.StreamedMedia.InitialAudio";
    pub const INITIAL_VIDEO: &str = "org.freedesktop.Telepathy.Channel.Type.StreamedMedia.InitialVideo";
    pub const CALL_INITIAL_AUDIO: &str = "org.freedesktop.Telepathy.Channel.Type.Call.DRAFT.InitialAudio";
    pub const CALL_INITIAL_VIDEO: &str = "org.freedesktop.Telepathy.Channel.Type.Call.DRAFT.InitialVideo";
}

/// Contact attribute keys returned by `GetContactAttributes`
pub mod attribute {
    pub const CONTACT_ID: &str = "org.freedesktop.Telepathy.Connection/contact-id";
    pub const ALIAS: &str = "org.freedesktop.Telepathy.Connection.Interface.Aliasing/alias";
    pub const AVATAR_TOKEN: &str = "org.freedesktop.Telepathy.Connection.Interface.Avatars/token";
    pub const CAPABILITIES: &str =
        "org.freedesktop.Telepathy.Connection.Interface.ContactCapabilities/capabilities";
    pub const INFO: &str = "org.freedesktop.Telepathy.Connection.Interface.ContactInfo/info";
    pub const LOCATION: &str = "org.freedesktop.Telepathy.Connection.Interface.Location/location";
    pub const PRESENCE: &str = "org.freedesktop.Telepathy.Connection.Interface.SimplePresence/presence";
    pub const GROUPS: &str = "org.freedesktop.Telepathy.Connection.Interface.ContactGroups/groups";
    pub const SUBSCRIBE: &str = "org.freedesktop.Telepathy.Connection.Interface.ContactList/subscribe";
    pub const PUBLISH: &str = "org.freedesktop.Telepathy.Connection.Interface.ContactList/publish";
    pub const PUBLISH_REQUEST: &str =
        "org.freedesktop.Telepathy.Connection.Interface.ContactList/publish-request";
}

/// Handle types used in channel classes
pub mod handle_type {
    pub const NONE: u32 = 0;
    pub const CONTACT: u32 = 1;
    pub const ROOM: u32 = 2;
}
