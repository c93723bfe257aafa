//! Channel class filters
//!
//! A [`ChannelClassSpec`] is a set of fixed channel properties keyed by
//! their qualified names. The `InitialAudio`/`InitialVideo` properties of
//! Call channels are stored under their StreamedMedia names so a single
//! spec matches either channel type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::interfaces::{self, handle_type, property};
use crate::transport::PropertyMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelClassSpec {
    props: PropertyMap,
}

fn normalized(qualified_name: &str) -> &str {
    if qualified_name == property::CALL_INITIAL_AUDIO {
        property::INITIAL_AUDIO
    } else if qualified_name == property::CALL_INITIAL_VIDEO {
        property::INITIAL_VIDEO
    } else {
        qualified_name
    }
}

impl ChannelClassSpec {
    pub fn new(channel_type: &str, target_handle_type: u32) -> Self {
        let mut spec = Self::default();
        spec.set_channel_type(channel_type);
        spec.set_target_handle_type(target_handle_type);
        spec
    }

    pub fn with_requested(channel_type: &str, target_handle_type: u32, requested: bool) -> Self {
        let mut spec = Self::new(channel_type, target_handle_type);
        spec.set_requested(requested);
        spec
    }

    /// Build a spec from a channel class as announced on the bus
    pub fn from_class(class: &PropertyMap) -> Self {
        let mut spec = Self::default();
        for (name, value) in class {
            spec.set_property(name, value.clone());
        }
        spec
    }

    /// Copy of this spec with `additional` properties set on top
    pub fn with_properties(&self, additional: &PropertyMap) -> Self {
        let mut spec = self.clone();
        for (name, value) in additional {
            spec.set_property(name, value.clone());
        }
        spec
    }

    /// A spec needs a non-empty channel type and a target handle type
    pub fn is_valid(&self) -> bool {
        self.channel_type().is_some_and(|t| !t.is_empty())
            && self.props.contains_key(property::TARGET_HANDLE_TYPE)
    }

    /// Whether `other` carries every property of `self` with the same value
    pub fn is_subset_of(&self, other: &ChannelClassSpec) -> bool {
        if !self.is_valid() || !other.is_valid() {
            warn!("Comparison attempted for an invalid ChannelClassSpec");
            return false;
        }
        self.props
            .iter()
            .all(|(name, value)| other.props.get(name) == Some(value))
    }

    /// Whether a channel with these immutable properties falls in the class
    pub fn matches(&self, immutable_properties: &PropertyMap) -> bool {
        self.is_subset_of(&Self::from_class(immutable_properties))
    }

    pub fn has_property(&self, qualified_name: &str) -> bool {
        self.props.contains_key(normalized(qualified_name))
    }

    pub fn property(&self, qualified_name: &str) -> Option<&Value> {
        self.props.get(normalized(qualified_name))
    }

    pub fn set_property(&mut self, qualified_name: &str, value: Value) {
        self.props
            .insert(normalized(qualified_name).to_string(), value);
    }

    pub fn unset_property(&mut self, qualified_name: &str) {
        self.props.remove(normalized(qualified_name));
    }

    pub fn all_properties(&self) -> &PropertyMap {
        &self.props
    }

    /// Channel class with the property names the channel type expects
    pub fn bare_class(&self) -> PropertyMap {
        if !self.is_valid() {
            warn!("Tried to convert an invalid ChannelClassSpec to a channel class");
            return PropertyMap::new();
        }

        let call = self.channel_type() == Some(interfaces::CHANNEL_TYPE_CALL);
        self.props
            .iter()
            .map(|(name, value)| {
                let name = if call && (name == property::INITIAL_AUDIO || name == property::INITIAL_VIDEO) {
                    name.replace("StreamedMedia", "Call.DRAFT")
                } else {
                    name.clone()
                };
                (name, value.clone())
            })
            .collect()
    }

    pub fn channel_type(&self) -> Option<&str> {
        self.props.get(property::CHANNEL_TYPE).and_then(Value::as_str)
    }

    pub fn set_channel_type(&mut self, channel_type: &str) {
        self.set_property(property::CHANNEL_TYPE, Value::from(channel_type));
    }

    pub fn target_handle_type(&self) -> Option<u32> {
        self.props
            .get(property::TARGET_HANDLE_TYPE)
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok())
    }

    pub fn set_target_handle_type(&mut self, target_handle_type: u32) {
        self.set_property(property::TARGET_HANDLE_TYPE, Value::from(target_handle_type));
    }

    pub fn is_requested(&self) -> Option<bool> {
        self.props.get(property::REQUESTED).and_then(Value::as_bool)
    }

    pub fn set_requested(&mut self, requested: bool) {
        self.set_property(property::REQUESTED, Value::from(requested));
    }

    pub fn has_initial_audio(&self) -> bool {
        self.property(property::INITIAL_AUDIO)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_initial_audio(&mut self, initial_audio: bool) {
        self.set_property(property::INITIAL_AUDIO, Value::from(initial_audio));
    }

    pub fn has_initial_video(&self) -> bool {
        self.property(property::INITIAL_VIDEO)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_initial_video(&mut self, initial_video: bool) {
        self.set_property(property::INITIAL_VIDEO, Value::from(initial_video));
    }

    pub fn text() -> Self {
        Self::new(interfaces::CHANNEL_TYPE_TEXT, handle_type::CONTACT)
    }

    pub fn text_chatroom() -> Self {
        Self::new(interfaces::CHANNEL_TYPE_TEXT, handle_type::ROOM)
    }

    pub fn media() -> Self {
        Self::new(interfaces::CHANNEL_TYPE_STREAMED_MEDIA, handle_type::CONTACT)
    }

    pub fn media_with_initial_audio() -> Self {
        let mut spec = Self::media();
        spec.set_initial_audio(true);
        spec
    }

    pub fn media_with_initial_video() -> Self {
        let mut spec = Self::media();
        spec.set_initial_video(true);
        spec
    }

    pub fn room_list() -> Self {
        Self::new(interfaces::CHANNEL_TYPE_ROOM_LIST, handle_type::NONE)
    }

    pub fn send_file() -> Self {
        Self::with_requested(interfaces::CHANNEL_TYPE_FILE_TRANSFER, handle_type::CONTACT, true)
    }

    pub fn receive_file() -> Self {
        Self::with_requested(interfaces::CHANNEL_TYPE_FILE_TRANSFER, handle_type::CONTACT, false)
    }

    /// Every standard spec with a display name
    pub fn standard() -> Vec<(&'static str, ChannelClassSpec)> {
        vec![
            ("text", Self::text()),
            ("text-chatroom", Self::text_chatroom()),
            ("media", Self::media()),
            ("media-with-initial-audio", Self::media_with_initial_audio()),
            ("media-with-initial-video", Self::media_with_initial_video()),
            ("room-list", Self::room_list()),
            ("send-file", Self::send_file()),
            ("receive-file", Self::receive_file()),
        ]
    }
}
