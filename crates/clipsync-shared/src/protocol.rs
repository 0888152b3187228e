use serde::{Deserialize, Serialize};

use crate::constants::{MAX_INLINE_BYTES, TYPE_CLIP, TYPE_HELLO};
use crate::error::ProtocolError;
use crate::types::DeviceId;

/// JSON envelope carried in every WebSocket text frame.
///
/// ```json
/// {"type":"hello","hello":{"token":"..","user_id":"..","device_id":".."}}
/// {"type":"clip","clip":{"msg_id":"..","mime":"..","size":4,"data":"aG9sYQ==","from":".."}}
/// ```
///
/// `type` is kept as a free string so that envelope kinds this build does
/// not know about still decode and can be skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hello: Option<Hello>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip: Option<Clip>,
}

/// First message on every connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    #[serde(default)]
    pub token: String,
    /// Informational. Room placement is derived from `token` alone.
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub device_id: String,
}

/// One clipboard item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Clip {
    #[serde(default)]
    pub msg_id: String,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub size: i64,
    /// Inline payload, base64 on the wire. Present for clips up to
    /// `MAX_INLINE_BYTES`.
    #[serde(
        default,
        with = "base64_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Vec<u8>>,
    /// Out-of-band location of a payload above the inline threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    /// Sending device. Always rewritten by the relay before fan-out.
    #[serde(default)]
    pub from: String,
}

/// An envelope classified by its `type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Clip(Clip),
    /// Unrecognised type, or a known type whose body is missing.
    Unknown(String),
}

impl Envelope {
    pub fn hello(hello: Hello) -> Self {
        Self {
            kind: TYPE_HELLO.to_string(),
            hello: Some(hello),
            clip: None,
        }
    }

    pub fn clip(clip: Clip) -> Self {
        Self {
            kind: TYPE_CLIP.to_string(),
            hello: None,
            clip: Some(clip),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn into_message(self) -> Message {
        match (self.kind.as_str(), self.hello, self.clip) {
            (TYPE_HELLO, Some(hello), _) => Message::Hello(hello),
            (TYPE_CLIP, _, Some(clip)) => Message::Clip(clip),
            _ => Message::Unknown(self.kind),
        }
    }

    /// Extract the handshake body, rejecting any other kind of envelope.
    pub fn into_hello(self) -> Result<Hello, ProtocolError> {
        if self.kind != TYPE_HELLO {
            return Err(ProtocolError::ExpectedHello(self.kind));
        }
        self.hello.ok_or(ProtocolError::MissingHello)
    }
}

impl Hello {
    pub fn device_id(&self) -> Result<DeviceId, ProtocolError> {
        DeviceId::parse(&self.device_id)
    }
}

impl Clip {
    /// Overwrite the sender with the device the relay authenticated.
    pub fn stamped(mut self, from: &DeviceId) -> Self {
        self.from = from.to_string();
        self
    }

    /// Whether the declared size fits the inline threshold.
    pub fn is_inline(&self) -> bool {
        self.size <= MAX_INLINE_BYTES as i64
    }

    pub fn check_inline_threshold(&self) -> Result<(), ProtocolError> {
        match &self.data {
            Some(data) if data.len() > MAX_INLINE_BYTES => Err(ProtocolError::InlineTooLarge {
                size: data.len(),
                max: MAX_INLINE_BYTES,
            }),
            _ => Ok(()),
        }
    }
}

mod base64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|text| STANDARD.decode(text.as_bytes()).map_err(de::Error::custom))
            .transpose()
    }
}
