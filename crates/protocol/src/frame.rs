use serde::{Deserialize, Serialize};

use crate::constants::{FRAME_PING, FRAME_PONG, FRAME_REFRESH, ModuleName};
use crate::error::ProtocolError;

/// Envelope for every frame exchanged over the realtime channel.
///
/// `data` is kept as a `RawValue` so routing never pays for payload parsing;
/// handlers decode it into their own typed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<serde_json::value::RawValue>>,
}

impl Frame {
    /// Creates a frame with an optional module and payload.
    pub fn new<T: Serialize>(
        module: Option<&str>,
        frame_type: impl Into<String>,
        data: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match data {
            Some(d) => {
                let json = serde_json::to_string(d)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            module: module.map(str::to_owned),
            frame_type: frame_type.into(),
            data: raw,
        })
    }

    /// Creates a module-scoped frame.
    pub fn for_module<T: Serialize>(
        module: ModuleName,
        frame_type: impl Into<String>,
        data: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Self::new(Some(module.as_str()), frame_type, data)
    }

    /// Keepalive request.
    pub fn ping() -> Self {
        Self {
            module: None,
            frame_type: FRAME_PING.into(),
            data: None,
        }
    }

    /// Keepalive acknowledgment.
    pub fn pong() -> Self {
        Self {
            module: None,
            frame_type: FRAME_PONG.into(),
            data: None,
        }
    }

    /// Resync request for a module, answered with `initial_state`.
    pub fn refresh(module: ModuleName) -> Self {
        Self {
            module: Some(module.as_str().into()),
            frame_type: FRAME_REFRESH.into(),
            data: None,
        }
    }

    /// Returns `true` for reserved `ping`/`pong` frames.
    pub fn is_keepalive(&self) -> bool {
        crate::constants::is_keepalive(&self.frame_type)
    }

    /// Module name, falling back to `default` for single-purpose channels
    /// whose frames omit it.
    pub fn module_or<'a>(&'a self, default: Option<&'a str>) -> Option<&'a str> {
        self.module.as_deref().or(default)
    }

    /// Deserializes the payload into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.data {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Like [`parse_data`](Self::parse_data) but treats a missing payload as
    /// an error.
    pub fn require_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ProtocolError> {
        self.parse_data()?
            .ok_or_else(|| ProtocolError::MissingData(self.frame_type.clone()))
    }

    /// Encodes the frame as a JSON text payload.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
