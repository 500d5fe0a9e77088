//! Default frame codec: 2-byte big-endian command code followed by a JSON body
//!
//! Frame names are the command code as four lowercase hex digits (`"000a"`,
//! `"0101"`). An empty body decodes to `{}`.

use super::{CodecError, FrameCodec, FrameDescriptor};
use serde_json::Value;
use std::collections::BTreeMap;

const CODE_LEN: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct HexFrameCodec {
    /// Known frames by name; empty means every 4-hex-digit name is known
    frames: BTreeMap<String, FrameDescriptor>,
}

impl HexFrameCodec {
    /// Codec accepting any 4-hex-digit frame name
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Codec restricted to `names`
    pub fn with_frames<I, S>(names: I) -> Result<Self, CodecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut frames = BTreeMap::new();
        for name in names {
            let descriptor = parse_name(name.as_ref())?;
            frames.insert(descriptor.name.clone(), descriptor);
        }
        Ok(Self { frames })
    }

    pub fn is_permissive(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Parse `"000A"` / `"000a"` into its descriptor
fn parse_name(name: &str) -> Result<FrameDescriptor, CodecError> {
    if name.len() != CODE_LEN * 2 || !name.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CodecError::Malformed(format!(
            "frame name '{name}' is not four hex digits"
        )));
    }
    let code = u16::from_str_radix(name, 16)
        .map_err(|e| CodecError::Malformed(format!("frame name '{name}': {e}")))?;
    Ok(FrameDescriptor {
        name: format!("{code:04x}"),
        code,
    })
}

impl FrameCodec for HexFrameCodec {
    fn lookup(&self, name: &str) -> Option<FrameDescriptor> {
        let descriptor = parse_name(name).ok()?;
        if self.is_permissive() {
            Some(descriptor)
        } else {
            self.frames.get(&descriptor.name).cloned()
        }
    }

    fn encode(&self, name: &str, payload: &Value) -> Result<Vec<u8>, CodecError> {
        let descriptor = self
            .lookup(name)
            .ok_or_else(|| CodecError::UnknownFrame(name.to_string()))?;

        let body = serde_json::to_vec(payload)
            .map_err(|e| CodecError::Malformed(format!("payload for {name}: {e}")))?;

        let mut frame = Vec::with_capacity(CODE_LEN + body.len());
        frame.extend_from_slice(&descriptor.code.to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    fn decode(&self, bytes: &[u8]) -> Result<(String, Value), CodecError> {
        if bytes.len() < CODE_LEN {
            return Err(CodecError::Malformed(format!(
                "frame of {} bytes is shorter than its command code",
                bytes.len()
            )));
        }
        let code = u16::from_be_bytes([bytes[0], bytes[1]]);
        let name = format!("{code:04x}");
        if self.lookup(&name).is_none() {
            return Err(CodecError::UnknownFrame(name));
        }

        let body = &bytes[CODE_LEN..];
        let payload = if body.is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_slice(body)
                .map_err(|e| CodecError::Malformed(format!("body of {name}: {e}")))?
        };
        Ok((name, payload))
    }
}
