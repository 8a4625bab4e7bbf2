//! Recognition tags: the description text that marks a security group rule as ours.
//!
//! Grammar:
//!
//! ```text
//! tag     = "AlfredFRP_" name "_local" port
//! legacy  = "AlfredFRP_" name "_blocked"
//! ```
//!
//! Names are split at the *last* `_local` (or `_blocked`). Encoded tags always end with the
//! port, but a legacy or hand-written description whose name contains `_local` gets split in
//! the wrong place. Rules whose description lacks the prefix are not managed by this tool.

pub const TAG_PREFIX: &str = "AlfredFRP_";
pub const UNKNOWN_SERVICE: &str = "unknown-service";

const LOCAL_MARKER: &str = "_local";
const BLOCKED_MARKER: &str = "_blocked";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionTag {
    pub service_name: String,
    pub local_port: Option<u16>,
}

pub fn is_tagged(description: &str) -> bool {
    description.starts_with(TAG_PREFIX)
}

pub fn encode(service_name: &str, local_port: u16) -> String {
    format!("{TAG_PREFIX}{service_name}{LOCAL_MARKER}{local_port}")
}

/// Never fails: anything unrecognizable becomes [`UNKNOWN_SERVICE`].
pub fn decode(description: &str) -> RecognitionTag {
    let Some(rest) = description.strip_prefix(TAG_PREFIX) else {
        return RecognitionTag {
            service_name: UNKNOWN_SERVICE.to_string(),
            local_port: None,
        };
    };

    if let Some(idx) = rest.rfind(LOCAL_MARKER) {
        let port = &rest[idx + LOCAL_MARKER.len()..];
        return RecognitionTag {
            service_name: rest[..idx].to_string(),
            local_port: port.parse().ok(),
        };
    }

    if let Some(idx) = rest.rfind(BLOCKED_MARKER) {
        return RecognitionTag {
            service_name: rest[..idx].to_string(),
            local_port: None,
        };
    }

    RecognitionTag {
        service_name: rest.to_string(),
        local_port: None,
    }
}
