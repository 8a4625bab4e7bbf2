use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required identifier or credential was not provided; the operator has to fix this.
    #[error("{what} is not configured (set {hint})")]
    ConfigurationMissing {
        what: &'static str,
        hint: &'static str,
    },

    /// The provider could not be reached. Safe to retry.
    #[error("could not reach {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The provider received the request and rejected it.
    #[error("provider rejected the request: Code={code}, Message={message}, RequestId={request_id}")]
    RemoteApi {
        code: String,
        message: String,
        request_id: String,
    },

    #[error("malformed response from provider: {0}")]
    MalformedRemoteData(String),

    /// A two-phase mutation completed its first phase only; needs manual cleanup.
    #[error("security group left in an ambiguous state for '{service}': {detail}")]
    AmbiguousState { service: String, detail: String },

    #[error("no public IP address could be determined: {last_error}")]
    PublicIpUnavailable { last_error: String },

    #[error("no valid proxy named '{0}' in the manifest")]
    UnknownEndpoint(String),

    #[error("'{0}' has no ACCEPT rule to close")]
    NotOpen(String),

    #[error("{phase} failed for '{service}': {source}")]
    Phase {
        service: String,
        phase: Phase,
        #[source]
        source: Box<Error>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FetchRules,
    ResolvePublicIp,
    CreateDropRule,
    CreateAcceptRule,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::FetchRules => "fetching rules",
            Self::ResolvePublicIp => "resolving the public IP",
            Self::CreateDropRule => "creating the DROP rule",
            Self::CreateAcceptRule => "creating the ACCEPT rule",
        })
    }
}

impl Error {
    pub fn in_phase(self, service: &str, phase: Phase) -> Self {
        Error::Phase {
            service: service.to_string(),
            phase,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through [`Error::Phase`] wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            Error::Transport { .. } | Error::PublicIpUnavailable { .. }
        )
    }
}
