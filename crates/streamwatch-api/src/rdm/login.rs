// ── Login domain ──
//
// One login stream per connection. The request carries the credentials the
// provider authenticates; the refresh echoes what was granted.

use secrecy::{ExposeSecret, SecretString};
use strum::{Display, EnumString};

use crate::types::{State, StreamId};

/// How `user_name` is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum UserIdType {
    #[default]
    Name,
    Email,
    Token,
    Cookie,
    AuthnToken,
}

impl UserIdType {
    /// Token-style identities may be refreshed with a new `user_name`.
    pub const fn is_token(self) -> bool {
        matches!(self, Self::Token | Self::AuthnToken)
    }
}

#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct LoginRequest {
    pub stream_id: StreamId,
    pub user_name: String,
    pub user_name_type: UserIdType,
    pub password: Option<SecretString>,
    pub instance_id: Option<String>,
    pub application_id: Option<String>,
    pub application_name: Option<String>,
    pub position: Option<String>,
    /// Ask the provider side to recover item streams on the consumer's behalf.
    pub single_open: bool,
    pub allow_suspect_data: bool,
    pub no_refresh: bool,
    pub pause: bool,
}

impl LoginRequest {
    pub fn new(stream_id: StreamId, user_name: impl Into<String>) -> Self {
        Self {
            stream_id,
            user_name: user_name.into(),
            user_name_type: UserIdType::Name,
            password: None,
            instance_id: None,
            application_id: None,
            application_name: None,
            position: None,
            single_open: true,
            allow_suspect_data: true,
            no_refresh: false,
            pause: false,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    pub fn with_user_name_type(mut self, user_name_type: UserIdType) -> Self {
        self.user_name_type = user_name_type;
        self
    }

    /// Whether `other` differs from `self` in anything the provider sees.
    /// The stream id is ignored.
    pub fn same_content(&self, other: &Self) -> bool {
        let passwords_match = match (&self.password, &other.password) {
            (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
            (None, None) => true,
            _ => false,
        };
        passwords_match
            && self.user_name == other.user_name
            && self.user_name_type == other.user_name_type
            && self.instance_id == other.instance_id
            && self.application_id == other.application_id
            && self.application_name == other.application_name
            && self.position == other.position
            && self.single_open == other.single_open
            && self.allow_suspect_data == other.allow_suspect_data
            && self.pause == other.pause
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct LoginRefresh {
    pub stream_id: StreamId,
    pub state: State,
    pub user_name: Option<String>,
    pub user_name_type: Option<UserIdType>,
    pub solicited: bool,
    pub complete: bool,
    /// Granted single-open behavior.
    pub single_open: bool,
    pub allow_suspect_data: bool,
    pub support_post: bool,
    /// Provider pauses and resumes every item stream on a login reissue.
    pub support_optimized_pause_resume: bool,
    pub application_id: Option<String>,
}

impl LoginRefresh {
    pub fn new(stream_id: StreamId, state: State) -> Self {
        Self {
            stream_id,
            state,
            user_name: None,
            user_name_type: None,
            solicited: true,
            complete: true,
            single_open: true,
            allow_suspect_data: true,
            support_post: true,
            support_optimized_pause_resume: false,
            application_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStatus {
    pub stream_id: StreamId,
    pub state: Option<State>,
    pub user_name: Option<String>,
}

impl LoginStatus {
    pub fn new(stream_id: StreamId, state: State) -> Self {
        Self {
            stream_id,
            state: Some(state),
            user_name: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LoginMsg {
    Request(LoginRequest),
    Refresh(LoginRefresh),
    Status(LoginStatus),
    Close { stream_id: StreamId },
}

impl LoginMsg {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Request(m) => m.stream_id,
            Self::Refresh(m) => m.stream_id,
            Self::Status(m) => m.stream_id,
            Self::Close { stream_id } => *stream_id,
        }
    }

    pub fn set_stream_id(&mut self, id: StreamId) {
        match self {
            Self::Request(m) => m.stream_id = id,
            Self::Refresh(m) => m.stream_id = id,
            Self::Status(m) => m.stream_id = id,
            Self::Close { stream_id } => *stream_id = id,
        }
    }

    /// The stream state carried by a refresh or status, if any.
    pub fn state(&self) -> Option<&State> {
        match self {
            Self::Refresh(m) => Some(&m.state),
            Self::Status(m) => m.state.as_ref(),
            Self::Request(_) | Self::Close { .. } => None,
        }
    }
}
