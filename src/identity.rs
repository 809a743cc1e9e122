//! Resolution of the caller into the key that selects their conversation thread.

/// Literal prefix of every WhatsApp-derived session id.
pub const WHATSAPP_SESSION_PREFIX: &str = "wa_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Web,
    WhatsApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Web => "web",
            Channel::WhatsApp => "whatsapp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// An authenticated account.
    User(String),
    /// An anonymous web client carrying its own session token.
    WebSession(String),
    /// A WhatsApp sender; holds the derived `wa_` session id.
    WhatsApp(String),
}

/// The column a conversation lookup filters on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    Owner(String),
    Session(String),
}

impl std::fmt::Display for LookupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupKey::Owner(id) => write!(f, "owner:{id}"),
            LookupKey::Session(id) => write!(f, "session:{id}"),
        }
    }
}

impl Identity {
    pub fn lookup_key(&self) -> LookupKey {
        match self {
            Identity::User(id) => LookupKey::Owner(id.clone()),
            Identity::WebSession(id) | Identity::WhatsApp(id) => LookupKey::Session(id.clone()),
        }
    }

    pub fn owner_user_id(&self) -> Option<&str> {
        match self {
            Identity::User(id) => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Identity::User(_) => None,
            Identity::WebSession(id) | Identity::WhatsApp(id) => Some(id.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("sessionId is required for anonymous requests")]
    MissingSession,
    #[error("session ids starting with 'wa_' are reserved for WhatsApp")]
    ReservedSessionPrefix,
    #[error("sender phone number is missing")]
    MissingPhone,
}

/// Resolve a web caller. An authenticated user always wins over a session id sent
/// alongside it; anonymous callers must bring their own session id.
pub fn resolve_web(
    user_id: Option<&str>,
    session_id: Option<&str>,
) -> Result<Identity, IdentityError> {
    if let Some(user_id) = user_id.map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(Identity::User(user_id.to_string()));
    }

    let session_id = session_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(IdentityError::MissingSession)?;

    if session_id.starts_with(WHATSAPP_SESSION_PREFIX) {
        return Err(IdentityError::ReservedSessionPrefix);
    }

    Ok(Identity::WebSession(session_id.to_string()))
}

pub fn resolve_whatsapp(phone: &str) -> Result<Identity, IdentityError> {
    let session_id = whatsapp_session_id(phone).ok_or(IdentityError::MissingPhone)?;
    Ok(Identity::WhatsApp(session_id))
}

/// `+15551234567` and `15551234567` map to the same `wa_15551234567`.
pub fn whatsapp_session_id(phone: &str) -> Option<String> {
    let digits = phone.trim().trim_start_matches('+');
    if digits.is_empty() {
        None
    } else {
        Some(format!("{WHATSAPP_SESSION_PREFIX}{digits}"))
    }
}
