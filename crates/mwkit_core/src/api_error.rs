use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// The raw error as reported by the MediaWiki API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiErrorDetails {
    pub code: String,
    pub info: String,
    pub payload: Value,
}

impl fmt::Display for ApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API error code: '{}' info: '{}'", self.code, self.info)
    }
}

/// A classified MediaWiki API failure.
///
/// Every variant keeps the original code, info and payload so nothing is lost
/// when an error code is not one of the known ones.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureKind {
    #[error("{0}")]
    BadToken(ApiErrorDetails),
    #[error("{0}")]
    MaxLag(ApiErrorDetails),
    #[error("{0}")]
    EditConflict(ApiErrorDetails),
    #[error("{0}")]
    ArticleExists(ApiErrorDetails),
    #[error("{0}")]
    MissingTitle(ApiErrorDetails),
    #[error("{0}")]
    ProtectedPage(ApiErrorDetails),
    #[error("{0}")]
    PermissionDenied(ApiErrorDetails),
    #[error("{0}")]
    ReadOnly(ApiErrorDetails),
    #[error("{0}")]
    ReadApiDenied(ApiErrorDetails),
    #[error("{0}")]
    PageCannotExist(ApiErrorDetails),
    /// The wiki could not save, usually a database hiccup on its side.
    #[error("{0}")]
    FailedSave(ApiErrorDetails),
    /// Wikibase: the requested entity does not exist.
    #[error("{0}")]
    NoSuchEntity(ApiErrorDetails),
    /// Wikibase: the entity modification was rejected.
    #[error("{0}")]
    ModificationFailed(ApiErrorDetails),
    #[error("{0}")]
    Unknown(ApiErrorDetails),
}

type Constructor = fn(ApiErrorDetails) -> FailureKind;

const KNOWN_CODES: &[(&str, Constructor)] = &[
    ("badtoken", FailureKind::BadToken),
    ("maxlag", FailureKind::MaxLag),
    ("editconflict", FailureKind::EditConflict),
    ("articleexists", FailureKind::ArticleExists),
    ("missingtitle", FailureKind::MissingTitle),
    ("protectedpage", FailureKind::ProtectedPage),
    ("permissiondenied", FailureKind::PermissionDenied),
    ("readonly", FailureKind::ReadOnly),
    ("readapidenied", FailureKind::ReadApiDenied),
    ("pagecannotexist", FailureKind::PageCannotExist),
    ("failed-save", FailureKind::FailedSave),
    ("no-such-entity", FailureKind::NoSuchEntity),
    ("modification-failed", FailureKind::ModificationFailed),
];

/// Map an API error code to its failure kind. Unknown codes never fail, they
/// become [`FailureKind::Unknown`].
pub fn classify(code: &str, info: &str, payload: Value) -> FailureKind {
    let details = ApiErrorDetails {
        code: code.to_string(),
        info: info.to_string(),
        payload,
    };
    match KNOWN_CODES.iter().find(|(known, _)| *known == code) {
        Some((_, build)) => build(details),
        None => FailureKind::Unknown(details),
    }
}

/// Codes with a dedicated failure kind, in lookup order.
pub fn known_codes() -> impl Iterator<Item = &'static str> {
    KNOWN_CODES.iter().map(|(code, _)| *code)
}

impl FailureKind {
    /// Classify the `error` member of an API response, if there is one.
    pub fn from_response(response: &Value) -> Option<Self> {
        let error = response.get("error")?;
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        Some(classify(code, info, error.clone()))
    }

    pub fn details(&self) -> &ApiErrorDetails {
        match self {
            Self::BadToken(details)
            | Self::MaxLag(details)
            | Self::EditConflict(details)
            | Self::ArticleExists(details)
            | Self::MissingTitle(details)
            | Self::ProtectedPage(details)
            | Self::PermissionDenied(details)
            | Self::ReadOnly(details)
            | Self::ReadApiDenied(details)
            | Self::PageCannotExist(details)
            | Self::FailedSave(details)
            | Self::NoSuchEntity(details)
            | Self::ModificationFailed(details)
            | Self::Unknown(details) => details,
        }
    }

    pub fn code(&self) -> &str {
        &self.details().code
    }

    pub fn info(&self) -> &str {
        &self.details().info
    }

    pub fn payload(&self) -> &Value {
        &self.details().payload
    }

    pub fn message(&self) -> String {
        self.details().to_string()
    }

    /// Stable snake_case name of the kind, used in reports and CLI output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BadToken(_) => "bad_token",
            Self::MaxLag(_) => "max_lag",
            Self::EditConflict(_) => "edit_conflict",
            Self::ArticleExists(_) => "article_exists",
            Self::MissingTitle(_) => "missing_title",
            Self::ProtectedPage(_) => "protected_page",
            Self::PermissionDenied(_) => "permission_denied",
            Self::ReadOnly(_) => "read_only",
            Self::ReadApiDenied(_) => "read_api_denied",
            Self::PageCannotExist(_) => "page_cannot_exist",
            Self::FailedSave(_) => "failed_save",
            Self::NoSuchEntity(_) => "no_such_entity",
            Self::ModificationFailed(_) => "modification_failed",
            Self::Unknown(_) => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Failures a client can recover from by waiting or refreshing its token.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MaxLag(_) | Self::BadToken(_))
    }
}
