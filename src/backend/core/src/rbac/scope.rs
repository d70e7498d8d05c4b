//! Scope filters: the storage-agnostic outcome of one authorization decision.

use axum::http::StatusCode;
use serde::Serialize;
use std::fmt;

use super::models::MemberId;
use crate::error::{AppguardError, ErrorCode};

/// A record-level condition. A record matches the filter when it matches any
/// predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "members", rename_all = "snake_case")]
pub enum ScopePredicate {
    OwnedByAuthor(MemberId),
    AuthoredByAnyOf(Vec<MemberId>),
}

impl ScopePredicate {
    pub fn matches(&self, author: Option<&MemberId>) -> bool {
        let Some(author) = author else {
            return false;
        };
        match self {
            Self::OwnedByAuthor(member) => member == author,
            Self::AuthoredByAnyOf(members) => members.contains(author),
        }
    }
}

/// Why an operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    Unauthenticated,
    ActionPrivate,
    /// A requested view has no rules. Reported like a private action.
    ConfigurationInconsistency,
    InsufficientPermissions,
    NotAppMember,
    /// A membership lookup errored or timed out.
    MembershipLookupFailed,
}

impl Denial {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            _ => StatusCode::FORBIDDEN,
        }
    }

    /// The user-facing message.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "User is not logged in.",
            Self::ActionPrivate | Self::ConfigurationInconsistency => "action is private",
            Self::InsufficientPermissions => "insufficient permissions",
            Self::NotAppMember => "user is not a member of the app",
            Self::MembershipLookupFailed => "membership lookup failed",
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::Unauthorized,
            Self::ConfigurationInconsistency => ErrorCode::ConfigurationInconsistency,
            Self::MembershipLookupFailed => ErrorCode::MembershipLookupFailed,
            Self::ActionPrivate | Self::InsufficientPermissions | Self::NotAppMember => {
                ErrorCode::Forbidden
            }
        }
    }

    pub fn into_error(self) -> AppguardError {
        AppguardError::new(self.code(), self.message())
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.status().as_u16())
    }
}

/// `Allow`, `Deny(reason)` or `AllowIf(predicates)`.
///
/// The storage layer ANDs this with the operation's own lookup criteria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ScopeFilter {
    Allow,
    Deny(Denial),
    AllowIf(Vec<ScopePredicate>),
}

impl ScopeFilter {
    pub fn is_allowed(&self) -> bool {
        !self.is_denied()
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }

    /// Label used in logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny(_) => "deny",
            Self::AllowIf(_) => "allow_if",
        }
    }

    /// Whether a record authored by `author` is inside this scope.
    pub fn permits(&self, author: Option<&MemberId>) -> bool {
        match self {
            Self::Allow => true,
            Self::Deny(_) => false,
            Self::AllowIf(predicates) => predicates.iter().any(|p| p.matches(author)),
        }
    }

    /// Turn a denial into an error, passing permitted scopes through.
    pub fn into_result(self) -> Result<Self, AppguardError> {
        match self {
            Self::Deny(denial) => Err(denial.into_error()),
            other => Ok(other),
        }
    }
}
