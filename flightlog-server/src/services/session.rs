//! Credential flow: login, refresh, recover, reset
//!
//! Access tokens travel in the `Authorization` header; refresh tokens live in
//! an httpOnly cookie set by the HTTP layer. Sessions are stateless, so logout
//! is purely a cookie concern.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use flightlog_common::auth::{verify_password, TokenError, TokenKind, TokenService};
use flightlog_common::models::CrewMember;
use flightlog_common::{Error, Result};

use super::mailer::{MailMessage, Mailer};
use super::roster::Roster;

/// Body returned by login and refresh
#[derive(Debug, Clone, Serialize)]
pub struct SessionBody {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: CrewMember,
}

/// A freshly issued session and its refresh token
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub body: SessionBody,
    pub refresh_token: String,
}

/// Why a refresh was refused
#[derive(Debug)]
pub enum RefreshError {
    /// Absent or ordinary end of session; the cookie is left alone
    Expired,
    /// Garbage, wrong kind, or a subject no longer on the roster; the cookie is cleared
    Malformed(String),
    Internal(Error),
}

#[derive(Clone)]
pub struct SessionService {
    roster: Roster,
    tokens: TokenService,
    mailer: Arc<dyn Mailer>,
    reset_url: String,
}

impl SessionService {
    pub fn new(roster: Roster, tokens: TokenService, mailer: Arc<dyn Mailer>, reset_url: impl Into<String>) -> Self {
        Self {
            roster,
            tokens,
            mailer,
            reset_url: reset_url.into(),
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub async fn login(&self, nip: i64, password: &str) -> Result<IssuedSession> {
        let invalid = || Error::Unauthorized("invalid credentials".into());

        let (member, hash) = self.roster.credentials(nip).await?.ok_or_else(invalid)?;
        let hash = hash.ok_or_else(invalid)?;
        if !verify_password(password, &hash)? {
            warn!(nip, "Login rejected");
            return Err(invalid());
        }

        info!(nip, level = member.role_level.value(), "Login");
        self.issue(member)
    }

    /// Rotate the refresh token and issue a new access token
    ///
    /// The role level is re-read from the roster so promotions and demotions
    /// take effect at the next refresh.
    pub async fn refresh(&self, refresh_token: &str) -> std::result::Result<IssuedSession, RefreshError> {
        let claims = match self.tokens.verify(refresh_token, TokenKind::Refresh) {
            Ok(claims) => claims,
            Err(TokenError::Expired) => return Err(RefreshError::Expired),
            Err(e) => return Err(RefreshError::Malformed(e.to_string())),
        };

        let member = self
            .roster
            .find(claims.sub)
            .await
            .map_err(RefreshError::Internal)?
            .ok_or_else(|| RefreshError::Malformed(format!("crew member {} no longer exists", claims.sub)))?;

        self.issue(member).map_err(RefreshError::Internal)
    }

    /// Mail a reset link when the address is known; the outcome is never revealed
    pub async fn recover(&self, email: &str) -> Result<()> {
        let Some(member) = self.roster.find_by_email(email).await? else {
            info!("Password recovery requested for unknown address");
            return Ok(());
        };
        let Some(to) = member.email.clone() else {
            return Ok(());
        };

        let token = self.tokens.issue(TokenKind::Reset, member.nip, member.role_level)?;
        let message = MailMessage {
            to,
            subject: "Flight log password reset".to_string(),
            body: format!(
                "A password reset was requested for NIP {}.\n\nOpen {}?token={} within 30 minutes to choose a new password.",
                member.nip, self.reset_url, token
            ),
        };
        if let Err(e) = self.mailer.send(message).await {
            warn!(nip = member.nip, "Password recovery mail failed: {}", e);
        }
        Ok(())
    }

    pub async fn reset(&self, token: &str, new_password: &str) -> Result<()> {
        let claims = self
            .tokens
            .verify(token, TokenKind::Reset)
            .map_err(|e| Error::Unauthorized(format!("reset token rejected: {e}")))?;
        self.roster.set_password(claims.sub, new_password).await?;
        info!(nip = claims.sub, "Password reset");
        Ok(())
    }

    fn issue(&self, member: CrewMember) -> Result<IssuedSession> {
        let access_token = self.tokens.issue(TokenKind::Access, member.nip, member.role_level)?;
        let refresh_token = self.tokens.issue(TokenKind::Refresh, member.nip, member.role_level)?;
        Ok(IssuedSession {
            body: SessionBody {
                access_token,
                token_type: "Bearer",
                expires_in: self.tokens.access_seconds(),
                user: member,
            },
            refresh_token,
        })
    }
}
