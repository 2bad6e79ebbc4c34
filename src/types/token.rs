//! Resolve tokens.
//!
//! A resolve that is not applied immediately hands the client a token that
//! records what was assigned. The client returns it with an apply, and the
//! resolver recovers the assignments from it without re-resolving.
//!
//! ## Encoding
//!
//! `"{version}.{hex(canonical json)}.{hex(HMAC-SHA256(secret, version|payload)[..16])}"`
//!
//! The MAC makes tokens unforgeable for anyone without the resolver secret.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::context::EvaluationContext;
use super::resolved::{FallthroughRule, ResolveReason, ResolvedValue};
use crate::canonical::to_canonical_bytes;

/// Errors opening a sealed token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Not of the form `version.payload.mac`.
    #[error("Malformed resolve token")]
    Malformed,
    /// Produced by an incompatible encoder.
    #[error("Unsupported resolve token version: {0}")]
    UnsupportedVersion(String),
    /// MAC does not match: tampered or signed with another secret.
    #[error("Resolve token signature mismatch")]
    SignatureMismatch,
    /// Signature valid but payload does not decode.
    #[error("Resolve token payload invalid: {0}")]
    InvalidPayload(String),
}

/// Record of one flag's assignment inside a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedFlag {
    /// Flag name.
    pub flag: String,
    /// Reason code at resolve time.
    pub reason: ResolveReason,
    /// Matched rule, if any.
    pub rule: Option<String>,
    /// Segment of the matched rule, if any.
    pub segment: Option<String>,
    /// Assignment id, if any.
    pub assignment_id: Option<String>,
    /// Assigned variant, if any.
    pub variant: Option<String>,
    /// Unit, if a rule matched.
    pub targeting_key: Option<String>,
    /// Context field holding the unit, if a rule matched.
    pub targeting_key_selector: Option<String>,
    /// Fallthroughs passed.
    pub fallthrough_rules: Vec<FallthroughRule>,
}

impl From<&ResolvedValue> for AssignedFlag {
    fn from(resolved: &ResolvedValue) -> Self {
        let m = resolved.assignment_match.as_ref();
        Self {
            flag: resolved.flag.clone(),
            reason: resolved.reason,
            rule: m.map(|m| m.rule.clone()),
            segment: m.map(|m| m.segment.clone()),
            assignment_id: m.map(|m| m.assignment_id.clone()),
            variant: m.and_then(|m| m.variant.clone()),
            targeting_key: m.map(|m| m.targeting_key.clone()),
            targeting_key_selector: m.map(|m| m.targeting_key_selector.clone()),
            fallthrough_rules: resolved.fallthrough_rules.clone(),
        }
    }
}

impl AssignedFlag {
    /// Whether an apply for this flag should produce an event.
    pub fn should_apply(&self) -> bool {
        self.assignment_id.is_some() || !self.fallthrough_rules.is_empty()
    }
}

/// Logical contents of a resolve token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveToken {
    /// Account the resolve ran under.
    pub account: String,
    /// Resolve identifier.
    pub resolve_id: String,
    /// Fingerprint of the state snapshot used.
    pub state_fingerprint: String,
    /// Context the flags were resolved against.
    pub evaluation_context: EvaluationContext,
    /// Per-flag assignments.
    pub assigned_flags: Vec<AssignedFlag>,
}

/// Sealed, transportable form of a [`ResolveToken`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedToken(String);

impl ResolveToken {
    /// Encoding version marker.
    pub const TOKEN_VERSION: &'static str = "rt1";

    fn mac(secret: &[u8], payload_hex: &str) -> Hmac<Sha256> {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key size");
        mac.update(Self::TOKEN_VERSION.as_bytes());
        mac.update(b"|");
        mac.update(payload_hex.as_bytes());
        mac
    }

    /// Seal the token with the resolver secret.
    pub fn seal(&self, secret: &[u8]) -> SealedToken {
        let payload = hex::encode(to_canonical_bytes(self));
        let tag = Self::mac(secret, &payload).finalize().into_bytes();
        SealedToken(format!(
            "{}.{}.{}",
            Self::TOKEN_VERSION,
            payload,
            hex::encode(&tag[..16])
        ))
    }

    /// Verify and decode a sealed token.
    pub fn open(secret: &[u8], sealed: &SealedToken) -> Result<Self, TokenError> {
        let mut parts = sealed.0.splitn(3, '.');
        let (version, payload, tag) = match (parts.next(), parts.next(), parts.next()) {
            (Some(v), Some(p), Some(t)) => (v, p, t),
            _ => return Err(TokenError::Malformed),
        };
        if version != Self::TOKEN_VERSION {
            return Err(TokenError::UnsupportedVersion(version.to_string()));
        }
        let tag = hex::decode(tag).map_err(|_| TokenError::Malformed)?;
        Self::mac(secret, payload)
            .verify_truncated_left(&tag)
            .map_err(|_| TokenError::SignatureMismatch)?;
        let bytes = hex::decode(payload).map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&bytes).map_err(|e| TokenError::InvalidPayload(e.to_string()))
    }

    /// Assignment recorded for `flag`.
    pub fn assigned(&self, flag: &str) -> Option<&AssignedFlag> {
        self.assigned_flags.iter().find(|a| a.flag == flag)
    }
}

impl SealedToken {
    /// Wrap an encoded token string.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Encoded form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SealedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
