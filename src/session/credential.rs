//! Claims carried by the identity provider's signed credential.
//!
//! The credential is a JWT whose signature is checked by the provider before
//! it reaches us. We only pull the subject and profile fields out of the
//! payload segment.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use super::identity::Profile;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl Claims {
    pub fn decode(credential: &str) -> Result<Self> {
        let mut segments = credential.trim().split('.');
        let payload = match (segments.next(), segments.next(), segments.next()) {
            (Some(_header), Some(payload), Some(_signature)) if !payload.is_empty() => payload,
            _ => return Err(invalid("expected three dot-separated segments")),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| invalid(&e.to_string()))?;
        let claims: Claims =
            serde_json::from_slice(&bytes).map_err(|e| invalid(&e.to_string()))?;

        if claims.sub.trim().is_empty() {
            return Err(invalid("missing subject"));
        }
        Ok(claims)
    }

    pub fn profile(&self) -> Profile {
        Profile {
            name: self.name.clone().unwrap_or_else(|| "TaskWise User".to_string()),
            email: self.email.clone().unwrap_or_default(),
            picture: self.picture.clone(),
        }
    }
}

fn invalid(reason: &str) -> Error {
    Error::Permission(format!("invalid identity credential: {reason}"))
}
