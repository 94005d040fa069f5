//! Scoped build-token minting.
//!
//! Implements the token port with HS256 JWTs: one short-lived credential
//! per build start, carrying the build's identity claims and scopes.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use slipway_core::ids::BuildId;
use slipway_core::ports::TokenMinter;
use slipway_core::{Error, MetaMap, Result};
use uuid::Uuid;

/// Claims carried by a per-build scoped token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildClaims {
    pub iss: String,
    /// The build id.
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub scm_context: String,
    pub scope: Vec<String>,
    /// Caller-supplied identity claims (pipeline, job, event, sha).
    #[serde(flatten)]
    pub extra: MetaMap,
}

/// HS256 implementation of the token port.
pub struct JwtTokenMinter {
    issuer: String,
    key: EncodingKey,
}

impl JwtTokenMinter {
    pub fn new(issuer: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            issuer: issuer.into(),
            key: EncodingKey::from_secret(secret),
        }
    }
}

impl TokenMinter for JwtTokenMinter {
    fn mint(
        &self,
        build_id: BuildId,
        claims: &MetaMap,
        scm_context: &str,
        ttl_minutes: i64,
        scopes: &[String],
    ) -> Result<String> {
        let now = Utc::now();
        let claims = BuildClaims {
            iss: self.issuer.clone(),
            sub: build_id.to_string(),
            exp: (now + Duration::minutes(ttl_minutes)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            scm_context: scm_context.to_string(),
            scope: scopes.to_vec(),
            extra: claims.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|e| Error::Token(e.to_string()))
    }
}
