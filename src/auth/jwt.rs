use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};

use super::claims::{Claims, TokenKind};
use crate::{config::JwtConfig, error::AppError, state::AppState};

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub activation_ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        let minutes = |m: i64| Duration::from_secs(m.max(0) as u64 * 60);
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: minutes(cfg.ttl_minutes),
            refresh_ttl: minutes(cfg.refresh_ttl_minutes),
            activation_ttl: minutes(cfg.activation_ttl_minutes),
        }
    }

    fn sign_with_kind(&self, subject: String, kind: TokenKind) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::Activate => self.activation_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: subject,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user_id: i64) -> anyhow::Result<String> {
        self.sign_with_kind(user_id.to_string(), TokenKind::Access)
    }

    pub fn sign_refresh(&self, user_id: i64) -> anyhow::Result<String> {
        self.sign_with_kind(user_id.to_string(), TokenKind::Refresh)
    }

    pub fn sign_activation(&self, email: &str) -> anyhow::Result<String> {
        self.sign_with_kind(email.to_string(), TokenKind::Activate)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_kind(&self, token: &str, kind: TokenKind) -> anyhow::Result<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            anyhow::bail!("expected {:?} token, got {:?}", kind, claims.kind);
        }
        Ok(claims)
    }

    /// User id carried by a refresh token.
    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<i64> {
        let claims = self.verify_kind(token, TokenKind::Refresh)?;
        Ok(claims.sub.parse()?)
    }

    /// Email carried by an activation token.
    pub fn verify_activation(&self, token: &str) -> anyhow::Result<String> {
        Ok(self.verify_kind(token, TokenKind::Activate)?.sub)
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::from_config(&state.config.jwt)
    }
}

/// Authenticated user id; rejects with 401 when the access token is missing or bad.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

/// `Some(user id)` for a valid access token, `None` for anonymous requests.
#[derive(Debug, Clone, Copy)]
pub struct MaybeAuthUser(pub Option<i64>);

fn bearer_user(parts: &Parts, keys: &JwtKeys) -> Result<Option<i64>, AppError> {
    let Some(auth_header) = parts.headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    let token = auth_header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .ok_or_else(|| AppError::Unauthenticated("Invalid Authorization header".into()))?;

    let claims = keys.verify(token).map_err(|_| {
        warn!("invalid or expired token");
        AppError::Unauthenticated("Invalid or expired token".into())
    })?;
    if claims.kind != TokenKind::Access {
        return Err(AppError::Unauthenticated("Access token required".into()));
    }
    let user_id = claims
        .sub
        .parse::<i64>()
        .map_err(|_| AppError::Unauthenticated("Invalid token subject".into()))?;
    Ok(Some(user_id))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        bearer_user(parts, &keys)?
            .map(AuthUser)
            .ok_or_else(|| AppError::Unauthenticated("Missing Authorization header".into()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        Ok(MaybeAuthUser(bearer_user(parts, &keys)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys(issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: "dev-secret".into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 5,
            refresh_ttl_minutes: 60,
            activation_ttl_minutes: 30,
        })
    }

    #[test]
    fn sign_and_verify_access_token() {
        let keys = make_keys("test-issuer", "test-aud");
        let token = keys.sign_access(42).expect("sign access");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn refresh_token_yields_user_id() {
        let keys = make_keys("iss", "aud");
        let token = keys.sign_refresh(7).expect("sign refresh");
        assert_eq!(keys.verify_refresh(&token).expect("verify refresh"), 7);
    }

    #[test]
    fn verify_refresh_rejects_access_token() {
        let keys = make_keys("iss", "aud");
        let token = keys.sign_access(7).expect("sign access");
        assert!(keys.verify_refresh(&token).is_err());
    }

    #[test]
    fn activation_token_carries_email_and_is_not_an_access_token() {
        let keys = make_keys("iss", "aud");
        let token = keys.sign_activation("ann@example.com").expect("sign activation");
        assert_eq!(keys.verify_activation(&token).unwrap(), "ann@example.com");
        assert!(keys.verify_kind(&token, TokenKind::Access).is_err());
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let good_keys = make_keys("good-iss", "good-aud");
        let bad_keys = make_keys("bad-iss", "bad-aud");
        let token = good_keys.sign_access(1).expect("sign access");
        assert!(bad_keys.verify(&token).is_err());
    }

    #[test]
    fn bearer_user_parses_header() {
        let keys = make_keys("iss", "aud");
        let token = keys.sign_access(9).unwrap();
        let req = axum::http::Request::builder()
            .header("authorization", format!("Bearer {token}"))
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        assert_eq!(bearer_user(&parts, &keys).unwrap(), Some(9));

        let (anon, _) = axum::http::Request::new(()).into_parts();
        assert_eq!(bearer_user(&anon, &keys).unwrap(), None);

        let req = axum::http::Request::builder()
            .header("authorization", "Bearer garbage")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        assert!(matches!(bearer_user(&parts, &keys), Err(AppError::Unauthenticated(_))));
    }
}
