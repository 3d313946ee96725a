//! Admin authentication and role gates.
//!
//! Login exchanges an externally issued identity token for an HS256 bearer
//! credential.  Each admin request resolves that credential to a
//! [`Principal`] once; gates then compare [`Role`]s with
//! [`Principal::require`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::store::models::AdminUser;
use crate::store::{admins, StoreError};

type HmacSha256 = Hmac<Sha256>;

/// Ordered access levels.  Every gate uses the derived ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn rank(self) -> u8 {
        self as u8 + 1
    }

    /// True when this role is at least `required`.
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }

    fn label(self) -> &'static str {
        match self {
            Role::Viewer => "Viewer",
            Role::Editor => "Editor",
            Role::Admin => "Admin",
            Role::SuperAdmin => "Super Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "editor" => Ok(Role::Editor),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// An authenticated admin.  The configured super-admin never touches the
/// store.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    Stored { user: AdminUser, role: Role },
    ConfiguredSuperAdmin { email: String },
}

impl Principal {
    pub fn email(&self) -> &str {
        match self {
            Principal::Stored { user, .. } => &user.email,
            Principal::ConfiguredSuperAdmin { email } => email,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Principal::Stored { role, .. } => *role,
            Principal::ConfiguredSuperAdmin { .. } => Role::SuperAdmin,
        }
    }

    pub fn require(&self, required: Role) -> Result<(), ApiError> {
        if self.role().satisfies(required) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("{} access required", required.label())))
        }
    }

    pub fn profile(&self) -> PrincipalProfile {
        match self {
            Principal::Stored { user, role } => PrincipalProfile {
                email: user.email.clone(),
                name: user.name.clone(),
                picture: user.picture.clone(),
                role: *role,
            },
            Principal::ConfiguredSuperAdmin { email } => PrincipalProfile {
                email: email.clone(),
                name: None,
                picture: None,
                role: Role::SuperAdmin,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrincipalProfile {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed credential")]
    Malformed,

    #[error("credential signature mismatch")]
    BadSignature,

    #[error("credential expired")]
    Expired,

    #[error("identity rejected: {0}")]
    Identity(String),

    #[error("identity provider unreachable: {0}")]
    Provider(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Identity(_) => ApiError::Unauthorized("Invalid Google Token".into()),
            AuthError::Provider(e) => ApiError::unavailable(format!("identity provider: {}", e)),
            _ => ApiError::Unauthorized("Could not validate credentials".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 JWT issue and verification.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl_minutes: i64,
}

const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

impl TokenSigner {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl_minutes,
        }
    }

    fn mac(&self, signing_input: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| AuthError::Malformed)?;
        mac.update(signing_input.as_bytes());
        Ok(mac)
    }

    pub fn issue(&self, email: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        self.issue_claims(&Claims {
            sub: email.to_string(),
            iat: now,
            exp: now + self.ttl_minutes * 60,
        })
    }

    fn issue_claims(&self, claims: &Claims) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(claims).map_err(|_| AuthError::Malformed)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(JWT_HEADER),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = self.mac(&signing_input)?.finalize().into_bytes();
        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let header_json: serde_json::Value = URL_SAFE_NO_PAD
            .decode(header)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(AuthError::Malformed)?;
        if header_json.get("alg").and_then(|v| v.as_str()) != Some("HS256") {
            return Err(AuthError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::Malformed)?;
        self.mac(&format!("{}.{}", header, payload))?
            .verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(AuthError::Malformed)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}

/// Identity asserted by the external provider.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[async_trait::async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Validates Google ID tokens through the `tokeninfo` endpoint.  Without a
/// configured client id every token is rejected.
pub struct GoogleIdentityVerifier {
    client_id: Option<String>,
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenInfo {
    aud: Option<String>,
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<serde_json::Value>,
    name: Option<String>,
    picture: Option<String>,
}

impl GoogleIdentityVerifier {
    pub fn new(client_id: Option<String>) -> reqwest::Result<Self> {
        Self::with_endpoint(client_id, GOOGLE_TOKENINFO_URL)
    }

    pub fn with_endpoint(client_id: Option<String>, endpoint: &str) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client_id,
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl IdentityVerifier for GoogleIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let Some(client_id) = self.client_id.as_deref() else {
            return Err(AuthError::Identity("GOOGLE_CLIENT_ID not configured".into()));
        };
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("id_token", token)])
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AuthError::Identity(format!("tokeninfo status {}", resp.status())));
        }
        let info: TokenInfo = resp
            .json()
            .await
            .map_err(|e| AuthError::Identity(e.to_string()))?;

        if info.aud.as_deref() != Some(client_id) {
            return Err(AuthError::Identity("audience mismatch".into()));
        }
        let verified = match info.email_verified {
            Some(serde_json::Value::Bool(b)) => b,
            Some(serde_json::Value::String(s)) => s == "true",
            _ => false,
        };
        let email = info
            .email
            .filter(|_| verified)
            .ok_or_else(|| AuthError::Identity("email missing or unverified".into()))?;
        Ok(VerifiedIdentity {
            email: email.to_lowercase(),
            name: info.name,
            picture: info.picture,
        })
    }
}

/// `Authorization: Bearer <token>`, scheme case-insensitive.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let unauthorized = || ApiError::Unauthorized("Not authenticated".into());
    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;

    let Some((scheme, rest)) = raw.split_once(' ') else {
        return Err(unauthorized());
    };
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(unauthorized());
    }
    let token = rest.trim();
    if token.is_empty() {
        return Err(unauthorized());
    }
    Ok(token.to_string())
}

pub struct LoginOutcome {
    pub access_token: String,
    pub principal: Principal,
}

pub struct AuthService {
    signer: TokenSigner,
    identity: Arc<dyn IdentityVerifier>,
    super_admin_email: Option<String>,
}

impl AuthService {
    pub fn new(cfg: &AuthConfig, identity: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            signer: TokenSigner::new(&cfg.jwt_secret, cfg.token_ttl_minutes),
            identity,
            super_admin_email: cfg.super_admin_email.as_ref().map(|e| e.to_lowercase()),
        }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn is_super_admin_email(&self, email: &str) -> bool {
        self.super_admin_email
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case(email))
            .unwrap_or(false)
    }

    /// The configured super-admin resolves without a lookup; anyone else must
    /// be a stored, active principal.
    pub async fn resolve(&self, pool: &SqlitePool, email: &str) -> Result<Principal, ApiError> {
        if self.is_super_admin_email(email) {
            return Ok(Principal::ConfiguredSuperAdmin {
                email: email.to_lowercase(),
            });
        }
        let inactive = || ApiError::Forbidden("User not found or inactive".into());
        let user = match admins::get_admin_by_email(pool, email).await {
            Ok(user) => user,
            Err(StoreError::NotFound { .. }) => return Err(inactive()),
            Err(e) => return Err(e.into()),
        };
        if !user.is_active {
            return Err(inactive());
        }
        let role = user.role.parse::<Role>().map_err(|e| {
            tracing::warn!(email = %user.email, error = %e, "stored principal has unknown role");
            inactive()
        })?;
        Ok(Principal::Stored { user, role })
    }

    /// Exchange an identity token for a bearer credential.  Stored principals
    /// get their display name and avatar refreshed from the identity.
    pub async fn login(&self, pool: &SqlitePool, identity_token: &str) -> Result<LoginOutcome, ApiError> {
        let identity = self.identity.verify(identity_token).await?;
        let mut principal = self.resolve(pool, &identity.email).await?;
        if let Principal::Stored { user, .. } = &mut principal {
            admins::update_profile(
                pool,
                &user.email,
                identity.name.as_deref(),
                identity.picture.as_deref(),
            )
            .await?;
            if identity.name.is_some() {
                user.name = identity.name.clone();
            }
            if identity.picture.is_some() {
                user.picture = identity.picture.clone();
            }
        }
        let access_token = self.signer.issue(principal.email())?;
        tracing::info!(email = %principal.email(), role = %principal.role(), "admin login");
        Ok(LoginOutcome {
            access_token,
            principal,
        })
    }

    /// Resolve the bearer credential on an admin request.
    pub async fn authenticate(&self, pool: &SqlitePool, headers: &HeaderMap) -> Result<Principal, ApiError> {
        let token = extract_bearer_token(headers)?;
        let claims = self.signer.verify(&token)?;
        self.resolve(pool, &claims.sub).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_db;

    struct StaticIdentity(VerifiedIdentity);

    #[async_trait::async_trait]
    impl IdentityVerifier for StaticIdentity {
        async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
            if token == "good" {
                Ok(self.0.clone())
            } else {
                Err(AuthError::Identity("bad token".into()))
            }
        }
    }

    fn service(email: &str) -> AuthService {
        let cfg = AuthConfig {
            jwt_secret: "test-secret".into(),
            token_ttl_minutes: 60,
            super_admin_email: Some("root@example.com".into()),
            google_client_id: None,
        };
        AuthService::new(
            &cfg,
            Arc::new(StaticIdentity(VerifiedIdentity {
                email: email.into(),
                name: Some("Dana".into()),
                picture: Some("https://img/dana.png".into()),
            })),
        )
    }

    fn stored(role: Role) -> Principal {
        Principal::Stored {
            user: AdminUser {
                id: 1,
                email: "e@example.com".into(),
                name: None,
                picture: None,
                role: role.as_str().into(),
                is_active: true,
                created_at: "2025-01-01T00:00:00.000Z".into(),
            },
            role,
        }
    }

    #[test]
    fn role_order_is_total_and_monotone() {
        assert!(Role::Viewer < Role::Editor && Role::Editor < Role::Admin && Role::Admin < Role::SuperAdmin);
        assert_eq!(Role::Viewer.rank(), 1);
        assert_eq!(Role::SuperAdmin.rank(), 4);
        for r in [Role::Viewer, Role::Editor, Role::Admin, Role::SuperAdmin] {
            assert_eq!(r.as_str().parse::<Role>().unwrap(), r);
        }
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn editor_passes_lower_gates_only() {
        let editor = stored(Role::Editor);
        assert!(editor.require(Role::Viewer).is_ok());
        assert!(editor.require(Role::Editor).is_ok());
        assert!(editor.require(Role::Admin).is_err());
        let err = editor.require(Role::SuperAdmin).unwrap_err();
        assert_eq!(err.to_body().message, "Super Admin access required");
    }

    #[test]
    fn configured_super_admin_passes_every_gate() {
        let root = Principal::ConfiguredSuperAdmin {
            email: "root@example.com".into(),
        };
        for r in [Role::Viewer, Role::Editor, Role::Admin, Role::SuperAdmin] {
            assert!(root.require(r).is_ok());
        }
    }

    #[test]
    fn tokens_round_trip_and_reject_tampering() {
        let signer = TokenSigner::new("k", 5);
        let token = signer.issue("a@example.com").unwrap();
        assert_eq!(signer.verify(&token).unwrap().sub, "a@example.com");

        let other = TokenSigner::new("other", 5);
        assert!(matches!(other.verify(&token), Err(AuthError::BadSignature)));
        assert!(matches!(signer.verify("a.b"), Err(AuthError::Malformed)));

        let now = Utc::now().timestamp();
        let stale = signer
            .issue_claims(&Claims {
                sub: "a@example.com".into(),
                iat: now - 120,
                exp: now - 60,
            })
            .unwrap();
        assert!(matches!(signer.verify(&stale), Err(AuthError::Expired)));
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "bEaReR abc".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc");
        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn bearer_scheme_needs_a_separating_space() {
        let mut headers = HeaderMap::new();
        for bad in ["Bearerabc", "BearerX", "Bearer", "Bearer   ", "Bearer\tabc"] {
            headers.insert("authorization", bad.parse().unwrap());
            assert!(extract_bearer_token(&headers).is_err(), "{:?} accepted", bad);
        }
        headers.insert("authorization", "Bearer  padded ".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "padded");
    }

    #[tokio::test]
    async fn super_admin_resolves_without_store_row() {
        let db = test_db().await;
        let svc = service("root@example.com");
        let outcome = svc.login(db.pool(), "good").await.unwrap();
        assert!(matches!(outcome.principal, Principal::ConfiguredSuperAdmin { .. }));

        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            format!("Bearer {}", outcome.access_token).parse().unwrap(),
        );
        let principal = svc.authenticate(db.pool(), &headers).await.unwrap();
        assert_eq!(principal.role(), Role::SuperAdmin);
    }

    #[tokio::test]
    async fn login_refreshes_profile_and_rejects_inactive() {
        let db = test_db().await;
        let user = admins::create_admin(db.pool(), "dana@example.com", "editor")
            .await
            .unwrap();
        let svc = service("dana@example.com");

        let outcome = svc.login(db.pool(), "good").await.unwrap();
        let profile = outcome.principal.profile();
        assert_eq!(profile.role, Role::Editor);
        assert_eq!(profile.name.as_deref(), Some("Dana"));

        admins::deactivate_admin(db.pool(), user.id).await.unwrap();
        let err = svc.login(db.pool(), "good").await.err().unwrap();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);

        let err = svc.login(db.pool(), "bad").await.err().unwrap();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_identity_is_forbidden() {
        let db = test_db().await;
        let svc = service("stranger@example.com");
        let err = svc.login(db.pool(), "good").await.err().unwrap();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
    }
}
