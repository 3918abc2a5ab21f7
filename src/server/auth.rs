//! Signed URLs and viewer tokens.
//!
//! # Signing Scheme
//!
//! Slice URLs and viewer tokens share one HMAC-SHA256 scheme over a scope
//! and its sorted query parameters (excluding `sig`):
//!
//! ```text
//! signature = HMAC-SHA256(secret_key, "{scope}?{canonical_query}")
//! ```
//!
//! For slice URLs the scope is the request path:
//!
//! ```text
//! /slices/42?exp=1735689600&sig=abc123...
//! ```
//!
//! Viewer tokens use the fixed scope `viewer` and travel form-encoded in the
//! `X-Astra-Viewer` header:
//!
//! ```text
//! uid=u-17&staff=0&sub=1767225600&sid=3f9c&exp=1735689600&sig=...
//! ```
//!
//! Requests without a token are anonymous and may carry an `X-Session-Id`
//! header for view counting.

use std::time::Duration;

use axum::{
    extract::{FromRequestParts, OriginalUri, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use url::form_urlencoded;

use super::handlers::{AppState, ErrorResponse};
use crate::policy::Viewer;

/// Header carrying a signed viewer token.
pub const VIEWER_HEADER: &str = "x-astra-viewer";

/// Header carrying an anonymous reader session.
pub const SESSION_HEADER: &str = "x-session-id";

/// Signing scope of viewer tokens.
const VIEWER_SCOPE: &str = "viewer";

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone)]
pub enum AuthError {
    /// Signature is missing from request
    MissingSignature,

    /// Expiry timestamp is missing from request
    MissingExpiry,

    Expired {
        expired_at: u64,
        current_time: u64,
    },

    InvalidSignature,

    /// Signature is not valid hex, or given twice
    InvalidSignatureFormat,

    InvalidExpiryFormat,

    /// Viewer token is missing a field or has a malformed one
    InvalidViewerToken(&'static str),

    /// Endpoint needs a signed-in viewer
    AuthenticationRequired,

    /// Endpoint needs a staff viewer
    StaffRequired,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingSignature => write!(f, "Missing signature parameter"),
            AuthError::MissingExpiry => write!(f, "Missing expiry parameter"),
            AuthError::Expired {
                expired_at,
                current_time,
            } => write!(
                f,
                "Signature expired at {} (current time: {})",
                expired_at, current_time
            ),
            AuthError::InvalidSignature => write!(f, "Invalid signature"),
            AuthError::InvalidSignatureFormat => write!(f, "Invalid signature format"),
            AuthError::InvalidExpiryFormat => write!(f, "Invalid expiry format"),
            AuthError::InvalidViewerToken(field) => write!(f, "Invalid viewer token: {}", field),
            AuthError::AuthenticationRequired => write!(f, "Sign in to continue"),
            AuthError::StaffRequired => write!(f, "Staff access required"),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AuthError::MissingSignature => (StatusCode::UNAUTHORIZED, "missing_signature"),
            AuthError::MissingExpiry => (StatusCode::UNAUTHORIZED, "missing_expiry"),
            AuthError::Expired { .. } => (StatusCode::UNAUTHORIZED, "signature_expired"),
            AuthError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            AuthError::InvalidSignatureFormat => {
                (StatusCode::BAD_REQUEST, "invalid_signature_format")
            }
            AuthError::InvalidExpiryFormat => (StatusCode::BAD_REQUEST, "invalid_expiry_format"),
            AuthError::InvalidViewerToken(_) => (StatusCode::UNAUTHORIZED, "invalid_viewer_token"),
            AuthError::AuthenticationRequired => {
                (StatusCode::UNAUTHORIZED, "authentication_required")
            }
            AuthError::StaffRequired => (StatusCode::FORBIDDEN, "staff_required"),
        };
        let message = self.to_string();

        // A bad signature may be tampering; everything else is routine
        match &self {
            AuthError::InvalidSignature | AuthError::StaffRequired => {
                warn!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Authentication failed: {}",
                    message
                );
            }
            _ => {
                debug!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Authentication failed: {}",
                    message
                );
            }
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Signed URL Authentication
// =============================================================================

/// HMAC-SHA256 signer for slice URLs and viewer tokens.
#[derive(Clone)]
pub struct SignedUrlAuth {
    secret_key: Vec<u8>,
}

impl std::fmt::Debug for SignedUrlAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedUrlAuth").finish_non_exhaustive()
    }
}

/// Claims of a viewer token, as minted by the account service or `sign`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerClaims {
    pub user_id: String,
    pub is_staff: bool,
    /// Subscription end, Unix seconds
    pub subscription_until: Option<i64>,
    pub session_id: Option<String>,
}

impl SignedUrlAuth {
    pub fn new(secret_key: impl AsRef<[u8]>) -> Self {
        Self {
            secret_key: secret_key.as_ref().to_vec(),
        }
    }

    /// Sign `scope` with extra parameters; returns `(signature, expiry)`.
    ///
    /// `params` must not contain `exp` or `sig`.
    pub fn sign_with_params(
        &self,
        scope: &str,
        ttl: Duration,
        params: &[(&str, &str)],
    ) -> (String, u64) {
        let expiry = now_secs().saturating_add(ttl.as_secs());
        (self.compute_signature(scope, expiry, params), expiry)
    }

    pub fn sign_with_expiry_and_params(
        &self,
        scope: &str,
        expiry: u64,
        params: &[(&str, &str)],
    ) -> String {
        self.compute_signature(scope, expiry, params)
    }

    /// Check a signature and its expiry.
    pub fn verify(
        &self,
        scope: &str,
        signature: &str,
        expiry: u64,
        params: &[(&str, &str)],
    ) -> Result<(), AuthError> {
        let current_time = now_secs();
        if current_time > expiry {
            return Err(AuthError::Expired {
                expired_at: expiry,
                current_time,
            });
        }

        let provided = hex::decode(signature).map_err(|_| AuthError::InvalidSignatureFormat)?;
        let expected = self.signature_bytes(scope, expiry, params);

        if provided.ct_eq(&expected).into() {
            Ok(())
        } else {
            Err(AuthError::InvalidSignature)
        }
    }

    /// A path with `exp` and `sig` appended, valid for `ttl`.
    pub fn signed_path(&self, path: &str, ttl: Duration) -> String {
        let (signature, expiry) = self.sign_with_params(path, ttl, &[]);
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("exp", &expiry.to_string())
            .append_pair("sig", &signature)
            .finish();
        format!("{}?{}", path, query)
    }

    /// Mint a viewer token valid for `ttl`.
    pub fn sign_viewer(&self, claims: &ViewerClaims, ttl: Duration) -> String {
        let staff = if claims.is_staff { "1" } else { "0" };
        let sub = claims.subscription_until.map(|s| s.to_string());

        let mut params: Vec<(&str, &str)> = vec![("uid", claims.user_id.as_str()), ("staff", staff)];
        if let Some(ref sub) = sub {
            params.push(("sub", sub.as_str()));
        }
        if let Some(ref sid) = claims.session_id {
            params.push(("sid", sid.as_str()));
        }

        let (signature, expiry) = self.sign_with_params(VIEWER_SCOPE, ttl, &params);
        let expiry = expiry.to_string();

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &params {
            serializer.append_pair(key, value);
        }
        serializer
            .append_pair("exp", &expiry)
            .append_pair("sig", &signature)
            .finish()
    }

    /// Verify a viewer token and turn it into a [`Viewer`].
    pub fn verify_viewer(&self, token: &str) -> Result<Viewer, AuthError> {
        let parsed = parse_signed_query(token)?;

        let mut user_id = None;
        let mut is_staff = false;
        let mut subscription_until = None;
        let mut session_id = None;
        for (key, value) in &parsed.params {
            match key.as_str() {
                "uid" if !value.is_empty() => user_id = Some(value.clone()),
                "staff" => {
                    is_staff = match value.as_str() {
                        "1" => true,
                        "0" => false,
                        _ => return Err(AuthError::InvalidViewerToken("staff")),
                    }
                }
                "sub" => {
                    let secs = value
                        .parse::<i64>()
                        .map_err(|_| AuthError::InvalidViewerToken("sub"))?;
                    subscription_until = Some(
                        DateTime::<Utc>::from_timestamp(secs, 0)
                            .ok_or(AuthError::InvalidViewerToken("sub"))?,
                    );
                }
                "sid" if !value.is_empty() => session_id = Some(value.clone()),
                _ => {}
            }
        }
        let user_id = user_id.ok_or(AuthError::InvalidViewerToken("uid"))?;

        let params: Vec<(&str, &str)> = parsed
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.verify(VIEWER_SCOPE, &parsed.signature, parsed.expiry, &params)?;

        Ok(Viewer {
            user_id: Some(user_id),
            is_staff,
            subscription_active_until: subscription_until,
            session_id,
        })
    }

    fn signature_bytes(&self, scope: &str, expiry: u64, params: &[(&str, &str)]) -> Vec<u8> {
        let message = signature_base(scope, expiry, params);
        let mut mac =
            HmacSha256::new_from_slice(&self.secret_key).expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    fn compute_signature(&self, scope: &str, expiry: u64, params: &[(&str, &str)]) -> String {
        hex::encode(self.signature_bytes(scope, expiry, params))
    }
}

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

fn signature_base(scope: &str, expiry: u64, params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    pairs.push(("exp".to_string(), expiry.to_string()));
    pairs.sort();

    let canonical = pairs
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", scope, canonical)
}

/// A query split into `sig`, `exp` and everything else.
struct SignedQuery {
    signature: String,
    expiry: u64,
    params: Vec<(String, String)>,
}

fn parse_signed_query(query: &str) -> Result<SignedQuery, AuthError> {
    let mut signature: Option<String> = None;
    let mut expiry: Option<u64> = None;
    let mut params: Vec<(String, String)> = Vec::new();

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "sig" => {
                if signature.is_some() {
                    return Err(AuthError::InvalidSignatureFormat);
                }
                signature = Some(value.into_owned());
            }
            "exp" => {
                if expiry.is_some() {
                    return Err(AuthError::InvalidExpiryFormat);
                }
                expiry = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| AuthError::InvalidExpiryFormat)?,
                );
            }
            _ => params.push((key.into_owned(), value.into_owned())),
        }
    }

    Ok(SignedQuery {
        signature: signature.ok_or(AuthError::MissingSignature)?,
        expiry: expiry.ok_or(AuthError::MissingExpiry)?,
        params,
    })
}

// =============================================================================
// Axum Middleware & Extractors
// =============================================================================

/// Reject requests whose URL is not signed for its own path.
pub async fn auth_middleware(
    State(auth): State<SignedUrlAuth>,
    OriginalUri(original_uri): OriginalUri,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let parsed = parse_signed_query(original_uri.query().unwrap_or(""))?;
    let params: Vec<(&str, &str)> = parsed
        .params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    auth.verify(original_uri.path(), &parsed.signature, parsed.expiry, &params)?;
    Ok(next.run(request).await)
}

/// The viewer behind a request: token holder or anonymous session.
#[derive(Debug, Clone)]
pub struct CurrentViewer(pub Viewer);

impl FromRequestParts<AppState> for CurrentViewer {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let Some(token) = parts.headers.get(VIEWER_HEADER) else {
            return Ok(CurrentViewer(Viewer::anonymous(session)));
        };
        let token = token
            .to_str()
            .map_err(|_| AuthError::InvalidViewerToken("encoding"))?;

        let mut viewer = state.auth.verify_viewer(token)?;
        if viewer.session_id.is_none() {
            viewer.session_id = session;
        }
        Ok(CurrentViewer(viewer))
    }
}

/// A signed-in viewer and their account id.
#[derive(Debug, Clone)]
pub struct AccountViewer {
    pub user_id: String,
    pub viewer: Viewer,
}

impl FromRequestParts<AppState> for AccountViewer {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentViewer(viewer) = CurrentViewer::from_request_parts(parts, state).await?;
        let user_id = viewer
            .user_id
            .clone()
            .ok_or(AuthError::AuthenticationRequired)?;
        Ok(AccountViewer { user_id, viewer })
    }
}

/// A staff viewer, required by the admin endpoints.
#[derive(Debug, Clone)]
pub struct StaffViewer(pub Viewer);

impl FromRequestParts<AppState> for StaffViewer {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AccountViewer { viewer, .. } = AccountViewer::from_request_parts(parts, state).await?;
        if !viewer.is_staff {
            return Err(AuthError::StaffRequired);
        }
        Ok(StaffViewer(viewer))
    }
}
