/// HTTP middleware for distribution-service
///
/// Viewer identity comes from the gateway (`x-user-id`) or, for anonymous
/// traffic, from the client address. `X-Forwarded-For` only counts when the
/// socket peer is a configured proxy. Admin, cron and internal routes are
/// guarded by static bearer secrets.
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{web, Error, FromRequest, HttpRequest};
use futures::future::LocalBoxFuture;
use sha2::{Digest, Sha256};
use std::future::{ready, Ready};
use std::net::IpAddr;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Viewer;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

// =====================================================================
// Viewer identity
// =====================================================================

/// Reverse proxies allowed to report the client address
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(Arc<Vec<IpAddr>>);

impl TrustedProxies {
    pub fn new(proxies: Vec<IpAddr>) -> Self {
        Self(Arc::new(proxies))
    }

    fn contains(&self, addr: &IpAddr) -> bool {
        self.0.contains(addr)
    }

    /// The socket peer, unless it is a trusted proxy. Then the rightmost
    /// `X-Forwarded-For` hop that is not itself a trusted proxy.
    pub fn client_addr(&self, req: &HttpRequest) -> Option<IpAddr> {
        let peer = req.peer_addr()?.ip();
        if !self.contains(&peer) {
            return Some(peer);
        }

        let hops: Vec<&str> = req
            .headers()
            .get_all(FORWARDED_FOR_HEADER)
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .collect();

        let mut client = peer;
        for hop in hops.into_iter().rev() {
            let Ok(addr) = hop.parse::<IpAddr>() else {
                break;
            };
            client = addr;
            if !self.contains(&addr) {
                break;
            }
        }
        Some(client)
    }
}

impl FromRequest for Viewer {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        ready(viewer_from_request(req).map_err(Error::from))
    }
}

fn viewer_from_request(req: &HttpRequest) -> Result<Viewer, AppError> {
    let user_id = match req.headers().get(USER_ID_HEADER) {
        None => None,
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| AppError::Unauthorized("malformed x-user-id header".into()))?;
            let id = Uuid::parse_str(raw.trim())
                .map_err(|_| AppError::Unauthorized("x-user-id is not a valid UUID".into()))?;
            Some(id)
        }
    };

    let client_addr = match req.app_data::<web::Data<TrustedProxies>>() {
        Some(proxies) => proxies.client_addr(req),
        None => TrustedProxies::default().client_addr(req),
    };
    let client_addr = client_addr.map(|addr| addr.to_string());
    Ok(Viewer::new(user_id, client_addr.as_deref()))
}

// =====================================================================
// Bearer secret guard
// =====================================================================

/// Requires `Authorization: Bearer <secret>`. An empty configured secret
/// rejects every request.
#[derive(Clone)]
pub struct BearerSecretAuth {
    secret: Arc<String>,
    realm: &'static str,
}

impl BearerSecretAuth {
    pub fn new(secret: impl Into<String>, realm: &'static str) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            realm,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BearerSecretAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = BearerSecretAuthService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BearerSecretAuthService {
            service: Rc::new(service),
            secret: self.secret.clone(),
            realm: self.realm,
        }))
    }
}

pub struct BearerSecretAuthService<S> {
    service: Rc<S>,
    secret: Arc<String>,
    realm: &'static str,
}

impl<S, B> Service<ServiceRequest> for BearerSecretAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let secret = self.secret.clone();
        let realm = self.realm;

        Box::pin(async move {
            let token = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .ok_or_else(|| AppError::Unauthorized(format!("missing {} credentials", realm)))?;

            if !secret_matches(&secret, token) {
                tracing::warn!(realm, path = %req.path(), "rejected bearer credentials");
                return Err(AppError::Unauthorized(format!("invalid {} credentials", realm)).into());
            }

            service.call(req).await
        })
    }
}

/// Compares digests so timing does not depend on where the inputs differ
fn secret_matches(expected: &str, presented: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    Sha256::digest(expected.as_bytes()) == Sha256::digest(presented.as_bytes())
}
