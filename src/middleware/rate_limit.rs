use std::{
    future::{ready, Ready},
    sync::Arc,
    time::{Duration, Instant},
};

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{
        header::{HeaderName, HeaderValue},
        StatusCode,
    },
    Error,
};
use dashmap::DashMap;
use futures::future::LocalBoxFuture;

use crate::error::AppError;

const LIMIT_EXCEEDED: &str = "To many request from this IP, please try again after a hours";
const PURGE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    hits: u32,
}

/// Outcome of counting one request against its client's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_secs: u64,
}

/// Fixed-window request counter keyed by client address.
///
/// Clones share the same counters, so one limiter can be handed to every worker.
#[derive(Clone)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    windows: Arc<DashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            windows: Arc::new(DashMap::new()),
        }
    }

    pub fn check(&self, client: &str) -> Decision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> Decision {
        if self.windows.len() > PURGE_THRESHOLD {
            let window = self.window;
            self.windows
                .retain(|_, entry| now.duration_since(entry.started) < window);
        }

        let mut entry = self
            .windows
            .entry(client.to_string())
            .or_insert(Window { started: now, hits: 0 });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window { started: now, hits: 0 };
        }
        entry.hits = entry.hits.saturating_add(1);

        let elapsed = now.duration_since(entry.started);
        Decision {
            allowed: entry.hits <= self.max,
            remaining: self.max.saturating_sub(entry.hits),
            reset_secs: self.window.saturating_sub(elapsed).as_secs(),
        }
    }

    fn policy(&self) -> String {
        format!("{};w={}", self.max, self.window.as_secs())
    }
}

fn client_key(req: &ServiceRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn set_headers<B>(res: &mut ServiceResponse<B>, limiter: &RateLimiter, decision: Decision) {
    let headers = [
        (
            "ratelimit",
            format!(
                "limit={}, remaining={}, reset={}",
                limiter.max, decision.remaining, decision.reset_secs
            ),
        ),
        ("ratelimit-policy", limiter.policy()),
    ];
    for (name, value) in headers {
        if let Ok(value) = HeaderValue::from_str(&value) {
            res.headers_mut().insert(HeaderName::from_static(name), value);
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimiter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitService {
            service,
            limiter: self.clone(),
        }))
    }
}

pub struct RateLimitService<S> {
    service: S,
    limiter: RateLimiter,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let client = client_key(&req);
        let decision = self.limiter.check(&client);
        let limiter = self.limiter.clone();

        if !decision.allowed {
            log::warn!("rate limit exceeded for {} on {}", client, req.path());
            let err = AppError::new(LIMIT_EXCEEDED, StatusCode::TOO_MANY_REQUESTS);
            let mut res = req.error_response(err);
            set_headers(&mut res, &limiter, decision);
            return Box::pin(async move { Ok(res.map_into_right_body()) });
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let mut res = fut.await?;
            set_headers(&mut res, &limiter, decision);
            Ok(res.map_into_left_body())
        })
    }
}
