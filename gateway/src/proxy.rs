//! Same-origin forwarding routes.
//!
//! Both forwarding routes are blind: the payload is never parsed and the
//! upstream's status and body come back untouched. Only failures to reach
//! the upstream at all are turned into a fixed 500 body.

use crate::config::UpstreamConfig;
use crate::metrics::ProxyMetrics;
use crate::upstream::{ForwardError, OutboundRequest, Upstream};
use actix_web::http::header::{self, HeaderValue};
use actix_web::http::{Method, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const ANY: &str = "*";
const KEY_UPDATE_METHODS: &str = "POST, OPTIONS";
const PROXY_FAILURE: &str = "Proxy request failed";
const KEY_UPDATE_FAILURE: &str = "API key update failed";

pub struct ProxyState {
    pub upstream: Arc<dyn Upstream>,
    pub default_route: String,
    pub key_update_route: String,
    pub metrics: Arc<ProxyMetrics>,
}

impl ProxyState {
    pub fn new(upstream: Arc<dyn Upstream>, config: &UpstreamConfig) -> Self {
        Self {
            upstream,
            default_route: config.default_route.clone(),
            key_update_route: config.key_update_route.clone(),
            metrics: Arc::new(ProxyMetrics::new()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    path: Option<String>,
}

struct Relay<'a> {
    route: &'static str,
    allow_methods: &'static str,
    failure: &'static str,
    path: String,
    authorization: Option<Vec<u8>>,
    method: &'a Method,
    body: web::Bytes,
}

impl Relay<'_> {
    fn outbound(&self) -> Result<OutboundRequest, ForwardError> {
        let method = reqwest::Method::from_bytes(self.method.as_str().as_bytes())
            .map_err(|_| ForwardError::Method(self.method.to_string()))?;
        let body = if method == reqwest::Method::GET {
            None
        } else {
            Some(self.body.to_vec())
        };
        Ok(OutboundRequest {
            method,
            path: self.path.clone(),
            authorization: self.authorization.clone(),
            body,
        })
    }
}

fn allow_cross_origin(builder: &mut HttpResponseBuilder, methods: &'static str) {
    builder
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, ANY))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, methods))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, ANY));
}

async fn relay(state: &ProxyState, relay: Relay<'_>) -> HttpResponse {
    let request_id = Uuid::new_v4();

    log::info!(
        "[{}] {} {} -> upstream {}",
        request_id,
        relay.method,
        relay.route,
        relay.path
    );
    state.metrics.record_forward(relay.route);
    let started = Instant::now();

    let outcome = match relay.outbound() {
        Ok(request) => state.upstream.forward(request).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(reply) => {
            let elapsed = started.elapsed();
            log::debug!(
                "[{}] upstream answered {} in {:?}",
                request_id,
                reply.status,
                elapsed
            );
            state.metrics.record_response(relay.route, reply.status, elapsed);

            let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut response = HttpResponse::build(status);
            response.insert_header((header::CONTENT_TYPE, "application/json"));
            allow_cross_origin(&mut response, relay.allow_methods);
            response.body(reply.body)
        }
        Err(e) => {
            log::error!("[{}] Forwarding to upstream failed: {}", request_id, e);
            state.metrics.record_failure(relay.route);
            failure(relay.allow_methods, relay.failure)
        }
    }
}

fn failure(allow_methods: &'static str, message: &'static str) -> HttpResponse {
    let mut response = HttpResponse::InternalServerError();
    allow_cross_origin(&mut response, allow_methods);
    response.json(json!({ "error": message }))
}

/// `/api/proxy`: any method, upstream route taken from `?path=`.
pub async fn forward(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<ProxyState>,
) -> HttpResponse {
    let path = web::Query::<ProxyQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().path)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| state.default_route.clone());

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v: &HeaderValue| v.as_bytes().to_vec());

    relay(
        &state,
        Relay {
            route: "proxy",
            allow_methods: ANY,
            failure: PROXY_FAILURE,
            path,
            authorization,
            method: req.method(),
            body,
        },
    )
    .await
}

/// `/api/gi`: POST to the fixed key-update route. Caller credentials are
/// not passed on.
pub async fn key_update(body: web::Bytes, state: web::Data<ProxyState>) -> HttpResponse {
    let path = state.key_update_route.clone();
    relay(
        &state,
        Relay {
            route: "gi",
            allow_methods: KEY_UPDATE_METHODS,
            failure: KEY_UPDATE_FAILURE,
            path,
            authorization: None,
            method: &Method::POST,
            body,
        },
    )
    .await
}

pub async fn preflight() -> HttpResponse {
    let mut response = HttpResponse::Ok();
    allow_cross_origin(&mut response, ANY);
    response.finish()
}

pub async fn key_update_preflight() -> HttpResponse {
    let mut response = HttpResponse::Ok();
    allow_cross_origin(&mut response, KEY_UPDATE_METHODS);
    response.finish()
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

pub async fn metrics(state: web::Data<ProxyState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.metrics.export())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/proxy")
            .route(web::method(Method::OPTIONS).to(preflight))
            .route(web::route().to(forward)),
    )
    .service(
        web::resource("/api/gi")
            .route(web::post().to(key_update))
            .route(web::method(Method::OPTIONS).to(key_update_preflight)),
    )
    .route("/health", web::get().to(health))
    .route("/metrics", web::get().to(metrics));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamReply;
    use actix_web::dev::ServiceResponse;
    use actix_web::{test, App};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingUpstream {
        seen: Mutex<Vec<OutboundRequest>>,
        reply: Option<UpstreamReply>,
    }

    impl RecordingUpstream {
        fn answering(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                reply: Some(UpstreamReply {
                    status,
                    body: body.as_bytes().to_vec(),
                }),
            })
        }

        fn unreachable() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                reply: None,
            })
        }

        fn seen(&self) -> Vec<OutboundRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Upstream for RecordingUpstream {
        async fn forward(&self, request: OutboundRequest) -> Result<UpstreamReply, ForwardError> {
            self.seen.lock().unwrap().push(request);
            match self.reply {
                Some(ref reply) => Ok(reply.clone()),
                None => Err(ForwardError::Unreachable("connection refused".into())),
            }
        }
    }

    fn state_for(upstream: &Arc<RecordingUpstream>) -> web::Data<ProxyState> {
        let upstream: Arc<dyn Upstream> = upstream.clone();
        web::Data::new(ProxyState::new(upstream, &UpstreamConfig::default()))
    }

    fn header_of<'a, B>(resp: &'a ServiceResponse<B>, name: &str) -> Option<&'a str> {
        resp.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[actix_web::test]
    async fn test_rejected_login_is_relayed_with_cors() {
        let upstream = RecordingUpstream::answering(401, r#"{"detail":"bad credentials"}"#);
        let app = test::init_service(
            App::new().app_data(state_for(&upstream)).configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/proxy?path=/auth/login")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload(r#"{"email":"a@b.com","password":"x"}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(header_of(&resp, "access-control-allow-origin"), Some("*"));
        assert_eq!(header_of(&resp, "access-control-allow-methods"), Some("*"));
        assert_eq!(header_of(&resp, "access-control-allow-headers"), Some("*"));
        let body = test::read_body(resp).await;
        assert_eq!(&body[..], br#"{"detail":"bad credentials"}"#);

        let seen = upstream.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, reqwest::Method::POST);
        assert_eq!(seen[0].path, "/auth/login");
    }

    #[actix_web::test]
    async fn test_malformed_body_is_forwarded_byte_for_byte() {
        let upstream = RecordingUpstream::answering(422, "not json at all");
        let app = test::init_service(
            App::new().app_data(state_for(&upstream)).configure(configure),
        )
        .await;

        let payload: &[u8] = b"{\"email\": \"a@b.com\", \"password\": ";
        let req = test::TestRequest::put()
            .uri("/api/proxy?path=/api/v1/diagnosis/3")
            .set_payload(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(&test::read_body(resp).await[..], b"not json at all");
        let seen = upstream.seen();
        assert_eq!(seen[0].method, reqwest::Method::PUT);
        assert_eq!(seen[0].body.as_deref(), Some(payload));
    }

    #[actix_web::test]
    async fn test_only_authorization_is_forwarded() {
        let upstream = RecordingUpstream::answering(200, "[]");
        let app = test::init_service(
            App::new().app_data(state_for(&upstream)).configure(configure),
        )
        .await;

        let with_auth = test::TestRequest::get()
            .uri("/api/proxy?path=/api/v1/diagnosis")
            .insert_header((header::AUTHORIZATION, "Bearer xyz"))
            .insert_header(("x-forwarded-for", "10.0.0.1"))
            .to_request();
        test::call_service(&app, with_auth).await;

        let without_auth = test::TestRequest::get()
            .uri("/api/proxy?path=/api/v1/diagnosis")
            .to_request();
        test::call_service(&app, without_auth).await;

        let seen = upstream.seen();
        assert_eq!(seen[0].authorization.as_deref(), Some(&b"Bearer xyz"[..]));
        assert_eq!(seen[0].body, None);
        assert_eq!(seen[1].authorization, None);
    }

    #[actix_web::test]
    async fn test_non_ascii_authorization_is_forwarded_verbatim() {
        let upstream = RecordingUpstream::answering(200, "{}");
        let app = test::init_service(
            App::new().app_data(state_for(&upstream)).configure(configure),
        )
        .await;

        let raw: &[u8] = b"Bearer caf\xe9";
        let req = test::TestRequest::get()
            .uri("/api/proxy?path=/api/v1/diagnosis")
            .insert_header((header::AUTHORIZATION, HeaderValue::from_bytes(raw).unwrap()))
            .to_request();
        test::call_service(&app, req).await;

        assert_eq!(upstream.seen()[0].authorization.as_deref(), Some(raw));
    }

    #[actix_web::test]
    async fn test_missing_path_uses_default_route() {
        let upstream = RecordingUpstream::answering(200, "{}");
        let app = test::init_service(
            App::new().app_data(state_for(&upstream)).configure(configure),
        )
        .await;

        for uri in ["/api/proxy", "/api/proxy?path="] {
            let req = test::TestRequest::post().uri(uri).set_payload("{}").to_request();
            test::call_service(&app, req).await;
        }

        let seen = upstream.seen();
        assert!(seen.iter().all(|r| r.path == common::DEFAULT_PROXY_ROUTE));
    }

    #[actix_web::test]
    async fn test_unreachable_upstream_becomes_fixed_500() {
        let upstream = RecordingUpstream::unreachable();
        let state = state_for(&upstream);
        let app = test::init_service(
            App::new().app_data(state.clone()).configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/proxy?path=/auth/login")
            .set_payload("{}")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header_of(&resp, "access-control-allow-origin"), Some("*"));
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"error": "Proxy request failed"}));
        assert!(state
            .metrics
            .export()
            .contains("medrag_gateway_failures_total{route=\"proxy\"} 1"));
    }

    #[actix_web::test]
    async fn test_preflight_is_empty_200() {
        let upstream = RecordingUpstream::answering(200, "{}");
        let app = test::init_service(
            App::new().app_data(state_for(&upstream)).configure(configure),
        )
        .await;

        let req = test::TestRequest::default()
            .method(Method::OPTIONS)
            .uri("/api/proxy?path=/auth/login")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(header_of(&resp, "access-control-allow-methods"), Some("*"));
        assert!(test::read_body(resp).await.is_empty());
        assert!(upstream.seen().is_empty());
    }

    #[actix_web::test]
    async fn test_key_update_uses_fixed_route_without_credentials() {
        let upstream = RecordingUpstream::answering(200, r#"{"ok":true}"#);
        let app = test::init_service(
            App::new().app_data(state_for(&upstream)).configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/gi?path=/admin")
            .insert_header((header::AUTHORIZATION, "Bearer xyz"))
            .set_payload(r#"{"key":"sk-new"}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(header_of(&resp, "access-control-allow-methods"), Some("POST, OPTIONS"));
        let seen = upstream.seen();
        assert_eq!(seen[0].path, "/gi");
        assert_eq!(seen[0].authorization, None);
        assert_eq!(seen[0].body.as_deref(), Some(&br#"{"key":"sk-new"}"#[..]));
    }

    #[actix_web::test]
    async fn test_key_update_failure_body() {
        let upstream = RecordingUpstream::unreachable();
        let app = test::init_service(
            App::new().app_data(state_for(&upstream)).configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/gi").set_payload("{}").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"error": "API key update failed"}));
    }

    #[actix_web::test]
    async fn test_health() {
        let upstream = RecordingUpstream::unreachable();
        let app = test::init_service(
            App::new().app_data(state_for(&upstream)).configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"status": "ok"}));
        assert!(upstream.seen().is_empty());
    }
}
