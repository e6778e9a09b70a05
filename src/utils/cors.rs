use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
};

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET,HEAD,POST,OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type, x-api-key";
/// Preflight `Access-Control-Allow-Headers` when the browser named none.
pub const PREFLIGHT_ALLOW_HEADERS: &str = "Authorization";
pub const MAX_AGE_SECS: u64 = 86400;

/// Answers every `OPTIONS` request itself, so preflight never reaches
/// `ApiKeyAuth`. Allowed headers mirror `Access-Control-Request-Headers`.
pub fn preflight_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .max_age(Duration::from_secs(MAX_AGE_SECS))
}

fn overriding(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value))
}

fn if_not_present(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(name, HeaderValue::from_static(value))
}

/// Wrap `router` so preflight is answered up front and every response,
/// errors and 404s included, carries the permissive CORS headers.
pub fn apply(router: Router) -> Router {
    let max_age = HeaderValue::from(MAX_AGE_SECS);

    router
        // Regular responses only; preflight is answered by the layer above.
        .layer(if_not_present(header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOW_HEADERS))
        .layer(preflight_layer())
        .layer(if_not_present(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            PREFLIGHT_ALLOW_HEADERS,
        ))
        .layer(overriding(header::ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW_ORIGIN))
        .layer(overriding(header::ACCESS_CONTROL_ALLOW_METHODS, ALLOW_METHODS))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_MAX_AGE,
            max_age,
        ))
}
