use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Build a CORS layer from the `TOOLGATE_CORS_ORIGINS` env var.
///
/// - Origins: comma-separated list; unset, empty or `*` allows any origin
/// - Methods: GET, POST, OPTIONS
/// - Headers: Content-Type
/// - Max age: 3600s
pub fn build_cors_layer() -> CorsLayer {
    cors_layer_for(std::env::var("TOOLGATE_CORS_ORIGINS").ok().as_deref())
}

fn cors_layer_for(origins: Option<&str>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(allowed_origins(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([HeaderName::from_static("content-type")])
        .max_age(std::time::Duration::from_secs(3600))
}

fn allowed_origins(origins: Option<&str>) -> AllowOrigin {
    let origin_values: Vec<&str> = origins
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if origin_values.is_empty() || origin_values.contains(&"*") {
        return Any.into();
    }

    let origins: Vec<HeaderValue> = origin_values
        .into_iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    origins.into()
}
