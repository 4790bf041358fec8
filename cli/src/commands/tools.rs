use crate::util::api_request;

/// Print the gateway's tool manifest.
pub async fn run(api_url: &str, raw: bool) -> i32 {
    api_request(api_url, reqwest::Method::GET, "/.well-known/mcp", None, raw).await
}
