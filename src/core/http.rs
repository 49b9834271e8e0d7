use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING};
use reqwest::redirect::Policy;
use reqwest::Client;

const APP_USER_AGENT: &str = concat!("Yomiage-EngineManager/", env!("CARGO_PKG_VERSION"));

/// Client used for archive downloads. Redirects are followed by the fetcher
/// itself so that the chain can be bounded and logged.
pub fn build_http_client(connect_timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .connect_timeout(connect_timeout)
        .redirect(Policy::none())
        .build()
}

/// Short-lived client for probing the local engine API.
pub fn build_probe_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(timeout)
        .no_proxy()
        .build()
}
