use reqwest::Client;
use tracing::debug;

/// `GET http://<host>:<port>/version`. Returns the reported engine version
/// when the API answers with a success status.
pub async fn probe_version(client: &Client, host: &str, port: u16) -> Option<String> {
    let url = format!("http://{host}:{port}/version");
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(err) => {
            debug!("Engine health probe failed: {}", err);
            return None;
        }
    };
    if !response.status().is_success() {
        debug!("Engine health probe returned {}", response.status());
        return None;
    }
    let body = response.text().await.ok()?;
    Some(body.trim().trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    use super::*;
    use crate::core::http::build_probe_client;

    #[tokio::test]
    async fn reads_version_from_running_api() {
        let app = Router::new().route("/version", get(|| async { "\"0.25.0\"" }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = build_probe_client(Duration::from_secs(2)).unwrap();
        assert_eq!(
            probe_version(&client, "127.0.0.1", addr.port()).await.as_deref(),
            Some("0.25.0")
        );
    }

    #[tokio::test]
    async fn closed_port_is_unhealthy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = build_probe_client(Duration::from_secs(2)).unwrap();
        assert_eq!(probe_version(&client, "127.0.0.1", port).await, None);
    }
}
