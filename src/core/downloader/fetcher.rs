use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::LOCATION;
use reqwest::{Client, StatusCode, Url};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::core::error::{EngineError, EngineResult};
use crate::core::events::{ProgressEvent, Reporter};
use crate::core::http::build_http_client;

pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Streams remote archive parts to disk.
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    client: Client,
    max_redirects: usize,
    read_timeout: Duration,
}

impl ArchiveFetcher {
    pub fn new(
        connect_timeout: Duration,
        read_timeout: Duration,
        max_redirects: usize,
    ) -> EngineResult<Self> {
        Ok(Self {
            client: build_http_client(connect_timeout)?,
            max_redirects,
            read_timeout,
        })
    }

    pub fn with_max_redirects(mut self, n: usize) -> Self {
        self.max_redirects = n;
        self
    }

    /// Download `url` into `dest`, following up to `max_redirects` redirects.
    ///
    /// The destination is only created once a success response arrives and is
    /// deleted again on any failure, so no partial file survives an error.
    #[instrument(skip(self, reporter))]
    pub async fn fetch(&self, url: &str, dest: &Path, reporter: &Reporter) -> EngineResult<PathBuf> {
        reporter.log(format!("Downloading: {url}"));
        let file_name = file_name_from_url(url);

        match self.fetch_inner(url, dest, &file_name, reporter).await {
            Ok(()) => {
                reporter.log(format!("Downloaded: {file_name}"));
                Ok(dest.to_path_buf())
            }
            Err(err) => {
                discard_partial(dest).await;
                reporter.log(format!("Download failed: {file_name}: {err}"));
                Err(err)
            }
        }
    }

    async fn fetch_inner(
        &self,
        url: &str,
        dest: &Path,
        file_name: &str,
        reporter: &Reporter,
    ) -> EngineResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| EngineError::io(parent, source))?;
        }

        let mut current = Url::parse(url)
            .map_err(|err| EngineError::Other(format!("Invalid download URL {url}: {err}")))?;
        let mut redirects = 0usize;

        let response = loop {
            let response = self.client.get(current.clone()).send().await?;
            let status = response.status();

            if status.is_redirection() && status != StatusCode::NOT_MODIFIED {
                let next = redirect_target(&current, &response)?;
                redirects += 1;
                if redirects > self.max_redirects {
                    return Err(EngineError::TooManyRedirects {
                        url: url.to_string(),
                        limit: self.max_redirects,
                    });
                }
                debug!("Redirect {} -> {} ({})", current, next, status);
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(EngineError::DownloadFailed {
                    url: current.to_string(),
                    status: status.as_u16(),
                });
            }

            break response;
        };

        let total_size = response.content_length().filter(|len| *len > 0);
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| EngineError::io(dest, source))?;

        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;
        loop {
            let next = tokio::time::timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| EngineError::Timeout {
                    url: current.to_string(),
                    secs: self.read_timeout.as_secs(),
                })?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|source| EngineError::io(dest, source))?;

            downloaded = downloaded.saturating_add(chunk.len() as u64);
            reporter.progress(ProgressEvent::Download {
                file: file_name.to_string(),
                progress: percentage(downloaded, total_size),
                downloaded_size: downloaded,
                total_size,
            });
        }

        file.flush()
            .await
            .map_err(|source| EngineError::io(dest, source))?;
        // handle dropped before returning so the path can be moved or deleted on Windows
        drop(file);

        debug!("Downloaded: {} -> {:?} ({} bytes)", current, dest, downloaded);
        Ok(())
    }
}

fn redirect_target(current: &Url, response: &reqwest::Response) -> EngineResult<Url> {
    let missing = || EngineError::MissingRedirectLocation {
        url: current.to_string(),
        status: response.status().as_u16(),
    };
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(missing)?;
    current.join(location).map_err(|_| missing())
}

async fn discard_partial(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => debug!("Removed partial download {:?}", dest),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("Could not remove partial download {:?}: {}", dest, err),
    }
}

fn percentage(downloaded: u64, total: Option<u64>) -> f64 {
    match total {
        Some(total) => (downloaded as f64 / total as f64 * 100.0).min(100.0),
        None => 0.0,
    }
}

/// Last path segment of a URL, used as the logical file name in progress
/// events and as the staging file name.
pub fn file_name_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("download")
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    use super::*;
    use crate::core::events::testing::Recorder;

    const BODY: &[u8] = b"7z-part-payload-0123456789";

    async fn payload() -> impl IntoResponse {
        (StatusCode::OK, [(header::CONTENT_LENGTH, BODY.len().to_string())], BODY.to_vec())
    }

    async fn start_server() -> SocketAddr {
        let app = Router::new()
            .route("/file.7z.001", get(payload))
            .route(
                "/moved",
                get(|| async { (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/file.7z.001")]) }),
            )
            .route(
                "/found",
                get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/moved")]) }),
            )
            .route(
                "/loop",
                get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/loop")]) }),
            )
            .route(
                "/no-location",
                get(|| async { StatusCode::FOUND }),
            )
            .route(
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, "gone") }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn fetcher() -> ArchiveFetcher {
        ArchiveFetcher::new(Duration::from_secs(5), Duration::from_secs(5), DEFAULT_MAX_REDIRECTS)
            .unwrap()
    }

    #[tokio::test]
    async fn downloads_and_reports_progress() {
        let addr = start_server().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.7z.001");
        let recorder = Arc::new(Recorder::default());

        let url = format!("http://{addr}/file.7z.001");
        let path = fetcher().fetch(&url, &dest, &recorder.reporter()).await.unwrap();

        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
        let events = recorder.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(
            *last,
            ProgressEvent::Download {
                file: "file.7z.001".into(),
                progress: 100.0,
                downloaded_size: BODY.len() as u64,
                total_size: Some(BODY.len() as u64),
            }
        );
        drop(events);
        assert!(recorder.logged(&format!("Downloading: {url}")));
        assert!(recorder.logged("Downloaded: file.7z.001"));
    }

    #[tokio::test]
    async fn follows_301_and_302_to_location() {
        let addr = start_server().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("engine.7z.001");
        let recorder = Arc::new(Recorder::default());

        fetcher()
            .fetch(&format!("http://{addr}/found"), &dest, &recorder.reporter())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn non_success_status_fails_and_leaves_no_file() {
        let addr = start_server().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.7z.001");
        std::fs::write(&dest, b"stale bytes from an earlier attempt").unwrap();

        let err = fetcher()
            .fetch(&format!("http://{addr}/missing"), &dest, &Reporter::tracing())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::DownloadFailed { status: 404, .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn redirect_loop_is_bounded() {
        let addr = start_server().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("loop.bin");

        let err = fetcher()
            .with_max_redirects(3)
            .fetch(&format!("http://{addr}/loop"), &dest, &Reporter::tracing())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::TooManyRedirects { limit: 3, .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn redirect_without_location_is_rejected() {
        let addr = start_server().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.bin");

        let err = fetcher()
            .fetch(&format!("http://{addr}/no-location"), &dest, &Reporter::tracing())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingRedirectLocation { status: 302, .. }));
    }

    #[tokio::test]
    async fn connection_refused_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.bin");
        let err = fetcher()
            .fetch(&format!("http://{addr}/file.7z.001"), &dest, &Reporter::tracing())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::core::error::ErrorKind::Network);
        assert!(!dest.exists());
    }

    /// Raw server that answers every request with `Content-Length: 100000`,
    /// writes `body_bytes` of it, then holds the socket for `hold` before closing.
    async fn start_short_body_server(body_bytes: usize, hold: Duration) -> SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut request = [0u8; 2048];
                    let _ = socket.read(&mut request).await;
                    let head = "HTTP/1.1 200 OK\r\nContent-Length: 100000\r\nContent-Type: application/octet-stream\r\n\r\n";
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&vec![7u8; body_bytes]).await;
                    let _ = socket.flush().await;
                    tokio::time::sleep(hold).await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn connection_dropped_mid_body_deletes_partial_file() {
        let addr = start_short_body_server(5000, Duration::ZERO).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("engine.7z.001");
        let recorder = Arc::new(Recorder::default());

        let result = fetcher()
            .fetch(&format!("http://{addr}/engine.7z.001"), &dest, &recorder.reporter())
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Network);
        assert!(!dest.exists());
        assert!(recorder.logged("Download failed: engine.7z.001"));
    }

    #[tokio::test]
    async fn stalled_body_times_out_and_deletes_partial_file() {
        let addr = start_short_body_server(0, Duration::from_secs(5)).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("engine.7z.001");

        let stalled = ArchiveFetcher::new(
            Duration::from_secs(5),
            Duration::from_millis(200),
            DEFAULT_MAX_REDIRECTS,
        )
        .unwrap();
        let started = std::time::Instant::now();
        let err = stalled
            .fetch(&format!("http://{addr}/engine.7z.001"), &dest, &Reporter::tracing())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Timeout { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!dest.exists());
    }

    #[test]
    fn file_name_is_last_url_segment() {
        assert_eq!(
            file_name_from_url("https://host/a/b/voicevox_engine-windows-cpu-0.25.0.7z.001?x=1"),
            "voicevox_engine-windows-cpu-0.25.0.7z.001"
        );
        assert_eq!(file_name_from_url("https://host/"), "host");
    }

    #[test]
    fn percentage_is_zero_without_content_length() {
        assert_eq!(percentage(10, None), 0.0);
        assert_eq!(percentage(5, Some(10)), 50.0);
    }
}
