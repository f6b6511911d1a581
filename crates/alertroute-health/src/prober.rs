//! Single-target connectivity probing
//!
//! A probe runs in three stages: URL parse, raw TCP preflight, then an HTTP
//! GET. The preflight separates network reachability from HTTP-level
//! failures so the classifier can tell "the host is gone" apart from "the
//! service answered badly".

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

use alertroute_common::{
    classify_connect, classify_message, redact, CheckResult, CheckTrigger, Classification, Error,
    ErrorKind, HealthConfig, Result, TargetDescriptor,
};

/// Delay between the first attempt and the single retry.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Seam between the health worker and the network.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Run a single connectivity check against one target.
    async fn probe(&self, target: &TargetDescriptor, trigger: CheckTrigger) -> CheckResult;

    /// Probe with one retry on connectivity-flavored transient failures.
    ///
    /// Only `timeout`, `dns`, `refused`, and `network` qualify; `unknown`,
    /// `http`, `auth`, and `tls` failures are returned as-is.
    async fn probe_with_retry(&self, target: &TargetDescriptor, trigger: CheckTrigger) -> CheckResult {
        let first = self.probe(target, trigger).await;
        if first.success || !retry_eligible(first.error_kind) {
            return first;
        }

        debug!(
            target = %target.name,
            kind = ?first.error_kind,
            "probe failed with connectivity error, retrying once"
        );
        tokio::time::sleep(RETRY_DELAY).await;
        self.probe(target, trigger).await
    }
}

fn retry_eligible(kind: Option<ErrorKind>) -> bool {
    matches!(
        kind,
        Some(ErrorKind::Timeout | ErrorKind::Dns | ErrorKind::Refused | ErrorKind::Network)
    )
}

/// Production prober: TCP preflight plus an HTTP GET through a shared client.
pub struct HttpProber {
    client: reqwest::Client,
    config: HealthConfig,
}

impl HttpProber {
    pub fn new(config: HealthConfig) -> Result<HttpProber> {
        config.validate()?;

        let redirect = if config.follow_redirects {
            reqwest::redirect::Policy::limited(config.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("alertroute-health/", env!("CARGO_PKG_VERSION")))
            .redirect(redirect)
            .pool_max_idle_per_host(config.max_idle_conns)
            .danger_accept_invalid_certs(config.tls_skip_verify)
            .build()
            .map_err(|err| Error::Config(format!("building http client: {err}")))?;

        Ok(HttpProber { client, config })
    }

    fn failure(
        target: &TargetDescriptor,
        trigger: CheckTrigger,
        classification: Classification,
        message: String,
    ) -> CheckResult {
        CheckResult {
            name: target.name.clone(),
            url: target.url.clone(),
            success: false,
            latency_ms: None,
            status_code: None,
            error_message: Some(redact::sanitize(&message)),
            error_kind: Some(classification.kind),
            checked_at: Utc::now(),
            trigger,
        }
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, target: &TargetDescriptor, trigger: CheckTrigger) -> CheckResult {
        let started = Instant::now();

        let url = match Url::parse(&target.url) {
            Ok(url) => url,
            Err(err) => {
                return Self::failure(
                    target,
                    trigger,
                    Classification {
                        kind: ErrorKind::Unknown,
                        transient: false,
                    },
                    format!("invalid url: {err}"),
                );
            }
        };

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                return Self::failure(
                    target,
                    trigger,
                    Classification {
                        kind: ErrorKind::Unknown,
                        transient: false,
                    },
                    "url has no host".to_string(),
                );
            }
        };
        let port = url
            .port_or_known_default()
            .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });

        // reachability preflight
        match tokio::time::timeout(
            self.config.http_timeout(),
            TcpStream::connect((host.as_str(), port)),
        )
        .await
        {
            Ok(Ok(stream)) => drop(stream),
            Ok(Err(err)) => {
                return Self::failure(
                    target,
                    trigger,
                    classify_connect(&err),
                    format!("tcp connect to {host}:{port} failed: {err}"),
                );
            }
            Err(_) => {
                return Self::failure(
                    target,
                    trigger,
                    Classification {
                        kind: ErrorKind::Timeout,
                        transient: true,
                    },
                    format!(
                        "tcp connect to {host}:{port} timed out after {:?}",
                        self.config.http_timeout()
                    ),
                );
            }
        }

        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(err) => {
                return Self::failure(
                    target,
                    trigger,
                    classify_client_error(&err),
                    format!("http request failed: {err}"),
                );
            }
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let status = response.status();

        if status.is_success() {
            return CheckResult {
                name: target.name.clone(),
                url: target.url.clone(),
                success: true,
                latency_ms: Some(latency_ms),
                status_code: Some(status.as_u16()),
                error_message: None,
                error_kind: None,
                checked_at: Utc::now(),
                trigger,
            };
        }

        let kind = if status.as_u16() == 401 || status.as_u16() == 403 {
            ErrorKind::Auth
        } else {
            ErrorKind::Http
        };
        CheckResult {
            name: target.name.clone(),
            url: target.url.clone(),
            success: false,
            latency_ms: Some(latency_ms),
            status_code: Some(status.as_u16()),
            error_message: Some(redact::sanitize(&format!("http status {status}"))),
            error_kind: Some(kind),
            checked_at: Utc::now(),
            trigger,
        }
    }
}

/// Classify a failure reported by the HTTP client after the preflight passed.
fn classify_client_error(err: &reqwest::Error) -> Classification {
    if err.is_timeout() {
        return Classification {
            kind: ErrorKind::Timeout,
            transient: true,
        };
    }
    // client-reported TLS failures are real certificate problems; the
    // preflight already proved the host reachable
    classify_message(&err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn target(url: &str) -> TargetDescriptor {
        TargetDescriptor {
            name: "probe-me".to_string(),
            target_type: alertroute_common::TargetType::Webhook,
            url: url.to_string(),
            format: alertroute_common::PayloadFormat::Webhook,
            enabled: true,
            headers: HashMap::new(),
            filter_config: HashMap::new(),
        }
    }

    fn prober() -> HttpProber {
        let config = HealthConfig {
            http_timeout_ms: 1_000,
            ..HealthConfig::default()
        };
        HttpProber::new(config).unwrap()
    }

    #[tokio::test]
    async fn invalid_url_is_unknown_kind() {
        let result = prober()
            .probe(&target("not a url"), CheckTrigger::Manual)
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Unknown));
        assert_eq!(result.trigger, CheckTrigger::Manual);
    }

    #[tokio::test]
    async fn refused_connection_classified() {
        // bind then drop to find a port with no listener
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = prober()
            .probe(
                &target(&format!("http://127.0.0.1:{port}/hook")),
                CheckTrigger::Periodic,
            )
            .await;
        assert!(!result.success);
        assert!(
            matches!(
                result.error_kind,
                Some(ErrorKind::Refused | ErrorKind::Timeout | ErrorKind::Network)
            ),
            "got {:?}",
            result.error_kind
        );
        assert!(result.latency_ms.is_none());
    }

    struct CountingProbe {
        calls: AtomicU32,
        kind: Option<ErrorKind>,
    }

    #[async_trait]
    impl Probe for CountingProbe {
        async fn probe(&self, target: &TargetDescriptor, trigger: CheckTrigger) -> CheckResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            CheckResult {
                name: target.name.clone(),
                url: target.url.clone(),
                success: false,
                latency_ms: None,
                status_code: None,
                error_message: Some("scripted failure".to_string()),
                error_kind: self.kind,
                checked_at: Utc::now(),
                trigger,
            }
        }
    }

    #[tokio::test]
    async fn retry_only_on_connectivity_kinds() {
        for (kind, expected_calls) in [
            (Some(ErrorKind::Refused), 2),
            (Some(ErrorKind::Dns), 2),
            (Some(ErrorKind::Timeout), 2),
            (Some(ErrorKind::Network), 2),
            (Some(ErrorKind::Unknown), 1),
            (Some(ErrorKind::Http), 1),
            (Some(ErrorKind::Auth), 1),
            (Some(ErrorKind::Tls), 1),
        ] {
            let probe = CountingProbe {
                calls: AtomicU32::new(0),
                kind,
            };
            let _ = probe
                .probe_with_retry(&target("http://example.com"), CheckTrigger::Periodic)
                .await;
            assert_eq!(
                probe.calls.load(Ordering::SeqCst),
                expected_calls,
                "kind {kind:?}"
            );
        }
    }
}
