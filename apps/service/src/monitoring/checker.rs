use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::database::Database;
use crate::models::monitor::{
    DatabaseSettings, HttpSettings, HttpsCertSettings, IcmpSettings, Monitor, PortSettings,
    ProbeConfig, PushSettings,
};

/// What a successful probe reports back to the executor.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub message: String,
    pub ping_ms: Option<u64>,
    pub details: Option<serde_json::Value>,
}

impl ProbeReport {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ping_ms: None, details: None }
    }

    fn with_ping(mut self, ping_ms: u64) -> Self {
        self.ping_ms = Some(ping_ms);
        self
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// One probe runner per monitor type. `Ok` is a raw success, `Err` a raw
/// failure with an explanatory message; the executor applies upside-down
/// inversion and the hard timeout on top.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, monitor: &Monitor) -> Result<ProbeReport>;
}

/// Parse accepted status-code patterns (`200-299` or `301`) into ranges.
pub fn parse_status_ranges(patterns: &[String]) -> Result<Vec<RangeInclusive<u16>>> {
    let mut ranges = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let range = match pattern.split_once('-') {
            Some((lo, hi)) => {
                let lo: u16 = lo.trim().parse().with_context(|| {
                    format!("invalid status code range \"{pattern}\"")
                })?;
                let hi: u16 = hi.trim().parse().with_context(|| {
                    format!("invalid status code range \"{pattern}\"")
                })?;
                if lo > hi {
                    bail!("invalid status code range \"{pattern}\": lower bound above upper");
                }
                lo..=hi
            }
            None => {
                let code: u16 = pattern
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid status code \"{pattern}\""))?;
                code..=code
            }
        };
        ranges.push(range);
    }
    Ok(ranges)
}

/// Whether a response status code falls within the accepted patterns.
/// Unparsable patterns never match.
pub fn status_accepted(patterns: &[String], code: u16) -> bool {
    parse_status_ranges(patterns)
        .map(|ranges| ranges.iter().any(|range| range.contains(&code)))
        .unwrap_or(false)
}

/// HTTP(S) prober, also covering keyword and certificate checks.
pub struct HttpProber {
    tls_config: Arc<rustls::ClientConfig>,
}

impl HttpProber {
    pub fn new() -> Self {
        // Both ring and aws-lc-rs can end up in the dependency graph; the
        // builder needs a process-wide default provider before first use.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            let _ = roots.add(cert);
        }
        let tls_config =
            rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();

        Self { tls_config: Arc::new(tls_config) }
    }

    fn build_client(&self, settings: &HttpSettings, timeout: Duration) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects as usize))
            .danger_accept_invalid_certs(settings.ignore_tls)
            .build()
            .context("failed to build HTTP client")
    }

    /// Issue the request and enforce the accepted status-code ranges.
    async fn request(
        &self,
        settings: &HttpSettings,
        timeout: Duration,
    ) -> Result<(reqwest::Response, u64)> {
        let client = self.build_client(settings, timeout)?;
        let method = reqwest::Method::from_bytes(settings.method.to_uppercase().as_bytes())
            .map_err(|_| anyhow!("invalid HTTP method \"{}\"", settings.method))?;

        let mut request = client.request(method, &settings.url);
        if let Some(headers) = &settings.headers {
            for (name, value) in headers {
                let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                request = request.header(name, value);
            }
        }
        if let Some(body) = &settings.body {
            request = request.body(body.clone());
        }

        let start = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow!("request timed out")
            } else {
                anyhow!("request failed: {e}")
            }
        })?;
        let ping_ms = start.elapsed().as_millis() as u64;

        let code = response.status().as_u16();
        if !status_accepted(&settings.accepted_statuscodes, code) {
            bail!(
                "HTTP status {} not within accepted ranges {:?}",
                code,
                settings.accepted_statuscodes
            );
        }

        Ok((response, ping_ms))
    }

    async fn probe_http(&self, settings: &HttpSettings, timeout: Duration) -> Result<ProbeReport> {
        let (response, ping_ms) = self.request(settings, timeout).await?;
        let status = response.status();
        Ok(ProbeReport::new(format!("HTTP {status}")).with_ping(ping_ms))
    }

    async fn probe_keyword(
        &self,
        settings: &HttpSettings,
        keyword: &str,
        timeout: Duration,
    ) -> Result<ProbeReport> {
        let (response, ping_ms) = self.request(settings, timeout).await?;
        let status = response.status();
        let body = response.text().await.context("failed to read response body")?;
        if !body.contains(keyword) {
            bail!("keyword \"{keyword}\" not found in response body");
        }
        Ok(ProbeReport::new(format!("HTTP {status}, keyword found")).with_ping(ping_ms))
    }

    async fn probe_cert(
        &self,
        settings: &HttpsCertSettings,
        timeout_duration: Duration,
    ) -> Result<ProbeReport> {
        let (_, ping_ms) = self.request(&settings.http, timeout_duration).await?;

        let url = url::Url::parse(&settings.http.url)
            .with_context(|| format!("invalid URL \"{}\"", settings.http.url))?;
        if url.scheme() != "https" {
            bail!("certificate checks require an https URL");
        }
        let host = url.host_str().ok_or_else(|| anyhow!("URL has no host"))?.to_string();
        let port = url.port().unwrap_or(443);

        let not_after = self.peer_cert_expiry(&host, port, timeout_duration).await?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let days_remaining = (not_after - now) / 86_400;

        let details = serde_json::json!({
            "cert_expires_at": not_after,
            "cert_days_remaining": days_remaining,
        });

        if let Some(threshold) = settings.expiry_threshold_days {
            if days_remaining < i64::from(threshold) {
                bail!("certificate expires in {days_remaining} days (threshold {threshold})");
            }
        }

        Ok(ProbeReport::new(format!("certificate valid for {days_remaining} more days"))
            .with_ping(ping_ms)
            .with_details(details))
    }

    /// TLS handshake against host:port, returning the end-entity
    /// certificate's not-after as a Unix timestamp.
    async fn peer_cert_expiry(
        &self,
        host: &str,
        port: u16,
        timeout_duration: Duration,
    ) -> Result<i64> {
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| anyhow!("invalid TLS server name \"{host}\""))?;

        let tcp = timeout(timeout_duration, TcpStream::connect((host, port)))
            .await
            .map_err(|_| anyhow!("TLS connection timed out"))?
            .with_context(|| format!("failed to connect to {host}:{port}"))?;

        let connector = tokio_rustls::TlsConnector::from(Arc::clone(&self.tls_config));
        let stream = timeout(timeout_duration, connector.connect(server_name, tcp))
            .await
            .map_err(|_| anyhow!("TLS handshake timed out"))?
            .context("TLS handshake failed")?;

        let certs = stream
            .get_ref()
            .1
            .peer_certificates()
            .ok_or_else(|| anyhow!("server presented no certificate"))?;
        let end_entity = certs.first().ok_or_else(|| anyhow!("empty certificate chain"))?;

        let (_, cert) = x509_parser::parse_x509_certificate(end_entity.as_ref())
            .map_err(|e| anyhow!("failed to parse certificate: {e}"))?;
        Ok(cert.validity().not_after.timestamp())
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, monitor: &Monitor) -> Result<ProbeReport> {
        let timeout = monitor.timeout();
        match &monitor.probe {
            ProbeConfig::Http(settings) => self.probe_http(settings, timeout).await,
            ProbeConfig::Keyword(settings) => {
                self.probe_keyword(&settings.http, &settings.keyword, timeout).await
            }
            ProbeConfig::HttpsCert(settings) => self.probe_cert(settings, timeout).await,
            other => bail!("HTTP prober cannot handle {} monitors", other.kind()),
        }
    }
}

/// TCP port prober: success iff the connection establishes within timeout.
pub struct TcpProber;

impl TcpProber {
    async fn connect(settings: &PortSettings, timeout_duration: Duration) -> Result<ProbeReport> {
        let addr = format!("{}:{}", settings.hostname, settings.port);
        let start = Instant::now();

        timeout(timeout_duration, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow!("connection to {addr} timed out"))?
            .with_context(|| format!("connection to {addr} failed"))?;

        let ping_ms = start.elapsed().as_millis() as u64;
        Ok(ProbeReport::new(format!("{addr} is reachable")).with_ping(ping_ms))
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, monitor: &Monitor) -> Result<ProbeReport> {
        let ProbeConfig::Port(settings) = &monitor.probe else {
            bail!("TCP prober cannot handle {} monitors", monitor.probe.kind());
        };
        Self::connect(settings, monitor.timeout()).await
    }
}

/// ICMP prober: sends a fixed packet count and fails once measured loss
/// exceeds the configured maximum.
pub struct PingProber;

impl PingProber {
    async fn resolve(hostname: &str) -> Result<IpAddr> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Ok(ip);
        }

        let host = hostname.to_string();
        let addrs = tokio::task::spawn_blocking(move || {
            use std::net::ToSocketAddrs;
            format!("{host}:0").to_socket_addrs().map(|addrs| addrs.collect::<Vec<_>>())
        })
        .await
        .context("DNS resolution task failed")?
        .with_context(|| format!("failed to resolve \"{hostname}\""))?;

        addrs
            .first()
            .map(|addr| addr.ip())
            .ok_or_else(|| anyhow!("\"{hostname}\" resolved to no addresses"))
    }

    async fn ping(settings: &IcmpSettings, timeout_duration: Duration) -> Result<ProbeReport> {
        let target = Self::resolve(&settings.hostname).await?;
        let count = settings.packet_count.max(1);

        let client = surge_ping::Client::new(&surge_ping::Config::default())
            .context("failed to create ICMP client (raw sockets may require privileges)")?;
        let mut pinger = client.pinger(target, surge_ping::PingIdentifier(rand::random())).await;

        // Split the configured timeout across the packet train
        let per_packet =
            (timeout_duration / count).max(Duration::from_millis(500));
        pinger.timeout(per_packet);

        let payload = [0u8; 56];
        let mut received = 0u32;
        let mut total_rtt = Duration::ZERO;
        for sequence in 0..count {
            match pinger.ping(surge_ping::PingSequence(sequence as u16), &payload).await {
                Ok((_, rtt)) => {
                    received += 1;
                    total_rtt += rtt;
                }
                Err(_) => {}
            }
        }

        let lost = count - received;
        let loss_pct = f64::from(lost) / f64::from(count) * 100.0;
        let avg_ms = (received > 0)
            .then(|| (total_rtt / received).as_millis() as u64);

        if loss_pct > settings.max_packet_loss {
            bail!(
                "packet loss {loss_pct:.0}% exceeds maximum {:.0}% ({received}/{count} replies)",
                settings.max_packet_loss
            );
        }

        let mut report = ProbeReport::new(format!(
            "{received}/{count} replies, {loss_pct:.0}% packet loss"
        ))
        .with_details(serde_json::json!({ "packet_loss_pct": loss_pct }));
        if let Some(avg_ms) = avg_ms {
            report = report.with_ping(avg_ms);
        }
        Ok(report)
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, monitor: &Monitor) -> Result<ProbeReport> {
        let ProbeConfig::Icmp(settings) = &monitor.probe else {
            bail!("ICMP prober cannot handle {} monitors", monitor.probe.kind());
        };
        Self::ping(settings, monitor.timeout()).await
    }
}

/// MySQL prober: connects with the supplied credentials and runs the
/// configured query (or a protocol ping when none is set).
pub struct MysqlProber;

impl MysqlProber {
    /// The configured timeout covers the whole exchange; sqlx has no
    /// per-operation deadline of its own.
    async fn check(settings: &DatabaseSettings, timeout_duration: Duration) -> Result<ProbeReport> {
        timeout(timeout_duration, Self::exchange(settings))
            .await
            .map_err(|_| anyhow!("MySQL check timed out"))?
    }

    async fn exchange(settings: &DatabaseSettings) -> Result<ProbeReport> {
        use sqlx::Connection;

        let start = Instant::now();
        let mut conn = sqlx::mysql::MySqlConnection::connect(&settings.connection_string)
            .await
            .map_err(|e| anyhow!("MySQL connection failed: {e}"))?;

        match &settings.query {
            Some(query) => {
                sqlx::query(query)
                    .execute(&mut conn)
                    .await
                    .map_err(|e| anyhow!("MySQL query failed: {e}"))?;
            }
            None => {
                conn.ping().await.map_err(|e| anyhow!("MySQL ping failed: {e}"))?;
            }
        }

        let ping_ms = start.elapsed().as_millis() as u64;
        let _ = conn.close().await;
        Ok(ProbeReport::new("MySQL connection successful").with_ping(ping_ms))
    }
}

#[async_trait]
impl Prober for MysqlProber {
    async fn probe(&self, monitor: &Monitor) -> Result<ProbeReport> {
        let ProbeConfig::Mysql(settings) = &monitor.probe else {
            bail!("MySQL prober cannot handle {} monitors", monitor.probe.kind());
        };
        Self::check(settings, monitor.timeout()).await
    }
}

/// Redis prober: RESP `PING` over a plain TCP connection, with `AUTH` when
/// the connection string carries a password.
pub struct RedisProber;

impl RedisProber {
    fn parse_target(connection_string: &str) -> Result<(String, u16, Option<String>)> {
        let url = url::Url::parse(connection_string)
            .with_context(|| format!("invalid Redis URL \"{connection_string}\""))?;
        if url.scheme() != "redis" {
            bail!("unsupported Redis scheme \"{}\"", url.scheme());
        }
        let host = url.host_str().ok_or_else(|| anyhow!("Redis URL has no host"))?.to_string();
        let port = url.port().unwrap_or(6379);
        let password = url.password().map(str::to_string);
        Ok((host, port, password))
    }

    async fn command(stream: &mut TcpStream, parts: &[&str]) -> Result<String> {
        let mut request = format!("*{}\r\n", parts.len());
        for part in parts {
            request.push_str(&format!("${}\r\n{part}\r\n", part.len()));
        }
        stream.write_all(request.as_bytes()).await.context("failed to send Redis command")?;

        let mut buf = [0u8; 512];
        let read = stream.read(&mut buf).await.context("failed to read Redis reply")?;
        if read == 0 {
            bail!("Redis closed the connection");
        }
        let reply = String::from_utf8_lossy(&buf[..read]).trim().to_string();
        if let Some(error) = reply.strip_prefix('-') {
            bail!("Redis error: {error}");
        }
        Ok(reply)
    }

    async fn check(settings: &DatabaseSettings, timeout_duration: Duration) -> Result<ProbeReport> {
        let (host, port, password) = Self::parse_target(&settings.connection_string)?;
        let addr = format!("{host}:{port}");

        // The configured timeout bounds the whole exchange, not just the
        // connect; a server that accepts and goes silent must not stall
        // the check until the executor's backstop.
        timeout(timeout_duration, Self::exchange(&addr, password.as_deref()))
            .await
            .map_err(|_| anyhow!("Redis check against {addr} timed out"))?
    }

    async fn exchange(addr: &str, password: Option<&str>) -> Result<ProbeReport> {
        let start = Instant::now();
        let mut stream =
            TcpStream::connect(addr).await.with_context(|| format!("connection to {addr} failed"))?;

        if let Some(password) = password {
            Self::command(&mut stream, &["AUTH", password]).await?;
        }

        let reply = Self::command(&mut stream, &["PING"]).await?;
        if reply != "+PONG" {
            bail!("unexpected PING reply: {reply}");
        }

        let ping_ms = start.elapsed().as_millis() as u64;
        Ok(ProbeReport::new("Redis PONG received").with_ping(ping_ms))
    }
}

#[async_trait]
impl Prober for RedisProber {
    async fn probe(&self, monitor: &Monitor) -> Result<ProbeReport> {
        let ProbeConfig::Redis(settings) = &monitor.probe else {
            bail!("Redis prober cannot handle {} monitors", monitor.probe.kind());
        };
        Self::check(settings, monitor.timeout()).await
    }
}

/// Passive push prober: checks the last heartbeat the reporting endpoint
/// stored; initiates no network I/O of its own.
pub struct PushProber {
    database: Arc<dyn Database>,
}

impl PushProber {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    async fn check(&self, settings: &PushSettings, monitor: &Monitor) -> Result<ProbeReport> {
        let last_seen = self
            .database
            .last_heartbeat(&settings.token)
            .await
            .map_err(|e| anyhow!("failed to read heartbeat state: {e:#}"))?
            .ok_or_else(|| anyhow!("no heartbeat received yet"))?;

        let elapsed = SystemTime::now()
            .duration_since(last_seen)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        let window = monitor.interval_seconds + settings.grace_seconds;

        if elapsed > window {
            bail!("no heartbeat for {elapsed}s (allowed window {window}s)");
        }
        Ok(ProbeReport::new(format!("heartbeat received {elapsed}s ago")))
    }
}

#[async_trait]
impl Prober for PushProber {
    async fn probe(&self, monitor: &Monitor) -> Result<ProbeReport> {
        let ProbeConfig::Push(settings) = &monitor.probe else {
            bail!("push prober cannot handle {} monitors", monitor.probe.kind());
        };
        self.check(settings, monitor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn parses_ranges_and_single_codes() {
        let ranges =
            parse_status_ranges(&["200-299".to_string(), "301".to_string()]).unwrap();
        assert_eq!(ranges, vec![200..=299, 301..=301]);

        assert!(parse_status_ranges(&["abc".to_string()]).is_err());
        assert!(parse_status_ranges(&["500-200".to_string()]).is_err());
    }

    #[test]
    fn status_acceptance_is_inclusive() {
        let patterns = vec!["200-299".to_string()];
        assert!(status_accepted(&patterns, 200));
        assert!(status_accepted(&patterns, 299));
        assert!(!status_accepted(&patterns, 404));
        assert!(!status_accepted(&patterns, 199));

        // Unparsable patterns match nothing
        assert!(!status_accepted(&["bogus".to_string()], 200));
    }

    #[test]
    fn redis_url_parsing() {
        let (host, port, password) =
            RedisProber::parse_target("redis://:secret@cache.internal:6380").unwrap();
        assert_eq!(host, "cache.internal");
        assert_eq!(port, 6380);
        assert_eq!(password.as_deref(), Some("secret"));

        let (_, port, password) = RedisProber::parse_target("redis://cache.internal").unwrap();
        assert_eq!(port, 6379);
        assert_eq!(password, None);

        assert!(RedisProber::parse_target("http://cache.internal").is_err());
    }

    #[tokio::test]
    async fn tcp_probe_reports_refused_connections_as_failures() {
        // Port 1 on localhost is almost certainly closed; either a refusal
        // or a timeout must surface as an error, never a panic.
        let settings = PortSettings { hostname: "127.0.0.1".to_string(), port: 1 };
        let result = TcpProber::connect(&settings, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn http_status_outside_accepted_ranges_is_a_failure_naming_the_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            }
        });

        let probe: ProbeConfig =
            serde_json::from_str(&format!(r#"{{"type":"http","url":"http://{addr}/"}}"#)).unwrap();
        let monitor = Monitor::new("not found", probe);

        // Default accepted range is 200-299, so the 404 is a failure and
        // the message must carry the observed code.
        let error = HttpProber::new().probe(&monitor).await.unwrap_err();
        assert!(error.to_string().contains("404"), "message was: {error}");
    }

    #[tokio::test]
    async fn redis_probe_times_out_when_the_server_never_replies() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else { return };
            // Accept the PING but never answer it
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let settings =
            DatabaseSettings { connection_string: format!("redis://{addr}"), query: None };
        let start = Instant::now();
        let result = RedisProber::check(&settings, Duration::from_secs(1)).await;

        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn mysql_probe_times_out_when_the_handshake_stalls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and go silent: the client never gets a handshake packet
            let Ok((_stream, _)) = listener.accept().await else { return };
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let settings =
            DatabaseSettings { connection_string: format!("mysql://root@{addr}/db"), query: None };
        let start = Instant::now();
        let result = MysqlProber::check(&settings, Duration::from_secs(1)).await;

        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
