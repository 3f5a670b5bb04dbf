use async_trait::async_trait;
use proxy_sub::{
    cache::{CacheHandle, MemoryCacheStore},
    config::AppConfig,
    pipeline::Pipeline,
    proxy::{
        Candidate, CheckerConfig, FilterConfig, GeoBackend, GeoConfig, GeoLookup, ProbeStatus,
        ProxyChecker, ProxySource, RegionCode, SourceFormat, SourceTag,
    },
    render_clash, Error, ListQuery, Result,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Size of the body served for `/payload` requests
const PAYLOAD_BYTES: usize = 200_000;

/// Local forwarding proxy stand-in. Requests for `/fail` get a 500,
/// `/payload` gets a large body, anything else a short 200.
async fn spawn_fake_proxy(ip: &str) -> SocketAddr {
    let listener = TcpListener::bind((ip, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let request_line = String::from_utf8_lossy(&buf)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                let (status, body) = if request_line.contains("/fail") {
                    ("500 Internal Server Error", Vec::new())
                } else if request_line.contains("/payload") {
                    ("200 OK", vec![b'x'; PAYLOAD_BYTES])
                } else {
                    ("200 OK", b"ok".to_vec())
                };
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Local proxy stand-in that accepts connections and never answers
async fn spawn_silent_proxy(ip: &str) -> SocketAddr {
    let listener = TcpListener::bind((ip, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

struct TableLookup {
    table: HashMap<String, &'static str>,
    calls: AtomicUsize,
}

impl TableLookup {
    fn new(entries: &[(&str, &'static str)]) -> Arc<Self> {
        Arc::new(Self {
            table: entries.iter().map(|(h, r)| (h.to_string(), *r)).collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GeoLookup for TableLookup {
    async fn lookup_batch(&self, hosts: &[String]) -> Result<HashMap<String, RegionCode>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(hosts
            .iter()
            .filter_map(|h| self.table.get(h).map(|r| (h.clone(), RegionCode::parse(r))))
            .collect())
    }
}

/// Configuration that lets loopback candidates through and probes them fast
fn local_config(sources: Vec<ProxySource>) -> AppConfig {
    AppConfig {
        sources,
        filter: FilterConfig::new()
            .with_blocked_prefixes(Vec::new())
            .with_block_private_ranges(false),
        checker: CheckerConfig::new()
            .with_timeout(Duration::from_millis(1500))
            .with_batch_pause(Duration::ZERO)
            .with_test_url("http://check.invalid/get".to_string())
            .with_throughput_url(None),
        ..AppConfig::default()
    }
}

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_run_ranks_live_proxies_and_drops_excluded_regions() {
    let us = spawn_fake_proxy("127.0.0.1").await;
    let ru = spawn_fake_proxy("127.0.0.2").await;
    let dead = spawn_silent_proxy("127.0.0.1").await;

    let server = MockServer::start().await;
    serve(
        &server,
        "/list.txt",
        format!("{}\n{}\n{}\n{}\n", us, ru, dead, us),
    )
    .await;
    serve(
        &server,
        "/api",
        r#"{"code":0,"data":[{"ip":"127.0.0.3","port":"8080"}]}"#.to_string(),
    )
    .await;

    let config = local_config(vec![
        ProxySource::new(&format!("{}/list.txt", server.uri()), SourceFormat::Line, SourceTag::Fp),
        ProxySource::new(&format!("{}/api", server.uri()), SourceFormat::JsonApi, SourceTag::Daili66),
    ]);
    let geo = TableLookup::new(&[("127.0.0.1", "US"), ("127.0.0.2", "RU"), ("127.0.0.3", "JP")]);
    let pipeline = Pipeline::with_geo_backend(config, CacheHandle::disabled(), geo).unwrap();

    let output = pipeline.run().await.unwrap();
    let mut names: Vec<&str> = output.ranked.iter().map(|p| p.display_name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["66-JP-01", "FP-US-01"]);

    let by_name = |name: &str| output.ranked.iter().find(|p| p.display_name == name).unwrap();
    let us_entry = by_name("FP-US-01");
    assert_eq!(us_entry.port(), us.port());
    assert!(us_entry.latency_ms() > 0);
    let placeholder = by_name("66-JP-01");
    assert_eq!(placeholder.score(), 100);
    assert_eq!(placeholder.latency_ms(), 1000);

    let silent = output
        .details
        .iter()
        .find(|r| r.candidate.port == dead.port())
        .unwrap();
    assert_eq!(silent.latency_ms, -1);
    assert_eq!(silent.throughput_mbps, 0.0);
    assert!(matches!(silent.status, ProbeStatus::Timeout | ProbeStatus::Failed(_)));

    let stats = &output.stats;
    assert_eq!(stats.source_count, 2);
    assert_eq!(stats.candidates_found, 4);
    assert_eq!(stats.tested_count, 3);
    assert_eq!(stats.valid_count, 2);
    assert_eq!(stats.failed_count, 1);
    assert_eq!(stats.untested_count, 1);
    assert_eq!(stats.per_region_counts["RU"], 1);
}

#[tokio::test]
async fn test_json_api_error_code_does_not_fail_run() {
    let live = spawn_fake_proxy("127.0.0.1").await;
    let server = MockServer::start().await;
    serve(&server, "/list.txt", format!("{}\n", live)).await;
    serve(&server, "/api", r#"{"code":1,"msg":"rate limited"}"#.to_string()).await;

    let config = local_config(vec![
        ProxySource::new(&format!("{}/list.txt", server.uri()), SourceFormat::Line, SourceTag::Fp),
        ProxySource::new(&format!("{}/api", server.uri()), SourceFormat::JsonApi, SourceTag::Daili66),
    ]);
    let geo = TableLookup::new(&[("127.0.0.1", "DE")]);
    let pipeline = Pipeline::with_geo_backend(config, CacheHandle::disabled(), geo).unwrap();

    let output = pipeline.run().await.unwrap();
    assert_eq!(output.ranked.len(), 1);
    assert_eq!(output.ranked[0].display_name, "FP-DE-01");
    assert!(output.stats.sources.iter().all(|s| s.error.is_none()));
    assert_eq!(output.stats.sources[1].fetched, 0);
}

#[tokio::test]
async fn test_all_sources_failing_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = local_config(vec![
        ProxySource::bare(&format!("{}/a.txt", server.uri())),
        ProxySource::bare(&format!("{}/b.html", server.uri())),
    ]);
    let pipeline =
        Pipeline::with_geo_backend(config, CacheHandle::disabled(), TableLookup::new(&[])).unwrap();

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, Error::AllSourcesFailed(2)));
}

#[tokio::test]
async fn test_ip_api_backend_resolves_regions() {
    let live = spawn_fake_proxy("127.0.0.1").await;
    let server = MockServer::start().await;
    serve(&server, "/list.txt", format!("{}\n", live)).await;
    Mock::given(method("POST"))
        .and(path("/batch"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"[{"query":"127.0.0.1","countryCode":"sg"}]"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut config = local_config(vec![ProxySource::new(
        &format!("{}/list.txt", server.uri()),
        SourceFormat::Line,
        SourceTag::Fp,
    )]);
    config.geo = GeoConfig::new().with_backend(GeoBackend::IpApi {
        endpoint: format!("{}/batch", server.uri()),
    });
    let pipeline = Pipeline::new(config, CacheHandle::disabled()).unwrap();

    let output = pipeline.run().await.unwrap();
    assert_eq!(output.ranked.len(), 1);
    assert_eq!(output.ranked[0].display_name, "FP-SG-01");
}

#[tokio::test]
async fn test_cached_list_is_served_without_rerun() {
    let live = spawn_fake_proxy("127.0.0.1").await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!("{}\n", live)))
        .expect(1)
        .mount(&server)
        .await;

    let config = local_config(vec![ProxySource::new(
        &format!("{}/list.txt", server.uri()),
        SourceFormat::Line,
        SourceTag::Fp,
    )]);

    let geo = TableLookup::new(&[("127.0.0.1", "NL")]);
    let cache = CacheHandle::new(Arc::new(MemoryCacheStore::new()));
    let pipeline = Pipeline::with_geo_backend(config, cache, geo.clone()).unwrap();

    assert!(pipeline.stats().await.is_none());

    let first = pipeline.proxies().await.unwrap();
    let second = pipeline.proxies().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].display_name, "FP-NL-01");
    assert_eq!(geo.calls.load(Ordering::SeqCst), 1);

    let stats = pipeline.stats().await.unwrap();
    assert_eq!(stats.valid_count, 1);
    assert_eq!(pipeline.details().await.unwrap().len(), 1);

    let text = render_clash(&ListQuery::new().with_region("nl").apply(&second), chrono::Utc::now());
    assert!(text.contains("      - FP-NL-01\n      - DIRECT\n"));
}

#[tokio::test]
async fn test_cached_details_keep_failed_results() {
    let live = spawn_fake_proxy("127.0.0.1").await;
    let dead = spawn_silent_proxy("127.0.0.1").await;
    let server = MockServer::start().await;
    serve(&server, "/list.txt", format!("{}\n{}\n", live, dead)).await;

    let mut config = local_config(vec![ProxySource::new(
        &format!("{}/list.txt", server.uri()),
        SourceFormat::Line,
        SourceTag::Fp,
    )]);
    config.checker = config.checker.with_timeout(Duration::from_millis(300));

    let cache = CacheHandle::new(Arc::new(MemoryCacheStore::new()));
    let pipeline =
        Pipeline::with_geo_backend(config, cache, TableLookup::new(&[("127.0.0.1", "FR")])).unwrap();
    pipeline.refresh().await.unwrap();

    let details = pipeline.details().await.unwrap();
    assert_eq!(details.len(), 2);
    let ok = details.iter().find(|r| r.candidate.port == live.port()).unwrap();
    assert_eq!(ok.status, ProbeStatus::Ok);
    let failed = details.iter().find(|r| r.candidate.port == dead.port()).unwrap();
    assert_eq!(failed.latency_ms, -1);
    assert_ne!(failed.status, ProbeStatus::Ok);
}

fn checker_through_local_proxy(throughput_path: &str) -> ProxyChecker {
    ProxyChecker::with_config(
        CheckerConfig::new()
            .with_timeout(Duration::from_millis(1500))
            .with_throughput_timeout(Duration::from_secs(5))
            .with_test_url("http://check.invalid/get".to_string())
            .with_throughput_url(Some(format!("http://check.invalid{}", throughput_path))),
    )
}

#[tokio::test]
async fn test_throughput_failure_keeps_candidate_live() {
    let proxy = spawn_fake_proxy("127.0.0.1").await;
    let checker = checker_through_local_proxy("/fail");

    let result = checker
        .probe(
            Candidate::new("127.0.0.1", proxy.port(), SourceTag::Fp),
            RegionCode::parse("US"),
        )
        .await;

    assert!(result.latency_ms > 0);
    assert_eq!(result.throughput_mbps, 0.0);
    assert_eq!(result.status, ProbeStatus::Ok);
}

#[tokio::test]
async fn test_throughput_download_is_measured() {
    let proxy = spawn_fake_proxy("127.0.0.1").await;
    let checker = checker_through_local_proxy("/payload");

    let result = checker
        .probe(
            Candidate::new("127.0.0.1", proxy.port(), SourceTag::Fp),
            RegionCode::parse("US"),
        )
        .await;

    assert_eq!(result.status, ProbeStatus::Ok);
    assert!(result.throughput_mbps > 0.0);
}

#[tokio::test]
async fn test_batches_run_one_after_another() {
    let timeout = Duration::from_millis(300);
    let mut items = Vec::new();
    for _ in 0..4 {
        let addr = spawn_silent_proxy("127.0.0.1").await;
        items.push((
            Candidate::new("127.0.0.1", addr.port(), SourceTag::Fp),
            RegionCode::unknown(),
        ));
    }

    let checker = ProxyChecker::with_config(
        CheckerConfig::new()
            .with_timeout(timeout)
            .with_concurrency(2)
            .with_batch_pause(Duration::ZERO)
            .with_test_url("http://check.invalid/get".to_string())
            .with_throughput_url(None),
    );

    let start = Instant::now();
    let results = checker.probe_all_until(items, None).await;
    let elapsed = start.elapsed();

    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| !r.is_live()));
    // two batches of two, each bounded by one timeout
    assert!(elapsed >= timeout * 2, "took {:?}", elapsed);
}

#[tokio::test]
async fn test_error_status_through_proxy_is_not_live() {
    let proxy = spawn_fake_proxy("127.0.0.1").await;
    let checker = ProxyChecker::with_config(
        CheckerConfig::new()
            .with_timeout(Duration::from_millis(1500))
            .with_test_url("http://check.invalid/fail".to_string())
            .with_throughput_url(None),
    );

    let result = checker
        .probe(
            Candidate::new("127.0.0.1", proxy.port(), SourceTag::Fp),
            RegionCode::unknown(),
        )
        .await;

    assert_eq!(result.latency_ms, -1);
    assert!(matches!(result.status, ProbeStatus::Failed(_)));
}
