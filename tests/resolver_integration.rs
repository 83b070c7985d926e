//! Integration tests for identifier resolution against mock lookup services.

use std::sync::Arc;
use std::time::Duration;

use pmcfetch_core::parser::{AmbiguousDefault, Identifier, classify};
use pmcfetch_core::resolver::{
    Crossref, CrossrefTitleLookup, EuropePmc, IdentifierResolver, NcbiEutils, Resolution,
};
use pmcfetch_core::{CacheStore, RateLimiter};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TTL: Duration = Duration::from_secs(3600);

fn id(value: &str) -> Identifier {
    classify(value, None, AmbiguousDefault::Pmid)
}

fn limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::disabled())
}

async fn ncbi_resolver(server: &MockServer, cache_dir: &TempDir) -> IdentifierResolver {
    let cache = CacheStore::open(cache_dir.path()).await.expect("cache opens");
    let ncbi = NcbiEutils::new(server.uri(), limiter(), None, None).expect("client builds");
    IdentifierResolver::new(cache, TTL).with_pmid_lookup(Arc::new(ncbi))
}

fn esummary(pairs: &[(&str, &str)]) -> serde_json::Value {
    let mut result = serde_json::Map::new();
    let uids: Vec<&str> = pairs.iter().map(|(p, _)| *p).collect();
    result.insert("uids".to_string(), json!(uids));
    for (pmid, pmcid) in pairs {
        result.insert(
            (*pmid).to_string(),
            json!({
                "uid": pmid,
                "articleids": [
                    {"idtype": "pubmed", "value": pmid},
                    {"idtype": "pmc", "value": pmcid}
                ]
            }),
        );
    }
    json!({ "result": result })
}

#[tokio::test]
async fn test_250_pmids_take_three_batch_calls_and_are_cached() {
    let server = MockServer::start().await;
    let cache_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .and(path("/esummary.fcgi"))
        .and(query_param("db", "pubmed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(esummary(&[])))
        .expect(3)
        .mount(&server)
        .await;

    let identifiers: Vec<Identifier> = (0..250).map(|n| id(&(10_000 + n).to_string())).collect();

    let resolver = ncbi_resolver(&server, &cache_dir).await;
    let first = resolver.resolve_batch(&identifiers).await;
    assert_eq!(first.len(), 250);
    assert!(matches!(
        first.get(&identifiers[0]),
        Some(Resolution::NotFound { cached: false, .. })
    ));

    // Definitive misses are cached: a second run makes no further calls.
    let again = ncbi_resolver(&server, &cache_dir).await;
    let second = again.resolve_batch(&identifiers).await;
    assert!(matches!(
        second.get(&identifiers[249]),
        Some(Resolution::NotFound { cached: true, .. })
    ));
}

#[tokio::test]
async fn test_same_pmid_twice_makes_one_call() {
    let server = MockServer::start().await;
    let cache_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .and(path("/esummary.fcgi"))
        .and(query_param("id", "38238491"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(esummary(&[("38238491", "PMC10802741")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let resolver = ncbi_resolver(&server, &cache_dir).await;
    let ids = [id("38238491"), id("38238491")];
    let resolved = resolver.resolve_batch(&ids).await;

    assert_eq!(resolved.len(), 1);
    assert_eq!(
        resolved.get(&ids[1]).and_then(Resolution::pmcid),
        Some("10802741")
    );
}

#[tokio::test]
async fn test_transient_failure_is_not_cached() {
    let server = MockServer::start().await;
    let cache_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .and(path("/esummary.fcgi"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/esummary.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(esummary(&[("555", "PMC77")])))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = ncbi_resolver(&server, &cache_dir).await;
    let ids = [id("555")];

    let failed = resolver.resolve_batch(&ids).await;
    assert!(matches!(failed.get(&ids[0]), Some(Resolution::Failed { .. })));

    let retried = resolver.resolve_batch(&ids).await;
    assert!(matches!(
        retried.get(&ids[0]),
        Some(Resolution::Found { cached: false, .. })
    ));
    assert_eq!(retried.get(&ids[0]).and_then(Resolution::pmcid), Some("77"));
}

#[tokio::test]
async fn test_doi_falls_back_to_crossref_title_search() {
    let server = MockServer::start().await;
    let cache_dir = TempDir::new().expect("failed to create temp dir");
    let title = "Structure of a DNA-binding protein";

    Mock::given(method("GET"))
        .and(path("/europepmc/search"))
        .and(query_param("query", "DOI:\"10.1038/nature12373\""))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"hitCount": 0, "resultList": {"result": []}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/crossref/works/10\.1038"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "message": {"title": [title]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/europepmc/search"))
        .and(query_param("query", format!("TITLE:\"{title}\"")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hitCount": 1,
            "resultList": {"result": [{"id": "1", "pmcid": "PMC999999", "isOpenAccess": "Y"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cache = CacheStore::open(cache_dir.path()).await.expect("cache opens");
    let europe_pmc = Arc::new(
        EuropePmc::new(format!("{}/europepmc", server.uri()), limiter(), None)
            .expect("client builds"),
    );
    let crossref = Crossref::new(format!("{}/crossref", server.uri()), limiter(), None)
        .expect("client builds");
    let resolver = IdentifierResolver::new(cache, TTL)
        .with_doi_lookup(europe_pmc.clone())
        .with_doi_lookup(Arc::new(CrossrefTitleLookup::new(crossref, europe_pmc)));

    let ids = [id("https://doi.org/10.1038/nature12373")];
    let resolved = resolver.resolve_batch(&ids).await;

    match resolved.get(&ids[0]) {
        Some(Resolution::Found {
            pmcid,
            source,
            open_access,
            ..
        }) => {
            assert_eq!(pmcid, "999999");
            assert_eq!(source, "crossref");
            assert_eq!(*open_access, Some(true));
        }
        other => panic!("expected a crossref resolution, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_doi_in_crossref_is_a_definitive_miss() {
    let server = MockServer::start().await;
    let cache_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .and(path_regex(r"^/crossref/works/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let cache = CacheStore::open(cache_dir.path()).await.expect("cache opens");
    let europe_pmc = Arc::new(
        EuropePmc::new(format!("{}/europepmc", server.uri()), limiter(), None)
            .expect("client builds"),
    );
    let crossref = Crossref::new(format!("{}/crossref", server.uri()), limiter(), None)
        .expect("client builds");
    let resolver = IdentifierResolver::new(cache, TTL)
        .with_doi_lookup(Arc::new(CrossrefTitleLookup::new(crossref, europe_pmc)));

    let ids = [id("10.5555/does-not-exist")];
    let first = resolver.resolve_batch(&ids).await;
    assert!(matches!(first.get(&ids[0]), Some(Resolution::NotFound { .. })));

    let second = resolver.resolve_batch(&ids).await;
    assert!(matches!(
        second.get(&ids[0]),
        Some(Resolution::NotFound { cached: true, .. })
    ));
}
