//! Source adapter contract tests.
//!
//! Each adapter is pointed at a local mock server and checked for the exact
//! request it issues and how it maps the payload.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use trialscope_common::sandbox::SandboxClient;
use trialscope_ingestion::sources::clinicaltrials::ClinicalTrialsClient;
use trialscope_ingestion::sources::europepmc::EuropePmcClient;
use trialscope_ingestion::sources::isrctn::IsrctnClient;
use trialscope_ingestion::sources::pubmed::PubMedClient;
use trialscope_ingestion::{GovernorConfig, RateGovernor, SourceAdapter, SourceError};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> SandboxClient {
    SandboxClient::new().unwrap()
}

fn governor() -> Arc<RateGovernor> {
    Arc::new(RateGovernor::new(GovernorConfig::immediate()))
}

fn study(nct: &str, title: &str) -> serde_json::Value {
    json!({"protocolSection": {
        "identificationModule": {"nctId": nct, "briefTitle": title},
        "conditionsModule": {"conditions": ["Diabetes"]}
    }})
}

// ────────────────────────────────────────────────────────────────────────────
// ClinicalTrials.gov
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_clinicaltrials_request_and_paging() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v2/studies"))
        .and(query_param("query.cond", "diabetes"))
        .and(query_param("query.term", "diabetes"))
        .and(query_param("sort", "EnrollmentCount:desc"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "studies": [study("NCT3", "Third"), study("NCT4", "Fourth")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v2/studies"))
        .and(query_param("pageSize", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "studies": [study("NCT1", "First"), study("NCT2", "Second")],
            "nextPageToken": "p2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = ClinicalTrialsClient::new(client(), governor()).with_base_url(server.uri());
    let records = adapter.fetch("diabetes", 3).await.unwrap();

    let ids: Vec<_> = records.iter().map(|r| r.identifier.as_str()).collect();
    assert_eq!(ids, vec!["NCT1", "NCT2", "NCT3"]);
    assert_eq!(records[0].attribute("conditions"), Some("Diabetes"));
}

#[tokio::test]
async fn test_clinicaltrials_server_error_is_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let adapter = ClinicalTrialsClient::new(client(), governor()).with_base_url(server.uri());
    let err = adapter.fetch("diabetes", 5).await.unwrap_err();
    assert!(matches!(err, SourceError::Status(503)));
}

#[tokio::test]
async fn test_clinicaltrials_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let gov = Arc::new(RateGovernor::new(GovernorConfig {
        request_timeout: Duration::from_millis(50),
        ..GovernorConfig::immediate()
    }));
    let adapter = ClinicalTrialsClient::new(client(), gov).with_base_url(server.uri());
    let err = adapter.fetch("diabetes", 5).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_clinicaltrials_garbage_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let adapter = ClinicalTrialsClient::new(client(), governor()).with_base_url(server.uri());
    assert!(matches!(adapter.fetch("x", 5).await, Err(SourceError::Malformed(_))));
}

// ────────────────────────────────────────────────────────────────────────────
// PubMed
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pubmed_search_then_fetch() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/esearch.fcgi"))
        .and(query_param("term", "asthma[Title/Abstract] AND clinical trial[Publication Type]"))
        .and(query_param("retmax", "2"))
        .and(query_param("sort", "relevance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "esearchresult": {"idlist": ["111", "222"]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/efetch.fcgi"))
        .and(query_param("id", "111,222"))
        .and(query_param("retmode", "xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<PubmedArticleSet>
                 <PubmedArticle><MedlineCitation><PMID>111</PMID><Article><ArticleTitle>Inhaled steroids.</ArticleTitle></Article></MedlineCitation></PubmedArticle>
                 <PubmedArticle><MedlineCitation><PMID>222</PMID><Article><ArticleTitle>Biologics.</ArticleTitle></Article></MedlineCitation></PubmedArticle>
               </PubmedArticleSet>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = PubMedClient::new(client(), governor(), None).with_base_url(server.uri());
    let records = adapter.fetch("asthma", 2).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].url, "https://pubmed.ncbi.nlm.nih.gov/111/");
    assert_eq!(records[1].title, "Biologics.");
}

#[tokio::test]
async fn test_pubmed_failed_later_batch_keeps_earlier_records() {
    let server = MockServer::start().await;
    let ids: Vec<String> = (1..=201).map(|i| i.to_string()).collect();

    Mock::given(method("GET"))
        .and(path("/esearch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"esearchresult": {"idlist": ids}})))
        .mount(&server)
        .await;
    // First batch of 200 succeeds, the one-id remainder fails
    Mock::given(method("GET"))
        .and(path("/efetch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<PubmedArticleSet><PubmedArticle><MedlineCitation><PMID>1</PMID>\
             <Article><ArticleTitle>First batch.</ArticleTitle></Article></MedlineCitation></PubmedArticle></PubmedArticleSet>",
        ))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/efetch.fcgi"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = PubMedClient::new(client(), governor(), None).with_base_url(server.uri());
    let records = adapter.fetch("asthma", 201).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].title, "First batch.");
}

#[tokio::test]
async fn test_pubmed_failed_first_batch_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/esearch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"esearchresult": {"idlist": ["7"]}})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/efetch.fcgi"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let adapter = PubMedClient::new(client(), governor(), None).with_base_url(server.uri());
    let err = adapter.fetch("asthma", 5).await.unwrap_err();
    assert!(matches!(err, SourceError::Status(502)), "got {err:?}");
}

#[tokio::test]
async fn test_pubmed_empty_search_skips_fetch() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/esearch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"esearchresult": {"idlist": []}})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/efetch.fcgi"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let adapter = PubMedClient::new(client(), governor(), None).with_base_url(server.uri());
    assert!(adapter.fetch("nothing", 5).await.unwrap().is_empty());
}

// ────────────────────────────────────────────────────────────────────────────
// Europe PMC
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_europepmc_core_search() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("resultType", "core"))
        .and(query_param("cursorMark", "*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nextCursorMark": "*",
            "resultList": {"result": [
                {"id": "1", "source": "MED", "pmid": "1", "title": "A", "journalTitle": "BMJ"},
                {"id": "2", "source": "MED", "pmid": "2", "title": "B"},
                {"id": "3", "source": "MED", "pmid": "3", "title": "C"}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = EuropePmcClient::new(client(), governor()).with_base_url(server.uri());
    let records = adapter.fetch("copd", 2).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].attribute("journal"), Some("BMJ"));
}

// ────────────────────────────────────────────────────────────────────────────
// ISRCTN
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_isrctn_query() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/query/format/default"))
        .and(query_param("q", "stroke"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<allTrials xmlns="http://www.67bricks.com/isrctn">
                 <fullTrial><trial><isrctn>10000001</isrctn>
                   <trialDescription><title>Stroke rehab</title></trialDescription>
                 </trial></fullTrial>
               </allTrials>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = IsrctnClient::new(client(), governor()).with_base_url(server.uri());
    let records = adapter.fetch("stroke", 5).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identifier, "ISRCTN10000001");
    assert_eq!(records[0].source, "ISRCTN Registry");
}
