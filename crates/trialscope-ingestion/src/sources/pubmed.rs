//! PubMed E-utilities client.
//!
//! Two-step protocol:
//!   esearch: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi  (JSON id list)
//!   efetch:  https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi   (XML, batched ids)
//!
//! The search is restricted to clinical-trial publication types.
//!
//! Attributes: journal, publication_date, authors, publication_types.

use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, instrument, warn};
use trialscope_common::sandbox::SandboxClient as Client;
use trialscope_common::text;

use super::{fetch_json, fetch_text, SourceAdapter, SourceError};
use crate::governor::RateGovernor;
use crate::models::{NormalizedRecord, SourceId};

const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
/// Ids per efetch call.
const EFETCH_BATCH: usize = 200;
const MAX_AUTHORS: usize = 6;

pub struct PubMedClient {
    client: Client,
    governor: Arc<RateGovernor>,
    api_key: Option<String>,
    base_url: String,
}

impl PubMedClient {
    pub fn new(client: Client, governor: Arc<RateGovernor>, api_key: Option<String>) -> Self {
        Self { client, governor, api_key, base_url: EUTILS_BASE_URL.to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }

    fn with_key(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// Search PubMed and return a list of PMIDs.
    #[instrument(skip(self))]
    async fn esearch(&self, query: &str, max: usize) -> Result<Vec<String>, SourceError> {
        let params = self.with_key(vec![
            ("db",      "pubmed".to_string()),
            ("term",    format!("{query}[Title/Abstract] AND clinical trial[Publication Type]")),
            ("retmax",  max.to_string()),
            ("retmode", "json".to_string()),
            ("sort",    "relevance".to_string()),
        ]);
        let request = self.client.get(&self.endpoint("esearch.fcgi"))?.query(&params);
        let resp = fetch_json(&self.governor, SourceId::PubMed, request).await?;

        let ids: Vec<String> = resp["esearchresult"]["idlist"]
            .as_array()
            .map(|ids| ids.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        debug!(n = ids.len(), "PubMed esearch returned PMIDs");
        Ok(ids)
    }

    /// Fetch article XML for one batch of PMIDs.
    #[instrument(skip(self, pmids), fields(n = pmids.len()))]
    async fn efetch(&self, pmids: &[String]) -> Result<Vec<NormalizedRecord>, SourceError> {
        let params = self.with_key(vec![
            ("db",      "pubmed".to_string()),
            ("id",      pmids.join(",")),
            ("rettype", "abstract".to_string()),
            ("retmode", "xml".to_string()),
        ]);
        let request = self.client.get(&self.endpoint("efetch.fcgi"))?.query(&params);
        let xml = fetch_text(&self.governor, SourceId::PubMed, request).await?;
        Ok(parse_pubmed_xml(&xml))
    }
}

#[async_trait]
impl SourceAdapter for PubMedClient {
    fn id(&self) -> SourceId {
        SourceId::PubMed
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<NormalizedRecord>, SourceError> {
        let mut pmids = self.esearch(query, max_results).await?;
        pmids.truncate(max_results);
        if pmids.is_empty() {
            return Ok(vec![]);
        }

        // A failed batch after the first keeps what earlier batches parsed
        let mut records = Vec::with_capacity(pmids.len());
        for (i, batch) in pmids.chunks(EFETCH_BATCH).enumerate() {
            match self.efetch(batch).await {
                Ok(parsed) => records.extend(parsed),
                Err(e) if i == 0 => return Err(e),
                Err(e) => {
                    warn!(batch = i, error = %e, kept = records.len(), "PubMed efetch batch failed");
                    break;
                }
            }
        }
        Ok(records)
    }
}

#[derive(Default)]
struct ArticleFields {
    pmid: Option<String>,
    title: String,
    /// One entry per AbstractText section.
    abstract_parts: Vec<String>,
    journal: Option<String>,
    year: Option<String>,
    authors: Vec<String>,
    pub_types: Vec<String>,
}

impl ArticleFields {
    fn into_record(self) -> Option<NormalizedRecord> {
        let Some(pmid) = self.pmid else {
            warn!("Skipping PubMed article without PMID");
            return None;
        };

        let mut authors = self.authors;
        if authors.len() > MAX_AUTHORS {
            authors.truncate(MAX_AUTHORS);
            authors.push("et al.".to_string());
        }

        Some(
            NormalizedRecord::new(
                text::sanitize(&self.title),
                format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid),
                SourceId::PubMed.display_name(),
            )
            .with_abstract(text::sanitize(&self.abstract_parts.join(" ")))
            .with_identifier(pmid)
            .with_attribute("journal", self.journal)
            .with_attribute("publication_date", self.year)
            .with_attribute("authors", Some(authors.join(", ")))
            .with_attribute("publication_types", Some(self.pub_types.join("; "))),
        )
    }
}

/// Parse efetch XML (`<PubmedArticleSet><PubmedArticle>…`). Articles that
/// cannot be identified are skipped; a syntax error ends parsing but keeps
/// the articles completed so far.
///
/// Text is not trimmed while reading: title and abstract chunks split by
/// inline markup are concatenated as-is and sanitised once per record.
fn parse_pubmed_xml(xml: &str) -> Vec<NormalizedRecord> {
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);

    let mut current: Option<ArticleFields> = None;
    let mut in_pmid      = false;
    let mut in_title     = false;
    let mut in_abstract  = false;
    let mut in_journal   = false;
    let mut in_pub_date  = false;
    let mut in_year      = false;
    let mut in_last_name = false;
    let mut in_fore_name = false;
    let mut in_pub_type  = false;
    let mut last_name = String::new();
    let mut fore_name = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"PubmedArticle"   => current = Some(ArticleFields::default()),
                b"PMID"            => in_pmid = true,
                b"ArticleTitle"    => in_title = true,
                b"AbstractText"    => {
                    in_abstract = true;
                    if let Some(ref mut a) = current {
                        a.abstract_parts.push(String::new());
                    }
                }
                b"Title"           => in_journal = true,
                b"PubDate"         => in_pub_date = true,
                b"Year"            => in_year = true,
                b"Author"          => { last_name.clear(); fore_name.clear(); }
                b"LastName"        => in_last_name = true,
                b"ForeName"        => in_fore_name = true,
                b"PublicationType" => in_pub_type = true,
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                let Some(ref mut a) = current else {
                    buf.clear();
                    continue;
                };
                let raw = match e.unescape() {
                    Ok(t) => t,
                    Err(err) => {
                        warn!("Undecodable text in PubMed XML: {}", err);
                        buf.clear();
                        continue;
                    }
                };
                if in_title { a.title.push_str(&raw); }
                if in_abstract {
                    if let Some(part) = a.abstract_parts.last_mut() {
                        part.push_str(&raw);
                    }
                }

                let chunk = raw.trim().to_string();
                if chunk.is_empty() {
                    buf.clear();
                    continue;
                }
                // The first PMID is the article's own; later ones are citations
                if in_pmid && a.pmid.is_none()  { a.pmid = Some(chunk.clone()); }
                if in_journal                   { a.journal = Some(chunk.clone()); }
                if in_pub_date && in_year       { a.year = Some(chunk.clone()); }
                if in_last_name                 { last_name = chunk.clone(); }
                if in_fore_name                 { fore_name = chunk.clone(); }
                if in_pub_type                  { a.pub_types.push(chunk); }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"PMID"            => in_pmid = false,
                b"ArticleTitle"    => in_title = false,
                b"AbstractText"    => in_abstract = false,
                b"Title"           => in_journal = false,
                b"PubDate"         => in_pub_date = false,
                b"Year"            => in_year = false,
                b"LastName"        => in_last_name = false,
                b"ForeName"        => in_fore_name = false,
                b"PublicationType" => in_pub_type = false,
                b"Author" => {
                    if let Some(ref mut a) = current {
                        let name = format!("{} {}", fore_name, last_name).trim().to_string();
                        if !name.is_empty() {
                            a.authors.push(name);
                        }
                    }
                }
                b"PubmedArticle" => {
                    if let Some(record) = current.take().and_then(ArticleFields::into_record) {
                        records.push(record);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!("PubMed XML parse error: {}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_ARTICLES: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">12345678</PMID>
      <Article>
        <Journal><JournalIssue><PubDate><Year>2021</Year></PubDate></JournalIssue><Title>Diabetes Care</Title></Journal>
        <ArticleTitle>Metformin in <i>type 2</i> diabetes.</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">Background text.</AbstractText>
          <AbstractText Label="RESULTS">Results &amp; more.</AbstractText>
        </Abstract>
        <AuthorList>
          <Author><LastName>Smith</LastName><ForeName>John</ForeName></Author>
          <Author><CollectiveName>Study Group</CollectiveName></Author>
        </AuthorList>
        <PublicationTypeList>
          <PublicationType>Randomized Controlled Trial</PublicationType>
        </PublicationTypeList>
      </Article>
      <CommentsCorrectionsList>
        <CommentsCorrections><PMID>99999999</PMID></CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>87654321</PMID>
      <Article><ArticleTitle></ArticleTitle></Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_articles() {
        let records = parse_pubmed_xml(TWO_ARTICLES);
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.identifier, "12345678");
        assert_eq!(first.title, "Metformin in type 2 diabetes.");
        assert_eq!(first.url, "https://pubmed.ncbi.nlm.nih.gov/12345678/");
        assert_eq!(first.abstract_text, "Background text. Results & more.");
        assert_eq!(first.attribute("journal"), Some("Diabetes Care"));
        assert_eq!(first.attribute("publication_date"), Some("2021"));
        assert_eq!(first.attribute("authors"), Some("John Smith"));
        assert_eq!(first.attribute("publication_types"), Some("Randomized Controlled Trial"));

        let second = &records[1];
        assert_eq!(second.title, "No title");
        assert_eq!(second.abstract_text, "No abstract available");
    }

    #[test]
    fn test_inline_markup_does_not_split_words() {
        let xml = r#"<PubmedArticleSet><PubmedArticle><MedlineCitation>
            <PMID>42</PMID>
            <Article>
              <ArticleTitle>HbA<sub>1c</sub> lowering with <i>SGLT2</i>-inhibitors.</ArticleTitle>
              <Abstract>
                <AbstractText>Mean HbA<sub>1c</sub> fell.</AbstractText>
                <AbstractText>CO<sub>2</sub> levels unchanged.</AbstractText>
              </Abstract>
            </Article>
        </MedlineCitation></PubmedArticle></PubmedArticleSet>"#;
        let records = parse_pubmed_xml(xml);
        assert_eq!(records[0].title, "HbA1c lowering with SGLT2-inhibitors.");
        assert_eq!(records[0].abstract_text, "Mean HbA1c fell. CO2 levels unchanged.");
    }

    #[test]
    fn test_article_without_pmid_is_skipped() {
        let xml = r#"<PubmedArticleSet>
            <PubmedArticle><MedlineCitation><Article><ArticleTitle>Orphan</ArticleTitle></Article></MedlineCitation></PubmedArticle>
            <PubmedArticle><MedlineCitation><PMID>1</PMID><Article><ArticleTitle>Kept</ArticleTitle></Article></MedlineCitation></PubmedArticle>
        </PubmedArticleSet>"#;
        let records = parse_pubmed_xml(xml);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Kept");
    }

    #[test]
    fn test_truncated_xml_keeps_completed_articles() {
        let xml = r#"<PubmedArticleSet>
            <PubmedArticle><MedlineCitation><PMID>1</PMID><Article><ArticleTitle>Done</ArticleTitle></Article></MedlineCitation></PubmedArticle>
            <PubmedArticle><MedlineCitation><PMID>2</PMID><Article><ArticleTitle>Cut"#;
        let records = parse_pubmed_xml(xml);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identifier, "1");
    }
}
