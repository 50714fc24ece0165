// src/services/subjects.rs

//! Subject directory: the immutable title → subject index and its sources.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{Subject, SubjectRecord};

/// People with a parliament-watch id and an article on the German wiki.
pub const POLITICIAN_QUERY: &str = r#"SELECT DISTINCT ?item ?page_title ?article_url ?name ?first_name ?last_name ?partyHashtag ?partyTwittername ?partyShortname WHERE {
  ?item wdt:P5355 ?value;
    wdt:P1559 ?name.
  ?article schema:about ?item;
    schema:isPartOf <https://de.wikipedia.org/>;
    schema:name ?page_title.
  ?article_url schema:about ?item;
    schema:isPartOf <https://de.wikipedia.org/>.
  OPTIONAL {
    ?item wdt:P735 ?fval.
    ?fval wdt:P1705 ?first_name.
  }
  OPTIONAL {
    ?item wdt:P734 ?lval.
    ?lval wdt:P1705 ?last_name.
  }
  OPTIONAL {
    ?item wdt:P102 ?pval.
    ?pval wdt:P2572 ?partyHashtag.
  }
  OPTIONAL {
    ?item wdt:P102 ?pval.
    ?pval wdt:P2002 ?partyTwittername.
  }
  OPTIONAL {
    ?item wdt:P102 ?pval.
    ?pval wdt:P1813 ?partyShortname.
  }
  SERVICE wikibase:label { bd:serviceParam wikibase:language "de". }
}"#;

/// Read-only lookup from exact article title to subject.
///
/// Built once at startup and shared behind an `Arc`; never mutated.
#[derive(Debug, Clone, Default)]
pub struct SubjectIndex {
    subjects: HashMap<String, Subject>,
}

impl SubjectIndex {
    /// Build the index from directory rows.
    ///
    /// The first row for a title wins, unless a later row carries a first
    /// name that prefixes the stored subject's title: rows with the more
    /// accurate given name replace earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = SubjectRecord>) -> Self {
        let mut subjects: HashMap<String, Subject> = HashMap::new();

        for record in records {
            if record.title.is_empty() {
                continue;
            }
            let subject = record.into_subject();

            if let Some(current) = subjects.get(&subject.page_title) {
                let better_first_name = !subject.first_name.is_empty()
                    && current.page_title.starts_with(subject.first_name.as_str());
                if !better_first_name {
                    continue;
                }
            }
            subjects.insert(subject.page_title.clone(), subject);
        }

        Self { subjects }
    }

    pub fn get(&self, title: &str) -> Option<&Subject> {
        self.subjects.get(title)
    }

    pub fn contains(&self, title: &str) -> bool {
        self.subjects.contains_key(title)
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// All subjects, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Subject> {
        self.subjects.values()
    }
}

/// A one-shot provider of subject directory rows.
#[async_trait]
pub trait SubjectSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<SubjectRecord>>;
}

/// Load the subject index from a source, refusing an empty directory.
pub async fn load_index(source: &dyn SubjectSource) -> Result<SubjectIndex> {
    let records = source.fetch().await?;
    let index = SubjectIndex::from_records(records);
    if index.is_empty() {
        return Err(AppError::subjects("directory returned no subjects"));
    }
    Ok(index)
}

/// Subject rows from the Wikidata SPARQL endpoint.
pub struct WikidataSource {
    client: Client,
    endpoint: String,
}

impl WikidataSource {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SubjectSource for WikidataSource {
    async fn fetch(&self) -> Result<Vec<SubjectRecord>> {
        log::info!("[Subjects] Querying {}", self.endpoint);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("format", "json"), ("query", POLITICIAN_QUERY)])
            .header(reqwest::header::ACCEPT, "application/sparql-results+json")
            .send()
            .await?
            .error_for_status()?;

        let body: SparqlResponse = response.json().await?;
        Ok(body.into_records())
    }
}

/// Subject rows from a local JSON array.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SubjectSource for FileSource {
    async fn fetch(&self) -> Result<Vec<SubjectRecord>> {
        log::info!("[Subjects] Reading {}", self.path.display());
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    #[serde(default)]
    bindings: Vec<Binding>,
}

#[derive(Debug, Default, Deserialize)]
struct Term {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Binding {
    #[serde(default)]
    page_title: Term,
    #[serde(default)]
    article_url: Term,
    #[serde(default)]
    name: Term,
    #[serde(default)]
    first_name: Term,
    #[serde(default)]
    last_name: Term,
    #[serde(default, rename = "partyHashtag")]
    party_hashtag: Term,
    #[serde(default, rename = "partyTwittername")]
    party_handle: Term,
    #[serde(default, rename = "partyShortname")]
    party_short_name: Term,
}

impl SparqlResponse {
    fn into_records(self) -> Vec<SubjectRecord> {
        self.results
            .bindings
            .into_iter()
            .map(|b| SubjectRecord {
                title: b.page_title.value,
                article_url: b.article_url.value,
                name: b.name.value,
                first_name: b.first_name.value,
                last_name: b.last_name.value,
                party_hashtag: b.party_hashtag.value,
                party_handle: b.party_handle.value,
                party_short_name: b.party_short_name.value,
            })
            .collect()
    }
}
