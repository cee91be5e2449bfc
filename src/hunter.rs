//! Hunter.io domain search.

use crate::enrichment::{EmailFinder, FoundEmail};
use crate::errors::ScrapeError;
use crate::models::Lead;
use crate::normalize::{is_generic_email, is_valid_email};
use crate::resilience::SourceGuard;
use crate::scraper::check_response;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct DomainSearchResponse {
    data: DomainSearchData,
}

#[derive(Debug, Default, Deserialize)]
struct DomainSearchData {
    #[serde(default)]
    emails: Vec<HunterEmail>,
}

#[derive(Debug, Deserialize)]
struct HunterEmail {
    value: String,
    #[serde(default)]
    confidence: u32,
    first_name: Option<String>,
    last_name: Option<String>,
    position: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl HunterEmail {
    fn into_found(self) -> FoundEmail {
        let generic = self.kind.as_deref() == Some("generic") || is_generic_email(&self.value);
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        FoundEmail {
            email: self.value.trim().to_lowercase(),
            confidence: self.confidence.min(100) as u8,
            generic,
            contact_name: (!name.is_empty()).then_some(name),
            position: self.position.filter(|p| !p.trim().is_empty()),
        }
    }
}

pub struct HunterClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    guard: SourceGuard,
}

impl HunterClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        guard: SourceGuard,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            guard,
        }
    }

    async fn domain_search(&self, domain: &str) -> Result<Vec<HunterEmail>, ScrapeError> {
        let url = &format!("{}/domain-search", self.base_url);
        let label = format!("hunter {}", domain);
        let response: DomainSearchResponse = self
            .guard
            .run(&label, || async move {
                let response = self
                    .client
                    .get(url)
                    .query(&[("domain", domain), ("api_key", self.api_key.as_str())])
                    .send()
                    .await?;
                let response = check_response(response).await?;
                response
                    .json::<DomainSearchResponse>()
                    .await
                    .map_err(|e| ScrapeError::Parse(e.to_string()))
            })
            .await?;
        Ok(response.data.emails)
    }
}

#[async_trait]
impl EmailFinder for HunterClient {
    fn name(&self) -> &'static str {
        "hunter"
    }

    async fn find_email(&self, _lead: &Lead, domain: &str) -> Result<Option<FoundEmail>, ScrapeError> {
        let emails = self.domain_search(domain).await?;
        tracing::debug!("Hunter returned {} emails for {}", emails.len(), domain);

        Ok(emails
            .into_iter()
            .filter(|e| is_valid_email(&e.value))
            .map(HunterEmail::into_found)
            .max_by_key(|found| (!found.generic, found.confidence)))
    }
}
