//! Email discovery by reading a business's own website.

use crate::enrichment::{EmailFinder, FoundEmail};
use crate::errors::ScrapeError;
use crate::models::Lead;
use crate::normalize::{extract_domain, is_generic_email, is_valid_email};
use crate::resilience::SourceGuard;
use crate::scraper::check_response;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static EMAIL_IN_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

/// Pages tried after the landing page.
const CONTACT_PATHS: &[&str] = &["/contact", "/contact-us", "/about"];

const ASSET_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".css", ".js"];

/// Placeholder, template and error-tracker domains that leak into page source.
const IGNORED_EMAIL_DOMAINS: &[&str] = &[
    "example.com",
    "example.org",
    "domain.com",
    "yourdomain.com",
    "email.com",
    "sentry.io",
    "wixpress.com",
];

const SAME_DOMAIN_CONFIDENCE: u8 = 80;
const OTHER_DOMAIN_CONFIDENCE: u8 = 50;

fn ignored_domain(domain: &str) -> bool {
    domain.contains("sentry")
        || IGNORED_EMAIL_DOMAINS
            .iter()
            .any(|d| domain == *d || domain.ends_with(&format!(".{}", d)))
}

/// Distinct plausible addresses in `html`, in page order.
pub fn extract_emails(html: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in EMAIL_IN_PAGE.find_iter(html) {
        let email = m.as_str().trim_matches('.').to_lowercase();
        if ASSET_SUFFIXES.iter().any(|s| email.ends_with(s)) {
            continue;
        }
        let Some((_, domain)) = email.split_once('@') else {
            continue;
        };
        if ignored_domain(domain) || !is_valid_email(&email) {
            continue;
        }
        if !found.contains(&email) {
            found.push(email);
        }
    }
    found
}

/// Best candidate for a site on `site_domain`: personal before role
/// mailboxes, then addresses on the site's own domain.
pub fn best_email(emails: &[String], site_domain: &str) -> Option<FoundEmail> {
    let mut candidates: Vec<FoundEmail> = emails
        .iter()
        .map(|email| {
            let domain = email.split_once('@').map(|(_, d)| d).unwrap_or_default();
            let same_site = domain == site_domain || domain.ends_with(&format!(".{}", site_domain));
            FoundEmail {
                email: email.clone(),
                confidence: if same_site {
                    SAME_DOMAIN_CONFIDENCE
                } else {
                    OTHER_DOMAIN_CONFIDENCE
                },
                generic: is_generic_email(email),
                contact_name: None,
                position: None,
            }
        })
        .collect();

    candidates.sort_by_key(|c| (c.generic, std::cmp::Reverse(c.confidence)));
    candidates.into_iter().next()
}

/// Reads the landing page and the usual contact pages of a lead's website.
pub struct WebsiteEmailScraper {
    client: reqwest::Client,
    guard: SourceGuard,
}

impl WebsiteEmailScraper {
    pub fn new(client: reqwest::Client, guard: SourceGuard) -> Self {
        Self { client, guard }
    }

    async fn fetch_page(&self, url: &Url) -> Result<String, ScrapeError> {
        let label = format!("website {}", url);
        self.guard
            .run(&label, || async move {
                let response = self.client.get(url.clone()).send().await?;
                let response = check_response(response).await?;
                response
                    .text()
                    .await
                    .map_err(|e| ScrapeError::Parse(e.to_string()))
            })
            .await
    }
}

fn site_url(website: &str) -> Result<Url, ScrapeError> {
    let website = website.trim();
    let candidate = if website.contains("://") {
        website.to_string()
    } else {
        format!("https://{}", website)
    };
    Url::parse(&candidate).map_err(|e| ScrapeError::Parse(format!("bad website URL {}: {}", website, e)))
}

#[async_trait]
impl EmailFinder for WebsiteEmailScraper {
    fn name(&self) -> &'static str {
        "website"
    }

    async fn find_email(&self, lead: &Lead, domain: &str) -> Result<Option<FoundEmail>, ScrapeError> {
        let Some(website) = lead.website.as_deref() else {
            return Ok(None);
        };
        let landing = site_url(website)?;
        let site_domain = extract_domain(website).unwrap_or_else(|| domain.to_string());

        // An unreachable landing page means the contact pages are too.
        let mut emails = extract_emails(&self.fetch_page(&landing).await?);

        for path in CONTACT_PATHS {
            let Ok(url) = landing.join(path) else {
                continue;
            };
            match self.fetch_page(&url).await {
                Ok(html) => {
                    for email in extract_emails(&html) {
                        if !emails.contains(&email) {
                            emails.push(email);
                        }
                    }
                }
                Err(e) => tracing::debug!("Skipping {}: {}", url, e),
            }
            if emails.iter().any(|e| !is_generic_email(e)) {
                break;
            }
        }

        tracing::debug!("{} candidate emails on {}", emails.len(), site_domain);
        Ok(best_email(&emails, &site_domain))
    }
}
