//! Yelp Fusion business-search scraper.

use crate::config::ScraperConfig;
use crate::errors::ScrapeError;
use crate::models::{LeadSource, RawLead, ScrapeQuery};
use crate::resilience::SourceGuard;
use crate::scraper::{check_response, trade_key, LeadStream, Scraper, SearchFailures};
use async_stream::try_stream;
use async_trait::async_trait;
use serde::Deserialize;

const MAX_RESULTS_PER_REQUEST: usize = 50;
/// Yelp refuses `offset + limit` beyond this.
const MAX_OFFSET: usize = 1000;
const MAX_RADIUS_METERS: u32 = 40_000;
const METERS_PER_MILE: f64 = 1609.34;

/// Yelp category aliases for a trade. Unknown trades search by term.
pub fn categories(trade: &str) -> &'static [&'static str] {
    match trade_key(trade).as_str() {
        "hvac" => &["hvac", "heating", "airconditioning"],
        "plumbing" => &["plumbing", "waterheaterinstallation"],
        "electrical" => &["electricians", "lighting"],
        "roofing" => &["roofing", "gutterservices"],
        "general" => &["contractors", "homeservices"],
        "landscaping" => &["landscaping", "lawnservices", "gardeners"],
        "pest_control" => &["pestcontrol", "exterminators"],
        "cleaning" => &["homecleaning", "officecleaning", "janitorial"],
        "painting" => &["painters", "housepainters"],
        "flooring" => &["flooring", "carpetinstallation", "tiling"],
        "fencing" => &["fences", "fencesandgates"],
        "tree_service" => &["treeservices", "treeremovals"],
        "pool" => &["swimmingpools", "poolservice", "poolcleaners"],
        "windows" => &["windows_installation", "doorinstallation"],
        "garage_door" => &["garagedoorservices"],
        "concrete" => &["masonry_concrete"],
        "siding" => &["siding"],
        "insulation" => &["insulation_installation"],
        "solar" => &["solarinstallation", "solarpanelcleaning"],
        "handyman" => &["handyman"],
        "appliance" => &["appliancesrepair"],
        "locksmith" => &["locksmiths"],
        "moving" => &["movers", "localmovers"],
        "auto_repair" => &["autorepair", "mechanics", "oilchange"],
        "auto_body" => &["autobodyshops", "collisionrepair"],
        "towing" => &["towing", "roadsideassistance"],
        "dental" => &["dentists", "cosmeticdentists", "generaldentistry"],
        "chiropractic" => &["chiropractors"],
        "veterinary" => &["vet", "animalhospitals", "veterinarians"],
        "legal" => &["lawyers", "personalinjurylaw", "estateplanninglaw"],
        "accounting" => &["accountants", "taxservices", "bookkeepers"],
        "real_estate" => &["realestateagents", "realestateservices"],
        "insurance" => &["insurance", "autoinsurance", "homeinsurance"],
        "restaurant" => &["restaurants", "newamerican", "italian", "mexican"],
        "salon" => &["hair", "hairsalons", "spas", "barbers", "nailsalons"],
        "fitness" => &["gyms", "personaltrainers", "yoga", "pilates"],
        "construction" => &["contractors", "constructioncompanies"],
        _ => &[],
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    businesses: Vec<Business>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct Business {
    id: String,
    name: String,
    #[serde(default)]
    is_closed: bool,
    url: Option<String>,
    review_count: Option<u32>,
    rating: Option<f64>,
    #[serde(default)]
    phone: String,
    location: Option<BusinessLocation>,
}

#[derive(Debug, Default, Deserialize)]
struct BusinessLocation {
    address1: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip_code: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn business_to_lead(business: Business, trade: &str) -> RawLead {
    let location = business.location.unwrap_or_default();
    let mut lead = RawLead::new(business.name, trade, LeadSource::Yelp);
    lead.phone = non_empty(Some(business.phone));
    // Fusion search results carry no business website.
    lead.website = None;
    lead.address = non_empty(location.address1);
    lead.city = non_empty(location.city);
    lead.state = non_empty(location.state);
    lead.zip_code = non_empty(location.zip_code);
    lead.source_url = business.url;
    lead.source_id = Some(business.id);
    lead.rating = business.rating;
    lead.review_count = business.review_count;
    lead
}

pub struct YelpScraper {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    config: ScraperConfig,
    guard: SourceGuard,
}

impl YelpScraper {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        config: &ScraperConfig,
        guard: SourceGuard,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            config: config.clone(),
            guard,
        }
    }

    fn api_key(&self) -> Result<&str, ScrapeError> {
        self.api_key.as_deref().ok_or_else(|| {
            ScrapeError::Config("Yelp API key not configured. Set YELP_API_KEY.".to_string())
        })
    }

    async fn get<T: serde::de::DeserializeOwned + Send>(
        &self,
        label: &str,
        path: &str,
        api_key: &str,
        params: &[(&str, String)],
    ) -> Result<T, ScrapeError> {
        let url = &format!("{}{}", self.base_url, path);
        self.guard
            .run(label, || async move {
                let response = self
                    .client
                    .get(url)
                    .bearer_auth(api_key)
                    .query(params)
                    .send()
                    .await?;
                let response = check_response(response).await?;
                response
                    .json::<T>()
                    .await
                    .map_err(|e| ScrapeError::Parse(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl Scraper for YelpScraper {
    fn source(&self) -> LeadSource {
        LeadSource::Yelp
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn needs_proxy(&self) -> bool {
        self.config.proxy_required
    }

    async fn test_connection(&self) -> bool {
        let result = match self.api_key() {
            Ok(key) => self
                .get::<serde_json::Value>(
                    "yelp autocomplete",
                    "/autocomplete",
                    key,
                    &[("text", "plumber".to_string())],
                )
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                tracing::info!("Yelp API connection successful");
                true
            }
            Err(e) => {
                tracing::error!("Yelp API connection failed: {}", e);
                false
            }
        }
    }

    fn scrape<'a>(&'a self, query: &'a ScrapeQuery) -> LeadStream<'a> {
        Box::pin(try_stream! {
            let api_key = self.api_key()?;
            let location = query.location.describe();
            let radius = query
                .location
                .radius_miles
                .map(|miles| ((miles * METERS_PER_MILE).round() as u32).min(MAX_RADIUS_METERS));

            let mut yielded = 0usize;
            let mut failures = SearchFailures::new();

            'trades: for trade in &query.trades {
                if query.cap_reached(yielded) {
                    break;
                }
                failures.attempt();
                let categories = categories(trade);
                tracing::info!("Scraping {} businesses in {}", trade, location);
                let mut offset = 0usize;

                while offset < MAX_OFFSET {
                    let limit = MAX_RESULTS_PER_REQUEST.min(MAX_OFFSET - offset);
                    let mut params = vec![
                        ("location", location.clone()),
                        ("limit", limit.to_string()),
                        ("offset", offset.to_string()),
                    ];
                    if categories.is_empty() {
                        params.push(("term", trade.clone()));
                    } else {
                        params.push(("categories", categories.join(",")));
                    }
                    if let Some(radius) = radius {
                        params.push(("radius", radius.to_string()));
                    }

                    let page: SearchResponse = match self
                        .get("yelp business search", "/businesses/search", api_key, &params)
                        .await
                    {
                        Ok(page) => page,
                        Err(e) => {
                            failures.record(&format!("{} at offset {}", trade, offset), e)?;
                            break;
                        }
                    };
                    if page.businesses.is_empty() {
                        break;
                    }

                    offset += page.businesses.len();
                    let total = page.total;
                    for business in page.businesses {
                        if business.is_closed {
                            continue;
                        }
                        yield business_to_lead(business, trade);
                        yielded += 1;
                        if query.cap_reached(yielded) {
                            break 'trades;
                        }
                    }
                    tracing::debug!(
                        "Scraped {}/{} {} businesses",
                        offset,
                        total.min(MAX_OFFSET),
                        trade
                    );

                    if offset >= total {
                        break;
                    }
                }
            }

            tracing::info!("Scraped {} total businesses from Yelp", yielded);
            failures.finish()?;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_business_to_lead() {
        let business: Business = serde_json::from_value(json!({
            "id": "acme-plumbing-white-plains",
            "name": "Acme Plumbing",
            "is_closed": false,
            "url": "https://www.yelp.com/biz/acme-plumbing-white-plains",
            "review_count": 112,
            "rating": 4.5,
            "phone": "+19145550134",
            "location": {
                "address1": "12 Main St",
                "address2": "",
                "city": "White Plains",
                "state": "NY",
                "zip_code": "10601"
            }
        }))
        .unwrap();
        let lead = business_to_lead(business, "plumbing");
        assert_eq!(lead.source, LeadSource::Yelp);
        assert_eq!(lead.phone.as_deref(), Some("+19145550134"));
        assert_eq!(lead.address.as_deref(), Some("12 Main St"));
        assert!(lead.website.is_none());
        assert_eq!(lead.review_count, Some(112));
    }

    #[test]
    fn test_empty_phone_is_dropped() {
        let business: Business =
            serde_json::from_value(json!({ "id": "x", "name": "No Phone Co", "phone": "" }))
                .unwrap();
        assert!(business_to_lead(business, "general").phone.is_none());
    }

    #[test]
    fn test_categories_lookup() {
        assert!(categories("HVAC").contains(&"hvac"));
        assert!(categories("underwater welding").is_empty());
    }
}
