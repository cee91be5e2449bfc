//! Google Places API (New) text-search scraper.

use crate::config::ScraperConfig;
use crate::errors::ScrapeError;
use crate::models::{LeadSource, RawLead, ScrapeQuery};
use crate::resilience::SourceGuard;
use crate::scraper::{check_response, trade_key, LeadStream, Scraper, SearchFailures};
use async_stream::try_stream;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

const MAX_RESULTS_PER_REQUEST: u32 = 20;
const METERS_PER_MILE: f64 = 1609.34;

const SEARCH_FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,\
places.addressComponents,places.nationalPhoneNumber,places.internationalPhoneNumber,\
places.websiteUri,places.googleMapsUri,places.rating,places.userRatingCount,\
places.types,places.primaryType,nextPageToken";

/// Text queries issued for a trade. Unknown trades search "contractor".
pub fn search_terms(trade: &str) -> &'static [&'static str] {
    match trade_key(trade).as_str() {
        "hvac" => &["HVAC contractor", "heating and cooling", "air conditioning repair"],
        "plumbing" => &["plumber", "plumbing contractor", "emergency plumber"],
        "electrical" => &["electrician", "electrical contractor"],
        "roofing" => &["roofing contractor", "roof repair", "roofer"],
        "general" => &["general contractor", "home services"],
        "landscaping" => &["landscaping company", "lawn care service"],
        "pest_control" => &["pest control", "exterminator"],
        "cleaning" => &["cleaning service", "house cleaning", "janitorial service"],
        "painting" => &["painting contractor", "house painter"],
        "flooring" => &["flooring contractor", "hardwood floor installer"],
        "fencing" => &["fence company", "fence contractor"],
        "tree_service" => &["tree service", "tree removal"],
        "pool" => &["pool service", "pool contractor"],
        "windows" => &["window replacement", "window installer", "door installer"],
        "garage_door" => &["garage door repair", "garage door installer"],
        "concrete" => &["concrete contractor", "concrete company"],
        "siding" => &["siding contractor", "siding installer"],
        "insulation" => &["insulation contractor", "spray foam insulation"],
        "solar" => &["solar panel installer", "solar company"],
        "handyman" => &["handyman", "handyman service"],
        "appliance" => &["appliance repair", "appliance service"],
        "locksmith" => &["locksmith", "locksmith service"],
        "moving" => &["moving company", "movers"],
        "auto_repair" => &["auto repair shop", "mechanic", "car repair"],
        "auto_body" => &["auto body shop", "collision repair"],
        "towing" => &["towing service", "tow truck"],
        "dental" => &["dentist", "dental office", "family dentistry"],
        "chiropractic" => &["chiropractor", "chiropractic office"],
        "veterinary" => &["veterinarian", "animal hospital", "vet clinic"],
        "legal" => &["lawyer", "law firm", "attorney"],
        "accounting" => &["accountant", "CPA", "tax preparation", "bookkeeper"],
        "real_estate" => &["real estate agent", "realtor", "real estate broker"],
        "insurance" => &["insurance agent", "insurance broker", "insurance agency"],
        "restaurant" => &["restaurant", "dining", "cafe"],
        "salon" => &["hair salon", "beauty salon", "spa", "barber shop"],
        "fitness" => &["gym", "fitness center", "personal trainer", "yoga studio"],
        "construction" => &["construction company", "building contractor"],
        _ => &["contractor"],
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    places: Vec<Place>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Place {
    id: String,
    display_name: Option<LocalizedText>,
    formatted_address: Option<String>,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
    national_phone_number: Option<String>,
    international_phone_number: Option<String>,
    website_uri: Option<String>,
    google_maps_uri: Option<String>,
    rating: Option<f64>,
    user_rating_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct LocalizedText {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressComponent {
    long_text: String,
    short_text: String,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Default, PartialEq)]
struct ParsedAddress {
    street: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip_code: Option<String>,
}

fn parse_address_components(components: &[AddressComponent]) -> ParsedAddress {
    let mut street_number = None;
    let mut route = None;
    let mut parsed = ParsedAddress::default();

    for component in components {
        let has = |t: &str| component.types.iter().any(|ct| ct == t);
        if has("street_number") {
            street_number = Some(component.long_text.clone());
        } else if has("route") {
            route = Some(component.long_text.clone());
        } else if has("locality") {
            parsed.city = Some(component.long_text.clone());
        } else if has("administrative_area_level_1") {
            parsed.state = Some(component.short_text.clone());
        } else if has("postal_code") {
            parsed.zip_code = Some(component.long_text.clone());
        }
    }

    parsed.street = match (street_number, route) {
        (Some(number), Some(route)) => Some(format!("{} {}", number, route)),
        (_, route) => route,
    };
    parsed
}

fn place_to_lead(place: Place, trade: &str) -> Option<RawLead> {
    let name = place.display_name.map(|d| d.text).filter(|t| !t.trim().is_empty())?;
    let address = parse_address_components(&place.address_components);

    let mut lead = RawLead::new(name, trade, LeadSource::GoogleMaps);
    lead.phone = place
        .national_phone_number
        .or(place.international_phone_number)
        .filter(|p| !p.is_empty());
    lead.website = place.website_uri.filter(|w| !w.is_empty());
    lead.address = address.street.or(place.formatted_address);
    lead.city = address.city;
    lead.state = address.state;
    lead.zip_code = address.zip_code;
    lead.source_url = place.google_maps_uri;
    lead.source_id = Some(place.id);
    lead.rating = place.rating;
    lead.review_count = place.user_rating_count;
    Some(lead)
}

pub struct GooglePlacesScraper {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    config: ScraperConfig,
    guard: SourceGuard,
}

impl GooglePlacesScraper {
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
            ScrapeError::Config(
                "Google Places API key not configured. Set GOOGLE_PLACES_API_KEY.".to_string(),
            )
        })
    }

    async fn search(
        &self,
        api_key: &str,
        body: &serde_json::Value,
        field_mask: &str,
    ) -> Result<SearchResponse, ScrapeError> {
        let url = &format!("{}/places:searchText", self.base_url);
        self.guard
            .run("google places search", || async move {
                let response = self
                    .client
                    .post(url)
                    .header("X-Goog-Api-Key", api_key)
                    .header("X-Goog-FieldMask", field_mask)
                    .json(body)
                    .send()
                    .await?;
                let response = check_response(response).await?;
                response
                    .json::<SearchResponse>()
                    .await
                    .map_err(|e| ScrapeError::Parse(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl Scraper for GooglePlacesScraper {
    fn source(&self) -> LeadSource {
        LeadSource::GoogleMaps
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn needs_proxy(&self) -> bool {
        self.config.proxy_required
    }

    async fn test_connection(&self) -> bool {
        let result = match self.api_key() {
            Ok(key) => {
                let body = json!({ "textQuery": "plumber in New York", "maxResultCount": 1 });
                self.search(key, &body, "places.id").await.map(|_| ())
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                tracing::info!("Google Places API connection successful");
                true
            }
            Err(e) => {
                tracing::error!("Google Places API connection failed: {}", e);
                false
            }
        }
    }

    fn scrape<'a>(&'a self, query: &'a ScrapeQuery) -> LeadStream<'a> {
        Box::pin(try_stream! {
            let api_key = self.api_key()?;
            let location = query.location.describe();
            let radius_meters = query
                .location
                .radius_miles
                .map(|miles| (miles * METERS_PER_MILE).round());

            let mut seen_ids = HashSet::new();
            let mut yielded = 0usize;
            let mut failures = SearchFailures::new();

            'trades: for trade in &query.trades {
                for term in search_terms(trade) {
                    if query.cap_reached(yielded) {
                        break 'trades;
                    }
                    failures.attempt();
                    let text_query = format!("{} in {}", term, location);
                    tracing::info!("Searching: \"{}\"", text_query);
                    let mut page_token: Option<String> = None;

                    loop {
                        let mut body = json!({
                            "textQuery": text_query,
                            "maxResultCount": MAX_RESULTS_PER_REQUEST,
                            "languageCode": "en",
                            "regionCode": "US",
                        });
                        if let Some(radius) = radius_meters {
                            body["locationBias"] = json!({ "circle": { "radius": radius } });
                        }
                        if let Some(token) = &page_token {
                            body["pageToken"] = json!(token);
                        }

                        let page = match self.search(api_key, &body, SEARCH_FIELD_MASK).await {
                            Ok(page) => page,
                            Err(e) => {
                                failures.record(&format!("\"{}\"", text_query), e)?;
                                break;
                            }
                        };
                        if page.places.is_empty() {
                            break;
                        }

                        let found = page.places.len();
                        for place in page.places {
                            if !seen_ids.insert(place.id.clone()) {
                                continue;
                            }
                            if let Some(lead) = place_to_lead(place, trade) {
                                yield lead;
                                yielded += 1;
                                if query.cap_reached(yielded) {
                                    break 'trades;
                                }
                            }
                        }
                        tracing::debug!("Found {} places for \"{}\" (total: {})", found, term, yielded);

                        page_token = page.next_page_token;
                        if page_token.is_none() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Scraped {} total places from Google Maps", yielded);
            failures.finish()?;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(long: &str, short: &str, kind: &str) -> AddressComponent {
        AddressComponent {
            long_text: long.to_string(),
            short_text: short.to_string(),
            types: vec![kind.to_string()],
        }
    }

    #[test]
    fn test_parse_address_components() {
        let parsed = parse_address_components(&[
            component("12", "12", "street_number"),
            component("Main Street", "Main St", "route"),
            component("White Plains", "White Plains", "locality"),
            component("New York", "NY", "administrative_area_level_1"),
            component("10601", "10601", "postal_code"),
        ]);
        assert_eq!(parsed.street.as_deref(), Some("12 Main Street"));
        assert_eq!(parsed.city.as_deref(), Some("White Plains"));
        assert_eq!(parsed.state.as_deref(), Some("NY"));
        assert_eq!(parsed.zip_code.as_deref(), Some("10601"));
    }

    #[test]
    fn test_place_without_name_is_skipped() {
        let place: Place = serde_json::from_value(json!({ "id": "abc" })).unwrap();
        assert!(place_to_lead(place, "plumbing").is_none());
    }

    #[test]
    fn test_place_to_lead_prefers_national_phone() {
        let place: Place = serde_json::from_value(json!({
            "id": "ChIJ123",
            "displayName": { "text": "Acme Plumbing" },
            "formattedAddress": "12 Main St, White Plains, NY 10601, USA",
            "nationalPhoneNumber": "(914) 555-0134",
            "internationalPhoneNumber": "+1 914-555-0134",
            "rating": 4.6,
            "userRatingCount": 87
        }))
        .unwrap();
        let lead = place_to_lead(place, "plumbing").unwrap();
        assert_eq!(lead.phone.as_deref(), Some("(914) 555-0134"));
        assert_eq!(lead.source_id.as_deref(), Some("ChIJ123"));
        assert_eq!(
            lead.address.as_deref(),
            Some("12 Main St, White Plains, NY 10601, USA")
        );
        assert_eq!(lead.review_count, Some(87));
    }

    #[test]
    fn test_search_terms_fallback() {
        assert_eq!(search_terms("Pest Control")[0], "pest control");
        assert_eq!(search_terms("underwater welding"), &["contractor"]);
    }
}
