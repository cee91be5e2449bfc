//! Canonical forms for the identity signals used by duplicate matching.
//!
//! Every function here is total: unparseable input yields `None` (or an
//! empty string for names) rather than an error.

use once_cell::sync::Lazy;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use url::Url;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
// Simplified RFC 5322: local@domain.tld
static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .unwrap()
});

/// Digit runs that only show up in placeholder addresses.
const FAKE_EMAIL_PATTERNS: &[&str] = &["999999", "111111", "000000", "123456789"];

const LEGAL_SUFFIXES: &[&str] = &[
    "llc",
    "inc",
    "incorporated",
    "corp",
    "corporation",
    "co",
    "company",
    "ltd",
    "limited",
    "pllc",
    "plc",
    "lp",
    "llp",
    "pc",
];

const ADDRESS_ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("road", "rd"),
    ("boulevard", "blvd"),
    ("drive", "dr"),
    ("lane", "ln"),
    ("court", "ct"),
    ("place", "pl"),
    ("suite", "ste"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
    ("highway", "hwy"),
    ("parkway", "pkwy"),
];

const GENERIC_MAILBOXES: &[&str] = &[
    "info",
    "support",
    "sales",
    "contact",
    "hello",
    "admin",
    "office",
    "team",
    "help",
    "billing",
    "service",
    "enquiries",
    "inquiries",
    "mail",
    "noreply",
    "no-reply",
    "webmaster",
    "marketing",
];

/// Hosts whose pages belong to many unrelated businesses: social profiles,
/// link-in-bio pages, listing directories and hosted Google pages. A
/// website on one of these says nothing about business identity.
const SHARED_HOSTS: &[&str] = &[
    "facebook.com",
    "fb.com",
    "fb.me",
    "instagram.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "youtube.com",
    "tiktok.com",
    "pinterest.com",
    "nextdoor.com",
    "linktr.ee",
    "linkin.bio",
    "beacons.ai",
    "sites.google.com",
    "business.google.com",
    "google.com",
    "g.page",
    "goo.gl",
    "yelp.com",
    "houzz.com",
    "angi.com",
    "angieslist.com",
    "homeadvisor.com",
    "thumbtack.com",
    "porch.com",
    "bbb.org",
    "yellowpages.com",
    "mapquest.com",
];

/// Lowercase, strip punctuation and collapse whitespace.
fn simplify(input: &str) -> String {
    let lowered = input.to_lowercase().replace('&', " and ");
    let stripped = NON_ALNUM.replace_all(&lowered, " ");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

/// Normalizes a company name for matching.
///
/// "Acme Plumbing & Heating, LLC." becomes "acme plumbing and heating".
pub fn normalize_company_name(name: &str) -> String {
    simplify(name)
        .split(' ')
        .filter(|token| !token.is_empty() && !LEGAL_SUFFIXES.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalizes a phone number to E.164.
///
/// Uses libphonenumber metadata with a US default region and falls back to
/// a digits-only heuristic for numbers the metadata rejects.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(number) = phonenumber::parse(Some(CountryId::US), trimmed) {
        if phonenumber::is_valid(&number) {
            return Some(number.format().mode(Mode::E164).to_string());
        }
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => Some(format!("+1{}", digits)),
        11 if digits.starts_with('1') => Some(format!("+{}", digits)),
        7..=15 => Some(format!("+{}", digits)),
        _ => None,
    }
}

/// Normalizes a postal address for fuzzy comparison.
pub fn normalize_address(address: &str) -> Option<String> {
    let simplified = simplify(address);
    if simplified.is_empty() {
        return None;
    }

    let normalized = simplified
        .split(' ')
        .map(|token| {
            ADDRESS_ABBREVIATIONS
                .iter()
                .find(|(long, _)| *long == token)
                .map(|(_, short)| *short)
                .unwrap_or(token)
        })
        .collect::<Vec<_>>()
        .join(" ");

    Some(normalized)
}

/// Extracts the root domain of a website, without scheme, path or `www.`.
pub fn extract_domain(website: &str) -> Option<String> {
    let trimmed = website.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&candidate).ok()?;
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    if host.is_empty() || !host.contains('.') {
        return None;
    }
    Some(host.to_string())
}

/// True when `domain` is, or is a subdomain of, a shared platform host.
pub fn is_shared_host(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.');
    SHARED_HOSTS.iter().any(|host| {
        domain == *host
            || domain
                .strip_suffix(host)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Domain usable as an identity signal: the extracted domain, unless it
/// belongs to a shared platform.
pub fn identity_domain(website: &str) -> Option<String> {
    extract_domain(website).filter(|domain| !is_shared_host(domain))
}

/// True for role mailboxes such as `info@` or `support@`.
pub fn is_generic_email(email: &str) -> bool {
    match email.trim().to_lowercase().split_once('@') {
        Some((local, _)) => GENERIC_MAILBOXES.contains(&local),
        None => false,
    }
}

/// Syntax check plus rejection of obvious placeholder addresses.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }
    if let Some(pattern) = FAKE_EMAIL_PATTERNS.iter().find(|p| email.contains(*p)) {
        tracing::debug!("Rejecting email with fake pattern '{}': {}", pattern, email);
        return false;
    }
    EMAIL.is_match(email)
}

/// `(914) 555-0134` for US numbers; anything else is returned as given.
pub fn format_phone_display(phone: &str) -> String {
    match normalize_phone(phone) {
        Some(e164) if e164.len() == 12 && e164.starts_with("+1") => {
            let digits = &e164[2..];
            format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..])
        }
        _ => phone.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_name_strips_suffixes_and_punctuation() {
        assert_eq!(normalize_company_name("Acme Plumbing, LLC."), "acme plumbing");
        assert_eq!(
            normalize_company_name("Smith & Sons Roofing Inc"),
            "smith and sons roofing"
        );
        assert_eq!(normalize_company_name("  BEST-HVAC   Corp "), "best hvac");
        assert_eq!(normalize_company_name(""), "");
    }

    #[test]
    fn test_phone_normalizes_to_e164() {
        assert_eq!(normalize_phone("(914) 555-0134").as_deref(), Some("+19145550134"));
        assert_eq!(normalize_phone("914.555.0134").as_deref(), Some("+19145550134"));
        assert_eq!(normalize_phone("1-914-555-0134").as_deref(), Some("+19145550134"));
        assert_eq!(normalize_phone("+1 914 555 0134").as_deref(), Some("+19145550134"));
    }

    #[test]
    fn test_phone_rejects_garbage() {
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("   "), None);
        assert_eq!(normalize_phone("call us"), None);
        assert_eq!(normalize_phone("12345"), None);
    }

    #[test]
    fn test_address_abbreviations() {
        assert_eq!(
            normalize_address("12 North Main Street, Suite 4").as_deref(),
            Some("12 n main st ste 4")
        );
        assert_eq!(normalize_address(" , "), None);
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://www.AcmePlumbing.com/contact?x=1").as_deref(),
            Some("acmeplumbing.com")
        );
        assert_eq!(extract_domain("acmeplumbing.com").as_deref(), Some("acmeplumbing.com"));
        assert_eq!(
            extract_domain("http://shop.acme.co.uk").as_deref(),
            Some("shop.acme.co.uk")
        );
        assert_eq!(extract_domain("not a url"), None);
        assert_eq!(extract_domain(""), None);
    }

    #[test]
    fn test_shared_hosts_are_not_identity_domains() {
        assert!(is_shared_host("facebook.com"));
        assert!(is_shared_host("m.facebook.com"));
        assert!(is_shared_host("sites.google.com"));
        assert!(!is_shared_host("notfacebook.com"));
        assert!(!is_shared_host("acmeplumbing.com"));

        assert_eq!(identity_domain("https://www.facebook.com/acmeplumbing"), None);
        assert_eq!(identity_domain("linktr.ee/zetaroofing"), None);
        assert_eq!(identity_domain("https://www.yelp.com/biz/acme"), None);
        assert_eq!(
            identity_domain("https://acmeplumbing.com/contact").as_deref(),
            Some("acmeplumbing.com")
        );
    }

    #[test]
    fn test_generic_email_detection() {
        assert!(is_generic_email("info@acme.com"));
        assert!(is_generic_email("Support@acme.com"));
        assert!(!is_generic_email("jane.doe@acme.com"));
        assert!(!is_generic_email("not-an-email"));
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("owner@acmeplumbing.com"));
        assert!(is_valid_email("j.doe+leads@mail.acme.co"));
        assert!(!is_valid_email("owner@localhost"));
        assert!(!is_valid_email("1199999999333@gmail.com"));
        assert!(!is_valid_email("not an email"));
        assert!(!is_valid_email("a@b"));
    }

    #[test]
    fn test_phone_display_format() {
        assert_eq!(format_phone_display("+19145550134"), "(914) 555-0134");
        assert_eq!(format_phone_display("914.555.0134"), "(914) 555-0134");
        assert_eq!(format_phone_display("+44 20 7946 0958"), "+44 20 7946 0958");
        assert_eq!(format_phone_display("call us"), "call us");
    }
}
