//! Stage 2: website enrichment.
//!
//! For leads still missing an email or scraped text, fetches the homepage
//! plus a fixed set of likely contact-page paths and extracts an email,
//! a contact name (via role-keyword heuristics), a phone number, and
//! sanitized page text.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use switchy_database::DatabaseValue;

use crate::config::{website_scrape_delay, website_scrape_timeout};
use crate::db::PipelineDb;
use crate::PipelineError;

const CONTACT_PATHS: &[&str] = &["/", "/contact", "/contacto", "/about", "/about-us", "/quienes-somos"];

const ROLE_KEYWORDS: &[&str] = &[
    "ceo", "founder", "fundador", "director", "gerente", "owner", "propietario", "manager",
];

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("static regex"));

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\+?\d[\d\s().-]{7,}\d)").expect("static regex"));

struct Candidate {
    id: i64,
    website: String,
}

/// Enriches every lead lacking an email or scraped text that has a known
/// website. Returns the number of leads updated with at least one new
/// field.
///
/// # Errors
///
/// Returns [`PipelineError`] only for a database failure; an individual
/// fetch failure is logged and that lead is simply left unenriched this run.
pub async fn run(db: &PipelineDb, client: &reqwest::Client) -> Result<i64, PipelineError> {
    let candidates = leads_needing_enrichment(db).await?;
    let mut enriched = 0i64;

    for candidate in candidates {
        match scrape_site(client, &candidate.website).await {
            Ok(result) if result.has_any() => {
                apply_result(db, candidate.id, &result).await?;
                enriched += 1;
            }
            Ok(_) => {}
            Err(e) => log::warn!("website_enrichment: failed to scrape {}: {e}", candidate.website),
        }
        tokio::time::sleep(website_scrape_delay()).await;
    }

    Ok(enriched)
}

async fn leads_needing_enrichment(db: &PipelineDb) -> Result<Vec<Candidate>, PipelineError> {
    use moosicbox_json_utils::database::ToValue as _;

    let rows = db
        .query(
            "SELECT id, website FROM leads
             WHERE website IS NOT NULL AND status = 'new'
               AND (email IS NULL OR scraped_text IS NULL)",
            &[],
        )
        .await?;

    rows.iter()
        .map(|row| {
            Ok(Candidate {
                id: row.to_value("id").map_err(crate::conversion_error)?,
                website: row.to_value("website").map_err(crate::conversion_error)?,
            })
        })
        .collect()
}

#[derive(Default)]
struct ScrapeResult {
    email: Option<String>,
    contact_name: Option<String>,
    phone: Option<String>,
    text: Option<String>,
}

impl ScrapeResult {
    const fn has_any(&self) -> bool {
        self.email.is_some() || self.contact_name.is_some() || self.phone.is_some() || self.text.is_some()
    }
}

async fn scrape_site(client: &reqwest::Client, base_url: &str) -> Result<ScrapeResult, PipelineError> {
    let mut result = ScrapeResult::default();
    let mut combined_text = String::new();

    for path in CONTACT_PATHS {
        let url = join_url(base_url, path);
        let body = match fetch(client, &url).await {
            Ok(body) => body,
            Err(e) => {
                log::debug!("website_enrichment: {url} failed: {e}");
                continue;
            }
        };

        let page_text = sanitize_html(&body);
        combined_text.push_str(&page_text);
        combined_text.push(' ');

        if result.email.is_none() {
            result.email = extract_email(&page_text);
        }
        if result.phone.is_none() {
            result.phone = extract_phone(&page_text);
        }
        if result.contact_name.is_none() {
            result.contact_name = extract_contact_name(&page_text);
        }

        if result.email.is_some() && result.contact_name.is_some() && result.phone.is_some() {
            break;
        }
    }

    if !combined_text.trim().is_empty() {
        let trimmed = combined_text.trim();
        let cutoff = trimmed.char_indices().map(|(i, _)| i).nth(4000).unwrap_or(trimmed.len());
        result.text = Some(trimmed[..cutoff].to_string());
    }

    Ok(result)
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<String, PipelineError> {
    let response = client.get(url).timeout(website_scrape_timeout()).send().await?;
    let response = response.error_for_status()?;
    Ok(response.text().await?)
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path == "/" {
        base.to_string()
    } else {
        format!("{base}{path}")
    }
}

/// Strips tags and collapses whitespace using `scraper`'s parser, the way
/// a CSS-selector based table extractor would read plain text out of a
/// document body.
fn sanitize_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").unwrap_or_else(|_| Selector::parse("html").expect("html selector"));
    let text = document
        .select(&body_selector)
        .flat_map(|el| el.text())
        .collect::<Vec<_>>()
        .join(" ");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_ascii_lowercase())
}

fn extract_phone(text: &str) -> Option<String> {
    PHONE_RE.find(text).map(|m| m.as_str().trim().to_string())
}

/// Finds a contact name by locating a role keyword and taking the next
/// two capitalized tokens as a name, a simple heuristic rather than NER.
fn extract_contact_name(text: &str) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    for (i, word) in words.iter().enumerate() {
        let normalized = word.to_ascii_lowercase();
        let normalized = normalized.trim_matches(|c: char| !c.is_alphanumeric());
        if ROLE_KEYWORDS.contains(&normalized) {
            let name: Vec<&str> = words
                .iter()
                .skip(i + 1)
                .take(2)
                .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
                .copied()
                .collect();
            if !name.is_empty() {
                return Some(name.join(" "));
            }
        }
    }
    None
}

async fn apply_result(db: &PipelineDb, lead_id: i64, result: &ScrapeResult) -> Result<(), PipelineError> {
    if let Some(email) = &result.email {
        db.exec(
            "UPDATE leads SET email = ?, email_source = ? WHERE id = ? AND email IS NULL",
            &[
                DatabaseValue::String(email.clone()),
                DatabaseValue::String(agentops_leadgen_models::EmailSource::WebsiteScrape.as_str().to_string()),
                DatabaseValue::Int64(lead_id),
            ],
        )
        .await?;
    }
    if let Some(contact_name) = &result.contact_name {
        db.exec(
            "UPDATE leads SET contact_name = ? WHERE id = ? AND contact_name IS NULL",
            &[DatabaseValue::String(contact_name.clone()), DatabaseValue::Int64(lead_id)],
        )
        .await?;
    }
    if let Some(phone) = &result.phone {
        db.exec(
            "UPDATE leads SET phone = ? WHERE id = ? AND phone IS NULL",
            &[DatabaseValue::String(phone.clone()), DatabaseValue::Int64(lead_id)],
        )
        .await?;
    }
    if let Some(text) = &result.text {
        db.exec(
            "UPDATE leads SET scraped_text = ? WHERE id = ?",
            &[DatabaseValue::String(text.clone()), DatabaseValue::Int64(lead_id)],
        )
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_email_from_mailto_text() {
        let text = "Contact us at hello@example.com for more info";
        assert_eq!(extract_email(text), Some("hello@example.com".to_string()));
    }

    #[test]
    fn extracts_phone_number() {
        let text = "Call us at +34 912 345 678 any time";
        assert!(extract_phone(text).is_some());
    }

    #[test]
    fn extracts_contact_name_after_role_keyword() {
        let text = "Our Director Maria Lopez leads the team";
        assert_eq!(extract_contact_name(text), Some("Maria Lopez".to_string()));
    }

    #[test]
    fn sanitize_html_strips_tags() {
        let html = "<html><body><p>Hello <b>World</b></p></body></html>";
        assert_eq!(sanitize_html(html), "Hello World");
    }

    #[test]
    fn join_url_handles_root_and_subpath() {
        assert_eq!(join_url("https://acme.es/", "/"), "https://acme.es");
        assert_eq!(join_url("https://acme.es", "/contact"), "https://acme.es/contact");
    }
}
