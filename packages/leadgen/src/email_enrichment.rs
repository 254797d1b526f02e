//! Stage 3: email enrichment.
//!
//! Crucial invariant: a lead "needs email enrichment" when `email IS NULL
//! AND status = 'new' AND website IS NOT NULL`, regardless of any past
//! `email_source`. A lead previously matched via Apollo with no email
//! (`email_source = 'none'`) must remain eligible here — filtering this
//! query by `email_source` is the regression this module guards against.

use std::sync::LazyLock;

use async_trait::async_trait;
use moosicbox_json_utils::database::ToValue as _;
use regex::Regex;
use switchy_database::DatabaseValue;

use agentops_leadgen_models::EmailSource;

use crate::clients::{ApolloClient, SearchClient};
use crate::conversion_error;
use crate::db::PipelineDb;
use crate::PipelineError;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("static regex"));

const GENERIC_GOOD_LOCAL_PARTS: &[&str] = &["info", "hello", "contacto", "contact", "ventas", "sales"];
const GENERIC_BAD_LOCAL_PARTS: &[&str] = &["noreply", "no-reply", "postmaster", "mailer-daemon", "donotreply"];

/// Quality tier of a discovered email address, ordered so a personal
/// address always wins over a generic one, and a generic-good address
/// always wins over a generic-bad one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EmailQuality {
    GenericBad,
    GenericGood,
    Personal,
}

#[must_use]
pub fn classify_email(email: &str) -> EmailQuality {
    let local = email.split('@').next().unwrap_or(email).to_ascii_lowercase();
    if GENERIC_BAD_LOCAL_PARTS.iter().any(|p| local == *p) {
        EmailQuality::GenericBad
    } else if GENERIC_GOOD_LOCAL_PARTS.iter().any(|p| local == *p) {
        EmailQuality::GenericGood
    } else {
        EmailQuality::Personal
    }
}

/// Probes whether a domain's mail exchanger is willing to accept a
/// message, without completing a real delivery. Modeled as a trait since
/// a full MX-lookup + SMTP `RCPT TO` handshake needs a DNS/SMTP crate not
/// present in this workspace's dependency stack; the default
/// implementation substitutes a TCP-reachability check on port 25.
#[async_trait]
pub trait MxProbe: Send + Sync {
    async fn accepts_mail(&self, domain: &str) -> Result<bool, PipelineError>;
}

/// Default probe: attempts a TCP connect to `domain:25` as a coarse
/// reachability signal. This is not a substitute for a real SMTP `RCPT TO`
/// verification, only a stand-in behind the same trait boundary.
pub struct TcpReachabilityProbe;

#[async_trait]
impl MxProbe for TcpReachabilityProbe {
    async fn accepts_mail(&self, domain: &str) -> Result<bool, PipelineError> {
        let addr = format!("{domain}:25");
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), tokio::net::TcpStream::connect(&addr)).await;
        Ok(matches!(result, Ok(Ok(_))))
    }
}

struct Candidate {
    id: i64,
    domain: String,
    company_name: Option<String>,
}

/// Returns every lead needing email enrichment: `email IS NULL AND status
/// = 'new' AND website IS NOT NULL`, with no `email_source` condition.
///
/// # Errors
///
/// Returns [`PipelineError`] if the query fails or a row can't be converted.
pub async fn get_leads_needing_email_enrichment(db: &PipelineDb) -> Result<Vec<i64>, PipelineError> {
    let rows = db
        .query(
            "SELECT id FROM leads WHERE email IS NULL AND status = 'new' AND website IS NOT NULL",
            &[],
        )
        .await?;
    rows.iter().map(|row| row.to_value("id").map_err(conversion_error)).collect()
}

async fn candidates(db: &PipelineDb) -> Result<Vec<Candidate>, PipelineError> {
    let rows = db
        .query(
            "SELECT id, domain, company_name FROM leads
             WHERE email IS NULL AND status = 'new' AND website IS NOT NULL",
            &[],
        )
        .await?;

    rows.iter()
        .map(|row| {
            Ok(Candidate {
                id: row.to_value("id").map_err(conversion_error)?,
                domain: row.to_value("domain").map_err(conversion_error)?,
                company_name: row.to_value("company_name").map_err(conversion_error)?,
            })
        })
        .collect()
}

/// Runs Apollo matching (if configured), then the free-tier fallback
/// (search, then MX probe + pattern guess), over every lead needing email
/// enrichment. Returns the number of leads that gained an email or an
/// explicit `email_source = none` marker this run.
///
/// # Errors
///
/// Returns [`PipelineError`] only for a database failure.
pub async fn run(
    db: &PipelineDb,
    apollo: Option<&dyn ApolloClient>,
    search: &dyn SearchClient,
    mx: &dyn MxProbe,
) -> Result<i64, PipelineError> {
    let mut enriched = 0i64;

    for candidate in candidates(db).await? {
        if let Some(apollo) = apollo {
            match apollo.match_domain(&candidate.domain, candidate.company_name.as_deref()).await {
                Ok(Some(person_match)) => {
                    if let Some(email) = person_match.email {
                        apply_email(db, candidate.id, &email, EmailSource::Apollo).await?;
                        fill_contact_fields(db, candidate.id, person_match.contact_name.as_deref(), person_match.phone.as_deref())
                            .await?;
                        enriched += 1;
                        continue;
                    }
                    // Matched, but no email: retryable, recorded as `none`.
                    mark_no_email(db, candidate.id, EmailSource::None).await?;
                    enriched += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => log::warn!("email_enrichment: apollo lookup failed for {}: {e}", candidate.domain),
            }
        }

        if let Some((email, source)) = free_tier_lookup(&candidate.domain, search, mx).await {
            apply_email(db, candidate.id, &email, source).await?;
            enriched += 1;
        }
    }

    second_pass_phone_lookup(db, apollo).await?;

    Ok(enriched)
}

async fn free_tier_lookup(domain: &str, search: &dyn SearchClient, mx: &dyn MxProbe) -> Option<(String, EmailSource)> {
    if let Some(email) = search_for_email(domain, search).await {
        return Some((email, EmailSource::SerperSearch));
    }

    match mx.accepts_mail(domain).await {
        Ok(true) => Some((format!("info@{domain}"), EmailSource::PatternGuess)),
        Ok(false) => None,
        Err(e) => {
            log::warn!("email_enrichment: mx probe failed for {domain}: {e}");
            None
        }
    }
}

/// Searches for emails referencing `domain`, picking the highest-quality
/// one among those found (personal > generic-good > generic-bad).
async fn search_for_email(domain: &str, search: &dyn SearchClient) -> Option<String> {
    let query = format!("email contact {domain}");
    let snippets = match search.search(&query).await {
        Ok(snippets) => snippets,
        Err(e) => {
            log::warn!("email_enrichment: search failed for {domain}: {e}");
            return None;
        }
    };

    let mut best: Option<(String, EmailQuality)> = None;
    for snippet in snippets {
        for m in EMAIL_RE.find_iter(&snippet) {
            let candidate = m.as_str().to_ascii_lowercase();
            if !candidate.contains(domain) {
                continue;
            }
            let quality = classify_email(&candidate);
            let should_replace = match &best {
                Some((_, best_quality)) => quality > *best_quality,
                None => true,
            };
            if should_replace {
                best = Some((candidate, quality));
            }
        }
    }

    best.map(|(email, _)| email)
}

async fn second_pass_phone_lookup(db: &PipelineDb, apollo: Option<&dyn ApolloClient>) -> Result<(), PipelineError> {
    let Some(apollo) = apollo else { return Ok(()) };

    let rows = db.query("SELECT id, domain FROM leads WHERE phone IS NULL", &[]).await?;
    for row in rows {
        let id: i64 = row.to_value("id").map_err(conversion_error)?;
        let domain: String = row.to_value("domain").map_err(conversion_error)?;

        match apollo.organization_phone(&domain).await {
            Ok(Some(phone)) => {
                db.exec(
                    "UPDATE leads SET phone = ? WHERE id = ? AND phone IS NULL",
                    &[DatabaseValue::String(phone), DatabaseValue::Int64(id)],
                )
                .await?;
            }
            Ok(None) => {}
            Err(e) => log::warn!("email_enrichment: organization phone lookup failed for {domain}: {e}"),
        }
    }

    Ok(())
}

async fn apply_email(db: &PipelineDb, lead_id: i64, email: &str, source: EmailSource) -> Result<(), PipelineError> {
    db.exec(
        "UPDATE leads SET email = ?, email_source = ? WHERE id = ?",
        &[
            DatabaseValue::String(email.to_string()),
            DatabaseValue::String(source.as_str().to_string()),
            DatabaseValue::Int64(lead_id),
        ],
    )
    .await?;
    Ok(())
}

async fn mark_no_email(db: &PipelineDb, lead_id: i64, source: EmailSource) -> Result<(), PipelineError> {
    db.exec(
        "UPDATE leads SET email_source = ? WHERE id = ?",
        &[DatabaseValue::String(source.as_str().to_string()), DatabaseValue::Int64(lead_id)],
    )
    .await?;
    Ok(())
}

async fn fill_contact_fields(
    db: &PipelineDb,
    lead_id: i64,
    contact_name: Option<&str>,
    phone: Option<&str>,
) -> Result<(), PipelineError> {
    if let Some(contact_name) = contact_name {
        db.exec(
            "UPDATE leads SET contact_name = ? WHERE id = ? AND contact_name IS NULL",
            &[DatabaseValue::String(contact_name.to_string()), DatabaseValue::Int64(lead_id)],
        )
        .await?;
    }
    if let Some(phone) = phone {
        db.exec(
            "UPDATE leads SET phone = ? WHERE id = ? AND phone IS NULL",
            &[DatabaseValue::String(phone.to_string()), DatabaseValue::Int64(lead_id)],
        )
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::PersonMatch;
    use std::sync::Arc;

    async fn test_db() -> PipelineDb {
        let conn = switchy_database_connection::init_sqlite_rusqlite(None).await.unwrap();
        let db = PipelineDb::new(Arc::from(conn), false);
        db.ensure_schema().await.unwrap();
        db
    }

    async fn insert_lead(db: &PipelineDb, domain: &str, website: Option<&str>, email_source: Option<&str>) -> i64 {
        db.exec(
            "INSERT INTO leads (domain, website, email_source, discovered_date, status) VALUES (?, ?, ?, '2026-01-01', 'new')",
            &[
                DatabaseValue::String(domain.to_string()),
                website.map_or(DatabaseValue::Null, |w| DatabaseValue::String(w.to_string())),
                email_source.map_or(DatabaseValue::Null, |s| DatabaseValue::String(s.to_string())),
            ],
        )
        .await
        .unwrap();
        let rows = db
            .query("SELECT id FROM leads WHERE domain = ?", &[DatabaseValue::String(domain.to_string())])
            .await
            .unwrap();
        rows[0].to_value("id").unwrap()
    }

    #[tokio::test]
    async fn regression_guard_apollo_none_lead_remains_eligible() {
        let db = test_db().await;
        insert_lead(&db, "acme.es", Some("https://acme.es"), Some("apollo")).await;

        let eligible = get_leads_needing_email_enrichment(&db).await.unwrap();
        assert_eq!(eligible.len(), 1);
    }

    #[tokio::test]
    async fn lead_with_email_is_not_eligible() {
        let db = test_db().await;
        let id = insert_lead(&db, "acme.es", Some("https://acme.es"), None).await;
        db.exec(
            "UPDATE leads SET email = 'x@acme.es' WHERE id = ?",
            &[DatabaseValue::Int64(id)],
        )
        .await
        .unwrap();

        let eligible = get_leads_needing_email_enrichment(&db).await.unwrap();
        assert!(eligible.is_empty());
    }

    #[test]
    fn classifies_email_quality_tiers() {
        assert_eq!(classify_email("maria@acme.es"), EmailQuality::Personal);
        assert_eq!(classify_email("info@acme.es"), EmailQuality::GenericGood);
        assert_eq!(classify_email("noreply@acme.es"), EmailQuality::GenericBad);
        assert!(EmailQuality::Personal > EmailQuality::GenericGood);
        assert!(EmailQuality::GenericGood > EmailQuality::GenericBad);
    }

    struct StubApollo {
        email: Option<String>,
    }

    #[async_trait::async_trait]
    impl ApolloClient for StubApollo {
        async fn match_domain(&self, domain: &str, _company_name: Option<&str>) -> Result<Option<PersonMatch>, PipelineError> {
            Ok(Some(PersonMatch {
                domain: domain.to_string(),
                email: self.email.clone(),
                ..Default::default()
            }))
        }

        async fn organization_phone(&self, _domain: &str) -> Result<Option<String>, PipelineError> {
            Ok(None)
        }
    }

    struct NullSearch;

    #[async_trait::async_trait]
    impl SearchClient for NullSearch {
        async fn search(&self, _query: &str) -> Result<Vec<String>, PipelineError> {
            Ok(Vec::new())
        }
    }

    struct NullMx;

    #[async_trait::async_trait]
    impl MxProbe for NullMx {
        async fn accepts_mail(&self, _domain: &str) -> Result<bool, PipelineError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn apollo_match_without_email_is_recorded_as_none_not_suppressed() {
        let db = test_db().await;
        insert_lead(&db, "acme.es", Some("https://acme.es"), None).await;

        let apollo = StubApollo { email: None };
        let enriched = run(&db, Some(&apollo), &NullSearch, &NullMx).await.unwrap();
        assert_eq!(enriched, 1);

        let rows = db.query("SELECT email, email_source FROM leads", &[]).await.unwrap();
        let email: Option<String> = rows[0].to_value("email").unwrap();
        let source: String = rows[0].to_value("email_source").unwrap();
        assert_eq!(email, None);
        assert_eq!(source, "none");

        // Still eligible for a future retry.
        let eligible = get_leads_needing_email_enrichment(&db).await.unwrap();
        assert_eq!(eligible.len(), 1);
    }
}
