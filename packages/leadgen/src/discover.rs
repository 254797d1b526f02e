//! Stage 1: city-rotated discovery.
//!
//! Picks the next city in rotation, searches it for candidate companies,
//! and inserts new leads deduplicated by `domain`. The city pointer always
//! advances, even on a zero-result search, so one unproductive city never
//! blocks the rotation (head-of-line blocking).

use switchy_database::DatabaseValue;

use crate::cities;
use crate::clients::DiscoverySource;
use crate::config::max_cities_per_run;
use crate::db::PipelineDb;
use crate::PipelineError;

/// Common free-mail/hosting domains that are never real company domains;
/// a candidate whose domain lands here is dropped before insertion.
const EXCLUDED_DOMAINS: &[&str] = &[
    "gmail.com",
    "hotmail.com",
    "outlook.com",
    "yahoo.com",
    "icloud.com",
    "aol.com",
    "proton.me",
];

/// Runs discovery until `target` new leads have been inserted or the
/// per-run city guard trips, whichever comes first. Returns the count of
/// leads actually inserted.
///
/// # Errors
///
/// Returns [`PipelineError`] only for a database failure; a discovery
/// source error for one city is logged and treated as zero results for
/// that city, not a pipeline-level failure.
pub async fn run(db: &PipelineDb, source: &dyn DiscoverySource, target: i64) -> Result<i64, PipelineError> {
    if let Some((city, country)) = crate::config::city_rotation_reset_to() {
        log::info!("discover: CITY_ROTATION_RESET_TO forces next pick to {city:?} ({country:?})");
        cities::reset_to(db, &city, country.as_deref()).await?;
    }

    let mut inserted = 0i64;
    let mut cities_tried = 0u32;

    while inserted < target && cities_tried < max_cities_per_run() {
        let Some(city) = cities::pick_next(db).await? else {
            log::warn!("discover: city rotation table is empty");
            break;
        };
        cities_tried += 1;

        let remaining = u32::try_from(target - inserted).unwrap_or(0);
        let matches = match source.search_city(&city.city_name, &city.country, remaining).await {
            Ok(matches) => matches,
            Err(e) => {
                log::error!("discover: search failed for {} ({}): {e}", city.city_name, city.country);
                Vec::new()
            }
        };

        for candidate in matches {
            if candidate.domain.trim().is_empty() {
                continue;
            }
            let domain = candidate.domain.trim().to_ascii_lowercase();
            if EXCLUDED_DOMAINS.contains(&domain.as_str()) {
                continue;
            }
            if insert_lead_if_new(
                db,
                &domain,
                candidate.company_name.as_deref(),
                candidate.website.as_deref(),
                candidate.contact_name.as_deref(),
                candidate.email.as_deref(),
                candidate.phone.as_deref(),
            )
            .await?
            {
                inserted += 1;
                if inserted >= target {
                    break;
                }
            }
        }

        // Always advance, even with zero results, to avoid head-of-line
        // blocking on an unproductive city.
        cities::mark_searched(db, city.id).await?;
    }

    Ok(inserted)
}

/// Inserts a lead if its domain doesn't already exist. Returns whether a
/// row was inserted.
///
/// # Errors
///
/// Returns [`PipelineError`] if the existence check or insert fails.
pub async fn insert_lead_if_new(
    db: &PipelineDb,
    domain: &str,
    company_name: Option<&str>,
    website: Option<&str>,
    contact_name: Option<&str>,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<bool, PipelineError> {
    let existing = db
        .query("SELECT id FROM leads WHERE domain = ?", &[DatabaseValue::String(domain.to_string())])
        .await?;
    if !existing.is_empty() {
        return Ok(false);
    }

    let today = chrono::Utc::now().date_naive().to_string();
    db.exec(
        "INSERT INTO leads (domain, company_name, website, email, contact_name, phone, discovered_date, status)
         VALUES (?, ?, ?, ?, ?, ?, ?, 'new')",
        &[
            DatabaseValue::String(domain.to_string()),
            opt_str(company_name),
            opt_str(website),
            opt_str(email),
            opt_str(contact_name),
            opt_str(phone),
            DatabaseValue::String(today),
        ],
    )
    .await?;

    Ok(true)
}

fn opt_str(value: Option<&str>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |s| DatabaseValue::String(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::PersonMatch;
    use async_trait::async_trait;
    use std::sync::Arc;

    async fn test_db() -> PipelineDb {
        let conn = switchy_database_connection::init_sqlite_rusqlite(None).await.unwrap();
        let db = PipelineDb::new(Arc::from(conn), false);
        db.ensure_schema().await.unwrap();
        cities::seed_if_empty(&db).await.unwrap();
        db
    }

    struct StubSource {
        by_city: std::collections::HashMap<&'static str, Vec<PersonMatch>>,
    }

    #[async_trait]
    impl DiscoverySource for StubSource {
        async fn search_city(&self, city: &str, _country: &str, _limit: u32) -> Result<Vec<PersonMatch>, PipelineError> {
            Ok(self.by_city.get(city).cloned().unwrap_or_default())
        }
    }

    fn person(domain: &str) -> PersonMatch {
        PersonMatch {
            domain: domain.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn discovery_deduplicates_by_domain_and_advances_city() {
        let db = test_db().await;
        let source = StubSource {
            by_city: [("Madrid", vec![person("acme.es"), person("acme.es")])].into_iter().collect(),
        };

        let inserted = run(&db, &source, 2).await.unwrap();
        assert_eq!(inserted, 1);

        let rows = db.query("SELECT COUNT(*) AS n FROM leads", &[]).await.unwrap();
        let count: i64 = moosicbox_json_utils::database::ToValue::to_value(&rows[0], "n").unwrap();
        assert_eq!(count, 1);

        let rows = db
            .query("SELECT search_count FROM city_rotation WHERE city_name = 'Madrid'", &[])
            .await
            .unwrap();
        let search_count: i64 = moosicbox_json_utils::database::ToValue::to_value(&rows[0], "search_count").unwrap();
        assert_eq!(search_count, 1);
    }

    #[tokio::test]
    async fn city_rotation_reset_to_env_forces_next_pick() {
        let db = test_db().await;
        // Exhaust one full cycle so every row has a non-null last_searched.
        for _ in 0..30 {
            let city = cities::pick_next(&db).await.unwrap().unwrap();
            cities::mark_searched(&db, city.id).await.unwrap();
        }

        std::env::set_var("CITY_ROTATION_RESET_TO", "Lima, PE");
        let source = StubSource {
            by_city: [("Lima", vec![person("forced.pe")])].into_iter().collect(),
        };
        let inserted = run(&db, &source, 1).await.unwrap();
        std::env::remove_var("CITY_ROTATION_RESET_TO");

        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn excluded_domains_are_never_inserted() {
        let db = test_db().await;
        let source = StubSource {
            by_city: [("Madrid", vec![person("gmail.com")])].into_iter().collect(),
        };

        let inserted = run(&db, &source, 1).await.unwrap();
        assert_eq!(inserted, 0);
    }
}
