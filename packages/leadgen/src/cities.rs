//! Seed data and ordered rotation over the discovery city list.
//!
//! The rotation is a deterministic permutation cycle: picking always
//! favors the city that has gone longest without a search (nulls first),
//! tie-broken by the fewest searches so far, so every seeded city is
//! visited once before any repeats.

use chrono::Utc;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::DatabaseValue;

use agentops_leadgen_models::CityRotation;

use crate::conversion_error;
use crate::db::PipelineDb;
use crate::PipelineError;

/// Seed set of 30 Spanish-speaking cities spanning Spain, Mexico,
/// Argentina, Colombia, Chile, Peru, Uruguay, Ecuador, and Central
/// America, as `(city, country, language)`.
const SEED_CITIES: &[(&str, &str, &str)] = &[
    ("Madrid", "ES", "es"),
    ("Barcelona", "ES", "es"),
    ("Valencia", "ES", "es"),
    ("Sevilla", "ES", "es"),
    ("Bilbao", "ES", "es"),
    ("Mexico City", "MX", "es"),
    ("Guadalajara", "MX", "es"),
    ("Monterrey", "MX", "es"),
    ("Puebla", "MX", "es"),
    ("Merida", "MX", "es"),
    ("Buenos Aires", "AR", "es"),
    ("Cordoba", "AR", "es"),
    ("Rosario", "AR", "es"),
    ("Mendoza", "AR", "es"),
    ("Bogota", "CO", "es"),
    ("Medellin", "CO", "es"),
    ("Cali", "CO", "es"),
    ("Barranquilla", "CO", "es"),
    ("Santiago", "CL", "es"),
    ("Valparaiso", "CL", "es"),
    ("Concepcion", "CL", "es"),
    ("Lima", "PE", "es"),
    ("Arequipa", "PE", "es"),
    ("Trujillo", "PE", "es"),
    ("Montevideo", "UY", "es"),
    ("Quito", "EC", "es"),
    ("Guayaquil", "EC", "es"),
    ("San Jose", "CR", "es"),
    ("Panama City", "PA", "es"),
    ("Guatemala City", "GT", "es"),
];

/// Inserts the seed cities if the rotation table is empty.
///
/// # Errors
///
/// Returns [`PipelineError`] if the count query or any insert fails.
pub async fn seed_if_empty(db: &PipelineDb) -> Result<(), PipelineError> {
    let rows = db.query("SELECT COUNT(*) AS n FROM city_rotation", &[]).await?;
    let count: i64 = rows.first().map_or(Ok(0), |r| r.to_value("n")).map_err(conversion_error)?;
    if count > 0 {
        return Ok(());
    }

    for (city, country, language) in SEED_CITIES {
        db.exec(
            "INSERT INTO city_rotation (city_name, country, language, last_searched, search_count)
             VALUES (?, ?, ?, NULL, 0)",
            &[
                DatabaseValue::String((*city).to_string()),
                DatabaseValue::String((*country).to_string()),
                DatabaseValue::String((*language).to_string()),
            ],
        )
        .await?;
    }

    Ok(())
}

/// Picks the next city to search: oldest `last_searched` first (nulls
/// first), tied-broken by the fewest prior searches.
///
/// # Errors
///
/// Returns [`PipelineError`] if the query fails or a row can't be converted.
pub async fn pick_next(db: &PipelineDb) -> Result<Option<CityRotation>, PipelineError> {
    let rows = db
        .query(
            "SELECT id, city_name, country, language, last_searched, search_count
             FROM city_rotation
             ORDER BY (last_searched IS NULL) DESC, last_searched ASC, search_count ASC
             LIMIT 1",
            &[],
        )
        .await?;

    rows.first().map(row_to_city).transpose()
}

/// Marks a city as searched today, incrementing its search count.
///
/// # Errors
///
/// Returns [`PipelineError`] if the update fails.
pub async fn mark_searched(db: &PipelineDb, id: i64) -> Result<(), PipelineError> {
    let today = Utc::now().date_naive().to_string();
    db.exec(
        "UPDATE city_rotation SET last_searched = ?, search_count = search_count + 1 WHERE id = ?",
        &[DatabaseValue::String(today), DatabaseValue::Int64(id)],
    )
    .await?;
    Ok(())
}

/// Forces the next pick to `(city, country)` (if given; otherwise matches
/// by city name alone) by clearing its `last_searched` and bumping every
/// other row's to today.
///
/// # Errors
///
/// Returns [`PipelineError`] if either update fails.
pub async fn reset_to(db: &PipelineDb, city: &str, country: Option<&str>) -> Result<(), PipelineError> {
    let today = Utc::now().date_naive().to_string();

    db.exec(
        "UPDATE city_rotation SET last_searched = ? WHERE city_name != ?",
        &[DatabaseValue::String(today), DatabaseValue::String(city.to_string())],
    )
    .await?;

    if let Some(country) = country {
        db.exec(
            "UPDATE city_rotation SET last_searched = NULL WHERE city_name = ? AND country = ?",
            &[
                DatabaseValue::String(city.to_string()),
                DatabaseValue::String(country.to_string()),
            ],
        )
        .await?;
    } else {
        db.exec(
            "UPDATE city_rotation SET last_searched = NULL WHERE city_name = ?",
            &[DatabaseValue::String(city.to_string())],
        )
        .await?;
    }

    Ok(())
}

fn row_to_city(row: &switchy_database::Row) -> Result<CityRotation, PipelineError> {
    Ok(CityRotation {
        id: row.to_value("id").map_err(conversion_error)?,
        city_name: row.to_value("city_name").map_err(conversion_error)?,
        country: row.to_value("country").map_err(conversion_error)?,
        language: row.to_value("language").map_err(conversion_error)?,
        last_searched: row
            .to_value::<Option<String>>("last_searched")
            .map_err(conversion_error)?
            .map(|s| s.parse().map_err(|e| PipelineError::Conversion {
                message: format!("invalid last_searched date {s:?}: {e}"),
            }))
            .transpose()?,
        search_count: row.to_value("search_count").map_err(conversion_error)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn test_db() -> PipelineDb {
        let conn = switchy_database_connection::init_sqlite_rusqlite(None)
            .await
            .unwrap();
        let db = PipelineDb::new(Arc::from(conn), false);
        db.ensure_schema().await.unwrap();
        db
    }

    #[tokio::test]
    async fn seeding_is_idempotent_and_covers_thirty_cities() {
        let db = test_db().await;
        seed_if_empty(&db).await.unwrap();
        seed_if_empty(&db).await.unwrap();

        let rows = db.query("SELECT COUNT(*) AS n FROM city_rotation", &[]).await.unwrap();
        let count: i64 = rows[0].to_value("n").unwrap();
        assert_eq!(count, 30);
    }

    #[tokio::test]
    async fn rotation_visits_every_city_before_repeating() {
        let db = test_db().await;
        seed_if_empty(&db).await.unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..30 {
            let city = pick_next(&db).await.unwrap().unwrap();
            assert!(seen.insert(city.id), "city {} picked twice within one cycle", city.city_name);
            mark_searched(&db, city.id).await.unwrap();
        }
        assert_eq!(seen.len(), 30);
    }

    #[tokio::test]
    async fn reset_to_forces_next_pick() {
        let db = test_db().await;
        seed_if_empty(&db).await.unwrap();

        // Exhaust one full cycle so every row has a non-null last_searched.
        for _ in 0..30 {
            let city = pick_next(&db).await.unwrap().unwrap();
            mark_searched(&db, city.id).await.unwrap();
        }

        reset_to(&db, "Lima", Some("PE")).await.unwrap();
        let next = pick_next(&db).await.unwrap().unwrap();
        assert_eq!(next.city_name, "Lima");
    }
}
