//! Stages 5-6: build outputs and send the report.
//!
//! Selecting and prioritizing the batch is this crate's responsibility;
//! rendering the spreadsheet/HTML attachment itself is an external
//! collaborator reached through [`ReportSender`].

use chrono::Utc;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::DatabaseValue;

use crate::clients::{ReportBatch, ReportSender};
use crate::conversion_error;
use crate::db::PipelineDb;
use crate::PipelineError;

struct Candidate {
    id: i64,
    domain: String,
    company_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    ai_summary: Option<String>,
}

/// Priority tier for report inclusion: leads with both an email and a
/// phone go out first, then email-only, then phone-only, then neither.
fn priority_rank(has_email: bool, has_phone: bool) -> u8 {
    match (has_email, has_phone) {
        (true, true) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    }
}

/// Selects up to `limit` unsent leads with an AI summary, highest
/// priority first.
///
/// # Errors
///
/// Returns [`PipelineError`] if the query fails or a row can't be converted.
pub async fn select_leads_for_report(db: &PipelineDb, limit: i64) -> Result<Vec<i64>, PipelineError> {
    let rows = db
        .query(
            "SELECT id, domain, company_name, email, phone, ai_summary
             FROM leads WHERE status = 'new' AND ai_summary IS NOT NULL",
            &[],
        )
        .await?;

    let mut candidates: Vec<Candidate> = rows
        .iter()
        .map(|row| {
            Ok(Candidate {
                id: row.to_value("id").map_err(conversion_error)?,
                domain: row.to_value("domain").map_err(conversion_error)?,
                company_name: row.to_value("company_name").map_err(conversion_error)?,
                email: row.to_value("email").map_err(conversion_error)?,
                phone: row.to_value("phone").map_err(conversion_error)?,
                ai_summary: row.to_value("ai_summary").map_err(conversion_error)?,
            })
        })
        .collect::<Result<_, PipelineError>>()?;

    candidates.sort_by(|a, b| {
        let rank_a = priority_rank(a.email.is_some(), a.phone.is_some());
        let rank_b = priority_rank(b.email.is_some(), b.phone.is_some());
        rank_a.cmp(&rank_b).then(a.id.cmp(&b.id))
    });

    let limit = usize::try_from(limit.max(0)).unwrap_or(0);
    Ok(candidates.into_iter().take(limit).map(|c| c.id).collect())
}

/// Renders a minimal HTML report body listing each selected lead's
/// company, domain, and AI summary. The actual spreadsheet/branded HTML
/// template lives with the external collaborator; this is the plain
/// content handed to it.
///
/// # Errors
///
/// Returns [`PipelineError`] if the lead rows can't be fetched.
pub async fn build_report(db: &PipelineDb, lead_ids: &[i64]) -> Result<ReportBatch, PipelineError> {
    let mut html = String::from("<html><body><h1>Leads del día</h1><ul>");

    for &id in lead_ids {
        let rows = db
            .query(
                "SELECT domain, company_name, ai_summary FROM leads WHERE id = ?",
                &[DatabaseValue::Int64(id)],
            )
            .await?;
        let Some(row) = rows.first() else { continue };
        let domain: String = row.to_value("domain").map_err(conversion_error)?;
        let company_name: Option<String> = row.to_value("company_name").map_err(conversion_error)?;
        let ai_summary: Option<String> = row.to_value("ai_summary").map_err(conversion_error)?;

        html.push_str(&format!(
            "<li><strong>{}</strong> ({domain}): {}</li>",
            company_name.as_deref().unwrap_or(&domain),
            ai_summary.as_deref().unwrap_or(""),
        ));
    }

    html.push_str("</ul></body></html>");

    Ok(ReportBatch {
        lead_ids: lead_ids.to_vec(),
        html_body: html,
    })
}

/// Sends the report via `sender`; on success, marks every included lead
/// `status = 'sent'` with today's `sent_date`.
///
/// # Errors
///
/// Returns [`PipelineError`] if the send fails (no leads are marked sent)
/// or a subsequent update fails.
pub async fn send_report(db: &PipelineDb, sender: &dyn ReportSender, batch: &ReportBatch) -> Result<(), PipelineError> {
    sender.send(batch).await?;

    let today = Utc::now().date_naive().to_string();
    for &id in &batch.lead_ids {
        db.exec(
            "UPDATE leads SET status = 'sent', sent_date = ? WHERE id = ?",
            &[DatabaseValue::String(today.clone()), DatabaseValue::Int64(id)],
        )
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    async fn test_db() -> PipelineDb {
        let conn = switchy_database_connection::init_sqlite_rusqlite(None).await.unwrap();
        let db = PipelineDb::new(Arc::from(conn), false);
        db.ensure_schema().await.unwrap();
        db
    }

    async fn insert_lead(db: &PipelineDb, domain: &str, email: Option<&str>, phone: Option<&str>) -> i64 {
        db.exec(
            "INSERT INTO leads (domain, email, phone, ai_summary, discovered_date, status)
             VALUES (?, ?, ?, 'resumen', '2026-01-01', 'new')",
            &[
                DatabaseValue::String(domain.to_string()),
                email.map_or(DatabaseValue::Null, |e| DatabaseValue::String(e.to_string())),
                phone.map_or(DatabaseValue::Null, |p| DatabaseValue::String(p.to_string())),
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
    async fn selection_prioritizes_email_and_phone_over_either_alone() {
        let db = test_db().await;
        insert_lead(&db, "neither.es", None, None).await;
        let both = insert_lead(&db, "both.es", Some("a@both.es"), Some("123")).await;
        let email_only = insert_lead(&db, "email-only.es", Some("a@email-only.es"), None).await;

        let selected = select_leads_for_report(&db, 2).await.unwrap();
        assert_eq!(selected, vec![both, email_only]);
    }

    struct RecordingSender {
        sent: Arc<Mutex<Vec<ReportBatch>>>,
    }

    #[async_trait]
    impl ReportSender for RecordingSender {
        async fn send(&self, batch: &ReportBatch) -> Result<(), PipelineError> {
            self.sent.lock().unwrap().push(batch.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn sending_report_marks_leads_sent() {
        let db = test_db().await;
        let id = insert_lead(&db, "acme.es", Some("a@acme.es"), None).await;
        let batch = build_report(&db, &[id]).await.unwrap();

        let sent = Arc::new(Mutex::new(Vec::new()));
        let sender = RecordingSender { sent: sent.clone() };
        send_report(&db, &sender, &batch).await.unwrap();

        assert_eq!(sent.lock().unwrap().len(), 1);
        let rows = db.query("SELECT status, sent_date FROM leads WHERE id = ?", &[DatabaseValue::Int64(id)]).await.unwrap();
        let status: String = rows[0].to_value("status").unwrap();
        let sent_date: Option<String> = rows[0].to_value("sent_date").unwrap();
        assert_eq!(status, "sent");
        assert!(sent_date.is_some());
    }
}
