//! Stage 7: personalized outreach, and its state machine.
//!
//! States per lead-outreach pair: `none -> initial_sent -> (replied |
//! followup_due -> followup_sent) -> terminal`. This module only drives
//! the `none -> initial_sent` and `followup_due -> followup_sent`
//! transitions; `replied` is set externally (a webhook or manual action)
//! via [`mark_replied`].

use chrono::{DateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::DatabaseValue;

use agentops_ai::LlmProvider;
use agentops_leadgen_models::{Outreach, OutreachStatus, OutreachType};

use crate::clients::OutreachTransport;
use crate::config::followup_days;
use crate::conversion_error;
use crate::db::PipelineDb;
use crate::PipelineError;

struct OutreachCandidate {
    lead_id: i64,
    domain: String,
    company_name: Option<String>,
    contact_name: Option<String>,
    email: String,
    ai_summary: Option<String>,
}

/// Leads admitted for a first outreach message: included in a sent
/// report (`sent_date` set), with an email, and no prior `initial`
/// outreach row.
///
/// # Errors
///
/// Returns [`PipelineError`] if the query fails or a row can't be converted.
async fn leads_needing_initial_outreach(db: &PipelineDb) -> Result<Vec<OutreachCandidate>, PipelineError> {
    let rows = db
        .query(
            "SELECT l.id, l.domain, l.company_name, l.contact_name, l.email, l.ai_summary
             FROM leads l
             WHERE l.status = 'sent' AND l.email IS NOT NULL
               AND NOT EXISTS (
                   SELECT 1 FROM outreach o WHERE o.lead_id = l.id AND o.outreach_type = 'initial'
               )",
            &[],
        )
        .await?;

    rows.iter()
        .map(|row| {
            Ok(OutreachCandidate {
                lead_id: row.to_value("id").map_err(conversion_error)?,
                domain: row.to_value("domain").map_err(conversion_error)?,
                company_name: row.to_value("company_name").map_err(conversion_error)?,
                contact_name: row.to_value("contact_name").map_err(conversion_error)?,
                email: row.to_value("email").map_err(conversion_error)?,
                ai_summary: row.to_value("ai_summary").map_err(conversion_error)?,
            })
        })
        .collect()
}

/// Initial outreach rows eligible for a followup: `replied = false`,
/// `followup_sent = false`, and at least `FOLLOWUP_DAYS` days old.
///
/// # Errors
///
/// Returns [`PipelineError`] if the query fails or a row can't be converted.
async fn outreach_needing_followup(db: &PipelineDb) -> Result<Vec<Outreach>, PipelineError> {
    let cutoff = Utc::now() - chrono::Duration::days(followup_days());
    let rows = db
        .query(
            "SELECT id, lead_id, outreach_type, status, thread_id, sent_at, opened, clicked, replied, followup_sent
             FROM outreach
             WHERE outreach_type = 'initial' AND replied = 0 AND followup_sent = 0
               AND sent_at IS NOT NULL AND sent_at <= ?",
            &[DatabaseValue::String(cutoff.to_rfc3339())],
        )
        .await?;

    rows.iter().map(row_to_outreach).collect()
}

fn row_to_outreach(row: &switchy_database::Row) -> Result<Outreach, PipelineError> {
    let outreach_type: String = row.to_value("outreach_type").map_err(conversion_error)?;
    let status: String = row.to_value("status").map_err(conversion_error)?;
    let sent_at: Option<String> = row.to_value("sent_at").map_err(conversion_error)?;

    Ok(Outreach {
        id: row.to_value("id").map_err(conversion_error)?,
        lead_id: row.to_value("lead_id").map_err(conversion_error)?,
        outreach_type: outreach_type.parse().map_err(|message| PipelineError::Conversion { message })?,
        status: status.parse().map_err(|message| PipelineError::Conversion { message })?,
        thread_id: row.to_value("thread_id").map_err(conversion_error)?,
        sent_at: sent_at
            .map(|s| parse_rfc3339(&s))
            .transpose()?,
        opened: row.to_value("opened").map_err(conversion_error)?,
        clicked: row.to_value("clicked").map_err(conversion_error)?,
        replied: row.to_value("replied").map_err(conversion_error)?,
        followup_sent: row.to_value("followup_sent").map_err(conversion_error)?,
    })
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, PipelineError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::Conversion {
            message: format!("invalid timestamp {value:?}: {e}"),
        })
}

const OUTREACH_SYSTEM_PROMPT: &str = "Eres un asesor de automatización de procesos que escribe correos de \
prospección breves y personalizados en español. Responde únicamente con el cuerpo del correo, sin asunto.";

/// Builds the personalization prompt handed to the AI provider for one
/// lead's initial outreach email.
fn build_outreach_prompt(candidate: &OutreachCandidate) -> String {
    let name = candidate.contact_name.as_deref().unwrap_or("equipo");
    let company = candidate.company_name.as_deref().unwrap_or(&candidate.domain);
    let summary = candidate
        .ai_summary
        .as_deref()
        .unwrap_or("vimos oportunidades interesantes para automatizar procesos en su negocio");

    format!(
        "Escribe un correo breve (3-4 oraciones) dirigido a {name} de {company}, mencionando este \
         análisis de su negocio: \"{summary}\". Invítalo a conversar sobre automatización. Tono cercano y profesional."
    )
}

/// Deterministic template used when no AI provider is configured, or the
/// provider call fails — the stage must never block on it.
fn template_body(candidate: &OutreachCandidate) -> String {
    let name = candidate.contact_name.as_deref().unwrap_or("equipo");
    let company = candidate.company_name.as_deref().unwrap_or(&candidate.domain);
    let summary = candidate
        .ai_summary
        .as_deref()
        .unwrap_or("vimos oportunidades interesantes para automatizar procesos en su negocio");
    format!(
        "Hola {name},\n\n\
         Analizamos {company} y {summary}.\n\n\
         Nos encantaría conversar sobre cómo podemos ayudarles.\n\n\
         Saludos."
    )
}

async fn personalize_body(candidate: &OutreachCandidate, ai: Option<&dyn LlmProvider>) -> (String, String) {
    let company = candidate.company_name.as_deref().unwrap_or(&candidate.domain);
    let subject = format!("Ideas de automatización para {company}");

    let Some(ai) = ai else {
        return (subject, template_body(candidate));
    };

    let prompt = build_outreach_prompt(candidate);
    match agentops_ai::complete(ai, OUTREACH_SYSTEM_PROMPT, &prompt).await {
        Ok(body) if !body.trim().is_empty() => (subject, body),
        Ok(_) => (subject, template_body(candidate)),
        Err(e) => {
            log::warn!("outreach: personalization call failed for {}, using template: {e}", candidate.domain);
            (subject, template_body(candidate))
        }
    }
}

/// Sends initial outreach to every lead admitted by
/// [`leads_needing_initial_outreach`], recording one `Outreach` row each.
/// A send failure for one lead is logged and does not stop the others.
///
/// # Errors
///
/// Returns [`PipelineError`] only for a database failure.
pub async fn send_initial_batch(
    db: &PipelineDb,
    transport: &dyn OutreachTransport,
    ai: Option<&dyn LlmProvider>,
) -> Result<i64, PipelineError> {
    let mut sent = 0i64;

    for candidate in leads_needing_initial_outreach(db).await? {
        let (subject, body) = personalize_body(&candidate, ai).await;

        match transport.send_initial(&candidate.email, &subject, &body).await {
            Ok(result) => {
                insert_outreach_row(
                    db,
                    candidate.lead_id,
                    OutreachType::Initial,
                    OutreachStatus::Sent,
                    result.thread_id.as_deref(),
                )
                .await?;
                sent += 1;
            }
            Err(e) => log::error!("outreach: failed to send initial to {}: {e}", candidate.email),
        }
    }

    Ok(sent)
}

/// Sends a followup to every outreach row eligible per
/// [`outreach_needing_followup`], inserting a new `followup` row threaded
/// on the original and marking the original `followup_sent = true`.
///
/// # Errors
///
/// Returns [`PipelineError`] only for a database failure.
pub async fn send_followup_batch(db: &PipelineDb, transport: &dyn OutreachTransport) -> Result<i64, PipelineError> {
    let mut sent = 0i64;

    for original in outreach_needing_followup(db).await? {
        let rows = db
            .query("SELECT email FROM leads WHERE id = ?", &[DatabaseValue::Int64(original.lead_id)])
            .await?;
        let Some(row) = rows.first() else { continue };
        let email: Option<String> = row.to_value("email").map_err(conversion_error)?;
        let Some(email) = email else { continue };

        let thread_id = original.thread_id.clone().unwrap_or_default();
        let subject = "Seguimiento: automatización para su negocio".to_string();
        let body = "Quisiera darle seguimiento a mi mensaje anterior, ¿tuvo oportunidad de revisarlo?".to_string();

        match transport.send_followup(&email, &thread_id, &subject, &body).await {
            Ok(result) => {
                insert_outreach_row(
                    db,
                    original.lead_id,
                    OutreachType::Followup,
                    OutreachStatus::Sent,
                    result.thread_id.as_deref().or(original.thread_id.as_deref()),
                )
                .await?;
                db.exec(
                    "UPDATE outreach SET followup_sent = 1 WHERE id = ?",
                    &[DatabaseValue::Int64(original.id)],
                )
                .await?;
                sent += 1;
            }
            Err(e) => log::error!("outreach: failed to send followup for lead {}: {e}", original.lead_id),
        }
    }

    Ok(sent)
}

async fn insert_outreach_row(
    db: &PipelineDb,
    lead_id: i64,
    outreach_type: OutreachType,
    status: OutreachStatus,
    thread_id: Option<&str>,
) -> Result<(), PipelineError> {
    db.exec(
        "INSERT INTO outreach (lead_id, outreach_type, status, thread_id, sent_at)
         VALUES (?, ?, ?, ?, ?)",
        &[
            DatabaseValue::Int64(lead_id),
            DatabaseValue::String(outreach_type.as_str().to_string()),
            DatabaseValue::String(status.as_str().to_string()),
            thread_id.map_or(DatabaseValue::Null, |t| DatabaseValue::String(t.to_string())),
            DatabaseValue::String(Utc::now().to_rfc3339()),
        ],
    )
    .await?;
    Ok(())
}

/// Marks an outreach row (and implicitly its lead-outreach pair) as
/// replied — a terminal state set externally, e.g. by a reply webhook.
///
/// # Errors
///
/// Returns [`PipelineError`] if the update fails.
pub async fn mark_replied(db: &PipelineDb, outreach_id: i64) -> Result<(), PipelineError> {
    db.exec(
        "UPDATE outreach SET replied = 1, status = 'replied' WHERE id = ?",
        &[DatabaseValue::Int64(outreach_id)],
    )
    .await?;
    Ok(())
}

/// Runs both the initial and followup outreach passes for one pipeline
/// run, returning the combined count of messages sent.
///
/// # Errors
///
/// Returns [`PipelineError`] only for a database failure.
pub async fn run(db: &PipelineDb, transport: &dyn OutreachTransport, ai: Option<&dyn LlmProvider>) -> Result<i64, PipelineError> {
    let initial = send_initial_batch(db, transport, ai).await?;
    let followups = send_followup_batch(db, transport).await?;
    Ok(initial + followups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    use crate::clients::OutreachSendResult;

    async fn test_db() -> PipelineDb {
        let conn = switchy_database_connection::init_sqlite_rusqlite(None).await.unwrap();
        let db = PipelineDb::new(Arc::from(conn), false);
        db.ensure_schema().await.unwrap();
        db
    }

    async fn insert_sent_lead(db: &PipelineDb, domain: &str, email: &str) -> i64 {
        db.exec(
            "INSERT INTO leads (domain, email, discovered_date, sent_date, status)
             VALUES (?, ?, '2026-01-01', '2026-01-02', 'sent')",
            &[DatabaseValue::String(domain.to_string()), DatabaseValue::String(email.to_string())],
        )
        .await
        .unwrap();
        let rows = db
            .query("SELECT id FROM leads WHERE domain = ?", &[DatabaseValue::String(domain.to_string())])
            .await
            .unwrap();
        rows[0].to_value("id").unwrap()
    }

    struct StubTransport;

    #[async_trait]
    impl OutreachTransport for StubTransport {
        async fn send_initial(&self, _to: &str, _subject: &str, _body: &str) -> Result<OutreachSendResult, PipelineError> {
            Ok(OutreachSendResult {
                thread_id: Some("thread-1".to_string()),
            })
        }

        async fn send_followup(
            &self,
            _to: &str,
            thread_id: &str,
            _subject: &str,
            _body: &str,
        ) -> Result<OutreachSendResult, PipelineError> {
            Ok(OutreachSendResult {
                thread_id: Some(thread_id.to_string()),
            })
        }
    }

    #[tokio::test]
    async fn initial_outreach_is_sent_once_per_lead() {
        let db = test_db().await;
        insert_sent_lead(&db, "acme.es", "a@acme.es").await;

        let sent = send_initial_batch(&db, &StubTransport, None).await.unwrap();
        assert_eq!(sent, 1);

        // A second run finds nothing new: an initial row already exists.
        let sent_again = send_initial_batch(&db, &StubTransport, None).await.unwrap();
        assert_eq!(sent_again, 0);
    }

    #[tokio::test]
    async fn followup_requires_age_and_no_reply() {
        let db = test_db().await;
        let lead_id = insert_sent_lead(&db, "acme.es", "a@acme.es").await;

        // Sent far enough in the past to be eligible for a followup.
        let old = (Utc::now() - chrono::Duration::days(10)).to_rfc3339();
        db.exec(
            "INSERT INTO outreach (lead_id, outreach_type, status, thread_id, sent_at) VALUES (?, 'initial', 'sent', 'thread-1', ?)",
            &[DatabaseValue::Int64(lead_id), DatabaseValue::String(old)],
        )
        .await
        .unwrap();

        let sent = send_followup_batch(&db, &StubTransport).await.unwrap();
        assert_eq!(sent, 1);

        let rows = db.query("SELECT followup_sent FROM outreach WHERE outreach_type = 'initial'", &[]).await.unwrap();
        let followup_sent: i64 = rows[0].to_value("followup_sent").unwrap();
        assert_eq!(followup_sent, 1);

        // No second followup on the same original.
        let sent_again = send_followup_batch(&db, &StubTransport).await.unwrap();
        assert_eq!(sent_again, 0);
    }
}
