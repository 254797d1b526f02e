//! Stage 4: AI analysis.
//!
//! Builds a Spanish-language prompt from whatever fields a lead has,
//! calls the primary provider, falls back to a secondary provider on
//! failure or unparseable output, and as a last resort emits a
//! deterministic generic summary so the stage never blocks the pipeline.

use std::sync::LazyLock;

use moosicbox_json_utils::database::ToValue as _;
use regex::Regex;
use switchy_database::DatabaseValue;

use agentops_ai::LlmProvider;
use agentops_leadgen_models::{AutomationSuggestion, Lead};

use crate::clients::AnalysisPayload;
use crate::config::ai_request_delay;
use crate::conversion_error;
use crate::db::PipelineDb;
use crate::PipelineError;

const SYSTEM_PROMPT: &str = "Eres un consultor de automatización de procesos para pequeñas y medianas empresas. \
Responde siempre en español y únicamente con un objeto JSON válido.";

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("static regex"));
static BRACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").expect("static regex"));

/// Builds the Spanish-language analysis prompt for a lead from whatever
/// fields it has available.
#[must_use]
pub fn build_prompt(lead: &Lead) -> String {
    let company = lead.company_name.as_deref().unwrap_or(&lead.domain);
    let text = lead.scraped_text.as_deref().unwrap_or("(sin contenido extraído del sitio web)");

    format!(
        "Analiza la siguiente empresa y su sitio web, y genera un resumen breve junto con \
         exactamente tres sugerencias de automatización relevantes para su negocio.\n\n\
         Empresa: {company}\n\
         Dominio: {domain}\n\
         Contenido del sitio web:\n{text}\n\n\
         Responde únicamente con un objeto JSON de la forma:\n\
         {{\"summary\": \"...\", \"automations\": [{{\"name\": \"...\", \"description\": \"...\", \"value\": \"...\"}}]}}",
        domain = lead.domain,
    )
}

/// Deterministic fallback used when both providers fail or return
/// unparseable JSON, so the stage always produces a result.
#[must_use]
pub fn fallback_analysis() -> AnalysisPayload {
    AnalysisPayload {
        summary: "Empresa con potencial para optimizar sus procesos mediante automatización. \
                  No fue posible generar un análisis detallado en este momento."
            .to_string(),
        automations: vec![
            automation(
                "Automatización de atención al cliente",
                "Implementar respuestas automáticas para consultas frecuentes de clientes.",
                "Reduce tiempo de respuesta y mejora satisfacción del cliente.",
            ),
            automation(
                "Gestión automatizada de leads",
                "Capturar y calificar leads automáticamente desde el sitio web.",
                "Aumenta la conversión y reduce trabajo manual del equipo de ventas.",
            ),
            automation(
                "Reportes automáticos",
                "Generar reportes periódicos de actividad del negocio sin intervención manual.",
                "Ahorra horas de trabajo administrativo cada semana.",
            ),
        ],
    }
}

fn automation(name: &str, description: &str, value: &str) -> crate::clients::AutomationSuggestionPayload {
    crate::clients::AutomationSuggestionPayload {
        name: name.to_string(),
        description: description.to_string(),
        value: value.to_string(),
    }
}

/// Parses a model response into an [`AnalysisPayload`], tolerating a bare
/// JSON object, one fenced in a ` ```json ` block, or JSON embedded in
/// surrounding prose (matched greedily between the first `{` and the last
/// `}`).
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if none of the three strategies parse.
pub fn parse_analysis_response(text: &str) -> Result<AnalysisPayload, serde_json::Error> {
    if let Ok(payload) = serde_json::from_str::<AnalysisPayload>(text.trim()) {
        return Ok(payload);
    }

    if let Some(captures) = FENCE_RE.captures(text) {
        if let Some(inner) = captures.get(1) {
            if let Ok(payload) = serde_json::from_str::<AnalysisPayload>(inner.as_str().trim()) {
                return Ok(payload);
            }
        }
    }

    if let Some(m) = BRACE_RE.find(text) {
        return serde_json::from_str::<AnalysisPayload>(m.as_str());
    }

    // Fall through to a plain parse so the caller gets a real serde error
    // rather than a synthesized one.
    serde_json::from_str::<AnalysisPayload>(text)
}

/// Calls `primary`, falling back to `secondary` on request failure or
/// unparseable JSON, and finally to [`fallback_analysis`] if both fail.
pub async fn analyze(primary: &dyn LlmProvider, secondary: Option<&dyn LlmProvider>, lead: &Lead) -> AnalysisPayload {
    let prompt = build_prompt(lead);

    if let Some(payload) = try_provider(primary, &prompt).await {
        return payload;
    }

    if let Some(secondary) = secondary {
        tokio::time::sleep(ai_request_delay()).await;
        if let Some(payload) = try_provider(secondary, &prompt).await {
            return payload;
        }
    }

    fallback_analysis()
}

async fn try_provider(provider: &dyn LlmProvider, prompt: &str) -> Option<AnalysisPayload> {
    match agentops_ai::complete(provider, SYSTEM_PROMPT, prompt).await {
        Ok(text) => match parse_analysis_response(&text) {
            Ok(payload) => Some(payload),
            Err(e) => {
                log::warn!("ai_analysis: unparseable response: {e}");
                None
            }
        },
        Err(e) => {
            log::warn!("ai_analysis: provider call failed: {e}");
            None
        }
    }
}

/// Runs AI analysis over every lead with `ai_summary IS NULL`, persisting
/// the summary and up to three automation suggestions as JSON. Always
/// succeeds per lead (see [`analyze`]'s fallback), so this only returns an
/// error on a database failure.
///
/// # Errors
///
/// Returns [`PipelineError`] if a query or update fails.
pub async fn run(db: &PipelineDb, primary: &dyn LlmProvider, secondary: Option<&dyn LlmProvider>) -> Result<i64, PipelineError> {
    let leads = leads_needing_analysis(db).await?;
    let mut analyzed = 0i64;

    for lead in leads {
        let payload = analyze(primary, secondary, &lead).await;
        let suggestions: Vec<AutomationSuggestion> = payload
            .automations
            .into_iter()
            .take(3)
            .map(|a| AutomationSuggestion {
                name: a.name,
                description: a.description,
                value: a.value,
            })
            .collect();
        let suggestions_json = serde_json::to_string(&suggestions).unwrap_or_else(|_| "[]".to_string());

        db.exec(
            "UPDATE leads SET ai_summary = ?, automation_suggestions = ? WHERE id = ?",
            &[
                DatabaseValue::String(payload.summary),
                DatabaseValue::String(suggestions_json),
                DatabaseValue::Int64(lead.id),
            ],
        )
        .await?;
        analyzed += 1;

        tokio::time::sleep(ai_request_delay()).await;
    }

    Ok(analyzed)
}

async fn leads_needing_analysis(db: &PipelineDb) -> Result<Vec<Lead>, PipelineError> {
    let rows = db
        .query(
            "SELECT id, domain, company_name, website, email, email_source, contact_name, phone, address,
                    scraped_text, ai_summary, automation_suggestions, discovered_date, sent_date, status
             FROM leads WHERE ai_summary IS NULL",
            &[],
        )
        .await?;

    rows.iter().map(row_to_lead).collect()
}

fn row_to_lead(row: &switchy_database::Row) -> Result<Lead, PipelineError> {
    let email_source: Option<String> = row.to_value("email_source").map_err(conversion_error)?;
    let status: String = row.to_value("status").map_err(conversion_error)?;
    let discovered_date: String = row.to_value("discovered_date").map_err(conversion_error)?;
    let sent_date: Option<String> = row.to_value("sent_date").map_err(conversion_error)?;

    Ok(Lead {
        id: row.to_value("id").map_err(conversion_error)?,
        domain: row.to_value("domain").map_err(conversion_error)?,
        company_name: row.to_value("company_name").map_err(conversion_error)?,
        website: row.to_value("website").map_err(conversion_error)?,
        email: row.to_value("email").map_err(conversion_error)?,
        email_source: email_source
            .map(|s| s.parse().map_err(|message| PipelineError::Conversion { message }))
            .transpose()?,
        contact_name: row.to_value("contact_name").map_err(conversion_error)?,
        phone: row.to_value("phone").map_err(conversion_error)?,
        address: row.to_value("address").map_err(conversion_error)?,
        scraped_text: row.to_value("scraped_text").map_err(conversion_error)?,
        ai_summary: row.to_value("ai_summary").map_err(conversion_error)?,
        // Not needed to build the analysis prompt; left empty here.
        automation_suggestions: Vec::new(),
        discovered_date: discovered_date.parse().map_err(|e| PipelineError::Conversion {
            message: format!("invalid discovered_date {discovered_date:?}: {e}"),
        })?,
        sent_date: sent_date
            .map(|s| s.parse().map_err(|e| PipelineError::Conversion {
                message: format!("invalid sent_date: {e}"),
            }))
            .transpose()?,
        status: status.parse().map_err(|message| PipelineError::Conversion { message })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let text = r#"{"summary": "resumen", "automations": [{"name":"a","description":"b","value":"c"}]}"#;
        let payload = parse_analysis_response(text).unwrap();
        assert_eq!(payload.summary, "resumen");
        assert_eq!(payload.automations.len(), 1);
    }

    #[test]
    fn parses_fenced_json_block() {
        let text = "Aquí está el análisis:\n```json\n{\"summary\": \"ok\", \"automations\": []}\n```\nGracias.";
        let payload = parse_analysis_response(text).unwrap();
        assert_eq!(payload.summary, "ok");
    }

    #[test]
    fn parses_json_embedded_in_prose_via_greedy_match() {
        let text = "Claro, aquí tienes: {\"summary\": \"ok\", \"automations\": []} espero que sirva";
        let payload = parse_analysis_response(text).unwrap();
        assert_eq!(payload.summary, "ok");
    }

    #[test]
    fn unparseable_text_is_an_error() {
        assert!(parse_analysis_response("no json here").is_err());
    }

    #[test]
    fn fallback_analysis_has_exactly_three_automations() {
        assert_eq!(fallback_analysis().automations.len(), 3);
    }
}
