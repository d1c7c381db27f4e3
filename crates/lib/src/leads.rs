//! Lead classification: model judgment plus the deterministic confirmation gate.
//!
//! The model is asked for a strict JSON object. Its output is parsed strictly first,
//! then leniently (first balanced `{...}` in the text); anything unparseable becomes
//! the safe default assessment and is logged, never returned as an error.

use crate::catalog::PropertyListing;
use crate::llm::{ChatMessage, LanguageModel};
use crate::rules::{self, GateDecision, GateInput};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What the sender wants, as judged by the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interest {
    Buy,
    Rent,
    Visit,
    Inquiry,
    #[default]
    #[serde(other)]
    None,
}

impl Interest {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interest::Buy => "buy",
            Interest::Rent => "rent",
            Interest::Visit => "visit",
            Interest::Inquiry => "inquiry",
            Interest::None => "none",
        }
    }

    /// Spanish label used in agent alerts.
    pub fn label(&self) -> &'static str {
        match self {
            Interest::Buy => "Compra",
            Interest::Rent => "Renta",
            Interest::Visit => "Visita",
            Interest::Inquiry => "Consulta",
            Interest::None => "Sin especificar",
        }
    }
}

/// The model's raw judgment of one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadAssessment {
    #[serde(default)]
    pub is_lead: bool,
    #[serde(default)]
    pub interest: Interest,
    #[serde(default)]
    pub property_mentions: Vec<String>,
    /// Set when the model output could not be parsed and this is the safe default.
    #[serde(skip)]
    pub parse_failed: bool,
}

impl LeadAssessment {
    /// Safe default used whenever the model output cannot be trusted.
    pub fn parsing_error() -> Self {
        Self {
            parse_failed: true,
            ..Default::default()
        }
    }
}

const LEAD_PROMPT: &str = r#"Analiza el siguiente mensaje de un cliente en un chat de bienes raíces.
Tu tarea es determinar si el usuario expresa una intención clara de comprar, rentar o agendar una visita.

Responde SOLO con un objeto JSON en el siguiente formato:
{
    "is_lead": boolean,
    "interest": "buy" | "rent" | "visit" | "inquiry" | "none",
    "property_mentions": ["nombre_propiedad_1", "nombre_propiedad_2"]
}

- "is_lead": true si el usuario muestra interés concreto (ej: "quiero verla", "me interesa comprar", "podemos agendar una visita?"). False para preguntas generales o saludos.
- "interest":
    - "buy": Usuario quiere comprar (palabras clave: "comprar", "adquirir", "me interesa comprar")
    - "rent": Usuario quiere rentar (palabras clave: "rentar", "alquilar", "renta")
    - "visit": Usuario solicita explícitamente ver una propiedad (palabras clave: "visita", "ver", "conocer", "mostrar")
    - "inquiry": Usuario hace preguntas específicas sobre una propiedad pero no se compromete a visita/compra
    - "none": No muestra interés (ej: "hola", "gracias", preguntas muy generales)
- "property_mentions": Lista de nombres específicos de propiedades o direcciones mencionadas.

SEÑALES DE LEAD REAL:
- Menciona querer "ver", "visitar", "conocer" una propiedad específica
- Expresa interés en "comprar" o "adquirir"
- Pregunta sobre "agendar", "cita", "visita"
- Menciona estar "interesado/a" en una propiedad específica
- Pregunta sobre disponibilidad para ver propiedades"#;

fn lead_prompt(message: &str) -> String {
    format!(
        "{}\n\nMensaje del Usuario: \"{}\"\n\nJSON Response:",
        LEAD_PROMPT, message
    )
}

/// Asks the model whether a message is a lead.
#[derive(Clone)]
pub struct LeadClassifier {
    model: Arc<dyn LanguageModel>,
}

impl LeadClassifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Never fails: model errors and unparseable output yield `LeadAssessment::parsing_error()`.
    pub async fn classify(&self, message: &str) -> LeadAssessment {
        let messages = [ChatMessage::user(lead_prompt(message))];
        match self.model.complete(&messages).await {
            Ok(raw) => {
                log::debug!("leads: raw classification: {}", raw);
                parse_assessment(&raw)
            }
            Err(e) => {
                log::warn!("leads: classification call failed: {}", e);
                LeadAssessment::parsing_error()
            }
        }
    }
}

/// Strict-then-lenient parse of the model output.
pub fn parse_assessment(raw: &str) -> LeadAssessment {
    let cleaned = strip_code_fence(raw);
    if let Ok(a) = serde_json::from_str::<LeadAssessment>(cleaned) {
        return a;
    }
    if let Some(a) = first_json_object(cleaned).and_then(|s| serde_json::from_str(s).ok()) {
        return a;
    }
    log::warn!("leads: could not parse classification output: {:?}", raw);
    LeadAssessment::parsing_error()
}

/// Remove a surrounding ```json ... ``` (or bare ```) fence.
fn strip_code_fence(raw: &str) -> &str {
    let s = raw.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// First balanced brace-delimited substring, skipping braces inside JSON strings.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Apply the lead gate to an assessment and the original message text.
pub fn confirm(assessment: &LeadAssessment, message: &str) -> GateDecision {
    let normalized = rules::normalize(message);
    rules::evaluate_gate(&GateInput {
        is_lead: assessment.is_lead,
        interest: assessment.interest,
        has_property_mentions: !assessment.property_mentions.is_empty(),
        normalized_text: &normalized,
    })
}

/// Fixed reply to the sender once a lead is confirmed.
pub fn confirmation_message(interest: Interest) -> &'static str {
    match interest {
        Interest::Visit => {
            "¡Excelente! Un asesor se pondrá en contacto contigo en breve para coordinar los detalles de tu visita."
        }
        Interest::Buy | Interest::Rent => {
            "¡Perfecto! Gracias por tu interés. Un asesor te contactará pronto para darte más información."
        }
        _ => "¡Gracias por tu mensaje! Un asesor se pondrá en contacto contigo pronto.",
    }
}

/// Structured alert sent to the human agents.
pub fn format_agent_alert(
    sender: &str,
    message: &str,
    assessment: &LeadAssessment,
    listing: Option<&PropertyListing>,
    at: DateTime<Local>,
) -> String {
    let mut lines = vec![
        "🔥 *Nuevo lead calificado*".to_string(),
        String::new(),
        format!("📱 Cliente: {}", sender),
        format!("🎯 Interés: {}", assessment.interest.label()),
        format!("💬 Mensaje: {}", message),
    ];
    if !assessment.property_mentions.is_empty() {
        lines.push(format!(
            "🏘️ Propiedades mencionadas: {}",
            assessment.property_mentions.join(", ")
        ));
    }
    if let Some(l) = listing {
        lines.push(String::new());
        lines.push(format!("🏠 Propiedad: {}", l.title));
        if let Some(price) = &l.price {
            lines.push(format!("💰 Precio: {}", price));
        }
        if !l.address.is_empty() {
            lines.push(format!("📍 Dirección: {}", l.address));
        }
        match (&l.agent_name, &l.agent_phone) {
            (Some(name), Some(phone)) => lines.push(format!("👤 Agente: {} ({})", name, phone)),
            (Some(name), None) => lines.push(format!("👤 Agente: {}", name)),
            (None, Some(phone)) => lines.push(format!("👤 Agente: {}", phone)),
            (None, None) => {}
        }
        if let Some(url) = &l.url {
            lines.push(format!("🔗 {}", url));
        }
    }
    lines.push(String::new());
    lines.push(format!("🕒 {}", at.format("%d/%m/%Y %H:%M")));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct Canned(Result<&'static str, ()>);

    #[async_trait]
    impl LanguageModel for Canned {
        async fn complete(&self, _: &[ChatMessage]) -> Result<String, LlmError> {
            self.0
                .map(str::to_string)
                .map_err(|_| LlmError::Api("503 unavailable".into()))
        }
    }

    #[test]
    fn strict_json() {
        let a = parse_assessment(
            r#"{"is_lead": true, "interest": "visit", "property_mentions": ["Casa Lagos"]}"#,
        );
        assert!(a.is_lead);
        assert_eq!(a.interest, Interest::Visit);
        assert_eq!(a.property_mentions, vec!["Casa Lagos"]);
        assert!(!a.parse_failed);
    }

    #[test]
    fn fenced_json() {
        let a = parse_assessment("```json\n{\"is_lead\": true, \"interest\": \"rent\", \"property_mentions\": []}\n```");
        assert_eq!(a.interest, Interest::Rent);
        assert!(a.is_lead);
    }

    #[test]
    fn json_embedded_in_prose() {
        let a = parse_assessment(
            "Claro, aquí está: {\"is_lead\": true, \"interest\": \"buy\", \"property_mentions\": [\"Depto {centro}\"]} espero ayude",
        );
        assert_eq!(a.interest, Interest::Buy);
        assert_eq!(a.property_mentions, vec!["Depto {centro}"]);
    }

    #[test]
    fn unknown_interest_is_none() {
        let a = parse_assessment(r#"{"is_lead": true, "interest": "sell"}"#);
        assert_eq!(a.interest, Interest::None);
    }

    #[test]
    fn non_json_yields_safe_default() {
        let a = parse_assessment("No estoy seguro de qué quiere el usuario.");
        assert!(!a.is_lead);
        assert_eq!(a.interest, Interest::None);
        assert!(a.property_mentions.is_empty());
        assert!(a.parse_failed);
    }

    #[tokio::test]
    async fn classifier_never_fails() {
        let down = LeadClassifier::new(Arc::new(Canned(Err(()))));
        assert!(!down.classify("hola").await.is_lead);

        let garbage = LeadClassifier::new(Arc::new(Canned(Ok("{not json"))));
        assert!(garbage.classify("hola").await.parse_failed);
    }

    #[test]
    fn confirm_uses_message_text() {
        let buy = LeadAssessment {
            is_lead: true,
            interest: Interest::Buy,
            ..Default::default()
        };
        assert!(!confirm(&buy, "Quiero comprar un departamento en Cancún").confirmed());
        assert!(confirm(&buy, "Llámame para ver este departamento").confirmed());

        let visit = LeadAssessment {
            is_lead: true,
            interest: Interest::Visit,
            ..Default::default()
        };
        assert!(confirm(&visit, "ok").confirmed());
    }

    #[test]
    fn confirmation_varies_by_interest() {
        assert!(confirmation_message(Interest::Visit).contains("visita"));
        assert_eq!(
            confirmation_message(Interest::Buy),
            confirmation_message(Interest::Rent)
        );
    }

    #[test]
    fn alert_contains_lead_and_listing() {
        let assessment = LeadAssessment {
            is_lead: true,
            interest: Interest::Visit,
            property_mentions: vec!["Lagos del Sol".to_string()],
            parse_failed: false,
        };
        let listing = crate::catalog::tests::listing("Casa Lagos del Sol", "Calle Cormoranes", 1);
        let at = Local.with_ymd_and_hms(2025, 3, 14, 10, 30, 0).unwrap();
        let alert = format_agent_alert(
            "+5219981112233",
            "Quiero visitar la casa",
            &assessment,
            Some(&listing),
            at,
        );
        assert!(alert.contains("📱 Cliente: +5219981112233"));
        assert!(alert.contains("🎯 Interés: Visita"));
        assert!(alert.contains("💬 Mensaje: Quiero visitar la casa"));
        assert!(alert.contains("Lagos del Sol"));
        assert!(alert.contains("💰 Precio: $4,500,000 MXN"));
        assert!(alert.contains("👤 Agente: Laura Méndez (+529981234567)"));
        assert!(alert.contains("14/03/2025 10:30"));
    }
}
