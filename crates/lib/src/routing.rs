//! Link/context routing: pick the answer strategy for a message.
//!
//! A link to a known listing portal wins over everything else (consultant). Without
//! one, street/avenue/complex vocabulary selects hybrid, anything else is direct.
//! URL extraction is best effort: fields that cannot be recovered stay unset.

use crate::rules::{self, ADDRESS_KEYWORDS};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Direct,
    Consultant,
    Hybrid,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Consultant => "consultant",
            Strategy::Hybrid => "hybrid",
        }
    }
}

/// Hints recovered from an external listing link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedInfo {
    pub source: String,
    pub url: String,
    pub location: Option<String>,
    pub area: Option<String>,
    pub property_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingAnalysis {
    pub strategy: Strategy,
    pub extracted_info: Option<ExtractedInfo>,
    pub reason: String,
}

/// A listing portal whose property pages we recognize.
#[derive(Debug, Clone, Copy)]
pub struct Portal {
    pub source: &'static str,
    /// Lowercase substring identifying a property-page URL.
    pub marker: &'static str,
}

pub const PORTALS: &[Portal] = &[Portal {
    source: "Inmuebles24",
    marker: "inmuebles24.com/propiedades/",
}];

/// Slug fragment -> display name. Multi-word places first so they win over substrings.
const LOCATIONS: &[(&str, &str)] = &[
    ("playa-del-carmen", "Playa del Carmen"),
    ("puerto-morelos", "Puerto Morelos"),
    ("puerto-aventuras", "Puerto Aventuras"),
    ("cancun", "Cancún"),
    ("tulum", "Tulum"),
    ("merida", "Mérida"),
    ("cozumel", "Cozumel"),
    ("naucalpan", "Naucalpan"),
    ("cdmx", "Ciudad de México"),
];

const PROPERTY_TYPES: &[&str] = &["casa", "departamento", "oficina"];

#[derive(Debug, Clone)]
pub struct LinkRouter {
    portals: &'static [Portal],
}

impl Default for LinkRouter {
    fn default() -> Self {
        Self { portals: PORTALS }
    }
}

impl LinkRouter {
    pub fn new(portals: &'static [Portal]) -> Self {
        Self { portals }
    }

    pub fn analyze(&self, message: &str) -> RoutingAnalysis {
        if let Some(info) = self.extract_link(message) {
            return RoutingAnalysis {
                strategy: Strategy::Consultant,
                reason: format!("external listing link from {}", info.source),
                extracted_info: Some(info),
            };
        }
        let normalized = rules::normalize(message);
        if let Some(kw) = rules::find_keyword(&normalized, ADDRESS_KEYWORDS) {
            return RoutingAnalysis {
                strategy: Strategy::Hybrid,
                extracted_info: None,
                reason: format!("mentions a specific address ({})", kw),
            };
        }
        RoutingAnalysis {
            strategy: Strategy::Direct,
            extracted_info: None,
            reason: "no external link or address reference".to_string(),
        }
    }

    fn extract_link(&self, message: &str) -> Option<ExtractedInfo> {
        for token in message.split_whitespace() {
            let lower = token.to_lowercase();
            if let Some(portal) = self.portals.iter().find(|p| lower.contains(p.marker)) {
                let url = token.trim_end_matches(|c: char| {
                    matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | ']' | '"' | '\'' | '>')
                });
                return Some(parse_listing_url(portal.source, url));
            }
        }
        None
    }
}

/// Pull location, area and property type out of the URL's last path segment.
fn parse_listing_url(source: &str, url: &str) -> ExtractedInfo {
    let mut info = ExtractedInfo {
        source: source.to_string(),
        url: url.to_string(),
        ..Default::default()
    };
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let Some(segment) = path.rsplit('/').find(|s| !s.is_empty()) else {
        return info;
    };
    let slug = segment.trim_end_matches(".html").to_lowercase();

    info.location = LOCATIONS
        .iter()
        .find(|(frag, _)| slug.contains(frag))
        .map(|(_, name)| name.to_string());
    info.area = residential_area(&slug);
    info.property_type = PROPERTY_TYPES
        .iter()
        .find(|t| slug.contains(*t))
        .map(|t| t.to_string());
    info
}

/// "residencial" followed by a separator and a name token, title-cased.
fn residential_area(slug: &str) -> Option<String> {
    const WORD: &str = "residencial";
    let start = slug.find(WORD)? + WORD.len();
    let rest = slug[start..].strip_prefix(['-', ' ', '_'])?;
    let name: String = rest.chars().take_while(|c| c.is_alphanumeric()).collect();
    if name.is_empty() {
        return None;
    }
    Some(format!("Residencial {}", title_case(&name)))
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Retrieval query asking for listings similar to the external one. The query is built
/// from the extracted hints only; the original message (mostly a bare URL) is not reused.
pub fn generate_query(_original_message: &str, info: &ExtractedInfo) -> String {
    let kind = match info.property_type.as_deref() {
        Some("casa") => "casas".to_string(),
        Some("departamento") => "departamentos".to_string(),
        Some("oficina") => "oficinas".to_string(),
        Some(other) => other.to_string(),
        None => "propiedades".to_string(),
    };
    let place = info
        .area
        .as_deref()
        .or(info.location.as_deref())
        .map(|p| format!(" en {}", p))
        .unwrap_or_default();
    format!(
        "¿Qué {}{} similares tenemos disponibles? Busco opciones en la misma zona o zonas parecidas.",
        kind, place
    )
}

/// Fixed consultant framing around the model's answer.
pub fn format_consultant_reply(answer: &str, info: &ExtractedInfo) -> String {
    let subject = match info.property_type.as_deref() {
        Some("departamento") => "un departamento".to_string(),
        Some(t) => format!("una {}", t),
        None => "una propiedad".to_string(),
    };
    let source = if info.source.is_empty() {
        "la plataforma externa"
    } else {
        info.source.as_str()
    };
    let middle = match info.location.as_deref() {
        Some(loc) => format!(
            "Aunque no tengo acceso directo a esa publicación, tenemos excelentes opciones en {} y zonas similares. ",
            loc
        ),
        None => "Aunque no tengo acceso directo a esa publicación, tenemos excelentes opciones similares. "
            .to_string(),
    };
    format!(
        "¡Hola! Vi que te interesa {} de {}. {}\n\n{}\n\n¿Te gustaría que te ayude a encontrar algo similar o tienes algún presupuesto y preferencias específicas en mente?",
        subject,
        source,
        middle,
        answer.trim()
    )
}
