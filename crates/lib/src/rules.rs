//! Keyword vocabularies and the deterministic lead gate.
//!
//! All heuristics that look at raw message text live here so they can be tested
//! without a model. Text is normalized first (lowercase, Spanish accents folded,
//! punctuation collapsed to single spaces) and keywords match on token boundaries,
//! so "Llámame" matches `llamame` but "verde" does not match `ver`.

use crate::leads::Interest;

/// Contact or scheduling intent ("call me", "schedule", "visit", "show me").
pub const CONTACT_KEYWORDS: &[&str] = &[
    "llamame",
    "llamenme",
    "marcame",
    "contactame",
    "contactenme",
    "contacten",
    "contactarme",
    "comuniquen",
    "comuniquense",
    "comunicarse conmigo",
    "comunicarme",
    "agendar",
    "agenda",
    "agendemos",
    "cita",
    "visita",
    "visitar",
    "visitarla",
    "visitarlo",
    "ver",
    "verla",
    "verlo",
    "conocerla",
    "conocerlo",
    "mostrar",
    "mostrarme",
    "muestrame",
    "muestren",
    "ensenar",
    "ensename",
    "recorrido",
];

/// Demonstratives and external platforms that point at one concrete listing.
pub const SPECIFIC_REFERENCE_KEYWORDS: &[&str] = &[
    "esta casa",
    "esa casa",
    "este departamento",
    "ese departamento",
    "este depa",
    "esta propiedad",
    "esa propiedad",
    "este inmueble",
    "ese inmueble",
    "esta oficina",
    "este terreno",
    "este local",
    "esta residencia",
    "este anuncio",
    "esta publicacion",
    "inmuebles24",
    "mercadolibre",
    "vivanuncios",
    "lamudi",
];

/// Street, avenue, neighborhood and complex vocabulary.
pub const ADDRESS_KEYWORDS: &[&str] = &[
    "calle",
    "avenida",
    "av",
    "boulevard",
    "blvd",
    "fraccionamiento",
    "colonia",
    "col",
    "residencial",
    "plaza",
    "centro",
];

/// Explicit requests for pictures.
pub const PHOTO_REQUEST_KEYWORDS: &[&str] = &[
    "foto",
    "fotos",
    "fotografia",
    "fotografias",
    "imagen",
    "imagenes",
];

/// Lowercase, fold Spanish accents and collapse everything that is not a letter or
/// digit into single spaces. The result is padded with one space on each side so a
/// keyword can be matched as `" {kw} "`.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for c in text.chars().flat_map(char::to_lowercase) {
        let c = fold_accent(c);
        if c.is_alphanumeric() {
            out.push(c);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        other => other,
    }
}

/// First keyword of `keywords` present in already-normalized text.
pub fn find_keyword(normalized: &str, keywords: &[&'static str]) -> Option<&'static str> {
    keywords
        .iter()
        .copied()
        .find(|kw| normalized.contains(&format!(" {} ", kw)))
}

/// True if any keyword occurs in `text` (normalizes `text` itself).
pub fn mentions_any(text: &str, keywords: &[&'static str]) -> bool {
    find_keyword(&normalize(text), keywords).is_some()
}

/// Input to the lead gate: the model's raw judgment plus the normalized message.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub is_lead: bool,
    pub interest: Interest,
    pub has_property_mentions: bool,
    pub normalized_text: &'a str,
}

/// What a matching rule decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Confirm,
    Reject,
}

/// One row of the gate: a named predicate and the verdict when it holds.
pub struct GateRule {
    pub name: &'static str,
    pub when: fn(&GateInput<'_>) -> bool,
    pub verdict: Verdict,
}

/// Outcome of running the gate: the verdict and the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub verdict: Verdict,
    pub rule: &'static str,
}

impl GateDecision {
    pub fn confirmed(&self) -> bool {
        self.verdict == Verdict::Confirm
    }
}

fn not_a_lead(i: &GateInput<'_>) -> bool {
    !i.is_lead
}

fn visit_requested(i: &GateInput<'_>) -> bool {
    i.interest == Interest::Visit
}

fn not_transactional(i: &GateInput<'_>) -> bool {
    !matches!(i.interest, Interest::Buy | Interest::Rent)
}

fn contact_intent(i: &GateInput<'_>) -> bool {
    find_keyword(i.normalized_text, CONTACT_KEYWORDS).is_some()
}

fn model_saw_properties(i: &GateInput<'_>) -> bool {
    i.has_property_mentions
}

fn specific_reference(i: &GateInput<'_>) -> bool {
    find_keyword(i.normalized_text, SPECIFIC_REFERENCE_KEYWORDS).is_some()
}

/// Evaluated top to bottom; the first matching rule wins.
pub const LEAD_GATE: &[GateRule] = &[
    GateRule {
        name: "model_says_no_lead",
        when: not_a_lead,
        verdict: Verdict::Reject,
    },
    GateRule {
        name: "visit_request",
        when: visit_requested,
        verdict: Verdict::Confirm,
    },
    GateRule {
        name: "inquiry_or_none",
        when: not_transactional,
        verdict: Verdict::Reject,
    },
    GateRule {
        name: "contact_intent",
        when: contact_intent,
        verdict: Verdict::Confirm,
    },
    GateRule {
        name: "property_mentions",
        when: model_saw_properties,
        verdict: Verdict::Confirm,
    },
    GateRule {
        name: "specific_reference",
        when: specific_reference,
        verdict: Verdict::Confirm,
    },
];

const NO_CONCRETE_STEP: &str = "no_concrete_next_step";

/// Run `LEAD_GATE` over the input. Falls through to a rejection when nothing matches.
pub fn evaluate_gate(input: &GateInput<'_>) -> GateDecision {
    LEAD_GATE
        .iter()
        .find(|rule| (rule.when)(input))
        .map(|rule| GateDecision {
            verdict: rule.verdict,
            rule: rule.name,
        })
        .unwrap_or(GateDecision {
            verdict: Verdict::Reject,
            rule: NO_CONCRETE_STEP,
        })
}
