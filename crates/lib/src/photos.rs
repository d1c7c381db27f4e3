//! Decide whether a reply carries listing photos, and which.

use crate::catalog::PropertyCatalog;
use crate::routing::{RoutingAnalysis, Strategy};
use crate::rules::{self, ADDRESS_KEYWORDS, PHOTO_REQUEST_KEYWORDS};

/// Why photos were considered for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoTrigger {
    Consultant,
    ConfirmedLead,
    PhotoRequest,
    AddressReference,
}

impl PhotoTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoTrigger::Consultant => "consultant",
            PhotoTrigger::ConfirmedLead => "confirmed_lead",
            PhotoTrigger::PhotoRequest => "photo_request",
            PhotoTrigger::AddressReference => "address_reference",
        }
    }
}

/// First trigger that applies, if any.
pub fn photo_trigger(
    analysis: &RoutingAnalysis,
    lead_confirmed: bool,
    original_message: &str,
) -> Option<PhotoTrigger> {
    if analysis.strategy == Strategy::Consultant {
        return Some(PhotoTrigger::Consultant);
    }
    if lead_confirmed {
        return Some(PhotoTrigger::ConfirmedLead);
    }
    let normalized = rules::normalize(original_message);
    if rules::find_keyword(&normalized, PHOTO_REQUEST_KEYWORDS).is_some() {
        return Some(PhotoTrigger::PhotoRequest);
    }
    if rules::find_keyword(&normalized, ADDRESS_KEYWORDS).is_some() {
        return Some(PhotoTrigger::AddressReference);
    }
    None
}

/// Photo URLs to attach to `reply_text`, in stored order (at most four). Empty when
/// nothing triggers or no listing scores at least two keywords against the reply.
pub fn select_photos(
    catalog: &PropertyCatalog,
    reply_text: &str,
    analysis: &RoutingAnalysis,
    lead_confirmed: bool,
    original_message: &str,
) -> Vec<String> {
    let Some(trigger) = photo_trigger(analysis, lead_confirmed, original_message) else {
        return Vec::new();
    };
    let candidates = catalog.matches(reply_text);
    // Candidates are sorted by score, so the head is the strongest match, or the best
    // weak one when nothing reaches the strong threshold.
    let Some(chosen) = candidates.first() else {
        log::debug!("photos: {} triggered but no listing matched the reply", trigger.as_str());
        return Vec::new();
    };
    log::info!(
        "photos: {} match '{}' (score {}, {} candidates) via {}",
        if chosen.is_strong() { "strong" } else { "weak" },
        chosen.listing.title,
        chosen.score,
        candidates.len(),
        trigger.as_str()
    );
    chosen.listing.attachable_photos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;
    use crate::routing::LinkRouter;

    fn analysis(msg: &str) -> RoutingAnalysis {
        LinkRouter::default().analyze(msg)
    }

    const STRONG_REPLY: &str =
        "Te recomiendo la casa en Residencial Lagos del Sol, sobre la calle Cormoranes.";

    #[test]
    fn no_trigger_no_photos() {
        let msg = "¿Qué opciones tienen?";
        let photos = select_photos(&sample_catalog(), STRONG_REPLY, &analysis(msg), false, msg);
        assert!(photos.is_empty());
    }

    #[test]
    fn photo_request_attaches_strong_match_in_order() {
        let msg = "¿Me mandas fotos?";
        let catalog = sample_catalog();
        let photos = select_photos(&catalog, STRONG_REPLY, &analysis(msg), false, msg);
        assert_eq!(photos, catalog.listings()[0].photos[..4].to_vec());
    }

    #[test]
    fn single_keyword_matches_attach_nothing() {
        let msg = "Quiero ver fotos";
        let photos = select_photos(&sample_catalog(), "Tenemos una casa disponible.", &analysis(msg), false, msg);
        assert!(photos.is_empty());
    }

    #[test]
    fn confirmed_lead_triggers() {
        let msg = "hola";
        let trigger = photo_trigger(&analysis(msg), true, msg);
        assert_eq!(trigger, Some(PhotoTrigger::ConfirmedLead));
    }

    #[test]
    fn address_reference_triggers() {
        let msg = "¿Qué tienen en la colonia Centro?";
        assert_eq!(
            photo_trigger(&analysis(msg), false, msg),
            Some(PhotoTrigger::AddressReference)
        );
    }

    #[test]
    fn weak_match_is_used_when_no_strong_one() {
        let msg = "fotos por favor";
        let catalog = sample_catalog();
        let reply = "El departamento está en Cancún.";
        let photos = select_photos(&catalog, reply, &analysis(msg), false, msg);
        assert_eq!(photos, catalog.listings()[1].photos);
    }
}
