//! Rule-based admissibility filtering of card candidates.
//!
//! Each candidate gets a `keep` or `reject(reason)` verdict. Rejection
//! reasons come from a fixed taxonomy (see [`RejectReason`]); matching is
//! case-insensitive against configurable block-lists and nothing here
//! learns or calls out. A malformed image is a verdict, never an error —
//! one bad file cannot abort the batch.

mod blocklist;

pub use blocklist::Blocklist;

use std::io::Cursor;

use crate::config::FilterConfig;
use crate::types::{CardCandidate, RejectReason, RejectedCard};

/// Built-in disallowed terms (profanity). Extended via
/// `filter.disallowed_terms` in the config.
const DISALLOWED_TERMS: &[&str] = &[
    "ass", "bastard", "bitch", "cock", "dick", "piss", "porn", "sex", "shit", "slut", "tits",
    "whore",
];

/// Built-in domain-exclusion terms (medical/clinical/technical jargon that
/// makes poor communication cards). Extended via `filter.domain_exclusions`.
const DOMAIN_EXCLUSION_TERMS: &[&str] = &[
    "anesthesia",
    "biopsy",
    "blood pressure",
    "catheter",
    "chemotherapy",
    "defibrillator",
    "diagnosis",
    "dialysis",
    "electrocardiogram",
    "hemoglobin",
    "intravenous",
    "scalpel",
    "stethoscope",
    "syringe",
    "transfusion",
    "ventilator",
    "algorithm",
    "capacitor",
    "database",
    "hypotenuse",
    "oscilloscope",
    "voltage",
];

/// The verdict for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Keep,
    Reject(RejectReason),
}

/// Rule-based admissibility filter.
pub struct ImageFilter {
    disallowed: Blocklist,
    exclusions: Blocklist,
}

impl ImageFilter {
    /// Build the filter from config, merging built-in lists with extras.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            disallowed: Blocklist::new(DISALLOWED_TERMS, &config.disallowed_terms),
            exclusions: Blocklist::new(DOMAIN_EXCLUSION_TERMS, &config.domain_exclusions),
        }
    }

    /// Judge a single candidate. Never fails: an unreadable image produces
    /// a reject verdict, not an error.
    pub fn verdict(&self, card: &CardCandidate) -> Verdict {
        if card.keyword.trim().is_empty() {
            return Verdict::Reject(RejectReason::EmptyKeyword);
        }

        if let Some(term) = self.disallowed.matches(&card.keyword) {
            return Verdict::Reject(RejectReason::DisallowedTerm {
                term: term.to_string(),
            });
        }

        if let Some(term) = self.exclusions.matches(&card.keyword) {
            return Verdict::Reject(RejectReason::DomainExclusion {
                term: term.to_string(),
            });
        }

        if !card.image.exists() {
            return Verdict::Reject(RejectReason::MissingImage);
        }

        match decode_check(card) {
            Ok(()) => Verdict::Keep,
            Err(message) => Verdict::Reject(RejectReason::UnreadableImage { message }),
        }
    }

    /// Filter a batch, splitting it into admitted and rejected candidates.
    pub fn filter_batch(
        &self,
        candidates: Vec<CardCandidate>,
    ) -> (Vec<CardCandidate>, Vec<RejectedCard>) {
        let mut admitted = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();

        for card in candidates {
            match self.verdict(&card) {
                Verdict::Keep => admitted.push(card),
                Verdict::Reject(reason) => {
                    tracing::debug!("Rejected {:?} ({}): {:?}", card.keyword, card.id, reason);
                    rejected.push(RejectedCard { card, reason });
                }
            }
        }

        tracing::info!(
            "Filter: {} admitted, {} rejected",
            admitted.len(),
            rejected.len()
        );
        (admitted, rejected)
    }
}

/// Verify the image bytes actually decode.
fn decode_check(card: &CardCandidate) -> Result<(), String> {
    let bytes = std::fs::read(&card.image).map_err(|e| format!("read failed: {e}"))?;
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| format!("format detection failed: {e}"))?
        .decode()
        .map_err(|e| format!("decode failed: {e}"))?;
    Ok(())
}
