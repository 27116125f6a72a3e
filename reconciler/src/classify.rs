use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::store::{StoreId, StoreProfile, StoreRegistry};

/// Brand marker present in every authoritative store line and calendar title.
pub const PRODUCT_MARKER: &str = "HALLEL";

/// Outcome of classifying one message to its owning store. The confidence
/// score is advisory, for logs and triage; callers branch on presence only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub store: StoreId,
    pub confidence: u8,
}

static STORE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*店舗[：:](.*)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreLine {
    /// Exactly one `店舗：` line naming this store's full branded phrase.
    Strict,
    /// A looser line mentioning the store; `equipment` marks whether the
    /// chosen line also carries the 設備 detail keyword.
    Relaxed { equipment: bool },
}

/// Signal B: find a usable store line for this profile. A single strict
/// `店舗：` line whose value contains "HALLEL <name>" wins outright.
/// Otherwise any line containing all of 店舗, HALLEL and the store name is
/// accepted, preferring the candidate with the most colons and the 設備
/// keyword, which tends to be the authoritative detail line rather than
/// quoted or promotional text.
fn find_store_line(lines: &[&str], profile: &StoreProfile) -> Option<StoreLine> {
    let branded = format!("{PRODUCT_MARKER} {}", profile.name);
    let strict = lines
        .iter()
        .filter(|line| {
            STORE_LINE
                .captures(line)
                .is_some_and(|captures| captures[1].contains(&branded))
        })
        .count();
    if strict == 1 {
        return Some(StoreLine::Strict);
    }

    lines
        .iter()
        .filter(|line| {
            line.contains("店舗")
                && line.contains(PRODUCT_MARKER)
                && line.contains(&profile.name)
        })
        .max_by_key(|line| {
            let colons = line.matches(['：', ':']).count();
            let equipment = usize::from(line.contains("設備"));
            colons + equipment * 2
        })
        .map(|line| StoreLine::Relaxed {
            equipment: line.contains("設備"),
        })
}

/// Signal C: look for other stores' keywords. An occurrence in the upper
/// half of the body (by line index) means the message substantively belongs
/// elsewhere and disqualifies this candidate. Occurrences confined to the
/// lower half are footer noise and mildly corroborate the candidate.
fn exclusion_check(lines: &[&str], registry: &StoreRegistry, target: StoreId) -> Option<bool> {
    let midpoint = lines.len() / 2;
    let mut footer_mentions = false;
    for other in registry.profiles().iter().filter(|p| p.id != target) {
        for (index, line) in lines.iter().enumerate() {
            if line.contains(&other.keyword) {
                if index < midpoint {
                    return None;
                }
                footer_mentions = true;
            }
        }
    }
    Some(footer_mentions)
}

/// Signal A: subject line corroboration.
fn subject_bonus(subject: &str, profile: &StoreProfile) -> u8 {
    if subject.contains(&profile.name) {
        30
    } else if subject.contains(&profile.keyword) {
        15
    } else {
        0
    }
}

/// Assign a message to its owning store, or `None` when it belongs to a
/// different tenant or a store this registry does not serve.
///
/// Messages carrying a store line anywhere are classified strictly from it.
/// Legacy-template messages without one fall back to bare substring
/// assignment, still guarded by the cross-store exclusion check, at a lower
/// baseline confidence.
pub fn classify(subject: &str, body: &str, registry: &StoreRegistry) -> Option<Classification> {
    let lines: Vec<&str> = body.lines().collect();

    let mut best: Option<Classification> = None;
    let mut saw_store_line = false;
    for profile in registry.profiles() {
        let Some(line) = find_store_line(&lines, profile) else {
            continue;
        };
        saw_store_line = true;
        let Some(footer_mentions) = exclusion_check(&lines, registry, profile.id) else {
            debug!(store = %profile.id, "store line found but another store dominates the body");
            continue;
        };
        let mut confidence: u8 = match line {
            StoreLine::Strict => 50,
            StoreLine::Relaxed { equipment: true } => 45,
            StoreLine::Relaxed { equipment: false } => 40,
        };
        confidence += subject_bonus(subject, profile);
        if footer_mentions {
            confidence += 5;
        }
        let confidence = confidence.min(100);
        if best.is_none_or(|b| confidence > b.confidence) {
            best = Some(Classification {
                store: profile.id,
                confidence,
            });
        }
    }
    if best.is_some() || saw_store_line {
        return best;
    }

    // Legacy template: no store line at all, anywhere. Fall back to the
    // earliest store mention in the body, still subject to exclusion.
    let mut fallback: Option<(usize, Classification)> = None;
    for profile in registry.profiles() {
        let Some(position) = body.find(&profile.name).or_else(|| body.find(&profile.keyword))
        else {
            continue;
        };
        if exclusion_check(&lines, registry, profile.id).is_none() {
            continue;
        }
        let confidence = (30 + subject_bonus(subject, profile)).min(100);
        if fallback.is_none_or(|(earliest, _)| position < earliest) {
            fallback = Some((
                position,
                Classification {
                    store: profile.id,
                    confidence,
                },
            ));
        }
    }
    fallback.map(|(_, classification)| classification)
}
