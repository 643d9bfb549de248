use crate::core::scoring::calculate_location_score;
use crate::core::text::{canonicalize_company, contains_phrase, tokenize};
use crate::models::{Listing, UserProfile};

/// Title words too generic to signal a plausible match on their own
const GENERIC_TITLE_WORDS: &[&str] = &[
    "senior", "junior", "lead", "staff", "principal", "sr", "jr", "mid", "level", "i", "ii", "iii",
    "the", "and", "of", "for", "a", "an",
];

/// Check whether a listing's company or title is on the profile blacklist
///
/// Companies compare by canonical name; blacklisted titles match as whole-word
/// phrases inside the listing title.
#[inline]
pub fn is_blacklisted(listing: &Listing, profile: &UserProfile) -> bool {
    let company = canonicalize_company(&listing.company);
    if profile
        .blacklisted_companies
        .iter()
        .any(|blocked| canonicalize_company(blocked) == company)
    {
        return true;
    }

    let title_tokens = tokenize(&listing.title);
    profile
        .blacklisted_titles
        .iter()
        .any(|blocked| contains_phrase(&title_tokens, &tokenize(blocked)))
}

/// Cheap pre-scoring filter: could this listing plausibly interest the profile?
///
/// Requires a meaningful desired-title word in the listing title and a
/// location that is not outright incompatible. Empty preferences pass.
#[inline]
pub fn plausibly_matches(listing: &Listing, profile: &UserProfile) -> bool {
    if !profile.active {
        return false;
    }
    title_plausible(listing, profile) && calculate_location_score(listing, profile) > 0.0
}

fn title_plausible(listing: &Listing, profile: &UserProfile) -> bool {
    if profile.desired_titles.is_empty() {
        return true;
    }
    let title_tokens = tokenize(&listing.title);

    profile.desired_titles.iter().any(|desired| {
        let meaningful: Vec<String> = tokenize(desired)
            .into_iter()
            .filter(|t| !GENERIC_TITLE_WORDS.contains(&t.as_str()))
            .collect();
        if meaningful.is_empty() {
            return true;
        }
        meaningful.iter().any(|t| title_tokens.contains(t))
    })
}
