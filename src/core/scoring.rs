use crate::core::text::{canonicalize_location, contains_phrase, tokenize};
use crate::models::{
    Listing, ScoreBreakdown, ScoreComponent, ScoreComponentKind, ScoringWeights, UserProfile,
};

/// Calculate a match score (0-1) for a listing against a profile
///
/// Scoring formula:
/// score = (
///     skills_score * 0.40 +       # Profile skills found in the listing text
///     title_score * 0.20 +        # Desired title tokens present in the listing title
///     location_score * 0.15 +     # Same place, remote-compatible, or no preference
///     salary_score * 0.10 +       # Listing pay relative to the profile floor
///     semantic_score * 0.15       # Embedding cosine similarity
/// )
///
/// Without both embeddings the semantic weight is spread proportionally over
/// the other components, so the scale stays the same.
pub fn calculate_match_score(
    listing: &Listing,
    profile: &UserProfile,
    weights: &ScoringWeights,
) -> (f64, ScoreBreakdown) {
    let listing_tokens = tokenize(&listing.search_text());

    let (skills_score, matched_skills) = calculate_skill_score(&listing_tokens, &profile.skills);
    let title_score = calculate_title_score(&listing.title, &profile.desired_titles);
    let location_score = calculate_location_score(listing, profile);
    let salary_score = calculate_salary_score(listing.salary_min, listing.salary_max, profile.salary_floor);

    let semantic_score = match (&listing.embedding, &profile.embedding) {
        (Some(a), Some(b)) => Some(cosine_similarity(a, b)),
        _ => None,
    };

    let mut parts = vec![
        (ScoreComponentKind::Skills, skills_score, weights.skills),
        (ScoreComponentKind::Title, title_score, weights.title),
        (ScoreComponentKind::Location, location_score, weights.location),
        (ScoreComponentKind::Salary, salary_score, weights.salary),
    ];
    if let Some(semantic) = semantic_score {
        parts.push((ScoreComponentKind::Semantic, semantic, weights.semantic));
    }

    let weight_sum: f64 = parts.iter().map(|(_, _, w)| w.max(0.0)).sum();

    let components: Vec<ScoreComponent> = parts
        .into_iter()
        .map(|(kind, value, weight)| {
            let weight = if weight_sum > 0.0 { weight.max(0.0) / weight_sum } else { 0.0 };
            let value = value.clamp(0.0, 1.0);
            ScoreComponent {
                kind,
                value,
                weight,
                contribution: value * weight,
            }
        })
        .collect();

    let total: f64 = components.iter().map(|c| c.contribution).sum();

    let breakdown = ScoreBreakdown {
        components,
        matched_skills,
        embedding_fallback: semantic_score.is_none(),
    };

    (total.clamp(0.0, 1.0), breakdown)
}

/// Fraction of profile skills present as whole-word phrases in the listing
///
/// Non-decreasing in the number of matched skills.
pub fn calculate_skill_score(listing_tokens: &[String], skills: &[String]) -> (f64, Vec<String>) {
    let mut matched = Vec::new();
    let mut considered = 0usize;

    for skill in skills {
        let needle = tokenize(skill);
        if needle.is_empty() {
            continue;
        }
        considered += 1;
        if contains_phrase(listing_tokens, &needle) {
            matched.push(skill.clone());
        }
    }

    if considered == 0 {
        return (0.0, matched);
    }
    (matched.len() as f64 / considered as f64, matched)
}

/// Best fraction of any desired title's tokens present in the listing title
#[inline]
pub fn calculate_title_score(listing_title: &str, desired_titles: &[String]) -> f64 {
    if desired_titles.is_empty() {
        return 1.0;
    }
    let title_tokens = tokenize(listing_title);

    desired_titles
        .iter()
        .map(|desired| {
            let wanted = tokenize(desired);
            if wanted.is_empty() {
                return 0.0;
            }
            let present = wanted.iter().filter(|t| title_tokens.contains(t)).count();
            present as f64 / wanted.len() as f64
        })
        .fold(0.0, f64::max)
}

/// Location compatibility (0, 0.5 or 1)
#[inline]
pub fn calculate_location_score(listing: &Listing, profile: &UserProfile) -> f64 {
    if profile.desired_locations.is_empty() {
        return 1.0;
    }
    if listing.remote && profile.accepts_remote {
        return 1.0;
    }

    let listing_location = canonicalize_location(&listing.location);
    let listing_tokens: Vec<&str> = listing_location.split_whitespace().collect();

    let mut best: f64 = 0.0;
    for desired in &profile.desired_locations {
        let desired = canonicalize_location(desired);
        if desired == "remote" {
            if listing.remote {
                return 1.0;
            }
            continue;
        }
        if desired == listing_location {
            return 1.0;
        }
        if desired.split_whitespace().any(|t| listing_tokens.contains(&t)) {
            best = best.max(0.5);
        }
    }
    best
}

/// Salary compatibility against the profile floor
///
/// Full credit when the listing floor reaches the profile floor, partial credit
/// for the share of the range above it, neutral when the listing has no salary.
#[inline]
pub fn calculate_salary_score(min: Option<i64>, max: Option<i64>, floor: Option<i64>) -> f64 {
    let Some(floor) = floor else {
        return 1.0;
    };

    match (min, max) {
        (None, None) => 0.5,
        (Some(lo), None) => {
            if lo >= floor {
                1.0
            } else {
                0.0
            }
        }
        (None, Some(hi)) => {
            if hi >= floor {
                0.5
            } else {
                0.0
            }
        }
        (Some(lo), Some(hi)) => {
            if lo >= floor {
                1.0
            } else if hi < floor {
                0.0
            } else if hi == lo {
                1.0
            } else {
                (hi - floor) as f64 / (hi - lo) as f64
            }
        }
    }
}

/// Cosine similarity mapped from [-1, 1] to [0, 1]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        tracing::warn!(
            a_len = a.len(),
            b_len = b.len(),
            "embedding dimension mismatch; returning zero similarity"
        );
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    ((dot / (norm_a * norm_b) + 1.0) / 2.0).clamp(0.0, 1.0)
}
