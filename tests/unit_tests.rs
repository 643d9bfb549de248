// Unit tests for Job Ingest

use chrono::{Duration, TimeZone, Utc};
use job_ingest::core::{
    dedup::{apply_sighting, classify},
    evaluate,
    filters::{is_blacklisted, plausibly_matches},
    scoring::{calculate_match_score, calculate_salary_score, calculate_skill_score},
    text::tokenize,
    EligibilityInput, Normalizer,
};
use job_ingest::models::{
    EligibilityDecision, IneligibleReason, Listing, Resolution, ScoringWeights, Source, UserProfile,
};
use serde_json::json;
use uuid::Uuid;

fn create_test_listing(title: &str, company: &str, description: &str) -> Listing {
    let now = Utc::now();
    Listing {
        id: Uuid::new_v4(),
        source: Source::Generic,
        source_id: "G-1".to_string(),
        title: title.to_string(),
        company: company.to_string(),
        location: "berlin".to_string(),
        remote: false,
        salary_min: Some(90_000),
        salary_max: Some(110_000),
        description: description.to_string(),
        posted_at: now,
        is_open: true,
        content_fingerprint: "fp".to_string(),
        embedding: None,
        version: 1,
        first_seen_at: now,
        last_seen_at: now,
        stale: false,
    }
}

fn create_test_profile(skills: &[&str]) -> UserProfile {
    UserProfile {
        id: "profile-1".to_string(),
        skills: skills.iter().map(|s| s.to_string()).collect(),
        desired_titles: vec!["Backend Engineer".to_string()],
        desired_locations: vec!["Berlin".to_string()],
        accepts_remote: true,
        salary_floor: Some(80_000),
        auto_apply_threshold: 0.7,
        blacklisted_companies: vec![],
        blacklisted_titles: vec![],
        embedding: None,
        active: true,
        updated_at: Utc::now(),
    }
}

fn decide(listing: &Listing, profile: &UserProfile, score: f64, already_applied: bool) -> EligibilityDecision {
    evaluate(&EligibilityInput {
        listing,
        profile,
        score,
        already_applied,
        now: Utc::now(),
        freshness_window: Duration::hours(72),
    })
}

#[test]
fn test_score_within_bounds() {
    let weights = ScoringWeights::default();
    let listings = [
        create_test_listing("Backend Engineer", "acme", "Go, Kubernetes and PostgreSQL"),
        create_test_listing("Pastry Chef", "bakery", ""),
        create_test_listing("", "", ""),
    ];
    let profiles = [
        create_test_profile(&["go", "kubernetes"]),
        create_test_profile(&[]),
        UserProfile {
            desired_titles: vec![],
            desired_locations: vec![],
            salary_floor: None,
            ..create_test_profile(&["rust"])
        },
    ];

    for listing in &listings {
        for profile in &profiles {
            let (score, breakdown) = calculate_match_score(listing, profile, &weights);
            assert!((0.0..=1.0).contains(&score), "score {} out of bounds", score);
            let total: f64 = breakdown.components.iter().map(|c| c.contribution).sum();
            assert!((total.clamp(0.0, 1.0) - score).abs() < 1e-9);
        }
    }
}

#[test]
fn test_score_monotonic_in_matched_skills() {
    let weights = ScoringWeights::default();
    let profile = create_test_profile(&["go", "kubernetes", "postgresql", "terraform"]);
    let descriptions = [
        "",
        "We use Go",
        "We use Go and Kubernetes",
        "We use Go, Kubernetes and PostgreSQL",
        "We use Go, Kubernetes, PostgreSQL and Terraform",
    ];

    let mut previous = -1.0;
    for description in descriptions {
        let listing = create_test_listing("Backend Engineer", "acme", description);
        let (score, _) = calculate_match_score(&listing, &profile, &weights);
        assert!(score >= previous, "adding a matched skill lowered the score");
        previous = score;
    }
}

#[test]
fn test_skill_score_counts_whole_phrases() {
    let tokens = tokenize("Experience with C++ and Node.js, not Java");
    let skills = vec!["c++".to_string(), "node.js".to_string(), "javascript".to_string()];
    let (score, matched) = calculate_skill_score(&tokens, &skills);
    assert!((score - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(matched, vec!["c++".to_string(), "node.js".to_string()]);
}

#[test]
fn test_salary_score_against_floor() {
    assert_eq!(calculate_salary_score(Some(100), Some(120), Some(90)), 1.0);
    assert_eq!(calculate_salary_score(None, None, Some(90)), calculate_salary_score(None, None, Some(10)));
    assert_eq!(calculate_salary_score(Some(50), Some(60), None), 1.0);
    assert!(calculate_salary_score(Some(50), Some(60), Some(90)) < 1.0);
}

#[test]
fn test_blacklist_precedes_every_other_rule() {
    let mut listing = create_test_listing("Backend Engineer", "Evil Corp Ltd", "Go");
    listing.stale = true;
    listing.is_open = false;
    let profile = UserProfile {
        blacklisted_companies: vec!["evil corp".to_string()],
        ..create_test_profile(&["go"])
    };

    // Perfect score, already applied and expired: still reported as blacklisted
    assert_eq!(
        decide(&listing, &profile, 1.0, true),
        EligibilityDecision::Ineligible(IneligibleReason::Blacklisted)
    );
}

#[test]
fn test_blacklisted_title_matches_whole_words() {
    let profile = UserProfile {
        blacklisted_titles: vec!["recruiter".to_string()],
        ..create_test_profile(&["go"])
    };
    assert!(is_blacklisted(&create_test_listing("Technical Recruiter", "acme", ""), &profile));
    assert!(!is_blacklisted(&create_test_listing("Recruitment Platform Engineer", "acme", ""), &profile));
}

#[test]
fn test_eligibility_rule_order() {
    let profile = create_test_profile(&["go"]);
    let fresh = create_test_listing("Backend Engineer", "acme", "Go");

    assert_eq!(
        decide(&fresh, &profile, 0.2, true),
        EligibilityDecision::Ineligible(IneligibleReason::AlreadyApplied)
    );
    assert_eq!(
        decide(&fresh, &profile, 0.69, false),
        EligibilityDecision::Ineligible(IneligibleReason::BelowThreshold)
    );
    assert_eq!(decide(&fresh, &profile, 0.7, false), EligibilityDecision::Eligible);

    let mut old = fresh.clone();
    old.last_seen_at = Utc::now() - Duration::hours(100);
    assert_eq!(
        decide(&old, &profile, 0.9, false),
        EligibilityDecision::Ineligible(IneligibleReason::Expired)
    );
}

#[test]
fn test_prefilter_needs_title_and_location() {
    let profile = create_test_profile(&["go"]);
    assert!(plausibly_matches(&create_test_listing("Senior Backend Engineer", "acme", ""), &profile));
    assert!(!plausibly_matches(&create_test_listing("Senior Accountant", "acme", ""), &profile));

    let mut elsewhere = create_test_listing("Backend Engineer", "acme", "");
    elsewhere.location = "tokyo".to_string();
    assert!(!plausibly_matches(&elsewhere, &profile));

    elsewhere.remote = true;
    assert!(plausibly_matches(&elsewhere, &profile));

    let inactive = UserProfile {
        active: false,
        ..profile
    };
    assert!(!plausibly_matches(&create_test_listing("Backend Engineer", "acme", ""), &inactive));
}

#[test]
fn test_normalizer_drops_records_without_title() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let records = vec![
        json!({"id": "1", "title": "Backend Engineer", "company": "Acme", "location": "Berlin"}),
        json!({"id": "2", "company": "Acme"}),
        json!("not an object"),
    ];

    let (candidates, dropped) = Normalizer::default().normalize_page(Source::Generic, &records, now);
    assert_eq!(candidates.len(), 1);
    assert_eq!(dropped, 2);
    assert_eq!(candidates[0].posted_at, now);
}

#[test]
fn test_normalizer_fingerprint_is_stable_across_sources() {
    let now = Utc::now();
    let generic = json!({
        "id": "g-1",
        "title": "Backend Engineer",
        "company": "Acme GmbH",
        "location": "Berlin",
        "description": "<p>Go services</p>"
    });
    let remotive = json!({
        "id": 77,
        "title": "Backend  Engineer",
        "company_name": "ACME",
        "candidate_required_location": "berlin",
        "description": "Go services"
    });

    let normalizer = Normalizer::default();
    let a = normalizer.normalize(Source::Generic, &generic, now).unwrap();
    let b = normalizer.normalize(Source::Remotive, &remotive, now).unwrap();
    assert_eq!(a.content_fingerprint, b.content_fingerprint);
    assert_ne!(a.source_id, b.source_id);
}

#[test]
fn test_resighting_identical_listing_is_not_material() {
    let mut listing = create_test_listing("Backend Engineer", "acme", "Go");
    let candidate = job_ingest::models::ListingCandidate {
        source: listing.source,
        source_id: listing.source_id.clone(),
        title: listing.title.clone(),
        company: listing.company.clone(),
        location: listing.location.clone(),
        remote: listing.remote,
        salary_min: listing.salary_min,
        salary_max: listing.salary_max,
        description: listing.description.clone(),
        posted_at: listing.posted_at,
        posted_at_inferred: false,
        is_open: listing.is_open,
        content_fingerprint: listing.content_fingerprint.clone(),
    };

    let later = Utc::now() + Duration::hours(1);
    let material = apply_sighting(&mut listing, &candidate, later);
    assert!(!material);
    assert_eq!(listing.version, 1);
    assert_eq!(listing.last_seen_at, later);
    assert_eq!(classify(listing.id, material, false), Resolution::Duplicate(listing.id));
    assert_eq!(classify(listing.id, material, true), Resolution::Update(listing.id));
}
