use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use crate::models::{
    ApplicationIntent, IntentStatus, Listing, ListingCandidate, PageCursor, Resolution, Source,
    UpsertOutcome, UserProfile,
};
use crate::services::store::{
    CursorStore, IntentStore, IntentTransition, ListingStore, ProfileStore, Store, StoreError,
};

const LISTING_COLUMNS: &str = "id, source, source_id, title, company, location, remote, \
     salary_min, salary_max, description, posted_at, is_open, content_fingerprint, embedding, \
     version, change_token, first_seen_at, last_seen_at, stale";

const INTENT_COLUMNS: &str = "id, profile_id, listing_id, decision_reason, score, status, \
     requested_at, dispatched_at, updated_at";

const FINGERPRINT_CONSTRAINT: &str = "listings_content_fingerprint_key";

/// Attempts before a unique-violation race is reported as a conflict
const UPSERT_ATTEMPTS: usize = 3;

/// Re-sighting of a known row, applied in place.
/// $1 row filter value, $2 salary_min, $3 salary_max, $4 description,
/// $5 is_open, $6 last_seen_at, $7 change token.
///
/// `primary` is an SQL condition telling whether the sighting came under the
/// row's own (source, source_id); other sightings only fill a missing salary.
fn sighting_set(primary: &str) -> String {
    let keep_salary = format!(
        "NOT ({primary}) AND (listings.salary_min IS NOT NULL OR listings.salary_max IS NOT NULL)"
    );
    let salary_min = format!("CASE WHEN {keep_salary} THEN listings.salary_min ELSE $2::BIGINT END");
    let salary_max = format!("CASE WHEN {keep_salary} THEN listings.salary_max ELSE $3::BIGINT END");
    let changed = format!(
        "(listings.salary_min, listings.salary_max, listings.description, listings.is_open) \
         IS DISTINCT FROM ({salary_min}, {salary_max}, $4::TEXT, $5::BOOLEAN)"
    );

    format!(
        r#"
    version = CASE WHEN {changed} THEN listings.version + 1 ELSE listings.version END,
    embedding = CASE WHEN {changed} THEN NULL ELSE listings.embedding END,
    change_token = CASE WHEN {changed} THEN $7 ELSE listings.change_token END,
    salary_min = {salary_min},
    salary_max = {salary_max},
    description = $4,
    is_open = $5,
    last_seen_at = $6,
    stale = FALSE
"#
    )
}

/// PostgreSQL-backed store
///
/// Every resolve-and-write is a single constrained statement; the unique
/// constraints on (source, source_id), content_fingerprint and
/// (profile_id, listing_id) decide races, never a prior read.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run migrations
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn sight_by_alias(
        &self,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
        token: Uuid,
    ) -> Result<Option<UpsertOutcome>, StoreError> {
        let query = format!(
            r#"
            UPDATE listings SET {}
            FROM listing_aliases a
            WHERE a.source = $1 AND a.source_id = $8 AND listings.id = a.listing_id
            RETURNING {}
            "#,
            sighting_set("FALSE"),
            prefixed_columns("listings")
        );

        let row = sqlx::query(&query)
            .bind(candidate.source)
            .bind(candidate.salary_min)
            .bind(candidate.salary_max)
            .bind(&candidate.description)
            .bind(candidate.is_open)
            .bind(now)
            .bind(token)
            .bind(&candidate.source_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| sighting_outcome(&row, token, false)).transpose()
    }

    async fn insert_or_sight(
        &self,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
        token: Uuid,
    ) -> Result<UpsertOutcome, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO listings (
                id, source, source_id, title, company, location, remote, salary_min, salary_max,
                description, posted_at, is_open, content_fingerprint, version, change_token,
                first_seen_at, last_seen_at, stale
            )
            VALUES ($8, $1, $9, $10, $11, $12, $13, $2, $3, $4, $14, $5, $15, 1, $7, $6, $6, FALSE)
            ON CONFLICT (source, source_id) DO UPDATE SET {}
            RETURNING {LISTING_COLUMNS}, (xmax = 0) AS inserted
            "#,
            sighting_set("TRUE")
        );

        let row = sqlx::query(&query)
            .bind(candidate.source)
            .bind(candidate.salary_min)
            .bind(candidate.salary_max)
            .bind(&candidate.description)
            .bind(candidate.is_open)
            .bind(now)
            .bind(token)
            .bind(Uuid::new_v4())
            .bind(&candidate.source_id)
            .bind(&candidate.title)
            .bind(&candidate.company)
            .bind(&candidate.location)
            .bind(candidate.remote)
            .bind(candidate.posted_at)
            .bind(&candidate.content_fingerprint)
            .fetch_one(&self.pool)
            .await?;

        let inserted: bool = row.try_get("inserted")?;
        let listing = listing_from_row(&row)?;
        if inserted {
            return Ok(UpsertOutcome {
                resolution: Resolution::New(listing.id),
                material: true,
                listing,
            });
        }
        let material: Uuid = row.try_get("change_token")?;
        let material = material == token;
        Ok(UpsertOutcome {
            resolution: crate::core::dedup::classify(listing.id, material, false),
            material,
            listing,
        })
    }

    async fn sight_by_fingerprint(
        &self,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
        token: Uuid,
    ) -> Result<Option<UpsertOutcome>, StoreError> {
        let query = format!(
            r#"
            UPDATE listings SET {}
            WHERE content_fingerprint = $1
            RETURNING {LISTING_COLUMNS}
            "#,
            sighting_set("FALSE")
        );

        let row = sqlx::query(&query)
            .bind(&candidate.content_fingerprint)
            .bind(candidate.salary_min)
            .bind(candidate.salary_max)
            .bind(&candidate.description)
            .bind(candidate.is_open)
            .bind(now)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let listing = listing_from_row(&row)?;
        let new_alias = self.record_alias(candidate, listing.id).await?;
        sighting_outcome(&row, token, new_alias).map(Some)
    }

    /// Returns whether the alias was new
    async fn record_alias(&self, candidate: &ListingCandidate, listing_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO listing_aliases (source, source_id, listing_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (source, source_id) DO NOTHING
            "#,
        )
        .bind(candidate.source)
        .bind(&candidate.source_id)
        .bind(listing_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fetch_listings(&self, query: &str, binder: ListingFilter<'_>) -> Result<Vec<Listing>, StoreError> {
        let q = sqlx::query(query);
        let q = match binder {
            ListingFilter::Since(since) => q.bind(since),
            ListingFilter::SinceLimit(since, limit) => q.bind(since).bind(limit),
            ListingFilter::Similar(company, title, location) => q.bind(company).bind(title).bind(location),
        };
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(listing_from_row).map(|r| r.map_err(Into::into)).collect()
    }
}

enum ListingFilter<'a> {
    Since(DateTime<Utc>),
    SinceLimit(DateTime<Utc>, i64),
    Similar(&'a str, &'a str, &'a str),
}

fn prefixed_columns(table: &str) -> String {
    LISTING_COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", table, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_fingerprint_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.constraint() == Some(FINGERPRINT_CONSTRAINT),
        _ => false,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn sighting_outcome(row: &PgRow, token: Uuid, new_alias: bool) -> Result<UpsertOutcome, StoreError> {
    let listing = listing_from_row(row)?;
    let change_token: Uuid = row.try_get("change_token")?;
    let material = change_token == token;
    Ok(UpsertOutcome {
        resolution: crate::core::dedup::classify(listing.id, material, new_alias),
        material,
        listing,
    })
}

fn listing_from_row(row: &PgRow) -> Result<Listing, sqlx::Error> {
    Ok(Listing {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        source_id: row.try_get("source_id")?,
        title: row.try_get("title")?,
        company: row.try_get("company")?,
        location: row.try_get("location")?,
        remote: row.try_get("remote")?,
        salary_min: row.try_get("salary_min")?,
        salary_max: row.try_get("salary_max")?,
        description: row.try_get("description")?,
        posted_at: row.try_get("posted_at")?,
        is_open: row.try_get("is_open")?,
        content_fingerprint: row.try_get("content_fingerprint")?,
        embedding: row.try_get("embedding")?,
        version: row.try_get("version")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        stale: row.try_get("stale")?,
    })
}

fn profile_from_row(row: &PgRow) -> Result<UserProfile, sqlx::Error> {
    Ok(UserProfile {
        id: row.try_get("id")?,
        skills: row.try_get("skills")?,
        desired_titles: row.try_get("desired_titles")?,
        desired_locations: row.try_get("desired_locations")?,
        accepts_remote: row.try_get("accepts_remote")?,
        salary_floor: row.try_get("salary_floor")?,
        auto_apply_threshold: row.try_get("auto_apply_threshold")?,
        blacklisted_companies: row.try_get("blacklisted_companies")?,
        blacklisted_titles: row.try_get("blacklisted_titles")?,
        embedding: row.try_get("embedding")?,
        active: row.try_get("active")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn intent_from_row(row: &PgRow) -> Result<ApplicationIntent, sqlx::Error> {
    Ok(ApplicationIntent {
        id: row.try_get("id")?,
        profile_id: row.try_get("profile_id")?,
        listing_id: row.try_get("listing_id")?,
        decision_reason: row.try_get("decision_reason")?,
        score: row.try_get("score")?,
        status: row.try_get("status")?,
        requested_at: row.try_get("requested_at")?,
        dispatched_at: row.try_get("dispatched_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ListingStore for PostgresStore {
    async fn upsert_listing(
        &self,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        for attempt in 1..=UPSERT_ATTEMPTS {
            let token = Uuid::new_v4();

            if let Some(outcome) = self.sight_by_alias(candidate, now, token).await? {
                return Ok(outcome);
            }

            match self.insert_or_sight(candidate, now, token).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if is_fingerprint_violation(&err) => {
                    if let Some(outcome) = self.sight_by_fingerprint(candidate, now, token).await? {
                        return Ok(outcome);
                    }
                }
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err.into()),
            }

            tracing::debug!(
                source = %candidate.source,
                source_id = %candidate.source_id,
                attempt,
                "Upsert lost a uniqueness race, retrying"
            );
        }

        Err(StoreError::Conflict(format!(
            "{}:{}",
            candidate.source, candidate.source_id
        )))
    }

    async fn merge_into(
        &self,
        listing_id: Uuid,
        candidate: &ListingCandidate,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let token = Uuid::new_v4();
        let query = format!(
            r#"
            UPDATE listings SET {}
            WHERE id = $1
            RETURNING {LISTING_COLUMNS}
            "#,
            sighting_set("listings.source = $8 AND listings.source_id = $9")
        );

        let row = sqlx::query(&query)
            .bind(listing_id)
            .bind(candidate.salary_min)
            .bind(candidate.salary_max)
            .bind(&candidate.description)
            .bind(candidate.is_open)
            .bind(now)
            .bind(token)
            .bind(candidate.source)
            .bind(&candidate.source_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("listing {}", listing_id)))?;

        let listing = listing_from_row(&row)?;
        let own_key = listing.source == candidate.source && listing.source_id == candidate.source_id;
        let new_alias = !own_key && self.record_alias(candidate, listing_id).await?;
        sighting_outcome(&row, token, new_alias)
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        let query = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(listing_from_row).transpose()?)
    }

    async fn find_similar(
        &self,
        company: &str,
        title: &str,
        location: &str,
    ) -> Result<Vec<Listing>, StoreError> {
        let query = format!(
            "SELECT {LISTING_COLUMNS} FROM listings \
             WHERE company = $1 AND title = $2 AND location = $3 \
             ORDER BY last_seen_at DESC LIMIT 50"
        );
        self.fetch_listings(&query, ListingFilter::Similar(company, title, location))
            .await
    }

    async fn set_embedding(&self, id: Uuid, version: i32, embedding: &[f32]) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE listings SET embedding = $3 WHERE id = $1 AND version = $2")
            .bind(id)
            .bind(version)
            .bind(embedding)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fresh_listings(&self, since: DateTime<Utc>) -> Result<Vec<Listing>, StoreError> {
        let query = format!(
            "SELECT {LISTING_COLUMNS} FROM listings \
             WHERE NOT stale AND is_open AND last_seen_at >= $1 \
             ORDER BY last_seen_at DESC"
        );
        self.fetch_listings(&query, ListingFilter::Since(since)).await
    }

    async fn mark_stale(&self, source: Source, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE listings SET stale = TRUE
            WHERE source = $1 AND NOT stale AND last_seen_at < $2
            "#,
        )
        .bind(source)
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        tracing::info!(%source, marked = result.rows_affected(), "Marked silent listings stale");

        Ok(result.rows_affected())
    }

    async fn unscored_listings(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Listing>, StoreError> {
        let query = format!(
            "SELECT {LISTING_COLUMNS} FROM listings \
             WHERE scored_version IS DISTINCT FROM version \
               AND NOT stale AND is_open AND last_seen_at >= $1 \
             ORDER BY last_seen_at LIMIT $2"
        );
        self.fetch_listings(&query, ListingFilter::SinceLimit(since, limit))
            .await
    }

    async fn mark_scored(&self, id: Uuid, version: i32) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE listings SET scored_version = $2 WHERE id = $1 AND version = $2")
            .bind(id)
            .bind(version)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProfileStore for PostgresStore {
    async fn active_profiles(&self) -> Result<Vec<UserProfile>, StoreError> {
        let rows = sqlx::query("SELECT * FROM user_profiles WHERE active ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(profile_from_row).collect::<Result<_, _>>()?)
    }

    async fn get_profile(&self, id: &str) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query("SELECT * FROM user_profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(profile_from_row).transpose()?)
    }
}

#[async_trait]
impl IntentStore for PostgresStore {
    async fn intent_exists(&self, profile_id: &str, listing_id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM application_intents WHERE profile_id = $1 AND listing_id = $2) AS present",
        )
        .bind(profile_id)
        .bind(listing_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("present")?)
    }

    async fn create_intent(
        &self,
        intent: &ApplicationIntent,
    ) -> Result<Option<ApplicationIntent>, StoreError> {
        let query = format!(
            r#"
            INSERT INTO application_intents ({INTENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (profile_id, listing_id) DO NOTHING
            RETURNING {INTENT_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(intent.id)
            .bind(&intent.profile_id)
            .bind(intent.listing_id)
            .bind(&intent.decision_reason)
            .bind(intent.score)
            .bind(intent.status)
            .bind(intent.requested_at)
            .bind(intent.dispatched_at)
            .bind(intent.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(intent_from_row).transpose()?)
    }

    async fn get_intent(&self, id: Uuid) -> Result<Option<ApplicationIntent>, StoreError> {
        let query = format!("SELECT {INTENT_COLUMNS} FROM application_intents WHERE id = $1");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(intent_from_row).transpose()?)
    }

    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE application_intents SET dispatched_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("intent {}", id)));
        }
        Ok(())
    }

    async fn undispatched_intents(&self, limit: i64) -> Result<Vec<ApplicationIntent>, StoreError> {
        let query = format!(
            "SELECT {INTENT_COLUMNS} FROM application_intents \
             WHERE status = 'pending' AND dispatched_at IS NULL \
             ORDER BY requested_at LIMIT $1"
        );
        let rows = sqlx::query(&query).bind(limit).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(intent_from_row).collect::<Result<_, _>>()?)
    }

    async fn update_intent_status(
        &self,
        id: Uuid,
        status: IntentStatus,
        now: DateTime<Utc>,
    ) -> Result<IntentTransition, StoreError> {
        let query = format!(
            r#"
            UPDATE application_intents SET status = $2, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING {INTENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(status)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Ok(IntentTransition::Updated(intent_from_row(&row)?));
        }
        Ok(match self.get_intent(id).await? {
            Some(existing) => IntentTransition::AlreadyTerminal(existing),
            None => IntentTransition::NotFound,
        })
    }
}

#[async_trait]
impl CursorStore for PostgresStore {
    async fn load_cursor(&self, source: Source, partition: &str) -> Result<Option<PageCursor>, StoreError> {
        let row = sqlx::query(
            "SELECT next_page, fetched_until FROM page_cursors WHERE source = $1 AND partition = $2",
        )
        .bind(source)
        .bind(partition)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let next_page: i32 = row.try_get("next_page")?;
        let next_page = u32::try_from(next_page)
            .map_err(|_| StoreError::InvalidData(format!("negative page cursor {}", next_page)))?;

        Ok(Some(PageCursor {
            source,
            partition: partition.to_string(),
            next_page,
            fetched_until: row.try_get("fetched_until")?,
        }))
    }

    async fn save_cursor(&self, cursor: &PageCursor) -> Result<(), StoreError> {
        let next_page = i32::try_from(cursor.next_page)
            .map_err(|_| StoreError::InvalidData(format!("page cursor {} out of range", cursor.next_page)))?;

        sqlx::query(
            r#"
            INSERT INTO page_cursors (source, partition, next_page, fetched_until, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (source, partition)
            DO UPDATE SET
                next_page = EXCLUDED.next_page,
                fetched_until = EXCLUDED.fetched_until,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(cursor.source)
        .bind(&cursor.partition)
        .bind(next_page)
        .bind(cursor.fetched_until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_columns_qualifies_every_column() {
        let cols = prefixed_columns("listings");
        assert!(cols.starts_with("listings.id, listings.source"));
        assert_eq!(cols.matches("listings.").count(), LISTING_COLUMNS.split(", ").count());
    }

    #[test]
    fn test_only_primary_sightings_overwrite_salary() {
        let primary = sighting_set("TRUE");
        assert!(primary.contains("NOT (TRUE)"));
        assert!(primary.contains("salary_min = CASE WHEN"));

        let secondary = sighting_set("FALSE");
        assert!(secondary.contains("THEN listings.salary_min ELSE $2::BIGINT END"));
        assert_eq!(secondary.matches("IS DISTINCT FROM").count(), 3);
    }

    #[test]
    fn test_non_database_errors_are_not_violations() {
        assert!(!is_fingerprint_violation(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_upsert_is_idempotent_against_postgres() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let store = PostgresStore::new(&url, 2, 1, Duration::from_secs(5)).await.unwrap();
        let candidate = ListingCandidate {
            source: Source::Generic,
            source_id: Uuid::new_v4().to_string(),
            title: "Go Engineer".to_string(),
            company: "acme".to_string(),
            location: "berlin".to_string(),
            remote: false,
            salary_min: None,
            salary_max: None,
            description: "Build APIs".to_string(),
            posted_at: Utc::now(),
            posted_at_inferred: false,
            is_open: true,
            content_fingerprint: Uuid::new_v4().to_string(),
        };

        let first = store.upsert_listing(&candidate, Utc::now()).await.unwrap();
        let second = store.upsert_listing(&candidate, Utc::now()).await.unwrap();
        assert!(matches!(first.resolution, Resolution::New(_)));
        assert_eq!(second.resolution, Resolution::Duplicate(first.resolution.listing_id()));
        assert_eq!(second.listing.version, 1);
    }
}
