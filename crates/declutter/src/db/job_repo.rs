//! Job repository — CRUD and claim operations for the `jobs` table.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::job::{CreativityLevel, JobRecord, JobStatus, TransformOptions};

/// Formats a timestamp for storage. Fixed-width fractional seconds so that
/// lexicographic comparison in SQL matches chronological order, and the
/// stored value round-trips exactly.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    raw.as_deref().map(parse_ts).transpose()
}

fn record_from_row(row: &Row<'_>) -> Result<JobRecord, rusqlite::Error> {
    let status_raw: String = row.get("status")?;
    let creativity_raw: String = row.get("creativity")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(JobRecord {
        id: row.get("id")?,
        // Unknown statuses read as failed rather than erroring the whole query.
        status: JobStatus::parse(&status_raw).unwrap_or(JobStatus::Failed),
        options: TransformOptions {
            creativity_level: CreativityLevel::parse(&creativity_raw).unwrap_or_default(),
            keep_items: row.get("keep_items")?,
            user_name: row.get("user_name")?,
            user_email: row.get("user_email")?,
        },
        before_image: row.get("before_image")?,
        after_image: row.get("after_image")?,
        audio: row.get("audio")?,
        plan: row.get("plan")?,
        error: row.get("error")?,
        original_payload: row.get("original_payload")?,
        payload_mime: row.get("payload_mime")?,
        claimed_at: parse_opt_ts(row.get("claimed_at")?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        completed_at: parse_opt_ts(row.get("completed_at")?)?,
        last_accessed_at: parse_opt_ts(row.get("last_accessed_at")?)?,
    })
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    /// Matches the `user_email` column.
    pub owner: Option<String>,
    /// Only jobs created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
}

/// Inserts a new job record.
pub fn insert(db: &Database, record: &JobRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, status, creativity, keep_items, user_name, user_email,
             before_image, after_image, audio, plan, error, original_payload, payload_mime,
             claimed_at, created_at, updated_at, completed_at, last_accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                record.id,
                record.status.as_str(),
                record.options.creativity_level.as_str(),
                record.options.keep_items,
                record.options.user_name,
                record.options.user_email,
                record.before_image,
                record.after_image,
                record.audio,
                record.plan,
                record.error,
                record.original_payload,
                record.payload_mime,
                record.claimed_at.as_ref().map(format_ts),
                format_ts(&record.created_at),
                format_ts(&record.updated_at),
                record.completed_at.as_ref().map(format_ts),
                record.last_accessed_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    })
}

/// Overwrites an existing record. All fields except `id` are rewritten,
/// `created_at` included: retry re-stamps it.
pub fn update(db: &Database, record: &JobRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status=?2, creativity=?3, keep_items=?4, user_name=?5,
             user_email=?6, before_image=?7, after_image=?8, audio=?9, plan=?10,
             error=?11, original_payload=?12, payload_mime=?13, claimed_at=?14,
             created_at=?15, updated_at=?16, completed_at=?17, last_accessed_at=?18
             WHERE id=?1",
            params![
                record.id,
                record.status.as_str(),
                record.options.creativity_level.as_str(),
                record.options.keep_items,
                record.options.user_name,
                record.options.user_email,
                record.before_image,
                record.after_image,
                record.audio,
                record.plan,
                record.error,
                record.original_payload,
                record.payload_mime,
                record.claimed_at.as_ref().map(format_ts),
                format_ts(&record.created_at),
                format_ts(&record.updated_at),
                record.completed_at.as_ref().map(format_ts),
                record.last_accessed_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], record_from_row)?;
        match rows.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Atomically claims a job for processing.
///
/// The claim succeeds only while the job is in a claimable status and has
/// no live claim (`claimed_at` unset or at/before `cutoff`). The changed-row
/// count decides the winner under concurrent invocation, so exactly one
/// caller can hold a live claim at a time.
pub fn try_claim(
    db: &Database,
    id: &str,
    now: DateTime<Utc>,
    cutoff: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET claimed_at = ?2, updated_at = ?2
             WHERE id = ?1
               AND status IN ('pending', 'processing')
               AND (claimed_at IS NULL OR claimed_at <= ?3)",
            params![id, format_ts(&now), format_ts(&cutoff)],
        )?;
        Ok(changed == 1)
    })
}

/// Records a poll on a finished job. Leaves `updated_at` alone; reads
/// are not modifications.
pub fn touch_last_accessed(
    db: &Database,
    id: &str,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET last_accessed_at = ?2 WHERE id = ?1",
            params![id, format_ts(&at)],
        )?;
        Ok(())
    })
}

/// Queries jobs with filters, newest first.
pub fn query(db: &Database, filter: &JobFilter) -> Result<Vec<JobRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(ref owner) = filter.owner {
            conditions.push(format!("user_email = ?{}", param_values.len() + 1));
            param_values.push(Box::new(owner.clone()));
        }
        if let Some(ref since) = filter.since {
            conditions.push(format!("created_at >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(format_ts(since)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit = filter.limit.unwrap_or(100) as i64;
        param_values.push(Box::new(limit));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC LIMIT ?{}",
            where_clause,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let records: Vec<JobRecord> = stmt
            .query_map(params_ref.as_slice(), record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ImagePayload;
    use chrono::Duration;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_record(id: &str) -> JobRecord {
        let payload = ImagePayload::new(vec![1, 2, 3, 4], "image/png");
        JobRecord::new(
            id,
            TransformOptions {
                creativity_level: CreativityLevel::Strict,
                keep_items: Some("bookshelf".to_string()),
                user_name: Some("Sam".to_string()),
                user_email: Some("sam@example.com".to_string()),
            },
            format!("{id}/before.png"),
            &payload,
        )
    }

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let record = sample_record("job-1");
        insert(&db, &record).unwrap();

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Processing);
        assert_eq!(found.before_image.as_deref(), Some("job-1/before.png"));
        assert_eq!(found.options.creativity_level, CreativityLevel::Strict);
        assert_eq!(found.options.user_email.as_deref(), Some("sam@example.com"));
        assert!(found.original_payload.is_some());
        assert_eq!(found.created_at, record.created_at);
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_update_overwrites_whole_record() {
        let db = test_db();
        let mut record = sample_record("job-2");
        insert(&db, &record).unwrap();

        record.status = JobStatus::Completed;
        record.plan = Some("1. Clear the desk.".to_string());
        record.after_image = Some("job-2/after.png".to_string());
        record.completed_at = Some(Utc::now());
        record.clear_payload();
        update(&db, &record).unwrap();

        let found = find_by_id(&db, "job-2").unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert_eq!(found.plan.as_deref(), Some("1. Clear the desk."));
        assert_eq!(found.after_image.as_deref(), Some("job-2/after.png"));
        assert!(found.original_payload.is_none());
        assert!(found.payload_mime.is_none());
        assert!(found.completed_at.is_some());
    }

    #[test]
    fn test_update_can_restamp_created_at() {
        let db = test_db();
        let mut record = sample_record("job-3");
        record.created_at = ts("2026-01-01T00:00:00Z");
        record.updated_at = record.created_at;
        insert(&db, &record).unwrap();

        record.created_at = ts("2026-02-01T00:00:00Z");
        update(&db, &record).unwrap();

        let found = find_by_id(&db, "job-3").unwrap().unwrap();
        assert_eq!(found.created_at, ts("2026-02-01T00:00:00Z"));
    }

    #[test]
    fn test_try_claim_fresh_job() {
        let db = test_db();
        insert(&db, &sample_record("c1")).unwrap();

        let now = Utc::now();
        let cutoff = now - Duration::minutes(5);
        assert!(try_claim(&db, "c1", now, cutoff).unwrap());

        let found = find_by_id(&db, "c1").unwrap().unwrap();
        assert_eq!(found.claimed_at, Some(now));
    }

    #[test]
    fn test_try_claim_rejects_live_claim() {
        let db = test_db();
        insert(&db, &sample_record("c2")).unwrap();

        let first = Utc::now();
        assert!(try_claim(&db, "c2", first, first - Duration::minutes(5)).unwrap());

        // A second caller within the claim window loses.
        let second = first + Duration::seconds(1);
        assert!(!try_claim(&db, "c2", second, second - Duration::minutes(5)).unwrap());
    }

    #[test]
    fn test_try_claim_retakes_expired_claim() {
        let db = test_db();
        let mut record = sample_record("c3");
        record.claimed_at = Some(ts("2026-01-01T00:00:00Z"));
        insert(&db, &record).unwrap();

        let now = ts("2026-01-01T00:10:00Z");
        assert!(try_claim(&db, "c3", now, now - Duration::minutes(5)).unwrap());

        let found = find_by_id(&db, "c3").unwrap().unwrap();
        assert_eq!(found.claimed_at, Some(now));
    }

    #[test]
    fn test_try_claim_rejects_terminal_job() {
        let db = test_db();
        let mut record = sample_record("c4");
        record.status = JobStatus::Completed;
        insert(&db, &record).unwrap();

        let now = Utc::now();
        assert!(!try_claim(&db, "c4", now, now - Duration::minutes(5)).unwrap());
    }

    #[test]
    fn test_try_claim_missing_job() {
        let db = test_db();
        let now = Utc::now();
        assert!(!try_claim(&db, "ghost", now, now - Duration::minutes(5)).unwrap());
    }

    #[test]
    fn test_touch_last_accessed() {
        let db = test_db();
        let record = sample_record("t1");
        insert(&db, &record).unwrap();

        let at = ts("2026-03-01T12:00:00Z");
        touch_last_accessed(&db, "t1", at).unwrap();

        let found = find_by_id(&db, "t1").unwrap().unwrap();
        assert_eq!(found.last_accessed_at, Some(at));
        // updated_at is untouched by a read marker.
        assert_eq!(found.updated_at, record.updated_at);
    }

    #[test]
    fn test_query_orders_newest_first() {
        let db = test_db();
        for (id, day) in [("q1", 1), ("q2", 3), ("q3", 2)] {
            let mut record = sample_record(id);
            record.created_at = ts(&format!("2026-01-{:02}T00:00:00Z", day));
            record.updated_at = record.created_at;
            insert(&db, &record).unwrap();
        }

        let records = query(&db, &JobFilter::default()).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["q2", "q3", "q1"]);
    }

    #[test]
    fn test_query_filters_by_owner_and_since() {
        let db = test_db();

        let mut mine = sample_record("mine");
        mine.created_at = ts("2026-01-10T00:00:00Z");
        insert(&db, &mine).unwrap();

        let mut mine_old = sample_record("mine-old");
        mine_old.created_at = ts("2026-01-01T00:00:00Z");
        insert(&db, &mine_old).unwrap();

        let mut other = sample_record("other");
        other.options.user_email = Some("else@example.com".to_string());
        other.created_at = ts("2026-01-10T00:00:00Z");
        insert(&db, &other).unwrap();

        let records = query(
            &db,
            &JobFilter {
                owner: Some("sam@example.com".to_string()),
                since: Some(ts("2026-01-05T00:00:00Z")),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "mine");
    }

    #[test]
    fn test_query_filters_by_status_and_limit() {
        let db = test_db();
        for i in 0..5 {
            let mut record = sample_record(&format!("s{}", i));
            record.created_at = ts(&format!("2026-01-{:02}T00:00:00Z", i + 1));
            if i % 2 == 0 {
                record.status = JobStatus::Failed;
            }
            insert(&db, &record).unwrap();
        }

        let failed = query(
            &db,
            &JobFilter {
                status: Some(JobStatus::Failed),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(failed.len(), 3);

        let limited = query(
            &db,
            &JobFilter {
                limit: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_unknown_status_reads_as_failed() {
        let db = test_db();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (id, status, created_at, updated_at)
                 VALUES ('weird', 'superseded', '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let found = find_by_id(&db, "weird").unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Failed);
    }
}
