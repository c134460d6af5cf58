//! Diff persistence and lifecycle transitions (spec invariants a/b, component 4.8).
//!
//! Every mutation that advances `processed_sections` or `status` runs inside
//! a transaction that locks the Diff row for update, so concurrent section
//! jobs belonging to the same diff serialise correctly.

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::models::{ChangeKind, Diff, DiffStatus, Impact, SectionDiff};
use crate::repository::diesel_models::{
    now_str, DiffRecord, NewDiff, NewDiffProcessedOrdinal, NewSectionDiff, SectionDiffRecord,
};
use crate::repository::pool::{DbError, DbPool};
use crate::schema::{diff_processed_ordinals, diffs, section_diffs};
use crate::with_conn;
use crate::with_conn_split;

/// One normalised change surfaced by the diff worker for a single ordinal.
pub struct NormalizedChange {
    pub change_type: ChangeKind,
    pub summary: String,
    pub impact: Impact,
    pub confidence: Option<f32>,
    pub evidence: String,
}

#[derive(Clone)]
pub struct DiffRepository {
    pool: DbPool,
}

impl DiffRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_current_filing(&self, current_filing_id: &str) -> Result<Option<Diff>, DbError> {
        with_conn!(self.pool, conn => {
            diffs::table
                .filter(diffs::current_filing_id.eq(current_filing_id))
                .first::<DiffRecord>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(Diff::from))
        })
    }

    pub async fn get(&self, diff_id: i32) -> Result<Option<Diff>, DbError> {
        with_conn!(self.pool, conn => {
            diffs::table
                .find(diff_id)
                .first::<DiffRecord>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(Diff::from))
        })
    }

    /// Upsert a Diff row keyed by the current filing, clearing its prior
    /// section-diffs and resetting `expected_sections`/`processed_sections`.
    /// If `expected_sections` is zero the diff is immediately SKIPPED.
    pub async fn schedule(
        &self,
        current_filing_id: &str,
        previous_filing_id: &str,
        expected_sections: i32,
    ) -> Result<Diff, DbError> {
        let now = now_str();
        let status = if expected_sections == 0 {
            DiffStatus::Skipped
        } else {
            DiffStatus::Pending
        };

        with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                let current_filing_id = current_filing_id.to_string();
                let previous_filing_id = previous_filing_id.to_string();
                let now = now.clone();
                Box::pin(async move {
                    let existing: Option<DiffRecord> = diffs::table
                        .filter(diffs::current_filing_id.eq(&current_filing_id))
                        .first(conn)
                        .await
                        .optional()?;

                    let diff_id = if let Some(existing) = existing {
                        diesel::delete(
                            section_diffs::table.filter(section_diffs::diff_id.eq(existing.id)),
                        )
                        .execute(conn)
                        .await?;
                        diesel::delete(
                            diff_processed_ordinals::table
                                .filter(diff_processed_ordinals::diff_id.eq(existing.id)),
                        )
                        .execute(conn)
                        .await?;

                        diesel::update(diffs::table.find(existing.id))
                            .set((
                                diffs::previous_filing_id.eq(&previous_filing_id),
                                diffs::status.eq(status.as_str()),
                                diffs::expected_sections.eq(expected_sections),
                                diffs::processed_sections.eq(0),
                                diffs::last_error.eq(None::<String>),
                                diffs::updated_at.eq(&now),
                            ))
                            .execute(conn)
                            .await?;
                        existing.id
                    } else {
                        let new_diff = NewDiff {
                            current_filing_id: &current_filing_id,
                            previous_filing_id: &previous_filing_id,
                            status: status.as_str(),
                            expected_sections,
                            processed_sections: 0,
                            summary: None,
                            last_error: None,
                            created_at: &now,
                            updated_at: &now,
                        };
                        diesel::insert_into(diffs::table)
                            .values(&new_diff)
                            .execute(conn)
                            .await?;
                        diffs::table
                            .filter(diffs::current_filing_id.eq(&current_filing_id))
                            .select(diffs::id)
                            .first::<i32>(conn)
                            .await?
                    };

                    let record: DiffRecord = diffs::table.find(diff_id).first(conn).await?;
                    Ok(record.into())
                })
            })
            .await
        })
    }

    /// Persist one ordinal's worth of normalised changes, replacing any
    /// existing SectionDiffs for `(diff_id, ordinal)`, optionally upserting
    /// or dropping the backing Analysis row, then advancing the Diff's
    /// progress and status.
    #[allow(clippy::too_many_arguments)]
    pub async fn persist_section_changes(
        &self,
        diff_id: i32,
        current_section_id: Option<i32>,
        previous_section_id: Option<i32>,
        ordinal: i32,
        title: &str,
        analysis_id: Option<i32>,
        changes: Vec<NormalizedChange>,
    ) -> Result<Diff, DbError> {
        let now = now_str();
        // SQLite has no row-level locking (the whole file is serialised by
        // its own writer lock), so the lock-select only needs `.for_update()`
        // on the Postgres branch; without it, two diff workers advancing
        // different ordinals of the same diff_id could both read
        // `processed=k` and both write `k+1`, losing an increment.
        //
        // The queue is at-least-once: a DiffTask for this same ordinal can be
        // redelivered (reclaim after a crashed-before-ack worker) and run
        // this whole method again. `diff_processed_ordinals` is the
        // completion marker that makes the `processed_sections` bump
        // idempotent against that redelivery — the SectionDiff rows
        // themselves are already naturally idempotent (delete+reinsert).
        with_conn_split!(self.pool,
            sqlite: conn => {
                conn.transaction(|conn| {
                    let title = title.to_string();
                    let now = now.clone();
                    Box::pin(async move {
                        let diff: DiffRecord = diffs::table.find(diff_id).first(conn).await?;

                        diesel::delete(
                            section_diffs::table
                                .filter(section_diffs::diff_id.eq(diff_id))
                                .filter(section_diffs::ordinal.eq(ordinal)),
                        )
                        .execute(conn)
                        .await?;

                        for change in &changes {
                            let new_section_diff = NewSectionDiff {
                                diff_id,
                                current_section_id,
                                previous_section_id,
                                analysis_id,
                                ordinal,
                                title: &title,
                                change_type: change.change_type.as_str(),
                                summary: &change.summary,
                                impact: change.impact.as_str(),
                                confidence: change.confidence,
                                evidence: &change.evidence,
                                created_at: &now,
                            };
                            diesel::insert_into(section_diffs::table)
                                .values(&new_section_diff)
                                .execute(conn)
                                .await?;
                        }

                        let newly_counted = diesel::insert_into(diff_processed_ordinals::table)
                            .values(&NewDiffProcessedOrdinal { diff_id, ordinal })
                            .on_conflict((diff_processed_ordinals::diff_id, diff_processed_ordinals::ordinal))
                            .do_nothing()
                            .execute(conn)
                            .await?
                            > 0;

                        let processed = if newly_counted {
                            diff.processed_sections + 1
                        } else {
                            diff.processed_sections
                        };
                        let mut status = DiffStatus::from_str(&diff.status).unwrap_or(DiffStatus::Pending);
                        if matches!(status, DiffStatus::Pending | DiffStatus::Skipped) {
                            status = DiffStatus::Processing;
                        }
                        if processed >= diff.expected_sections && status != DiffStatus::Failed {
                            status = DiffStatus::Completed;
                        }

                        diesel::update(diffs::table.find(diff_id))
                            .set((
                                diffs::processed_sections.eq(processed),
                                diffs::status.eq(status.as_str()),
                                diffs::last_error.eq(None::<String>),
                                diffs::updated_at.eq(&now),
                            ))
                            .execute(conn)
                            .await?;

                        let record: DiffRecord = diffs::table.find(diff_id).first(conn).await?;
                        Ok(record.into())
                    })
                })
                .await
            },
            postgres: conn => {
                conn.transaction(|conn| {
                    let title = title.to_string();
                    let now = now.clone();
                    Box::pin(async move {
                        let diff: DiffRecord = diffs::table.find(diff_id).for_update().first(conn).await?;

                        diesel::delete(
                            section_diffs::table
                                .filter(section_diffs::diff_id.eq(diff_id))
                                .filter(section_diffs::ordinal.eq(ordinal)),
                        )
                        .execute(conn)
                        .await?;

                        for change in &changes {
                            let new_section_diff = NewSectionDiff {
                                diff_id,
                                current_section_id,
                                previous_section_id,
                                analysis_id,
                                ordinal,
                                title: &title,
                                change_type: change.change_type.as_str(),
                                summary: &change.summary,
                                impact: change.impact.as_str(),
                                confidence: change.confidence,
                                evidence: &change.evidence,
                                created_at: &now,
                            };
                            diesel::insert_into(section_diffs::table)
                                .values(&new_section_diff)
                                .execute(conn)
                                .await?;
                        }

                        let newly_counted = diesel::insert_into(diff_processed_ordinals::table)
                            .values(&NewDiffProcessedOrdinal { diff_id, ordinal })
                            .on_conflict((diff_processed_ordinals::diff_id, diff_processed_ordinals::ordinal))
                            .do_nothing()
                            .execute(conn)
                            .await?
                            > 0;

                        let processed = if newly_counted {
                            diff.processed_sections + 1
                        } else {
                            diff.processed_sections
                        };
                        let mut status = DiffStatus::from_str(&diff.status).unwrap_or(DiffStatus::Pending);
                        if matches!(status, DiffStatus::Pending | DiffStatus::Skipped) {
                            status = DiffStatus::Processing;
                        }
                        if processed >= diff.expected_sections && status != DiffStatus::Failed {
                            status = DiffStatus::Completed;
                        }

                        diesel::update(diffs::table.find(diff_id))
                            .set((
                                diffs::processed_sections.eq(processed),
                                diffs::status.eq(status.as_str()),
                                diffs::last_error.eq(None::<String>),
                                diffs::updated_at.eq(&now),
                            ))
                            .execute(conn)
                            .await?;

                        let record: DiffRecord = diffs::table.find(diff_id).first(conn).await?;
                        Ok(record.into())
                    })
                })
                .await
            }
        )
    }

    /// All SectionDiff rows persisted for a diff so far, ordered by ordinal.
    pub async fn list_for_diff(&self, diff_id: i32) -> Result<Vec<SectionDiff>, DbError> {
        with_conn!(self.pool, conn => {
            section_diffs::table
                .filter(section_diffs::diff_id.eq(diff_id))
                .order(section_diffs::ordinal.asc())
                .load::<SectionDiffRecord>(&mut conn)
                .await
                .map(|rs| rs.into_iter().map(SectionDiff::from).collect())
        })
    }

    /// Terminal failure: marks the diff FAILED and sets
    /// `processed_sections = expected_sections` so the run stops advancing.
    pub async fn mark_failed(&self, diff_id: i32, error: &str) -> Result<(), DbError> {
        let now = now_str();
        let truncated: String = error.chars().take(2000).collect();
        with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                let truncated = truncated.clone();
                let now = now.clone();
                Box::pin(async move {
                    let diff: DiffRecord = diffs::table.find(diff_id).first(conn).await?;
                    diesel::update(diffs::table.find(diff_id))
                        .set((
                            diffs::status.eq(DiffStatus::Failed.as_str()),
                            diffs::last_error.eq(&truncated),
                            diffs::processed_sections.eq(diff.expected_sections),
                            diffs::updated_at.eq(&now),
                        ))
                        .execute(conn)
                        .await
                        .map(|_| ())
                })
            })
            .await
        })
    }
}
