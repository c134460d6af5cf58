//! Section persistence: sections are replaced wholesale on re-parse.

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::models::Section;
use crate::repository::diesel_models::{now_str, NewSection, SectionRecord};
use crate::repository::pool::{DbError, DbPool};
use crate::schema::sections;
use crate::with_conn;

#[derive(Clone)]
pub struct SectionRepository {
    pool: DbPool,
}

impl SectionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Delete any existing sections for the filing and insert the new
    /// ordered set with a dense 1..N ordinal sequence, in one transaction.
    pub async fn replace_all(
        &self,
        filing_id: &str,
        sections: Vec<(String, String, Option<String>)>,
    ) -> Result<Vec<Section>, DbError> {
        let now = now_str();
        with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                let filing_id = filing_id.to_string();
                let now = now.clone();
                let sections = sections.clone();
                Box::pin(async move {
                    diesel::delete(
                        crate::schema::sections::table
                            .filter(crate::schema::sections::filing_id.eq(&filing_id)),
                    )
                    .execute(conn)
                    .await?;

                    for (ordinal, (title, content, content_hash)) in
                        (1i32..).zip(sections.into_iter())
                    {
                        let new_section = NewSection {
                            filing_id: &filing_id,
                            ordinal,
                            title: &title,
                            content: &content,
                            content_hash: content_hash.as_deref(),
                            created_at: &now,
                        };
                        diesel::insert_into(crate::schema::sections::table)
                            .values(&new_section)
                            .execute(conn)
                            .await?;
                    }

                    crate::schema::sections::table
                        .filter(crate::schema::sections::filing_id.eq(&filing_id))
                        .order(crate::schema::sections::ordinal.asc())
                        .load::<SectionRecord>(conn)
                        .await
                        .map(|rs| rs.into_iter().map(Section::from).collect())
                })
            })
            .await
        })
    }

    pub async fn list_for_filing(&self, filing_id: &str) -> Result<Vec<Section>, DbError> {
        with_conn!(self.pool, conn => {
            sections::table
                .filter(sections::filing_id.eq(filing_id))
                .order(sections::ordinal.asc())
                .load::<SectionRecord>(&mut conn)
                .await
                .map(|rs| rs.into_iter().map(Section::from).collect())
        })
    }

    pub async fn find(&self, filing_id: &str, ordinal: i32) -> Result<Option<Section>, DbError> {
        with_conn!(self.pool, conn => {
            sections::table
                .filter(sections::filing_id.eq(filing_id))
                .filter(sections::ordinal.eq(ordinal))
                .first::<SectionRecord>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(Section::from))
        })
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<Section>, DbError> {
        with_conn!(self.pool, conn => {
            sections::table
                .find(id)
                .first::<SectionRecord>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(Section::from))
        })
    }
}
