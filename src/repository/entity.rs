//! Entity persistence: child rows replaced wholesale per Analysis.

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::models::Entity;
use crate::repository::diesel_models::{now_str, EntityRecord, NewEntity};
use crate::repository::pool::{DbError, DbPool};
use crate::schema::entities;
use crate::with_conn;

pub struct NormalizedEntity {
    pub entity_type: String,
    pub label: String,
    pub confidence: Option<f32>,
    pub evidence: Option<String>,
    pub attributes: Option<String>,
}

#[derive(Clone)]
pub struct EntityRepository {
    pool: DbPool,
}

impl EntityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Replace all Entity rows linked to `analysis_id` with the normalised set.
    pub async fn replace_for_analysis(
        &self,
        filing_id: &str,
        section_id: Option<i32>,
        analysis_id: i32,
        normalized: Vec<NormalizedEntity>,
    ) -> Result<Vec<Entity>, DbError> {
        let now = now_str();
        with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                let filing_id = filing_id.to_string();
                let now = now.clone();
                Box::pin(async move {
                    diesel::delete(
                        crate::schema::entities::table
                            .filter(crate::schema::entities::analysis_id.eq(analysis_id)),
                    )
                    .execute(conn)
                    .await?;

                    for item in &normalized {
                        let new_entity = NewEntity {
                            filing_id: &filing_id,
                            section_id,
                            analysis_id: Some(analysis_id),
                            entity_type: &item.entity_type,
                            label: &item.label,
                            confidence: item.confidence,
                            evidence: item.evidence.as_deref(),
                            attributes: item.attributes.as_deref(),
                            created_at: &now,
                        };
                        diesel::insert_into(crate::schema::entities::table)
                            .values(&new_entity)
                            .execute(conn)
                            .await?;
                    }

                    crate::schema::entities::table
                        .filter(crate::schema::entities::analysis_id.eq(analysis_id))
                        .load::<EntityRecord>(conn)
                        .await
                        .map(|rs| rs.into_iter().map(Entity::from).collect())
                })
            })
            .await
        })
    }

    pub async fn list_for_filing(&self, filing_id: &str) -> Result<Vec<Entity>, DbError> {
        with_conn!(self.pool, conn => {
            entities::table
                .filter(entities::filing_id.eq(filing_id))
                .load::<EntityRecord>(&mut conn)
                .await
                .map(|rs| rs.into_iter().map(Entity::from).collect())
        })
    }
}
