use serde_json::json;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use time::OffsetDateTime;

use crate::app::messaging::conversation_in;
use crate::app::trust::{append_event_with_tx, NewTrustEvent};
use crate::app::users::touch_users;
use crate::config::policy::TrustPoints;
use crate::domain::error::{CoreError, Result};
use crate::domain::moderation::{Report, ReportStatus};
use crate::domain::pair::PairKey;
use crate::domain::trust::TrustEventKind;
use crate::infra::db::{Db, Tx};

const MAX_REASON_CHARS: usize = 1000;
const EVIDENCE_MESSAGE_LIMIT: i64 = 200;

#[derive(Clone)]
pub struct ReportService {
    db: Db,
    points: TrustPoints,
}

/// Fields of a report supplied by whoever files it. `reporter_id` is `None`
/// for reports raised by the system itself.
#[derive(Debug, Clone)]
pub struct NewReport<'a> {
    pub reporter_id: Option<i64>,
    pub reported_id: i64,
    pub context_type: &'a str,
    pub context_id: Option<i64>,
    pub reason: &'a str,
}

impl ReportService {
    pub fn new(db: Db, points: TrustPoints) -> Self {
        Self { db, points }
    }

    pub async fn file_report(
        &self,
        reporter_id: i64,
        reported_id: i64,
        context_type: &str,
        context_id: Option<i64>,
        reason: &str,
    ) -> Result<Report> {
        PairKey::normalize(reporter_id, reported_id)?;

        let context_type = context_type.trim();
        if context_type.is_empty() {
            return Err(CoreError::invalid_input("context_type is required"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CoreError::invalid_input("reason is required"));
        }
        if reason.chars().count() > MAX_REASON_CHARS {
            return Err(CoreError::invalid_input(format!(
                "reason must be at most {} characters",
                MAX_REASON_CHARS
            )));
        }

        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[reporter_id, reported_id], now).await?;
        let report_id = insert_report_with_tx(
            &mut tx,
            NewReport {
                reporter_id: Some(reporter_id),
                reported_id,
                context_type,
                context_id,
                reason,
            },
            now,
        )
        .await?;
        let report = report_by_id_with_tx(&mut tx, report_id)
            .await?
            .ok_or(CoreError::NotFound("report"))?;
        tx.commit().await?;

        tracing::info!(report_id, reporter_id, reported_id, context_type, "report filed");
        Ok(report)
    }

    /// Move a report along its review lifecycle.
    ///
    /// Disallowed transitions leave the report untouched and return it as is.
    /// Confirming a pending report appends the `report_confirmed` penalty for
    /// the reported user in the same transaction, so it is applied once.
    pub async fn set_status(&self, report_id: i64, next: ReportStatus) -> Result<Report> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.pool().begin().await?;

        // Writer lock before the status is read.
        let exists = sqlx::query("UPDATE reports SET updated_at = updated_at WHERE id = $1")
            .bind(report_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;
        if !exists {
            return Err(CoreError::NotFound("report"));
        }

        let report = report_by_id_with_tx(&mut tx, report_id)
            .await?
            .ok_or(CoreError::NotFound("report"))?;
        if !report.status.can_transition_to(next) {
            tx.rollback().await?;
            return Ok(report);
        }

        sqlx::query("UPDATE reports SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(report_id)
            .bind(next.as_db())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        if report.status == ReportStatus::Pending && next == ReportStatus::Confirmed {
            let kind = TrustEventKind::ReportConfirmed;
            let details = format!("report #{report_id} confirmed: {}", report.reason);
            append_event_with_tx(
                &mut tx,
                NewTrustEvent {
                    user_id: report.reported_id,
                    event_type: kind.event_type(),
                    points: self.points.for_event(&kind),
                    details: &details,
                    ref_id: Some(report_id),
                },
                now,
            )
            .await?;
        }

        let updated = report_by_id_with_tx(&mut tx, report_id)
            .await?
            .ok_or(CoreError::NotFound("report"))?;
        tx.commit().await?;

        tracing::info!(
            report_id,
            reported_id = updated.reported_id,
            from = report.status.as_db(),
            to = next.as_db(),
            "report status changed"
        );

        Ok(updated)
    }

    /// Reports for the moderation queue, newest first.
    pub async fn list(
        &self,
        status: Option<ReportStatus>,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Report>> {
        let rows = sqlx::query(
            "SELECT id, reporter_id, reported_id, context_type, context_id, reason, status, \
                    evidence, created_at, updated_at \
             FROM reports \
             WHERE ($1 IS NULL OR status = $1) AND ($2 IS NULL OR id < $2) \
             ORDER BY id DESC \
             LIMIT $3",
        )
        .bind(status.map(|status| status.as_db()))
        .bind(before_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(report_from_row).collect()
    }

    pub async fn get(&self, report_id: i64) -> Result<Option<Report>> {
        let row = sqlx::query(
            "SELECT id, reporter_id, reported_id, context_type, context_id, reason, status, \
                    evidence, created_at, updated_at \
             FROM reports WHERE id = $1",
        )
        .bind(report_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(report_from_row).transpose()
    }
}

pub async fn insert_report_with_tx(
    tx: &mut Tx<'_>,
    report: NewReport<'_>,
    now: OffsetDateTime,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO reports \
         (reporter_id, reported_id, context_type, context_id, reason, status, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
         RETURNING id",
    )
    .bind(report.reporter_id)
    .bind(report.reported_id)
    .bind(report.context_type)
    .bind(report.context_id)
    .bind(report.reason)
    .bind(ReportStatus::Pending.as_db())
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    Ok(id)
}

/// Copy the conversation between `reporter_id` and `reported_id` into the
/// reporter's pending reports that have no evidence yet. Runs before a block
/// purges the history. Returns the number of reports updated.
pub async fn snapshot_evidence_with_tx(
    tx: &mut Tx<'_>,
    reporter_id: i64,
    reported_id: i64,
    now: OffsetDateTime,
) -> Result<u64> {
    let waiting: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM reports \
         WHERE reporter_id = $1 AND reported_id = $2 AND status = $3 AND evidence IS NULL",
    )
    .bind(reporter_id)
    .bind(reported_id)
    .bind(ReportStatus::Pending.as_db())
    .fetch_one(&mut **tx)
    .await?;
    if waiting == 0 {
        return Ok(0);
    }

    let pair = PairKey::normalize(reporter_id, reported_id)?;
    let mut messages = conversation_in(&mut **tx, pair, None, EVIDENCE_MESSAGE_LIMIT).await?;
    messages.reverse();

    let evidence = json!({
        "captured_at": now.unix_timestamp(),
        "messages": messages,
    });

    let updated = sqlx::query(
        "UPDATE reports SET evidence = $4, updated_at = $5 \
         WHERE reporter_id = $1 AND reported_id = $2 AND status = $3 AND evidence IS NULL",
    )
    .bind(reporter_id)
    .bind(reported_id)
    .bind(ReportStatus::Pending.as_db())
    .bind(evidence.to_string())
    .bind(now)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    tracing::debug!(reporter_id, reported_id, reports = updated, "evidence captured");
    Ok(updated)
}

async fn report_by_id_with_tx(tx: &mut Tx<'_>, report_id: i64) -> Result<Option<Report>> {
    let row = sqlx::query(
        "SELECT id, reporter_id, reported_id, context_type, context_id, reason, status, \
                evidence, created_at, updated_at \
         FROM reports WHERE id = $1",
    )
    .bind(report_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref().map(report_from_row).transpose()
}

fn report_from_row(row: &SqliteRow) -> Result<Report> {
    let status: String = row.get("status");
    let status = ReportStatus::from_db(&status)
        .ok_or_else(|| CoreError::corrupt(format!("unknown report status {status}")))?;
    let evidence: Option<String> = row.get("evidence");
    let evidence = evidence
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|err| CoreError::corrupt(format!("report evidence: {err}")))?;

    Ok(Report {
        id: row.get("id"),
        reporter_id: row.get("reporter_id"),
        reported_id: row.get("reported_id"),
        context_type: row.get("context_type"),
        context_id: row.get("context_id"),
        reason: row.get("reason"),
        status,
        evidence,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
