//! Postgres-backed stores.
//!
//! One pool serves every port. Audit records are insert-only; sheet and
//! boundary writes are idempotent (`ON CONFLICT DO NOTHING` followed by a
//! read-back), so a retried cycle never produces a second sheet, slot or
//! boundary for the same key.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Unavailable` |
//! | PoolClosed / Io / Tls / other | N/A | `Unavailable` |
//! | RowNotFound / ColumnDecode | N/A | `Malformed` |

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{instrument, Span};

use feedpost_core::{
    FeederId, FormulaVersion, LineId, LocationCode, LotNo, MaterialCode, PostingId, ProductCode,
    RunKey, SheetNo,
};
use feedpost_production::{
    BoundaryEdge, BoundaryResolution, Continuity, ProductionRun, ResolutionSource,
};
use feedpost_recipe::{FeedOverride, FormulaKey, FormulaRow, RatioGroup};
use feedpost_reconcile::{PostingKey, PostingOrigin, PostingRecord, PostingStatus, SheetType};

use super::ports::{
    AuditStore, BoundaryStore, RecipeStore, RunStore, SheetStore, StorageSlot, StoreError,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS formula_rows (
        line              TEXT NOT NULL,
        formula_version   TEXT NOT NULL,
        product           TEXT NOT NULL,
        feeder            SMALLINT NOT NULL CHECK (feeder > 0),
        material          TEXT NOT NULL,
        ratio_pct         DOUBLE PRECISION NOT NULL,
        semi_finished     TEXT NOT NULL DEFAULT '',
        tolerance_pct     DOUBLE PRECISION NOT NULL DEFAULT 0,
        max_load_per_hour DOUBLE PRECISION NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feed_overrides (
        line         TEXT NOT NULL,
        run_sequence INTEGER NOT NULL,
        feeder       SMALLINT NOT NULL CHECK (feeder > 0),
        override_seq INTEGER NOT NULL,
        material     TEXT NOT NULL,
        PRIMARY KEY (line, run_sequence, feeder, override_seq)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS production_runs (
        line            TEXT NOT NULL,
        run_sequence    INTEGER NOT NULL,
        product         TEXT NOT NULL,
        lot             TEXT NOT NULL,
        formula_version TEXT NOT NULL,
        planned_weight  DOUBLE PRECISION NOT NULL,
        planned_rate    DOUBLE PRECISION NOT NULL DEFAULT 0,
        operator_start  TIMESTAMPTZ NOT NULL,
        operator_end    TIMESTAMPTZ NULL,
        PRIMARY KEY (line, run_sequence)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS posting_records (
        id                UUID PRIMARY KEY,
        lot               TEXT NOT NULL,
        sheet_type        TEXT NOT NULL,
        feeder            SMALLINT NULL,
        material          TEXT NULL,
        run_line          TEXT NULL,
        run_sequence      INTEGER NULL,
        sheet_no          TEXT NOT NULL,
        product           TEXT NOT NULL,
        cumulative_after  DOUBLE PRECISION NOT NULL,
        cumulative_before DOUBLE PRECISION NOT NULL,
        delta             DOUBLE PRECISION NOT NULL,
        location          TEXT NOT NULL,
        result_token      TEXT NOT NULL,
        status            TEXT NOT NULL,
        origin            TEXT NOT NULL,
        window_start      TIMESTAMPTZ NOT NULL,
        window_end        TIMESTAMPTZ NOT NULL,
        recorded_at       TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS posting_records_key_idx
        ON posting_records (lot, sheet_type, feeder, material, recorded_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pick_sheets (
        sheet_no   TEXT PRIMARY KEY,
        lot        TEXT NOT NULL,
        posted     BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pay_sheets (
        run_line     TEXT NOT NULL,
        run_sequence INTEGER NOT NULL,
        sheet_no     TEXT NOT NULL,
        PRIMARY KEY (run_line, run_sequence)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS storage_slots (
        lot       TEXT NOT NULL,
        location  TEXT NOT NULL,
        slot_date DATE NOT NULL,
        sequence  INTEGER NOT NULL,
        PRIMARY KEY (lot, location),
        UNIQUE (location, slot_date, sequence)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS run_boundaries (
        run_line         TEXT NOT NULL,
        run_sequence     INTEGER NOT NULL,
        edge             TEXT NOT NULL,
        continuity       TEXT NOT NULL,
        operator_instant TIMESTAMPTZ NOT NULL,
        resolved_instant TIMESTAMPTZ NOT NULL,
        source           TEXT NOT NULL,
        PRIMARY KEY (run_line, run_sequence, edge)
    )
    "#,
];

const RUN_COLUMNS: &str = "line, run_sequence, product, lot, formula_version, planned_weight, \
                           planned_rate, operator_start, operator_end";

/// All relational ports over one connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStores {
    pool: Arc<PgPool>,
}

impl PostgresStores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the tables this engine reads and writes, if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecipeStore for PostgresStores {
    #[instrument(skip(self), fields(formula = %key), err)]
    async fn formula_rows(&self, key: &FormulaKey) -> Result<Vec<FormulaRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT feeder, material, ratio_pct, semi_finished, tolerance_pct, max_load_per_hour
            FROM formula_rows
            WHERE line = $1 AND formula_version = $2 AND product = $3
            ORDER BY feeder ASC
            "#,
        )
        .bind(key.line.as_str())
        .bind(key.version.as_str())
        .bind(key.product.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("formula_rows", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter()
            .map(|row| -> Result<FormulaRow, StoreError> {
                let flag: String = get(row, "semi_finished")?;
                Ok(FormulaRow {
                    feeder: feeder(get::<i16>(row, "feeder")?)?,
                    material: MaterialCode::new(get::<String>(row, "material")?)?,
                    ratio_pct: get(row, "ratio_pct")?,
                    semi_finished: RatioGroup::parse_flag(&flag)?,
                    tolerance_pct: get(row, "tolerance_pct")?,
                    max_load_per_hour: get(row, "max_load_per_hour")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(run = %run), err)]
    async fn feed_overrides(&self, run: &RunKey) -> Result<Vec<FeedOverride>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT feeder, override_seq, material
            FROM feed_overrides
            WHERE line = $1 AND run_sequence = $2
            ORDER BY feeder ASC, override_seq ASC
            "#,
        )
        .bind(run.line.as_str())
        .bind(run.sequence as i32)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("feed_overrides", e))?;

        rows.iter()
            .map(|row| -> Result<FeedOverride, StoreError> {
                Ok(FeedOverride {
                    feeder: feeder(get::<i16>(row, "feeder")?)?,
                    sequence: get::<i32>(row, "override_seq")? as u32,
                    material: MaterialCode::new(get::<String>(row, "material")?)?,
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl RunStore for PostgresStores {
    #[instrument(skip(self), err)]
    async fn active_runs(
        &self,
        closed_since: DateTime<Utc>,
    ) -> Result<Vec<ProductionRun>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM production_runs \
             WHERE operator_end IS NULL OR operator_end >= $1 \
             ORDER BY line ASC, run_sequence ASC"
        ))
        .bind(closed_since)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_runs", e))?;

        rows.iter().map(run_from_row).collect()
    }

    #[instrument(skip(self), fields(run = %key), err)]
    async fn get(&self, key: &RunKey) -> Result<Option<ProductionRun>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM production_runs WHERE line = $1 AND run_sequence = $2"
        ))
        .bind(key.line.as_str())
        .bind(key.sequence as i32)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_run", e))?;

        row.as_ref().map(run_from_row).transpose()
    }

    #[instrument(skip(self), fields(run = %key), err)]
    async fn predecessor(&self, key: &RunKey) -> Result<Option<ProductionRun>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM production_runs \
             WHERE line = $1 AND run_sequence < $2 \
             ORDER BY run_sequence DESC LIMIT 1"
        ))
        .bind(key.line.as_str())
        .bind(key.sequence as i32)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("predecessor", e))?;

        row.as_ref().map(run_from_row).transpose()
    }

    #[instrument(skip(self), fields(run = %key), err)]
    async fn successor(&self, key: &RunKey) -> Result<Option<ProductionRun>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM production_runs \
             WHERE line = $1 AND run_sequence > $2 \
             ORDER BY run_sequence ASC LIMIT 1"
        ))
        .bind(key.line.as_str())
        .bind(key.sequence as i32)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("successor", e))?;

        row.as_ref().map(run_from_row).transpose()
    }

    #[instrument(skip(self), fields(lot = %lot), err)]
    async fn find_by_lot(&self, lot: &LotNo) -> Result<Option<ProductionRun>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM production_runs \
             WHERE lot = $1 ORDER BY operator_start DESC LIMIT 1"
        ))
        .bind(lot.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_lot", e))?;

        row.as_ref().map(run_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl AuditStore for PostgresStores {
    #[instrument(skip(self, record), fields(key = %record.key, id = %record.id), err)]
    async fn append(&self, record: &PostingRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO posting_records (
                id, lot, sheet_type, feeder, material, run_line, run_sequence,
                sheet_no, product, cumulative_after, cumulative_before, delta,
                location, result_token, status, origin, window_start, window_end, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.key.lot.as_str())
        .bind(record.key.sheet_type.as_str())
        .bind(record.key.feeder.map(|f| f.index() as i16))
        .bind(record.key.material.as_ref().map(|m| m.as_str().to_string()))
        .bind(record.run.as_ref().map(|r| r.line.as_str().to_string()))
        .bind(record.run.as_ref().map(|r| r.sequence as i32))
        .bind(record.sheet_no.as_str())
        .bind(record.product.as_str())
        .bind(record.cumulative_after)
        .bind(record.cumulative_before)
        .bind(record.delta)
        .bind(record.location.as_str())
        .bind(&record.result_token)
        .bind(record.status.as_str())
        .bind(record.origin.as_str())
        .bind(record.window_start)
        .bind(record.window_end)
        .bind(record.recorded_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_record", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn latest(&self, key: &PostingKey) -> Result<Option<PostingRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT *
            FROM posting_records
            WHERE lot = $1
              AND sheet_type = $2
              AND feeder IS NOT DISTINCT FROM $3
              AND material IS NOT DISTINCT FROM $4
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(key.lot.as_str())
        .bind(key.sheet_type.as_str())
        .bind(key.feeder.map(|f| f.index() as i16))
        .bind(key.material.as_ref().map(|m| m.as_str().to_string()))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_record", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self), fields(lot = %lot), err)]
    async fn records_for_lot(&self, lot: &LotNo) -> Result<Vec<PostingRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM posting_records WHERE lot = $1 ORDER BY recorded_at ASC, id ASC",
        )
        .bind(lot.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("records_for_lot", e))?;

        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait::async_trait]
impl SheetStore for PostgresStores {
    #[instrument(skip(self), fields(lot = %lot), err)]
    async fn open_pick_sheet(&self, lot: &LotNo) -> Result<Option<SheetNo>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT sheet_no FROM pick_sheets
            WHERE lot = $1 AND NOT posted
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(lot.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("open_pick_sheet", e))?;

        row.map(|r| sheet_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(lot = %lot, sheet = %sheet), err)]
    async fn register_pick_sheet(&self, lot: &LotNo, sheet: &SheetNo) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO pick_sheets (sheet_no, lot) VALUES ($1, $2)")
            .bind(sheet.as_str())
            .bind(lot.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("register_pick_sheet", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(sheet = %sheet), err)]
    async fn mark_pick_sheet_posted(&self, sheet: &SheetNo) -> Result<(), StoreError> {
        sqlx::query("UPDATE pick_sheets SET posted = TRUE WHERE sheet_no = $1")
            .bind(sheet.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_pick_sheet_posted", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(run = %run), err)]
    async fn pay_sheet(&self, run: &RunKey) -> Result<Option<SheetNo>, StoreError> {
        let row = sqlx::query(
            "SELECT sheet_no FROM pay_sheets WHERE run_line = $1 AND run_sequence = $2",
        )
        .bind(run.line.as_str())
        .bind(run.sequence as i32)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pay_sheet", e))?;

        row.map(|r| sheet_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(run = %run, sheet = %sheet), err)]
    async fn register_pay_sheet(&self, run: &RunKey, sheet: &SheetNo) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pay_sheets (run_line, run_sequence, sheet_no)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(run.line.as_str())
        .bind(run.sequence as i32)
        .bind(sheet.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_pay_sheet", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(lot = %lot, location = %location), err)]
    async fn storage_slot(
        &self,
        lot: &LotNo,
        location: &LocationCode,
    ) -> Result<Option<StorageSlot>, StoreError> {
        let row = sqlx::query(
            "SELECT location, slot_date, sequence FROM storage_slots WHERE lot = $1 AND location = $2",
        )
        .bind(lot.as_str())
        .bind(location.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("storage_slot", e))?;

        row.as_ref().map(slot_from_row).transpose()
    }

    #[instrument(skip(self), fields(lot = %lot, location = %location), err)]
    async fn allocate_storage_slot(
        &self,
        lot: &LotNo,
        location: &LocationCode,
        date: NaiveDate,
    ) -> Result<StorageSlot, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO storage_slots (lot, location, slot_date, sequence)
            SELECT $1, $2, $3, COALESCE(MAX(sequence), 0) + 1
            FROM storage_slots
            WHERE location = $2 AND slot_date = $3
            ON CONFLICT (lot, location) DO NOTHING
            "#,
        )
        .bind(lot.as_str())
        .bind(location.as_str())
        .bind(date)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("allocate_storage_slot", e))?;

        self.storage_slot(lot, location).await?.ok_or_else(|| {
            StoreError::Malformed(format!("storage slot for {lot}/{location} vanished"))
        })
    }
}

#[async_trait::async_trait]
impl BoundaryStore for PostgresStores {
    #[instrument(skip(self), fields(run = %run, edge = edge.as_str()), err)]
    async fn get(
        &self,
        run: &RunKey,
        edge: BoundaryEdge,
    ) -> Result<Option<BoundaryResolution>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT continuity, operator_instant, resolved_instant, source
            FROM run_boundaries
            WHERE run_line = $1 AND run_sequence = $2 AND edge = $3
            "#,
        )
        .bind(run.line.as_str())
        .bind(run.sequence as i32)
        .bind(edge.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_boundary", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(BoundaryResolution {
            run: run.clone(),
            edge,
            continuity: continuity(&get::<String>(&row, "continuity")?)?,
            operator_instant: get(&row, "operator_instant")?,
            resolved_instant: get(&row, "resolved_instant")?,
            source: source(&get::<String>(&row, "source")?)?,
        }))
    }

    #[instrument(
        skip(self, resolution),
        fields(run = %resolution.run, edge = resolution.edge.as_str()),
        err
    )]
    async fn insert_once(
        &self,
        resolution: &BoundaryResolution,
    ) -> Result<BoundaryResolution, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO run_boundaries (
                run_line, run_sequence, edge, continuity, operator_instant, resolved_instant, source
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (run_line, run_sequence, edge) DO NOTHING
            "#,
        )
        .bind(resolution.run.line.as_str())
        .bind(resolution.run.sequence as i32)
        .bind(resolution.edge.as_str())
        .bind(continuity_str(resolution.continuity))
        .bind(resolution.operator_instant)
        .bind(resolution.resolved_instant)
        .bind(source_str(resolution.source))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_boundary", e))?;

        BoundaryStore::get(self, &resolution.run, resolution.edge)
            .await?
            .ok_or_else(|| StoreError::Malformed("boundary row vanished after insert".to_string()))
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Malformed(format!("column {column}: {e}")))
}

fn feeder(raw: i16) -> Result<FeederId, StoreError> {
    let index = u16::try_from(raw)
        .map_err(|_| StoreError::Malformed(format!("negative feeder index {raw}")))?;
    Ok(FeederId::new(index)?)
}

fn run_from_row(row: &PgRow) -> Result<ProductionRun, StoreError> {
    let key = RunKey::new(
        LineId::new(get::<String>(row, "line")?)?,
        get::<i32>(row, "run_sequence")? as u32,
    );
    Ok(ProductionRun::new(
        key,
        ProductCode::new(get::<String>(row, "product")?)?,
        LotNo::new(get::<String>(row, "lot")?)?,
        FormulaVersion::new(get::<String>(row, "formula_version")?)?,
        get(row, "planned_weight")?,
        get(row, "planned_rate")?,
        get(row, "operator_start")?,
        get(row, "operator_end")?,
    )?)
}

fn record_from_row(row: &PgRow) -> Result<PostingRecord, StoreError> {
    let sheet_type = SheetType::parse(&get::<String>(row, "sheet_type")?)?;
    let feeder_id = get::<Option<i16>>(row, "feeder")?.map(feeder).transpose()?;
    let material = get::<Option<String>>(row, "material")?
        .map(MaterialCode::new)
        .transpose()?;
    let run = match (
        get::<Option<String>>(row, "run_line")?,
        get::<Option<i32>>(row, "run_sequence")?,
    ) {
        (Some(line), Some(seq)) => Some(RunKey::new(LineId::new(line)?, seq as u32)),
        _ => None,
    };

    Ok(PostingRecord {
        id: PostingId::from_uuid(get(row, "id")?),
        key: PostingKey {
            lot: LotNo::new(get::<String>(row, "lot")?)?,
            sheet_type,
            feeder: feeder_id,
            material,
        },
        run,
        sheet_no: SheetNo::new(get::<String>(row, "sheet_no")?)?,
        product: ProductCode::new(get::<String>(row, "product")?)?,
        cumulative_after: get(row, "cumulative_after")?,
        cumulative_before: get(row, "cumulative_before")?,
        delta: get(row, "delta")?,
        location: LocationCode::new(get::<String>(row, "location")?)?,
        result_token: get(row, "result_token")?,
        status: status(&get::<String>(row, "status")?)?,
        origin: origin(&get::<String>(row, "origin")?)?,
        window_start: get(row, "window_start")?,
        window_end: get(row, "window_end")?,
        recorded_at: get(row, "recorded_at")?,
    })
}

fn sheet_from_row(row: &PgRow) -> Result<SheetNo, StoreError> {
    Ok(SheetNo::new(get::<String>(row, "sheet_no")?)?)
}

fn slot_from_row(row: &PgRow) -> Result<StorageSlot, StoreError> {
    Ok(StorageSlot {
        location: LocationCode::new(get::<String>(row, "location")?)?,
        date: get(row, "slot_date")?,
        sequence: get::<i32>(row, "sequence")? as u32,
    })
}

fn status(raw: &str) -> Result<PostingStatus, StoreError> {
    match raw {
        "accepted" => Ok(PostingStatus::Accepted),
        "rejected" => Ok(PostingStatus::Rejected),
        other => Err(StoreError::Malformed(format!("unknown posting status '{other}'"))),
    }
}

fn origin(raw: &str) -> Result<PostingOrigin, StoreError> {
    match raw {
        "cycle" => Ok(PostingOrigin::Cycle),
        "adjustment" => Ok(PostingOrigin::Adjustment),
        other => Err(StoreError::Malformed(format!("unknown posting origin '{other}'"))),
    }
}

fn continuity_str(c: Continuity) -> &'static str {
    match c {
        Continuity::Continuous => "continuous",
        Continuity::Discontinuous => "discontinuous",
    }
}

fn continuity(raw: &str) -> Result<Continuity, StoreError> {
    match raw {
        "continuous" => Ok(Continuity::Continuous),
        "discontinuous" => Ok(Continuity::Discontinuous),
        other => Err(StoreError::Malformed(format!("unknown continuity '{other}'"))),
    }
}

fn source_str(s: ResolutionSource) -> &'static str {
    match s {
        ResolutionSource::Operator => "operator",
        ResolutionSource::Sensor => "sensor",
    }
}

fn source(raw: &str) -> Result<ResolutionSource, StoreError> {
    match raw {
        "operator" => Ok(ResolutionSource::Operator),
        "sensor" => Ok(ResolutionSource::Sensor),
        other => Err(StoreError::Malformed(format!("unknown resolution source '{other}'"))),
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if code.as_ref() == "23505" => StoreError::Conflict(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::RowNotFound => {
            StoreError::Malformed(format!("unexpected row not found in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Malformed(format!("decode error in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}
