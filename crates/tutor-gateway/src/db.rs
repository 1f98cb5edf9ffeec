//! Postgres-backed implementations of the pipeline's two repository traits.
//! Schedulers in `tutor-pipeline` and the context assembler in
//! `tutor-context` never see this module directly — they depend only on the
//! trait objects built from it in `bootstrap.rs`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tutor_adapters::{Stroke, StrokePoint};
use tutor_context::{AnswerKeyRow, ContextRepository, PageTranscriptionRow, ProblemPart, ProblemRow, ReasoningLogRow};
use tutor_domain::error::{Error, Result};
use tutor_pipeline::{PipelineRepository, ReasoningLogEntry, StrokeEventType, StrokeLogEntry, TranscriptionUpdate};

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Create the tables this service owns if they don't already exist.
    /// Reference tables (`documents`, `questions`, ...) are expected to be
    /// seeded separately; this only guarantees the tables the pipeline
    /// itself writes.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS page_transcriptions (
                session_id TEXT NOT NULL,
                page INTEGER NOT NULL,
                text TEXT NOT NULL DEFAULT '',
                latex TEXT NOT NULL DEFAULT '',
                line_data JSONB NOT NULL DEFAULT '{}'::jsonb,
                confidence REAL,
                classified_diagram BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (session_id, page)
            );

            CREATE TABLE IF NOT EXISTS reasoning_logs (
                id UUID PRIMARY KEY,
                session_id TEXT NOT NULL,
                page INTEGER NOT NULL,
                action TEXT NOT NULL,
                message TEXT NOT NULL,
                internal_reasoning TEXT NOT NULL,
                level SMALLINT,
                error_type TEXT,
                delay_ms INTEGER NOT NULL DEFAULT 0,
                source TEXT,
                is_error_flag BOOLEAN NOT NULL DEFAULT FALSE,
                prompt_tokens INTEGER NOT NULL DEFAULT 0,
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS reasoning_logs_session_page_idx
                ON reasoning_logs (session_id, page, created_at);

            CREATE TABLE IF NOT EXISTS stroke_logs (
                id UUID PRIMARY KEY,
                session_id TEXT NOT NULL,
                page INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                strokes JSONB NOT NULL,
                received_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS stroke_logs_session_page_idx
                ON stroke_logs (session_id, page, received_at);

            CREATE TABLE IF NOT EXISTS session_question_cache (
                session_id TEXT PRIMARY KEY,
                document_ref TEXT NOT NULL,
                question_number INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS questions (
                document_ref TEXT NOT NULL,
                question_number INTEGER NOT NULL,
                label TEXT NOT NULL DEFAULT '',
                stem TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (document_ref, question_number)
            );

            CREATE TABLE IF NOT EXISTS question_parts (
                document_ref TEXT NOT NULL,
                question_number INTEGER NOT NULL,
                label TEXT NOT NULL,
                text TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS answer_keys (
                document_ref TEXT NOT NULL,
                question_number INTEGER NOT NULL,
                part_label TEXT,
                answer TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS question_figures (
                id UUID PRIMARY KEY,
                document_ref TEXT NOT NULL,
                question_number INTEGER NOT NULL,
                image BYTEA NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Seeds a problem directly, bypassing document ingestion. Used only by
    /// the simulation harness so scripted scenarios don't need a real
    /// uploaded document.
    pub async fn insert_simulated_problem(
        &self,
        document_ref: &str,
        question_number: i32,
        label: &str,
        stem: &str,
        parts: &[ProblemPart],
        answer_key: &[AnswerKeyRow],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        sqlx::query(
            "INSERT INTO questions (document_ref, question_number, label, stem) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (document_ref, question_number) DO UPDATE SET label = EXCLUDED.label, stem = EXCLUDED.stem",
        )
        .bind(document_ref)
        .bind(question_number)
        .bind(label)
        .bind(stem)
        .execute(&mut *tx)
        .await
        .map_err(persistence)?;

        for part in parts {
            sqlx::query("INSERT INTO question_parts (document_ref, question_number, label, text) VALUES ($1, $2, $3, $4)")
                .bind(document_ref)
                .bind(question_number)
                .bind(&part.label)
                .bind(&part.text)
                .execute(&mut *tx)
                .await
                .map_err(persistence)?;
        }

        for entry in answer_key {
            sqlx::query("INSERT INTO answer_keys (document_ref, question_number, part_label, answer) VALUES ($1, $2, $3, $4)")
                .bind(document_ref)
                .bind(question_number)
                .bind(&entry.part_label)
                .bind(&entry.answer)
                .execute(&mut *tx)
                .await
                .map_err(persistence)?;
        }

        tx.commit().await.map_err(persistence)?;
        Ok(())
    }

    /// Deletes every row a simulation session touched: the session's own
    /// stroke/transcription/reasoning history, and the problem seeded for it.
    pub async fn delete_simulation_data(&self, session_id: &str, document_ref: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;
        for (table, column) in [
            ("stroke_logs", "session_id"),
            ("page_transcriptions", "session_id"),
            ("reasoning_logs", "session_id"),
            ("session_question_cache", "session_id"),
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE {column} = $1"))
                .bind(session_id)
                .execute(&mut *tx)
                .await
                .map_err(persistence)?;
        }
        for table in ["question_parts", "answer_keys", "questions"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE document_ref = $1"))
                .bind(document_ref)
                .execute(&mut *tx)
                .await
                .map_err(persistence)?;
        }
        tx.commit().await.map_err(persistence)?;
        Ok(())
    }
}

fn persistence(e: sqlx::Error) -> Error {
    Error::Persistence(e.to_string())
}

#[async_trait]
impl ContextRepository for PgRepository {
    async fn get_page_transcription(
        &self,
        session_id: &str,
        page: i32,
    ) -> Result<Option<PageTranscriptionRow>> {
        let row = sqlx::query("SELECT text, line_data FROM page_transcriptions WHERE session_id = $1 AND page = $2")
            .bind(session_id)
            .bind(page)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(row.map(|r| PageTranscriptionRow {
            text: r.get("text"),
            line_data: r.get("line_data"),
        }))
    }

    async fn get_problem(&self, document_ref: &str, question_number: i32) -> Result<Option<ProblemRow>> {
        let stem_row = sqlx::query("SELECT stem FROM questions WHERE document_ref = $1 AND question_number = $2")
            .bind(document_ref)
            .bind(question_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        let Some(stem_row) = stem_row else {
            return Ok(None);
        };

        let part_rows = sqlx::query(
            "SELECT label, text FROM question_parts WHERE document_ref = $1 AND question_number = $2 ORDER BY label",
        )
        .bind(document_ref)
        .bind(question_number)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        let parts = part_rows
            .into_iter()
            .map(|r| ProblemPart {
                label: r.get("label"),
                text: r.get("text"),
            })
            .collect();

        Ok(Some(ProblemRow {
            stem: stem_row.get("stem"),
            parts,
        }))
    }

    async fn get_cached_question(&self, session_id: &str) -> Result<Option<(String, i32)>> {
        let row = sqlx::query(
            "SELECT document_ref, question_number FROM session_question_cache WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(row.map(|r| (r.get("document_ref"), r.get("question_number"))))
    }

    async fn get_answer_key(&self, document_ref: &str, question_number: i32) -> Result<Vec<AnswerKeyRow>> {
        let rows = sqlx::query(
            "SELECT part_label, answer FROM answer_keys WHERE document_ref = $1 AND question_number = $2 ORDER BY part_label",
        )
        .bind(document_ref)
        .bind(question_number)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(rows
            .into_iter()
            .map(|r| AnswerKeyRow {
                part_label: r.get("part_label"),
                answer: r.get("answer"),
            })
            .collect())
    }

    async fn get_question_figures(&self, document_ref: &str, question_number: i32) -> Result<Vec<Vec<u8>>> {
        let rows = sqlx::query(
            "SELECT image FROM question_figures WHERE document_ref = $1 AND question_number = $2 ORDER BY id",
        )
        .bind(document_ref)
        .bind(question_number)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(rows.into_iter().map(|r| r.get("image")).collect())
    }

    async fn get_recent_reasoning_logs(
        &self,
        session_id: &str,
        page: i32,
        limit: i64,
    ) -> Result<Vec<ReasoningLogRow>> {
        let rows = sqlx::query(
            "SELECT action, message, internal_reasoning, source, is_error_flag \
             FROM reasoning_logs WHERE session_id = $1 AND page = $2 \
             ORDER BY created_at DESC LIMIT $3",
        )
        .bind(session_id)
        .bind(page)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        let mut out: Vec<ReasoningLogRow> = rows
            .into_iter()
            .map(|r| ReasoningLogRow {
                action: r.get("action"),
                message: r.get("message"),
                internal_reasoning: r.get("internal_reasoning"),
                source: r.get("source"),
                is_error_flag: r.get("is_error_flag"),
            })
            .collect();
        out.reverse(); // oldest-first; `.last()` is then the most recent entry.
        Ok(out)
    }

    async fn render_page_image(&self, session_id: &str, page: i32) -> Result<Option<Vec<u8>>> {
        let rows = sqlx::query(
            "SELECT event_type, strokes FROM stroke_logs WHERE session_id = $1 AND page = $2 ORDER BY received_at",
        )
        .bind(session_id)
        .bind(page)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut visible: Vec<Stroke> = Vec::new();
        for row in rows {
            let event_type: String = row.get("event_type");
            let strokes_json: serde_json::Value = row.get("strokes");
            let strokes: Vec<Stroke> = serde_json::from_value(strokes_json).unwrap_or_default();
            if event_type == "erase" {
                visible.clear();
            } else {
                visible.extend(strokes);
            }
        }

        Ok(Some(rasterize_strokes(&visible)))
    }
}

const CANVAS_WIDTH: usize = 800;
const CANVAS_HEIGHT: usize = 600;

/// Renders strokes to a 1-bit-per-pixel BMP. Good enough for the context
/// assembler's image fallback; not a general-purpose renderer.
fn rasterize_strokes(strokes: &[Stroke]) -> Vec<u8> {
    let mut bitmap = vec![false; CANVAS_WIDTH * CANVAS_HEIGHT];
    for stroke in strokes {
        for pair in stroke.points.windows(2) {
            draw_line(&mut bitmap, pair[0], pair[1]);
        }
    }
    encode_bmp_1bit(&bitmap, CANVAS_WIDTH, CANVAS_HEIGHT)
}

fn draw_line(bitmap: &mut [bool], a: StrokePoint, b: StrokePoint) {
    let (mut x0, mut y0) = (a.x.round() as i32, a.y.round() as i32);
    let (x1, y1) = (b.x.round() as i32, b.y.round() as i32);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if x0 >= 0 && y0 >= 0 && (x0 as usize) < CANVAS_WIDTH && (y0 as usize) < CANVAS_HEIGHT {
            bitmap[y0 as usize * CANVAS_WIDTH + x0 as usize] = true;
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn encode_bmp_1bit(bitmap: &[bool], width: usize, height: usize) -> Vec<u8> {
    let row_bytes = width.div_ceil(8);
    let row_stride = row_bytes.div_ceil(4) * 4; // rows padded to 4-byte boundary
    let pixel_data_size = row_stride * height;
    let palette_size = 8; // two BGRA entries: black, white
    let header_size = 14 + 40;
    let file_size = header_size + palette_size + pixel_data_size;

    let mut out = Vec::with_capacity(file_size);
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&(file_size as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&((header_size + palette_size) as u32).to_le_bytes());

    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    out.extend_from_slice(&(height as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // planes
    out.extend_from_slice(&1u16.to_le_bytes()); // bits per pixel
    out.extend_from_slice(&0u32.to_le_bytes()); // no compression
    out.extend_from_slice(&(pixel_data_size as u32).to_le_bytes());
    out.extend_from_slice(&2835i32.to_le_bytes()); // x pixels/meter
    out.extend_from_slice(&2835i32.to_le_bytes()); // y pixels/meter
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    out.extend_from_slice(&[255, 255, 255, 0]); // index 0: white
    out.extend_from_slice(&[0, 0, 0, 0]); // index 1: black (ink)

    // BMP rows are bottom-to-top.
    for y in (0..height).rev() {
        let mut row = vec![0u8; row_stride];
        for x in 0..width {
            if bitmap[y * width + x] {
                row[x / 8] |= 0x80 >> (x % 8);
            }
        }
        out.extend_from_slice(&row);
    }

    out
}

#[async_trait]
impl PipelineRepository for PgRepository {
    async fn append_stroke_log(&self, session_id: &str, page: i32, entry: StrokeLogEntry) -> Result<()> {
        let event_type = match entry.event_type {
            StrokeEventType::Draw => "draw",
            StrokeEventType::Erase => "erase",
            StrokeEventType::Voice => "voice",
        };
        let strokes_json = serde_json::to_value(&entry.strokes).map_err(Error::Json)?;
        sqlx::query(
            "INSERT INTO stroke_logs (id, session_id, page, event_type, strokes, received_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(session_id)
        .bind(page)
        .bind(event_type)
        .bind(strokes_json)
        .bind(entry.received_at)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn list_stroke_log(&self, session_id: &str, page: i32) -> Result<Vec<StrokeLogEntry>> {
        let rows = sqlx::query(
            "SELECT event_type, strokes, received_at FROM stroke_logs \
             WHERE session_id = $1 AND page = $2 ORDER BY received_at",
        )
        .bind(session_id)
        .bind(page)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        rows.into_iter()
            .map(|r| {
                let event_type = match r.get::<String, _>("event_type").as_str() {
                    "draw" => StrokeEventType::Draw,
                    "erase" => StrokeEventType::Erase,
                    "voice" => StrokeEventType::Voice,
                    other => return Err(Error::Persistence(format!("unknown stroke event_type: {other}"))),
                };
                let strokes_json: serde_json::Value = r.get("strokes");
                let strokes = serde_json::from_value(strokes_json).map_err(Error::Json)?;
                Ok(StrokeLogEntry {
                    event_type,
                    strokes,
                    received_at: r.get("received_at"),
                })
            })
            .collect()
    }

    async fn get_transcription_text(&self, session_id: &str, page: i32) -> Result<Option<String>> {
        let row = sqlx::query("SELECT text FROM page_transcriptions WHERE session_id = $1 AND page = $2")
            .bind(session_id)
            .bind(page)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(row.map(|r| r.get("text")))
    }

    async fn upsert_transcription(&self, session_id: &str, page: i32, update: TranscriptionUpdate) -> Result<()> {
        sqlx::query(
            "INSERT INTO page_transcriptions (session_id, page, text, latex, line_data, confidence, classified_diagram, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (session_id, page) DO UPDATE SET \
             text = EXCLUDED.text, latex = EXCLUDED.latex, line_data = EXCLUDED.line_data, \
             confidence = EXCLUDED.confidence, classified_diagram = EXCLUDED.classified_diagram, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(session_id)
        .bind(page)
        .bind(&update.text)
        .bind(&update.latex)
        .bind(&update.line_data)
        .bind(update.confidence)
        .bind(update.classified_diagram)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn append_reasoning_log(&self, entry: ReasoningLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO reasoning_logs (id, session_id, page, action, message, internal_reasoning, \
             level, error_type, delay_ms, source, is_error_flag, prompt_tokens, completion_tokens, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(&entry.session_id)
        .bind(entry.page)
        .bind(&entry.action)
        .bind(&entry.message)
        .bind(&entry.internal_reasoning)
        .bind(entry.level.map(|l| l as i16))
        .bind(&entry.error_type)
        .bind(entry.delay_ms as i32)
        .bind(&entry.source)
        .bind(entry.is_error_flag)
        .bind(entry.prompt_tokens as i32)
        .bind(entry.completion_tokens as i32)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn delete_stroke_log(&self, session_id: &str, page: i32) -> Result<()> {
        sqlx::query("DELETE FROM stroke_logs WHERE session_id = $1 AND page = $2")
            .bind(session_id)
            .bind(page)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rasterizes_a_diagonal_line_into_a_valid_bmp_header() {
        let strokes = vec![Stroke {
            points: vec![StrokePoint { x: 0.0, y: 0.0 }, StrokePoint { x: 10.0, y: 10.0 }],
        }];
        let bmp = rasterize_strokes(&strokes);
        assert_eq!(&bmp[0..2], b"BM");
        assert!(bmp.len() > 62);
    }

    #[test]
    fn empty_strokes_still_produce_a_blank_canvas() {
        let bmp = rasterize_strokes(&[]);
        assert_eq!(&bmp[0..2], b"BM");
    }
}
