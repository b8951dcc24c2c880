use tokio::sync::mpsc;
use tracing::error;

use crate::error::Result;
use crate::types::JobRunEvent;

/// Receives JobRunEvents from the job runner and persists them to `job_runs`.
/// Runs as a dedicated background task so job bodies never wait on the log.
pub struct JobRunWriter {
    pool: sqlx::SqlitePool,
    run_rx: mpsc::Receiver<JobRunEvent>,
}

impl JobRunWriter {
    pub fn new(pool: sqlx::SqlitePool, run_rx: mpsc::Receiver<JobRunEvent>) -> Self {
        Self { pool, run_rx }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.run_rx.recv().await {
            if let Err(e) = write_run(&self.pool, &event).await {
                error!(job = %event.job, "job run log write error: {e}");
            }
        }
    }
}

pub async fn write_run(pool: &sqlx::SqlitePool, run: &JobRunEvent) -> Result<()> {
    let summary = serde_json::to_string(&run.summary)?;

    sqlx::query(
        r#"
        INSERT INTO job_runs (job_name, worker_id, started_at, finished_at, outcome, summary)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.job.as_str())
    .bind(&run.worker_id)
    .bind(run.started_at_ms)
    .bind(run.finished_at_ms)
    .bind(run.outcome.as_str())
    .bind(summary)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;
    use crate::db::models::JobRunRow;
    use crate::types::{JobName, RunOutcome};

    #[tokio::test]
    async fn writer_drains_channel_into_job_runs() {
        let pool = connect_memory().await;
        let (tx, rx) = mpsc::channel(4);
        let writer = JobRunWriter::new(pool.clone(), rx);

        tx.send(JobRunEvent {
            job: JobName::Finalize,
            worker_id: "w1".to_string(),
            started_at_ms: 10,
            finished_at_ms: 25,
            outcome: RunOutcome::Ok,
            summary: serde_json::json!({ "enqueued": 2 }),
        })
        .await
        .unwrap();
        drop(tx);
        writer.run().await;

        let rows: Vec<JobRunRow> = sqlx::query_as("SELECT * FROM job_runs")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_name, "finalize");
        assert_eq!(rows[0].outcome, "ok");
        assert_eq!(rows[0].summary.as_deref(), Some(r#"{"enqueued":2}"#));
    }
}
