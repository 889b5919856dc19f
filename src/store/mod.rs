use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

mod files;
mod migrations;

pub use files::ImageVault;
use migrations::run_migrations;

use crate::models::{ScanOutputs, ScanSession, ScanStatus, SlotImage};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn status_from_str(value: &str) -> Result<ScanStatus> {
    match value {
        "draft" => Ok(ScanStatus::Draft),
        "uploading" => Ok(ScanStatus::Uploading),
        "processing" => Ok(ScanStatus::Processing),
        "ready" => Ok(ScanStatus::Ready),
        "error" => Ok(ScanStatus::Error),
        _ => Err(anyhow!("unknown scan status '{value}'")),
    }
}

/// Handle to the scan-session store. All SQLite access runs on a dedicated
/// worker thread, so concurrent callers serialize through one connection and
/// each operation is atomic with respect to the others.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("ringscan-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    pub async fn insert_session(&self, session: &ScanSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO scan_sessions (id, created_at, target_type, scale_meters, slots_total,
                                            status, progress, message, upload_completed, upload_total,
                                            remote_scan_id, job_id, glb_url, usdz_url, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    record.id,
                    record.created_at.to_rfc3339(),
                    record.target_type,
                    record.scale_meters,
                    record.slots_total,
                    record.status.as_str(),
                    record.progress,
                    record.message,
                    record.upload_completed,
                    record.upload_total,
                    record.remote_scan_id,
                    record.job_id,
                    record.outputs.as_ref().and_then(|o| o.glb_url.clone()),
                    record.outputs.as_ref().and_then(|o| o.usdz_url.clone()),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert scan session")?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<ScanSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| read_session(conn, &session_id)).await
    }

    /// Sessions newest-first by creation time.
    pub async fn list_sessions(&self) -> Result<Vec<ScanSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM scan_sessions ORDER BY created_at DESC",
            )?;
            let ids: Vec<String> = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;

            let mut sessions = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(session) = read_session(conn, &id)? {
                    sessions.push(session);
                }
            }
            Ok(sessions)
        })
        .await
    }

    /// Returns true when a session row was actually removed. Slot image rows
    /// cascade with the session.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let affected = conn
                .execute("DELETE FROM scan_sessions WHERE id = ?1", params![session_id])
                .with_context(|| "failed to delete scan session")?;
            Ok(affected > 0)
        })
        .await
    }

    /// Replace-by-slot upsert. The capture flow drops the session back to
    /// draft so a previously failed pipeline run does not mark fresh captures
    /// as errored.
    pub async fn upsert_slot_image(&self, session_id: &str, image: &SlotImage) -> Result<()> {
        let session_id = session_id.to_string();
        let image = image.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO slot_images (session_id, slot, path, heading, captured_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id, slot)
                 DO UPDATE SET path = excluded.path,
                               heading = excluded.heading,
                               captured_at = excluded.captured_at",
                params![
                    session_id,
                    image.slot,
                    image.path,
                    image.heading,
                    image.captured_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to upsert slot image")?;
            tx.execute(
                "UPDATE scan_sessions SET status = 'draft', updated_at = ?2 WHERE id = ?1",
                params![session_id, Utc::now().to_rfc3339()],
            )
            .with_context(|| "failed to touch session after capture")?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn set_remote_scan_id(&self, session_id: &str, remote_scan_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        let remote_scan_id = remote_scan_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE scan_sessions
                 SET remote_scan_id = ?2, message = NULL, updated_at = ?3
                 WHERE id = ?1",
                params![session_id, remote_scan_id, Utc::now().to_rfc3339()],
            )
            .with_context(|| "failed to store remote scan id")?;
            Ok(())
        })
        .await
    }

    pub async fn begin_upload(&self, session_id: &str, upload_total: u32) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE scan_sessions
                 SET status = 'uploading', progress = 0, upload_completed = 0,
                     upload_total = ?2, message = NULL, updated_at = ?3
                 WHERE id = ?1",
                params![session_id, upload_total, Utc::now().to_rfc3339()],
            )
            .with_context(|| "failed to start upload stage")?;
            Ok(())
        })
        .await
    }

    pub async fn record_upload_progress(
        &self,
        session_id: &str,
        completed: u32,
        progress: u8,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE scan_sessions
                 SET status = 'uploading', upload_completed = ?2, progress = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![session_id, completed, progress, Utc::now().to_rfc3339()],
            )
            .with_context(|| "failed to record upload progress")?;
            Ok(())
        })
        .await
    }

    pub async fn begin_processing(&self, session_id: &str, job_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        let job_id = job_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE scan_sessions
                 SET status = 'processing', job_id = ?2, progress = 0, updated_at = ?3
                 WHERE id = ?1",
                params![session_id, job_id, Utc::now().to_rfc3339()],
            )
            .with_context(|| "failed to enter processing stage")?;
            Ok(())
        })
        .await
    }

    pub async fn record_processing(
        &self,
        session_id: &str,
        progress: u8,
        message: Option<&str>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let message = message.map(str::to_string);
        self.execute(move |conn| {
            conn.execute(
                "UPDATE scan_sessions
                 SET status = 'processing', progress = ?2, message = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![session_id, progress, message, Utc::now().to_rfc3339()],
            )
            .with_context(|| "failed to record processing progress")?;
            Ok(())
        })
        .await
    }

    pub async fn mark_ready(
        &self,
        session_id: &str,
        outputs: &ScanOutputs,
        message: Option<&str>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let outputs = outputs.clone();
        let message = message.map(str::to_string);
        self.execute(move |conn| {
            conn.execute(
                "UPDATE scan_sessions
                 SET status = 'ready', progress = 100, message = ?2,
                     glb_url = ?3, usdz_url = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    session_id,
                    message,
                    outputs.glb_url,
                    outputs.usdz_url,
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| "failed to mark session ready")?;
            Ok(())
        })
        .await
    }

    pub async fn mark_error(&self, session_id: &str, message: &str) -> Result<()> {
        let session_id = session_id.to_string();
        let message = message.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE scan_sessions
                 SET status = 'error', message = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![session_id, message, Utc::now().to_rfc3339()],
            )
            .with_context(|| "failed to mark session errored")?;
            Ok(())
        })
        .await
    }
}

fn read_session(conn: &Connection, session_id: &str) -> Result<Option<ScanSession>> {
    let row = conn
        .query_row(
            "SELECT id, created_at, target_type, scale_meters, slots_total, status, progress,
                    message, upload_completed, upload_total, remote_scan_id, job_id,
                    glb_url, usdz_url, updated_at
             FROM scan_sessions WHERE id = ?1",
            params![session_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<u8>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<u32>>(8)?,
                    row.get::<_, Option<u32>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, Option<String>>(11)?,
                    row.get::<_, Option<String>>(12)?,
                    row.get::<_, Option<String>>(13)?,
                    row.get::<_, String>(14)?,
                ))
            },
        )
        .optional()
        .with_context(|| "failed to load scan session")?;

    let Some((
        id,
        created_at,
        target_type,
        scale_meters,
        slots_total,
        status,
        progress,
        message,
        upload_completed,
        upload_total,
        remote_scan_id,
        job_id,
        glb_url,
        usdz_url,
        updated_at,
    )) = row
    else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT slot, path, heading, captured_at
         FROM slot_images WHERE session_id = ?1 ORDER BY slot ASC",
    )?;
    let mut rows = stmt.query(params![id])?;
    let mut images = Vec::new();
    while let Some(row) = rows.next()? {
        images.push(SlotImage {
            slot: row.get(0)?,
            path: row.get(1)?,
            heading: row.get(2)?,
            captured_at: parse_datetime(&row.get::<_, String>(3)?)?,
        });
    }

    let outputs = if glb_url.is_some() || usdz_url.is_some() {
        Some(ScanOutputs { glb_url, usdz_url })
    } else {
        None
    };

    Ok(Some(ScanSession {
        id,
        created_at: parse_datetime(&created_at)?,
        target_type,
        scale_meters,
        slots_total,
        images,
        status: status_from_str(&status)?,
        progress,
        message,
        upload_completed,
        upload_total,
        remote_scan_id,
        job_id,
        outputs,
        updated_at: parse_datetime(&updated_at)?,
    }))
}
