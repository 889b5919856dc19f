use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::heading::{slot_for_heading, HeadingState};
use crate::models::SlotImage;
use crate::store::{Database, ImageVault};

use super::{CaptureConfig, CaptureFeedback, PhotoSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GateDecision {
    pub capture: bool,
    pub hold_steady: bool,
}

/// Pure gate over one tick's observations. In-flight exclusion is structural:
/// the loop awaits each capture before the next tick is processed.
pub(crate) fn evaluate_gate(
    slot_captured: bool,
    in_cooldown: bool,
    stable_enough: bool,
) -> GateDecision {
    let capture = !slot_captured && !in_cooldown && stable_enough;
    GateDecision {
        capture,
        hold_steady: !slot_captured && !capture,
    }
}

pub(crate) async fn capture_loop(
    session_id: String,
    config: CaptureConfig,
    db: Database,
    vault: ImageVault,
    camera: Arc<dyn PhotoSource>,
    heading_rx: watch::Receiver<HeadingState>,
    feedback_tx: watch::Sender<CaptureFeedback>,
    cancel_token: CancellationToken,
) {
    let (slots_total, mut captured) = match load_captured_slots(&db, &session_id).await {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("auto-capture cannot start for session {session_id}: {err:?}");
            return;
        }
    };

    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_accepted: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let heading_state = *heading_rx.borrow();
                let slot = slot_for_heading(heading_state.heading, slots_total);

                let slot_captured = captured.contains(&slot);
                let in_cooldown = last_accepted
                    .is_some_and(|at| at.elapsed() < config.accept_interval);
                let stable_enough = heading_state.stable_for_ms >= config.stable_required_ms;
                let decision = evaluate_gate(slot_captured, in_cooldown, stable_enough);

                let _ = feedback_tx.send(CaptureFeedback {
                    current_slot: Some(slot),
                    hold_steady: decision.hold_steady,
                    is_capturing: decision.capture,
                    captured_count: captured.len() as u32,
                    ring_complete: captured.len() as u32 >= slots_total,
                });

                if !decision.capture {
                    continue;
                }

                match capture_slot(&session_id, slot, heading_state, &db, &vault, &camera).await {
                    Ok(true) => {
                        captured.insert(slot);
                        last_accepted = Some(Instant::now());
                        info!(
                            "captured slot {slot} for session {session_id} ({}/{slots_total})",
                            captured.len()
                        );
                        let _ = feedback_tx.send(CaptureFeedback {
                            current_slot: Some(slot),
                            hold_steady: false,
                            is_capturing: false,
                            captured_count: captured.len() as u32,
                            ring_complete: captured.len() as u32 >= slots_total,
                        });
                    }
                    Ok(false) => {
                        // Session disappeared under us; nothing left to do.
                        info!("session {session_id} gone, stopping auto-capture");
                        break;
                    }
                    Err(err) => {
                        // Recoverable: surface hold-steady, retry on a later tick.
                        warn!("capture failed for slot {slot} of session {session_id}: {err:?}");
                        let _ = feedback_tx.send(CaptureFeedback {
                            current_slot: Some(slot),
                            hold_steady: true,
                            is_capturing: false,
                            captured_count: captured.len() as u32,
                            ring_complete: captured.len() as u32 >= slots_total,
                        });
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("auto-capture loop shutting down for session {session_id}");
                break;
            }
        }
    }
}

async fn load_captured_slots(db: &Database, session_id: &str) -> Result<(u32, BTreeSet<u32>)> {
    let session = db
        .get_session(session_id)
        .await?
        .ok_or_else(|| anyhow!("scan session {session_id} not found"))?;
    let captured = session.images.iter().map(|image| image.slot).collect();
    Ok((session.slots_total, captured))
}

/// Returns Ok(false) when the session no longer exists (silent abort).
async fn capture_slot(
    session_id: &str,
    slot: u32,
    heading_state: HeadingState,
    db: &Database,
    vault: &ImageVault,
    camera: &Arc<dyn PhotoSource>,
) -> Result<bool> {
    if db.get_session(session_id).await?.is_none() {
        return Ok(false);
    }

    let camera = Arc::clone(camera);
    let source_path = tokio::task::spawn_blocking(move || camera.take_photo())
        .await
        .context("photo capture worker join failed")?
        .context("photo acquisition failed")?;

    vault.ensure_session_dirs(session_id)?;
    let target_path = vault.slot_image_path(session_id, slot);

    // Overwrite any stale file from an earlier pass over this slot.
    match tokio::fs::remove_file(&target_path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to clear {}", target_path.display()))
        }
    }

    tokio::fs::copy(&source_path, &target_path)
        .await
        .with_context(|| format!("failed to persist capture to {}", target_path.display()))?;
    if let Err(err) = tokio::fs::remove_file(&source_path).await {
        warn!("failed to clean staging photo {}: {err}", source_path.display());
    }

    let image = SlotImage {
        slot,
        path: target_path.to_string_lossy().into_owned(),
        heading: heading_state.heading,
        captured_at: Utc::now(),
    };
    db.upsert_slot_image(session_id, &image).await?;

    Ok(true)
}
