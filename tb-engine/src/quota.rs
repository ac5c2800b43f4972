use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// When the YouTube API's daily quota lifts: midnight US-Pacific, expressed
/// as a fixed UTC instant so the host's time zone never matters.
pub const DEFAULT_RESET_SCHEDULE: &str = "0 0 8 * * *";

#[derive(Debug, Clone, Copy)]
struct PauseState {
    resume_at: DateTime<Utc>,
    resume_instant: Instant,
}

/// Process-wide dispatch gate shared by every quota-drawing remote call.
///
/// Starts Running; a quota-exhausted response pauses it until the next
/// scheduled reset. Waiters sleep on the stored deadline and the first one
/// past it flips the gate back, so resumption is purely time-driven. Pausing
/// while already paused never shortens the scheduled resume.
pub struct QuotaGate {
    schedule: Schedule,
    paused: Mutex<Option<PauseState>>,
}

impl QuotaGate {
    pub fn new(schedule: Schedule) -> Self {
        Self {
            schedule,
            paused: Mutex::new(None),
        }
    }

    pub fn with_default_schedule() -> Self {
        let schedule =
            Schedule::from_str(DEFAULT_RESET_SCHEDULE).expect("default reset schedule parses");
        Self::new(schedule)
    }

    /// Suspends until dispatch is allowed. Returns immediately while Running.
    pub async fn acquire(&self) {
        loop {
            let deadline = {
                let mut paused = self.paused.lock().await;
                match *paused {
                    None => return,
                    Some(state) => {
                        if Instant::now() >= state.resume_instant {
                            *paused = None;
                            tracing::info!("quota pause elapsed; dispatch resumed");
                            return;
                        }
                        state.resume_instant
                    }
                }
            };
            tokio::time::sleep_until(deadline).await;
        }
    }

    /// Pauses dispatch until the next scheduled quota reset and returns that
    /// instant (or the later, already-scheduled one).
    pub async fn pause_until_next_reset(&self) -> DateTime<Utc> {
        let resume_at = self
            .schedule
            .upcoming(Utc)
            .next()
            .unwrap_or_else(|| Utc::now() + chrono::Duration::days(1));
        self.pause_until(resume_at).await
    }

    pub async fn pause_until(&self, resume_at: DateTime<Utc>) -> DateTime<Utc> {
        let wait = (resume_at - Utc::now()).to_std().unwrap_or_default();
        let resume_instant = Instant::now() + wait;
        let mut paused = self.paused.lock().await;
        match *paused {
            Some(existing) if existing.resume_instant >= resume_instant => existing.resume_at,
            _ => {
                tracing::warn!(%resume_at, "quota exhausted; pausing all dispatch");
                *paused = Some(PauseState {
                    resume_at,
                    resume_instant,
                });
                resume_at
            }
        }
    }

    pub async fn is_paused(&self) -> bool {
        let paused = *self.paused.lock().await;
        paused.is_some_and(|state| Instant::now() < state.resume_instant)
    }

    /// The scheduled resume instant, while paused.
    pub async fn resume_at(&self) -> Option<DateTime<Utc>> {
        let paused = *self.paused.lock().await;
        paused
            .filter(|state| Instant::now() < state.resume_instant)
            .map(|state| state.resume_at)
    }
}
