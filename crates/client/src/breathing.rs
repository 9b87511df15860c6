//! Guided breathing timer.
//!
//! A [`BreathingSession`] is a pure state machine advanced by fixed ticks;
//! [`BreathingDriver`] runs one on a tokio interval and publishes snapshots
//! through a watch channel.

use std::fmt;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Fixed step of the breathing timer.
pub const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Inhale,
    Hold,
    Exhale,
    Pause,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Inhale, Phase::Hold, Phase::Exhale, Phase::Pause];

    /// Next phase in the cycle and whether the cycle wrapped around.
    fn successor(self) -> (Phase, bool) {
        match self {
            Phase::Inhale => (Phase::Hold, false),
            Phase::Hold => (Phase::Exhale, false),
            Phase::Exhale => (Phase::Pause, false),
            Phase::Pause => (Phase::Inhale, true),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Inhale => "inhale",
            Phase::Hold => "hold",
            Phase::Exhale => "exhale",
            Phase::Pause => "pause",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("breathing pattern needs at least one non-zero phase")]
    AllZero,
    #[error("session duration must be greater than zero")]
    ZeroDuration,
    #[error("unknown breathing preset: {0}")]
    UnknownPreset(String),
}

/// Phase durations of one breathing cycle. Zero-length phases are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreathingPattern {
    inhale: Duration,
    hold: Duration,
    exhale: Duration,
    pause: Duration,
}

impl BreathingPattern {
    pub fn new(
        inhale: Duration,
        hold: Duration,
        exhale: Duration,
        pause: Duration,
    ) -> Result<Self, PatternError> {
        let pattern = Self {
            inhale,
            hold,
            exhale,
            pause,
        };
        if pattern.cycle_length().is_zero() {
            return Err(PatternError::AllZero);
        }
        Ok(pattern)
    }

    pub fn from_secs(inhale: u64, hold: u64, exhale: u64, pause: u64) -> Result<Self, PatternError> {
        Self::new(
            Duration::from_secs(inhale),
            Duration::from_secs(hold),
            Duration::from_secs(exhale),
            Duration::from_secs(pause),
        )
    }

    /// 4-4-4-4
    pub fn box_breathing() -> Self {
        Self::preset_unchecked(4, 4, 4, 4)
    }

    /// 4-7-8
    pub fn relaxing() -> Self {
        Self::preset_unchecked(4, 7, 8, 0)
    }

    /// 5 in, 5 out
    pub fn coherent() -> Self {
        Self::preset_unchecked(5, 0, 5, 0)
    }

    /// Looks up a preset by name: `box`, `relaxing` (or `4-7-8`), `coherent`.
    pub fn preset(name: &str) -> Result<Self, PatternError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "box" => Ok(Self::box_breathing()),
            "relaxing" | "4-7-8" => Ok(Self::relaxing()),
            "coherent" => Ok(Self::coherent()),
            other => Err(PatternError::UnknownPreset(other.to_string())),
        }
    }

    fn preset_unchecked(inhale: u64, hold: u64, exhale: u64, pause: u64) -> Self {
        Self {
            inhale: Duration::from_secs(inhale),
            hold: Duration::from_secs(hold),
            exhale: Duration::from_secs(exhale),
            pause: Duration::from_secs(pause),
        }
    }

    pub fn duration(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Inhale => self.inhale,
            Phase::Hold => self.hold,
            Phase::Exhale => self.exhale,
            Phase::Pause => self.pause,
        }
    }

    pub fn cycle_length(&self) -> Duration {
        Phase::ALL.iter().map(|p| self.duration(*p)).sum()
    }

    fn first_phase(&self) -> Phase {
        Phase::ALL
            .into_iter()
            .find(|p| !self.duration(*p).is_zero())
            .unwrap_or(Phase::Inhale)
    }

    /// Next non-empty phase after `phase`, and whether a cycle completed on
    /// the way.
    fn next_phase(&self, phase: Phase) -> (Phase, bool) {
        let mut current = phase;
        let mut wrapped = false;
        for _ in 0..Phase::ALL.len() {
            let (next, wrap) = current.successor();
            wrapped |= wrap;
            if !self.duration(next).is_zero() {
                return (next, wrapped);
            }
            current = next;
        }
        (phase, true)
    }
}

/// What a view renders for a breathing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreathingSnapshot {
    pub phase: Phase,
    pub phase_remaining: Duration,
    pub cycles_completed: u32,
    pub elapsed: Duration,
    pub remaining: Duration,
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct BreathingSession {
    pattern: BreathingPattern,
    total: Duration,
    phase: Phase,
    phase_elapsed: Duration,
    elapsed: Duration,
    cycles: u32,
    finished: bool,
}

impl BreathingSession {
    pub fn new(pattern: BreathingPattern, total: Duration) -> Result<Self, PatternError> {
        if total.is_zero() {
            return Err(PatternError::ZeroDuration);
        }
        Ok(Self {
            phase: pattern.first_phase(),
            pattern,
            total,
            phase_elapsed: Duration::ZERO,
            elapsed: Duration::ZERO,
            cycles: 0,
            finished: false,
        })
    }

    /// Advances the session by `dt`. Does nothing once finished.
    pub fn tick(&mut self, dt: Duration) -> BreathingSnapshot {
        if !self.finished {
            self.elapsed = self.elapsed.saturating_add(dt).min(self.total);
            self.phase_elapsed = self.phase_elapsed.saturating_add(dt);

            loop {
                let length = self.pattern.duration(self.phase);
                if self.phase_elapsed < length {
                    break;
                }
                self.phase_elapsed -= length;
                let (next, wrapped) = self.pattern.next_phase(self.phase);
                if wrapped {
                    self.cycles += 1;
                }
                self.phase = next;
            }

            if self.elapsed >= self.total {
                self.finished = true;
            }
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> BreathingSnapshot {
        BreathingSnapshot {
            phase: self.phase,
            phase_remaining: self
                .pattern
                .duration(self.phase)
                .saturating_sub(self.phase_elapsed),
            cycles_completed: self.cycles,
            elapsed: self.elapsed,
            remaining: self.total.saturating_sub(self.elapsed),
            finished: self.finished,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn pattern(&self) -> &BreathingPattern {
        &self.pattern
    }
}

/// Runs a [`BreathingSession`] on the fixed tick until it finishes or is
/// stopped.
#[derive(Debug)]
pub struct BreathingDriver {
    snapshot: watch::Receiver<BreathingSnapshot>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl BreathingDriver {
    pub fn start(mut session: BreathingSession) -> Self {
        let (tx, snapshot) = watch::channel(session.snapshot());
        let (stop, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + TICK, TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!("Breathing session stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let snapshot = session.tick(TICK);
                        let finished = snapshot.finished;
                        tx.send_replace(snapshot);
                        if finished {
                            debug!(cycles = session.snapshot().cycles_completed, "Breathing session finished");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            snapshot,
            stop: Some(stop),
            task,
        }
    }

    pub fn snapshot(&self) -> BreathingSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<BreathingSnapshot> {
        self.snapshot.clone()
    }

    /// Stops the timer; the last published snapshot stays readable.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Waits for the session to end. Returns the final snapshot, or `None`
    /// if it was stopped first.
    pub async fn finished(&self) -> Option<BreathingSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(|s| s.finished).await.ok()?.clone();
        Some(snapshot)
    }
}

impl Drop for BreathingDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
