//! Negotiation engine.
//!
//! Drives the counter-offer for one priced item. The engine is a small state
//! machine: each call to [`Negotiation::step`] performs one unit of surface
//! interaction (a click, a bounded wait, a read, a scroll or a confirm) and
//! advances the phase. [`negotiate`] is the scheduler: it checks the fatal
//! flag between steps and runs until a terminal phase.
//!
//! Rounds are indexed by attempt `a` starting at 1. Each round reads the
//! offer window, computes a target from the attempt's multiplier, scrolls
//! the offer down toward it (coarse steps in round 1, fine afterwards) and
//! confirms. A window that closes after confirming means the item was
//! bought; one still open starts the next round, up to three.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::FatalFlag;
use crate::config::{HaggleConfig, MultiplierMode, TimeoutsConfig};
use crate::surface::{wait_until, HaggleSurface, OfferWindow};
use crate::types::{ArtifactCost, ArtifactKind, HaggleError};

/// Rounds before an open window is given up on.
pub const MAX_ATTEMPTS: u32 = 3;

const COARSE_STEP: u32 = 10;
const FINE_STEP: u32 = 1;

/// Offer the engine scrolls toward in round `attempt`.
///
/// Always within `[min, max]` for a well-formed window.
pub fn target_offer(mode: MultiplierMode, window: &OfferWindow, multiplier: f64) -> u32 {
    let m = multiplier.clamp(0.0, 1.0);
    let (min, max) = (window.min, window.max.max(window.min));
    let raw = match mode {
        MultiplierMode::MinToMax => {
            let span = (max - min) as f64;
            min as f64 + (span * m).ceil()
        }
        MultiplierMode::MaxRelative => (max as f64 * m).floor(),
    };
    (raw as u32).clamp(min, max)
}

/// Scroll step for a round.
pub fn step_size(attempt: u32) -> u32 {
    if attempt <= 1 {
        COARSE_STEP
    } else {
        FINE_STEP
    }
}

/// Waits applied between surface interactions.
#[derive(Debug, Clone, Copy)]
pub struct NegotiationTiming {
    /// How long the surface gets to open after the click.
    pub open_timeout: Duration,
    pub poll_interval: Duration,
    /// Pause before reading a round's offer and before confirming.
    pub settle: Duration,
    /// Pause after confirming before checking whether the window closed.
    pub after_confirm: Duration,
}

impl NegotiationTiming {
    pub fn from_config(timeouts: &TimeoutsConfig, hover_delay_ms: u64) -> Self {
        Self {
            open_timeout: Duration::from_millis(timeouts.negotiation_open_ms),
            poll_interval: Duration::from_millis(timeouts.poll_interval_ms),
            settle: Duration::from_millis(hover_delay_ms),
            after_confirm: Duration::from_millis(hover_delay_ms * 10),
        }
    }

    pub fn immediate() -> Self {
        Self {
            open_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
            settle: Duration::ZERO,
            after_confirm: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The click never produced an open negotiation surface.
    NeverOpened,
    /// Still open after the last confirm.
    AttemptsExhausted,
    /// The surface opened but never reported an offer window.
    OfferUnreadable,
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbandonReason::NeverOpened => write!(f, "negotiation window never opened"),
            AbandonReason::AttemptsExhausted => {
                write!(f, "negotiation window still open after {MAX_ATTEMPTS} attempts")
            }
            AbandonReason::OfferUnreadable => write!(f, "negotiation offer window unreadable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Clicking,
    AwaitingOpen,
    /// Start of a round.
    Opened,
    Adjusting,
    Confirming,
    Confirmed(ArtifactCost),
    Abandoned(AbandonReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    Bought { paid: ArtifactCost, attempts: u32 },
    Abandoned(AbandonReason),
}

/// One negotiation in progress.
pub struct Negotiation {
    item: String,
    slot: usize,
    kind: ArtifactKind,
    config: HaggleConfig,
    timing: NegotiationTiming,
    phase: Phase,
    attempt: u32,
    target: u32,
    window: Option<OfferWindow>,
    /// Scrolls issued this round and the most the round may issue.
    scrolls: u32,
    scroll_budget: u32,
}

impl Negotiation {
    pub fn new(
        item: impl Into<String>,
        slot: usize,
        kind: ArtifactKind,
        config: HaggleConfig,
        timing: NegotiationTiming,
    ) -> Self {
        Self {
            item: item.into(),
            slot,
            kind,
            config,
            timing,
            phase: Phase::Clicking,
            attempt: 0,
            target: 0,
            window: None,
            scrolls: 0,
            scroll_budget: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn outcome(&self) -> Option<NegotiationOutcome> {
        match self.phase {
            Phase::Confirmed(paid) => Some(NegotiationOutcome::Bought {
                paid,
                attempts: self.attempt,
            }),
            Phase::Abandoned(reason) => Some(NegotiationOutcome::Abandoned(reason)),
            _ => None,
        }
    }

    /// Perform one interaction and advance. Returns the outcome once terminal.
    pub async fn step(
        &mut self,
        surface: &dyn HaggleSurface,
    ) -> Result<Option<NegotiationOutcome>, HaggleError> {
        match self.phase {
            Phase::Clicking => {
                surface.click_slot(self.slot).await.map_err(|e| self.fatal(e))?;
                self.phase = Phase::AwaitingOpen;
            }
            Phase::AwaitingOpen => {
                let opened = wait_until(self.timing.open_timeout, self.timing.poll_interval, move || {
                    surface.is_negotiation_open()
                })
                .await
                .map_err(|e| self.fatal(e))?;
                if opened {
                    self.attempt = 1;
                    self.phase = Phase::Opened;
                } else {
                    warn!(item = %self.item, "Negotiation window did not open");
                    self.phase = Phase::Abandoned(AbandonReason::NeverOpened);
                }
            }
            Phase::Opened => {
                sleep(self.timing.settle).await;
                match surface.offer().await.map_err(|e| self.fatal(e))? {
                    Some(window) => {
                        let m = self.config.multiplier(self.attempt);
                        self.target = target_offer(self.config.multiplier_mode, &window, m);
                        self.window = Some(window);
                        self.scrolls = 0;
                        self.scroll_budget =
                            window.current.saturating_sub(window.min) / step_size(self.attempt) + 1;
                        debug!(
                            item = %self.item,
                            attempt = self.attempt,
                            min = window.min,
                            max = window.max,
                            current = window.current,
                            target = self.target,
                            "Negotiation round"
                        );
                        self.phase = Phase::Adjusting;
                    }
                    None if self.window.is_some() => self.phase = Phase::Confirming,
                    None => {
                        warn!(item = %self.item, "Negotiation opened without an offer window");
                        self.phase = Phase::Abandoned(AbandonReason::OfferUnreadable);
                    }
                }
            }
            Phase::Adjusting => {
                let Some(window) = self.window else {
                    self.phase = Phase::Abandoned(AbandonReason::OfferUnreadable);
                    return Ok(None);
                };
                let wants_lower = window.current > self.target && window.current > window.min;
                let open = surface.is_negotiation_open().await.map_err(|e| self.fatal(e))?;
                let budget_left = self.scrolls < self.scroll_budget;
                if wants_lower && open && budget_left && self.attempt <= MAX_ATTEMPTS {
                    surface
                        .scroll_down(step_size(self.attempt))
                        .await
                        .map_err(|e| self.fatal(e))?;
                    self.scrolls += 1;
                    match surface.offer().await.map_err(|e| self.fatal(e))? {
                        Some(next) if next.current >= window.current => {
                            debug!(item = %self.item, current = next.current, "Offer stopped moving");
                            self.window = Some(next);
                            self.phase = Phase::Confirming;
                        }
                        Some(next) => self.window = Some(next),
                        None => self.phase = Phase::Confirming,
                    }
                } else {
                    self.phase = Phase::Confirming;
                }
            }
            Phase::Confirming => {
                let Some(window) = self.window else {
                    self.phase = Phase::Abandoned(AbandonReason::OfferUnreadable);
                    return Ok(self.outcome());
                };
                sleep(self.timing.settle).await;
                surface.confirm().await.map_err(|e| self.fatal(e))?;
                sleep(self.timing.after_confirm).await;
                let still_open = surface.is_negotiation_open().await.map_err(|e| self.fatal(e))?;
                if !still_open {
                    let paid = ArtifactCost::new(self.kind, window.current);
                    info!(item = %self.item, paid = %paid, attempts = self.attempt, "Offer accepted");
                    self.phase = Phase::Confirmed(paid);
                } else if self.attempt >= MAX_ATTEMPTS {
                    warn!(item = %self.item, "Offer still refused after final attempt");
                    self.phase = Phase::Abandoned(AbandonReason::AttemptsExhausted);
                } else {
                    self.attempt += 1;
                    self.phase = Phase::Opened;
                }
            }
            Phase::Confirmed(_) | Phase::Abandoned(_) => {}
        }
        Ok(self.outcome())
    }

    fn fatal(&self, e: anyhow::Error) -> HaggleError {
        HaggleError::FatalInteraction {
            item: self.item.clone(),
            message: format!("{e:#}"),
            dump: format!("phase={:?} attempt={} window={:?}", self.phase, self.attempt, self.window),
        }
    }
}

async fn sleep(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Run a negotiation to completion, stopping early if `fatal` is raised.
pub async fn negotiate(
    negotiation: &mut Negotiation,
    surface: &dyn HaggleSurface,
    fatal: &FatalFlag,
) -> Result<NegotiationOutcome, HaggleError> {
    loop {
        if fatal.is_raised() {
            return Err(HaggleError::Cancelled);
        }
        if let Some(outcome) = negotiation.step(surface).await? {
            return Ok(outcome);
        }
    }
}
