//! Haggle surface integration.
//!
//! Defines the `HaggleSurface` trait: the boundary to whatever drives the
//! trade window (a live game client, or the scripted replay in
//! [`scripted`]). The decision core never computes coordinates or injects
//! input itself; it asks the surface to hover, click, scroll and confirm,
//! and reads back items, stock, tooltips and the offer window.

pub mod scripted;
pub mod tooltip;

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{HaggleStock, ItemSnapshot};
use tooltip::TooltipNode;

/// Counter-offer range shown while negotiating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferWindow {
    pub min: u32,
    pub max: u32,
    pub current: u32,
}

/// Abstraction over the trade window.
///
/// All methods take `&self`; implementations keep their own interior state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HaggleSurface: Send + Sync {
    /// Items currently offered, in slot order.
    async fn scan_items(&self) -> Result<Vec<ItemSnapshot>>;

    /// Artifact and coin stock shown in the window.
    async fn stock(&self) -> Result<HaggleStock>;

    /// Move the pointer over an item slot.
    async fn hover_slot(&self, slot: usize) -> Result<()>;

    /// Tooltip of a slot, if one is currently rendered.
    async fn tooltip(&self, slot: usize) -> Result<Option<TooltipNode>>;

    /// Click an item slot, which should open the negotiation surface.
    async fn click_slot(&self, slot: usize) -> Result<()>;

    async fn is_negotiation_open(&self) -> Result<bool>;

    /// Offer triple, if the negotiation surface is open.
    async fn offer(&self) -> Result<Option<OfferWindow>>;

    /// Lower the current offer by `steps` increments.
    async fn scroll_down(&self, steps: u32) -> Result<()>;

    /// Submit the current offer.
    async fn confirm(&self) -> Result<()>;

    /// Spend a coin to replace the offered batch.
    async fn reroll(&self) -> Result<()>;
}

/// Poll `read` until it yields a value or `timeout` expires.
pub async fn poll_for<T, F, Fut>(timeout: Duration, poll: Duration, mut read: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = read().await? {
            return Ok(Some(value));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(poll.max(Duration::from_millis(1))).await;
    }
}

/// Poll `check` until it reports true or `timeout` expires.
///
/// Returns `Ok(false)` on expiry; the caller decides whether that is fatal.
pub async fn wait_until<F, Fut>(timeout: Duration, poll: Duration, mut check: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let hit = poll_for(timeout, poll, || {
        let pending = check();
        async move { Ok::<_, anyhow::Error>(pending.await?.then_some(())) }
    })
    .await?;
    Ok(hit.is_some())
}
