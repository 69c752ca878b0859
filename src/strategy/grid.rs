//! Grid strategy
//!
//! The configured price range is split into N equal bands and a level sits
//! at the floor of each band, so the upper bound itself is never a level.
//! Levels above the starting price hold a sell intent, the rest a buy
//! intent. Each level fires at most once, and a sell only fires against
//! inventory the grid itself bought.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::types::{Strategy, StrategyConfig, StrategyContext, StrategyKind};
use crate::error::{Error, Result};
use crate::types::Side;

const INVENTORY_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Serialize)]
pub struct GridLevel {
    pub price: f64,
    pub intent: Side,
    pub fired: bool,
}

/// Level bookkeeping, independent of execution
#[derive(Debug, Clone)]
pub struct GridBook {
    levels: Vec<GridLevel>,
    amount_per_level: f64,
    inventory: f64,
}

impl GridBook {
    /// `count` levels at `lower + i * (upper - lower) / count`
    pub fn new(lower: f64, upper: f64, count: usize, start_price: f64, amount_per_level: f64) -> Self {
        let count = count.max(1);
        let step = (upper - lower) / count as f64;
        let levels = (0..count)
            .map(|i| {
                let price = lower + step * i as f64;
                GridLevel {
                    price,
                    intent: if price > start_price { Side::Sell } else { Side::Buy },
                    fired: false,
                }
            })
            .collect();
        Self {
            levels,
            amount_per_level,
            inventory: 0.0,
        }
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn inventory(&self) -> f64 {
        self.inventory
    }

    pub fn amount_per_level(&self) -> f64 {
        self.amount_per_level
    }

    /// Levels whose intent is due at `price`. Sells that lack inventory stay
    /// pending and are not returned.
    pub fn due(&self, price: f64) -> Vec<usize> {
        let mut available = self.inventory;
        let mut due = Vec::new();
        // Buys first so a same-tick buy can back a sell
        for (i, level) in self.levels.iter().enumerate() {
            if !level.fired && level.intent == Side::Buy && price <= level.price {
                available += self.amount_per_level;
                due.push(i);
            }
        }
        for (i, level) in self.levels.iter().enumerate() {
            if !level.fired
                && level.intent == Side::Sell
                && price >= level.price
                && available + INVENTORY_EPSILON >= self.amount_per_level
            {
                available -= self.amount_per_level;
                due.push(i);
            }
        }
        due
    }

    /// Record that level `index` executed
    pub fn fill(&mut self, index: usize) {
        let Some(level) = self.levels.get_mut(index) else {
            return;
        };
        if level.fired {
            return;
        }
        level.fired = true;
        match level.intent {
            Side::Buy => self.inventory += self.amount_per_level,
            Side::Sell => self.inventory = (self.inventory - self.amount_per_level).max(0.0),
        }
    }
}

pub struct Grid {
    config: StrategyConfig,
    book: Option<GridBook>,
}

impl Grid {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config, book: None }
    }
}

#[async_trait]
impl Strategy for Grid {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Grid
    }

    async fn init(&mut self, ctx: &StrategyContext) -> Result<()> {
        let (Some(lower), Some(upper), Some(count)) = (
            self.config.lower_price,
            self.config.upper_price,
            self.config.grid_levels,
        ) else {
            return Err(Error::InvalidConfiguration("grid range not configured".to_string()));
        };

        let price = ctx.price().await?;
        let total = ctx.trade_amount(self.config.amount.map(|a| a * count as f64), 0.0);
        let book = GridBook::new(lower, upper, count, price, total / count as f64);
        info!(
            "Grid on {}:{}: {} levels {}..{}, {} per level, start {}",
            ctx.network,
            ctx.token,
            count,
            lower,
            upper,
            book.amount_per_level(),
            price
        );
        self.book = Some(book);
        Ok(())
    }

    async fn tick(&mut self, ctx: &StrategyContext) -> Result<()> {
        let Some(book) = self.book.as_mut() else {
            return Err(Error::Internal("grid not initialised".to_string()));
        };
        if book.amount_per_level() <= 0.0 {
            return Ok(());
        }

        let price = ctx.price().await?;
        for index in book.due(price) {
            let level = book.levels()[index].clone();
            let amount = book.amount_per_level();
            let result = match level.intent {
                Side::Buy => ctx.screened_buy(amount, price).await,
                Side::Sell => ctx.sell(amount, price).await,
            };
            match result {
                Ok(_) => {
                    book.fill(index);
                    info!(
                        "Grid {} at level {} on {}:{} (price {}, inventory {})",
                        level.intent,
                        level.price,
                        ctx.network,
                        ctx.token,
                        price,
                        book.inventory()
                    );
                }
                Err(e) => {
                    warn!("Grid {} at level {} failed: {}", level.intent, level.price, e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn stop(&mut self, ctx: &StrategyContext) -> Result<()> {
        if let Some(book) = &self.book {
            let pending = book.levels().iter().filter(|l| !l.fired).count();
            debug!(
                "Grid on {}:{} stopped with {} inventory, {} levels pending",
                ctx.network,
                ctx.token,
                book.inventory(),
                pending
            );
        }
        Ok(())
    }
}
