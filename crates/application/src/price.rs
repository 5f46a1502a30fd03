//! Price oracle trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::ProductId;
use domain::Money;
use thiserror::Error;

/// Errors reported by a [`PriceOracle`].
#[derive(Debug, Error)]
pub enum PriceError {
    /// The product has no price.
    #[error("No price for product {0}")]
    NotFound(ProductId),

    /// The oracle could not be reached.
    #[error("Price oracle unavailable: {0}")]
    Unavailable(String),
}

/// Source of current product prices.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Returns the current price of a product.
    async fn actual_price(&self, product_id: ProductId) -> Result<Money, PriceError>;
}

#[derive(Debug, Default)]
struct InMemoryPriceState {
    prices: HashMap<ProductId, Money>,
    unavailable: bool,
    lookups: usize,
}

/// In-memory price catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceOracle {
    state: Arc<RwLock<InMemoryPriceState>>,
}

impl InMemoryPriceOracle {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog with the given prices.
    pub fn with_prices(prices: impl IntoIterator<Item = (ProductId, Money)>) -> Self {
        let oracle = Self::new();
        oracle.write().prices.extend(prices);
        oracle
    }

    /// Sets the price of a product.
    pub fn set_price(&self, product_id: ProductId, price: Money) {
        self.write().prices.insert(product_id, price);
    }

    /// Makes every lookup fail with [`PriceError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Returns the number of lookups served so far, failed ones included.
    pub fn lookup_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookups
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryPriceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PriceOracle for InMemoryPriceOracle {
    async fn actual_price(&self, product_id: ProductId) -> Result<Money, PriceError> {
        let mut state = self.write();
        state.lookups += 1;

        if state.unavailable {
            return Err(PriceError::Unavailable("price catalog offline".to_string()));
        }

        state
            .prices
            .get(&product_id)
            .copied()
            .ok_or(PriceError::NotFound(product_id))
    }
}
