//! Application order service.

use common::{CustomerId, ItemId, OrderId, ProductId};
use domain::{
    DomainError, FindSpec, Order, OrderError, OrderRepository, OrderService as DomainOrderService,
    OrderStatus, RepositoryError,
};
use persistence::{LockableUnitOfWork, RepositoryProvider, UnitOfWork};

use crate::error::ApplicationError;
use crate::price::PriceOracle;

fn customer_lock(customer_id: CustomerId) -> String {
    format!("customer_{customer_id}")
}

fn order_lock(order_id: OrderId) -> String {
    format!("order_{order_id}")
}

/// Order use cases over a plain unit of work, a locking unit of work and a
/// price oracle.
///
/// Each use case holds at most one named lock at a time.
pub struct OrderService<U, L, P> {
    uow: U,
    luow: L,
    prices: P,
}

impl<U, L, P> OrderService<U, L, P>
where
    U: UnitOfWork,
    L: LockableUnitOfWork,
    P: PriceOracle,
{
    /// Creates a new application order service.
    pub fn new(uow: U, luow: L, prices: P) -> Self {
        Self { uow, luow, prices }
    }

    /// Returns a reference to the price oracle.
    pub fn prices(&self) -> &P {
        &self.prices
    }

    /// Adds a product at its current price to the customer's open order,
    /// opening one if the customer has none.
    ///
    /// Returns the ID of the new item.
    #[tracing::instrument(skip(self))]
    pub async fn add_product_to_order(
        &self,
        customer_id: CustomerId,
        product_id: ProductId,
    ) -> Result<ItemId, ApplicationError> {
        let (order_id, created) = self
            .luow
            .execute(&customer_lock(customer_id), |provider| async move {
                let orders = provider.order_repository();
                let open = FindSpec::by_customer(customer_id).with_status(OrderStatus::Open);

                match orders.find(open).await {
                    Ok(order) => Ok::<_, ApplicationError>((order.id(), false)),
                    Err(RepositoryError::NotFound) => {
                        let service = DomainOrderService::new(orders, provider.event_dispatcher());
                        let order_id = service.create_order(customer_id).await?;
                        Ok((order_id, true))
                    }
                    Err(e) => Err(ApplicationError::from(DomainError::from(e))),
                }
            })
            .await?;

        if created {
            metrics::counter!("orders_created_total").increment(1);
            tracing::info!(%order_id, "opened order for customer");
        }

        let price = self.prices.actual_price(product_id).await.map_err(|e| {
            tracing::warn!(error = %e, "price lookup failed");
            e
        })?;

        let item_id = self
            .luow
            .execute(&order_lock(order_id), |provider| async move {
                let service =
                    DomainOrderService::new(provider.order_repository(), provider.event_dispatcher());
                Ok::<_, ApplicationError>(service.add_item(order_id, product_id, price).await?)
            })
            .await?;

        metrics::counter!("order_items_added_total").increment(1);
        tracing::info!(%order_id, %item_id, %price, "product added to order");
        Ok(item_id)
    }

    /// Removes an item from an open order.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(
        &self,
        order_id: OrderId,
        item_id: ItemId,
    ) -> Result<(), ApplicationError> {
        self.luow
            .execute(&order_lock(order_id), |provider| async move {
                let service =
                    DomainOrderService::new(provider.order_repository(), provider.event_dispatcher());
                Ok::<_, ApplicationError>(service.delete_item(order_id, item_id).await?)
            })
            .await
    }

    /// Moves an order to another status.
    #[tracing::instrument(skip(self))]
    pub async fn set_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<(), ApplicationError> {
        self.luow
            .execute(&order_lock(order_id), |provider| async move {
                let service =
                    DomainOrderService::new(provider.order_repository(), provider.event_dispatcher());
                Ok::<_, ApplicationError>(service.set_status(order_id, status).await?)
            })
            .await?;

        tracing::info!(%order_id, %status, "order status changed");
        Ok(())
    }

    /// Soft-deletes an order.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<(), ApplicationError> {
        self.luow
            .execute(&order_lock(order_id), |provider| async move {
                let service =
                    DomainOrderService::new(provider.order_repository(), provider.event_dispatcher());
                Ok::<_, ApplicationError>(service.delete_order(order_id).await?)
            })
            .await
    }

    /// Returns an active order with its items.
    #[tracing::instrument(skip(self))]
    pub async fn order(&self, order_id: OrderId) -> Result<Order, ApplicationError> {
        self.uow
            .execute(|provider| async move {
                provider
                    .order_repository()
                    .find(FindSpec::by_id(order_id))
                    .await
                    .map_err(|e| match e {
                        RepositoryError::NotFound => ApplicationError::from(OrderError::NotFound(order_id)),
                        e => ApplicationError::from(DomainError::from(e)),
                    })
            })
            .await
    }
}
