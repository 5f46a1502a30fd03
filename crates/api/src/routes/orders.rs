//! Order endpoints.

use std::sync::Arc;

use application::{InMemoryPriceOracle, OrderService};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CustomerId, ItemId, OrderId, ProductId};
use domain::{Order, OrderStatus};
use persistence::{DatabaseUnitOfWork, Locker, LockingUnitOfWork, TransactionalStore};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Application order service over a storage backend and a locker.
pub type AppOrderService<S, L> =
    OrderService<DatabaseUnitOfWork<S>, LockingUnitOfWork<S, L>, InMemoryPriceOracle>;

/// Shared application state accessible from all handlers.
pub struct AppState<S, L> {
    pub orders: AppOrderService<S, L>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct AddProductRequest {
    pub product_id: String,
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status: OrderStatus,
}

// -- Response types --

#[derive(Serialize)]
pub struct ItemAddedResponse {
    pub item_id: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub id: String,
    pub product_id: String,
    pub price_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            customer_id: order.customer_id().to_string(),
            status: order.status().to_string(),
            items: order
                .items()
                .iter()
                .map(|item| OrderItemResponse {
                    id: item.id.to_string(),
                    product_id: item.product_id.to_string(),
                    price_cents: item.price.cents(),
                })
                .collect(),
            total_cents: order.total().cents(),
            created_at: order.created_at().to_rfc3339(),
            updated_at: order.updated_at().to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /customers/:customer_id/order/items — add a product to the
/// customer's open order at its current price.
#[tracing::instrument(skip(state, req))]
pub async fn add_product<S, L>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(customer_id): Path<String>,
    Json(req): Json<AddProductRequest>,
) -> Result<(StatusCode, Json<ItemAddedResponse>), ApiError>
where
    S: TransactionalStore + Clone + 'static,
    L: Locker + 'static,
{
    let customer_id: CustomerId = parse_id(&customer_id, "customer_id")?;
    let product_id: ProductId = parse_id(&req.product_id, "product_id")?;

    let item_id = state
        .orders
        .add_product_to_order(customer_id, product_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ItemAddedResponse {
            item_id: item_id.to_string(),
        }),
    ))
}

/// GET /orders/:id — load an active order with its items.
#[tracing::instrument(skip(state))]
pub async fn get<S, L>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: TransactionalStore + Clone + 'static,
    L: Locker + 'static,
{
    let order_id: OrderId = parse_id(&id, "order ID")?;
    let order = state.orders.order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PUT /orders/:id/status — move an order to another status.
#[tracing::instrument(skip(state, req))]
pub async fn set_status<S, L>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<String>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: TransactionalStore + Clone + 'static,
    L: Locker + 'static,
{
    let order_id: OrderId = parse_id(&id, "order ID")?;
    state.orders.set_order_status(order_id, req.status).await?;

    let order = state.orders.order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// DELETE /orders/:id/items/:item_id — remove an item from an open order.
#[tracing::instrument(skip(state))]
pub async fn remove_item<S, L>(
    State(state): State<Arc<AppState<S, L>>>,
    Path((id, item_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError>
where
    S: TransactionalStore + Clone + 'static,
    L: Locker + 'static,
{
    let order_id: OrderId = parse_id(&id, "order ID")?;
    let item_id: ItemId = parse_id(&item_id, "item ID")?;
    state.orders.remove_item(order_id, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /orders/:id — soft-delete an order.
#[tracing::instrument(skip(state))]
pub async fn delete<S, L>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    S: TransactionalStore + Clone + 'static,
    L: Locker + 'static,
{
    let order_id: OrderId = parse_id(&id, "order ID")?;
    state.orders.delete_order(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_id<T>(raw: &str, what: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr<Err = uuid::Error>,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {what}: {e}")))
}
