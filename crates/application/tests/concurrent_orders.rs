//! Concurrency properties of the order use cases over the in-memory backend.

use std::sync::Arc;

use application::{ApplicationError, InMemoryPriceOracle, OrderService};
use common::{CustomerId, ProductId};
use domain::{Money, OrderStatus};
use futures_util::future::join_all;
use persistence::{DatabaseUnitOfWork, InMemoryDatabase, InMemoryLocker, LockingUnitOfWork};

type Service = OrderService<
    DatabaseUnitOfWork<InMemoryDatabase>,
    LockingUnitOfWork<InMemoryDatabase, InMemoryLocker>,
    InMemoryPriceOracle,
>;

fn setup(products: &[(ProductId, i64)]) -> (Arc<Service>, InMemoryDatabase) {
    let db = InMemoryDatabase::new();
    let prices = InMemoryPriceOracle::with_prices(
        products
            .iter()
            .map(|(id, cents)| (*id, Money::from_cents(*cents))),
    );
    let service = OrderService::new(
        DatabaseUnitOfWork::new(db.clone()),
        LockingUnitOfWork::new(db.clone(), InMemoryLocker::new()),
        prices,
    );
    (Arc::new(service), db)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_for_one_customer_share_one_open_order() {
    let product_id = ProductId::new();
    let (service, db) = setup(&[(product_id, 500)]);
    let customer_id = CustomerId::new();

    let calls = (0..20).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.add_product_to_order(customer_id, product_id).await })
    });
    let item_ids: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let orders = db.orders().await;
    let open: Vec<_> = orders
        .iter()
        .filter(|order| order.customer_id() == customer_id && order.status() == OrderStatus::Open)
        .collect();
    assert_eq!(open.len(), 1);

    let order = open[0];
    assert_eq!(order.items().len(), item_ids.len());
    assert!(item_ids.iter().all(|id| order.item(*id).is_some()));
    assert_eq!(order.total(), Money::from_cents(500 * 20));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_products_added_at_once_are_both_kept() {
    let (first, second) = (ProductId::new(), ProductId::new());
    let (service, db) = setup(&[(first, 999), (second, 1)]);
    let customer_id = CustomerId::new();

    let (a, b) = tokio::join!(
        service.add_product_to_order(customer_id, first),
        service.add_product_to_order(customer_id, second),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let orders = db.orders().await;
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.item(a).map(|item| item.product_id), Some(first));
    assert_eq!(order.item(b).map(|item| item.product_id), Some(second));
    assert_eq!(order.total(), Money::from_cents(1000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_customers_get_separate_orders() {
    let product_id = ProductId::new();
    let (service, db) = setup(&[(product_id, 100)]);
    let customers: Vec<_> = (0..5).map(|_| CustomerId::new()).collect();

    let calls = customers.iter().map(|customer_id| {
        let service = service.clone();
        let customer_id = *customer_id;
        tokio::spawn(async move { service.add_product_to_order(customer_id, product_id).await })
    });
    for joined in join_all(calls).await {
        joined.unwrap().unwrap();
    }

    let orders = db.orders().await;
    assert_eq!(orders.len(), customers.len());
    for customer_id in customers {
        assert_eq!(
            orders
                .iter()
                .filter(|order| order.customer_id() == customer_id)
                .count(),
            1
        );
    }
}

#[tokio::test]
async fn failed_call_does_not_block_the_next_one() {
    let product_id = ProductId::new();
    let (service, db) = setup(&[(product_id, 100)]);
    let customer_id = CustomerId::new();

    db.set_fail_on_dispatch(true);
    let err = service
        .add_product_to_order(customer_id, product_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(_)));
    assert!(db.orders().await.is_empty());

    db.set_fail_on_dispatch(false);
    let item_id = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        service.add_product_to_order(customer_id, product_id),
    )
    .await
    .unwrap()
    .unwrap();

    let order = &db.orders().await[0];
    assert!(order.item(item_id).is_some());
}

#[tokio::test]
async fn events_are_recorded_for_each_mutation() {
    let product_id = ProductId::new();
    let (service, db) = setup(&[(product_id, 100)]);
    let customer_id = CustomerId::new();

    service
        .add_product_to_order(customer_id, product_id)
        .await
        .unwrap();
    service
        .add_product_to_order(customer_id, product_id)
        .await
        .unwrap();

    let types: Vec<_> = db
        .outbox()
        .await
        .into_iter()
        .map(|message| message.event_type)
        .collect();
    assert_eq!(
        types,
        vec!["OrderCreated", "OrderItemChanged", "OrderItemChanged"]
    );
}
