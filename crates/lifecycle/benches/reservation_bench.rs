use common::{Money, WarehouseId};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{CancelOrder, CreateOrder, Inventory, InventoryKey, NewOrderLine};
use futures_util::future::join_all;
use lifecycle::collaborators::{Customer, Product};
use lifecycle::{InMemoryCollaborators, LifecycleOps, OrderService, ServiceConfig};
use store::InMemoryRepository;

use std::sync::Arc;

struct Setup {
    service: Arc<OrderService<InMemoryRepository>>,
    cmd: CreateOrder,
    stock: Vec<Inventory>,
}

impl Setup {
    /// Starts over before the per-year order number sequence runs out.
    async fn recycle(&self) {
        let repo = self.service.repository();
        if repo.order_count().await > RECYCLE_AFTER {
            repo.clear().await;
            repo.seed_inventory(self.stock.clone()).await;
        }
    }
}

const RECYCLE_AFTER: usize = 500_000;

/// A service with `products` products, each stocked deep enough that no
/// iteration runs out.
async fn setup(products: usize) -> Setup {
    let doubles = InMemoryCollaborators::new();
    let customer = Customer::active("Bench");
    let customer_id = customer.id;
    doubles.customers.add_customer(customer);
    let address_id = doubles.customers.add_address(customer_id, "Benchville");

    let warehouse_id = WarehouseId::new();
    let repo = InMemoryRepository::new();
    let mut cmd = CreateOrder::new(customer_id, address_id, address_id, "USD");
    let mut stock = Vec::with_capacity(products);
    for i in 0..products {
        let product = Product::new(format!("SKU-{i:03}"), Money::from_units(10), warehouse_id);
        stock.push(Inventory::new(
            InventoryKey::new(warehouse_id, product.id),
            u32::MAX / 2,
            Money::from_units(4),
        ));
        cmd = cmd.with_item(NewOrderLine::new(product.id, 1));
        doubles.products.add_product(product);
    }
    repo.seed_inventory(stock.clone()).await;

    Setup {
        service: Arc::new(OrderService::new(repo, doubles.bundle(), ServiceConfig::default())),
        cmd,
        stock,
    }
}

fn bench_create_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("lifecycle/create_order");

    for lines in [1usize, 5, 20] {
        let setup = rt.block_on(setup(lines));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &lines, |b, _| {
            b.to_async(&rt).iter(|| async {
                setup.recycle().await;
                let ctx = setup.service.context("bench");
                setup
                    .service
                    .create_order(&ctx, setup.cmd.clone())
                    .await
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_create_then_cancel(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let setup = rt.block_on(setup(3));

    c.bench_function("lifecycle/create_then_cancel", |b| {
        b.to_async(&rt).iter(|| async {
            setup.recycle().await;
            let ctx = setup.service.context("bench");
            let order = setup
                .service
                .create_order(&ctx, setup.cmd.clone())
                .await
                .unwrap();
            setup
                .service
                .cancel_order(&ctx, order.id(), CancelOrder::new("bench"))
                .await
                .unwrap()
        });
    });
}

fn bench_concurrent_creates(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let setup = rt.block_on(setup(1));

    c.bench_function("lifecycle/16_concurrent_creates_same_row", |b| {
        b.to_async(&rt).iter(|| async {
            setup.recycle().await;
            let tasks = (0..16).map(|_| {
                let service = setup.service.clone();
                let cmd = setup.cmd.clone();
                tokio::spawn(async move {
                    let ctx = service.context("bench");
                    service.create_order(&ctx, cmd).await
                })
            });
            for joined in join_all(tasks).await {
                joined.unwrap().unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_create_order,
    bench_create_then_cancel,
    bench_concurrent_creates
);
criterion_main!(benches);
