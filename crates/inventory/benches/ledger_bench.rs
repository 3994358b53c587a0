use common::{ProductId, RequestId};
use criterion::{Criterion, criterion_group, criterion_main};
use inventory::{InMemoryInventoryLedger, InventoryItem, InventoryLedger};

fn bench_reserve_single_item(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ledger = InMemoryInventoryLedger::with_stock([("SKU-1", u32::MAX / 2)]);
    let items = [InventoryItem::new("SKU-1", 1)];
    let request_id = RequestId::generate();

    c.bench_function("inventory/reserve_single_item", |b| {
        b.iter(|| {
            rt.block_on(async {
                ledger.reserve(&items, &request_id).await.unwrap();
            });
        });
    });
}

fn bench_reserve_release_10_items(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ledger =
        InMemoryInventoryLedger::with_stock((0..10).map(|i| (format!("SKU-{i}"), 1_000_000)));
    let items: Vec<InventoryItem> = (0..10)
        .map(|i| InventoryItem::new(format!("SKU-{i}"), 2))
        .collect();
    let request_id = RequestId::generate();

    c.bench_function("inventory/reserve_release_10_items", |b| {
        b.iter(|| {
            rt.block_on(async {
                ledger.reserve(&items, &request_id).await.unwrap();
                ledger.release(&items, &request_id).await.unwrap();
            });
        });
    });
}

fn bench_contended_reserve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("inventory/contended_reserve_8_tasks", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = InMemoryInventoryLedger::with_stock([("SKU-1", 4)]);
                let handles: Vec<_> = (0..8)
                    .map(|_| {
                        let ledger = ledger.clone();
                        tokio::spawn(async move {
                            ledger
                                .reserve(&[InventoryItem::new("SKU-1", 1)], &RequestId::generate())
                                .await
                                .unwrap()
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap();
                }
                let record = ledger.get(&ProductId::new("SKU-1")).await.unwrap();
                assert_eq!(record.map(|r| r.reserved_quantity), Some(4));
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_single_item,
    bench_reserve_release_10_items,
    bench_contended_reserve
);
criterion_main!(benches);
