use criterion::{Criterion, criterion_group, criterion_main};
use procrt_core::{
    proc::{BinaryOp, Instruction, Procedure},
    slot::SlotLayout,
    store::{BackendKind, ProcStore, ReservedTable},
};
use std::hint::black_box;

// A procedure of `len` binops, so get() has real cloning work to do
fn build_procedure(len: usize) -> Procedure {
    let instructions = (0..len)
        .map(|i| Instruction::Binary {
            node: 0,
            op: BinaryOp::Add,
            lhs: format!("p{}", i),
            rhs: "step".into(),
            result: format!("p{}", i + 1),
        })
        .collect();
    Procedure::from_instructions(instructions).unwrap()
}

fn new_store(kind: BackendKind) -> ProcStore {
    let layout = SlotLayout::new(16, 255).unwrap();
    ProcStore::new(layout, kind, ReservedTable::new(16)).unwrap()
}

fn bench_store(c: &mut Criterion) {
    let proc = build_procedure(32);

    for kind in [BackendKind::Static, BackendKind::Dynamic] {
        let store = new_store(kind);
        for slot in (16..=255u8).step_by(3) {
            store.set(proc.clone(), slot, true).unwrap();
        }

        c.bench_function(&format!("store_set_{}", kind), |b| {
            b.iter(|| {
                store.set(black_box(proc.clone()), black_box(100), true).unwrap();
            })
        });

        // get() returns a detached copy
        c.bench_function(&format!("store_get_{}", kind), |b| {
            b.iter(|| black_box(store.get(black_box(100)).unwrap()))
        });

        c.bench_function(&format!("store_get_slots_{}", kind), |b| {
            b.iter(|| black_box(store.get_slots().unwrap()))
        });
    }
}

criterion_group!(benches, bench_store);
criterion_main!(benches);
