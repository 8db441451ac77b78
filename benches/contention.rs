// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::atomic::AtomicUsize;
use stronghold_wstm::Stm;

/// Primitive benchmark: committed read-modify-write of a single word
pub fn bench_increment(c: &mut Criterion) {
    c.bench_function("bench_increment", |b| {
        let stm = Stm::new();
        let mut ctx = stm.context().expect("Failed to register thread");
        let word = AtomicUsize::new(0);

        b.iter(|| {
            ctx.read_write(|tx| {
                let value = tx.load(&word)?;
                tx.store(&word, value + 1)?;
                Ok(())
            })
        })
    });
}

/// Disjoint words: commits never conflict, but every commit still walks the
/// full protocol
pub fn bench_disjoint_writes(c: &mut Criterion) {
    c.bench_function("bench_disjoint_writes", |b| {
        let stm = Stm::new();
        let mut ctx = stm.context().expect("Failed to register thread");
        let words: Vec<AtomicUsize> = (0..64).map(AtomicUsize::new).collect();

        b.iter(|| {
            ctx.read_write(|tx| {
                for word in words.iter() {
                    let value = tx.load(word)?;
                    tx.store(word, value + 1)?;
                }
                Ok(())
            })
        })
    });
}

criterion_group!(benches, bench_increment, bench_disjoint_writes);
criterion_main!(benches);
