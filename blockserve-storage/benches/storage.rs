//! Benchmarks for block stores
//!
//! Run with: cargo bench --package blockserve-storage --bench storage

use blockserve_core::block::{BlockId, StoreRef};
use blockserve_core::STREAM_BUFFER_SIZE;
use blockserve_storage::backend::{BlockHandle, BlockStore};
use blockserve_storage::fs::FsBlockStore;
use blockserve_storage::memory::MemoryBlockStore;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

/// Generate test data of specified size
fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// Drain a handle in streaming-buffer sized reads
fn drain(handle: &mut dyn BlockHandle, buf: &mut [u8]) -> usize {
    let mut total = 0;
    loop {
        let n = handle.read(buf).unwrap();
        if n == 0 {
            return total;
        }
        total += n;
    }
}

fn bench_sequential_read(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let fs_store = FsBlockStore::open(temp_dir.path()).unwrap();
    let mem_store = MemoryBlockStore::new();
    let store = StoreRef::new("bench", 1);

    let mut group = c.benchmark_group("block_sequential_read");

    for size in [
        256 * 1024,      // 256 KB
        1024 * 1024,     // 1 MB
        8 * 1024 * 1024, // 8 MB (default block size)
    ] {
        let data = generate_data(size);
        let id = BlockId::for_content(&data);
        fs_store.put_block(&store, &id, &data).unwrap();
        mem_store.put_with_id(&store, id.clone(), data);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("fs", format_size(size)), &id, |b, id| {
            let mut buf = vec![0u8; STREAM_BUFFER_SIZE];
            b.iter(|| {
                let mut handle = fs_store.open_block(&store, black_box(id)).unwrap();
                drain(handle.as_mut(), &mut buf)
            })
        });
        group.bench_with_input(BenchmarkId::new("memory", format_size(size)), &id, |b, id| {
            let mut buf = vec![0u8; STREAM_BUFFER_SIZE];
            b.iter(|| {
                let mut handle = mem_store.open_block(&store, black_box(id)).unwrap();
                drain(handle.as_mut(), &mut buf)
            })
        });
    }

    group.finish();
}

/// Range positioning stats every block before the start offset
fn bench_stat(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let fs_store = FsBlockStore::open(temp_dir.path()).unwrap();
    let store = StoreRef::new("bench", 1);

    let ids: Vec<BlockId> = (0..100u64)
        .map(|i| {
            let data = i.to_le_bytes();
            let id = BlockId::for_content(&data);
            fs_store.put_block(&store, &id, &data).unwrap();
            id
        })
        .collect();

    c.bench_function("fs_stat_100_blocks", |b| {
        b.iter(|| {
            ids.iter()
                .map(|id| fs_store.stat_block(&store, id).unwrap().size)
                .sum::<u64>()
        })
    });
}

/// Format size for display
fn format_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{}MB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{}B", bytes)
    }
}

criterion_group!(benches, bench_sequential_read, bench_stat);
criterion_main!(benches);
