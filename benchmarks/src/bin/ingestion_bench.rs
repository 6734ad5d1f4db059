use std::time::Instant;

use benchmarks::*;
use chunkstore_rocks::{Record, RowGroupStore, TileStore};
use clap::Parser;
use duckdb::Result;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, value_parser, default_value_t = 10)]
    num_batches: usize,
    #[clap(short, long, value_parser, default_value_t = 100_000)]
    batch_size: usize,
    #[clap(short, long, value_parser, default_value_t = 8192)]
    rows_per_group: usize,
    #[clap(short, long, value_parser, default_value_t = 4096)]
    width: usize,
    #[clap(long, value_parser, default_value_t = 4096)]
    height: usize,
    #[clap(long, value_parser, default_value_t = 512)]
    block: usize,
    #[clap(short, long, action)]
    disk: bool,
    #[clap(arg_enum, value_parser, default_value_t = DistributionMode::Skewed)]
    mode: DistributionMode,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let batch_size = args.batch_size;
    let total_batches = args.num_batches;
    println!("Running with {:#?}", args);
    println!("Ingestion records {}", batch_size * total_batches);

    let batches: Vec<Vec<Record>> = (0..total_batches)
        .map(|_| DataGenerator::records(batch_size, args.mode))
        .collect();

    // Row ingestion throughput

    let (mut db, id) = duckdb_setup(args.disk);
    info!(id, batches = total_batches, "ingesting rows");
    measure(id, batch_size, &batches, |batch| {
        duckdb_append_batch(batch, &mut db).unwrap();
    });

    let path = "/tmp/chunkstore_rocks_tables";
    let _ = std::fs::remove_dir_all(path);
    let tables: Vec<String> = (0..total_batches).map(|i| format!("batch_{}", i)).collect();
    let names: Vec<&str> = tables.iter().map(String::as_str).collect();
    let store = RowGroupStore::open(path, &names).unwrap();
    info!(path, rows_per_group = args.rows_per_group, "ingesting row groups");
    let mut next = 0;
    measure("RowGroupStore", batch_size, &batches, |batch| {
        store
            .table(&tables[next])
            .unwrap()
            .write(batch, args.rows_per_group)
            .unwrap();
        next += 1;
    });
    store.flush().unwrap();
    println!(
        "RowGroupStore size {:.2} MB",
        dir_size_mb(path).unwrap_or_default()
    );

    // Raster ingestion

    let band = DataGenerator::band(args.width, args.height, (args.block, args.block));
    let raw = band.read_full();
    let raw_bytes: Vec<u8> = raw.iter().flat_map(|v| v.to_le_bytes()).collect();
    let now = Instant::now();
    let compressed = lz4_flex::compress_prepend_size(&raw_bytes);
    println!(
        "Raw band {:.2} MB, lz4 {:.2} MB in {:?}",
        raw_bytes.len() as f64 * 1e-6,
        compressed.len() as f64 * 1e-6,
        now.elapsed()
    );

    let path = "/tmp/chunkstore_rocks_tiles";
    let _ = std::fs::remove_dir_all(path);
    let tiles = TileStore::open(path).unwrap();
    info!(path, width = args.width, height = args.height, "ingesting band");
    let now = Instant::now();
    tiles.write_band("band_1", &band).unwrap();
    tiles.compact();
    let runtime = now.elapsed();
    println!(
        "TileStore wrote {} pixels at {:.0} pixels/s, size {:.2} MB",
        raw.len(),
        raw.len() as f64 / runtime.as_secs_f64(),
        dir_size_mb(path).unwrap_or_default()
    );

    Ok(())
}

fn measure(id: &str, batch_size: usize, batches: &[Vec<Record>], mut f: impl FnMut(&[Record])) {
    let total_batches = batches.len();
    let mut hist = hdrhistogram::Histogram::<u64>::new(4).unwrap();
    let full = Instant::now();
    for batch in batches {
        let now = Instant::now();
        f(batch);
        hist.record(now.elapsed().as_micros() as u64).unwrap();
    }
    let runtime = full.elapsed();

    println!(
        "{} ingestion ran at {} ops/s (took {:.2}s)",
        id,
        (batch_size * total_batches) as f64 / runtime.as_secs_f64(),
        runtime.as_secs_f64(),
    );
    print_hist(id, &hist);
    println!(
        "mean latency {:?}",
        Duration::from_micros(hist.mean() as u64)
    );
}
