use chunked_aggregation::aggregator::{AllAggregator, GroupCountAggregator};
use chunked_aggregation::source::RasterBand;
use chunked_aggregation::*;
use chunkstore_rocks::{Record, RowGroupStore, TileStore};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dir = std::env::temp_dir().join("chunkstore_rocks_merge");
    let _ = std::fs::remove_dir_all(&dir);

    let tiles = TileStore::open(dir.join("tiles")).unwrap();
    let band = RasterBand::from_fn(2048, 1024, (256, 256), |col, row| {
        ((col ^ row) % 4096) as u16
    });
    tiles.write_band("red", &band).unwrap();
    tiles.compact();
    println!("merged band stats {}", tiles.stats("red").unwrap().unwrap());

    let source = tiles.source("red").unwrap();
    let outcome = ChunkedAggregator::new(AllAggregator::<u16>::new())
        .with_config(AggregationConfig::default().with_workers(4))
        .run_parallel(&source, Default::default());
    println!("chunked band stats {}", outcome.aggregate());
    println!("tile fetch latency {:?}", tiles.fetch_latency());

    let tables = RowGroupStore::open(dir.join("tables"), &["landcover"]).unwrap();
    let table = tables.table("landcover").unwrap();
    let records: Vec<Record> = (0..100_000)
        .map(|_| Record::new(fastrand::u32(..8), fastrand::f64() * 100.0))
        .collect();
    table.write(&records, 4096).unwrap();

    let counts = ChunkedAggregator::new(GroupCountAggregator::new(|r: &Record| r.class))
        .run(table.source().unwrap(), Default::default())
        .into_result()
        .unwrap();
    for (class, count) in counts.sorted() {
        println!("class {}: {}", class, count);
    }
    println!("row group fetch latency {:?}", tables.fetch_latency());
}
