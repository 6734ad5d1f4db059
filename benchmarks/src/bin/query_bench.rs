use std::{path::PathBuf, time::Instant};

use benchmarks::*;
use chunked_aggregation::{
    aggregator::{reduce_whole, CountAggregator},
    source::RowSource,
    AggregationConfig, ChunkedAggregator, Outcome,
};
use chunkstore_rocks::{Record, RowGroupStore};
use clap::Parser;
use duckdb::Result;
use hdrhistogram::Histogram;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, value_parser, default_value_t = 1_000_000)]
    rows: usize,
    #[clap(short, long, value_parser, default_value_t = 10)]
    queries: usize,
    #[clap(short, long, value_parser, default_value_t = 4)]
    workers: usize,
    /// Row group sizes to compare
    #[clap(long, value_parser, multiple_values = true, default_values_t = vec![1024, 16_384, 131_072])]
    rows_per_group: Vec<usize>,
    /// TOML file with fetch timeout, retry and combine order settings
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,
    #[clap(short, long, action)]
    disk: bool,
    #[clap(arg_enum, value_parser, default_value_t = DistributionMode::Skewed)]
    mode: DistributionMode,
}

fn forest(record: &Record) -> bool {
    record.class == FOREST
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    println!("Running with {:#?}", args);

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config.with_workers(args.workers),
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };
    println!("Aggregation config {:?}", config);

    let records = DataGenerator::records(args.rows, args.mode);
    let counter = CountAggregator::new(forest);

    // Materialized reference
    let mut hist = Histogram::<u64>::new(4).unwrap();
    let mut expected = 0;
    for _ in 0..args.queries {
        let now = Instant::now();
        expected = reduce_whole(&counter, &0, &records).unwrap();
        hist.record(now.elapsed().as_micros() as u64).unwrap();
    }
    println!("Forest rows {} of {}", expected, records.len());
    print_hist("materialized", &hist);

    let (mut db, id) = duckdb_setup(args.disk);
    duckdb_append_batch(&records, &mut db)?;
    let mut hist = Histogram::<u64>::new(4).unwrap();
    for _ in 0..args.queries {
        let now = Instant::now();
        let count = duckdb_count_class(FOREST, &db)?;
        hist.record(now.elapsed().as_micros() as u64).unwrap();
        assert_eq!(count, expected);
    }
    print_hist(id, &hist);

    let path = "/tmp/chunkstore_rocks_query";
    let _ = std::fs::remove_dir_all(path);
    let store = RowGroupStore::open(path, &["landcover"]).unwrap();
    let table = store.table("landcover").unwrap();

    let source = RowSource::new(records, 1);
    for rows_per_group in &args.rows_per_group {
        let rows_per_group = *rows_per_group;
        let source = source.regroup(rows_per_group);
        info!(rows_per_group, row_groups = source.num_row_groups(), "querying");
        let sequential = ChunkedAggregator::new(CountAggregator::new(forest))
            .with_config(AggregationConfig { workers: 1, ..config.clone() });
        let parallel =
            ChunkedAggregator::new(CountAggregator::new(forest)).with_config(config.clone());

        run_queries(
            &format!("sequential [rows_per_group {}]", rows_per_group),
            args.queries,
            expected,
            || sequential.run(&source, 0),
        );
        run_queries(
            &format!(
                "parallel {} workers [rows_per_group {}]",
                config.workers, rows_per_group
            ),
            args.queries,
            expected,
            || parallel.run_parallel(&source, 0),
        );

        table.write(&source.materialize(), rows_per_group).unwrap();
        info!(rows_per_group, "wrote table");
        let stored = table.source().unwrap();
        run_queries(
            &format!("rocksdb parallel [rows_per_group {}]", rows_per_group),
            args.queries,
            expected,
            || parallel.run_parallel(&stored, 0),
        );
    }
    print_hist("rocksdb row group fetch", &store.fetch_latency().snapshot());

    Ok(())
}

fn run_queries(id: &str, queries: usize, expected: u64, mut query: impl FnMut() -> Outcome<u64>) {
    let mut hist = Histogram::<u64>::new(4).unwrap();
    let mut peak = 0;
    let full = Instant::now();
    for _ in 0..queries {
        let now = Instant::now();
        let outcome = query();
        hist.record(now.elapsed().as_micros() as u64).unwrap();
        peak = peak.max(outcome.stats().peak_payload_bytes);
        assert_eq!(outcome.into_result().unwrap(), expected);
    }
    println!(
        "{} ran {} queries in {:.2}s, peak payload {} bytes",
        id,
        queries,
        full.elapsed().as_secs_f64(),
        peak
    );
    print_hist(id, &hist);
}
