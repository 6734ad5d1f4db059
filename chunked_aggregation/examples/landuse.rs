use std::time::Instant;

use chunked_aggregation::aggregator::{CountAggregator, GroupCountAggregator};
use chunked_aggregation::source::{RasterBand, RasterSource};
use chunked_aggregation::*;
use tracing_subscriber::EnvFilter;

const FOREST: u8 = 41;
const WATER: u8 = 11;
const URBAN: u8 = 22;
const CROPS: u8 = 82;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let width = 4096;
    let height = 4096;
    let band = RasterBand::from_fn(width, height, (512, 512), |col, row| {
        match (fastrand::u8(..), (col / 256 + row / 256) % 4) {
            (0..=15, _) => WATER,
            (_, 0) => FOREST,
            (_, 1) => URBAN,
            _ => CROPS,
        }
    });
    println!(
        "Raster {}x{} ({} blocks of {:?})",
        width,
        height,
        band.windows(Chunking::Native).total(),
        band.block_shape()
    );

    let now = Instant::now();
    let full = band.read_full();
    let expected = full.iter().filter(|class| **class == FOREST).count() as u64;
    println!(
        "Materialised count {} forest pixels in {:?} holding {} bytes",
        expected,
        now.elapsed(),
        full.len()
    );
    drop(full);

    for chunking in [
        Chunking::Native,
        Chunking::Uniform {
            width: 1000,
            height: 300,
        },
    ] {
        let source = RasterSource::new(band.clone(), chunking);
        let counter = ChunkedAggregator::new(CountAggregator::new(|class: &u8| *class == FOREST));

        let now = Instant::now();
        let outcome = counter.run(&source, 0);
        let stats = outcome.stats().clone();
        let forest = outcome.into_result().unwrap();
        assert_eq!(forest, expected);
        println!(
            "{:?}: {} forest pixels over {} tiles in {:?}, peak payload {} bytes",
            chunking,
            forest,
            stats.fetched,
            now.elapsed(),
            stats.peak_payload_bytes
        );
    }

    // Per class totals with a parallel run, skipping tiles that are mostly water
    let source = RasterSource::new(band, Chunking::Native);
    let config = AggregationConfig::default()
        .with_workers(4)
        .with_order(CombineOrder::Unordered);
    let classes = ChunkedAggregator::new(GroupCountAggregator::new(|class: &u8| *class))
        .with_filter(|_, pixels: &[u8]| {
            let water = pixels.iter().filter(|p| **p == WATER).count();
            water * 2 < pixels.len()
        })
        .with_config(config);

    let now = Instant::now();
    let outcome = classes.run_parallel(&source, Default::default());
    println!(
        "Class counts in {:?} ({} tiles skipped)",
        now.elapsed(),
        outcome.stats().skipped
    );
    for (class, count) in outcome.into_result().unwrap().sorted() {
        println!("  class {:>3}: {}", class, count);
    }
}
