#![no_main]

use arbitrary::Arbitrary;
use chunked_aggregation::aggregator::{reduce_whole, AllAggregator, U64SumAggregator};
use chunked_aggregation::source::{RasterBand, RasterSource, RowSource};
use chunked_aggregation::*;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    rows: Vec<u32>,
    rows_per_group: u8,
    width: u8,
    block: (u8, u8),
    tile: (u8, u8),
    workers: u8,
}

fuzz_target!(|input: Input| {
    let rows_per_group = input.rows_per_group.max(1) as usize;
    let rows: Vec<u64> = input.rows.iter().map(|v| *v as u64).collect();
    let source = RowSource::new(rows.clone(), rows_per_group);

    let expected = reduce_whole(&U64SumAggregator, &0, &rows).unwrap();
    let engine = ChunkedAggregator::new(U64SumAggregator);
    assert_eq!(engine.run(&source, 0).into_result().unwrap(), expected);

    let config = AggregationConfig::default()
        .with_workers(input.workers as usize % 8 + 1)
        .with_order(CombineOrder::Unordered);
    let parallel = ChunkedAggregator::new(U64SumAggregator).with_config(config);
    assert_eq!(parallel.run_parallel(&source, 0).into_result().unwrap(), expected);

    // Same pixels cut natively and uniformly must agree on count, min and max
    let width = input.width.max(1) as usize;
    let height = input.rows.len() / width;
    if height == 0 {
        return;
    }
    let pixels: Vec<u32> = input.rows[..width * height].to_vec();
    let block = (input.block.0.max(1) as usize, input.block.1.max(1) as usize);
    let band = RasterBand::new(width, height, block, pixels);
    let tile = Chunking::Uniform {
        width: input.tile.0.max(1) as usize,
        height: input.tile.1.max(1) as usize,
    };

    let engine = ChunkedAggregator::new(AllAggregator::<u32>::new());
    let native = engine
        .run(RasterSource::new(band.clone(), Chunking::Native), Default::default())
        .into_result()
        .unwrap();
    let uniform = engine
        .run(RasterSource::new(band, tile), Default::default())
        .into_result()
        .unwrap();
    assert_eq!(native.count(), (width * height) as u64);
    assert_eq!(native.count(), uniform.count());
    assert_eq!(native.min(), uniform.min());
    assert_eq!(native.max(), uniform.max());
});
