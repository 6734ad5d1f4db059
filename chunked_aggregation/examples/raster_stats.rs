use std::time::{Duration, Instant};

use chunked_aggregation::aggregator::{AllAggregator, HistogramAggregator, QuantileBounds};
use chunked_aggregation::source::{RasterBand, RasterSource};
use chunked_aggregation::*;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Surface reflectance style band with a few saturated outliers
    let band = RasterBand::from_fn(3000, 2000, (256, 256), |col, row| {
        if fastrand::u32(..1000) == 0 {
            u16::MAX
        } else {
            (7000 + (col * 3 + row * 5) % 9000) as u16 + fastrand::u16(..500)
        }
    });
    let source = RasterSource::new(band.clone(), Chunking::Native);

    let config = AggregationConfig::default()
        .with_workers(4)
        .with_fetch_timeout(Duration::from_secs(1))
        .with_retry(RetryPolicy::exponential(
            3,
            Duration::from_millis(10),
            Duration::from_millis(200),
        ));

    let now = Instant::now();
    let stats = ChunkedAggregator::new(AllAggregator::<u16>::new())
        .with_config(config.clone())
        .run_parallel(&source, Default::default())
        .into_result()
        .unwrap();
    println!("Band statistics {} in {:?}", stats, now.elapsed());

    let now = Instant::now();
    let histogram = ChunkedAggregator::new(HistogramAggregator::<u16>::new())
        .with_config(config)
        .run_parallel(&source, HistogramAggregator::<u16>::empty().unwrap())
        .into_result()
        .unwrap();
    println!(
        "Histogram of {} values in {:?}, median {}",
        histogram.len(),
        now.elapsed(),
        histogram.value_at_quantile(0.5)
    );

    let bounds = QuantileBounds::display_stretch(&histogram).unwrap();
    println!("Display stretch {:?}", bounds);

    let tile = band.read(&Window::new(0, 0, 8, 1)).unwrap();
    for (col, value) in tile.data.iter().enumerate() {
        println!(
            "  pixel ({}, 0): raw {:>5} normalized {:.3} stretched {:>3}",
            col,
            value,
            stats.normalize(*value as f64),
            bounds.rescale_u8(*value as u64)
        );
    }
}
