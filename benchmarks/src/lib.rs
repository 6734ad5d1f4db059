use std::{fs, io, path::Path, time::Duration};

use chunked_aggregation::{source::file_size_mb, source::RasterBand, AggregationConfig, ConfigError};
use chunkstore_rocks::Record;
use duckdb::{params, Connection, Result};
use hdrhistogram::Histogram;
use rand::{distributions::WeightedIndex, prelude::Distribution};
use tracing_subscriber::EnvFilter;

/// Land cover class codes
pub const WATER: u32 = 11;
pub const URBAN: u32 = 22;
pub const FOREST: u32 = 41;
pub const CROPS: u32 = 82;
pub const CLASSES: [u32; 4] = [WATER, URBAN, FOREST, CROPS];

#[derive(Debug, Clone, Copy, clap::ArgEnum)]
pub enum DistributionMode {
    /// Every class equally likely
    Uniform,
    /// Mostly forest and crops
    Skewed,
}

pub struct DataGenerator;

impl DataGenerator {
    pub fn records(total: usize, mode: DistributionMode) -> Vec<Record> {
        let weights = match mode {
            DistributionMode::Uniform => [1, 1, 1, 1],
            DistributionMode::Skewed => [1, 2, 10, 6],
        };
        let classes = WeightedIndex::new(weights).unwrap();
        let mut rng = rand::thread_rng();
        (0..total)
            .map(|_| {
                let class = CLASSES[classes.sample(&mut rng)];
                Record::new(class, fastrand::f64() * 100.0)
            })
            .collect()
    }

    /// A reflectance style band with smooth gradients and noise
    pub fn band(width: usize, height: usize, block: (usize, usize)) -> RasterBand<u16> {
        RasterBand::from_fn(width, height, block, |col, row| {
            (1000 + (col + 2 * row) % 20_000) as u16 + fastrand::u16(..256)
        })
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

/// Loads an aggregation config from a TOML file, the default when no path is given
pub fn load_config(path: Option<&Path>) -> std::result::Result<AggregationConfig, ConfigError> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .map_err(|err| ConfigError::Invalid(format!("{}: {}", path.display(), err)))?;
            AggregationConfig::from_toml_str(&raw)
        }
        None => Ok(AggregationConfig::default()),
    }
}

/// Size of every file below `path` in MB
pub fn dir_size_mb(path: impl AsRef<Path>) -> io::Result<f64> {
    let mut total = 0.0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            total += dir_size_mb(entry.path())?;
        } else {
            total += file_size_mb(entry.path())?;
        }
    }
    Ok(total)
}

pub fn duckdb_setup(disk: bool) -> (duckdb::Connection, &'static str) {
    let (db, id) = if disk {
        let path = "/tmp/duckdb_landcover";
        let _ = fs::remove_file(path);
        (duckdb::Connection::open(path).unwrap(), "duckdb [disk]")
    } else {
        (
            duckdb::Connection::open_in_memory().unwrap(),
            "duckdb [memory]",
        )
    };
    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS landcover (class UINTEGER NOT NULL, value DOUBLE NOT NULL)",
    )
    .unwrap();
    (db, id)
}

pub fn duckdb_append_batch(batch: &[Record], db: &mut Connection) -> Result<()> {
    let mut appender = db.appender("landcover")?;
    for record in batch {
        appender.append_row(params![record.class, record.value])?;
    }
    Ok(())
}

pub fn duckdb_count_class(class: u32, db: &Connection) -> Result<u64> {
    let count: i64 = db.query_row(
        "SELECT COUNT(*) FROM landcover WHERE class = ?",
        params![class],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

pub fn print_hist(id: &str, hist: &Histogram<u64>) {
    println!(
        "{} latencies:\t\t\t\t\t\tmin: {: >4}us\tp50: {: >4}us\tp99: {: \
         >4}us\tp99.9: {: >4}us\tmax: {: >4}us \t count: {}",
        id,
        Duration::from_micros(hist.min()).as_micros(),
        Duration::from_micros(hist.value_at_quantile(0.5)).as_micros(),
        Duration::from_micros(hist.value_at_quantile(0.99)).as_micros(),
        Duration::from_micros(hist.value_at_quantile(0.999)).as_micros(),
        Duration::from_micros(hist.max()).as_micros(),
        hist.len(),
    );
}
