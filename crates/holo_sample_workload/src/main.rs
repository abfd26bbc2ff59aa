//! Workload driver for the HoloSample table sampler.
//!
//! Seeds an in-memory sharded table, pre-splits it into regions, tombstones a
//! share of the rows and samples it to completion. The sampled rows and the
//! sampler counters are written as a JSON report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use datafusion::common::ScalarValue;
use holo_kv::rowcodec::{encode_row, ColumnType};
use holo_kv::tablecodec::{encode_record_key, split_keys_for_handles};
use holo_kv::{ShardedStore, Timestamp};
use holo_sample::{
    ColumnDef, GeneratedExpr, RowBuffer, SampleMetricsSnapshot, SamplerConfig, ScanDirection,
    SessionContext, TableSampler, TableSchema,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const TABLE_ID: u64 = 100;
const SEED_TS: Timestamp = 1;
const DELETE_TS: Timestamp = 2;
const WRITE_CHUNK: usize = 1_024;

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "holo-sample-workload")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Run(RunArgs),
}

/// CLI options for one sampling run.
#[derive(Parser, Debug, Clone)]
struct RunArgs {
    /// Rows seeded into the table, with handles `1..=rows`.
    #[arg(long, default_value_t = 10_000)]
    rows: u64,

    /// Number of regions the table is pre-split into.
    #[arg(long, default_value_t = 64)]
    regions: usize,

    /// Fetcher concurrency hint; values below one are treated as one.
    #[arg(long, env = "HOLO_SAMPLE_CONCURRENCY")]
    concurrency: Option<i64>,

    /// Row capacity of each `next` buffer.
    #[arg(long, default_value_t = 16)]
    capacity: usize,

    /// Sample regions in descending key order.
    #[arg(long, default_value_t = false)]
    reverse: bool,

    /// Random seed (0 picks a random seed).
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Percent of rows deleted after seeding.
    #[arg(long, default_value_t = 0)]
    delete_pct: u8,

    /// Backoff budget for region lookups.
    #[arg(long, env = "HOLO_SAMPLE_REGION_LOOKUP_BACKOFF")]
    region_lookup_backoff: Option<humantime::Duration>,

    /// Backoff budget for opening and advancing region iterators.
    #[arg(long, env = "HOLO_SAMPLE_SCAN_BACKOFF")]
    scan_backoff: Option<humantime::Duration>,

    /// Base sampler config as JSON; flags above override its fields.
    #[arg(long)]
    sampler_config: Option<PathBuf>,

    /// Session time zone attached to timestamp cells.
    #[arg(long)]
    time_zone: Option<String>,

    /// Write the JSON report to this path.
    #[arg(long, default_value = ".tmp/holo_sample/report.json")]
    out: PathBuf,
}

/// Parameters of the run, embedded in the report for reproducibility.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
struct ReportMeta {
    table_id: u64,
    rows: u64,
    regions: usize,
    capacity: usize,
    seed: u64,
    delete_pct: u8,
    sampler: SamplerConfig,
    next_calls: u64,
    elapsed_ms: u64,
    metrics: SampleMetricsSnapshot,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
struct Report {
    meta: ReportMeta,
    handles: Vec<i64>,
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("holo_sample_workload=info,holo_sample=info,warn")),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Run(args) => {
            let report = run(args.clone()).await?;
            write_report(&args.out, &report).context("write report")?;
            info!(
                path = %args.out.display(),
                sampled = report.handles.len(),
                "wrote sample report"
            );
            Ok(())
        }
    }
}

fn schema() -> TableSchema {
    TableSchema::new(
        TABLE_ID,
        vec![
            ColumnDef::new(1, "id", ColumnType::Int64).not_null(),
            ColumnDef::new(2, "name", ColumnType::Utf8),
            ColumnDef::new(3, "score", ColumnType::Float64),
            ColumnDef::new(4, "active", ColumnType::Boolean),
            ColumnDef::new(5, "created_at", ColumnType::TimestampNanosecond),
            ColumnDef::new(6, "name_upper", ColumnType::Utf8)
                .generated(GeneratedExpr::col("name").upper()),
            ColumnDef::new(7, "weighted", ColumnType::Float64).generated(
                GeneratedExpr::col("score").mul(GeneratedExpr::col("id")),
            ),
        ],
    )
    .with_handle_column("id")
}

fn sampler_config(args: &RunArgs) -> anyhow::Result<SamplerConfig> {
    let mut config = match &args.sampler_config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?;
            SamplerConfig::from_json(&raw).with_context(|| format!("parse {}", path.display()))?
        }
        None => SamplerConfig::default(),
    };
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency);
    }
    if let Some(budget) = args.region_lookup_backoff {
        config = config.with_region_lookup_backoff_ms(duration_ms(budget.into()));
    }
    if let Some(budget) = args.scan_backoff {
        config = config.with_scan_backoff_ms(duration_ms(budget.into()));
    }
    if args.reverse {
        config = config.with_direction(ScanDirection::Reverse);
    }
    Ok(config)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Seed, split and sample the table; returns the report without writing it.
async fn run(args: RunArgs) -> anyhow::Result<Report> {
    anyhow::ensure!(args.rows > 0, "--rows must be > 0");
    anyhow::ensure!(args.regions > 0, "--regions must be > 0");
    anyhow::ensure!(args.capacity > 0, "--capacity must be > 0");
    anyhow::ensure!(args.delete_pct <= 100, "--delete-pct must be <= 100");
    let max_handle = i64::try_from(args.rows).context("--rows does not fit a handle")?;

    let config = sampler_config(&args)?;
    // Use a random seed when the user provides zero.
    let seed = if args.seed == 0 {
        rand::thread_rng().gen()
    } else {
        args.seed
    };

    let schema = schema();
    let store = ShardedStore::single_shard();
    let split_keys = split_keys_for_handles(TABLE_ID, 1, max_handle, args.regions);
    store.split_keys(&split_keys).context("pre-split table")?;
    seed_table(&store, &schema, max_handle, args.delete_pct, seed)?;
    info!(
        rows = args.rows,
        shards = store.shard_count(),
        seed,
        "seeded table"
    );

    let session = match &args.time_zone {
        Some(time_zone) => SessionContext::with_time_zone(time_zone.as_str()),
        None => SessionContext::default(),
    };
    let requested = schema
        .columns
        .iter()
        .map(|column| column.name.as_str())
        .collect::<Vec<_>>();
    let mut sampler = TableSampler::new(
        Arc::new(store),
        &schema,
        &requested,
        DELETE_TS,
        config.clone(),
    )
    .context("build sampler")?
    .with_session(session);

    let started = Instant::now();
    let mut next_calls = 0u64;
    let mut handles = Vec::new();
    let mut rows = Vec::new();
    let names = sampler
        .plan()
        .output_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let mut buf = RowBuffer::with_capacity(args.capacity);
    while !sampler.finished() {
        buf.clear();
        sampler.next(&mut buf).await.context("sample next")?;
        next_calls += 1;
        debug!(call = next_calls, rows = buf.len(), "sampled batch");
        for row in buf.rows() {
            handles.push(row.handle);
            let mut object = serde_json::Map::new();
            for (name, cell) in names.iter().zip(&row.cells) {
                object.insert(name.clone(), cell_to_json(cell));
            }
            rows.push(object);
        }
    }
    sampler.close().await;

    let meta = ReportMeta {
        table_id: TABLE_ID,
        rows: args.rows,
        regions: args.regions,
        capacity: args.capacity,
        seed,
        delete_pct: args.delete_pct,
        sampler: config,
        next_calls,
        elapsed_ms: duration_ms(started.elapsed()),
        metrics: sampler.metrics().snapshot(),
    };
    info!(
        sampled = handles.len(),
        next_calls,
        elapsed_ms = meta.elapsed_ms,
        "sampling finished"
    );
    Ok(Report {
        meta,
        handles,
        rows,
    })
}

fn seed_table(
    store: &ShardedStore,
    schema: &TableSchema,
    max_handle: i64,
    delete_pct: u8,
    seed: u64,
) -> anyhow::Result<()> {
    let stored = schema.stored_columns();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut batch = Vec::with_capacity(WRITE_CHUNK);
    let mut deletes = Vec::new();
    for handle in 1..=max_handle {
        let suffix = (0..4)
            .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
            .collect::<String>();
        let values = [
            ScalarValue::Utf8(Some(format!("user{handle:06}-{suffix}"))),
            if rng.gen_ratio(1, 10) {
                ScalarValue::Float64(None)
            } else {
                ScalarValue::Float64(Some(rng.gen_range(0.0..100.0)))
            },
            ScalarValue::Boolean(Some(rng.gen_bool(0.5))),
            ScalarValue::TimestampNanosecond(Some(1_700_000_000_000_000_000 + handle * 1_000), None),
        ];
        let payload = encode_row(&stored, &values)
            .with_context(|| format!("encode row {handle}"))?;
        batch.push((encode_record_key(TABLE_ID, handle), Some(payload)));
        if rng.gen_range(0..100u8) < delete_pct {
            deletes.push((encode_record_key(TABLE_ID, handle), None));
        }
        if batch.len() == WRITE_CHUNK {
            store
                .write_batch(std::mem::take(&mut batch), SEED_TS)
                .context("write rows")?;
        }
    }
    if !batch.is_empty() {
        store.write_batch(batch, SEED_TS).context("write rows")?;
    }
    if !deletes.is_empty() {
        debug!(deleted = deletes.len(), "tombstoning rows");
        store.write_batch(deletes, DELETE_TS).context("delete rows")?;
    }
    Ok(())
}

fn cell_to_json(cell: &ScalarValue) -> serde_json::Value {
    use serde_json::Value;
    match cell {
        value if value.is_null() => Value::Null,
        ScalarValue::Int64(Some(v)) => Value::from(*v),
        ScalarValue::Float64(Some(v)) => Value::from(*v),
        ScalarValue::Boolean(Some(v)) => Value::from(*v),
        ScalarValue::Utf8(Some(v)) => Value::from(v.as_str()),
        other => Value::from(other.to_string()),
    }
}

/// Serialize and write the sample report JSON.
fn write_report(path: &Path, report: &Report) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(report).context("serialize report")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
