//! Summarizes the most recent S3 Batch Operations report CSV under a prefix,
//! grounded on `scripts/s3_batch_report_summary.py`.

use std::collections::HashMap;

use anyhow::{bail, Result};
use backup_core::object_store::s3::S3ObjectStore;
use backup_core::object_store::ObjectStore;
use clap::Args;

use crate::output::print_info;

#[derive(Args)]
pub struct ReportSummaryArgs {
    #[arg(long)]
    bucket: String,

    #[arg(long, default_value = "reports/")]
    prefix: String,
}

pub async fn run(args: ReportSummaryArgs) -> Result<()> {
    let store = S3ObjectStore::from_env().await;

    let listing = store.list_objects(&args.bucket, &args.prefix).await?;
    let Some(latest) = listing
        .into_iter()
        .filter(|o| o.key.to_lowercase().ends_with(".csv"))
        .max_by_key(|o| o.last_modified)
    else {
        bail!("no CSV report found under s3://{}/{}", args.bucket, args.prefix);
    };

    print_info(&format!("report: s3://{}/{}", args.bucket, latest.key));

    let body = store.get_object(&args.bucket, &latest.key).await?;
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(body.as_ref());
    let headers = reader.headers()?.clone();
    let find_col = |names: &[&str]| -> Option<usize> {
        names.iter().find_map(|name| headers.iter().position(|h| h.eq_ignore_ascii_case(name)))
    };
    let result_col = find_col(&["Result", "Status", "OperationStatus", "TaskStatus"]);
    let error_col = find_col(&["ErrorCode", "FailureCode", "Error"]);

    let mut total: u64 = 0;
    let mut by_result: HashMap<String, u64> = HashMap::new();
    let mut by_error: HashMap<String, u64> = HashMap::new();
    let mut samples: Vec<Vec<String>> = Vec::new();

    for record in reader.records() {
        let record = record?;
        total += 1;

        let result = result_col.and_then(|i| record.get(i)).unwrap_or("").to_string();
        *by_result.entry(result).or_insert(0) += 1;

        if let Some(error) = error_col.and_then(|i| record.get(i)).filter(|v| !v.is_empty()) {
            *by_error.entry(error.to_string()).or_insert(0) += 1;
        }

        if samples.len() < 5 {
            samples.push(record.iter().take(6).map(str::to_string).collect());
        }
    }

    println!("Total rows: {total}");
    println!("By result/status:");
    let mut results: Vec<_> = by_result.into_iter().collect();
    results.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (result, count) in results {
        let label = if result.is_empty() { "(blank)" } else { result.as_str() };
        println!("  {label}: {count}");
    }

    if !by_error.is_empty() {
        println!("By error code:");
        let mut errors: Vec<_> = by_error.into_iter().collect();
        errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (error, count) in errors {
            println!("  {error}: {count}");
        }
    }

    if !samples.is_empty() {
        println!("Samples:");
        for sample in &samples {
            println!("  {sample:?}");
        }
    }

    Ok(())
}
