use std::collections::BTreeMap;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;

use chrono::Local;
use frame_keeper_common::record::{FrameRecord, RecordError, RecordReader};
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, PartialEq)]
struct Args {
    path: PathBuf,
    json: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut path = None;
    let mut json = false;
    for arg in args {
        match arg.as_str() {
            "--json" => json = true,
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            _ if path.is_none() => path = Some(PathBuf::from(arg)),
            _ => return Err(format!("unexpected argument {arg}")),
        }
    }
    Ok(Args {
        path: path.unwrap_or_else(|| PathBuf::from("frame_data.bin")),
        json,
    })
}

fn local_time(r: &FrameRecord) -> String {
    match r.captured_at() {
        Some(dt) => dt
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string(),
        None => format!("{}ms", r.captured_at_ms),
    }
}

fn format_line(r: &FrameRecord) -> String {
    let b = &r.buckets;
    format!(
        "{:>6}  {}  {:<5}  score={:<12.3} \
         blue={:.2}% green={:.2}% brown={:.2}% black={:.2}% yellow={:.2}%  {}",
        r.frame_id,
        local_time(r),
        r.class.label(),
        r.score,
        b.blue,
        b.green,
        b.brown,
        b.black,
        b.yellow,
        if r.name.is_empty() { "-" } else { r.name.as_str() },
    )
}

#[derive(Serialize)]
struct JsonLine<'a> {
    #[serde(flatten)]
    record: &'a FrameRecord,
    captured_at: String,
}

/// Print every record in `reader`. Returns the number printed and the error
/// that stopped the scan, if any.
fn dump<R: Read, W: Write>(
    reader: R,
    out: &mut W,
    json: bool,
    counts: &mut BTreeMap<&'static str, u64>,
) -> std::io::Result<(u64, Option<RecordError>)> {
    let mut printed = 0;
    for result in RecordReader::new(reader) {
        let record = match result {
            Ok(r) => r,
            Err(e) => return Ok((printed, Some(e))),
        };
        if json {
            let line = JsonLine {
                record: &record,
                captured_at: local_time(&record),
            };
            let text = serde_json::to_string(&line).map_err(std::io::Error::other)?;
            writeln!(out, "{text}")?;
        } else {
            writeln!(out, "{}", format_line(&record))?;
        }
        *counts.entry(record.class.label()).or_default() += 1;
        printed += 1;
    }
    Ok((printed, None))
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("usage: frame-keeper-inspect [path] [--json]");
            std::process::exit(2);
        }
    };

    let file = match std::fs::File::open(&args.path) {
        Ok(f) => f,
        Err(e) => {
            error!(path = %args.path.display(), error = %e, "failed to open record log");
            std::process::exit(1);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut counts = BTreeMap::new();
    let (printed, failure) = match dump(BufReader::new(file), &mut out, args.json, &mut counts) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to write output");
            std::process::exit(1);
        }
    };
    let _ = out.flush();

    info!(path = %args.path.display(), records = printed, ?counts, "record log read");
    if let Some(e) = failure {
        error!(error = %e, after = printed, "record log is corrupt");
        std::process::exit(1);
    }
}
