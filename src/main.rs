use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use log::warn;

use mkudfiso::build::{self, BuildConfig, Result, UdfError};
use mkudfiso::crc;
use mkudfiso::scan;
use mkudfiso::sidecar;
use mkudfiso::udf::Timestamp;
use mkudfiso::writer::{self, humanize};

#[derive(Parser, Debug)]
#[command(version, about = "Compile files and directories into a pure UDF filesystem", long_about = None)]
struct Args {
    /// The directory whose contents are packaged into the ISO
    source: PathBuf,

    /// The output ISO image; standard output when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Error out if the resulting ISO would exceed this limit. A byte
    /// count, optionally followed by KB, MB, GB or TB (powers of 1024).
    /// CD-ROM 640MB, DVD-R 4482MB, DVD-R+DL 8105MB
    #[arg(long, value_parser = parse_metric)]
    limit: Option<u64>,

    /// Volume label; derived from the output file name when omitted
    #[arg(short = 'v', long = "volume")]
    volume: Option<String>,

    /// Write a text report about the ISO; also appended to the image
    /// when space allows
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write a hash table with MD5/SHA-1/SHA-256 of every file and of
    /// the whole image; also appended to the image when space allows
    #[arg(long)]
    hashes: Option<PathBuf>,

    /// Write a list of the unused areas of the disc
    #[arg(long)]
    gap: Option<PathBuf>,

    /// Overwrite the ISO file if it already exists
    #[arg(long = "force-iso")]
    force_iso: bool,

    /// Detect long runs of zero sectors and make files sparse
    #[arg(long)]
    sparse: bool,
}

fn parse_metric(s: &str) -> std::result::Result<u64, String> {
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    let v: u64 = digits.parse().map_err(|_| format!("invalid size: {s}"))?;
    let shift = match suffix {
        "" => 0,
        "KB" => 10,
        "MB" => 20,
        "GB" => 30,
        "TB" => 40,
        _ => return Err(format!("unknown size suffix: {suffix}")),
    };
    Ok(v << shift)
}

/// Volume label from the output file name: basename, extension stripped,
/// at most 32 characters.
fn derive_label(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match name.rfind('.') {
        Some(p) => &name[..p],
        None => name.as_str(),
    };
    stem.chars().take(32).collect()
}

fn recording_time() -> i64 {
    if let Ok(s) = env::var("SOURCE_DATE_EPOCH") {
        if let Ok(v) = s.parse() {
            return v;
        }
    }
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn open_output(path: &Path, force: bool) -> Result<File> {
    let res = if force {
        File::create(path)
    } else {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
    };
    match res {
        Ok(f) => Ok(f),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(UdfError::OutputExists(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn run(args: &Args) -> Result<()> {
    // a wrong CRC would author unreadable discs
    if !crc::self_test() {
        return Err(UdfError::CrcSelfTest);
    }
    if args.sparse {
        warn!("sparse detection is not implemented; writing dense extents");
    }

    let recording_time = recording_time();
    let volume_label = match (&args.volume, &args.output) {
        (Some(v), _) => v.clone(),
        (None, Some(p)) => derive_label(p),
        (None, None) => String::new(),
    };
    let volume_set = String::new();
    let limit = args.limit.unwrap_or(0);
    let progress = args.output.is_some() && io::stdout().is_terminal();

    if progress {
        println!("Scanning directory...");
    }
    let mut files = scan::scan(&args.source)?;
    if progress {
        println!("* Raw total: {}", humanize(files.total_content_bytes));
    }
    if limit > 0 && files.total_content_bytes > limit {
        return Err(UdfError::SizeLimitExceeded);
    }

    let cfg = BuildConfig {
        volume_label: volume_label.clone(),
        volume_set_identifier: volume_set.clone(),
        source_root: args.source.display().to_string(),
        image_name: args
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(stdout)".into()),
        recording_time,
    };
    let mut layout = build::build(&files, &cfg)?;
    let now = Timestamp::from_unix(recording_time);

    if progress {
        let highest = layout.extents.highest_end();
        println!(
            "Total ISO size: {}, or {} sectors",
            humanize(highest * 2048),
            highest
        );
    }

    if let Some(report) = &args.report {
        sidecar::write_report(report, &layout, &files, &volume_label, &volume_set, &now)?;
        sidecar::append_report(&mut layout, &mut files, report, limit)?;
    }

    let do_hash = args.hashes.is_some();
    let mut outfile = match &args.output {
        Some(p) => Some(open_output(p, args.force_iso)?),
        None => None,
    };
    let digests = match &mut outfile {
        Some(f) => writer::write_image(f, &layout, &mut files, do_hash, progress)?,
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            let d = writer::write_image(&mut lock, &layout, &mut files, do_hash, false)?;
            lock.flush()?;
            d
        }
    };

    if let (Some(table_path), Some(digests)) = (&args.hashes, &digests) {
        sidecar::write_hash_table(
            table_path,
            &layout,
            &files,
            &volume_label,
            &volume_set,
            &now,
            digests,
        )?;
        if let Some(f) = &mut outfile {
            sidecar::append_hash_table(f, &mut layout, &mut files, table_path, limit)?;
        }
    }

    if let Some(gap) = &args.gap {
        sidecar::write_gap_file(gap, &layout, &files)?;
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(a) => a,
        Err(e) => {
            let failure = e.use_stderr();
            let _ = e.print();
            return if failure {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mkudfiso: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metric() {
        assert_eq!(parse_metric("123").unwrap(), 123);
        assert_eq!(parse_metric("4KB").unwrap(), 4096);
        assert_eq!(parse_metric("640MB").unwrap(), 640 << 20);
        assert_eq!(parse_metric("4482MB").unwrap(), 4482 << 20);
        assert_eq!(parse_metric("2GB").unwrap(), 2 << 30);
        assert_eq!(parse_metric("1TB").unwrap(), 1 << 40);
        assert!(parse_metric("12XB").is_err());
        assert!(parse_metric("").is_err());
    }

    #[test]
    fn test_derive_label() {
        assert_eq!(derive_label(Path::new("/tmp/backup.iso")), "backup");
        assert_eq!(derive_label(Path::new("noext")), "noext");
        assert_eq!(derive_label(Path::new("a.b.c.iso")), "a.b.c");
        assert_eq!(derive_label(Path::new(".hidden")), "");
        let long = "x".repeat(40);
        assert_eq!(derive_label(Path::new(&long)).len(), 32);
    }
}
