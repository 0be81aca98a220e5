//! List the subfiles of a VMARC archive.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example list_archive -- sources.vmarc
//! cargo run --example list_archive -- sources.vmarc PROFILE.EXEC
//! ```
//!
//! With a second argument of the form `NAME.TYPE` the matching subfile is
//! extracted into the current directory as `name.type`.

use anyhow::{Context, Result, bail};
use vmarc_archive::{Archive, ArchiveOptions};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: list_archive <archive> [NAME.TYPE]");
    };
    let wanted = args.next();

    let mut archive = Archive::open_with(&path, ArchiveOptions::default())
        .with_context(|| format!("failed to open {path}"))?;

    println!(
        "{:<8} {:<8} {:<4} {:<5} {:>6} {:<5} {:>10} {:>10}  {}",
        "NAME", "TYPE", "MODE", "RECFM", "LRECL", "METH", "PACKED", "BYTES", "DATE"
    );
    for (_, sf) in archive.subfiles() {
        println!(
            "{:<8} {:<8} {:<4} {:<5} {:>6} {:<5} {:>10} {:>10}  {}",
            sf.name,
            sf.file_type,
            sf.mode,
            sf.record_format.as_char(),
            sf.record_length,
            sf.method.as_str(),
            sf.compressed,
            sf.uncompressed,
            sf.timestamp
        );
    }
    println!("{} subfiles", archive.len());

    if let Some(wanted) = wanted {
        let (name, file_type) = wanted
            .split_once('.')
            .with_context(|| format!("{wanted} is not of the form NAME.TYPE"))?;
        let id = archive
            .subfiles()
            .find(|(_, sf)| {
                sf.name.eq_ignore_ascii_case(name) && sf.file_type.eq_ignore_ascii_case(file_type)
            })
            .map(|(id, _)| id)
            .with_context(|| format!("{wanted} is not in {path}"))?;
        let out = wanted.to_lowercase();
        let stats = archive.extract_to(id, &out)?;
        println!("extracted {wanted} to {out}: {} bytes", stats.produced);
    }

    Ok(())
}
