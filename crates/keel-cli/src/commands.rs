use std::collections::BTreeSet;

use anyhow::{bail, Context};
use colored::Colorize;
use keel_sdk::{ClosureRequest, StoreConfig, StoreHandle, StorePath};
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    let handle = StoreHandle::open(&config).context("opening store")?;
    let format = cli.format;

    match cli.command {
        Command::Info(args) => cmd_info(&handle, args, format),
        Command::Closure(args) => cmd_closure(&handle, args, format),
        Command::Dump(args) => cmd_dump(&handle, args).await,
        Command::Verify(args) => cmd_verify(&handle, args, format),
        Command::Locate(args) => cmd_locate(&handle, args, format),
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_info(handle: &StoreHandle, args: InfoArgs, format: OutputFormat) -> anyhow::Result<()> {
    let path = handle.parse_store_path(&args.path)?;
    let info = handle.resolve(&path)?;
    let trusted = handle.trusted_signers(&info);

    if format == OutputFormat::Json {
        return print_json(&json!({
            "path": handle.full_path(&path),
            "info": info,
            "trusted_signers": trusted,
        }));
    }

    println!("{}", handle.full_path(&path).display().to_string().bold());
    println!("  NAR hash:   {}", info.nar_hash().to_string().cyan());
    println!("  NAR size:   {}", info.nar_size());
    if let Some(deriver) = info.deriver() {
        println!("  Deriver:    {}", handle.full_path(deriver).display());
    }
    if let Some(ca) = info.content_address() {
        println!("  CA:         {ca}");
    }
    println!("  References: {}", info.references().len());
    for reference in info.references() {
        println!("    {}", handle.full_path(reference).display());
    }
    for sig in info.signatures() {
        let key = sig.split_once(':').map_or(sig.as_str(), |(name, _)| name);
        let mark = if trusted.iter().any(|t| t == key) {
            "trusted".green()
        } else {
            "untrusted".dimmed()
        };
        println!("  Signature:  {} ({mark})", key.yellow());
    }
    Ok(())
}

fn parse_all(handle: &StoreHandle, paths: &[String]) -> anyhow::Result<BTreeSet<StorePath>> {
    paths
        .iter()
        .map(|p| {
            handle
                .parse_store_path(p)
                .with_context(|| format!("invalid store path {p:?}"))
        })
        .collect()
}

fn cmd_closure(handle: &StoreHandle, args: ClosureArgs, format: OutputFormat) -> anyhow::Result<()> {
    let seeds = parse_all(handle, &args.paths)?;
    let request = ClosureRequest {
        flip_direction: args.reverse,
        include_outputs: args.include_outputs,
        include_derivers: args.include_derivers,
    };

    let paths: Vec<StorePath> = if args.topo {
        handle.sorted_closure(&seeds, &request)?
    } else {
        handle.closure_with(&seeds, &request)?.into_iter().collect()
    };
    let full: Vec<String> = paths
        .iter()
        .map(|p| handle.full_path(p).display().to_string())
        .collect();

    if format == OutputFormat::Json {
        return print_json(&full);
    }
    for path in &full {
        println!("{path}");
    }
    Ok(())
}

async fn cmd_dump(handle: &StoreHandle, args: DumpArgs) -> anyhow::Result<()> {
    let path = handle.parse_store_path(&args.path)?;
    let mut stream = handle.export_stream(&path).await?;

    let mut out: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match &args.output {
        Some(file) => Box::new(
            tokio::fs::File::create(file)
                .await
                .with_context(|| format!("creating {}", file.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut written = 0u64;
    while let Some(chunk) = stream.next_chunk().await? {
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;

    if let Some(file) = &args.output {
        eprintln!(
            "{} Wrote {} bytes to {}",
            "✓".green().bold(),
            written,
            file.display()
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct VerifyReport {
    path: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    nar_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn cmd_verify(handle: &StoreHandle, args: VerifyArgs, format: OutputFormat) -> anyhow::Result<()> {
    let paths = parse_all(handle, &args.paths)?;
    let mut reports = Vec::with_capacity(paths.len());

    for path in &paths {
        let full = handle.full_path(path).display().to_string();
        let report = match handle.verify(path) {
            Ok(verified) => VerifyReport {
                path: full,
                ok: true,
                nar_hash: Some(verified.nar_hash.to_string()),
                error: None,
            },
            Err(e) => VerifyReport {
                path: full,
                ok: false,
                nar_hash: None,
                error: Some(e.to_string()),
            },
        };
        if format == OutputFormat::Text {
            match &report.error {
                None => println!("{} {}", "✓".green().bold(), report.path),
                Some(e) => println!("{} {}: {}", "✗".red().bold(), report.path, e.red()),
            }
        }
        reports.push(report);
    }

    if format == OutputFormat::Json {
        print_json(&reports)?;
    }
    let failed = reports.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        bail!("{failed} of {} paths failed verification", reports.len());
    }
    Ok(())
}

fn cmd_locate(handle: &StoreHandle, args: LocateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let Some(path) = handle.query_path_from_hash_part(&args.hash)? else {
        bail!("no store path with hash part {}", args.hash);
    };
    let full = handle.full_path(&path).display().to_string();
    if format == OutputFormat::Json {
        return print_json(&json!({ "path": full }));
    }
    println!("{full}");
    Ok(())
}
