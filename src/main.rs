// Organisation Registry Cache - CLI
//
// orgcache build      Read the registry, derive, export artifacts
// orgcache build --dry-run   Rebuild from stored artifacts only
// orgcache show <class>      Print one stored table as JSON
// orgcache artifacts         List stored artifacts
// orgcache receipt           Show the latest build receipt

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use orgcache::{build, ArtifactStore, BuildOptions, EntityClass, Settings};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orgcache", version, about = "Effective-interval cache of an organisation registry")]
struct Cli {
    /// Settings file (TOML); defaults apply when it does not exist
    #[arg(long, default_value = "orgcache.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the cache
    Build {
        /// Keep the full validity history instead of current state only
        #[arg(long)]
        historic: bool,
        /// Rebuild from stored artifacts without contacting the registry
        #[arg(long)]
        dry_run: bool,
        /// Leave DAR addresses unresolved
        #[arg(long)]
        no_resolve_dar: bool,
    },
    /// Print one stored table
    Show { class: String },
    /// List stored artifacts
    Artifacts,
    /// Show the latest build receipt
    Receipt,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orgcache=info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    let store = ArtifactStore::open(&settings.cache.artifact_path)
        .with_context(|| format!("opening artifact store {}", settings.cache.artifact_path.display()))?;

    match cli.command {
        Command::Build {
            historic,
            dry_run,
            no_resolve_dar,
        } => run_build(
            &settings,
            &store,
            BuildOptions {
                historic: historic || settings.cache.historic,
                dry_run,
                resolve_dar: !no_resolve_dar,
            },
        ),
        Command::Show { class } => run_show(&store, &class),
        Command::Artifacts => run_artifacts(&store),
        Command::Receipt => run_receipt(&store),
    }
}

fn run_build(settings: &Settings, store: &ArtifactStore, options: BuildOptions) -> Result<()> {
    println!("🗂️  Organisation cache build");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if options.dry_run {
        println!("📦 Dry run: reading stored artifacts");
    } else {
        println!("📚 Registry: {}", settings.registry.base_url);
        println!("⏳ Mode: {}", if options.historic { "full history" } else { "current state" });
    }

    let (_, outcome) = build(settings, store, options).context("cache build failed")?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Entities: {}", outcome.entities);
    println!("✓ Fingerprint: {}", outcome.fingerprint);
    if let Some(id) = outcome.receipt_id {
        println!("✓ Receipt: #{}", id);
    }
    if outcome.summary.total == 0 {
        println!("✅ {}", outcome.summary.describe());
    } else {
        println!("⚠️  {}", outcome.summary.describe());
        for (kind, count) in &outcome.summary.by_kind {
            println!("   {}: {}", kind, count);
        }
    }
    Ok(())
}

fn run_show(store: &ArtifactStore, class: &str) -> Result<()> {
    let Some(class) = EntityClass::from_name(class) else {
        let known: Vec<&str> = EntityClass::ALL.iter().map(|c| c.as_str()).collect();
        bail!("unknown class {:?}; expected one of {}", class, known.join(", "));
    };

    let payload = store
        .load_payload(class.as_str())?
        .with_context(|| format!("no stored {} table; run a build first", class))?;
    let value: serde_json::Value = serde_json::from_str(&payload)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn run_artifacts(store: &ArtifactStore) -> Result<()> {
    let artifacts = store.list_artifacts()?;
    if artifacts.is_empty() {
        println!("📭 No artifacts stored yet");
        return Ok(());
    }

    println!("📦 {} artifacts", artifacts.len());
    for artifact in artifacts {
        println!(
            "   {:<16} {:>8} rows  {}  {}",
            artifact.name,
            artifact.row_count,
            artifact.fingerprint.get(..12).unwrap_or(&artifact.fingerprint),
            artifact.written_at.to_rfc3339()
        );
    }
    Ok(())
}

fn run_receipt(store: &ArtifactStore) -> Result<()> {
    let Some(receipt) = store.latest_receipt()? else {
        println!("📭 No builds recorded yet");
        return Ok(());
    };

    let shown = |time: Option<chrono::DateTime<chrono::Utc>>| {
        time.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };
    println!("🧾 Build #{}", receipt.id);
    println!("   historic:       {}", receipt.historic);
    println!("   query time:     {}", receipt.query_time.to_rfc3339());
    println!("   delivery start: {}", shown(receipt.start_delivery_time));
    println!("   delivery end:   {}", shown(receipt.end_delivery_time));
    if let (Some(entities), Some(issues)) = (receipt.entity_count, receipt.issue_count) {
        println!("   entities:       {}", entities);
        println!("   issues:         {}", issues);
    } else {
        println!("   ⚠️  build did not finish");
    }
    Ok(())
}
