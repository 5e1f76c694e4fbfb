//! HeadPages CLI
//!
//! Inspection and maintenance tool for a HeadPages profile: a directory
//! holding the two storage tiers as JSON files (`local.json`, `sync.json`).

mod file_area;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use hp_compiler::{compile_rules, RuleIdAllocator};
use hp_core::storage::{Tier, SYNC_QUOTA_BYTES};
use hp_core::store::SettingsStore;
use hp_core::types::{FilterKind, HeaderKind};

use file_area::FileArea;

#[derive(Parser)]
#[command(name = "hp-cli")]
#[command(about = "HeadPages settings inspector and rule compiler")]
struct Cli {
    /// Profile directory holding local.json and sync.json
    #[arg(short, long, default_value = ".headpages")]
    profile: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stored settings graph
    Show,

    /// Export the pages as a JSON array
    Export {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import pages from a JSON array file
    Import {
        /// Input file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compile the active pages into declarative rules
    Compile {
        /// Print the raw rule JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Mirror the local tier into the sync tier
    Sync,

    /// Clear both tiers and reinstate the default page
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Show => cmd_show(&cli.profile).await,
        Commands::Export { output } => cmd_export(&cli.profile, &output).await,
        Commands::Import { input } => cmd_import(&cli.profile, &input).await,
        Commands::Compile { json } => cmd_compile(&cli.profile, json).await,
        Commands::Sync => cmd_sync(&cli.profile).await,
        Commands::Reset { yes } => cmd_reset(&cli.profile, yes).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn open_store(profile: &Path) -> Result<SettingsStore, String> {
    fs::create_dir_all(profile)
        .map_err(|e| format!("Failed to create profile directory '{}': {e}", profile.display()))?;

    let local = FileArea::open(profile.join("local.json"), Tier::Local, None)
        .map_err(|e| format!("Failed to open local tier: {e}"))?;
    let sync = FileArea::open(profile.join("sync.json"), Tier::Sync, Some(SYNC_QUOTA_BYTES))
        .map_err(|e| format!("Failed to open sync tier: {e}"))?;

    Ok(SettingsStore::new(Arc::new(local), Arc::new(sync)))
}

fn kind_label(kind: HeaderKind) -> &'static str {
    match kind {
        HeaderKind::Request => "request",
        HeaderKind::Response => "response",
    }
}

async fn cmd_show(profile: &Path) -> Result<(), String> {
    let store = open_store(profile)?;
    let settings = store
        .load()
        .await
        .map_err(|e| format!("Failed to load settings: {e}"))?;

    println!("Pages: {}", settings.pages.len());
    for page in &settings.pages {
        let mut markers = Vec::new();
        if page.enabled {
            markers.push("selected");
        }
        if page.keep_enabled {
            markers.push("pinned");
        }
        let suffix = if markers.is_empty() {
            String::new()
        } else {
            format!(" [{}]", markers.join(", "))
        };
        println!("  [{}] {}{}", page.id, page.name, suffix);

        for header in &page.headers {
            let state = if header.enabled { "on " } else { "off" };
            println!(
                "      {state} {:<8} {} = {}",
                kind_label(header.kind),
                header.name,
                header.value
            );
        }
        for filter in &page.filters {
            let state = if filter.enabled { "on " } else { "off" };
            let sign = match filter.kind {
                FilterKind::Include => "+",
                FilterKind::Exclude => "-",
            };
            let validity = if filter.valid { "" } else { " (invalid)" };
            println!("      {state} filter   {sign}{}{validity}", filter.value);
        }
    }

    let dark = store
        .dark_mode()
        .await
        .map_err(|e| format!("Failed to read dark mode: {e}"))?;
    println!("Dark mode: {}", if dark { "on" } else { "off" });

    Ok(())
}

async fn cmd_export(profile: &Path, output: &Path) -> Result<(), String> {
    let store = open_store(profile)?;
    store
        .load()
        .await
        .map_err(|e| format!("Failed to load settings: {e}"))?;

    let json = store
        .export_json()
        .await
        .map_err(|e| format!("Failed to export pages: {e}"))?;
    fs::write(output, json)
        .map_err(|e| format!("Failed to write '{}': {e}", output.display()))?;

    println!("Exported pages to '{}'", output.display());
    Ok(())
}

async fn cmd_import(profile: &Path, input: &Path) -> Result<(), String> {
    let store = open_store(profile)?;
    store
        .load()
        .await
        .map_err(|e| format!("Failed to load settings: {e}"))?;

    let text = fs::read_to_string(input)
        .map_err(|e| format!("Failed to read '{}': {e}", input.display()))?;
    let count = store
        .import_json(&text)
        .await
        .map_err(|e| format!("Failed to import pages: {e}"))?;

    if count == 0 {
        println!("Nothing imported: input was not a JSON array of pages");
    } else {
        println!("Imported {count} page(s)");
    }
    Ok(())
}

async fn cmd_compile(profile: &Path, json: bool) -> Result<(), String> {
    let store = open_store(profile)?;
    let settings = store
        .load()
        .await
        .map_err(|e| format!("Failed to load settings: {e}"))?;

    let mut ids = RuleIdAllocator::new([]);
    let rules = compile_rules(&settings.pages, &mut ids);

    if json {
        let text = serde_json::to_string_pretty(&rules)
            .map_err(|e| format!("Failed to serialize rules: {e}"))?;
        println!("{text}");
        return Ok(());
    }

    println!("Rules: {}", rules.len());
    for rule in &rules {
        let (side, mods) = match (&rule.action.request_headers, &rule.action.response_headers) {
            (Some(mods), _) => ("request", mods),
            (_, Some(mods)) => ("response", mods),
            (None, None) => continue,
        };
        for edit in mods {
            println!(
                "  [{}] {side:<8} {} = {}  when {}",
                rule.id, edit.header, edit.value, rule.condition.regex_filter
            );
        }
    }
    Ok(())
}

async fn cmd_sync(profile: &Path) -> Result<(), String> {
    let store = open_store(profile)?;
    store
        .load()
        .await
        .map_err(|e| format!("Failed to load settings: {e}"))?;

    let report = store
        .sync_to_remote()
        .await
        .map_err(|e| format!("Sync failed: {e}"))?;

    println!("Mirrored {} page(s) into the sync tier", report.pages_mirrored);
    for skipped in &report.skipped {
        println!(
            "  page {} skipped: {} bytes over the {}-byte quota",
            skipped.page_id, skipped.size, skipped.quota
        );
    }
    Ok(())
}

async fn cmd_reset(profile: &Path, yes: bool) -> Result<(), String> {
    if !yes {
        return Err("Refusing to reset without --yes".to_string());
    }

    let store = open_store(profile)?;
    store
        .reset_all()
        .await
        .map_err(|e| format!("Reset failed: {e}"))?;

    println!("Profile reset to the default page");
    Ok(())
}
