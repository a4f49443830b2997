//! vibemem CLI
//!
//! One memory store, rendered into every AI coding tool's context file.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};
use vibemem::learn::{ingest, Extractor};
use vibemem::memory::{merge, rank_relevant};
use vibemem::{
    ApproxCounter, Category, Cl100kCounter, MemoryRecord, MemoryStore, NewMemory, Priority, Scope,
    SyncEngine, TokenCounter, VibememConfig,
};

/// Column width for memory content in `show` and `context`
const CONTENT_COLUMNS: usize = 72;

/// vibemem - Universal memory for AI coding tools
#[derive(Parser, Debug)]
#[command(name = "vibemem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project directory
    #[arg(short = 'C', long, default_value = ".", global = true)]
    cwd: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Count tokens with the byte estimate instead of cl100k
    #[arg(long, global = true)]
    approx_tokens: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the memory store and default config
    Init {
        /// Initialize the global store instead of the project store
        #[arg(long)]
        global: bool,
    },

    /// Add a memory
    Add {
        /// arch, api, gotcha, error, cred, style, platform[:name] or a custom slug
        category: String,

        content: String,

        /// critical, normal or low
        #[arg(short, long)]
        priority: Option<String>,

        #[arg(long)]
        global: bool,
    },

    /// List memories
    Show {
        /// Only this category
        #[arg(short, long)]
        category: Option<String>,

        /// Show one memory in full
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        global: bool,
    },

    /// Remove a memory by id or unique content match
    Forget {
        target: String,

        #[arg(long)]
        global: bool,
    },

    /// Write context files for AI tools
    Sync {
        /// Tools to sync (default: detected tools, or all)
        #[arg(short, long = "tool")]
        tools: Vec<String>,

        /// Render without writing files
        #[arg(long)]
        dry_run: bool,
    },

    /// Extract memories from a conversation log or a JSON candidate list
    Learn {
        file: PathBuf,

        /// Add without asking
        #[arg(short, long)]
        yes: bool,

        #[arg(long)]
        global: bool,
    },

    /// Preview which memories match a query
    Context {
        query: String,

        #[arg(short = 'n', long, default_value_t = 10)]
        max_items: usize,
    },

    /// Store size and per-tool budget usage
    Stats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let root = std::fs::canonicalize(&cli.cwd)
        .with_context(|| format!("Cannot open project directory {}", cli.cwd.display()))?;
    debug!("Project root: {:?}", root);

    let counter = token_counter(cli.approx_tokens);

    match cli.command {
        Command::Init { global } => run_init(&root, global),
        Command::Add {
            category,
            content,
            priority,
            global,
        } => run_add(&root, global, &category, &content, priority.as_deref()),
        Command::Show {
            category,
            id,
            global,
        } => run_show(&root, global, category.as_deref(), id.as_deref(), counter.as_ref()),
        Command::Forget { target, global } => run_forget(&root, global, &target),
        Command::Sync { tools, dry_run } => run_sync(&root, &tools, dry_run, counter),
        Command::Learn { file, yes, global } => run_learn(&root, global, &file, yes),
        Command::Context { query, max_items } => {
            run_context(&root, &query, max_items, counter.as_ref())
        }
        Command::Stats => run_stats(&root, counter.as_ref()),
    }
}

fn token_counter(approx: bool) -> Box<dyn TokenCounter> {
    if approx {
        return Box::new(ApproxCounter);
    }
    match Cl100kCounter::new() {
        Ok(counter) => Box::new(counter),
        Err(e) => {
            warn!("Falling back to approximate token counts: {}", e);
            Box::new(ApproxCounter)
        }
    }
}

fn store_dir(root: &Path, global: bool) -> anyhow::Result<PathBuf> {
    if global {
        Ok(MemoryStore::global_dir()?)
    } else {
        Ok(MemoryStore::project_dir(root))
    }
}

fn open_store(root: &Path, global: bool) -> anyhow::Result<MemoryStore> {
    let dir = store_dir(root, global)?;
    let scope = if global { Scope::Global } else { Scope::Project };
    MemoryStore::open(&dir, scope)
        .with_context(|| format!("Failed to load memory store in {}", dir.display()))
}

fn load_config(root: &Path) -> anyhow::Result<VibememConfig> {
    let global = MemoryStore::global_dir().ok();
    VibememConfig::load(root, global.as_deref()).context("Failed to load config")
}

/// Project records, preceded by global ones when configured
fn merged_records(root: &Path, config: &VibememConfig) -> anyhow::Result<Vec<MemoryRecord>> {
    let project = open_store(root, false)?;
    if !config.sync.include_global {
        return Ok(project.records().to_vec());
    }
    let global = open_store(root, true)?;
    Ok(merge(global.records(), project.records()))
}

fn run_init(root: &Path, global: bool) -> anyhow::Result<()> {
    let dir = store_dir(root, global)?;
    let store = open_store(root, global)?;
    store.save()?;

    let config_path = dir.join(vibemem::config::CONFIG_FILE);
    if !config_path.exists() {
        VibememConfig::default().save(&config_path)?;
    }

    println!("Initialized {} memory in {}", store.scope(), dir.display());
    if !global {
        println!("Add memories with `vibemem add <category> <content>`, then run `vibemem sync`.");
    }
    Ok(())
}

fn run_add(
    root: &Path,
    global: bool,
    category: &str,
    content: &str,
    priority: Option<&str>,
) -> anyhow::Result<()> {
    let memory = NewMemory::parse(category, content, priority)?;
    let mut store = open_store(root, global)?;
    let category = memory.category.clone();
    let id = store.add(memory);
    store.save()?;
    println!("Added {} [{}]", id, category);
    Ok(())
}

fn run_show(
    root: &Path,
    global: bool,
    category: Option<&str>,
    id: Option<&str>,
    counter: &dyn TokenCounter,
) -> anyhow::Result<()> {
    let store = open_store(root, global)?;

    if let Some(id) = id {
        let Some(record) = store.get(id) else {
            bail!("No memory with id {}", id);
        };
        println!("id:       {}", record.id);
        println!("category: {}", record.category);
        println!("priority: {}", record.priority);
        println!("scope:    {}", record.scope);
        println!("created:  {}", record.created_at.to_rfc3339());
        println!("tokens:   {}", record.size_tokens(counter));
        println!();
        println!("{}", record.content);
        return Ok(());
    }

    let filter: Option<Category> = category.map(str::parse).transpose()?;
    let records = store.list(filter.as_ref());
    if records.is_empty() {
        println!("No memories. Add one with `vibemem add <category> <content>`.");
        return Ok(());
    }

    for record in &records {
        println!("{}", format_row(record));
    }
    println!();
    println!(
        "{} memories, {} tokens",
        records.len(),
        store.total_tokens(counter)
    );
    Ok(())
}

fn format_row(record: &MemoryRecord) -> String {
    let mark = match record.priority {
        Priority::Critical => "!",
        Priority::Low => "-",
        Priority::Normal => " ",
    };
    format!(
        "{} {} {:<12} {}",
        record.id,
        mark,
        record.category.to_string(),
        truncate_columns(&record.content, CONTENT_COLUMNS)
    )
}

/// Cut to `max` terminal columns on one line, marking the cut with `…`
fn truncate_columns(text: &str, max: usize) -> String {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.width() <= max {
        return line;
    }
    let mut out = String::new();
    let mut width = 0;
    for c in line.chars() {
        let w = c.width().unwrap_or(1);
        if width + w + 1 > max {
            break;
        }
        out.push(c);
        width += w;
    }
    out.push('…');
    out
}

fn run_forget(root: &Path, global: bool, target: &str) -> anyhow::Result<()> {
    let mut store = open_store(root, global)?;
    let Some(record) = store.find(target).cloned() else {
        bail!("No single memory matches {:?}", target);
    };
    store.forget(&record.id);
    store.save()?;
    println!(
        "Removed {}: {}",
        record.id,
        truncate_columns(&record.content, CONTENT_COLUMNS)
    );
    Ok(())
}

fn run_sync(
    root: &Path,
    tools: &[String],
    dry_run: bool,
    counter: Box<dyn TokenCounter>,
) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let records = merged_records(root, &config)?;
    let engine = SyncEngine::new(config.registry(), config.compression_config()?, counter);
    let tools = engine.tools_to_sync(root, tools, config.sync.auto_detect_tools);

    let report = engine.sync(root, &records, &tools, dry_run);

    if dry_run {
        println!("Dry run - no files written\n");
    }
    for result in &report.results {
        match &result.outcome {
            Ok(output) => {
                println!(
                    "✓ {}: {} ({} / {} tokens)",
                    result.tool,
                    output.path.display(),
                    output.tokens,
                    output.budget
                );
                if output.compressed() {
                    println!(
                        "  compressed from {} tokens: {} kept, {} summarized, {} dropped",
                        output.original_tokens, output.kept, output.summarized, output.dropped
                    );
                }
                for warning in &output.warnings {
                    println!("  over budget: {}", warning);
                }
            }
            Err(e) => println!("✗ {}: {}", result.tool, e),
        }
    }

    if report.failed() > 0 {
        bail!("{} of {} tools failed", report.failed(), report.results.len());
    }
    Ok(())
}

fn run_learn(root: &Path, global: bool, file: &Path, yes: bool) -> anyhow::Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let candidates = Extractor::new().read(&input);

    if candidates.is_empty() {
        println!("No memories found in {}", file.display());
        return Ok(());
    }

    println!("Found {} candidate memories:", candidates.len());
    for candidate in &candidates {
        println!(
            "  [{}] {}",
            candidate.category,
            truncate_columns(&candidate.content, CONTENT_COLUMNS)
        );
    }

    if !yes && !confirm("Add these memories?")? {
        println!("Nothing added.");
        return Ok(());
    }

    let mut store = open_store(root, global)?;
    let report = ingest(&mut store, candidates);
    store.save()?;

    println!("Added {} memories", report.added.len());
    for (candidate, reason) in &report.rejected {
        println!(
            "  skipped {}: {}",
            truncate_columns(&candidate.content, 40),
            reason
        );
    }
    Ok(())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    write!(out, "{} [y/N]: ", question)?;
    out.flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim(), "y" | "Y" | "yes"))
}

fn run_context(
    root: &Path,
    query: &str,
    max_items: usize,
    counter: &dyn TokenCounter,
) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let records = merged_records(root, &config)?;
    let relevant = rank_relevant(&records, query, Utc::now(), max_items);

    println!("Query: {}\n", query);
    if relevant.is_empty() {
        println!("Nothing relevant.");
        return Ok(());
    }

    println!("Would load:");
    for record in &relevant {
        println!(
            "  [{}] {}",
            record.category,
            truncate_columns(&record.content, CONTENT_COLUMNS)
        );
    }
    let total: usize = relevant.iter().map(|r| r.size_tokens(counter)).sum();
    println!("\nTotal context: {} tokens", total);
    Ok(())
}

fn run_stats(root: &Path, counter: &dyn TokenCounter) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let records = merged_records(root, &config)?;

    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    let mut critical = 0;
    for record in &records {
        *by_category.entry(record.category.to_string()).or_default() += 1;
        if record.is_critical() {
            critical += 1;
        }
    }
    let total: usize = records.iter().map(|r| r.size_tokens(counter)).sum();

    println!("{} memories ({} critical), {} tokens", records.len(), critical, total);
    for (category, count) in &by_category {
        println!("  {:<20} {}", category, count);
    }

    println!("\nBudgets:");
    for profile in config.registry().profiles() {
        let usage = if profile.token_budget == 0 {
            0.0
        } else {
            total as f64 / profile.token_budget as f64 * 100.0
        };
        let note = if total > profile.token_budget {
            "compressed"
        } else {
            "fits"
        };
        println!(
            "  {:<12} {:>6} tokens  {:>5.0}%  {}",
            profile.name, profile.token_budget, usage, note
        );
    }
    Ok(())
}
