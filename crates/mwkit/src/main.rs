use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use log::{info, warn};
use mwkit_core::api_error::{FailureKind, classify, known_codes};
use mwkit_core::client::{MediaWikiClient, MediaWikiClientConfig, WikiWriteApi};
use mwkit_core::config::{DEFAULT_CONFIG_FILENAME, ToolConfig, load_config};
use mwkit_core::report::ChangeSummary;
use mwkit_core::session::{EditAction, EditOptions, EditOutcome, run_edit_session};
use mwkit_core::site::{NS_CATEGORY, Site};
use mwkit_core::transform::{TransformStep, apply_steps};
use mwkit_core::wikitext::Wikitext;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Parser)]
#[command(
    name = "mwkit",
    version,
    about = "Rewrite MediaWiki wikitext: categories, regex replacements and edit sessions"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "UID", help = "Site identifier, e.g. enwiki")]
    site: Option<String>,
    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    site: Option<String>,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            site: cli.site.clone(),
            json: cli.json,
        }
    }

    fn load_config(&self) -> Result<ToolConfig> {
        dotenvy::dotenv().ok();
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
        load_config(&path)
    }

    fn resolve_site(&self) -> Result<(ToolConfig, Arc<Site>)> {
        let config = self.load_config()?;
        let site = config.resolve_site(self.site.as_deref())?;
        Ok((config, site))
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "List the sites known to the registry")]
    Sites,
    #[command(about = "Classify a MediaWiki API error code")]
    Classify(ClassifyArgs),
    #[command(about = "Inspect or edit category links in a local wikitext file")]
    Category(CategoryArgs),
    #[command(about = "Run a regex (or literal) replacement over a local wikitext file")]
    Replace(ReplaceArgs),
    #[command(about = "Load a page from the wiki, transform it and save it")]
    Edit(EditArgs),
}

#[derive(Debug, Args)]
struct ClassifyArgs {
    code: String,
    #[arg(default_value = "")]
    info: String,
}

#[derive(Debug, Args)]
struct CategoryArgs {
    #[command(subcommand)]
    command: CategorySubcommand,
}

#[derive(Debug, Subcommand)]
enum CategorySubcommand {
    Has {
        file: PathBuf,
        name: String,
    },
    Add {
        file: PathBuf,
        name: String,
        #[arg(long, value_name = "KEY")]
        sortkey: Option<String>,
        #[arg(long, help = "Report without writing the file")]
        dry_run: bool,
    },
    Remove {
        file: PathBuf,
        name: String,
        #[arg(long, help = "Report without writing the file")]
        dry_run: bool,
    },
}

#[derive(Debug, Args)]
struct ReplaceArgs {
    file: PathBuf,
    pattern: String,
    template: String,
    #[arg(long, help = "Replace at most N matches")]
    limit: Option<usize>,
    #[arg(long, help = "Treat PATTERN as plain text and TEMPLATE verbatim")]
    literal: bool,
    #[arg(long, help = "Report without writing the file")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct EditArgs {
    title: String,
    #[arg(long = "add-category", value_name = "NAME")]
    add_categories: Vec<String>,
    #[arg(long = "remove-category", value_name = "NAME")]
    remove_categories: Vec<String>,
    #[arg(long = "replace", value_name = "PATTERN=>TEMPLATE")]
    replacements: Vec<String>,
    #[arg(long, help = "Treat --replace pairs as plain text")]
    literal: bool,
    #[arg(long, value_name = "TEXT")]
    append: Option<String>,
    #[arg(long, value_name = "TEXT")]
    prepend: Option<String>,
    #[arg(long, value_name = "TEXT")]
    summary: Option<String>,
    #[arg(long)]
    minor: bool,
    #[arg(long)]
    bot: bool,
    #[arg(long, help = "Show what would change without saving")]
    dry_run: bool,
}

impl EditArgs {
    fn steps(&self) -> Result<Vec<TransformStep>> {
        let mut steps = Vec::new();
        for name in &self.remove_categories {
            steps.push(TransformStep::RemoveCategory { name: name.clone() });
        }
        for spec in &self.replacements {
            steps.push(TransformStep::parse_replace(spec, self.literal)?);
        }
        for name in &self.add_categories {
            steps.push(TransformStep::AddCategory {
                name: name.clone(),
                sort_key: None,
            });
        }
        if let Some(text) = &self.prepend {
            steps.push(TransformStep::Prepend { text: text.clone() });
        }
        if let Some(text) = &self.append {
            steps.push(TransformStep::Append { text: text.clone() });
        }
        if steps.is_empty() {
            bail!(
                "edit needs at least one of --add-category, --remove-category, --replace, --append or --prepend"
            );
        }
        Ok(steps)
    }
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    let result = match cli.command {
        Some(Commands::Sites) => run_sites(&runtime),
        Some(Commands::Classify(args)) => run_classify(&runtime, args),
        Some(Commands::Category(CategoryArgs { command })) => match command {
            CategorySubcommand::Has { file, name } => run_category_has(&runtime, &file, &name),
            CategorySubcommand::Add {
                file,
                name,
                sortkey,
                dry_run,
            } => run_category_add(&runtime, &file, &name, sortkey.as_deref(), dry_run),
            CategorySubcommand::Remove {
                file,
                name,
                dry_run,
            } => run_category_remove(&runtime, &file, &name, dry_run),
        },
        Some(Commands::Replace(args)) => run_replace(&runtime, args),
        Some(Commands::Edit(args)) => run_edit(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    };
    if let Err(error) = &result {
        print_failure_details(error);
    }
    result
}

#[derive(Debug, Serialize)]
struct SiteRow {
    uid: String,
    api_url: String,
    category_namespace: Option<String>,
}

fn run_sites(runtime: &RuntimeOptions) -> Result<()> {
    let config = runtime.load_config()?;
    let registry = config.registry()?;
    let rows = registry
        .sites()
        .map(|site| SiteRow {
            uid: site.uid().to_string(),
            api_url: site.api_url().to_string(),
            category_namespace: site.namespace(NS_CATEGORY).map(|ns| ns.name.clone()),
        })
        .collect::<Vec<_>>();

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    println!("sites.count: {}", rows.len());
    for row in rows {
        println!(
            "site.{}: {} (category: {})",
            row.uid,
            row.api_url,
            row.category_namespace.as_deref().unwrap_or("<none>")
        );
    }
    Ok(())
}

fn run_classify(runtime: &RuntimeOptions, args: ClassifyArgs) -> Result<()> {
    let payload = json!({ "code": args.code, "info": args.info });
    let failure = classify(&args.code, &args.info, payload);

    if runtime.json {
        let report = json!({
            "kind": failure.name(),
            "code": failure.code(),
            "info": failure.info(),
            "known": failure.is_known(),
            "retryable": failure.is_retryable(),
            "message": failure.message(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("kind: {}", failure.name());
    println!("known: {}", format_flag(failure.is_known()));
    println!("retryable: {}", format_flag(failure.is_retryable()));
    println!("message: {}", failure.message());
    if !failure.is_known() {
        println!(
            "known_codes: {}",
            known_codes().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct LocalEditReport {
    file: String,
    changed: bool,
    written: bool,
    changes: ChangeSummary,
    report: Vec<String>,
}

fn run_category_has(runtime: &RuntimeOptions, file: &Path, name: &str) -> Result<()> {
    let (_, site) = runtime.resolve_site()?;
    let content = read_wikitext(file)?;
    let doc = Wikitext::new(site.as_ref(), content);
    let present = doc.has_category(name)?;

    if runtime.json {
        let report = json!({
            "file": normalize_path(file),
            "category": name,
            "present": present,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("file: {}", normalize_path(file));
        println!("category: {name}");
        println!("present: {}", format_flag(present));
    }
    Ok(())
}

fn run_category_add(
    runtime: &RuntimeOptions,
    file: &Path,
    name: &str,
    sort_key: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    let (_, site) = runtime.resolve_site()?;
    let content = read_wikitext(file)?;
    let mut doc = Wikitext::new(site.as_ref(), content);
    if !doc.add_category(name, sort_key)? {
        info!("{} already links [[{name}]]", normalize_path(file));
    }
    finish_local_edit(runtime, file, &doc, dry_run)
}

fn run_category_remove(
    runtime: &RuntimeOptions,
    file: &Path,
    name: &str,
    dry_run: bool,
) -> Result<()> {
    let (_, site) = runtime.resolve_site()?;
    let content = read_wikitext(file)?;
    let mut doc = Wikitext::new(site.as_ref(), content);
    if !doc.remove_category(name)? {
        info!("{} has no link to [[{name}]]", normalize_path(file));
    }
    finish_local_edit(runtime, file, &doc, dry_run)
}

fn run_replace(runtime: &RuntimeOptions, args: ReplaceArgs) -> Result<()> {
    let (_, site) = runtime.resolve_site()?;
    let content = read_wikitext(&args.file)?;
    let mut doc = Wikitext::new(site.as_ref(), content);
    if args.literal {
        if args.limit.is_some() {
            warn!("--limit is ignored with --literal");
        }
        doc.replace_literal(&args.pattern, &args.template);
    } else {
        doc.replace(&args.pattern, &args.template, args.limit)?;
    }
    finish_local_edit(runtime, &args.file, &doc, args.dry_run)
}

fn finish_local_edit(
    runtime: &RuntimeOptions,
    file: &Path,
    doc: &Wikitext<'_, Site>,
    dry_run: bool,
) -> Result<()> {
    let changed = doc.is_changed();
    let written = changed && !dry_run;
    if written {
        fs::write(file, doc.text())
            .with_context(|| format!("failed to write {}", normalize_path(file)))?;
    }

    let report = LocalEditReport {
        file: normalize_path(file),
        changed,
        written,
        changes: doc.change_summary(),
        report: doc.human_report(),
    };
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("file: {}", report.file);
    println!("changed: {}", format_flag(report.changed));
    println!("written: {}", format_flag(report.written));
    print_change_summary("changes", &report.changes);
    if dry_run && changed {
        println!("\n{}", doc.text());
    }
    Ok(())
}

fn run_edit(runtime: &RuntimeOptions, args: EditArgs) -> Result<()> {
    let steps = args.steps()?;
    let (config, site) = runtime.resolve_site()?;
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::for_site(&site, &config))?;

    if !args.dry_run {
        let (Some(username), Some(password)) = (env_value("MW_BOT_USER"), env_value("MW_BOT_PASS"))
        else {
            bail!("saving edits requires MW_BOT_USER and MW_BOT_PASS (use --dry-run to preview)");
        };
        client
            .login(&username, &password)
            .with_context(|| format!("failed to log in to {}", client.api_url()))?;
    }

    let options = EditOptions {
        summary: args.summary.clone(),
        dry_run: args.dry_run,
        minor: args.minor,
        bot: args.bot,
    };
    let outcome = run_edit_session(&mut client, site.as_ref(), &args.title, &options, |doc| {
        apply_steps(doc, &steps)
    })?;
    print_edit_outcome(runtime, site.uid(), &outcome)
}

fn print_edit_outcome(runtime: &RuntimeOptions, site_uid: &str, outcome: &EditOutcome) -> Result<()> {
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    println!("site: {site_uid}");
    println!("title: {}", outcome.title);
    println!("action: {}", action_label(outcome.action));
    println!("summary: {}", outcome.summary.as_deref().unwrap_or("<none>"));
    print_change_summary("changes", &outcome.changes);
    println!(
        "revision_id: {}",
        outcome
            .revision_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("requests: {}", outcome.request_count);
    Ok(())
}

fn print_change_summary(prefix: &str, summary: &ChangeSummary) {
    println!("{prefix}.substitutions: {}", summary.substitution_count);
    if summary.unique_substitutions.is_empty() {
        println!("{prefix}.unique: <none>");
    } else {
        for unique in &summary.unique_substitutions {
            println!("{prefix}.unique: {}", unique.human());
        }
    }
    if !summary.prepended.is_empty() {
        println!("{prefix}.prepended: {:?}", summary.prepended);
    }
    if !summary.appended.is_empty() {
        println!("{prefix}.appended: {:?}", summary.appended);
    }
}

fn print_failure_details(error: &anyhow::Error) {
    if let Some(failure) = error.downcast_ref::<FailureKind>() {
        eprintln!("failure.kind: {}", failure.name());
        eprintln!("failure.code: {}", failure.code());
        eprintln!("failure.info: {}", failure.info());
    }
}

fn action_label(action: EditAction) -> &'static str {
    match action {
        EditAction::Unchanged => "unchanged",
        EditAction::WouldCreate => "would create",
        EditAction::WouldUpdate => "would update",
        EditAction::Created => "created",
        EditAction::Updated => "updated",
    }
}

fn read_wikitext(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", normalize_path(path)))
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
