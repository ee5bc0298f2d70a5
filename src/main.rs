mod app;
mod cli;
mod collections;
mod completions;
mod config;
mod db;
mod domain;
mod events;
mod ident;
mod images;
mod init;
mod listing;
mod sync;

use app::{App, AppError};
use cli::{Commands, ImageCommands, InvoiceCommands, ItemCommands, ProfileCommands};
use collections::MemberDisposition;
use config::Config;
use domain::item::{ItemDraft, ItemPatch};
use domain::money::{DualMoney, Money};
use listing::ItemListFilter;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("json serialization should work")
    );
}

fn run() -> Result<(), AppError> {
    use clap::Parser;

    let cli = cli::Cli::parse();

    match &cli.command {
        Commands::Init => {
            init::init_all(&cli.db, &cli.config)?;
            println!("curio init completed");
            return Ok(());
        }
        Commands::Uninit => {
            init::uninit_all(&cli.db, &cli.config)?;
            println!("curio uninit completed");
            return Ok(());
        }
        Commands::Completions(args) => {
            let shell = args
                .shell
                .as_deref()
                .and_then(completions::parse_shell)
                .or_else(completions::detect_current_shell)
                .ok_or_else(|| {
                    AppError::InvalidArgument(
                        "could not detect shell; pass one of bash, zsh, fish".to_string(),
                    )
                })?;
            completions::generate_completions(shell, &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load(&cli.config)?;
    let mut app = App::open(&cli.db, config)?;

    match cli.command {
        Commands::Init | Commands::Uninit | Commands::Completions(_) => {
            unreachable!("handled before the store is opened")
        }
        Commands::Item(args) => run_item_command(&mut app, args.command)?,
        Commands::Collection(args) => run_collection_command(&mut app, args.command)?,
        Commands::Move(args) => {
            let outcome = app.move_item(&args.item_id, args.from.as_deref(), &args.to)?;
            match &outcome.from {
                Some(from) => println!("moved {} from {} to {}", outcome.item_id, from, outcome.to),
                None => println!("moved {} to {}", outcome.item_id, outcome.to),
            }
            if outcome.created_destination {
                println!("created collection {}", outcome.to);
            }
        }
        Commands::Image(args) => run_image_command(&mut app, args.command)?,
        Commands::Invoice(args) => run_invoice_command(&mut app, args.command)?,
        Commands::Profile(args) => match args.command {
            ProfileCommands::Show(show) => {
                let profile = app.profile()?;
                if show.json {
                    print_json(&profile);
                } else {
                    println!("display currency: {}", profile.display_currency);
                    println!("device id: {}", profile.device_id);
                }
            }
            ProfileCommands::Set(set) => {
                let profile = app.set_display_currency(&set.currency)?;
                println!("display currency set to {}", profile.display_currency);
            }
        },
        Commands::Sync(args) => match app.sync() {
            Ok(summary) => {
                if args.json {
                    print_json(&summary);
                } else {
                    print_push_summary(&summary.push);
                    print_pull_summary(&summary.pull);
                }
            }
            Err(err) => report_sync_outcome(err)?,
        },
        Commands::Push(args) => match app.push() {
            Ok(summary) => {
                if args.json {
                    print_json(&summary);
                } else {
                    print_push_summary(&summary);
                }
            }
            Err(err) => report_sync_outcome(err)?,
        },
        Commands::Pull(args) => match app.pull() {
            Ok(summary) => {
                if args.json {
                    print_json(&summary);
                } else {
                    print_pull_summary(&summary);
                }
            }
            Err(err) => report_sync_outcome(err)?,
        },
        Commands::Status(args) => {
            let status = app.sync_status()?;
            if args.json {
                print_json(&serde_json::json!({
                    "degraded": app.degraded(),
                    "sync_enabled": app.sync_enabled(),
                    "sync": status,
                }));
            } else {
                println!(
                    "store: {}",
                    if app.degraded() {
                        "degraded (in-memory)"
                    } else {
                        "durable"
                    }
                );
                println!(
                    "sync: {}",
                    if app.sync_enabled() { "enabled" } else { "disabled" }
                );
                println!("outbox: {} queued, {} due now", status.outbox_depth, status.due_now);
                if let Some(cursor) = &status.cursor {
                    println!("cursor: {cursor}");
                }
                if let Some(last_pull) = &status.last_pull_at {
                    println!("last pull: {last_pull}");
                }
                for row in &status.rows {
                    println!(
                        "  {} {} attempts={} next={}",
                        row.kind, row.entity_id, row.attempts, row.next_attempt_at
                    );
                }
            }
        }
        Commands::Check(args) => {
            let findings = app.check()?;
            if args.json {
                print_json(&findings);
            } else if findings.is_empty() {
                println!("store invariants hold");
            } else {
                for finding in &findings {
                    println!("{}: {}", finding.code, finding.message);
                }
            }
            if !findings.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn run_item_command(app: &mut App, command: ItemCommands) -> Result<(), AppError> {
    match command {
        ItemCommands::Add(args) => {
            let currency = app.profile()?.display_currency;
            let draft = ItemDraft {
                name: args.name,
                set_name: args.set_name,
                year: args.year,
                condition: args.condition,
                grade: args.grade,
                acquisition: money_arg(args.cost.as_deref(), args.cost_currency.as_deref(), &currency)?,
                value: money_arg(args.value.as_deref(), args.value_currency.as_deref(), &currency)?,
            };
            let item = app.create_item(draft, args.collection.as_deref())?;
            if let Some(file) = &args.image {
                let bytes = std::fs::read(file)?;
                let staged = app.stage_image(&item.id, bytes)?;
                app.commit_image(&staged.pending_id)?;
            }
            if args.json {
                let item = app
                    .show_item(&item.id)?
                    .ok_or_else(|| AppError::NotFound(item.id.clone()))?;
                print_json(&item);
            } else {
                println!("created {} [{}] {}", item.id, item.collection, item.name);
            }
        }
        ItemCommands::Update(args) => {
            let currency = app.profile()?.display_currency;
            let patch = ItemPatch {
                name: args.name,
                set_name: args.set_name,
                year: args.year,
                condition: args.condition,
                grade: args.grade,
                acquisition: money_arg(args.cost.as_deref(), args.cost_currency.as_deref(), &currency)?,
                value: money_arg(args.value.as_deref(), args.value_currency.as_deref(), &currency)?,
            };
            let item = match &args.image {
                Some(file) => {
                    let bytes = std::fs::read(file)?;
                    let staged = app.stage_image(&args.id, bytes)?;
                    app.save_item_with_image(&args.id, patch, &staged.pending_id)?
                }
                None => app.update_item(&args.id, patch)?,
            };
            if args.json {
                print_json(&item);
            } else {
                println!("updated {} [{}] {}", item.id, item.collection, item.name);
            }
        }
        ItemCommands::Rm(args) => {
            app.delete_item(&args.id)?;
            println!("deleted {}", args.id);
        }
        ItemCommands::Show(args) => match app.show_item(&args.id)? {
            Some(item) => {
                if args.json {
                    print_json(&item);
                } else {
                    print_item(&item);
                }
            }
            None => return Err(AppError::NotFound(args.id)),
        },
        ItemCommands::Ls(args) => {
            let filter = ItemListFilter {
                collection: args.collection,
                query: args.query,
                set_name: args.set_name,
                year: args.year,
            };
            let items = app.list_items(&filter)?;
            if args.json {
                print_json(&items);
            } else {
                listing::print_item_list(&items);
            }
        }
    }
    Ok(())
}

fn run_collection_command(app: &mut App, command: cli::CollectionCommands) -> Result<(), AppError> {
    match command {
        cli::CollectionCommands::New(args) => {
            let name = app.create_collection(&args.name)?;
            println!("created collection {name}");
        }
        cli::CollectionCommands::Rename(args) => {
            let name = app.rename_collection(&args.old, &args.new)?;
            println!("renamed {} to {}", args.old, name);
        }
        cli::CollectionCommands::Rm(args) => {
            let disposition = if args.discard_items {
                MemberDisposition::Discard
            } else {
                MemberDisposition::MoveTo(
                    args.into.unwrap_or_else(|| db::DEFAULT_COLLECTION.to_string()),
                )
            };
            let outcome = app.delete_collection(&args.name, disposition)?;
            match &outcome.destination {
                Some(target) => println!(
                    "deleted {}; moved {} item(s) to {}",
                    outcome.name,
                    outcome.moved.len(),
                    target
                ),
                None => println!(
                    "deleted {}; discarded {} item(s)",
                    outcome.name,
                    outcome.discarded.len()
                ),
            }
        }
        cli::CollectionCommands::Ls(args) => {
            let rows = app.list_collections()?;
            if args.json {
                print_json(&rows);
            } else {
                for row in &rows {
                    println!("{} ({} items)", row.name, row.item_count);
                }
                println!("{} collection(s)", rows.len());
            }
        }
    }
    Ok(())
}

fn run_image_command(app: &mut App, command: ImageCommands) -> Result<(), AppError> {
    match command {
        ImageCommands::Stage(args) => {
            let bytes = std::fs::read(&args.file)?;
            let staged = app.stage_image(&args.item_id, bytes)?;
            if args.json {
                print_json(&serde_json::json!({
                    "pending_id": staged.pending_id,
                    "item_id": staged.item_id,
                    "content_hash": staged.content_hash,
                    "bytes": staged.byte_len(),
                }));
            } else {
                println!("staged {} for {}", staged.pending_id, staged.item_id);
            }
        }
        ImageCommands::Commit(args) => {
            let record = app.commit_image_for(&args.item_id)?;
            match &record.remote_url {
                Some(url) => println!("committed image for {} ({url})", record.item_id),
                None => println!("committed image for {} (local only)", record.item_id),
            }
        }
        ImageCommands::Discard(args) => {
            if app.discard_image_for(&args.item_id) {
                println!("discarded staged image for {}", args.item_id);
            } else {
                println!("no staged image for {}", args.item_id);
            }
        }
        ImageCommands::Rm(args) => {
            if app.remove_image(&args.item_id)? {
                println!("removed image for {}", args.item_id);
            } else {
                println!("no image for {}", args.item_id);
            }
        }
        ImageCommands::Show(args) => match app.image_record(&args.item_id)? {
            Some(record) => {
                if args.json {
                    print_json(&serde_json::json!({
                        "item_id": record.item_id,
                        "content_hash": record.content_hash,
                        "bytes": record.data.len(),
                        "remote_url": record.remote_url,
                        "updated_at": record.updated_at,
                    }));
                } else {
                    println!(
                        "image for {}: {} bytes, hash {}",
                        record.item_id,
                        record.data.len(),
                        record.content_hash
                    );
                    if let Some(url) = &record.remote_url {
                        println!("remote: {url}");
                    }
                }
            }
            None => return Err(AppError::NotFound(args.item_id)),
        },
    }
    Ok(())
}

fn run_invoice_command(app: &mut App, command: InvoiceCommands) -> Result<(), AppError> {
    match command {
        InvoiceCommands::New(args) => {
            let invoice = app.create_invoice(&args.item_ids, &args.seller, &args.date)?;
            if args.json {
                print_json(&invoice);
            } else {
                println!(
                    "created invoice {} from {} ({} line(s))",
                    invoice.id,
                    invoice.seller,
                    invoice.lines.len()
                );
            }
        }
        InvoiceCommands::Edit(args) => {
            let invoice = app.edit_invoice(
                &args.id,
                args.seller.as_deref(),
                args.date.as_deref(),
                args.item_ids.as_deref(),
            )?;
            if args.json {
                print_json(&invoice);
            } else {
                println!("updated invoice {} ({} line(s))", invoice.id, invoice.lines.len());
            }
        }
        InvoiceCommands::Show(args) => match app.show_invoice(&args.id)? {
            Some(invoice) => {
                if args.json {
                    print_json(&invoice);
                } else {
                    println!(
                        "invoice {} from {} on {}",
                        invoice.id, invoice.seller, invoice.invoice_date
                    );
                    for line in &invoice.lines {
                        match &line.acquisition {
                            Some(cost) => println!("  {} {} ({})", line.item_id, line.name, cost.native),
                            None => println!("  {} {}", line.item_id, line.name),
                        }
                    }
                }
            }
            None => return Err(AppError::NotFound(args.id)),
        },
        InvoiceCommands::Ls(args) => {
            let invoices = app.list_invoices()?;
            if args.json {
                print_json(&invoices);
            } else {
                for invoice in &invoices {
                    println!(
                        "{} from {} on {} ({} line(s))",
                        invoice.id,
                        invoice.seller,
                        invoice.invoice_date,
                        invoice.lines.len()
                    );
                }
                println!("{} invoice(s)", invoices.len());
            }
        }
    }
    Ok(())
}

fn print_item(item: &domain::item::Item) {
    println!("{} [{}] {}", item.id, item.collection, item.name);
    if let Some(set_name) = &item.set_name {
        println!("  set: {set_name}");
    }
    if let Some(year) = item.year {
        println!("  year: {year}");
    }
    if let Some(condition) = &item.condition {
        println!("  condition: {condition}");
    }
    if let Some(grade) = &item.grade {
        println!("  grade: {grade}");
    }
    if let Some(acquisition) = &item.acquisition {
        println!("  cost: {}", acquisition.native);
    }
    if let Some(value) = &item.value {
        println!("  value: {}", value.display);
    }
    println!("  updated: {}", item.updated_at);
}

fn print_push_summary(summary: &sync::PushSummary) {
    println!(
        "push: {} pushed, {} tombstones, {} failed, {} deferred",
        summary.pushed, summary.tombstones, summary.failed, summary.deferred
    );
}

fn print_pull_summary(summary: &sync::PullSummary) {
    println!(
        concat!(
            "pull: {} fetched, {} item upserts, {} item deletes, ",
            "{} collection upserts, {} collection deletes, {} stale, {} own"
        ),
        summary.fetched,
        summary.item_upserts,
        summary.item_deletes,
        summary.collection_upserts,
        summary.collection_deletes,
        summary.skipped_stale,
        summary.skipped_own
    );
}

/// Transient sync failures are reported, not raised: the local store
/// already holds the committed state and a later cycle will retry.
fn report_sync_outcome(err: AppError) -> Result<(), AppError> {
    match err {
        AppError::Sync(sync_err) if sync_err.is_retryable() => {
            eprintln!("sync deferred: {sync_err}");
            Ok(())
        }
        other => Err(other),
    }
}

fn money_arg(
    amount: Option<&str>,
    currency: Option<&str>,
    default_currency: &str,
) -> Result<Option<DualMoney>, AppError> {
    match amount {
        None => Ok(None),
        Some(raw) => {
            let code = currency.unwrap_or(default_currency);
            let money = Money::parse(raw, code)
                .map_err(|err| AppError::InvalidArgument(err.to_string()))?;
            Ok(Some(DualMoney::same(money)))
        }
    }
}
