use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, CommandFactory, Parser, Subcommand};

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

pub fn styled_command() -> clap::Command {
    Cli::command()
}

#[derive(Debug, Parser)]
#[command(name = "curio")]
#[command(bin_name = "curio")]
#[command(version)]
#[command(about = "A local-first collection tracker with cloud shadow sync")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        short = 'd',
        long,
        env = "CURIO_DB_PATH",
        default_value = ".curio/curio.sqlite",
        help = "Path to the local SQLite store."
    )]
    pub db: String,

    #[arg(
        long,
        env = "CURIO_CONFIG_PATH",
        default_value = ".curio/curio.toml",
        help = "Path to the curio config file."
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Initialize the local store and write a default config.")]
    Init,
    #[command(about = "Remove the local store and config.")]
    Uninit,
    #[command(about = "Manage items.")]
    Item(ItemArgs),
    #[command(about = "Manage collections.")]
    Collection(CollectionArgs),
    #[command(about = "Move an item between collections.")]
    Move(MoveArgs),
    #[command(about = "Stage, commit, and discard item images.")]
    Image(ImageArgs),
    #[command(about = "Manage invoice snapshots.")]
    Invoice(InvoiceArgs),
    #[command(about = "Show or edit the profile.")]
    Profile(ProfileArgs),
    #[command(about = "Push local changes to the mirror, then pull remote changes.")]
    Sync(SyncArgs),
    #[command(about = "Push local changes to the mirror.")]
    Push(SyncArgs),
    #[command(about = "Pull remote changes from the mirror.")]
    Pull(SyncArgs),
    #[command(about = "Show store and sync status.")]
    Status(StatusArgs),
    #[command(about = "Check store invariants without mutating anything.")]
    Check(CheckArgs),
    #[command(about = "Generate shell completions.")]
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ItemArgs {
    #[command(subcommand)]
    pub command: ItemCommands,
}

#[derive(Debug, Subcommand)]
pub enum ItemCommands {
    #[command(about = "Add an item.")]
    Add(ItemAddArgs),
    #[command(about = "Update item fields; empty string clears a text field.")]
    Update(ItemUpdateArgs),
    #[command(about = "Delete an item and its image.")]
    Rm(ItemRmArgs),
    #[command(about = "Show one item.")]
    Show(ItemShowArgs),
    #[command(about = "List items with filtering.")]
    Ls(ItemLsArgs),
}

#[derive(Debug, Args)]
pub struct ItemAddArgs {
    #[arg(help = "Item display name.")]
    pub name: String,

    #[arg(long = "set", help = "Set the item belongs to.")]
    pub set_name: Option<String>,

    #[arg(long, help = "Release or print year.")]
    pub year: Option<i64>,

    #[arg(long, help = "Condition description.")]
    pub condition: Option<String>,

    #[arg(long, help = "Grading label, e.g. 'PSA 9'.")]
    pub grade: Option<String>,

    #[arg(long, help = "Acquisition cost in major units, e.g. '12.50'.")]
    pub cost: Option<String>,

    #[arg(long, help = "Acquisition currency (defaults to the profile currency).")]
    pub cost_currency: Option<String>,

    #[arg(long, help = "Current value in major units.")]
    pub value: Option<String>,

    #[arg(long, help = "Value currency (defaults to the profile currency).")]
    pub value_currency: Option<String>,

    #[arg(
        short = 'c',
        long,
        help = "Collection to add the item to (created if missing)."
    )]
    pub collection: Option<String>,

    #[arg(long, help = "Image file to stage and commit with the item.")]
    pub image: Option<PathBuf>,

    #[arg(long, help = "Print the created item as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ItemUpdateArgs {
    #[arg(help = "Item id.")]
    pub id: String,

    #[arg(long, help = "New display name.")]
    pub name: Option<String>,

    #[arg(long = "set", help = "New set; empty string clears.")]
    pub set_name: Option<String>,

    #[arg(long, help = "New year.")]
    pub year: Option<i64>,

    #[arg(long, help = "New condition; empty string clears.")]
    pub condition: Option<String>,

    #[arg(long, help = "New grade; empty string clears.")]
    pub grade: Option<String>,

    #[arg(long, help = "New acquisition cost in major units.")]
    pub cost: Option<String>,

    #[arg(long, help = "Acquisition currency (defaults to the profile currency).")]
    pub cost_currency: Option<String>,

    #[arg(long, help = "New current value in major units.")]
    pub value: Option<String>,

    #[arg(long, help = "Value currency (defaults to the profile currency).")]
    pub value_currency: Option<String>,

    #[arg(long, help = "Image file to stage and commit with this save.")]
    pub image: Option<PathBuf>,

    #[arg(long, help = "Print the updated item as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ItemRmArgs {
    #[arg(help = "Item id.")]
    pub id: String,
}

#[derive(Debug, Args)]
pub struct ItemShowArgs {
    #[arg(help = "Item id.")]
    pub id: String,

    #[arg(long, help = "Print as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ItemLsArgs {
    #[arg(
        short = 'c',
        long,
        help = "Collection filter ('All Items' lists everything)."
    )]
    pub collection: Option<String>,

    #[arg(short = 'q', long, help = "Substring match over name, set, condition, grade.")]
    pub query: Option<String>,

    #[arg(long = "set", help = "Exact set filter.")]
    pub set_name: Option<String>,

    #[arg(long, help = "Exact year filter.")]
    pub year: Option<i64>,

    #[arg(long, help = "Print as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CollectionArgs {
    #[command(subcommand)]
    pub command: CollectionCommands,
}

#[derive(Debug, Subcommand)]
pub enum CollectionCommands {
    #[command(about = "Create a collection.")]
    New(CollectionNewArgs),
    #[command(about = "Rename a collection; members keep their identifiers.")]
    Rename(CollectionRenameArgs),
    #[command(about = "Delete a collection, moving or discarding its items.")]
    Rm(CollectionRmArgs),
    #[command(about = "List collections with item counts.")]
    Ls(CollectionLsArgs),
}

#[derive(Debug, Args)]
pub struct CollectionNewArgs {
    #[arg(help = "Collection name.")]
    pub name: String,
}

#[derive(Debug, Args)]
pub struct CollectionRenameArgs {
    #[arg(help = "Current name.")]
    pub old: String,

    #[arg(help = "New name.")]
    pub new: String,
}

#[derive(Debug, Args)]
pub struct CollectionRmArgs {
    #[arg(help = "Collection to delete.")]
    pub name: String,

    #[arg(
        long = "into",
        help = "Move member items into this collection (created if missing)."
    )]
    pub into: Option<String>,

    #[arg(
        long,
        help = "Discard member items instead of moving them.",
        conflicts_with = "into"
    )]
    pub discard_items: bool,
}

#[derive(Debug, Args)]
pub struct CollectionLsArgs {
    #[arg(long, help = "Print as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct MoveArgs {
    #[arg(help = "Item id.")]
    pub item_id: String,

    #[arg(long, help = "Collection the caller believes holds the item.")]
    pub from: Option<String>,

    #[arg(long, help = "Destination collection (created if missing).")]
    pub to: String,
}

#[derive(Debug, Args)]
pub struct ImageArgs {
    #[command(subcommand)]
    pub command: ImageCommands,
}

#[derive(Debug, Subcommand)]
pub enum ImageCommands {
    #[command(about = "Stage an image file as an uncommitted preview.")]
    Stage(ImageStageArgs),
    #[command(about = "Commit the staged preview for an item.")]
    Commit(ImageItemArgs),
    #[command(about = "Discard the staged preview for an item.")]
    Discard(ImageItemArgs),
    #[command(about = "Delete an item's committed image.")]
    Rm(ImageItemArgs),
    #[command(about = "Show an item's committed image record.")]
    Show(ImageShowArgs),
}

#[derive(Debug, Args)]
pub struct ImageStageArgs {
    #[arg(help = "Item id.")]
    pub item_id: String,

    #[arg(help = "Image file to stage.")]
    pub file: PathBuf,

    #[arg(long, help = "Print the staged preview as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ImageItemArgs {
    #[arg(help = "Item id.")]
    pub item_id: String,
}

#[derive(Debug, Args)]
pub struct ImageShowArgs {
    #[arg(help = "Item id.")]
    pub item_id: String,

    #[arg(long, help = "Print as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InvoiceArgs {
    #[command(subcommand)]
    pub command: InvoiceCommands,
}

#[derive(Debug, Subcommand)]
pub enum InvoiceCommands {
    #[command(about = "Snapshot items into a new invoice.")]
    New(InvoiceNewArgs),
    #[command(about = "Re-snapshot an invoice from current item state.")]
    Edit(InvoiceEditArgs),
    #[command(about = "Show one invoice.")]
    Show(InvoiceShowArgs),
    #[command(about = "List invoices.")]
    Ls(InvoiceLsArgs),
}

#[derive(Debug, Args)]
pub struct InvoiceNewArgs {
    #[arg(long, help = "Seller name.")]
    pub seller: String,

    #[arg(long, help = "Invoice date, e.g. '2026-03-01'.")]
    pub date: String,

    #[arg(required = true, help = "Item ids to snapshot.")]
    pub item_ids: Vec<String>,

    #[arg(long, help = "Print the invoice as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InvoiceEditArgs {
    #[arg(help = "Invoice id.")]
    pub id: String,

    #[arg(long, help = "New seller name.")]
    pub seller: Option<String>,

    #[arg(long, help = "New invoice date.")]
    pub date: Option<String>,

    #[arg(long = "items", num_args = 1.., help = "Replace the snapshotted item set.")]
    pub item_ids: Option<Vec<String>>,

    #[arg(long, help = "Print the invoice as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InvoiceShowArgs {
    #[arg(help = "Invoice id.")]
    pub id: String,

    #[arg(long, help = "Print as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InvoiceLsArgs {
    #[arg(long, help = "Print as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub command: ProfileCommands,
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "Show the profile.")]
    Show(ProfileShowArgs),
    #[command(about = "Set profile fields.")]
    Set(ProfileSetArgs),
}

#[derive(Debug, Args)]
pub struct ProfileShowArgs {
    #[arg(long, help = "Print as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ProfileSetArgs {
    #[arg(long, help = "Display currency code, e.g. 'EUR'.")]
    pub currency: String,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[arg(long, help = "Print the summary as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long, help = "Print as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    #[arg(long, help = "Print findings as JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    #[arg(help = "Shell name (bash, zsh, fish). Auto-detected if omitted.")]
    pub shell: Option<String>,
}
