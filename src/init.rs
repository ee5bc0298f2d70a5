use std::io::{self, Write};
use std::path::Path;

use crate::app::AppError;
use crate::config::Config;
use crate::db;

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_BOLD_CYAN: &str = "\x1b[1;36m";
const ANSI_BOLD_GREEN: &str = "\x1b[1;32m";
const ANSI_BOLD_MAGENTA: &str = "\x1b[1;35m";
const ANSI_DIM: &str = "\x1b[2m";

/// Idempotent first-run setup: opening the store applies migrations and
/// seeds the default collection and device identity; prior state is
/// preserved untouched.
pub(crate) fn init_all(db_path: &str, config_path: &Path) -> Result<(), AppError> {
    print_banner()?;
    progress(&format!("opening local store at {db_path}"))?;
    ensure_parent_dir(db_path)?;
    let conn = db::open_connection(db_path)?;
    let profile = db::get_profile(&conn)?;
    progress_ok("local store ready")?;
    progress_note(&format!("device id {}", profile.device_id))?;

    if config_path.exists() {
        progress_ok(&format!("config present at {}", config_path.display()))?;
    } else {
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(config_path, Config::sample())?;
        progress_ok(&format!("wrote default config to {}", config_path.display()))?;
    }
    Ok(())
}

pub(crate) fn uninit_all(db_path: &str, config_path: &Path) -> Result<(), AppError> {
    progress("removing local store")?;
    for suffix in ["", "-wal", "-shm"] {
        let candidate = format!("{db_path}{suffix}");
        if Path::new(&candidate).exists() {
            std::fs::remove_file(&candidate)?;
        }
    }
    if config_path.exists() {
        std::fs::remove_file(config_path)?;
    }
    progress_ok("local store removed")?;
    Ok(())
}

fn ensure_parent_dir(path: &str) -> Result<(), AppError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn progress(message: &str) -> Result<(), AppError> {
    println!("{ANSI_BOLD_CYAN}•{ANSI_RESET} {message}");
    io::stdout().flush()?;
    Ok(())
}

fn progress_ok(message: &str) -> Result<(), AppError> {
    println!("{ANSI_BOLD_GREEN}✓{ANSI_RESET} {message}");
    io::stdout().flush()?;
    Ok(())
}

fn progress_note(message: &str) -> Result<(), AppError> {
    println!("{ANSI_DIM}{message}{ANSI_RESET}");
    io::stdout().flush()?;
    Ok(())
}

fn print_banner() -> Result<(), AppError> {
    println!("{ANSI_BOLD_MAGENTA}CURIO{ANSI_RESET}");
    println!("{ANSI_BOLD_CYAN}local-first collection tracking{ANSI_RESET}");
    println!("{ANSI_DIM}version {}{ANSI_RESET}", env!("CARGO_PKG_VERSION"));
    println!();
    io::stdout().flush()?;
    Ok(())
}
