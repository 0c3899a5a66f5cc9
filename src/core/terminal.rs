use console::{Emoji, style};

use crate::core::pool::{WorkerEvent, WorkerListener};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static PLUG: Emoji<'_, '_> = Emoji("🔌 ", "+ ");
pub static UNPLUG: Emoji<'_, '_> = Emoji("💤 ", "- ");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

pub fn print_banner() {
    println!();
    println!(
        "{}",
        style("membrane · local serverless runtime").bold().cyan()
    );
    println!("{}\n", style("functions register, triggers flow").dim());
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("membrane stopped.").bold().cyan());
}

/// Prints a line whenever a worker joins or leaves the pool.
pub struct ConsoleStatus;

impl ConsoleStatus {
    fn line(event: &WorkerEvent) -> String {
        match event {
            WorkerEvent::Added(worker) => format!(
                "{}{} {}",
                PLUG,
                style("registered").green(),
                worker.spec
            ),
            WorkerEvent::Removed(worker) => format!(
                "{}{} {}",
                UNPLUG,
                style("unregistered").yellow(),
                worker.spec
            ),
        }
    }
}

impl WorkerListener for ConsoleStatus {
    fn on_event(&self, event: &WorkerEvent) {
        println!("{}", Self::line(event));
    }
}
