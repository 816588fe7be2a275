use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
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

enum GuideLine {
    Status(String, String),
    Info(String),
    Command(String, String),
    Blank,
}

/// A titled block of status rows and hints, printed in one go.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn info(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Info(text.to_string()));
        self
    }

    pub fn command(mut self, usage: &str, about: &str) -> Self {
        self.lines
            .push(GuideLine::Command(usage.to_string(), about.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn render(&self) -> String {
        let width = self
            .lines
            .iter()
            .filter_map(|l| match l {
                GuideLine::Command(usage, _) => Some(usage.chars().count()),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        let mut out = format!("\n{} {}\n", SPARKLE, style(&self.title).bold().cyan());
        for line in &self.lines {
            match line {
                GuideLine::Status(label, value) => {
                    out.push_str(&format!("  {} {}: {}\n", GEAR, style(label).bold(), value));
                }
                GuideLine::Info(text) => out.push_str(&format!("  {}\n", text)),
                GuideLine::Command(usage, about) => out.push_str(&format!(
                    "  {}  {}\n",
                    style(format!("{:<width$}", usage, width = width)).cyan(),
                    style(about).dim()
                )),
                GuideLine::Blank => out.push('\n'),
            }
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}
