use colored::*;
use terminal_size::{Width, Height, terminal_size};

pub fn print_header(title: &str) {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    let width = (width.0 as usize).min(100);

    let line = "─".repeat(width);
    println!("{}", line.black().bold());

    let name = "oauth-setup".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  🔐 {} {}", name, version);
    println!("  {}", title.cyan());

    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("  {} {}", "❌".red().bold(), msg.red());
}

pub fn print_waiting(msg: &str) {
    println!("  {} {}...", "∴".magenta(), msg);
}

/// Aligned `key  value` line for summaries
pub fn print_field(key: &str, value: &str) {
    println!("    {:<22} {}", key.bold(), value);
}

/// Shorten a secret to its ends so it can be shown on screen
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else if chars.is_empty() {
        String::new()
    } else {
        "*".repeat(chars.len().min(8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_long_secret_keeps_ends() {
        assert_eq!(mask("ya29.a0AfH6SMBxxxxxxxxxxxxxxxx1234"), "ya29.a...1234");
    }

    #[test]
    fn test_mask_short_secret_is_hidden() {
        assert_eq!(mask("abc"), "***");
        assert_eq!(mask(""), "");
        assert_eq!(mask("0123456789"), "********");
    }
}
