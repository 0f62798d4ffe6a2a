//! Statistics display and formatting

use srt_crypto::CryptoStats;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a byte rate in human-readable form
pub fn format_throughput(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "N/A".to_string();
    }
    format!("{}/s", format_bytes((bytes as f64 / secs) as u64))
}

const BOX_WIDTH: usize = 59;

fn box_row(content: &str) -> String {
    format!("│ {:<width$} │", content, width = BOX_WIDTH)
}

fn box_rule(left: char, right: char) -> String {
    format!("{}{}{}", left, "─".repeat(BOX_WIDTH + 2), right)
}

/// Lines of the context statistics box
pub fn crypto_stats_lines(title: &str, stats: &CryptoStats, elapsed: Duration) -> Vec<String> {
    let mut lines = vec![box_rule('┌', '┐'), box_row(title), box_rule('├', '┤')];
    if stats.packets_encrypted > 0 {
        lines.push(box_row(&format!(
            "Encrypted: {:>10} packets / {:<12} {:>14}",
            stats.packets_encrypted,
            format_bytes(stats.bytes_encrypted),
            format_throughput(stats.bytes_encrypted, elapsed)
        )));
    }
    if stats.packets_decrypted > 0 {
        lines.push(box_row(&format!(
            "Decrypted: {:>10} packets / {:<12} {:>14}",
            stats.packets_decrypted,
            format_bytes(stats.bytes_decrypted),
            format_throughput(stats.bytes_decrypted, elapsed)
        )));
    }
    lines.push(box_rule('├', '┤'));
    lines.push(box_row("KEYING MATERIAL"));
    lines.push(box_rule('├', '┤'));
    lines.push(box_row(&format!(
        "Keys generated: {:<8} KM sent: {:<8}",
        stats.keys_generated, stats.km_sent
    )));
    lines.push(box_row(&format!(
        "Installed: {:<8} Unchanged: {:<8} Rejected: {:<8}",
        stats.km_installed, stats.km_unchanged, stats.km_rejected
    )));
    lines.push(box_row(&format!(
        "Dropped: {:<8} (auth {}, unknown key {})",
        stats.packets_dropped(),
        stats.auth_failures,
        stats.unknown_key
    )));
    lines.push(box_rule('└', '┘'));
    lines
}

/// Display context statistics in a box
pub fn display_crypto_stats(title: &str, stats: &CryptoStats, elapsed: Duration) {
    eprintln!();
    for line in crypto_stats_lines(title, stats, elapsed) {
        eprintln!("{}", line);
    }
}
