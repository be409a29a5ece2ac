//! Lightweight diagnostic probes run on a connected system

use crate::connection::ConnectionManager;
use animatronic_shared::{SystemInfo, NOT_AVAILABLE};
use tracing::debug;

pub const UPTIME_COMMAND: &str = "uptime -p";
pub const TEMPERATURE_COMMAND: &str = r#"vcgencmd measure_temp 2>/dev/null || awk '{printf "temp=%.1f'\''C\n", $1/1000}' /sys/class/thermal/thermal_zone0/temp"#;
pub const MEMORY_COMMAND: &str = r#"free -h | awk '/^Mem:/ {print $3 "/" $2}'"#;
pub const DISK_COMMAND: &str = "df -h / | tail -1 | awk '{print $5}'";

/// Collect every probe; each failure degrades only its own field
pub async fn collect(manager: &ConnectionManager, system_id: &str) -> SystemInfo {
    let (uptime, temperature, memory, disk) = tokio::join!(
        probe(manager, system_id, UPTIME_COMMAND, parse_uptime),
        probe(manager, system_id, TEMPERATURE_COMMAND, parse_temperature),
        probe(manager, system_id, MEMORY_COMMAND, non_empty),
        probe(manager, system_id, DISK_COMMAND, non_empty),
    );

    SystemInfo {
        uptime,
        temperature,
        memory,
        disk,
    }
}

async fn probe(
    manager: &ConnectionManager,
    system_id: &str,
    command: &str,
    parse: fn(&str) -> Option<String>,
) -> String {
    match manager.execute_command(system_id, command).await {
        Ok(stdout) => parse(&stdout).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        Err(e) => {
            debug!("[SERVICE] {} probe `{}` failed: {}", system_id, command, e);
            NOT_AVAILABLE.to_string()
        }
    }
}

fn non_empty(stdout: &str) -> Option<String> {
    let s = stdout.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// `up 3 days, 2 hours` -> `3 days, 2 hours`
fn parse_uptime(stdout: &str) -> Option<String> {
    let s = stdout.trim();
    non_empty(s.strip_prefix("up ").unwrap_or(s))
}

/// `temp=48.3'C` -> `48.3°C`
fn parse_temperature(stdout: &str) -> Option<String> {
    let s = stdout.trim();
    let s = s.strip_prefix("temp=").unwrap_or(s);
    let s = s.trim_end_matches("'C").trim_end_matches('C');
    let value: f64 = s.parse().ok()?;
    Some(format!("{:.1}°C", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uptime() {
        assert_eq!(parse_uptime("up 3 days, 2 hours\n").as_deref(), Some("3 days, 2 hours"));
        assert_eq!(parse_uptime("  "), None);
    }

    #[test]
    fn test_parse_temperature() {
        assert_eq!(parse_temperature("temp=48.3'C").as_deref(), Some("48.3°C"));
        assert_eq!(parse_temperature("temp=51.0'C\n").as_deref(), Some("51.0°C"));
        assert_eq!(parse_temperature("garbage"), None);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(" 42% ").as_deref(), Some("42%"));
        assert_eq!(non_empty(""), None);
    }
}
