//! Tab-aligned rendering of the status maps for info commands.

use std::collections::HashMap;
use std::io::Write;

use common::status::ServerStatus;
use tabwriter::TabWriter;

/// Renders the server-status map alongside the observed running set.
pub fn render_server_info(
    statuses: &HashMap<String, ServerStatus>,
    running: &[String],
) -> String {
    let mut rows: Vec<&ServerStatus> = statuses.values().collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));

    let mut tw = TabWriter::new(Vec::new());
    let _ = writeln!(tw, "NAME\tPORT\tSHOULD-RUN\tRUNNING\tSTARTED");
    for status in rows {
        let started = status
            .start_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}",
            status.name,
            status.port,
            status.should_run,
            running.contains(&status.name),
            started,
        );
    }
    flush_to_string(tw)
}

/// Renders the backup-eligibility map.
pub fn render_backup_info(backups: &HashMap<String, bool>) -> String {
    let mut rows: Vec<(&String, &bool)> = backups.iter().collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));

    let mut tw = TabWriter::new(Vec::new());
    let _ = writeln!(tw, "NAME\tENABLED");
    for (name, enabled) in rows {
        let _ = writeln!(tw, "{name}\t{enabled}");
    }
    flush_to_string(tw)
}

fn flush_to_string(mut tw: TabWriter<Vec<u8>>) -> String {
    let _ = tw.flush();
    String::from_utf8(tw.into_inner().unwrap_or_default()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_info_is_sorted_and_complete() {
        let mut statuses = HashMap::new();
        statuses.insert("beta".to_string(), ServerStatus::new("beta", 25566));
        let mut alpha = ServerStatus::new("alpha", 25565);
        alpha.should_run = true;
        statuses.insert("alpha".to_string(), alpha);

        let text = render_server_info(&statuses, &["alpha".to_string()]);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("NAME"));
        assert!(lines[1].starts_with("alpha"));
        assert!(lines[2].starts_with("beta"));
        assert!(lines[1].contains("true"));
    }

    #[test]
    fn backup_info_lists_flags() {
        let mut backups = HashMap::new();
        backups.insert("alpha".to_string(), true);
        backups.insert("beta".to_string(), false);
        let text = render_backup_info(&backups);
        assert!(text.contains("alpha"));
        assert!(text.contains("false"));
    }
}
