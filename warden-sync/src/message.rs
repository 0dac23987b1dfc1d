//! Commit message rendering.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};

/// Number of paths listed by name before the summary switches to a count.
const LISTED_FILES: usize = 3;

/// Render `template`, substituting `{reason}`, `{timestamp}`, `{count}` and
/// `{files}`. Unknown placeholders are left as written.
pub fn render_commit_message(
    template: &str,
    reason: &str,
    paths: &[PathBuf],
    now: DateTime<Utc>,
) -> String {
    template
        .replace("{reason}", reason)
        .replace("{timestamp}", &now.to_rfc3339_opts(SecondsFormat::Secs, true))
        .replace("{count}", &paths.len().to_string())
        .replace("{files}", &files_summary(paths))
}

/// `a, b, c` for up to three paths; `a, b, c and 4 more` beyond that.
pub fn files_summary(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(no tracked paths)".to_string();
    }
    let listed: Vec<String> = paths
        .iter()
        .take(LISTED_FILES)
        .map(|p| p.display().to_string())
        .collect();
    let mut summary = listed.join(", ");
    if paths.len() > LISTED_FILES {
        summary.push_str(&format!(" and {} more", paths.len() - LISTED_FILES));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn lists_up_to_three_files() {
        assert_eq!(files_summary(&paths(&["a", "b"])), "a, b");
        assert_eq!(files_summary(&paths(&["a", "b", "c"])), "a, b, c");
        assert_eq!(
            files_summary(&paths(&["a", "b", "c", "d", "e"])),
            "a, b, c and 2 more"
        );
    }

    #[test]
    fn template_placeholders() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        let message = render_commit_message(
            "sync [{reason}] {count} @ {timestamp}: {files}",
            "critical",
            &paths(&["package.json"]),
            now,
        );
        assert_eq!(
            message,
            "sync [critical] 1 @ 2026-03-01T12:30:00Z: package.json"
        );
    }
}
