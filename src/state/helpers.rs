//! Workflow State Helpers
//!
//! Pure functions for cycle identifiers, resource URIs and the Markdown
//! representation of a cycle.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{Cycle, Phase};

/// Scheme prefix of every resource URI the store serves.
pub const URI_SCHEME: &str = "forge://";

/// Builds a new cycle identifier from a feature name.
///
/// Example output: `"user-login-3f2a9c1e"`.
pub fn new_cycle_id(feature: &str) -> String {
    let slug = slugify(feature);
    let suffix = Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..8];
    if slug.is_empty() {
        format!("cycle-{suffix}")
    } else {
        format!("{slug}-{suffix}")
    }
}

/// Lowercase, ASCII-alphanumeric words joined by `-`, at most 40 chars.
pub fn slugify(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    let mut slug = words.join("-");
    slug.truncate(40);
    slug.trim_end_matches('-').to_string()
}

/// Names used as file stems must not escape their directory.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Splits `forge://<namespace>/<name>` into its two parts.
pub fn split_uri(uri: &str) -> Option<(&str, &str)> {
    uri.strip_prefix(URI_SCHEME)?.split_once('/')
}

pub fn resource_uri(namespace: &str, name: &str) -> String {
    format!("{URI_SCHEME}{namespace}/{name}")
}

/// Renders a cycle as the Markdown stored on disk.
pub fn render_cycle(cycle: &Cycle) -> String {
    format!(
        "# Cycle: {feature}\n\n\
         - **ID**: {id}\n\
         - **Phase**: {phase}\n\
         - **Created**: {created}\n\
         - **Updated**: {updated}\n\n\
         ## Description\n\n{description}\n",
        feature = cycle.feature,
        id = cycle.id,
        phase = cycle.phase,
        created = cycle.created_at.to_rfc3339(),
        updated = cycle.updated_at.to_rfc3339(),
        description = cycle.description,
    )
}

/// Parses the Markdown produced by [`render_cycle`].
///
/// Returns a description of the first problem found.
pub fn parse_cycle(text: &str) -> Result<Cycle, String> {
    let mut feature = None;
    let mut id = None;
    let mut phase = None;
    let mut created = None;
    let mut updated = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("# Cycle: ") {
            feature = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("- **ID**: ") {
            id = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("- **Phase**: ") {
            phase = Some(Phase::parse(rest).ok_or_else(|| format!("unknown phase {rest:?}"))?);
        } else if let Some(rest) = line.strip_prefix("- **Created**: ") {
            created = Some(parse_time(rest)?);
        } else if let Some(rest) = line.strip_prefix("- **Updated**: ") {
            updated = Some(parse_time(rest)?);
        }
    }

    let description = text
        .split_once("## Description")
        .map(|(_, rest)| rest.trim().to_string())
        .unwrap_or_default();
    let created_at = created.ok_or("missing created timestamp")?;

    Ok(Cycle {
        id: id.ok_or("missing id")?,
        feature: feature.ok_or("missing title")?,
        description,
        phase: phase.ok_or("missing phase")?,
        created_at,
        updated_at: updated.unwrap_or(created_at),
    })
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {text:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_keeps_ascii_words() {
        assert_eq!(slugify("User Login (OAuth)!"), "user-login-oauth");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn cycle_ids_are_safe_and_unique() {
        let a = new_cycle_id("Add search");
        let b = new_cycle_id("Add search");
        assert!(a.starts_with("add-search-"));
        assert!(is_safe_name(&a));
        assert_ne!(a, b);
        assert!(new_cycle_id("???").starts_with("cycle-"));
    }

    #[test]
    fn unsafe_names_are_rejected() {
        assert!(!is_safe_name("../etc"));
        assert!(!is_safe_name("a/b"));
        assert!(!is_safe_name(""));
    }

    #[test]
    fn split_uri_requires_scheme_and_namespace() {
        assert_eq!(split_uri("forge://cycles/abc"), Some(("cycles", "abc")));
        assert_eq!(split_uri("forge://cycles"), None);
        assert_eq!(split_uri("file:///etc/passwd"), None);
    }

    #[test]
    fn rendered_cycle_parses_back() {
        let now = Utc::now();
        let cycle = Cycle {
            id: "search-1234abcd".into(),
            feature: "Search".into(),
            description: "Full text search\nover notes".into(),
            phase: Phase::Refine,
            created_at: now,
            updated_at: now,
        };
        let parsed = parse_cycle(&render_cycle(&cycle)).unwrap();
        assert_eq!(parsed.id, cycle.id);
        assert_eq!(parsed.phase, Phase::Refine);
        assert_eq!(parsed.description, cycle.description);
    }

    #[test]
    fn parse_reports_missing_fields() {
        let err = parse_cycle("# Cycle: x\n- **Phase**: focus\n").unwrap_err();
        assert!(err.contains("created"));
    }
}
