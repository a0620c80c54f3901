//! Deterministic rule-based project assignment.
//!
//! Rules are evaluated in the order given (insertion order in the store) and
//! the first rule whose pattern occurs in either the window title or the
//! application name wins. There is no notion of "most specific" match.

use crate::types::{ProjectId, Rule};

/// Returns the project of the first rule matching the window, if any.
///
/// Matching is a case-insensitive substring test against `window_title` and
/// `application_name`.
pub fn match_project(
    window_title: &str,
    application_name: &str,
    rules: &[Rule],
) -> Option<ProjectId> {
    if rules.is_empty() {
        return None;
    }

    let title = window_title.to_lowercase();
    let app = application_name.to_lowercase();

    rules
        .iter()
        .find(|rule| {
            let pattern = rule.pattern().to_lowercase();
            title.contains(&pattern) || app.contains(&pattern)
        })
        .map(|rule| rule.project_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(id: i64) -> ProjectId {
        ProjectId::new(id).unwrap()
    }

    fn rule(pattern: &str, project_id: i64) -> Rule {
        Rule::new(pattern, project(project_id)).unwrap()
    }

    #[test]
    fn first_match_wins_over_more_specific() {
        let rules = vec![rule("vscode", 1), rule("code", 2)];
        assert_eq!(match_project("", "vscode.exe", &rules), Some(project(1)));

        let reversed = vec![rule("code", 2), rule("vscode", 1)];
        assert_eq!(match_project("", "vscode.exe", &reversed), Some(project(2)));
    }

    #[test]
    fn matches_title_or_application_case_insensitively() {
        let rules = vec![rule("Invoice", 3)];
        assert_eq!(
            match_project("draft INVOICE - Q3.xlsx", "excel", &rules),
            Some(project(3))
        );

        let rules = vec![rule("FIREFOX", 4)];
        assert_eq!(match_project("Docs", "firefox", &rules), Some(project(4)));
    }

    #[test]
    fn no_rules_or_no_match_is_none() {
        assert_eq!(match_project("anything", "app", &[]), None);
        let rules = vec![rule("slack", 1)];
        assert_eq!(match_project("Terminal", "alacritty", &rules), None);
    }

    #[test]
    fn empty_fields_never_match() {
        let rules = vec![rule("a", 1)];
        assert_eq!(match_project("", "", &rules), None);
    }

    #[test]
    fn later_rules_are_consulted_when_earlier_miss() {
        let rules = vec![rule("jira", 1), rule("slack", 2), rule("lack", 3)];
        assert_eq!(
            match_project("#team - Slack", "slack.exe", &rules),
            Some(project(2))
        );
    }
}
