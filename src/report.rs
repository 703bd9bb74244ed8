//! HTML report rendering
//!
//! Reports are single self-contained documents: the stylesheet, the script
//! and the raw findings are all inlined so the file renders offline and never
//! depends on externally hosted assets drifting out of sync.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::scan::{FindingCounts, PolicyFindings, ScanResult};
use crate::types::AccountTarget;

/// Produces a human-readable report for one account
pub trait ReportRenderer: Send + Sync {
    fn render(&self, account: &AccountTarget, results: &ScanResult) -> Result<String>;
}

const REPORT_CSS: &str = r#"
body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", sans-serif; margin: 2rem; color: #1f2933; }
h1 { margin-bottom: 0.25rem; }
.meta { color: #616e7c; margin-bottom: 1.5rem; }
.summary { display: flex; flex-wrap: wrap; gap: 1rem; margin-bottom: 2rem; }
.card { border: 1px solid #cbd2d9; border-radius: 6px; padding: 0.75rem 1rem; min-width: 10rem; }
.card .count { font-size: 1.75rem; font-weight: 600; }
table { border-collapse: collapse; width: 100%; }
th, td { border-bottom: 1px solid #e4e7eb; padding: 0.5rem; text-align: left; vertical-align: top; }
th { background: #f5f7fa; cursor: pointer; }
.severity { font-weight: 600; text-transform: uppercase; }
.severity-critical { color: #ab091e; }
.severity-high { color: #d64545; }
.severity-medium { color: #cb6e17; }
.severity-low { color: #2186eb; }
ul { margin: 0; padding-left: 1.1rem; }
.empty { color: #3e7c17; font-weight: 600; }
"#;

const REPORT_JS: &str = r#"
document.addEventListener("DOMContentLoaded", function () {
  var input = document.getElementById("filter");
  if (!input) { return; }
  input.addEventListener("input", function () {
    var needle = input.value.toLowerCase();
    document.querySelectorAll("tbody tr").forEach(function (row) {
      row.style.display = row.textContent.toLowerCase().indexOf(needle) === -1 ? "none" : "";
    });
  });
});
"#;

/// Renders the built-in self-contained HTML report
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlReportRenderer;

impl HtmlReportRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ReportRenderer for HtmlReportRenderer {
    fn render(&self, account: &AccountTarget, results: &ScanResult) -> Result<String> {
        let counts = FindingCounts::from_result(results);
        let data = serde_json::to_string(results).context("Failed to serialize scan results")?;

        let mut html = String::with_capacity(8 * 1024);
        let title = format!("IAM risk report: {}", escape_html(&account.label));

        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
        writeln!(html, "<title>{}</title>", title)?;
        writeln!(html, "<style>{}</style>", REPORT_CSS)?;
        writeln!(html, "<script>{}</script>", REPORT_JS)?;
        html.push_str("</head>\n<body>\n");

        writeln!(html, "<h1>{}</h1>", title)?;
        writeln!(
            html,
            "<div class=\"meta\">Account ID {} &middot; generated {}</div>",
            escape_html(&account.account_id),
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )?;

        html.push_str("<div class=\"summary\">\n");
        for (name, count) in [
            ("Risky policies", counts.policies),
            ("Privilege escalation", counts.privilege_escalation),
            ("Resource exposure", counts.resource_exposure),
            ("Credentials exposure", counts.credentials_exposure),
            ("Data exfiltration", counts.data_exfiltration),
            ("Infrastructure modification", counts.infrastructure_modification),
            ("Service wildcards", counts.service_wildcard),
        ] {
            writeln!(
                html,
                "<div class=\"card\"><div class=\"count\">{}</div><div>{}</div></div>",
                count, name
            )?;
        }
        html.push_str("</div>\n");

        if results.is_empty() {
            html.push_str("<p class=\"empty\">No risky policies found.</p>\n");
        } else {
            html.push_str("<input id=\"filter\" type=\"search\" placeholder=\"Filter policies\">\n");
            html.push_str(
                "<table>\n<thead><tr><th>Policy</th><th>Type</th><th>Severity</th>\
                 <th>Attached to</th><th>Findings</th></tr></thead>\n<tbody>\n",
            );
            for (key, findings) in results {
                render_row(&mut html, key, findings)?;
            }
            html.push_str("</tbody>\n</table>\n");
        }

        // Raw results for tooling; `</` is escaped so the data cannot close the tag.
        writeln!(
            html,
            "<script type=\"application/json\" id=\"scan-results\">{}</script>",
            data.replace("</", "<\\/")
        )?;
        html.push_str("</body>\n</html>\n");

        Ok(html)
    }
}

fn render_row(html: &mut String, key: &str, findings: &PolicyFindings) -> Result<()> {
    let severity = findings.severity.to_string().to_lowercase();
    let attached: Vec<String> = findings
        .attached_to
        .users
        .iter()
        .map(|u| format!("user/{}", u))
        .chain(findings.attached_to.groups.iter().map(|g| format!("group/{}", g)))
        .chain(findings.attached_to.roles.iter().map(|r| format!("role/{}", r)))
        .collect();

    writeln!(
        html,
        "<tr id=\"{}\"><td>{}</td><td>{:?}</td><td class=\"severity severity-{}\">{}</td><td>{}</td><td>",
        escape_html(key),
        escape_html(&findings.policy_name),
        findings.policy_type,
        severity,
        severity,
        list_html(&attached),
    )?;

    if !findings.privilege_escalation.is_empty() {
        let methods: Vec<String> = findings
            .privilege_escalation
            .iter()
            .map(|p| format!("{} ({})", p.method, p.actions.join(", ")))
            .collect();
        writeln!(html, "<strong>Privilege escalation</strong>{}", list_html(&methods))?;
    }
    for (name, actions) in [
        ("Resource exposure", &findings.resource_exposure),
        ("Credentials exposure", &findings.credentials_exposure),
        ("Data exfiltration", &findings.data_exfiltration),
        ("Infrastructure modification", &findings.infrastructure_modification),
        ("Service wildcards", &findings.service_wildcard),
    ] {
        if !actions.is_empty() {
            writeln!(html, "<strong>{}</strong>{}", name, list_html(actions))?;
        }
    }

    html.push_str("</td></tr>\n");
    Ok(())
}

fn list_html(items: &[String]) -> String {
    if items.is_empty() {
        return "&ndash;".to_string();
    }
    let mut out = String::from("<ul>");
    for item in items {
        out.push_str("<li>");
        out.push_str(&escape_html(item));
        out.push_str("</li>");
    }
    out.push_str("</ul>");
    out
}

/// Escape text for HTML element content and attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
