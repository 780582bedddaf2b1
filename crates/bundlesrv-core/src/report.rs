//! Bundle composition report.
//!
//! A static HTML page listing every module in a bundle by size, written next
//! to the development copy of the bundle to see what is making it heavy.

use crate::backend::{BundleError, BundleOutput};
use crate::codes;
use crate::plan::BundlePlan;
use std::fmt::Write;

/// Render the report for one build.
///
/// # Errors
/// Fails when the output carries no module list.
pub fn render_report(plan: &BundlePlan, output: &BundleOutput) -> Result<String, BundleError> {
    if output.modules.is_empty() {
        return Err(BundleError::new(
            codes::BUNDLE_REPORT_FAILED,
            "bundle output carries no module metadata",
        ));
    }

    let total = output.total_input_bytes().max(1);
    let mut modules: Vec<_> = output.modules.iter().collect();
    modules.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.path.cmp(&b.path)));

    let mut rows = String::new();
    for module in modules {
        let label = if plan.full_paths {
            module.path.display().to_string()
        } else {
            module
                .path
                .strip_prefix(&plan.basedir)
                .unwrap_or(&module.path)
                .display()
                .to_string()
        };
        #[allow(clippy::cast_precision_loss)]
        let share = module.bytes as f64 * 100.0 / total as f64;
        let _ = writeln!(
            rows,
            "<tr><td>{}</td><td class=\"n\">{}</td><td><div class=\"bar\" style=\"width:{share:.1}%\"></div>{share:.1}%</td></tr>",
            escape_html(&label),
            module.bytes,
        );
    }

    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>{title} composition</title>
  <style>
    body {{ font-family: system-ui, sans-serif; margin: 2em; }}
    table {{ border-collapse: collapse; width: 100%; }}
    td, th {{ padding: 2px 8px; text-align: left; border-bottom: 1px solid #eee; }}
    td.n {{ text-align: right; font-variant-numeric: tabular-nums; }}
    .bar {{ display: inline-block; height: 0.8em; margin-right: 6px; background: #4a90d9; }}
  </style>
</head>
<body>
  <h1>{title}</h1>
  <p>{bundle_bytes} bytes bundled from {count} modules ({input_bytes} bytes of source)</p>
  <table>
    <tr><th>Module</th><th>Bytes</th><th>Share</th></tr>
{rows}  </table>
</body>
</html>
"#,
        title = escape_html(&plan.file_name),
        bundle_bytes = output.code.len(),
        count = output.modules.len(),
        input_bytes = output.total_input_bytes(),
    ))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BundleSpec, ServerConfig};
    use std::path::PathBuf;

    fn plan(full_paths: bool) -> BundlePlan {
        let config =
            ServerConfig::new(PathBuf::from("/srv/site")).with_dev_write_report(full_paths);
        BundlePlan::resolve(&BundleSpec::new("./admin"), &config)
    }

    fn output() -> BundleOutput {
        BundleOutput::new("bundle")
            .with_module("/srv/site/client/admin.js", 100)
            .with_module("/srv/site/client/views/<list>.js", 300)
    }

    #[test]
    fn test_report_lists_modules_largest_first() {
        let html = render_report(&plan(false), &output()).unwrap();

        let big = html.find("views/&lt;list&gt;.js").unwrap();
        let small = html.find("<td>admin.js</td>").unwrap();
        assert!(big < small);
        assert!(html.contains("75.0%"));
        assert!(html.contains("from 2 modules"));
    }

    #[test]
    fn test_report_full_paths() {
        let html = render_report(&plan(true), &output()).unwrap();
        assert!(html.contains("<td>/srv/site/client/admin.js</td>"));
    }

    #[test]
    fn test_report_without_modules_fails() {
        let err = render_report(&plan(false), &BundleOutput::new("bundle")).unwrap_err();
        assert_eq!(err.code, codes::BUNDLE_REPORT_FAILED);
    }
}
