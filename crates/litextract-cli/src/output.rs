use std::io::Write;

use litextract_core::aggregate::AggregateSummary;
use litextract_core::{Config, OutputPaths, Provider, RunInputs, RunReport};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Render an observer log line for the terminal.
pub fn format_log_line(message: &str, color: ColorMode) -> String {
    if !color.enabled() {
        return message.to_string();
    }
    if message.starts_with("ERROR") || message.starts_with("FAILED") {
        message.red().to_string()
    } else if message.starts_with("WARNING") || message.starts_with("Rate limit") {
        message.yellow().to_string()
    } else if message.starts_with("===") || message.starts_with("RESUME") {
        message.bold().to_string()
    } else {
        message.to_string()
    }
}

/// Print what the run is about to do.
pub fn print_run_header(
    w: &mut dyn Write,
    inputs: &RunInputs,
    config: &Config,
    color: ColorMode,
) -> std::io::Result<()> {
    let model = format!("{} ({})", config.model, config.provider);
    if color.enabled() {
        writeln!(w, "{} {}", "Model:".bold(), model.cyan())?;
    } else {
        writeln!(w, "Model: {model}")?;
    }
    writeln!(w, "  PDFs:      {}", inputs.pdf_folder.display())?;
    writeln!(w, "  Questions: {}", inputs.questions_file.display())?;
    if let Some(ris) = &inputs.ris_file {
        writeln!(w, "  RIS:       {}", ris.display())?;
    }
    writeln!(w, "  Output:    {}", inputs.output_folder.display())?;
    writeln!(
        w,
        "  Workers:   {}  temperature {}  top_p {}",
        config.max_workers, config.temperature, config.top_p
    )?;
    if let Some(n) = config.sample_size {
        let msg = format!("Test mode: {n} random PDFs");
        if color.enabled() {
            writeln!(w, "  {}", msg.yellow())?;
        } else {
            writeln!(w, "  {msg}")?;
        }
    }
    writeln!(w)?;
    Ok(())
}

/// Print the final run summary.
pub fn print_summary(
    w: &mut dyn Write,
    report: &RunReport,
    paths: &OutputPaths,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "{}", "SUMMARY".bold())?;
        writeln!(w, "{}", sep.bold())?;
    } else {
        writeln!(w, "{sep}")?;
        writeln!(w, "SUMMARY")?;
        writeln!(w, "{sep}")?;
    }

    if report.previously_processed > 0 {
        writeln!(
            w,
            "  Previously processed: {} PDFs",
            report.previously_processed
        )?;
    }
    writeln!(w, "  Processed: {}/{}", report.completed, report.total)?;
    if color.enabled() {
        writeln!(w, "  {} {}", "Successful:".green(), report.successful())?;
    } else {
        writeln!(w, "  Successful: {}", report.successful())?;
    }
    if !report.failures.is_empty() {
        if color.enabled() {
            writeln!(w, "  {} {}", "Failed:".red(), report.failures.len())?;
        } else {
            writeln!(w, "  Failed: {}", report.failures.len())?;
        }
        for failure in &report.failures {
            writeln!(w, "    - {failure}")?;
        }
    }
    writeln!(w)?;

    if report.stopped {
        let msg = "Stopped before all PDFs finished. Run the same command again to resume.";
        if color.enabled() {
            writeln!(w, "  {}", msg.yellow())?;
        } else {
            writeln!(w, "  {msg}")?;
        }
        writeln!(w, "  Partial results: {}", paths.temp.display())?;
    } else {
        if let Some(rows) = report.long_rows {
            writeln!(w, "  Long format:  {} ({rows} rows)", paths.long.display())?;
        }
        if let Some(rows) = report.wide_rows {
            writeln!(w, "  Wide format:  {} ({rows} rows)", paths.wide.display())?;
        }
    }
    writeln!(w, "  Log:          {}", paths.log.display())?;
    writeln!(w)?;
    Ok(())
}

pub fn print_aggregate_summary(
    w: &mut dyn Write,
    summary: &AggregateSummary,
    paths: &OutputPaths,
    color: ColorMode,
) -> std::io::Result<()> {
    let msg = format!(
        "Wrote {} ({} rows, {} columns)",
        paths.wide.display(),
        summary.rows,
        summary.columns
    );
    if color.enabled() {
        writeln!(w, "{}", msg.green())?;
    } else {
        writeln!(w, "{msg}")?;
    }
    if let Some((matched, total)) = summary.matched {
        writeln!(w, "  Bibliographic matches: {matched}/{total}")?;
    }
    Ok(())
}

/// List the known models, default first marked with `*`.
pub fn print_models(
    w: &mut dyn Write,
    providers: &[Provider],
    color: ColorMode,
) -> std::io::Result<()> {
    for provider in providers {
        if color.enabled() {
            writeln!(w, "{} {}", provider.name().bold(), provider.endpoint().dimmed())?;
        } else {
            writeln!(w, "{} {}", provider.name(), provider.endpoint())?;
        }
        for model in provider.models() {
            let marker = if *model == provider.default_model() { "*" } else { " " };
            writeln!(w, "  {marker} {model}")?;
        }
        writeln!(w, "    max_tokens {}  key ${}", provider.max_tokens(), provider.api_key_env())?;
        writeln!(w)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use litextract_core::{Failure, FailureReason};
    use std::path::Path;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn plain_log_lines_are_unchanged() {
        assert_eq!(
            format_log_line("ERROR: No questions found!", ColorMode(false)),
            "ERROR: No questions found!"
        );
        let colored = format_log_line("ERROR: No questions found!", ColorMode(true));
        assert!(colored.contains("ERROR: No questions found!"));
        assert_ne!(colored, "ERROR: No questions found!");
    }

    #[test]
    fn summary_lists_failures_and_outputs() {
        let report = RunReport {
            previously_processed: 2,
            completed: 3,
            total: 3,
            failures: vec![Failure {
                document: "scan.pdf".into(),
                reason: FailureReason::EmptyText,
            }],
            long_rows: Some(10),
            wide_rows: Some(5),
            ..Default::default()
        };
        let paths = OutputPaths::in_folder(Path::new("out"));
        let text = render(|w| print_summary(w, &report, &paths, ColorMode(false)));

        assert!(text.contains("Previously processed: 2 PDFs"));
        assert!(text.contains("Processed: 3/3"));
        assert!(text.contains("Successful: 2"));
        assert!(text.contains("    - scan.pdf (empty text)"));
        assert!(text.contains("Results_Wide.csv (5 rows)"));
        assert!(!text.contains("resume"));
    }

    #[test]
    fn stopped_summary_points_at_partial_results() {
        let report = RunReport {
            completed: 1,
            total: 4,
            stopped: true,
            ..Default::default()
        };
        let paths = OutputPaths::in_folder(Path::new("out"));
        let text = render(|w| print_summary(w, &report, &paths, ColorMode(false)));
        assert!(text.contains("again to resume"));
        assert!(text.contains("Results_Temp.csv"));
        assert!(!text.contains("Wide format"));
    }

    #[test]
    fn models_mark_the_default() {
        let text = render(|w| print_models(w, &[Provider::OpenAi], ColorMode(false)));
        assert!(text.starts_with("openai https://api.openai.com/v1/chat/completions"));
        assert!(text.contains("  * gpt-4o\n"));
        assert!(text.contains("    gpt-4o-mini\n"));
        assert!(text.contains("$OPENAI_API_KEY"));
    }
}
