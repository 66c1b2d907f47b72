use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_sarif::sarif::Invocation;

use hookweave::config::WeaveConfig;
use hookweave::logging::init_tracing;
use hookweave::registry::TransformRegistry;
use hookweave::report::build_sarif;
use hookweave::scan::{output_file_for, weave_path};

/// CLI arguments for hookweave execution.
#[derive(Parser, Debug)]
#[command(
    name = "hookweave",
    about = "Rewrite JVM class files and JAR files to call static hooks.",
    version
)]
struct Cli {
    /// Hook definitions, mappings and hierarchy hints (JSON).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: PathBuf,
    /// Write a SARIF log of rewritten methods; `-` for stdout.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }

    let started_at = Instant::now();
    let registry = load_registry(cli.config.as_deref())?;
    let output = if cli.input.is_dir() {
        cli.output.clone()
    } else {
        output_file_for(&cli.input, &cli.output)
    };
    let result = weave_path(&registry, &cli.input, &output)?;

    if let Some(report) = cli.report.as_deref() {
        let sarif = build_sarif(&result.records, build_invocation());
        let mut writer = report_writer(report)?;
        serde_json::to_writer_pretty(&mut writer, &sarif)
            .context("failed to serialize SARIF report")?;
        writer
            .write_all(b"\n")
            .context("failed to write SARIF report")?;
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} classes={} rewritten={}",
            started_at.elapsed().as_millis(),
            result.class_count,
            result.rewritten_count
        );
    }

    Ok(())
}

fn load_registry(config: Option<&Path>) -> Result<TransformRegistry> {
    let builder = match config {
        Some(path) => WeaveConfig::from_path(path)?.registry_builder()?,
        None => TransformRegistry::builder(),
    };
    builder.build().context("failed to build transform registry")
}

fn report_writer(path: &Path) -> Result<Box<dyn Write>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdout()));
    }
    Ok(Box::new(
        File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
    ))
}

fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const CONFIG: &str = r#"{
        "definitions": [{
            "target": "demo.Game",
            "hooks": "demo.Hooks",
            "modifications": [
                {"kind": "modify_constant", "method": "speed", "descriptor": "()I",
                 "hook": "speed", "constant": {"int": 3}}
            ]
        }]
    }"#;

    /// Minimal `demo/Game` class: a default constructor and `static int speed() { return 3; }`.
    const GAME_CLASS: &[u8] = &[
        0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 0x34, 0x00, 0x0c, 0x01, 0x00, 0x09, 0x64, 0x65,
        0x6d, 0x6f, 0x2f, 0x47, 0x61, 0x6d, 0x65, 0x07, 0x00, 0x01, 0x01, 0x00, 0x10, 0x6a, 0x61,
        0x76, 0x61, 0x2f, 0x6c, 0x61, 0x6e, 0x67, 0x2f, 0x4f, 0x62, 0x6a, 0x65, 0x63, 0x74, 0x07,
        0x00, 0x03, 0x01, 0x00, 0x06, 0x3c, 0x69, 0x6e, 0x69, 0x74, 0x3e, 0x01, 0x00, 0x03, 0x28,
        0x29, 0x56, 0x01, 0x00, 0x04, 0x43, 0x6f, 0x64, 0x65, 0x01, 0x00, 0x05, 0x73, 0x70, 0x65,
        0x65, 0x64, 0x01, 0x00, 0x03, 0x28, 0x29, 0x49, 0x0c, 0x00, 0x05, 0x00, 0x06, 0x0a, 0x00,
        0x04, 0x00, 0x0a, 0x00, 0x21, 0x00, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02,
        0x00, 0x01, 0x00, 0x05, 0x00, 0x06, 0x00, 0x01, 0x00, 0x07, 0x00, 0x00, 0x00, 0x11, 0x00,
        0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x2a, 0xb7, 0x00, 0x0b, 0xb1, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x09, 0x00, 0x08, 0x00, 0x09, 0x00, 0x01, 0x00, 0x07, 0x00, 0x00, 0x00, 0x0e,
        0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x06, 0xac, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00,
    ];

    fn cli(dir: &Path, config: Option<PathBuf>, report: Option<PathBuf>) -> Cli {
        Cli {
            config,
            input: dir.join("Game.class"),
            output: dir.join("out"),
            report,
            quiet: true,
            timing: true,
            verbose: false,
        }
    }

    #[test]
    fn writes_rewritten_class_and_report() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("Game.class"), GAME_CLASS).expect("write class");
        fs::create_dir_all(dir.path().join("out")).expect("create out");
        let config = dir.path().join("weave.json");
        fs::write(&config, CONFIG).expect("write config");
        let report = dir.path().join("report.sarif");

        run(cli(dir.path(), Some(config), Some(report.clone()))).expect("run");

        let woven = fs::read(dir.path().join("out").join("Game.class")).expect("woven class");
        assert_ne!(woven, GAME_CLASS);
        assert!(jclassfile::class_file::parse(&woven).is_ok());
        let sarif: serde_json::Value =
            serde_json::from_slice(&fs::read(&report).expect("read report")).expect("parse");
        let results = sarif["runs"][0]["results"].as_array().expect("results");
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0]["locations"][0]["logicalLocations"][0]["name"],
            "demo/Game.speed()I"
        );
    }

    #[test]
    fn without_config_copies_classes_unchanged() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("Game.class"), GAME_CLASS).expect("write class");

        run(cli(dir.path(), None, None)).expect("run");

        assert_eq!(fs::read(dir.path().join("out")).expect("output"), GAME_CLASS);
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");

        let error = run(cli(dir.path(), None, None)).expect_err("missing input");

        assert!(error.to_string().contains("input not found"));
    }

    #[test]
    fn invalid_config_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("Game.class"), GAME_CLASS).expect("write class");
        let config = dir.path().join("weave.json");
        fs::write(&config, r#"{"definitions": "nope"}"#).expect("write config");

        assert!(run(cli(dir.path(), Some(config), None)).is_err());
    }

    #[test]
    fn cli_parses_all_flags() {
        let cli = Cli::try_parse_from([
            "hookweave",
            "--config",
            "weave.json",
            "--input",
            "in.jar",
            "--output",
            "out.jar",
            "--report",
            "-",
            "--timing",
            "--verbose",
        ])
        .expect("parse");

        assert_eq!(cli.config.as_deref(), Some(Path::new("weave.json")));
        assert_eq!(cli.report.as_deref(), Some(Path::new("-")));
        assert!(cli.timing && cli.verbose && !cli.quiet);
    }
}
