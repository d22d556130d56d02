use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "doc-translator-rust",
    version,
    about = "Translate the text inside images, PDFs and Office documents in place"
)]
struct Cli {
    /// Files or directories to translate
    inputs: Vec<PathBuf>,

    /// Directory for translated output
    #[arg(short = 'o', long = "output", default_value = "translated")]
    output: PathBuf,

    /// Target language (overrides settings)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Source language. Use "auto" to detect.
    #[arg(short = 'L', long = "source-lang")]
    source_lang: Option<String>,

    /// Translation engine: basic, premium, ai or hybrid
    #[arg(short = 'e', long = "engine")]
    engine: Option<String>,

    /// Units processed concurrently
    #[arg(short = 'j', long = "workers")]
    workers: Option<usize>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<PathBuf>,

    /// List the languages the installed tesseract can detect and exit
    #[arg(long = "show-detector-languages")]
    show_detector_languages: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    doc_translator_rust::logging::init(cli.verbose)?;
    let config = doc_translator_rust::Config {
        inputs: cli.inputs,
        output_dir: cli.output,
        settings_path: cli.read_settings,
        source_lang: cli.source_lang,
        target_lang: cli.lang,
        engine: cli.engine,
        workers: cli.workers,
        show_detector_languages: cli.show_detector_languages,
    };
    let output = doc_translator_rust::run(config).await?;
    println!("{}", output);
    Ok(())
}
