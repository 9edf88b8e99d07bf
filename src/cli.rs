use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate a CSV column, back-translate it and score the round trip
    Translate {
        /// Input CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Column to translate (defaults to "English" when present)
        #[arg(long)]
        column: Option<String>,

        /// Target language name as listed in both language maps
        #[arg(short, long, conflicts_with_all = ["deepl_code", "google_code"])]
        language: Option<String>,

        /// DeepL target code, used instead of --language
        #[arg(long, requires = "google_code")]
        deepl_code: Option<String>,

        /// Google code of the translated text, used instead of --language
        #[arg(long, requires = "deepl_code")]
        google_code: Option<String>,

        /// Output CSV file
        #[arg(short, long, default_value = "translated_evaluated_output.csv")]
        output: PathBuf,

        /// Skip similarity scoring
        #[arg(long)]
        skip_evaluation: bool,
    },

    /// Score an already translated CSV
    Evaluate {
        /// Input CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Column holding the original text
        #[arg(long, default_value = "English")]
        original_column: String,

        /// Column holding the back-translation
        #[arg(long, default_value = "Back_Translated")]
        back_column: String,

        /// Output CSV file
        #[arg(short, long, default_value = "evaluated_output.csv")]
        output: PathBuf,
    },

    /// List languages available in both language maps
    Languages,

    /// List backup sessions
    Sessions,

    /// Write the default configuration to a file
    InitConfig {
        /// Destination file
        #[arg(short, long, default_value = "backtrans.toml")]
        output: PathBuf,
    },
}
