use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Semantic search over Bible translations", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Normalize a raw translation CSV in place
    Clean {
        /// Headerless `book,chapter,verse,text` file
        csv_path: PathBuf,
    },

    /// Embed a cleaned translation with both backends
    Encode {
        /// Cleaned verse CSV
        #[clap(long)]
        csv_path: PathBuf,

        /// Corpus table to append to
        #[clap(short, long)]
        output: PathBuf,

        /// Verses per embedding request
        #[clap(long)]
        batch_size: Option<usize>,

        /// Batches already encoded by an earlier, interrupted run
        #[clap(long, default_value = "0")]
        skip_batches: usize,
    },

    /// Create the managed indexes and upsert a translation into them
    BuildIndex {
        /// Translation name, used as the index namespace
        #[clap(short, long)]
        namespace: String,

        /// Corpus table; defaults to the translation's configured corpus
        #[clap(long)]
        corpus: Option<PathBuf>,

        /// Delete and recreate indexes that already exist
        #[clap(long, default_value = "false")]
        new_index: bool,

        /// Auto confirm index deletion
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Find the verses closest to a query
    Search {
        query: String,

        /// remote (ada) or local (minilm)
        #[clap(short, long, default_value = "remote")]
        embedding: String,

        /// Defaults to the configured translation
        #[clap(short, long)]
        translation: Option<String>,

        /// Print verse text without locations
        #[clap(long, default_value = "false")]
        only_text: bool,

        #[clap(short)]
        k: Option<usize>,

        /// Print results as json
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Serve the search API over HTTP
    Serve {
        /// Address to bind, e.g. 0.0.0.0:8080
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// List configured translations
    Translations {},
}
