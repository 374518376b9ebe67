use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kbchat")]
#[command(author, version, about = "Streaming Q&A console for knowledge bases", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Resume an existing session by id (default: new session)
        #[arg(long)]
        session_id: Option<String>,

        /// Knowledge-base ids to ground answers in (omit for general chat)
        #[arg(short = 'k', long = "kb", value_delimiter = ',')]
        knowledge_bases: Vec<i64>,

        /// LLM model id override
        #[arg(short = 'm', long)]
        model: Option<String>,
    },

    /// List past sessions grouped by age
    Sessions,

    /// List enabled LLM models
    Models,

    /// List the user's knowledge bases
    Kbs,

    /// Delete a session and all of its history
    DeleteSession { session_id: String },
}
