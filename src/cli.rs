use clap::{Args, Parser, Subcommand};

/// Ask a language model about your terminal session
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub talk: TalkArgs,
}

impl Cli {
    /// The action to run; talking is the default.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Talk(self.talk))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a prompt, with terminal context, to the model
    Talk(TalkArgs),
    /// List the models of every usable provider
    Models(ModelsArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct TalkArgs {
    /// The prompt for the assistant
    pub prompt: Vec<String>,

    /// Model to use, as provider/model
    #[arg(short, long)]
    pub model: Option<String>,

    /// Provider to look a bare model id up in
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Number of history lines to include (0 uses the configured size, negative means all)
    #[arg(short = 'H', long, default_value_t = 0, allow_negative_numbers = true)]
    pub history_size: i64,

    /// Capture every tmux pane of the current window
    #[arg(long)]
    pub all_panes: bool,

    /// System message name from the configuration, or literal text
    #[arg(short, long)]
    pub system: Option<String>,

    /// Print the composed messages instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Leave out all terminal context
    #[arg(long)]
    pub no_context: bool,

    #[arg(long)]
    pub no_pwd: bool,

    #[arg(long)]
    pub no_shell: bool,

    #[arg(long)]
    pub no_history: bool,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    /// Do not offer tools to the model
    #[arg(long)]
    pub no_tools: bool,

    /// Show debug logging on the console
    #[arg(short, long)]
    pub verbose: bool,
}

impl TalkArgs {
    pub fn prompt_text(&self) -> String {
        self.prompt.join(" ")
    }
}

#[derive(Args, Debug, Default, Clone)]
pub struct ModelsArgs {
    /// Query each backend's full catalog instead of the curated list
    #[arg(long)]
    pub full: bool,

    /// Show debug logging on the console
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_talk_is_the_default() {
        let cli = Cli::try_parse_from(["assistant", "-m", "openai/gpt-4o", "list", "files"]).unwrap();
        match cli.into_command() {
            Command::Talk(args) => {
                assert_eq!(args.prompt_text(), "list files");
                assert_eq!(args.model.as_deref(), Some("openai/gpt-4o"));
                assert_eq!(args.history_size, 0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_explicit_subcommands() {
        let cli = Cli::try_parse_from(["assistant", "models", "--full"]).unwrap();
        assert!(matches!(cli.into_command(), Command::Models(ModelsArgs { full: true, .. })));

        let cli = Cli::try_parse_from(["assistant", "talk", "--no-tools", "-H", "-1", "hi"]).unwrap();
        match cli.into_command() {
            Command::Talk(args) => {
                assert!(args.no_tools);
                assert_eq!(args.history_size, -1);
                assert_eq!(args.prompt_text(), "hi");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
