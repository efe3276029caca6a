use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::frontend::preprocess::Define;
use crate::lang::flags::CompileFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    Human,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Script source, token stream (--pretokenized) or object file (--decompile)
    pub input: PathBuf,

    /// Object file to write; defaults to the input with a .kof extension
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Emit breakpoints and the debug table
    #[arg(long)]
    pub debug: bool,

    /// Compile as a library (no default engine state required)
    #[arg(long)]
    pub library: bool,

    /// Treat warnings as errors
    #[arg(long)]
    pub werror: bool,

    /// Treat messages as errors
    #[arg(long)]
    pub wmessages: bool,

    /// Skip the peephole optimizer
    #[arg(long)]
    pub no_optimize: bool,

    /// Predefine NAME or NAME=VALUE for the preprocessor
    #[arg(short = 'D', value_name = "NAME[=VALUE]")]
    pub defines: Vec<Define>,

    /// Extra include directory for the preprocessor
    #[arg(short = 'I', value_name = "DIR")]
    pub include_paths: Vec<PathBuf>,

    /// Print the token list and stop
    #[arg(long)]
    pub tokens: bool,

    /// Disable colours in --tokens output
    #[arg(long)]
    pub no_color: bool,

    /// Print the decompiled listing after compiling
    #[arg(long)]
    pub disasm: bool,

    /// Treat the input as an object file and print its listing
    #[arg(long, conflicts_with_all = ["tokens", "pretokenized"])]
    pub decompile: bool,

    /// How diagnostics are printed
    #[arg(long, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,

    /// Write the lexed tokens as a binary token stream and stop
    #[arg(long, value_name = "FILE")]
    pub emit_tokens: Option<PathBuf>,

    /// The input is a binary token stream that was already preprocessed
    #[arg(long)]
    pub pretokenized: bool,
}

impl Cli {
    pub fn flags(&self) -> CompileFlags {
        let mut flags = CompileFlags::empty();
        flags.set(CompileFlags::DEBUG, self.debug);
        flags.set(CompileFlags::LIBRARY, self.library);
        flags.set(CompileFlags::TREAT_WARNINGS_AS_ERRORS, self.werror);
        flags.set(CompileFlags::TREAT_MESSAGES_AS_ERRORS, self.wmessages);
        flags.set(CompileFlags::NO_OPTIMIZE, self.no_optimize);
        flags
    }

    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => self.input.with_extension("kof"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("kindle").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["main.ks"]);
        assert!(cli.flags().is_empty());
        assert_eq!(cli.output_path(), PathBuf::from("main.kof"));
        assert_eq!(cli.message_format, MessageFormat::Human);
    }

    #[test]
    fn test_flags_and_defines() {
        let cli = parse(&[
            "main.ks",
            "--debug",
            "--werror",
            "-D",
            "LEVEL=3",
            "-DFAST",
            "-I",
            "lib",
            "-o",
            "out.kof",
            "--message-format",
            "json",
        ]);
        assert_eq!(
            cli.flags(),
            CompileFlags::DEBUG | CompileFlags::TREAT_WARNINGS_AS_ERRORS
        );
        assert_eq!(
            cli.defines,
            vec![Define::new("LEVEL", "3"), Define::new("FAST", "")]
        );
        assert_eq!(cli.include_paths, vec![PathBuf::from("lib")]);
        assert_eq!(cli.output_path(), PathBuf::from("out.kof"));
        assert_eq!(cli.message_format, MessageFormat::Json);
    }

    #[test]
    fn test_bad_define_is_rejected() {
        let parsed = Cli::try_parse_from(["kindle", "main.ks", "-D", "1BAD"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_decompile_conflicts_with_tokens() {
        let parsed = Cli::try_parse_from(["kindle", "main.kof", "--decompile", "--tokens"]);
        assert!(parsed.is_err());
    }
}
