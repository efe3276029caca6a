pub mod bytecode;
pub mod cli;
pub mod frontend;
pub mod lang;
pub mod stream;

use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;

use crate::bytecode::compile::{Compilation, CompileOptions, Compiler, compile_stream};
use crate::bytecode::disasm::decompile;
use crate::bytecode::object_file::{ObjectFile, write_object};
use crate::cli::{Cli, MessageFormat};
use crate::frontend::lexer::analyse;
use crate::frontend::preprocess::PassThrough;
use crate::frontend::token_dumper::TokenDumper;
use crate::frontend::token_stream;
use crate::lang::diagnostic::Diagnostics;
use crate::stream::FileStreams;

pub fn run() -> anyhow::Result<ExitCode> {
    let args = Cli::parse();
    let input = args.input.display().to_string();

    if args.decompile {
        let file = File::open(&args.input).with_context(|| format!("Opening {}", input))?;
        let object = ObjectFile::read(&mut BufReader::new(file))
            .with_context(|| format!("Reading object file {}", input))?;
        print!("{}", decompile(&object));
        return Ok(ExitCode::SUCCESS);
    }

    let mut options = CompileOptions::new(args.flags());
    options.defines = args.defines.clone();
    options.include_paths = args.include_paths.clone();

    // ── Token-only modes ─────────────────────────────────────────────
    if args.tokens || args.emit_tokens.is_some() {
        let source =
            std::fs::read_to_string(&args.input).with_context(|| format!("Reading {}", input))?;
        let (tokens, diagnostics) = analyse(&source, options.flags, &input);

        if args.tokens {
            let mut dumper = TokenDumper::new();
            if args.no_color {
                dumper = dumper.no_color();
            }
            dumper.dump(&tokens);
        }
        if let Some(path) = &args.emit_tokens {
            let bytes = token_stream::encode(&tokens, &options.defines)
                .with_context(|| "Encoding token stream")?;
            std::fs::write(path, bytes)
                .with_context(|| format!("Writing {}", path.display()))?;
        }
        report(&diagnostics, args.message_format)?;
        return Ok(exit_code(!diagnostics.has_errors()));
    }

    // ── Compile ──────────────────────────────────────────────────────
    let mut streams = FileStreams::new();
    let compilation = if args.pretokenized {
        let bytes = std::fs::read(&args.input).with_context(|| format!("Reading {}", input))?;
        let stream = token_stream::decode(&bytes)
            .with_context(|| format!("Decoding token stream {}", input))?;
        options.defines = stream.defines;
        Compiler::new(options).compile(stream.tokens)
    } else {
        match compile_stream(&mut streams, &input, &options, &mut PassThrough)
            .with_context(|| format!("Reading {}", input))?
        {
            Some(compilation) => compilation,
            None => bail!("cannot open {}", input),
        }
    };

    report(&compilation.diagnostics, args.message_format)?;
    let Compilation { object, .. } = compilation;
    let Some(object) = object else {
        return Ok(ExitCode::FAILURE);
    };

    // ── Write outputs ────────────────────────────────────────────────
    let output = args.output_path();
    let url = output.display().to_string();
    if !write_object(&mut streams, &url, &object).with_context(|| format!("Writing {}", url))? {
        bail!("cannot create {}", url);
    }
    if args.disasm {
        print!("{}", decompile(&object));
    }
    Ok(ExitCode::SUCCESS)
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

/// Prints every diagnostic to stderr, then the count summary.
fn report(diagnostics: &Diagnostics, format: MessageFormat) -> anyhow::Result<()> {
    for diagnostic in diagnostics {
        match format {
            MessageFormat::Human => eprintln!("{}", diagnostic),
            MessageFormat::Json => eprintln!(
                "{}",
                serde_json::to_string(diagnostic).with_context(|| "Serializing diagnostic")?
            ),
        }
    }
    eprintln!("{}", diagnostics.summary());
    Ok(())
}
