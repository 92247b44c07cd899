use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use fun_ast::{pretty_print, Node};
use fun_codegen::{emit_program, EmitOptions};
use fun_lexer::{FileId, Lexer, SourceMap};
use fun_parser::{parse_source_with_depth, DEFAULT_MAX_DEPTH};
use fun_resolve::{resolve, Resolution, ResolveOptions, RuntimeAsset};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod diagnostic;

#[derive(Parser, Debug)]
#[command(name = "fun", version, about = "Compiler for the fun reactive UI language")]
struct Cli {
    /// Log more (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show lexer output (tokens)
    Lex { file: PathBuf },
    /// Show parser output (AST)
    Parse {
        file: PathBuf,
        /// Print the tree as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the resolved tree, modules and declarations
    Resolve {
        file: PathBuf,
        /// Print the tree as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        resolve: ResolveArgs,
    },
    /// Compile to a JavaScript bundle for the fun runtime
    Build {
        file: PathBuf,
        #[command(flatten)]
        resolve: ResolveArgs,
        /// Make the program log its start to the browser console
        #[arg(long)]
        runtime_log: bool,
        /// Write the bundle here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a shell completion script
    Completions { shell: Shell },
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// Directory of importable modules [default: <file dir>/modules]
    #[arg(long = "modules", value_name = "DIR")]
    modules: Option<PathBuf>,
    /// Strip indentation from the bundle
    #[arg(long)]
    minify: bool,
    /// Nesting limit for parsing and resolution
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut sources = SourceMap::new();
    match run(cli.command, &mut sources) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            diagnostic::report(&err, &sources);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(command: Command, sources: &mut SourceMap) -> anyhow::Result<()> {
    match command {
        Command::Lex { file } => run_lexer(&file, sources),
        Command::Parse { file, json } => {
            let ast = parse_file(&file, sources, DEFAULT_MAX_DEPTH)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ast)?);
            } else {
                print!("{}", pretty_print(&ast));
            }
            Ok(())
        }
        Command::Resolve { file, json, resolve } => {
            let resolution = resolve_file(&file, &resolve, sources)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&resolution.ast)?);
            } else {
                print_resolution(&resolution);
            }
            Ok(())
        }
        Command::Build { file, resolve, runtime_log, output } => {
            let resolution = resolve_file(&file, &resolve, sources)?;
            let program = emit_program(&resolution, &EmitOptions { runtime_log })?;
            let bundle = bundle(&resolution, &program)?;
            match output {
                Some(path) => {
                    fs::write(&path, bundle).with_context(|| format!("could not write {}", path.display()))?;
                    info!("wrote {}", path.display());
                }
                None => print!("{}", bundle),
            }
            Ok(())
        }
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "fun", &mut io::stdout());
            Ok(())
        }
    }
}

fn load(path: &Path, sources: &mut SourceMap) -> anyhow::Result<FileId> {
    let text = fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))?;
    Ok(sources.add(path, text))
}

fn run_lexer(path: &Path, sources: &mut SourceMap) -> anyhow::Result<()> {
    let file = load(path, sources)?;
    let tokens = Lexer::tokenize(sources.text(file).unwrap_or_default(), file)?;

    println!("{:<10} {:<10} {:<8} {}", "LINE:COL", "SPAN", "KIND", "VALUE");
    println!("{}", "-".repeat(44));
    for token in &tokens {
        let position = format!("{}:{}", token.line, token.column);
        let span = format!("{}..{}", token.span.start, token.span.end);
        println!("{:<10} {:<10} {:<8} {}", position, span, token.kind.to_string(), token);
    }
    println!("\nTotal tokens: {}", tokens.len());
    Ok(())
}

fn parse_file(path: &Path, sources: &mut SourceMap, max_depth: usize) -> anyhow::Result<Vec<Node>> {
    let file = load(path, sources)?;
    let ast = parse_source_with_depth(sources.text(file).unwrap_or_default(), file, max_depth)?;
    debug!(statements = ast.len(), "parsed {}", path.display());
    Ok(ast)
}

fn resolve_file(path: &Path, args: &ResolveArgs, sources: &mut SourceMap) -> anyhow::Result<Resolution> {
    let ast = parse_file(path, sources, args.max_depth)?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let options = ResolveOptions {
        modules_root: args.modules.clone().unwrap_or_else(|| base_dir.join("modules")),
        base_dir,
        minify: args.minify,
        max_depth: args.max_depth,
    };
    Ok(resolve(ast, options, sources)?)
}

fn print_resolution(resolution: &Resolution) {
    print!("{}", pretty_print(&resolution.ast));
    if !resolution.modules.is_empty() {
        println!("\n=== Modules ===");
        for module in &resolution.modules {
            let asset = match &module.asset {
                RuntimeAsset::Script(path) => path.display().to_string(),
                RuntimeAsset::Placeholder(_) => "no runtime script".to_string(),
            };
            println!("{} ({})", module.name, asset);
        }
    }
    if !resolution.declarations.is_empty() {
        println!("\n=== Declarations ===");
        print!("{}", pretty_print(&resolution.declarations));
    }
}

/// Module runtime scripts in import order, then the program
fn bundle(resolution: &Resolution, program: &str) -> anyhow::Result<String> {
    let mut out = String::new();
    for module in &resolution.modules {
        match &module.asset {
            RuntimeAsset::Script(path) => {
                let script = fs::read_to_string(path)
                    .with_context(|| format!("could not read runtime script {}", path.display()))?;
                out.push_str(&script);
            }
            RuntimeAsset::Placeholder(text) => out.push_str(text),
        }
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str(program);
    Ok(if resolution.minify { minify(&out) } else { out })
}

fn minify(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for line in code.lines().map(str::trim_start).filter(|l| !l.is_empty()) {
        out.push_str(line);
        out.push('\n');
    }
    out
}
