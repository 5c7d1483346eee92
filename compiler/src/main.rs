use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use dflc::config::{Overrides, RendererKind, ServerConfig};
use dflc::expand::ExpandOptions;
use dflc::pass::descriptor;
use dflc::pipeline::{compile_with, CompileOptions};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Pretty-printed source
    Ast,
    /// Textual port-graph dump
    Graph,
    /// Port-graph, signature and warnings as JSON
    Json,
    /// Graphviz DOT
    Dot,
    /// Generator-set signature
    Typing,
}

#[derive(Parser, Debug)]
#[command(
    name = "dflc",
    version,
    about = "Dataflow diagram compiler: expands .dfl box definitions into port-graphs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a .dfl file
    Compile(CompileArgs),
    /// Run the HTTP service
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct CompileArgs {
    /// Input .dfl source file
    source: PathBuf,

    /// Recursive levels inlined before truncation
    #[arg(short, long, default_value_t = 0)]
    depth: usize,

    /// Root definition (default: `main`, else the last one)
    #[arg(long)]
    root: Option<String>,

    /// Generator symbol bound to a universal parameter of the root (repeatable)
    #[arg(short = 'g', long = "generator")]
    generators: Vec<String>,

    /// Infer the generator-set signature
    #[arg(long)]
    typing: bool,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Dot)]
    emit: EmitStage,

    /// Output file path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Node budget for expansion
    #[arg(long, default_value_t = 100_000)]
    max_nodes: usize,

    /// Print compiler passes and timing
    #[arg(long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:5000
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    #[arg(long, value_enum)]
    renderer: Option<RendererKind>,

    /// Directory of front-end files served for unmatched routes
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dflc=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Compile(args) => run_compile(args),
        Command::Serve(args) => run_serve(args).await,
    }
}

fn run_compile(args: CompileArgs) {
    if args.verbose {
        eprintln!("dflc: source = {}", args.source.display());
        eprintln!("dflc: depth  = {}", args.depth);
        eprintln!("dflc: emit   = {:?}", args.emit);
    }

    let source = match std::fs::read_to_string(&args.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("dflc: error: {}: {}", args.source.display(), e);
            std::process::exit(2);
        }
    };

    let options = CompileOptions {
        root: args.root.clone(),
        generators: (!args.generators.is_empty()).then(|| args.generators.clone()),
        typing: args.typing || args.emit == EmitStage::Typing,
        expand: ExpandOptions {
            max_depth: args.depth,
            max_nodes: args.max_nodes,
            deadline: None,
        },
    };
    let verbose = args.verbose;
    let result = compile_with(&source, &options, |pass, _, elapsed| {
        if verbose {
            eprintln!(
                "dflc: {} complete, {:.1}ms",
                descriptor(pass).name,
                elapsed.as_secs_f64() * 1000.0
            );
        }
    });

    let compilation = match result {
        Ok(c) => c,
        Err(err) => {
            for diag in &err.diagnostics {
                eprintln!("{}: {}", args.source.display(), diag);
            }
            std::process::exit(1);
        }
    };
    for warning in &compilation.warnings {
        eprintln!("{}: {}", args.source.display(), warning);
    }
    if verbose {
        eprintln!(
            "dflc: root `{}`: {} nodes, {} edges, {} truncated",
            compilation.root,
            compilation.graph.nodes().len(),
            compilation.graph.edges().len(),
            compilation.graph.truncated_count()
        );
    }

    let text = match args.emit {
        EmitStage::Ast => compilation.program.to_string(),
        EmitStage::Graph => compilation.graph.to_string(),
        EmitStage::Dot => compilation.dot(),
        EmitStage::Typing => format!("{}\n", compilation.typing()),
        EmitStage::Json => {
            let doc = serde_json::json!({
                "root": compilation.root,
                "fingerprint": compilation.fingerprint,
                "graph": compilation.graph,
                "signature": compilation.signature,
                "warnings": compilation
                    .warnings
                    .iter()
                    .map(dflc::serve::error::diagnostic_json)
                    .collect::<Vec<_>>(),
            });
            match serde_json::to_string_pretty(&doc) {
                Ok(s) => s + "\n",
                Err(e) => {
                    eprintln!("dflc: error: {}", e);
                    std::process::exit(2);
                }
            }
        }
    };

    match &args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("dflc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{text}"),
    }
}

async fn run_serve(args: ServeArgs) {
    let overrides = Overrides {
        bind: args.bind,
        renderer: args.renderer,
        static_dir: args.static_dir,
    };
    let config = match ServerConfig::load(
        args.config.as_deref(),
        |key| std::env::var(key).ok(),
        &overrides,
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dflc: error: {}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = dflc::serve::serve(config).await {
        eprintln!("dflc: error: {}", e);
        std::process::exit(2);
    }
}
