use anyhow::{anyhow, Context, Result};
use scene_bridge::registry::BridgeRegistry;
use std::env;
use std::path::PathBuf;
use std::process;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(err) = run() {
        eprintln!("bridge_routes error: {err:?}");
        process::exit(1);
    }
}

#[derive(Default)]
struct CliOptions {
    registry: Option<PathBuf>,
    json: bool,
    show_help: bool,
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = parse_cli_args(&args)?;
    if options.show_help {
        print_usage();
        return Ok(());
    }
    let registry = match &options.registry {
        Some(path) => BridgeRegistry::load(path)?,
        None => BridgeRegistry::builtin(),
    };
    let routes = registry.describe_routes();
    if options.json {
        let text = serde_json::to_string_pretty(&routes).context("serialize route table")?;
        println!("{text}");
    } else {
        print!("{routes}");
    }
    Ok(())
}

fn parse_cli_args(args: &[String]) -> Result<CliOptions> {
    let mut options = CliOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--registry" => {
                let value = iter.next().ok_or_else(|| anyhow!("--registry requires a path"))?;
                options.registry = Some(PathBuf::from(value));
            }
            "--json" => options.json = true,
            "--help" | "-h" => options.show_help = true,
            _ if arg.starts_with("--registry=") => {
                options.registry = Some(PathBuf::from(&arg["--registry=".len()..]));
            }
            _ => return Err(anyhow!("unknown argument '{arg}'")),
        }
    }
    Ok(options)
}

fn print_usage() {
    println!("Usage: bridge_routes [--registry PATH] [--json]");
    println!("Prints the category fallback methods and signal bindings of a bridge registry.");
    println!("Without --registry the built-in registry is shown.");
}
