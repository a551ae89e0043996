use chrono::Utc;
use log::{error, info};
use serde::Serialize;
use std::path::{Path, PathBuf};
use weather_hub::services::seed;
use weather_hub::{Config, Error, NodeFields, Storage};

const USAGE: &str = "usage: weather-hub [--env-file PATH] <command> [args]

commands:
  nodes                 list registered nodes
  node <id>             show one node
  status <id>           show one node with its computed liveness
  register <json>       register a node, e.g. '{\"id\":\"rpi_hub\"}'
  reading <id>          current reading of a node
  history <id> [limit]  newest-first reading history
  submit <id> <json>    record a reading, e.g. '{\"temperature\":23.5,\"humidity\":55}'
  seed <id> [count]     fill a node with synthetic readings
  version               print the version";

const DEFAULT_SEED_COUNT: usize = 96;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, Default)]
struct Cli {
    env_file: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_cli() -> Result<Cli, String> {
    let mut args = std::env::args().skip(1);
    let mut cli = Cli::default();

    while let Some(arg) = args.next() {
        let path = if arg == "--env-file" {
            Some(args.next().ok_or_else(|| "`--env-file` requires a path argument".to_string())?)
        } else if let Some(path) = arg.strip_prefix("--env-file=") {
            Some(path.to_string())
        } else {
            None
        };
        match path {
            Some(path) if path.is_empty() => return Err("`--env-file` requires a path argument".to_string()),
            Some(_) if cli.env_file.is_some() => return Err("`--env-file` provided more than once".to_string()),
            Some(path) => cli.env_file = Some(PathBuf::from(path)),
            None => {
                cli.command.push(arg);
                cli.command.extend(args.by_ref());
            }
        }
    }
    Ok(cli)
}

fn load_env(explicit: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }

    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if !default_path.is_file() {
        return Ok(None);
    }
    load_env_file(&default_path)?;
    Ok(Some(LoadedEnvFile {
        path: default_path,
        explicit: false,
    }))
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in content.lines().enumerate() {
        let Some((key, value)) =
            parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        // Values already present in the process environment win.
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// `KEY=value`, optionally prefixed by `export` and with single or double quotes.
/// Blank lines and `#` comments yield `None`.
fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, raw) = line.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("invalid environment variable name: {:?}", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(quote @ ('"' | '\'')) => parse_quoted(&raw[1..], quote)?,
        _ => raw.split('#').next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

/// Body of a quoted value up to its closing `quote`. Double quotes honour the
/// `\n`, `\r`, `\t`, `\\` and `\"` escapes; single quotes are literal.
fn parse_quoted(input: &str, quote: char) -> Result<String, String> {
    let mut value = String::new();
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if quote == '"' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('r') => value.push('\r'),
                Some('t') => value.push('\t'),
                Some(other) => value.push(other),
                None => return Err("unterminated escape sequence in double-quoted value".to_string()),
            },
            ch if ch == quote => {
                let rest = chars.as_str().trim();
                if rest.is_empty() || rest.starts_with('#') {
                    return Ok(value);
                }
                return Err("unexpected characters after closing quote".to_string());
            }
            other => value.push(other),
        }
    }
    Err(format!("unterminated {} quoted value", quote))
}

fn run(command: &[String]) -> Result<(), String> {
    if command.first().map(String::as_str) == Some("version") {
        println!("{} (git {})", env!("CARGO_PKG_VERSION"), env!("BUILD_TIME_GIT_HASH"));
        return Ok(());
    }
    if command.is_empty() {
        return Err(USAGE.to_string());
    }

    let cfg = Config::from_env()?;
    info!(
        "Config loaded (data_dir={}, in_memory={}, compaction={}, history_limit={})",
        cfg.data_dir.display(),
        cfg.in_memory,
        cfg.compaction_interval
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "off".to_string()),
        cfg.history_limit
    );

    let storage = Storage::open(&cfg).map_err(|e| format!("opening storage failed: {}", e))?;
    let result = dispatch(&storage, command);
    storage.close().map_err(describe)?;
    result
}

fn dispatch(storage: &Storage, args: &[String]) -> Result<(), String> {
    let arg = |i: usize, name: &str| {
        args.get(i)
            .map(String::as_str)
            .ok_or_else(|| format!("missing <{}>\n\n{}", name, USAGE))
    };

    match args[0].as_str() {
        "nodes" => print_json(&storage.list_nodes().map_err(describe)?),
        "node" => print_json(&storage.get_node(arg(1, "id")?).map_err(describe)?),
        "status" => print_json(&storage.node_status(arg(1, "id")?, Utc::now()).map_err(describe)?),
        "register" => {
            let fields = NodeFields::from_json(arg(1, "json")?).map_err(describe)?;
            print_json(&storage.create_node(fields).map_err(describe)?)
        }
        "reading" => print_json(&storage.current_reading(arg(1, "id")?).map_err(describe)?),
        "history" => {
            let limit = args.get(2).map(String::as_str);
            print_json(&storage.reading_history(arg(1, "id")?, limit).map_err(describe)?)
        }
        "submit" => {
            let stored = storage
                .submit_reading_json(arg(1, "id")?, arg(2, "json")?)
                .map_err(describe)?;
            print_json(&stored)
        }
        "seed" => {
            let count = match args.get(2) {
                Some(s) => s.parse::<usize>().map_err(|_| format!("invalid count: {}", s))?,
                None => DEFAULT_SEED_COUNT,
            };
            let stored = seed::run(storage, arg(1, "id")?, count).map_err(describe)?;
            info!("Seeded {} reading(s)", stored);
            Ok(())
        }
        other => Err(format!("unknown command: {}\n\n{}", other, USAGE)),
    }
}

fn describe(e: Error) -> String {
    if e.is_retry_safe() {
        e.to_string()
    } else {
        format!("{} (retrying may duplicate the history entry)", e)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| format!("serializing output failed: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn main() {
    let cli = match parse_cli() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let loaded_env = match load_env(cli.env_file) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    if let Err(e) = run(&cli.command) {
        error!("{}", e);
        std::process::exit(1);
    }
}
