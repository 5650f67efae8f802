use std::collections::BTreeMap;
use std::io::{self, Read};
use std::sync::Arc;

use sg_core::config::{Config, ConfirmationMode};
use sg_core::logging::init_logging;
use sg_core::output::format_output;
use sg_core::permissions::PermissionAnalyzer;
use sg_core::policy::WhitelistValidator;
use sg_core::rules::{parse_rules, RuleStore};
use sg_core::translate::adapt_for_platform;
use sg_core::{CommandPipeline, PipelineOutcome, PipelineRequest, SecurityOrchestrator};
use sg_protocol::{OutputFormat, Platform};

const USAGE_ERROR: i32 = 2;

fn print_help() {
    println!("shellgate: validate, confirm and run shell commands safely");
    println!();
    println!("Usage:");
    println!("  shellgate validate <command>              Print the verdict as JSON");
    println!("  shellgate permissions <command>           Print required permissions");
    println!("  shellgate adapt --target <platform> <command>");
    println!("                                            Rewrite for windows, linux or macos");
    println!("  shellgate run [options] <command>         Validate, confirm and execute");
    println!("  shellgate rules show|reset|load <file>    Inspect or replace the rule set");
    println!("  shellgate format --format <fmt>           Render stdin as raw, json or table");
    println!();
    println!("Run options:");
    println!("  --sandbox          Execute inside the OS sandbox");
    println!("  --format <fmt>     Output rendering: raw (default), json, table");
    println!("  --target <p>       Dialect to adapt the command to");
    println!("  --yes              Approve confirmation prompts");
    println!();
    println!("Options:");
    println!("  --version         Print version");
    println!("  --help            Print this help");
}

fn usage_error(msg: &str) -> i32 {
    eprintln!("error: {msg}");
    eprintln!("run 'shellgate --help' for usage");
    USAGE_ERROR
}

/// Flags before the command text, then the command itself. The first
/// positional argument (or `--`) ends flag parsing.
#[derive(Debug, Default)]
struct Parsed {
    switches: Vec<String>,
    values: BTreeMap<String, String>,
    command: String,
}

impl Parsed {
    fn has(&self, flag: &str) -> bool {
        self.switches.iter().any(|s| s == flag)
    }
}

fn parse_args(args: &[String], switches: &[&str], valued: &[&str]) -> Result<Parsed, String> {
    let mut parsed = Parsed::default();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        if arg == "--" {
            i += 1;
            break;
        }
        if switches.contains(&arg) {
            parsed.switches.push(arg.to_string());
        } else if valued.contains(&arg) {
            let value = args
                .get(i + 1)
                .ok_or_else(|| format!("{arg} needs a value"))?;
            parsed.values.insert(arg.to_string(), value.clone());
            i += 1;
        } else if arg.starts_with("--") {
            return Err(format!("unknown option '{arg}'"));
        } else {
            break;
        }
        i += 1;
    }
    parsed.command = args[i..].join(" ");
    Ok(parsed)
}

fn load_validator(config: &Config) -> Result<WhitelistValidator, i32> {
    WhitelistValidator::load(RuleStore::new(config.policy.resolve_rules_path())).map_err(|e| {
        eprintln!("[sg] error: {e}");
        1
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{s}");
            0
        }
        Err(e) => {
            eprintln!("[sg] error: {e}");
            1
        }
    }
}

fn cmd_validate(config: &Config, args: &[String]) -> i32 {
    let parsed = match parse_args(args, &[], &[]) {
        Ok(p) if !p.command.trim().is_empty() => p,
        Ok(_) => return usage_error("validate needs a command"),
        Err(e) => return usage_error(&e),
    };
    let validator = match load_validator(config) {
        Ok(v) => v,
        Err(code) => return code,
    };
    let result = validator.validate(&parsed.command);
    let code = print_json(&result);
    if code == 0 && !result.is_valid {
        1
    } else {
        code
    }
}

fn cmd_permissions(args: &[String]) -> i32 {
    let parsed = match parse_args(args, &[], &[]) {
        Ok(p) if !p.command.trim().is_empty() => p,
        Ok(_) => return usage_error("permissions needs a command"),
        Err(e) => return usage_error(&e),
    };
    let permissions = PermissionAnalyzer::new().check_permissions(&parsed.command);
    print_json(&permissions)
}

fn parse_target(parsed: &Parsed) -> Result<Option<Platform>, String> {
    parsed
        .values
        .get("--target")
        .map(|t| t.parse::<Platform>())
        .transpose()
}

fn cmd_adapt(args: &[String]) -> i32 {
    let parsed = match parse_args(args, &[], &["--target"]) {
        Ok(p) if !p.command.trim().is_empty() => p,
        Ok(_) => return usage_error("adapt needs a command"),
        Err(e) => return usage_error(&e),
    };
    let target = match parse_target(&parsed) {
        Ok(Some(t)) => t,
        Ok(None) => return usage_error("adapt needs --target"),
        Err(e) => return usage_error(&e),
    };
    println!("{}", adapt_for_platform(&parsed.command, target));
    0
}

fn parse_format(parsed: &Parsed) -> Result<OutputFormat, String> {
    match parsed.values.get("--format") {
        Some(f) => f.parse(),
        None => Ok(OutputFormat::Raw),
    }
}

fn cmd_run(mut config: Config, args: &[String]) -> i32 {
    let parsed = match parse_args(args, &["--sandbox", "--yes"], &["--format", "--target"]) {
        Ok(p) if !p.command.trim().is_empty() => p,
        Ok(_) => return usage_error("run needs a command"),
        Err(e) => return usage_error(&e),
    };
    let (format, target) = match (parse_format(&parsed), parse_target(&parsed)) {
        (Ok(f), Ok(t)) => (f, t),
        (Err(e), _) | (_, Err(e)) => return usage_error(&e),
    };
    if parsed.has("--yes") {
        config.confirmation.mode = ConfirmationMode::Approve;
    }

    let orchestrator = match SecurityOrchestrator::from_config(&config) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("[sg] error: {e}");
            return 1;
        }
    };
    let pipeline = CommandPipeline::new(Arc::new(orchestrator));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("[sg] error: failed to create async runtime: {e}");
            return 1;
        }
    };

    let request = PipelineRequest {
        sandbox: parsed.has("--sandbox"),
        target,
        ..PipelineRequest::new(parsed.command)
    };
    let outcome = match runtime.block_on(pipeline.handle(request)) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("[sg] error: {e}");
            return 1;
        }
    };

    match outcome {
        PipelineOutcome::Blocked { validation, .. } => {
            eprintln!(
                "[sg] blocked ({} risk)",
                validation.risk_assessment.as_str()
            );
            for reason in &validation.blocked_reasons {
                eprintln!("  - {reason}");
            }
            if !validation.suggested_alternatives.is_empty() {
                eprintln!("[sg] try instead:");
                for alt in &validation.suggested_alternatives {
                    eprintln!("  {alt}");
                }
            }
            1
        }
        PipelineOutcome::Declined { response, .. } => {
            eprintln!("[sg] not run: confirmation {}", response.outcome.as_str());
            1
        }
        PipelineOutcome::Executed { result, .. } => {
            match format {
                OutputFormat::Raw => print!("{}", result.stdout),
                other => println!("{}", format_output(&result.stdout, other)),
            }
            eprint!("{}", result.stderr);
            if result.success {
                0
            } else if (1..=255).contains(&result.return_code) {
                result.return_code
            } else {
                1
            }
        }
    }
}

fn cmd_rules(config: &Config, args: &[String]) -> i32 {
    let validator = match load_validator(config) {
        Ok(v) => v,
        Err(code) => return code,
    };
    let outcome = match args.first().map(String::as_str) {
        Some("show") => return print_json(&validator.rules()),
        Some("reset") => validator.reset_to_defaults(),
        Some("load") => {
            let Some(path) = args.get(1) else {
                return usage_error("rules load needs a file");
            };
            let rules = match std::fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|s| parse_rules(&s).map_err(|e| e.to_string()))
            {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("[sg] error: {path}: {e}");
                    return 1;
                }
            };
            validator.update_rules(rules)
        }
        Some(other) => return usage_error(&format!("unknown rules action '{other}'")),
        None => return usage_error("rules needs show, reset or load"),
    };
    match outcome {
        Ok(()) => {
            let active = validator.snapshot();
            eprintln!(
                "[sg] {} rules active, {} skipped",
                active.active_len(),
                active.skipped_len()
            );
            0
        }
        Err(e) => {
            eprintln!("[sg] error: {e}");
            1
        }
    }
}

fn cmd_format(args: &[String]) -> i32 {
    let parsed = match parse_args(args, &[], &["--format"]) {
        Ok(p) => p,
        Err(e) => return usage_error(&e),
    };
    let format = match parse_format(&parsed) {
        Ok(f) => f,
        Err(e) => return usage_error(&e),
    };
    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        eprintln!("[sg] error: reading stdin: {e}");
        return 1;
    }
    match format {
        OutputFormat::Raw => print!("{input}"),
        other => println!("{}", format_output(&input, other)),
    }
    0
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Re-exec entry point for sandboxed children. Never returns.
    if args.first().map(String::as_str) == Some("--sandbox-exec") {
        sg_sandbox::exec_sandboxed(&args[1..]);
    }

    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        print_help();
        return;
    }

    if args[0] == "--version" || args[0] == "-V" {
        println!("shellgate {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let config = Config::load_or_default();
    init_logging(&config.logging.filter);

    let rest = &args[1..];
    let code = match args[0].as_str() {
        "validate" => cmd_validate(&config, rest),
        "permissions" => cmd_permissions(rest),
        "adapt" => cmd_adapt(rest),
        "run" => cmd_run(config, rest),
        "rules" => cmd_rules(&config, rest),
        "format" => cmd_format(rest),
        other => usage_error(&format!("unknown command '{other}'")),
    };
    std::process::exit(code);
}
