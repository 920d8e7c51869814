//! fieldlink CLI - recover, reconcile and gate extracted field records.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use fieldlink_core::{
    eligibility_breakdown, filter_records_with_all_previous_values_validated,
    filter_verified_validations, should_include_unverified_data, ExtractionObserver, GateConfig,
    InputRecord, PersistedValidation, Reconciler, ResponseParser, ToolDefinition, TracingObserver,
};
use fieldlink_runtime::RecordingObserver;

#[derive(Parser, Debug)]
#[command(
    name = "fieldlink",
    version,
    about = "Recover, reconcile and gate extracted field records"
)]
struct Cli {
    /// Raise log level to debug
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print extraction events to stderr as JSON lines
    #[arg(long, global = true)]
    events: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Recover candidate records from raw backend output
    Parse {
        /// File holding the raw response text
        response: PathBuf,
    },

    /// Parse a response and reconcile it against input records
    Reconcile(ReconcileArgs),

    /// Query persisted validations
    Gate {
        #[command(subcommand)]
        command: GateCommand,
    },

    /// Validate a tool definition (YAML or JSON)
    CheckTool {
        definition: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ReconcileArgs {
    #[arg(long)]
    tool: PathBuf,

    #[arg(long)]
    response: PathBuf,

    /// JSON array of input records
    #[arg(long)]
    inputs: Option<PathBuf>,

    /// JSON array of existing identified records
    #[arg(long)]
    reference: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum GateCommand {
    /// Keep validations whose status the gate config accepts
    Filter {
        #[arg(long)]
        validations: PathBuf,

        /// YAML or JSON gate config; defaults when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Identifiers whose predecessor-step values are all validated
    Eligible {
        #[arg(long)]
        validations: PathBuf,

        /// Predecessor step id (repeatable)
        #[arg(long = "step")]
        steps: Vec<String>,
    },

    /// Whether a step should still show unreviewed values
    Bootstrap {
        #[arg(long)]
        validations: PathBuf,

        #[arg(long)]
        step: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let recorder = Arc::new(RecordingObserver::new());
    let observer: Arc<dyn ExtractionObserver> = if cli.events {
        recorder.clone()
    } else {
        Arc::new(TracingObserver)
    };

    let output = run(cli.command, observer)?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    for event in recorder.drain() {
        eprintln!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands, observer: Arc<dyn ExtractionObserver>) -> Result<Value> {
    match command {
        Commands::Parse { response } => {
            let raw = read_text(&response)?;
            let parsed = ResponseParser::new()
                .with_observer(observer)
                .parse_detailed(&raw)?;
            tracing::info!(
                tier = ?parsed.tier,
                truncated = parsed.truncated,
                recovered = parsed.recovered_count(),
                "Parsed response"
            );
            Ok(Value::Array(parsed.candidates))
        }

        Commands::Reconcile(args) => reconcile(args, observer),

        Commands::Gate { command } => gate(command),

        Commands::CheckTool { definition } => {
            let tool = ToolDefinition::from_file(&definition)
                .with_context(|| format!("Invalid tool definition {}", definition.display()))?;
            Ok(json!({
                "name": tool.name,
                "operation": tool.operation,
                "backend": tool.backend,
                "batchSize": tool.batch_size,
                "parameters": tool.parameters.len(),
                "fields": tool.fields.len(),
            }))
        }
    }
}

fn reconcile(args: ReconcileArgs, observer: Arc<dyn ExtractionObserver>) -> Result<Value> {
    let tool = ToolDefinition::from_file(&args.tool)
        .with_context(|| format!("Invalid tool definition {}", args.tool.display()))?;
    let raw = read_text(&args.response)?;
    let inputs: Option<Vec<InputRecord>> = args.inputs.as_deref().map(read_json).transpose()?;
    let reference: Option<Vec<InputRecord>> =
        args.reference.as_deref().map(read_json).transpose()?;

    let candidates = ResponseParser::new()
        .with_observer(Arc::clone(&observer))
        .parse(&raw)?;
    let result = Reconciler::new().with_observer(observer).reconcile(
        &tool.meta(),
        &candidates,
        inputs.as_deref(),
        reference.as_deref(),
    );

    for warning in &result.warnings {
        tracing::warn!(?warning, "Reconciliation gap");
    }
    Ok(serde_json::to_value(&result.records)?)
}

fn gate(command: GateCommand) -> Result<Value> {
    match command {
        GateCommand::Filter {
            validations,
            config,
        } => {
            let validations: Vec<PersistedValidation> = read_json(&validations)?;
            let config = match config {
                Some(path) => serde_yaml::from_str::<GateConfig>(&read_text(&path)?)
                    .with_context(|| format!("Invalid gate config {}", path.display()))?,
                None => GateConfig::default(),
            };
            let kept = filter_verified_validations(&validations, &config);
            Ok(serde_json::to_value(kept)?)
        }

        GateCommand::Eligible { validations, steps } => {
            let validations: Vec<PersistedValidation> = read_json(&validations)?;
            let eligibility = filter_records_with_all_previous_values_validated(&validations, &steps);
            let blocked = eligibility_breakdown(&validations, &steps);
            Ok(json!({
                "eligibility": eligibility,
                "blocked": blocked,
            }))
        }

        GateCommand::Bootstrap { validations, step } => {
            let validations: Vec<PersistedValidation> = read_json(&validations)?;
            let include = should_include_unverified_data(&validations, &step);
            Ok(json!({ "step": step, "includeUnverified": include }))
        }
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = read_text(path)?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use fieldlink_core::NullObserver;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fieldlink-cli-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_gate_eligible_with_repeated_steps() {
        let cli = Cli::try_parse_from([
            "fieldlink", "gate", "eligible", "--validations", "v.json", "--step", "s1", "--step", "s2",
        ])
        .unwrap();
        match cli.command {
            Commands::Gate {
                command: GateCommand::Eligible { steps, .. },
            } => assert_eq!(steps, vec!["s1", "s2"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_command() {
        let dir = scratch("parse");
        let response = write(&dir, "response.txt", "```json\n[{\"extractedValue\": 1}]\n```");

        let output = run(Commands::Parse { response }, Arc::new(NullObserver)).unwrap();

        assert_eq!(output, json!([{"extractedValue": 1}]));
    }

    #[test]
    fn test_reconcile_command() {
        let dir = scratch("reconcile");
        let tool = write(
            &dir,
            "tool.yaml",
            "name: t\noperation: updateMultiple\nparameters:\n  - {name: rows, kind: array}\n",
        );
        let response = write(&dir, "response.txt", r#"[{"identifierId":"b","extractedValue":"B"}]"#);
        let inputs = write(&dir, "inputs.json", r#"[{"identifierId":"a"},{"identifierId":"b"}]"#);

        let output = run(
            Commands::Reconcile(ReconcileArgs {
                tool,
                response,
                inputs: Some(inputs),
                reference: None,
            }),
            Arc::new(NullObserver),
        )
        .unwrap();

        assert_eq!(output[0]["identifierId"], "a");
        assert_eq!(output[0]["extractedValue"], "Not Found");
        assert_eq!(output[1]["extractedValue"], "B");
    }

    const VALIDATIONS: &str = r#"[
        {"identifierId": "r1", "stepId": "s1", "fieldName": "law", "extractedValue": "NY", "validationStatus": "valid"},
        {"identifierId": "r2", "stepId": "s1", "fieldName": "law", "extractedValue": "CA", "validationStatus": "pending"},
        {"identifierId": "r3", "stepId": "s1", "fieldName": "law", "extractedValue": "TX", "validationStatus": "extracted"}
    ]"#;

    #[test]
    fn test_gate_filter_command() {
        let dir = scratch("filter");
        let validations = write(&dir, "validations.json", VALIDATIONS);
        let config = write(&dir, "gate.yaml", "includeExtracted: true
");

        let defaults = gate(GateCommand::Filter {
            validations: validations.clone(),
            config: None,
        })
        .unwrap();
        let widened = gate(GateCommand::Filter {
            validations,
            config: Some(config),
        })
        .unwrap();

        let ids = |output: &Value| -> Vec<String> {
            output
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v["identifierId"].as_str().unwrap().to_string())
                .collect()
        };
        assert_eq!(ids(&defaults), vec!["r1"]);
        assert_eq!(ids(&widened), vec!["r1", "r3"]);
    }

    #[test]
    fn test_gate_eligible_command() {
        let dir = scratch("eligible");
        let validations = write(&dir, "validations.json", VALIDATIONS);

        let output = gate(GateCommand::Eligible {
            validations,
            steps: vec!["s1".to_string()],
        })
        .unwrap();

        assert_eq!(output["eligibility"], json!({"kind": "only", "identifiers": ["r1", "r3"]}));
        assert_eq!(output["blocked"], json!({"r2": ["law"]}));
    }

    #[test]
    fn test_gate_bootstrap_command() {
        let dir = scratch("bootstrap");
        let validations = write(&dir, "validations.json", "[]");

        let output = gate(GateCommand::Bootstrap {
            validations,
            step: "s1".to_string(),
        })
        .unwrap();

        assert_eq!(output["includeUnverified"], true);
    }

    #[test]
    fn test_check_tool_rejects_invalid_definition() {
        let dir = scratch("check");
        let definition = write(&dir, "bad.yaml", "name: t\noperation: upsert\nparameters: []\n");

        let err = run(Commands::CheckTool { definition }, Arc::new(NullObserver)).unwrap_err();

        assert!(format!("{:#}", err).contains("schema"));
    }
}
