use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context as _, bail};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nl_webtest::browser::{BrowserLauncher, MockElement, MockLauncher, MockPage};
use nl_webtest::plan::SAMPLE_DESCRIPTIONS;
use nl_webtest::{Config, HttpInferenceClient, PlanGenerator, TestContext, TestRunner};

/// Sample description used by `check`
const CHECK_DESCRIPTION: &str = "Log in and verify that the product list is shown";

/// nl-webtest - run web tests written in plain language
#[derive(Parser, Debug)]
#[command(
    name = "nl-webtest",
    about = "Generate browser action plans from plain-language test descriptions and run them",
    after_help = "ENVIRONMENT VARIABLES:\n\
        NL_WEBTEST_LLM_ENDPOINT    Inference service URL\n\
        NL_WEBTEST_LLM_API         ollama or openai\n\
        NL_WEBTEST_LLM_MODEL       Model name\n\
        NL_WEBTEST_BASE_URL        Default base URL\n\
        NL_WEBTEST_HEADLESS        Run the browser headless\n\
        NL_WEBTEST_STEP_DELAY      Pause between steps (ms)\n\
        NL_WEBTEST_RUN_PACING      Pause between batch runs (ms)\n\
        NL_WEBTEST_SCREENSHOT_DIR  Screenshot directory\n\
        NL_WEBTEST_RESULTS_DIR     Result directory\n\
        NL_WEBTEST_SAVE_RESULTS    Persist run summaries\n\
        RUST_LOG                   Log filter (overrides -v)"
)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the application under test
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Login username
    #[arg(long, global = true)]
    username: Option<String>,

    /// Login password
    #[arg(long, global = true)]
    password: Option<String>,

    /// Use the in-memory browser instead of Chromium
    #[arg(long, global = true)]
    mock: bool,

    /// Run the browser without a window
    #[arg(long, global = true)]
    headless: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one test description
    Run {
        description: String,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run several test descriptions one after another
    Batch {
        descriptions: Vec<String>,

        /// Read descriptions from a file, one per line ('#' starts a comment)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print the batch summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate and print an action plan without executing it
    Plan { description: String },

    /// Check the inference service and generate a sample plan
    Check,

    /// Print the effective test context and configuration
    Context,

    /// List sample test descriptions
    Examples,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = Config::from_env();
    if args.headless {
        config.executor.headless = true;
    }
    let context = build_context(&args, &config);

    match args.command {
        Commands::Run { ref description, json } => {
            let runner = build_runner(&config, &context, args.mock)?;
            let summary = runner.run_one(description, &context);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", summary);
            }
            Ok(exit_code(summary.success))
        }

        Commands::Batch {
            ref descriptions,
            ref file,
            json,
        } => {
            let mut all = descriptions.clone();
            if let Some(path) = file {
                all.extend(read_descriptions(path)?);
            }
            if all.is_empty() {
                bail!("no test descriptions given (pass them as arguments or with --file)");
            }

            let runner = build_runner(&config, &context, args.mock)?;
            let batch = runner.run_many(&all, &context);
            if json {
                println!("{}", serde_json::to_string_pretty(&batch)?);
            } else {
                println!("{}", batch);
            }
            Ok(exit_code(batch.failed == 0))
        }

        Commands::Plan { ref description } => {
            let generator = build_generator(&config)?;
            let plan = generator.generate(description, &context)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Check => {
            let client = HttpInferenceClient::new(&config.inference)?;
            println!("Inference endpoint: {} ({})", config.inference.endpoint, config.inference.api);

            let models = client
                .check_health()
                .with_context(|| format!("inference service at {} is not reachable", config.inference.endpoint))?;
            println!("Service reachable");
            if !models.is_empty() {
                println!("Installed models: {}", models.join(", "));
                if !models.iter().any(|m| m == &config.inference.model) {
                    println!("Warning: model '{}' is not installed", config.inference.model);
                }
            }

            let generator = PlanGenerator::new(Box::new(client), &config.inference, &config.planner);
            let plan = generator.generate(CHECK_DESCRIPTION, &context)?;
            println!("Sample plan ({} steps): {}", plan.len(), plan.reasoning);
            for step in plan.steps().unwrap_or(&[]) {
                println!("  - {}", step.describe());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Context => {
            println!("{}", serde_json::to_string_pretty(&context)?);
            println!("{:#?}", config);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Examples => {
            for (area, samples) in SAMPLE_DESCRIPTIONS {
                println!("{}:", area);
                for sample in *samples {
                    println!("  nl-webtest run \"{}\"", sample);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "nl_webtest=info",
        1 => "nl_webtest=debug",
        _ => "nl_webtest=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_context(args: &Args, config: &Config) -> TestContext {
    let mut context = TestContext::default();
    context.base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| config.planner.default_base_url.clone());
    if let Some(username) = &args.username {
        context.credentials.username = username.clone();
    }
    if let Some(password) = &args.password {
        context.credentials.password = password.clone();
    }
    context
}

fn build_generator(config: &Config) -> anyhow::Result<PlanGenerator> {
    let client = HttpInferenceClient::new(&config.inference)?;
    Ok(PlanGenerator::new(Box::new(client), &config.inference, &config.planner))
}

fn build_runner(config: &Config, context: &TestContext, mock: bool) -> anyhow::Result<TestRunner> {
    let generator = build_generator(config)?;
    Ok(TestRunner::new(generator, build_launcher(config, context, mock)?, config))
}

fn build_launcher(config: &Config, context: &TestContext, mock: bool) -> anyhow::Result<Box<dyn BrowserLauncher>> {
    if mock {
        return Ok(Box::new(MockLauncher::new(mock_page(context))));
    }

    #[cfg(feature = "chromium")]
    {
        Ok(Box::new(nl_webtest::ChromiumLauncher::new(&config.executor)))
    }

    #[cfg(not(feature = "chromium"))]
    {
        let _ = config;
        bail!("built without the `chromium` feature; rebuild with `--features chromium` or pass --mock")
    }
}

/// In-memory page exposing every selector hint of the context
fn mock_page(context: &TestContext) -> MockPage {
    context
        .selector_hints
        .values()
        .fold(MockPage::new().title("nl-webtest mock page"), |page, selector| {
            page.element(selector.clone(), MockElement::new())
        })
}

/// Descriptions from a file: one per line, blank lines and '#' comments skipped
fn read_descriptions(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn exit_code(success: bool) -> ExitCode {
    if success { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
